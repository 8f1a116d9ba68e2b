//! Connection engine scenarios
//!
//! A server [`Connection`] is driven by a hand-rolled peer that writes
//! frames directly, so both well-formed and malformed traffic can be
//! produced. Client-side behavior is exercised by pairing two engines.

use bytes::{Bytes, BytesMut};
use h2engine::http::h2::codec::{FrameCodec, FRAME_HEADER_SIZE};
use h2engine::http::h2::config::FloodLimits;
use h2engine::http::h2::frames::*;
use h2engine::http::h2::hpack::{Decoder, Encoder, HeaderField};
use h2engine::http::h2::*;
use std::time::Duration;

const GET: &[(&str, &str)] = &[
    (":method", "GET"),
    (":scheme", "https"),
    (":path", "/"),
    (":authority", "localhost"),
];

/// The other end of the wire, speaking raw frames
struct Peer {
    codec: FrameCodec,
    encoder: Encoder,
    decoder: Decoder,
}

impl Peer {
    fn new() -> Self {
        let mut codec = FrameCodec::new();
        codec.set_max_frame_size(16_777_215);
        Peer {
            codec,
            encoder: Encoder::new(4096),
            decoder: Decoder::new(4096),
        }
    }

    fn block(&mut self, pairs: &[(&str, &str)]) -> Bytes {
        let fields: Vec<HeaderField> = pairs.iter().map(|(n, v)| HeaderField::new(n, v)).collect();
        let mut buf = BytesMut::new();
        self.encoder.encode(&fields, &mut buf);
        buf.freeze()
    }

    fn headers(&mut self, stream_id: u32, pairs: &[(&str, &str)], end_stream: bool) -> Frame {
        let block = self.block(pairs);
        HeadersFrame::new(stream_id, block, end_stream, true).into()
    }

    /// Frames the connection has written since the last call
    fn read(&mut self, conn: &mut Connection) -> Vec<Frame> {
        self.codec.extend(&conn.take_outbound());
        let mut frames = Vec::new();
        while let Some(frame) = self.codec.decode().unwrap() {
            frames.push(frame);
        }
        frames
    }

    fn decode(&mut self, block: &Bytes) -> Vec<(String, String)> {
        self.decoder
            .decode(block.clone())
            .unwrap()
            .into_iter()
            .map(|f| {
                (
                    f.name_str().unwrap().to_string(),
                    f.value_str().unwrap().to_string(),
                )
            })
            .collect()
    }
}

fn send(conn: &mut Connection, frame: Frame) -> Result<()> {
    conn.receive(&FrameCodec::encode(&frame))
}

fn events(conn: &mut Connection) -> Vec<Event> {
    std::iter::from_fn(|| conn.poll_event()).collect()
}

fn server_with(config: ConnectionConfig, peer_settings: Settings) -> (Connection, Peer) {
    let mut server = Connection::server(config);
    let mut peer = Peer::new();
    server.receive(CONNECTION_PREFACE).unwrap();
    send(&mut server, SettingsFrame::new(peer_settings).into()).unwrap();
    send(&mut server, SettingsFrame::ack().into()).unwrap();
    peer.read(&mut server);
    events(&mut server);
    (server, peer)
}

fn handshake(profile: ConformanceProfile) -> (Connection, Peer) {
    let config = ConnectionConfigBuilder::server().profile(profile).build().unwrap();
    server_with(config, Settings::new())
}

fn goaway(frames: &[Frame]) -> Option<&GoawayFrame> {
    frames.iter().find_map(|f| match f {
        Frame::Goaway(g) => Some(g),
        _ => None,
    })
}

fn rst_stream(frames: &[Frame], stream_id: u32) -> Option<ErrorCode> {
    frames.iter().find_map(|f| match f {
        Frame::RstStream(r) if r.stream_id == stream_id => Some(r.error_code),
        _ => None,
    })
}

fn expect_connection_error(conn: &mut Connection, peer: &mut Peer, result: Result<()>, code: ErrorCode) {
    let err = result.unwrap_err();
    assert!(err.is_connection_error(), "expected connection error, got {:?}", err);
    assert_eq!(err.code(), Some(code));
    assert_eq!(conn.state(), ConnectionState::Closed);
    let frames = peer.read(conn);
    let goaways: Vec<_> = frames.iter().filter(|f| matches!(f, Frame::Goaway(_))).collect();
    assert_eq!(goaways.len(), 1, "exactly one GOAWAY: {:?}", frames);
    assert_eq!(goaway(&frames).unwrap().error_code, code);
}

fn expect_stream_reset(conn: &mut Connection, peer: &mut Peer, result: Result<()>, stream_id: u32, code: ErrorCode) {
    result.unwrap();
    assert_ne!(conn.state(), ConnectionState::Closed);
    let frames = peer.read(conn);
    assert_eq!(rst_stream(&frames, stream_id), Some(code), "frames: {:?}", frames);
    assert!(goaway(&frames).is_none());
}

// ---------------------------------------------------------------------------
// Requests and responses
// ---------------------------------------------------------------------------

#[test]
fn test_request_response() {
    let (mut server, mut peer) = handshake(ConformanceProfile::Strict);
    let frame = peer.headers(1, GET, true);
    send(&mut server, frame).unwrap();

    let evs = events(&mut server);
    assert_eq!(evs.len(), 1);
    match &evs[0] {
        Event::Headers { stream_id, head, end_stream } => {
            assert_eq!(*stream_id, 1);
            assert!(end_stream);
            assert_eq!(head.method(), Some("GET"));
            assert_eq!(head.path(), Some("/"));
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(server.stream_state(1), StreamState::HalfClosedRemote);

    let head = HeaderBlock::response(200).header("content-type", "text/plain");
    server.send_response(1, &head, Bytes::from_static(b"hello")).unwrap();
    assert_eq!(server.stream_state(1), StreamState::Closed);

    let frames = peer.read(&mut server);
    assert_eq!(frames.len(), 2);
    match &frames[0] {
        Frame::Headers(h) => {
            assert!(!h.end_stream);
            let fields = peer.decode(&h.header_block);
            assert_eq!(fields[0], (":status".to_string(), "200".to_string()));
            assert_eq!(fields[1], ("content-type".to_string(), "text/plain".to_string()));
        }
        other => panic!("expected HEADERS, got {:?}", other),
    }
    assert!(matches!(&frames[1], Frame::Data(d) if d.end_stream && &d.data[..] == b"hello"));
}

#[test]
fn test_request_body_and_trailers() {
    let mut client = Connection::client(ConnectionConfig::client());
    let mut server = Connection::server(ConnectionConfig::server());

    let head = HeaderBlock::request("POST", "https", "/upload").with_authority("localhost");
    let id = client.open_stream(head, false).unwrap();
    client.send_data(id, Bytes::from_static(b"part one,"), false).unwrap();
    client.send_data(id, Bytes::from_static(b"part two"), false).unwrap();
    client
        .send_trailers(id, &HeaderBlock::new().header("x-checksum", "abc123"))
        .unwrap();
    assert_eq!(client.stream_state(id), StreamState::HalfClosedLocal);

    server.receive(&client.take_outbound()).unwrap();
    let evs: Vec<Event> = events(&mut server)
        .into_iter()
        .filter(|e| !matches!(e, Event::Settings(_) | Event::SettingsAcked))
        .collect();

    assert!(matches!(&evs[0], Event::Headers { end_stream: false, .. }));
    let body: Vec<u8> = evs
        .iter()
        .filter_map(|e| match e {
            Event::Data { data, .. } => Some(data.to_vec()),
            _ => None,
        })
        .flatten()
        .collect();
    assert_eq!(body, b"part one,part two");
    match evs.last() {
        Some(Event::Trailers { stream_id, head }) => {
            assert_eq!(*stream_id, id);
            assert_eq!(head.get("x-checksum"), Some("abc123"));
        }
        other => panic!("expected trailers, got {:?}", other),
    }
    assert_eq!(server.stream_state(id), StreamState::HalfClosedRemote);
}

#[test]
fn test_response_trailers_follow_data() {
    let (mut server, mut peer) = handshake(ConformanceProfile::Strict);
    let frame = peer.headers(1, GET, true);
    send(&mut server, frame).unwrap();
    peer.read(&mut server);

    server.send_headers(1, &HeaderBlock::response(200), false).unwrap();
    server.send_data(1, Bytes::from_static(b"body"), false).unwrap();
    server
        .send_trailers(1, &HeaderBlock::new().header("grpc-status", "0"))
        .unwrap();

    let frames = peer.read(&mut server);
    assert_eq!(frames.len(), 3);
    assert!(matches!(&frames[1], Frame::Data(d) if !d.end_stream));
    match &frames[2] {
        Frame::Headers(h) => {
            assert!(h.end_stream);
            assert_eq!(peer.decode(&h.header_block), vec![("grpc-status".to_string(), "0".to_string())]);
        }
        other => panic!("expected trailers, got {:?}", other),
    }
    assert_eq!(server.stream_state(1), StreamState::Closed);
}

#[test]
fn test_trailers_without_end_stream() {
    for profile in [ConformanceProfile::Strict, ConformanceProfile::Lenient] {
        let (mut server, mut peer) = handshake(profile);
        let frame = peer.headers(1, GET, false);
        send(&mut server, frame).unwrap();
        peer.read(&mut server);

        let frame = peer.headers(1, &[("x-trailer", "1")], false);
        let result = send(&mut server, frame);
        expect_stream_reset(&mut server, &mut peer, result, 1, ErrorCode::ProtocolError);
    }
}

#[test]
fn test_large_body_split_by_max_frame_size() {
    let (mut server, mut peer) = handshake(ConformanceProfile::Strict);
    let frame = peer.headers(1, GET, true);
    send(&mut server, frame).unwrap();
    peer.read(&mut server);

    server
        .send_response(1, &HeaderBlock::response(200), Bytes::from(vec![7u8; 40_000]))
        .unwrap();
    let frames = peer.read(&mut server);
    let sizes: Vec<usize> = frames
        .iter()
        .filter_map(|f| match f {
            Frame::Data(d) => Some(d.data.len()),
            _ => None,
        })
        .collect();
    assert_eq!(sizes, vec![16384, 16384, 7232]);
    assert_eq!(server.connection_send_window(), 65535 - 40_000);
}

#[test]
fn test_continuation_assembly() {
    let (mut server, mut peer) = handshake(ConformanceProfile::Strict);
    let long = "v".repeat(300);
    let block = peer.block(&[
        (":method", "GET"),
        (":scheme", "https"),
        (":path", "/continued"),
        (":authority", "localhost"),
        ("x-long", long.as_str()),
    ]);
    let (first, rest) = block.split_at(10);
    let (middle, last) = rest.split_at(100);

    send(&mut server, HeadersFrame::new(1, Bytes::copy_from_slice(first), true, false).into()).unwrap();
    assert!(server.is_awaiting_continuation());
    for (chunk, end) in [(middle, false), (last, true)] {
        let frame = Frame::Continuation(ContinuationFrame {
            stream_id: 1,
            header_block: Bytes::copy_from_slice(chunk),
            end_headers: end,
        });
        send(&mut server, frame).unwrap();
    }
    assert!(!server.is_awaiting_continuation());

    match events(&mut server).as_slice() {
        [Event::Headers { head, end_stream: true, .. }] => {
            assert_eq!(head.path(), Some("/continued"));
            assert_eq!(head.get("x-long").map(str::len), Some(300));
        }
        other => panic!("unexpected events {:?}", other),
    }
}

#[test]
fn test_large_response_headers_use_continuation() {
    let (mut server, mut peer) = handshake(ConformanceProfile::Strict);
    let frame = peer.headers(1, GET, true);
    send(&mut server, frame).unwrap();
    peer.read(&mut server);

    let big = "x".repeat(20_000);
    let head = HeaderBlock::response(200).header("x-big", &big);
    server.send_response(1, &head, Bytes::new()).unwrap();

    let frames = peer.read(&mut server);
    let mut block = BytesMut::new();
    match &frames[0] {
        Frame::Headers(h) => {
            assert!(!h.end_headers);
            assert!(h.end_stream);
            block.extend_from_slice(&h.header_block);
        }
        other => panic!("expected HEADERS, got {:?}", other),
    }
    match &frames[1] {
        Frame::Continuation(c) => {
            assert!(c.end_headers);
            block.extend_from_slice(&c.header_block);
        }
        other => panic!("expected CONTINUATION, got {:?}", other),
    }
    let fields = peer.decode(&block.freeze());
    assert_eq!(fields[1].1.len(), 20_000);
}

#[test]
fn test_frame_interleaved_in_header_block() {
    for profile in [ConformanceProfile::Strict, ConformanceProfile::Lenient] {
        let (mut server, mut peer) = handshake(profile);
        let block = peer.block(GET);
        send(&mut server, HeadersFrame::new(1, block, true, false).into()).unwrap();
        let result = send(&mut server, PingFrame::new([0; 8]).into());
        expect_connection_error(&mut server, &mut peer, result, ErrorCode::ProtocolError);
    }
}

#[test]
fn test_continuation_on_other_stream() {
    let (mut server, mut peer) = handshake(ConformanceProfile::Lenient);
    let block = peer.block(GET);
    send(&mut server, HeadersFrame::new(1, block, true, false).into()).unwrap();
    let frame = Frame::Continuation(ContinuationFrame {
        stream_id: 3,
        header_block: Bytes::new(),
        end_headers: true,
    });
    let result = send(&mut server, frame);
    expect_connection_error(&mut server, &mut peer, result, ErrorCode::ProtocolError);
}

#[test]
fn test_continuation_without_headers() {
    let (mut server, mut peer) = handshake(ConformanceProfile::Strict);
    let frame = peer.headers(1, GET, true);
    send(&mut server, frame).unwrap();
    let frame = Frame::Continuation(ContinuationFrame {
        stream_id: 1,
        header_block: Bytes::new(),
        end_headers: true,
    });
    let result = send(&mut server, frame);
    expect_connection_error(&mut server, &mut peer, result, ErrorCode::ProtocolError);
}

// ---------------------------------------------------------------------------
// Stream states
// ---------------------------------------------------------------------------

#[test]
fn test_data_on_idle_stream() {
    let (mut server, mut peer) = handshake(ConformanceProfile::Strict);
    let result = send(&mut server, DataFrame::new(1, Bytes::from_static(b"x"), false).into());
    expect_connection_error(&mut server, &mut peer, result, ErrorCode::ProtocolError);

    let (mut server, mut peer) = handshake(ConformanceProfile::Lenient);
    let result = send(&mut server, DataFrame::new(1, Bytes::from_static(b"x"), false).into());
    expect_stream_reset(&mut server, &mut peer, result, 1, ErrorCode::StreamClosed);
}

#[test]
fn test_reset_idle_stream_uses_up_its_id() {
    let (mut server, mut peer) = handshake(ConformanceProfile::Lenient);
    let result = send(&mut server, DataFrame::new(5, Bytes::from_static(b"x"), false).into());
    expect_stream_reset(&mut server, &mut peer, result, 5, ErrorCode::StreamClosed);
    assert_eq!(server.highest_peer_stream_id(), 5);

    // higher ids still open
    let frame = peer.headers(7, GET, true);
    send(&mut server, frame).unwrap();
    assert_eq!(server.stream_state(7), StreamState::HalfClosedRemote);

    // a lower id can no longer be opened
    let (mut server, mut peer) = handshake(ConformanceProfile::Lenient);
    let result = send(&mut server, DataFrame::new(5, Bytes::from_static(b"x"), false).into());
    expect_stream_reset(&mut server, &mut peer, result, 5, ErrorCode::StreamClosed);
    let frame = peer.headers(3, GET, true);
    let result = send(&mut server, frame);
    expect_connection_error(&mut server, &mut peer, result, ErrorCode::ProtocolError);
}

#[test]
fn test_window_update_on_idle_stream() {
    let (mut server, mut peer) = handshake(ConformanceProfile::Strict);
    let result = send(&mut server, WindowUpdateFrame::new(5, 100).into());
    expect_connection_error(&mut server, &mut peer, result, ErrorCode::ProtocolError);

    let (mut server, mut peer) = handshake(ConformanceProfile::Lenient);
    let result = send(&mut server, WindowUpdateFrame::new(5, 100).into());
    expect_stream_reset(&mut server, &mut peer, result, 5, ErrorCode::StreamClosed);
}

#[test]
fn test_rst_stream_on_idle_stream() {
    let (mut server, mut peer) = handshake(ConformanceProfile::Strict);
    let frame = Frame::RstStream(RstStreamFrame {
        stream_id: 3,
        error_code: ErrorCode::Cancel,
    });
    let result = send(&mut server, frame);
    expect_connection_error(&mut server, &mut peer, result, ErrorCode::ProtocolError);
}

#[test]
fn test_priority_on_idle_stream_allowed() {
    for profile in [ConformanceProfile::Strict, ConformanceProfile::Lenient] {
        let (mut server, mut peer) = handshake(profile);
        let frame = Frame::Priority(PriorityFrame {
            stream_id: 9,
            priority: PrioritySpec::new(0, false, 32),
        });
        send(&mut server, frame).unwrap();
        assert!(peer.read(&mut server).is_empty());
        assert_eq!(server.stream_state(9), StreamState::Idle);

        // the stream can still be opened afterwards
        let frame = peer.headers(9, GET, true);
        send(&mut server, frame).unwrap();
        assert_eq!(server.stream_state(9), StreamState::HalfClosedRemote);
    }
}

#[test]
fn test_priority_on_many_idle_streams_is_bounded() {
    let limits = FloodLimits {
        max_control_frames: 10_000,
        ..FloodLimits::default()
    };
    let config = ConnectionConfigBuilder::server()
        .flood(limits)
        .max_closed_streams(16)
        .build()
        .unwrap();
    let (mut server, mut peer) = server_with(config, Settings::new());

    for i in 0..2000u32 {
        let frame = Frame::Priority(PriorityFrame {
            stream_id: 4 * i + 1,
            priority: PrioritySpec::new(4 * i + 3, false, 16),
        });
        send(&mut server, frame).unwrap();
    }
    assert!(peer.read(&mut server).is_empty());
    assert_eq!(server.state(), ConnectionState::Active);
    assert_eq!(server.priority_tree().idle_len(), 16);
    assert_eq!(server.priority_tree().len(), 16);
    assert!(!server.priority_tree().contains(1));

    // an id whose node was dropped still opens normally
    let frame = peer.headers(1, GET, true);
    send(&mut server, frame).unwrap();
    assert_eq!(server.stream_state(1), StreamState::HalfClosedRemote);
    assert!(server.priority_tree().contains(1));
}

#[test]
fn test_stream_depending_on_itself() {
    let (mut server, mut peer) = handshake(ConformanceProfile::Strict);
    let frame = Frame::Priority(PriorityFrame {
        stream_id: 3,
        priority: PrioritySpec::new(3, false, 16),
    });
    let result = send(&mut server, frame);
    expect_stream_reset(&mut server, &mut peer, result, 3, ErrorCode::ProtocolError);
}

#[test]
fn test_priority_bad_length_resets_stream() {
    let (mut server, mut peer) = handshake(ConformanceProfile::Strict);
    let bytes = FrameCodec::encode_raw(&RawFrame::new(0x2, 0, 5, vec![0u8; 4]));
    let result = server.receive(&bytes);
    expect_stream_reset(&mut server, &mut peer, result, 5, ErrorCode::FrameSizeError);

    // the connection keeps parsing after the bad frame
    send(&mut server, PingFrame::new(*b"stillok!").into()).unwrap();
    assert!(peer.read(&mut server).contains(&Frame::Ping(PingFrame::ack(*b"stillok!"))));
}

#[test]
fn test_data_after_end_stream() {
    for profile in [ConformanceProfile::Strict, ConformanceProfile::Lenient] {
        let (mut server, mut peer) = handshake(profile);
        let frame = peer.headers(1, GET, true);
        send(&mut server, frame).unwrap();
        peer.read(&mut server);

        let result = send(&mut server, DataFrame::new(1, Bytes::from_static(b"late"), false).into());
        expect_stream_reset(&mut server, &mut peer, result, 1, ErrorCode::StreamClosed);
    }
}

#[test]
fn test_headers_after_end_stream() {
    let (mut server, mut peer) = handshake(ConformanceProfile::Strict);
    let frame = peer.headers(1, GET, true);
    send(&mut server, frame).unwrap();
    peer.read(&mut server);

    let frame = peer.headers(1, &[("x-trailer", "1")], true);
    let result = send(&mut server, frame);
    expect_stream_reset(&mut server, &mut peer, result, 1, ErrorCode::StreamClosed);
}

#[test]
fn test_data_on_closed_stream_within_grace() {
    // Strict answers with RST_STREAM
    let (mut server, mut peer) = handshake(ConformanceProfile::Strict);
    let frame = peer.headers(1, GET, false);
    send(&mut server, frame).unwrap();
    server.reset_stream(1, ErrorCode::Cancel).unwrap();
    assert_eq!(rst_stream(&peer.read(&mut server), 1), Some(ErrorCode::Cancel));

    let result = send(&mut server, DataFrame::new(1, Bytes::from_static(b"racing"), false).into());
    expect_stream_reset(&mut server, &mut peer, result, 1, ErrorCode::StreamClosed);

    // Lenient absorbs the frame
    let (mut server, mut peer) = handshake(ConformanceProfile::Lenient);
    let frame = peer.headers(1, GET, false);
    send(&mut server, frame).unwrap();
    server.reset_stream(1, ErrorCode::Cancel).unwrap();
    peer.read(&mut server);

    send(&mut server, DataFrame::new(1, Bytes::from_static(b"racing"), false).into()).unwrap();
    assert!(peer.read(&mut server).is_empty());
    assert_eq!(server.state(), ConnectionState::Active);
    // the connection window was still charged
    assert_eq!(server.connection_recv_window(), 65535 - 6);
}

#[test]
fn test_frames_on_closed_stream_past_grace() {
    let config = ConnectionConfigBuilder::server()
        .closed_stream_grace(Duration::ZERO)
        .build()
        .unwrap();
    let (mut server, mut peer) = server_with(config.clone(), Settings::new());
    let frame = peer.headers(1, GET, true);
    send(&mut server, frame).unwrap();
    server.send_response(1, &HeaderBlock::response(204), Bytes::new()).unwrap();
    peer.read(&mut server);

    let result = send(&mut server, DataFrame::new(1, Bytes::from_static(b"x"), true).into());
    expect_connection_error(&mut server, &mut peer, result, ErrorCode::StreamClosed);

    let (mut server, mut peer) = server_with(config, Settings::new());
    let frame = peer.headers(1, GET, true);
    send(&mut server, frame).unwrap();
    server.send_response(1, &HeaderBlock::response(204), Bytes::new()).unwrap();
    peer.read(&mut server);

    let result = send(&mut server, WindowUpdateFrame::new(1, 10).into());
    expect_connection_error(&mut server, &mut peer, result, ErrorCode::ProtocolError);
}

#[test]
fn test_window_update_on_closed_stream_within_grace() {
    let (mut server, mut peer) = handshake(ConformanceProfile::Strict);
    let frame = peer.headers(1, GET, true);
    send(&mut server, frame).unwrap();
    server.send_response(1, &HeaderBlock::response(204), Bytes::new()).unwrap();
    peer.read(&mut server);

    send(&mut server, WindowUpdateFrame::new(1, 10).into()).unwrap();
    let frame = Frame::RstStream(RstStreamFrame {
        stream_id: 1,
        error_code: ErrorCode::Cancel,
    });
    send(&mut server, frame).unwrap();
    assert!(peer.read(&mut server).is_empty());
}

#[test]
fn test_stream_id_reuse() {
    for profile in [ConformanceProfile::Strict, ConformanceProfile::Lenient] {
        let (mut server, mut peer) = handshake(profile);
        let frame = peer.headers(1, GET, true);
        send(&mut server, frame).unwrap();
        server.send_response(1, &HeaderBlock::response(200), Bytes::new()).unwrap();
        peer.read(&mut server);

        let frame = peer.headers(1, GET, true);
        let result = send(&mut server, frame);
        expect_connection_error(&mut server, &mut peer, result, ErrorCode::ProtocolError);
    }
}

#[test]
fn test_stream_ids_must_increase() {
    let (mut server, mut peer) = handshake(ConformanceProfile::Lenient);
    let frame = peer.headers(5, GET, true);
    send(&mut server, frame).unwrap();
    let frame = peer.headers(3, GET, true);
    let result = send(&mut server, frame);
    expect_connection_error(&mut server, &mut peer, result, ErrorCode::ProtocolError);
}

#[test]
fn test_even_stream_from_client() {
    let (mut server, mut peer) = handshake(ConformanceProfile::Lenient);
    let frame = peer.headers(2, GET, true);
    let result = send(&mut server, frame);
    expect_connection_error(&mut server, &mut peer, result, ErrorCode::ProtocolError);
}

#[test]
fn test_peer_reset_closes_stream() {
    let (mut server, mut peer) = handshake(ConformanceProfile::Strict);
    let frame = peer.headers(1, GET, false);
    send(&mut server, frame).unwrap();
    events(&mut server);

    let frame = Frame::RstStream(RstStreamFrame {
        stream_id: 1,
        error_code: ErrorCode::Cancel,
    });
    send(&mut server, frame).unwrap();
    assert_eq!(
        events(&mut server),
        vec![Event::StreamReset {
            stream_id: 1,
            code: ErrorCode::Cancel,
            remote: true
        }]
    );
    assert_eq!(server.stream_state(1), StreamState::Closed);
    assert!(server.send_data(1, Bytes::from_static(b"x"), true).is_err());
    assert!(peer.read(&mut server).is_empty());
}

// ---------------------------------------------------------------------------
// Header validation and HPACK
// ---------------------------------------------------------------------------

#[test]
fn test_malformed_request_keeps_hpack_in_sync() {
    let (mut server, mut peer) = handshake(ConformanceProfile::Strict);
    let frame = peer.headers(
        1,
        &[
            (":method", "GET"),
            (":scheme", "https"),
            (":path", "/"),
            (":authority", "localhost"),
            ("X-Upper", "bad"),
        ],
        true,
    );
    let result = send(&mut server, frame);
    expect_stream_reset(&mut server, &mut peer, result, 1, ErrorCode::ProtocolError);

    // :authority localhost was indexed by the rejected block
    let frame = peer.headers(3, GET, true);
    send(&mut server, frame).unwrap();
    assert!(events(&mut server)
        .iter()
        .any(|e| matches!(e, Event::Headers { stream_id: 3, .. })));
}

#[test]
fn test_missing_pseudo_header() {
    let (mut server, mut peer) = handshake(ConformanceProfile::Strict);
    let frame = peer.headers(1, &[(":method", "GET"), (":path", "/")], true);
    let result = send(&mut server, frame);
    expect_stream_reset(&mut server, &mut peer, result, 1, ErrorCode::ProtocolError);
}

#[test]
fn test_connection_specific_header() {
    let (mut server, mut peer) = handshake(ConformanceProfile::Lenient);
    let mut fields = GET.to_vec();
    fields.push(("connection", "keep-alive"));
    let frame = peer.headers(1, &fields, true);
    let result = send(&mut server, frame);
    expect_stream_reset(&mut server, &mut peer, result, 1, ErrorCode::ProtocolError);
}

#[test]
fn test_pseudo_header_after_regular_field() {
    let fields = [
        (":method", "GET"),
        (":scheme", "https"),
        ("accept", "*/*"),
        (":path", "/"),
    ];

    let (mut server, mut peer) = handshake(ConformanceProfile::Strict);
    let frame = peer.headers(1, &fields, true);
    let result = send(&mut server, frame);
    expect_connection_error(&mut server, &mut peer, result, ErrorCode::CompressionError);

    let (mut server, mut peer) = handshake(ConformanceProfile::Lenient);
    let frame = peer.headers(1, &fields, true);
    let result = send(&mut server, frame);
    expect_stream_reset(&mut server, &mut peer, result, 1, ErrorCode::ProtocolError);
}

#[test]
fn test_invalid_hpack_block() {
    for profile in [ConformanceProfile::Strict, ConformanceProfile::Lenient] {
        let (mut server, mut peer) = handshake(profile);
        // indexed field 0 does not exist
        let frame = HeadersFrame::new(1, Bytes::from_static(&[0x80]), true, true).into();
        let result = send(&mut server, frame);
        expect_connection_error(&mut server, &mut peer, result, ErrorCode::CompressionError);
    }
}

#[test]
fn test_header_list_too_large() {
    let config = ConnectionConfigBuilder::server()
        .max_header_list_size(200)
        .build()
        .unwrap();
    let mut fields = GET.to_vec();
    let long = "a".repeat(300);
    fields.push(("x-long", long.as_str()));

    let (mut server, mut peer) = server_with(config.clone(), Settings::new());
    let frame = peer.headers(1, &fields, true);
    let result = send(&mut server, frame);
    expect_connection_error(&mut server, &mut peer, result, ErrorCode::ProtocolError);

    let lenient = ConnectionConfigBuilder::from(config)
        .profile(ConformanceProfile::Lenient)
        .build()
        .unwrap();
    let (mut server, mut peer) = server_with(lenient, Settings::new());
    let frame = peer.headers(1, &fields, true);
    let result = send(&mut server, frame);
    expect_stream_reset(&mut server, &mut peer, result, 1, ErrorCode::ProtocolError);
}

#[test]
fn test_content_length_mismatch() {
    let (mut server, mut peer) = handshake(ConformanceProfile::Strict);
    let mut fields = vec![
        (":method", "POST"),
        (":scheme", "https"),
        (":path", "/"),
        (":authority", "localhost"),
    ];
    fields.push(("content-length", "10"));
    let frame = peer.headers(1, &fields, false);
    send(&mut server, frame).unwrap();

    let result = send(&mut server, DataFrame::new(1, Bytes::from_static(b"short"), true).into());
    expect_stream_reset(&mut server, &mut peer, result, 1, ErrorCode::ProtocolError);
}

// ---------------------------------------------------------------------------
// Framing
// ---------------------------------------------------------------------------

#[test]
fn test_frame_exceeding_max_frame_size() {
    let (mut server, mut peer) = handshake(ConformanceProfile::Lenient);
    let frame = peer.headers(1, GET, false);
    send(&mut server, frame).unwrap();
    let result = send(&mut server, DataFrame::new(1, Bytes::from(vec![0u8; 16385]), false).into());
    expect_connection_error(&mut server, &mut peer, result, ErrorCode::FrameSizeError);
}

#[test]
fn test_bad_padding() {
    // pad length 20 in a 6 byte payload
    let bytes = FrameCodec::encode_raw(&RawFrame::new(0x0, FrameFlags::PADDED, 1, vec![20u8, 1, 2, 3, 4, 5]));

    let (mut server, mut peer) = handshake(ConformanceProfile::Strict);
    let frame = peer.headers(1, GET, false);
    send(&mut server, frame).unwrap();
    let result = server.receive(&bytes);
    expect_connection_error(&mut server, &mut peer, result, ErrorCode::ProtocolError);

    let (mut server, mut peer) = handshake(ConformanceProfile::Lenient);
    let frame = peer.headers(1, GET, false);
    send(&mut server, frame).unwrap();
    let result = server.receive(&bytes);
    expect_stream_reset(&mut server, &mut peer, result, 1, ErrorCode::StreamClosed);
    assert_eq!(server.connection_recv_window(), 65535 - 6);
}

#[test]
fn test_ping_on_stream() {
    let (mut server, mut peer) = handshake(ConformanceProfile::Lenient);
    let bytes = FrameCodec::encode_raw(&RawFrame::new(0x6, 0, 1, vec![0u8; 8]));
    let result = server.receive(&bytes);
    expect_connection_error(&mut server, &mut peer, result, ErrorCode::ProtocolError);
}

#[test]
fn test_unknown_frames_ignored() {
    let (mut server, mut peer) = handshake(ConformanceProfile::Strict);
    let bytes = FrameCodec::encode_raw(&RawFrame::new(0xbe, 0xff, 0, Bytes::from_static(b"ext")));
    server.receive(&bytes).unwrap();
    assert!(peer.read(&mut server).is_empty());
    assert!(events(&mut server).is_empty());
}

#[test]
fn test_bytes_split_across_reads() {
    let (mut server, mut peer) = handshake(ConformanceProfile::Strict);
    let frame = peer.headers(1, GET, true);
    let wire = FrameCodec::encode(&frame);
    for chunk in wire.chunks(3) {
        server.receive(chunk).unwrap();
    }
    assert_eq!(events(&mut server).len(), 1);
    assert!(wire.len() > FRAME_HEADER_SIZE);
}

// ---------------------------------------------------------------------------
// Settings, ping and flow control
// ---------------------------------------------------------------------------

#[test]
fn test_invalid_settings_values() {
    let cases: [(&[u8], ErrorCode); 3] = [
        (&[0, 2, 0, 0, 0, 2], ErrorCode::ProtocolError),
        (&[0, 4, 0x80, 0, 0, 0], ErrorCode::FlowControlError),
        (&[0, 5, 0x01, 0, 0, 0], ErrorCode::ProtocolError),
    ];
    for (payload, code) in cases {
        let (mut server, mut peer) = handshake(ConformanceProfile::Lenient);
        let bytes = FrameCodec::encode_raw(&RawFrame::new(0x4, 0, 0, payload.to_vec()));
        let result = server.receive(&bytes);
        expect_connection_error(&mut server, &mut peer, result, code);
    }
}

#[test]
fn test_settings_ack_with_payload() {
    let (mut server, mut peer) = handshake(ConformanceProfile::Strict);
    let bytes = FrameCodec::encode_raw(&RawFrame::new(0x4, FrameFlags::ACK, 0, vec![0u8; 6]));
    let result = server.receive(&bytes);
    expect_connection_error(&mut server, &mut peer, result, ErrorCode::FrameSizeError);
}

#[test]
fn test_ping_answered() {
    let (mut server, mut peer) = handshake(ConformanceProfile::Strict);
    send(&mut server, PingFrame::new(*b"pingpong").into()).unwrap();
    assert_eq!(peer.read(&mut server), vec![Frame::Ping(PingFrame::ack(*b"pingpong"))]);

    // acknowledgements are not answered
    send(&mut server, PingFrame::ack(*b"pingpong").into()).unwrap();
    assert!(peer.read(&mut server).is_empty());
    assert_eq!(
        events(&mut server),
        vec![Event::Ping(*b"pingpong"), Event::PingAck(*b"pingpong")]
    );
}

#[test]
fn test_window_update_zero_increment() {
    let (mut server, mut peer) = handshake(ConformanceProfile::Strict);
    let result = send(&mut server, WindowUpdateFrame::new(0, 0).into());
    expect_connection_error(&mut server, &mut peer, result, ErrorCode::ProtocolError);

    let (mut server, mut peer) = handshake(ConformanceProfile::Strict);
    let frame = peer.headers(1, GET, false);
    send(&mut server, frame).unwrap();
    let result = send(&mut server, WindowUpdateFrame::new(1, 0).into());
    expect_stream_reset(&mut server, &mut peer, result, 1, ErrorCode::ProtocolError);
}

#[test]
fn test_window_overflow() {
    let (mut server, mut peer) = handshake(ConformanceProfile::Strict);
    let result = send(&mut server, WindowUpdateFrame::new(0, 0x7fff_ffff).into());
    expect_connection_error(&mut server, &mut peer, result, ErrorCode::FlowControlError);

    let (mut server, mut peer) = handshake(ConformanceProfile::Strict);
    let frame = peer.headers(1, GET, false);
    send(&mut server, frame).unwrap();
    let result = send(&mut server, WindowUpdateFrame::new(1, 0x7fff_ffff).into());
    expect_stream_reset(&mut server, &mut peer, result, 1, ErrorCode::FlowControlError);
}

#[test]
fn test_send_blocked_until_window_update() {
    let peer_settings = SettingsBuilder::new().initial_window_size(16).build().unwrap();
    let (mut server, mut peer) = server_with(ConnectionConfig::server(), peer_settings);
    let frame = peer.headers(1, GET, true);
    send(&mut server, frame).unwrap();

    server
        .send_response(1, &HeaderBlock::response(200), Bytes::from(vec![b'a'; 40]))
        .unwrap();
    let frames = peer.read(&mut server);
    assert!(matches!(&frames[1], Frame::Data(d) if d.data.len() == 16 && !d.end_stream));
    assert_eq!(server.stream_send_window(1), Some(0));

    send(&mut server, WindowUpdateFrame::new(1, 10).into()).unwrap();
    let frames = peer.read(&mut server);
    assert!(matches!(&frames[..], [Frame::Data(d)] if d.data.len() == 10 && !d.end_stream));

    send(&mut server, WindowUpdateFrame::new(1, 100).into()).unwrap();
    let frames = peer.read(&mut server);
    assert!(matches!(&frames[..], [Frame::Data(d)] if d.data.len() == 14 && d.end_stream));
    assert_eq!(server.stream_state(1), StreamState::Closed);
}

#[test]
fn test_initial_window_change_applies_to_open_streams() {
    let peer_settings = SettingsBuilder::new().initial_window_size(10).build().unwrap();
    let (mut server, mut peer) = server_with(ConnectionConfig::server(), peer_settings);
    let frame = peer.headers(1, GET, true);
    send(&mut server, frame).unwrap();

    server
        .send_response(1, &HeaderBlock::response(200), Bytes::from(vec![b'a'; 30]))
        .unwrap();
    peer.read(&mut server);
    assert_eq!(server.stream_send_window(1), Some(0));

    // shrinking makes the window negative
    let shrink = SettingsBuilder::new().initial_window_size(5).build().unwrap();
    send(&mut server, SettingsFrame::new(shrink).into()).unwrap();
    assert_eq!(server.stream_send_window(1), Some(-5));
    assert_eq!(peer.read(&mut server), vec![Frame::Settings(SettingsFrame::ack())]);

    // growing releases the queued bytes
    let grow = SettingsBuilder::new().initial_window_size(100).build().unwrap();
    send(&mut server, SettingsFrame::new(grow).into()).unwrap();
    let frames = peer.read(&mut server);
    assert!(frames
        .iter()
        .any(|f| matches!(f, Frame::Data(d) if d.data.len() == 20 && d.end_stream)));
}

#[test]
fn test_peer_exceeds_stream_window() {
    let config = ConnectionConfigBuilder::server()
        .initial_window_size(100)
        .build()
        .unwrap();
    let (mut server, mut peer) = server_with(config, Settings::new());
    let post = [
        (":method", "POST"),
        (":scheme", "https"),
        (":path", "/"),
        (":authority", "localhost"),
    ];
    let frame = peer.headers(1, &post, false);
    send(&mut server, frame).unwrap();
    assert_eq!(server.stream_recv_window(1), Some(100));

    let result = send(&mut server, DataFrame::new(1, Bytes::from(vec![0u8; 200]), false).into());
    expect_stream_reset(&mut server, &mut peer, result, 1, ErrorCode::FlowControlError);
}

#[test]
fn test_window_update_policies() {
    let post = [
        (":method", "POST"),
        (":scheme", "https"),
        (":path", "/"),
        (":authority", "localhost"),
    ];

    let immediate = ConnectionConfigBuilder::server()
        .window_update(WindowUpdatePolicy::Immediate)
        .build()
        .unwrap();
    let (mut server, mut peer) = server_with(immediate, Settings::new());
    let frame = peer.headers(1, &post, false);
    send(&mut server, frame).unwrap();
    send(&mut server, DataFrame::new(1, Bytes::from(vec![0u8; 100]), false).into()).unwrap();
    let updates: Vec<(u32, u32)> = peer
        .read(&mut server)
        .iter()
        .filter_map(|f| match f {
            Frame::WindowUpdate(w) => Some((w.stream_id, w.size_increment)),
            _ => None,
        })
        .collect();
    assert_eq!(updates, vec![(0, 100), (1, 100)]);

    let (mut server, mut peer) = handshake(ConformanceProfile::Strict);
    let frame = peer.headers(1, &post, false);
    send(&mut server, frame).unwrap();
    send(&mut server, DataFrame::new(1, Bytes::from(vec![0u8; 100]), false).into()).unwrap();
    assert!(peer.read(&mut server).is_empty());
    assert_eq!(server.connection_recv_window(), 65535 - 100);

    for _ in 0..2 {
        send(&mut server, DataFrame::new(1, Bytes::from(vec![0u8; 16384]), false).into()).unwrap();
    }
    let frames = peer.read(&mut server);
    assert!(frames
        .iter()
        .any(|f| matches!(f, Frame::WindowUpdate(w) if w.stream_id == 0 && w.size_increment == 32868)));
    assert_eq!(server.connection_recv_window(), 65535);
}

#[test]
fn test_larger_connection_window_announced() {
    let config = ConnectionConfigBuilder::server()
        .connection_window(1 << 20)
        .build()
        .unwrap();
    let mut server = Connection::server(config);
    let mut peer = Peer::new();
    let frames = peer.read(&mut server);
    assert!(matches!(&frames[0], Frame::Settings(_)));
    assert_eq!(
        frames[1],
        Frame::WindowUpdate(WindowUpdateFrame::new(0, (1 << 20) - 65535))
    );
}

// ---------------------------------------------------------------------------
// Concurrency, flooding and shutdown
// ---------------------------------------------------------------------------

#[test]
fn test_concurrent_stream_limit() {
    let config = ConnectionConfigBuilder::server()
        .max_concurrent_streams(1)
        .build()
        .unwrap();
    let (mut server, mut peer) = server_with(config, Settings::new());
    let frame = peer.headers(1, GET, false);
    send(&mut server, frame).unwrap();

    let frame = peer.headers(3, GET, false);
    let result = send(&mut server, frame);
    expect_stream_reset(&mut server, &mut peer, result, 3, ErrorCode::RefusedStream);
    assert_eq!(server.active_streams(), 1);

    // once stream 1 finishes a new stream is accepted
    send(&mut server, DataFrame::new(1, Bytes::new(), true).into()).unwrap();
    server.send_response(1, &HeaderBlock::response(200), Bytes::new()).unwrap();
    let frame = peer.headers(5, GET, true);
    send(&mut server, frame).unwrap();
    assert_eq!(server.stream_state(5), StreamState::HalfClosedRemote);
}

#[test]
fn test_concurrency_limit_effective_before_ack() {
    // server only advertised the limit; the peer has not acknowledged yet
    let config = ConnectionConfigBuilder::server()
        .max_concurrent_streams(1)
        .build()
        .unwrap();
    let mut server = Connection::server(config);
    let mut peer = Peer::new();
    server.receive(CONNECTION_PREFACE).unwrap();
    send(&mut server, SettingsFrame::new(Settings::new()).into()).unwrap();
    peer.read(&mut server);

    let frame = peer.headers(1, GET, false);
    send(&mut server, frame).unwrap();
    let frame = peer.headers(3, GET, false);
    let result = send(&mut server, frame);
    expect_stream_reset(&mut server, &mut peer, result, 3, ErrorCode::RefusedStream);
}

#[test]
fn test_ping_flood() {
    let limits = FloodLimits {
        max_control_frames: 10,
        ..FloodLimits::default()
    };
    let config = ConnectionConfigBuilder::server().flood(limits).build().unwrap();
    let mut server = Connection::server(config);
    let mut peer = Peer::new();
    server.receive(CONNECTION_PREFACE).unwrap();
    // the initial SETTINGS counts as well
    send(&mut server, SettingsFrame::new(Settings::new()).into()).unwrap();
    peer.read(&mut server);

    let mut result = Ok(());
    for _ in 0..10 {
        result = send(&mut server, PingFrame::new([1; 8]).into());
        if result.is_err() {
            break;
        }
    }
    expect_connection_error(&mut server, &mut peer, result, ErrorCode::EnhanceYourCalm);
}

#[test]
fn test_empty_data_flood() {
    let limits = FloodLimits {
        max_empty_frames: 5,
        ..FloodLimits::default()
    };
    let config = ConnectionConfigBuilder::server().flood(limits).build().unwrap();
    let (mut server, mut peer) = server_with(config, Settings::new());
    let frame = peer.headers(1, GET, false);
    send(&mut server, frame).unwrap();

    for _ in 0..5 {
        send(&mut server, DataFrame::new(1, Bytes::new(), false).into()).unwrap();
    }
    let result = send(&mut server, DataFrame::new(1, Bytes::new(), false).into());
    expect_connection_error(&mut server, &mut peer, result, ErrorCode::EnhanceYourCalm);
}

#[test]
fn test_rapid_reset_flood() {
    let limits = FloodLimits {
        max_resets: 3,
        ..FloodLimits::default()
    };
    let config = ConnectionConfigBuilder::server().flood(limits).build().unwrap();
    let (mut server, mut peer) = server_with(config, Settings::new());

    let mut result = Ok(());
    for id in (1..=9).step_by(2) {
        let frame = peer.headers(id, GET, false);
        send(&mut server, frame).unwrap();
        let frame = Frame::RstStream(RstStreamFrame {
            stream_id: id,
            error_code: ErrorCode::Cancel,
        });
        result = send(&mut server, frame);
        if result.is_err() {
            break;
        }
    }
    expect_connection_error(&mut server, &mut peer, result, ErrorCode::EnhanceYourCalm);
}

#[test]
fn test_continuation_flood() {
    let limits = FloodLimits {
        max_continuations: 4,
        ..FloodLimits::default()
    };
    let config = ConnectionConfigBuilder::server().flood(limits).build().unwrap();
    let (mut server, mut peer) = server_with(config, Settings::new());
    let block = peer.block(GET);
    send(&mut server, HeadersFrame::new(1, block, true, false).into()).unwrap();

    let mut result = Ok(());
    for _ in 0..5 {
        let frame = Frame::Continuation(ContinuationFrame {
            stream_id: 1,
            header_block: Bytes::new(),
            end_headers: false,
        });
        result = send(&mut server, frame);
        if result.is_err() {
            break;
        }
    }
    expect_connection_error(&mut server, &mut peer, result, ErrorCode::EnhanceYourCalm);
}

#[test]
fn test_graceful_shutdown_drains_streams() {
    let (mut server, mut peer) = handshake(ConformanceProfile::Strict);
    let frame = peer.headers(1, GET, true);
    send(&mut server, frame).unwrap();
    events(&mut server);

    server.shutdown();
    assert_eq!(server.state(), ConnectionState::GoAwaySent);
    assert_eq!(server.goaway_sent(), Some(1));
    let frames = peer.read(&mut server);
    let g = goaway(&frames).unwrap();
    assert_eq!(g.last_stream_id, 1);
    assert_eq!(g.error_code, ErrorCode::NoError);

    // streams above the last stream id are ignored, not refused
    let frame = peer.headers(3, GET, true);
    send(&mut server, frame).unwrap();
    assert!(events(&mut server).is_empty());
    assert!(peer.read(&mut server).is_empty());

    // a second shutdown writes nothing
    server.shutdown();
    assert!(peer.read(&mut server).is_empty());

    server.send_response(1, &HeaderBlock::response(200), Bytes::from_static(b"bye")).unwrap();
    assert_eq!(server.state(), ConnectionState::Closed);
    let frames = peer.read(&mut server);
    assert!(matches!(frames.last(), Some(Frame::Data(d)) if d.end_stream));
}

#[test]
fn test_hpack_state_kept_for_ignored_streams() {
    let (mut server, mut peer) = handshake(ConformanceProfile::Strict);
    let frame = peer.headers(1, GET, false);
    send(&mut server, frame).unwrap();
    server.shutdown();
    peer.read(&mut server);

    // this block adds x-session to the peer encoder's table
    let frame = peer.headers(3, &[GET[0], GET[1], GET[2], GET[3], ("x-session", "abc")], true);
    send(&mut server, frame).unwrap();

    // trailers on stream 1 refer to the entry through the dynamic table
    let frame = peer.headers(1, &[("x-session", "abc")], true);
    send(&mut server, frame).unwrap();
    match events(&mut server).as_slice() {
        [Event::Headers { stream_id: 1, .. }, Event::Trailers { stream_id: 1, head }] => {
            assert_eq!(head.get("x-session"), Some("abc"));
        }
        other => panic!("unexpected events {:?}", other),
    }
}

#[test]
fn test_goaway_received() {
    let (mut server, mut peer) = handshake(ConformanceProfile::Strict);
    let frame = peer.headers(1, GET, true);
    send(&mut server, frame).unwrap();
    events(&mut server);

    send(
        &mut server,
        GoawayFrame::new(0, ErrorCode::NoError, Bytes::from_static(b"maintenance")).into(),
    )
    .unwrap();
    assert_eq!(server.state(), ConnectionState::GoAwayReceived);
    assert_eq!(server.goaway_received(), Some(0));
    assert!(events(&mut server).iter().any(|e| matches!(
        e,
        Event::GoAway { last_stream_id: 0, code: ErrorCode::NoError, debug_data } if &debug_data[..] == b"maintenance"
    )));

    // raising last stream id is a protocol error
    let result = send(&mut server, GoawayFrame::new(5, ErrorCode::NoError, Bytes::new()).into());
    expect_connection_error(&mut server, &mut peer, result, ErrorCode::ProtocolError);
}

#[test]
fn test_shutdown_after_goaway_received_drains() {
    let (mut server, mut peer) = handshake(ConformanceProfile::Strict);
    let frame = peer.headers(1, GET, true);
    send(&mut server, frame).unwrap();
    send(&mut server, GoawayFrame::new(0, ErrorCode::NoError, Bytes::new()).into()).unwrap();

    server.shutdown();
    assert_eq!(server.state(), ConnectionState::Draining);
    server.send_response(1, &HeaderBlock::response(200), Bytes::new()).unwrap();
    assert_eq!(server.state(), ConnectionState::Closed);
    peer.read(&mut server);
    assert!(send(&mut server, PingFrame::new([0; 8]).into()).is_err());
}

#[test]
fn test_goaway_last_stream_id_after_error() {
    let (mut server, mut peer) = handshake(ConformanceProfile::Strict);
    for id in [1, 3, 7] {
        let frame = peer.headers(id, GET, true);
        send(&mut server, frame).unwrap();
    }
    let result = send(&mut server, WindowUpdateFrame::new(0, 0).into());
    expect_connection_error(&mut server, &mut peer, result, ErrorCode::ProtocolError);
    assert_eq!(server.goaway_sent(), Some(7));

    // nothing more is accepted or written
    assert!(matches!(
        send(&mut server, PingFrame::new([0; 8]).into()),
        Err(Error::ConnectionClosed)
    ));
    assert!(peer.read(&mut server).is_empty());
}

// ---------------------------------------------------------------------------
// Client side
// ---------------------------------------------------------------------------

fn pair(client_config: ConnectionConfig) -> (Connection, Connection) {
    let mut client = Connection::client(client_config);
    let mut server = Connection::server(ConnectionConfig::server());
    exchange(&mut client, &mut server);
    (client, server)
}

/// Shuttle bytes both ways until neither side has anything to say
fn exchange(client: &mut Connection, server: &mut Connection) {
    loop {
        let to_server = client.take_outbound();
        let to_client = server.take_outbound();
        if to_server.is_empty() && to_client.is_empty() {
            break;
        }
        if !to_server.is_empty() {
            server.receive(&to_server).unwrap();
        }
        if !to_client.is_empty() {
            client.receive(&to_client).unwrap();
        }
    }
}

fn without_control(evs: Vec<Event>) -> Vec<Event> {
    evs.into_iter()
        .filter(|e| {
            !matches!(
                e,
                Event::Settings(_) | Event::SettingsAcked | Event::WindowUpdate { .. }
            )
        })
        .collect()
}

#[test]
fn test_client_receives_response() {
    let (mut client, mut server) = pair(ConnectionConfig::client());
    events(&mut client);
    events(&mut server);

    let head = HeaderBlock::request("GET", "https", "/index.html").with_authority("localhost");
    let id = client.open_stream(head, true).unwrap();
    assert_eq!(id, 1);
    exchange(&mut client, &mut server);
    assert_eq!(events(&mut server).len(), 1);

    server
        .send_response(id, &HeaderBlock::response(200).header("server", "h2engine"), Bytes::from_static(b"<html/>"))
        .unwrap();
    exchange(&mut client, &mut server);

    let evs = without_control(events(&mut client));
    match evs.as_slice() {
        [Event::Headers { stream_id: 1, head, end_stream: false }, Event::Data { data, end_stream: true, .. }] => {
            assert_eq!(head.status(), Some(200));
            assert_eq!(head.get("server"), Some("h2engine"));
            assert_eq!(&data[..], b"<html/>");
        }
        other => panic!("unexpected events {:?}", other),
    }
    assert_eq!(client.stream_state(1), StreamState::Closed);
    assert_eq!(client.open_stream(HeaderBlock::request("GET", "https", "/").with_authority("localhost"), true).unwrap(), 3);
}

#[test]
fn test_informational_response() {
    let (mut client, mut server) = pair(ConnectionConfig::client());
    events(&mut client);
    let head = HeaderBlock::request("POST", "https", "/").with_authority("localhost");
    let id = client.open_stream(head, false).unwrap();
    exchange(&mut client, &mut server);

    assert!(server.send_headers(id, &HeaderBlock::response(100), true).is_err());
    server.send_headers(id, &HeaderBlock::response(100), false).unwrap();
    server.send_headers(id, &HeaderBlock::response(200), true).unwrap();
    exchange(&mut client, &mut server);

    let statuses: Vec<Option<u16>> = without_control(events(&mut client))
        .iter()
        .filter_map(|e| match e {
            Event::Headers { head, .. } => Some(head.status()),
            _ => None,
        })
        .collect();
    assert_eq!(statuses, vec![Some(100), Some(200)]);
}

#[test]
fn test_server_push() {
    let (mut client, mut server) = pair(ConnectionConfig::client());
    events(&mut client);
    events(&mut server);

    let head = HeaderBlock::request("GET", "https", "/").with_authority("localhost");
    let id = client.open_stream(head, true).unwrap();
    exchange(&mut client, &mut server);

    let pushed = HeaderBlock::request("GET", "https", "/style.css").with_authority("localhost");
    let promised = server.push_promise(id, &pushed).unwrap();
    assert_eq!(promised, 2);
    assert_eq!(server.stream_state(promised), StreamState::ReservedLocal);
    server.send_response(id, &HeaderBlock::response(200), Bytes::from_static(b"page")).unwrap();
    server
        .send_response(promised, &HeaderBlock::response(200), Bytes::from_static(b"css"))
        .unwrap();
    exchange(&mut client, &mut server);

    let evs = without_control(events(&mut client));
    match &evs[0] {
        Event::PushPromise { stream_id, promised_stream_id, head } => {
            assert_eq!(*stream_id, 1);
            assert_eq!(*promised_stream_id, 2);
            assert_eq!(head.path(), Some("/style.css"));
        }
        other => panic!("expected push promise, got {:?}", other),
    }
    assert!(evs.iter().any(|e| matches!(
        e,
        Event::Data { stream_id: 2, data, end_stream: true } if &data[..] == b"css"
    )));
    assert_eq!(client.stream_state(2), StreamState::Closed);
}

#[test]
fn test_push_rejected_when_disabled() {
    let config = ConnectionConfigBuilder::client().enable_push(false).build().unwrap();
    let (mut client, mut server) = pair(config);
    let id = client
        .open_stream(HeaderBlock::request("GET", "https", "/").with_authority("localhost"), true)
        .unwrap();
    exchange(&mut client, &mut server);

    let pushed = HeaderBlock::request("GET", "https", "/a.js").with_authority("localhost");
    assert!(matches!(
        server.push_promise(id, &pushed),
        Err(Error::InvalidOperation(_))
    ));
}

#[test]
fn test_unsolicited_push_promise_is_connection_error() {
    let config = ConnectionConfigBuilder::client().enable_push(false).build().unwrap();
    let mut client = Connection::client(config);
    let mut peer = Peer::new();
    let opening = client.take_outbound();
    assert!(opening.starts_with(CONNECTION_PREFACE));
    peer.codec.extend(&opening[CONNECTION_PREFACE.len()..]);
    peer.read(&mut client);
    send(&mut client, SettingsFrame::new(Settings::new()).into()).unwrap();
    send(&mut client, SettingsFrame::ack().into()).unwrap();
    let id = client
        .open_stream(HeaderBlock::request("GET", "https", "/").with_authority("localhost"), true)
        .unwrap();
    peer.read(&mut client);

    let block = peer.block(&[
        (":method", "GET"),
        (":scheme", "https"),
        (":path", "/pushed"),
        (":authority", "localhost"),
    ]);
    let frame = Frame::PushPromise(PushPromiseFrame {
        stream_id: id,
        promised_stream_id: 2,
        header_block: block,
        end_headers: true,
        padding: None,
    });
    let result = send(&mut client, frame);
    expect_connection_error(&mut client, &mut peer, result, ErrorCode::ProtocolError);
}

#[test]
fn test_goaway_refuses_unprocessed_streams() {
    let (mut client, mut server) = pair(ConnectionConfig::client());
    events(&mut client);
    let request = || HeaderBlock::request("GET", "https", "/").with_authority("localhost");
    let first = client.open_stream(request(), true).unwrap();
    server.receive(&client.take_outbound()).unwrap();
    let second = client.open_stream(request(), true).unwrap();

    server.shutdown();
    client.receive(&server.take_outbound()).unwrap();

    let evs = without_control(events(&mut client));
    assert!(evs.contains(&Event::StreamReset {
        stream_id: second,
        code: ErrorCode::RefusedStream,
        remote: true
    }));
    assert!(evs
        .iter()
        .any(|e| matches!(e, Event::GoAway { last_stream_id, .. } if *last_stream_id == first)));
    assert_eq!(client.state(), ConnectionState::GoAwayReceived);
    assert!(matches!(client.open_stream(request(), true), Err(Error::ConnectionClosed)));
}

#[test]
fn test_client_respects_peer_concurrency_limit() {
    let mut client = Connection::client(ConnectionConfig::client());
    let config = ConnectionConfigBuilder::server()
        .max_concurrent_streams(1)
        .build()
        .unwrap();
    let mut server = Connection::server(config);
    exchange(&mut client, &mut server);

    let request = || HeaderBlock::request("GET", "https", "/").with_authority("localhost");
    client.open_stream(request(), true).unwrap();
    let err = client.open_stream(request(), true).unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::RefusedStream));
}

#[test]
fn test_round_robin_scheduling() {
    let peer_settings = SettingsBuilder::new().initial_window_size(0).build().unwrap();
    let (mut server, mut peer) = server_with(ConnectionConfig::server(), peer_settings);
    for id in [1, 3] {
        let frame = peer.headers(id, GET, true);
        send(&mut server, frame).unwrap();
        server
            .send_response(id, &HeaderBlock::response(200), Bytes::from(vec![0u8; 20]))
            .unwrap();
    }
    peer.read(&mut server);

    let grow = SettingsBuilder::new().initial_window_size(10).build().unwrap();
    send(&mut server, SettingsFrame::new(grow).into()).unwrap();
    let order: Vec<u32> = peer
        .read(&mut server)
        .iter()
        .filter_map(|f| match f {
            Frame::Data(d) => Some(d.stream_id),
            _ => None,
        })
        .collect();
    assert_eq!(order, vec![1, 3]);

    send(&mut server, WindowUpdateFrame::new(3, 10).into()).unwrap();
    send(&mut server, WindowUpdateFrame::new(1, 10).into()).unwrap();
    let frames = peer.read(&mut server);
    assert!(matches!(&frames[..], [Frame::Data(a), Frame::Data(b)]
        if a.stream_id == 3 && b.stream_id == 1 && a.end_stream && b.end_stream));
}
