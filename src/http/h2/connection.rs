//! HTTP/2 connection engine
//!
//! [`Connection`] is a sans-I/O state machine for one transport connection.
//! Bytes read from the transport go into [`Connection::receive`], decoded
//! requests, responses and control events come out of
//! [`Connection::poll_event`], and everything the engine wants to write is
//! collected in one buffer drained by [`Connection::take_outbound`]. Having a
//! single writer keeps HEADERS and their CONTINUATION frames contiguous on
//! the wire.
//!
//! Stream errors reset the offending stream and processing continues.
//! Connection errors queue exactly one GOAWAY, close the connection and are
//! returned to the caller.
//!
//! ```
//! use h2engine::http::h2::config::ConnectionConfig;
//! use h2engine::http::h2::connection::{Connection, Event};
//! use h2engine::http::h2::headers::HeaderBlock;
//!
//! let mut client = Connection::client(ConnectionConfig::client());
//! let mut server = Connection::server(ConnectionConfig::server());
//!
//! let head = HeaderBlock::request("GET", "https", "/").with_authority("example.com");
//! let stream_id = client.open_stream(head, true).unwrap();
//! server.receive(&client.take_outbound()).unwrap();
//!
//! let mut request = None;
//! while let Some(event) = server.poll_event() {
//!     if let Event::Headers { stream_id, head, .. } = event {
//!         request = Some((stream_id, head));
//!     }
//! }
//! let (id, head) = request.unwrap();
//! assert_eq!(id, stream_id);
//! assert_eq!(head.path(), Some("/"));
//! ```

use super::codec::FrameCodec;
use super::config::{ConnectionConfig, SchedulingPolicy};
use super::error::{Error, ErrorCode, Result};
use super::flood::FloodGuard;
use super::flow_control::ConnectionFlowControl;
use super::frames::{
    ContinuationFrame, DataFrame, Frame, FrameError, FrameType, GoawayFrame, HeadersFrame,
    PingFrame, PriorityFrame, PrioritySpec, PushPromiseFrame, RstStreamFrame, SettingsFrame,
    WindowUpdateFrame,
};
use super::headers::{is_pushable_method, BlockKind, HeaderBlock};
use super::hpack::{Decoder, Encoder, HeaderField};
use super::priority::PriorityTree;
use super::settings::{Settings, SettingsNegotiator};
use super::stream::{H2Stream, StreamId, StreamManager, StreamState};
use super::{CONNECTION_PREFACE, CONNECTION_STREAM_ID, DEFAULT_HEADER_TABLE_SIZE};
use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

/// Side of the connection this engine plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Sends the preface and opens odd streams
    Client,
    /// Expects the preface and may promise even streams
    Server,
}

/// Lifecycle of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Normal operation
    Active,
    /// We sent GOAWAY; streams up to its last stream id finish
    GoAwaySent,
    /// The peer sent GOAWAY; no new local streams
    GoAwayReceived,
    /// Both sides sent GOAWAY; remaining streams finish
    Draining,
    /// Nothing more is processed or sent
    Closed,
}

/// Something the application needs to know about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Request (server) or response (client) headers
    Headers {
        stream_id: StreamId,
        head: HeaderBlock,
        end_stream: bool,
    },
    /// Body bytes
    Data {
        stream_id: StreamId,
        data: Bytes,
        end_stream: bool,
    },
    /// Trailing headers; the stream is finished in the peer's direction
    Trailers { stream_id: StreamId, head: HeaderBlock },
    /// The server promised a pushed response (client only)
    PushPromise {
        stream_id: StreamId,
        promised_stream_id: StreamId,
        head: HeaderBlock,
    },
    /// A stream was reset, by the peer (`remote`) or by this engine
    StreamReset {
        stream_id: StreamId,
        code: ErrorCode,
        remote: bool,
    },
    /// Peer SETTINGS applied and acknowledged
    Settings(Settings),
    /// The peer acknowledged our SETTINGS
    SettingsAcked,
    /// PING received and answered
    Ping([u8; 8]),
    /// Answer to one of our PINGs
    PingAck([u8; 8]),
    /// The peer is shutting the connection down
    GoAway {
        last_stream_id: StreamId,
        code: ErrorCode,
        debug_data: Bytes,
    },
    /// Send credit granted by the peer (stream 0 for the connection)
    WindowUpdate { stream_id: StreamId, increment: u32 },
}

/// Frame that started the header block being assembled
#[derive(Debug)]
enum BlockOrigin {
    Headers {
        end_stream: bool,
        priority: Option<PrioritySpec>,
    },
    PushPromise {
        promised_stream_id: StreamId,
    },
}

/// Header block waiting for END_HEADERS
#[derive(Debug)]
struct PendingBlock {
    stream_id: StreamId,
    origin: BlockOrigin,
    fragments: BytesMut,
}

/// What a stream id refers to
#[derive(Debug, Clone, Copy)]
enum Slot {
    /// Never used by either side
    Idle,
    /// Open, half-closed or reserved
    Live,
    /// Closed and still remembered
    Closed {
        within_grace: bool,
        reset_locally: bool,
    },
    /// Used once and no longer remembered
    Forgotten,
}

/// One HTTP/2 connection, either role
#[derive(Debug)]
pub struct Connection {
    role: Role,
    config: ConnectionConfig,
    state: ConnectionState,
    codec: FrameCodec,
    preface_received: bool,
    peer_settings_received: bool,
    created_at: Instant,
    settings: SettingsNegotiator,
    streams: StreamManager,
    flow: ConnectionFlowControl,
    encoder: Encoder,
    decoder: Decoder,
    priority: PriorityTree,
    flood: FloodGuard,
    header_block: Option<PendingBlock>,
    events: VecDeque<Event>,
    outbound: BytesMut,
    /// Streams with queued output, in arrival order
    send_order: VecDeque<StreamId>,
    goaway_sent: Option<StreamId>,
    goaway_received: Option<StreamId>,
}

impl Connection {
    /// Create the server side of a connection
    pub fn server(config: ConnectionConfig) -> Self {
        Self::new(Role::Server, config)
    }

    /// Create the client side of a connection; the preface is queued at once
    pub fn client(config: ConnectionConfig) -> Self {
        Self::new(Role::Client, config)
    }

    fn new(role: Role, config: ConnectionConfig) -> Self {
        let mut conn = Connection {
            role,
            state: ConnectionState::Active,
            codec: FrameCodec::new(),
            preface_received: role == Role::Client,
            peer_settings_received: false,
            created_at: Instant::now(),
            settings: SettingsNegotiator::new(),
            streams: StreamManager::new(role == Role::Client, config.max_closed_streams),
            flow: ConnectionFlowControl::new(),
            encoder: Encoder::new(DEFAULT_HEADER_TABLE_SIZE as usize),
            decoder: Decoder::new(DEFAULT_HEADER_TABLE_SIZE as usize),
            priority: PriorityTree::with_max_idle(config.max_closed_streams),
            flood: FloodGuard::new(config.flood),
            header_block: None,
            events: VecDeque::new(),
            outbound: BytesMut::with_capacity(4096),
            send_order: VecDeque::new(),
            goaway_sent: None,
            goaway_received: None,
            config,
        };

        if role == Role::Client {
            conn.outbound.extend_from_slice(CONNECTION_PREFACE);
        }
        let frame = conn.settings.send_local(conn.config.settings.clone());
        conn.write_frame(frame.into());
        conn.sync_header_list_limit();

        let increment = conn
            .flow
            .recv_window_mut()
            .set_target(conn.config.connection_window);
        if increment > 0 {
            conn.write_frame(WindowUpdateFrame::new(CONNECTION_STREAM_ID, increment).into());
        }

        info!(role = ?role, profile = ?conn.config.profile, "HTTP/2 connection started");
        conn
    }

    // ---------------------------------------------------------------------
    // Inbound
    // ---------------------------------------------------------------------

    /// Feed bytes read from the transport
    ///
    /// Every complete frame is processed in arrival order. A connection
    /// error has already been answered with GOAWAY when it is returned.
    pub fn receive(&mut self, bytes: &[u8]) -> Result<()> {
        if self.state == ConnectionState::Closed {
            return Err(Error::ConnectionClosed);
        }
        trace!(len = bytes.len(), "bytes received");
        self.codec.extend(bytes);

        if !self.preface_received && !self.read_preface()? {
            return Ok(());
        }

        while self.state != ConnectionState::Closed {
            match self.codec.decode() {
                Ok(Some(frame)) => self.process_frame(frame)?,
                Ok(None) => break,
                Err(err) => self.on_frame_error(err)?,
            }
        }
        Ok(())
    }

    /// Strip the client preface; false while more bytes are needed
    fn read_preface(&mut self) -> Result<bool> {
        let buffered = self.codec.buffer();
        let n = buffered.len().min(CONNECTION_PREFACE.len());
        if buffered[..n] != CONNECTION_PREFACE[..n] {
            warn!("invalid connection preface");
            // the peer cannot parse a GOAWAY at this point
            self.outbound.clear();
            self.state = ConnectionState::Closed;
            return Err(Error::MissingPreface);
        }
        if n < CONNECTION_PREFACE.len() {
            return Ok(false);
        }
        self.codec.consume(CONNECTION_PREFACE.len());
        self.preface_received = true;
        debug!("connection preface received");
        Ok(true)
    }

    fn on_frame_error(&mut self, err: FrameError) -> Result<()> {
        debug!(error = %err, "frame rejected by codec");
        let mut error = self.config.profile.classify_frame_error(&err);
        if error.is_stream_error() {
            if let Some(block) = &self.header_block {
                error = Error::protocol(format!(
                    "did not receive the expected continuation frame for stream {}",
                    block.stream_id
                ));
            } else if let FrameError::BadPadding {
                frame_type: FrameType::Data,
                len,
                ..
            } = err
            {
                // the peer charged the whole payload to the connection window
                match self.flow.consume_recv_window(len) {
                    Ok(()) => self.release_connection_credit(),
                    Err(e) => error = e,
                }
            }
        }
        self.handle_error(error)
    }

    /// Process one already decoded frame
    pub fn process_frame(&mut self, frame: Frame) -> Result<()> {
        if self.state == ConnectionState::Closed {
            return Err(Error::ConnectionClosed);
        }
        debug!(frame = %frame.frame_type(), stream_id = frame.stream_id(), "frame received");

        if let Err(err) = self.dispatch(frame) {
            self.handle_error(err)?;
        }
        self.flush_data();
        self.check_drained();
        Ok(())
    }

    fn dispatch(&mut self, frame: Frame) -> Result<()> {
        if !self.peer_settings_received && !matches!(&frame, Frame::Settings(f) if !f.ack) {
            return Err(Error::protocol(format!(
                "first frame from peer must be SETTINGS, received {}",
                frame.frame_type()
            )));
        }

        if let Some(block) = &self.header_block {
            let expected = matches!(&frame, Frame::Continuation(f) if f.stream_id == block.stream_id);
            if !expected {
                return Err(Error::protocol(format!(
                    "did not receive the expected continuation frame for stream {}, received {} on stream {}",
                    block.stream_id,
                    frame.frame_type().name(),
                    frame.stream_id()
                )));
            }
        }

        match frame {
            Frame::Data(f) => self.on_data(f),
            Frame::Headers(f) => self.on_headers(f),
            Frame::Priority(f) => self.on_priority(f),
            Frame::RstStream(f) => self.on_rst_stream(f),
            Frame::Settings(f) => self.on_settings(f),
            Frame::PushPromise(f) => self.on_push_promise(f),
            Frame::Ping(f) => self.on_ping(f),
            Frame::Goaway(f) => self.on_goaway(f),
            Frame::WindowUpdate(f) => self.on_window_update(f),
            Frame::Continuation(f) => self.on_continuation(f),
            Frame::Unknown(f) => {
                trace!(frame_type = f.frame_type, stream_id = f.stream_id, "unknown frame ignored");
                Ok(())
            }
        }
    }

    /// Reset a stream or tear down the connection
    fn handle_error(&mut self, error: Error) -> Result<()> {
        match error {
            Error::Stream {
                stream_id,
                code,
                reason,
            } => {
                debug!(stream_id, code = %code, reason = %reason, "stream error");
                self.reset_local(stream_id, code, true);
                Ok(())
            }
            Error::Connection { code, reason } => {
                warn!(code = %code, reason = %reason, "connection error");
                self.close_with_goaway(code, &reason);
                Err(Error::Connection { code, reason })
            }
            other => {
                warn!(error = %other, "connection failed");
                self.state = ConnectionState::Closed;
                self.header_block = None;
                Err(other)
            }
        }
    }

    fn close_with_goaway(&mut self, code: ErrorCode, reason: &str) {
        let highest = self.streams.highest_peer_id();
        let last = self.goaway_sent.map_or(highest, |prev| prev.min(highest));
        self.write_frame(
            GoawayFrame::new(last, code, Bytes::copy_from_slice(reason.as_bytes())).into(),
        );
        info!(last_stream_id = last, code = %code, "GOAWAY sent");
        self.goaway_sent = Some(last);
        self.state = ConnectionState::Closed;
        self.header_block = None;
        self.send_order.clear();
    }

    fn slot(&self, stream_id: StreamId) -> Slot {
        match self.streams.get_stream(stream_id) {
            Some(stream) if stream.state().is_closed() => Slot::Closed {
                within_grace: !stream.past_grace(self.config.closed_stream_grace),
                reset_locally: stream.reset_locally(),
            },
            Some(_) => Slot::Live,
            None if self.streams.is_idle(stream_id) => Slot::Idle,
            None => Slot::Forgotten,
        }
    }

    /// Frame on a stream we closed; PRIORITY never reaches here
    fn closed_stream_frame(
        &self,
        stream_id: StreamId,
        frame_type: FrameType,
        within_grace: bool,
    ) -> Result<()> {
        match frame_type {
            FrameType::Data | FrameType::Headers if within_grace => {
                match self.config.profile.closed_stream_frame(stream_id, frame_type) {
                    Some(err) => Err(err),
                    None => {
                        trace!(stream_id, frame = %frame_type, "frame on closed stream absorbed");
                        Ok(())
                    }
                }
            }
            FrameType::Data | FrameType::Headers => Err(Error::connection(
                ErrorCode::StreamClosed,
                format!(
                    "{} frame received on stream {} significantly past close time",
                    frame_type.name(),
                    stream_id
                ),
            )),
            _ if within_grace => {
                trace!(stream_id, frame = %frame_type, "frame on closed stream ignored");
                Ok(())
            }
            _ => Err(Error::protocol(format!(
                "{} frame received on stream {} significantly past close time",
                frame_type.name(),
                stream_id
            ))),
        }
    }

    /// Peer stream above the last stream id of our GOAWAY
    fn ignored_after_goaway(&self, stream_id: StreamId) -> bool {
        matches!(self.goaway_sent, Some(last) if stream_id > last && !self.streams.is_local(stream_id))
    }

    fn on_data(&mut self, frame: DataFrame) -> Result<()> {
        let id = frame.stream_id;
        let flow_len = frame.frame_size();
        if frame.data.is_empty() && !frame.end_stream {
            self.flood.on_empty_frame()?;
        }

        // Every DATA frame counts against the connection, delivered or not
        self.flow.consume_recv_window(flow_len)?;
        self.release_connection_credit();

        if self.ignored_after_goaway(id) {
            return Ok(());
        }
        match self.slot(id) {
            Slot::Idle => return Err(self.config.profile.idle_stream_error(id, FrameType::Data)),
            Slot::Closed { within_grace, .. } => {
                return self.closed_stream_frame(id, FrameType::Data, within_grace)
            }
            Slot::Forgotten => return self.closed_stream_frame(id, FrameType::Data, false),
            Slot::Live => {}
        }

        let policy = self.config.window_update;
        let update = match self.streams.get_stream_mut(id) {
            Some(stream) => {
                stream.flow_control_mut().consume_recv_window(flow_len)?;
                stream.recv_data(frame.data.len(), frame.end_stream)?;
                if stream.state().can_receive() {
                    stream.flow_control_mut().recv_window_mut().take_update(policy)
                } else {
                    None
                }
            }
            None => return Ok(()),
        };
        if let Some(increment) = update {
            self.write_frame(WindowUpdateFrame::new(id, increment).into());
        }

        self.events.push_back(Event::Data {
            stream_id: id,
            data: frame.data,
            end_stream: frame.end_stream,
        });
        self.after_transition(id);
        Ok(())
    }

    fn release_connection_credit(&mut self) {
        if let Some(increment) = self
            .flow
            .recv_window_mut()
            .take_update(self.config.window_update)
        {
            self.write_frame(WindowUpdateFrame::new(CONNECTION_STREAM_ID, increment).into());
        }
    }

    fn on_headers(&mut self, frame: HeadersFrame) -> Result<()> {
        self.flood.end_header_block();
        self.header_block = Some(PendingBlock {
            stream_id: frame.stream_id,
            origin: BlockOrigin::Headers {
                end_stream: frame.end_stream,
                priority: frame.priority,
            },
            fragments: BytesMut::from(&frame.header_block[..]),
        });
        if frame.end_headers {
            self.finish_header_block()
        } else {
            Ok(())
        }
    }

    fn on_push_promise(&mut self, frame: PushPromiseFrame) -> Result<()> {
        if self.role == Role::Server {
            return Err(Error::protocol("PUSH_PROMISE received by a server"));
        }
        if !self.push_enabled_locally() {
            return Err(Error::protocol("PUSH_PROMISE received with server push disabled"));
        }
        self.flood.end_header_block();
        self.header_block = Some(PendingBlock {
            stream_id: frame.stream_id,
            origin: BlockOrigin::PushPromise {
                promised_stream_id: frame.promised_stream_id,
            },
            fragments: BytesMut::from(&frame.header_block[..]),
        });
        if frame.end_headers {
            self.finish_header_block()
        } else {
            Ok(())
        }
    }

    fn on_continuation(&mut self, frame: ContinuationFrame) -> Result<()> {
        let id = frame.stream_id;
        if self.header_block.is_none() {
            if self.streams.is_idle(id) {
                return Err(self.config.profile.idle_stream_error(id, FrameType::Continuation));
            }
            return Err(Error::protocol(format!(
                "CONTINUATION frame received on stream {} when not in a continuation state",
                id
            )));
        }

        self.flood.on_continuation()?;
        if frame.header_block.is_empty() && !frame.end_headers {
            self.flood.on_empty_frame()?;
        }
        if let Some(block) = self.header_block.as_mut() {
            block.fragments.extend_from_slice(&frame.header_block);
        }
        if frame.end_headers {
            self.finish_header_block()
        } else {
            Ok(())
        }
    }

    fn finish_header_block(&mut self) -> Result<()> {
        self.flood.end_header_block();
        let block = match self.header_block.take() {
            Some(block) => block,
            None => return Ok(()),
        };
        let fragments = block.fragments.freeze();
        match block.origin {
            BlockOrigin::Headers {
                end_stream,
                priority,
            } => self.on_header_block(block.stream_id, fragments, end_stream, priority),
            BlockOrigin::PushPromise { promised_stream_id } => {
                self.on_push_promise_block(block.stream_id, promised_stream_id, fragments)
            }
        }
    }

    fn decode_block(&mut self, stream_id: StreamId, fragments: Bytes) -> Result<Vec<HeaderField>> {
        trace!(stream_id, len = fragments.len(), "decoding header block");
        let profile = self.config.profile;
        self.decoder
            .decode(fragments)
            .map_err(|err| profile.classify_hpack_error(stream_id, &err))
    }

    fn on_header_block(
        &mut self,
        id: StreamId,
        fragments: Bytes,
        end_stream: bool,
        priority: Option<PrioritySpec>,
    ) -> Result<()> {
        let slot = self.slot(id);
        let opening = match slot {
            Slot::Idle => {
                if self.role == Role::Client {
                    return Err(Error::protocol(format!(
                        "HEADERS received on idle stream {}",
                        id
                    )));
                }
                self.streams.accept_peer_id(id)?;
                true
            }
            Slot::Closed {
                reset_locally: false,
                ..
            }
            | Slot::Forgotten
                if !self.streams.is_local(id) =>
            {
                return Err(Error::protocol(format!(
                    "Stream id {} is not greater than last accepted stream id {}",
                    id,
                    self.streams.highest_peer_id()
                )));
            }
            _ => false,
        };

        // Decode before any stream-level decision so the table stays in sync
        let decoded = self.decode_block(id, fragments)?;

        if self.ignored_after_goaway(id) {
            trace!(stream_id = id, "stream above GOAWAY last stream id ignored");
            return Ok(());
        }
        match slot {
            Slot::Closed { within_grace, .. } => {
                return self.closed_stream_frame(id, FrameType::Headers, within_grace)
            }
            Slot::Forgotten => return self.closed_stream_frame(id, FrameType::Headers, false),
            Slot::Idle | Slot::Live => {}
        }

        let kind = match self.streams.get_stream(id) {
            Some(stream) if stream.headers_received() => BlockKind::Trailers,
            _ => match self.role {
                Role::Server => BlockKind::Request,
                Role::Client => BlockKind::Response,
            },
        };
        let profile = self.config.profile;
        let head = HeaderBlock::from_fields(decoded, kind)
            .map_err(|err| profile.classify_header_error(id, &err))?;
        if kind == BlockKind::Trailers && !end_stream {
            return Err(Error::stream(
                id,
                ErrorCode::ProtocolError,
                "trailers without END_STREAM",
            ));
        }
        let informational = kind == BlockKind::Response && head.status().map_or(false, |s| s < 200);
        if informational && end_stream {
            return Err(Error::stream(
                id,
                ErrorCode::ProtocolError,
                "informational response with END_STREAM",
            ));
        }

        if opening {
            if let Some(max) = self.settings.local_max_concurrent_streams() {
                if self.streams.active_count(false) >= max as usize {
                    return Err(Error::stream(
                        id,
                        ErrorCode::RefusedStream,
                        format!("concurrent stream limit {} reached", max),
                    ));
                }
            }
            let stream = H2Stream::new(id, self.peer_initial_window(), self.local_initial_window());
            self.streams.insert(stream);
            self.priority.insert(id);
            debug!(stream_id = id, "stream opened by peer");
        }
        if let Some(spec) = priority {
            self.priority.reprioritize(id, spec)?;
        }

        let content_length = match kind {
            BlockKind::Trailers => None,
            _ => head.content_length().ok().flatten(),
        };
        if let Some(stream) = self.streams.get_stream_mut(id) {
            if informational {
                stream.recv_informational()?;
                self.events.push_back(Event::Headers {
                    stream_id: id,
                    head,
                    end_stream: false,
                });
                return Ok(());
            }
            stream.recv_headers(end_stream)?;
            if kind != BlockKind::Trailers {
                stream.set_content_length(content_length);
            }
            if end_stream {
                stream.check_content_length()?;
            }
        }

        let event = match kind {
            BlockKind::Trailers => Event::Trailers { stream_id: id, head },
            _ => Event::Headers {
                stream_id: id,
                head,
                end_stream,
            },
        };
        self.events.push_back(event);
        self.after_transition(id);
        Ok(())
    }

    fn on_push_promise_block(
        &mut self,
        associated: StreamId,
        promised: StreamId,
        fragments: Bytes,
    ) -> Result<()> {
        self.streams.accept_peer_id(promised)?;
        let decoded = self.decode_block(promised, fragments)?;

        match self.streams.get_stream(associated).map(|s| s.state()) {
            Some(StreamState::Open) | Some(StreamState::HalfClosedLocal) => {}
            Some(StreamState::Closed) => {
                return Err(Error::stream(
                    promised,
                    ErrorCode::Cancel,
                    "PUSH_PROMISE for a closed stream",
                ));
            }
            _ => {
                return Err(Error::protocol(format!(
                    "PUSH_PROMISE received on stream {} which is not open",
                    associated
                )));
            }
        }

        let profile = self.config.profile;
        let head = HeaderBlock::from_fields(decoded, BlockKind::Request)
            .map_err(|err| profile.classify_header_error(promised, &err))?;

        let mut stream =
            H2Stream::new(promised, self.peer_initial_window(), self.local_initial_window());
        stream.reserve_remote();
        self.streams.insert(stream);
        self.priority.insert(promised);
        self.priority.reprioritize(
            promised,
            PrioritySpec::new(associated, false, PrioritySpec::DEFAULT_WEIGHT),
        )?;

        if !head.method().map_or(false, is_pushable_method) {
            return Err(Error::stream(
                promised,
                ErrorCode::ProtocolError,
                "promised request is not safe and cacheable",
            ));
        }

        debug!(stream_id = associated, promised_stream_id = promised, "push promise received");
        self.events.push_back(Event::PushPromise {
            stream_id: associated,
            promised_stream_id: promised,
            head,
        });
        Ok(())
    }

    fn on_priority(&mut self, frame: PriorityFrame) -> Result<()> {
        self.flood.on_control_frame()?;
        let id = frame.stream_id;
        match self.slot(id) {
            Slot::Closed { .. } | Slot::Forgotten => {
                trace!(stream_id = id, "PRIORITY for closed stream ignored");
                Ok(())
            }
            Slot::Idle | Slot::Live => self.priority.reprioritize(id, frame.priority),
        }
    }

    fn on_rst_stream(&mut self, frame: RstStreamFrame) -> Result<()> {
        self.flood.on_control_frame()?;
        let id = frame.stream_id;
        if self.ignored_after_goaway(id) {
            return Ok(());
        }
        match self.slot(id) {
            Slot::Idle => {
                return Err(self.config.profile.idle_stream_error(id, FrameType::RstStream))
            }
            Slot::Closed { within_grace, .. } => {
                return self.closed_stream_frame(id, FrameType::RstStream, within_grace)
            }
            Slot::Forgotten => return self.closed_stream_frame(id, FrameType::RstStream, false),
            Slot::Live => {}
        }

        if !self.streams.is_local(id) {
            self.flood.on_peer_reset()?;
        }
        if let Some(stream) = self.streams.get_stream_mut(id) {
            stream.reset(false);
        }
        debug!(stream_id = id, code = %frame.error_code, "stream reset by peer");
        self.events.push_back(Event::StreamReset {
            stream_id: id,
            code: frame.error_code,
            remote: true,
        });
        self.on_stream_closed(id);
        Ok(())
    }

    fn on_settings(&mut self, frame: SettingsFrame) -> Result<()> {
        self.flood.on_control_frame()?;
        if frame.ack {
            let acked = self.settings.receive_ack()?;
            self.apply_local_settings(&acked)?;
            self.events.push_back(Event::SettingsAcked);
            return Ok(());
        }

        self.peer_settings_received = true;
        let delta = self.settings.receive_remote(&frame.settings);
        if delta != 0 {
            let size = self.settings.peer().get_initial_window_size();
            for stream in self.streams.streams_mut() {
                if !stream.state().is_closed() {
                    stream.flow_control_mut().update_send_initial_size(size)?;
                }
            }
        }
        if let Some(size) = frame.settings.header_table_size {
            self.encoder.set_max_table_size(size as usize);
        }

        self.write_frame(SettingsFrame::ack().into());
        self.events.push_back(Event::Settings(frame.settings));
        Ok(())
    }

    /// Put newly acknowledged local settings into effect
    fn apply_local_settings(&mut self, acked: &Settings) -> Result<()> {
        if let Some(size) = acked.header_table_size {
            self.decoder.set_max_table_size(size as usize);
        }
        if let Some(size) = acked.max_frame_size {
            self.codec.set_max_frame_size(size);
        }
        if let Some(size) = acked.initial_window_size {
            for stream in self.streams.streams_mut() {
                if stream.state().is_closed() {
                    continue;
                }
                let id = stream.id();
                stream
                    .flow_control_mut()
                    .recv_window_mut()
                    .update_initial_size(size)
                    .map_err(|window| {
                        Error::connection(
                            ErrorCode::FlowControlError,
                            format!("stream {} receive window {} overflows", id, window),
                        )
                    })?;
            }
        }
        self.sync_header_list_limit();
        Ok(())
    }

    fn sync_header_list_limit(&mut self) {
        let limit = self.settings.local_max_header_list_size().map(|v| v as usize);
        self.decoder.set_max_header_list_size(limit);
    }

    fn on_ping(&mut self, frame: PingFrame) -> Result<()> {
        self.flood.on_control_frame()?;
        if frame.ack {
            self.events.push_back(Event::PingAck(frame.data));
        } else {
            self.write_frame(PingFrame::ack(frame.data).into());
            self.events.push_back(Event::Ping(frame.data));
        }
        Ok(())
    }

    fn on_goaway(&mut self, frame: GoawayFrame) -> Result<()> {
        let last = frame.last_stream_id;
        info!(last_stream_id = last, code = %frame.error_code, "GOAWAY received");
        if let Some(previous) = self.goaway_received {
            if last > previous {
                return Err(Error::protocol(format!(
                    "GOAWAY last stream id raised from {} to {}",
                    previous, last
                )));
            }
        }
        self.goaway_received = Some(last);
        self.state = match self.state {
            ConnectionState::Active => ConnectionState::GoAwayReceived,
            ConnectionState::GoAwaySent => ConnectionState::Draining,
            other => other,
        };

        // Local streams the peer never processed
        let refused: Vec<StreamId> = self
            .streams
            .stream_ids()
            .into_iter()
            .filter(|&id| id > last && self.streams.is_local(id))
            .collect();
        for id in refused {
            let closed_now = match self.streams.get_stream_mut(id) {
                Some(stream) if !stream.state().is_closed() => {
                    stream.reset(false);
                    true
                }
                _ => false,
            };
            if closed_now {
                self.events.push_back(Event::StreamReset {
                    stream_id: id,
                    code: ErrorCode::RefusedStream,
                    remote: true,
                });
                self.on_stream_closed(id);
            }
        }

        self.events.push_back(Event::GoAway {
            last_stream_id: last,
            code: frame.error_code,
            debug_data: frame.debug_data,
        });
        Ok(())
    }

    fn on_window_update(&mut self, frame: WindowUpdateFrame) -> Result<()> {
        let id = frame.stream_id;
        let increment = frame.size_increment;
        if id == CONNECTION_STREAM_ID {
            let window = self.flow.increase_send_window(increment)?;
            trace!(increment, window, "connection send window updated");
        } else {
            if self.ignored_after_goaway(id) {
                return Ok(());
            }
            match self.slot(id) {
                Slot::Idle => {
                    return Err(self.config.profile.idle_stream_error(id, FrameType::WindowUpdate))
                }
                Slot::Closed { within_grace, .. } => {
                    return self.closed_stream_frame(id, FrameType::WindowUpdate, within_grace)
                }
                Slot::Forgotten => {
                    return self.closed_stream_frame(id, FrameType::WindowUpdate, false)
                }
                Slot::Live => {}
            }
            if let Some(stream) = self.streams.get_stream_mut(id) {
                let window = stream.flow_control_mut().increase_send_window(increment)?;
                trace!(stream_id = id, increment, window, "stream send window updated");
            }
        }
        self.events.push_back(Event::WindowUpdate {
            stream_id: id,
            increment,
        });
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Stream bookkeeping
    // ---------------------------------------------------------------------

    fn peer_initial_window(&self) -> u32 {
        self.settings.peer().get_initial_window_size()
    }

    fn local_initial_window(&self) -> u32 {
        self.settings.local().get_initial_window_size()
    }

    fn push_enabled_locally(&self) -> bool {
        self.settings.local().get_enable_push() && self.config.settings.enable_push != Some(false)
    }

    /// Reset a stream from our side and tell the peer
    fn reset_local(&mut self, stream_id: StreamId, code: ErrorCode, notify: bool) {
        let was_open = match self.streams.get_stream_mut(stream_id) {
            Some(stream) if stream.state().is_closed() => false,
            Some(stream) => {
                stream.reset(true);
                true
            }
            None => {
                // remembered so racing frames fall into the grace window
                self.streams.note_peer_id(stream_id);
                let mut stream =
                    H2Stream::new(stream_id, self.peer_initial_window(), self.local_initial_window());
                stream.reset(true);
                self.streams.insert(stream);
                true
            }
        };
        self.write_frame(Frame::RstStream(RstStreamFrame {
            stream_id,
            error_code: code,
        }));
        if was_open {
            if notify {
                self.events.push_back(Event::StreamReset {
                    stream_id,
                    code,
                    remote: false,
                });
            }
            self.on_stream_closed(stream_id);
        }
    }

    /// Record a close if the last operation closed the stream
    fn after_transition(&mut self, stream_id: StreamId) {
        let closed = self
            .streams
            .get_stream(stream_id)
            .map_or(false, |s| s.state().is_closed());
        if closed {
            self.on_stream_closed(stream_id);
        }
    }

    fn on_stream_closed(&mut self, stream_id: StreamId) {
        debug!(stream_id, "stream closed");
        self.streams.on_closed(stream_id);
        self.priority.release(stream_id);
        self.send_order.retain(|&id| id != stream_id);
    }

    fn check_drained(&mut self) {
        let draining = matches!(
            self.state,
            ConnectionState::GoAwaySent | ConnectionState::GoAwayReceived | ConnectionState::Draining
        );
        if draining && self.streams.active_stream_count() == 0 {
            info!("connection drained");
            self.state = ConnectionState::Closed;
        }
    }

    // ---------------------------------------------------------------------
    // Outbound
    // ---------------------------------------------------------------------

    fn write_frame(&mut self, frame: Frame) {
        if self.state == ConnectionState::Closed {
            trace!(frame = %frame.frame_type(), "frame dropped on closed connection");
            return;
        }
        debug!(frame = %frame.frame_type(), stream_id = frame.stream_id(), "frame sent");
        self.outbound.extend_from_slice(&FrameCodec::encode(&frame));
    }

    /// Encode a header list and write it as HEADERS (or PUSH_PROMISE when
    /// `promised` is set) followed by as many CONTINUATION frames as needed
    fn write_header_block(
        &mut self,
        stream_id: StreamId,
        promised: Option<StreamId>,
        fields: &[HeaderField],
        end_stream: bool,
    ) {
        let mut encoded = BytesMut::new();
        self.encoder.encode(fields, &mut encoded);
        let mut block = encoded.freeze();

        let max = self.settings.peer().get_max_frame_size() as usize;
        let first_max = if promised.is_some() { max - 4 } else { max };
        let first = block.split_to(first_max.min(block.len()));
        let end_headers = block.is_empty();
        let frame = match promised {
            Some(promised_stream_id) => Frame::PushPromise(PushPromiseFrame {
                stream_id,
                promised_stream_id,
                header_block: first,
                end_headers,
                padding: None,
            }),
            None => HeadersFrame::new(stream_id, first, end_stream, end_headers).into(),
        };
        self.write_frame(frame);

        while !block.is_empty() {
            let chunk = block.split_to(max.min(block.len()));
            let end_headers = block.is_empty();
            self.write_frame(Frame::Continuation(ContinuationFrame {
                stream_id,
                header_block: chunk,
                end_headers,
            }));
        }
    }

    /// Release queued DATA and trailers as flow-control credit allows
    fn flush_data(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        match self.config.scheduling {
            SchedulingPolicy::RoundRobin => loop {
                let round: Vec<StreamId> = self.send_order.iter().copied().collect();
                let mut progressed = false;
                for id in round {
                    progressed |= self.send_next(id);
                }
                if !progressed {
                    break;
                }
            },
            SchedulingPolicy::Priority => {
                let ready: Vec<StreamId> = self.send_order.iter().copied().collect();
                for id in self.priority.schedule(&ready) {
                    while self.send_next(id) {}
                }
            }
        }
    }

    /// Send one frame of queued output for a stream; false if it is blocked
    fn send_next(&mut self, stream_id: StreamId) -> bool {
        let max_frame = self.settings.peer().get_max_frame_size() as usize;
        let connection_window = self.flow.send_window().available();

        let stream = match self.streams.get_stream_mut(stream_id) {
            Some(stream) if stream.has_pending_output() => stream,
            _ => {
                self.send_order.retain(|&id| id != stream_id);
                return false;
            }
        };

        if stream.queued_len() > 0 || stream.next_chunk_is_empty() {
            let budget = max_frame
                .min(stream.flow_control().send_window().available())
                .min(connection_window);
            if budget == 0 && !stream.next_chunk_is_empty() {
                return false;
            }
            let (chunk, end_stream) = match stream.pop_chunk(budget) {
                Some(next) => next,
                None => return false,
            };
            stream.flow_control_mut().send_window_mut().consume(chunk.len());
            if end_stream {
                stream.send_end_stream();
            }
            self.flow.send_window_mut().consume(chunk.len());
            trace!(stream_id, len = chunk.len(), end_stream, "queued DATA released");
            self.write_frame(DataFrame::new(stream_id, chunk, end_stream).into());
        } else if let Some(trailers) = stream.take_trailers() {
            if stream.send_headers(true).is_err() {
                return false;
            }
            self.write_header_block(stream_id, None, &trailers, true);
        } else {
            return false;
        }

        // Round robin: a stream that still has output goes to the back
        let pending = self
            .streams
            .get_stream(stream_id)
            .map_or(false, |s| s.has_pending_output());
        self.send_order.retain(|&id| id != stream_id);
        if pending {
            self.send_order.push_back(stream_id);
        }
        self.after_transition(stream_id);
        true
    }

    // ---------------------------------------------------------------------
    // Application side
    // ---------------------------------------------------------------------

    fn ensure_open(&self) -> Result<()> {
        if self.state == ConnectionState::Closed {
            return Err(Error::ConnectionClosed);
        }
        Ok(())
    }

    fn ensure_can_open(&self) -> Result<()> {
        if self.state != ConnectionState::Active {
            return Err(Error::ConnectionClosed);
        }
        Ok(())
    }

    /// Open a request stream (client only)
    pub fn open_stream(&mut self, head: HeaderBlock, end_stream: bool) -> Result<StreamId> {
        if self.role != Role::Client {
            return Err(Error::InvalidOperation(
                "only clients open request streams".to_string(),
            ));
        }
        self.ensure_can_open()?;
        head.validate(BlockKind::Request)
            .map_err(|err| Error::InvalidHeader(err.to_string()))?;

        if let Some(max) = self.settings.peer().get_max_concurrent_streams() {
            if self.streams.active_count(true) >= max as usize {
                return Err(Error::stream(
                    self.streams.peek_next_stream_id(),
                    ErrorCode::RefusedStream,
                    format!("peer allows {} concurrent streams", max),
                ));
            }
        }

        let id = self.streams.allocate_local_id()?;
        let mut stream = H2Stream::new(id, self.peer_initial_window(), self.local_initial_window());
        if head.method() == Some("HEAD") {
            stream.set_head_request();
        }
        stream.send_headers(end_stream)?;
        self.streams.insert(stream);
        self.priority.insert(id);
        self.write_header_block(id, None, &head.to_fields(), end_stream);
        debug!(stream_id = id, end_stream, "stream opened");
        Ok(id)
    }

    /// Send response headers on a stream (server only)
    ///
    /// A 1xx response may precede the final one and cannot end the stream.
    pub fn send_headers(
        &mut self,
        stream_id: StreamId,
        head: &HeaderBlock,
        end_stream: bool,
    ) -> Result<()> {
        if self.role != Role::Server {
            return Err(Error::InvalidOperation(
                "clients send request headers with open_stream".to_string(),
            ));
        }
        self.ensure_open()?;
        head.validate(BlockKind::Response)
            .map_err(|err| Error::InvalidHeader(err.to_string()))?;
        if end_stream && head.status().map_or(false, |s| s < 200) {
            return Err(Error::InvalidHeader(
                "informational response cannot end the stream".to_string(),
            ));
        }

        let stream = self
            .streams
            .get_stream_mut(stream_id)
            .ok_or(Error::StreamNotFound(stream_id))?;
        stream.send_headers(end_stream)?;
        self.write_header_block(stream_id, None, &head.to_fields(), end_stream);
        self.after_transition(stream_id);
        self.check_drained();
        Ok(())
    }

    /// Send a complete response: headers, then the body if there is one
    pub fn send_response(&mut self, stream_id: StreamId, head: &HeaderBlock, body: Bytes) -> Result<()> {
        let end_stream = body.is_empty();
        self.send_headers(stream_id, head, end_stream)?;
        if !end_stream {
            self.send_data(stream_id, body, true)?;
        }
        Ok(())
    }

    /// Queue body bytes; they are written as flow-control credit allows
    pub fn send_data(&mut self, stream_id: StreamId, data: Bytes, end_stream: bool) -> Result<()> {
        self.ensure_open()?;
        let stream = self
            .streams
            .get_stream_mut(stream_id)
            .ok_or(Error::StreamNotFound(stream_id))?;
        stream.queue_data(data, end_stream)?;
        if !self.send_order.contains(&stream_id) {
            self.send_order.push_back(stream_id);
        }
        self.flush_data();
        self.check_drained();
        Ok(())
    }

    /// Queue trailers; they end the stream after any queued DATA
    pub fn send_trailers(&mut self, stream_id: StreamId, trailers: &HeaderBlock) -> Result<()> {
        self.ensure_open()?;
        trailers
            .validate(BlockKind::Trailers)
            .map_err(|err| Error::InvalidHeader(err.to_string()))?;
        let stream = self
            .streams
            .get_stream_mut(stream_id)
            .ok_or(Error::StreamNotFound(stream_id))?;
        stream.queue_trailers(trailers.to_fields())?;
        if !self.send_order.contains(&stream_id) {
            self.send_order.push_back(stream_id);
        }
        self.flush_data();
        self.check_drained();
        Ok(())
    }

    /// Promise a pushed response on `associated` (server only)
    ///
    /// Returns the reserved stream; its response is sent with
    /// [`send_headers`](Self::send_headers) like any other.
    pub fn push_promise(&mut self, associated: StreamId, request: &HeaderBlock) -> Result<StreamId> {
        if self.role != Role::Server {
            return Err(Error::InvalidOperation("only servers push".to_string()));
        }
        self.ensure_can_open()?;
        if !self.settings.peer().get_enable_push() {
            return Err(Error::InvalidOperation("peer disabled server push".to_string()));
        }
        request
            .validate(BlockKind::Request)
            .map_err(|err| Error::InvalidHeader(err.to_string()))?;
        if !request.method().map_or(false, is_pushable_method) {
            return Err(Error::InvalidHeader(
                "pushed requests must be GET or HEAD".to_string(),
            ));
        }
        match self.streams.get_stream(associated).map(|s| s.state()) {
            Some(StreamState::Open) | Some(StreamState::HalfClosedRemote) => {}
            Some(_) => return Err(Error::Blocked(associated)),
            None => return Err(Error::StreamNotFound(associated)),
        }

        let promised = self.streams.allocate_push_id()?;
        let mut stream =
            H2Stream::new(promised, self.peer_initial_window(), self.local_initial_window());
        stream.reserve_local();
        self.streams.insert(stream);
        self.priority.insert(promised);
        self.priority.reprioritize(
            promised,
            PrioritySpec::new(associated, false, PrioritySpec::DEFAULT_WEIGHT),
        )?;
        self.write_header_block(associated, Some(promised), &request.to_fields(), false);
        debug!(stream_id = associated, promised_stream_id = promised, "push promised");
        Ok(promised)
    }

    /// Cancel a stream with RST_STREAM; the connection is unaffected
    pub fn reset_stream(&mut self, stream_id: StreamId, code: ErrorCode) -> Result<()> {
        self.ensure_open()?;
        match self.streams.get_stream(stream_id) {
            None => return Err(Error::StreamNotFound(stream_id)),
            Some(stream) if stream.state().is_closed() => return Ok(()),
            Some(_) => {}
        }
        debug!(stream_id, code = %code, "stream cancelled");
        self.reset_local(stream_id, code, false);
        self.check_drained();
        Ok(())
    }

    /// Send a PING; the answer arrives as [`Event::PingAck`]
    pub fn ping(&mut self, data: [u8; 8]) -> Result<()> {
        self.ensure_open()?;
        self.write_frame(PingFrame::new(data).into());
        Ok(())
    }

    /// Advertise new local settings; they apply once acknowledged
    pub fn update_settings(&mut self, settings: Settings) -> Result<()> {
        self.ensure_open()?;
        settings.validate()?;
        self.config.settings.merge(&settings);
        let frame = self.settings.send_local(settings);
        self.write_frame(frame.into());
        self.sync_header_list_limit();
        Ok(())
    }

    /// Start a graceful shutdown with GOAWAY(NO_ERROR)
    ///
    /// Streams the peer already opened finish; the connection closes once
    /// none is left.
    pub fn shutdown(&mut self) {
        if self.state == ConnectionState::Closed || self.goaway_sent.is_some() {
            return;
        }
        let last = self.streams.highest_peer_id();
        self.write_frame(GoawayFrame::new(last, ErrorCode::NoError, Bytes::new()).into());
        info!(last_stream_id = last, "GOAWAY sent, draining");
        self.goaway_sent = Some(last);
        self.state = match self.state {
            ConnectionState::GoAwayReceived => ConnectionState::Draining,
            _ => ConnectionState::GoAwaySent,
        };
        self.check_drained();
    }

    /// Check local timers
    ///
    /// Missing preface or SETTINGS, or an unacknowledged SETTINGS frame,
    /// past their deadlines close the connection. Closed streams past their
    /// grace window are forgotten.
    pub fn poll_timeout(&mut self, now: Instant) -> Result<()> {
        if self.state == ConnectionState::Closed {
            return Ok(());
        }
        self.streams.prune_closed(self.config.closed_stream_grace);

        if !self.peer_settings_received {
            if let Some(timeout) = self.config.preface_timeout {
                if now.saturating_duration_since(self.created_at) >= timeout {
                    if !self.preface_received {
                        warn!("timed out waiting for the connection preface");
                        self.outbound.clear();
                        self.state = ConnectionState::Closed;
                        return Err(Error::Timeout);
                    }
                    return self.handle_error(Error::protocol("timed out waiting for SETTINGS"));
                }
            }
        }

        if let (Some(timeout), Some(sent)) =
            (self.config.settings_ack_timeout, self.settings.oldest_pending())
        {
            if now.saturating_duration_since(sent) >= timeout {
                return self.handle_error(Error::connection(
                    ErrorCode::SettingsTimeout,
                    "SETTINGS not acknowledged in time",
                ));
            }
        }
        Ok(())
    }

    /// Next event for the application
    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    /// Take everything queued for the transport
    pub fn take_outbound(&mut self) -> Bytes {
        self.outbound.split().freeze()
    }

    /// Check if bytes are waiting for the transport
    pub fn wants_write(&self) -> bool {
        !self.outbound.is_empty()
    }

    // ---------------------------------------------------------------------
    // Inspection
    // ---------------------------------------------------------------------

    /// Role of this side
    pub fn role(&self) -> Role {
        self.role
    }

    /// Connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Configuration in effect
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// State of a stream; ids never seen are idle, forgotten ones closed
    pub fn stream_state(&self, stream_id: StreamId) -> StreamState {
        match self.streams.get_stream(stream_id) {
            Some(stream) => stream.state(),
            None if self.streams.is_idle(stream_id) => StreamState::Idle,
            None => StreamState::Closed,
        }
    }

    /// Local settings the peer has acknowledged
    pub fn local_settings(&self) -> &Settings {
        self.settings.local()
    }

    /// Settings declared by the peer
    pub fn peer_settings(&self) -> &Settings {
        self.settings.peer()
    }

    /// Bytes we may still send on the connection
    pub fn connection_send_window(&self) -> i64 {
        self.flow.send_window().size()
    }

    /// Bytes the peer may still send on the connection
    pub fn connection_recv_window(&self) -> i64 {
        self.flow.recv_window().size()
    }

    /// Bytes we may still send on a stream
    pub fn stream_send_window(&self, stream_id: StreamId) -> Option<i64> {
        self.streams
            .get_stream(stream_id)
            .map(|s| s.flow_control().send_window().size())
    }

    /// Bytes the peer may still send on a stream
    pub fn stream_recv_window(&self, stream_id: StreamId) -> Option<i64> {
        self.streams
            .get_stream(stream_id)
            .map(|s| s.flow_control().recv_window().size())
    }

    /// Highest stream id the peer opened or promised
    pub fn highest_peer_stream_id(&self) -> StreamId {
        self.streams.highest_peer_id()
    }

    /// Streams not yet closed
    pub fn active_streams(&self) -> usize {
        self.streams.active_stream_count()
    }

    /// Check if a header block is waiting for CONTINUATION frames
    pub fn is_awaiting_continuation(&self) -> bool {
        self.header_block.is_some()
    }

    /// Last stream id of the GOAWAY we sent
    pub fn goaway_sent(&self) -> Option<StreamId> {
        self.goaway_sent
    }

    /// Last stream id of the GOAWAY we received
    pub fn goaway_received(&self) -> Option<StreamId> {
        self.goaway_received
    }

    /// The stream dependency tree
    pub fn priority_tree(&self) -> &PriorityTree {
        &self.priority
    }
}
