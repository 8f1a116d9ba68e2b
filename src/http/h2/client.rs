//! HTTP/2 client implementation with low-level frame control
//!
//! This module provides an HTTP/2 client with full control over frame
//! construction, allowing tests to send edge cases and protocol violations
//! and to inspect exactly which frames come back.

use super::codec::{FrameCodec, MAX_FRAME_SIZE};
use super::error::{Error, ErrorCode, Result};
use super::frames::*;
use super::headers::{BlockKind, HeaderBlock};
use super::hpack::{Decoder, Encoder};
use super::settings::{Settings, SettingsBuilder};
use super::stream::StreamId;
use super::{CONNECTION_PREFACE, CONNECTION_STREAM_ID, DEFAULT_HEADER_TABLE_SIZE};
use crate::http::{HttpSession, SessionOps};
use bytes::{Bytes, BytesMut};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, trace};

/// Header block being assembled from HEADERS/PUSH_PROMISE + CONTINUATION
struct PartialBlock {
    stream_id: StreamId,
    promised_stream_id: Option<StreamId>,
    end_stream: bool,
    fragments: BytesMut,
}

/// HTTP/2 client
///
/// Provides low-level control over HTTP/2 frame transmission, allowing
/// intentionally malformed frames for testing purposes. Frames read back are
/// also folded into per-stream [`H2Response`]s so ordinary requests stay
/// short to write.
pub struct H2Client<S: SessionOps> {
    session: HttpSession<S>,
    codec: FrameCodec,
    encoder: Encoder,
    decoder: Decoder,
    local_settings: Settings,
    remote_settings: Settings,
    next_stream_id: StreamId,
    /// Credit granted back for received DATA
    auto_window_update: bool,
    partial: Option<PartialBlock>,
    responses: HashMap<StreamId, H2Response>,
    finished: HashSet<StreamId>,
    goaway: Option<GoawayFrame>,
    connected: bool,
}

impl<S: SessionOps> H2Client<S> {
    /// Create a new HTTP/2 client
    pub fn new(session: S) -> Result<Self> {
        H2ClientBuilder::new().build(session)
    }

    /// Perform HTTP/2 connection preface and settings exchange
    ///
    /// Returns once the server's SETTINGS arrived and was acknowledged.
    pub fn connect(&mut self) -> Result<()> {
        if self.connected {
            return Ok(());
        }
        self.send_preface()?;
        self.send_settings(self.local_settings.clone())?;
        while self.remote_settings.is_empty() {
            let frame = self.recv_frame()?;
            if let Frame::Settings(settings) = &frame {
                if !settings.ack && settings.settings.is_empty() {
                    // an empty SETTINGS still completes the exchange
                    self.handle_frame(frame)?;
                    break;
                }
            }
            self.handle_frame(frame)?;
        }
        self.connected = true;
        Ok(())
    }

    /// Send the connection preface only
    pub fn send_preface(&mut self) -> Result<()> {
        self.send_raw(CONNECTION_PREFACE)
    }

    /// Send arbitrary bytes
    pub fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        trace!(len = bytes.len(), "raw bytes sent");
        self.session.write_all(bytes)?;
        Ok(())
    }

    /// Send any frame
    pub fn send_frame(&mut self, frame: &Frame) -> Result<()> {
        debug!(frame = %frame.frame_type(), stream_id = frame.stream_id(), "client frame sent");
        self.send_raw(&FrameCodec::encode(frame))
    }

    /// Send a frame built field by field, bypassing all validation
    pub fn send_raw_frame(&mut self, frame: &RawFrame) -> Result<()> {
        self.send_raw(&FrameCodec::encode_raw(frame))
    }

    /// Send a SETTINGS frame
    pub fn send_settings(&mut self, settings: Settings) -> Result<()> {
        self.send_frame(&SettingsFrame::new(settings).into())
    }

    /// Send a SETTINGS ACK
    pub fn send_settings_ack(&mut self) -> Result<()> {
        self.send_frame(&SettingsFrame::ack().into())
    }

    /// Allocate the next client stream id
    pub fn next_stream_id(&mut self) -> StreamId {
        let id = self.next_stream_id;
        self.next_stream_id += 2;
        id
    }

    /// HPACK-encode a header block with this connection's encoder
    pub fn encode_headers(&mut self, head: &HeaderBlock) -> Bytes {
        let mut block = BytesMut::new();
        self.encoder.encode(&head.to_fields(), &mut block);
        block.freeze()
    }

    /// Send a single HEADERS frame carrying the whole block
    pub fn send_headers(&mut self, stream_id: StreamId, head: &HeaderBlock, end_stream: bool) -> Result<()> {
        let block = self.encode_headers(head);
        self.send_frame(&HeadersFrame::new(stream_id, block, end_stream, true).into())
    }

    /// Send a DATA frame
    pub fn send_data(&mut self, stream_id: StreamId, data: impl Into<Bytes>, end_stream: bool) -> Result<()> {
        self.send_frame(&DataFrame::new(stream_id, data.into(), end_stream).into())
    }

    /// Send a PING frame
    pub fn send_ping(&mut self, data: [u8; 8]) -> Result<()> {
        self.send_frame(&PingFrame::new(data).into())
    }

    /// Send a WINDOW_UPDATE frame
    pub fn send_window_update(&mut self, stream_id: StreamId, increment: u32) -> Result<()> {
        self.send_frame(&WindowUpdateFrame::new(stream_id, increment).into())
    }

    /// Send a PRIORITY frame
    pub fn send_priority(&mut self, stream_id: StreamId, priority: PrioritySpec) -> Result<()> {
        self.send_frame(&Frame::Priority(PriorityFrame { stream_id, priority }))
    }

    /// Send a RST_STREAM frame
    pub fn send_rst_stream(&mut self, stream_id: StreamId, error_code: ErrorCode) -> Result<()> {
        self.send_frame(&Frame::RstStream(RstStreamFrame { stream_id, error_code }))
    }

    /// Send a GOAWAY frame
    pub fn send_goaway(&mut self, last_stream_id: StreamId, error_code: ErrorCode, debug: &str) -> Result<()> {
        let frame = GoawayFrame::new(last_stream_id, error_code, Bytes::from(debug.to_string()));
        self.send_frame(&frame.into())
    }

    /// Receive one frame
    ///
    /// The frame is returned as read, without being applied; pass it to
    /// [`handle_frame`](Self::handle_frame) to keep the connection state
    /// current.
    pub fn recv_frame(&mut self) -> Result<Frame> {
        let mut buf = [0u8; 16 * 1024];
        loop {
            match self.codec.decode() {
                Ok(Some(frame)) => {
                    debug!(frame = %frame.frame_type(), stream_id = frame.stream_id(), "client frame received");
                    return Ok(frame);
                }
                Ok(None) => {}
                Err(e) => return Err(Error::protocol(format!("server sent an invalid frame: {}", e))),
            }
            let n = self.session.read(&mut buf)?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
            self.codec.extend(&buf[..n]);
        }
    }

    /// Read frames until one matches `pred`, applying every frame read
    pub fn recv_until<F>(&mut self, mut pred: F) -> Result<Frame>
    where
        F: FnMut(&Frame) -> bool,
    {
        loop {
            let frame = self.recv_frame()?;
            let matched = pred(&frame);
            self.handle_frame(frame.clone())?;
            if matched {
                return Ok(frame);
            }
        }
    }

    /// Read frames until GOAWAY arrives
    pub fn expect_goaway(&mut self) -> Result<GoawayFrame> {
        match self.recv_until(|f| matches!(f, Frame::Goaway(_)))? {
            Frame::Goaway(goaway) => Ok(goaway),
            _ => Err(Error::ConnectionClosed),
        }
    }

    /// Read frames until RST_STREAM for `stream_id` arrives
    pub fn expect_rst_stream(&mut self, stream_id: StreamId) -> Result<ErrorCode> {
        match self.recv_until(|f| matches!(f, Frame::RstStream(r) if r.stream_id == stream_id))? {
            Frame::RstStream(rst) => Ok(rst.error_code),
            _ => Err(Error::StreamNotFound(stream_id)),
        }
    }

    /// Apply a received frame to the client's view of the connection
    ///
    /// SETTINGS and PING are acknowledged, DATA is credited back and header
    /// blocks are decoded into the stream's [`H2Response`].
    pub fn handle_frame(&mut self, frame: Frame) -> Result<()> {
        match frame {
            Frame::Settings(f) if !f.ack => {
                self.remote_settings.merge(&f.settings);
                if let Some(size) = f.settings.header_table_size {
                    self.encoder.set_max_table_size(size as usize);
                }
                self.send_settings_ack()?;
            }
            Frame::Ping(f) if !f.ack => self.send_frame(&PingFrame::ack(f.data).into())?,
            Frame::Headers(f) => {
                self.partial = Some(PartialBlock {
                    stream_id: f.stream_id,
                    promised_stream_id: None,
                    end_stream: f.end_stream,
                    fragments: BytesMut::from(&f.header_block[..]),
                });
                if f.end_headers {
                    self.finish_block()?;
                }
            }
            Frame::PushPromise(f) => {
                self.partial = Some(PartialBlock {
                    stream_id: f.stream_id,
                    promised_stream_id: Some(f.promised_stream_id),
                    end_stream: false,
                    fragments: BytesMut::from(&f.header_block[..]),
                });
                if f.end_headers {
                    self.finish_block()?;
                }
            }
            Frame::Continuation(f) => {
                if let Some(partial) = self.partial.as_mut() {
                    partial.fragments.extend_from_slice(&f.header_block);
                }
                if f.end_headers {
                    self.finish_block()?;
                }
            }
            Frame::Data(f) => {
                let len = f.frame_size() as u32;
                let response = self.response_mut(f.stream_id);
                let mut body = BytesMut::from(&response.body[..]);
                body.extend_from_slice(&f.data);
                response.body = body.freeze();
                if f.end_stream {
                    self.finished.insert(f.stream_id);
                }
                if self.auto_window_update && len > 0 {
                    self.send_window_update(CONNECTION_STREAM_ID, len)?;
                    if !f.end_stream {
                        self.send_window_update(f.stream_id, len)?;
                    }
                }
            }
            Frame::RstStream(f) => {
                self.response_mut(f.stream_id).reset = Some(f.error_code);
                self.finished.insert(f.stream_id);
            }
            Frame::Goaway(f) => self.goaway = Some(f),
            _ => {}
        }
        Ok(())
    }

    fn response_mut(&mut self, stream_id: StreamId) -> &mut H2Response {
        self.responses.entry(stream_id).or_insert_with(|| H2Response {
            stream_id,
            ..H2Response::default()
        })
    }

    fn finish_block(&mut self) -> Result<()> {
        let partial = match self.partial.take() {
            Some(partial) => partial,
            None => return Ok(()),
        };
        let fields = self
            .decoder
            .decode(partial.fragments.freeze())
            .map_err(|e| Error::connection(ErrorCode::CompressionError, e.to_string()))?;

        if let Some(promised) = partial.promised_stream_id {
            let head = HeaderBlock::from_fields(fields, BlockKind::Request)
                .map_err(|e| Error::InvalidHeader(e.to_string()))?;
            let path = head.path().unwrap_or_default().to_string();
            self.response_mut(partial.stream_id).promised.push((promised, path));
            self.response_mut(promised);
            return Ok(());
        }

        let response = self.response_mut(partial.stream_id);
        let kind = if response.status == 0 {
            BlockKind::Response
        } else {
            BlockKind::Trailers
        };
        let head = HeaderBlock::from_fields(fields, kind).map_err(|e| Error::InvalidHeader(e.to_string()))?;
        match kind {
            BlockKind::Trailers => head.merge_into(&mut response.trailers),
            _ => match head.status().unwrap_or_default() {
                // 1xx responses are followed by the final response
                status if status < 200 => {}
                status => {
                    response.status = status;
                    head.merge_into(&mut response.headers);
                }
            },
        }
        if partial.end_stream {
            self.finished.insert(partial.stream_id);
        }
        Ok(())
    }

    /// Send a simple GET request and wait for its response
    pub fn get(&mut self, path: &str) -> Result<H2Response> {
        self.request("GET", path, &[], Bytes::new())
    }

    /// Send a POST request and wait for its response
    pub fn post(&mut self, path: &str, headers: &[(&str, &str)], body: Bytes) -> Result<H2Response> {
        self.request("POST", path, headers, body)
    }

    /// Send an HTTP/2 request and wait for its response
    pub fn request(
        &mut self,
        method: &str,
        path: &str,
        headers: &[(&str, &str)],
        body: Bytes,
    ) -> Result<H2Response> {
        let stream_id = self.start_request(method, path, headers, body)?;
        self.recv_response(stream_id)
    }

    /// Send an HTTP/2 request without waiting; returns its stream id
    pub fn start_request(
        &mut self,
        method: &str,
        path: &str,
        headers: &[(&str, &str)],
        body: Bytes,
    ) -> Result<StreamId> {
        if !self.connected {
            self.connect()?;
        }
        let stream_id = self.next_stream_id();
        let head = headers.iter().fold(
            HeaderBlock::request(method, "https", path).with_authority("localhost"),
            |head, (name, value)| head.header(name, value),
        );
        let has_body = !body.is_empty();
        self.send_headers(stream_id, &head, !has_body)?;
        if has_body {
            self.send_data(stream_id, body, true)?;
        }
        Ok(stream_id)
    }

    /// Read frames until `stream_id` finished, then return its response
    ///
    /// A stream reset by the server is reported as a stream error.
    pub fn recv_response(&mut self, stream_id: StreamId) -> Result<H2Response> {
        while !self.finished.contains(&stream_id) {
            let frame = self.recv_frame()?;
            self.handle_frame(frame)?;
            if let Some(goaway) = &self.goaway {
                if stream_id > goaway.last_stream_id || goaway.error_code != ErrorCode::NoError {
                    return Err(Error::connection(
                        goaway.error_code,
                        String::from_utf8_lossy(&goaway.debug_data).into_owned(),
                    ));
                }
            }
        }
        let response = self.responses.remove(&stream_id).unwrap_or_default();
        match response.reset {
            Some(code) => Err(Error::stream(stream_id, code, "stream reset by server")),
            None => Ok(response),
        }
    }

    /// GOAWAY received from the server, if any
    pub fn goaway(&self) -> Option<&GoawayFrame> {
        self.goaway.as_ref()
    }

    /// Get local settings
    pub fn local_settings(&self) -> &Settings {
        &self.local_settings
    }

    /// Get remote settings
    pub fn remote_settings(&self) -> &Settings {
        &self.remote_settings
    }
}

/// HTTP/2 response as seen by [`H2Client`]
#[derive(Debug, Clone, Default)]
pub struct H2Response {
    /// Stream ID
    pub stream_id: StreamId,
    /// Status code (0 until the final response headers arrive)
    pub status: u16,
    /// Headers, repeated names joined
    pub headers: HashMap<String, String>,
    /// Body
    pub body: Bytes,
    /// Trailers
    pub trailers: HashMap<String, String>,
    /// Pushes promised on this stream: promised stream id and path
    pub promised: Vec<(StreamId, String)>,
    /// Error code if the server reset the stream
    pub reset: Option<ErrorCode>,
}

impl H2Response {
    /// Get status code
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Get header value
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(|s| s.as_str())
    }

    /// Get body as bytes
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Get body as string
    pub fn body_string(&self) -> std::result::Result<String, std::string::FromUtf8Error> {
        String::from_utf8(self.body.to_vec())
    }
}

/// HTTP/2 client builder
pub struct H2ClientBuilder {
    settings: SettingsBuilder,
    auto_window_update: bool,
    timeout: Option<Duration>,
}

impl H2ClientBuilder {
    /// Create a new client builder
    pub fn new() -> Self {
        H2ClientBuilder {
            settings: SettingsBuilder::new()
                .header_table_size(DEFAULT_HEADER_TABLE_SIZE)
                .enable_push(false)
                .initial_window_size(65535)
                .max_frame_size(16384),
            auto_window_update: true,
            timeout: Some(Duration::from_secs(5)),
        }
    }

    /// Set header table size
    pub fn header_table_size(mut self, size: u32) -> Self {
        self.settings = self.settings.header_table_size(size);
        self
    }

    /// Set enable push
    pub fn enable_push(mut self, enable: bool) -> Self {
        self.settings = self.settings.enable_push(enable);
        self
    }

    /// Set initial window size
    pub fn initial_window_size(mut self, size: u32) -> Self {
        self.settings = self.settings.initial_window_size(size);
        self
    }

    /// Set max frame size
    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.settings = self.settings.max_frame_size(size);
        self
    }

    /// Set max concurrent streams
    pub fn max_concurrent_streams(mut self, max: u32) -> Self {
        self.settings = self.settings.max_concurrent_streams(max);
        self
    }

    /// Credit received DATA back automatically (default on)
    pub fn auto_window_update(mut self, enable: bool) -> Self {
        self.auto_window_update = enable;
        self
    }

    /// Set the read timeout
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build the client
    pub fn build<S: SessionOps>(self, session: S) -> Result<H2Client<S>> {
        let local_settings = self.settings.build()?;
        let mut session = HttpSession::new(session);
        session.set_timeout(self.timeout);
        let mut codec = FrameCodec::new();
        // a test client reads whatever the server sends
        codec.set_max_frame_size(MAX_FRAME_SIZE as u32);

        Ok(H2Client {
            session,
            codec,
            encoder: Encoder::new(DEFAULT_HEADER_TABLE_SIZE as usize),
            decoder: Decoder::new(DEFAULT_HEADER_TABLE_SIZE as usize),
            local_settings,
            remote_settings: Settings::new(),
            next_stream_id: 1,
            auto_window_update: self.auto_window_update,
            partial: None,
            responses: HashMap::new(),
            finished: HashSet::new(),
            goaway: None,
            connected: false,
        })
    }
}

impl Default for H2ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
