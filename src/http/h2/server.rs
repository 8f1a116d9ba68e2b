//! Blocking HTTP/2 server driver
//!
//! [`H2Server`] owns one [`Connection`] and one transport session. It reads
//! bytes, feeds them to the engine, hands complete requests to a
//! [`Handler`] and writes whatever the engine queued through a single
//! writer. It returns when the connection closes.

use super::config::{ConnectionConfig, ConnectionConfigBuilder};
use super::connection::{Connection, ConnectionState, Event};
use super::error::{Error, ErrorCode, Result};
use super::flow_control::WindowUpdatePolicy;
use super::headers::HeaderBlock;
use super::profile::ConformanceProfile;
use super::stream::StreamId;
use crate::http::{HttpSession, SessionOps};
use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use std::io;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A complete request received on one stream
#[derive(Debug, Clone)]
pub struct H2Request {
    /// Stream ID
    pub stream_id: StreamId,
    /// `:method`
    pub method: String,
    /// `:path`
    pub path: String,
    /// `:scheme`
    pub scheme: String,
    /// `:authority`
    pub authority: String,
    /// Regular headers, repeated names joined; trailers are merged in
    pub headers: HashMap<String, String>,
    /// Body
    pub body: Bytes,
}

impl H2Request {
    fn from_head(stream_id: StreamId, head: &HeaderBlock) -> Self {
        let mut request = H2Request {
            stream_id,
            method: head.pseudo.method.clone().unwrap_or_default(),
            path: head.pseudo.path.clone().unwrap_or_default(),
            scheme: head.pseudo.scheme.clone().unwrap_or_default(),
            authority: head.pseudo.authority.clone().unwrap_or_default(),
            headers: HashMap::new(),
            body: Bytes::new(),
        };
        request.merge_headers(head);
        request
    }

    fn merge_headers(&mut self, head: &HeaderBlock) {
        head.merge_into(&mut self.headers);
    }

    /// Get method
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Get path
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Get scheme
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Get authority
    pub fn authority(&self) -> &str {
        &self.authority
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

/// Response produced by a [`Handler`]
#[derive(Debug, Clone, Default)]
pub struct H2Response {
    /// Status code
    pub status: u16,
    /// Headers, names are lowercased when sent
    pub headers: Vec<(String, String)>,
    /// Body
    pub body: Bytes,
    /// Trailers sent after the body
    pub trailers: Vec<(String, String)>,
    /// Resources to push: request path and the pushed response
    pub pushes: Vec<(String, H2Response)>,
}

impl H2Response {
    /// Create an empty response
    pub fn new(status: u16) -> Self {
        H2Response {
            status,
            ..H2Response::default()
        }
    }

    /// Add a header
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Set the body
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Add a trailer
    pub fn trailer(mut self, name: &str, value: &str) -> Self {
        self.trailers.push((name.to_string(), value.to_string()));
        self
    }

    /// Push `response` as the answer to `GET path`, if the client allows it
    pub fn push(mut self, path: &str, response: H2Response) -> Self {
        self.pushes.push((path.to_string(), response));
        self
    }

    fn head(&self) -> HeaderBlock {
        self.headers.iter().fold(HeaderBlock::response(self.status), |head, (name, value)| {
            head.header(&name.to_ascii_lowercase(), value)
        })
    }

    fn trailer_block(&self) -> HeaderBlock {
        self.trailers.iter().fold(HeaderBlock::new(), |head, (name, value)| {
            head.header(&name.to_ascii_lowercase(), value)
        })
    }
}

/// Application callback for complete requests
pub trait Handler {
    /// Produce the response for `request`
    fn handle(&mut self, request: &H2Request) -> H2Response;
}

impl<F> Handler for F
where
    F: FnMut(&H2Request) -> H2Response,
{
    fn handle(&mut self, request: &H2Request) -> H2Response {
        self(request)
    }
}

/// HTTP/2 server for one connection
pub struct H2Server<S: SessionOps> {
    session: HttpSession<S>,
    conn: Connection,
    /// Requests still receiving headers or body
    pending: HashMap<StreamId, (H2Request, BytesMut)>,
    read_buf: Vec<u8>,
}

impl<S: SessionOps> H2Server<S> {
    /// Create a server with default settings
    pub fn new(session: S) -> Result<Self> {
        H2ServerBuilder::new().build(session)
    }

    /// Serve requests until the connection closes
    ///
    /// A connection error is returned after its GOAWAY has been written. The
    /// peer closing the transport or ending the connection with GOAWAY is a
    /// normal return.
    pub fn serve<H: Handler>(&mut self, handler: &mut H) -> Result<()> {
        info!("serving HTTP/2 connection");
        let result = self.run(handler);
        // the peer may have gone already
        if let Err(err) = self.flush() {
            debug!(error = %err, "final flush failed");
        }
        if let Err(err) = self.session.close() {
            debug!(error = %err, "closing the transport failed");
        }
        match result {
            Err(Error::ConnectionClosed) => Ok(()),
            other => other,
        }
    }

    fn run<H: Handler>(&mut self, handler: &mut H) -> Result<()> {
        loop {
            self.flush()?;
            if self.conn.state() == ConnectionState::Closed {
                return Ok(());
            }

            let n = match self.session.read(&mut self.read_buf) {
                Ok(0) => {
                    debug!("peer closed the transport");
                    return Ok(());
                }
                Ok(n) => n,
                Err(crate::http::Error::Io(e)) if e.kind() == io::ErrorKind::ConnectionReset => {
                    debug!("peer reset the transport");
                    return Ok(());
                }
                Err(crate::http::Error::Timeout) => {
                    self.conn.poll_timeout(Instant::now())?;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let received = self.conn.receive(&self.read_buf[..n]);
            self.dispatch_events(handler)?;
            if let Err(err) = received {
                warn!(error = %err, "closing connection");
                self.flush()?;
                return Err(err);
            }
        }
    }

    fn dispatch_events<H: Handler>(&mut self, handler: &mut H) -> Result<()> {
        while let Some(event) = self.conn.poll_event() {
            match event {
                Event::Headers {
                    stream_id,
                    head,
                    end_stream,
                } => {
                    let request = H2Request::from_head(stream_id, &head);
                    if end_stream {
                        self.respond(handler, request)?;
                    } else {
                        self.pending.insert(stream_id, (request, BytesMut::new()));
                    }
                }
                Event::Data {
                    stream_id,
                    data,
                    end_stream,
                } => {
                    if let Some((_, body)) = self.pending.get_mut(&stream_id) {
                        body.extend_from_slice(&data);
                    }
                    if end_stream {
                        self.complete(handler, stream_id)?;
                    }
                }
                Event::Trailers { stream_id, head } => {
                    if let Some((request, _)) = self.pending.get_mut(&stream_id) {
                        request.merge_headers(&head);
                    }
                    self.complete(handler, stream_id)?;
                }
                Event::StreamReset { stream_id, code, .. } => {
                    debug!(stream_id, code = %code, "request abandoned");
                    self.pending.remove(&stream_id);
                }
                Event::GoAway { code, .. } => {
                    debug!(code = %code, "peer is going away");
                    self.conn.shutdown();
                }
                other => debug!(event = ?other, "connection event"),
            }
        }
        Ok(())
    }

    fn complete<H: Handler>(&mut self, handler: &mut H, stream_id: StreamId) -> Result<()> {
        if let Some((mut request, body)) = self.pending.remove(&stream_id) {
            request.body = body.freeze();
            self.respond(handler, request)?;
        }
        Ok(())
    }

    fn respond<H: Handler>(&mut self, handler: &mut H, request: H2Request) -> Result<()> {
        let response = handler.handle(&request);
        let id = request.stream_id;
        debug!(stream_id = id, method = %request.method, path = %request.path, status = response.status, "request handled");

        // Promises go out before the response that refers to them
        let mut promised = Vec::new();
        for (path, pushed) in &response.pushes {
            let push_request = HeaderBlock::request("GET", &request.scheme, path)
                .with_authority(&request.authority);
            match self.conn.push_promise(id, &push_request) {
                Ok(promised_id) => promised.push((promised_id, pushed)),
                Err(Error::InvalidOperation(reason)) => {
                    debug!(stream_id = id, path = %path, reason = %reason, "push skipped");
                }
                Err(e) => return self.stream_failed(id, e),
            }
        }

        if let Err(e) = self.send(id, &response) {
            return self.stream_failed(id, e);
        }
        for (promised_id, pushed) in promised {
            if let Err(e) = self.send(promised_id, pushed) {
                self.stream_failed(promised_id, e)?;
            }
        }
        Ok(())
    }

    fn send(&mut self, stream_id: StreamId, response: &H2Response) -> Result<()> {
        let head = response.head();
        if response.trailers.is_empty() {
            return self.conn.send_response(stream_id, &head, response.body.clone());
        }
        self.conn.send_headers(stream_id, &head, false)?;
        if !response.body.is_empty() {
            self.conn.send_data(stream_id, response.body.clone(), false)?;
        }
        self.conn.send_trailers(stream_id, &response.trailer_block())
    }

    /// A response that cannot be sent resets only its stream
    fn stream_failed(&mut self, stream_id: StreamId, err: Error) -> Result<()> {
        match err {
            Error::ConnectionClosed => Err(err),
            Error::Blocked(_) | Error::StreamNotFound(_) => {
                debug!(stream_id, error = %err, "response dropped");
                Ok(())
            }
            other => {
                warn!(stream_id, error = %other, "response failed");
                match self.conn.reset_stream(stream_id, ErrorCode::InternalError) {
                    Err(Error::StreamNotFound(_)) => Ok(()),
                    result => result,
                }
            }
        }
    }

    fn flush(&mut self) -> Result<()> {
        if self.conn.wants_write() {
            let out = self.conn.take_outbound();
            self.session.write_all(&out)?;
        }
        Ok(())
    }

    /// Start a graceful shutdown
    pub fn shutdown(&mut self) -> Result<()> {
        self.conn.shutdown();
        self.flush()
    }

    /// The connection engine
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Mutable access to the connection engine
    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Get a reference to the transport session
    pub fn session(&self) -> &HttpSession<S> {
        &self.session
    }
}

/// HTTP/2 server builder
pub struct H2ServerBuilder {
    config: ConnectionConfigBuilder,
    read_timeout: Option<Duration>,
}

impl H2ServerBuilder {
    /// Create a new server builder with the server defaults
    pub fn new() -> Self {
        H2ServerBuilder {
            config: ConnectionConfigBuilder::server(),
            read_timeout: Some(Duration::from_secs(1)),
        }
    }

    /// Set header table size
    pub fn header_table_size(mut self, size: u32) -> Self {
        self.config = self.config.header_table_size(size);
        self
    }

    /// Set enable push
    pub fn enable_push(mut self, enable: bool) -> Self {
        self.config = self.config.enable_push(enable);
        self
    }

    /// Set initial window size
    pub fn initial_window_size(mut self, size: u32) -> Self {
        self.config = self.config.initial_window_size(size);
        self
    }

    /// Set max concurrent streams
    pub fn max_concurrent_streams(mut self, max: u32) -> Self {
        self.config = self.config.max_concurrent_streams(max);
        self
    }

    /// Set max frame size
    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.config = self.config.max_frame_size(size);
        self
    }

    /// Set max header list size
    pub fn max_header_list_size(mut self, size: u32) -> Self {
        self.config = self.config.max_header_list_size(size);
        self
    }

    /// Set the conformance profile
    pub fn profile(mut self, profile: ConformanceProfile) -> Self {
        self.config = self.config.profile(profile);
        self
    }

    /// Set the WINDOW_UPDATE policy
    pub fn window_update(mut self, policy: WindowUpdatePolicy) -> Self {
        self.config = self.config.window_update(policy);
        self
    }

    /// How long one read waits before timers are checked
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Replace the whole connection configuration
    pub fn config(mut self, config: ConnectionConfig) -> Self {
        self.config = ConnectionConfigBuilder::from(config);
        self
    }

    /// Build the server
    pub fn build<S: SessionOps>(self, session: S) -> Result<H2Server<S>> {
        let config = self.config.build()?;
        let mut session = HttpSession::new(session);
        session.set_timeout(self.read_timeout);
        Ok(H2Server {
            session,
            conn: Connection::server(config),
            pending: HashMap::new(),
            read_buf: vec![0u8; 16 * 1024],
        })
    }
}

impl Default for H2ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
