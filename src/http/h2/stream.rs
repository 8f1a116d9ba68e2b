//! HTTP/2 stream management
//!
//! This module implements stream management as defined in RFC 7540 Section 5.1.

use super::error::{Error, ErrorCode, Result};
use super::flow_control::StreamFlowControl;
use super::hpack::HeaderField;
use super::MAX_STREAM_ID;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::debug;

/// Stream ID type
pub type StreamId = u32;

/// Stream state as defined in RFC 7540 Section 5.1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Idle: No frames have been sent/received
    Idle,
    /// Reserved (local): PUSH_PROMISE sent
    ReservedLocal,
    /// Reserved (remote): PUSH_PROMISE received
    ReservedRemote,
    /// Open: Both sides can send frames
    Open,
    /// Half-closed (local): We can't send, they can
    HalfClosedLocal,
    /// Half-closed (remote): They can't send, we can
    HalfClosedRemote,
    /// Closed: Stream is closed
    Closed,
}

impl StreamState {
    /// Check if stream can send data
    pub fn can_send(&self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedRemote)
    }

    /// Check if stream can receive data
    pub fn can_receive(&self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedLocal)
    }

    /// Check if stream is closed
    pub fn is_closed(&self) -> bool {
        matches!(self, StreamState::Closed)
    }

    /// Check if the stream counts toward MAX_CONCURRENT_STREAMS
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            StreamState::Open | StreamState::HalfClosedLocal | StreamState::HalfClosedRemote
        )
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamState::Idle => "idle",
            StreamState::ReservedLocal => "reserved (local)",
            StreamState::ReservedRemote => "reserved (remote)",
            StreamState::Open => "open",
            StreamState::HalfClosedLocal => "half-closed (local)",
            StreamState::HalfClosedRemote => "half-closed (remote)",
            StreamState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// HTTP/2 stream
#[derive(Debug)]
pub struct H2Stream {
    /// Stream ID
    id: StreamId,
    /// Stream state
    state: StreamState,
    /// Flow control
    flow_control: StreamFlowControl,
    /// Inbound content-length, if declared
    content_length: Option<u64>,
    /// DATA payload bytes received so far
    received: u64,
    /// Response to a HEAD request: content-length describes no body
    head_request: bool,
    /// Initial HEADERS received from the peer
    headers_received: bool,
    /// Trailing HEADERS received from the peer
    trailer_seen: bool,
    /// When the stream entered the closed state
    closed_at: Option<Instant>,
    /// RST_STREAM was sent by us
    reset_locally: bool,
    /// DATA waiting for flow-control credit
    outbound: VecDeque<Bytes>,
    outbound_len: usize,
    /// END_STREAM follows the queued DATA
    end_stream_queued: bool,
    /// Trailers follow the queued DATA
    trailers_queued: Option<Vec<HeaderField>>,
}

impl H2Stream {
    /// Create a new idle stream with the given window sizes
    pub fn new(id: StreamId, send_window: u32, recv_window: u32) -> Self {
        H2Stream {
            id,
            state: StreamState::Idle,
            flow_control: StreamFlowControl::with_initial_sizes(id, send_window, recv_window),
            content_length: None,
            received: 0,
            head_request: false,
            headers_received: false,
            trailer_seen: false,
            closed_at: None,
            reset_locally: false,
            outbound: VecDeque::new(),
            outbound_len: 0,
            end_stream_queued: false,
            trailers_queued: None,
        }
    }

    /// Get stream ID
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Get stream state
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Get flow control
    pub fn flow_control(&self) -> &StreamFlowControl {
        &self.flow_control
    }

    /// Get mutable flow control
    pub fn flow_control_mut(&mut self) -> &mut StreamFlowControl {
        &mut self.flow_control
    }

    /// Check if the peer already sent its initial HEADERS
    pub fn headers_received(&self) -> bool {
        self.headers_received
    }

    /// Check if trailers were received
    pub fn trailer_seen(&self) -> bool {
        self.trailer_seen
    }

    /// Time the stream was closed
    pub fn closed_at(&self) -> Option<Instant> {
        self.closed_at
    }

    /// Check if we reset this stream
    pub fn reset_locally(&self) -> bool {
        self.reset_locally
    }

    /// Mark the stream as carrying a HEAD exchange
    pub fn set_head_request(&mut self) {
        self.head_request = true;
    }

    fn transition(&mut self, state: StreamState) {
        if state != self.state {
            debug!(stream_id = self.id, from = %self.state, to = %state, "stream state change");
            if state.is_closed() {
                self.closed_at = Some(Instant::now());
                self.outbound.clear();
                self.outbound_len = 0;
                self.trailers_queued = None;
            }
            self.state = state;
        }
    }

    /// Apply received HEADERS (initial or trailing)
    pub fn recv_headers(&mut self, end_stream: bool) -> Result<()> {
        let next = match self.state {
            StreamState::Idle => {
                if end_stream {
                    StreamState::HalfClosedRemote
                } else {
                    StreamState::Open
                }
            }
            StreamState::ReservedRemote => {
                if end_stream {
                    StreamState::Closed
                } else {
                    StreamState::HalfClosedLocal
                }
            }
            StreamState::Open | StreamState::HalfClosedLocal => {
                if self.headers_received {
                    self.trailer_seen = true;
                }
                if end_stream {
                    self.remote_closed_state()
                } else {
                    self.state
                }
            }
            StreamState::ReservedLocal => {
                return Err(Error::protocol(format!(
                    "HEADERS received on stream {} in state {}",
                    self.id, self.state
                )));
            }
            StreamState::HalfClosedRemote | StreamState::Closed => {
                return Err(Error::stream(
                    self.id,
                    ErrorCode::StreamClosed,
                    format!("HEADERS received in state {}", self.state),
                ));
            }
        };
        self.headers_received = true;
        self.transition(next);
        Ok(())
    }

    /// Apply a received 1xx response; the final response is still expected
    pub fn recv_informational(&mut self) -> Result<()> {
        match self.state {
            StreamState::Open | StreamState::HalfClosedLocal => Ok(()),
            StreamState::ReservedRemote => {
                self.transition(StreamState::HalfClosedLocal);
                Ok(())
            }
            _ => Err(Error::stream(
                self.id,
                ErrorCode::StreamClosed,
                format!("HEADERS received in state {}", self.state),
            )),
        }
    }

    /// Account for received DATA payload bytes
    ///
    /// Exceeding a declared content-length is detected immediately.
    pub fn recv_data(&mut self, len: usize, end_stream: bool) -> Result<()> {
        if !self.state.can_receive() {
            return Err(Error::stream(
                self.id,
                ErrorCode::StreamClosed,
                format!("DATA received in state {}", self.state),
            ));
        }

        self.received += len as u64;
        if let Some(expected) = self.content_length {
            if !self.head_request && self.received > expected {
                return Err(self.length_mismatch(expected));
            }
        }

        if end_stream {
            self.check_content_length()?;
            let next = self.remote_closed_state();
            self.transition(next);
        }
        Ok(())
    }

    /// Verify the declared content-length at end of stream
    pub fn check_content_length(&self) -> Result<()> {
        match self.content_length {
            Some(expected) if !self.head_request && self.received != expected => {
                Err(self.length_mismatch(expected))
            }
            _ => Ok(()),
        }
    }

    fn length_mismatch(&self, expected: u64) -> Error {
        Error::stream(
            self.id,
            ErrorCode::ProtocolError,
            format!(
                "content-length {} does not match {} bytes of DATA",
                expected, self.received
            ),
        )
    }

    /// Record the inbound content-length
    pub fn set_content_length(&mut self, len: Option<u64>) {
        self.content_length = len;
    }

    fn remote_closed_state(&self) -> StreamState {
        match self.state {
            StreamState::HalfClosedLocal => StreamState::Closed,
            _ => StreamState::HalfClosedRemote,
        }
    }

    fn local_closed_state(&self) -> StreamState {
        match self.state {
            StreamState::HalfClosedRemote => StreamState::Closed,
            _ => StreamState::HalfClosedLocal,
        }
    }

    /// Prepare to send HEADERS
    pub fn send_headers(&mut self, end_stream: bool) -> Result<()> {
        let next = match self.state {
            StreamState::Idle => {
                if end_stream {
                    StreamState::HalfClosedLocal
                } else {
                    StreamState::Open
                }
            }
            StreamState::ReservedLocal => {
                if end_stream {
                    StreamState::Closed
                } else {
                    StreamState::HalfClosedRemote
                }
            }
            StreamState::Open | StreamState::HalfClosedRemote => {
                if end_stream {
                    self.local_closed_state()
                } else {
                    self.state
                }
            }
            _ => return Err(Error::Blocked(self.id)),
        };
        self.transition(next);
        Ok(())
    }

    /// Apply END_STREAM sent on DATA
    pub fn send_end_stream(&mut self) {
        let next = self.local_closed_state();
        self.transition(next);
    }

    /// Reserve this stream for a promised push sent by us
    pub fn reserve_local(&mut self) {
        self.transition(StreamState::ReservedLocal);
    }

    /// Reserve this stream for a promised push received from the peer
    pub fn reserve_remote(&mut self) {
        self.transition(StreamState::ReservedRemote);
    }

    /// Close the stream
    pub fn close(&mut self) {
        self.transition(StreamState::Closed);
    }

    /// Reset the stream
    pub fn reset(&mut self, locally: bool) {
        self.reset_locally = locally;
        self.transition(StreamState::Closed);
    }

    /// Check if the stream was closed at least `grace` ago
    pub fn past_grace(&self, grace: Duration) -> bool {
        match self.closed_at {
            Some(at) => at.elapsed() >= grace,
            None => true,
        }
    }

    /// Queue DATA for sending as credit allows
    pub fn queue_data(&mut self, data: Bytes, end_stream: bool) -> Result<()> {
        if !self.state.can_send() || self.end_stream_queued || self.trailers_queued.is_some() {
            return Err(Error::Blocked(self.id));
        }
        self.outbound_len += data.len();
        self.outbound.push_back(data);
        self.end_stream_queued = end_stream;
        Ok(())
    }

    /// Queue trailers behind any pending DATA
    pub fn queue_trailers(&mut self, trailers: Vec<HeaderField>) -> Result<()> {
        if !self.state.can_send() || self.end_stream_queued || self.trailers_queued.is_some() {
            return Err(Error::Blocked(self.id));
        }
        self.trailers_queued = Some(trailers);
        Ok(())
    }

    /// Bytes of DATA waiting for credit
    pub fn queued_len(&self) -> usize {
        self.outbound_len
    }

    /// Check if anything waits to be sent
    pub fn has_pending_output(&self) -> bool {
        !self.outbound.is_empty() || self.trailers_queued.is_some()
    }

    /// Check if the next queued DATA chunk can go out without credit
    pub fn next_chunk_is_empty(&self) -> bool {
        self.outbound.front().map_or(false, |chunk| chunk.is_empty())
    }

    /// Take up to `max` bytes of queued DATA
    ///
    /// Returns the chunk and whether END_STREAM goes with it.
    pub fn pop_chunk(&mut self, max: usize) -> Option<(Bytes, bool)> {
        let front = self.outbound.front_mut()?;
        let chunk = if front.len() <= max {
            self.outbound.pop_front().unwrap_or_default()
        } else {
            front.split_to(max)
        };
        self.outbound_len -= chunk.len();
        let end_stream =
            self.outbound.is_empty() && self.end_stream_queued && self.trailers_queued.is_none();
        Some((chunk, end_stream))
    }

    /// Take the queued trailers once all DATA has been sent
    pub fn take_trailers(&mut self) -> Option<Vec<HeaderField>> {
        if self.outbound.is_empty() {
            self.trailers_queued.take()
        } else {
            None
        }
    }
}

/// Stream manager
///
/// Manages all streams for a connection and enforces stream identifier
/// rules: peer ids must have the peer's parity and strictly increase.
#[derive(Debug)]
pub struct StreamManager {
    /// Known streams, including recently closed ones
    streams: HashMap<StreamId, H2Stream>,
    /// True for the client role (odd local ids)
    is_client: bool,
    /// Next locally initiated stream ID
    next_local_id: StreamId,
    /// Next locally promised stream ID (server push)
    next_push_id: StreamId,
    /// Highest peer-initiated (or peer-promised) stream id accepted
    highest_peer_id: StreamId,
    /// Closed streams kept for late-frame handling, oldest first
    closed: VecDeque<StreamId>,
    max_closed_streams: usize,
}

impl StreamManager {
    /// Create a new stream manager
    ///
    /// # Arguments
    /// * `is_client` - True if this is a client (odd stream IDs), false for server (even)
    /// * `max_closed_streams` - Closed streams remembered for grace handling
    pub fn new(is_client: bool, max_closed_streams: usize) -> Self {
        StreamManager {
            streams: HashMap::new(),
            is_client,
            next_local_id: if is_client { 1 } else { 2 },
            next_push_id: 2,
            highest_peer_id: 0,
            closed: VecDeque::new(),
            max_closed_streams,
        }
    }

    /// Check if a stream id belongs to streams we initiate
    pub fn is_local(&self, stream_id: StreamId) -> bool {
        (stream_id % 2 == 1) == self.is_client
    }

    /// Get next stream ID (without incrementing)
    pub fn peek_next_stream_id(&self) -> StreamId {
        self.next_local_id
    }

    /// Highest stream id accepted from the peer
    pub fn highest_peer_id(&self) -> StreamId {
        self.highest_peer_id
    }

    /// Allocate the next locally initiated stream id
    pub fn allocate_local_id(&mut self) -> Result<StreamId> {
        let stream_id = self.next_local_id;
        if stream_id > MAX_STREAM_ID {
            return Err(Error::protocol("Stream identifiers exhausted"));
        }
        self.next_local_id += 2;
        Ok(stream_id)
    }

    /// Allocate the next stream id to promise to the peer (even)
    pub fn allocate_push_id(&mut self) -> Result<StreamId> {
        let stream_id = self.next_push_id;
        if stream_id > MAX_STREAM_ID {
            return Err(Error::protocol("Stream identifiers exhausted"));
        }
        self.next_push_id += 2;
        Ok(stream_id)
    }

    /// Accept a new peer-initiated stream id
    ///
    /// The id must have the peer's parity and be above every id the peer
    /// used before; anything else is a connection error.
    pub fn accept_peer_id(&mut self, stream_id: StreamId) -> Result<()> {
        if self.is_local(stream_id) {
            return Err(Error::protocol(format!(
                "Stream {} has the wrong parity for a peer-initiated stream",
                stream_id
            )));
        }
        if stream_id <= self.highest_peer_id {
            return Err(Error::protocol(format!(
                "Stream id {} is not greater than last accepted stream id {}",
                stream_id, self.highest_peer_id
            )));
        }
        self.highest_peer_id = stream_id;
        Ok(())
    }

    /// Treat a peer id as used without opening it, so it and every lower
    /// peer id stop being idle
    pub fn note_peer_id(&mut self, stream_id: StreamId) {
        if !self.is_local(stream_id) && stream_id > self.highest_peer_id {
            self.highest_peer_id = stream_id;
        }
    }

    /// Check if a stream id has never been used by either side
    pub fn is_idle(&self, stream_id: StreamId) -> bool {
        if self.streams.contains_key(&stream_id) {
            return false;
        }
        if self.is_local(stream_id) {
            // a server only initiates streams by promising them
            let next = if self.is_client {
                self.next_local_id
            } else {
                self.next_push_id
            };
            stream_id >= next
        } else {
            stream_id > self.highest_peer_id
        }
    }

    /// Add a stream
    pub fn insert(&mut self, stream: H2Stream) {
        self.streams.insert(stream.id(), stream);
    }

    /// Get a stream by ID
    pub fn get_stream(&self, stream_id: StreamId) -> Option<&H2Stream> {
        self.streams.get(&stream_id)
    }

    /// Get a mutable stream by ID
    pub fn get_stream_mut(&mut self, stream_id: StreamId) -> Option<&mut H2Stream> {
        self.streams.get_mut(&stream_id)
    }

    /// Iterate over all known streams
    pub fn streams_mut(&mut self) -> impl Iterator<Item = &mut H2Stream> {
        self.streams.values_mut()
    }

    /// Number of open or half-closed streams initiated by one side
    pub fn active_count(&self, local: bool) -> usize {
        self.streams
            .values()
            .filter(|s| s.state().is_active() && self.is_local(s.id()) == local)
            .count()
    }

    /// Get number of streams that are not closed
    pub fn active_stream_count(&self) -> usize {
        self.streams
            .values()
            .filter(|s| !s.state().is_closed())
            .count()
    }

    /// Get all stream IDs, ascending
    pub fn stream_ids(&self) -> Vec<StreamId> {
        let mut ids: Vec<StreamId> = self.streams.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Remember a closed stream, forgetting the oldest when over the limit
    pub fn on_closed(&mut self, stream_id: StreamId) {
        self.closed.push_back(stream_id);
        while self.closed.len() > self.max_closed_streams {
            if let Some(old) = self.closed.pop_front() {
                if self.streams.get(&old).map_or(false, |s| s.state().is_closed()) {
                    self.streams.remove(&old);
                }
            }
        }
    }

    /// Forget closed streams whose grace window has passed
    pub fn prune_closed(&mut self, grace: Duration) {
        let streams = &mut self.streams;
        self.closed.retain(|id| match streams.get(id) {
            Some(stream) if stream.state().is_closed() && stream.past_grace(grace) => {
                streams.remove(id);
                false
            }
            Some(_) => true,
            None => false,
        });
    }
}
