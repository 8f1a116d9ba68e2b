//! HTTP/2 frame types and utilities
//!
//! This module defines the frame types specified in RFC 7540 Section 6.
//!
//! Decoded frames are represented by the tagged [`Frame`] enum. Well-formed
//! frames are built with [`FrameBuilder`], which rejects illegal flag/field
//! combinations when `build()` is called. [`RawFrame`] bypasses every check and
//! is what a test driver uses to put deliberately malformed frames on the wire.

use super::error::ErrorCode;
use super::settings::Settings;
use super::MAX_STREAM_ID;
use bytes::Bytes;
use std::fmt;

/// HTTP/2 frame types (RFC 7540 Section 6)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    /// DATA frame (0x0) - Conveys arbitrary, variable-length sequences of octets
    Data,
    /// HEADERS frame (0x1) - Opens a stream and carries header block fragment
    Headers,
    /// PRIORITY frame (0x2) - Specifies sender-advised priority of a stream
    Priority,
    /// RST_STREAM frame (0x3) - Allows immediate termination of a stream
    RstStream,
    /// SETTINGS frame (0x4) - Conveys configuration parameters
    Settings,
    /// PUSH_PROMISE frame (0x5) - Used to notify peer of intent to initiate stream
    PushPromise,
    /// PING frame (0x6) - Mechanism for measuring round-trip time
    Ping,
    /// GOAWAY frame (0x7) - Initiates shutdown of connection
    Goaway,
    /// WINDOW_UPDATE frame (0x8) - Implements flow control
    WindowUpdate,
    /// CONTINUATION frame (0x9) - Continues sequence of header block fragments
    Continuation,
    /// Extension or unassigned frame type; never an error
    Unknown(u8),
}

impl FrameType {
    /// Convert frame type to u8
    pub fn as_u8(self) -> u8 {
        match self {
            FrameType::Data => 0x0,
            FrameType::Headers => 0x1,
            FrameType::Priority => 0x2,
            FrameType::RstStream => 0x3,
            FrameType::Settings => 0x4,
            FrameType::PushPromise => 0x5,
            FrameType::Ping => 0x6,
            FrameType::Goaway => 0x7,
            FrameType::WindowUpdate => 0x8,
            FrameType::Continuation => 0x9,
            FrameType::Unknown(byte) => byte,
        }
    }

    /// Create frame type from u8
    pub fn from_u8(byte: u8) -> Self {
        match byte {
            0x0 => FrameType::Data,
            0x1 => FrameType::Headers,
            0x2 => FrameType::Priority,
            0x3 => FrameType::RstStream,
            0x4 => FrameType::Settings,
            0x5 => FrameType::PushPromise,
            0x6 => FrameType::Ping,
            0x7 => FrameType::Goaway,
            0x8 => FrameType::WindowUpdate,
            0x9 => FrameType::Continuation,
            other => FrameType::Unknown(other),
        }
    }

    /// Get frame type name
    pub fn name(&self) -> &'static str {
        match self {
            FrameType::Data => "DATA",
            FrameType::Headers => "HEADERS",
            FrameType::Priority => "PRIORITY",
            FrameType::RstStream => "RST_STREAM",
            FrameType::Settings => "SETTINGS",
            FrameType::PushPromise => "PUSH_PROMISE",
            FrameType::Ping => "PING",
            FrameType::Goaway => "GOAWAY",
            FrameType::WindowUpdate => "WINDOW_UPDATE",
            FrameType::Continuation => "CONTINUATION",
            FrameType::Unknown(_) => "UNKNOWN",
        }
    }

    /// Flag bits defined for this frame type; all others are ignored on
    /// read and cleared on write
    pub fn defined_flags(&self) -> u8 {
        match self {
            FrameType::Data => FrameFlags::END_STREAM | FrameFlags::PADDED,
            FrameType::Headers => {
                FrameFlags::END_STREAM
                    | FrameFlags::END_HEADERS
                    | FrameFlags::PADDED
                    | FrameFlags::PRIORITY
            }
            FrameType::Settings | FrameType::Ping => FrameFlags::ACK,
            FrameType::PushPromise => FrameFlags::END_HEADERS | FrameFlags::PADDED,
            FrameType::Continuation => FrameFlags::END_HEADERS,
            _ => 0,
        }
    }

    /// Frames that must be sent on a stream (stream id != 0)
    pub fn requires_stream(&self) -> bool {
        matches!(
            self,
            FrameType::Data
                | FrameType::Headers
                | FrameType::Priority
                | FrameType::RstStream
                | FrameType::PushPromise
                | FrameType::Continuation
        )
    }

    /// Frames that must be sent on the connection (stream id == 0)
    pub fn requires_connection(&self) -> bool {
        matches!(
            self,
            FrameType::Settings | FrameType::Ping | FrameType::Goaway
        )
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:x})", self.name(), self.as_u8())
    }
}

/// HTTP/2 frame flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameFlags(u8);

impl FrameFlags {
    /// Create empty flags
    pub fn empty() -> Self {
        FrameFlags(0)
    }

    /// Create from u8
    pub fn from_u8(flags: u8) -> Self {
        FrameFlags(flags)
    }

    /// Get raw u8 value
    pub fn as_u8(&self) -> u8 {
        self.0
    }

    /// Set a flag
    pub fn set(&mut self, flag: u8) {
        self.0 |= flag;
    }

    /// Check if a flag is set
    pub fn is_set(&self, flag: u8) -> bool {
        (self.0 & flag) != 0
    }

    /// Keep only the flags defined for `frame_type`
    pub fn masked(&self, frame_type: FrameType) -> Self {
        FrameFlags(self.0 & frame_type.defined_flags())
    }

    // Common flags

    /// END_STREAM flag (0x1)
    pub const END_STREAM: u8 = 0x1;

    /// ACK flag (0x1) - used for SETTINGS and PING
    pub const ACK: u8 = 0x1;

    /// END_HEADERS flag (0x4)
    pub const END_HEADERS: u8 = 0x4;

    /// PADDED flag (0x8)
    pub const PADDED: u8 = 0x8;

    /// PRIORITY flag (0x20)
    pub const PRIORITY: u8 = 0x20;

    /// Check if END_STREAM is set
    pub fn is_end_stream(&self) -> bool {
        self.is_set(Self::END_STREAM)
    }

    /// Check if ACK is set
    pub fn is_ack(&self) -> bool {
        self.is_set(Self::ACK)
    }

    /// Check if END_HEADERS is set
    pub fn is_end_headers(&self) -> bool {
        self.is_set(Self::END_HEADERS)
    }

    /// Check if PADDED is set
    pub fn is_padded(&self) -> bool {
        self.is_set(Self::PADDED)
    }

    /// Check if PRIORITY is set
    pub fn is_priority(&self) -> bool {
        self.is_set(Self::PRIORITY)
    }
}

/// Framing-level failure, classified into a connection or stream error by
/// the connection that received the frame
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// Payload exceeds the negotiated SETTINGS_MAX_FRAME_SIZE
    #[error("{frame_type} frame of {len} bytes exceeds maximum frame size {max}")]
    TooLarge {
        frame_type: FrameType,
        stream_id: u32,
        len: usize,
        max: u32,
    },

    /// Payload length is wrong for a fixed-size or structured frame
    #[error("{frame_type} frame has invalid payload length {len}")]
    BadLength {
        frame_type: FrameType,
        stream_id: u32,
        len: usize,
    },

    /// Frame type requires a stream but was sent on stream 0
    #[error("{frame_type} frame received on stream 0")]
    ZeroStreamId { frame_type: FrameType },

    /// Frame type requires stream 0 but was sent on a stream
    #[error("{frame_type} frame received on stream {stream_id}, expected stream 0")]
    NonZeroStreamId { frame_type: FrameType, stream_id: u32 },

    /// Pad length not strictly less than the remaining payload
    #[error("{frame_type} frame padding length {pad_len} is not less than payload length {len}")]
    BadPadding {
        frame_type: FrameType,
        stream_id: u32,
        pad_len: usize,
        len: usize,
    },

    /// Declared length disagrees with the bytes supplied
    #[error("frame declares {declared} payload bytes but {actual} were supplied")]
    LengthMismatch { declared: usize, actual: usize },

    /// SETTINGS parameter with an out-of-range value
    #[error("{reason}")]
    Setting { code: ErrorCode, reason: String },

    /// Illegal combination rejected by [`FrameBuilder`]
    #[error("illegal frame: {0}")]
    Illegal(&'static str),
}

impl FrameError {
    /// Stream the offending frame was sent on, when known
    pub fn stream_id(&self) -> u32 {
        match self {
            FrameError::TooLarge { stream_id, .. }
            | FrameError::BadLength { stream_id, .. }
            | FrameError::NonZeroStreamId { stream_id, .. }
            | FrameError::BadPadding { stream_id, .. } => *stream_id,
            _ => 0,
        }
    }
}

/// Priority specification (RFC 7540 Section 6.3)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrioritySpec {
    /// Stream dependency
    pub stream_dependency: u32,
    /// Exclusive flag
    pub exclusive: bool,
    /// Effective weight (1-256); the wire carries `weight - 1`
    pub weight: u16,
}

impl PrioritySpec {
    /// Default weight assigned to streams without priority information
    pub const DEFAULT_WEIGHT: u16 = 16;

    /// Create a new priority specification
    pub fn new(stream_dependency: u32, exclusive: bool, weight: u16) -> Self {
        PrioritySpec {
            stream_dependency,
            exclusive,
            weight,
        }
    }

    /// Decode from the 5-byte wire form
    pub fn from_wire(dependency: u32, weight_byte: u8) -> Self {
        PrioritySpec {
            stream_dependency: dependency & MAX_STREAM_ID,
            exclusive: dependency & 0x8000_0000 != 0,
            weight: weight_byte as u16 + 1,
        }
    }

    /// Encode the dependency word (exclusive bit included)
    pub fn dependency_word(&self) -> u32 {
        let mut dep = self.stream_dependency & MAX_STREAM_ID;
        if self.exclusive {
            dep |= 0x8000_0000;
        }
        dep
    }

    /// Encode the weight byte
    pub fn weight_byte(&self) -> u8 {
        (self.weight.clamp(1, 256) - 1) as u8
    }
}

impl Default for PrioritySpec {
    fn default() -> Self {
        PrioritySpec::new(0, false, Self::DEFAULT_WEIGHT)
    }
}

/// DATA frame (RFC 7540 Section 6.1)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    /// Stream ID
    pub stream_id: u32,
    /// Data payload
    pub data: Bytes,
    /// END_STREAM flag
    pub end_stream: bool,
    /// Padding length (if PADDED flag is set)
    pub padding: Option<u8>,
}

impl DataFrame {
    /// Create a new DATA frame
    pub fn new(stream_id: u32, data: Bytes, end_stream: bool) -> Self {
        DataFrame {
            stream_id,
            data,
            end_stream,
            padding: None,
        }
    }

    /// Set padding
    pub fn with_padding(mut self, padding: u8) -> Self {
        self.padding = Some(padding);
        self
    }

    /// Get total frame size including padding
    ///
    /// This is the amount charged against flow-control windows.
    pub fn frame_size(&self) -> usize {
        let mut size = self.data.len();
        if let Some(pad_len) = self.padding {
            size += 1 + pad_len as usize; // 1 byte for pad length field + padding
        }
        size
    }
}

/// HEADERS frame (RFC 7540 Section 6.2)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadersFrame {
    /// Stream ID
    pub stream_id: u32,
    /// Header block fragment
    pub header_block: Bytes,
    /// END_STREAM flag
    pub end_stream: bool,
    /// END_HEADERS flag
    pub end_headers: bool,
    /// Priority information (if PRIORITY flag is set)
    pub priority: Option<PrioritySpec>,
    /// Padding length (if PADDED flag is set)
    pub padding: Option<u8>,
}

impl HeadersFrame {
    /// Create a new HEADERS frame
    pub fn new(stream_id: u32, header_block: Bytes, end_stream: bool, end_headers: bool) -> Self {
        HeadersFrame {
            stream_id,
            header_block,
            end_stream,
            end_headers,
            priority: None,
            padding: None,
        }
    }

    /// Set priority
    pub fn with_priority(mut self, priority: PrioritySpec) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Set padding
    pub fn with_padding(mut self, padding: u8) -> Self {
        self.padding = Some(padding);
        self
    }
}

/// PRIORITY frame (RFC 7540 Section 6.3)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityFrame {
    /// Stream ID
    pub stream_id: u32,
    /// Priority specification
    pub priority: PrioritySpec,
}

/// RST_STREAM frame (RFC 7540 Section 6.4)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RstStreamFrame {
    /// Stream ID
    pub stream_id: u32,
    /// Error code
    pub error_code: ErrorCode,
}

/// SETTINGS frame (RFC 7540 Section 6.5)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsFrame {
    /// ACK flag
    pub ack: bool,
    /// Settings parameters
    pub settings: Settings,
}

impl SettingsFrame {
    /// Create a new SETTINGS frame
    pub fn new(settings: Settings) -> Self {
        SettingsFrame {
            ack: false,
            settings,
        }
    }

    /// Create a SETTINGS ACK frame
    pub fn ack() -> Self {
        SettingsFrame {
            ack: true,
            settings: Settings::default(),
        }
    }
}

/// PUSH_PROMISE frame (RFC 7540 Section 6.6)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushPromiseFrame {
    /// Stream ID
    pub stream_id: u32,
    /// Promised stream ID
    pub promised_stream_id: u32,
    /// Header block fragment
    pub header_block: Bytes,
    /// END_HEADERS flag
    pub end_headers: bool,
    /// Padding length (if PADDED flag is set)
    pub padding: Option<u8>,
}

/// PING frame (RFC 7540 Section 6.7)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingFrame {
    /// ACK flag
    pub ack: bool,
    /// Opaque data (8 bytes)
    pub data: [u8; 8],
}

impl PingFrame {
    /// Create a new PING frame
    pub fn new(data: [u8; 8]) -> Self {
        PingFrame { ack: false, data }
    }

    /// Create a PING ACK frame
    pub fn ack(data: [u8; 8]) -> Self {
        PingFrame { ack: true, data }
    }
}

/// GOAWAY frame (RFC 7540 Section 6.8)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoawayFrame {
    /// Last stream ID
    pub last_stream_id: u32,
    /// Error code
    pub error_code: ErrorCode,
    /// Debug data (diagnostic only, never parsed)
    pub debug_data: Bytes,
}

impl GoawayFrame {
    /// Create a new GOAWAY frame
    pub fn new(last_stream_id: u32, error_code: ErrorCode, debug_data: Bytes) -> Self {
        GoawayFrame {
            last_stream_id,
            error_code,
            debug_data,
        }
    }
}

/// WINDOW_UPDATE frame (RFC 7540 Section 6.9)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowUpdateFrame {
    /// Stream ID (0 for connection-level)
    pub stream_id: u32,
    /// Window size increment
    pub size_increment: u32,
}

impl WindowUpdateFrame {
    /// Create a new WINDOW_UPDATE frame
    pub fn new(stream_id: u32, size_increment: u32) -> Self {
        WindowUpdateFrame {
            stream_id,
            size_increment,
        }
    }
}

/// CONTINUATION frame (RFC 7540 Section 6.10)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuationFrame {
    /// Stream ID
    pub stream_id: u32,
    /// Header block fragment
    pub header_block: Bytes,
    /// END_HEADERS flag
    pub end_headers: bool,
}

/// Frame of an unknown or extension type, carried opaquely
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownFrame {
    /// Raw frame type byte
    pub frame_type: u8,
    /// Raw flags
    pub flags: FrameFlags,
    /// Stream ID
    pub stream_id: u32,
    /// Opaque payload
    pub payload: Bytes,
}

/// A decoded HTTP/2 frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data(DataFrame),
    Headers(HeadersFrame),
    Priority(PriorityFrame),
    RstStream(RstStreamFrame),
    Settings(SettingsFrame),
    PushPromise(PushPromiseFrame),
    Ping(PingFrame),
    Goaway(GoawayFrame),
    WindowUpdate(WindowUpdateFrame),
    Continuation(ContinuationFrame),
    Unknown(UnknownFrame),
}

impl Frame {
    /// Frame type of this frame
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Data(_) => FrameType::Data,
            Frame::Headers(_) => FrameType::Headers,
            Frame::Priority(_) => FrameType::Priority,
            Frame::RstStream(_) => FrameType::RstStream,
            Frame::Settings(_) => FrameType::Settings,
            Frame::PushPromise(_) => FrameType::PushPromise,
            Frame::Ping(_) => FrameType::Ping,
            Frame::Goaway(_) => FrameType::Goaway,
            Frame::WindowUpdate(_) => FrameType::WindowUpdate,
            Frame::Continuation(_) => FrameType::Continuation,
            Frame::Unknown(f) => FrameType::Unknown(f.frame_type),
        }
    }

    /// Stream the frame belongs to (0 for connection-level frames)
    pub fn stream_id(&self) -> u32 {
        match self {
            Frame::Data(f) => f.stream_id,
            Frame::Headers(f) => f.stream_id,
            Frame::Priority(f) => f.stream_id,
            Frame::RstStream(f) => f.stream_id,
            Frame::PushPromise(f) => f.stream_id,
            Frame::WindowUpdate(f) => f.stream_id,
            Frame::Continuation(f) => f.stream_id,
            Frame::Unknown(f) => f.stream_id,
            Frame::Settings(_) | Frame::Ping(_) | Frame::Goaway(_) => 0,
        }
    }
}

impl From<DataFrame> for Frame {
    fn from(frame: DataFrame) -> Self {
        Frame::Data(frame)
    }
}

impl From<HeadersFrame> for Frame {
    fn from(frame: HeadersFrame) -> Self {
        Frame::Headers(frame)
    }
}

impl From<SettingsFrame> for Frame {
    fn from(frame: SettingsFrame) -> Self {
        Frame::Settings(frame)
    }
}

impl From<WindowUpdateFrame> for Frame {
    fn from(frame: WindowUpdateFrame) -> Self {
        Frame::WindowUpdate(frame)
    }
}

impl From<PingFrame> for Frame {
    fn from(frame: PingFrame) -> Self {
        Frame::Ping(frame)
    }
}

impl From<GoawayFrame> for Frame {
    fn from(frame: GoawayFrame) -> Self {
        Frame::Goaway(frame)
    }
}

/// Unvalidated frame, written to the wire exactly as given
///
/// Used to inject malformed frames (wrong lengths, reserved bits, illegal
/// stream ids, undefined flags) when exercising a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// Frame type byte
    pub frame_type: u8,
    /// Flags, not masked
    pub flags: u8,
    /// Full 32-bit stream id word, reserved bit included
    pub stream_id: u32,
    /// Payload
    pub payload: Bytes,
}

impl RawFrame {
    /// Create a raw frame
    pub fn new(frame_type: u8, flags: u8, stream_id: u32, payload: impl Into<Bytes>) -> Self {
        RawFrame {
            frame_type,
            flags,
            stream_id,
            payload: payload.into(),
        }
    }
}

/// Builder enforcing flag and field legality for each frame type
///
/// ```
/// use h2engine::http::h2::frames::{Frame, FrameBuilder};
/// use bytes::Bytes;
///
/// let frame = FrameBuilder::data(1)
///     .payload(Bytes::from_static(b"hello"))
///     .end_stream()
///     .padding(4)
///     .build()
///     .unwrap();
/// assert!(matches!(frame, Frame::Data(_)));
///
/// // END_STREAM is not defined for SETTINGS
/// assert!(FrameBuilder::settings().end_stream().build().is_err());
/// ```
#[derive(Debug, Clone)]
pub struct FrameBuilder {
    frame_type: FrameType,
    stream_id: u32,
    payload: Bytes,
    end_stream: bool,
    end_headers: bool,
    ack: bool,
    padding: Option<u8>,
    priority: Option<PrioritySpec>,
    promised_stream_id: u32,
    error_code: ErrorCode,
    settings: Settings,
    ping_data: [u8; 8],
    last_stream_id: u32,
    increment: u32,
}

impl FrameBuilder {
    fn new(frame_type: FrameType, stream_id: u32) -> Self {
        FrameBuilder {
            frame_type,
            stream_id,
            payload: Bytes::new(),
            end_stream: false,
            end_headers: false,
            ack: false,
            padding: None,
            priority: None,
            promised_stream_id: 0,
            error_code: ErrorCode::NoError,
            settings: Settings::new(),
            ping_data: [0; 8],
            last_stream_id: 0,
            increment: 0,
        }
    }

    /// Start a DATA frame
    pub fn data(stream_id: u32) -> Self {
        Self::new(FrameType::Data, stream_id)
    }

    /// Start a HEADERS frame (END_HEADERS set by default)
    pub fn headers(stream_id: u32) -> Self {
        let mut builder = Self::new(FrameType::Headers, stream_id);
        builder.end_headers = true;
        builder
    }

    /// Start a PRIORITY frame
    pub fn priority_frame(stream_id: u32, priority: PrioritySpec) -> Self {
        let mut builder = Self::new(FrameType::Priority, stream_id);
        builder.priority = Some(priority);
        builder
    }

    /// Start a RST_STREAM frame
    pub fn rst_stream(stream_id: u32, error_code: ErrorCode) -> Self {
        let mut builder = Self::new(FrameType::RstStream, stream_id);
        builder.error_code = error_code;
        builder
    }

    /// Start a SETTINGS frame
    pub fn settings() -> Self {
        Self::new(FrameType::Settings, 0)
    }

    /// Start a PUSH_PROMISE frame (END_HEADERS set by default)
    pub fn push_promise(stream_id: u32, promised_stream_id: u32) -> Self {
        let mut builder = Self::new(FrameType::PushPromise, stream_id);
        builder.promised_stream_id = promised_stream_id;
        builder.end_headers = true;
        builder
    }

    /// Start a PING frame
    pub fn ping(data: [u8; 8]) -> Self {
        let mut builder = Self::new(FrameType::Ping, 0);
        builder.ping_data = data;
        builder
    }

    /// Start a GOAWAY frame
    pub fn goaway(last_stream_id: u32, error_code: ErrorCode) -> Self {
        let mut builder = Self::new(FrameType::Goaway, 0);
        builder.last_stream_id = last_stream_id;
        builder.error_code = error_code;
        builder
    }

    /// Start a WINDOW_UPDATE frame
    pub fn window_update(stream_id: u32, increment: u32) -> Self {
        let mut builder = Self::new(FrameType::WindowUpdate, stream_id);
        builder.increment = increment;
        builder
    }

    /// Start a CONTINUATION frame (END_HEADERS set by default)
    pub fn continuation(stream_id: u32) -> Self {
        let mut builder = Self::new(FrameType::Continuation, stream_id);
        builder.end_headers = true;
        builder
    }

    /// Payload: DATA bytes, header block fragment, or GOAWAY debug data
    pub fn payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Set END_STREAM
    pub fn end_stream(mut self) -> Self {
        self.end_stream = true;
        self
    }

    /// Set or clear END_HEADERS
    pub fn end_headers(mut self, end_headers: bool) -> Self {
        self.end_headers = end_headers;
        self
    }

    /// Set ACK
    pub fn ack(mut self) -> Self {
        self.ack = true;
        self
    }

    /// Set PADDED with `len` bytes of padding
    pub fn padding(mut self, len: u8) -> Self {
        self.padding = Some(len);
        self
    }

    /// Attach a priority block (HEADERS only)
    pub fn priority(mut self, priority: PrioritySpec) -> Self {
        self.priority = Some(priority);
        self
    }

    /// SETTINGS parameters
    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Validate and produce the frame
    pub fn build(self) -> std::result::Result<Frame, FrameError> {
        let frame_type = self.frame_type;

        if self.stream_id > MAX_STREAM_ID {
            return Err(FrameError::Illegal("stream id exceeds 31 bits"));
        }
        if frame_type.requires_stream() && self.stream_id == 0 {
            return Err(FrameError::ZeroStreamId { frame_type });
        }
        if frame_type.requires_connection() && self.stream_id != 0 {
            return Err(FrameError::NonZeroStreamId {
                frame_type,
                stream_id: self.stream_id,
            });
        }
        if self.end_stream && !matches!(frame_type, FrameType::Data | FrameType::Headers) {
            return Err(FrameError::Illegal("END_STREAM only applies to DATA and HEADERS"));
        }
        if self.padding.is_some()
            && !matches!(
                frame_type,
                FrameType::Data | FrameType::Headers | FrameType::PushPromise
            )
        {
            return Err(FrameError::Illegal(
                "padding only applies to DATA, HEADERS and PUSH_PROMISE",
            ));
        }
        if self.ack && !matches!(frame_type, FrameType::Settings | FrameType::Ping) {
            return Err(FrameError::Illegal("ACK only applies to SETTINGS and PING"));
        }
        if let Some(priority) = &self.priority {
            if !matches!(frame_type, FrameType::Headers | FrameType::Priority) {
                return Err(FrameError::Illegal("priority only applies to HEADERS and PRIORITY"));
            }
            if priority.weight == 0 || priority.weight > 256 {
                return Err(FrameError::Illegal("priority weight must be in 1..=256"));
            }
            if priority.stream_dependency == self.stream_id {
                return Err(FrameError::Illegal("stream cannot depend on itself"));
            }
        }

        let frame = match frame_type {
            FrameType::Data => Frame::Data(DataFrame {
                stream_id: self.stream_id,
                data: self.payload,
                end_stream: self.end_stream,
                padding: self.padding,
            }),
            FrameType::Headers => Frame::Headers(HeadersFrame {
                stream_id: self.stream_id,
                header_block: self.payload,
                end_stream: self.end_stream,
                end_headers: self.end_headers,
                priority: self.priority,
                padding: self.padding,
            }),
            FrameType::Priority => Frame::Priority(PriorityFrame {
                stream_id: self.stream_id,
                priority: self.priority.unwrap_or_default(),
            }),
            FrameType::RstStream => Frame::RstStream(RstStreamFrame {
                stream_id: self.stream_id,
                error_code: self.error_code,
            }),
            FrameType::Settings => {
                if self.ack && !self.settings.is_empty() {
                    return Err(FrameError::Illegal("SETTINGS ACK must not carry parameters"));
                }
                Frame::Settings(SettingsFrame {
                    ack: self.ack,
                    settings: self.settings,
                })
            }
            FrameType::PushPromise => {
                if self.promised_stream_id == 0
                    || self.promised_stream_id > MAX_STREAM_ID
                    || self.promised_stream_id % 2 != 0
                {
                    return Err(FrameError::Illegal("promised stream id must be a non-zero even id"));
                }
                Frame::PushPromise(PushPromiseFrame {
                    stream_id: self.stream_id,
                    promised_stream_id: self.promised_stream_id,
                    header_block: self.payload,
                    end_headers: self.end_headers,
                    padding: self.padding,
                })
            }
            FrameType::Ping => Frame::Ping(PingFrame {
                ack: self.ack,
                data: self.ping_data,
            }),
            FrameType::Goaway => Frame::Goaway(GoawayFrame {
                last_stream_id: self.last_stream_id & MAX_STREAM_ID,
                error_code: self.error_code,
                debug_data: self.payload,
            }),
            FrameType::WindowUpdate => {
                if self.increment == 0 || self.increment > MAX_STREAM_ID {
                    return Err(FrameError::Illegal("window increment must be in 1..=2^31-1"));
                }
                Frame::WindowUpdate(WindowUpdateFrame {
                    stream_id: self.stream_id,
                    size_increment: self.increment,
                })
            }
            FrameType::Continuation => Frame::Continuation(ContinuationFrame {
                stream_id: self.stream_id,
                header_block: self.payload,
                end_headers: self.end_headers,
            }),
            FrameType::Unknown(byte) => Frame::Unknown(UnknownFrame {
                frame_type: byte,
                flags: FrameFlags::empty(),
                stream_id: self.stream_id,
                payload: self.payload,
            }),
        };

        Ok(frame)
    }
}
