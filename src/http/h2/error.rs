//! HTTP/2 error types
//!
//! This module defines error types for HTTP/2 operations, mapping to
//! the error codes defined in RFC 7540 Section 7.
//!
//! Every protocol violation is reported in exactly one of two scopes:
//!
//! - [`Error::Connection`]: the connection is torn down with a GOAWAY frame
//!   carrying the error code.
//! - [`Error::Stream`]: only the offending stream is reset with RST_STREAM and
//!   the connection keeps processing other streams.

use std::fmt;

/// HTTP/2 errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error from the underlying transport session
    #[error("HTTP error: {0}")]
    Http(#[from] crate::http::Error),

    /// Connection-scoped protocol error (GOAWAY + close)
    #[error("Connection error {code}: {reason}")]
    Connection {
        /// Error code carried by the GOAWAY frame
        code: ErrorCode,
        /// Diagnostic text, sent as GOAWAY debug data
        reason: String,
    },

    /// Stream-scoped protocol error (RST_STREAM)
    #[error("Stream {stream_id} error {code}: {reason}")]
    Stream {
        /// Stream being reset
        stream_id: u32,
        /// Error code carried by the RST_STREAM frame
        code: ErrorCode,
        /// Diagnostic text (local only)
        reason: String,
    },

    /// The client connection preface was absent or corrupt
    #[error("Missing connection preface")]
    MissingPreface,

    /// Connection closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// Timeout waiting for operation
    #[error("Timeout")]
    Timeout,

    /// Stream not found
    #[error("Stream not found: {0}")]
    StreamNotFound(u32),

    /// Local operation not allowed on the stream in its current state
    #[error("Stream {0} cannot send in its current state")]
    Blocked(u32),

    /// Invalid settings value supplied by local configuration
    #[error("Invalid settings value: {0}")]
    InvalidSettings(String),

    /// Invalid header supplied by the application
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// Local call not valid for this role or connection state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl Error {
    /// Build a connection error with an explicit code
    pub fn connection(code: ErrorCode, reason: impl Into<String>) -> Self {
        Error::Connection {
            code,
            reason: reason.into(),
        }
    }

    /// Build a connection error of type PROTOCOL_ERROR
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::connection(ErrorCode::ProtocolError, reason)
    }

    /// Build a stream error
    pub fn stream(stream_id: u32, code: ErrorCode, reason: impl Into<String>) -> Self {
        Error::Stream {
            stream_id,
            code,
            reason: reason.into(),
        }
    }

    /// Wire error code, if this is a protocol error
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Error::Connection { code, .. } | Error::Stream { code, .. } => Some(*code),
            Error::MissingPreface => Some(ErrorCode::ProtocolError),
            Error::Timeout => Some(ErrorCode::SettingsTimeout),
            _ => None,
        }
    }

    /// Check if the error tears down the whole connection
    pub fn is_connection_error(&self) -> bool {
        !matches!(self, Error::Stream { .. })
    }

    /// Check if the error only affects one stream
    pub fn is_stream_error(&self) -> bool {
        matches!(self, Error::Stream { .. })
    }
}

/// HTTP/2 error codes as defined in RFC 7540 Section 7
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Graceful shutdown
    NoError,
    /// Protocol error detected
    ProtocolError,
    /// Implementation fault
    InternalError,
    /// Flow-control limits exceeded
    FlowControlError,
    /// Settings not acknowledged
    SettingsTimeout,
    /// Frame received for closed stream
    StreamClosed,
    /// Frame size incorrect
    FrameSizeError,
    /// Stream not processed
    RefusedStream,
    /// Stream cancelled
    Cancel,
    /// Compression state not updated
    CompressionError,
    /// TCP connection error for CONNECT method
    ConnectError,
    /// Processing capacity exceeded
    EnhanceYourCalm,
    /// Negotiated TLS parameters not acceptable
    InadequateSecurity,
    /// Use HTTP/1.1 for the request
    Http11Required,
    /// Code not defined by RFC 7540; carried through unchanged
    Unknown(u32),
}

impl ErrorCode {
    /// Convert error code to u32
    pub fn as_u32(self) -> u32 {
        match self {
            ErrorCode::NoError => 0x0,
            ErrorCode::ProtocolError => 0x1,
            ErrorCode::InternalError => 0x2,
            ErrorCode::FlowControlError => 0x3,
            ErrorCode::SettingsTimeout => 0x4,
            ErrorCode::StreamClosed => 0x5,
            ErrorCode::FrameSizeError => 0x6,
            ErrorCode::RefusedStream => 0x7,
            ErrorCode::Cancel => 0x8,
            ErrorCode::CompressionError => 0x9,
            ErrorCode::ConnectError => 0xa,
            ErrorCode::EnhanceYourCalm => 0xb,
            ErrorCode::InadequateSecurity => 0xc,
            ErrorCode::Http11Required => 0xd,
            ErrorCode::Unknown(code) => code,
        }
    }

    /// Create error code from u32; unknown values are preserved
    pub fn from_u32(code: u32) -> Self {
        match code {
            0x0 => ErrorCode::NoError,
            0x1 => ErrorCode::ProtocolError,
            0x2 => ErrorCode::InternalError,
            0x3 => ErrorCode::FlowControlError,
            0x4 => ErrorCode::SettingsTimeout,
            0x5 => ErrorCode::StreamClosed,
            0x6 => ErrorCode::FrameSizeError,
            0x7 => ErrorCode::RefusedStream,
            0x8 => ErrorCode::Cancel,
            0x9 => ErrorCode::CompressionError,
            0xa => ErrorCode::ConnectError,
            0xb => ErrorCode::EnhanceYourCalm,
            0xc => ErrorCode::InadequateSecurity,
            0xd => ErrorCode::Http11Required,
            other => ErrorCode::Unknown(other),
        }
    }

    /// Get error name
    pub fn name(&self) -> &'static str {
        match self {
            ErrorCode::NoError => "NO_ERROR",
            ErrorCode::ProtocolError => "PROTOCOL_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::FlowControlError => "FLOW_CONTROL_ERROR",
            ErrorCode::SettingsTimeout => "SETTINGS_TIMEOUT",
            ErrorCode::StreamClosed => "STREAM_CLOSED",
            ErrorCode::FrameSizeError => "FRAME_SIZE_ERROR",
            ErrorCode::RefusedStream => "REFUSED_STREAM",
            ErrorCode::Cancel => "CANCEL",
            ErrorCode::CompressionError => "COMPRESSION_ERROR",
            ErrorCode::ConnectError => "CONNECT_ERROR",
            ErrorCode::EnhanceYourCalm => "ENHANCE_YOUR_CALM",
            ErrorCode::InadequateSecurity => "INADEQUATE_SECURITY",
            ErrorCode::Http11Required => "HTTP_1_1_REQUIRED",
            ErrorCode::Unknown(_) => "UNKNOWN",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:x})", self.name(), self.as_u32())
    }
}

/// Result type for HTTP/2 operations
pub type Result<T> = std::result::Result<T, Error>;
