//! Conformance profiles
//!
//! Several malformed inputs are answered differently by widely deployed
//! HTTP/2 implementations, and both answers are acceptable to peers. Each
//! such case is a method on [`ConformanceProfile`], which every connection
//! carries in its configuration. Every other failure is classified the same
//! way under both profiles.

use super::error::{Error, ErrorCode};
use super::frames::{FrameError, FrameType};
use super::headers::HeaderError;
use super::hpack::HpackError;

/// Error signalling profile of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConformanceProfile {
    /// Escalate ambiguous violations to connection errors
    #[default]
    Strict,
    /// Confine ambiguous violations to the stream they occurred on
    Lenient,
}

impl ConformanceProfile {
    /// DATA, WINDOW_UPDATE, RST_STREAM or CONTINUATION on an idle stream
    pub fn idle_stream_error(self, stream_id: u32, frame_type: FrameType) -> Error {
        match self {
            ConformanceProfile::Strict => Error::protocol(format!(
                "{} frame received on idle stream {}",
                frame_type, stream_id
            )),
            ConformanceProfile::Lenient => Error::stream(
                stream_id,
                ErrorCode::StreamClosed,
                format!("{} frame received on idle stream", frame_type),
            ),
        }
    }

    /// DATA or HEADERS on a closed stream inside the grace window
    ///
    /// `None` means the frame is absorbed without any signal.
    pub fn closed_stream_frame(self, stream_id: u32, frame_type: FrameType) -> Option<Error> {
        match self {
            ConformanceProfile::Strict => Some(Error::stream(
                stream_id,
                ErrorCode::StreamClosed,
                format!("{} frame received on closed stream", frame_type),
            )),
            ConformanceProfile::Lenient => None,
        }
    }

    /// Header list larger than our SETTINGS_MAX_HEADER_LIST_SIZE
    pub fn header_list_too_large(self, stream_id: u32, size: usize, max: usize) -> Error {
        let reason = format!("header list size {} exceeds limit {}", size, max);
        match self {
            ConformanceProfile::Strict => Error::protocol(reason),
            ConformanceProfile::Lenient => {
                Error::stream(stream_id, ErrorCode::ProtocolError, reason)
            }
        }
    }

    /// Classify a framing failure
    pub fn classify_frame_error(self, err: &FrameError) -> Error {
        let reason = err.to_string();
        match err {
            FrameError::BadLength {
                frame_type: FrameType::Priority,
                stream_id,
                ..
            } => Error::stream(*stream_id, ErrorCode::FrameSizeError, reason),
            FrameError::TooLarge { .. }
            | FrameError::BadLength { .. }
            | FrameError::LengthMismatch { .. } => {
                Error::connection(ErrorCode::FrameSizeError, reason)
            }
            FrameError::ZeroStreamId { .. } | FrameError::NonZeroStreamId { .. } => {
                Error::protocol(reason)
            }
            FrameError::BadPadding {
                frame_type,
                stream_id,
                ..
            } => match (self, frame_type) {
                // a dropped header block would desynchronize HPACK
                (ConformanceProfile::Lenient, FrameType::Data) => {
                    Error::stream(*stream_id, ErrorCode::StreamClosed, reason)
                }
                _ => Error::protocol(reason),
            },
            FrameError::Setting { code, .. } => Error::connection(*code, reason),
            FrameError::Illegal(_) => Error::connection(ErrorCode::InternalError, reason),
        }
    }

    /// Classify an HPACK decoding failure on `stream_id`
    pub fn classify_hpack_error(self, stream_id: u32, err: &HpackError) -> Error {
        match err {
            HpackError::HeaderListTooLarge { size, max } => {
                self.header_list_too_large(stream_id, *size, *max)
            }
            other => Error::connection(ErrorCode::CompressionError, other.to_string()),
        }
    }

    /// Classify a header validation failure on `stream_id`
    pub fn classify_header_error(self, stream_id: u32, err: &HeaderError) -> Error {
        match (self, err) {
            (ConformanceProfile::Strict, HeaderError::PseudoHeaderOrder(reason)) => {
                Error::connection(ErrorCode::CompressionError, reason.clone())
            }
            (_, HeaderError::PseudoHeaderOrder(reason)) | (_, HeaderError::Malformed(reason)) => {
                Error::stream(stream_id, ErrorCode::ProtocolError, reason.clone())
            }
        }
    }
}
