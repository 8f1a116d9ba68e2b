//! HTTP/2 frame encoding and decoding
//!
//! This module provides low-level frame encoding/decoding. Typed frames are
//! encoded with only the flag bits defined for their type; [`RawFrame`] is
//! written verbatim so intentionally malformed frames can be put on the wire.
//!
//! Decoding is buffered: bytes are appended with [`FrameCodec::extend`] and
//! complete frames are pulled with [`FrameCodec::decode`]. Every structural
//! check that can be made without connection state happens here and is
//! reported as a [`FrameError`].

pub use super::frames::FrameError;

use super::error::ErrorCode;
use super::frames::*;
use super::settings::Settings;
use super::{DEFAULT_MAX_FRAME_SIZE, MAX_STREAM_ID};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::trace;

/// HTTP/2 frame header size (9 bytes)
pub const FRAME_HEADER_SIZE: usize = 9;

/// Maximum frame payload size (16MB - 1)
pub const MAX_FRAME_SIZE: usize = 0x00FFFFFF;

/// Frame codec for encoding/decoding HTTP/2 frames
#[derive(Debug)]
pub struct FrameCodec {
    /// Buffer for reading
    read_buffer: BytesMut,
    /// Largest payload accepted on decode (acknowledged SETTINGS_MAX_FRAME_SIZE)
    max_frame_size: u32,
}

impl FrameCodec {
    /// Create a new frame codec
    pub fn new() -> Self {
        FrameCodec {
            read_buffer: BytesMut::with_capacity(4096),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Get the maximum payload size accepted on decode
    pub fn max_frame_size(&self) -> u32 {
        self.max_frame_size
    }

    /// Set the maximum payload size accepted on decode
    pub fn set_max_frame_size(&mut self, size: u32) {
        self.max_frame_size = size.min(MAX_FRAME_SIZE as u32);
    }

    /// Append received bytes to the read buffer
    pub fn extend(&mut self, data: &[u8]) {
        self.read_buffer.extend_from_slice(data);
    }

    /// Number of buffered bytes not yet decoded
    pub fn buffered(&self) -> usize {
        self.read_buffer.len()
    }

    /// Borrow the buffered bytes
    pub fn buffer(&self) -> &[u8] {
        &self.read_buffer
    }

    /// Discard `count` buffered bytes (used to strip the connection preface)
    pub fn consume(&mut self, count: usize) {
        let count = count.min(self.read_buffer.len());
        self.read_buffer.advance(count);
    }

    /// Encode a frame header into a buffer
    pub fn encode_header(frame_type: FrameType, flags: FrameFlags, stream_id: u32, length: usize) -> [u8; FRAME_HEADER_SIZE] {
        let mut header = [0u8; FRAME_HEADER_SIZE];

        // Length (24 bits, big-endian)
        header[0] = ((length >> 16) & 0xFF) as u8;
        header[1] = ((length >> 8) & 0xFF) as u8;
        header[2] = (length & 0xFF) as u8;

        // Type (8 bits)
        header[3] = frame_type.as_u8();

        // Flags (8 bits)
        header[4] = flags.as_u8();

        // Stream ID (31 bits, big-endian, reserved bit is 0)
        let stream_id = stream_id & MAX_STREAM_ID;
        header[5..9].copy_from_slice(&stream_id.to_be_bytes());

        header
    }

    /// Decode a frame header from bytes
    ///
    /// The reserved bit of the stream id is ignored.
    pub fn decode_header(bytes: &[u8; FRAME_HEADER_SIZE]) -> (FrameType, FrameFlags, u32, usize) {
        // Length (24 bits, big-endian)
        let length = ((bytes[0] as usize) << 16)
            | ((bytes[1] as usize) << 8)
            | (bytes[2] as usize);

        let frame_type = FrameType::from_u8(bytes[3]);
        let flags = FrameFlags::from_u8(bytes[4]);

        let stream_id = u32::from_be_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]) & MAX_STREAM_ID;

        (frame_type, flags, stream_id, length)
    }

    /// Encode any frame
    pub fn encode(frame: &Frame) -> Bytes {
        match frame {
            Frame::Data(f) => Self::encode_data_frame(f),
            Frame::Headers(f) => Self::encode_headers_frame(f),
            Frame::Priority(f) => Self::encode_priority_frame(f),
            Frame::RstStream(f) => Self::encode_rst_stream_frame(f),
            Frame::Settings(f) => Self::encode_settings_frame(f),
            Frame::PushPromise(f) => Self::encode_push_promise_frame(f),
            Frame::Ping(f) => Self::encode_ping_frame(f),
            Frame::Goaway(f) => Self::encode_goaway_frame(f),
            Frame::WindowUpdate(f) => Self::encode_window_update_frame(f),
            Frame::Continuation(f) => Self::encode_continuation_frame(f),
            Frame::Unknown(f) => Self::encode_raw(&RawFrame::new(
                f.frame_type,
                f.flags.as_u8(),
                f.stream_id,
                f.payload.clone(),
            )),
        }
    }

    /// Encode a raw frame exactly as given (no masking, no validation)
    pub fn encode_raw(frame: &RawFrame) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + frame.payload.len());
        let length = frame.payload.len();
        buf.put_u8(((length >> 16) & 0xFF) as u8);
        buf.put_u8(((length >> 8) & 0xFF) as u8);
        buf.put_u8((length & 0xFF) as u8);
        buf.put_u8(frame.frame_type);
        buf.put_u8(frame.flags);
        buf.put_u32(frame.stream_id);
        buf.put_slice(&frame.payload);
        buf.freeze()
    }

    /// Encode a DATA frame
    pub fn encode_data_frame(frame: &DataFrame) -> Bytes {
        let mut buf = BytesMut::new();

        // Calculate payload size
        let mut payload_len = frame.data.len();
        let mut flags = FrameFlags::empty();

        if frame.end_stream {
            flags.set(FrameFlags::END_STREAM);
        }

        // Add padding if requested
        let padding_len = if let Some(pad_len) = frame.padding {
            flags.set(FrameFlags::PADDED);
            payload_len += 1 + pad_len as usize; // 1 byte for length + padding
            pad_len
        } else {
            0
        };

        let header = Self::encode_header(FrameType::Data, flags, frame.stream_id, payload_len);
        buf.put_slice(&header);

        if frame.padding.is_some() {
            buf.put_u8(padding_len);
        }

        buf.put_slice(&frame.data);

        if padding_len > 0 {
            buf.put_bytes(0, padding_len as usize);
        }

        buf.freeze()
    }

    /// Encode a HEADERS frame
    pub fn encode_headers_frame(frame: &HeadersFrame) -> Bytes {
        let mut buf = BytesMut::new();

        let mut payload_len = frame.header_block.len();
        let mut flags = FrameFlags::empty();

        if frame.end_stream {
            flags.set(FrameFlags::END_STREAM);
        }
        if frame.end_headers {
            flags.set(FrameFlags::END_HEADERS);
        }

        if frame.priority.is_some() {
            flags.set(FrameFlags::PRIORITY);
            payload_len += 5; // Priority is 5 bytes
        }

        let padding_len = if let Some(pad_len) = frame.padding {
            flags.set(FrameFlags::PADDED);
            payload_len += 1 + pad_len as usize;
            pad_len
        } else {
            0
        };

        let header = Self::encode_header(FrameType::Headers, flags, frame.stream_id, payload_len);
        buf.put_slice(&header);

        if frame.padding.is_some() {
            buf.put_u8(padding_len);
        }

        if let Some(priority) = &frame.priority {
            buf.put_u32(priority.dependency_word());
            buf.put_u8(priority.weight_byte());
        }

        buf.put_slice(&frame.header_block);

        if padding_len > 0 {
            buf.put_bytes(0, padding_len as usize);
        }

        buf.freeze()
    }

    /// Encode a SETTINGS frame
    pub fn encode_settings_frame(frame: &SettingsFrame) -> Bytes {
        let mut buf = BytesMut::new();

        let flags = if frame.ack {
            FrameFlags::from_u8(FrameFlags::ACK)
        } else {
            FrameFlags::empty()
        };

        // Each setting is 6 bytes (2 byte ID + 4 byte value)
        let mut settings_data = BytesMut::new();

        if !frame.ack {
            for (id, value) in frame.settings.entries() {
                settings_data.put_u16(id);
                settings_data.put_u32(value);
            }
        }

        // Stream ID must be 0 for SETTINGS
        let header = Self::encode_header(FrameType::Settings, flags, 0, settings_data.len());
        buf.put_slice(&header);
        buf.put_slice(&settings_data);

        buf.freeze()
    }

    /// Encode a PUSH_PROMISE frame
    pub fn encode_push_promise_frame(frame: &PushPromiseFrame) -> Bytes {
        let mut buf = BytesMut::new();

        let mut payload_len = 4 + frame.header_block.len();
        let mut flags = FrameFlags::empty();
        if frame.end_headers {
            flags.set(FrameFlags::END_HEADERS);
        }

        let padding_len = if let Some(pad_len) = frame.padding {
            flags.set(FrameFlags::PADDED);
            payload_len += 1 + pad_len as usize;
            pad_len
        } else {
            0
        };

        let header = Self::encode_header(FrameType::PushPromise, flags, frame.stream_id, payload_len);
        buf.put_slice(&header);

        if frame.padding.is_some() {
            buf.put_u8(padding_len);
        }
        buf.put_u32(frame.promised_stream_id & MAX_STREAM_ID);
        buf.put_slice(&frame.header_block);
        if padding_len > 0 {
            buf.put_bytes(0, padding_len as usize);
        }

        buf.freeze()
    }

    /// Encode a PING frame
    pub fn encode_ping_frame(frame: &PingFrame) -> Bytes {
        let mut buf = BytesMut::new();

        let flags = if frame.ack {
            FrameFlags::from_u8(FrameFlags::ACK)
        } else {
            FrameFlags::empty()
        };

        // Stream ID must be 0 for PING, payload is always 8 bytes
        let header = Self::encode_header(FrameType::Ping, flags, 0, 8);
        buf.put_slice(&header);
        buf.put_slice(&frame.data);

        buf.freeze()
    }

    /// Encode a GOAWAY frame
    pub fn encode_goaway_frame(frame: &GoawayFrame) -> Bytes {
        let mut buf = BytesMut::new();

        let payload_len = 8 + frame.debug_data.len(); // 4 bytes stream ID + 4 bytes error code + debug data

        let header = Self::encode_header(FrameType::Goaway, FrameFlags::empty(), 0, payload_len);
        buf.put_slice(&header);

        buf.put_u32(frame.last_stream_id & MAX_STREAM_ID);
        buf.put_u32(frame.error_code.as_u32());
        buf.put_slice(&frame.debug_data);

        buf.freeze()
    }

    /// Encode a WINDOW_UPDATE frame
    pub fn encode_window_update_frame(frame: &WindowUpdateFrame) -> Bytes {
        let mut buf = BytesMut::new();

        // Payload is always 4 bytes
        let header = Self::encode_header(FrameType::WindowUpdate, FrameFlags::empty(), frame.stream_id, 4);
        buf.put_slice(&header);

        // Window size increment (reserved bit must be 0)
        buf.put_u32(frame.size_increment & MAX_STREAM_ID);

        buf.freeze()
    }

    /// Encode a RST_STREAM frame
    pub fn encode_rst_stream_frame(frame: &RstStreamFrame) -> Bytes {
        let mut buf = BytesMut::new();

        // Payload is always 4 bytes
        let header = Self::encode_header(FrameType::RstStream, FrameFlags::empty(), frame.stream_id, 4);
        buf.put_slice(&header);
        buf.put_u32(frame.error_code.as_u32());

        buf.freeze()
    }

    /// Encode a PRIORITY frame
    pub fn encode_priority_frame(frame: &PriorityFrame) -> Bytes {
        let mut buf = BytesMut::new();

        // Payload is always 5 bytes
        let header = Self::encode_header(FrameType::Priority, FrameFlags::empty(), frame.stream_id, 5);
        buf.put_slice(&header);
        buf.put_u32(frame.priority.dependency_word());
        buf.put_u8(frame.priority.weight_byte());

        buf.freeze()
    }

    /// Encode a CONTINUATION frame
    pub fn encode_continuation_frame(frame: &ContinuationFrame) -> Bytes {
        let mut buf = BytesMut::new();

        let flags = if frame.end_headers {
            FrameFlags::from_u8(FrameFlags::END_HEADERS)
        } else {
            FrameFlags::empty()
        };

        let header = Self::encode_header(
            FrameType::Continuation,
            flags,
            frame.stream_id,
            frame.header_block.len(),
        );
        buf.put_slice(&header);
        buf.put_slice(&frame.header_block);

        buf.freeze()
    }

    /// Decode the next complete frame from the read buffer
    ///
    /// Returns `Ok(None)` when more bytes are needed. An oversized frame is
    /// reported as soon as its header is seen.
    pub fn decode(&mut self) -> std::result::Result<Option<Frame>, FrameError> {
        if self.read_buffer.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let mut header = [0u8; FRAME_HEADER_SIZE];
        header.copy_from_slice(&self.read_buffer[..FRAME_HEADER_SIZE]);
        let (frame_type, flags, stream_id, length) = Self::decode_header(&header);

        if length > self.max_frame_size as usize {
            return Err(FrameError::TooLarge {
                frame_type,
                stream_id,
                len: length,
                max: self.max_frame_size,
            });
        }

        if self.read_buffer.len() < FRAME_HEADER_SIZE + length {
            return Ok(None);
        }

        self.read_buffer.advance(FRAME_HEADER_SIZE);
        let payload = self.read_buffer.split_to(length).freeze();
        trace!(frame = %frame_type, stream_id, length, "decoding frame");

        Self::decode_frame(frame_type, flags, stream_id, payload).map(Some)
    }

    /// Decode exactly one frame from a byte slice
    ///
    /// The slice must hold one whole frame and nothing else.
    pub fn decode_slice(bytes: &[u8], max_frame_size: u32) -> std::result::Result<Frame, FrameError> {
        if bytes.len() < FRAME_HEADER_SIZE {
            return Err(FrameError::LengthMismatch {
                declared: FRAME_HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        let mut header = [0u8; FRAME_HEADER_SIZE];
        header.copy_from_slice(&bytes[..FRAME_HEADER_SIZE]);
        let (frame_type, flags, stream_id, length) = Self::decode_header(&header);

        if length > max_frame_size as usize {
            return Err(FrameError::TooLarge {
                frame_type,
                stream_id,
                len: length,
                max: max_frame_size,
            });
        }
        if bytes.len() - FRAME_HEADER_SIZE != length {
            return Err(FrameError::LengthMismatch {
                declared: length,
                actual: bytes.len() - FRAME_HEADER_SIZE,
            });
        }

        let payload = Bytes::copy_from_slice(&bytes[FRAME_HEADER_SIZE..]);
        Self::decode_frame(frame_type, flags, stream_id, payload)
    }

    /// Decode a frame payload whose header has already been parsed
    pub fn decode_frame(
        frame_type: FrameType,
        flags: FrameFlags,
        stream_id: u32,
        mut payload: Bytes,
    ) -> std::result::Result<Frame, FrameError> {
        if frame_type.requires_stream() && stream_id == 0 {
            return Err(FrameError::ZeroStreamId { frame_type });
        }
        if frame_type.requires_connection() && stream_id != 0 {
            return Err(FrameError::NonZeroStreamId {
                frame_type,
                stream_id,
            });
        }

        let flags = match frame_type {
            FrameType::Unknown(_) => flags,
            known => flags.masked(known),
        };
        let len = payload.len();
        let bad_length = || FrameError::BadLength {
            frame_type,
            stream_id,
            len,
        };

        let frame = match frame_type {
            FrameType::Data => {
                let padding = Self::strip_padding(frame_type, flags, stream_id, &mut payload, 0)?;
                Frame::Data(DataFrame {
                    stream_id,
                    data: payload,
                    end_stream: flags.is_end_stream(),
                    padding,
                })
            }
            FrameType::Headers => {
                let prefix = if flags.is_priority() { 5 } else { 0 };
                let padding = Self::strip_padding(frame_type, flags, stream_id, &mut payload, prefix)?;
                let priority = if flags.is_priority() {
                    if payload.len() < 5 {
                        return Err(bad_length());
                    }
                    let dependency = payload.get_u32();
                    let weight = payload.get_u8();
                    Some(PrioritySpec::from_wire(dependency, weight))
                } else {
                    None
                };
                Frame::Headers(HeadersFrame {
                    stream_id,
                    header_block: payload,
                    end_stream: flags.is_end_stream(),
                    end_headers: flags.is_end_headers(),
                    priority,
                    padding,
                })
            }
            FrameType::Priority => {
                if len != 5 {
                    return Err(bad_length());
                }
                let dependency = payload.get_u32();
                let weight = payload.get_u8();
                Frame::Priority(PriorityFrame {
                    stream_id,
                    priority: PrioritySpec::from_wire(dependency, weight),
                })
            }
            FrameType::RstStream => {
                if len != 4 {
                    return Err(bad_length());
                }
                Frame::RstStream(RstStreamFrame {
                    stream_id,
                    error_code: ErrorCode::from_u32(payload.get_u32()),
                })
            }
            FrameType::Settings => {
                if flags.is_ack() {
                    if len != 0 {
                        return Err(bad_length());
                    }
                    Frame::Settings(SettingsFrame::ack())
                } else {
                    if len % 6 != 0 {
                        return Err(bad_length());
                    }
                    let mut settings = Settings::new();
                    while payload.has_remaining() {
                        let id = payload.get_u16();
                        let value = payload.get_u32();
                        settings.set_raw(id, value)?;
                    }
                    Frame::Settings(SettingsFrame::new(settings))
                }
            }
            FrameType::PushPromise => {
                let padding = Self::strip_padding(frame_type, flags, stream_id, &mut payload, 4)?;
                if payload.len() < 4 {
                    return Err(bad_length());
                }
                let promised_stream_id = payload.get_u32() & MAX_STREAM_ID;
                Frame::PushPromise(PushPromiseFrame {
                    stream_id,
                    promised_stream_id,
                    header_block: payload,
                    end_headers: flags.is_end_headers(),
                    padding,
                })
            }
            FrameType::Ping => {
                if len != 8 {
                    return Err(bad_length());
                }
                let mut data = [0u8; 8];
                payload.copy_to_slice(&mut data);
                Frame::Ping(PingFrame {
                    ack: flags.is_ack(),
                    data,
                })
            }
            FrameType::Goaway => {
                if len < 8 {
                    return Err(bad_length());
                }
                let last_stream_id = payload.get_u32() & MAX_STREAM_ID;
                let error_code = ErrorCode::from_u32(payload.get_u32());
                Frame::Goaway(GoawayFrame {
                    last_stream_id,
                    error_code,
                    debug_data: payload,
                })
            }
            FrameType::WindowUpdate => {
                if len != 4 {
                    return Err(bad_length());
                }
                Frame::WindowUpdate(WindowUpdateFrame {
                    stream_id,
                    size_increment: payload.get_u32() & MAX_STREAM_ID,
                })
            }
            FrameType::Continuation => Frame::Continuation(ContinuationFrame {
                stream_id,
                header_block: payload,
                end_headers: flags.is_end_headers(),
            }),
            FrameType::Unknown(byte) => Frame::Unknown(UnknownFrame {
                frame_type: byte,
                flags,
                stream_id,
                payload,
            }),
        };

        Ok(frame)
    }

    /// Remove the Pad Length octet and trailing padding from `payload`
    ///
    /// `prefix` is the number of fixed bytes following the Pad Length octet
    /// (priority block, promised stream id) that padding may not eat into.
    fn strip_padding(
        frame_type: FrameType,
        flags: FrameFlags,
        stream_id: u32,
        payload: &mut Bytes,
        prefix: usize,
    ) -> std::result::Result<Option<u8>, FrameError> {
        if !flags.is_padded() {
            return Ok(None);
        }

        let len = payload.len();
        if len == 0 {
            return Err(FrameError::BadPadding {
                frame_type,
                stream_id,
                pad_len: 0,
                len,
            });
        }

        let pad_len = payload[0] as usize;
        // Padding must be strictly shorter than the payload that carries it
        if pad_len + 1 + prefix > len {
            return Err(FrameError::BadPadding {
                frame_type,
                stream_id,
                pad_len,
                len,
            });
        }

        payload.advance(1);
        payload.truncate(len - 1 - pad_len);
        Ok(Some(pad_len as u8))
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::h2::settings::{SettingsBuilder, SettingsParameter};

    #[test]
    fn test_encode_decode_header() {
        let frame_type = FrameType::Headers;
        let flags = FrameFlags::from_u8(FrameFlags::END_STREAM | FrameFlags::END_HEADERS);
        let stream_id = 42;
        let length = 1234;

        let header = FrameCodec::encode_header(frame_type, flags, stream_id, length);
        let (decoded_type, decoded_flags, decoded_id, decoded_len) = FrameCodec::decode_header(&header);

        assert_eq!(decoded_type, frame_type);
        assert_eq!(decoded_flags.as_u8(), flags.as_u8());
        assert_eq!(decoded_id, stream_id);
        assert_eq!(decoded_len, length);
    }

    #[test]
    fn test_decode_header_ignores_reserved_bit() {
        let header = [0, 0, 0, 0x8, 0, 0x80, 0, 0, 0x3];
        let (frame_type, _, stream_id, _) = FrameCodec::decode_header(&header);
        assert_eq!(frame_type, FrameType::WindowUpdate);
        assert_eq!(stream_id, 3);
    }

    #[test]
    fn test_encode_data_frame() {
        let frame = DataFrame::new(1, Bytes::from("Hello"), true);
        let encoded = FrameCodec::encode_data_frame(&frame);

        assert_eq!(encoded[0..3], [0, 0, 5]); // Length = 5
        assert_eq!(encoded[3], FrameType::Data.as_u8());
        assert_eq!(encoded[4], FrameFlags::END_STREAM);
        assert_eq!(&encoded[5..9], &[0, 0, 0, 1]); // Stream ID = 1

        assert_eq!(&encoded[9..], b"Hello");
    }

    #[test]
    fn test_encode_data_frame_with_padding() {
        let frame = DataFrame::new(1, Bytes::from("Hi"), false).with_padding(10);
        let encoded = FrameCodec::encode_data_frame(&frame);

        // Length should be: 1 (pad length) + 2 (data) + 10 (padding) = 13
        assert_eq!(encoded[0..3], [0, 0, 13]);
        assert_eq!(encoded[4] & FrameFlags::PADDED, FrameFlags::PADDED);
        assert_eq!(encoded[9], 10);
        assert_eq!(&encoded[10..12], b"Hi");
        assert_eq!(&encoded[12..22], &[0u8; 10]);
    }

    #[test]
    fn test_encode_settings_frame() {
        let settings = SettingsBuilder::new()
            .header_table_size(8192)
            .enable_push(false)
            .initial_window_size(65535)
            .build()
            .unwrap();

        let frame = SettingsFrame::new(settings);
        let encoded = FrameCodec::encode_settings_frame(&frame);

        assert_eq!(encoded[3], FrameType::Settings.as_u8());
        assert_eq!(&encoded[5..9], &[0, 0, 0, 0]); // Stream ID must be 0

        // 3 settings * 6 bytes = 18 bytes payload
        assert_eq!(encoded[0..3], [0, 0, 18]);
        let ids: Vec<_> = encoded[9..]
            .chunks_exact(6)
            .map(|chunk| SettingsParameter::from_u16(u16::from_be_bytes([chunk[0], chunk[1]])))
            .collect();
        assert_eq!(
            ids,
            vec![
                Some(SettingsParameter::HeaderTableSize),
                Some(SettingsParameter::EnablePush),
                Some(SettingsParameter::InitialWindowSize),
            ]
        );
    }

    #[test]
    fn test_encode_settings_ack() {
        let frame = SettingsFrame::ack();
        let encoded = FrameCodec::encode_settings_frame(&frame);

        assert_eq!(encoded[0..3], [0, 0, 0]);
        assert_eq!(encoded[4], FrameFlags::ACK);
    }

    #[test]
    fn test_encode_ping_frame() {
        let data = [1, 2, 3, 4, 5, 6, 7, 8];
        let frame = PingFrame::new(data);
        let encoded = FrameCodec::encode_ping_frame(&frame);

        assert_eq!(encoded[0..3], [0, 0, 8]);
        assert_eq!(encoded[3], FrameType::Ping.as_u8());
        assert_eq!(&encoded[9..17], &data);
    }

    #[test]
    fn test_encode_window_update() {
        let frame = WindowUpdateFrame::new(42, 1000);
        let encoded = FrameCodec::encode_window_update_frame(&frame);

        assert_eq!(encoded[0..3], [0, 0, 4]);
        assert_eq!(encoded[3], FrameType::WindowUpdate.as_u8());
        assert_eq!(&encoded[5..9], &[0, 0, 0, 42]);

        let increment = u32::from_be_bytes([encoded[9], encoded[10], encoded[11], encoded[12]]);
        assert_eq!(increment, 1000);
    }

    #[test]
    fn test_buffered_decode_waits_for_whole_frame() {
        let encoded = FrameCodec::encode_ping_frame(&PingFrame::new([7; 8]));
        let mut codec = FrameCodec::new();

        codec.extend(&encoded[..5]);
        assert_eq!(codec.decode().unwrap(), None);
        codec.extend(&encoded[5..12]);
        assert_eq!(codec.decode().unwrap(), None);
        codec.extend(&encoded[12..]);
        assert_eq!(codec.decode().unwrap(), Some(Frame::Ping(PingFrame::new([7; 8]))));
        assert_eq!(codec.buffered(), 0);
    }

    #[test]
    fn test_decode_rejects_oversized_frame_on_header() {
        let mut codec = FrameCodec::new();
        let header = FrameCodec::encode_header(FrameType::Data, FrameFlags::empty(), 1, 16385);
        codec.extend(&header);
        assert!(matches!(
            codec.decode(),
            Err(FrameError::TooLarge { len: 16385, max: 16384, .. })
        ));
    }

    #[test]
    fn test_decode_padding_bounds() {
        // pad length 4 in a 5-byte payload leaves an empty body
        let raw = RawFrame::new(0x0, FrameFlags::PADDED, 1, vec![4, 0, 0, 0, 0]);
        let frame = FrameCodec::decode_slice(&FrameCodec::encode_raw(&raw), 16384).unwrap();
        assert_eq!(
            frame,
            Frame::Data(DataFrame::new(1, Bytes::new(), false).with_padding(4))
        );

        // pad length equal to the payload length is malformed
        let raw = RawFrame::new(0x0, FrameFlags::PADDED, 1, vec![5, 0, 0, 0, 0]);
        assert!(matches!(
            FrameCodec::decode_slice(&FrameCodec::encode_raw(&raw), 16384),
            Err(FrameError::BadPadding { pad_len: 5, len: 5, .. })
        ));
    }

    #[test]
    fn test_decode_fixed_lengths() {
        for (frame_type, len) in [(0x2u8, 4usize), (0x3, 5), (0x6, 7), (0x8, 3)] {
            let stream_id = if frame_type == 0x6 { 0 } else { 1 };
            let raw = RawFrame::new(frame_type, 0, stream_id, vec![0u8; len]);
            let result = FrameCodec::decode_slice(&FrameCodec::encode_raw(&raw), 16384);
            assert!(
                matches!(result, Err(FrameError::BadLength { .. })),
                "type {:#x} len {} gave {:?}",
                frame_type,
                len,
                result
            );
        }
    }

    #[test]
    fn test_decode_unknown_type_and_flags() {
        let raw = RawFrame::new(0x42, 0xff, 7, vec![1, 2, 3]);
        let frame = FrameCodec::decode_slice(&FrameCodec::encode_raw(&raw), 16384).unwrap();
        assert_eq!(frame.frame_type(), FrameType::Unknown(0x42));

        // undefined flag bits on a known type are dropped
        let raw = RawFrame::new(0x8, 0xff, 0, vec![0, 0, 0, 1]);
        let frame = FrameCodec::decode_slice(&FrameCodec::encode_raw(&raw), 16384).unwrap();
        assert_eq!(frame, Frame::WindowUpdate(WindowUpdateFrame::new(0, 1)));
    }
}
