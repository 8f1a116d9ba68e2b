//! HPACK header compression (RFC 7541)
//!
//! Each connection owns one [`Encoder`] and one [`Decoder`]; neither shares
//! state with any other connection. Field values are carried as raw bytes.
//!
//! Fields decoded from a never-indexed literal come back with
//! [`HeaderField::sensitive`] set, and the encoder never inserts a sensitive
//! field into its dynamic table, so a never-indexed field stays out of
//! indexed state across a decode/re-encode cycle.

pub mod decoder;
pub mod encoder;
pub mod huffman;
pub mod table;

pub use decoder::Decoder;
pub use encoder::Encoder;
pub use table::DynamicTable;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

/// Per-entry overhead used in table size accounting (RFC 7541 Section 4.1)
pub const ENTRY_OVERHEAD: usize = 32;

/// HPACK errors
///
/// Every variant except [`HpackError::HeaderListTooLarge`] leaves the decoder
/// out of sync with the peer's encoder and is fatal for the connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HpackError {
    /// Index 0 or past the end of the static and dynamic tables
    #[error("Invalid header table index {0}")]
    InvalidIndex(usize),

    /// Integer representation does not fit in 32 bits
    #[error("Integer overflow in header block")]
    IntegerOverflow,

    /// Header block ended inside a representation
    #[error("Unexpected end of header block")]
    Truncated,

    /// Huffman string decodes to EOS or an incomplete code
    #[error("Invalid Huffman encoding: {0}")]
    InvalidHuffman(&'static str),

    /// Dynamic table size update after the first header field
    #[error("Dynamic table size update after a header field")]
    LateSizeUpdate,

    /// Dynamic table size update above the SETTINGS_HEADER_TABLE_SIZE limit
    #[error("Dynamic table size update to {requested} exceeds limit {max}")]
    SizeUpdateTooLarge { requested: usize, max: usize },

    /// The limit was lowered but the next block did not start with an update
    #[error("Missing required dynamic table size update")]
    MissingSizeUpdate,

    /// Decoded header list exceeds SETTINGS_MAX_HEADER_LIST_SIZE
    ///
    /// The block was still decoded in full, so the dynamic table is intact.
    #[error("Header list size {size} exceeds limit {max}")]
    HeaderListTooLarge { size: usize, max: usize },

    /// An earlier block failed to decode on this connection
    #[error("Header decoder is unusable after an earlier failure")]
    Poisoned,
}

/// Result type for HPACK operations
pub type Result<T> = std::result::Result<T, HpackError>;

/// A header field
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct HeaderField {
    /// Header name
    pub name: Bytes,
    /// Header value
    pub value: Bytes,
    /// Never-indexed: must not enter any dynamic table
    pub sensitive: bool,
}

impl HeaderField {
    /// Create a new header field
    pub fn new(name: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Self {
        HeaderField {
            name: Bytes::copy_from_slice(name.as_ref()),
            value: Bytes::copy_from_slice(value.as_ref()),
            sensitive: false,
        }
    }

    /// Create a never-indexed header field
    pub fn sensitive(name: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Self {
        HeaderField {
            sensitive: true,
            ..Self::new(name, value)
        }
    }

    /// Size of this field for table and header-list accounting
    pub fn size(&self) -> usize {
        self.name.len() + self.value.len() + ENTRY_OVERHEAD
    }

    /// Name as UTF-8, if valid
    pub fn name_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.name).ok()
    }

    /// Value as UTF-8, if valid
    pub fn value_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.value).ok()
    }

    /// Check if this is a pseudo-header
    pub fn is_pseudo(&self) -> bool {
        self.name.first() == Some(&b':')
    }
}

impl fmt::Debug for HeaderField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = String::from_utf8_lossy(&self.name);
        if self.sensitive {
            write!(f, "{}: <sensitive>", name)
        } else {
            write!(f, "{}: {}", name, String::from_utf8_lossy(&self.value))
        }
    }
}

/// Encode an integer with an N-bit prefix (RFC 7541 Section 5.1)
///
/// `flags` supplies the bits above the prefix in the first octet.
pub fn encode_integer(dst: &mut BytesMut, value: usize, prefix_bits: u8, flags: u8) {
    let max_first = (1usize << prefix_bits) - 1;

    if value < max_first {
        dst.put_u8(flags | value as u8);
        return;
    }

    dst.put_u8(flags | max_first as u8);
    let mut remaining = value - max_first;
    while remaining >= 128 {
        dst.put_u8((remaining & 0x7f) as u8 | 0x80);
        remaining >>= 7;
    }
    dst.put_u8(remaining as u8);
}

/// Decode an integer with an N-bit prefix (RFC 7541 Section 5.1)
///
/// Values above `u32::MAX` are rejected.
pub fn decode_integer(src: &mut Bytes, prefix_bits: u8) -> Result<usize> {
    if !src.has_remaining() {
        return Err(HpackError::Truncated);
    }

    let max_first = (1usize << prefix_bits) - 1;
    let first = src.get_u8() as usize & max_first;
    if first < max_first {
        return Ok(first);
    }

    let mut value = max_first as u64;
    let mut shift = 0u32;
    loop {
        if !src.has_remaining() {
            return Err(HpackError::Truncated);
        }
        let byte = src.get_u8();
        if shift > 28 {
            return Err(HpackError::IntegerOverflow);
        }
        value += ((byte & 0x7f) as u64) << shift;
        if value > u32::MAX as u64 {
            return Err(HpackError::IntegerOverflow);
        }
        shift += 7;
        if byte & 0x80 == 0 {
            break;
        }
    }

    Ok(value as usize)
}

/// Encode a string literal, Huffman-coded when that is shorter and allowed
pub fn encode_string(dst: &mut BytesMut, value: &[u8], use_huffman: bool) {
    if use_huffman {
        let encoded_len = huffman::encoded_len(value);
        if encoded_len < value.len() {
            encode_integer(dst, encoded_len, 7, 0x80);
            huffman::encode(value, dst);
            return;
        }
    }
    encode_integer(dst, value.len(), 7, 0x00);
    dst.put_slice(value);
}

/// Decode a string literal (RFC 7541 Section 5.2)
pub fn decode_string(src: &mut Bytes) -> Result<Bytes> {
    if !src.has_remaining() {
        return Err(HpackError::Truncated);
    }

    let huffman_coded = src[0] & 0x80 != 0;
    let length = decode_integer(src, 7)?;
    if src.remaining() < length {
        return Err(HpackError::Truncated);
    }

    let data = src.split_to(length);
    if huffman_coded {
        huffman::decode(&data).map(Bytes::from)
    } else {
        Ok(data)
    }
}
