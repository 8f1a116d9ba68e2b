//! HPACK encoder

use super::table::{self, DynamicTable, TableMatch};
use super::{encode_integer, encode_string, HeaderField};
use bytes::{BufMut, BytesMut};
use tracing::trace;

/// Largest dynamic table the encoder will maintain, whatever the peer allows
pub const MAX_ENCODER_TABLE_SIZE: usize = 65536;

/// HPACK encoder for one connection
///
/// The table limit follows the peer's SETTINGS_HEADER_TABLE_SIZE. Limit
/// changes are signalled at the start of the next header block; when the
/// limit dropped and rose again in between, both the minimum and the final
/// value are signalled.
#[derive(Debug)]
pub struct Encoder {
    table: DynamicTable,
    use_huffman: bool,
    pending_update: Option<(usize, usize)>,
}

impl Encoder {
    /// Create a new encoder with the given table limit
    pub fn new(max_table_size: usize) -> Self {
        Encoder {
            table: DynamicTable::new(max_table_size.min(MAX_ENCODER_TABLE_SIZE)),
            use_huffman: true,
            pending_update: None,
        }
    }

    /// Set whether to Huffman-code string literals (when shorter)
    pub fn set_use_huffman(&mut self, use_huffman: bool) {
        self.use_huffman = use_huffman;
    }

    /// Apply a new table limit from the peer's SETTINGS
    pub fn set_max_table_size(&mut self, size: usize) {
        let size = size.min(MAX_ENCODER_TABLE_SIZE);
        if self.pending_update.is_none() && size == self.table.max_size() {
            return;
        }
        self.pending_update = Some(match self.pending_update {
            Some((min, _)) => (min.min(size), size),
            None => (size, size),
        });
    }

    /// Dynamic table of this encoder
    pub fn table(&self) -> &DynamicTable {
        &self.table
    }

    /// Encode a header list into one header block
    pub fn encode(&mut self, headers: &[HeaderField], dst: &mut BytesMut) {
        if let Some((min, last)) = self.pending_update.take() {
            if min < last {
                encode_integer(dst, min, 5, 0x20);
                self.table.set_max_size(min);
            }
            encode_integer(dst, last, 5, 0x20);
            self.table.set_max_size(last);
            trace!(table_size = last, "signalled dynamic table size update");
        }

        for field in headers {
            self.encode_field(field, dst);
        }
    }

    fn encode_field(&mut self, field: &HeaderField, dst: &mut BytesMut) {
        let found = table::find(&self.table, field);

        if field.sensitive {
            // Literal never indexed; the name may still come from a table
            match found {
                Some(TableMatch::Full(index)) | Some(TableMatch::Name(index)) => {
                    encode_integer(dst, index, 4, 0x10)
                }
                None => {
                    dst.put_u8(0x10);
                    encode_string(dst, &field.name, self.use_huffman);
                }
            }
            encode_string(dst, &field.value, self.use_huffman);
            return;
        }

        if let Some(TableMatch::Full(index)) = found {
            encode_integer(dst, index, 7, 0x80);
            return;
        }

        let name_index = match found {
            Some(TableMatch::Name(index)) => Some(index),
            _ => None,
        };

        // Entries that could never fit are sent without indexing
        let (prefix_bits, flags, index) = if field.size() > self.table.max_size() {
            (4, 0x00, false)
        } else {
            (6, 0x40, true)
        };

        match name_index {
            Some(i) => encode_integer(dst, i, prefix_bits, flags),
            None => {
                dst.put_u8(flags);
                encode_string(dst, &field.name, self.use_huffman);
            }
        }
        encode_string(dst, &field.value, self.use_huffman);

        if index {
            self.table.insert(field.name.clone(), field.value.clone());
        }
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new(4096)
    }
}
