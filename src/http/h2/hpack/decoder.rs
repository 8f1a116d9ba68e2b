//! HPACK decoder

use super::table::{self, DynamicTable};
use super::{decode_integer, decode_string, HeaderField, HpackError, Result};
use bytes::{Buf, Bytes};
use tracing::trace;

/// HPACK decoder for one connection
///
/// Any error other than [`HpackError::HeaderListTooLarge`] poisons the
/// decoder: its table no longer mirrors the peer's encoder, so every later
/// call fails with [`HpackError::Poisoned`].
#[derive(Debug)]
pub struct Decoder {
    table: DynamicTable,
    /// Limit from our acknowledged SETTINGS_HEADER_TABLE_SIZE
    max_table_size: usize,
    max_header_list_size: Option<usize>,
    size_update_required: bool,
    poisoned: bool,
}

impl Decoder {
    /// Create a new decoder with the given table limit
    pub fn new(max_table_size: usize) -> Self {
        Decoder {
            table: DynamicTable::new(max_table_size),
            max_table_size,
            max_header_list_size: None,
            size_update_required: false,
            poisoned: false,
        }
    }

    /// Apply a newly acknowledged SETTINGS_HEADER_TABLE_SIZE
    ///
    /// A limit below the current table size obliges the peer to start its
    /// next header block with a size update.
    pub fn set_max_table_size(&mut self, size: usize) {
        if size < self.table.max_size() {
            self.size_update_required = true;
        }
        self.max_table_size = size;
    }

    /// Set the header list limit (None = unlimited)
    pub fn set_max_header_list_size(&mut self, size: Option<usize>) {
        self.max_header_list_size = size;
    }

    /// Dynamic table of this decoder
    pub fn table(&self) -> &DynamicTable {
        &self.table
    }

    /// Check if an earlier failure made the decoder unusable
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Decode one complete header block
    pub fn decode(&mut self, block: Bytes) -> Result<Vec<HeaderField>> {
        if self.poisoned {
            return Err(HpackError::Poisoned);
        }

        let mut fields = Vec::new();
        let result = self.decode_block(block, &mut |field| fields.push(field));
        match result {
            Err(err) if !matches!(err, HpackError::HeaderListTooLarge { .. }) => {
                self.poisoned = true;
                Err(err)
            }
            Err(err) => Err(err),
            Ok(()) => Ok(fields),
        }
    }

    /// Decode a block, handing each field to `emit` until the header list
    /// limit is passed; the rest is still decoded for its table updates
    fn decode_block(
        &mut self,
        mut src: Bytes,
        emit: &mut dyn FnMut(HeaderField),
    ) -> Result<()> {
        let limit = self.max_header_list_size.unwrap_or(usize::MAX);
        let mut list_size = 0usize;
        let mut seen_field = false;

        while src.has_remaining() {
            let first = src[0];

            if first & 0xe0 == 0x20 {
                // Dynamic table size update
                if seen_field {
                    return Err(HpackError::LateSizeUpdate);
                }
                let requested = decode_integer(&mut src, 5)?;
                if requested > self.max_table_size {
                    return Err(HpackError::SizeUpdateTooLarge {
                        requested,
                        max: self.max_table_size,
                    });
                }
                self.table.set_max_size(requested);
                self.size_update_required = false;
                trace!(table_size = requested, "dynamic table size update");
                continue;
            }

            if !seen_field && self.size_update_required {
                return Err(HpackError::MissingSizeUpdate);
            }
            seen_field = true;

            let field = if first & 0x80 != 0 {
                // Indexed header field
                let index = decode_integer(&mut src, 7)?;
                let (name, value) = table::get(&self.table, index).ok_or(HpackError::InvalidIndex(index))?;
                HeaderField {
                    name,
                    value,
                    sensitive: false,
                }
            } else if first & 0x40 != 0 {
                // Literal with incremental indexing
                let (name, value) = self.decode_literal(&mut src, 6)?;
                self.table.insert(name.clone(), value.clone());
                HeaderField {
                    name,
                    value,
                    sensitive: false,
                }
            } else {
                // Literal without indexing (0000) or never indexed (0001)
                let sensitive = first & 0x10 != 0;
                let (name, value) = self.decode_literal(&mut src, 4)?;
                HeaderField {
                    name,
                    value,
                    sensitive,
                }
            };

            list_size = list_size.saturating_add(field.size());
            if list_size <= limit {
                emit(field);
            }
        }

        if self.size_update_required {
            return Err(HpackError::MissingSizeUpdate);
        }

        if list_size > limit {
            return Err(HpackError::HeaderListTooLarge {
                size: list_size,
                max: limit,
            });
        }

        Ok(())
    }

    fn decode_literal(&self, src: &mut Bytes, prefix_bits: u8) -> Result<(Bytes, Bytes)> {
        let index = decode_integer(src, prefix_bits)?;
        let name = if index == 0 {
            decode_string(src)?
        } else {
            table::get(&self.table, index)
                .ok_or(HpackError::InvalidIndex(index))?
                .0
        };
        let value = decode_string(src)?;
        Ok((name, value))
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new(4096)
    }
}
