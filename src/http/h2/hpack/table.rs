//! HPACK static and dynamic tables (RFC 7541 Section 2.3)

use super::HeaderField;
use bytes::Bytes;
use std::collections::VecDeque;

/// Static table entries as defined in RFC 7541 Appendix A
pub static STATIC_TABLE: [(&str, &str); 61] = [
    (":authority", ""),                   // 1
    (":method", "GET"),                   // 2
    (":method", "POST"),                  // 3
    (":path", "/"),                       // 4
    (":path", "/index.html"),             // 5
    (":scheme", "http"),                  // 6
    (":scheme", "https"),                 // 7
    (":status", "200"),                   // 8
    (":status", "204"),                   // 9
    (":status", "206"),                   // 10
    (":status", "304"),                   // 11
    (":status", "400"),                   // 12
    (":status", "404"),                   // 13
    (":status", "500"),                   // 14
    ("accept-charset", ""),               // 15
    ("accept-encoding", "gzip, deflate"), // 16
    ("accept-language", ""),              // 17
    ("accept-ranges", ""),                // 18
    ("accept", ""),                       // 19
    ("access-control-allow-origin", ""),  // 20
    ("age", ""),                          // 21
    ("allow", ""),                        // 22
    ("authorization", ""),                // 23
    ("cache-control", ""),                // 24
    ("content-disposition", ""),          // 25
    ("content-encoding", ""),             // 26
    ("content-language", ""),             // 27
    ("content-length", ""),               // 28
    ("content-location", ""),             // 29
    ("content-range", ""),                // 30
    ("content-type", ""),                 // 31
    ("cookie", ""),                       // 32
    ("date", ""),                         // 33
    ("etag", ""),                         // 34
    ("expect", ""),                       // 35
    ("expires", ""),                      // 36
    ("from", ""),                         // 37
    ("host", ""),                         // 38
    ("if-match", ""),                     // 39
    ("if-modified-since", ""),            // 40
    ("if-none-match", ""),                // 41
    ("if-range", ""),                     // 42
    ("if-unmodified-since", ""),          // 43
    ("last-modified", ""),                // 44
    ("link", ""),                         // 45
    ("location", ""),                     // 46
    ("max-forwards", ""),                 // 47
    ("proxy-authenticate", ""),           // 48
    ("proxy-authorization", ""),          // 49
    ("range", ""),                        // 50
    ("referer", ""),                      // 51
    ("refresh", ""),                      // 52
    ("retry-after", ""),                  // 53
    ("server", ""),                       // 54
    ("set-cookie", ""),                   // 55
    ("strict-transport-security", ""),    // 56
    ("transfer-encoding", ""),            // 57
    ("user-agent", ""),                   // 58
    ("vary", ""),                         // 59
    ("via", ""),                          // 60
    ("www-authenticate", ""),             // 61
];

/// Result of a table lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableMatch {
    /// Name and value both match the entry at this index
    Full(usize),
    /// Only the name matches the entry at this index
    Name(usize),
}

/// Dynamic table, newest entry first
#[derive(Debug, Clone)]
pub struct DynamicTable {
    entries: VecDeque<(Bytes, Bytes)>,
    size: usize,
    max_size: usize,
}

impl DynamicTable {
    /// Create a new dynamic table
    pub fn new(max_size: usize) -> Self {
        DynamicTable {
            entries: VecDeque::new(),
            size: 0,
            max_size,
        }
    }

    /// Current size in octets (including per-entry overhead)
    pub fn size(&self) -> usize {
        self.size
    }

    /// Maximum size in octets
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the table is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Set the maximum size, evicting entries as needed
    pub fn set_max_size(&mut self, max_size: usize) {
        self.max_size = max_size;
        self.evict_to(max_size);
    }

    /// Insert an entry, evicting the oldest ones to make room
    ///
    /// An entry larger than the whole table empties the table and is not
    /// stored (RFC 7541 Section 4.4).
    pub fn insert(&mut self, name: Bytes, value: Bytes) {
        let entry_size = name.len() + value.len() + super::ENTRY_OVERHEAD;
        if entry_size > self.max_size {
            self.entries.clear();
            self.size = 0;
            return;
        }

        self.evict_to(self.max_size - entry_size);
        self.entries.push_front((name, value));
        self.size += entry_size;
    }

    /// Entry at a dynamic index (1 = newest)
    pub fn get(&self, index: usize) -> Option<&(Bytes, Bytes)> {
        index.checked_sub(1).and_then(|i| self.entries.get(i))
    }

    fn evict_to(&mut self, target: usize) {
        while self.size > target {
            match self.entries.pop_back() {
                Some((name, value)) => {
                    self.size -= name.len() + value.len() + super::ENTRY_OVERHEAD
                }
                None => break,
            }
        }
    }
}

/// Look up a combined (static + dynamic) index
pub fn get(dynamic: &DynamicTable, index: usize) -> Option<(Bytes, Bytes)> {
    if index == 0 {
        return None;
    }
    if index <= STATIC_TABLE.len() {
        let (name, value) = STATIC_TABLE[index - 1];
        return Some((Bytes::from_static(name.as_bytes()), Bytes::from_static(value.as_bytes())));
    }
    dynamic.get(index - STATIC_TABLE.len()).cloned()
}

/// Find the best combined index for a field
pub fn find(dynamic: &DynamicTable, field: &HeaderField) -> Option<TableMatch> {
    let mut name_match = None;

    for (i, (name, value)) in STATIC_TABLE.iter().enumerate() {
        if name.as_bytes() == field.name.as_ref() {
            if value.as_bytes() == field.value.as_ref() {
                return Some(TableMatch::Full(i + 1));
            }
            name_match.get_or_insert(i + 1);
        }
    }

    for (i, (name, value)) in dynamic.entries.iter().enumerate() {
        if *name == field.name {
            let index = STATIC_TABLE.len() + i + 1;
            if *value == field.value {
                return Some(TableMatch::Full(index));
            }
            name_match.get_or_insert(index);
        }
    }

    name_match.map(TableMatch::Name)
}
