//! HTTP/2 header lists
//!
//! A decoded header block is split into its pseudo-headers and its regular
//! fields and validated against the rules of RFC 7540 Section 8.1.2 for the
//! role it plays: request, response or trailers.

use super::hpack::HeaderField;
use std::collections::HashMap;

/// Role of a header block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// Request headers (also the request of a PUSH_PROMISE)
    Request,
    /// Response headers
    Response,
    /// Trailing headers
    Trailers,
}

/// Header block validation failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeaderError {
    /// Pseudo-header after a regular field, or the same pseudo-header twice
    #[error("{0}")]
    PseudoHeaderOrder(String),

    /// Any other malformed header list
    #[error("{0}")]
    Malformed(String),
}

/// Header fields that are meaningless over HTTP/2
const CONNECTION_SPECIFIC: [&str; 5] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
];

/// Pseudo-header fields of one block
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PseudoHeaders {
    pub method: Option<String>,
    pub scheme: Option<String>,
    pub authority: Option<String>,
    pub path: Option<String>,
    pub status: Option<u16>,
}

impl PseudoHeaders {
    fn is_empty(&self) -> bool {
        self.method.is_none()
            && self.scheme.is_none()
            && self.authority.is_none()
            && self.path.is_none()
            && self.status.is_none()
    }
}

/// A validated header block
///
/// ```
/// use h2engine::http::h2::headers::{BlockKind, HeaderBlock};
///
/// let head = HeaderBlock::request("GET", "https", "/index.html")
///     .with_authority("example.com")
///     .header("accept", "*/*");
/// assert!(head.validate(BlockKind::Request).is_ok());
///
/// let fields = head.to_fields();
/// assert_eq!(&fields[0].name[..], b":method");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderBlock {
    /// Pseudo-headers
    pub pseudo: PseudoHeaders,
    /// Regular fields in received order
    fields: Vec<HeaderField>,
}

impl HeaderBlock {
    /// Create an empty block (trailers)
    pub fn new() -> Self {
        HeaderBlock::default()
    }

    /// Create request headers
    pub fn request(method: &str, scheme: &str, path: &str) -> Self {
        HeaderBlock {
            pseudo: PseudoHeaders {
                method: Some(method.to_string()),
                scheme: Some(scheme.to_string()),
                path: Some(path.to_string()),
                ..PseudoHeaders::default()
            },
            fields: Vec::new(),
        }
    }

    /// Create CONNECT request headers
    pub fn connect(authority: &str) -> Self {
        HeaderBlock {
            pseudo: PseudoHeaders {
                method: Some("CONNECT".to_string()),
                authority: Some(authority.to_string()),
                ..PseudoHeaders::default()
            },
            fields: Vec::new(),
        }
    }

    /// Create response headers
    pub fn response(status: u16) -> Self {
        HeaderBlock {
            pseudo: PseudoHeaders {
                status: Some(status),
                ..PseudoHeaders::default()
            },
            fields: Vec::new(),
        }
    }

    /// Set `:authority`
    pub fn with_authority(mut self, authority: &str) -> Self {
        self.pseudo.authority = Some(authority.to_string());
        self
    }

    /// Append a regular field
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.push(HeaderField::new(name, value));
        self
    }

    /// Append a regular field (never indexed if `field.sensitive`)
    pub fn push(&mut self, field: HeaderField) {
        self.fields.push(field);
    }

    /// Request method
    pub fn method(&self) -> Option<&str> {
        self.pseudo.method.as_deref()
    }

    /// Request path
    pub fn path(&self) -> Option<&str> {
        self.pseudo.path.as_deref()
    }

    /// Response status
    pub fn status(&self) -> Option<u16> {
        self.pseudo.status
    }

    /// Get the first value of a regular field
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name.as_ref() == name.as_bytes())
            .and_then(|f| f.value_str())
    }

    /// Get all values of a regular field
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|f| f.name.as_ref() == name.as_bytes())
            .filter_map(|f| f.value_str())
            .collect()
    }

    /// Check if a regular field exists
    pub fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name.as_ref() == name.as_bytes())
    }

    /// Regular fields
    pub fn fields(&self) -> &[HeaderField] {
        &self.fields
    }

    /// Number of regular fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check if the block has neither pseudo-headers nor fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.pseudo.is_empty()
    }

    /// Declared content-length
    ///
    /// Repeated values must agree.
    pub fn content_length(&self) -> Result<Option<u64>, HeaderError> {
        let mut length = None;
        let declared = self
            .fields
            .iter()
            .filter(|f| f.name.as_ref() == b"content-length");
        for field in declared {
            let value = field.value_str().ok_or_else(|| {
                HeaderError::Malformed("content-length is not valid UTF-8".to_string())
            })?;
            for part in value.split(',') {
                let parsed: u64 = part.trim().parse().map_err(|_| {
                    HeaderError::Malformed(format!("invalid content-length {:?}", value))
                })?;
                match length {
                    Some(previous) if previous != parsed => {
                        return Err(HeaderError::Malformed(
                            "conflicting content-length values".to_string(),
                        ));
                    }
                    _ => length = Some(parsed),
                }
            }
        }
        Ok(length)
    }

    /// Flatten into the field list handed to the HPACK encoder
    pub fn to_fields(&self) -> Vec<HeaderField> {
        let mut out = Vec::with_capacity(self.fields.len() + 4);
        let pseudo = &self.pseudo;
        if let Some(status) = pseudo.status {
            out.push(HeaderField::new(":status", status.to_string()));
        }
        if let Some(method) = &pseudo.method {
            out.push(HeaderField::new(":method", method));
        }
        if let Some(scheme) = &pseudo.scheme {
            out.push(HeaderField::new(":scheme", scheme));
        }
        if let Some(authority) = &pseudo.authority {
            out.push(HeaderField::new(":authority", authority));
        }
        if let Some(path) = &pseudo.path {
            out.push(HeaderField::new(":path", path));
        }
        out.extend(self.fields.iter().cloned());
        out
    }

    /// Build a block from decoded fields, validating it for `kind`
    pub fn from_fields(decoded: Vec<HeaderField>, kind: BlockKind) -> Result<Self, HeaderError> {
        let mut block = HeaderBlock::new();
        let mut regular_seen = false;

        for field in decoded {
            if !field.is_pseudo() {
                regular_seen = true;
                block.fields.push(field);
                continue;
            }

            let name = String::from_utf8_lossy(&field.name).into_owned();
            if regular_seen {
                return Err(HeaderError::PseudoHeaderOrder(format!(
                    "pseudo-header {} after a regular header field",
                    name
                )));
            }
            if kind == BlockKind::Trailers {
                return Err(HeaderError::Malformed(format!(
                    "pseudo-header {} in trailers",
                    name
                )));
            }

            let value = field
                .value_str()
                .ok_or_else(|| HeaderError::Malformed(format!("{} value is not UTF-8", name)))?
                .to_string();
            let pseudo = &mut block.pseudo;
            let slot = match (name.as_str(), kind) {
                (":method", BlockKind::Request) => &mut pseudo.method,
                (":scheme", BlockKind::Request) => &mut pseudo.scheme,
                (":authority", BlockKind::Request) => &mut pseudo.authority,
                (":path", BlockKind::Request) => &mut pseudo.path,
                (":status", BlockKind::Response) => {
                    if pseudo.status.is_some() {
                        return Err(HeaderError::PseudoHeaderOrder(
                            "duplicate pseudo-header :status".to_string(),
                        ));
                    }
                    let status = value
                        .parse::<u16>()
                        .ok()
                        .filter(|s| value.len() == 3 && (100..=999).contains(s))
                        .ok_or_else(|| {
                            HeaderError::Malformed(format!("invalid :status {:?}", value))
                        })?;
                    pseudo.status = Some(status);
                    continue;
                }
                (":status", _) => {
                    return Err(HeaderError::Malformed(
                        ":status is not allowed in a request".to_string(),
                    ))
                }
                (":method" | ":scheme" | ":authority" | ":path", _) => {
                    return Err(HeaderError::Malformed(format!(
                        "request pseudo-header {} in a response",
                        name
                    )))
                }
                _ => {
                    return Err(HeaderError::Malformed(format!(
                        "unknown pseudo-header {}",
                        name
                    )))
                }
            };
            if slot.is_some() {
                return Err(HeaderError::PseudoHeaderOrder(format!(
                    "duplicate pseudo-header {}",
                    name
                )));
            }
            *slot = Some(value);
        }

        block.validate(kind)?;
        Ok(block)
    }

    /// Copy the regular fields into a name-to-value map
    ///
    /// Repeated names are joined into one value: `; ` for `cookie`
    /// (RFC 7540 Section 8.1.2.5), `, ` otherwise.
    pub fn merge_into(&self, map: &mut HashMap<String, String>) {
        for field in &self.fields {
            let name = String::from_utf8_lossy(&field.name).into_owned();
            let value = String::from_utf8_lossy(&field.value);
            match map.get_mut(&name) {
                Some(joined) => {
                    joined.push_str(if name == "cookie" { "; " } else { ", " });
                    joined.push_str(&value);
                }
                None => {
                    map.insert(name, value.into_owned());
                }
            }
        }
    }

    /// Check the pseudo-header set and the regular fields for `kind`
    pub fn validate(&self, kind: BlockKind) -> Result<(), HeaderError> {
        let pseudo = &self.pseudo;
        match kind {
            BlockKind::Request => {
                if pseudo.status.is_some() {
                    return Err(HeaderError::Malformed(
                        ":status is not allowed in a request".to_string(),
                    ));
                }
                match pseudo.method.as_deref() {
                    None => {
                        return Err(HeaderError::Malformed("missing :method".to_string()));
                    }
                    Some("CONNECT") => {
                        if pseudo.authority.is_none() {
                            return Err(HeaderError::Malformed(
                                "CONNECT request without :authority".to_string(),
                            ));
                        }
                        if pseudo.scheme.is_some() || pseudo.path.is_some() {
                            return Err(HeaderError::Malformed(
                                "CONNECT request with :scheme or :path".to_string(),
                            ));
                        }
                    }
                    Some(_) => {
                        if pseudo.scheme.is_none() {
                            return Err(HeaderError::Malformed("missing :scheme".to_string()));
                        }
                        match pseudo.path.as_deref() {
                            None => {
                                return Err(HeaderError::Malformed("missing :path".to_string()))
                            }
                            Some("") => {
                                return Err(HeaderError::Malformed("empty :path".to_string()))
                            }
                            Some(_) => {}
                        }
                    }
                }
            }
            BlockKind::Response => {
                if pseudo.method.is_some()
                    || pseudo.scheme.is_some()
                    || pseudo.authority.is_some()
                    || pseudo.path.is_some()
                {
                    return Err(HeaderError::Malformed(
                        "request pseudo-header in a response".to_string(),
                    ));
                }
                if pseudo.status.is_none() {
                    return Err(HeaderError::Malformed("missing :status".to_string()));
                }
            }
            BlockKind::Trailers => {
                if !pseudo.is_empty() {
                    return Err(HeaderError::Malformed(
                        "pseudo-header in trailers".to_string(),
                    ));
                }
            }
        }

        for field in &self.fields {
            validate_field(field)?;
        }
        self.content_length()?;
        Ok(())
    }
}

fn validate_field(field: &HeaderField) -> Result<(), HeaderError> {
    let name = &field.name;
    if name.is_empty() {
        return Err(HeaderError::Malformed("empty header name".to_string()));
    }
    if let Some(&bad) = name.iter().find(|b| b.is_ascii_uppercase()) {
        return Err(HeaderError::Malformed(format!(
            "uppercase character {:?} in header name {}",
            bad as char,
            String::from_utf8_lossy(name)
        )));
    }
    if !name.iter().all(|&b| is_token_char(b)) {
        return Err(HeaderError::Malformed(format!(
            "invalid header name {:?}",
            String::from_utf8_lossy(name)
        )));
    }
    if field
        .value
        .iter()
        .any(|&b| b == 0 || b == b'\r' || b == b'\n')
    {
        return Err(HeaderError::Malformed(format!(
            "invalid character in value of {}",
            String::from_utf8_lossy(name)
        )));
    }

    if CONNECTION_SPECIFIC
        .iter()
        .any(|h| h.as_bytes() == name.as_ref())
    {
        return Err(HeaderError::Malformed(format!(
            "connection-specific header field {}",
            String::from_utf8_lossy(name)
        )));
    }
    if name.as_ref() == b"te" && field.value.as_ref() != b"trailers" {
        return Err(HeaderError::Malformed(
            "te header field with a value other than \"trailers\"".to_string(),
        ));
    }
    Ok(())
}

fn is_token_char(b: u8) -> bool {
    b.is_ascii_lowercase()
        || b.is_ascii_digit()
        || matches!(
            b,
            b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' | b'^' | b'_' | b'`' | b'|' | b'~'
        )
}

/// Check if a promised request may be pushed (safe and cacheable)
pub fn is_pushable_method(method: &str) -> bool {
    matches!(method, "GET" | "HEAD")
}
