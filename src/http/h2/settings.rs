//! HTTP/2 settings management
//!
//! This module implements HTTP/2 SETTINGS frames and parameters
//! as defined in RFC 7540 Section 6.5, and the bookkeeping for both
//! directions of the exchange ([`SettingsNegotiator`]).

use super::error::{Error, ErrorCode, Result};
use super::frames::{FrameError, SettingsFrame};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::time::Instant;
use tracing::debug;

/// Distinct unknown identifiers kept per [`Settings`]; later ones are ignored
pub const MAX_UNKNOWN_SETTINGS: usize = 32;

/// HTTP/2 settings parameters (RFC 7540 Section 6.5.2)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum SettingsParameter {
    /// SETTINGS_HEADER_TABLE_SIZE (0x1)
    /// Allows the sender to inform the remote endpoint of the maximum size
    /// of the header compression table
    HeaderTableSize = 0x1,

    /// SETTINGS_ENABLE_PUSH (0x2)
    /// Used to disable server push
    EnablePush = 0x2,

    /// SETTINGS_MAX_CONCURRENT_STREAMS (0x3)
    /// Indicates the maximum number of concurrent streams
    MaxConcurrentStreams = 0x3,

    /// SETTINGS_INITIAL_WINDOW_SIZE (0x4)
    /// Indicates the sender's initial window size for stream-level flow control
    InitialWindowSize = 0x4,

    /// SETTINGS_MAX_FRAME_SIZE (0x5)
    /// Indicates the size of the largest frame payload
    MaxFrameSize = 0x5,

    /// SETTINGS_MAX_HEADER_LIST_SIZE (0x6)
    /// Advises peer of the maximum size of header list
    MaxHeaderListSize = 0x6,
}

impl SettingsParameter {
    /// Convert to u16
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Create from u16
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x1 => Some(SettingsParameter::HeaderTableSize),
            0x2 => Some(SettingsParameter::EnablePush),
            0x3 => Some(SettingsParameter::MaxConcurrentStreams),
            0x4 => Some(SettingsParameter::InitialWindowSize),
            0x5 => Some(SettingsParameter::MaxFrameSize),
            0x6 => Some(SettingsParameter::MaxHeaderListSize),
            _ => None,
        }
    }

    /// Get parameter name
    pub fn name(&self) -> &'static str {
        match self {
            SettingsParameter::HeaderTableSize => "HEADER_TABLE_SIZE",
            SettingsParameter::EnablePush => "ENABLE_PUSH",
            SettingsParameter::MaxConcurrentStreams => "MAX_CONCURRENT_STREAMS",
            SettingsParameter::InitialWindowSize => "INITIAL_WINDOW_SIZE",
            SettingsParameter::MaxFrameSize => "MAX_FRAME_SIZE",
            SettingsParameter::MaxHeaderListSize => "MAX_HEADER_LIST_SIZE",
        }
    }
}

impl fmt::Display for SettingsParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:x})", self.name(), self.as_u16())
    }
}

/// HTTP/2 settings
///
/// `None` means the parameter was not declared; getters fall back to the
/// RFC 7540 initial values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    /// Header table size (default: 4096)
    pub header_table_size: Option<u32>,

    /// Enable server push (default: true)
    pub enable_push: Option<bool>,

    /// Maximum concurrent streams (default: unlimited)
    pub max_concurrent_streams: Option<u32>,

    /// Initial window size (default: 65535)
    pub initial_window_size: Option<u32>,

    /// Maximum frame size (default: 16384, range: 16384-16777215)
    pub max_frame_size: Option<u32>,

    /// Maximum header list size (default: unlimited)
    pub max_header_list_size: Option<u32>,

    /// Identifiers this implementation does not define, by identifier
    pub unknown: BTreeMap<u16, u32>,
}

impl Settings {
    /// Create empty settings
    pub fn new() -> Self {
        Settings::default()
    }

    /// Create settings holding every RFC 7540 initial value explicitly
    pub fn default_settings() -> Self {
        Settings {
            header_table_size: Some(4096),
            enable_push: Some(true),
            max_concurrent_streams: None, // Unlimited
            initial_window_size: Some(65535),
            max_frame_size: Some(16384),
            max_header_list_size: None, // Unlimited
            unknown: BTreeMap::new(),
        }
    }

    /// Get header table size (with default)
    pub fn get_header_table_size(&self) -> u32 {
        self.header_table_size.unwrap_or(4096)
    }

    /// Get enable push (with default)
    pub fn get_enable_push(&self) -> bool {
        self.enable_push.unwrap_or(true)
    }

    /// Get max concurrent streams (None = unlimited)
    pub fn get_max_concurrent_streams(&self) -> Option<u32> {
        self.max_concurrent_streams
    }

    /// Get initial window size (with default)
    pub fn get_initial_window_size(&self) -> u32 {
        self.initial_window_size.unwrap_or(65535)
    }

    /// Get max frame size (with default)
    pub fn get_max_frame_size(&self) -> u32 {
        self.max_frame_size.unwrap_or(16384)
    }

    /// Get max header list size (None = unlimited)
    pub fn get_max_header_list_size(&self) -> Option<u32> {
        self.max_header_list_size
    }

    /// Get the value declared for an identifier this crate does not define
    pub fn get_unknown(&self, id: u16) -> Option<u32> {
        self.unknown.get(&id).copied()
    }

    /// Check if no parameter is declared
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Declared parameters as `(identifier, value)` pairs in wire order
    pub fn entries(&self) -> Vec<(u16, u32)> {
        let mut entries = Vec::new();
        if let Some(val) = self.header_table_size {
            entries.push((SettingsParameter::HeaderTableSize.as_u16(), val));
        }
        if let Some(val) = self.enable_push {
            entries.push((SettingsParameter::EnablePush.as_u16(), val as u32));
        }
        if let Some(val) = self.max_concurrent_streams {
            entries.push((SettingsParameter::MaxConcurrentStreams.as_u16(), val));
        }
        if let Some(val) = self.initial_window_size {
            entries.push((SettingsParameter::InitialWindowSize.as_u16(), val));
        }
        if let Some(val) = self.max_frame_size {
            entries.push((SettingsParameter::MaxFrameSize.as_u16(), val));
        }
        if let Some(val) = self.max_header_list_size {
            entries.push((SettingsParameter::MaxHeaderListSize.as_u16(), val));
        }
        entries.extend(self.unknown.iter().map(|(&id, &value)| (id, value)));
        entries
    }

    /// Apply one `(identifier, value)` pair as read off the wire
    ///
    /// Out-of-range values are rejected with the error code RFC 7540
    /// Section 6.5.2 assigns to them. Unknown identifiers are stored.
    pub fn set_raw(&mut self, id: u16, value: u32) -> std::result::Result<(), FrameError> {
        match SettingsParameter::from_u16(id) {
            Some(SettingsParameter::HeaderTableSize) => self.header_table_size = Some(value),
            Some(SettingsParameter::EnablePush) => {
                if value > 1 {
                    return Err(FrameError::Setting {
                        code: ErrorCode::ProtocolError,
                        reason: format!("ENABLE_PUSH value {} is not 0 or 1", value),
                    });
                }
                self.enable_push = Some(value == 1);
            }
            Some(SettingsParameter::MaxConcurrentStreams) => {
                self.max_concurrent_streams = Some(value)
            }
            Some(SettingsParameter::InitialWindowSize) => {
                if value > 0x7FFFFFFF {
                    return Err(FrameError::Setting {
                        code: ErrorCode::FlowControlError,
                        reason: format!("INITIAL_WINDOW_SIZE value {} exceeds 2^31-1", value),
                    });
                }
                self.initial_window_size = Some(value);
            }
            Some(SettingsParameter::MaxFrameSize) => {
                if !(16384..=16777215).contains(&value) {
                    return Err(FrameError::Setting {
                        code: ErrorCode::ProtocolError,
                        reason: format!(
                            "MAX_FRAME_SIZE value {} outside valid range (16384-16777215)",
                            value
                        ),
                    });
                }
                self.max_frame_size = Some(value);
            }
            Some(SettingsParameter::MaxHeaderListSize) => self.max_header_list_size = Some(value),
            None => self.set_unknown(id, value),
        }
        Ok(())
    }

    /// Validate settings values
    pub fn validate(&self) -> Result<()> {
        // Validate SETTINGS_INITIAL_WINDOW_SIZE (max 2^31-1)
        if let Some(initial_window_size) = self.initial_window_size {
            if initial_window_size > 0x7FFFFFFF {
                return Err(Error::InvalidSettings(format!(
                    "Initial window size {} exceeds maximum (2^31-1)",
                    initial_window_size
                )));
            }
        }

        // Validate SETTINGS_MAX_FRAME_SIZE (16384 to 16777215)
        if let Some(max_frame_size) = self.max_frame_size {
            if !(16384..=16777215).contains(&max_frame_size) {
                return Err(Error::InvalidSettings(format!(
                    "Max frame size {} outside valid range (16384-16777215)",
                    max_frame_size
                )));
            }
        }

        Ok(())
    }

    /// Merge settings from another Settings object
    /// (values in `other` override values in `self`)
    pub fn merge(&mut self, other: &Settings) {
        if other.header_table_size.is_some() {
            self.header_table_size = other.header_table_size;
        }
        if other.enable_push.is_some() {
            self.enable_push = other.enable_push;
        }
        if other.max_concurrent_streams.is_some() {
            self.max_concurrent_streams = other.max_concurrent_streams;
        }
        if other.initial_window_size.is_some() {
            self.initial_window_size = other.initial_window_size;
        }
        if other.max_frame_size.is_some() {
            self.max_frame_size = other.max_frame_size;
        }
        if other.max_header_list_size.is_some() {
            self.max_header_list_size = other.max_header_list_size;
        }
        for (&id, &value) in &other.unknown {
            self.set_unknown(id, value);
        }
    }

    /// Store an unknown identifier; new ones past [`MAX_UNKNOWN_SETTINGS`]
    /// are dropped since the protocol ignores them anyway
    fn set_unknown(&mut self, id: u16, value: u32) {
        if let Some(known) = self.unknown.get_mut(&id) {
            *known = value;
        } else if self.unknown.len() < MAX_UNKNOWN_SETTINGS {
            self.unknown.insert(id, value);
        }
    }
}

/// Builder for HTTP/2 settings
pub struct SettingsBuilder {
    settings: Settings,
}

impl SettingsBuilder {
    /// Create a new settings builder
    pub fn new() -> Self {
        SettingsBuilder {
            settings: Settings::new(),
        }
    }

    /// Set header table size
    pub fn header_table_size(mut self, size: u32) -> Self {
        self.settings.header_table_size = Some(size);
        self
    }

    /// Set enable push
    pub fn enable_push(mut self, enable: bool) -> Self {
        self.settings.enable_push = Some(enable);
        self
    }

    /// Set max concurrent streams
    pub fn max_concurrent_streams(mut self, max: u32) -> Self {
        self.settings.max_concurrent_streams = Some(max);
        self
    }

    /// Set initial window size
    pub fn initial_window_size(mut self, size: u32) -> Self {
        self.settings.initial_window_size = Some(size);
        self
    }

    /// Set max frame size
    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.settings.max_frame_size = Some(size);
        self
    }

    /// Set max header list size
    pub fn max_header_list_size(mut self, size: u32) -> Self {
        self.settings.max_header_list_size = Some(size);
        self
    }

    /// Declare a parameter this crate does not define
    pub fn unknown(mut self, id: u16, value: u32) -> Self {
        self.settings.set_unknown(id, value);
        self
    }

    /// Build the settings
    pub fn build(self) -> Result<Settings> {
        self.settings.validate()?;
        Ok(self.settings)
    }
}

impl Default for SettingsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Bookkeeping for both directions of the SETTINGS exchange
///
/// Local settings take effect when the peer acknowledges them; until then
/// they are queued as pending in the order they were sent. Peer settings
/// take effect on receipt.
#[derive(Debug)]
pub struct SettingsNegotiator {
    /// Local settings the peer has acknowledged
    acked: Settings,
    /// Local settings sent and awaiting acknowledgement, oldest first
    pending: VecDeque<(Settings, Instant)>,
    /// Settings declared by the peer
    peer: Settings,
}

impl SettingsNegotiator {
    /// Create a negotiator; both sides start at RFC 7540 initial values
    pub fn new() -> Self {
        SettingsNegotiator {
            acked: Settings::new(),
            pending: VecDeque::new(),
            peer: Settings::new(),
        }
    }

    /// Queue local settings for sending and return the frame carrying them
    pub fn send_local(&mut self, settings: Settings) -> SettingsFrame {
        let frame = SettingsFrame::new(settings.clone());
        self.pending.push_back((settings, Instant::now()));
        frame
    }

    /// Apply a received SETTINGS ACK, returning the settings it acknowledged
    pub fn receive_ack(&mut self) -> Result<Settings> {
        match self.pending.pop_front() {
            Some((settings, _)) => {
                self.acked.merge(&settings);
                debug!(entries = settings.entries().len(), "local settings acknowledged");
                Ok(settings)
            }
            None => Err(Error::protocol("Received unexpected SETTINGS ACK")),
        }
    }

    /// Apply received peer settings
    ///
    /// Returns the change in the peer's INITIAL_WINDOW_SIZE, which must be
    /// applied to every stream send window.
    pub fn receive_remote(&mut self, settings: &Settings) -> i64 {
        let old = self.peer.get_initial_window_size() as i64;
        self.peer.merge(settings);
        let delta = self.peer.get_initial_window_size() as i64 - old;
        debug!(entries = settings.entries().len(), window_delta = delta, "peer settings applied");
        delta
    }

    /// Acknowledged local settings
    pub fn local(&self) -> &Settings {
        &self.acked
    }

    /// Peer settings
    pub fn peer(&self) -> &Settings {
        &self.peer
    }

    /// Check if local settings are awaiting acknowledgement
    pub fn is_ack_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Time the oldest unacknowledged SETTINGS frame was sent
    pub fn oldest_pending(&self) -> Option<Instant> {
        self.pending.front().map(|(_, sent)| *sent)
    }

    /// Concurrent stream ceiling we enforce: the most restrictive of the
    /// acknowledged and pending values
    pub fn local_max_concurrent_streams(&self) -> Option<u32> {
        self.most_restrictive(|s| s.max_concurrent_streams)
    }

    /// Header list ceiling we enforce, computed like the stream ceiling
    pub fn local_max_header_list_size(&self) -> Option<u32> {
        self.most_restrictive(|s| s.max_header_list_size)
    }

    fn most_restrictive(&self, get: impl Fn(&Settings) -> Option<u32>) -> Option<u32> {
        std::iter::once(&self.acked)
            .chain(self.pending.iter().map(|(settings, _)| settings))
            .filter_map(get)
            .min()
    }
}

impl Default for SettingsNegotiator {
    fn default() -> Self {
        Self::new()
    }
}
