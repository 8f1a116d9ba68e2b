//! Per-connection configuration
//!
//! Everything a [`Connection`](super::connection::Connection) decides locally
//! lives here: the SETTINGS it advertises, its conformance profile and the
//! policies for flow control, scheduling, flood protection and timeouts.

use super::error::{Error, Result};
use super::flow_control::{WindowUpdatePolicy, MAX_WINDOW_SIZE};
use super::profile::ConformanceProfile;
use super::settings::Settings;
use super::DEFAULT_INITIAL_WINDOW_SIZE;
use std::time::Duration;

/// Order in which queued DATA is released
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulingPolicy {
    /// Streams take turns in the order they queued data
    #[default]
    RoundRobin,
    /// Streams are served by the priority tree (dependency, weight)
    Priority,
}

/// Limits on frame volume per interval
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FloodLimits {
    /// Window over which counters accumulate
    pub interval: Duration,
    /// PING, SETTINGS, PRIORITY and RST_STREAM frames received
    pub max_control_frames: u32,
    /// RST_STREAM received for streams the peer opened itself
    pub max_resets: u32,
    /// Empty DATA frames without END_STREAM plus empty CONTINUATION frames
    pub max_empty_frames: u32,
    /// CONTINUATION frames within one header block
    pub max_continuations: u32,
}

impl Default for FloodLimits {
    fn default() -> Self {
        FloodLimits {
            interval: Duration::from_secs(1),
            max_control_frames: 1000,
            max_resets: 200,
            max_empty_frames: 100,
            max_continuations: 64,
        }
    }
}

/// Configuration of one connection
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// SETTINGS advertised at connection start
    pub settings: Settings,
    /// Error signalling profile
    pub profile: ConformanceProfile,
    /// When receive credit is returned
    pub window_update: WindowUpdatePolicy,
    /// Target receive window of the whole connection
    pub connection_window: u32,
    /// Release order of queued DATA
    pub scheduling: SchedulingPolicy,
    /// Flood protection limits
    pub flood: FloodLimits,
    /// How long frames racing a local close are tolerated
    pub closed_stream_grace: Duration,
    /// Time allowed for the peer's preface and first SETTINGS
    pub preface_timeout: Option<Duration>,
    /// Time allowed for the peer to acknowledge our SETTINGS
    pub settings_ack_timeout: Option<Duration>,
    /// Closed streams remembered for late-frame handling, and the cap on
    /// priority nodes for streams that were never opened
    pub max_closed_streams: usize,
}

impl ConnectionConfig {
    /// Default configuration for the server role
    pub fn server() -> Self {
        ConnectionConfigBuilder::server().config
    }

    /// Default configuration for the client role
    pub fn client() -> Self {
        ConnectionConfigBuilder::client().config
    }
}

/// Builder for [`ConnectionConfig`]
///
/// ```
/// use h2engine::http::h2::config::ConnectionConfigBuilder;
/// use h2engine::http::h2::profile::ConformanceProfile;
///
/// let config = ConnectionConfigBuilder::server()
///     .profile(ConformanceProfile::Lenient)
///     .max_concurrent_streams(200)
///     .build()
///     .unwrap();
/// assert_eq!(config.settings.max_concurrent_streams, Some(200));
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionConfigBuilder {
    config: ConnectionConfig,
}

impl ConnectionConfigBuilder {
    fn with_settings(settings: Settings) -> Self {
        ConnectionConfigBuilder {
            config: ConnectionConfig {
                settings,
                profile: ConformanceProfile::default(),
                window_update: WindowUpdatePolicy::default(),
                connection_window: DEFAULT_INITIAL_WINDOW_SIZE,
                scheduling: SchedulingPolicy::default(),
                flood: FloodLimits::default(),
                closed_stream_grace: Duration::from_secs(5),
                preface_timeout: Some(Duration::from_secs(10)),
                settings_ack_timeout: Some(Duration::from_secs(10)),
                max_closed_streams: 1024,
            },
        }
    }

    fn base_settings() -> Settings {
        Settings {
            header_table_size: Some(4096),
            initial_window_size: Some(DEFAULT_INITIAL_WINDOW_SIZE),
            max_frame_size: Some(16384),
            max_header_list_size: Some(16384),
            ..Settings::default()
        }
    }

    /// Start from the server defaults
    pub fn server() -> Self {
        Self::with_settings(Settings {
            max_concurrent_streams: Some(100),
            ..Self::base_settings()
        })
    }

    /// Start from the client defaults
    pub fn client() -> Self {
        Self::with_settings(Settings {
            enable_push: Some(true),
            ..Self::base_settings()
        })
    }

    /// Replace the advertised SETTINGS
    pub fn settings(mut self, settings: Settings) -> Self {
        self.config.settings = settings;
        self
    }

    /// Set SETTINGS_HEADER_TABLE_SIZE
    pub fn header_table_size(mut self, size: u32) -> Self {
        self.config.settings.header_table_size = Some(size);
        self
    }

    /// Set SETTINGS_ENABLE_PUSH
    pub fn enable_push(mut self, enable: bool) -> Self {
        self.config.settings.enable_push = Some(enable);
        self
    }

    /// Set SETTINGS_MAX_CONCURRENT_STREAMS
    pub fn max_concurrent_streams(mut self, max: u32) -> Self {
        self.config.settings.max_concurrent_streams = Some(max);
        self
    }

    /// Set SETTINGS_INITIAL_WINDOW_SIZE
    pub fn initial_window_size(mut self, size: u32) -> Self {
        self.config.settings.initial_window_size = Some(size);
        self
    }

    /// Set SETTINGS_MAX_FRAME_SIZE
    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.config.settings.max_frame_size = Some(size);
        self
    }

    /// Set SETTINGS_MAX_HEADER_LIST_SIZE
    pub fn max_header_list_size(mut self, size: u32) -> Self {
        self.config.settings.max_header_list_size = Some(size);
        self
    }

    /// Set the conformance profile
    pub fn profile(mut self, profile: ConformanceProfile) -> Self {
        self.config.profile = profile;
        self
    }

    /// Set the WINDOW_UPDATE emission policy
    pub fn window_update(mut self, policy: WindowUpdatePolicy) -> Self {
        self.config.window_update = policy;
        self
    }

    /// Set the target connection receive window
    pub fn connection_window(mut self, size: u32) -> Self {
        self.config.connection_window = size;
        self
    }

    /// Set the DATA scheduling policy
    pub fn scheduling(mut self, policy: SchedulingPolicy) -> Self {
        self.config.scheduling = policy;
        self
    }

    /// Set flood limits
    pub fn flood(mut self, limits: FloodLimits) -> Self {
        self.config.flood = limits;
        self
    }

    /// Set the closed-stream grace window
    pub fn closed_stream_grace(mut self, grace: Duration) -> Self {
        self.config.closed_stream_grace = grace;
        self
    }

    /// Set the preface timeout (None disables it)
    pub fn preface_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.preface_timeout = timeout;
        self
    }

    /// Set the SETTINGS ACK timeout (None disables it)
    pub fn settings_ack_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.settings_ack_timeout = timeout;
        self
    }

    /// Set how many closed streams are remembered
    pub fn max_closed_streams(mut self, max: usize) -> Self {
        self.config.max_closed_streams = max;
        self
    }

    /// Validate and build the configuration
    pub fn build(self) -> Result<ConnectionConfig> {
        self.config.settings.validate()?;
        let window = self.config.connection_window;
        if window < DEFAULT_INITIAL_WINDOW_SIZE || window as i64 > MAX_WINDOW_SIZE {
            return Err(Error::InvalidSettings(format!(
                "Connection window {} outside valid range (65535-2147483647)",
                window
            )));
        }
        Ok(self.config)
    }
}

impl From<ConnectionConfig> for ConnectionConfigBuilder {
    fn from(config: ConnectionConfig) -> Self {
        ConnectionConfigBuilder { config }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_defaults() {
        let config = ConnectionConfig::server();
        assert_eq!(config.settings.max_concurrent_streams, Some(100));
        assert_eq!(config.settings.enable_push, None);
        assert_eq!(config.settings.get_max_header_list_size(), Some(16384));
        assert_eq!(config.profile, ConformanceProfile::Strict);
        assert_eq!(config.window_update, WindowUpdatePolicy::Coalesce);
        assert_eq!(config.closed_stream_grace, Duration::from_secs(5));
    }

    #[test]
    fn test_client_defaults() {
        let config = ConnectionConfig::client();
        assert_eq!(config.settings.enable_push, Some(true));
        assert_eq!(config.settings.max_concurrent_streams, None);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(ConnectionConfigBuilder::server().max_frame_size(100).build().is_err());
        assert!(ConnectionConfigBuilder::server()
            .initial_window_size(0x8000_0000)
            .build()
            .is_err());
        assert!(ConnectionConfigBuilder::server().connection_window(1000).build().is_err());
        assert!(ConnectionConfigBuilder::server()
            .connection_window(1 << 20)
            .build()
            .is_ok());
    }
}
