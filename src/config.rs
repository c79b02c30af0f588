//! Configuration types for a ripping session.
//!
//! [`RipConfig`] can be built in code (every struct implements `Default`) or
//! loaded from a TOML file; missing keys fall back to their defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::metadata::Codeset;
use crate::RipError;

/// What to do when a finished track's file name already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverwritePolicy {
    /// Always replace the existing file.
    Always,
    /// Keep the existing file and discard the new one.
    Never,
    /// Replace the existing file only if the new one is larger.
    #[default]
    Larger,
}

/// Where the metadata rules come from.
///
/// In TOML this is a single string: `"default"` selects the built-in rules,
/// a string containing a newline is parsed as inline rules, anything else is
/// a path to a rules file.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(from = "String")]
pub enum RulesSource {
    /// Built-in rules.
    #[default]
    Default,
    /// Rules given inline, one per line.
    Inline(String),
    /// Rules read from a file at session start.
    File(PathBuf),
}

impl From<String> for RulesSource {
    fn from(value: String) -> Self {
        if value.eq_ignore_ascii_case("default") || value.trim().is_empty() {
            Self::Default
        } else if value.contains('\n') {
            Self::Inline(value)
        } else {
            Self::File(PathBuf::from(value))
        }
    }
}

/// Relay server settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Whether to start the relay server at all.
    ///
    /// Default: true
    pub enabled: bool,

    /// Address the listener binds to.
    ///
    /// Default: `0.0.0.0`
    pub bind_addr: String,

    /// First port to try.
    ///
    /// Default: 8000
    pub port: u16,

    /// Last port to try when `port` is taken. `None` tries only `port`.
    pub port_search_max: Option<u16>,

    /// Maximum simultaneous relay clients.
    ///
    /// Default: 8
    pub max_connections: usize,

    /// Bytes of history a new client receives first.
    ///
    /// Default: 32768
    pub burst_bytes: usize,

    /// Time allowed for a client to send its request headers.
    ///
    /// Default: 2000ms
    pub handshake_timeout_ms: u64,

    /// Interval between send cycles.
    ///
    /// Default: 50ms
    pub send_interval_ms: u64,

    /// Upper bound on bytes written to one client per send call.
    ///
    /// Default: 8192
    pub send_chunk_bytes: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_addr: "0.0.0.0".to_string(),
            port: 8000,
            port_search_max: None,
            max_connections: 8,
            burst_bytes: 32768,
            handshake_timeout_ms: 2000,
            send_interval_ms: 50,
            send_chunk_bytes: 8192,
        }
    }
}

impl RelayConfig {
    /// Inclusive range of ports to try.
    pub fn port_range(&self) -> (u16, u16) {
        let last = self.port_search_max.unwrap_or(self.port).max(self.port);
        (self.port, last)
    }

    /// Handshake timeout as a [`Duration`].
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Send interval as a [`Duration`].
    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(self.send_interval_ms)
    }
}

/// Split-point search timing, all in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    /// How far before the metadata change to search for silence.
    pub search_window_1_ms: u32,
    /// How far after the metadata change to search for silence.
    pub search_window_2_ms: u32,
    /// Minimum length of the silent run.
    pub silence_length_ms: u32,
    /// Extra audio kept at the end of the previous track.
    pub padding_1_ms: u32,
    /// Extra audio kept at the start of the next track.
    pub padding_2_ms: u32,
    /// Shifts the search region relative to the metadata change. May be negative.
    pub offset_ms: i32,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            search_window_1_ms: 6000,
            search_window_2_ms: 6000,
            silence_length_ms: 1000,
            padding_1_ms: 300,
            padding_2_ms: 300,
            offset_ms: 0,
        }
    }
}

/// Configuration for a ripping session.
///
/// Use [`RipConfig::default()`] for sensible defaults, or customize as needed.
///
/// # Example
///
/// ```
/// use stream_rip::{OverwritePolicy, RipConfig};
///
/// let config = RipConfig {
///     overwrite: OverwritePolicy::Always,
///     max_bytes_ripped: Some(50 * 1024 * 1024),
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RipConfig {
    /// Reconnect after recoverable errors.
    ///
    /// Default: true
    pub auto_reconnect: bool,

    /// Pause before each reconnect attempt.
    ///
    /// Default: 1000ms
    pub reconnect_delay_ms: u64,

    /// Receive timeout on the upstream socket.
    ///
    /// Default: 15000ms
    pub recv_timeout_ms: u64,

    /// Connect timeout for the upstream socket.
    ///
    /// Default: 10000ms
    pub connect_timeout_ms: u64,

    /// `User-Agent` sent upstream.
    pub user_agent: String,

    /// HTTP proxy URL, optionally with `user:pass@` credentials.
    pub proxy: Option<String>,

    /// Redirects plus playlist hops allowed per connect.
    ///
    /// Default: 5
    pub max_hops: u32,

    /// Relay server settings.
    pub relay: RelayConfig,

    /// Split-point search timing.
    pub split: SplitConfig,

    /// Stop once this many audio bytes have been ripped.
    pub max_bytes_ripped: Option<u64>,

    /// Policy for existing files with the same name.
    ///
    /// Default: [`OverwritePolicy::Larger`]
    pub overwrite: OverwritePolicy,

    /// Metadata rules.
    pub rules: RulesSource,

    /// Character set of upstream metadata.
    pub codeset: Codeset,

    /// Append an ID3v1 tag to MP3 tracks.
    ///
    /// Default: true
    pub id3v1: bool,

    /// Prepend an ID3v2 tag to MP3 tracks.
    ///
    /// Default: true
    pub id3v2: bool,

    /// Lower bound on the ring buffer size, in chunks.
    ///
    /// Default: 8
    pub min_buffer_chunks: usize,

    /// Bitrate assumed when neither the stream nor the server reveal one.
    ///
    /// Default: 128000
    pub default_bitrate: u32,

    /// Attempts for a failed sink `start_track` or `end_track`. Writes are
    /// attempted once.
    ///
    /// Default: 3
    pub sink_retry_attempts: u32,

    /// Initial delay between sink retry attempts.
    ///
    /// Uses exponential backoff (delay doubles each attempt).
    /// Default: 100ms
    pub sink_retry_delay_ms: u64,

    /// Stop the session when a sink gives up on a track.
    ///
    /// Default: false
    pub stop_on_file_error: bool,
}

impl Default for RipConfig {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            reconnect_delay_ms: 1000,
            recv_timeout_ms: 15000,
            connect_timeout_ms: 10000,
            user_agent: concat!("stream-rip/", env!("CARGO_PKG_VERSION")).to_string(),
            proxy: None,
            max_hops: 5,
            relay: RelayConfig::default(),
            split: SplitConfig::default(),
            max_bytes_ripped: None,
            overwrite: OverwritePolicy::default(),
            rules: RulesSource::default(),
            codeset: Codeset::default(),
            id3v1: true,
            id3v2: true,
            min_buffer_chunks: 8,
            default_bitrate: 128_000,
            sink_retry_attempts: 3,
            sink_retry_delay_ms: 100,
            stop_on_file_error: false,
        }
    }
}

impl RipConfig {
    /// Parses a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`RipError::Config`] if the text is not valid TOML or has
    /// values of the wrong type.
    pub fn from_toml_str(text: &str) -> Result<Self, RipError> {
        toml::from_str(text).map_err(|e| RipError::Config(format!("parse TOML failed: {e}")))
    }

    /// Reads and parses a TOML configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`RipError::Config`] if the file can't be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RipError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| RipError::Config(format!("read {} failed: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Checks that the settings are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RipError::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<(), RipError> {
        if self.relay.enabled {
            if self.relay.send_interval_ms == 0 {
                return Err(RipError::Config("relay.send_interval_ms must be > 0".into()));
            }
            if self.relay.max_connections == 0 {
                return Err(RipError::Config(
                    "relay.max_connections must be > 0 when the relay is enabled".into(),
                ));
            }
            if self.relay.send_chunk_bytes == 0 {
                return Err(RipError::Config("relay.send_chunk_bytes must be > 0".into()));
            }
        }
        if let Some(max) = self.relay.port_search_max {
            if max < self.relay.port {
                return Err(RipError::Config(format!(
                    "relay.port_search_max ({max}) is below relay.port ({})",
                    self.relay.port
                )));
            }
        }
        let split = &self.split;
        if u64::from(split.silence_length_ms)
            > u64::from(split.search_window_1_ms) + u64::from(split.search_window_2_ms)
        {
            return Err(RipError::Config(
                "split.silence_length_ms exceeds the combined search windows".into(),
            ));
        }
        if self.default_bitrate == 0 {
            return Err(RipError::Config("default_bitrate must be > 0".into()));
        }
        Ok(())
    }

    /// Reconnect delay as a [`Duration`].
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Receive timeout as a [`Duration`].
    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms)
    }

    /// Connect timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Initial sink retry delay as a [`Duration`].
    pub fn sink_retry_delay(&self) -> Duration {
        Duration::from_millis(self.sink_retry_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rip_config_default() {
        let config = RipConfig::default();
        assert!(config.auto_reconnect);
        assert_eq!(config.reconnect_delay(), Duration::from_secs(1));
        assert_eq!(config.max_hops, 5);
        assert_eq!(config.overwrite, OverwritePolicy::Larger);
        assert_eq!(config.rules, RulesSource::Default);
        assert_eq!(config.default_bitrate, 128_000);
        assert_eq!(config.sink_retry_attempts, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_split_config_default() {
        let split = SplitConfig::default();
        assert_eq!(split.search_window_1_ms, 6000);
        assert_eq!(split.search_window_2_ms, 6000);
        assert_eq!(split.silence_length_ms, 1000);
        assert_eq!(split.padding_1_ms, 300);
        assert_eq!(split.padding_2_ms, 300);
        assert_eq!(split.offset_ms, 0);
    }

    #[test]
    fn test_relay_port_range() {
        let mut relay = RelayConfig::default();
        assert_eq!(relay.port_range(), (8000, 8000));
        relay.port_search_max = Some(8010);
        assert_eq!(relay.port_range(), (8000, 8010));
    }

    #[test]
    fn test_from_toml_partial() {
        let config = RipConfig::from_toml_str(
            r#"
            auto_reconnect = false
            overwrite = "never"
            codeset = "latin1"

            [relay]
            port = 9000
            port_search_max = 9005

            [split]
            offset_ms = -500
            "#,
        )
        .unwrap();
        assert!(!config.auto_reconnect);
        assert_eq!(config.overwrite, OverwritePolicy::Never);
        assert_eq!(config.codeset, Codeset::Latin1);
        assert_eq!(config.relay.port, 9000);
        assert_eq!(config.relay.max_connections, 8);
        assert_eq!(config.split.offset_ms, -500);
        assert_eq!(config.split.padding_1_ms, 300);
    }

    #[test]
    fn test_rules_source_from_string() {
        assert_eq!(RulesSource::from("default".to_string()), RulesSource::Default);
        assert_eq!(
            RulesSource::from("/etc/rules.txt".to_string()),
            RulesSource::File(PathBuf::from("/etc/rules.txt"))
        );
        assert!(matches!(
            RulesSource::from("m/x/e\nm/y/s\n".to_string()),
            RulesSource::Inline(_)
        ));
    }

    #[test]
    fn test_from_toml_rejects_bad_type() {
        let result = RipConfig::from_toml_str("max_hops = \"many\"");
        assert!(matches!(result, Err(RipError::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rip.toml");
        std::fs::write(&path, "max_bytes_ripped = 1000\n").unwrap();
        let config = RipConfig::load(&path).unwrap();
        assert_eq!(config.max_bytes_ripped, Some(1000));
    }

    #[test]
    fn test_validate_rejects_inconsistent_settings() {
        let mut config = RipConfig::default();
        config.relay.send_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = RipConfig::default();
        config.relay.port_search_max = Some(7999);
        assert!(config.validate().is_err());

        let mut config = RipConfig::default();
        config.split.silence_length_ms = 20_000;
        assert!(config.validate().is_err());

        let mut config = RipConfig::default();
        config.relay.max_connections = 0;
        assert!(config.validate().is_err());
        config.relay.enabled = false;
        assert!(config.validate().is_ok());
    }
}
