//! Configuration for mover-link
//!
//! Loads link, exchange, poll and logging settings from a TOML file. Every
//! section is optional; missing values fall back to the defaults used by the
//! OpenMover controller (115200 8N1 over USB serial).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub waypoints: WaypointConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which transport carries the link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Local serial port
    #[default]
    Serial,
    /// Raw TCP socket (bytes pass through unchanged)
    Tcp,
    /// Telnet-style serial-over-network
    Telnet,
}

/// Serial parity setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParitySetting {
    #[default]
    None,
    Odd,
    Even,
}

/// Transport configuration
///
/// Serial fields are ignored for network kinds and vice versa.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LinkConfig {
    #[serde(default)]
    pub kind: TransportKind,

    /// Serial port path (e.g., "/dev/ttyUSB0", "COM3")
    #[serde(default = "default_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Data bits per byte (5-8)
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,

    #[serde(default)]
    pub parity: ParitySetting,

    /// Stop bits (1 or 2)
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,

    /// Upper bound on a single blocking read from the OS handle
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Remote host for tcp/telnet kinds
    #[serde(default = "default_host")]
    pub host: String,

    /// Remote port for tcp/telnet kinds
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

/// Exchange engine configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExchangeConfig {
    /// How long to wait for a response after writing a command
    #[serde(default = "default_exchange_timeout_ms")]
    pub timeout_ms: u64,
}

/// Poll session configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PollConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,

    /// Add a `_ts` field (unix milliseconds) to every logged sample
    #[serde(default)]
    pub timestamp_samples: bool,
}

/// Waypoint upload configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WaypointConfig {
    /// Send altitude as a third component per coordinate
    ///
    /// The stock controller stores lon/lat pairs only, so this is off.
    #[serde(default)]
    pub include_altitude: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_port() -> String {
    "/dev/ttyUSB0".to_string()
}
fn default_baud_rate() -> u32 {
    115200
}
fn default_data_bits() -> u8 {
    8
}
fn default_stop_bits() -> u8 {
    1
}
fn default_read_timeout_ms() -> u64 {
    100
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_tcp_port() -> u16 {
    4000
}
fn default_connect_timeout_ms() -> u64 {
    3000
}
fn default_exchange_timeout_ms() -> u64 {
    2000
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::default(),
            port: default_port(),
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            parity: ParitySetting::default(),
            stop_bits: default_stop_bits(),
            read_timeout_ms: default_read_timeout_ms(),
            host: default_host(),
            tcp_port: default_tcp_port(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_exchange_timeout_ms(),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval_ms(),
            timestamp_samples: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl LinkConfig {
    /// Human-readable endpoint (port path or host:port)
    pub fn target(&self) -> String {
        match self.kind {
            TransportKind::Serial => self.port.clone(),
            TransportKind::Tcp | TransportKind::Telnet => {
                format!("{}:{}", self.host, self.tcp_port)
            }
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl ExchangeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Config {
    /// Load configuration from TOML file
    ///
    /// # Example
    /// ```no_run
    /// use mover_link::config::Config;
    ///
    /// let config = Config::load("mover.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Reject values the transport or scheduler cannot honor
    pub fn validate(&self) -> Result<()> {
        let link = &self.link;
        if !(5..=8).contains(&link.data_bits) {
            return Err(Error::Config(format!(
                "data_bits must be 5-8, got {}",
                link.data_bits
            )));
        }
        if link.stop_bits != 1 && link.stop_bits != 2 {
            return Err(Error::Config(format!(
                "stop_bits must be 1 or 2, got {}",
                link.stop_bits
            )));
        }
        if link.baud_rate == 0 {
            return Err(Error::Config("baud_rate must be non-zero".into()));
        }
        if link.read_timeout_ms == 0 {
            return Err(Error::Config("read_timeout_ms must be non-zero".into()));
        }
        if self.exchange.timeout_ms == 0 {
            return Err(Error::Config("exchange timeout_ms must be non-zero".into()));
        }
        if self.poll.interval_ms == 0 {
            return Err(Error::Config("poll interval_ms must be non-zero".into()));
        }
        if link.kind != TransportKind::Serial && link.host.is_empty() {
            return Err(Error::Config("host is required for network links".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.link.kind, TransportKind::Serial);
        assert_eq!(config.link.baud_rate, 115200);
        assert_eq!(config.link.data_bits, 8);
        assert_eq!(config.link.parity, ParitySetting::None);
        assert_eq!(config.link.stop_bits, 1);
        assert_eq!(config.exchange.timeout_ms, 2000);
        assert_eq!(config.poll.interval_ms, 1000);
        assert!(!config.waypoints.include_altitude);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_content = r#"
[link]
kind = "telnet"
host = "192.168.4.1"
tcp_port = 23

[exchange]
timeout_ms = 500

[poll]
interval_ms = 250
timestamp_samples = true

[logging]
level = "debug"
"#;

        let config = Config::from_toml(toml_content).unwrap();
        assert_eq!(config.link.kind, TransportKind::Telnet);
        assert_eq!(config.link.target(), "192.168.4.1:23");
        // Unspecified serial settings keep their defaults
        assert_eq!(config.link.baud_rate, 115200);
        assert_eq!(config.exchange.timeout(), Duration::from_millis(500));
        assert_eq!(config.poll.interval(), Duration::from_millis(250));
        assert!(config.poll.timestamp_samples);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_empty_toml_is_default() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.link.port, "/dev/ttyUSB0");
        assert_eq!(config.link.target(), "/dev/ttyUSB0");
    }

    #[test]
    fn test_rejects_bad_serial_options() {
        let err = Config::from_toml("[link]\ndata_bits = 9\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = Config::from_toml("[link]\nstop_bits = 3\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = Config::from_toml("[link]\nparity = \"mark\"\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_rejects_zero_timeouts() {
        let err = Config::from_toml("[exchange]\ntimeout_ms = 0\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = Config::from_toml("[poll]\ninterval_ms = 0\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mover.toml");

        let mut config = Config::default();
        config.link.kind = TransportKind::Tcp;
        config.link.tcp_port = 7000;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.link.kind, TransportKind::Tcp);
        assert_eq!(loaded.link.tcp_port, 7000);
    }
}
