//! Configuration types and loading
//!
//! Defines the bridge configuration: device selection, UDP endpoint, axis
//! correction, output defaults and which optional activities run.

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::axis::{AxisCorrector, DEFAULT_DEADZONE};
use crate::frame::{Color, ControlSettings, Flash, Haptic, Volume, DEFAULT_POLL_RATE};

/// Config directory name under the platform config dir
pub const CONFIG_DIR_NAME: &str = "dualsense-bridge";
/// Config file name
pub const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Degenerate axis range: min={min} max={max} deadzone={deadzone} leaves no span")]
    DegenerateAxis { min: i32, max: i32, deadzone: i32 },

    #[error("Negative deadzone: {0}")]
    NegativeDeadzone(i32),

    #[error("Poll rate {0} does not fit in 6 bits (0-63)")]
    PollRate(u8),

    #[error("Stats interval must be at least one second")]
    StatsInterval,

    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Root configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// hidraw device path; hidapi discovery when absent
    #[serde(default)]
    pub device: Option<PathBuf>,

    /// Address the UDP socket binds to
    #[serde(default = "default_bind")]
    pub bind: IpAddr,

    /// UDP port clients subscribe on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Report interval byte sent in control frames (0-63)
    #[serde(default = "default_poll_rate")]
    pub poll_rate: u8,

    /// Stick correction range
    #[serde(default)]
    pub axis: AxisConfig,

    /// Lightbar color
    #[serde(default = "default_color")]
    pub color: Color,

    /// Headphone and speaker volume
    #[serde(default)]
    pub volume: Volume,

    /// Lightbar flash timing
    #[serde(default)]
    pub flash: Flash,

    /// Rumble pulse sent at startup
    #[serde(default)]
    pub haptic_warmup: WarmupConfig,

    /// Track report counter gaps
    #[serde(default = "default_true")]
    pub loss_accounting: bool,

    /// Seconds between throughput reports
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,

    /// Stream audio from stdin to the controller
    #[serde(default)]
    pub audio: bool,
}

fn default_bind() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    9999
}

fn default_poll_rate() -> u8 {
    DEFAULT_POLL_RATE
}

fn default_color() -> Color {
    Color::new(0, 0, 255)
}

fn default_true() -> bool {
    true
}

fn default_stats_interval() -> u64 {
    10
}

/// Axis correction range
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AxisConfig {
    #[serde(default)]
    pub min: i32,
    #[serde(default = "default_axis_max")]
    pub max: i32,
    #[serde(default = "default_deadzone")]
    pub deadzone: i32,
}

fn default_axis_max() -> i32 {
    255
}

fn default_deadzone() -> i32 {
    DEFAULT_DEADZONE
}

impl Default for AxisConfig {
    fn default() -> Self {
        Self {
            min: 0,
            max: default_axis_max(),
            deadzone: default_deadzone(),
        }
    }
}

/// Startup rumble pulse
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WarmupConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub large: u8,
    #[serde(default = "default_warmup_small")]
    pub small: u8,
    #[serde(default = "default_warmup_duration")]
    pub duration_ms: u64,
}

fn default_warmup_small() -> u8 {
    0xFF
}

fn default_warmup_duration() -> u64 {
    1000
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            large: 0,
            small: default_warmup_small(),
            duration_ms: default_warmup_duration(),
        }
    }
}

impl WarmupConfig {
    pub fn haptic(&self) -> Haptic {
        Haptic {
            large: self.large,
            small: self.small,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: None,
            bind: default_bind(),
            port: default_port(),
            poll_rate: default_poll_rate(),
            axis: AxisConfig::default(),
            color: default_color(),
            volume: Volume::default(),
            flash: Flash::default(),
            haptic_warmup: WarmupConfig::default(),
            loss_accounting: true,
            stats_interval_secs: default_stats_interval(),
            audio: false,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load from `path` if given, else the user config file if it exists, else defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match default_path() {
            Some(path) if path.exists() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }

    /// Save configuration to a JSON file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings that would fail later on the hot path
    pub fn validate(&self) -> Result<AxisCorrector, ConfigError> {
        if self.poll_rate > 0x3F {
            return Err(ConfigError::PollRate(self.poll_rate));
        }
        if self.stats_interval_secs == 0 {
            return Err(ConfigError::StatsInterval);
        }
        AxisCorrector::new(self.axis.min, self.axis.max, self.axis.deadzone)
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }

    /// Control frame settings with motors off
    pub fn control_settings(&self) -> ControlSettings {
        ControlSettings {
            poll_rate: self.poll_rate,
            color: self.color,
            haptic: Haptic::OFF,
            flash: self.flash,
            volume: self.volume,
        }
    }
}

/// `<config dir>/dualsense-bridge/config.json`
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = Config::default();
        assert_eq!(config.port, 9999);
        assert_eq!(config.validate().unwrap(), AxisCorrector::standard());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: Config =
            serde_json::from_str(r#"{ "port": 7000, "axis": { "deadzone": 8 } }"#).unwrap();
        assert_eq!(config.port, 7000);
        assert_eq!(config.axis.max, 255);
        assert_eq!(config.axis.deadzone, 8);
        assert!(config.haptic_warmup.enabled);
        assert_eq!(config.color, Color::new(0, 0, 255));
        assert!(config.loss_accounting);
    }

    #[test]
    fn test_degenerate_axis_rejected_at_validate() {
        let mut config = Config::default();
        config.axis = AxisConfig {
            min: 128,
            max: 128,
            deadzone: 0,
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DegenerateAxis { .. })
        ));
    }

    #[test]
    fn test_poll_rate_rejected() {
        let config = Config {
            poll_rate: 64,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::PollRate(64))));
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join(format!("dsb-config-{}.json", std::process::id()));
        let config = Config {
            port: 12345,
            audio: true,
            ..Config::default()
        };
        config.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.port, 12345);
        assert!(loaded.audio);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_load_errors() {
        assert!(matches!(
            Config::load("/nonexistent/config.json"),
            Err(ConfigError::Read { .. })
        ));
        let path = std::env::temp_dir().join(format!("dsb-bad-{}.json", std::process::id()));
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse { .. })));
        std::fs::remove_file(&path).unwrap();
    }
}
