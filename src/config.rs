//! # Printer Configuration
//!
//! Everything the host needs to drive a board is read from one TOML file.
//!
//! ## Example
//!
//! ```toml
//! [mcu]
//! serial = "/dev/ttyO1"
//! baud = 115200
//!
//! [printer]
//! homing-timeout = 10.0
//!
//! [printer.print-queue]
//! min-length = 50
//! max-length = 100
//!
//! [x-axis]
//! motor = 0
//! steps-per-mm = 80.0
//! current = 1.2
//! max-speed = 50.0
//! max-acceleration = 500.0
//! bow-acceleration = 100.0
//!
//! [x-axis.end-stops.left]
//! polarity = "negative"
//!
//! [x-axis.end-stops.right]
//! polarity = "virtual"
//! position = 200.0
//! ```
//!
//! Durations are given in seconds. Axis sections are optional at parse time;
//! the printer refuses to configure without them.

// src/config.rs - Single configuration file
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::communication::ChannelSettings;
use crate::communication::serial::DEFAULT_BAUD;
use crate::hardware::FlowControl;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("{key} must be a finite, non-negative number of seconds, got {value}")]
    InvalidDuration { key: &'static str, value: f64 },
}

/// Main configuration struct: board link, printer behaviour and the two axes.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub mcu: McuConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub printer: PrinterConfig,
    #[serde(default, rename = "x-axis")]
    pub x_axis: Option<AxisSettings>,
    #[serde(default, rename = "y-axis")]
    pub y_axis: Option<AxisSettings>,
}

/// Serial port of the motion board.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct McuConfig {
    #[serde(default = "default_serial")]
    pub serial: String,
    #[serde(default = "default_baud")]
    pub baud: u32,
}

impl Default for McuConfig {
    fn default() -> Self {
        Self {
            serial: default_serial(),
            baud: default_baud(),
        }
    }
}

/// Protocol timing and the board buffer watermarks used in batch mode.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ChannelConfig {
    #[serde(default = "default_reply_timeout")]
    pub reply_timeout: f64,
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout: f64,
    /// Buffered commands required before the board queue is started.
    #[serde(default = "default_min_command_buffer")]
    pub min_command_buffer: i64,
    /// Free buffer slots kept in reserve while the queue runs.
    #[serde(default = "default_max_command_buffer")]
    pub max_command_buffer: i64,
    #[serde(default = "default_buffer_poll_interval")]
    pub buffer_poll_interval: f64,
    #[serde(default)]
    pub buffer_drain_timeout: Option<f64>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            reply_timeout: default_reply_timeout(),
            startup_timeout: default_startup_timeout(),
            min_command_buffer: default_min_command_buffer(),
            max_command_buffer: default_max_command_buffer(),
            buffer_poll_interval: default_buffer_poll_interval(),
            buffer_drain_timeout: None,
        }
    }
}

impl ChannelConfig {
    pub fn channel_settings(&self) -> Result<ChannelSettings, ConfigError> {
        Ok(ChannelSettings {
            reply_timeout: seconds("reply-timeout", self.reply_timeout)?,
            startup_timeout: seconds("startup-timeout", self.startup_timeout)?,
            ..ChannelSettings::default()
        })
    }

    pub fn flow_control(&self) -> Result<FlowControl, ConfigError> {
        Ok(FlowControl {
            min_command_buffer: self.min_command_buffer,
            max_command_buffer: self.max_command_buffer,
            poll_interval: seconds("buffer-poll-interval", self.buffer_poll_interval)?,
            drain_timeout: self
                .buffer_drain_timeout
                .map(|value| seconds("buffer-drain-timeout", value))
                .transpose()?,
        })
    }
}

/// Printer-level configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct PrinterConfig {
    #[serde(default = "default_homing_timeout")]
    pub homing_timeout: f64,
    /// Feed rate used when neither the move nor any earlier move names one.
    #[serde(default)]
    pub default_feed_rate: Option<f64>,
    #[serde(default)]
    pub print_queue: PrintQueueConfig,
}

impl Default for PrinterConfig {
    fn default() -> Self {
        Self {
            homing_timeout: default_homing_timeout(),
            default_feed_rate: None,
            print_queue: PrintQueueConfig::default(),
        }
    }
}

impl PrinterConfig {
    pub fn homing_timeout(&self) -> Result<Duration, ConfigError> {
        seconds("homing-timeout", self.homing_timeout)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct PrintQueueConfig {
    #[serde(default = "default_min_length")]
    pub min_length: usize,
    #[serde(default = "default_max_length")]
    pub max_length: usize,
}

impl Default for PrintQueueConfig {
    fn default() -> Self {
        Self {
            min_length: default_min_length(),
            max_length: default_max_length(),
        }
    }
}

/// Raw per-axis settings as written in the file, lengths in mm.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct AxisSettings {
    pub motor: u8,
    pub steps_per_mm: f64,
    pub current: f64,
    pub max_speed: f64,
    pub max_acceleration: f64,
    pub bow_acceleration: f64,
    #[serde(default)]
    pub home_speed: Option<f64>,
    #[serde(default)]
    pub home_precision_speed: Option<f64>,
    #[serde(default)]
    pub home_acceleration: Option<f64>,
    #[serde(default)]
    pub end_stops: EndStopsSettings,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EndStopsSettings {
    #[serde(default)]
    pub left: Option<EndStopSettings>,
    #[serde(default)]
    pub right: Option<EndStopSettings>,
}

/// `polarity` is `positive`, `negative` or `virtual`; virtual end stops need a
/// `position`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EndStopSettings {
    pub polarity: String,
    #[serde(default)]
    pub position: Option<f64>,
}

fn seconds(key: &'static str, value: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value).map_err(|_| ConfigError::InvalidDuration { key, value })
}

fn default_serial() -> String { "/dev/ttyO1".to_string() }
fn default_baud() -> u32 { DEFAULT_BAUD }
fn default_reply_timeout() -> f64 { 5.0 }
fn default_startup_timeout() -> f64 { 5.0 }
fn default_min_command_buffer() -> i64 { 10 }
fn default_max_command_buffer() -> i64 { 3 }
fn default_buffer_poll_interval() -> f64 { 0.1 }
fn default_homing_timeout() -> f64 { 10.0 }
fn default_min_length() -> usize { 50 }
fn default_max_length() -> usize { 100 }

/// Load configuration from a TOML file.
pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    Ok(config)
}
