//! Daemon configuration.
//!
//! Loaded from a TOML file with one section per subsystem. Every section
//! rejects unknown keys so a misspelled option fails at load time, and
//! `validate` catches values that parse but cannot work.

use crate::errors::{PlotError, Result};
use crate::types::CanvasOptions;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DaemonConfig {
    #[serde(default)]
    pub machine: MachineConfig,
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub compiler: CanvasOptions,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub bus: BusConfig,
}

/// Physical machine extents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MachineConfig {
    /// Bed width in mm.
    #[serde(default = "default_dimension")]
    pub x_dimension: f64,
    /// Bed depth in mm.
    #[serde(default = "default_dimension")]
    pub y_dimension: f64,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            x_dimension: default_dimension(),
            y_dimension: default_dimension(),
        }
    }
}

/// Controller link settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SerialConfig {
    /// Device path of the serial port.
    #[serde(default = "default_serial_path")]
    pub serial_path: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Per-command response deadline, ms.
    #[serde(default = "default_command_timeout")]
    pub command_timeout: u64,
    /// Replace the serial link with the deterministic simulator.
    #[serde(default)]
    pub dev_mode: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            serial_path: default_serial_path(),
            baud_rate: default_baud_rate(),
            command_timeout: default_command_timeout(),
            dev_mode: false,
        }
    }
}

/// Scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct JobsConfig {
    /// Minimum interval between `job:progress` events, ms.
    #[serde(default = "default_progress_interval")]
    pub progress_update_interval_ms: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            progress_update_interval_ms: default_progress_interval(),
        }
    }
}

/// Event bus settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BusConfig {
    /// Liveness probe period, seconds.
    #[serde(default = "default_heartbeat")]
    pub heartbeat_interval_secs: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat(),
        }
    }
}

fn default_dimension() -> f64 {
    480.0
}

fn default_serial_path() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_command_timeout() -> u64 {
    5000
}

fn default_progress_interval() -> u64 {
    500
}

fn default_heartbeat() -> u64 {
    30
}

impl DaemonConfig {
    /// Parse a TOML document.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: DaemonConfig =
            toml::from_str(text).map_err(|e| PlotError::parse(format!("config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Reject values that parse but cannot drive the machine.
    pub fn validate(&self) -> Result<()> {
        if self.machine.x_dimension <= 0.0 || self.machine.y_dimension <= 0.0 {
            return Err(PlotError::parse("machine dimensions must be positive"));
        }
        if self.compiler.canvas_width <= 0.0 || self.compiler.canvas_height <= 0.0 {
            return Err(PlotError::parse("canvas dimensions must be positive"));
        }
        if self.compiler.margin < 0.0 {
            return Err(PlotError::parse("margin must not be negative"));
        }
        if self.compiler.canvas_width - 2.0 * self.compiler.margin <= 0.0
            || self.compiler.canvas_height - 2.0 * self.compiler.margin <= 0.0
        {
            return Err(PlotError::parse("margins leave no drawable area"));
        }
        if self.compiler.travel_speed == 0 || self.compiler.draw_speed == 0 {
            return Err(PlotError::parse("feed rates must be positive"));
        }
        if self.serial.baud_rate == 0 {
            return Err(PlotError::parse("baud rate must be positive"));
        }
        if self.serial.command_timeout == 0 {
            return Err(PlotError::parse("command timeout must be positive"));
        }
        Ok(())
    }
}
