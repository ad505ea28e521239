//! Tool configuration: bus selection and protocol timings.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Kind of CAN adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interface {
    /// Serial-line adapter speaking slcan.
    Slcan,
    /// Linux kernel CAN interface.
    Socketcan,
}

impl std::fmt::Display for Interface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Interface::Slcan => write!(f, "slcan"),
            Interface::Socketcan => write!(f, "socketcan"),
        }
    }
}

/// Which bus to open and how.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub interface: Interface,
    /// Serial device or kernel interface name.
    pub channel: String,
    /// Bitrate in bit/s.
    pub bitrate: u32,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            interface: Interface::Slcan,
            channel: "/dev/ttyACM0".to_string(),
            bitrate: 500_000,
        }
    }
}

/// Every wait and pause of the protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    /// Single bus receive.
    pub recv_timeout_ms: u64,
    /// Command, sub-sector and sector CRC acknowledgements.
    pub ack_timeout_ms: u64,
    /// State, loop and version replies.
    pub reply_timeout_ms: u64,
    /// Vector table CRC acknowledgement; the target finalises flash here.
    pub vector_crc_timeout_ms: u64,
    /// Second acknowledgement of the run command.
    pub run_ack_timeout_ms: u64,
    /// Passive wait for the application state frame.
    pub app_state_window_ms: u64,
    /// Pause after every data word so the adapter TX buffer does not overflow.
    pub data_pause_us: u64,
    /// Pause before the first data word of a sector.
    pub sector_setup_pause_ms: u64,
    /// Pause before each sector.
    pub inter_sector_pause_ms: u64,
    /// Pause between flash attempts.
    pub retry_pause_ms: u64,
    /// Wait after the reset acknowledgement.
    pub reset_settle_ms: u64,
    pub reset_poll_interval_ms: u64,
    pub reset_poll_attempts: u32,
    /// Wait after the run acknowledgement before probing the application.
    pub launch_delay_ms: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            recv_timeout_ms: 100,
            ack_timeout_ms: 1_000,
            reply_timeout_ms: 1_000,
            vector_crc_timeout_ms: 10_000,
            run_ack_timeout_ms: 10_000,
            app_state_window_ms: 2_000,
            data_pause_us: 100,
            sector_setup_pause_ms: 10,
            inter_sector_pause_ms: 300,
            retry_pause_ms: 1_000,
            reset_settle_ms: 15_000,
            reset_poll_interval_ms: 1_000,
            reset_poll_attempts: 10,
            launch_delay_ms: 2_000,
        }
    }
}

impl Timings {
    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    pub fn vector_crc_timeout(&self) -> Duration {
        Duration::from_millis(self.vector_crc_timeout_ms)
    }

    pub fn run_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.run_ack_timeout_ms)
    }

    pub fn app_state_window(&self) -> Duration {
        Duration::from_millis(self.app_state_window_ms)
    }

    pub fn data_pause(&self) -> Duration {
        Duration::from_micros(self.data_pause_us)
    }

    pub fn sector_setup_pause(&self) -> Duration {
        Duration::from_millis(self.sector_setup_pause_ms)
    }

    pub fn inter_sector_pause(&self) -> Duration {
        Duration::from_millis(self.inter_sector_pause_ms)
    }

    pub fn retry_pause(&self) -> Duration {
        Duration::from_millis(self.retry_pause_ms)
    }

    pub fn reset_settle(&self) -> Duration {
        Duration::from_millis(self.reset_settle_ms)
    }

    pub fn reset_poll_interval(&self) -> Duration {
        Duration::from_millis(self.reset_poll_interval_ms)
    }

    pub fn launch_delay(&self) -> Duration {
        Duration::from_millis(self.launch_delay_ms)
    }
}

/// Configuration of a flashing tool run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Directory holding the build artifacts.
    pub artifacts_dir: Option<PathBuf>,
    pub bus: BusConfig,
    pub timings: Timings,
}

impl ToolConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ToolConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
