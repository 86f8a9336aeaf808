use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::ComponentIndex;
use crate::error::ConfigError;

/// Runtime settings for one bridge channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub decode_thread_name: String,
    pub component: ComponentIndex,
    pub keep_alive_decoding: bool,
    /// How long to wait for a free decoder input buffer
    pub input_timeout_ms: u64,
    /// Lower bound for the decoder's max input size
    pub min_max_input_size: usize,
    /// Bounded wait for the final teardown on stop
    pub shutdown_timeout_ms: u64,
    pub default_width: u32,
    pub default_height: u32,
    pub default_frame_rate: u32,
    pub log: LogIntervals,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            decode_thread_name: "stream-bridge-decode".to_string(),
            component: ComponentIndex::LeftOrMain,
            keep_alive_decoding: true,
            input_timeout_ms: 10,
            min_max_input_size: 4 * 1024 * 1024,
            shutdown_timeout_ms: 250,
            default_width: 1280,
            default_height: 720,
            default_frame_rate: 30,
            log: LogIntervals::default(),
        }
    }
}

impl BridgeConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn input_timeout(&self) -> Duration {
        Duration::from_millis(self.input_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Throttle intervals (milliseconds) for repeated diagnostics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogIntervals {
    pub rx_ms: u64,
    pub packet_ms: u64,
    pub resolve_ms: u64,
    pub wait_csd_ms: u64,
    pub no_input_ms: u64,
    pub skip_render_ms: u64,
    pub drain_stats_ms: u64,
}

impl Default for LogIntervals {
    fn default() -> Self {
        Self {
            rx_ms: 1000,
            packet_ms: 1000,
            resolve_ms: 2000,
            wait_csd_ms: 1500,
            no_input_ms: 2000,
            skip_render_ms: 1000,
            drain_stats_ms: 1000,
        }
    }
}

impl LogIntervals {
    pub fn rx(&self) -> Duration {
        Duration::from_millis(self.rx_ms)
    }
    pub fn packet(&self) -> Duration {
        Duration::from_millis(self.packet_ms)
    }
    pub fn resolve(&self) -> Duration {
        Duration::from_millis(self.resolve_ms)
    }
    pub fn wait_csd(&self) -> Duration {
        Duration::from_millis(self.wait_csd_ms)
    }
    pub fn no_input(&self) -> Duration {
        Duration::from_millis(self.no_input_ms)
    }
    pub fn skip_render(&self) -> Duration {
        Duration::from_millis(self.skip_render_ms)
    }
    pub fn drain_stats(&self) -> Duration {
        Duration::from_millis(self.drain_stats_ms)
    }
}
