//! Configuration for chitra-scan
//!
//! Loads configuration from a TOML file: declared devices (no auto-discovery),
//! engine timing/retry bounds, and default scan settings for the CLI.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    /// Declared scanner devices
    #[serde(default, rename = "device")]
    pub devices: Vec<DeviceConfig>,
    #[serde(default)]
    pub scan: ScanDefaults,
}

/// Engine timing and retry bounds
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Transport receive timeout in milliseconds
    pub timeout_ms: u64,
    /// Sleep between warm-up retries in milliseconds
    pub warmup_wait_ms: u64,
    /// Maximum warm-up retries before giving up with a busy error
    pub warmup_max_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            warmup_wait_ms: 5_000,
            warmup_max_retries: 6,
        }
    }
}

impl EngineConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn warmup_wait(&self) -> Duration {
        Duration::from_millis(self.warmup_wait_ms)
    }
}

/// Transport selection for a declared device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Framed TCP (network scanner)
    Tcp,
    /// SCSI generic device node, commands wrapped in read/write CDBs
    Scsi,
    /// USB bulk device node, raw pass-through
    Usb,
}

/// One declared scanner
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceConfig {
    /// Registry name, e.g. "office"
    pub name: String,
    pub transport: TransportKind,
    /// `host:port` for tcp devices
    #[serde(default)]
    pub address: Option<String>,
    /// Device node path for scsi/usb devices
    #[serde(default)]
    pub path: Option<String>,
    /// Overrides the model name reported by the device, mainly for
    /// exercising quirk entries against misreporting firmware
    #[serde(default)]
    pub model_override: Option<String>,
}

/// Default scan settings used by the CLI when flags are not given
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScanDefaults {
    /// Resolution in DPI
    pub resolution: u32,
    /// "binary", "gray" or "color"
    pub mode: String,
    /// Bit depth (1, 8 or 16)
    pub depth: u8,
    /// Scan area in millimeters: left, top, width, height
    pub area_mm: [f64; 4],
}

impl Default for ScanDefaults {
    fn default() -> Self {
        Self {
            resolution: 300,
            mode: "color".to_string(),
            depth: 8,
            area_mm: [0.0, 0.0, 210.0, 297.0],
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            devices: Vec::new(),
            scan: ScanDefaults::default(),
        }
    }
}
