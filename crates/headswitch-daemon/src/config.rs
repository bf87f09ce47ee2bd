//! Daemon configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use headswitch_core::{DevicePair, SwitchSettings};
use headswitch_hid::ReceiverProfile;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Daemon settings
    #[serde(default)]
    pub daemon: DaemonConfig,
    /// Receiver identity and polling
    #[serde(default)]
    pub receiver: ReceiverConfig,
    /// Endpoint pairs
    #[serde(default)]
    pub switching: SwitchingConfig,
    /// External audio relay
    #[serde(default)]
    pub relay: RelayConfig,
}

/// Daemon-specific settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self { log_level: default_log_level() }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Receiver settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiverConfig {
    /// USB Vendor ID
    #[serde(default = "default_vid")]
    pub vendor_id: String,
    /// USB Product ID, `0000` for any product from the vendor
    #[serde(default = "default_pid")]
    pub product_id: String,
    /// HID usage page of the control interface
    #[serde(default = "default_usage_page")]
    pub usage_page: String,
    /// Output report length when the descriptor cannot be read
    #[serde(default = "default_report_length")]
    pub report_length: usize,
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            vendor_id: default_vid(),
            product_id: default_pid(),
            usage_page: default_usage_page(),
            report_length: default_report_length(),
            read_timeout_ms: default_read_timeout(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

fn default_vid() -> String {
    "046d".to_string()
}

fn default_pid() -> String {
    "0af7".to_string()
}

fn default_usage_page() -> String {
    "ff43".to_string()
}

fn default_report_length() -> usize {
    64
}

fn default_read_timeout() -> u64 {
    200
}

fn default_poll_interval() -> u64 {
    150
}

impl ReceiverConfig {
    /// Probe profile for these settings.
    ///
    /// # Errors
    /// Returns an error if an id is not a 16-bit hex number.
    pub fn profile(&self) -> Result<ReceiverProfile> {
        Ok(ReceiverProfile {
            vendor_id: parse_hex(&self.vendor_id).context("Invalid receiver.vendor_id")?,
            product_id: parse_hex(&self.product_id).context("Invalid receiver.product_id")?,
            usage_page: parse_hex(&self.usage_page).context("Invalid receiver.usage_page")?,
            report_length: self.report_length,
            read_timeout: Duration::from_millis(self.read_timeout_ms),
        })
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn parse_hex(value: &str) -> Result<u16> {
    let digits = value.trim().trim_start_matches("0x").trim_start_matches("0X");
    u16::from_str_radix(digits, 16).with_context(|| format!("not a hex id: {value:?}"))
}

/// Endpoint pairs, as enumeration ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchingConfig {
    /// Whether automatic switching starts enabled
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub primary_speaker: Option<String>,
    pub secondary_speaker: Option<String>,
    pub primary_mic: Option<String>,
    pub secondary_mic: Option<String>,
}

impl Default for SwitchingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            primary_speaker: None,
            secondary_speaker: None,
            primary_mic: None,
            secondary_mic: None,
        }
    }
}

impl SwitchingConfig {
    #[must_use]
    pub fn to_settings(&self) -> SwitchSettings {
        SwitchSettings {
            enabled: self.enabled,
            speaker: DevicePair {
                primary: self.primary_speaker.clone(),
                secondary: self.secondary_speaker.clone(),
            },
            microphone: DevicePair { primary: self.primary_mic.clone(), secondary: self.secondary_mic.clone() },
        }
    }
}

/// Relay settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Launch and drive the relay
    #[serde(default)]
    pub enabled: bool,
    /// Relay executable
    #[serde(default = "default_relay_program")]
    pub program: PathBuf,
    /// Control endpoint the relay serves: a named pipe on Windows, a Unix
    /// socket elsewhere
    #[serde(default = "default_relay_endpoint")]
    pub endpoint: PathBuf,
    /// Virtual device apps play into; the relay captures from it
    pub capture_device: Option<String>,
    /// Virtual device the relay writes microphone audio to
    pub mic_output_device: Option<String>,
    #[serde(default = "default_buffer")]
    pub buffer_ms: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            program: default_relay_program(),
            endpoint: default_relay_endpoint(),
            capture_device: None,
            mic_output_device: None,
            buffer_ms: default_buffer(),
        }
    }
}

fn default_relay_program() -> PathBuf {
    PathBuf::from("audio-proxy")
}

fn default_relay_endpoint() -> PathBuf {
    headswitch_ipc::endpoint_path()
}

fn default_buffer() -> u32 {
    headswitch_ipc::controller::DEFAULT_BUFFER_MS
}

fn default_true() -> bool {
    true
}

/// Load configuration from file or defaults.
pub fn load_config() -> Result<Config> {
    load_config_from(&config_path()?)
}

fn load_config_from(config_path: &Path) -> Result<Config> {
    if config_path.exists() {
        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {config_path:?}"))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {config_path:?}"))?;
        Ok(config)
    } else {
        info!(?config_path, "Config file not found, using defaults");
        Ok(Config::default())
    }
}

/// Get the configuration file path.
fn config_path() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("com", "headswitch", "Headswitch")
        .context("Could not determine config directory")?;
    Ok(dirs.config_dir().join("config.toml"))
}
