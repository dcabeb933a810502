use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::platform;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// TCP port of the control socket.
    #[serde(default = "default_control_port")]
    pub control_port: u16,
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,
}

/// Local HTTP server that hands catalog payloads to mpv.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_blob_port")]
    pub blob_port: u16,
}

/// Tunables of the player state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    #[serde(default = "default_volume")]
    pub default_volume: f32,
    /// Length of the simulated channel-change static.
    #[serde(default = "default_tuning_delay_ms")]
    pub tuning_delay_ms: u64,
    /// Drift tolerated before a playing track is re-seeked.
    #[serde(default = "default_resync_threshold_secs")]
    pub resync_threshold_secs: f64,
    #[serde(default = "default_volume_step")]
    pub volume_step: f32,
    /// Where the volume lands after stepping past full.
    #[serde(default = "default_volume_floor")]
    pub volume_floor: f32,
    /// Pin the on-air epoch (Unix ms) so independent processes share it.
    /// Unset = the moment the process starts.
    #[serde(default)]
    pub epoch_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Directory of the on-disk catalog.
    #[serde(default = "default_catalog_dir")]
    pub dir: PathBuf,
    /// Keep the catalog in memory only (nothing survives a restart).
    #[serde(default)]
    pub in_memory: bool,
    /// Total payload bytes the catalog accepts.
    #[serde(default = "default_quota_bytes")]
    pub quota_bytes: Option<u64>,
    #[serde(default = "default_allowed_mime_types")]
    pub allowed_mime_types: Vec<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            control_port: default_control_port(),
            log_file: default_log_file(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            blob_port: default_blob_port(),
        }
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            default_volume: default_volume(),
            tuning_delay_ms: default_tuning_delay_ms(),
            resync_threshold_secs: default_resync_threshold_secs(),
            volume_step: default_volume_step(),
            volume_floor: default_volume_floor(),
            epoch_ms: None,
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            dir: default_catalog_dir(),
            in_memory: false,
            quota_bytes: default_quota_bytes(),
            allowed_mime_types: default_allowed_mime_types(),
        }
    }
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_control_port() -> u16 {
    platform::DAEMON_TCP_PORT
}

fn default_blob_port() -> u16 {
    8990
}

fn default_log_file() -> PathBuf {
    platform::data_dir().join("daemon.log")
}

fn default_volume() -> f32 {
    0.5
}

fn default_tuning_delay_ms() -> u64 {
    800
}

fn default_resync_threshold_secs() -> f64 {
    2.0
}

fn default_volume_step() -> f32 {
    0.2
}

fn default_volume_floor() -> f32 {
    0.2
}

fn default_catalog_dir() -> PathBuf {
    platform::data_dir().join("catalog")
}

fn default_quota_bytes() -> Option<u64> {
    // 2 GiB
    Some(2 * 1024 * 1024 * 1024)
}

fn default_allowed_mime_types() -> Vec<String> {
    [
        "audio/mpeg",
        "audio/ogg",
        "audio/wav",
        "audio/x-wav",
        "audio/flac",
        "audio/aac",
        "audio/mp4",
        "audio/webm",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            daemon: DaemonConfig::default(),
            http: HttpConfig::default(),
            player: PlayerConfig::default(),
            catalog: CatalogConfig::default(),
        }
    }
}
