//! Configuration management for Habit Core.
//!
//! This module handles loading and saving application configuration
//! to/from a JSON file. The config directory can be customized.
//!
//! Includes sync-related configuration:
//! - device_id: UUID7 identifying this device (generated on first run)
//! - device_name: Human-readable device name
//! - server_url: Base URL of the account sync endpoint
//! - sync: Queue and dispatcher tuning knobs

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dispatcher::SyncTrigger;
use crate::error::{HabitError, HabitResult};
use crate::queue::OverflowPolicy;

/// Sync tuning knobs. Defaults are the documented production values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncTuning {
    /// Queue capacity cap
    #[serde(default = "default_queue_cap")]
    pub queue_cap: usize,
    /// What to do when the queue is full
    #[serde(default)]
    pub overflow_policy: OverflowPolicy,
    /// Maximum records per network request
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Transport retries before a record is converted to failed
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Debounce after connectivity is restored (ms)
    #[serde(default = "default_online_debounce_ms")]
    pub online_debounce_ms: u64,
    /// Debounce after the app regains foreground visibility (ms)
    #[serde(default = "default_visible_debounce_ms")]
    pub visible_debounce_ms: u64,
    /// Debounce after window/input focus is regained (ms)
    #[serde(default = "default_focus_debounce_ms")]
    pub focus_debounce_ms: u64,
    /// Debounce applied to the periodic heartbeat (ms)
    #[serde(default = "default_heartbeat_debounce_ms")]
    pub heartbeat_debounce_ms: u64,
    /// Heartbeat period (seconds)
    #[serde(default = "default_heartbeat_period_secs")]
    pub heartbeat_period_secs: u64,
    /// One-shot kick after engine start, bypassing debounce (seconds)
    #[serde(default = "default_initial_kick_delay_secs")]
    pub initial_kick_delay_secs: u64,
    /// Days to keep terminal queue records before they are swept
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_queue_cap() -> usize {
    100
}

fn default_batch_size() -> usize {
    50
}

fn default_max_retries() -> u32 {
    5
}

fn default_online_debounce_ms() -> u64 {
    2000
}

fn default_visible_debounce_ms() -> u64 {
    1000
}

fn default_focus_debounce_ms() -> u64 {
    500
}

fn default_heartbeat_debounce_ms() -> u64 {
    500
}

fn default_heartbeat_period_secs() -> u64 {
    300
}

fn default_initial_kick_delay_secs() -> u64 {
    10
}

fn default_retention_days() -> u32 {
    7
}

impl Default for SyncTuning {
    fn default() -> Self {
        Self {
            queue_cap: default_queue_cap(),
            overflow_policy: OverflowPolicy::default(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            online_debounce_ms: default_online_debounce_ms(),
            visible_debounce_ms: default_visible_debounce_ms(),
            focus_debounce_ms: default_focus_debounce_ms(),
            heartbeat_debounce_ms: default_heartbeat_debounce_ms(),
            heartbeat_period_secs: default_heartbeat_period_secs(),
            initial_kick_delay_secs: default_initial_kick_delay_secs(),
            retention_days: default_retention_days(),
        }
    }
}

impl SyncTuning {
    /// Debounce delay for a trigger source.
    pub fn debounce_delay(&self, trigger: SyncTrigger) -> Duration {
        let ms = match trigger {
            SyncTrigger::Online => self.online_debounce_ms,
            SyncTrigger::Visible => self.visible_debounce_ms,
            SyncTrigger::Focus => self.focus_debounce_ms,
            SyncTrigger::Heartbeat => self.heartbeat_debounce_ms,
        };
        Duration::from_millis(ms)
    }

    pub fn heartbeat_period(&self) -> Duration {
        Duration::from_secs(self.heartbeat_period_secs)
    }

    pub fn initial_kick_delay(&self) -> Duration {
        Duration::from_secs(self.initial_kick_delay_secs)
    }

    /// Retention cutoff for terminal records, relative to now.
    pub fn retention_cutoff(&self, now: i64) -> i64 {
        now - (self.retention_days as i64) * 86_400
    }
}

fn default_server_url() -> String {
    "http://127.0.0.1:8686".to_string()
}

fn generate_device_id() -> String {
    Uuid::now_v7().simple().to_string()
}

fn get_default_device_name() -> String {
    #[cfg(feature = "desktop")]
    {
        match hostname::get() {
            Ok(name) => format!("Habit on {}", name.to_string_lossy()),
            Err(_) => "Habit Device".to_string(),
        }
    }
    #[cfg(not(feature = "desktop"))]
    {
        "Habit Mobile".to_string()
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigData {
    /// Path to the store database file
    #[serde(default)]
    pub database_file: String,
    /// Device ID (UUID7 hex)
    #[serde(default = "generate_device_id")]
    pub device_id: String,
    /// Human-readable device name
    #[serde(default = "get_default_device_name")]
    pub device_name: String,
    /// Base URL of the account sync endpoint
    #[serde(default = "default_server_url")]
    pub server_url: String,
    /// Sync tuning knobs
    #[serde(default)]
    pub sync: SyncTuning,
}

impl Default for ConfigData {
    fn default() -> Self {
        Self {
            database_file: String::new(),
            device_id: generate_device_id(),
            device_name: get_default_device_name(),
            server_url: default_server_url(),
            sync: SyncTuning::default(),
        }
    }
}

/// Configuration manager
pub struct Config {
    config_dir: PathBuf,
    config_file: PathBuf,
    data: ConfigData,
}

impl Config {
    /// Create a new configuration manager.
    ///
    /// On mobile platforms (without the `desktop` feature),
    /// `config_dir` is required.
    pub fn new(config_dir: Option<PathBuf>) -> HabitResult<Self> {
        let config_dir = match config_dir {
            Some(dir) => dir,
            None => {
                #[cfg(feature = "desktop")]
                {
                    dirs::config_dir()
                        .unwrap_or_else(|| PathBuf::from("."))
                        .join("habit")
                }
                #[cfg(not(feature = "desktop"))]
                {
                    return Err(HabitError::Config(
                        "config_dir is required on mobile platforms".to_string(),
                    ));
                }
            }
        };

        fs::create_dir_all(&config_dir)?;
        let config_file = config_dir.join("config.json");

        let default_data = |dir: &Path| {
            let mut data = ConfigData::default();
            data.database_file = dir.join("habit.db").to_string_lossy().to_string();
            data
        };

        let data = if config_file.exists() {
            match fs::read_to_string(&config_file) {
                Ok(content) => {
                    serde_json::from_str(&content).unwrap_or_else(|_| default_data(&config_dir))
                }
                Err(_) => default_data(&config_dir),
            }
        } else {
            default_data(&config_dir)
        };

        let config = Self {
            config_dir,
            config_file,
            data,
        };

        // Save default config if it doesn't exist
        if !config.config_file.exists() {
            config.save()?;
        }

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> HabitResult<()> {
        let content = serde_json::to_string_pretty(&self.data)?;
        fs::write(&self.config_file, content)?;
        Ok(())
    }

    /// Get the configuration directory path
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Get the store database file path
    pub fn database_file(&self) -> &str {
        &self.data.database_file
    }

    /// Get the device ID as hex string
    pub fn device_id_hex(&self) -> &str {
        &self.data.device_id
    }

    /// Get the human-readable device name
    pub fn device_name(&self) -> &str {
        &self.data.device_name
    }

    /// Set the device name
    pub fn set_device_name(&mut self, name: &str) -> HabitResult<()> {
        self.data.device_name = name.to_string();
        self.save()
    }

    /// Get the sync endpoint base URL
    pub fn server_url(&self) -> &str {
        &self.data.server_url
    }

    /// Set the sync endpoint base URL
    pub fn set_server_url(&mut self, url: &str) -> HabitResult<()> {
        if url.is_empty() || !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(HabitError::validation(
                "server_url",
                "must start with http:// or https://",
            ));
        }
        self.data.server_url = url.trim_end_matches('/').to_string();
        self.save()
    }

    /// Get the sync tuning knobs
    pub fn sync_tuning(&self) -> &SyncTuning {
        &self.data.sync
    }

    /// Replace the sync tuning knobs
    pub fn set_sync_tuning(&mut self, tuning: SyncTuning) -> HabitResult<()> {
        self.data.sync = tuning;
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::new(Some(temp_dir.path().to_path_buf())).unwrap();

        assert!(!config.device_id_hex().is_empty());
        assert!(!config.device_name().is_empty());
        assert!(config.database_file().ends_with("habit.db"));
        assert_eq!(config.sync_tuning().queue_cap, 100);
        assert_eq!(config.sync_tuning().batch_size, 50);
        assert_eq!(config.sync_tuning().max_retries, 5);
        assert_eq!(
            config.sync_tuning().overflow_policy,
            OverflowPolicy::RejectNewest
        );
    }

    #[test]
    fn test_documented_debounce_defaults() {
        let tuning = SyncTuning::default();
        assert_eq!(
            tuning.debounce_delay(SyncTrigger::Online),
            Duration::from_millis(2000)
        );
        assert_eq!(
            tuning.debounce_delay(SyncTrigger::Visible),
            Duration::from_millis(1000)
        );
        assert_eq!(
            tuning.debounce_delay(SyncTrigger::Focus),
            Duration::from_millis(500)
        );
        assert_eq!(
            tuning.debounce_delay(SyncTrigger::Heartbeat),
            Duration::from_millis(500)
        );
        assert_eq!(tuning.heartbeat_period(), Duration::from_secs(300));
        assert_eq!(tuning.initial_kick_delay(), Duration::from_secs(10));
    }

    #[test]
    fn test_config_persistence() {
        let temp_dir = TempDir::new().unwrap();

        {
            let mut config = Config::new(Some(temp_dir.path().to_path_buf())).unwrap();
            config.set_device_name("Test Device").unwrap();
            config
                .set_server_url("https://sync.example.com/")
                .unwrap();
            let mut tuning = config.sync_tuning().clone();
            tuning.overflow_policy = OverflowPolicy::EvictOldest;
            tuning.queue_cap = 50;
            config.set_sync_tuning(tuning).unwrap();
        }

        {
            let config = Config::new(Some(temp_dir.path().to_path_buf())).unwrap();
            assert_eq!(config.device_name(), "Test Device");
            // Trailing slash trimmed
            assert_eq!(config.server_url(), "https://sync.example.com");
            assert_eq!(config.sync_tuning().queue_cap, 50);
            assert_eq!(
                config.sync_tuning().overflow_policy,
                OverflowPolicy::EvictOldest
            );
        }
    }

    #[test]
    fn test_invalid_server_url() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::new(Some(temp_dir.path().to_path_buf())).unwrap();

        assert!(config.set_server_url("").is_err());
        assert!(config.set_server_url("ftp://example.com").is_err());
    }

    #[test]
    fn test_retention_cutoff() {
        let tuning = SyncTuning::default();
        assert_eq!(tuning.retention_cutoff(1_000_000), 1_000_000 - 7 * 86_400);
    }
}
