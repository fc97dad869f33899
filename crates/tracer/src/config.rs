//! Process configuration.
//!
//! Loaded from a TOML file (written with defaults if missing), then patched
//! with command-line overrides and validated. Per-target settings live in a
//! separate targets file that the poll loops re-read every cycle.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::cli::CliArgs;

fn default_reconcile_interval() -> u64 {
    30
}

fn default_stop_timeout_ms() -> u64 {
    2000
}

fn default_ftp_timeout() -> u64 {
    25
}

fn default_api_base() -> String {
    adm_poller::discovery::DEFAULT_API_BASE.to_string()
}

fn default_discovery_timeout() -> u64 {
    10
}

fn default_download_timeout() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub paths: PathSettings,
    #[serde(default)]
    pub poller: PollerSettings,
    #[serde(default)]
    pub discovery: DiscoverySettings,
}

/// Logging system configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
    /// Optional file path for log output (None means stdout only)
    pub file_path: Option<String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            file_path: None,
        }
    }
}

/// Where things are kept on disk.
///
/// Everything except the targets file is placed under `data_dir`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathSettings {
    pub data_dir: String,
    /// `[targets.<id>]` tables; relative paths are taken as-is
    pub targets_file: String,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
            targets_file: "targets.toml".to_string(),
        }
    }
}

impl PathSettings {
    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }

    pub fn targets_file(&self) -> PathBuf {
        PathBuf::from(&self.targets_file)
    }

    /// `{data_dir}/poll_state.json`
    pub fn state_file(&self) -> PathBuf {
        self.data_dir().join("poll_state.json")
    }

    /// `{data_dir}/adm`, one `latest_adm_<id>.log` per target
    pub fn mirror_dir(&self) -> PathBuf {
        self.data_dir().join("adm")
    }

    /// `{data_dir}/player_tracks`
    pub fn tracks_dir(&self) -> PathBuf {
        self.data_dir().join("player_tracks")
    }

    /// `{data_dir}/players_index.json`
    pub fn index_file(&self) -> PathBuf {
        self.data_dir().join("players_index.json")
    }
}

/// Poll loop supervision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollerSettings {
    /// Seconds between re-reads of the target set
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_sec: u64,
    /// How long a stopping loop gets before it is aborted
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
    /// FTP connect and read timeout
    #[serde(default = "default_ftp_timeout")]
    pub ftp_timeout_sec: u64,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            reconcile_interval_sec: default_reconcile_interval(),
            stop_timeout_ms: default_stop_timeout_ms(),
            ftp_timeout_sec: default_ftp_timeout(),
        }
    }
}

impl PollerSettings {
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_sec)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn ftp_timeout(&self) -> Duration {
        Duration::from_secs(self.ftp_timeout_sec)
    }
}

/// Nitrado API discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoverySettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_discovery_timeout")]
    pub timeout_sec: u64,
    #[serde(default = "default_download_timeout")]
    pub download_timeout_sec: u64,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            api_base: default_api_base(),
            timeout_sec: default_discovery_timeout(),
            download_timeout_sec: default_download_timeout(),
        }
    }
}

impl DiscoverySettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_sec)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_sec)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            logging: LoggingSettings::default(),
            paths: PathSettings::default(),
            poller: PollerSettings::default(),
            discovery: DiscoverySettings::default(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, writes the default configuration there and
    /// returns it.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the TOML configuration file
    ///
    /// # Returns
    ///
    /// The loaded (or default) configuration, or an error if the file could
    /// not be read, parsed or created.
    pub async fn load_from_file(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let config: AppConfig =
                toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config).context("serializing default config")?;
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            tokio::fs::write(path, toml_content)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Applies command-line overrides.
    pub fn apply_cli(&mut self, args: &CliArgs) {
        if let Some(targets) = &args.targets_path {
            self.paths.targets_file = targets.to_string_lossy().to_string();
        }
        if let Some(data_dir) = &args.data_dir {
            self.paths.data_dir = data_dir.to_string_lossy().to_string();
        }
        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
        }
        if args.json_logs {
            self.logging.json_format = true;
        }
    }

    /// Validates the configuration for consistency and correctness.
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        if self.paths.data_dir.trim().is_empty() {
            return Err("Data directory cannot be empty".to_string());
        }
        if self.paths.targets_file.trim().is_empty() {
            return Err("Targets file cannot be empty".to_string());
        }

        if self.poller.reconcile_interval_sec == 0 {
            return Err("reconcile_interval_sec must be at least 1".to_string());
        }
        if self.poller.ftp_timeout_sec == 0 {
            return Err("ftp_timeout_sec must be at least 1".to_string());
        }

        if self.discovery.enabled {
            if !(self.discovery.api_base.starts_with("http://") || self.discovery.api_base.starts_with("https://")) {
                return Err(format!("Invalid discovery api_base: {}", self.discovery.api_base));
            }
            if self.discovery.timeout_sec == 0 {
                return Err("discovery timeout_sec must be at least 1".to_string());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json_format);
        assert!(config.logging.file_path.is_none());
        assert_eq!(config.poller.reconcile_interval(), Duration::from_secs(30));
        assert_eq!(config.poller.stop_timeout(), Duration::from_secs(2));
        assert_eq!(config.poller.ftp_timeout(), Duration::from_secs(25));
        assert_eq!(config.discovery.api_base, "https://api.nitrado.net");
        assert_eq!(config.paths.state_file(), PathBuf::from("data/poll_state.json"));
        assert_eq!(config.paths.mirror_dir(), PathBuf::from("data/adm"));
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_missing_file_writes_default() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("conf").join("tracer.toml");

        let config = AppConfig::load_from_file(&path).await.expect("load");
        assert_eq!(config, AppConfig::default());
        assert!(path.exists());

        let reloaded = AppConfig::load_from_file(&path).await.expect("reload");
        assert_eq!(reloaded, config);
    }

    #[tokio::test]
    async fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("tracer.toml");
        tokio::fs::write(
            &path,
            r#"
[logging]
level = "debug"
json_format = true

[poller]
reconcile_interval_sec = 5
"#,
        )
        .await
        .expect("write");

        let config = AppConfig::load_from_file(&path).await.expect("load");
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json_format);
        assert_eq!(config.poller.reconcile_interval_sec, 5);
        assert_eq!(config.poller.stop_timeout_ms, 2000);
        assert_eq!(config.paths, PathSettings::default());
        assert!(config.discovery.enabled);
    }

    #[tokio::test]
    async fn test_malformed_file_is_error() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("tracer.toml");
        tokio::fs::write(&path, "[logging\nlevel=").await.expect("write");
        assert!(AppConfig::load_from_file(&path).await.is_err());
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = AppConfig::default();
        let args = CliArgs {
            config_path: PathBuf::from("tracer.toml"),
            targets_path: Some(PathBuf::from("/etc/targets.toml")),
            data_dir: Some(PathBuf::from("/srv/tracer")),
            log_level: Some("warn".to_string()),
            json_logs: true,
        };
        config.apply_cli(&args);
        assert_eq!(config.paths.targets_file(), PathBuf::from("/etc/targets.toml"));
        assert_eq!(config.paths.tracks_dir(), PathBuf::from("/srv/tracer/player_tracks"));
        assert_eq!(config.logging.level, "warn");
        assert!(config.logging.json_format);
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.poller.reconcile_interval_sec = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.discovery.api_base = "ftp://nope".to_string();
        assert!(config.validate().is_err());
        config.discovery.enabled = false;
        assert!(config.validate().is_ok());
    }
}
