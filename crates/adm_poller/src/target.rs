//! Poll targets and the configuration sources they are read from.
//!
//! A target is one remote ADM log source (one tenant's game server). The
//! poll loop re-reads its target at the top of every cycle, so edits to the
//! backing store take effect without restarting anything.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::ConfigError;

/// Poll intervals below this are raised to it.
pub const MIN_INTERVAL_SECS: u64 = 5;

/// Opaque identifier of a polled source (a guild or tenant id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(pub u64);

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TargetId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(TargetId)
    }
}

fn default_port() -> u16 {
    21
}

fn default_remote_dir() -> String {
    "/".to_string()
}

fn default_interval_sec() -> u64 {
    10
}

/// Connection and discovery settings for one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollTarget {
    /// FTP host name or address
    pub host: String,
    /// FTP control port
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Directory holding the ADM files
    #[serde(default = "default_remote_dir", alias = "adm_dir")]
    pub remote_dir: String,
    /// Seconds between cycles, floored at [`MIN_INTERVAL_SECS`]
    #[serde(default = "default_interval_sec")]
    pub interval_sec: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nitrado_api_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nitrado_service_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nitrado_log_folder_prefix: Option<String>,
}

impl PollTarget {
    /// Creates a target with default port, directory and interval.
    pub fn new(host: impl Into<String>, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            username: username.into(),
            password: password.into(),
            remote_dir: default_remote_dir(),
            interval_sec: default_interval_sec(),
            nitrado_api_token: None,
            nitrado_service_id: None,
            nitrado_log_folder_prefix: None,
        }
    }

    /// Sleep between cycles.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_sec.max(MIN_INTERVAL_SECS))
    }

    /// `host:port` for connecting.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.host.trim().is_empty() {
            return Err("host cannot be empty".to_string());
        }
        if self.username.trim().is_empty() {
            return Err("username cannot be empty".to_string());
        }
        if self.port == 0 {
            return Err("port cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Read-only view over the configured targets.
#[async_trait]
pub trait TargetSource: Send + Sync {
    /// Current settings for `id`, or `None` when tracking is disabled.
    async fn target(&self, id: TargetId) -> Result<Option<PollTarget>, ConfigError>;

    /// Every configured target id.
    async fn target_ids(&self) -> Result<Vec<TargetId>, ConfigError>;
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct TargetsFile {
    #[serde(default)]
    targets: BTreeMap<String, PollTarget>,
}

/// Targets stored in a TOML file as `[targets.<id>]` tables.
///
/// The file is read on every call; a missing file means no targets.
#[derive(Debug, Clone)]
pub struct TomlTargetStore {
    path: PathBuf,
}

impl TomlTargetStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every parseable `[targets.<id>]` table, unvalidated.
    ///
    /// A table whose key is not a numeric id is skipped with a warning so
    /// one typo cannot hide the other targets.
    async fn read_all(&self) -> Result<BTreeMap<TargetId, PollTarget>, ConfigError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Target file {} not found; no targets", self.path.display());
                return Ok(BTreeMap::new());
            }
            Err(e) => return Err(ConfigError::FileRead(self.path.clone(), e)),
        };

        let file: TargetsFile =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(self.path.clone(), e))?;

        let mut out = BTreeMap::new();
        for (key, target) in file.targets {
            match key.parse::<TargetId>() {
                Ok(id) => {
                    out.insert(id, target);
                }
                Err(e) => warn!("Skipping [targets.{}] in {}: {}", key, self.path.display(), e),
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl TargetSource for TomlTargetStore {
    /// Validates only the requested entry; other broken entries do not
    /// affect it.
    async fn target(&self, id: TargetId) -> Result<Option<PollTarget>, ConfigError> {
        let Some(target) = self.read_all().await?.remove(&id) else {
            return Ok(None);
        };
        target
            .validate()
            .map_err(|reason| ConfigError::Invalid(id.to_string(), reason))?;
        Ok(Some(target))
    }

    /// Ids of the valid entries. Invalid ones are logged and left out.
    async fn target_ids(&self) -> Result<Vec<TargetId>, ConfigError> {
        let mut ids = Vec::new();
        for (id, target) in self.read_all().await? {
            match target.validate() {
                Ok(()) => ids.push(id),
                Err(reason) => warn!("Ignoring target {}: {}", id, reason),
            }
        }
        Ok(ids)
    }
}

/// Targets held in memory, editable at runtime.
#[derive(Debug, Default)]
pub struct InMemoryTargets {
    targets: RwLock<HashMap<TargetId, PollTarget>>,
}

impl InMemoryTargets {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert(&self, id: TargetId, target: PollTarget) {
        self.targets.write().await.insert(id, target);
    }

    pub async fn remove(&self, id: TargetId) -> Option<PollTarget> {
        self.targets.write().await.remove(&id)
    }
}

#[async_trait]
impl TargetSource for InMemoryTargets {
    async fn target(&self, id: TargetId) -> Result<Option<PollTarget>, ConfigError> {
        Ok(self.targets.read().await.get(&id).cloned())
    }

    async fn target_ids(&self) -> Result<Vec<TargetId>, ConfigError> {
        let mut ids: Vec<TargetId> = self.targets.read().await.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_floor() {
        let mut target = PollTarget::new("ftp.example.net", "user", "secret");
        target.interval_sec = 1;
        assert_eq!(target.interval(), Duration::from_secs(5));
        target.interval_sec = 30;
        assert_eq!(target.interval(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_toml_store_reads_targets() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("targets.toml");
        tokio::fs::write(
            &path,
            r#"
[targets.1234]
host = "ftp.example.net"
username = "dayz"
password = "pw"
adm_dir = "/dayzxb/config"
interval_sec = 15
nitrado_service_id = 998877

[targets.42]
host = "other.example.net"
port = 2121
username = "u"
password = "p"
"#,
        )
        .await
        .expect("write targets");

        let store = TomlTargetStore::new(&path);
        assert_eq!(store.target_ids().await.expect("ids"), vec![TargetId(42), TargetId(1234)]);

        let first = store.target(TargetId(1234)).await.expect("read").expect("present");
        assert_eq!(first.remote_dir, "/dayzxb/config");
        assert_eq!(first.port, 21);
        assert_eq!(first.nitrado_service_id, Some(998877));
        assert_eq!(first.address(), "ftp.example.net:21");

        let second = store.target(TargetId(42)).await.expect("read").expect("present");
        assert_eq!(second.remote_dir, "/");
        assert_eq!(second.interval(), Duration::from_secs(10));

        assert!(store.target(TargetId(7)).await.expect("read").is_none());
    }

    #[tokio::test]
    async fn test_toml_store_missing_file_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = TomlTargetStore::new(dir.path().join("absent.toml"));
        assert!(store.target_ids().await.expect("ids").is_empty());
    }

    #[tokio::test]
    async fn test_toml_store_skips_bad_id() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("targets.toml");
        tokio::fs::write(
            &path,
            "[targets.abc]\nhost = \"h\"\nusername = \"u\"\npassword = \"p\"\n\n\
             [targets.5]\nhost = \"h\"\nusername = \"u\"\npassword = \"p\"\n",
        )
        .await
        .expect("write targets");

        let store = TomlTargetStore::new(&path);
        assert_eq!(store.target_ids().await.expect("ids"), vec![TargetId(5)]);
    }

    #[tokio::test]
    async fn test_invalid_entry_does_not_affect_others() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("targets.toml");
        tokio::fs::write(
            &path,
            r#"
[targets.1]
host = "ftp.example.net"
username = "u"
password = "p"

[targets.2]
host = ""
username = "u"
password = "p"
"#,
        )
        .await
        .expect("write targets");

        let store = TomlTargetStore::new(&path);
        let good = store.target(TargetId(1)).await.expect("read").expect("present");
        assert_eq!(good.host, "ftp.example.net");
        assert!(matches!(
            store.target(TargetId(2)).await,
            Err(ConfigError::Invalid(ref id, _)) if id == "2"
        ));
        assert_eq!(store.target_ids().await.expect("ids"), vec![TargetId(1)]);
    }

    #[tokio::test]
    async fn test_in_memory_targets() {
        let targets = InMemoryTargets::new();
        targets.upsert(TargetId(9), PollTarget::new("h", "u", "p")).await;
        assert!(targets.target(TargetId(9)).await.expect("read").is_some());
        targets.remove(TargetId(9)).await;
        assert!(targets.target(TargetId(9)).await.expect("read").is_none());
    }
}
