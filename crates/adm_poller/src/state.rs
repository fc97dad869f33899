//! Durable per-target poll state: the active file and the byte offset into it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::error::StateError;
use crate::target::TargetId;

/// Where a target's tail currently stands.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollState {
    #[serde(default)]
    pub latest_file: Option<String>,
    #[serde(default)]
    pub offset: u64,
}

impl PollState {
    /// Makes `name` the active file. Returns `true` on rotation, in which
    /// case the offset is back at zero.
    pub fn switch_to(&mut self, name: &str) -> bool {
        if self.latest_file.as_deref() == Some(name) {
            return false;
        }
        self.latest_file = Some(name.to_string());
        self.offset = 0;
        true
    }

    /// Applies the truncation guard against a size report. Returns `true`
    /// when the stored offset ran past the file and was reset.
    pub fn reset_if_truncated(&mut self, known_size: Option<u64>) -> bool {
        match known_size {
            Some(size) if size < self.offset => {
                self.offset = 0;
                true
            }
            _ => false,
        }
    }
}

/// Durable mapping target id -> [`PollState`].
#[async_trait]
pub trait PollStateStore: Send + Sync {
    /// Stored state, or the default (no file, offset 0) when none exists.
    async fn load(&self, target: TargetId) -> Result<PollState, StateError>;

    async fn save(&self, target: TargetId, state: &PollState) -> Result<(), StateError>;
}

/// All targets' state in one JSON object keyed by target id.
///
/// Writes go through a temp file and a rename. Saves from different
/// targets are serialized by an internal lock since they share the file.
#[derive(Debug)]
pub struct JsonPollStateStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonPollStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<BTreeMap<String, PollState>, StateError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(StateError::FileRead(self.path.clone(), e)),
        };
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&content).map_err(|e| StateError::Deserialization(self.path.clone(), e))
    }

    async fn write_all(&self, all: &BTreeMap<String, PollState>) -> Result<(), StateError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| StateError::FileWrite(parent.to_path_buf(), e))?;
            }
        }

        let json = serde_json::to_string_pretty(all).map_err(StateError::Serialization)?;
        let temp_path = self.path.with_extension("json.tmp");

        let mut file = tokio::fs::File::create(&temp_path)
            .await
            .map_err(|e| StateError::FileWrite(temp_path.clone(), e))?;
        file.write_all(json.as_bytes())
            .await
            .map_err(|e| StateError::FileWrite(temp_path.clone(), e))?;
        file.sync_all()
            .await
            .map_err(|e| StateError::FileWrite(temp_path.clone(), e))?;

        tokio::fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| StateError::FileRename(temp_path, self.path.clone(), e))
    }
}

#[async_trait]
impl PollStateStore for JsonPollStateStore {
    #[instrument(skip(self))]
    async fn load(&self, target: TargetId) -> Result<PollState, StateError> {
        let _guard = self.lock.lock().await;
        let state = self.read_all().await?.remove(&target.to_string()).unwrap_or_default();
        debug!(?state, "Loaded poll state");
        Ok(state)
    }

    #[instrument(skip(self, state))]
    async fn save(&self, target: TargetId, state: &PollState) -> Result<(), StateError> {
        let _guard = self.lock.lock().await;
        let mut all = self.read_all().await?;
        all.insert(target.to_string(), state.clone());
        self.write_all(&all).await?;
        debug!(file = ?state.latest_file, offset = state.offset, "Saved poll state");
        Ok(())
    }
}

/// Non-durable store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryPollStateStore {
    states: Mutex<HashMap<TargetId, PollState>>,
}

impl MemoryPollStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value without going through the trait.
    pub async fn get(&self, target: TargetId) -> Option<PollState> {
        self.states.lock().await.get(&target).cloned()
    }
}

#[async_trait]
impl PollStateStore for MemoryPollStateStore {
    async fn load(&self, target: TargetId) -> Result<PollState, StateError> {
        Ok(self.states.lock().await.get(&target).cloned().unwrap_or_default())
    }

    async fn save(&self, target: TargetId, state: &PollState) -> Result<(), StateError> {
        self.states.lock().await.insert(target, state.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_switch_resets_offset() {
        let mut state = PollState {
            latest_file: Some("a.ADM".to_string()),
            offset: 500,
        };
        assert!(!state.switch_to("a.ADM"));
        assert_eq!(state.offset, 500);

        assert!(state.switch_to("b.ADM"));
        assert_eq!(state.latest_file.as_deref(), Some("b.ADM"));
        assert_eq!(state.offset, 0);
    }

    #[test]
    fn test_truncation_guard() {
        let mut state = PollState {
            latest_file: Some("a.ADM".to_string()),
            offset: 620,
        };
        assert!(!state.reset_if_truncated(None));
        assert!(!state.reset_if_truncated(Some(620)));
        assert!(!state.reset_if_truncated(Some(700)));
        assert_eq!(state.offset, 620);

        assert!(state.reset_if_truncated(Some(100)));
        assert_eq!(state.offset, 0);
    }

    #[tokio::test]
    async fn test_json_store_round_trips_per_target() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("data").join("adm_state.json");
        let store = JsonPollStateStore::new(&path);

        assert_eq!(store.load(TargetId(1)).await.expect("load"), PollState::default());

        let one = PollState {
            latest_file: Some("DayZServer_X1_x64_2024-01-01_00-00-00.ADM".to_string()),
            offset: 500,
        };
        let two = PollState {
            latest_file: None,
            offset: 0,
        };
        store.save(TargetId(1), &one).await.expect("save one");
        store.save(TargetId(2), &two).await.expect("save two");

        let reopened = JsonPollStateStore::new(&path);
        assert_eq!(reopened.load(TargetId(1)).await.expect("load"), one);
        assert_eq!(reopened.load(TargetId(2)).await.expect("load"), two);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_json_store_reads_legacy_layout() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("adm_state.json");
        tokio::fs::write(&path, r#"{"77": {"latest_file": "x.ADM", "offset": 12}, "78": {}}"#)
            .await
            .expect("write");

        let store = JsonPollStateStore::new(&path);
        let state = store.load(TargetId(77)).await.expect("load");
        assert_eq!(state.latest_file.as_deref(), Some("x.ADM"));
        assert_eq!(state.offset, 12);
        assert_eq!(store.load(TargetId(78)).await.expect("load"), PollState::default());
    }
}
