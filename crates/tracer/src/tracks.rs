//! Per-player movement tracks.
//!
//! Each player gets one JSON document under the tracks directory holding
//! their most recent points. Appends are buffered in memory and written in
//! batches; every read path flushes first, so callers never see stale data.
//! A players index maps gamertags (exact, lowercased and normalized) to the
//! stable player id.

use adm_poller::TargetId;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::Error as IoError;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

pub const MAX_POINTS_PER_PLAYER: usize = 5000;
pub const BUFFER_FLUSH_POINTS: usize = 10;
pub const FLUSH_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
pub enum TrackError {
    #[error("Failed to create directory {0}: {1}")]
    DirectoryCreate(PathBuf, IoError),

    #[error("Failed to read {0}: {1}")]
    FileRead(PathBuf, IoError),

    #[error("Failed to write {0}: {1}")]
    FileWrite(PathBuf, IoError),

    #[error("Failed to rename file from {0} to {1}: {2}")]
    FileRename(PathBuf, PathBuf, IoError),

    #[error("Failed to parse {0}: {1}")]
    Deserialization(PathBuf, serde_json::Error),

    #[error("Failed to serialize track data: {0}")]
    Serialization(serde_json::Error),
}

/// One recorded position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    pub ts: DateTime<Utc>,
    pub x: f64,
    /// Altitude.
    pub y: f64,
    pub z: f64,
    /// Source reference of the ADM line the point came from.
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub map: Option<String>,
}

impl TrackPoint {
    fn same_xz(&self, other: &TrackPoint) -> bool {
        self.x == other.x && self.z == other.z
    }
}

/// On-disk track of one player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackDocument {
    pub player_id: String,
    pub gamertag: String,
    #[serde(default)]
    pub points: Vec<TrackPoint>,
}

/// Latest known position of a player.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveRow {
    pub player_id: String,
    pub short_id: String,
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub ts: DateTime<Utc>,
    pub map: Option<String>,
}

/// Lookup form of a gamertag: trimmed and lowercased.
pub fn normalize_tag(tag: &str) -> String {
    tag.trim().to_lowercase()
}

/// Stable id for a gamertag.
pub fn player_id_for(tag: &str) -> String {
    format!("xbox-{}", normalize_tag(tag))
}

fn short_id(player_id: &str) -> &str {
    player_id.split_once('-').map(|(_, rest)| rest).unwrap_or(player_id)
}

/// Buffering and flush limits.
#[derive(Debug, Clone, Copy)]
pub struct TrackSettings {
    pub max_points: usize,
    pub buffer_points: usize,
    pub flush_interval: Duration,
}

impl Default for TrackSettings {
    fn default() -> Self {
        Self {
            max_points: MAX_POINTS_PER_PLAYER,
            buffer_points: BUFFER_FLUSH_POINTS,
            flush_interval: FLUSH_INTERVAL,
        }
    }
}

#[derive(Debug)]
struct PlayerBuffer {
    gamertag: String,
    points: Vec<TrackPoint>,
}

#[derive(Debug)]
struct Inner {
    index: BTreeMap<String, String>,
    buffers: HashMap<String, PlayerBuffer>,
    last_flush: Instant,
    live: HashMap<TargetId, BTreeMap<String, LiveRow>>,
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, TrackError> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| TrackError::Deserialization(path.to_path_buf(), e)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(TrackError::FileRead(path.to_path_buf(), e)),
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), TrackError> {
    let json = serde_json::to_string_pretty(value).map_err(TrackError::Serialization)?;
    let temp_path = path.with_extension("json.tmp");

    let mut file = tokio::fs::File::create(&temp_path)
        .await
        .map_err(|e| TrackError::FileWrite(temp_path.clone(), e))?;
    file.write_all(json.as_bytes())
        .await
        .map_err(|e| TrackError::FileWrite(temp_path.clone(), e))?;
    file.sync_all()
        .await
        .map_err(|e| TrackError::FileWrite(temp_path.clone(), e))?;
    drop(file);

    tokio::fs::rename(&temp_path, path)
        .await
        .map_err(|e| TrackError::FileRename(temp_path.clone(), path.to_path_buf(), e))
}

/// Buffered, file-backed track storage.
#[derive(Debug)]
pub struct TrackStore {
    dir: PathBuf,
    index_path: PathBuf,
    settings: TrackSettings,
    inner: Mutex<Inner>,
}

impl TrackStore {
    /// Opens the store, creating the tracks directory if needed.
    pub async fn open(dir: impl Into<PathBuf>, index_path: impl Into<PathBuf>) -> Result<Self, TrackError> {
        Self::with_settings(dir, index_path, TrackSettings::default()).await
    }

    pub async fn with_settings(
        dir: impl Into<PathBuf>,
        index_path: impl Into<PathBuf>,
        settings: TrackSettings,
    ) -> Result<Self, TrackError> {
        let dir = dir.into();
        let index_path = index_path.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| TrackError::DirectoryCreate(dir.clone(), e))?;
        if let Some(parent) = index_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TrackError::DirectoryCreate(parent.to_path_buf(), e))?;
        }

        let index: BTreeMap<String, String> = read_json(&index_path).await?.unwrap_or_default();
        debug!("Opened track store at {} ({} index keys)", dir.display(), index.len());

        Ok(Self {
            dir,
            index_path,
            settings,
            inner: Mutex::new(Inner {
                index,
                buffers: HashMap::new(),
                last_flush: Instant::now(),
                live: HashMap::new(),
            }),
        })
    }

    fn track_path(&self, player_id: &str) -> PathBuf {
        let file: String = player_id
            .chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect();
        self.dir.join(format!("{}.json", file))
    }

    /// Finds or assigns the player id for `gamertag`, keeping all three
    /// lookup forms in the index.
    async fn resolve(&self, inner: &mut Inner, gamertag: &str) -> Result<String, TrackError> {
        let lower = gamertag.to_lowercase();
        let norm = normalize_tag(gamertag);
        let known = inner
            .index
            .get(gamertag)
            .or_else(|| inner.index.get(&lower))
            .or_else(|| inner.index.get(&norm))
            .cloned();

        let (player_id, changed) = match known {
            Some(id) => {
                let changed = !inner.index.contains_key(&norm);
                (id, changed)
            }
            None => {
                let id = player_id_for(gamertag);
                info!("Indexed new player: {} -> {}", gamertag, id);
                (id, true)
            }
        };

        if changed {
            inner.index.insert(gamertag.to_string(), player_id.clone());
            inner.index.insert(lower, player_id.clone());
            inner.index.insert(norm, player_id.clone());
            write_json(&self.index_path, &inner.index).await?;
        }
        Ok(player_id)
    }

    /// Queues a point for `gamertag`.
    ///
    /// Returns `false` when the point repeats the player's previous x/z and
    /// was dropped. The live snapshot is updated either way.
    pub async fn append(&self, target: Option<TargetId>, gamertag: &str, point: TrackPoint) -> Result<bool, TrackError> {
        let mut inner = self.inner.lock().await;
        let player_id = self.resolve(&mut inner, gamertag).await?;

        if let Some(target) = target {
            inner.live.entry(target).or_default().insert(
                player_id.clone(),
                LiveRow {
                    player_id: player_id.clone(),
                    short_id: short_id(&player_id).to_string(),
                    name: gamertag.to_string(),
                    x: point.x,
                    y: point.y,
                    z: point.z,
                    ts: point.ts,
                    map: point.map.clone(),
                },
            );
        }

        let duplicate = match inner.buffers.get(&player_id).and_then(|b| b.points.last()) {
            Some(last) => last.same_xz(&point),
            None => read_json::<TrackDocument>(&self.track_path(&player_id))
                .await?
                .and_then(|doc| doc.points.last().map(|last| last.same_xz(&point)))
                .unwrap_or(false),
        };
        if duplicate {
            debug!("[{}] Duplicate adjacent point ignored at ({},{})", gamertag, point.x, point.z);
            return Ok(false);
        }

        let buffer = inner
            .buffers
            .entry(player_id.clone())
            .or_insert_with(|| PlayerBuffer {
                gamertag: gamertag.to_string(),
                points: Vec::new(),
            });
        buffer.points.push(point);
        let buffered = buffer.points.len();
        debug!("Track append [{}] buffered={}", gamertag, buffered);

        if buffered >= self.settings.buffer_points {
            self.flush_player(&mut inner, &player_id).await?;
        }
        if inner.last_flush.elapsed() >= self.settings.flush_interval {
            self.flush_buffers(&mut inner).await?;
        }
        Ok(true)
    }

    async fn flush_player(&self, inner: &mut Inner, player_id: &str) -> Result<(), TrackError> {
        let Some(buffer) = inner.buffers.remove(player_id) else {
            return Ok(());
        };
        if buffer.points.is_empty() {
            return Ok(());
        }

        let path = self.track_path(player_id);
        let mut doc = read_json::<TrackDocument>(&path).await?.unwrap_or_else(|| TrackDocument {
            player_id: player_id.to_string(),
            gamertag: buffer.gamertag.clone(),
            points: Vec::new(),
        });
        let added = buffer.points.len();
        doc.points.extend(buffer.points);
        if doc.points.len() > self.settings.max_points {
            let excess = doc.points.len() - self.settings.max_points;
            doc.points.drain(..excess);
        }

        write_json(&path, &doc).await?;
        debug!("Flushed {} point(s) for {} (total={})", added, doc.gamertag, doc.points.len());
        Ok(())
    }

    async fn flush_buffers(&self, inner: &mut Inner) -> Result<(), TrackError> {
        let pending: Vec<String> = inner.buffers.keys().cloned().collect();
        for player_id in pending {
            self.flush_player(inner, &player_id).await?;
        }
        inner.last_flush = Instant::now();
        Ok(())
    }

    /// Writes every buffered point.
    #[instrument(skip(self))]
    pub async fn flush_all(&self) -> Result<(), TrackError> {
        let mut inner = self.inner.lock().await;
        self.flush_buffers(&mut inner).await
    }

    /// Flushes if the flush interval has passed since the last full flush.
    pub async fn flush_if_due(&self) -> Result<(), TrackError> {
        let mut inner = self.inner.lock().await;
        if inner.last_flush.elapsed() >= self.settings.flush_interval {
            self.flush_buffers(&mut inner).await?;
        }
        Ok(())
    }

    /// Number of points waiting to be written.
    pub async fn buffered(&self) -> usize {
        self.inner.lock().await.buffers.values().map(|b| b.points.len()).sum()
    }

    /// A player's track, optionally limited to the last `window_hours` and
    /// to the newest `max_points`.
    ///
    /// The query matches the exact tag, its lowercase or normalized form,
    /// or else the first indexed tag it is a normalized prefix of.
    pub async fn load_track(
        &self,
        query: &str,
        window_hours: Option<u64>,
        max_points: Option<usize>,
    ) -> Result<Option<TrackDocument>, TrackError> {
        let mut inner = self.inner.lock().await;
        let norm = normalize_tag(query);
        let found = inner
            .index
            .get(query)
            .or_else(|| inner.index.get(&query.to_lowercase()))
            .or_else(|| inner.index.get(&norm))
            .or_else(|| {
                inner
                    .index
                    .iter()
                    .find(|(key, _)| normalize_tag(key).starts_with(&norm))
                    .map(|(_, id)| id)
            })
            .cloned();

        let Some(player_id) = found else {
            debug!("No index match for '{}' (normalized '{}')", query, norm);
            return Ok(None);
        };

        self.flush_player(&mut inner, &player_id).await?;
        let mut doc = read_json::<TrackDocument>(&self.track_path(&player_id))
            .await?
            .unwrap_or_else(|| TrackDocument {
                player_id: player_id.clone(),
                gamertag: query.to_string(),
                points: Vec::new(),
            });

        if let Some(hours) = window_hours.filter(|h| *h > 0) {
            let cutoff = Utc::now() - ChronoDuration::hours(hours as i64);
            doc.points.retain(|p| p.ts >= cutoff);
        }
        if let Some(limit) = max_points.filter(|m| *m > 0) {
            if doc.points.len() > limit {
                let excess = doc.points.len() - limit;
                doc.points.drain(..excess);
            }
        }

        info!("Loaded track for {} with {} point(s)", doc.gamertag, doc.points.len());
        Ok(Some(doc))
    }

    /// Latest position of every player seen for `target`, sorted by name.
    ///
    /// Uses the in-memory view when this process has seen points for the
    /// target, otherwise the last point of each track file on disk.
    pub async fn snapshot(&self, target: TargetId) -> Result<Vec<LiveRow>, TrackError> {
        let mut inner = self.inner.lock().await;
        self.flush_buffers(&mut inner).await?;

        let mut rows: Vec<LiveRow> = match inner.live.get(&target) {
            Some(live) if !live.is_empty() => live.values().cloned().collect(),
            _ => self.rows_from_disk().await?,
        };
        rows.sort_by(|a, b| a.name.cmp(&b.name).then(a.ts.cmp(&b.ts)));
        Ok(rows)
    }

    async fn rows_from_disk(&self) -> Result<Vec<LiveRow>, TrackError> {
        let mut rows = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| TrackError::FileRead(self.dir.clone(), e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| TrackError::FileRead(self.dir.clone(), e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let doc = match read_json::<TrackDocument>(&path).await {
                Ok(Some(doc)) => doc,
                Ok(None) => continue,
                Err(e) => {
                    debug!("Skipping {}: {}", path.display(), e);
                    continue;
                }
            };
            if let Some(last) = doc.points.last() {
                rows.push(LiveRow {
                    short_id: short_id(&doc.player_id).to_string(),
                    player_id: doc.player_id.clone(),
                    name: doc.gamertag.clone(),
                    x: last.x,
                    y: last.y,
                    z: last.z,
                    ts: last.ts,
                    map: last.map.clone(),
                });
            }
        }
        Ok(rows)
    }
}
