//! Line sink that turns ADM lines into track points.

use adm_poller::{LineSink, TargetId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::positions::parse_line;
use crate::tracks::{TrackPoint, TrackStore};

/// Parses positions out of polled lines and appends them to the track store.
///
/// A point that repeats the player's last x/z on the same target is dropped
/// before it reaches the store.
#[derive(Debug)]
pub struct TrackingSink {
    tracks: Arc<TrackStore>,
    last_seen: Mutex<HashMap<(TargetId, String), (f64, f64)>>,
}

impl TrackingSink {
    pub fn new(tracks: Arc<TrackStore>) -> Self {
        Self {
            tracks,
            last_seen: Mutex::new(HashMap::new()),
        }
    }

    pub fn tracks(&self) -> &Arc<TrackStore> {
        &self.tracks
    }

    /// Records the position and reports whether it moved.
    fn moved(&self, target: TargetId, player: &str, x: f64, z: f64) -> bool {
        let Ok(mut last_seen) = self.last_seen.lock() else {
            return true;
        };
        let key = (target, player.to_string());
        if last_seen.get(&key) == Some(&(x, z)) {
            return false;
        }
        last_seen.insert(key, (x, z));
        true
    }
}

#[async_trait]
impl LineSink for TrackingSink {
    async fn on_line(&self, target: TargetId, line: &str, source_ref: &str, observed_at: DateTime<Utc>) {
        let Some(event) = parse_line(line, observed_at) else {
            return;
        };
        if !self.moved(target, &event.player, event.x, event.z) {
            debug!("[{}] {} unchanged at ({},{})", target, event.player, event.x, event.z);
            return;
        }

        let point = TrackPoint {
            ts: event.at,
            x: event.x,
            y: event.y,
            z: event.z,
            source: source_ref.to_string(),
            map: None,
        };
        match self.tracks.append(Some(target), &event.player, point).await {
            Ok(true) => info!(
                "Tracked [{}] ({:.1}, {:.1}) alt={:.1} via {}",
                event.player, event.x, event.z, event.y, source_ref
            ),
            Ok(false) => debug!("[{}] {} duplicate point dropped by store", target, event.player),
            Err(e) => warn!("[{}] Failed to record point for {}: {}", target, event.player, e),
        }
    }
}
