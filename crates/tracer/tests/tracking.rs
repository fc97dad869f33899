//! Poll loops feeding the track store, started and stopped by reconciliation.

use adm_poller::{
    Connector, InMemoryTargets, MemoryPollStateStore, NoDiscovery, PollTarget, PollerDeps, PollerRegistry,
    RemoteSession, Scanner, StopResult, TargetId, TransportError,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tracer::{reconcile_once, TrackStore, TrackingSink};

const FILE: &str = "DayZServer_X1_x64_2024-03-09_12-00-00.ADM";

const LOG: &str = concat!(
    "AdminLog started on 2024-03-09 at 12:00:00\n",
    "12:00:05 | Player \"Alpha\" (id=A= pos=<100.0, 200.0, 5.0>)\n",
    "12:00:06 | Player \"Bravo\" (id=B= pos=<300.5, 400.5, 7.5>)\n",
    "12:00:07 | Player \"Alpha\" (id=A= pos=<100.0, 200.0, 6.0>)\n",
    "12:00:08 | Player \"Alpha\" (id=A= pos=<110.0, 210.0, 5.0>)\n",
    "12:00:09 | Player \"Bravo\" (id=B=) placed Fireplace <301.0, 401.0, 7.5>\n",
    "12:00:10 | Chat(\"Bravo\"(id=B=)): hello\n",
);

/// Serves `LOG` as the only file.
struct SingleFile;

struct SingleFileSession {
    marker: usize,
}

impl Connector for SingleFile {
    fn connect(&self, _target: &PollTarget) -> Result<Box<dyn RemoteSession>, TransportError> {
        Ok(Box::new(SingleFileSession { marker: 0 }))
    }
}

impl RemoteSession for SingleFileSession {
    fn change_dir(&mut self, _dir: &str) -> Result<(), TransportError> {
        Ok(())
    }

    fn list_facts(&mut self) -> Result<Vec<String>, TransportError> {
        Ok(vec![format!("type=file;size={}; {}", LOG.len(), FILE)])
    }

    fn list_names(&mut self) -> Result<Vec<String>, TransportError> {
        Ok(vec![FILE.to_string()])
    }

    fn list_long(&mut self) -> Result<Vec<String>, TransportError> {
        Ok(vec![format!("-rw-r--r-- 1 ftp ftp {} Mar 09 12:00 {}", LOG.len(), FILE)])
    }

    fn size(&mut self, _name: &str) -> Result<u64, TransportError> {
        Ok(LOG.len() as u64)
    }

    fn modified(&mut self, _name: &str) -> Result<DateTime<Utc>, TransportError> {
        Err(TransportError::Refused {
            code: 502,
            message: "MDTM not implemented".to_string(),
        })
    }

    fn set_binary(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    fn restart_at(&mut self, offset: u64) -> Result<(), TransportError> {
        self.marker = offset as usize;
        Ok(())
    }

    fn retrieve(&mut self, _name: &str) -> Result<Vec<u8>, TransportError> {
        let start = std::mem::take(&mut self.marker).min(LOG.len());
        Ok(LOG.as_bytes()[start..].to_vec())
    }

    fn quit(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

struct Setup {
    _dir: TempDir,
    targets: Arc<InMemoryTargets>,
    tracks: Arc<TrackStore>,
    registry: PollerRegistry,
}

async fn setup() -> Setup {
    let dir = TempDir::new().expect("tempdir");
    let tracks = Arc::new(
        TrackStore::open(dir.path().join("player_tracks"), dir.path().join("players_index.json"))
            .await
            .expect("track store"),
    );
    let targets = Arc::new(InMemoryTargets::new());
    let registry = PollerRegistry::new(PollerDeps {
        targets: targets.clone(),
        state_store: Arc::new(MemoryPollStateStore::new()),
        connector: Arc::new(SingleFile),
        discovery: Arc::new(NoDiscovery),
        sink: Arc::new(TrackingSink::new(tracks.clone())),
        scanner: Arc::new(Scanner::default()),
        mirror_dir: dir.path().join("adm"),
    });
    Setup {
        _dir: dir,
        targets,
        tracks,
        registry,
    }
}

/// Waits until Bravo's last position (the final one in `LOG`) is recorded.
async fn wait_for_last_point(tracks: &TrackStore, target: TargetId) {
    for _ in 0..200 {
        let rows = tracks.snapshot(target).await.expect("snapshot");
        if rows.iter().any(|row| row.name == "Bravo" && row.x == 301.0) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("track rows not reached in time");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_polled_positions_become_tracks() {
    let s = setup().await;
    let target = TargetId(7);
    s.targets.upsert(target, PollTarget::new("ftp.example.net", "user", "pass")).await;

    let report = reconcile_once(&s.registry, s.targets.as_ref(), Duration::from_secs(2))
        .await
        .expect("reconcile");
    assert_eq!(report.started, vec![target]);

    wait_for_last_point(&s.tracks, target).await;

    let rows = s.tracks.snapshot(target).await.expect("snapshot");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].name, "Alpha");
    assert_eq!((rows[0].x, rows[0].z), (110.0, 210.0));
    assert_eq!(rows[1].name, "Bravo");
    assert_eq!((rows[1].x, rows[1].z), (301.0, 401.0));

    let alpha = s
        .tracks
        .load_track("alpha", None, None)
        .await
        .expect("load")
        .expect("found");
    // The repeated x/z at 12:00:07 is dropped.
    assert_eq!(alpha.points.len(), 2);
    assert_eq!(alpha.points[0].source, format!("ftp:{}#~0+1", FILE));
    assert_eq!(alpha.points[1].source, format!("ftp:{}#~0+4", FILE));

    s.registry.stop_all(Duration::from_secs(2)).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_reconcile_follows_target_set() {
    let s = setup().await;
    let timeout = Duration::from_secs(2);
    s.targets.upsert(TargetId(1), PollTarget::new("a.example.net", "u", "p")).await;
    s.targets.upsert(TargetId(2), PollTarget::new("b.example.net", "u", "p")).await;

    let report = reconcile_once(&s.registry, s.targets.as_ref(), timeout).await.expect("reconcile");
    assert_eq!(report.started, vec![TargetId(1), TargetId(2)]);
    assert!(report.stopped.is_empty());

    let report = reconcile_once(&s.registry, s.targets.as_ref(), timeout).await.expect("reconcile");
    assert!(report.is_empty());

    s.targets.remove(TargetId(1)).await;
    let report = reconcile_once(&s.registry, s.targets.as_ref(), timeout).await.expect("reconcile");
    assert!(report.started.is_empty());
    assert_eq!(report.stopped.len(), 1);
    assert_eq!(report.stopped[0].0, TargetId(1));
    assert_ne!(report.stopped[0].1, StopResult::NotRunning);
    assert_eq!(s.registry.running(), vec![TargetId(2)]);

    s.registry.stop_all(timeout).await;
}
