//! The per-target poll loop.
//!
//! One [`TargetPoller`] owns everything a target needs between cycles: its
//! [`PollState`], its [`LineWindow`] and its [`MirrorLog`]. Nothing here is
//! shared with other targets; the only outside handle is the stop signal.

use chrono::Utc;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::chooser::{choose_active, ChoiceOrigin};
use crate::dedupe::LineWindow;
use crate::discovery::{Discovery, DiscoveryOutcome};
use crate::error::{ConfigError, PollError};
use crate::fetcher::{fetch_delta, probe, Delta};
use crate::mirror::{mirror_path, MirrorLog, MIRROR_CAPACITY};
use crate::scanner::Scanner;
use crate::sink::{LineSink, SourceRef};
use crate::state::{PollState, PollStateStore};
use crate::target::{PollTarget, TargetId, TargetSource, MIN_INTERVAL_SECS};
use crate::transport::{Connector, WorkerSession};

/// Where a poll loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPhase {
    Idle,
    Connecting,
    Listing,
    Choosing,
    Fetching,
    Dispatching,
    Sleeping,
    Cancelled,
}

/// How one cycle ended, when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The target is no longer configured.
    NoConfig,
    /// The scan found nothing and discovery named nothing.
    NoActiveFile,
    /// The stored offset ran past the file; it was reset and nothing read.
    Truncated { file: String },
    /// Nothing new to read.
    NoDelta { file: String },
    /// New bytes were read and their lines dispatched.
    Dispatched {
        file: String,
        lines: usize,
        accepted: usize,
        offset: u64,
    },
}

/// Collaborators shared by every poll loop.
#[derive(Clone)]
pub struct PollerDeps {
    pub targets: Arc<dyn TargetSource>,
    pub state_store: Arc<dyn PollStateStore>,
    pub connector: Arc<dyn Connector>,
    pub discovery: Arc<dyn Discovery>,
    pub sink: Arc<dyn LineSink>,
    pub scanner: Arc<Scanner>,
    pub mirror_dir: PathBuf,
}

impl std::fmt::Debug for PollerDeps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollerDeps")
            .field("scanner", &self.scanner)
            .field("mirror_dir", &self.mirror_dir)
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Tails the active ADM file of one target.
pub struct TargetPoller {
    id: TargetId,
    deps: PollerDeps,
    state: PollState,
    window: LineWindow,
    mirror: MirrorLog,
    interval: Duration,
    phase: watch::Sender<PollPhase>,
}

impl TargetPoller {
    pub fn new(id: TargetId, deps: PollerDeps) -> Self {
        let mirror = MirrorLog::new(mirror_path(&deps.mirror_dir, id), MIRROR_CAPACITY);
        let (phase, _) = watch::channel(PollPhase::Idle);
        Self {
            id,
            deps,
            state: PollState::default(),
            window: LineWindow::default(),
            mirror,
            interval: Duration::from_secs(MIN_INTERVAL_SECS),
            phase,
        }
    }

    pub fn id(&self) -> TargetId {
        self.id
    }

    pub fn state(&self) -> &PollState {
        &self.state
    }

    pub fn mirror(&self) -> &MirrorLog {
        &self.mirror
    }

    pub fn phase(&self) -> PollPhase {
        *self.phase.borrow()
    }

    /// Follows phase changes from outside the loop.
    pub fn subscribe_phase(&self) -> watch::Receiver<PollPhase> {
        self.phase.subscribe()
    }

    fn set_phase(&self, phase: PollPhase) {
        self.phase.send_replace(phase);
    }

    /// Loads persisted state and the mirror tail. Called once before the
    /// first cycle; a state store failure starts from scratch.
    pub async fn restore(&mut self) {
        match self.deps.state_store.load(self.id).await {
            Ok(state) => {
                debug!(
                    "Restored state: file={:?} offset={}",
                    state.latest_file, state.offset
                );
                self.state = state;
            }
            Err(e) => warn!("Could not load poll state, starting fresh: {}", e),
        }
        let path = self.mirror.path().to_path_buf();
        self.mirror = MirrorLog::load(path, MIRROR_CAPACITY).await;
    }

    async fn persist(&self) -> Result<(), PollError> {
        self.deps.state_store.save(self.id, &self.state).await?;
        Ok(())
    }

    /// Runs cycles until `stop` flips to `true` or its sender goes away.
    #[instrument(name = "poll_loop", skip_all, fields(target_id = %self.id))]
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) {
        info!("Poll loop started");
        self.restore().await;

        loop {
            if *stop.borrow() {
                break;
            }

            match AssertUnwindSafe(self.poll_once()).catch_unwind().await {
                Ok(Ok(CycleOutcome::NoConfig)) => {
                    info!("Target no longer configured; stopping");
                    break;
                }
                Ok(Ok(outcome)) => debug!("Cycle finished: {:?}", outcome),
                Ok(Err(e)) => warn!("Poll cycle failed: {}", e),
                Err(panic) => error!("Poll cycle panicked: {}", panic_message(panic.as_ref())),
            }

            self.set_phase(PollPhase::Sleeping);
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }

        if let Err(e) = self.mirror.flush().await {
            warn!("Final mirror flush failed: {}", e);
        }
        self.set_phase(PollPhase::Cancelled);
        info!("Poll loop stopped");
    }

    /// One connect, scan, choose, fetch and dispatch pass.
    pub async fn poll_once(&mut self) -> Result<CycleOutcome, PollError> {
        self.set_phase(PollPhase::Connecting);
        let Some(target) = self.deps.targets.target(self.id).await? else {
            return Ok(CycleOutcome::NoConfig);
        };
        target
            .validate()
            .map_err(|reason| ConfigError::Invalid(self.id.to_string(), reason))?;
        self.interval = target.interval();

        let mut session = WorkerSession::open(self.deps.connector.clone(), target.clone()).await?;
        let result = self.poll_session(&target, &mut session).await;
        session.close().await;
        result
    }

    async fn poll_session(&mut self, target: &PollTarget, session: &mut WorkerSession) -> Result<CycleOutcome, PollError> {
        let dir = target.remote_dir.clone();
        session.run(move |s| s.change_dir(&dir)).await??;

        self.set_phase(PollPhase::Listing);
        let scanner = self.deps.scanner.clone();
        let discovery: &dyn Discovery = self.deps.discovery.as_ref();
        let (scan, discovered) = tokio::join!(session.run(move |s| scanner.scan(s)), discovery.discover(target));
        let report = scan??;

        for (strategy, reason) in &report.failures {
            debug!("{} listing unavailable: {}", strategy, reason);
        }
        match &discovered {
            DiscoveryOutcome::Found(hint) => debug!("Discovery names {}", hint.file_name),
            DiscoveryOutcome::Unavailable(reason) => debug!("Discovery unavailable: {}", reason),
        }
        debug!(
            "Scan found {} candidate(s): {:?}",
            report.candidates.len(),
            report.candidates.iter().rev().take(5).map(|c| c.name.as_str()).collect::<Vec<_>>()
        );

        self.set_phase(PollPhase::Choosing);
        let Some(active) = choose_active(&report.candidates, discovered.hint()) else {
            info!("No ADM files in {}", target.remote_dir);
            return Ok(CycleOutcome::NoActiveFile);
        };
        if active.origin == ChoiceOrigin::Discovery
            && !report.candidates.iter().any(|c| c.name == active.name)
        {
            info!("Discovery chose {} which the scan did not list", active.name);
        }

        let previous = self.state.latest_file.clone();
        if self.state.switch_to(&active.name) {
            info!(
                "Active file is now {} (was {})",
                active.name,
                previous.as_deref().unwrap_or("none")
            );
            self.persist().await?;
        }

        let name = active.name.clone();
        let heartbeat = session.run(move |s| probe(s, &name)).await?;
        debug!(
            "Heartbeat {}: size={:?} mdtm={:?} offset={}",
            active.name, heartbeat.size, heartbeat.modified, self.state.offset
        );

        let known_size = heartbeat.size.or(active.size_hint);
        let stored = self.state.offset;
        if self.state.reset_if_truncated(known_size) {
            warn!(
                "{} shrank to {:?} bytes below offset {}; starting over next cycle",
                active.name, known_size, stored
            );
            self.persist().await?;
            return Ok(CycleOutcome::Truncated { file: active.name });
        }

        self.set_phase(PollPhase::Fetching);
        let delta = fetch_delta(session, discovery, &active, self.state.offset).await?;
        if let Delta::Truncated { total } = delta {
            let stored = self.state.offset;
            if self.state.reset_if_truncated(Some(total)) {
                warn!(
                    "{} downloaded at {} bytes, below offset {}; starting over next cycle",
                    active.name, total, stored
                );
                self.persist().await?;
            }
            return Ok(CycleOutcome::Truncated { file: active.name });
        }
        let (Some(transport), Some(batch_start), Some(next_offset)) =
            (delta.transport(), delta.start(), delta.next_offset())
        else {
            return Ok(CycleOutcome::NoDelta { file: active.name });
        };
        if delta.is_empty() {
            return Ok(CycleOutcome::NoDelta { file: active.name });
        }

        self.set_phase(PollPhase::Dispatching);
        let observed_at = Utc::now();
        let text = String::from_utf8_lossy(delta.bytes());
        let mut lines = 0;
        let mut accepted = 0;
        for (index, line) in text.lines().enumerate() {
            lines += 1;
            if !self.window.accept(line) {
                continue;
            }
            let source_ref = SourceRef {
                transport,
                file: active.name.clone(),
                batch_start,
                index,
            };
            self.mirror.push(line);
            self.deps
                .sink
                .on_line(self.id, line, &source_ref.to_string(), observed_at)
                .await;
            accepted += 1;
        }

        self.state.offset = next_offset;
        self.persist().await?;
        self.mirror.flush().await?;

        info!(
            "{} via {}: {} line(s), {} new, offset {} -> {}",
            active.name, transport, lines, accepted, batch_start, next_offset
        );
        Ok(CycleOutcome::Dispatched {
            file: active.name,
            lines,
            accepted,
            offset: next_offset,
        })
    }
}
