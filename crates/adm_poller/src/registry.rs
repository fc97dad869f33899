//! Running poll loops, keyed by target id.

use dashmap::DashMap;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::poller::{PollPhase, PollerDeps, TargetPoller};
use crate::target::TargetId;

/// Default wait for a loop to exit before it is aborted.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(2);

struct PollerHandle {
    stop: watch::Sender<bool>,
    phase: watch::Receiver<PollPhase>,
    task: JoinHandle<()>,
}

/// How a stop request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopResult {
    NotRunning,
    /// The loop saw the signal and exited in time.
    Stopped,
    /// The loop did not exit in time and its task was aborted.
    Aborted,
}

/// Maps target ids to their poll loop's stop signal and task.
pub struct PollerRegistry {
    deps: PollerDeps,
    loops: DashMap<TargetId, PollerHandle>,
}

impl std::fmt::Debug for PollerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollerRegistry")
            .field("running", &self.running())
            .finish()
    }
}

impl PollerRegistry {
    pub fn new(deps: PollerDeps) -> Self {
        Self {
            deps,
            loops: DashMap::new(),
        }
    }

    /// Spawns a loop for `target` unless one is already running.
    ///
    /// A finished loop (for instance one whose target was unconfigured) is
    /// replaced. Must be called from within a Tokio runtime.
    ///
    /// # Arguments
    ///
    /// * `target` - Id the loop reads its settings and state under
    ///
    /// # Returns
    ///
    /// `true` if a new loop was started, `false` if one was already running.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// # use adm_poller::{PollerRegistry, TargetId};
    /// # fn demo(registry: &PollerRegistry) {
    /// assert!(registry.start(TargetId(7)));
    /// assert!(!registry.start(TargetId(7)));
    /// # }
    /// ```
    pub fn start(&self, target: TargetId) -> bool {
        match self.loops.entry(target) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                if !entry.get().task.is_finished() {
                    return false;
                }
                entry.insert(self.spawn(target));
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(self.spawn(target));
            }
        }
        info!(target_id = %target, "Started poll loop");
        true
    }

    fn spawn(&self, target: TargetId) -> PollerHandle {
        let poller = TargetPoller::new(target, self.deps.clone());
        let phase = poller.subscribe_phase();
        let (stop, stop_rx) = watch::channel(false);
        let task = tokio::spawn(poller.run(stop_rx));
        PollerHandle { stop, phase, task }
    }

    /// Signals the loop to stop and waits up to `timeout` for it to exit.
    ///
    /// The loop is removed from the registry either way; one that does not
    /// exit in time is aborted.
    ///
    /// # Arguments
    ///
    /// * `target` - Loop to stop
    /// * `timeout` - Grace period before the task is aborted
    ///
    /// # Returns
    ///
    /// [`StopResult::NotRunning`] when no loop was registered, otherwise
    /// whether it stopped on its own or had to be aborted.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// # use adm_poller::{PollerRegistry, StopResult, TargetId, DEFAULT_STOP_TIMEOUT};
    /// # async fn demo(registry: &PollerRegistry) {
    /// match registry.stop(TargetId(7), DEFAULT_STOP_TIMEOUT).await {
    ///     StopResult::Aborted => eprintln!("loop was stuck"),
    ///     _ => {}
    /// }
    /// # }
    /// ```
    pub async fn stop(&self, target: TargetId, timeout: Duration) -> StopResult {
        let Some((_, handle)) = self.loops.remove(&target) else {
            return StopResult::NotRunning;
        };
        Self::shutdown(target, handle, timeout).await
    }

    async fn shutdown(target: TargetId, handle: PollerHandle, timeout: Duration) -> StopResult {
        let PollerHandle { stop, task, .. } = handle;
        let _ = stop.send(true);

        let abort = task.abort_handle();
        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(())) => {
                info!(target_id = %target, "Poll loop stopped");
                StopResult::Stopped
            }
            Ok(Err(e)) => {
                warn!(target_id = %target, "Poll loop ended abnormally: {}", e);
                StopResult::Stopped
            }
            Err(_) => {
                warn!(target_id = %target, "Poll loop did not stop within {:?}; aborting", timeout);
                abort.abort();
                StopResult::Aborted
            }
        }
    }

    /// Stops every loop concurrently.
    pub async fn stop_all(&self, timeout: Duration) -> Vec<(TargetId, StopResult)> {
        let targets = self.running();
        let handles: Vec<(TargetId, PollerHandle)> = targets
            .into_iter()
            .filter_map(|target| self.loops.remove(&target))
            .collect();

        let stops = handles
            .into_iter()
            .map(|(target, handle)| async move { (target, Self::shutdown(target, handle, timeout).await) });
        futures::future::join_all(stops).await
    }

    /// Ids with a registered loop, sorted.
    pub fn running(&self) -> Vec<TargetId> {
        let mut ids: Vec<TargetId> = self.loops.iter().map(|entry| *entry.key()).collect();
        ids.sort();
        ids
    }

    pub fn is_running(&self, target: TargetId) -> bool {
        self.loops
            .get(&target)
            .map(|handle| !handle.task.is_finished())
            .unwrap_or(false)
    }

    /// Current phase of a target's loop.
    pub fn phase(&self, target: TargetId) -> Option<PollPhase> {
        self.loops.get(&target).map(|handle| *handle.phase.borrow())
    }
}
