//! Keeps the set of running poll loops in line with the targets file.

use adm_poller::{ConfigError, PollerRegistry, StopResult, TargetId, TargetSource};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// What one reconcile pass changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub started: Vec<TargetId>,
    pub stopped: Vec<(TargetId, StopResult)>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.started.is_empty() && self.stopped.is_empty()
    }
}

/// Starts loops for configured targets and stops loops whose target is gone.
pub async fn reconcile_once(
    registry: &PollerRegistry,
    targets: &dyn TargetSource,
    stop_timeout: Duration,
) -> Result<ReconcileReport, ConfigError> {
    let configured: BTreeSet<TargetId> = targets.target_ids().await?.into_iter().collect();
    let mut report = ReconcileReport::default();

    for id in registry.running() {
        if !configured.contains(&id) {
            let result = registry.stop(id, stop_timeout).await;
            info!("[{}] Target removed, poll loop {:?}", id, result);
            report.stopped.push((id, result));
        }
    }

    for id in &configured {
        if registry.start(*id) {
            report.started.push(*id);
        }
    }

    if !report.is_empty() {
        info!(
            "Reconciled targets: {} started, {} stopped, {} running",
            report.started.len(),
            report.stopped.len(),
            registry.running().len()
        );
    }
    Ok(report)
}

/// Re-runs [`reconcile_once`] every `interval` until `stop` turns true.
pub async fn run_reconciler(
    registry: Arc<PollerRegistry>,
    targets: Arc<dyn TargetSource>,
    interval: Duration,
    stop_timeout: Duration,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
                continue;
            }
        }

        match reconcile_once(&registry, targets.as_ref(), stop_timeout).await {
            Ok(report) if report.is_empty() => debug!("Targets unchanged"),
            Ok(_) => {}
            Err(e) => warn!("Failed to read targets: {}", e),
        }
    }
    debug!("Reconciler stopped");
}
