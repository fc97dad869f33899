//! Tracer entry point.
//!
//! Loads configuration, wires the poller to the track store and runs until
//! SIGINT or SIGTERM, then stops every poll loop and flushes buffered points.

use adm_poller::{
    Discovery, FtpConnector, JsonPollStateStore, NitradoDiscovery, NoDiscovery, PollerDeps, PollerRegistry, Scanner,
    TargetSource, TomlTargetStore,
};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use tracer::config::AppConfig;
use tracer::logging::setup_logging;
use tracer::reconcile::{reconcile_once, run_reconciler};
use tracer::signals::wait_for_shutdown;
use tracer::tracks::{TrackStore, FLUSH_INTERVAL};
use tracer::{CliArgs, TrackingSink};

pub struct Application {
    config: AppConfig,
    registry: Arc<PollerRegistry>,
    targets: Arc<dyn TargetSource>,
    tracks: Arc<TrackStore>,
}

impl Application {
    pub async fn new(args: CliArgs) -> Result<Self> {
        let mut config = AppConfig::load_from_file(&args.config_path).await?;
        config.apply_cli(&args);
        if let Err(e) = config.validate() {
            anyhow::bail!("Configuration validation failed: {}", e);
        }

        setup_logging(&config.logging)?;

        let paths = &config.paths;
        let targets: Arc<dyn TargetSource> = Arc::new(TomlTargetStore::new(paths.targets_file()));
        let tracks = Arc::new(
            TrackStore::open(paths.tracks_dir(), paths.index_file())
                .await
                .context("opening track store")?,
        );

        let discovery: Arc<dyn Discovery> = if config.discovery.enabled {
            let nitrado = NitradoDiscovery::new(&config.discovery.api_base, config.discovery.timeout())
                .context("building discovery client")?
                .with_download_timeout(config.discovery.download_timeout());
            Arc::new(nitrado)
        } else {
            Arc::new(NoDiscovery)
        };

        let registry = Arc::new(PollerRegistry::new(PollerDeps {
            targets: targets.clone(),
            state_store: Arc::new(JsonPollStateStore::new(paths.state_file())),
            connector: Arc::new(FtpConnector::new(config.poller.ftp_timeout())),
            discovery,
            sink: Arc::new(TrackingSink::new(tracks.clone())),
            scanner: Arc::new(Scanner::default()),
            mirror_dir: paths.mirror_dir(),
        }));

        info!(
            "Config: {} | Targets: {} | Data: {}",
            args.config_path.display(),
            paths.targets_file().display(),
            paths.data_dir().display()
        );

        Ok(Self {
            config,
            registry,
            targets,
            tracks,
        })
    }

    pub async fn run(self) -> Result<()> {
        let stop_timeout = self.config.poller.stop_timeout();

        match reconcile_once(&self.registry, self.targets.as_ref(), stop_timeout).await {
            Ok(report) => info!("Started {} poll loop(s)", report.started.len()),
            Err(e) => warn!("Failed to read targets at startup: {}", e),
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let reconciler = tokio::spawn(run_reconciler(
            self.registry.clone(),
            self.targets.clone(),
            self.config.poller.reconcile_interval(),
            stop_timeout,
            stop_rx.clone(),
        ));

        let flusher = {
            let tracks = self.tracks.clone();
            let mut stop = stop_rx;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(FLUSH_INTERVAL);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if let Err(e) = tracks.flush_if_due().await {
                                warn!("Periodic track flush failed: {}", e);
                            }
                        }
                        changed = stop.changed() => {
                            if changed.is_err() || *stop.borrow() {
                                break;
                            }
                        }
                    }
                }
            })
        };

        wait_for_shutdown().await.context("waiting for shutdown signal")?;
        info!("Shutdown signal received, stopping poll loops");

        let _ = stop_tx.send(true);
        let _ = reconciler.await;
        let _ = flusher.await;

        for (target, result) in self.registry.stop_all(stop_timeout).await {
            info!("[{}] Poll loop {:?}", target, result);
        }

        if let Err(e) = self.tracks.flush_all().await {
            error!("Failed to flush tracks on shutdown: {}", e);
        }
        info!("Tracer stopped");
        Ok(())
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    let app = Application::new(args).await?;
    app.run().await
}
