//! # Tracer
//!
//! Long-running process around [`adm_poller`]: it keeps one poll loop per
//! configured target, parses player positions out of the polled ADM lines
//! and appends them to per-player movement tracks.

pub mod cli;
pub mod config;
pub mod logging;
pub mod pipeline;
pub mod positions;
pub mod reconcile;
pub mod signals;
pub mod tracks;

pub use cli::CliArgs;
pub use config::AppConfig;
pub use pipeline::TrackingSink;
pub use positions::{parse_line, PositionEvent, PositionKind};
pub use reconcile::{reconcile_once, run_reconciler, ReconcileReport};
pub use tracks::{LiveRow, TrackDocument, TrackError, TrackPoint, TrackStore};
