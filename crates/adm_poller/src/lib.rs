//! # ADM Poller
//!
//! Tails the DayZ admin log ("ADM") of remotely hosted game servers.
//!
//! Each configured target gets its own poll loop that connects over FTP,
//! unions three directory listings, picks the active log file (or takes the
//! Nitrado API's word for it), reads only the bytes appended since the last
//! cycle and hands every new line to a [`LineSink`] exactly once.
//!
//! Offsets survive restarts through a [`PollStateStore`]; re-delivered lines
//! are filtered by a bounded [`LineWindow`]; a per-target [`MirrorLog`]
//! keeps the most recent lines on local disk for other readers.
//!
//! ```rust,no_run
//! use adm_poller::{
//!     FtpConnector, JsonPollStateStore, NoDiscovery, PollerDeps, PollerRegistry, Scanner,
//!     TargetId, TomlTargetStore, DiscardSink,
//! };
//! use std::sync::Arc;
//!
//! # async fn demo() {
//! let registry = PollerRegistry::new(PollerDeps {
//!     targets: Arc::new(TomlTargetStore::new("targets.toml")),
//!     state_store: Arc::new(JsonPollStateStore::new("data/poll_state.json")),
//!     connector: Arc::new(FtpConnector::default()),
//!     discovery: Arc::new(NoDiscovery),
//!     sink: Arc::new(DiscardSink),
//!     scanner: Arc::new(Scanner::default()),
//!     mirror_dir: "data/mirror".into(),
//! });
//! registry.start(TargetId(1));
//! # }
//! ```

pub mod chooser;
pub mod dedupe;
pub mod discovery;
pub mod error;
pub mod fetcher;
pub mod ftp;
pub mod mirror;
pub mod naming;
pub mod poller;
pub mod registry;
pub mod scanner;
pub mod sink;
pub mod state;
pub mod target;
pub mod transport;

pub use chooser::{choose_active, ActiveFile, ChoiceOrigin};
pub use dedupe::LineWindow;
pub use discovery::{Discovery, DiscoveryHint, DiscoveryOutcome, NitradoDiscovery, NoDiscovery};
pub use error::{ConfigError, DiscoveryError, MirrorError, PollError, ScanError, StateError, TransportError};
pub use fetcher::Delta;
pub use ftp::FtpConnector;
pub use mirror::MirrorLog;
pub use poller::{CycleOutcome, PollPhase, PollerDeps, TargetPoller};
pub use registry::{PollerRegistry, StopResult, DEFAULT_STOP_TIMEOUT};
pub use scanner::{Candidate, Scanner};
pub use sink::{DiscardSink, LineSink, SourceRef, Transport};
pub use state::{JsonPollStateStore, MemoryPollStateStore, PollState, PollStateStore};
pub use target::{InMemoryTargets, PollTarget, TargetId, TargetSource, TomlTargetStore};
pub use transport::{Connector, RemoteSession, WorkerSession};
