//! Remote session abstraction.
//!
//! Sessions are blocking (the FTP client is synchronous). The poll loop
//! never calls them on the async runtime directly: [`WorkerSession`] moves
//! the session onto the blocking pool for each operation and takes it back
//! afterwards, so a slow server only stalls its own target.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

use crate::error::{PollError, TransportError};
use crate::target::PollTarget;

/// One logged-in connection to a target's file server.
pub trait RemoteSession: Send {
    /// Enters the directory holding the logs.
    fn change_dir(&mut self, dir: &str) -> Result<(), TransportError>;

    /// Machine-readable listing (MLSD), one raw `facts; name` line per entry.
    fn list_facts(&mut self) -> Result<Vec<String>, TransportError>;

    /// Name-only listing (NLST).
    fn list_names(&mut self) -> Result<Vec<String>, TransportError>;

    /// Human-readable listing (LIST), raw lines.
    fn list_long(&mut self) -> Result<Vec<String>, TransportError>;

    fn size(&mut self, name: &str) -> Result<u64, TransportError>;

    fn modified(&mut self, name: &str) -> Result<DateTime<Utc>, TransportError>;

    /// Switches the data type to binary (`TYPE I`).
    fn set_binary(&mut self) -> Result<(), TransportError>;

    /// Sets the restart marker for the next retrieve (`REST`).
    fn restart_at(&mut self, offset: u64) -> Result<(), TransportError>;

    /// Retrieves `name` from the current restart marker to EOF.
    fn retrieve(&mut self, name: &str) -> Result<Vec<u8>, TransportError>;

    fn quit(&mut self) -> Result<(), TransportError>;
}

/// Opens sessions for a target. Called on the blocking pool.
pub trait Connector: Send + Sync {
    fn connect(&self, target: &PollTarget) -> Result<Box<dyn RemoteSession>, TransportError>;
}

/// A [`RemoteSession`] driven from async code via `spawn_blocking`.
pub struct WorkerSession {
    inner: Option<Box<dyn RemoteSession>>,
}

impl std::fmt::Debug for WorkerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerSession")
            .field("open", &self.inner.is_some())
            .finish()
    }
}

impl WorkerSession {
    /// Connects and logs in on the blocking pool.
    pub async fn open(connector: Arc<dyn Connector>, target: PollTarget) -> Result<Self, PollError> {
        let session = tokio::task::spawn_blocking(move || connector.connect(&target)).await??;
        Ok(Self { inner: Some(session) })
    }

    /// Runs `op` against the session on the blocking pool.
    ///
    /// If `op` panics the session is dropped and every later call fails
    /// with [`PollError::SessionLost`].
    pub async fn run<T, F>(&mut self, op: F) -> Result<T, PollError>
    where
        F: FnOnce(&mut dyn RemoteSession) -> T + Send + 'static,
        T: Send + 'static,
    {
        let mut session = self.inner.take().ok_or(PollError::SessionLost)?;
        let (session, out) = tokio::task::spawn_blocking(move || {
            let out = op(session.as_mut());
            (session, out)
        })
        .await?;
        self.inner = Some(session);
        Ok(out)
    }

    /// Sends QUIT; failures only matter for logging.
    pub async fn close(mut self) {
        if let Err(e) = self.run(|session| session.quit()).await.and_then(|r| r.map_err(PollError::from)) {
            debug!("Remote session did not close cleanly: {}", e);
        }
    }
}
