//! Incremental reads of the active file.
//!
//! The primary path is an FTP range read (REST + RETR) from the stored
//! offset. When that yields nothing and discovery supplied a download URL,
//! the whole object is fetched over HTTP and everything before the offset is
//! dropped client-side.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::chooser::ActiveFile;
use crate::discovery::Discovery;
use crate::error::{PollError, TransportError};
use crate::sink::Transport;
use crate::transport::{RemoteSession, WorkerSession};

/// New bytes for one cycle and where they came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delta {
    Empty,
    /// Range read starting at `start`.
    Primary { start: u64, bytes: Vec<u8> },
    /// Full download of `total` bytes, already sliced at `start`.
    Secondary { start: u64, bytes: Vec<u8>, total: u64 },
    /// The downloaded object is shorter than the offset it was asked for.
    Truncated { total: u64 },
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.bytes().is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        match self {
            Delta::Empty | Delta::Truncated { .. } => &[],
            Delta::Primary { bytes, .. } | Delta::Secondary { bytes, .. } => bytes,
        }
    }

    /// Offset the batch starts at.
    pub fn start(&self) -> Option<u64> {
        match self {
            Delta::Empty | Delta::Truncated { .. } => None,
            Delta::Primary { start, .. } | Delta::Secondary { start, .. } => Some(*start),
        }
    }

    pub fn transport(&self) -> Option<Transport> {
        match self {
            Delta::Empty | Delta::Truncated { .. } => None,
            Delta::Primary { .. } => Some(Transport::Ftp),
            Delta::Secondary { .. } => Some(Transport::Api),
        }
    }

    /// Offset to persist after consuming this delta.
    ///
    /// A range read advances by the bytes received; a full download jumps
    /// to the object's total length.
    pub fn next_offset(&self) -> Option<u64> {
        match self {
            Delta::Empty | Delta::Truncated { .. } => None,
            Delta::Primary { start, bytes } => Some(start + bytes.len() as u64),
            Delta::Secondary { total, .. } => Some(*total),
        }
    }
}

/// SIZE and MDTM of the active file, each best-effort.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Heartbeat {
    pub size: Option<u64>,
    pub modified: Option<DateTime<Utc>>,
}

pub fn probe(session: &mut dyn RemoteSession, name: &str) -> Heartbeat {
    Heartbeat {
        size: session.size(name).ok(),
        modified: session.modified(name).ok(),
    }
}

/// Reads `name` from `offset` to EOF in binary mode.
///
/// A REST refused because the session is still in ASCII mode is retried
/// once after forcing binary; a second refusal yields no bytes rather than
/// an error.
pub fn read_range(session: &mut dyn RemoteSession, name: &str, offset: u64) -> Result<Vec<u8>, TransportError> {
    if let Err(e) = session.set_binary() {
        debug!("TYPE I rejected before range read: {}", e);
    }

    if offset > 0 {
        if let Err(e) = session.restart_at(offset) {
            if !e.is_ascii_mode_refusal() {
                return Err(e);
            }
            debug!("REST {} refused ({}); forcing binary and retrying", offset, e);
            if let Err(e) = session.set_binary() {
                debug!("TYPE I rejected on retry: {}", e);
            }
            if let Err(e) = session.restart_at(offset) {
                warn!("REST {} still refused after forcing binary: {}", offset, e);
                return Ok(Vec::new());
            }
        }
    }

    session.retrieve(name)
}

/// Drops everything before `offset` from a fully downloaded object.
///
/// The object's length is authoritative: an offset past it yields
/// [`Delta::Truncated`] so the caller can start over.
pub fn slice_full_object(full: Vec<u8>, offset: u64) -> Delta {
    let total = full.len() as u64;
    if offset > total {
        return Delta::Truncated { total };
    }
    if offset == total {
        return Delta::Empty;
    }
    let bytes = full[offset as usize..].to_vec();
    Delta::Secondary {
        start: offset,
        bytes,
        total,
    }
}

/// Fetches the bytes appended to `active` since `offset`.
///
/// Transport failures on either path are logged and yield
/// [`Delta::Empty`]; only losing the session itself is an error.
///
/// # Arguments
///
/// * `session` - Open session, already in the log directory
/// * `discovery` - Used for the full download when a URL is known
/// * `active` - File to read, with its optional download URL
/// * `offset` - Bytes already consumed
///
/// # Returns
///
/// [`Delta::Primary`] for a range read, [`Delta::Secondary`] for a sliced
/// download, [`Delta::Truncated`] when the download is shorter than
/// `offset`, or [`Delta::Empty`].
pub async fn fetch_delta(
    session: &mut WorkerSession,
    discovery: &dyn Discovery,
    active: &ActiveFile,
    offset: u64,
) -> Result<Delta, PollError> {
    let name = active.name.clone();
    let primary = session.run(move |s| read_range(s, &name, offset)).await?;

    match primary {
        Ok(bytes) if !bytes.is_empty() => {
            return Ok(Delta::Primary { start: offset, bytes });
        }
        Ok(_) => {}
        Err(e) => info!("FTP RETR failed for {}: {}", active.name, e),
    }

    let Some(url) = active.download_url.as_deref() else {
        return Ok(Delta::Empty);
    };

    match discovery.download(url).await {
        Ok(full) => {
            let total = full.len();
            let delta = slice_full_object(full, offset);
            info!(
                "HTTP fallback used for {} (downloaded {} bytes, tail={} from offset {})",
                active.name,
                total,
                delta.bytes().len(),
                offset
            );
            Ok(delta)
        }
        Err(e) => {
            info!("HTTP fallback failed for {}: {}", active.name, e);
            Ok(Delta::Empty)
        }
    }
}
