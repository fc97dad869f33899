//! Picks the one active log file out of a scan.

use crate::discovery::DiscoveryHint;
use crate::naming::is_log_file;
use crate::scanner::Candidate;

/// Why a file was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChoiceOrigin {
    /// Named by the discovery API.
    Discovery,
    /// Newest entry of the directory scan.
    Scan,
}

/// The file to tail this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveFile {
    pub name: String,
    /// Size reported by the scan, if the file was in it.
    pub size_hint: Option<u64>,
    /// Direct download URL from discovery, if any.
    pub download_url: Option<String>,
    pub origin: ChoiceOrigin,
}

/// Decides the active file.
///
/// A discovery hint always wins. Otherwise the candidate with the greatest
/// `(time, name)` pair is chosen, where time is the protocol modification
/// time or the filename stamp; a candidate with a time beats any without.
/// With no times at all this is the lexicographically greatest name.
pub fn choose_active(candidates: &[Candidate], hint: Option<&DiscoveryHint>) -> Option<ActiveFile> {
    if let Some(hint) = hint {
        let size_hint = candidates
            .iter()
            .find(|c| c.name == hint.file_name)
            .and_then(|c| c.size);
        return Some(ActiveFile {
            name: hint.file_name.clone(),
            size_hint,
            download_url: Some(hint.download_url.clone()),
            origin: ChoiceOrigin::Discovery,
        });
    }

    candidates
        .iter()
        .filter(|c| is_log_file(&c.name))
        .max_by(|a, b| (a.effective_time(), &a.name).cmp(&(b.effective_time(), &b.name)))
        .map(|c| ActiveFile {
            name: c.name.clone(),
            size_hint: c.size,
            download_url: None,
            origin: ChoiceOrigin::Scan,
        })
}
