//! Where accepted lines go.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;

use crate::target::TargetId;

/// How a batch of bytes reached us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    /// FTP range read.
    Ftp,
    /// Full download through the discovery API URL.
    Api,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Ftp => f.write_str("ftp"),
            Transport::Api => f.write_str("api"),
        }
    }
}

/// Provenance of one dispatched line, rendered as
/// `{transport}:{file}#~{batch_start}+{index}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRef {
    pub transport: Transport,
    pub file: String,
    pub batch_start: u64,
    pub index: usize,
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}#~{}+{}", self.transport, self.file, self.batch_start, self.index)
    }
}

/// Downstream consumer of accepted lines.
///
/// Called inline from the poll loop, in batch order; a slow sink slows its
/// target's polling.
#[async_trait]
pub trait LineSink: Send + Sync {
    async fn on_line(&self, target: TargetId, line: &str, source_ref: &str, observed_at: DateTime<Utc>);
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardSink;

#[async_trait]
impl LineSink for DiscardSink {
    async fn on_line(&self, _target: TargetId, _line: &str, _source_ref: &str, _observed_at: DateTime<Utc>) {}
}
