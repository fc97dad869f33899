//! Error types for the ADM poller

use std::{io::Error as IoError, path::PathBuf};
use thiserror::Error;

/// Failures raised by a remote session (FTP control or data channel).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to resolve {0}")]
    Resolve(String),

    #[error("I/O error talking to remote: {0}")]
    Io(#[from] IoError),

    #[error("Remote refused command ({code}): {message}")]
    Refused { code: u32, message: String },

    #[error("Remote protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Range reads refused because the data type is still ASCII.
    ///
    /// Servers report this as `501 REST: Resuming transfers not allowed in
    /// ASCII mode` or some variant of it.
    pub fn is_ascii_mode_refusal(&self) -> bool {
        match self {
            TransportError::Refused { code, message } => {
                *code == 501 || message.to_ascii_lowercase().contains("ascii")
            }
            TransportError::Protocol(message) => message.to_ascii_lowercase().contains("ascii"),
            _ => false,
        }
    }
}

/// Directory scan errors
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Every listing strategy failed: {0}")]
    AllStrategiesFailed(String),
}

/// Secondary HTTP transport errors
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected status {0}")]
    Status(u16),

    #[error("Malformed response: {0}")]
    Malformed(String),
}

/// Poll state store errors
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Failed to read state file {0}: {1}")]
    FileRead(PathBuf, IoError),

    #[error("Failed to write state file {0}: {1}")]
    FileWrite(PathBuf, IoError),

    #[error("Failed to rename file from {0} to {1}: {2}")]
    FileRename(PathBuf, PathBuf, IoError),

    #[error("Failed to parse state file {0}: {1}")]
    Deserialization(PathBuf, serde_json::Error),

    #[error("Failed to serialize poll state: {0}")]
    Serialization(serde_json::Error),
}

/// Target configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read target file {0}: {1}")]
    FileRead(PathBuf, IoError),

    #[error("Failed to parse target file {0}: {1}")]
    Parse(PathBuf, toml::de::Error),

    #[error("Invalid target {0}: {1}")]
    Invalid(String, String),
}

/// Local mirror errors
#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("Failed to create directory {0}: {1}")]
    DirectoryCreate(PathBuf, IoError),

    #[error("Failed to write mirror {0}: {1}")]
    FileWrite(PathBuf, IoError),

    #[error("Failed to rename file from {0} to {1}: {2}")]
    FileRename(PathBuf, PathBuf, IoError),
}

/// Everything that can end one poll cycle early.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Mirror error: {0}")]
    Mirror(#[from] MirrorError),

    #[error("Worker thread failed: {0}")]
    Worker(#[from] tokio::task::JoinError),

    #[error("Remote session is no longer available")]
    SessionLost,
}
