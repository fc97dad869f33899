//! Rolling local copy of a target's most recent accepted lines.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

use crate::error::MirrorError;
use crate::target::TargetId;

pub const MIRROR_CAPACITY: usize = 8000;

/// File name of a target's mirror inside the mirror directory.
pub fn mirror_path(dir: &Path, target: TargetId) -> PathBuf {
    dir.join(format!("latest_adm_{}.log", target))
}

/// Bounded FIFO of lines, persisted by whole-file atomic replace.
#[derive(Debug)]
pub struct MirrorLog {
    path: PathBuf,
    lines: VecDeque<String>,
    capacity: usize,
    dirty: bool,
}

impl MirrorLog {
    pub fn new(path: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            path: path.into(),
            lines: VecDeque::new(),
            capacity: capacity.max(1),
            dirty: false,
        }
    }

    /// Seeds the buffer from the tail of an existing mirror file.
    ///
    /// A missing or unreadable file just yields an empty mirror.
    pub async fn load(path: impl Into<PathBuf>, capacity: usize) -> Self {
        let mut mirror = Self::new(path, capacity);
        match tokio::fs::read(&mirror.path).await {
            Ok(bytes) => {
                let text = String::from_utf8_lossy(&bytes);
                for line in text.lines().filter(|l| !l.is_empty()) {
                    mirror.append(line.to_string());
                }
                debug!("Loaded {} mirrored line(s) from {}", mirror.lines.len(), mirror.path.display());
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => debug!("Ignoring unreadable mirror {}: {}", mirror.path.display(), e),
        }
        mirror
    }

    fn append(&mut self, line: String) {
        self.lines.push_back(line);
        while self.lines.len() > self.capacity {
            self.lines.pop_front();
        }
    }

    pub fn push(&mut self, line: &str) {
        self.append(line.to_string());
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    /// Rewrites the mirror file if anything was pushed since the last flush.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub async fn flush(&mut self) -> Result<(), MirrorError> {
        if !self.dirty {
            return Ok(());
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| MirrorError::DirectoryCreate(parent.to_path_buf(), e))?;
        }

        let mut body = String::with_capacity(self.lines.iter().map(|l| l.len() + 1).sum());
        for line in &self.lines {
            body.push_str(line);
            body.push('\n');
        }

        let temp_path = self.path.with_extension("log.tmp");
        let mut file = tokio::fs::File::create(&temp_path)
            .await
            .map_err(|e| MirrorError::FileWrite(temp_path.clone(), e))?;
        file.write_all(body.as_bytes())
            .await
            .map_err(|e| MirrorError::FileWrite(temp_path.clone(), e))?;
        file.sync_all()
            .await
            .map_err(|e| MirrorError::FileWrite(temp_path.clone(), e))?;
        drop(file);

        tokio::fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| MirrorError::FileRename(temp_path.clone(), self.path.clone(), e))?;

        self.dirty = false;
        debug!("Mirror written with {} line(s)", self.lines.len());
        Ok(())
    }
}
