//! Line follower for growing log files
//!
//! Polls a file for appended data and yields complete lines. Survives
//! truncation (the file shrinks below the read offset) and rotation (the path
//! starts pointing at a different file): in both cases reading restarts at the
//! beginning of the current file.

use crate::error::{ExporterError, Result};
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct TailConfig {
    /// Delay between checks for new data once the end of file is reached.
    pub poll_interval: Duration,
    /// Read existing content instead of starting at the end of the file.
    pub from_beginning: bool,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            from_beginning: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailState {
    Tailing,
    /// The path is missing or unreadable; retried every poll.
    Reopening,
    /// Reading failed; the follower yields no more lines.
    Failed,
}

/// Identity of the file behind a path, used to notice rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileIdentity {
    #[cfg(unix)]
    dev: u64,
    #[cfg(unix)]
    ino: u64,
}

impl FileIdentity {
    #[cfg(unix)]
    fn of(meta: &std::fs::Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self {
            dev: meta.dev(),
            ino: meta.ino(),
        }
    }

    // Without inode numbers only truncation is detectable.
    #[cfg(not(unix))]
    fn of(_meta: &std::fs::Metadata) -> Self {
        Self {}
    }
}

pub struct LineFollower {
    path: PathBuf,
    config: TailConfig,
    reader: BufReader<File>,
    identity: FileIdentity,
    offset: u64,
    partial: Vec<u8>,
    state: TailState,
}

impl LineFollower {
    /// Open `path`, which must exist.
    pub async fn open(path: impl Into<PathBuf>, config: TailConfig) -> Result<Self> {
        let path = path.into();
        let source_err = |source: std::io::Error| ExporterError::Source {
            path: path.display().to_string(),
            source,
        };

        let file = File::open(&path).await.map_err(source_err)?;
        let meta = file.metadata().await.map_err(source_err)?;
        let offset = if config.from_beginning { 0 } else { meta.len() };
        let mut reader = BufReader::new(file);
        reader
            .seek(SeekFrom::Start(offset))
            .await
            .map_err(source_err)?;

        debug!(path = %path.display(), offset, "Opened source file");
        Ok(Self {
            identity: FileIdentity::of(&meta),
            path,
            config,
            reader,
            offset,
            partial: Vec::new(),
            state: TailState::Tailing,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> TailState {
        self.state
    }

    /// Byte offset of the next unread byte in the current file.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Wait for the next complete line, without its line terminator.
    pub async fn next_line(&mut self) -> Result<String> {
        loop {
            if self.state == TailState::Failed {
                return Err(ExporterError::Io(std::io::Error::new(
                    ErrorKind::Other,
                    format!("follower for '{}' has failed", self.path.display()),
                )));
            }
            if let Some(line) = self.read_line().await? {
                return Ok(line);
            }
            self.check_file().await;
            if self.state == TailState::Tailing && self.has_unread().await {
                continue;
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// One complete line from the current position, or `None` at end of file.
    async fn read_line(&mut self) -> Result<Option<String>> {
        let mut buf = Vec::new();
        let read = match self.reader.read_until(b'\n', &mut buf).await {
            Ok(read) => read,
            Err(e) => {
                self.state = TailState::Failed;
                return Err(ExporterError::Io(e));
            }
        };
        if read == 0 {
            return Ok(None);
        }
        self.offset += read as u64;
        self.partial.extend_from_slice(&buf);
        if !self.partial.ends_with(b"\n") {
            // Writer has not finished this line yet.
            return Ok(None);
        }

        let mut bytes = std::mem::take(&mut self.partial);
        bytes.pop();
        if bytes.ends_with(b"\r") {
            bytes.pop();
        }
        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }

    async fn has_unread(&self) -> bool {
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) => FileIdentity::of(&meta) == self.identity && meta.len() > self.offset,
            Err(_) => false,
        }
    }

    /// Detect truncation and rotation of the followed path.
    async fn check_file(&mut self) {
        let meta = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta,
            Err(e) => {
                if self.state != TailState::Reopening {
                    warn!(path = %self.path.display(), error = %e, "Source file unavailable, waiting for it to reappear");
                    self.state = TailState::Reopening;
                }
                return;
            }
        };

        if FileIdentity::of(&meta) != self.identity {
            self.reopen().await;
            return;
        }

        if meta.len() < self.offset {
            info!(path = %self.path.display(), "Source file truncated, reading from start");
            match self.reader.seek(SeekFrom::Start(0)).await {
                Ok(_) => {
                    self.offset = 0;
                    self.partial.clear();
                }
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "Failed to rewind truncated file");
                    self.state = TailState::Failed;
                    return;
                }
            }
        }

        if self.state == TailState::Reopening {
            info!(path = %self.path.display(), "Source file available again");
            self.state = TailState::Tailing;
        }
    }

    async fn reopen(&mut self) {
        let file = match File::open(&self.path).await {
            Ok(file) => file,
            Err(e) => {
                if self.state != TailState::Reopening {
                    warn!(path = %self.path.display(), error = %e, "Failed to reopen rotated source file");
                    self.state = TailState::Reopening;
                }
                return;
            }
        };
        let identity = match file.metadata().await {
            Ok(meta) => FileIdentity::of(&meta),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to stat rotated source file");
                self.state = TailState::Reopening;
                return;
            }
        };

        if !self.partial.is_empty() {
            debug!(path = %self.path.display(), bytes = self.partial.len(), "Dropping unterminated line from rotated file");
            self.partial.clear();
        }
        info!(path = %self.path.display(), "Source file rotated, following new file");
        self.reader = BufReader::new(file);
        self.identity = identity;
        self.offset = 0;
        self.state = TailState::Tailing;
    }
}
