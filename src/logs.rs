// ABOUTME: Per-deployment log files: append, tail, follow, remove.
// ABOUTME: FileLogSink stores each deployment's output as a plain text file.

use async_trait::async_trait;
use futures::Stream;
use std::collections::VecDeque;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("log file {path} is unavailable: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl LogError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        LogError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Lines read from a log.
pub type LineStream = Pin<Box<dyn Stream<Item = Result<String, LogError>> + Send>>;

/// How to read a log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogRead {
    /// Only the last `n` lines already written.
    pub tail: Option<usize>,
    /// Keep yielding lines as they are appended, until the stream is dropped.
    pub follow: bool,
}

/// Stores deployment output.
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn append_log(&self, path: &Path, line: &str) -> Result<(), LogError>;

    async fn read_log(&self, path: &Path, read: LogRead) -> Result<LineStream, LogError>;

    /// Remove a log. Missing logs are not an error.
    async fn remove_log(&self, path: &Path) -> Result<(), LogError>;
}

/// Log files on the local filesystem.
#[derive(Debug, Clone)]
pub struct FileLogSink {
    poll_interval: Duration,
}

impl Default for FileLogSink {
    fn default() -> Self {
        Self::new()
    }
}

impl FileLogSink {
    pub fn new() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
        }
    }

    /// How often a followed log is checked for new lines.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

#[async_trait]
impl LogSink for FileLogSink {
    async fn append_log(&self, path: &Path, line: &str) -> Result<(), LogError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| LogError::io(path, e))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| LogError::io(path, e))?;
        let mut buf = String::with_capacity(line.len() + 1);
        buf.push_str(line);
        buf.push('\n');
        file.write_all(buf.as_bytes())
            .await
            .map_err(|e| LogError::io(path, e))?;
        Ok(())
    }

    async fn read_log(&self, path: &Path, read: LogRead) -> Result<LineStream, LogError> {
        let mut tailer = Tailer {
            path: path.to_path_buf(),
            offset: 0,
            pending: VecDeque::new(),
            partial: String::new(),
            follow: read.follow,
            poll_interval: self.poll_interval,
        };
        tailer.poll().await?;
        if !read.follow && !tailer.partial.is_empty() {
            let rest = std::mem::take(&mut tailer.partial);
            tailer.pending.push_back(rest);
        }
        if let Some(n) = read.tail {
            let skip = tailer.pending.len().saturating_sub(n);
            tailer.pending.drain(..skip);
        }

        Ok(Box::pin(futures::stream::unfold(
            tailer,
            |mut tailer| async move {
                loop {
                    if let Some(line) = tailer.pending.pop_front() {
                        return Some((Ok(line), tailer));
                    }
                    if !tailer.follow {
                        return None;
                    }
                    tokio::time::sleep(tailer.poll_interval).await;
                    if let Err(e) = tailer.poll().await {
                        tailer.follow = false;
                        return Some((Err(e), tailer));
                    }
                }
            },
        )))
    }

    async fn remove_log(&self, path: &Path) -> Result<(), LogError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LogError::io(path, e)),
        }
    }
}

/// Reads a log incrementally from the last seen offset.
struct Tailer {
    path: PathBuf,
    offset: u64,
    pending: VecDeque<String>,
    /// Text after the last newline, held until the line completes.
    partial: String,
    follow: bool,
    poll_interval: Duration,
}

impl Tailer {
    async fn poll(&mut self) -> Result<(), LogError> {
        let mut file = File::open(&self.path)
            .await
            .map_err(|e| LogError::io(&self.path, e))?;
        let len = file
            .metadata()
            .await
            .map_err(|e| LogError::io(&self.path, e))?
            .len();
        if len < self.offset {
            // Truncated underneath us; start over.
            self.offset = 0;
            self.partial.clear();
        }
        if len == self.offset {
            return Ok(());
        }

        file.seek(SeekFrom::Start(self.offset))
            .await
            .map_err(|e| LogError::io(&self.path, e))?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)
            .await
            .map_err(|e| LogError::io(&self.path, e))?;
        self.offset += bytes.len() as u64;

        self.partial.push_str(&String::from_utf8_lossy(&bytes));
        while let Some(i) = self.partial.find('\n') {
            let line: String = self.partial.drain(..=i).collect();
            self.pending
                .push_back(line.trim_end_matches(['\n', '\r']).to_string());
        }
        Ok(())
    }
}
