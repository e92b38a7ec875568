//! Durable append-only log
//!
//! An indexed key/value log with synchronous flush. It doubles as an event
//! journal and as a snapshot store: replaying it forward, the last entry for a
//! key is that key's current value.
//!
//! Indices start at 1 and every write must use `current_index() + 1`.

use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::error::{DcaError, Result};

const LOG_FILE_NAME: &str = "wal.log";

/// A single log record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub index: u64,
    pub key: String,
    pub value: String,
}

/// Append-only, indexed log with synchronous durability
pub trait DurableLog: Send {
    /// Append an entry. Durable when this returns `Ok`.
    fn write(&mut self, index: u64, key: &str, value: &str) -> Result<()>;

    /// All entries in ascending index order
    fn iter(&self) -> Box<dyn Iterator<Item = &LogEntry> + '_>;

    /// Point lookup by index
    fn get(&self, index: u64) -> Option<&LogEntry>;

    /// Index of the last entry, 0 when empty
    fn current_index(&self) -> u64;

    fn close(&mut self) -> Result<()>;
}

fn check_next_index(current: u64, index: u64) -> Result<()> {
    if index != current + 1 {
        return Err(DcaError::Log(format!(
            "out of order write: expected index {}, got {}",
            current + 1,
            index
        )));
    }
    Ok(())
}

fn lookup(entries: &[LogEntry], index: u64) -> Option<&LogEntry> {
    entries
        .binary_search_by_key(&index, |e| e.index)
        .ok()
        .map(|pos| &entries[pos])
}

/// In-memory log for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryLog {
    entries: Vec<LogEntry>,
    closed: bool,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a log with existing entries, e.g. to simulate a restart
    pub fn with_entries(entries: Vec<LogEntry>) -> Self {
        Self {
            entries,
            closed: false,
        }
    }

}

impl DurableLog for MemoryLog {
    fn write(&mut self, index: u64, key: &str, value: &str) -> Result<()> {
        if self.closed {
            return Err(DcaError::Log("log is closed".to_string()));
        }
        check_next_index(self.current_index(), index)?;
        self.entries.push(LogEntry {
            index,
            key: key.to_string(),
            value: value.to_string(),
        });
        Ok(())
    }

    fn iter(&self) -> Box<dyn Iterator<Item = &LogEntry> + '_> {
        Box::new(self.entries.iter())
    }

    fn get(&self, index: u64) -> Option<&LogEntry> {
        lookup(&self.entries, index)
    }

    fn current_index(&self) -> u64 {
        self.entries.last().map(|e| e.index).unwrap_or(0)
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

/// JSON-lines log file, one per pair directory.
///
/// Every write is flushed with `sync_data` before returning. On open, a
/// trailing partial line left by a crash mid-write is truncated away. A write
/// that fails is rolled back to the last acknowledged length; if that fails
/// too, the log closes itself.
#[derive(Debug)]
pub struct FileLog {
    path: PathBuf,
    file: Option<File>,
    entries: Vec<LogEntry>,
    /// Byte length of the acknowledged prefix
    len: u64,
}

impl FileLog {
    /// Open (or create) the log inside `dir`
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let path = dir.join(LOG_FILE_NAME);

        let (entries, valid_len) = if path.exists() {
            Self::load(&path)?
        } else {
            (Vec::new(), 0)
        };

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        if file.metadata()?.len() > valid_len {
            warn!(
                path = %path.display(),
                valid_len,
                "truncating torn tail of durable log"
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }

        info!(
            path = %path.display(),
            entries = entries.len(),
            "opened durable log"
        );

        Ok(Self {
            path,
            file: Some(file),
            entries,
            len: valid_len,
        })
    }

    /// Parse the file; returns entries and the byte length of the valid prefix
    fn load(path: &Path) -> Result<(Vec<LogEntry>, u64)> {
        let data = std::fs::read(path)?;
        let mut entries: Vec<LogEntry> = Vec::new();
        let mut offset = 0usize;
        let mut valid_len = 0usize;

        while offset < data.len() {
            let Some(rel_end) = data[offset..].iter().position(|b| *b == b'\n') else {
                // No terminator: write was interrupted
                debug!(offset, "ignoring unterminated trailing log line");
                break;
            };
            let line = &data[offset..offset + rel_end];
            let next = offset + rel_end + 1;

            match serde_json::from_slice::<LogEntry>(line) {
                Ok(entry) => {
                    if let Some(last) = entries.last() {
                        if entry.index <= last.index {
                            return Err(DcaError::Log(format!(
                                "non-monotonic index {} after {} in {}",
                                entry.index,
                                last.index,
                                path.display()
                            )));
                        }
                    }
                    entries.push(entry);
                }
                Err(e) if next >= data.len() => {
                    warn!(error = %e, "ignoring malformed trailing log line");
                    break;
                }
                Err(e) => {
                    warn!(offset, error = %e, "skipping malformed log line");
                }
            }

            offset = next;
            valid_len = next;
        }

        Ok((entries, valid_len as u64))
    }
}

impl DurableLog for FileLog {
    fn write(&mut self, index: u64, key: &str, value: &str) -> Result<()> {
        check_next_index(self.current_index(), index)?;
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| DcaError::Log("log is closed".to_string()))?;

        let entry = LogEntry {
            index,
            key: key.to_string(),
            value: value.to_string(),
        };
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');

        let on_disk = file.metadata()?.len();
        if on_disk < self.len {
            return Err(DcaError::Log(format!(
                "{} shrank to {} bytes, expected {}",
                self.path.display(),
                on_disk,
                self.len
            )));
        }
        if on_disk > self.len {
            warn!(
                path = %self.path.display(),
                expected = self.len,
                on_disk,
                "discarding unacknowledged bytes in durable log"
            );
            file.set_len(self.len)?;
        }

        let appended = file.write_all(&line).and_then(|()| file.sync_data());
        if let Err(e) = appended {
            let rollback = file.set_len(self.len).and_then(|()| file.sync_data());
            if let Err(rollback_err) = rollback {
                error!(
                    path = %self.path.display(),
                    error = %e,
                    rollback_error = %rollback_err,
                    "durable log rollback failed, closing log"
                );
                self.file = None;
                return Err(DcaError::Log(format!(
                    "append of index {} failed ({}) and could not be rolled back ({})",
                    index, e, rollback_err
                )));
            }
            return Err(DcaError::Log(format!("append of index {} failed: {}", index, e)));
        }

        self.len += line.len() as u64;
        self.entries.push(entry);
        Ok(())
    }

    fn iter(&self) -> Box<dyn Iterator<Item = &LogEntry> + '_> {
        Box::new(self.entries.iter())
    }

    fn get(&self, index: u64) -> Option<&LogEntry> {
        lookup(&self.entries, index)
    }

    fn current_index(&self) -> u64 {
        self.entries.last().map(|e| e.index).unwrap_or(0)
    }

    fn close(&mut self) -> Result<()> {
        if let Some(file) = self.file.take() {
            file.sync_all()?;
            debug!(path = %self.path.display(), "closed durable log");
        }
        Ok(())
    }
}

impl Drop for FileLog {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "failed to close durable log");
        }
    }
}
