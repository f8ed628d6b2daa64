use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{debug, error, info, warn};

use kestrel_core::error::{KestrelError, Result};

use crate::record::ApprovalRecord;

/// File name of the log inside the store directory.
pub const LOG_FILE_NAME: &str = "approvals.jsonl";

/// Lock file held exclusively by the process that owns the store.
pub const LOCK_FILE_NAME: &str = "approvals.lock";

/// Append-only JSONL store for approval records.
///
/// Every state change appends a full snapshot of the record as one line.
/// Replaying the file keeps the last snapshot per record id, so re-opening
/// reconstructs the record set exactly as last persisted. A line torn by a
/// crash mid-write is truncated away on open; every earlier line is intact.
///
/// Only one `RecordLog` may own a store directory at a time: `open` takes an
/// exclusive advisory lock on `approvals.lock` and holds it until `close`
/// or drop.
pub struct RecordLog {
    path: PathBuf,
    file: Option<File>,
    lock: Option<File>,
    /// Length of the committed prefix. Failed appends are cut back to it.
    len: u64,
    fsync: bool,
    replayed: Vec<ApprovalRecord>,
}

impl RecordLog {
    /// Open (or create) the log under `dir` and replay its records.
    ///
    /// Fails with `Persistence` when another log already owns the store.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|e| {
            KestrelError::Persistence(format!(
                "failed to create store directory {}: {}",
                dir.display(),
                e
            ))
        })?;
        let lock = acquire_store_lock(dir)?;

        let path = dir.join(LOG_FILE_NAME);
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                KestrelError::Persistence(format!("failed to open {}: {}", path.display(), e))
            })?;

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        let intact = intact_len(&bytes);
        if intact < bytes.len() {
            warn!(
                path = %path.display(),
                dropped_bytes = bytes.len() - intact,
                "Truncating torn trailing record"
            );
            file.set_len(intact as u64)?;
            file.sync_data()?;
            bytes.truncate(intact);
        }
        file.seek(SeekFrom::End(0))?;

        let replayed = replay(&String::from_utf8_lossy(&bytes));
        info!(path = %path.display(), records = replayed.len(), "Record log opened");

        Ok(Self {
            path,
            file: Some(file),
            lock: Some(lock),
            len: intact as u64,
            fsync: true,
            replayed,
        })
    }

    /// Toggle syncing each append to disk (on by default).
    pub fn with_fsync(mut self, fsync: bool) -> Self {
        self.fsync = fsync;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records recovered at open, in first-seen order, each at its latest state.
    pub fn take_replayed(&mut self) -> Vec<ApprovalRecord> {
        std::mem::take(&mut self.replayed)
    }

    /// Persist a record snapshot. Returns only after the line is written
    /// (and synced, unless fsync is off).
    ///
    /// On failure the file is cut back to its last committed length, so a
    /// half-written line never glues onto the next record and a line whose
    /// sync failed does not resurface on replay. If even that fails the log
    /// closes itself.
    pub fn append(&mut self, record: &ApprovalRecord) -> Result<()> {
        let fsync = self.fsync;
        let file = self.file.as_mut().ok_or(KestrelError::QueueClosed)?;

        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let written = file.write_all(&line).and_then(|()| {
            if fsync {
                file.sync_data()
            } else {
                Ok(())
            }
        });
        if let Err(e) = written {
            self.rollback();
            return Err(KestrelError::Persistence(format!(
                "failed to persist record {}: {}",
                record.id, e
            )));
        }

        self.len += line.len() as u64;
        debug!(record_id = %record.id, decision = %record.decision, "Record persisted");
        Ok(())
    }

    fn rollback(&mut self) {
        let truncated = OpenOptions::new()
            .write(true)
            .open(&self.path)
            .and_then(|f| f.set_len(self.len).and_then(|()| f.sync_data()));
        if let Err(e) = truncated {
            error!(path = %self.path.display(), error = %e, "Record log rollback failed, closing log");
            self.file = None;
            self.lock = None;
        }
    }

    /// Rewrite the log with exactly one line per record.
    ///
    /// Writes a temporary file, syncs it, then renames it over the log, so a
    /// crash at any point leaves either the old or the new log in place. If
    /// the new log cannot be reopened after the rename, the log stays closed.
    pub fn compact(&mut self, records: &[ApprovalRecord]) -> Result<()> {
        let old = self.file.take().ok_or(KestrelError::QueueClosed)?;

        let tmp_path = self.path.with_extension("jsonl.tmp");
        let len = match write_snapshot(&tmp_path, records) {
            Ok(len) => len,
            Err(e) => {
                let _ = std::fs::remove_file(&tmp_path);
                self.file = Some(old);
                return Err(e);
            }
        };
        if let Err(e) = std::fs::rename(&tmp_path, &self.path) {
            let _ = std::fs::remove_file(&tmp_path);
            self.file = Some(old);
            return Err(KestrelError::Persistence(format!(
                "failed to replace {}: {}",
                self.path.display(),
                e
            )));
        }
        drop(old);

        let reopened = OpenOptions::new().append(true).open(&self.path).map_err(|e| {
            KestrelError::Persistence(format!(
                "failed to reopen {} after compaction: {}",
                self.path.display(),
                e
            ))
        })?;
        self.file = Some(reopened);
        self.len = len;
        info!(path = %self.path.display(), records = records.len(), "Record log compacted");
        Ok(())
    }

    /// Flush and release the file and the store lock. Further appends fail
    /// with `QueueClosed`.
    pub fn close(&mut self) -> Result<()> {
        let file = self.file.take();
        self.lock = None;
        if let Some(file) = file {
            file.sync_all()?;
            debug!(path = %self.path.display(), "Record log closed");
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.file.is_none()
    }

    /// Leave a torn fragment at the end of the log, as an interrupted write
    /// would, and make every following write fail.
    #[cfg(test)]
    pub(crate) fn break_writes(&mut self, fragment: &[u8]) -> Result<()> {
        let mut f = OpenOptions::new().append(true).open(&self.path)?;
        f.write_all(fragment)?;
        self.file = Some(File::open(&self.path)?);
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn repair_writes(&mut self) -> Result<()> {
        self.file = Some(OpenOptions::new().append(true).open(&self.path)?);
        Ok(())
    }
}

fn acquire_store_lock(dir: &Path) -> Result<File> {
    let lock_path = dir.join(LOCK_FILE_NAME);
    let lock = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)
        .map_err(|e| {
            KestrelError::Persistence(format!("failed to open {}: {}", lock_path.display(), e))
        })?;
    lock.try_lock_exclusive().map_err(|e| {
        KestrelError::Persistence(format!(
            "approval store {} is in use by another process: {}",
            dir.display(),
            e
        ))
    })?;
    Ok(lock)
}

/// Write `records` one per line to `path` and sync. Returns the file length.
fn write_snapshot(path: &Path, records: &[ApprovalRecord]) -> Result<u64> {
    let mut tmp = File::create(path)?;
    let mut len = 0u64;
    for record in records {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        tmp.write_all(&line)?;
        len += line.len() as u64;
    }
    tmp.sync_all()?;
    Ok(len)
}

/// Length of the prefix made of complete (newline-terminated) lines.
fn intact_len(bytes: &[u8]) -> usize {
    match bytes.iter().rposition(|b| *b == b'\n') {
        Some(pos) => pos + 1,
        None => 0,
    }
}

fn replay(content: &str) -> Vec<ApprovalRecord> {
    let mut records: Vec<ApprovalRecord> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for (lineno, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ApprovalRecord>(line) {
            Ok(record) => match index.get(&record.id) {
                Some(&pos) => records[pos] = record,
                None => {
                    index.insert(record.id.clone(), records.len());
                    records.push(record);
                }
            },
            Err(e) => {
                warn!(line = lineno + 1, error = %e, "Skipping unreadable approval record");
            }
        }
    }
    records
}
