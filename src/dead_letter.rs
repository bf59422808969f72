// src/dead_letter.rs
//
// Bounded queue of records that could not be persisted, kept for manual replay.

use crate::types::RawMiningRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub id: Uuid,
    pub record: RawMiningRecord,
    pub reason: String,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn new(record: RawMiningRecord, reason: impl Into<String>, attempts: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            record,
            reason: reason.into(),
            attempts,
            failed_at: Utc::now(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DeadLetterError {
    #[error("dead-letter file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("dead-letter entry is not valid JSON: {0}")]
    Serde(#[from] serde_json::Error),
}

/// In-process dead-letter queue, optionally mirrored to a JSON-lines file.
///
/// When full, the oldest entry is evicted.
pub struct DeadLetterQueue {
    entries: Mutex<VecDeque<DeadLetter>>,
    capacity: usize,
    path: Option<PathBuf>,
}

impl DeadLetterQueue {
    pub fn in_memory(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            path: None,
        }
    }

    /// Opens a file-backed queue, restoring entries left by a previous run.
    pub fn open(capacity: usize, path: impl AsRef<Path>) -> Result<Self, DeadLetterError> {
        let path = path.as_ref().to_path_buf();
        let capacity = capacity.max(1);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut entries = VecDeque::new();
        if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                entries.push_back(serde_json::from_str::<DeadLetter>(&line)?);
                if entries.len() > capacity {
                    entries.pop_front();
                }
            }
            if !entries.is_empty() {
                info!(count = entries.len(), path = %path.display(), "Restored dead letters");
            }
        }
        Ok(Self {
            entries: Mutex::new(entries),
            capacity,
            path: Some(path),
        })
    }

    /// Appends to the file and the queue under one lock, so a concurrent
    /// rewrite never drops an entry from disk that is still queued.
    pub fn push(&self, entry: DeadLetter) {
        let mut entries = self.lock();
        let mut evicted_any = false;
        if entries.len() >= self.capacity {
            if let Some(evicted) = entries.pop_front() {
                evicted_any = true;
                error!(
                    id = %evicted.id,
                    record = %evicted.record.describe(),
                    "Dead-letter queue full, evicting oldest entry"
                );
            }
        }
        warn!(
            id = %entry.id,
            record = %entry.record.describe(),
            attempts = entry.attempts,
            reason = %entry.reason,
            "Record dead-lettered"
        );
        entries.push_back(entry);
        // An evicted entry must also leave the file.
        let result = if evicted_any {
            self.rewrite_file(&entries)
        } else {
            entries
                .back()
                .map_or(Ok(()), |entry| self.append_to_file(entry))
        };
        if let Err(e) = result {
            error!(error = %e, "Failed to persist dead letter");
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn snapshot(&self) -> Vec<DeadLetter> {
        self.lock().iter().cloned().collect()
    }

    /// Drops the entries with the given ids and rewrites the backing file
    /// with what remains. Entries pushed since the ids were read are kept.
    pub fn remove(&self, ids: &[Uuid]) -> Result<usize, DeadLetterError> {
        let ids: HashSet<&Uuid> = ids.iter().collect();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|entry| !ids.contains(&entry.id));
        let removed = before - entries.len();
        if removed > 0 {
            self.rewrite_file(&entries)?;
        }
        Ok(removed)
    }

    fn append_to_file(&self, entry: &DeadLetter) -> Result<(), DeadLetterError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Writes `entries` to a sibling temp file and renames it over the
    /// backing file.
    fn rewrite_file(&self, entries: &VecDeque<DeadLetter>) -> Result<(), DeadLetterError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        {
            let mut file = File::create(&tmp)?;
            for entry in entries {
                let mut line = serde_json::to_string(entry)?;
                line.push('\n');
                file.write_all(line.as_bytes())?;
            }
            file.sync_all()?;
        }
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<DeadLetter>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
