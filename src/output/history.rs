//! Permanent translation history.
//!
//! Append-only JSONL, one record per finalized utterance, written in enqueue
//! (utterance-id) order. Completions arrive out of order, so records are
//! buffered until the contiguous prefix is complete; `flush_all` writes any
//! stragglers at shutdown. Failed and abandoned utterances are recorded with
//! their marker rather than silently vanishing: the live stream skips them,
//! the audit trail does not.

use crate::error::{PredikaError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

/// Terminal status of one utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryStatus {
    /// Translated and delivered.
    Done,
    /// Nothing transcribable (silence or empty recognition result).
    Skipped,
    /// The recognition engine failed.
    TranscriptionFailed,
    /// The translation provider failed terminally.
    TranslationFailed,
    /// Dropped at shutdown or under overload.
    Abandoned,
}

/// One history record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub utterance_id: u64,
    pub source_text: String,
    pub translated_text: Option<String>,
    /// Unix milliseconds at submission.
    pub enqueue_ts: u64,
    /// Unix milliseconds at the terminal outcome.
    pub complete_ts: u64,
    pub status: HistoryStatus,
}

impl HistoryEntry {
    /// Builds an entry stamped with the current time for both timestamps.
    pub fn now(utterance_id: u64, source_text: String, status: HistoryStatus) -> Self {
        let ts = unix_millis();
        Self {
            utterance_id,
            source_text,
            translated_text: None,
            enqueue_ts: ts,
            complete_ts: ts,
            status,
        }
    }
}

struct HistoryInner {
    writer: BufWriter<File>,
    /// Records waiting for earlier utterances to reach a terminal state.
    buffered: BTreeMap<u64, HistoryEntry>,
    /// Next utterance id expected in the file.
    next_id: u64,
}

/// Append-only history log.
pub struct HistoryLog {
    path: PathBuf,
    inner: Mutex<HistoryInner>,
}

impl HistoryLog {
    /// Opens a session log file under `logs_dir`, creating the directory.
    pub fn create(logs_dir: &Path) -> Result<Self> {
        fs::create_dir_all(logs_dir)?;
        let path = logs_dir.join(format!("translation_log_{}.jsonl", unix_millis() / 1000));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        info!("history log at {}", path.display());
        Ok(Self {
            path,
            inner: Mutex::new(HistoryInner {
                writer: BufWriter::new(file),
                buffered: BTreeMap::new(),
                next_id: 0,
            }),
        })
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records one utterance's terminal outcome.
    ///
    /// The entry is written immediately if every earlier utterance has been
    /// recorded; otherwise it waits so the file stays in enqueue order.
    pub fn record(&self, entry: HistoryEntry) -> Result<()> {
        let mut guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let inner = &mut *guard;
        inner.buffered.insert(entry.utterance_id, entry);

        loop {
            let next = inner.next_id;
            match inner.buffered.remove(&next) {
                Some(entry) => {
                    write_entry(&mut inner.writer, &entry)?;
                    inner.next_id += 1;
                }
                None => break,
            }
        }
        inner.writer.flush()?;
        Ok(())
    }

    /// Number of records held back waiting for earlier utterances.
    pub fn buffered(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.buffered.len()
    }

    /// Writes any remaining buffered records in id order.
    ///
    /// Called at shutdown: gaps at this point mean an utterance never reached
    /// a terminal state, and waiting longer won't change that.
    pub fn flush_all(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let remaining = std::mem::take(&mut inner.buffered);
        for (id, entry) in remaining {
            write_entry(&mut inner.writer, &entry)?;
            inner.next_id = id + 1;
        }
        inner.writer.flush()?;
        Ok(())
    }
}

fn write_entry(writer: &mut BufWriter<File>, entry: &HistoryEntry) -> Result<()> {
    let line = serde_json::to_string(entry).map_err(|e| PredikaError::History {
        message: e.to_string(),
    })?;
    writeln!(writer, "{}", line)?;
    Ok(())
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
