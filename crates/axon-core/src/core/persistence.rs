//! Durable event log: JSONL, one event per line.
//!
//! Streaming variants are replay-only noise and are filtered out before
//! storage; the consolidated variants carry the same information.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use axon_types::Event;

/// One persisted line: the event plus a wall-clock stamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedEvent {
    pub recorded_at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: Event,
}

/// Appending JSONL writer for durable events.
pub struct EventLogWriter {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl EventLogWriter {
    /// Opens (or creates) the log file for appending.
    ///
    /// # Errors
    /// Returns an error when the file cannot be opened.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open event log {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one event, skipping streaming variants. Flushes per event so
    /// an interrupted process loses at most the event being written.
    ///
    /// # Errors
    /// Returns an error when serialization or the write fails.
    pub fn append(&mut self, event: &Event) -> Result<()> {
        if event.is_streaming() {
            return Ok(());
        }

        let line = serde_json::to_string(&PersistedEvent {
            recorded_at: Utc::now(),
            event: event.clone(),
        })
        .context("Failed to serialize event")?;
        self.writer
            .write_all(line.as_bytes())
            .and_then(|()| self.writer.write_all(b"\n"))
            .and_then(|()| self.writer.flush())
            .with_context(|| format!("Failed to write event log {}", self.path.display()))?;
        Ok(())
    }
}

/// Reads a persisted event log, skipping malformed lines with a warning.
///
/// # Errors
/// Returns an error when the file cannot be read at all.
pub fn read_event_log(path: &Path) -> Result<Vec<Event>> {
    let file =
        File::open(path).with_context(|| format!("Failed to read event log {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut events = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<PersistedEvent>(&line) {
            Ok(persisted) => events.push(persisted.event),
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    line = line_no + 1,
                    %err,
                    "Skipping malformed event log line"
                );
            }
        }
    }
    Ok(events)
}
