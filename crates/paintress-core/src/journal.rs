//! Append-only per-run journal of cycle outcomes.
//!
//! One JSON object per line in `<continent>/.expedition/journal/<run-id>.jsonl`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::domain::error::Result;
use crate::domain::outcome::CycleOutcome;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JournalEntry {
    pub run_id: String,
    pub recorded_at: DateTime<Utc>,
    #[serde(flatten)]
    pub outcome: CycleOutcome,
}

/// Journal file for one run. Appends from concurrent workers are serialized
/// so lines never interleave.
#[derive(Debug)]
pub struct Journal {
    run_id: String,
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl Journal {
    /// Prepare `<dir>/<run_id>.jsonl`. The file is created on first append.
    pub async fn open(dir: &Path, run_id: &str) -> Result<Self> {
        tokio::fs::create_dir_all(dir).await?;
        Ok(Self {
            run_id: run_id.to_string(),
            path: dir.join(format!("{run_id}.jsonl")),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, outcome: &CycleOutcome) -> Result<()> {
        let entry = JournalEntry {
            run_id: self.run_id.clone(),
            recorded_at: Utc::now(),
            outcome: outcome.clone(),
        };
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Read every entry of a journal file, in append order.
pub fn read_journal(path: &Path) -> Result<Vec<JournalEntry>> {
    let raw = std::fs::read_to_string(path)?;
    raw.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).map_err(Into::into))
        .collect()
}
