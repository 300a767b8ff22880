//! Raw log source
//!
//! Reads an append-only JSONL log, one collected payload per line:
//! `{"collected_at": "<RFC 3339>", "payload": {"items": [...]}}`

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use super::{collected_since, HistorySource, RawBatch, SourceError};

pub struct RawLogSource {
    path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct RawLogLine {
    collected_at: DateTime<Utc>,
    payload: Value,
}

impl RawLogSource {
    pub const ID: &'static str = "spotify:RawLog";

    pub fn new(custom_path: Option<PathBuf>) -> Self {
        let path = custom_path.unwrap_or_else(|| {
            let home = dirs::home_dir().unwrap_or_default();
            home.join(".local/share/playlog/raw_history.jsonl")
        });
        Self { path }
    }
}

impl HistorySource for RawLogSource {
    fn id(&self) -> &str {
        Self::ID
    }

    fn description(&self) -> &str {
        "Append-only raw payload log (JSONL)"
    }

    fn is_available(&self) -> bool {
        self.path.is_file()
    }

    fn read_batches(&self, since: Option<DateTime<Utc>>) -> Result<Vec<RawBatch>> {
        let io_err = |source| SourceError::Io {
            path: self.path.clone(),
            source,
        };

        let file = File::open(&self.path).map_err(io_err)?;
        let reader = BufReader::new(file);
        let mut batches = vec![];

        for (index, line) in reader.lines().enumerate() {
            let line = line.map_err(io_err)?;
            if line.trim().is_empty() {
                continue;
            }

            let record: RawLogLine =
                serde_json::from_str(&line).map_err(|e| SourceError::InvalidPayload {
                    path: self.path.clone(),
                    reason: format!("line {}: {}", index + 1, e),
                })?;

            let batch = RawBatch::new(Self::ID, record.collected_at, record.payload);
            if collected_since(&batch, since) {
                batches.push(batch);
            }
        }

        batches.sort_by_key(|b| b.collected_at);
        Ok(batches)
    }
}
