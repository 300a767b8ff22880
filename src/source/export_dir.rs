//! Export directory source
//!
//! Reads provider "recently played" responses saved as JSON files.
//! Data format: any file under the base path matching the pattern
//! (default `*.json`), each holding one response document:
//!   - `items` - play events
//!   - `collected_at` (optional) - fetch instant; file mtime otherwise

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use super::{collected_since, HistorySource, RawBatch, SourceError};
use crate::model::parse_ts;

const DEFAULT_PATTERN: &str = "*.json";

pub struct ExportDirSource {
    base_path: PathBuf,
    /// `None` falls back to the default `*.json`
    pattern: Option<glob::Pattern>,
}

impl ExportDirSource {
    pub const ID: &'static str = "spotify:ExportDir";

    pub fn new(custom_path: Option<PathBuf>, pattern: Option<String>) -> Self {
        let base_path = custom_path.unwrap_or_else(|| {
            let home = dirs::home_dir().unwrap_or_default();
            home.join(".local/share/playlog/exports")
        });
        let pattern = pattern
            .as_deref()
            .or(Some(DEFAULT_PATTERN))
            .and_then(|p| glob::Pattern::new(p).ok());
        Self { base_path, pattern }
    }

    fn matches(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .map(|n| match &self.pattern {
                Some(pattern) => pattern.matches(n),
                None => n.ends_with(".json"),
            })
            .unwrap_or(false)
    }

    fn read_file(&self, path: &Path) -> Result<RawBatch, SourceError> {
        let io_err = |source| SourceError::Io {
            path: path.to_path_buf(),
            source,
        };

        let content = std::fs::read_to_string(path).map_err(io_err)?;
        let mut payload: Value =
            serde_json::from_str(&content).map_err(|e| SourceError::InvalidPayload {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        if !payload.is_object() {
            return Err(SourceError::InvalidPayload {
                path: path.to_path_buf(),
                reason: "expected a JSON object".to_string(),
            });
        }

        // collected_at travels on the batch, not inside the stored payload
        let embedded = payload
            .as_object_mut()
            .and_then(|o| o.remove("collected_at"))
            .and_then(|v| v.as_str().and_then(parse_ts));

        let collected_at = match embedded {
            Some(ts) => ts,
            None => {
                let modified = std::fs::metadata(path)
                    .and_then(|m| m.modified())
                    .map_err(io_err)?;
                DateTime::<Utc>::from(modified)
            }
        };

        Ok(RawBatch::new(Self::ID, collected_at, payload))
    }
}

impl HistorySource for ExportDirSource {
    fn id(&self) -> &str {
        Self::ID
    }

    fn description(&self) -> &str {
        "Saved recently-played responses (JSON files)"
    }

    fn is_available(&self) -> bool {
        self.base_path.is_dir()
    }

    fn read_batches(&self, since: Option<DateTime<Utc>>) -> Result<Vec<RawBatch>> {
        let mut batches = vec![];

        if !self.base_path.exists() {
            return Ok(batches);
        }

        let mut files = vec![];
        for entry in WalkDir::new(&self.base_path).follow_links(true) {
            let entry = entry.map_err(|e| SourceError::Io {
                path: e.path().map(Path::to_path_buf).unwrap_or_else(|| self.base_path.clone()),
                source: e.into(),
            })?;
            if entry.file_type().is_file() && self.matches(entry.path()) {
                files.push(entry.into_path());
            }
        }
        files.sort();

        for path in files {
            let batch = self.read_file(&path)?;
            if collected_since(&batch, since) {
                debug!(path = %path.display(), items = batch.items().len(), "read export file");
                batches.push(batch);
            }
        }

        batches.sort_by_key(|b| b.collected_at);
        Ok(batches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::ts;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, body: &str) {
        std::fs::write(dir.join(name), body).unwrap();
    }

    #[test]
    fn test_reads_matching_files_in_order() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        write(
            dir.path(),
            "b.json",
            r#"{"collected_at": "2024-01-02T00:00:00Z", "items": []}"#,
        );
        write(
            &dir.path().join("nested"),
            "a.json",
            r#"{"collected_at": "2024-01-01T00:00:00Z", "items": [{}]}"#,
        );
        write(dir.path(), "notes.txt", "ignored");

        let source = ExportDirSource::new(Some(dir.path().to_path_buf()), None);
        assert!(source.is_available());

        let batches = source.read_batches(None).unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].collected_at, ts("2024-01-01T00:00:00Z"));
        assert_eq!(batches[0].items().len(), 1);
        assert!(batches[0].payload.get("collected_at").is_none());

        let later = source.read_batches(Some(ts("2024-01-02T00:00:00Z"))).unwrap();
        assert_eq!(later.len(), 1);
    }

    #[test]
    fn test_invalid_json_fails() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "bad.json", "{ not json");
        let source = ExportDirSource::new(Some(dir.path().to_path_buf()), None);
        assert!(source.read_batches(None).is_err());
    }

    #[test]
    fn test_missing_dir_is_unavailable() {
        let source = ExportDirSource::new(Some(PathBuf::from("/nonexistent/playlog")), None);
        assert!(!source.is_available());
        assert!(source.read_batches(None).unwrap().is_empty());
    }

    #[test]
    fn test_custom_pattern() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "history-1.txt", r#"{"items": []}"#);
        write(dir.path(), "other.json", r#"{"items": []}"#);
        let source = ExportDirSource::new(
            Some(dir.path().to_path_buf()),
            Some("history-*.txt".to_string()),
        );
        assert_eq!(source.read_batches(None).unwrap().len(), 1);
    }
}
