//! One recompute pass: ingest, normalize, merge, aggregate, publish
//!
//! Every stage can be re-run from the same inputs. Ingest only ever
//! upserts canonical history with a deterministic winner per key, and
//! recompute rebuilds every view from a snapshot, so a failed run is
//! retried by simply running again.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::Path;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::enrich::ArtistIndex;
use crate::model::ArtistMetadata;
use crate::normalize::normalize_batch;
use crate::source::{RawBatch, SourceError, SourceRegistry};
use crate::store::HistoryStore;
use crate::views::{self, ViewSettings};

#[derive(Debug, Clone, Copy, Default)]
pub struct IngestOptions {
    /// Ignore the incremental watermark and normalize every batch
    pub full: bool,
    /// Re-normalize the whole stored raw log instead of reading sources
    pub replay: bool,
}

/// Where a set of batches came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOrigin {
    /// Freshly read from a source: appended to the raw log, merged normally
    Source,
    /// Read back from the raw log: merged with the replay rule
    RawLog,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub sources: usize,
    pub batches: usize,
    /// Payloads not previously in the raw log
    pub raw_stored: usize,
    pub events: usize,
    pub skipped: usize,
    pub inserted: usize,
    pub replaced: usize,
    pub unchanged: usize,
}

#[derive(Debug, Clone)]
pub struct RecomputeReport {
    pub run_id: String,
    pub anchor: DateTime<Utc>,
    pub plays: usize,
    pub artists: usize,
    pub window_rows: usize,
    pub period_rows: usize,
}

/// Read every available source, then store, normalize and merge.
///
/// All sources are read before anything is written: one unreadable source
/// fails the whole ingest and leaves the store untouched, and so does having
/// no source available at all.
pub fn ingest(
    store: &mut HistoryStore,
    registry: &SourceRegistry,
    config: &Config,
    options: IngestOptions,
) -> Result<IngestReport> {
    if options.replay {
        info!("replaying stored raw log");
        let batches = store.raw_batches_since(None)?;
        return ingest_batches(store, batches, BatchOrigin::RawLog);
    }

    let since = if options.full || !config.ingest.incremental {
        None
    } else {
        store.latest_ingested_at()?
    };

    for source in registry.all_sources() {
        if !source.is_available() {
            info!(source = source.id(), "source not available, skipping");
        }
    }

    let available = registry.available_sources();
    if available.is_empty() {
        let configured: Vec<&str> = registry.all_sources().iter().map(|s| s.id()).collect();
        return Err(SourceError::NoneAvailable {
            configured: configured.join(", "),
        }
        .into());
    }

    let mut batches = vec![];
    for source in &available {
        let read = source
            .read_batches(since)
            .with_context(|| format!("Failed to read source {}", source.id()))?;
        info!(source = source.id(), batches = read.len(), "read source");
        batches.extend(read);
    }

    for source in &available {
        store.ensure_source(source.id(), source.description(), config.source_status(source.id()))?;
    }

    batches.sort_by_key(|b| b.collected_at);
    let mut report = ingest_batches(store, batches.clone(), BatchOrigin::Source)?;
    report.sources = available.len();

    for source in &available {
        let last = batches
            .iter()
            .filter(|b| b.source_id == source.id())
            .map(|b| b.collected_at)
            .max();
        store.update_source_ingested(source.id(), last)?;
    }

    Ok(report)
}

/// Normalize and merge a set of batches
pub fn ingest_batches(
    store: &mut HistoryStore,
    batches: Vec<RawBatch>,
    origin: BatchOrigin,
) -> Result<IngestReport> {
    let mut report = IngestReport {
        batches: batches.len(),
        ..Default::default()
    };
    let mut candidates = vec![];

    for batch in &batches {
        if origin == BatchOrigin::Source && store.insert_raw_batch(batch)? {
            report.raw_stored += 1;
        }
        let normalized = normalize_batch(batch);
        report.events += batch.items().len();
        report.skipped += normalized.skipped;
        candidates.extend(normalized.plays);
    }

    let outcome = match origin {
        BatchOrigin::Source => store.merge_plays(candidates)?,
        BatchOrigin::RawLog => store.replay_plays(candidates)?,
    };
    report.inserted = outcome.inserted;
    report.replaced = outcome.replaced;
    report.unchanged = outcome.unchanged;

    if report.skipped > 0 {
        warn!(skipped = report.skipped, "some raw events could not be normalized");
    }
    info!(
        batches = report.batches,
        events = report.events,
        inserted = report.inserted,
        replaced = report.replaced,
        "ingest complete"
    );
    Ok(report)
}

/// Read a JSON array of artist metadata rows
pub fn read_artist_file(path: &Path) -> Result<Vec<ArtistMetadata>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read artist metadata {}", path.display()))?;
    let rows: Vec<ArtistMetadata> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse artist metadata {}", path.display()))?;
    Ok(rows)
}

/// Rebuild and publish every view from the current canonical history
pub fn recompute(
    store: &mut HistoryStore,
    config: &Config,
    now: DateTime<Utc>,
) -> Result<RecomputeReport> {
    // A configured metadata file that cannot be read fails the run
    if let Some(path) = config.metadata_path() {
        let rows = read_artist_file(&path)?;
        store.upsert_artists(&rows)?;
    }

    let run_id = Uuid::new_v4().to_string();
    store.begin_run(&run_id, now)?;

    match build_and_publish(store, &run_id, config.view_settings(), now) {
        Ok(report) => {
            info!(
                run = %report.run_id,
                anchor = %report.anchor,
                plays = report.plays,
                rows = report.window_rows + report.period_rows,
                "published views"
            );
            Ok(report)
        }
        Err(e) => {
            store.fail_run(&run_id)?;
            Err(e)
        }
    }
}

fn build_and_publish(
    store: &mut HistoryStore,
    run_id: &str,
    settings: ViewSettings,
    now: DateTime<Utc>,
) -> Result<RecomputeReport> {
    let history = store.load_history()?;
    let index = ArtistIndex::new(store.load_artists()?);
    let built = views::build(&history, &index, now, settings);

    store.publish(run_id, &built, history.len())?;

    Ok(RecomputeReport {
        run_id: run_id.to_string(),
        anchor: built.anchor,
        plays: history.len(),
        artists: index.len(),
        window_rows: built.window_leaderboards.len(),
        period_rows: built.period_leaderboards.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::ts;
    use serde_json::json;

    fn batch(collected: &str, played: &[&str]) -> RawBatch {
        let items: Vec<_> = played
            .iter()
            .map(|p| {
                json!({
                    "played_at": p,
                    "track": { "id": "t", "name": "T", "duration_ms": 1000,
                               "artists": [{ "name": "Ann" }] }
                })
            })
            .collect();
        RawBatch::new("test:Source", ts(collected), json!({ "items": items }))
    }

    #[test]
    fn test_ingest_batches_overlap() {
        let mut store = HistoryStore::open_in_memory().unwrap();
        let report = ingest_batches(
            &mut store,
            vec![
                batch("2024-01-02T00:00:00Z", &["2024-01-01T00:00:00Z", "2024-01-01T01:00:00Z"]),
                batch("2024-01-03T00:00:00Z", &["2024-01-01T01:00:00Z", "2024-01-02T00:00:00Z"]),
            ],
            BatchOrigin::Source,
        )
        .unwrap();
        assert_eq!(report.events, 4);
        assert_eq!(report.inserted, 3);
        assert_eq!(report.raw_stored, 2);
        assert_eq!(store.play_count().unwrap(), 3);

        let history = store.load_history().unwrap();
        let overlapped = history.get(&ts("2024-01-01T01:00:00Z")).unwrap();
        assert_eq!(overlapped.ingested_at, ts("2024-01-03T00:00:00Z"));
    }

    #[test]
    fn test_replay_applies_renormalized_rows() {
        let mut store = HistoryStore::open_in_memory().unwrap();
        let duo = RawBatch::new(
            "test:Source",
            ts("2024-01-02T00:00:00Z"),
            json!({ "items": [{
                "played_at": "2024-01-01T00:00:00Z",
                "track": { "id": "t", "name": "T", "artists": [{ "name": "Bea" }, { "name": "Ann" }] }
            }] }),
        );
        ingest_batches(
            &mut store,
            vec![duo, batch("2024-01-03T00:00:00Z", &["2024-01-02T00:00:00Z"])],
            BatchOrigin::Source,
        )
        .unwrap();

        // A row written by an older normalizer that kept credit order
        let key = ts("2024-01-01T00:00:00Z");
        let mut legacy = store.load_history().unwrap().get(&key).unwrap().clone();
        assert_eq!(legacy.artist_names.as_deref(), Some("Ann, Bea"));
        legacy.artist_names = Some("Bea, Ann".to_string());
        store.merge_plays(vec![legacy]).unwrap();

        // The legacy row's batch is older than the watermark; replay reads it anyway
        let report = ingest(
            &mut store,
            &SourceRegistry::empty(),
            &Config::default(),
            IngestOptions {
                full: false,
                replay: true,
            },
        )
        .unwrap();
        assert_eq!(report.batches, 2);
        assert_eq!(report.replaced, 1);
        assert_eq!(report.unchanged, 1);
        assert_eq!(report.raw_stored, 0);

        let history = store.load_history().unwrap();
        assert_eq!(history.get(&key).unwrap().artist_names.as_deref(), Some("Ann, Bea"));
    }

    #[test]
    fn test_ingest_without_available_sources_fails() {
        let mut store = HistoryStore::open_in_memory().unwrap();
        let mut registry = SourceRegistry::empty();
        registry.register(Box::new(crate::source::RawLogSource::new(Some(
            "/nonexistent/raw_history.jsonl".into(),
        ))));

        let err = ingest(&mut store, &registry, &Config::default(), IngestOptions::default())
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SourceError>(),
            Some(SourceError::NoneAvailable { .. })
        ));

        assert!(ingest(
            &mut store,
            &SourceRegistry::empty(),
            &Config::default(),
            IngestOptions::default()
        )
        .is_err());
        assert_eq!(store.play_count().unwrap(), 0);
    }

    #[test]
    fn test_recompute_empty_store() {
        let mut store = HistoryStore::open_in_memory().unwrap();
        let now = ts("2024-01-01T00:00:00Z");
        let report = recompute(&mut store, &Config::default(), now).unwrap();
        assert_eq!(report.anchor, now);
        assert_eq!(report.plays, 0);
        assert_eq!(report.window_rows, 0);
        assert!(store.recent_plays(50).unwrap().is_empty());
        assert_eq!(store.last_run().unwrap().unwrap().status, "published");
    }

    #[test]
    fn test_recompute_missing_metadata_file_fails() {
        let mut store = HistoryStore::open_in_memory().unwrap();
        let mut config = Config::default();
        config.metadata.path = Some("/nonexistent/artists.json".to_string());
        assert!(recompute(&mut store, &config, Utc::now()).is_err());
        assert!(store.last_run().unwrap().is_none());
    }
}
