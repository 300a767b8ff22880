//! Recompute command implementation

use anyhow::Result;
use chrono::Utc;

use crate::config::Config;
use crate::pipeline::{self, IngestOptions};
use crate::source::SourceRegistry;
use crate::store::HistoryStore;

pub fn run(store: &mut HistoryStore, config: &Config) -> Result<()> {
    println!("Recomputing views...\n");

    let report = pipeline::recompute(store, config, Utc::now())?;

    println!("   Run:          {}", report.run_id);
    println!("   Anchor:       {}", report.anchor.format("%Y-%m-%d %H:%M"));
    println!("   Plays:        {}", report.plays);
    println!("   Artists:      {}", report.artists);
    println!("   Window rows:  {}", report.window_rows);
    println!("   Period rows:  {}", report.period_rows);
    println!("\n✅ Views published!");
    Ok(())
}

/// Scheduled entry point: ingest, then recompute
pub fn run_all(
    store: &mut HistoryStore,
    registry: &SourceRegistry,
    config: &Config,
    options: IngestOptions,
) -> Result<()> {
    super::ingest::run(store, registry, config, options)?;
    println!();
    run(store, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::RawLogSource;

    #[test]
    fn test_run_all_stops_when_no_source_is_reachable() {
        let mut store = HistoryStore::open_in_memory().unwrap();
        let mut registry = SourceRegistry::empty();
        registry.register(Box::new(RawLogSource::new(Some(
            "/nonexistent/raw_history.jsonl".into(),
        ))));

        let result = run_all(&mut store, &registry, &Config::default(), IngestOptions::default());
        assert!(result.is_err());
        // No recompute ran, so nothing was published over the old views
        assert!(store.last_run().unwrap().is_none());
    }
}
