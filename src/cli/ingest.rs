//! Ingest command implementation

use anyhow::Result;

use crate::config::Config;
use crate::pipeline::{self, IngestOptions, IngestReport};
use crate::source::SourceRegistry;
use crate::store::HistoryStore;

pub fn run(
    store: &mut HistoryStore,
    registry: &SourceRegistry,
    config: &Config,
    options: IngestOptions,
) -> Result<IngestReport> {
    if options.replay {
        println!("Replaying stored raw history...\n");
    } else {
        println!("Discovering available sources...\n");
        for source in registry.all_sources() {
            let marker = if source.is_available() { "📡" } else { "  " };
            println!("{} {} ({})", marker, source.id(), source.description());
        }
        println!();

        if registry.available_sources().is_empty() {
            println!("No sources available. Check your configuration.");
        }
    }

    let report = pipeline::ingest(store, registry, config, options)?;

    println!("   Batches:   {}", report.batches);
    println!("   New raw:   {}", report.raw_stored);
    println!("   Events:    {} ({} skipped)", report.events, report.skipped);
    println!(
        "   Plays:     {} new, {} replaced, {} unchanged",
        report.inserted, report.replaced, report.unchanged
    );
    println!("\n✅ Ingest complete!");
    Ok(report)
}
