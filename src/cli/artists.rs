//! Artist metadata commands

use anyhow::Result;
use std::path::Path;

use super::{short_ts, truncate};
use crate::enrich::{self, ArtistIndex};
use crate::model::format_ts;
use crate::pipeline;
use crate::store::HistoryStore;

/// Load artist rows from a JSON file into the store
pub fn import(store: &mut HistoryStore, path: &Path) -> Result<()> {
    let rows = pipeline::read_artist_file(path)?;
    let count = store.upsert_artists(&rows)?;
    println!("✅ Imported {} artist rows from {}", count, path.display());
    Ok(())
}

/// List artists the enrichment process still needs to fill in
pub fn missing(store: &HistoryStore, limit: usize) -> Result<()> {
    let history = store.load_history()?;
    let index = ArtistIndex::new(store.load_artists()?);
    let missing = enrich::missing_metadata(&history, &index);

    if missing.is_empty() {
        println!("All artists have metadata.");
        return Ok(());
    }

    println!(
        "{:<32} {:<17} {:>6} {}",
        "Artist", "First seen", "Plays", "State"
    );
    println!("{}", "-".repeat(70));

    for artist in missing.iter().take(limit) {
        println!(
            "{:<32} {:<17} {:>6} {}",
            truncate(&artist.name, 32),
            short_ts(&format_ts(artist.first_seen_at)),
            artist.play_count,
            if artist.has_row { "incomplete" } else { "missing" },
        );
    }

    if missing.len() > limit {
        println!("... and {} more", missing.len() - limit);
    }

    Ok(())
}
