//! Summary command implementation

use anyhow::Result;

use super::{format_duration, short_ts};
use crate::store::HistoryStore;

pub fn run(store: &HistoryStore) -> Result<()> {
    match store.last_run()? {
        Some(run) => {
            println!(
                "Last run {} ({}) started {}, anchor {}",
                &run.id[..8.min(run.id.len())],
                run.status,
                short_ts(&run.started_at),
                run.anchor.as_deref().map(short_ts).unwrap_or_else(|| "-".to_string()),
            );
        }
        None => {
            println!("No runs recorded. Run 'playlog run' first.");
            return Ok(());
        }
    }
    println!(
        "{} plays in history, {} raw payloads stored\n",
        store.play_count()?,
        store.raw_batch_count()?
    );

    let summaries = store.window_summaries()?;
    if summaries.is_empty() {
        println!("No plays in any window.");
        return Ok(());
    }

    println!(
        "{:<14} {:>7} {:>7} {:>8} {:>11} {:<17} {:<17}",
        "Window", "Plays", "Tracks", "Artists", "Time", "First", "Last"
    );
    println!("{}", "-".repeat(86));

    for s in summaries {
        println!(
            "{:<14} {:>7} {:>7} {:>8} {:>11} {:<17} {:<17}",
            s.window_label,
            s.plays,
            s.distinct_tracks,
            s.distinct_artists,
            format_duration(s.total_duration_ms),
            s.first_played_at.as_deref().map(short_ts).unwrap_or_default(),
            s.last_played_at.as_deref().map(short_ts).unwrap_or_default(),
        );
    }

    Ok(())
}
