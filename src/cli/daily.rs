//! Daily totals command implementation

use anyhow::Result;

use super::format_duration;
use crate::store::HistoryStore;

pub fn run(store: &HistoryStore, days: usize) -> Result<()> {
    let totals = store.daily_totals(days.max(1))?;

    if totals.is_empty() {
        println!("No daily totals. Run 'playlog recompute' first.");
        return Ok(());
    }

    println!("{:<12} {:>7} {:>7} {:>10}", "Day", "Plays", "Tracks", "Time");
    println!("{}", "-".repeat(39));

    for day in totals {
        println!(
            "{:<12} {:>7} {:>7} {:>10}",
            day.day,
            day.play_count,
            day.distinct_tracks,
            format_duration(day.total_duration_ms),
        );
    }

    Ok(())
}
