//! Recent plays command implementation

use anyhow::Result;

use super::{format_duration, short_ts, truncate};
use crate::store::HistoryStore;

pub const MAX_LIMIT: usize = 50;

/// Requested limit clamped to `1..=MAX_LIMIT`
pub fn clamp_limit(limit: usize) -> usize {
    limit.clamp(1, MAX_LIMIT)
}

pub fn run(store: &HistoryStore, limit: usize) -> Result<()> {
    let plays = store.recent_plays(clamp_limit(limit))?;

    if plays.is_empty() {
        println!("No plays found. Run 'playlog run' first.");
        return Ok(());
    }

    println!(
        "{:<17} {:<30} {:<24} {:>7}",
        "Played", "Track", "Artist", "Length"
    );
    println!("{}", "-".repeat(81));

    for play in plays {
        println!(
            "{:<17} {:<30} {:<24} {:>7}",
            short_ts(&play.played_at),
            truncate(play.track_name.as_deref().unwrap_or("-"), 30),
            truncate(play.artist_names.as_deref().unwrap_or("-"), 24),
            play.duration_ms
                .map(format_duration)
                .unwrap_or_else(|| "-".to_string()),
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_limit() {
        assert_eq!(clamp_limit(0), 1);
        assert_eq!(clamp_limit(20), 20);
        assert_eq!(clamp_limit(500), 50);
    }
}
