//! Top command implementation

use anyhow::{bail, Result};

use super::{format_duration, short_ts, truncate};
use crate::rank::SubjectKind;
use crate::store::{HistoryStore, LeaderboardEntryRow};
use crate::window::{PeriodType, TimeWindow};

/// Which published leaderboard to read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Window(TimeWindow),
    Period(PeriodType, String),
}

impl Selector {
    /// Build from the mutually exclusive command line flags, defaulting to all time
    pub fn from_args(
        window: Option<&str>,
        month: Option<&str>,
        year: Option<&str>,
    ) -> Result<Self> {
        match (window, month, year) {
            (None, None, None) => Ok(Selector::Window(TimeWindow::AllTime)),
            (Some(key), None, None) => match TimeWindow::from_key(key) {
                Some(w) => Ok(Selector::Window(w)),
                None => bail!(
                    "Unknown window '{}'. Expected one of: {}",
                    key,
                    TimeWindow::ALL.map(|w| w.key()).join(", ")
                ),
            },
            (None, Some(month), None) => {
                let valid = month.len() == 7
                    && chrono::NaiveDate::parse_from_str(&format!("{}-01", month), "%Y-%m-%d")
                        .is_ok();
                if !valid {
                    bail!("Invalid month '{}'. Expected YYYY-MM", month);
                }
                Ok(Selector::Period(PeriodType::Month, month.to_string()))
            }
            (None, None, Some(year)) => {
                if year.len() != 4 || !year.chars().all(|c| c.is_ascii_digit()) {
                    bail!("Invalid year '{}'. Expected YYYY", year);
                }
                Ok(Selector::Period(PeriodType::Year, year.to_string()))
            }
            _ => bail!("Use only one of --window, --month or --year"),
        }
    }

    fn load(&self, store: &HistoryStore, kind: SubjectKind) -> Result<Vec<LeaderboardEntryRow>> {
        match self {
            Selector::Window(w) => store.window_leaderboard(kind, w.key()),
            Selector::Period(t, label) => store.period_leaderboard(kind, t.as_str(), label),
        }
    }

    fn describe(&self) -> String {
        match self {
            Selector::Window(w) => w.label().to_string(),
            Selector::Period(t, label) => format!("{} {}", t.as_str(), label),
        }
    }
}

pub fn run(store: &HistoryStore, kind: &str, selector: Selector) -> Result<()> {
    let kind = match SubjectKind::parse(kind) {
        Some(kind) => kind,
        None => bail!("Unknown leaderboard '{}'. Expected tracks, artists or genres", kind),
    };

    let rows = selector.load(store, kind)?;

    if rows.is_empty() {
        println!(
            "No {} leaderboard for {}. Run 'playlog recompute' first.",
            kind.as_str(),
            selector.describe()
        );
        return Ok(());
    }

    println!("Top {}s: {}\n", kind.as_str(), selector.describe());
    println!(
        "{:>4} {:<32} {:<22} {:>6} {:>9} {:<17}",
        "#", "Subject", "Detail", "Plays", "Time", "Last played"
    );
    println!("{}", "-".repeat(95));

    for row in rows {
        let (subject, detail) = match kind {
            SubjectKind::Track => (
                row.track_name.clone().unwrap_or_else(|| row.subject.clone()),
                row.artist_names.clone().unwrap_or_default(),
            ),
            _ => (row.subject.clone(), row.artist_genres.join(", ")),
        };
        println!(
            "{:>4} {:<32} {:<22} {:>6} {:>9} {:<17}",
            row.rank,
            truncate(&subject, 32),
            truncate(&detail, 22),
            row.play_count,
            format_duration(row.total_duration_ms),
            short_ts(&row.last_played_at),
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_defaults_to_all_time() {
        assert_eq!(
            Selector::from_args(None, None, None).unwrap(),
            Selector::Window(TimeWindow::AllTime)
        );
    }

    #[test]
    fn test_selector_parses_each_flag() {
        assert_eq!(
            Selector::from_args(Some("90d"), None, None).unwrap(),
            Selector::Window(TimeWindow::Days90)
        );
        assert_eq!(
            Selector::from_args(None, Some("2024-02"), None).unwrap(),
            Selector::Period(PeriodType::Month, "2024-02".to_string())
        );
        assert_eq!(
            Selector::from_args(None, None, Some("2023")).unwrap(),
            Selector::Period(PeriodType::Year, "2023".to_string())
        );
    }

    #[test]
    fn test_selector_rejects_bad_input() {
        assert!(Selector::from_args(Some("14d"), None, None).is_err());
        assert!(Selector::from_args(None, Some("2024-13"), None).is_err());
        assert!(Selector::from_args(None, Some("2024-1"), None).is_err());
        assert!(Selector::from_args(None, None, Some("24")).is_err());
        assert!(Selector::from_args(Some("7d"), None, Some("2024")).is_err());
    }
}
