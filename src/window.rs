//! Window and calendar period resolution
//!
//! Rolling windows are anchored to the latest known play rather than the
//! wall clock. Calendar periods come from the months and years actually
//! present in history, so no empty period is ever produced.

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::merge::PlayHistory;

/// Fixed catalog of rolling windows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeWindow {
    Days7,
    Days30,
    Days90,
    Days180,
    Days365,
    AllTime,
}

impl TimeWindow {
    pub const ALL: [TimeWindow; 6] = [
        TimeWindow::Days7,
        TimeWindow::Days30,
        TimeWindow::Days90,
        TimeWindow::Days180,
        TimeWindow::Days365,
        TimeWindow::AllTime,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Self::Days7 => "7d",
            Self::Days30 => "30d",
            Self::Days90 => "90d",
            Self::Days180 => "180d",
            Self::Days365 => "365d",
            Self::AllTime => "all_time",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Days7 => "Last 7 days",
            Self::Days30 => "Last 30 days",
            Self::Days90 => "Last 90 days",
            Self::Days180 => "Last 180 days",
            Self::Days365 => "Last 365 days",
            Self::AllTime => "All time",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|w| w.key() == key)
    }

    /// `None` for the unbounded window
    pub fn span(self) -> Option<Duration> {
        let days = match self {
            Self::Days7 => 7,
            Self::Days30 => 30,
            Self::Days90 => 90,
            Self::Days180 => 180,
            Self::Days365 => 365,
            Self::AllTime => return None,
        };
        Some(Duration::days(days))
    }

    /// Inclusive lower bound on `played_at` for a given anchor
    pub fn lower_bound(self, anchor: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.span().map(|span| anchor - span)
    }

    pub fn contains(self, anchor: DateTime<Utc>, played_at: DateTime<Utc>) -> bool {
        self.lower_bound(anchor).map_or(true, |lower| played_at >= lower)
    }

    /// Publication order: bounded windows first, then by key
    pub fn catalog_cmp(self, other: Self) -> Ordering {
        let rank = |w: Self| (w == Self::AllTime, w.key());
        rank(self).cmp(&rank(other))
    }

    /// Index of this window in publication order
    pub fn catalog_position(self) -> usize {
        let mut all = Self::ALL;
        all.sort_by(|a, b| a.catalog_cmp(*b));
        all.iter().position(|w| *w == self).unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PeriodType {
    Month,
    Year,
}

impl PeriodType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodType::Month => "month",
            PeriodType::Year => "year",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "month" => Some(PeriodType::Month),
            "year" => Some(PeriodType::Year),
            _ => None,
        }
    }
}

/// A month or year bucket observed in history
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CalendarPeriod {
    pub period_type: PeriodType,
    pub period_start: DateTime<Utc>,
    /// `YYYY-MM` or `YYYY`
    pub label: String,
}

impl CalendarPeriod {
    pub fn month_of(ts: DateTime<Utc>) -> Option<Self> {
        let start = Utc
            .with_ymd_and_hms(ts.year(), ts.month(), 1, 0, 0, 0)
            .single()?;
        Some(Self {
            period_type: PeriodType::Month,
            period_start: start,
            label: start.format("%Y-%m").to_string(),
        })
    }

    pub fn year_of(ts: DateTime<Utc>) -> Option<Self> {
        let start = Utc.with_ymd_and_hms(ts.year(), 1, 1, 0, 0, 0).single()?;
        Some(Self {
            period_type: PeriodType::Year,
            period_start: start,
            label: start.format("%Y").to_string(),
        })
    }

    /// Exclusive upper bound: start of the following month or year
    pub fn end(&self) -> Option<DateTime<Utc>> {
        let start = self.period_start;
        let (year, month) = match self.period_type {
            PeriodType::Month if start.month() == 12 => (start.year() + 1, 1),
            PeriodType::Month => (start.year(), start.month() + 1),
            PeriodType::Year => (start.year() + 1, 1),
        };
        Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single()
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.period_start && self.end().map_or(true, |end| ts < end)
    }

    /// Publication order: period type, then most recent first
    pub fn publish_cmp(&self, other: &Self) -> Ordering {
        self.period_type
            .cmp(&other.period_type)
            .then_with(|| other.period_start.cmp(&self.period_start))
    }
}

/// One partition of history the ranking engine aggregates over
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Partition {
    Window(TimeWindow),
    Period(CalendarPeriod),
}

impl Partition {
    /// `[lower, upper)` bounds on `played_at` for this partition
    pub fn bounds(
        &self,
        anchor: DateTime<Utc>,
    ) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        match self {
            Partition::Window(w) => (w.lower_bound(anchor), None),
            Partition::Period(p) => (Some(p.period_start), p.end()),
        }
    }

    pub fn key(&self) -> String {
        match self {
            Partition::Window(w) => w.key().to_string(),
            Partition::Period(p) => format!("{}:{}", p.period_type.as_str(), p.label),
        }
    }
}

/// The complete partitioning of a history snapshot
#[derive(Debug, Clone)]
pub struct PartitionPlan {
    pub anchor: DateTime<Utc>,
    pub windows: Vec<TimeWindow>,
    /// Sorted by period type, then most recent first
    pub periods: Vec<CalendarPeriod>,
}

impl PartitionPlan {
    pub fn partitions(&self) -> Vec<Partition> {
        self.windows
            .iter()
            .copied()
            .map(Partition::Window)
            .chain(self.periods.iter().cloned().map(Partition::Period))
            .collect()
    }
}

/// Latest play in history, or `now` when history is empty
pub fn resolve_anchor(history: &PlayHistory, now: DateTime<Utc>) -> DateTime<Utc> {
    history.latest_played_at().unwrap_or(now)
}

/// Distinct month and year buckets present in history
pub fn calendar_periods(history: &PlayHistory) -> Vec<CalendarPeriod> {
    let mut months = BTreeSet::new();
    let mut years = BTreeSet::new();

    for play in history.iter() {
        let ts = play.played_at;
        months.insert((ts.year(), ts.month()));
        years.insert(ts.year());
    }

    let mut periods: Vec<CalendarPeriod> = months
        .into_iter()
        .filter_map(|(y, m)| Utc.with_ymd_and_hms(y, m, 1, 0, 0, 0).single())
        .filter_map(CalendarPeriod::month_of)
        .chain(
            years
                .into_iter()
                .filter_map(|y| Utc.with_ymd_and_hms(y, 1, 1, 0, 0, 0).single())
                .filter_map(CalendarPeriod::year_of),
        )
        .collect();

    periods.sort_by(|a, b| a.publish_cmp(b));
    periods
}

/// Resolve every partition for a history snapshot. Pure: same input, same plan.
pub fn resolve(history: &PlayHistory, now: DateTime<Utc>) -> PartitionPlan {
    let mut windows = TimeWindow::ALL.to_vec();
    windows.sort_by(|a, b| a.catalog_cmp(*b));

    PartitionPlan {
        anchor: resolve_anchor(history, now),
        windows,
        periods: calendar_periods(history),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::{play, ts};

    #[test]
    fn test_window_catalog_order() {
        let plan = resolve(&PlayHistory::new(), ts("2024-01-01T00:00:00Z"));
        let keys: Vec<_> = plan.windows.iter().map(|w| w.key()).collect();
        assert_eq!(keys, vec!["180d", "30d", "365d", "7d", "90d", "all_time"]);
        assert_eq!(TimeWindow::AllTime.catalog_position(), 5);
        assert_eq!(TimeWindow::Days7.catalog_position(), 3);
    }

    #[test]
    fn test_anchor_falls_back_to_now() {
        let now = ts("2024-05-05T00:00:00Z");
        let plan = resolve(&PlayHistory::new(), now);
        assert_eq!(plan.anchor, now);
        assert!(plan.periods.is_empty());
    }

    #[test]
    fn test_window_lower_bound_is_inclusive() {
        let anchor = ts("2024-01-08T00:00:00Z");
        assert!(TimeWindow::Days7.contains(anchor, ts("2024-01-01T00:00:00Z")));
        assert!(!TimeWindow::Days7.contains(anchor, ts("2023-12-31T23:59:59Z")));
        assert!(TimeWindow::AllTime.contains(anchor, ts("1990-01-01T00:00:00Z")));
    }

    #[test]
    fn test_periods_from_observed_data() {
        let history = PlayHistory::from_plays(vec![
            play("2023-12-31T23:00:00Z", "a", "Ann", 1),
            play("2024-02-10T00:00:00Z", "b", "Ann", 1),
            play("2024-02-11T00:00:00Z", "c", "Ann", 1),
        ]);
        let labels: Vec<_> = calendar_periods(&history)
            .into_iter()
            .map(|p| format!("{}:{}", p.period_type.as_str(), p.label))
            .collect();
        // No January 2024: nothing was played then
        assert_eq!(
            labels,
            vec!["month:2024-02", "month:2023-12", "year:2024", "year:2023"]
        );
    }

    #[test]
    fn test_period_end_rolls_over_year() {
        let dec = CalendarPeriod::month_of(ts("2023-12-15T00:00:00Z")).unwrap();
        assert_eq!(dec.end(), Some(ts("2024-01-01T00:00:00Z")));
        assert!(dec.contains(ts("2023-12-31T23:59:59Z")));
        assert!(!dec.contains(ts("2024-01-01T00:00:00Z")));
    }

    #[test]
    fn test_from_key() {
        assert_eq!(TimeWindow::from_key("90d"), Some(TimeWindow::Days90));
        assert_eq!(TimeWindow::from_key("all_time"), Some(TimeWindow::AllTime));
        assert_eq!(TimeWindow::from_key("14d"), None);
    }
}
