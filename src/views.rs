//! Published views
//!
//! Everything the presentation side reads: recent plays, rolling and
//! calendar leaderboards with enrichment, daily totals and window summaries.
//! Views are recomputed from a history snapshot on every run, never patched.

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, HashSet};

use crate::enrich::{ArtistIndex, Enrichment};
use crate::merge::PlayHistory;
use crate::model::CanonicalPlay;
use crate::rank::{self, Leaderboard, RankedAggregate, SubjectKind};
use crate::window::{self, CalendarPeriod, Partition, TimeWindow};

/// Limits applied when building views
#[derive(Debug, Clone, Copy)]
pub struct ViewSettings {
    pub top_n: usize,
    pub recent_limit: usize,
}

impl Default for ViewSettings {
    fn default() -> Self {
        Self {
            top_n: 50,
            recent_limit: 50,
        }
    }
}

/// A leaderboard row with its partition and enrichment attached
#[derive(Debug, Clone, PartialEq)]
pub struct LeaderboardRow {
    pub kind: SubjectKind,
    pub aggregate: RankedAggregate,
    pub enrichment: Enrichment,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WindowLeaderboardRow {
    pub window: TimeWindow,
    pub row: LeaderboardRow,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PeriodLeaderboardRow {
    pub period: CalendarPeriod,
    pub row: LeaderboardRow,
}

/// Totals for one calendar day (UTC)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyTotal {
    pub day: NaiveDate,
    pub play_count: u64,
    pub distinct_tracks: u64,
    pub total_duration_ms: i64,
}

/// Totals for one rolling window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowSummary {
    pub window: TimeWindow,
    pub plays: u64,
    pub distinct_tracks: u64,
    pub distinct_artists: u64,
    pub total_duration_ms: i64,
    pub first_played_at: Option<DateTime<Utc>>,
    pub last_played_at: Option<DateTime<Utc>>,
}

/// One complete recompute result
#[derive(Debug, Clone)]
pub struct PublishedViews {
    pub anchor: DateTime<Utc>,
    pub recent_plays: Vec<CanonicalPlay>,
    pub window_leaderboards: Vec<WindowLeaderboardRow>,
    pub period_leaderboards: Vec<PeriodLeaderboardRow>,
    pub daily_totals: Vec<DailyTotal>,
    pub window_summaries: Vec<WindowSummary>,
}

/// Latest plays, newest first
pub fn recent_plays(history: &PlayHistory, limit: usize) -> Vec<CanonicalPlay> {
    history.iter().rev().take(limit).cloned().collect()
}

/// One row per day that has plays, oldest first
pub fn daily_totals(history: &PlayHistory) -> Vec<DailyTotal> {
    let mut days: BTreeMap<NaiveDate, (u64, HashSet<&str>, i64)> = BTreeMap::new();

    for play in history.iter() {
        let entry = days
            .entry(play.played_at.date_naive())
            .or_insert_with(|| (0, HashSet::new(), 0));
        entry.0 += 1;
        if let Some(id) = play.track_id.as_deref() {
            entry.1.insert(id);
        }
        entry.2 = entry.2.saturating_add(play.duration_or_zero());
    }

    days.into_iter()
        .map(|(day, (play_count, tracks, total_duration_ms))| DailyTotal {
            day,
            play_count,
            distinct_tracks: tracks.len() as u64,
            total_duration_ms,
        })
        .collect()
}

/// Totals per window, in catalog order. Windows without plays are omitted.
pub fn window_summaries(history: &PlayHistory, anchor: DateTime<Utc>) -> Vec<WindowSummary> {
    let mut windows = TimeWindow::ALL.to_vec();
    windows.sort_by(|a, b| a.catalog_cmp(*b));

    windows
        .into_iter()
        .filter_map(|w| {
            let mut tracks = HashSet::new();
            let mut artists = HashSet::new();
            let mut plays = 0u64;
            let mut total_duration_ms = 0i64;
            let mut first = None;
            let mut last = None;

            for play in history.range(w.lower_bound(anchor), None) {
                plays += 1;
                total_duration_ms = total_duration_ms.saturating_add(play.duration_or_zero());
                if let Some(id) = play.track_id.as_deref() {
                    tracks.insert(id);
                }
                if let Some(artist) = play.first_artist() {
                    artists.insert(artist);
                }
                first = first.or(Some(play.played_at));
                last = Some(play.played_at);
            }

            (plays > 0).then(|| WindowSummary {
                window: w,
                plays,
                distinct_tracks: tracks.len() as u64,
                distinct_artists: artists.len() as u64,
                total_duration_ms,
                first_played_at: first,
                last_played_at: last,
            })
        })
        .collect()
}

fn enrich_rows(board: &Leaderboard, index: &ArtistIndex) -> Vec<LeaderboardRow> {
    board
        .rows
        .iter()
        .map(|agg| LeaderboardRow {
            kind: board.kind,
            aggregate: agg.clone(),
            enrichment: match board.kind {
                SubjectKind::Genre => Enrichment::default(),
                _ => Enrichment::for_artist(index, agg.artist.as_deref()),
            },
        })
        .collect()
}

/// Run the resolver, ranking engine and enrichment over a history snapshot
pub fn build(
    history: &PlayHistory,
    index: &ArtistIndex,
    now: DateTime<Utc>,
    settings: ViewSettings,
) -> PublishedViews {
    let plan = window::resolve(history, now);
    let boards = rank::rank_all(history, &plan, index, settings.top_n);

    let mut window_leaderboards = vec![];
    let mut period_leaderboards = vec![];

    for board in &boards {
        let rows = enrich_rows(board, index);
        match &board.partition {
            Partition::Window(w) => window_leaderboards.extend(
                rows.into_iter().map(|row| WindowLeaderboardRow { window: *w, row }),
            ),
            Partition::Period(p) => period_leaderboards.extend(
                rows.into_iter().map(|row| PeriodLeaderboardRow {
                    period: p.clone(),
                    row,
                }),
            ),
        }
    }

    // Stable sorts: kinds stay in rank_all order inside each partition
    window_leaderboards.sort_by(|a, b| {
        a.window
            .catalog_cmp(b.window)
            .then_with(|| a.row.kind.cmp(&b.row.kind))
            .then_with(|| a.row.aggregate.rank.cmp(&b.row.aggregate.rank))
    });
    period_leaderboards.sort_by(|a, b| {
        a.period
            .publish_cmp(&b.period)
            .then_with(|| a.row.kind.cmp(&b.row.kind))
            .then_with(|| a.row.aggregate.rank.cmp(&b.row.aggregate.rank))
    });

    PublishedViews {
        anchor: plan.anchor,
        recent_plays: recent_plays(history, settings.recent_limit),
        window_leaderboards,
        period_leaderboards,
        daily_totals: daily_totals(history),
        window_summaries: window_summaries(history, plan.anchor),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::{artist, play, ts};

    fn history() -> PlayHistory {
        PlayHistory::from_plays(vec![
            play("2023-06-01T00:00:00Z", "old", "Cy", 1000),
            play("2024-01-01T08:00:00Z", "t1", "Bea, Ann", 200_000),
            play("2024-01-01T09:00:00Z", "t1", "Bea, Ann", 200_000),
            play("2024-01-02T00:00:00Z", "t2", "Ann", 100_000),
        ])
    }

    #[test]
    fn test_recent_plays_newest_first() {
        let recent = recent_plays(&history(), 2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].played_at, ts("2024-01-02T00:00:00Z"));
    }

    #[test]
    fn test_daily_totals() {
        let days = daily_totals(&history());
        assert_eq!(days.len(), 3);
        let jan1 = &days[1];
        assert_eq!(jan1.day, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(jan1.play_count, 2);
        assert_eq!(jan1.distinct_tracks, 1);
        assert_eq!(jan1.total_duration_ms, 400_000);
    }

    #[test]
    fn test_window_summaries() {
        let summaries = window_summaries(&history(), ts("2024-01-02T00:00:00Z"));
        let seven = summaries.iter().find(|s| s.window == TimeWindow::Days7).unwrap();
        assert_eq!(seven.plays, 3);
        assert_eq!(seven.distinct_tracks, 2);
        assert_eq!(seven.distinct_artists, 2);
        assert_eq!(seven.first_played_at, Some(ts("2024-01-01T08:00:00Z")));

        let all = summaries.iter().find(|s| s.window == TimeWindow::AllTime).unwrap();
        assert_eq!(all.plays, 4);
        assert_eq!(summaries.last().unwrap().window, TimeWindow::AllTime);
    }

    #[test]
    fn test_build_orders_and_enriches() {
        let index = ArtistIndex::new(vec![artist("Bea", &["indie"])]);
        let views = build(&history(), &index, Utc::now(), ViewSettings::default());
        assert_eq!(views.anchor, ts("2024-01-02T00:00:00Z"));

        let first = &views.window_leaderboards[0];
        assert_eq!(first.window, TimeWindow::Days180);
        assert_eq!(first.row.kind, SubjectKind::Track);
        assert_eq!(first.row.aggregate.rank, 1);

        let bea = views
            .window_leaderboards
            .iter()
            .find(|r| r.row.kind == SubjectKind::Artist && r.row.aggregate.subject == "Bea")
            .unwrap();
        assert_eq!(bea.row.enrichment.artist_genres, vec!["indie".to_string()]);

        let ann = views
            .window_leaderboards
            .iter()
            .find(|r| r.row.kind == SubjectKind::Artist && r.row.aggregate.subject == "Ann")
            .unwrap();
        assert_eq!(ann.row.enrichment, Enrichment::default());

        // Most recent month first among period rows
        assert_eq!(views.period_leaderboards[0].period.label, "2024-01");
    }

    #[test]
    fn test_totals_saturate_on_huge_durations() {
        let history = PlayHistory::from_plays(vec![
            play("2024-01-01T08:00:00Z", "t1", "Ann", i64::MAX),
            play("2024-01-01T09:00:00Z", "t2", "Ann", i64::MAX),
        ]);
        assert_eq!(daily_totals(&history)[0].total_duration_ms, i64::MAX);

        let summaries = window_summaries(&history, ts("2024-01-01T09:00:00Z"));
        assert!(summaries.iter().all(|s| s.total_duration_ms == i64::MAX));
    }

    #[test]
    fn test_empty_history_gives_empty_views() {
        let views = build(
            &PlayHistory::new(),
            &ArtistIndex::default(),
            ts("2024-01-01T00:00:00Z"),
            ViewSettings::default(),
        );
        assert!(views.recent_plays.is_empty());
        assert!(views.window_leaderboards.is_empty());
        assert!(views.period_leaderboards.is_empty());
        assert!(views.daily_totals.is_empty());
        assert!(views.window_summaries.is_empty());
    }
}
