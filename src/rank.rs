//! Aggregation and ranking engine
//!
//! For each partition and subject kind, plays are grouped by subject,
//! summarized, and put in a total order:
//!
//! 1. `play_count` descending
//! 2. `total_duration_ms` descending
//! 3. subject string ascending
//!
//! Ranks are dense (1, 2, 3, ...) and unique within a partition. Everything
//! is ranked before truncation to `top_n`, so the cut never changes ranks.

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use std::collections::HashMap;
use tracing::debug;

use crate::enrich::ArtistIndex;
use crate::merge::PlayHistory;
use crate::model::CanonicalPlay;
use crate::window::{Partition, PartitionPlan};

/// What a leaderboard ranks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SubjectKind {
    /// Exact track id; plays without one are not ranked
    Track,
    /// First-credited artist
    Artist,
    /// First genre of the first-credited artist; plays without one are not ranked
    Genre,
}

impl SubjectKind {
    pub const ALL: [SubjectKind; 3] = [SubjectKind::Track, SubjectKind::Artist, SubjectKind::Genre];

    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectKind::Track => "track",
            SubjectKind::Artist => "artist",
            SubjectKind::Genre => "genre",
        }
    }

    /// Accepts singular and plural forms
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "track" | "tracks" => Some(SubjectKind::Track),
            "artist" | "artists" => Some(SubjectKind::Artist),
            "genre" | "genres" => Some(SubjectKind::Genre),
            _ => None,
        }
    }

    /// The subject a play is attributed to, if any
    pub fn subject_of<'a>(&self, play: &'a CanonicalPlay, index: &'a ArtistIndex) -> Option<&'a str> {
        match self {
            SubjectKind::Track => play.track_id.as_deref(),
            SubjectKind::Artist => play.first_artist(),
            SubjectKind::Genre => play.first_artist().and_then(|a| index.first_genre(a)),
        }
    }
}

/// Running statistics for one subject within one partition
#[derive(Debug, Clone)]
pub struct SubjectStats<'a> {
    pub subject: &'a str,
    pub play_count: u64,
    pub total_duration_ms: i64,
    pub last_played_at: DateTime<Utc>,
    /// Most recent play of this subject, source of display fields
    pub latest: &'a CanonicalPlay,
}

/// Display fields of a ranked track, taken from its most recent play
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    pub track_name: Option<String>,
    pub artist_names: Option<String>,
    pub album_name: Option<String>,
    pub album_cover_url: Option<String>,
}

/// One leaderboard row
#[derive(Debug, Clone, PartialEq)]
pub struct RankedAggregate {
    pub rank: u32,
    pub subject: String,
    pub play_count: u64,
    pub total_duration_ms: i64,
    pub last_played_at: DateTime<Utc>,
    /// Present on track leaderboards only
    pub track: Option<TrackInfo>,
    /// First-credited artist of the latest play, used for enrichment
    pub artist: Option<String>,
}

impl RankedAggregate {
    pub fn total_minutes(&self) -> f64 {
        self.total_duration_ms as f64 / 60_000.0
    }

    pub fn total_hours(&self) -> f64 {
        self.total_duration_ms as f64 / 3_600_000.0
    }

    pub fn total_days(&self) -> f64 {
        self.total_duration_ms as f64 / 86_400_000.0
    }
}

/// Ranked rows for one (partition, subject kind) pair
#[derive(Debug, Clone)]
pub struct Leaderboard {
    pub partition: Partition,
    pub kind: SubjectKind,
    /// Distinct subjects before truncation
    pub subject_count: usize,
    pub rows: Vec<RankedAggregate>,
}

/// Group plays by subject
pub fn aggregate<'a>(
    plays: impl IntoIterator<Item = &'a CanonicalPlay>,
    kind: SubjectKind,
    index: &'a ArtistIndex,
) -> Vec<SubjectStats<'a>> {
    let mut groups: HashMap<&'a str, SubjectStats<'a>> = HashMap::new();

    for play in plays {
        let Some(subject) = kind.subject_of(play, index) else {
            continue;
        };

        let stats = groups.entry(subject).or_insert(SubjectStats {
            subject,
            play_count: 0,
            total_duration_ms: 0,
            last_played_at: play.played_at,
            latest: play,
        });
        stats.play_count += 1;
        stats.total_duration_ms = stats.total_duration_ms.saturating_add(play.duration_or_zero());
        if play.played_at >= stats.last_played_at {
            stats.last_played_at = play.played_at;
            stats.latest = play;
        }
    }

    groups.into_values().collect()
}

/// Sort, assign ranks and keep the first `top_n`
pub fn rank(mut stats: Vec<SubjectStats<'_>>, kind: SubjectKind, top_n: usize) -> Vec<RankedAggregate> {
    stats.sort_by(|a, b| {
        b.play_count
            .cmp(&a.play_count)
            .then_with(|| b.total_duration_ms.cmp(&a.total_duration_ms))
            .then_with(|| a.subject.cmp(b.subject))
    });

    stats
        .into_iter()
        .take(top_n)
        .enumerate()
        .map(|(i, s)| RankedAggregate {
            rank: i as u32 + 1,
            subject: s.subject.to_string(),
            play_count: s.play_count,
            total_duration_ms: s.total_duration_ms,
            last_played_at: s.last_played_at,
            track: (kind == SubjectKind::Track).then(|| TrackInfo {
                track_name: s.latest.track_name.clone(),
                artist_names: s.latest.artist_names.clone(),
                album_name: s.latest.album_name.clone(),
                album_cover_url: s.latest.album_cover_url.clone(),
            }),
            artist: match kind {
                SubjectKind::Artist => Some(s.subject.to_string()),
                SubjectKind::Track => s.latest.first_artist().map(String::from),
                SubjectKind::Genre => None,
            },
        })
        .collect()
}

/// Rank one partition of a history snapshot
pub fn rank_partition(
    history: &PlayHistory,
    anchor: DateTime<Utc>,
    partition: &Partition,
    kind: SubjectKind,
    index: &ArtistIndex,
    top_n: usize,
) -> Leaderboard {
    let (lower, upper) = partition.bounds(anchor);
    let stats = aggregate(history.range(lower, upper), kind, index);
    let subject_count = stats.len();

    Leaderboard {
        partition: partition.clone(),
        kind,
        subject_count,
        rows: rank(stats, kind, top_n),
    }
}

/// Rank every partition of a plan for every subject kind.
///
/// Partitions share no mutable state and are ranked in parallel. The
/// result follows plan order (windows, then periods), kinds in
/// [`SubjectKind::ALL`] order within each partition.
pub fn rank_all(
    history: &PlayHistory,
    plan: &PartitionPlan,
    index: &ArtistIndex,
    top_n: usize,
) -> Vec<Leaderboard> {
    let jobs: Vec<(Partition, SubjectKind)> = plan
        .partitions()
        .into_iter()
        .flat_map(|p| SubjectKind::ALL.into_iter().map(move |k| (p.clone(), k)))
        .collect();

    debug!(jobs = jobs.len(), anchor = %plan.anchor, "ranking partitions");

    jobs.into_par_iter()
        .map(|(partition, kind)| rank_partition(history, plan.anchor, &partition, kind, index, top_n))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::{artist, play, ts};
    use crate::window::{resolve, TimeWindow};

    fn board(history: &PlayHistory, kind: SubjectKind, index: &ArtistIndex) -> Vec<RankedAggregate> {
        let anchor = history.latest_played_at().unwrap();
        rank_partition(history, anchor, &Partition::Window(TimeWindow::Days7), kind, index, 50).rows
    }

    #[test]
    fn test_first_credited_artist_example() {
        let history = PlayHistory::from_plays(vec![
            play("2024-01-01T00:00:00Z", "t1", "Bea, Ann", 200_000),
            play("2024-01-02T00:00:00Z", "t2", "Ann", 100_000),
        ]);
        let rows = board(&history, SubjectKind::Artist, &ArtistIndex::default());

        assert_eq!(rows.len(), 2);
        assert_eq!((rows[0].subject.as_str(), rows[0].rank), ("Bea", 1));
        assert_eq!(rows[0].play_count, 1);
        assert_eq!(rows[0].total_duration_ms, 200_000);
        assert_eq!((rows[1].subject.as_str(), rows[1].rank), ("Ann", 2));
        assert_eq!(rows[1].total_duration_ms, 100_000);
    }

    #[test]
    fn test_tie_break_on_subject_name() {
        let history = PlayHistory::from_plays(vec![
            play("2024-01-01T00:00:00Z", "zz", "Ann", 1000),
            play("2024-01-02T00:00:00Z", "aa", "Ann", 1000),
        ]);
        let rows = board(&history, SubjectKind::Track, &ArtistIndex::default());
        let subjects: Vec<_> = rows.iter().map(|r| r.subject.as_str()).collect();
        assert_eq!(subjects, vec!["aa", "zz"]);
    }

    #[test]
    fn test_stats_and_track_info() {
        let mut late = play("2024-01-03T00:00:00Z", "t1", "Ann", 300);
        late.track_name = Some("Renamed".to_string());
        let mut no_duration = play("2024-01-02T00:00:00Z", "t1", "Ann", 0);
        no_duration.duration_ms = None;

        let history = PlayHistory::from_plays(vec![
            play("2024-01-01T00:00:00Z", "t1", "Ann", 200),
            no_duration,
            late,
        ]);
        let rows = board(&history, SubjectKind::Track, &ArtistIndex::default());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].play_count, 3);
        assert_eq!(rows[0].total_duration_ms, 500);
        assert_eq!(rows[0].last_played_at, ts("2024-01-03T00:00:00Z"));
        assert_eq!(
            rows[0].track.as_ref().unwrap().track_name.as_deref(),
            Some("Renamed")
        );
        assert_eq!(rows[0].artist.as_deref(), Some("Ann"));
    }

    #[test]
    fn test_huge_durations_saturate() {
        let history = PlayHistory::from_plays(vec![
            play("2024-01-01T00:00:00Z", "t1", "Ann", i64::MAX),
            play("2024-01-02T00:00:00Z", "t1", "Ann", i64::MAX),
        ]);
        let plan = resolve(&history, ts("2024-01-02T00:00:00Z"));
        let boards = rank_all(&history, &plan, &ArtistIndex::default(), 50);
        let track = boards
            .iter()
            .find(|b| b.kind == SubjectKind::Track && !b.rows.is_empty())
            .unwrap();
        assert_eq!(track.rows[0].play_count, 2);
        assert_eq!(track.rows[0].total_duration_ms, i64::MAX);
    }

    #[test]
    fn test_genre_excludes_plays_without_genres() {
        let history = PlayHistory::from_plays(vec![
            play("2024-01-01T00:00:00Z", "a", "Ann", 1),
            play("2024-01-02T00:00:00Z", "b", "Bea", 1),
            play("2024-01-03T00:00:00Z", "c", "Cy", 1),
            play("2024-01-04T00:00:00Z", "d", "", 1),
        ]);
        let index = ArtistIndex::new(vec![artist("Ann", &["pop", "rock"]), artist("Bea", &[])]);
        let rows = board(&history, SubjectKind::Genre, &index);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].subject, "pop");
        assert_eq!(rows[0].play_count, 1);
    }

    #[test]
    fn test_truncation_keeps_dense_ranks() {
        let plays: Vec<_> = (0..60)
            .map(|i| {
                play(
                    &format!("2024-01-01T00:{:02}:00Z", i),
                    &format!("t{:02}", i),
                    "Ann",
                    i as i64,
                )
            })
            .collect();
        let history = PlayHistory::from_plays(plays);
        let anchor = history.latest_played_at().unwrap();
        let lb = rank_partition(
            &history,
            anchor,
            &Partition::Window(TimeWindow::AllTime),
            SubjectKind::Track,
            &ArtistIndex::default(),
            50,
        );
        assert_eq!(lb.subject_count, 60);
        let ranks: Vec<u32> = lb.rows.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, (1..=50).collect::<Vec<_>>());
        // Longest listening time first when play counts tie
        assert_eq!(lb.rows[0].subject, "t59");
    }

    #[test]
    fn test_rank_all_order_and_empty_history() {
        let plan = resolve(&PlayHistory::new(), ts("2024-01-01T00:00:00Z"));
        let boards = rank_all(&PlayHistory::new(), &plan, &ArtistIndex::default(), 50);
        assert_eq!(boards.len(), 6 * 3);
        assert!(boards.iter().all(|b| b.rows.is_empty()));
        assert_eq!(boards[0].partition, Partition::Window(TimeWindow::Days180));
        assert_eq!(boards[0].kind, SubjectKind::Track);
        assert_eq!(boards[1].kind, SubjectKind::Artist);
    }

    #[test]
    fn test_unit_conversions() {
        let row = RankedAggregate {
            rank: 1,
            subject: "x".to_string(),
            play_count: 1,
            total_duration_ms: 86_400_000,
            last_played_at: ts("2024-01-01T00:00:00Z"),
            track: None,
            artist: None,
        };
        assert_eq!(row.total_minutes(), 1440.0);
        assert_eq!(row.total_hours(), 24.0);
        assert_eq!(row.total_days(), 1.0);
    }
}
