//! History storage with SQLite
//!
//! - Raw payload log with content-hash dedup
//! - Canonical history with a transactional, single-writer merge
//! - Artist reference data
//! - Published views, swapped in one transaction per recompute

mod schema;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{
    params, Connection, OptionalExtension, Row, ToSql, Transaction, TransactionBehavior,
};
use std::path::Path;
use tracing::debug;

use crate::merge::{MergeOutcome, PlayHistory};
use crate::model::{format_ts, parse_ts, ArtistMetadata, CanonicalPlay};
use crate::rank::SubjectKind;
use crate::source::RawBatch;
use crate::views::{LeaderboardRow, PublishedViews};

pub use schema::SCHEMA;

const PLAY_COLUMNS: &str = "played_at, track_id, track_name, artist_names, album_name, \
     album_cover_url, duration_ms, explicit, context_uri, ingested_at";

pub struct HistoryStore {
    conn: Connection,
}

impl HistoryStore {
    pub fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        // Concurrent runs wait for the writer instead of failing immediately
        self.conn.busy_timeout(std::time::Duration::from_secs(30))?;
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    // ============================================
    // SOURCES & RAW LOG
    // ============================================

    pub fn ensure_source(&self, id: &str, description: &str, status: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO source_state (id, description, status) VALUES (?, ?, ?)",
            params![id, description, status],
        )?;
        Ok(())
    }

    pub fn update_source_ingested(
        &self,
        id: &str,
        last_collected_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE source_state
             SET last_ingested = datetime('now'),
                 last_collected_at = COALESCE(?, last_collected_at)
             WHERE id = ?",
            params![last_collected_at.map(format_ts), id],
        )?;
        Ok(())
    }

    /// Append a payload to the raw log. Returns `false` if an identical
    /// payload is already stored.
    pub fn insert_raw_batch(&self, batch: &RawBatch) -> Result<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO raw_history (collected_at, source_id, payload, payload_sha256)
             VALUES (?, ?, ?, ?)",
            params![
                format_ts(batch.collected_at),
                batch.source_id,
                batch.payload_text(),
                batch.digest(),
            ],
        )?;
        Ok(inserted > 0)
    }

    /// Raw log entries collected at or after `since`, oldest first
    pub fn raw_batches_since(&self, since: Option<DateTime<Utc>>) -> Result<Vec<RawBatch>> {
        let mut stmt = self.conn.prepare(
            "SELECT source_id, collected_at, payload FROM raw_history
             WHERE ?1 IS NULL OR collected_at >= ?1
             ORDER BY collected_at, id",
        )?;

        let rows = stmt.query_map(params![since.map(format_ts)], |row| {
            Ok((
                row.get::<_, String>(0)?,
                ts_column(row, 1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut batches = vec![];
        for row in rows {
            let (source_id, collected_at, payload) = row?;
            let payload = serde_json::from_str(&payload)
                .with_context(|| format!("Corrupt raw payload collected at {}", collected_at))?;
            batches.push(RawBatch::new(&source_id, collected_at, payload));
        }
        Ok(batches)
    }

    pub fn raw_batch_count(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM raw_history", [], |row| row.get(0))?)
    }

    // ============================================
    // CANONICAL HISTORY
    // ============================================

    /// Newest `ingested_at` in canonical history
    pub fn latest_ingested_at(&self) -> Result<Option<DateTime<Utc>>> {
        let raw: Option<String> =
            self.conn
                .query_row("SELECT MAX(ingested_at) FROM plays", [], |row| row.get(0))?;
        Ok(raw.as_deref().and_then(parse_ts))
    }

    pub fn play_count(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM plays", [], |row| row.get(0))?)
    }

    /// Merge candidates into canonical history.
    ///
    /// Runs in an IMMEDIATE transaction: the write lock is taken before the
    /// existing rows are read, so two merges over the same keys cannot
    /// interleave. Only inserted or replaced rows are written.
    pub fn merge_plays(&mut self, candidates: Vec<CanonicalPlay>) -> Result<MergeOutcome> {
        self.merge_plays_with(candidates, |history, batch| history.merge(batch))
    }

    /// Merge candidates re-normalized from the raw log; see [`PlayHistory::merge_replayed`]
    pub fn replay_plays(&mut self, candidates: Vec<CanonicalPlay>) -> Result<MergeOutcome> {
        self.merge_plays_with(candidates, |history, batch| history.merge_replayed(batch))
    }

    fn merge_plays_with(
        &mut self,
        candidates: Vec<CanonicalPlay>,
        merge: fn(&mut PlayHistory, Vec<CanonicalPlay>) -> MergeOutcome,
    ) -> Result<MergeOutcome> {
        if candidates.is_empty() {
            return Ok(MergeOutcome::default());
        }

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut existing = vec![];
        {
            let mut stmt = tx.prepare_cached(&format!(
                "SELECT {} FROM plays WHERE played_at = ?",
                PLAY_COLUMNS
            ))?;
            for candidate in &candidates {
                let row = stmt
                    .query_row(params![format_ts(candidate.played_at)], play_from_row)
                    .optional()?;
                existing.extend(row);
            }
        }

        let mut history = PlayHistory::from_plays(existing);
        let outcome = merge(&mut history, candidates);

        {
            let mut stmt = tx.prepare_cached(&format!(
                "INSERT INTO plays ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(played_at) DO UPDATE SET
                     track_id = excluded.track_id,
                     track_name = excluded.track_name,
                     artist_names = excluded.artist_names,
                     album_name = excluded.album_name,
                     album_cover_url = excluded.album_cover_url,
                     duration_ms = excluded.duration_ms,
                     explicit = excluded.explicit,
                     context_uri = excluded.context_uri,
                     ingested_at = excluded.ingested_at",
                PLAY_COLUMNS
            ))?;
            for play in &outcome.changed {
                stmt.execute(params![
                    format_ts(play.played_at),
                    play.track_id,
                    play.track_name,
                    play.artist_names,
                    play.album_name,
                    play.album_cover_url,
                    play.duration_ms,
                    play.explicit,
                    play.context_uri,
                    format_ts(play.ingested_at),
                ])?;
            }
        }

        tx.commit()?;
        debug!(
            inserted = outcome.inserted,
            replaced = outcome.replaced,
            unchanged = outcome.unchanged,
            "merged plays"
        );
        Ok(outcome)
    }

    /// Snapshot of the full canonical history
    pub fn load_history(&self) -> Result<PlayHistory> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {} FROM plays ORDER BY played_at", PLAY_COLUMNS))?;
        let rows = stmt.query_map([], play_from_row)?;
        let plays = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(PlayHistory::from_plays(plays))
    }

    // ============================================
    // ARTISTS
    // ============================================

    /// Insert or update artist rows by trimmed name.
    ///
    /// Fields missing from an update keep their stored values.
    pub fn upsert_artists(&mut self, artists: &[ArtistMetadata]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO artists
                   (artist_name, artist_id, image_url, spotify_url, genres, popularity, first_seen_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(artist_name) DO UPDATE SET
                     artist_id = COALESCE(excluded.artist_id, artist_id),
                     image_url = COALESCE(excluded.image_url, image_url),
                     spotify_url = COALESCE(excluded.spotify_url, spotify_url),
                     genres = COALESCE(excluded.genres, genres),
                     popularity = COALESCE(excluded.popularity, popularity)",
            )?;
            let now = format_ts(Utc::now());
            for artist in artists {
                let genres = artist
                    .genres
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?;
                stmt.execute(params![
                    artist.name.trim(),
                    artist.id,
                    artist.image_url,
                    artist.spotify_url,
                    genres,
                    artist.popularity,
                    now,
                ])?;
            }
        }
        tx.commit()?;
        Ok(artists.len())
    }

    pub fn load_artists(&self) -> Result<Vec<ArtistMetadata>> {
        let mut stmt = self.conn.prepare(
            "SELECT artist_name, artist_id, image_url, spotify_url, genres, popularity
             FROM artists ORDER BY artist_name",
        )?;
        let rows = stmt.query_map([], |row| {
            let genres: Option<String> = row.get(4)?;
            Ok(ArtistMetadata {
                name: row.get(0)?,
                id: row.get(1)?,
                image_url: row.get(2)?,
                spotify_url: row.get(3)?,
                // An unreadable genre list counts as never fetched
                genres: genres.and_then(|g| serde_json::from_str(&g).ok()),
                popularity: row.get(5)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    // ============================================
    // RUNS & PUBLISHING
    // ============================================

    pub fn begin_run(&self, run_id: &str, started_at: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "INSERT INTO recompute_runs (id, started_at, status) VALUES (?, ?, 'running')",
            params![run_id, format_ts(started_at)],
        )?;
        Ok(())
    }

    pub fn fail_run(&self, run_id: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE recompute_runs SET status = 'failed', finished_at = ? WHERE id = ?",
            params![format_ts(Utc::now()), run_id],
        )?;
        Ok(())
    }

    /// Replace every published view with `views` and close the run, atomically
    pub fn publish(&mut self, run_id: &str, views: &PublishedViews, play_count: usize) -> Result<()> {
        let tx = self.conn.transaction()?;

        tx.execute_batch(
            "DELETE FROM view_recent_plays;
             DELETE FROM view_window_leaderboard;
             DELETE FROM view_period_leaderboard;
             DELETE FROM view_daily_totals;
             DELETE FROM view_window_summary;",
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO view_recent_plays
                   (position, played_at, track_id, track_name, artist_names, album_name,
                    album_cover_url, duration_ms, context_uri)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )?;
            for (i, play) in views.recent_plays.iter().enumerate() {
                stmt.execute(params![
                    i as i64 + 1,
                    format_ts(play.played_at),
                    play.track_id,
                    play.track_name,
                    play.artist_names,
                    play.album_name,
                    play.album_cover_url,
                    play.duration_ms,
                    play.context_uri,
                ])?;
            }
        }

        for entry in &views.window_leaderboards {
            insert_leaderboard_row(
                &tx,
                "INSERT INTO view_window_leaderboard
                   (window_key, window_label, window_order, subject_kind, rank, subject,
                    track_name, artist_names, album_name, album_cover_url, play_count,
                    total_duration_ms, total_minutes, total_hours, total_days, last_played_at,
                    artist_name, artist_image_url, artist_spotify_url, artist_genres, artist_popularity)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                         ?17, ?18, ?19, ?20, ?21)",
                [
                    &entry.window.key(),
                    &entry.window.label(),
                    &(entry.window.catalog_position() as i64),
                ],
                &entry.row,
            )?;
        }

        for entry in &views.period_leaderboards {
            insert_leaderboard_row(
                &tx,
                "INSERT INTO view_period_leaderboard
                   (period_type, period_start, period_label, subject_kind, rank, subject,
                    track_name, artist_names, album_name, album_cover_url, play_count,
                    total_duration_ms, total_minutes, total_hours, total_days, last_played_at,
                    artist_name, artist_image_url, artist_spotify_url, artist_genres, artist_popularity)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                         ?17, ?18, ?19, ?20, ?21)",
                [
                    &entry.period.period_type.as_str(),
                    &format_ts(entry.period.period_start),
                    &entry.period.label,
                ],
                &entry.row,
            )?;
        }

        {
            let mut stmt = tx.prepare(
                "INSERT INTO view_daily_totals (day, play_count, distinct_tracks, total_duration_ms)
                 VALUES (?, ?, ?, ?)",
            )?;
            for day in &views.daily_totals {
                stmt.execute(params![
                    day.day.format("%Y-%m-%d").to_string(),
                    day.play_count as i64,
                    day.distinct_tracks as i64,
                    day.total_duration_ms,
                ])?;
            }
        }

        {
            let mut stmt = tx.prepare(
                "INSERT INTO view_window_summary
                   (window_key, window_label, window_order, plays, distinct_tracks,
                    distinct_artists, total_duration_ms, first_played_at, last_played_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )?;
            for summary in &views.window_summaries {
                stmt.execute(params![
                    summary.window.key(),
                    summary.window.label(),
                    summary.window.catalog_position() as i64,
                    summary.plays as i64,
                    summary.distinct_tracks as i64,
                    summary.distinct_artists as i64,
                    summary.total_duration_ms,
                    summary.first_played_at.map(format_ts),
                    summary.last_played_at.map(format_ts),
                ])?;
            }
        }

        let leaderboard_rows = views.window_leaderboards.len() + views.period_leaderboards.len();
        tx.execute(
            "UPDATE recompute_runs
             SET status = 'published', finished_at = ?, anchor = ?, play_count = ?,
                 leaderboard_rows = ?
             WHERE id = ?",
            params![
                format_ts(Utc::now()),
                format_ts(views.anchor),
                play_count as i64,
                leaderboard_rows as i64,
                run_id,
            ],
        )?;

        tx.commit()?;
        Ok(())
    }

    // ============================================
    // VIEW QUERIES
    // ============================================

    pub fn recent_plays(&self, limit: usize) -> Result<Vec<RecentPlayRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT position, played_at, track_id, track_name, artist_names, album_name,
                    album_cover_url, duration_ms, context_uri
             FROM view_recent_plays
             ORDER BY position
             LIMIT ?",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(RecentPlayRow {
                position: row.get(0)?,
                played_at: row.get(1)?,
                track_id: row.get(2)?,
                track_name: row.get(3)?,
                artist_names: row.get(4)?,
                album_name: row.get(5)?,
                album_cover_url: row.get(6)?,
                duration_ms: row.get(7)?,
                context_uri: row.get(8)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn window_leaderboard(
        &self,
        kind: SubjectKind,
        window_key: &str,
    ) -> Result<Vec<LeaderboardEntryRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT window_key, window_label, rank, subject, track_name, artist_names,
                    play_count, total_duration_ms, total_minutes, last_played_at,
                    artist_image_url, artist_genres
             FROM view_window_leaderboard
             WHERE subject_kind = ?1 AND window_key = ?2
             ORDER BY rank",
        )?;
        let rows = stmt.query_map(params![kind.as_str(), window_key], leaderboard_entry)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn period_leaderboard(
        &self,
        kind: SubjectKind,
        period_type: &str,
        period_label: &str,
    ) -> Result<Vec<LeaderboardEntryRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT period_type || ':' || period_label, period_label, rank, subject, track_name,
                    artist_names, play_count, total_duration_ms, total_minutes, last_played_at,
                    artist_image_url, artist_genres
             FROM view_period_leaderboard
             WHERE subject_kind = ?1 AND period_type = ?2 AND period_label = ?3
             ORDER BY rank",
        )?;
        let rows = stmt.query_map(
            params![kind.as_str(), period_type, period_label],
            leaderboard_entry,
        )?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Most recent `days` rows, newest first
    pub fn daily_totals(&self, days: usize) -> Result<Vec<DailyTotalRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT day, play_count, distinct_tracks, total_duration_ms
             FROM view_daily_totals
             ORDER BY day DESC
             LIMIT ?",
        )?;
        let rows = stmt.query_map(params![days as i64], |row| {
            Ok(DailyTotalRow {
                day: row.get(0)?,
                play_count: row.get(1)?,
                distinct_tracks: row.get(2)?,
                total_duration_ms: row.get(3)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn window_summaries(&self) -> Result<Vec<WindowSummaryRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT window_key, window_label, plays, distinct_tracks, distinct_artists,
                    total_duration_ms, first_played_at, last_played_at
             FROM view_window_summary
             ORDER BY window_order",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(WindowSummaryRow {
                window_key: row.get(0)?,
                window_label: row.get(1)?,
                plays: row.get(2)?,
                distinct_tracks: row.get(3)?,
                distinct_artists: row.get(4)?,
                total_duration_ms: row.get(5)?,
                first_played_at: row.get(6)?,
                last_played_at: row.get(7)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn last_run(&self) -> Result<Option<RunRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, started_at, finished_at, status, anchor, play_count, leaderboard_rows
                 FROM recompute_runs
                 ORDER BY started_at DESC
                 LIMIT 1",
                [],
                |row| {
                    Ok(RunRow {
                        id: row.get(0)?,
                        started_at: row.get(1)?,
                        finished_at: row.get(2)?,
                        status: row.get(3)?,
                        anchor: row.get(4)?,
                        play_count: row.get(5)?,
                        leaderboard_rows: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }
}

fn ts_column(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("invalid timestamp: {}", raw).into(),
        )
    })
}

fn play_from_row(row: &Row) -> rusqlite::Result<CanonicalPlay> {
    Ok(CanonicalPlay {
        played_at: ts_column(row, 0)?,
        track_id: row.get(1)?,
        track_name: row.get(2)?,
        artist_names: row.get(3)?,
        album_name: row.get(4)?,
        album_cover_url: row.get(5)?,
        duration_ms: row.get(6)?,
        explicit: row.get(7)?,
        context_uri: row.get(8)?,
        ingested_at: ts_column(row, 9)?,
    })
}

/// Shared insert for both leaderboard tables; the first three columns
/// identify the partition.
fn insert_leaderboard_row(
    tx: &Transaction,
    sql: &str,
    partition: [&dyn ToSql; 3],
    entry: &LeaderboardRow,
) -> Result<()> {
    let agg = &entry.aggregate;
    let track = agg.track.as_ref();
    let genres = if entry.enrichment.artist_genres.is_empty() {
        None
    } else {
        Some(serde_json::to_string(&entry.enrichment.artist_genres)?)
    };

    let mut stmt = tx.prepare_cached(sql)?;
    stmt.execute(params![
        partition[0],
        partition[1],
        partition[2],
        entry.kind.as_str(),
        agg.rank as i64,
        agg.subject,
        track.and_then(|t| t.track_name.as_deref()),
        track.and_then(|t| t.artist_names.as_deref()),
        track.and_then(|t| t.album_name.as_deref()),
        track.and_then(|t| t.album_cover_url.as_deref()),
        agg.play_count as i64,
        agg.total_duration_ms,
        agg.total_minutes(),
        agg.total_hours(),
        agg.total_days(),
        format_ts(agg.last_played_at),
        agg.artist,
        entry.enrichment.artist_image_url,
        entry.enrichment.artist_spotify_url,
        genres,
        entry.enrichment.artist_popularity,
    ])?;
    Ok(())
}

fn leaderboard_entry(row: &Row) -> rusqlite::Result<LeaderboardEntryRow> {
    let genres: Option<String> = row.get(11)?;
    Ok(LeaderboardEntryRow {
        partition_key: row.get(0)?,
        partition_label: row.get(1)?,
        rank: row.get(2)?,
        subject: row.get(3)?,
        track_name: row.get(4)?,
        artist_names: row.get(5)?,
        play_count: row.get(6)?,
        total_duration_ms: row.get(7)?,
        total_minutes: row.get(8)?,
        last_played_at: row.get(9)?,
        artist_image_url: row.get(10)?,
        artist_genres: genres
            .and_then(|g| serde_json::from_str(&g).ok())
            .unwrap_or_default(),
    })
}

// ============================================
// ROW TYPES
// ============================================

#[derive(Debug)]
pub struct RecentPlayRow {
    pub position: i64,
    pub played_at: String,
    pub track_id: Option<String>,
    pub track_name: Option<String>,
    pub artist_names: Option<String>,
    pub album_name: Option<String>,
    pub album_cover_url: Option<String>,
    pub duration_ms: Option<i64>,
    pub context_uri: Option<String>,
}

#[derive(Debug)]
pub struct LeaderboardEntryRow {
    pub partition_key: String,
    pub partition_label: String,
    pub rank: i64,
    pub subject: String,
    pub track_name: Option<String>,
    pub artist_names: Option<String>,
    pub play_count: i64,
    pub total_duration_ms: i64,
    pub total_minutes: f64,
    pub last_played_at: String,
    pub artist_image_url: Option<String>,
    pub artist_genres: Vec<String>,
}

#[derive(Debug)]
pub struct DailyTotalRow {
    pub day: String,
    pub play_count: i64,
    pub distinct_tracks: i64,
    pub total_duration_ms: i64,
}

#[derive(Debug)]
pub struct WindowSummaryRow {
    pub window_key: String,
    pub window_label: String,
    pub plays: i64,
    pub distinct_tracks: i64,
    pub distinct_artists: i64,
    pub total_duration_ms: i64,
    pub first_played_at: Option<String>,
    pub last_played_at: Option<String>,
}

#[derive(Debug)]
pub struct RunRow {
    pub id: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub status: String,
    pub anchor: Option<String>,
    pub play_count: Option<i64>,
    pub leaderboard_rows: Option<i64>,
}
