//! SQLite schema definition
//!
//! - raw_history: append-only log of collected payloads, one row per distinct collection (instant + payload)
//! - plays: canonical history, one row per played_at
//! - artists: artist reference data, read-only for the core
//! - view_*: published views, replaced wholesale on every recompute
//!
//! Instants are stored as RFC 3339 UTC text with millisecond precision.

pub const SCHEMA: &str = r#"
-- ============================================
-- INPUTS
-- ============================================

-- Raw provider payloads as collected
CREATE TABLE IF NOT EXISTS raw_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    collected_at TEXT NOT NULL,
    source_id TEXT NOT NULL,               -- 'spotify:ExportDir', 'spotify:RawLog'
    payload TEXT NOT NULL,                 -- JSON document with an items array
    payload_sha256 TEXT NOT NULL UNIQUE
);

CREATE INDEX IF NOT EXISTS idx_raw_history_collected ON raw_history(collected_at);

-- Per-source bookkeeping
CREATE TABLE IF NOT EXISTS source_state (
    id TEXT PRIMARY KEY,
    description TEXT,
    status TEXT DEFAULT 'active',          -- 'active', 'frozen', 'deprecated'
    last_collected_at TEXT,
    last_ingested DATETIME
);

-- Artist reference data keyed by display name
CREATE TABLE IF NOT EXISTS artists (
    artist_name TEXT PRIMARY KEY,
    artist_id TEXT,
    image_url TEXT,
    spotify_url TEXT,
    genres TEXT,                           -- JSON array; NULL = never fetched
    popularity INTEGER,
    first_seen_at TEXT
);

-- ============================================
-- CANONICAL HISTORY
-- ============================================

CREATE TABLE IF NOT EXISTS plays (
    played_at TEXT PRIMARY KEY,
    track_id TEXT,
    track_name TEXT,
    artist_names TEXT,                     -- sorted, joined with ', '
    album_name TEXT,
    album_cover_url TEXT,
    duration_ms INTEGER,
    explicit INTEGER,
    context_uri TEXT,
    ingested_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_plays_ingested ON plays(ingested_at);

-- ============================================
-- RUNS
-- ============================================

CREATE TABLE IF NOT EXISTS recompute_runs (
    id TEXT PRIMARY KEY,                   -- UUID
    started_at TEXT NOT NULL,
    finished_at TEXT,
    status TEXT NOT NULL,                  -- 'running', 'published', 'failed'
    anchor TEXT,
    play_count INTEGER,
    leaderboard_rows INTEGER
);

-- ============================================
-- PUBLISHED VIEWS
-- ============================================

CREATE TABLE IF NOT EXISTS view_recent_plays (
    position INTEGER PRIMARY KEY,
    played_at TEXT NOT NULL,
    track_id TEXT,
    track_name TEXT,
    artist_names TEXT,
    album_name TEXT,
    album_cover_url TEXT,
    duration_ms INTEGER,
    context_uri TEXT
);

CREATE TABLE IF NOT EXISTS view_window_leaderboard (
    window_key TEXT NOT NULL,
    window_label TEXT NOT NULL,
    window_order INTEGER NOT NULL,
    subject_kind TEXT NOT NULL,            -- 'track', 'artist', 'genre'
    rank INTEGER NOT NULL,
    subject TEXT NOT NULL,
    track_name TEXT,
    artist_names TEXT,
    album_name TEXT,
    album_cover_url TEXT,
    play_count INTEGER NOT NULL,
    total_duration_ms INTEGER NOT NULL,
    total_minutes REAL NOT NULL,
    total_hours REAL NOT NULL,
    total_days REAL NOT NULL,
    last_played_at TEXT NOT NULL,
    artist_name TEXT,
    artist_image_url TEXT,
    artist_spotify_url TEXT,
    artist_genres TEXT,
    artist_popularity INTEGER,
    PRIMARY KEY (window_key, subject_kind, rank)
);

CREATE TABLE IF NOT EXISTS view_period_leaderboard (
    period_type TEXT NOT NULL,             -- 'month', 'year'
    period_start TEXT NOT NULL,
    period_label TEXT NOT NULL,            -- 'YYYY-MM', 'YYYY'
    subject_kind TEXT NOT NULL,
    rank INTEGER NOT NULL,
    subject TEXT NOT NULL,
    track_name TEXT,
    artist_names TEXT,
    album_name TEXT,
    album_cover_url TEXT,
    play_count INTEGER NOT NULL,
    total_duration_ms INTEGER NOT NULL,
    total_minutes REAL NOT NULL,
    total_hours REAL NOT NULL,
    total_days REAL NOT NULL,
    last_played_at TEXT NOT NULL,
    artist_name TEXT,
    artist_image_url TEXT,
    artist_spotify_url TEXT,
    artist_genres TEXT,
    artist_popularity INTEGER,
    PRIMARY KEY (period_type, period_start, subject_kind, rank)
);

CREATE TABLE IF NOT EXISTS view_daily_totals (
    day TEXT PRIMARY KEY,                  -- 'YYYY-MM-DD' (UTC)
    play_count INTEGER NOT NULL,
    distinct_tracks INTEGER NOT NULL,
    total_duration_ms INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS view_window_summary (
    window_key TEXT PRIMARY KEY,
    window_label TEXT NOT NULL,
    window_order INTEGER NOT NULL,
    plays INTEGER NOT NULL,
    distinct_tracks INTEGER NOT NULL,
    distinct_artists INTEGER NOT NULL,
    total_duration_ms INTEGER NOT NULL,
    first_played_at TEXT,
    last_played_at TEXT
);
"#;
