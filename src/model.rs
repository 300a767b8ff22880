//! Core records shared by the ingest, merge and ranking stages

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// Separator used when joining and splitting artist display names
pub const ARTIST_SEPARATOR: &str = ", ";

/// A deduplicated, normalized play. `played_at` is the unique key.
///
/// Field order matters: the derived `Ord` is the deterministic tie-break
/// the merger falls back on when two candidates were collected at the
/// same instant.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CanonicalPlay {
    pub played_at: DateTime<Utc>,
    pub track_id: Option<String>,
    pub track_name: Option<String>,
    /// Artist display names, sorted by name and joined with `", "`
    pub artist_names: Option<String>,
    pub album_name: Option<String>,
    pub album_cover_url: Option<String>,
    pub duration_ms: Option<i64>,
    pub explicit: Option<bool>,
    pub context_uri: Option<String>,
    /// `collected_at` of the payload this record was taken from
    pub ingested_at: DateTime<Utc>,
}

impl CanonicalPlay {
    /// First-credited artist: first `", "` segment of `artist_names`, trimmed.
    ///
    /// Empty and whitespace-only names count as no artist, the same as `None`.
    pub fn first_artist(&self) -> Option<&str> {
        let names = self.artist_names.as_deref()?;
        let first = names.split(ARTIST_SEPARATOR).next()?.trim();
        if first.is_empty() {
            None
        } else {
            Some(first)
        }
    }

    /// Duration with missing values counted as zero
    pub fn duration_or_zero(&self) -> i64 {
        self.duration_ms.unwrap_or(0)
    }
}

/// Artist reference data maintained outside the core, keyed by trimmed name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtistMetadata {
    pub name: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub spotify_url: Option<String>,
    /// `None` means never fetched; `Some(vec![])` means fetched with no genres
    #[serde(default)]
    pub genres: Option<Vec<String>>,
    #[serde(default)]
    pub popularity: Option<i64>,
}

impl ArtistMetadata {
    pub fn first_genre(&self) -> Option<&str> {
        self.genres
            .as_ref()
            .and_then(|g| g.first())
            .map(|g| g.trim())
            .filter(|g| !g.is_empty())
    }

    /// Whether the external enrichment process still has work to do for this row
    pub fn is_incomplete(&self) -> bool {
        self.image_url.is_none() || self.genres.is_none() || self.popularity.is_none()
    }
}

/// Storage form of an instant: RFC 3339, UTC, fixed millisecond precision.
///
/// The fixed width keeps lexical order equal to time order in SQLite.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse an RFC 3339 instant, truncated to the stored precision
pub fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s.trim())
        .ok()
        .map(|dt| to_stored_precision(dt.with_timezone(&Utc)))
}

/// Drop sub-millisecond digits so in-memory keys equal their stored form
pub fn to_stored_precision(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(3)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn ts(s: &str) -> DateTime<Utc> {
        parse_ts(s).unwrap()
    }

    pub fn play(played_at: &str, track_id: &str, artists: &str, duration_ms: i64) -> CanonicalPlay {
        CanonicalPlay {
            played_at: ts(played_at),
            track_id: Some(track_id.to_string()),
            track_name: Some(format!("Track {}", track_id)),
            artist_names: if artists.is_empty() {
                None
            } else {
                Some(artists.to_string())
            },
            album_name: Some("Album".to_string()),
            album_cover_url: None,
            duration_ms: Some(duration_ms),
            explicit: Some(false),
            context_uri: None,
            ingested_at: ts("2024-06-01T00:00:00Z"),
        }
    }

    pub fn artist(name: &str, genres: &[&str]) -> ArtistMetadata {
        ArtistMetadata {
            name: name.to_string(),
            id: None,
            image_url: Some(format!("https://img.example/{}", name)),
            spotify_url: None,
            genres: Some(genres.iter().map(|g| g.to_string()).collect()),
            popularity: Some(50),
        }
    }
}
