//! Event normalizer
//!
//! Flattens one item of a provider "recently played" payload into a
//! [`CanonicalPlay`]. Payload shape (only the fields read here):
//!
//! ```json
//! {
//!   "played_at": "2024-01-01T00:00:00.000Z",
//!   "context": { "uri": "spotify:playlist:..." },
//!   "track": {
//!     "id": "...", "name": "...", "duration_ms": 200000, "explicit": false,
//!     "album": { "name": "...", "images": [{ "height": 640, "url": "..." }] },
//!     "artists": [{ "name": "..." }]
//!   }
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::model::{parse_ts, CanonicalPlay, ARTIST_SEPARATOR};
use crate::source::RawBatch;

/// Reasons a single payload item is dropped
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("missing played_at")]
    MissingPlayedAt,

    #[error("unparseable played_at: {0}")]
    InvalidPlayedAt(String),

    #[error("missing track object")]
    MissingTrack,

    #[error("malformed event: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct RawPlayEvent {
    played_at: Option<String>,
    track: Option<RawTrack>,
    context: Option<RawContext>,
}

#[derive(Debug, Deserialize)]
struct RawTrack {
    id: Option<String>,
    name: Option<String>,
    duration_ms: Option<Value>,
    explicit: Option<bool>,
    album: Option<RawAlbum>,
    #[serde(default)]
    artists: Vec<RawArtist>,
}

#[derive(Debug, Deserialize)]
struct RawAlbum {
    name: Option<String>,
    #[serde(default)]
    images: Vec<RawImage>,
}

#[derive(Debug, Deserialize)]
struct RawImage {
    height: Option<u32>,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawArtist {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawContext {
    uri: Option<String>,
}

/// Normalized candidates from one raw batch plus the count of dropped items
#[derive(Debug, Default)]
pub struct NormalizedBatch {
    pub plays: Vec<CanonicalPlay>,
    pub skipped: usize,
}

/// Normalize every item of a batch. Bad items are logged and counted, never fatal.
pub fn normalize_batch(batch: &RawBatch) -> NormalizedBatch {
    let mut out = NormalizedBatch::default();

    for (index, item) in batch.items().iter().enumerate() {
        match normalize_event(item, batch.collected_at) {
            Ok(play) => out.plays.push(play),
            Err(e) => {
                warn!(
                    source = %batch.source_id,
                    item = index,
                    error = %e,
                    "dropping raw play event"
                );
                out.skipped += 1;
            }
        }
    }

    out
}

/// Normalize one payload item collected at `collected_at`
pub fn normalize_event(
    item: &Value,
    collected_at: DateTime<Utc>,
) -> Result<CanonicalPlay, NormalizeError> {
    let event = RawPlayEvent::deserialize(item)?;

    let played_at_raw = event.played_at.ok_or(NormalizeError::MissingPlayedAt)?;
    let played_at =
        parse_ts(&played_at_raw).ok_or(NormalizeError::InvalidPlayedAt(played_at_raw))?;
    let track = event.track.ok_or(NormalizeError::MissingTrack)?;

    let (album_name, album_cover_url) = match track.album {
        Some(album) => (album.name, pick_cover(&album.images)),
        None => (None, None),
    };

    Ok(CanonicalPlay {
        played_at,
        track_id: track.id.filter(|id| !id.is_empty()),
        track_name: track.name,
        artist_names: join_artist_names(&track.artists),
        album_name,
        album_cover_url,
        duration_ms: track.duration_ms.as_ref().and_then(parse_duration),
        explicit: track.explicit,
        context_uri: event.context.and_then(|c| c.uri),
        ingested_at: collected_at,
    })
}

/// Sort names lexicographically and join with `", "`; no names yields `None`
fn join_artist_names(artists: &[RawArtist]) -> Option<String> {
    let mut names: Vec<&str> = artists
        .iter()
        .filter_map(|a| a.name.as_deref())
        .filter(|n| !n.trim().is_empty())
        .collect();

    if names.is_empty() {
        return None;
    }

    names.sort_unstable();
    Some(names.join(ARTIST_SEPARATOR))
}

/// Largest image by height; images without a height rank below any sized one
fn pick_cover(images: &[RawImage]) -> Option<String> {
    images
        .iter()
        .filter(|img| img.url.as_deref().is_some_and(|u| !u.is_empty()))
        .enumerate()
        // On equal heights the earlier variant wins, hence the reversed index.
        .max_by_key(|(i, img)| (img.height, std::cmp::Reverse(*i)))
        .and_then(|(_, img)| img.url.clone())
}

/// Accepts a JSON number or a numeric string; empty strings and negatives become `None`
fn parse_duration(value: &Value) -> Option<i64> {
    let ms = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            s.parse::<i64>().ok()
        }
        _ => None,
    }?;

    if ms < 0 {
        None
    } else {
        Some(ms)
    }
}
