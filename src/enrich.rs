//! Artist metadata enrichment
//!
//! Left join of ranked subjects against artist reference data. Matching is
//! exact, case-sensitive equality on the trimmed artist name; a miss leaves
//! the enrichment fields empty and is never an error.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};

use crate::merge::PlayHistory;
use crate::model::ArtistMetadata;

/// Artist metadata keyed by trimmed name, one row per key
#[derive(Debug, Clone, Default)]
pub struct ArtistIndex {
    by_name: HashMap<String, ArtistMetadata>,
}

impl ArtistIndex {
    /// When several rows trim to the same name, the one whose stored name
    /// sorts first is kept.
    pub fn new(rows: impl IntoIterator<Item = ArtistMetadata>) -> Self {
        let mut by_name: HashMap<String, ArtistMetadata> = HashMap::new();

        for row in rows {
            let key = row.name.trim().to_string();
            match by_name.get(&key) {
                Some(existing) if existing.name <= row.name => {}
                _ => {
                    by_name.insert(key, row);
                }
            }
        }

        Self { by_name }
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    pub fn lookup(&self, artist_name: &str) -> Option<&ArtistMetadata> {
        self.by_name.get(artist_name.trim())
    }

    /// First listed genre of an artist, if the artist has any
    pub fn first_genre(&self, artist_name: &str) -> Option<&str> {
        self.lookup(artist_name).and_then(|m| m.first_genre())
    }
}

/// Enrichment columns carried on published rows
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Enrichment {
    pub artist_image_url: Option<String>,
    pub artist_spotify_url: Option<String>,
    pub artist_genres: Vec<String>,
    pub artist_popularity: Option<i64>,
}

impl Enrichment {
    pub fn for_artist(index: &ArtistIndex, artist_name: Option<&str>) -> Self {
        match artist_name.and_then(|name| index.lookup(name)) {
            Some(meta) => Self {
                artist_image_url: meta.image_url.clone(),
                artist_spotify_url: meta.spotify_url.clone(),
                artist_genres: meta.genres.clone().unwrap_or_default(),
                artist_popularity: meta.popularity,
            },
            None => Self::default(),
        }
    }
}

/// A first-credited artist that still needs metadata from the enrichment process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingArtist {
    pub name: String,
    pub first_seen_at: DateTime<Utc>,
    pub play_count: u64,
    /// `true` when a row exists but some of its fields are empty
    pub has_row: bool,
}

/// Artists seen in history with no metadata row or an incomplete one,
/// most recently first seen first.
pub fn missing_metadata(history: &PlayHistory, index: &ArtistIndex) -> Vec<MissingArtist> {
    let mut seen: BTreeMap<&str, (DateTime<Utc>, u64)> = BTreeMap::new();

    for play in history.iter() {
        if let Some(artist) = play.first_artist() {
            let entry = seen.entry(artist).or_insert((play.played_at, 0));
            entry.0 = entry.0.min(play.played_at);
            entry.1 += 1;
        }
    }

    let mut missing: Vec<MissingArtist> = seen
        .into_iter()
        .filter_map(|(name, (first_seen_at, play_count))| {
            let row = index.lookup(name);
            if row.is_some_and(|r| !r.is_incomplete()) {
                return None;
            }
            Some(MissingArtist {
                name: name.to_string(),
                first_seen_at,
                play_count,
                has_row: row.is_some(),
            })
        })
        .collect();

    missing.sort_by(|a, b| {
        b.first_seen_at
            .cmp(&a.first_seen_at)
            .then_with(|| a.name.cmp(&b.name))
    });
    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::{artist, play};

    #[test]
    fn test_lookup_trims_but_respects_case() {
        let index = ArtistIndex::new(vec![artist("  Ann ", &["pop"])]);
        assert!(index.lookup("Ann").is_some());
        assert!(index.lookup(" Ann").is_some());
        assert!(index.lookup("ann").is_none());
    }

    #[test]
    fn test_duplicate_rows_pick_one_deterministically() {
        let a = artist("Ann", &["pop"]);
        let b = artist("Ann ", &["rock"]);
        let forward = ArtistIndex::new(vec![a.clone(), b.clone()]);
        let backward = ArtistIndex::new(vec![b, a]);
        assert_eq!(forward.len(), 1);
        assert_eq!(forward.first_genre("Ann"), Some("pop"));
        assert_eq!(backward.first_genre("Ann"), Some("pop"));
    }

    #[test]
    fn test_first_genre_empty_list() {
        let index = ArtistIndex::new(vec![artist("Ann", &[])]);
        assert_eq!(index.first_genre("Ann"), None);
    }

    #[test]
    fn test_enrichment_miss_is_empty() {
        let index = ArtistIndex::default();
        assert_eq!(Enrichment::for_artist(&index, Some("Ann")), Enrichment::default());
        assert_eq!(Enrichment::for_artist(&index, None), Enrichment::default());
    }

    #[test]
    fn test_missing_metadata() {
        let history = PlayHistory::from_plays(vec![
            play("2024-01-01T00:00:00Z", "a", "Ann", 1),
            play("2024-01-02T00:00:00Z", "b", "Bea, Ann", 1),
            play("2024-01-03T00:00:00Z", "c", "Cy", 1),
            play("2024-01-04T00:00:00Z", "d", "Cy", 1),
        ]);
        let mut incomplete = artist("Cy", &["jazz"]);
        incomplete.popularity = None;
        let index = ArtistIndex::new(vec![artist("Ann", &["pop"]), incomplete]);

        let missing = missing_metadata(&history, &index);
        let names: Vec<_> = missing.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["Cy", "Bea"]);
        assert!(missing[0].has_row);
        assert_eq!(missing[0].play_count, 2);
        assert!(!missing[1].has_row);
    }
}
