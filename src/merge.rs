//! Deduplicating incremental merger
//!
//! Canonical history holds exactly one [`CanonicalPlay`] per `played_at`.
//! When candidates collide on that key, the one collected most recently
//! wins; equal collection instants fall back to the record's total order
//! so the result never depends on batch order.
//!
//! Replaying the raw log is the exception: a re-normalized record collected
//! at the same instant as the stored one replaces it outright.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

use crate::model::CanonicalPlay;

/// Canonical play history indexed by `played_at`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayHistory {
    plays: BTreeMap<DateTime<Utc>, CanonicalPlay>,
}

/// What happened to one key during a merge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeAction {
    Inserted,
    Replaced,
    Unchanged,
}

/// Counts for a merge plus the rows that must be written back
#[derive(Debug, Default)]
pub struct MergeOutcome {
    pub inserted: usize,
    pub replaced: usize,
    pub unchanged: usize,
    /// Final state of every key that was inserted or replaced, by `played_at`
    pub changed: Vec<CanonicalPlay>,
}

impl MergeOutcome {
    pub fn is_noop(&self) -> bool {
        self.changed.is_empty()
    }
}

/// Whether `candidate` should replace `existing` under the same key
pub fn supersedes(candidate: &CanonicalPlay, existing: &CanonicalPlay) -> bool {
    (candidate.ingested_at, candidate) > (existing.ingested_at, existing)
}

/// Replay rule: anything collected no earlier than the stored row replaces it
pub fn replays_over(candidate: &CanonicalPlay, existing: &CanonicalPlay) -> bool {
    candidate.ingested_at >= existing.ingested_at && candidate != existing
}

impl PlayHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a history from already-canonical rows; later duplicates are merged
    pub fn from_plays(plays: impl IntoIterator<Item = CanonicalPlay>) -> Self {
        let mut history = Self::new();
        for play in plays {
            history.merge_one(play);
        }
        history
    }

    pub fn len(&self) -> usize {
        self.plays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plays.is_empty()
    }

    pub fn get(&self, played_at: &DateTime<Utc>) -> Option<&CanonicalPlay> {
        self.plays.get(played_at)
    }

    /// All plays, oldest first
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &CanonicalPlay> + '_ {
        self.plays.values()
    }

    /// Plays with `lower <= played_at < upper`; `None` leaves a side open
    pub fn range(
        &self,
        lower: Option<DateTime<Utc>>,
        upper: Option<DateTime<Utc>>,
    ) -> impl DoubleEndedIterator<Item = &CanonicalPlay> + '_ {
        let lower = lower.map_or(Bound::Unbounded, Bound::Included);
        let upper = upper.map_or(Bound::Unbounded, Bound::Excluded);
        self.plays.range((lower, upper)).map(|(_, p)| p)
    }

    pub fn latest_played_at(&self) -> Option<DateTime<Utc>> {
        self.plays.keys().next_back().copied()
    }

    pub fn earliest_played_at(&self) -> Option<DateTime<Utc>> {
        self.plays.keys().next().copied()
    }

    /// Newest `ingested_at` across history, the incremental ingest watermark
    pub fn latest_ingested_at(&self) -> Option<DateTime<Utc>> {
        self.plays.values().map(|p| p.ingested_at).max()
    }

    /// Merge one candidate, reporting what happened to its key
    pub fn merge_one(&mut self, candidate: CanonicalPlay) -> MergeAction {
        self.merge_one_by(candidate, supersedes)
    }

    fn merge_one_by(
        &mut self,
        candidate: CanonicalPlay,
        replaces: fn(&CanonicalPlay, &CanonicalPlay) -> bool,
    ) -> MergeAction {
        match self.plays.get_mut(&candidate.played_at) {
            None => {
                self.plays.insert(candidate.played_at, candidate);
                MergeAction::Inserted
            }
            Some(existing) if replaces(&candidate, existing) => {
                *existing = candidate;
                MergeAction::Replaced
            }
            Some(_) => MergeAction::Unchanged,
        }
    }

    /// Merge a batch of candidates.
    ///
    /// Counts are per key: a key first inserted and then replaced within
    /// the same batch counts as one insert.
    pub fn merge(&mut self, candidates: impl IntoIterator<Item = CanonicalPlay>) -> MergeOutcome {
        self.merge_by(candidates, supersedes)
    }

    /// Merge candidates re-normalized from the raw log.
    ///
    /// Candidates are resolved among themselves with the usual rule first;
    /// each winner then replaces the stored row unless that row was
    /// collected later.
    pub fn merge_replayed(
        &mut self,
        candidates: impl IntoIterator<Item = CanonicalPlay>,
    ) -> MergeOutcome {
        let resolved = PlayHistory::from_plays(candidates);
        self.merge_by(resolved.plays.into_values(), replays_over)
    }

    fn merge_by(
        &mut self,
        candidates: impl IntoIterator<Item = CanonicalPlay>,
        replaces: fn(&CanonicalPlay, &CanonicalPlay) -> bool,
    ) -> MergeOutcome {
        let mut inserted = BTreeSet::new();
        let mut replaced = BTreeSet::new();
        let mut seen = BTreeSet::new();

        for candidate in candidates {
            let key = candidate.played_at;
            seen.insert(key);
            match self.merge_one_by(candidate, replaces) {
                MergeAction::Inserted => {
                    inserted.insert(key);
                }
                MergeAction::Replaced => {
                    if !inserted.contains(&key) {
                        replaced.insert(key);
                    }
                }
                MergeAction::Unchanged => {}
            }
        }

        let changed = inserted
            .union(&replaced)
            .filter_map(|k| self.plays.get(k).cloned())
            .collect();

        MergeOutcome {
            inserted: inserted.len(),
            replaced: replaced.len(),
            unchanged: seen.len() - inserted.len() - replaced.len(),
            changed,
        }
    }
}
