//! Crowd verification votes for staged images.
//!
//! Counters only grow until promotion clears them. Promotion works in two
//! phases: it snapshots the decided ids with [`VerificationTally::decisions`]
//! and calls [`VerificationTally::clear`] only after its pushes succeeded, so
//! a failed run leaves every vote in place for the next attempt.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{MediaError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Valid,
    Invalid,
    Duplicate,
}

impl FromStr for Decision {
    type Err = MediaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "valid" => Ok(Decision::Valid),
            "invalid" => Ok(Decision::Invalid),
            "duplicate" => Ok(Decision::Duplicate),
            other => Err(MediaError::InvalidUpload(format!(
                "unknown confirmation {other:?}"
            ))),
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Decision::Valid => "valid",
            Decision::Invalid => "invalid",
            Decision::Duplicate => "duplicate",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default)]
pub struct TallyEntry {
    pub valid: u32,
    pub invalid: u32,
    pub duplicate: u32,
    pub voters: HashSet<String>,
}

impl TallyEntry {
    fn stats(&self) -> TallyStats {
        TallyStats {
            valid: self.valid,
            invalid: self.invalid,
            duplicate: self.duplicate,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyStats {
    pub valid: u32,
    pub invalid: u32,
    pub duplicate: u32,
}

/// Ids whose votes crossed the threshold.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TallyDecisions {
    /// `invalid >= threshold` or `duplicate >= threshold`
    pub rejected: BTreeSet<String>,
    /// `valid >= threshold` and not rejected
    pub accepted: BTreeSet<String>,
}

impl TallyDecisions {
    pub fn is_empty(&self) -> bool {
        self.rejected.is_empty() && self.accepted.is_empty()
    }

    pub fn all(&self) -> impl Iterator<Item = &String> {
        self.rejected.iter().chain(self.accepted.iter())
    }
}

#[derive(Default)]
pub struct VerificationTally {
    entries: DashMap<String, TallyEntry>,
}

impl VerificationTally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one vote. A repeat vote by the same submitter fails with
    /// [`MediaError::AlreadyVoted`] and leaves the counters untouched.
    pub fn vote(&self, image_id: &str, submitter: &str, decision: Decision) -> Result<TallyStats> {
        let mut entry = self.entries.entry(image_id.to_string()).or_default();
        if !entry.voters.insert(submitter.to_string()) {
            return Err(MediaError::AlreadyVoted {
                image_id: image_id.to_string(),
                submitter: submitter.to_string(),
            });
        }

        match decision {
            Decision::Valid => entry.valid += 1,
            Decision::Invalid => entry.invalid += 1,
            Decision::Duplicate => entry.duplicate += 1,
        }

        debug!(image_id, submitter, decision = %decision, "Vote recorded");
        Ok(entry.stats())
    }

    pub fn stats(&self, image_id: &str) -> TallyStats {
        self.entries
            .get(image_id)
            .map(|e| e.stats())
            .unwrap_or_default()
    }

    pub fn has_voted(&self, image_id: &str, submitter: &str) -> bool {
        self.entries
            .get(image_id)
            .map(|e| e.voters.contains(submitter))
            .unwrap_or(false)
    }

    /// Ids `submitter` has voted on.
    pub fn seen_by(&self, submitter: &str) -> HashSet<String> {
        self.entries
            .iter()
            .filter(|e| e.voters.contains(submitter))
            .map(|e| e.key().clone())
            .collect()
    }

    /// Snapshot the ids that crossed `threshold`. Nothing is cleared.
    pub fn decisions(&self, threshold: u32) -> TallyDecisions {
        let mut decisions = TallyDecisions::default();
        for entry in self.entries.iter() {
            if entry.invalid >= threshold || entry.duplicate >= threshold {
                decisions.rejected.insert(entry.key().clone());
            } else if entry.valid >= threshold {
                decisions.accepted.insert(entry.key().clone());
            }
        }
        decisions
    }

    /// Drop the tallies of the given ids.
    pub fn clear<'a>(&self, ids: impl IntoIterator<Item = &'a String>) {
        let mut cleared = 0;
        for id in ids {
            if self.entries.remove(id).is_some() {
                cleared += 1;
            }
        }
        if cleared > 0 {
            info!(cleared, "Tallies cleared");
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeat_vote_rejected_without_change() {
        let tally = VerificationTally::new();
        tally.vote("img", "alice", Decision::Valid).unwrap();

        let err = tally.vote("img", "alice", Decision::Invalid).unwrap_err();
        assert!(matches!(err, MediaError::AlreadyVoted { .. }));
        assert_eq!(
            tally.stats("img"),
            TallyStats {
                valid: 1,
                invalid: 0,
                duplicate: 0
            }
        );
        assert!(tally.has_voted("img", "alice"));
        assert!(!tally.has_voted("img", "bob"));
    }

    #[test]
    fn test_rejection_wins_over_acceptance() {
        let tally = VerificationTally::new();
        for voter in ["a", "b", "c"] {
            tally.vote("both", voter, Decision::Valid).unwrap();
            tally.vote("good", voter, Decision::Valid).unwrap();
        }
        for voter in ["d", "e", "f"] {
            tally.vote("both", voter, Decision::Duplicate).unwrap();
        }
        tally.vote("pending", "a", Decision::Invalid).unwrap();

        let decisions = tally.decisions(3);
        assert!(decisions.rejected.contains("both"));
        assert!(!decisions.accepted.contains("both"));
        assert!(decisions.accepted.contains("good"));
        assert!(!decisions.rejected.contains("pending"));
    }

    #[test]
    fn test_decisions_survive_until_cleared() {
        let tally = VerificationTally::new();
        for voter in ["a", "b", "c"] {
            tally.vote("img", voter, Decision::Valid).unwrap();
        }

        let first = tally.decisions(3);
        assert_eq!(tally.decisions(3), first);

        tally.clear(first.all());
        assert!(tally.decisions(3).is_empty());
        assert_eq!(tally.stats("img"), TallyStats::default());
    }

    #[test]
    fn test_seen_by_and_parse() {
        let tally = VerificationTally::new();
        tally.vote("x", "alice", "VALID".parse().unwrap()).unwrap();
        tally.vote("y", "bob", Decision::Invalid).unwrap();
        assert_eq!(tally.seen_by("alice"), HashSet::from(["x".to_string()]));
        assert!("maybe".parse::<Decision>().is_err());
    }
}
