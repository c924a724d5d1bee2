//! Near-duplicate detection over perceptual hashes.
//!
//! Matches are advisory: they are shown to uploaders and verifiers but never
//! block a submission on their own.

use serde::Serialize;

use crate::config::DEFAULT_DUPLICATE_DISTANCE;
use crate::fingerprint::PerceptualHash;
use crate::index::ContentIndex;

/// One manifest entry close to the candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateMatch {
    pub path: String,
    pub distance: u32,
}

/// A set of manifest paths that are pairwise within the distance threshold
/// of the group's first member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    pub anchor: String,
    pub members: Vec<DuplicateMatch>,
}

#[derive(Debug, Clone, Copy)]
pub struct DuplicateDetector {
    distance: u32,
}

impl Default for DuplicateDetector {
    fn default() -> Self {
        Self::new(DEFAULT_DUPLICATE_DISTANCE)
    }
}

impl DuplicateDetector {
    pub fn new(distance: u32) -> Self {
        Self { distance }
    }

    pub fn distance(&self) -> u32 {
        self.distance
    }

    /// Every index entry within the threshold, closest first, ties by path.
    pub fn find_duplicates(
        &self,
        candidate: &PerceptualHash,
        index: &ContentIndex,
    ) -> Vec<DuplicateMatch> {
        let mut matches: Vec<DuplicateMatch> = index
            .perceptual_entries()
            .filter_map(|(path, hash)| {
                let distance = candidate.distance(hash);
                (distance <= self.distance).then(|| DuplicateMatch {
                    path: path.to_string(),
                    distance,
                })
            })
            .collect();

        matches.sort_by(|a, b| a.distance.cmp(&b.distance).then_with(|| a.path.cmp(&b.path)));
        matches
    }

    /// Group near-duplicates across a whole hash manifest.
    ///
    /// Entries are visited in path order; each unvisited entry anchors a group
    /// of the later entries within the threshold. Singletons are omitted.
    pub fn find_duplicate_groups(&self, entries: &[(String, PerceptualHash)]) -> Vec<DuplicateGroup> {
        let mut sorted: Vec<&(String, PerceptualHash)> = entries.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));

        let mut grouped = vec![false; sorted.len()];
        let mut groups = Vec::new();

        for i in 0..sorted.len() {
            if grouped[i] {
                continue;
            }
            let (anchor, anchor_hash) = sorted[i];
            let mut members = Vec::new();

            for j in (i + 1)..sorted.len() {
                if grouped[j] {
                    continue;
                }
                let (path, hash) = sorted[j];
                let distance = anchor_hash.distance(hash);
                if distance <= self.distance {
                    grouped[j] = true;
                    members.push(DuplicateMatch {
                        path: path.clone(),
                        distance,
                    });
                }
            }

            if !members.is_empty() {
                grouped[i] = true;
                groups.push(DuplicateGroup {
                    anchor: anchor.clone(),
                    members,
                });
            }
        }
        groups
    }
}
