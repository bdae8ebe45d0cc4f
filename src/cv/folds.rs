//! Video-grouped fold assignment.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::CvError;

/// Fold count and assignment seed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FoldOptions {
    pub count: usize,
    pub seed: u64,
}

impl Default for FoldOptions {
    fn default() -> Self {
        Self { count: 5, seed: 42 }
    }
}

/// Frozen mapping from video id to fold index `0..count`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoldAssignment {
    count: usize,
    seed: u64,
    folds: BTreeMap<String, usize>,
}

impl FoldAssignment {
    /// Assign distinct video ids to `options.count` folds of near-equal size.
    ///
    /// Videos are ordered by a seeded hash of their id and dealt round-robin, so
    /// the result depends only on the id set and the seed, never on input order.
    pub fn assign<'a>(
        video_ids: impl IntoIterator<Item = &'a str>,
        options: &FoldOptions,
    ) -> Result<Self, CvError> {
        if options.count < 2 {
            return Err(CvError::InvalidFoldCount(options.count));
        }
        let distinct: BTreeSet<&str> = video_ids.into_iter().collect();
        if distinct.len() < options.count {
            return Err(CvError::NotEnoughGroups {
                groups: distinct.len(),
                folds: options.count,
            });
        }
        let mut keyed: Vec<(u128, &str)> = distinct
            .into_iter()
            .map(|video| (fold_key(options.seed, video), video))
            .collect();
        keyed.sort();
        let folds = keyed
            .into_iter()
            .enumerate()
            .map(|(idx, (_, video))| (video.to_string(), idx % options.count))
            .collect();
        Ok(Self {
            count: options.count,
            seed: options.seed,
            folds,
        })
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn len(&self) -> usize {
        self.folds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.folds.is_empty()
    }

    pub fn fold_of(&self, video_id: &str) -> Option<usize> {
        self.folds.get(video_id).copied()
    }

    /// Videos held out by `fold`, sorted.
    pub fn held_out(&self, fold: usize) -> Vec<&str> {
        self.folds
            .iter()
            .filter(|(_, f)| **f == fold)
            .map(|(video, _)| video.as_str())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.folds.iter().map(|(video, fold)| (video.as_str(), *fold))
    }

    /// Check that a deserialized assignment is internally consistent.
    pub fn validate(&self) -> Result<(), CvError> {
        if self.count < 2 {
            return Err(CvError::InvalidFoldCount(self.count));
        }
        if let Some((video, fold)) = self.folds.iter().find(|(_, fold)| **fold >= self.count) {
            return Err(CvError::InvalidAssignment(format!(
                "video {video} is in fold {fold} of {}",
                self.count
            )));
        }
        if let Some(empty) = (0..self.count).find(|fold| self.held_out(*fold).is_empty()) {
            return Err(CvError::InvalidAssignment(format!("fold {empty} is empty")));
        }
        Ok(())
    }
}

fn fold_key(seed: u64, video_id: &str) -> u128 {
    let hash = blake3::hash(format!("{seed}|{video_id}").as_bytes());
    let mut key = [0u8; 16];
    key.copy_from_slice(&hash.as_bytes()[..16]);
    u128::from_le_bytes(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn videos(n: usize) -> Vec<String> {
        (0..n).map(|idx| format!("video_{idx:03}")).collect()
    }

    #[test]
    fn every_video_lands_in_exactly_one_fold() {
        let ids = videos(23);
        let assignment =
            FoldAssignment::assign(ids.iter().map(String::as_str), &FoldOptions::default())
                .unwrap();
        let mut seen = BTreeSet::new();
        for fold in 0..assignment.count() {
            let held = assignment.held_out(fold);
            assert!(held.len() == 4 || held.len() == 5, "fold {fold}: {}", held.len());
            for video in held {
                assert!(seen.insert(video.to_string()), "{video} held out twice");
            }
        }
        assert_eq!(seen, ids.into_iter().collect::<BTreeSet<_>>());
        assignment.validate().unwrap();
    }

    #[test]
    fn assignment_ignores_input_order_and_duplicates() {
        let ids = videos(10);
        let options = FoldOptions { count: 3, seed: 7 };
        let forward = FoldAssignment::assign(ids.iter().map(String::as_str), &options).unwrap();
        let mut reversed: Vec<&str> = ids.iter().rev().map(String::as_str).collect();
        reversed.extend(ids.iter().map(String::as_str));
        let backward = FoldAssignment::assign(reversed, &options).unwrap();
        assert_eq!(forward, backward);
    }

    #[test]
    fn seed_changes_assignment() {
        let ids = videos(40);
        let a = FoldAssignment::assign(ids.iter().map(String::as_str), &FoldOptions::default())
            .unwrap();
        let b = FoldAssignment::assign(
            ids.iter().map(String::as_str),
            &FoldOptions { count: 5, seed: 43 },
        )
        .unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn too_few_videos_is_fatal() {
        let ids = videos(3);
        let err = FoldAssignment::assign(ids.iter().map(String::as_str), &FoldOptions::default())
            .unwrap_err();
        assert!(matches!(
            err,
            CvError::NotEnoughGroups {
                groups: 3,
                folds: 5
            }
        ));
        let err = FoldAssignment::assign(
            ids.iter().map(String::as_str),
            &FoldOptions { count: 1, seed: 0 },
        )
        .unwrap_err();
        assert!(matches!(err, CvError::InvalidFoldCount(1)));
    }
}
