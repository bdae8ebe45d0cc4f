//! Presence labels derived from per-frame ground-truth object counts.
//!
//! A frame is positive when its object-count field is populated (`>= 0`), and each
//! positive is then dilated onto the immediately adjacent frames. Dilation reads
//! only the base labels, so it never cascades.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LabelError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid ground truth at {path} line {line}: {source}")]
    InvalidRecord {
        path: PathBuf,
        line: usize,
        source: serde_json::Error,
    },
    #[error("ground truth is empty")]
    Empty,
}

/// Largest supported dilation radius.
pub const MAX_DILATION: usize = 1;

/// One annotated frame from the ground-truth JSONL.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GroundTruthRecord {
    pub video_id: String,
    pub frame: u32,
    /// Object count; `null`, absent or negative means "no annotation".
    #[serde(default, alias = "object_count")]
    pub fish_number: Option<f64>,
}

/// Base presence label: 1 iff the object-count field is populated.
pub fn base_label(count: Option<f64>) -> u8 {
    match count {
        Some(value) if value.is_finite() && value >= 0.0 => 1,
        _ => 0,
    }
}

/// Spread each positive in `base` onto `radius` frames on either side.
pub fn dilate_labels(base: &[u8], radius: usize) -> Vec<u8> {
    let mut out = base.to_vec();
    for (idx, _) in base.iter().enumerate().filter(|(_, label)| **label == 1) {
        let start = idx.saturating_sub(radius);
        let end = idx.saturating_add(radius).min(base.len().saturating_sub(1));
        out[start..=end].fill(1);
    }
    out
}

/// Ground-truth base labels indexed by video and frame.
#[derive(Debug, Clone, Default)]
pub struct GroundTruth {
    videos: BTreeMap<String, BTreeMap<u32, u8>>,
}

impl GroundTruth {
    pub fn from_records(records: impl IntoIterator<Item = GroundTruthRecord>) -> Self {
        let mut videos: BTreeMap<String, BTreeMap<u32, u8>> = BTreeMap::new();
        for record in records {
            let label = base_label(record.fish_number);
            let frames = videos.entry(record.video_id).or_default();
            let slot = frames.entry(record.frame).or_insert(0);
            *slot = (*slot).max(label);
        }
        Self { videos }
    }

    /// Distinct annotated video ids, sorted.
    pub fn video_ids(&self) -> Vec<String> {
        self.videos.keys().cloned().collect()
    }

    pub fn contains_video(&self, video_id: &str) -> bool {
        self.videos.contains_key(video_id)
    }

    /// Base labels for frames `0..frames`; unannotated frames are 0.
    ///
    /// Also returns the number of annotations at or past `frames`.
    pub fn base_labels(&self, video_id: &str, frames: usize) -> (Vec<u8>, usize) {
        let mut labels = vec![0u8; frames];
        let mut out_of_range = 0usize;
        if let Some(annotated) = self.videos.get(video_id) {
            for (&frame, &label) in annotated {
                match labels.get_mut(frame as usize) {
                    Some(slot) => *slot = label,
                    None => out_of_range += 1,
                }
            }
        }
        (labels, out_of_range)
    }

    /// Dilated training targets for frames `0..frames` of a video.
    pub fn video_labels(&self, video_id: &str, frames: usize, radius: usize) -> (Vec<u8>, usize) {
        let (base, out_of_range) = self.base_labels(video_id, frames);
        (dilate_labels(&base, radius), out_of_range)
    }
}

/// Content hash of a ground-truth file, used to key cached training tables.
pub fn ground_truth_digest(path: &Path) -> Result<String, LabelError> {
    let bytes = std::fs::read(path).map_err(|source| LabelError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

/// Load ground truth from a JSONL file of [`GroundTruthRecord`]s.
pub fn load_ground_truth(path: &Path) -> Result<GroundTruth, LabelError> {
    let file = File::open(path).map_err(|source| LabelError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut records = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|source| LabelError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let record: GroundTruthRecord =
            serde_json::from_str(&line).map_err(|source| LabelError::InvalidRecord {
                path: path.to_path_buf(),
                line: idx + 1,
                source,
            })?;
        records.push(record);
    }
    if records.is_empty() {
        return Err(LabelError::Empty);
    }
    let distinct = records
        .iter()
        .map(|record| record.video_id.as_str())
        .collect::<BTreeSet<_>>()
        .len();
    tracing::info!(
        "Loaded {} ground-truth records across {distinct} videos",
        records.len()
    );
    Ok(GroundTruth::from_records(records))
}
