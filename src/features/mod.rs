//! Temporal window features built from upstream per-frame classifier scores.
//!
//! Each Score Source supplies a `frames x channels` matrix per video. The window
//! builder turns those matrices into one fixed-width row per frame: the frame's own
//! score vector from every source, plus the designated "no-object" channel over a
//! window of neighboring frames. Neighbors outside the video map to
//! [`MISSING_SENTINEL`].

mod cache;
mod set;
mod source;
mod table;
mod window;

use std::path::PathBuf;

use thiserror::Error;

pub use cache::{cached_inputs, load_table, save_table, table_exists};
pub use set::{FeatureSet, MISSING_SENTINEL, SourceSpec, WindowSpec};
pub use source::{F32leScoreDir, InMemoryScores, ScoreMatrix, ScoreSource};
pub use table::{FeatureTable, FrameKey};
pub use window::{AssemblyReport, VideoRows, assemble_table, build_video_rows, fill_frame_row};

/// Errors raised while loading scores or assembling feature tables.
#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no score sources configured")]
    NoSources,
    #[error("duplicate score source name: {0}")]
    DuplicateSource(String),
    #[error("source {source_name}: no-object channel {channel} out of range for {channels} channels")]
    InvalidNoObjectChannel {
        source_name: String,
        channel: usize,
        channels: usize,
    },
    #[error("source {source_name}: expected {expected} channel names, found {found}")]
    ChannelNameCount {
        source_name: String,
        expected: usize,
        found: usize,
    },
    #[error("score matrix has {len} values, not a multiple of {channels} channels")]
    MatrixShape { len: usize, channels: usize },
    #[error("video {video_id}: source {source_name} has {found} channels (expected {expected})")]
    ChannelCountMismatch {
        video_id: String,
        source_name: String,
        expected: usize,
        found: usize,
    },
    #[error("video {video_id}: source {source_name} has {found} frames (declared length {expected})")]
    FrameCountMismatch {
        video_id: String,
        source_name: String,
        expected: usize,
        found: usize,
    },
    #[error("video {video_id}: no scores from source {source_name}")]
    MissingScores {
        video_id: String,
        source_name: String,
    },
    #[error("expected {expected} score sources, got {found}")]
    SourceCountMismatch { expected: usize, found: usize },
    #[error("row has {found} values but the table is {expected} columns wide")]
    RowWidth { expected: usize, found: usize },
    #[error("labeled and unlabeled rows cannot be mixed in one table")]
    TargetMismatch,
    #[error("feature columns differ: {detail}")]
    ColumnMismatch { detail: String },
    #[error("invalid table cache: {0}")]
    InvalidCache(String),
}

impl FeatureError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Compare two ordered column lists, describing the first difference.
pub fn check_columns(expected: &[String], found: &[String]) -> Result<(), FeatureError> {
    if expected == found {
        return Ok(());
    }
    if expected.len() != found.len() {
        return Err(FeatureError::ColumnMismatch {
            detail: format!("expected {} columns, found {}", expected.len(), found.len()),
        });
    }
    let (idx, (want, got)) = expected
        .iter()
        .zip(found.iter())
        .enumerate()
        .find(|(_, (want, got))| want != got)
        .unwrap_or((0, (&expected[0], &found[0])));
    Err(FeatureError::ColumnMismatch {
        detail: format!("column {idx} is `{got}` (expected `{want}`)"),
    })
}
