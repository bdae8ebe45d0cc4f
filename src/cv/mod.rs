//! Video-grouped cross-validation: fold assignment, per-fold training with
//! out-of-fold predictions, the fold-model set and its ensemble predictor.

pub mod ensemble;
pub mod folds;
pub mod model_set;
pub mod trainer;

use std::path::PathBuf;

use thiserror::Error;

use crate::features::FeatureError;

pub use ensemble::{average_probabilities, predict_ensemble};
pub use folds::{FoldAssignment, FoldOptions};
pub use model_set::{MODEL_SET_VERSION, ModelSet};
pub use trainer::{
    CvOutcome, FoldReport, OofReport, predict_out_of_fold, train_group_kfold,
    train_with_assignment,
};

#[derive(Debug, Error)]
pub enum CvError {
    #[error("fold count must be at least 2, got {0}")]
    InvalidFoldCount(usize),
    #[error("{groups} distinct videos cannot fill {folds} folds")]
    NotEnoughGroups { groups: usize, folds: usize },
    #[error("invalid fold assignment: {0}")]
    InvalidAssignment(String),
    #[error("feature table has no target column")]
    MissingTargets,
    #[error("video {0} has no fold assignment")]
    UnassignedVideo(String),
    #[error("fold {0} holds out no rows")]
    EmptyFold(usize),
    #[error("fold {fold} training failed: {message}")]
    Trainer { fold: usize, message: String },
    #[error("model set holds {found} models for {expected} folds")]
    ModelCount { expected: usize, found: usize },
    #[error(transparent)]
    Feature(#[from] FeatureError),
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
