//! Persisted `(video_id, frame, prediction)` tables.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::features::FeatureTable;

#[derive(Debug, Error)]
pub enum PredictionError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid prediction at {path} line {line}: {source}")]
    InvalidRecord {
        path: PathBuf,
        line: usize,
        source: serde_json::Error,
    },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("{predictions} predictions for {rows} rows")]
    LengthMismatch { rows: usize, predictions: usize },
    #[error("prediction {value} for {video_id}#{frame} is outside [0, 1]")]
    OutOfRange {
        video_id: String,
        frame: u32,
        value: f32,
    },
}

/// Presence probability for one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FramePrediction {
    pub video_id: String,
    pub frame: u32,
    pub prediction: f32,
}

/// Pair each table row with its prediction, rejecting values outside `[0, 1]`.
pub fn from_table(
    table: &FeatureTable,
    predictions: &[f32],
) -> Result<Vec<FramePrediction>, PredictionError> {
    if table.len() != predictions.len() {
        return Err(PredictionError::LengthMismatch {
            rows: table.len(),
            predictions: predictions.len(),
        });
    }
    table
        .keys()
        .iter()
        .zip(predictions)
        .map(|(key, &prediction)| {
            if !(0.0..=1.0).contains(&prediction) {
                return Err(PredictionError::OutOfRange {
                    video_id: key.video_id.clone(),
                    frame: key.frame,
                    value: prediction,
                });
            }
            Ok(FramePrediction {
                video_id: key.video_id.clone(),
                frame: key.frame,
                prediction,
            })
        })
        .collect()
}

pub fn write_predictions(path: &Path, rows: &[FramePrediction]) -> Result<(), PredictionError> {
    let io_err = |source| PredictionError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let mut writer = BufWriter::new(File::create(path).map_err(io_err)?);
    for row in rows {
        serde_json::to_writer(&mut writer, row)?;
        writer.write_all(b"\n").map_err(io_err)?;
    }
    writer.flush().map_err(io_err)?;
    tracing::info!("Wrote {} predictions to {}", rows.len(), path.display());
    Ok(())
}

pub fn load_predictions(path: &Path) -> Result<Vec<FramePrediction>, PredictionError> {
    let io_err = |source| PredictionError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(io_err)?;
    let mut rows = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(io_err)?;
        if line.trim().is_empty() {
            continue;
        }
        let row = serde_json::from_str(&line).map_err(|source| PredictionError::InvalidRecord {
            path: path.to_path_buf(),
            line: idx + 1,
            source,
        })?;
        rows.push(row);
    }
    Ok(rows)
}
