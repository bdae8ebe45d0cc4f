use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use super::FeatureError;

const SCORE_FILE_EXTENSION: &str = "f32le";

/// Per-frame score matrix for one video from one upstream classifier.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreMatrix {
    channels: usize,
    /// Row-major `frames x channels`.
    values: Vec<f32>,
}

impl ScoreMatrix {
    pub fn new(channels: usize, values: Vec<f32>) -> Result<Self, FeatureError> {
        if channels == 0 || values.len() % channels != 0 {
            return Err(FeatureError::MatrixShape {
                len: values.len(),
                channels,
            });
        }
        Ok(Self { channels, values })
    }

    /// Build a matrix from per-frame rows; every row must have the same length.
    pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self, FeatureError> {
        let channels = rows.first().map(|row| row.len()).unwrap_or(0);
        let mut values = Vec::with_capacity(rows.len() * channels);
        for row in rows {
            if row.len() != channels {
                return Err(FeatureError::MatrixShape {
                    len: row.len(),
                    channels,
                });
            }
            values.extend_from_slice(row);
        }
        if rows.is_empty() {
            return Ok(Self {
                channels: 1,
                values,
            });
        }
        Self::new(channels, values)
    }

    pub fn frames(&self) -> usize {
        self.values.len() / self.channels
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Score vector for a frame, or `None` past the end of the video.
    pub fn row(&self, frame: usize) -> Option<&[f32]> {
        let start = frame.checked_mul(self.channels)?;
        self.values.get(start..start + self.channels)
    }

    /// Single channel value, bounds-checked on both axes.
    pub fn value(&self, frame: usize, channel: usize) -> Option<f32> {
        if channel >= self.channels {
            return None;
        }
        self.row(frame).map(|row| row[channel])
    }
}

/// Read-only access to one upstream classifier's persisted scores.
pub trait ScoreSource {
    /// Source name, matching the configured [`super::SourceSpec::name`].
    fn name(&self) -> &str;

    /// Load the score matrix for a video.
    fn scores(&self, video_id: &str) -> Result<ScoreMatrix, FeatureError>;
}

/// Score source backed by a directory of `<video_id>.f32le` files.
#[derive(Debug, Clone)]
pub struct F32leScoreDir {
    name: String,
    dir: PathBuf,
    channels: usize,
}

impl F32leScoreDir {
    pub fn new(name: impl Into<String>, dir: impl Into<PathBuf>, channels: usize) -> Self {
        Self {
            name: name.into(),
            dir: dir.into(),
            channels,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn score_path(&self, video_id: &str) -> PathBuf {
        self.dir.join(format!("{video_id}.{SCORE_FILE_EXTENSION}"))
    }

    /// Enumerate video ids with a score file, sorted.
    pub fn video_ids(&self) -> Result<Vec<String>, FeatureError> {
        let entries =
            std::fs::read_dir(&self.dir).map_err(|err| FeatureError::io(&self.dir, err))?;
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| FeatureError::io(&self.dir, err))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if path.extension().and_then(|ext| ext.to_str()) != Some(SCORE_FILE_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Size and modification time of a video's score file, or `missing`.
    pub fn file_stamp(&self, video_id: &str) -> Result<String, FeatureError> {
        let path = self.score_path(video_id);
        let metadata = match std::fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok("missing".to_string());
            }
            Err(err) => return Err(FeatureError::io(&path, err)),
        };
        let modified_ns = metadata
            .modified()
            .ok()
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |since| since.as_nanos());
        Ok(format!("{}:{modified_ns}", metadata.len()))
    }

    /// Persist a score matrix in the directory layout read by [`ScoreSource::scores`].
    pub fn write_scores(&self, video_id: &str, matrix: &ScoreMatrix) -> Result<(), FeatureError> {
        std::fs::create_dir_all(&self.dir).map_err(|err| FeatureError::io(&self.dir, err))?;
        let path = self.score_path(video_id);
        let bytes: Vec<u8> = matrix
            .values
            .iter()
            .flat_map(|value| value.to_le_bytes())
            .collect();
        std::fs::write(&path, bytes).map_err(|err| FeatureError::io(&path, err))
    }
}

impl ScoreSource for F32leScoreDir {
    fn name(&self) -> &str {
        &self.name
    }

    fn scores(&self, video_id: &str) -> Result<ScoreMatrix, FeatureError> {
        let path = self.score_path(video_id);
        if !path.is_file() {
            return Err(FeatureError::MissingScores {
                video_id: video_id.to_string(),
                source_name: self.name.clone(),
            });
        }
        let values = load_f32le(&path)?;
        ScoreMatrix::new(self.channels, values)
    }
}

/// Score source held in memory, keyed by video id.
#[derive(Debug, Clone, Default)]
pub struct InMemoryScores {
    name: String,
    videos: BTreeMap<String, ScoreMatrix>,
}

impl InMemoryScores {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            videos: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, video_id: impl Into<String>, matrix: ScoreMatrix) {
        self.videos.insert(video_id.into(), matrix);
    }

    pub fn video_ids(&self) -> Vec<String> {
        self.videos.keys().cloned().collect()
    }
}

impl ScoreSource for InMemoryScores {
    fn name(&self) -> &str {
        &self.name
    }

    fn scores(&self, video_id: &str) -> Result<ScoreMatrix, FeatureError> {
        self.videos
            .get(video_id)
            .cloned()
            .ok_or_else(|| FeatureError::MissingScores {
                video_id: video_id.to_string(),
                source_name: self.name.clone(),
            })
    }
}

pub(super) fn load_f32le(path: &Path) -> Result<Vec<f32>, FeatureError> {
    let mut bytes = Vec::new();
    File::open(path)
        .and_then(|mut file| file.read_to_end(&mut bytes))
        .map_err(|err| FeatureError::io(path, err))?;
    if bytes.len() % 4 != 0 {
        return Err(FeatureError::MatrixShape {
            len: bytes.len(),
            channels: 4,
        });
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn value_is_bounds_checked() {
        let matrix = ScoreMatrix::new(2, vec![0.1, 0.9, 0.2, 0.8]).unwrap();
        assert_eq!(matrix.frames(), 2);
        assert_eq!(matrix.value(1, 1), Some(0.8));
        assert_eq!(matrix.value(2, 0), None);
        assert_eq!(matrix.value(0, 2), None);
        assert_eq!(matrix.row(usize::MAX), None);
    }

    #[test]
    fn rejects_ragged_values() {
        assert!(matches!(
            ScoreMatrix::new(3, vec![0.0; 4]),
            Err(FeatureError::MatrixShape { len: 4, channels: 3 })
        ));
        assert!(ScoreMatrix::from_rows(&[vec![0.0, 1.0], vec![0.5]]).is_err());
    }

    #[test]
    fn f32le_dir_round_trips_and_lists_videos() {
        let dir = tempdir().unwrap();
        let source = F32leScoreDir::new("net", dir.path(), 2);
        let matrix = ScoreMatrix::new(2, vec![0.25, 0.75, 0.5, 0.5, 1.0, 0.0]).unwrap();
        source.write_scores("video_b", &matrix).unwrap();
        source.write_scores("video_a", &matrix).unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        assert_eq!(source.video_ids().unwrap(), vec!["video_a", "video_b"]);
        assert_eq!(source.scores("video_a").unwrap(), matrix);
    }

    #[test]
    fn missing_video_is_reported() {
        let dir = tempdir().unwrap();
        let source = F32leScoreDir::new("net", dir.path(), 2);
        assert!(matches!(
            source.scores("nope"),
            Err(FeatureError::MissingScores { .. })
        ));
    }

    #[test]
    fn truncated_file_is_rejected() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("v.f32le"), [0u8; 6]).unwrap();
        let source = F32leScoreDir::new("net", dir.path(), 2);
        assert!(matches!(
            source.scores("v"),
            Err(FeatureError::MatrixShape { .. })
        ));
    }

    #[test]
    fn file_stamp_tracks_size_and_absence() {
        let dir = tempdir().unwrap();
        let source = F32leScoreDir::new("s", dir.path(), 2);
        assert_eq!(source.file_stamp("v").unwrap(), "missing");
        let matrix = ScoreMatrix::new(2, vec![0.5; 4]).unwrap();
        source.write_scores("v", &matrix).unwrap();
        let short = source.file_stamp("v").unwrap();
        assert!(short.starts_with("16:"), "{short}");
        source
            .write_scores("v", &ScoreMatrix::new(2, vec![0.5; 6]).unwrap())
            .unwrap();
        assert_ne!(source.file_stamp("v").unwrap(), short);
    }
}
