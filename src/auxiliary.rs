//! Auxiliary per-frame and per-video features joined onto the window table.
//!
//! Both joins are left-outer: every feature row survives, and a key with no
//! auxiliary match yields `NaN`, which the boosted-tree trainer routes through
//! its learned missing-value branch.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::features::{FeatureError, FeatureTable};

#[derive(Debug, Error)]
pub enum AuxError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid record at {path} line {line}: {message}")]
    InvalidRecord {
        path: PathBuf,
        line: usize,
        message: String,
    },
    #[error("duplicate auxiliary key {0}")]
    DuplicateKey(String),
    #[error(transparent)]
    Feature(#[from] FeatureError),
}

/// Join statistics surfaced to the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub rows: usize,
    pub unmatched_rows: usize,
}

#[derive(Debug, Deserialize)]
struct RegionRecord {
    video_id: String,
    frame: u32,
    #[serde(flatten)]
    values: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct VesselRecord {
    video_id: String,
    #[serde(flatten)]
    values: BTreeMap<String, Value>,
}

/// Region-of-interest summary statistics keyed by `(video_id, frame)`.
#[derive(Debug, Clone, Default)]
pub struct RegionStats {
    columns: Vec<String>,
    by_key: HashMap<(String, u32), Vec<f32>>,
}

impl RegionStats {
    /// A table with the given columns and no rows; every join yields `NaN`.
    pub fn empty(columns: Vec<String>) -> Self {
        Self {
            columns,
            by_key: HashMap::new(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    pub fn insert(&mut self, video_id: &str, frame: u32, values: Vec<f32>) -> Result<(), AuxError> {
        if values.len() != self.columns.len() {
            return Err(AuxError::Feature(FeatureError::RowWidth {
                expected: self.columns.len(),
                found: values.len(),
            }));
        }
        if self
            .by_key
            .insert((video_id.to_string(), frame), values)
            .is_some()
        {
            return Err(AuxError::DuplicateKey(format!("{video_id}/{frame}")));
        }
        Ok(())
    }

    fn get(&self, video_id: &str, frame: u32) -> Option<&[f32]> {
        self.by_key
            .get(&(video_id.to_string(), frame))
            .map(Vec::as_slice)
    }
}

/// Vessel (category) identifier keyed by `video_id`.
#[derive(Debug, Clone)]
pub struct VesselIds {
    column: String,
    by_video: HashMap<String, f32>,
}

impl VesselIds {
    pub fn empty(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            by_video: HashMap::new(),
        }
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn insert(&mut self, video_id: &str, id: f32) -> Result<(), AuxError> {
        if self.by_video.insert(video_id.to_string(), id).is_some() {
            return Err(AuxError::DuplicateKey(video_id.to_string()));
        }
        Ok(())
    }
}

/// Load region statistics from JSONL, keeping only `columns` (missing fields are `NaN`).
pub fn load_region_stats(path: &Path, columns: &[String]) -> Result<RegionStats, AuxError> {
    let mut stats = RegionStats::empty(columns.to_vec());
    for (line, record) in read_jsonl::<RegionRecord>(path)? {
        let values = columns
            .iter()
            .map(|column| numeric_field(record.values.get(column)))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|message| AuxError::InvalidRecord {
                path: path.to_path_buf(),
                line,
                message,
            })?;
        stats.insert(&record.video_id, record.frame, values)?;
    }
    info!("Loaded {} region-stat rows from {}", stats.len(), path.display());
    Ok(stats)
}

/// Load vessel ids from JSONL records carrying `column`.
pub fn load_vessel_ids(path: &Path, column: &str) -> Result<VesselIds, AuxError> {
    let mut ids = VesselIds::empty(column);
    for (line, record) in read_jsonl::<VesselRecord>(path)? {
        let id = numeric_field(record.values.get(column)).map_err(|message| {
            AuxError::InvalidRecord {
                path: path.to_path_buf(),
                line,
                message,
            }
        })?;
        ids.insert(&record.video_id, id)?;
    }
    Ok(ids)
}

/// Left-join region statistics onto `table` by `(video_id, frame)`.
pub fn merge_region_stats(
    table: &mut FeatureTable,
    stats: &RegionStats,
) -> Result<MergeReport, AuxError> {
    let width = stats.columns().len();
    let mut extra = Vec::with_capacity(table.len() * width);
    let mut report = MergeReport {
        rows: table.len(),
        unmatched_rows: 0,
    };
    for key in table.keys() {
        match stats.get(&key.video_id, key.frame) {
            Some(values) => extra.extend_from_slice(values),
            None => {
                report.unmatched_rows += 1;
                extra.extend(std::iter::repeat_n(f32::NAN, width));
            }
        }
    }
    table.append_columns(stats.columns(), &extra)?;
    if report.unmatched_rows > 0 {
        warn!(
            "Region stats missing for {} of {} rows",
            report.unmatched_rows, report.rows
        );
    }
    Ok(report)
}

/// Left-join vessel ids onto `table` by `video_id`.
pub fn merge_vessel_ids(table: &mut FeatureTable, ids: &VesselIds) -> Result<MergeReport, AuxError> {
    let mut report = MergeReport {
        rows: table.len(),
        unmatched_rows: 0,
    };
    let mut missing_videos = std::collections::BTreeSet::new();
    let extra: Vec<f32> = table
        .keys()
        .iter()
        .map(|key| match ids.by_video.get(&key.video_id) {
            Some(&id) => id,
            None => {
                report.unmatched_rows += 1;
                missing_videos.insert(key.video_id.clone());
                f32::NAN
            }
        })
        .collect();
    table.append_columns(&[ids.column().to_string()], &extra)?;
    if !missing_videos.is_empty() {
        warn!(
            "Vessel id missing for {} videos ({} rows)",
            missing_videos.len(),
            report.unmatched_rows
        );
    }
    Ok(report)
}

fn numeric_field(value: Option<&Value>) -> Result<f32, String> {
    match value {
        None | Some(Value::Null) => Ok(f32::NAN),
        Some(Value::Number(number)) => number
            .as_f64()
            .map(|v| v as f32)
            .ok_or_else(|| format!("unrepresentable number {number}")),
        Some(Value::String(text)) => text
            .trim()
            .parse::<f32>()
            .map_err(|_| format!("non-numeric value `{text}`")),
        Some(other) => Err(format!("non-numeric value {other}")),
    }
}

fn read_jsonl<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<(usize, T)>, AuxError> {
    let file = File::open(path).map_err(|source| AuxError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut out = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|source| AuxError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|err| AuxError::InvalidRecord {
            path: path.to_path_buf(),
            line: idx + 1,
            message: err.to_string(),
        })?;
        out.push((idx + 1, record));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FrameKey;
    use tempfile::tempdir;

    fn table() -> FeatureTable {
        let mut table = FeatureTable::new(vec!["w".into()], false);
        table.push_row(FrameKey::new("a", 0), &[0.1], None).unwrap();
        table.push_row(FrameKey::new("a", 1), &[0.2], None).unwrap();
        table.push_row(FrameKey::new("b", 0), &[0.3], None).unwrap();
        table
    }

    #[test]
    fn region_join_keeps_every_row_and_marks_gaps() {
        let mut stats = RegionStats::empty(vec!["masks_mx".into(), "masks_mean".into()]);
        stats.insert("a", 1, vec![0.9, 0.4]).unwrap();
        let mut table = table();
        let report = merge_region_stats(&mut table, &stats).unwrap();
        assert_eq!(report, MergeReport { rows: 3, unmatched_rows: 2 });
        assert_eq!(table.columns(), &["w", "masks_mx", "masks_mean"]);
        assert_eq!(table.row(1), &[0.2, 0.9, 0.4]);
        assert!(table.row(0)[1].is_nan());
        assert!(table.row(2)[2].is_nan());
    }

    #[test]
    fn vessel_join_is_per_video() {
        let mut ids = VesselIds::empty("boat_id");
        ids.insert("a", 3.0).unwrap();
        let mut table = table();
        let report = merge_vessel_ids(&mut table, &ids).unwrap();
        assert_eq!(report.unmatched_rows, 1);
        assert_eq!(table.value(0, "boat_id"), Some(3.0));
        assert_eq!(table.value(1, "boat_id"), Some(3.0));
        assert!(table.value(2, "boat_id").unwrap().is_nan());
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let mut stats = RegionStats::empty(vec!["x".into()]);
        stats.insert("a", 0, vec![1.0]).unwrap();
        assert!(matches!(
            stats.insert("a", 0, vec![2.0]),
            Err(AuxError::DuplicateKey(_))
        ));
    }

    #[test]
    fn loads_jsonl_tables() {
        let dir = tempdir().unwrap();
        let roi = dir.path().join("roi.jsonl");
        std::fs::write(
            &roi,
            r#"{"video_id":"a","frame":0,"masks_mx":0.5,"masks_mean":null,"extra":"x"}
{"video_id":"a","frame":1,"masks_mx":"0.25"}
"#,
        )
        .unwrap();
        let columns = vec!["masks_mx".to_string(), "masks_mean".to_string()];
        let stats = load_region_stats(&roi, &columns).unwrap();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats.get("a", 1).unwrap()[0], 0.25);
        assert!(stats.get("a", 0).unwrap()[1].is_nan());

        let boats = dir.path().join("boats.jsonl");
        std::fs::write(&boats, "{\"video_id\":\"a\",\"boat_id\":7}\n").unwrap();
        let ids = load_vessel_ids(&boats, "boat_id").unwrap();
        assert_eq!(ids.by_video.get("a"), Some(&7.0));
    }

    #[test]
    fn non_numeric_field_is_an_error() {
        let dir = tempdir().unwrap();
        let boats = dir.path().join("boats.jsonl");
        std::fs::write(&boats, "{\"video_id\":\"a\",\"boat_id\":\"big\"}\n").unwrap();
        let err = load_vessel_ids(&boats, "boat_id").unwrap_err();
        assert!(matches!(err, AuxError::InvalidRecord { line: 1, .. }));
    }
}
