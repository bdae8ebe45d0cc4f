//! On-disk feature table cache (`manifest.json`, `rows.jsonl`, `features.f32le`).

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::source::load_f32le;
use super::table::{FeatureTable, FrameKey};
use super::FeatureError;

const CACHE_FORMAT_VERSION: i64 = 1;
const MANIFEST_FILE_NAME: &str = "manifest.json";
const ROWS_FILE_NAME: &str = "rows.jsonl";
const FEATURES_FILE_NAME: &str = "features.f32le";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TableManifest {
    format_version: i64,
    feature_encoding: String,
    columns: Vec<String>,
    row_count: usize,
    labeled: bool,
    /// Digest of the inputs the table was built from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inputs: Option<String>,
    files: TableManifestFiles,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TableManifestFiles {
    rows: String,
    features: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RowRecord {
    video_id: String,
    frame: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    target: Option<u8>,
}

/// Whether `dir` holds a cached table manifest.
pub fn table_exists(dir: &Path) -> bool {
    dir.join(MANIFEST_FILE_NAME).is_file()
}

/// Input digest recorded by [`save_table`], if `dir` holds a keyed cache.
pub fn cached_inputs(dir: &Path) -> Result<Option<String>, FeatureError> {
    if !table_exists(dir) {
        return Ok(None);
    }
    Ok(read_manifest(dir)?.inputs)
}

/// Persist a feature table into `dir` (created if missing), keyed by `inputs`.
pub fn save_table(dir: &Path, table: &FeatureTable, inputs: &str) -> Result<(), FeatureError> {
    std::fs::create_dir_all(dir).map_err(|err| FeatureError::io(dir, err))?;
    let features_path = dir.join(FEATURES_FILE_NAME);
    let rows_path = dir.join(ROWS_FILE_NAME);
    let manifest_path = dir.join(MANIFEST_FILE_NAME);
    if manifest_path.is_file() {
        std::fs::remove_file(&manifest_path).map_err(|err| FeatureError::io(&manifest_path, err))?;
    }

    let mut features_writer = BufWriter::new(
        File::create(&features_path).map_err(|err| FeatureError::io(&features_path, err))?,
    );
    for value in table.values() {
        features_writer
            .write_all(&value.to_le_bytes())
            .map_err(|err| FeatureError::io(&features_path, err))?;
    }
    features_writer
        .flush()
        .map_err(|err| FeatureError::io(&features_path, err))?;

    let mut rows_writer =
        BufWriter::new(File::create(&rows_path).map_err(|err| FeatureError::io(&rows_path, err))?);
    for (idx, key) in table.keys().iter().enumerate() {
        let record = RowRecord {
            video_id: key.video_id.clone(),
            frame: key.frame,
            target: table.targets().map(|targets| targets[idx]),
        };
        serde_json::to_writer(&mut rows_writer, &record)?;
        rows_writer
            .write_all(b"\n")
            .map_err(|err| FeatureError::io(&rows_path, err))?;
    }
    rows_writer
        .flush()
        .map_err(|err| FeatureError::io(&rows_path, err))?;

    // The manifest is written last: its presence marks a complete cache.
    let manifest = TableManifest {
        format_version: CACHE_FORMAT_VERSION,
        feature_encoding: "f32le".to_string(),
        columns: table.columns().to_vec(),
        row_count: table.len(),
        labeled: table.is_labeled(),
        inputs: Some(inputs.to_string()),
        files: TableManifestFiles {
            rows: ROWS_FILE_NAME.to_string(),
            features: FEATURES_FILE_NAME.to_string(),
        },
    };
    let bytes = serde_json::to_vec_pretty(&manifest)?;
    std::fs::write(&manifest_path, bytes).map_err(|err| FeatureError::io(&manifest_path, err))
}

/// Load a table written by [`save_table`].
pub fn load_table(dir: &Path) -> Result<FeatureTable, FeatureError> {
    let manifest = read_manifest(dir)?;
    if manifest.format_version != CACHE_FORMAT_VERSION || manifest.feature_encoding != "f32le" {
        return Err(FeatureError::InvalidCache(format!(
            "unsupported format {} ({})",
            manifest.format_version, manifest.feature_encoding
        )));
    }

    let rows_path = dir.join(&manifest.files.rows);
    let file = File::open(&rows_path).map_err(|err| FeatureError::io(&rows_path, err))?;
    let mut keys = Vec::with_capacity(manifest.row_count);
    let mut targets = manifest.labeled.then(|| Vec::with_capacity(manifest.row_count));
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|err| FeatureError::io(&rows_path, err))?;
        if line.trim().is_empty() {
            continue;
        }
        let record: RowRecord = serde_json::from_str(&line)
            .map_err(|err| FeatureError::InvalidCache(format!("rows line {}: {err}", idx + 1)))?;
        match (&mut targets, record.target) {
            (Some(targets), Some(target)) => targets.push(target),
            (None, _) => {}
            (Some(_), None) => {
                return Err(FeatureError::InvalidCache(format!(
                    "rows line {} has no target",
                    idx + 1
                )));
            }
        }
        keys.push(FrameKey::new(record.video_id, record.frame));
    }
    if keys.len() != manifest.row_count {
        return Err(FeatureError::InvalidCache(format!(
            "manifest lists {} rows, found {}",
            manifest.row_count,
            keys.len()
        )));
    }

    let values = load_f32le(&dir.join(&manifest.files.features))?;
    FeatureTable::from_parts(manifest.columns, keys, values, targets)
}

fn read_manifest(dir: &Path) -> Result<TableManifest, FeatureError> {
    let manifest_path = dir.join(MANIFEST_FILE_NAME);
    let bytes =
        std::fs::read(&manifest_path).map_err(|err| FeatureError::io(&manifest_path, err))?;
    Ok(serde_json::from_slice(&bytes)?)
}
