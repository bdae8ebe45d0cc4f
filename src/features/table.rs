use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::FeatureError;

/// Identity of a frame row.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FrameKey {
    pub video_id: String,
    pub frame: u32,
}

impl FrameKey {
    pub fn new(video_id: impl Into<String>, frame: u32) -> Self {
        Self {
            video_id: video_id.into(),
            frame,
        }
    }
}

/// In-memory feature table: one row per `(video, frame)`.
///
/// Values are stored row-major. Missing auxiliary values are `NaN`; window
/// offsets outside a video hold the missing sentinel.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTable {
    columns: Vec<String>,
    keys: Vec<FrameKey>,
    values: Vec<f32>,
    targets: Option<Vec<u8>>,
}

impl FeatureTable {
    /// Create an empty table. `labeled` tables carry a binary target per row.
    pub fn new(columns: Vec<String>, labeled: bool) -> Self {
        Self {
            columns,
            keys: Vec::new(),
            values: Vec::new(),
            targets: labeled.then(Vec::new),
        }
    }

    pub(crate) fn from_parts(
        columns: Vec<String>,
        keys: Vec<FrameKey>,
        values: Vec<f32>,
        targets: Option<Vec<u8>>,
    ) -> Result<Self, FeatureError> {
        if values.len() != keys.len() * columns.len() {
            return Err(FeatureError::RowWidth {
                expected: keys.len() * columns.len(),
                found: values.len(),
            });
        }
        if let Some(targets) = &targets
            && targets.len() != keys.len()
        {
            return Err(FeatureError::TargetMismatch);
        }
        Ok(Self {
            columns,
            keys,
            values,
            targets,
        })
    }

    pub fn push_row(
        &mut self,
        key: FrameKey,
        values: &[f32],
        target: Option<u8>,
    ) -> Result<(), FeatureError> {
        if values.len() != self.columns.len() {
            return Err(FeatureError::RowWidth {
                expected: self.columns.len(),
                found: values.len(),
            });
        }
        match (&mut self.targets, target) {
            (Some(targets), Some(target)) => targets.push(target),
            (None, None) => {}
            _ => return Err(FeatureError::TargetMismatch),
        }
        self.keys.push(key);
        self.values.extend_from_slice(values);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &[FrameKey] {
        &self.keys
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn row(&self, idx: usize) -> &[f32] {
        let width = self.width();
        &self.values[idx * width..(idx + 1) * width]
    }

    pub fn targets(&self) -> Option<&[u8]> {
        self.targets.as_deref()
    }

    pub fn is_labeled(&self) -> bool {
        self.targets.is_some()
    }

    /// Value of a named column for a row.
    pub fn value(&self, idx: usize, column: &str) -> Option<f32> {
        let col = self.columns.iter().position(|name| name == column)?;
        self.keys.get(idx)?;
        Some(self.row(idx)[col])
    }

    /// Distinct video ids, sorted.
    pub fn video_ids(&self) -> Vec<String> {
        self.keys
            .iter()
            .map(|key| key.video_id.as_str())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// blake3 digest over columns, keys, values and targets.
    pub fn content_digest(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for column in &self.columns {
            hasher.update(column.as_bytes());
            hasher.update(b"\n");
        }
        for key in &self.keys {
            hasher.update(key.video_id.as_bytes());
            hasher.update(b"\n");
            hasher.update(&key.frame.to_le_bytes());
        }
        for value in &self.values {
            hasher.update(&value.to_le_bytes());
        }
        match &self.targets {
            Some(targets) => {
                hasher.update(b"targets");
                hasher.update(targets);
            }
            None => {
                hasher.update(b"unlabeled");
            }
        }
        hasher.finalize().to_hex().to_string()
    }

    /// Append columns; `extra` is row-major with `names.len()` values per row.
    pub fn append_columns(&mut self, names: &[String], extra: &[f32]) -> Result<(), FeatureError> {
        let add = names.len();
        if extra.len() != self.len() * add {
            return Err(FeatureError::RowWidth {
                expected: self.len() * add,
                found: extra.len(),
            });
        }
        if add == 0 {
            return Ok(());
        }
        let width = self.width();
        let mut values = Vec::with_capacity(self.len() * (width + add));
        for idx in 0..self.len() {
            values.extend_from_slice(&self.values[idx * width..(idx + 1) * width]);
            values.extend_from_slice(&extra[idx * add..(idx + 1) * add]);
        }
        self.values = values;
        self.columns.extend(names.iter().cloned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> FeatureTable {
        let mut table = FeatureTable::new(vec!["a".into(), "b".into()], true);
        table.push_row(FrameKey::new("v2", 0), &[1.0, 2.0], Some(1)).unwrap();
        table.push_row(FrameKey::new("v1", 0), &[3.0, 4.0], Some(0)).unwrap();
        table
    }

    #[test]
    fn rows_and_values_are_addressable() {
        let table = table();
        assert_eq!(table.len(), 2);
        assert_eq!(table.row(1), &[3.0, 4.0]);
        assert_eq!(table.value(0, "b"), Some(2.0));
        assert_eq!(table.value(0, "z"), None);
        assert_eq!(table.video_ids(), vec!["v1", "v2"]);
    }

    #[test]
    fn push_rejects_wrong_width_and_label_mix() {
        let mut table = table();
        assert!(matches!(
            table.push_row(FrameKey::new("v", 1), &[1.0], Some(0)),
            Err(FeatureError::RowWidth { expected: 2, found: 1 })
        ));
        assert!(matches!(
            table.push_row(FrameKey::new("v", 1), &[1.0, 2.0], None),
            Err(FeatureError::TargetMismatch)
        ));
    }

    #[test]
    fn append_columns_widens_rows() {
        let mut table = table();
        table
            .append_columns(&["c".to_string()], &[5.0, f32::NAN])
            .unwrap();
        assert_eq!(table.columns(), &["a", "b", "c"]);
        assert_eq!(&table.row(0)[..], &[1.0, 2.0, 5.0]);
        assert!(table.row(1)[2].is_nan());
    }

    #[test]
    fn digest_changes_with_targets_and_values() {
        let base = table();
        assert_eq!(base.content_digest(), table().content_digest());

        let mut relabeled = FeatureTable::new(vec!["a".into(), "b".into()], true);
        relabeled.push_row(FrameKey::new("v2", 0), &[1.0, 2.0], Some(0)).unwrap();
        relabeled.push_row(FrameKey::new("v1", 0), &[3.0, 4.0], Some(0)).unwrap();
        assert_ne!(relabeled.content_digest(), base.content_digest());

        let mut widened = table();
        widened.append_columns(&["c".to_string()], &[f32::NAN, f32::NAN]).unwrap();
        assert_ne!(widened.content_digest(), base.content_digest());
    }
}
