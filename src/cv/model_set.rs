//! The ordered fold-model set and its JSON persistence.

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{CvError, FoldAssignment};
use crate::features::check_columns;
use crate::ml::BinaryClassifier;

pub const MODEL_SET_VERSION: u32 = 1;

/// `K` models where model `i` was trained on every fold except `i`.
///
/// Carries the feature columns and fold assignment it was trained with, so any
/// later prediction pass uses the same layout and the same held-out videos.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSet<M> {
    pub format_version: u32,
    feature_columns: Vec<String>,
    assignment: FoldAssignment,
    /// Digest of the training table and trainer settings, when recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inputs: Option<String>,
    models: Vec<M>,
}

impl<M: BinaryClassifier> ModelSet<M> {
    pub fn new(
        feature_columns: Vec<String>,
        assignment: FoldAssignment,
        models: Vec<M>,
    ) -> Result<Self, CvError> {
        let set = Self {
            format_version: MODEL_SET_VERSION,
            feature_columns,
            assignment,
            inputs: None,
            models,
        };
        set.validate()?;
        Ok(set)
    }

    pub fn feature_columns(&self) -> &[String] {
        &self.feature_columns
    }

    pub fn assignment(&self) -> &FoldAssignment {
        &self.assignment
    }

    /// Record the digest of the inputs these models were trained from.
    pub fn with_inputs(mut self, inputs: impl Into<String>) -> Self {
        self.inputs = Some(inputs.into());
        self
    }

    pub fn inputs(&self) -> Option<&str> {
        self.inputs.as_deref()
    }

    pub fn models(&self) -> &[M] {
        &self.models
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Fail unless `columns` is exactly the training column list.
    pub fn ensure_columns(&self, columns: &[String]) -> Result<(), CvError> {
        check_columns(&self.feature_columns, columns)?;
        Ok(())
    }

    fn validate(&self) -> Result<(), CvError> {
        self.assignment.validate()?;
        if self.models.len() != self.assignment.count() {
            return Err(CvError::ModelCount {
                expected: self.assignment.count(),
                found: self.models.len(),
            });
        }
        if let Some(model) = self
            .models
            .iter()
            .find(|model| model.feature_len() != self.feature_columns.len())
        {
            return Err(CvError::InvalidAssignment(format!(
                "model expects {} features but the set lists {} columns",
                model.feature_len(),
                self.feature_columns.len()
            )));
        }
        Ok(())
    }
}

impl<M: BinaryClassifier + Serialize> ModelSet<M> {
    pub fn save_json(&self, path: &Path) -> Result<(), CvError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| CvError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let bytes = serde_json::to_vec(self)?;
        fs::write(path, bytes).map_err(|source| CvError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl<M: BinaryClassifier + DeserializeOwned> ModelSet<M> {
    pub fn load_json(path: &Path) -> Result<Self, CvError> {
        let bytes = fs::read(path).map_err(|source| CvError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let set: Self = serde_json::from_slice(&bytes)?;
        if set.format_version != MODEL_SET_VERSION {
            return Err(CvError::InvalidAssignment(format!(
                "unsupported model set version {}",
                set.format_version
            )));
        }
        set.validate()?;
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cv::FoldOptions;
    use crate::features::FeatureError;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Constant {
        len: usize,
        p: f32,
    }

    impl BinaryClassifier for Constant {
        fn feature_len(&self) -> usize {
            self.len
        }

        fn predict_proba(&self, _features: &[f32]) -> f32 {
            self.p
        }
    }

    fn assignment() -> FoldAssignment {
        FoldAssignment::assign(["a", "b", "c"], &FoldOptions { count: 2, seed: 1 }).unwrap()
    }

    fn columns() -> Vec<String> {
        vec!["x".to_string(), "y".to_string()]
    }

    #[test]
    fn json_round_trip_keeps_assignment_and_models() {
        let set = ModelSet::new(
            columns(),
            assignment(),
            vec![Constant { len: 2, p: 0.2 }, Constant { len: 2, p: 0.8 }],
        )
        .unwrap()
        .with_inputs("digest");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("models.json");
        set.save_json(&path).unwrap();
        let loaded: ModelSet<Constant> = ModelSet::load_json(&path).unwrap();
        assert_eq!(loaded, set);
        assert_eq!(loaded.inputs(), Some("digest"));
    }

    #[test]
    fn model_count_must_match_folds() {
        let err = ModelSet::new(columns(), assignment(), vec![Constant { len: 2, p: 0.5 }])
            .unwrap_err();
        assert!(matches!(
            err,
            CvError::ModelCount {
                expected: 2,
                found: 1
            }
        ));
    }

    #[test]
    fn column_mismatch_is_an_error() {
        let set = ModelSet::new(
            columns(),
            assignment(),
            vec![Constant { len: 2, p: 0.2 }, Constant { len: 2, p: 0.8 }],
        )
        .unwrap();
        set.ensure_columns(&columns()).unwrap();
        let swapped = vec!["y".to_string(), "x".to_string()];
        let err = set.ensure_columns(&swapped).unwrap_err();
        assert!(matches!(
            err,
            CvError::Feature(FeatureError::ColumnMismatch { .. })
        ));
    }
}
