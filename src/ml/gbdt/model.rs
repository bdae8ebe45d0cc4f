use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::ml::BinaryClassifier;

/// Node of a regression tree. Children are indices into [`Tree::nodes`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    Split {
        /// Feature index used for the split.
        feature: u32,
        /// Rows with `feature < threshold` go left.
        threshold: f32,
        /// Branch taken by `NaN` feature values.
        default_left: bool,
        left: u32,
        right: u32,
    },
    Leaf {
        /// Margin contribution, learning rate already applied.
        value: f32,
    },
}

/// Depth-limited regression tree used as a weak learner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    pub nodes: Vec<Node>,
}

impl Tree {
    /// Predict the tree's margin contribution for a feature vector.
    pub fn predict(&self, features: &[f32]) -> f32 {
        let mut idx = 0usize;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    default_left,
                    left,
                    right,
                } => {
                    let value = features.get(*feature as usize).copied().unwrap_or(f32::NAN);
                    let go_left = if value.is_nan() {
                        *default_left
                    } else {
                        value < *threshold
                    };
                    idx = (if go_left { *left } else { *right }) as usize;
                }
            }
        }
    }

    fn validate(&self, feature_len: usize) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("Tree has no nodes".to_string());
        }
        for (idx, node) in self.nodes.iter().enumerate() {
            if let Node::Split {
                feature,
                left,
                right,
                ..
            } = node
            {
                if *feature as usize >= feature_len {
                    return Err(format!("Node {idx} splits on feature {feature} out of range"));
                }
                // Children always come after their parent, which also rules out cycles.
                for child in [*left, *right] {
                    if child as usize <= idx || child as usize >= self.nodes.len() {
                        return Err(format!("Node {idx} has invalid child {child}"));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Gradient-boosted tree model for binary classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GbdtModel {
    /// Model format version.
    pub model_version: i64,
    /// Number of `f32` values per feature vector.
    pub feature_len: usize,
    /// Initial raw margin before boosting rounds.
    pub base_margin: f32,
    /// Boosting round with the best validation score (0-based).
    pub best_iteration: usize,
    /// Validation score at `best_iteration`.
    pub best_score: f64,
    /// One tree per round, truncated after `best_iteration`.
    pub trees: Vec<Tree>,
}

impl GbdtModel {
    /// Validate structural invariants of the model.
    pub fn validate(&self) -> Result<(), String> {
        if self.feature_len == 0 {
            return Err("Model must expect at least one feature".to_string());
        }
        if !self.trees.is_empty() && self.best_iteration + 1 != self.trees.len() {
            return Err(format!(
                "best_iteration {} does not match {} trees",
                self.best_iteration,
                self.trees.len()
            ));
        }
        for (round, tree) in self.trees.iter().enumerate() {
            tree.validate(self.feature_len)
                .map_err(|err| format!("Round {round}: {err}"))?;
        }
        Ok(())
    }

    /// Load a model from a JSON file.
    pub fn load_json(path: &Path) -> Result<Self, String> {
        let bytes = std::fs::read(path).map_err(|err| err.to_string())?;
        let model: Self = serde_json::from_slice(&bytes).map_err(|err| err.to_string())?;
        model.validate()?;
        Ok(model)
    }

    /// Predict the raw margin for a feature vector.
    pub fn predict_raw(&self, features: &[f32]) -> f32 {
        self.base_margin
            + self
                .trees
                .iter()
                .map(|tree| tree.predict(features))
                .sum::<f32>()
    }

    /// Number of splits per feature across all trees.
    pub fn split_counts(&self) -> Vec<u32> {
        let mut counts = vec![0u32; self.feature_len];
        for tree in &self.trees {
            for node in &tree.nodes {
                if let Node::Split { feature, .. } = node
                    && let Some(slot) = counts.get_mut(*feature as usize)
                {
                    *slot += 1;
                }
            }
        }
        counts
    }
}

impl BinaryClassifier for GbdtModel {
    fn feature_len(&self) -> usize {
        self.feature_len
    }

    fn predict_proba(&self, features: &[f32]) -> f32 {
        sigmoid(self.predict_raw(features))
    }

    fn best_iteration(&self) -> Option<usize> {
        Some(self.best_iteration)
    }

    fn feature_importance(&self) -> Vec<u32> {
        self.split_counts()
    }
}

/// Logistic function, saturating cleanly for large magnitudes.
pub fn sigmoid(raw: f32) -> f32 {
    if raw >= 0.0 {
        1.0 / (1.0 + (-raw).exp())
    } else {
        let e = raw.exp();
        e / (1.0 + e)
    }
}
