//! Machine learning building blocks: the fit/predict contract, the boosted-tree
//! trainer behind it, and evaluation metrics.

pub mod gbdt;
pub mod metrics;

/// In-memory binary dataset used for training and evaluation.
#[derive(Debug, Clone, Default)]
pub struct TrainDataset {
    /// Number of `f32` values in each feature vector.
    pub feature_len: usize,
    /// Feature matrix, row-major.
    pub x: Vec<Vec<f32>>,
    /// Binary labels aligned with `x`.
    pub y: Vec<u8>,
}

impl TrainDataset {
    pub fn new(feature_len: usize) -> Self {
        Self {
            feature_len,
            x: Vec::new(),
            y: Vec::new(),
        }
    }

    pub fn push(&mut self, row: &[f32], label: u8) {
        self.x.push(row.to_vec());
        self.y.push(label);
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    pub fn positives(&self) -> usize {
        self.y.iter().filter(|&&label| label == 1).count()
    }
}

/// A trained binary classifier.
pub trait BinaryClassifier {
    /// Number of features the model expects per row.
    fn feature_len(&self) -> usize;

    /// Probability of the positive class, in `[0, 1]`.
    fn predict_proba(&self, features: &[f32]) -> f32;

    /// Boosting round selected by early stopping, when the model has one.
    fn best_iteration(&self) -> Option<usize> {
        None
    }

    /// Per-feature usage counts, when the model can report them.
    fn feature_importance(&self) -> Vec<u32> {
        Vec::new()
    }
}

/// Fits a [`BinaryClassifier`] on a training set, using `valid` for early stopping.
pub trait BinaryTrainer {
    type Model: BinaryClassifier;

    fn fit(&self, train: &TrainDataset, valid: &TrainDataset) -> Result<Self::Model, String>;
}
