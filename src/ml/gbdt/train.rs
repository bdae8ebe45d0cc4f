use rand::rngs::StdRng;
use rand::{Rng, SeedableRng, seq::SliceRandom};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::model::{GbdtModel, Node, Tree, sigmoid};
use crate::ml::metrics::{log_loss, roc_auc};
use crate::ml::{BinaryTrainer, TrainDataset};

/// Bin index reserved for `NaN` feature values.
const MISSING_BIN: u8 = u8::MAX;
const MIN_SPLIT_GAIN: f64 = 1e-9;
const MIN_HESSIAN: f64 = 1e-16;

/// Training hyperparameters for binary tree boosting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainOptions {
    /// Shrinkage applied to each tree's leaf values.
    pub learning_rate: f32,
    /// Maximum tree depth (a depth of 1 is a stump).
    pub max_depth: usize,
    /// Fraction of rows sampled per tree.
    pub subsample: f32,
    /// Fraction of features sampled per tree.
    pub colsample_bytree: f32,
    /// Hard cap on boosting rounds.
    pub max_rounds: usize,
    /// Stop after this many rounds without a validation improvement.
    pub early_stopping_rounds: usize,
    /// Number of bins used for split search.
    pub bins: usize,
    /// L2 regularization on leaf values.
    pub lambda: f32,
    /// Minimum hessian sum in each child.
    pub min_child_weight: f32,
    /// Seed for row and column sampling.
    pub seed: u64,
    /// Worker threads for split search.
    pub threads: usize,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            max_depth: 4,
            subsample: 0.9,
            colsample_bytree: 0.9,
            max_rounds: 20_000,
            early_stopping_rounds: 100,
            bins: 64,
            lambda: 1.0,
            min_child_weight: 1.0,
            seed: 2017,
            threads: 6,
        }
    }
}

impl TrainOptions {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(format!("Invalid learning_rate {}", self.learning_rate));
        }
        if !(self.subsample > 0.0 && self.subsample <= 1.0) {
            return Err(format!("Invalid subsample {} (expected 0..=1)", self.subsample));
        }
        if !(self.colsample_bytree > 0.0 && self.colsample_bytree <= 1.0) {
            return Err(format!(
                "Invalid colsample_bytree {} (expected 0..=1)",
                self.colsample_bytree
            ));
        }
        if self.max_depth == 0 {
            return Err("max_depth must be at least 1".to_string());
        }
        if self.lambda < 0.0 || self.min_child_weight < 0.0 {
            return Err("lambda and min_child_weight must be non-negative".to_string());
        }
        Ok(())
    }
}

/// [`BinaryTrainer`] backed by [`train_gbdt`].
#[derive(Debug, Clone, Default)]
pub struct GbdtTrainer {
    pub options: TrainOptions,
}

impl GbdtTrainer {
    pub fn new(options: TrainOptions) -> Self {
        Self { options }
    }
}

impl BinaryTrainer for GbdtTrainer {
    type Model = GbdtModel;

    fn fit(&self, train: &TrainDataset, valid: &TrainDataset) -> Result<GbdtModel, String> {
        train_gbdt(train, valid, &self.options)
    }
}

/// Train a binary logistic tree ensemble, early-stopping on validation ROC-AUC.
///
/// The returned model is truncated to its best round.
pub fn train_gbdt(
    train: &TrainDataset,
    valid: &TrainDataset,
    options: &TrainOptions,
) -> Result<GbdtModel, String> {
    options.validate()?;
    check_dataset(train, "training")?;
    check_dataset(valid, "validation")?;
    if valid.feature_len != train.feature_len {
        return Err(format!(
            "Validation rows have {} features (training has {})",
            valid.feature_len, train.feature_len
        ));
    }
    let positives = train.positives();
    if positives == 0 || positives == train.len() {
        return Err("Training set needs both classes".to_string());
    }

    let n = train.len();
    let d = train.feature_len;
    let bins = options.bins.clamp(2, MISSING_BIN as usize);
    let (mins, maxs) = compute_feature_min_max(&train.x, d);
    let binned = bin_features(&train.x, &mins, &maxs, bins);

    let rate = positives as f64 / n as f64;
    let base_margin = (rate / (1.0 - rate)).ln() as f32;
    let mut train_margin = vec![base_margin; n];
    let mut valid_margin = vec![base_margin; valid.len()];

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.threads.max(1))
        .build()
        .map_err(|err| err.to_string())?;
    let mut rng = StdRng::seed_from_u64(options.seed);
    let mut feature_order: Vec<usize> = (0..d).collect();
    let col_count = ((options.colsample_bytree as f64 * d as f64).ceil() as usize).clamp(1, d);

    let mut grad = vec![0f64; n];
    let mut hess = vec![0f64; n];
    let mut trees: Vec<Tree> = Vec::new();
    let mut best_score = validation_score(&valid.y, &valid_margin);
    let mut best_iteration = 0usize;

    for round in 0..options.max_rounds {
        for i in 0..n {
            let p = sigmoid(train_margin[i]) as f64;
            grad[i] = p - train.y[i] as f64;
            hess[i] = (p * (1.0 - p)).max(MIN_HESSIAN);
        }
        let rows = sample_rows(n, options.subsample, &mut rng);
        feature_order.shuffle(&mut rng);
        let mut features = feature_order[..col_count].to_vec();
        features.sort_unstable();

        let grower = TreeGrower {
            binned: &binned,
            mins: &mins,
            maxs: &maxs,
            bins,
            grad: &grad,
            hess: &hess,
            features: &features,
            options,
            pool: &pool,
        };
        let tree = grower.grow(rows);
        for (margin, row) in train_margin.iter_mut().zip(&train.x) {
            *margin += tree.predict(row);
        }
        for (margin, row) in valid_margin.iter_mut().zip(&valid.x) {
            *margin += tree.predict(row);
        }
        trees.push(tree);

        let score = validation_score(&valid.y, &valid_margin);
        if round == 0 || score > best_score {
            best_score = score;
            best_iteration = round;
        } else if round - best_iteration >= options.early_stopping_rounds {
            debug!(
                "Early stop at round {round}: best score {best_score:.6} at round {best_iteration}"
            );
            break;
        }
        if round % 100 == 0 {
            debug!("Round {round}: valid score {score:.6} (best {best_score:.6} at {best_iteration})");
        }
    }
    trees.truncate(best_iteration + 1);

    let model = GbdtModel {
        model_version: 1,
        feature_len: d,
        base_margin,
        best_iteration,
        best_score,
        trees,
    };
    model.validate()?;
    Ok(model)
}

/// Validation ROC-AUC, or negative log-loss when the set holds a single class.
fn validation_score(labels: &[u8], margins: &[f32]) -> f64 {
    let probs: Vec<f32> = margins.iter().map(|&m| sigmoid(m)).collect();
    roc_auc(labels, &probs).unwrap_or_else(|| -log_loss(labels, &probs))
}

fn check_dataset(dataset: &TrainDataset, name: &str) -> Result<(), String> {
    if dataset.x.len() != dataset.y.len() {
        return Err(format!("Mismatched {name} X/Y lengths"));
    }
    if dataset.x.is_empty() {
        return Err(format!("Empty {name} dataset"));
    }
    if dataset.feature_len == 0 {
        return Err(format!("{name} dataset has no features"));
    }
    if let Some(idx) = dataset.x.iter().position(|row| row.len() != dataset.feature_len) {
        return Err(format!(
            "{name} row {idx} has {} features (expected {})",
            dataset.x[idx].len(),
            dataset.feature_len
        ));
    }
    if dataset.y.iter().any(|&label| label > 1) {
        return Err(format!("{name} labels must be 0 or 1"));
    }
    Ok(())
}

fn sample_rows(n: usize, subsample: f32, rng: &mut StdRng) -> Vec<usize> {
    if subsample >= 1.0 {
        return (0..n).collect();
    }
    let rows: Vec<usize> = (0..n).filter(|_| rng.random::<f32>() < subsample).collect();
    if rows.is_empty() { (0..n).collect() } else { rows }
}

fn compute_feature_min_max(x: &[Vec<f32>], feature_len: usize) -> (Vec<f32>, Vec<f32>) {
    let mut mins = vec![f32::INFINITY; feature_len];
    let mut maxs = vec![f32::NEG_INFINITY; feature_len];
    for row in x {
        for (j, &v) in row.iter().take(feature_len).enumerate() {
            if v.is_finite() {
                mins[j] = mins[j].min(v);
                maxs[j] = maxs[j].max(v);
            }
        }
    }
    for j in 0..feature_len {
        if !mins[j].is_finite() || !maxs[j].is_finite() {
            mins[j] = 0.0;
            maxs[j] = 0.0;
        }
        if mins[j] == maxs[j] {
            maxs[j] = mins[j] + 1.0;
        }
    }
    (mins, maxs)
}

/// Column-major bins: `out[feature][row]`.
fn bin_features(x: &[Vec<f32>], mins: &[f32], maxs: &[f32], bins: usize) -> Vec<Vec<u8>> {
    let mut out = vec![Vec::with_capacity(x.len()); mins.len()];
    for row in x {
        for (j, column) in out.iter_mut().enumerate() {
            column.push(bin_value(row[j], mins[j], maxs[j], bins));
        }
    }
    out
}

fn bin_value(v: f32, min: f32, max: f32, bins: usize) -> u8 {
    if v.is_nan() {
        return MISSING_BIN;
    }
    let t = ((v - min) / (max - min)).clamp(0.0, 1.0);
    ((t * bins as f32) as usize).min(bins - 1) as u8
}

/// Raw-value threshold equivalent to "bin <= split_bin".
fn threshold_for_bin(min: f32, max: f32, split_bin: usize, bins: usize) -> f32 {
    let t = ((split_bin + 1) as f32) / bins as f32;
    min + t * (max - min)
}

#[derive(Debug, Clone, Copy)]
struct SplitCandidate {
    gain: f64,
    feature: usize,
    split_bin: usize,
    default_left: bool,
}

struct TreeGrower<'a> {
    binned: &'a [Vec<u8>],
    mins: &'a [f32],
    maxs: &'a [f32],
    bins: usize,
    grad: &'a [f64],
    hess: &'a [f64],
    features: &'a [usize],
    options: &'a TrainOptions,
    pool: &'a rayon::ThreadPool,
}

impl TreeGrower<'_> {
    fn grow(&self, rows: Vec<usize>) -> Tree {
        let mut nodes = Vec::new();
        self.grow_node(&mut nodes, rows, 0);
        Tree { nodes }
    }

    fn grow_node(&self, nodes: &mut Vec<Node>, rows: Vec<usize>, depth: usize) -> u32 {
        let idx = nodes.len();
        let (g, h) = rows.iter().fold((0f64, 0f64), |(g, h), &i| {
            (g + self.grad[i], h + self.hess[i])
        });
        nodes.push(Node::Leaf {
            value: self.leaf_value(g, h),
        });
        if depth >= self.options.max_depth || rows.len() < 2 {
            return idx as u32;
        }
        let Some(split) = self.best_split(&rows, g, h) else {
            return idx as u32;
        };

        let column = &self.binned[split.feature];
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows.into_iter().partition(|&i| {
            let bin = column[i];
            if bin == MISSING_BIN {
                split.default_left
            } else {
                bin as usize <= split.split_bin
            }
        });
        let left = self.grow_node(nodes, left_rows, depth + 1);
        let right = self.grow_node(nodes, right_rows, depth + 1);
        nodes[idx] = Node::Split {
            feature: split.feature as u32,
            threshold: threshold_for_bin(
                self.mins[split.feature],
                self.maxs[split.feature],
                split.split_bin,
                self.bins,
            ),
            default_left: split.default_left,
            left,
            right,
        };
        idx as u32
    }

    fn leaf_value(&self, g: f64, h: f64) -> f32 {
        let lambda = self.options.lambda as f64;
        (-g / (h + lambda) * self.options.learning_rate as f64) as f32
    }

    fn best_split(&self, rows: &[usize], g: f64, h: f64) -> Option<SplitCandidate> {
        let candidates: Vec<Option<SplitCandidate>> = self.pool.install(|| {
            self.features
                .par_iter()
                .map(|&feature| self.best_split_for_feature(feature, rows, g, h))
                .collect()
        });
        // Strict comparison keeps the lowest feature index on ties.
        candidates
            .into_iter()
            .flatten()
            .fold(None, |best: Option<SplitCandidate>, candidate| match best {
                Some(best) if best.gain >= candidate.gain => Some(best),
                _ => Some(candidate),
            })
    }

    fn best_split_for_feature(
        &self,
        feature: usize,
        rows: &[usize],
        g: f64,
        h: f64,
    ) -> Option<SplitCandidate> {
        let bins = self.bins;
        let column = &self.binned[feature];
        let mut hist_g = vec![0f64; bins];
        let mut hist_h = vec![0f64; bins];
        let mut hist_n = vec![0usize; bins];
        let (mut miss_g, mut miss_h, mut miss_n) = (0f64, 0f64, 0usize);
        for &i in rows {
            let bin = column[i];
            if bin == MISSING_BIN {
                miss_g += self.grad[i];
                miss_h += self.hess[i];
                miss_n += 1;
            } else {
                let b = bin as usize;
                hist_g[b] += self.grad[i];
                hist_h[b] += self.hess[i];
                hist_n[b] += 1;
            }
        }

        let lambda = self.options.lambda as f64;
        let min_child = self.options.min_child_weight as f64;
        let parent = g * g / (h + lambda);
        let total_n = rows.len();
        let mut best: Option<SplitCandidate> = None;
        let (mut acc_g, mut acc_h, mut acc_n) = (0f64, 0f64, 0usize);
        for split_bin in 0..bins - 1 {
            acc_g += hist_g[split_bin];
            acc_h += hist_h[split_bin];
            acc_n += hist_n[split_bin];
            for default_left in [true, false] {
                let (lg, lh, ln) = if default_left {
                    (acc_g + miss_g, acc_h + miss_h, acc_n + miss_n)
                } else {
                    (acc_g, acc_h, acc_n)
                };
                let (rg, rh, rn) = (g - lg, h - lh, total_n - ln);
                if ln == 0 || rn == 0 || lh < min_child || rh < min_child {
                    continue;
                }
                let gain = 0.5 * (lg * lg / (lh + lambda) + rg * rg / (rh + lambda) - parent);
                if gain > MIN_SPLIT_GAIN && best.is_none_or(|b| gain > b.gain) {
                    best = Some(SplitCandidate {
                        gain,
                        feature,
                        split_bin,
                        default_left,
                    });
                }
            }
        }
        best
    }
}
