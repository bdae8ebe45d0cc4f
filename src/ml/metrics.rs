//! Evaluation metrics for binary presence predictions.

use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Confusion matrix for a `K`-class classifier.
pub struct ConfusionMatrix {
    /// Number of classes.
    pub n_classes: usize,
    /// Row-major `KxK` counts (`truth * K + predicted`).
    pub counts: Vec<u32>,
}

impl ConfusionMatrix {
    /// Create an empty `KxK` confusion matrix.
    pub fn new(n_classes: usize) -> Self {
        Self {
            n_classes,
            counts: vec![0; n_classes * n_classes],
        }
    }

    /// Binary matrix from labels and probabilities; `p > threshold` predicts presence.
    pub fn from_probabilities(targets: &[u8], probs: &[f32], threshold: f32) -> Self {
        let mut cm = Self::new(2);
        for (&truth, &p) in targets.iter().zip(probs) {
            cm.add(truth as usize, usize::from(p > threshold));
        }
        cm
    }

    pub fn add(&mut self, truth: usize, predicted: usize) {
        if truth >= self.n_classes || predicted >= self.n_classes {
            return;
        }
        let idx = truth * self.n_classes + predicted;
        self.counts[idx] = self.counts[idx].saturating_add(1);
    }

    pub fn get(&self, truth: usize, predicted: usize) -> u32 {
        self.counts[truth * self.n_classes + predicted]
    }
}

#[derive(Debug, Clone)]
/// Precision/recall statistics for a single class.
pub struct PerClassStats {
    /// `TP / (TP + FP)`.
    pub precision: f32,
    /// `TP / (TP + FN)`.
    pub recall: f32,
    /// Total number of true examples for the class.
    pub support: u32,
}

/// Compute per-class precision and recall from a confusion matrix.
pub fn precision_recall_by_class(cm: &ConfusionMatrix) -> Vec<PerClassStats> {
    let k = cm.n_classes;
    let mut stats = Vec::with_capacity(k);
    for class_idx in 0..k {
        let tp = cm.get(class_idx, class_idx) as f32;
        let mut fp = 0f32;
        let mut fn_ = 0f32;
        let mut support = 0u32;
        for j in 0..k {
            let v = cm.get(class_idx, j);
            support = support.saturating_add(v);
            if j != class_idx {
                fn_ += v as f32;
            }
        }
        for i in 0..k {
            if i != class_idx {
                fp += cm.get(i, class_idx) as f32;
            }
        }
        let precision = if tp + fp == 0.0 { 0.0 } else { tp / (tp + fp) };
        let recall = if tp + fn_ == 0.0 { 0.0 } else { tp / (tp + fn_) };
        stats.push(PerClassStats {
            precision,
            recall,
            support,
        });
    }
    stats
}

/// Compute overall accuracy from a confusion matrix.
pub fn accuracy(cm: &ConfusionMatrix) -> f32 {
    let mut correct = 0u64;
    let mut total = 0u64;
    for truth in 0..cm.n_classes {
        for predicted in 0..cm.n_classes {
            let v = cm.get(truth, predicted) as u64;
            total += v;
            if truth == predicted {
                correct += v;
            }
        }
    }
    if total == 0 {
        0.0
    } else {
        (correct as f32) / (total as f32)
    }
}

/// Area under the ROC curve via the rank-sum statistic, averaging tied scores.
///
/// Returns `None` unless both classes are present.
pub fn roc_auc(targets: &[u8], scores: &[f32]) -> Option<f64> {
    let n = targets.len().min(scores.len());
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]).then(a.cmp(&b)));

    let positives = targets[..n].iter().filter(|&&t| t == 1).count();
    let negatives = n - positives;
    if positives == 0 || negatives == 0 {
        return None;
    }

    let mut rank_sum = 0f64;
    let mut start = 0usize;
    while start < n {
        let mut end = start + 1;
        while end < n && scores[order[end]].total_cmp(&scores[order[start]]) == Ordering::Equal {
            end += 1;
        }
        // Ranks are 1-based; tied scores share the mean rank of their run.
        let mean_rank = (start + 1 + end) as f64 / 2.0;
        let tied_positives = order[start..end]
            .iter()
            .filter(|&&idx| targets[idx] == 1)
            .count();
        rank_sum += mean_rank * tied_positives as f64;
        start = end;
    }

    let p = positives as f64;
    let q = negatives as f64;
    Some((rank_sum - p * (p + 1.0) / 2.0) / (p * q))
}

/// Mean binary cross-entropy with probabilities clipped away from 0 and 1.
pub fn log_loss(targets: &[u8], probs: &[f32]) -> f64 {
    const EPS: f64 = 1e-15;
    let n = targets.len().min(probs.len());
    if n == 0 {
        return 0.0;
    }
    let total: f64 = targets
        .iter()
        .zip(probs)
        .map(|(&t, &p)| {
            let p = (p as f64).clamp(EPS, 1.0 - EPS);
            if t == 1 { -p.ln() } else { -(1.0 - p).ln() }
        })
        .sum();
    total / n as f64
}
