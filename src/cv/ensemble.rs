//! Equal-weight averaging of every fold model over unseen rows.

use tracing::info;

use super::{CvError, ModelSet};
use crate::features::FeatureTable;
use crate::ml::BinaryClassifier;

/// Mean of per-model probabilities, independent of model order.
///
/// Values are sorted before an `f64` summation so any permutation of the same
/// inputs yields the same bits. The result is clamped to `[0, 1]`.
pub fn average_probabilities(probs: &mut [f32]) -> f32 {
    if probs.is_empty() {
        return f32::NAN;
    }
    probs.sort_by(f32::total_cmp);
    let sum: f64 = probs.iter().map(|&p| p as f64).sum();
    ((sum / probs.len() as f64) as f32).clamp(0.0, 1.0)
}

/// Apply all `K` models to every row of `table` and average with equal weight.
pub fn predict_ensemble<M: BinaryClassifier>(
    model_set: &ModelSet<M>,
    table: &FeatureTable,
) -> Result<Vec<f32>, CvError> {
    model_set.ensure_columns(table.columns())?;
    let mut scratch = vec![0f32; model_set.len()];
    let predictions = (0..table.len())
        .map(|idx| {
            let row = table.row(idx);
            for (slot, model) in scratch.iter_mut().zip(model_set.models()) {
                *slot = model.predict_proba(row);
            }
            average_probabilities(&mut scratch)
        })
        .collect::<Vec<_>>();
    info!(
        "Ensembled {} models over {} rows",
        model_set.len(),
        predictions.len()
    );
    Ok(predictions)
}
