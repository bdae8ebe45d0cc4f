//! Group-aware K-fold training with out-of-fold predictions.

use serde::Serialize;
use tracing::{debug, info};

use super::{CvError, FoldAssignment, FoldOptions, ModelSet};
use crate::features::FeatureTable;
use crate::ml::metrics::{ConfusionMatrix, accuracy, log_loss, roc_auc};
use crate::ml::{BinaryClassifier, BinaryTrainer, TrainDataset};

/// Number of most-used features logged per fold.
const IMPORTANCE_LOG_LIMIT: usize = 20;

/// Quality of a full out-of-fold prediction set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OofReport {
    pub rows: usize,
    pub positives: usize,
    /// Accuracy with `p > 0.5` predicting presence.
    pub accuracy: f64,
    /// `None` when the targets hold a single class.
    pub roc_auc: Option<f64>,
    pub log_loss: f64,
}

impl OofReport {
    /// Score predictions over the whole training set at once.
    pub fn compute(targets: &[u8], predictions: &[f32]) -> Self {
        let cm = ConfusionMatrix::from_probabilities(targets, predictions, 0.5);
        Self {
            rows: targets.len(),
            positives: targets.iter().filter(|&&t| t == 1).count(),
            accuracy: accuracy(&cm) as f64,
            roc_auc: roc_auc(targets, predictions),
            log_loss: log_loss(targets, predictions),
        }
    }
}

/// Training statistics for one fold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FoldReport {
    pub fold: usize,
    pub train_rows: usize,
    pub valid_rows: usize,
    pub best_iteration: Option<usize>,
    pub valid_auc: Option<f64>,
}

/// Result of a cross-validated training run.
#[derive(Debug)]
pub struct CvOutcome<M> {
    pub model_set: ModelSet<M>,
    /// One probability per table row, in table order.
    pub oof: Vec<f32>,
    pub report: OofReport,
    pub folds: Vec<FoldReport>,
}

/// Assign the table's videos to folds, then train one model per fold.
pub fn train_group_kfold<T: BinaryTrainer>(
    table: &FeatureTable,
    options: &FoldOptions,
    trainer: &T,
) -> Result<CvOutcome<T::Model>, CvError> {
    let videos = table.video_ids();
    let assignment = FoldAssignment::assign(videos.iter().map(String::as_str), options)?;
    info!(
        "Assigned {} videos to {} folds (seed {})",
        assignment.len(),
        assignment.count(),
        assignment.seed()
    );
    train_with_assignment(table, assignment, trainer)
}

/// Train model `i` on every row outside fold `i`, early-stopping on fold `i`.
pub fn train_with_assignment<T: BinaryTrainer>(
    table: &FeatureTable,
    assignment: FoldAssignment,
    trainer: &T,
) -> Result<CvOutcome<T::Model>, CvError> {
    assignment.validate()?;
    let targets = table.targets().ok_or(CvError::MissingTargets)?;
    let row_folds = row_folds(table, &assignment)?;

    let width = table.width();
    let mut oof = vec![f32::NAN; table.len()];
    let mut models = Vec::with_capacity(assignment.count());
    let mut folds = Vec::with_capacity(assignment.count());
    for fold in 0..assignment.count() {
        let mut train = TrainDataset::new(width);
        let mut valid = TrainDataset::new(width);
        let mut valid_rows = Vec::new();
        for (idx, &row_fold) in row_folds.iter().enumerate() {
            if row_fold == fold {
                valid.push(table.row(idx), targets[idx]);
                valid_rows.push(idx);
            } else {
                train.push(table.row(idx), targets[idx]);
            }
        }
        if valid.is_empty() {
            return Err(CvError::EmptyFold(fold));
        }
        info!(
            "Fold {}/{}: train {}x{}, valid {}x{}",
            fold + 1,
            assignment.count(),
            train.len(),
            width,
            valid.len(),
            width
        );

        let model = trainer
            .fit(&train, &valid)
            .map_err(|message| CvError::Trainer { fold, message })?;
        let mut fold_preds = Vec::with_capacity(valid_rows.len());
        for &idx in &valid_rows {
            let p = model.predict_proba(table.row(idx));
            oof[idx] = p;
            fold_preds.push(p);
        }
        let valid_auc = roc_auc(&valid.y, &fold_preds);
        info!(
            "Fold {} best iteration {:?}, valid AUC {}",
            fold + 1,
            model.best_iteration(),
            valid_auc.map_or_else(|| "n/a".to_string(), |auc| format!("{auc:.5}"))
        );
        log_importance(table.columns(), &model.feature_importance());

        folds.push(FoldReport {
            fold,
            train_rows: train.len(),
            valid_rows: valid.len(),
            best_iteration: model.best_iteration(),
            valid_auc,
        });
        models.push(model);
    }

    let report = OofReport::compute(targets, &oof);
    info!(
        "Out-of-fold over {} rows ({} positive): accuracy {:.5}, AUC {}, log-loss {:.5}",
        report.rows,
        report.positives,
        report.accuracy,
        report
            .roc_auc
            .map_or_else(|| "n/a".to_string(), |auc| format!("{auc:.5}")),
        report.log_loss
    );
    let model_set = ModelSet::new(table.columns().to_vec(), assignment, models)?;
    Ok(CvOutcome {
        model_set,
        oof,
        report,
        folds,
    })
}

/// Recompute out-of-fold predictions from a trained set and its stored assignment.
pub fn predict_out_of_fold<M: BinaryClassifier>(
    model_set: &ModelSet<M>,
    table: &FeatureTable,
) -> Result<Vec<f32>, CvError> {
    model_set.ensure_columns(table.columns())?;
    let row_folds = row_folds(table, model_set.assignment())?;
    let models = model_set.models();
    Ok(row_folds
        .iter()
        .enumerate()
        .map(|(idx, &fold)| models[fold].predict_proba(table.row(idx)))
        .collect())
}

fn row_folds(table: &FeatureTable, assignment: &FoldAssignment) -> Result<Vec<usize>, CvError> {
    table
        .keys()
        .iter()
        .map(|key| {
            assignment
                .fold_of(&key.video_id)
                .ok_or_else(|| CvError::UnassignedVideo(key.video_id.clone()))
        })
        .collect()
}

fn log_importance(columns: &[String], importance: &[u32]) {
    if importance.is_empty() {
        return;
    }
    let mut ranked: Vec<(&str, u32)> = columns
        .iter()
        .map(String::as_str)
        .zip(importance.iter().copied())
        .filter(|(_, count)| *count > 0)
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    let top = ranked
        .iter()
        .take(IMPORTANCE_LOG_LIMIT)
        .map(|(name, count)| format!("{name}={count}"))
        .collect::<Vec<_>>()
        .join(", ");
    info!("Split importance: {top}");
    debug!("{} of {} features used", ranked.len(), columns.len());
}
