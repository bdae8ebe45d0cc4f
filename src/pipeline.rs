//! End-to-end run: window tables, auxiliary joins, cross-validated training,
//! out-of-fold and ensemble predictions.
//!
//! Window tables and the model set are cached under the work directory, keyed
//! by a digest of their inputs, and reused on reruns while those inputs are
//! unchanged and the run does not force a rebuild.

use std::path::{Path, PathBuf};
use std::time::Instant;

use thiserror::Error;
use tracing::{info, warn};

use crate::auxiliary::{self, AuxError};
use crate::config::{ConfigError, PipelineConfig};
use crate::cv::{
    CvError, ModelSet, OofReport, predict_ensemble, predict_out_of_fold, train_group_kfold,
};
use crate::features::{
    self, F32leScoreDir, FeatureError, FeatureSet, FeatureTable, ScoreSource, check_columns,
};
use crate::labels::{GroundTruth, LabelError, ground_truth_digest, load_ground_truth};
use crate::ml::gbdt::{GbdtModel, GbdtTrainer};
use crate::predictions::{self, PredictionError};

pub const TRAIN_TABLE_DIR: &str = "train_table";
pub const TEST_TABLE_DIR: &str = "test_table";
pub const MODEL_SET_FILE: &str = "models.json";
pub const OOF_PREDICTIONS_FILE: &str = "presence_oof_train.jsonl";
pub const TEST_PREDICTIONS_FILE: &str = "presence_test.jsonl";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Feature(#[from] FeatureError),
    #[error(transparent)]
    Label(#[from] LabelError),
    #[error(transparent)]
    Aux(#[from] AuxError),
    #[error(transparent)]
    Cv(#[from] CvError),
    #[error(transparent)]
    Prediction(#[from] PredictionError),
}

/// Cache controls for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Rebuild window tables even when cached.
    pub force_features: bool,
    /// Retrain the fold models even when a model set is cached.
    pub force_retrain: bool,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub train_rows: usize,
    pub test_rows: usize,
    pub feature_columns: usize,
    pub retrained: bool,
    pub report: OofReport,
    pub oof_path: PathBuf,
    pub test_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Split {
    Train,
    Test,
}

impl Split {
    fn label(self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Test => "test",
        }
    }
}

pub fn run(config: &PipelineConfig, options: &RunOptions) -> Result<RunSummary, PipelineError> {
    let started = Instant::now();
    let set = config.feature_set()?;
    let work_dir = config.resolve_work_dir()?;
    let output_dir = config.resolve_output_dir(&work_dir)?;
    info!(
        "Work dir {}, output dir {}, {} window columns",
        work_dir.display(),
        output_dir.display(),
        set.width()
    );

    let truth = load_ground_truth(&config.labels.ground_truth)?;
    let truth_digest = ground_truth_digest(&config.labels.ground_truth)?;
    let train_videos = truth.video_ids();
    let test_videos = score_dirs(config, Split::Test)
        .first()
        .map(F32leScoreDir::video_ids)
        .transpose()?
        .unwrap_or_default();

    let mut train_table = window_table(
        config,
        &set,
        Split::Train,
        &train_videos,
        Some((&truth, truth_digest.as_str())),
        &work_dir.join(TRAIN_TABLE_DIR),
        options.force_features,
    )?;
    let mut test_table = window_table(
        config,
        &set,
        Split::Test,
        &test_videos,
        None,
        &work_dir.join(TEST_TABLE_DIR),
        options.force_features,
    )?;
    merge_auxiliary(config, Split::Train, &mut train_table)?;
    merge_auxiliary(config, Split::Test, &mut test_table)?;
    check_columns(train_table.columns(), test_table.columns())?;

    let models_path = work_dir.join(MODEL_SET_FILE);
    let (model_set, retrained) =
        model_set(config, &train_table, &models_path, options.force_retrain)?;

    let oof = predict_out_of_fold(&model_set, &train_table)?;
    let targets = train_table.targets().ok_or(CvError::MissingTargets)?;
    let report = OofReport::compute(targets, &oof);
    let test_preds = predict_ensemble(&model_set, &test_table)?;

    let oof_path = output_dir.join(OOF_PREDICTIONS_FILE);
    let test_path = output_dir.join(TEST_PREDICTIONS_FILE);
    predictions::write_predictions(&oof_path, &predictions::from_table(&train_table, &oof)?)?;
    predictions::write_predictions(
        &test_path,
        &predictions::from_table(&test_table, &test_preds)?,
    )?;
    info!(
        "Run finished in {:.1}s: OOF accuracy {:.5}, AUC {}",
        started.elapsed().as_secs_f64(),
        report.accuracy,
        report
            .roc_auc
            .map_or_else(|| "n/a".to_string(), |auc| format!("{auc:.5}"))
    );

    Ok(RunSummary {
        train_rows: train_table.len(),
        test_rows: test_table.len(),
        feature_columns: train_table.width(),
        retrained,
        report,
        oof_path,
        test_path,
    })
}

fn score_dirs(config: &PipelineConfig, split: Split) -> Vec<F32leScoreDir> {
    config
        .sources
        .iter()
        .map(|source| {
            let dir = match split {
                Split::Train => &source.train_dir,
                Split::Test => &source.test_dir,
            };
            F32leScoreDir::new(&source.name, dir, source.channels)
        })
        .collect()
}

/// Digest of everything a window table is built from: columns, frame-count
/// policy, labels and the score file of every video in every source.
fn table_inputs(
    set: &FeatureSet,
    dirs: &[F32leScoreDir],
    video_ids: &[String],
    labels: Option<(&str, usize)>,
) -> Result<String, PipelineError> {
    let mut hasher = blake3::Hasher::new();
    for column in set.columns() {
        hasher.update(column.as_bytes());
        hasher.update(b"\n");
    }
    hasher.update(format!("strict={}\n", set.window().strict_frame_counts).as_bytes());
    if let Some((truth_digest, dilation)) = labels {
        hasher.update(format!("truth={truth_digest}\ndilation={dilation}\n").as_bytes());
    }
    for video_id in video_ids {
        for dir in dirs {
            let stamp = dir.file_stamp(video_id)?;
            hasher.update(
                format!("{video_id}|{}|{}|{stamp}\n", dir.name(), dir.dir().display()).as_bytes(),
            );
        }
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// Load the cached window table for `split` when its inputs are unchanged,
/// or build and cache it.
fn window_table(
    config: &PipelineConfig,
    set: &FeatureSet,
    split: Split,
    video_ids: &[String],
    truth: Option<(&GroundTruth, &str)>,
    cache_dir: &Path,
    force: bool,
) -> Result<FeatureTable, PipelineError> {
    let dirs = score_dirs(config, split);
    let dilation = config.labels.dilation;
    let inputs = table_inputs(
        set,
        &dirs,
        video_ids,
        truth.map(|(_, digest)| (digest, dilation)),
    )?;
    let cached = if force {
        None
    } else {
        features::cached_inputs(cache_dir)?
    };
    if cached.as_deref() == Some(inputs.as_str()) {
        let table = features::load_table(cache_dir)?;
        check_columns(&set.columns(), table.columns())?;
        if table.is_labeled() != truth.is_some() {
            return Err(FeatureError::InvalidCache(format!(
                "{} table at {} has the wrong label state",
                split.label(),
                cache_dir.display()
            ))
            .into());
        }
        info!(
            "Reusing cached {} table ({} rows) from {}",
            split.label(),
            table.len(),
            cache_dir.display()
        );
        return Ok(table);
    }
    if !force && features::table_exists(cache_dir) {
        warn!(
            "Inputs of the cached {} table at {} changed; rebuilding",
            split.label(),
            cache_dir.display()
        );
    }

    let started = Instant::now();
    let sources: Vec<&dyn ScoreSource> = dirs.iter().map(|dir| dir as &dyn ScoreSource).collect();
    let labels = truth.map(|(truth, _)| (truth, dilation));
    let (table, report) = features::assemble_table(set, video_ids, &sources, labels)?;
    info!(
        "Built {} table: {} videos, {} rows, {} positives in {:.1}s",
        split.label(),
        report.videos,
        report.rows,
        report.positives,
        started.elapsed().as_secs_f64()
    );
    features::save_table(cache_dir, &table, &inputs)?;
    Ok(table)
}

fn merge_auxiliary(
    config: &PipelineConfig,
    split: Split,
    table: &mut FeatureTable,
) -> Result<(), PipelineError> {
    let aux = &config.aux;
    let (roi, vessel) = match split {
        Split::Train => (&aux.roi_train, &aux.vessel_train),
        Split::Test => (&aux.roi_test, &aux.vessel_test),
    };
    if let Some(path) = roi {
        let stats = auxiliary::load_region_stats(path, &aux.roi_columns)?;
        let merged = auxiliary::merge_region_stats(table, &stats)?;
        info!(
            "Joined region stats onto {} {} rows ({} unmatched)",
            merged.rows,
            split.label(),
            merged.unmatched_rows
        );
    }
    if let Some(path) = vessel {
        let ids = auxiliary::load_vessel_ids(path, &aux.vessel_column)?;
        let merged = auxiliary::merge_vessel_ids(table, &ids)?;
        info!(
            "Joined vessel ids onto {} {} rows ({} unmatched)",
            merged.rows,
            split.label(),
            merged.unmatched_rows
        );
    }
    Ok(())
}

/// Digest of the merged training table, fold settings and trainer settings.
fn model_inputs(config: &PipelineConfig, train_table: &FeatureTable) -> Result<String, PipelineError> {
    let trainer = serde_json::to_string(&config.trainer).map_err(CvError::from)?;
    let key = format!(
        "table={}\nfolds={}\nseed={}\ntrainer={trainer}\n",
        train_table.content_digest(),
        config.folds.count,
        config.folds.seed
    );
    Ok(blake3::hash(key.as_bytes()).to_hex().to_string())
}

/// Reuse the cached model set when it was trained from the same inputs,
/// otherwise train and cache one.
fn model_set(
    config: &PipelineConfig,
    train_table: &FeatureTable,
    path: &Path,
    force_retrain: bool,
) -> Result<(ModelSet<GbdtModel>, bool), PipelineError> {
    let inputs = model_inputs(config, train_table)?;
    if !force_retrain && path.is_file() {
        let cached: ModelSet<GbdtModel> = ModelSet::load_json(path)?;
        if cached.inputs() == Some(inputs.as_str()) {
            cached.ensure_columns(train_table.columns())?;
            info!(
                "Reusing {} cached fold models from {}",
                cached.len(),
                path.display()
            );
            return Ok((cached, false));
        }
        warn!(
            "Cached model set at {} was trained from different data or settings; retraining",
            path.display()
        );
    }

    info!("Training with {:?}", config.trainer);
    let trainer = GbdtTrainer::new(config.trainer.clone());
    let outcome = train_group_kfold(train_table, &config.folds, &trainer)?;
    let model_set = outcome.model_set.with_inputs(inputs);
    model_set.save_json(path)?;
    info!("Saved fold models to {}", path.display());
    Ok((model_set, true))
}
