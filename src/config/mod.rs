//! Pipeline configuration: score sources, window radius, labels, auxiliary
//! joins, folds and trainer hyperparameters, read from a TOML file.

mod defaults;
mod errors;
mod load;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::app_dirs;
use crate::cv::FoldOptions;
use crate::features::{FeatureSet, SourceSpec, WindowSpec};
use crate::ml::gbdt::TrainOptions;

use crate::labels::MAX_DILATION;
use defaults::{OUTPUT_SUBDIR, default_dilation, default_roi_columns, default_vessel_column};

pub use errors::ConfigError;
pub use load::{load_config, parse_config};

/// Top-level pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Cache directory for window tables and the model set.
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
    /// Directory receiving prediction tables (defaults to `<work_dir>/out`).
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    #[serde(default)]
    pub window: WindowSpec,
    pub sources: Vec<SourceSettings>,
    pub labels: LabelSettings,
    #[serde(default)]
    pub aux: AuxSettings,
    #[serde(default)]
    pub folds: FoldOptions,
    #[serde(default)]
    pub trainer: TrainOptions,
}

/// One upstream classifier and where its per-video scores live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSettings {
    pub name: String,
    pub train_dir: PathBuf,
    pub test_dir: PathBuf,
    pub channels: usize,
    pub no_object_channel: usize,
    #[serde(default)]
    pub channel_names: Option<Vec<String>>,
}

impl SourceSettings {
    pub fn spec(&self) -> SourceSpec {
        SourceSpec {
            name: self.name.clone(),
            channels: self.channels,
            no_object_channel: self.no_object_channel,
            channel_names: self.channel_names.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelSettings {
    /// Ground-truth JSONL with nullable object counts.
    pub ground_truth: PathBuf,
    /// Frames on each side that inherit a positive label (0 or 1).
    #[serde(default = "default_dilation")]
    pub dilation: usize,
}

/// Optional left-joined auxiliary tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuxSettings {
    #[serde(default)]
    pub roi_train: Option<PathBuf>,
    #[serde(default)]
    pub roi_test: Option<PathBuf>,
    #[serde(default)]
    pub vessel_train: Option<PathBuf>,
    #[serde(default)]
    pub vessel_test: Option<PathBuf>,
    #[serde(default = "default_roi_columns")]
    pub roi_columns: Vec<String>,
    #[serde(default = "default_vessel_column")]
    pub vessel_column: String,
}

impl Default for AuxSettings {
    fn default() -> Self {
        Self {
            roi_train: None,
            roi_test: None,
            vessel_train: None,
            vessel_test: None,
            roi_columns: default_roi_columns(),
            vessel_column: default_vessel_column(),
        }
    }
}

impl PipelineConfig {
    /// Frozen window layout over every configured source.
    pub fn feature_set(&self) -> Result<FeatureSet, ConfigError> {
        let specs = self.sources.iter().map(SourceSettings::spec).collect();
        Ok(FeatureSet::new(specs, self.window)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.feature_set()?;
        if self.labels.dilation > MAX_DILATION {
            return Err(ConfigError::invalid(
                "labels.dilation",
                format!("must be at most {MAX_DILATION}"),
            ));
        }
        if self.folds.count < 2 {
            return Err(ConfigError::invalid("folds.count", "must be at least 2"));
        }
        self.trainer
            .validate()
            .map_err(|message| ConfigError::invalid("trainer", message))?;
        if self.trainer.threads == 0 {
            return Err(ConfigError::invalid("trainer.threads", "must be at least 1"));
        }
        if self.aux.roi_columns.is_empty()
            && (self.aux.roi_train.is_some() || self.aux.roi_test.is_some())
        {
            return Err(ConfigError::invalid(
                "aux.roi_columns",
                "needs at least one column when ROI tables are configured",
            ));
        }
        let mut seen = std::collections::BTreeSet::new();
        for column in &self.aux.roi_columns {
            if !seen.insert(column.as_str()) {
                return Err(ConfigError::invalid(
                    "aux.roi_columns",
                    format!("duplicate column `{column}`"),
                ));
            }
        }
        Ok(())
    }

    /// Configured work directory, or the application default.
    pub fn resolve_work_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.work_dir {
            Some(dir) => ensure_dir(dir),
            None => app_dirs::work_dir().map_err(map_app_dir_error),
        }
    }

    /// Configured output directory, or `<work_dir>/out`.
    pub fn resolve_output_dir(&self, work_dir: &Path) -> Result<PathBuf, ConfigError> {
        match &self.output_dir {
            Some(dir) => ensure_dir(dir),
            None => ensure_dir(&work_dir.join(OUTPUT_SUBDIR)),
        }
    }

    /// Rebase every relative path onto `base`.
    pub(crate) fn rebase_paths(&mut self, base: &Path) {
        let rebase = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        for dir in [&mut self.work_dir, &mut self.output_dir]
            .into_iter()
            .flatten()
        {
            rebase(dir);
        }
        for source in &mut self.sources {
            rebase(&mut source.train_dir);
            rebase(&mut source.test_dir);
        }
        rebase(&mut self.labels.ground_truth);
        for path in [
            &mut self.aux.roi_train,
            &mut self.aux.roi_test,
            &mut self.aux.vessel_train,
            &mut self.aux.vessel_test,
        ]
        .into_iter()
        .flatten()
        {
            rebase(path);
        }
    }
}

fn ensure_dir(path: &Path) -> Result<PathBuf, ConfigError> {
    std::fs::create_dir_all(path).map_err(|source| ConfigError::CreateDir {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(path.to_path_buf())
}

fn map_app_dir_error(error: app_dirs::AppDirError) -> ConfigError {
    match error {
        app_dirs::AppDirError::NoBaseDir => ConfigError::NoWorkDir,
        app_dirs::AppDirError::CreateDir { path, source } => ConfigError::CreateDir { path, source },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[[sources]]
name = "resnet"
train_dir = "scores/resnet/train"
test_dir = "scores/resnet/test"
channels = 8
no_object_channel = 7

[labels]
ground_truth = "truth.jsonl"
"#;

    #[test]
    fn minimal_config_takes_defaults() {
        let config = parse_config(MINIMAL, Path::new("/data")).unwrap();
        assert_eq!(config.window, WindowSpec::default());
        assert_eq!(config.folds, FoldOptions { count: 5, seed: 42 });
        assert_eq!(config.trainer, TrainOptions::default());
        assert_eq!(config.labels.dilation, 1);
        assert_eq!(config.aux.vessel_column, "boat_id");
        assert_eq!(config.aux.roi_columns.len(), 4);
        assert_eq!(
            config.sources[0].train_dir,
            Path::new("/data").join("scores/resnet/train")
        );
        assert_eq!(config.labels.ground_truth, Path::new("/data").join("truth.jsonl"));
        assert_eq!(config.feature_set().unwrap().width(), 8 + 1 + 14);
    }

    #[test]
    fn overrides_are_read() {
        let text = format!(
            "{MINIMAL}\n[window]\nbackward = 2\nforward = 3\nstrict_frame_counts = false\n\n[folds]\ncount = 3\n\n[trainer]\nmax_depth = 6\nthreads = 2\n"
        );
        let config = parse_config(&text, Path::new("/data")).unwrap();
        assert_eq!(config.window.backward, 2);
        assert_eq!(config.window.forward, 3);
        assert!(!config.window.strict_frame_counts);
        assert_eq!(config.folds.count, 3);
        assert_eq!(config.folds.seed, 42);
        assert_eq!(config.trainer.max_depth, 6);
        assert_eq!(config.trainer.learning_rate, 0.1);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let bad_channel = MINIMAL.replace("no_object_channel = 7", "no_object_channel = 8");
        assert!(matches!(
            parse_config(&bad_channel, Path::new("/")).unwrap_err(),
            ConfigError::Features(_)
        ));
        let text = format!("{MINIMAL}\n[folds]\ncount = 1\n");
        assert!(matches!(
            parse_config(&text, Path::new("/")).unwrap_err(),
            ConfigError::Invalid { .. }
        ));
        let text = MINIMAL.replace(
            "ground_truth = \"truth.jsonl\"",
            "ground_truth = \"truth.jsonl\"\ndilation = 2",
        );
        assert!(parse_config(&text, Path::new("/")).is_err());
    }

    #[test]
    fn explicit_output_dir_wins() {
        let dir = tempfile::tempdir().unwrap();
        let text = format!(
            "work_dir = \"work\"\noutput_dir = \"predictions\"\n{MINIMAL}"
        );
        let config = parse_config(&text, dir.path()).unwrap();
        let work = config.resolve_work_dir().unwrap();
        assert_eq!(work, dir.path().join("work"));
        assert_eq!(
            config.resolve_output_dir(&work).unwrap(),
            dir.path().join("predictions")
        );
        assert!(dir.path().join("predictions").is_dir());
    }
}
