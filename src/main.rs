//! Runs the frame presence pipeline from a TOML config.

use std::path::PathBuf;

use frame_presence::config::load_config;
use frame_presence::logging;
use frame_presence::pipeline::{self, RunOptions};

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

#[derive(Debug, Clone)]
struct CliOptions {
    config_path: PathBuf,
    log_dir: Option<PathBuf>,
    run: RunOptions,
}

fn run() -> Result<(), String> {
    let options = parse_args(std::env::args().skip(1).collect())?;
    if let Err(err) = logging::init(options.log_dir.as_deref()) {
        eprintln!("Logging disabled: {err}");
    }
    let config = load_config(&options.config_path).map_err(|err| err.to_string())?;
    let summary = pipeline::run(&config, &options.run).map_err(|err| err.to_string())?;

    println!(
        "train rows: {}  test rows: {}  columns: {}  retrained: {}",
        summary.train_rows, summary.test_rows, summary.feature_columns, summary.retrained
    );
    println!(
        "out-of-fold accuracy: {:.5}  auc: {}  log-loss: {:.5}",
        summary.report.accuracy,
        summary
            .report
            .roc_auc
            .map_or_else(|| "n/a".to_string(), |auc| format!("{auc:.5}")),
        summary.report.log_loss
    );
    println!("oof predictions: {}", summary.oof_path.display());
    println!("test predictions: {}", summary.test_path.display());
    Ok(())
}

fn parse_args(args: Vec<String>) -> Result<CliOptions, String> {
    let mut config_path: Option<PathBuf> = None;
    let mut log_dir: Option<PathBuf> = None;
    let mut run = RunOptions::default();

    let mut idx = 0usize;
    while idx < args.len() {
        match args[idx].as_str() {
            "-h" | "--help" => return Err(help_text()),
            "--config" => {
                idx += 1;
                let value = args
                    .get(idx)
                    .ok_or_else(|| "--config requires a value".to_string())?;
                config_path = Some(PathBuf::from(value));
            }
            "--log-dir" => {
                idx += 1;
                let value = args
                    .get(idx)
                    .ok_or_else(|| "--log-dir requires a value".to_string())?;
                log_dir = Some(PathBuf::from(value));
            }
            "--force-retrain" => run.force_retrain = true,
            "--force-features" => run.force_features = true,
            unknown => return Err(format!("Unknown argument: {unknown}\n\n{}", help_text())),
        }
        idx += 1;
    }

    let config_path = config_path.ok_or_else(|| "--config is required".to_string())?;
    Ok(CliOptions {
        config_path,
        log_dir,
        run,
    })
}

fn help_text() -> String {
    [
        "frame-presence",
        "",
        "Usage:",
        "  frame-presence --config <presence.toml> [options]",
        "",
        "Options:",
        "  --force-features  Rebuild cached window tables.",
        "  --force-retrain   Retrain fold models even if a model set is cached.",
        "  --log-dir <dir>   Write log files here instead of the app logs folder.",
    ]
    .join("\n")
}
