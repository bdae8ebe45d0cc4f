//! Developer utility to score a predictions file against ground truth.

use std::collections::BTreeMap;
use std::path::PathBuf;

use frame_presence::labels::{MAX_DILATION, load_ground_truth};
use frame_presence::ml::metrics::{
    ConfusionMatrix, accuracy, log_loss, precision_recall_by_class, roc_auc,
};
use frame_presence::predictions::{FramePrediction, load_predictions};

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

#[derive(Debug, Clone)]
struct CliOptions {
    predictions_path: PathBuf,
    truth_path: PathBuf,
    dilation: usize,
    threshold: f32,
}

fn run() -> Result<(), String> {
    let options = parse_args(std::env::args().skip(1).collect())?;
    let predictions = load_predictions(&options.predictions_path).map_err(|err| err.to_string())?;
    let truth = load_ground_truth(&options.truth_path).map_err(|err| err.to_string())?;

    let mut by_video: BTreeMap<&str, Vec<&FramePrediction>> = BTreeMap::new();
    for row in &predictions {
        by_video.entry(row.video_id.as_str()).or_default().push(row);
    }

    let mut targets = Vec::with_capacity(predictions.len());
    let mut probs = Vec::with_capacity(predictions.len());
    let mut skipped_videos = 0usize;
    for (video_id, rows) in &by_video {
        if !truth.contains_video(video_id) {
            skipped_videos += 1;
            continue;
        }
        let frames = rows.iter().map(|row| row.frame as usize + 1).max().unwrap_or(0);
        let (labels, _) = truth.video_labels(video_id, frames, options.dilation);
        for row in rows {
            targets.push(labels[row.frame as usize]);
            probs.push(row.prediction);
        }
    }
    if targets.is_empty() {
        return Err("No predictions overlap the ground truth".to_string());
    }

    let cm = ConfusionMatrix::from_probabilities(&targets, &probs, options.threshold);
    println!(
        "rows: {}  videos: {}  skipped videos: {}",
        targets.len(),
        by_video.len() - skipped_videos,
        skipped_videos
    );
    println!("accuracy@{:.2}: {:.5}", options.threshold, accuracy(&cm));
    match roc_auc(&targets, &probs) {
        Some(auc) => println!("roc auc: {auc:.5}"),
        None => println!("roc auc: n/a (single class)"),
    }
    println!("log loss: {:.5}", log_loss(&targets, &probs));
    for (idx, stats) in precision_recall_by_class(&cm).iter().enumerate() {
        let name = if idx == 1 { "present" } else { "absent" };
        println!(
            "{name:<8}  precision={:.3}  recall={:.3}  support={}",
            stats.precision, stats.recall, stats.support
        );
    }
    println!("confusion matrix (rows=true, cols=pred):");
    for truth_idx in 0..cm.n_classes {
        let mut row = String::new();
        for pred in 0..cm.n_classes {
            row.push_str(&format!("{:8}", cm.get(truth_idx, pred)));
        }
        println!("{row}");
    }
    Ok(())
}

fn parse_args(args: Vec<String>) -> Result<CliOptions, String> {
    let mut predictions_path: Option<PathBuf> = None;
    let mut truth_path: Option<PathBuf> = None;
    let mut dilation = 1usize;
    let mut threshold = 0.5f32;

    let mut idx = 0usize;
    while idx < args.len() {
        match args[idx].as_str() {
            "-h" | "--help" => return Err(help_text()),
            "--predictions" => {
                idx += 1;
                let value = args
                    .get(idx)
                    .ok_or_else(|| "--predictions requires a value".to_string())?;
                predictions_path = Some(PathBuf::from(value));
            }
            "--truth" => {
                idx += 1;
                let value = args
                    .get(idx)
                    .ok_or_else(|| "--truth requires a value".to_string())?;
                truth_path = Some(PathBuf::from(value));
            }
            "--dilation" => {
                idx += 1;
                let value = args
                    .get(idx)
                    .ok_or_else(|| "--dilation requires a value".to_string())?;
                dilation = value
                    .parse::<usize>()
                    .ok()
                    .filter(|radius| *radius <= MAX_DILATION)
                    .ok_or_else(|| {
                        format!("Invalid --dilation value: {value} (at most {MAX_DILATION})")
                    })?;
            }
            "--threshold" => {
                idx += 1;
                let value = args
                    .get(idx)
                    .ok_or_else(|| "--threshold requires a value".to_string())?;
                threshold = value
                    .parse::<f32>()
                    .ok()
                    .filter(|t| (0.0..=1.0).contains(t))
                    .ok_or_else(|| format!("Invalid --threshold value: {value}"))?;
            }
            unknown => return Err(format!("Unknown argument: {unknown}\n\n{}", help_text())),
        }
        idx += 1;
    }

    let predictions_path =
        predictions_path.ok_or_else(|| "--predictions is required".to_string())?;
    let truth_path = truth_path.ok_or_else(|| "--truth is required".to_string())?;
    Ok(CliOptions {
        predictions_path,
        truth_path,
        dilation,
        threshold,
    })
}

fn help_text() -> String {
    [
        "presence-eval",
        "",
        "Usage:",
        "  presence-eval --predictions <preds.jsonl> --truth <truth.jsonl> [options]",
        "",
        "Options:",
        "  --dilation <n>    Label dilation radius, 0 or 1 (default: 1).",
        "  --threshold <p>   Presence threshold, p > threshold (default: 0.5).",
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval_args(extra: &[&str]) -> Vec<String> {
        ["--predictions", "p.jsonl", "--truth", "t.jsonl"]
            .iter()
            .chain(extra)
            .map(|v| v.to_string())
            .collect()
    }

    #[test]
    fn dilation_is_bounded() {
        let parsed = parse_args(eval_args(&["--dilation", "0"])).unwrap();
        assert_eq!(parsed.dilation, 0);
        let err = parse_args(eval_args(&["--dilation", "18446744073709551615"])).unwrap_err();
        assert!(err.contains("Invalid --dilation"), "{err}");
        assert!(parse_args(eval_args(&["--dilation", "2"])).is_err());
    }

    #[test]
    fn threshold_must_be_a_probability() {
        assert!(parse_args(eval_args(&["--threshold", "1.5"])).is_err());
        let parsed = parse_args(eval_args(&["--threshold", "0.25"])).unwrap();
        assert_eq!(parsed.threshold, 0.25);
        assert_eq!(parsed.dilation, 1);
    }
}
