use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use frame_presence::features::{F32leScoreDir, ScoreMatrix};

/// One synthetic upstream classifier.
#[derive(Debug, Clone, Copy)]
pub struct SourceLayout {
    pub name: &'static str,
    pub channels: usize,
    pub no_object_channel: usize,
}

/// Shape of a synthetic project on disk.
#[derive(Debug, Clone)]
pub struct ProjectLayout {
    pub train_videos: usize,
    pub test_videos: usize,
    pub frames: usize,
    pub sources: Vec<SourceLayout>,
    pub window: usize,
    pub folds: usize,
}

impl Default for ProjectLayout {
    fn default() -> Self {
        Self {
            train_videos: 8,
            test_videos: 2,
            frames: 30,
            sources: vec![
                SourceLayout {
                    name: "alpha",
                    channels: 4,
                    no_object_channel: 3,
                },
                SourceLayout {
                    name: "beta",
                    channels: 4,
                    no_object_channel: 3,
                },
            ],
            window: 2,
            folds: 4,
        }
    }
}

pub fn train_id(idx: usize) -> String {
    format!("train_{idx:02}")
}

pub fn test_id(idx: usize) -> String {
    format!("test_{idx:02}")
}

/// Deterministic value in `[0, 1)`.
pub fn noise(a: usize, b: usize, c: usize) -> f32 {
    let mixed = (a.wrapping_mul(73_856_093)) ^ (b.wrapping_mul(19_349_663)) ^ (c.wrapping_mul(83_492_791));
    (mixed % 1000) as f32 / 1000.0
}

/// Whether the object is visible in `frame` of video number `video`.
pub fn object_present(video: usize, frame: usize) -> bool {
    if video % 3 == 2 {
        return false;
    }
    let start = 5 + video % 4;
    (start..start + 10).contains(&frame)
}

/// Scores whose no-object channel tracks [`object_present`] with some noise.
pub fn synthetic_scores(video: usize, frames: usize, source: usize, layout: &SourceLayout) -> ScoreMatrix {
    let mut values = Vec::with_capacity(frames * layout.channels);
    for frame in 0..frames {
        for channel in 0..layout.channels {
            let n = noise(video * 31 + source, frame, channel);
            let value = if channel == layout.no_object_channel {
                if object_present(video, frame) {
                    0.1 + 0.3 * n
                } else {
                    0.6 + 0.4 * n
                }
            } else {
                n
            };
            values.push(value);
        }
    }
    ScoreMatrix::new(layout.channels, values).expect("consistent synthetic matrix")
}

/// Write scores, ground truth, auxiliary tables and a config under `root`.
///
/// Returns the config path.
pub fn write_project(root: &Path, layout: &ProjectLayout) -> PathBuf {
    for (source_idx, source) in layout.sources.iter().enumerate() {
        let train = F32leScoreDir::new(source.name, root.join("scores").join(source.name).join("train"), source.channels);
        let test = F32leScoreDir::new(source.name, root.join("scores").join(source.name).join("test"), source.channels);
        for video in 0..layout.train_videos {
            let matrix = synthetic_scores(video, layout.frames, source_idx, source);
            train.write_scores(&train_id(video), &matrix).unwrap();
        }
        for video in 0..layout.test_videos {
            let matrix = synthetic_scores(100 + video, layout.frames, source_idx, source);
            test.write_scores(&test_id(video), &matrix).unwrap();
        }
    }

    let mut truth = String::new();
    for video in 0..layout.train_videos {
        for frame in 0..layout.frames {
            let count = if object_present(video, frame) { "1" } else { "null" };
            writeln!(
                truth,
                r#"{{"video_id":"{}","frame":{frame},"fish_number":{count}}}"#,
                train_id(video)
            )
            .unwrap();
        }
    }
    fs::write(root.join("truth.jsonl"), truth).unwrap();

    let roi = |ids: Vec<String>| {
        let mut out = String::new();
        for (video, id) in ids.iter().enumerate() {
            // Frame 0 is never covered, so the join always has unmatched rows.
            for frame in 1..layout.frames {
                writeln!(
                    out,
                    r#"{{"video_id":"{id}","frame":{frame},"masks_mx":{:.3}}}"#,
                    noise(video, frame, 99)
                )
                .unwrap();
            }
        }
        out
    };
    fs::write(root.join("roi_train.jsonl"), roi((0..layout.train_videos).map(train_id).collect())).unwrap();
    fs::write(root.join("roi_test.jsonl"), roi((0..layout.test_videos).map(test_id).collect())).unwrap();

    let mut vessels = String::new();
    for video in 0..layout.train_videos.saturating_sub(1) {
        writeln!(vessels, r#"{{"video_id":"{}","boat_id":{}}}"#, train_id(video), video % 3).unwrap();
    }
    fs::write(root.join("vessel_train.jsonl"), vessels).unwrap();
    let mut vessels = String::new();
    for video in 0..layout.test_videos {
        writeln!(vessels, r#"{{"video_id":"{}","boat_id":{}}}"#, test_id(video), video % 3).unwrap();
    }
    fs::write(root.join("vessel_test.jsonl"), vessels).unwrap();

    let mut config = String::new();
    writeln!(config, "work_dir = \"work\"").unwrap();
    writeln!(config, "\n[window]\nbackward = {0}\nforward = {0}", layout.window).unwrap();
    for source in &layout.sources {
        writeln!(
            config,
            "\n[[sources]]\nname = \"{0}\"\ntrain_dir = \"scores/{0}/train\"\ntest_dir = \"scores/{0}/test\"\nchannels = {1}\nno_object_channel = {2}",
            source.name, source.channels, source.no_object_channel
        )
        .unwrap();
    }
    writeln!(config, "\n[labels]\nground_truth = \"truth.jsonl\"").unwrap();
    writeln!(
        config,
        "\n[aux]\nroi_train = \"roi_train.jsonl\"\nroi_test = \"roi_test.jsonl\"\nvessel_train = \"vessel_train.jsonl\"\nvessel_test = \"vessel_test.jsonl\"\nroi_columns = [\"masks_mx\"]"
    )
    .unwrap();
    writeln!(config, "\n[folds]\ncount = {}\nseed = 42", layout.folds).unwrap();
    writeln!(
        config,
        "\n[trainer]\nmax_rounds = 60\nearly_stopping_rounds = 10\nmax_depth = 3\nthreads = 2\nmin_child_weight = 0.5"
    )
    .unwrap();

    let path = root.join("presence.toml");
    fs::write(&path, config).unwrap();
    path
}
