use tracing::{debug, info, warn};

use crate::labels::GroundTruth;

use super::set::{FeatureSet, MISSING_SENTINEL};
use super::source::{ScoreMatrix, ScoreSource};
use super::table::{FeatureTable, FrameKey};
use super::FeatureError;

/// Window rows for a single video.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoRows {
    /// Declared video length (frame count of the first source).
    pub frames: usize,
    /// Row-major `frames x set.width()`.
    pub values: Vec<f32>,
    /// `(frame, source)` pairs with no score entry, filled with the sentinel.
    pub missing_score_frames: usize,
}

/// Counters gathered while assembling a table across videos.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssemblyReport {
    pub videos: usize,
    pub rows: usize,
    pub positives: usize,
    pub missing_score_frames: usize,
    pub annotations_out_of_range: usize,
}

/// Write one frame's window row into `out` (length `set.width()`).
///
/// Each source is bounded by its own frame count; any offset before frame 0 or at
/// or past that count yields [`MISSING_SENTINEL`].
pub fn fill_frame_row(set: &FeatureSet, matrices: &[ScoreMatrix], frame: usize, out: &mut [f32]) {
    debug_assert_eq!(out.len(), set.width());
    let window = set.window();
    let mut pos = 0usize;
    for (spec, matrix) in set.sources().iter().zip(matrices) {
        let no_object = spec.no_object_channel;
        match matrix.row(frame) {
            Some(row) => {
                out[pos..pos + spec.channels].copy_from_slice(row);
                out[pos + spec.channels] = row[no_object];
            }
            None => out[pos..=pos + spec.channels].fill(MISSING_SENTINEL),
        }
        pos += spec.channels + 1;
        for j in 1..=window.backward {
            out[pos] = frame
                .checked_sub(j)
                .and_then(|prev| matrix.value(prev, no_object))
                .unwrap_or(MISSING_SENTINEL);
            pos += 1;
        }
        for j in 1..=window.forward {
            out[pos] = frame
                .checked_add(j)
                .and_then(|next| matrix.value(next, no_object))
                .unwrap_or(MISSING_SENTINEL);
            pos += 1;
        }
    }
}

/// Build every window row for one video from its per-source score matrices.
///
/// `matrices` must be in the same order as `set.sources()`.
pub fn build_video_rows(
    set: &FeatureSet,
    video_id: &str,
    matrices: &[ScoreMatrix],
) -> Result<VideoRows, FeatureError> {
    if matrices.len() != set.sources().len() {
        return Err(FeatureError::SourceCountMismatch {
            expected: set.sources().len(),
            found: matrices.len(),
        });
    }
    for (spec, matrix) in set.sources().iter().zip(matrices) {
        if matrix.channels() != spec.channels && matrix.frames() > 0 {
            return Err(FeatureError::ChannelCountMismatch {
                video_id: video_id.to_string(),
                source_name: spec.name.clone(),
                expected: spec.channels,
                found: matrix.channels(),
            });
        }
    }

    let frames = matrices[0].frames();
    let mut missing_score_frames = 0usize;
    for (spec, matrix) in set.sources().iter().zip(matrices).skip(1) {
        if matrix.frames() == frames {
            continue;
        }
        if set.window().strict_frame_counts {
            return Err(FeatureError::FrameCountMismatch {
                video_id: video_id.to_string(),
                source_name: spec.name.clone(),
                expected: frames,
                found: matrix.frames(),
            });
        }
        let missing = frames.saturating_sub(matrix.frames());
        warn!(
            "Video {video_id}: source {} has {} frames, declared length {frames}; {missing} frames without scores",
            spec.name,
            matrix.frames()
        );
        missing_score_frames += missing;
    }

    let width = set.width();
    let mut values = vec![0.0f32; frames * width];
    for (frame, out) in values.chunks_exact_mut(width).enumerate() {
        fill_frame_row(set, matrices, frame, out);
    }
    Ok(VideoRows {
        frames,
        values,
        missing_score_frames,
    })
}

/// Build a feature table for `video_ids`, one video at a time, concatenated in order.
///
/// With `labels`, each row carries the dilated presence target for its frame.
pub fn assemble_table(
    set: &FeatureSet,
    video_ids: &[String],
    sources: &[&dyn ScoreSource],
    labels: Option<(&GroundTruth, usize)>,
) -> Result<(FeatureTable, AssemblyReport), FeatureError> {
    if sources.len() != set.sources().len() {
        return Err(FeatureError::SourceCountMismatch {
            expected: set.sources().len(),
            found: sources.len(),
        });
    }
    for (idx, (spec, source)) in set.sources().iter().zip(sources).enumerate() {
        if spec.name != source.name() {
            return Err(FeatureError::ColumnMismatch {
                detail: format!(
                    "score source {idx} is `{}` (expected `{}`)",
                    source.name(),
                    spec.name
                ),
            });
        }
    }

    let mut table = FeatureTable::new(set.columns(), labels.is_some());
    let mut report = AssemblyReport::default();
    for video_id in video_ids {
        let matrices = sources
            .iter()
            .map(|source| source.scores(video_id))
            .collect::<Result<Vec<_>, _>>()?;
        let rows = build_video_rows(set, video_id, &matrices)?;
        let targets = labels.map(|(truth, dilation)| {
            let (targets, out_of_range) = truth.video_labels(video_id, rows.frames, dilation);
            report.annotations_out_of_range += out_of_range;
            targets
        });
        let width = set.width();
        for frame in 0..rows.frames {
            let target = targets.as_ref().map(|t| t[frame]);
            report.positives += usize::from(target == Some(1));
            table.push_row(
                FrameKey::new(video_id.clone(), frame as u32),
                &rows.values[frame * width..(frame + 1) * width],
                target,
            )?;
        }
        debug!("Built {} window rows for {video_id}", rows.frames);
        report.videos += 1;
        report.rows += rows.frames;
        report.missing_score_frames += rows.missing_score_frames;
    }
    if report.annotations_out_of_range > 0 {
        warn!(
            "{} annotated frames fall outside their video's score range",
            report.annotations_out_of_range
        );
    }
    info!(
        "Assembled {} rows x {} columns from {} videos",
        report.rows,
        set.width(),
        report.videos
    );
    Ok((table, report))
}
