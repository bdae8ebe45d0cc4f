use std::collections::BTreeMap;

use frame_presence::cv::{
    FoldOptions, ModelSet, predict_ensemble, predict_out_of_fold, train_group_kfold,
};
use frame_presence::features::{
    FeatureSet, InMemoryScores, MISSING_SENTINEL, ScoreMatrix, ScoreSource, SourceSpec,
    WindowSpec, assemble_table,
};
use frame_presence::labels::{GroundTruth, GroundTruthRecord};
use frame_presence::ml::gbdt::{GbdtTrainer, TrainOptions};

const SOURCES: [&str; 3] = ["densenet", "resnet", "inception"];

fn scores(video: usize, frames: usize, source: usize) -> ScoreMatrix {
    let rows: Vec<Vec<f32>> = (0..frames)
        .map(|frame| {
            (0..8)
                .map(|channel| ((video * 7 + frame * 3 + channel + source) % 10) as f32 / 10.0)
                .collect()
        })
        .collect();
    ScoreMatrix::from_rows(&rows).unwrap()
}

fn in_memory(videos: usize, frames: usize) -> Vec<InMemoryScores> {
    SOURCES
        .iter()
        .enumerate()
        .map(|(source_idx, name)| {
            let mut source = InMemoryScores::new(*name);
            for video in 0..videos {
                source.insert(format!("v{video}"), scores(video, frames, source_idx));
            }
            source
        })
        .collect()
}

fn feature_set(radius: usize) -> FeatureSet {
    let specs = SOURCES
        .iter()
        .map(|name| SourceSpec::new(*name, 8, 7))
        .collect();
    FeatureSet::new(specs, WindowSpec::symmetric(radius)).unwrap()
}

#[test]
fn twenty_frame_video_with_three_sources() {
    let set = feature_set(2);
    let sources = in_memory(1, 20);
    let refs: Vec<&dyn ScoreSource> = sources.iter().map(|s| s as &dyn ScoreSource).collect();
    let (table, report) = assemble_table(&set, &["v0".to_string()], &refs, None).unwrap();

    assert_eq!(table.len(), 20);
    assert_eq!(table.width(), 39);
    assert_eq!(report.rows, 20);
    for (source_idx, name) in SOURCES.iter().enumerate() {
        let matrix = scores(0, 20, source_idx);
        for j in 1..=2 {
            assert_eq!(
                table.value(0, &format!("{name}_no_object_prev_{j}")),
                Some(MISSING_SENTINEL)
            );
            assert_eq!(
                table.value(0, &format!("{name}_no_object_next_{j}")),
                matrix.value(j, 7)
            );
            assert_eq!(
                table.value(19, &format!("{name}_no_object_next_{j}")),
                Some(MISSING_SENTINEL)
            );
        }
        assert_eq!(table.value(0, &format!("{name}_c3")), matrix.value(0, 3));
    }
}

fn labeled_table(videos: usize, frames: usize) -> frame_presence::features::FeatureTable {
    let set = feature_set(1);
    let sources = in_memory(videos, frames);
    let refs: Vec<&dyn ScoreSource> = sources.iter().map(|s| s as &dyn ScoreSource).collect();
    let records = (0..videos).flat_map(|video| {
        (0..frames as u32).map(move |frame| GroundTruthRecord {
            video_id: format!("v{video}"),
            frame,
            fish_number: ((frame as usize + video) % 5 == 0).then_some(1.0),
        })
    });
    let truth = GroundTruth::from_records(records);
    let ids: Vec<String> = (0..videos).map(|v| format!("v{v}")).collect();
    assemble_table(&set, &ids, &refs, Some((&truth, 1))).unwrap().0
}

fn small_trainer() -> GbdtTrainer {
    GbdtTrainer::new(TrainOptions {
        max_rounds: 30,
        early_stopping_rounds: 5,
        max_depth: 3,
        threads: 2,
        ..TrainOptions::default()
    })
}

#[test]
fn out_of_fold_covers_every_row_once_without_group_leakage() {
    let table = labeled_table(10, 12);
    let outcome = train_group_kfold(&table, &FoldOptions::default(), &small_trainer()).unwrap();

    assert_eq!(outcome.oof.len(), table.len());
    assert!(outcome.oof.iter().all(|p| (0.0..=1.0).contains(p)));

    let assignment = outcome.model_set.assignment();
    let mut folds_per_video: BTreeMap<&str, usize> = BTreeMap::new();
    for fold in 0..assignment.count() {
        for video in assignment.held_out(fold) {
            *folds_per_video.entry(video).or_default() += 1;
        }
    }
    assert_eq!(folds_per_video.len(), 10);
    assert!(folds_per_video.values().all(|&count| count == 1));
    assert_eq!(
        outcome.folds.iter().map(|f| f.valid_rows).sum::<usize>(),
        table.len()
    );
    assert_eq!(outcome.report.rows, table.len());
}

#[test]
fn same_seed_gives_identical_assignment_and_predictions() {
    let table = labeled_table(10, 12);
    let a = train_group_kfold(&table, &FoldOptions::default(), &small_trainer()).unwrap();
    let b = train_group_kfold(&table, &FoldOptions::default(), &small_trainer()).unwrap();
    assert_eq!(a.model_set.assignment(), b.model_set.assignment());
    let bits = |v: &[f32]| v.iter().map(|p| p.to_bits()).collect::<Vec<_>>();
    assert_eq!(bits(&a.oof), bits(&b.oof));
    assert_eq!(
        bits(&predict_out_of_fold(&a.model_set, &table).unwrap()),
        bits(&a.oof)
    );
}

#[test]
fn ensemble_ignores_model_order() {
    let table = labeled_table(10, 12);
    let outcome = train_group_kfold(&table, &FoldOptions::default(), &small_trainer()).unwrap();
    let set = outcome.model_set;
    let mut reversed = set.models().to_vec();
    reversed.reverse();
    let permuted = ModelSet::new(
        set.feature_columns().to_vec(),
        set.assignment().clone(),
        reversed,
    )
    .unwrap();

    let base = predict_ensemble(&set, &table).unwrap();
    let other = predict_ensemble(&permuted, &table).unwrap();
    let bits = |v: &[f32]| v.iter().map(|p| p.to_bits()).collect::<Vec<_>>();
    assert_eq!(bits(&base), bits(&other));
    assert!(base.iter().all(|p| (0.0..=1.0).contains(p)));
}
