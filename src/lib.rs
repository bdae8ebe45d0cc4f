//! Per-frame object presence from upstream classifier scores.
//!
//! Score matrices from several classifiers become fixed-width temporal window
//! rows, which a video-grouped K-fold boosted-tree ensemble turns into a
//! presence probability per frame.

/// Application directory helpers.
pub mod app_dirs;
/// Auxiliary per-frame and per-video joins.
pub mod auxiliary;
/// TOML pipeline configuration.
pub mod config;
/// Group-aware cross-validation and ensembling.
pub mod cv;
/// Temporal window feature assembly and table caching.
pub mod features;
/// Presence labels from ground-truth object counts.
pub mod labels;
/// Tracing subscriber setup.
pub mod logging;
/// Binary classifier contract, boosted trees and metrics.
pub mod ml;
/// End-to-end pipeline orchestration.
pub mod pipeline;
/// Persisted per-frame predictions.
pub mod predictions;
