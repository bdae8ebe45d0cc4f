//! Histogram gradient-boosted trees for binary presence classification.

mod model;
mod train;

pub use model::{GbdtModel, Node, Tree, sigmoid};
pub use train::{GbdtTrainer, TrainOptions, train_gbdt};
