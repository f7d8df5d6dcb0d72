//! Shared pieces of the CIFAR-10 command line tools.
pub mod evaluation;
pub mod export;

pub use evaluation::{ClassMetrics, ConfusionMatrix};
