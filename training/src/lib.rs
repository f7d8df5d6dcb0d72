//! Training and evaluation loops for image classifiers on CIFAR-10.
mod checkpoint;
mod error;
mod metrics;
mod training;
mod training_config;
mod training_history;

pub use checkpoint::Checkpoint;
pub use error::{Result, TrainingError};
pub use metrics::{EpochMetrics, RunningMetrics};
pub use training::Trainer;
pub use training_config::{CheckpointConfig, TrainingConfig};
pub use training_history::TrainingHistory;

pub mod prelude {
    pub use crate::Checkpoint;
    pub use crate::Trainer;
    pub use crate::TrainingConfig;
    pub use crate::TrainingHistory;
}
