use cifar10::Cifar10Error;
use neural_network::NetworkError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrainingError {
    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Data(#[from] Cifar10Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Error: no checkpoint directory found at {}", .0.display())]
    MissingCheckpointDir(PathBuf),

    #[error("Invalid training configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid training history: {0}")]
    InvalidHistory(String),
}

pub type Result<T> = std::result::Result<T, TrainingError>;
