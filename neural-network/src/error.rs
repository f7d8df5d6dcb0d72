use thiserror::Error;

/// Result type used throughout the network crate.
pub type Result<T> = std::result::Result<T, NetworkError>;

/// Errors raised while building, running or persisting a network.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// A layer received a tensor with the wrong number of dimensions
    #[error("{layer}: expected a rank-{expected} input, got shape {actual:?}")]
    RankMismatch {
        layer: &'static str,
        expected: usize,
        actual: Vec<usize>,
    },
    /// A layer received a tensor whose size along one axis is wrong
    #[error("{layer}: expected {expected} {what}, got {actual}")]
    ShapeMismatch {
        layer: &'static str,
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    /// A sliding window does not fit the (padded) input plane
    #[error("{layer}: kernel {kernel} does not fit a {height}x{width} input")]
    KernelTooLarge {
        layer: &'static str,
        kernel: usize,
        height: usize,
        width: usize,
    },
    /// Batch statistics cannot be computed from a single value per channel
    #[error("{layer}: expected more than 1 value per channel when training, got {values}")]
    InsufficientBatch { layer: &'static str, values: usize },
    /// `backward` was called without a preceding forward pass in training mode
    #[error("{0}: backward called without a cached training forward pass")]
    BackwardBeforeForward(&'static str),
    /// The network description cannot be turned into layers
    #[error("Invalid network configuration: {0}")]
    InvalidConfig(String),
    /// A class index is outside the range of the output layer
    #[error("Invalid target {target} for {classes} classes")]
    InvalidTarget { target: usize, classes: usize },
    /// Logits and targets disagree on the batch size
    #[error("Batch mismatch: {logits} rows of logits but {targets} targets")]
    BatchMismatch { logits: usize, targets: usize },
    #[error("Shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
