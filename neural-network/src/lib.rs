//! Convolutional networks on `ndarray` tensors: layers, VGG configurations,
//! cross-entropy loss, SGD and a milestone learning-rate schedule.
pub mod activations;
pub mod batch_norm;
pub mod conv;
pub mod dropout;
pub mod error;
pub mod layer;
pub mod linear;
pub mod loss;
pub mod lr_scheduler;
pub mod network;
pub mod network_config;
pub mod optimizer;
pub mod pooling;
pub mod regularization;
pub mod summary;

pub use error::{NetworkError, Result};
pub use layer::{Layer, Mode, ParamMut};
pub use loss::CrossEntropyLoss;
pub use lr_scheduler::MultiStepLr;
pub use network::Network;
pub use network_config::{FeatureSpec, NetworkConfig, VggDepth};
pub use optimizer::{Optimizer, Sgd, SgdConfig};
pub use regularization::RegularizationType;
pub use summary::{LayerSummary, NetworkSummary};
