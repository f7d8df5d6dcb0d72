pub mod cifar10;
pub mod data_loader;
pub mod download;
pub mod transforms;

pub use crate::cifar10::*;
pub use crate::data_loader::{Batch, Batches, DataLoader};
pub use crate::download::download;
pub use crate::transforms::{CIFAR10_MEAN, CIFAR10_STD, ChannelStats, Compose, Transform};
