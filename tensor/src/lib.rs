//! Numeric kernels shared by the network layers.
//!
//! Images are laid out channel-first (`(C, H, W)` per sample, `(N, C, H, W)`
//! per batch) and stored as `f32`.

pub mod init;
pub mod ops;

pub use ops::{argmax_rows, col2im, conv_output_size, im2col};
