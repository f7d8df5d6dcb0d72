//! Per-image preprocessing applied when batches are assembled.
//!
//! Images enter a [`Compose`] as raw `(3, H, W)` bytes and are scaled to
//! `[0, 1]` first, so every [`Transform`] works on `f32` pixels.

use crate::cifar10::{CHANNELS, Cifar10Data};
use ndarray::parallel::prelude::*;
use ndarray::{Array3, ArrayView3, Axis, s};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Per-channel mean of the CIFAR-10 training set.
pub const CIFAR10_MEAN: [f32; CHANNELS] = [0.4914, 0.4822, 0.4465];
/// Per-channel standard deviation used to normalize CIFAR-10 inputs.
pub const CIFAR10_STD: [f32; CHANNELS] = [0.2023, 0.1994, 0.2010];

/// A single preprocessing step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Transform {
    /// Zero-pads every side by `padding`, then cuts a random `size` x `size` window
    RandomCrop { size: usize, padding: usize },
    /// Mirrors the image left to right with probability `p`
    RandomHorizontalFlip { p: f64 },
    /// `(x - mean[c]) / std[c]` for each channel `c`
    Normalize {
        mean: [f32; CHANNELS],
        std: [f32; CHANNELS],
    },
}

impl Transform {
    pub fn apply<R: Rng + ?Sized>(&self, image: Array3<f32>, rng: &mut R) -> Array3<f32> {
        match self {
            Transform::RandomCrop { size, padding } => random_crop(image, *size, *padding, rng),
            Transform::RandomHorizontalFlip { p } => {
                if rng.random_bool(p.clamp(0.0, 1.0)) {
                    image.slice(s![.., .., ..;-1]).to_owned()
                } else {
                    image
                }
            }
            Transform::Normalize { mean, std } => normalize(image, mean, std),
        }
    }
}

fn random_crop<R: Rng + ?Sized>(
    image: Array3<f32>,
    size: usize,
    padding: usize,
    rng: &mut R,
) -> Array3<f32> {
    let (_, height, width) = image.dim();
    let top = rng.random_range(0..=(height + 2 * padding).saturating_sub(size));
    let left = rng.random_range(0..=(width + 2 * padding).saturating_sub(size));
    crop_padded(image.view(), size, padding, top, left)
}

/// Cuts the `size` x `size` window at `(top, left)` out of `image` zero-padded
/// by `padding` on every side.
fn crop_padded(
    image: ArrayView3<f32>,
    size: usize,
    padding: usize,
    top: usize,
    left: usize,
) -> Array3<f32> {
    let (channels, height, width) = image.dim();
    // Window [top, top + size) in padded coordinates; copy the part that
    // overlaps the original image and leave the rest zero.
    let mut out = Array3::<f32>::zeros((channels, size, size));
    let src_y0 = top.saturating_sub(padding).min(height);
    let src_y1 = (top + size).saturating_sub(padding).min(height);
    let src_x0 = left.saturating_sub(padding).min(width);
    let src_x1 = (left + size).saturating_sub(padding).min(width);
    if src_y0 < src_y1 && src_x0 < src_x1 {
        let dst_y0 = src_y0 + padding - top;
        let dst_x0 = src_x0 + padding - left;
        out.slice_mut(s![
            ..,
            dst_y0..dst_y0 + (src_y1 - src_y0),
            dst_x0..dst_x0 + (src_x1 - src_x0)
        ])
        .assign(&image.slice(s![.., src_y0..src_y1, src_x0..src_x1]));
    }
    out
}

fn normalize(mut image: Array3<f32>, mean: &[f32; CHANNELS], std: &[f32; CHANNELS]) -> Array3<f32> {
    for (mut channel, (&m, &s)) in image
        .axis_iter_mut(Axis(0))
        .zip(mean.iter().zip(std.iter()))
    {
        channel.mapv_inplace(|x| (x - m) / s);
    }
    image
}

/// An ordered pipeline of [`Transform`]s preceded by the `u8 -> [0, 1]` scaling.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Compose {
    transforms: Vec<Transform>,
}

impl Compose {
    pub fn new(transforms: Vec<Transform>) -> Self {
        Self { transforms }
    }

    /// Augmenting pipeline for training: random crop with 4 pixels of
    /// padding, random horizontal flip, then normalization.
    pub fn cifar10_train() -> Self {
        Self::new(vec![
            Transform::RandomCrop {
                size: 32,
                padding: 4,
            },
            Transform::RandomHorizontalFlip { p: 0.5 },
            Transform::Normalize {
                mean: CIFAR10_MEAN,
                std: CIFAR10_STD,
            },
        ])
    }

    /// Deterministic pipeline for evaluation: normalization only.
    pub fn cifar10_test() -> Self {
        Self::new(vec![Transform::Normalize {
            mean: CIFAR10_MEAN,
            std: CIFAR10_STD,
        }])
    }

    pub fn transforms(&self) -> &[Transform] {
        &self.transforms
    }

    pub fn apply<R: Rng + ?Sized>(&self, image: ArrayView3<u8>, rng: &mut R) -> Array3<f32> {
        let scaled = image.mapv(|p| f32::from(p) / 255.0);
        self.transforms
            .iter()
            .fold(scaled, |img, transform| transform.apply(img, rng))
    }
}

/// Per-channel mean and standard deviation of a dataset in `[0, 1]` space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelStats {
    pub mean: [f64; CHANNELS],
    pub std: [f64; CHANNELS],
}

impl ChannelStats {
    /// Computes population statistics over every pixel of every image.
    pub fn compute(data: &Cifar10Data) -> Self {
        let images = data.images();
        let per_channel: Vec<(f64, f64)> = (0..CHANNELS)
            .into_par_iter()
            .map(|c| {
                let plane = images.index_axis(Axis(1), c);
                let count = plane.len().max(1) as f64;
                let (sum, sum_sq) = plane.iter().fold((0.0, 0.0), |(s, sq), &p| {
                    let v = f64::from(p) / 255.0;
                    (s + v, sq + v * v)
                });
                let mean = sum / count;
                (mean, (sum_sq / count - mean * mean).max(0.0).sqrt())
            })
            .collect();

        let mut stats = Self {
            mean: [0.0; CHANNELS],
            std: [0.0; CHANNELS],
        };
        for (c, (mean, std)) in per_channel.into_iter().enumerate() {
            stats.mean[c] = mean;
            stats.std[c] = std;
        }
        stats
    }
}
