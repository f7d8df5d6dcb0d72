//! CIFAR-10 dataset loader.
//!
//! The binary distribution stores each image as one record of
//! [`RECORD_BYTES`] bytes: a label byte followed by the red, green and blue
//! planes of a 32x32 image, each in row-major order. Images are kept as raw
//! `u8` pixels in `(N, 3, 32, 32)` layout and only converted to floats by the
//! transforms when a batch is assembled.

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::info;
use ndarray::{Array4, ArrayView3, Axis, concatenate};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CHANNELS: usize = 3;
pub const HEIGHT: usize = 32;
pub const WIDTH: usize = 32;
pub const IMAGE_BYTES: usize = CHANNELS * HEIGHT * WIDTH;
pub const RECORD_BYTES: usize = IMAGE_BYTES + 1;
pub const NUM_CLASSES: usize = 10;

/// Directory the binary archive unpacks into.
pub const BATCHES_DIR: &str = "cifar-10-batches-bin";
pub const TRAIN_FILES: [&str; 5] = [
    "data_batch_1.bin",
    "data_batch_2.bin",
    "data_batch_3.bin",
    "data_batch_4.bin",
    "data_batch_5.bin",
];
pub const TEST_FILE: &str = "test_batch.bin";

/// Class names in label order.
pub const CLASSES: [&str; NUM_CLASSES] = [
    "plane", "car", "bird", "cat", "deer", "dog", "frog", "horse", "ship", "truck",
];

/// Errors that can occur while fetching or reading CIFAR-10 data
#[derive(Debug, Error)]
pub enum Cifar10Error {
    /// Wrapper for standard I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// The archive could not be fetched
    #[error("Download failed: {0}")]
    Download(#[from] reqwest::Error),
    /// A batch file is not a whole number of records
    #[error(
        "Invalid file size for {}: {len} bytes is not a positive multiple of {}",
        path.display(),
        RECORD_BYTES
    )]
    InvalidFileSize { path: PathBuf, len: usize },
    /// A record carries a label outside `0..10`
    #[error("Invalid label {label} at record {index}")]
    InvalidLabel { label: usize, index: usize },
    /// Error for mismatches between images and labels
    #[error("Data mismatch: {0}")]
    DataMismatch(String),
    /// The dataset directory or one of its files does not exist
    #[error("Missing CIFAR-10 data at {}", .0.display())]
    MissingData(PathBuf),
    #[error("Batch size must be positive")]
    InvalidBatchSize,
}

/// Images and labels of one CIFAR-10 split.
#[derive(Debug, Clone)]
pub struct Cifar10Data {
    images: Array4<u8>,
    labels: Vec<usize>,
}

impl Cifar10Data {
    /// Pairs `(N, 3, 32, 32)` images with their labels.
    ///
    /// # Example
    /// ```
    /// use cifar10::Cifar10Data;
    /// use ndarray::Array4;
    ///
    /// let data = Cifar10Data::new(Array4::zeros((2, 3, 32, 32)), vec![0, 9]).unwrap();
    /// assert_eq!(data.len(), 2);
    /// ```
    pub fn new(images: Array4<u8>, labels: Vec<usize>) -> Result<Self, Cifar10Error> {
        let (count, channels, height, width) = images.dim();
        if count != labels.len() {
            return Err(Cifar10Error::DataMismatch(format!(
                "Number of images ({}) does not match number of labels ({})",
                count,
                labels.len()
            )));
        }
        if (channels, height, width) != (CHANNELS, HEIGHT, WIDTH) {
            return Err(Cifar10Error::DataMismatch(format!(
                "Expected {CHANNELS}x{HEIGHT}x{WIDTH} images, got {channels}x{height}x{width}"
            )));
        }
        if let Some((index, &label)) = labels.iter().enumerate().find(|(_, l)| **l >= NUM_CLASSES) {
            return Err(Cifar10Error::InvalidLabel { label, index });
        }
        Ok(Self { images, labels })
    }

    /// Joins several splits (e.g. the five training batches) into one.
    pub fn concat(parts: Vec<Cifar10Data>) -> Result<Self, Cifar10Error> {
        let views: Vec<_> = parts.iter().map(|p| p.images.view()).collect();
        let images = concatenate(Axis(0), &views).map_err(|e| {
            Cifar10Error::DataMismatch(format!("Cannot concatenate batches: {e}"))
        })?;
        let labels = parts.into_iter().flat_map(|p| p.labels).collect();
        Self::new(images, labels)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn images(&self) -> &Array4<u8> {
        &self.images
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// The `(3, 32, 32)` pixels of image `index`.
    pub fn image(&self, index: usize) -> Option<ArrayView3<'_, u8>> {
        (index < self.len()).then(|| self.images.index_axis(Axis(0), index))
    }

    pub fn label(&self, index: usize) -> Option<usize> {
        self.labels.get(index).copied()
    }

    /// Number of images per class.
    pub fn class_counts(&self) -> [usize; NUM_CLASSES] {
        let mut counts = [0; NUM_CLASSES];
        for &label in &self.labels {
            if let Some(count) = counts.get_mut(label) {
                *count += 1;
            }
        }
        counts
    }
}

/// Creates a progress bar style shared by the loaders.
pub(crate) fn create_progress_style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-")
}

/// Reads one CIFAR-10 binary batch file.
///
/// # Arguments
/// * `path` - Path to a `data_batch_*.bin` or `test_batch.bin` file
/// * `progress` - Progress bar advanced once per record
///
/// # Errors
/// * [`Cifar10Error::InvalidFileSize`] if the file is empty or not a whole
///   number of records
/// * [`Cifar10Error::InvalidLabel`] if a label byte is 10 or more
pub fn read_batch_file(
    path: impl AsRef<Path>,
    progress: &ProgressBar,
) -> Result<Cifar10Data, Cifar10Error> {
    let path = path.as_ref();
    let bytes = fs::read(path)?;
    if bytes.is_empty() || bytes.len() % RECORD_BYTES != 0 {
        return Err(Cifar10Error::InvalidFileSize {
            path: path.to_path_buf(),
            len: bytes.len(),
        });
    }

    let count = bytes.len() / RECORD_BYTES;
    progress.set_length(count as u64);
    progress.set_message(format!("Loading {}", path.display()));

    let mut labels = Vec::with_capacity(count);
    let mut pixels = Vec::with_capacity(count * IMAGE_BYTES);
    for (index, record) in bytes.chunks_exact(RECORD_BYTES).enumerate() {
        let (label, image) = record.split_at(1);
        let label = usize::from(label[0]);
        if label >= NUM_CLASSES {
            return Err(Cifar10Error::InvalidLabel { label, index });
        }
        labels.push(label);
        pixels.extend_from_slice(image);
        progress.inc(1);
    }

    let images = Array4::from_shape_vec((count, CHANNELS, HEIGHT, WIDTH), pixels)
        .map_err(|e| Cifar10Error::DataMismatch(e.to_string()))?;
    progress.finish_with_message(format!("Loaded {count} images"));
    Cifar10Data::new(images, labels)
}

/// Directory holding the `.bin` batch files under `root`.
pub fn batches_dir(root: impl AsRef<Path>) -> PathBuf {
    root.as_ref().join(BATCHES_DIR)
}

/// Reads the given batch files under `root`, one progress bar per file.
fn load_batches(root: &Path, files: &[&str]) -> Result<Cifar10Data, Cifar10Error> {
    let dir = batches_dir(root);
    if !dir.is_dir() {
        return Err(Cifar10Error::MissingData(dir));
    }

    let multi_progress = MultiProgress::new();
    let style = create_progress_style(
        "{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}",
    );

    let mut parts = Vec::with_capacity(files.len());
    for file in files {
        let path = dir.join(file);
        if !path.is_file() {
            return Err(Cifar10Error::MissingData(path));
        }
        let progress = multi_progress.add(ProgressBar::new(0));
        progress.set_style(style.clone());
        parts.push(read_batch_file(&path, &progress)?);
    }

    let data = Cifar10Data::concat(parts)?;
    info!("Loaded {} images from {}", data.len(), dir.display());
    Ok(data)
}

/// Loads the 50 000 training images from `root`.
pub fn load_training_data(root: impl AsRef<Path>) -> Result<Cifar10Data, Cifar10Error> {
    load_batches(root.as_ref(), &TRAIN_FILES)
}

/// Loads the 10 000 test images from `root`.
pub fn load_test_data(root: impl AsRef<Path>) -> Result<Cifar10Data, Cifar10Error> {
    load_batches(root.as_ref(), &[TEST_FILE])
}
