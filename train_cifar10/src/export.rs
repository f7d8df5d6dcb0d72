use cifar10::{CLASSES, Cifar10Data};
use image::{ImageBuffer, Rgb, RgbImage};
use ndarray::ArrayView3;
use std::path::{Path, PathBuf};

/// Converts a channel-first `(3, H, W)` image into an RGB buffer.
pub fn to_rgb_image(image: ArrayView3<u8>) -> RgbImage {
    let (_, height, width) = image.dim();
    ImageBuffer::from_fn(width as u32, height as u32, |x, y| {
        let (x, y) = (x as usize, y as usize);
        Rgb([image[[0, y, x]], image[[1, y, x]], image[[2, y, x]]])
    })
}

/// Writes sample `index` of `data` to `dir` as `{prefix}_image_{index}_{class}.png`.
///
/// Returns `Ok(None)` when `index` is past the end of the dataset.
pub fn save_image(
    data: &Cifar10Data,
    index: usize,
    prefix: &str,
    dir: &Path,
) -> Result<Option<PathBuf>, image::ImageError> {
    let (Some(image), Some(label)) = (data.image(index), data.label(index)) else {
        return Ok(None);
    };
    let class = CLASSES.get(label).copied().unwrap_or("unknown");
    let path = dir.join(format!("{prefix}_image_{index}_{class}.png"));
    to_rgb_image(image).save(&path)?;
    Ok(Some(path))
}
