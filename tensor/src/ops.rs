use ndarray::{Array2, Array3, ArrayView2, ArrayView3};

/// Spatial output size of a sliding window over an `height` x `width` plane.
///
/// Returns `None` when the stride is zero or the kernel does not fit inside
/// the padded input.
#[must_use]
pub fn conv_output_size(
    height: usize,
    width: usize,
    kernel: usize,
    stride: usize,
    padding: usize,
) -> Option<(usize, usize)> {
    if stride == 0 || kernel == 0 {
        return None;
    }
    let out_h = (height + 2 * padding).checked_sub(kernel)? / stride + 1;
    let out_w = (width + 2 * padding).checked_sub(kernel)? / stride + 1;
    Some((out_h, out_w))
}

/// Maps an output position and kernel offset back to an input coordinate,
/// or `None` if it lands in the zero padding.
#[inline(always)]
fn source_index(
    out: usize,
    offset: usize,
    stride: usize,
    padding: usize,
    limit: usize,
) -> Option<usize> {
    (out * stride + offset)
        .checked_sub(padding)
        .filter(|&idx| idx < limit)
}

/// Unfolds a `(C, H, W)` image into a `(C * k * k, OH * OW)` column matrix.
///
/// Row `(c * k + ki) * k + kj` holds the input value seen by kernel tap
/// `(c, ki, kj)` at every output position, so a convolution becomes a single
/// matrix product with the `(out_channels, C * k * k)` weight matrix.
///
/// Returns `None` if the kernel does not fit the padded input.
#[must_use]
pub fn im2col(
    input: ArrayView3<f32>,
    kernel: usize,
    stride: usize,
    padding: usize,
) -> Option<Array2<f32>> {
    let (channels, height, width) = input.dim();
    let (out_h, out_w) = conv_output_size(height, width, kernel, stride, padding)?;

    let mut cols = Array2::<f32>::zeros((channels * kernel * kernel, out_h * out_w));
    for c in 0..channels {
        for ki in 0..kernel {
            for kj in 0..kernel {
                let mut row = cols.row_mut((c * kernel + ki) * kernel + kj);
                for oy in 0..out_h {
                    let Some(iy) = source_index(oy, ki, stride, padding, height) else {
                        continue;
                    };
                    for ox in 0..out_w {
                        if let Some(ix) = source_index(ox, kj, stride, padding, width) {
                            row[oy * out_w + ox] = input[[c, iy, ix]];
                        }
                    }
                }
            }
        }
    }
    Some(cols)
}

/// Folds a column matrix produced by [`im2col`] back into a `(C, H, W)` image.
///
/// Values that [`im2col`] copied from the same input pixel are summed, which
/// makes this the adjoint used to route convolution gradients to the input.
/// Returns `None` under the same conditions as [`im2col`].
#[must_use]
pub fn col2im(
    cols: ArrayView2<f32>,
    shape: (usize, usize, usize),
    kernel: usize,
    stride: usize,
    padding: usize,
) -> Option<Array3<f32>> {
    let (channels, height, width) = shape;
    let (out_h, out_w) = conv_output_size(height, width, kernel, stride, padding)?;

    let mut image = Array3::<f32>::zeros(shape);
    for c in 0..channels {
        for ki in 0..kernel {
            for kj in 0..kernel {
                let row = cols.row((c * kernel + ki) * kernel + kj);
                for oy in 0..out_h {
                    let Some(iy) = source_index(oy, ki, stride, padding, height) else {
                        continue;
                    };
                    for ox in 0..out_w {
                        if let Some(ix) = source_index(ox, kj, stride, padding, width) {
                            image[[c, iy, ix]] += row[oy * out_w + ox];
                        }
                    }
                }
            }
        }
    }
    Some(image)
}

/// Index of the largest value in each row. Ties resolve to the first index.
#[must_use]
pub fn argmax_rows(scores: ArrayView2<f32>) -> Vec<usize> {
    scores
        .rows()
        .into_iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |(best_idx, best), (idx, &value)| {
                    if value > best { (idx, value) } else { (best_idx, best) }
                })
                .0
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{Array, array};

    #[test]
    fn test_conv_output_size_same_padding() {
        assert_eq!(conv_output_size(32, 32, 3, 1, 1), Some((32, 32)));
        assert_eq!(conv_output_size(32, 32, 2, 2, 0), Some((16, 16)));
        assert_eq!(conv_output_size(5, 7, 3, 2, 0), Some((2, 3)));
    }

    #[test]
    fn test_conv_output_size_kernel_too_large() {
        assert_eq!(conv_output_size(1, 1, 3, 1, 0), None);
        assert_eq!(conv_output_size(4, 4, 3, 0, 1), None);
        assert!(im2col(Array3::<f32>::zeros((1, 1, 1)).view(), 3, 1, 0).is_none());
    }

    #[test]
    fn test_im2col_without_padding() {
        let input = Array::from_shape_vec((1, 3, 3), (1..=9).map(|v| v as f32).collect()).unwrap();
        let cols = im2col(input.view(), 2, 1, 0).unwrap();

        assert_eq!(cols.dim(), (4, 4));
        // First output position sees the top-left 2x2 window.
        assert_eq!(cols.column(0).to_vec(), vec![1.0, 2.0, 4.0, 5.0]);
        // Last output position sees the bottom-right 2x2 window.
        assert_eq!(cols.column(3).to_vec(), vec![5.0, 6.0, 8.0, 9.0]);
    }

    #[test]
    fn test_im2col_zero_padding() {
        let input = array![[[1.0_f32, 2.0], [3.0, 4.0]]];
        let cols = im2col(input.view(), 3, 1, 1).unwrap();

        assert_eq!(cols.dim(), (9, 4));
        // Centre tap reproduces the input.
        assert_eq!(cols.row(4).to_vec(), vec![1.0, 2.0, 3.0, 4.0]);
        // Top-left tap only sees the input at the bottom-right output.
        assert_eq!(cols.row(0).to_vec(), vec![0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_col2im_is_adjoint_of_im2col() {
        let input = Array::from_shape_fn((2, 4, 5), |(c, y, x)| (c * 20 + y * 5 + x) as f32 * 0.1);
        let cols = im2col(input.view(), 3, 2, 1).unwrap();
        let upstream = Array::from_shape_fn(cols.raw_dim(), |(r, c)| ((r * 7 + c * 3) % 11) as f32 - 5.0);

        let lhs: f32 = (&cols * &upstream).sum();
        let folded = col2im(upstream.view(), (2, 4, 5), 3, 2, 1).unwrap();
        let rhs: f32 = (&input * &folded).sum();

        assert_relative_eq!(lhs, rhs, epsilon = 1e-3, max_relative = 1e-5);
    }

    #[test]
    fn test_col2im_sums_overlapping_windows() {
        let cols = Array2::<f32>::ones((4, 4));
        let image = col2im(cols.view(), (1, 3, 3), 2, 1, 0).unwrap();

        // The centre pixel is covered by all four 2x2 windows.
        assert_eq!(image[[0, 1, 1]], 4.0);
        assert_eq!(image[[0, 0, 0]], 1.0);
        assert_eq!(image[[0, 0, 1]], 2.0);
    }

    #[test]
    fn test_argmax_rows() {
        let scores = array![[0.1_f32, 0.9, 0.0], [2.0, -1.0, 2.0], [-3.0, -2.0, -1.0]];
        assert_eq!(argmax_rows(scores.view()), vec![1, 0, 2]);
    }
}
