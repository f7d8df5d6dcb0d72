use crate::error::{NetworkError, Result};
use crate::layer::{Mode, expect_rank};
use ndarray::parallel::prelude::*;
use ndarray::{Array2, Array4, Axis, Zip};
use serde::{Deserialize, Serialize};
use tensor::conv_output_size;

/// Max pooling over non-padded square windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaxPool2d {
    kernel: usize,
    stride: usize,
    /// Input shape and, per output element, the flat input offset within its
    /// `(H, W)` plane that won the max
    #[serde(skip)]
    switches: Option<((usize, usize, usize, usize), Array4<usize>)>,
}

impl MaxPool2d {
    pub const NAME: &'static str = "MaxPool2d";

    pub fn new(kernel: usize, stride: usize) -> Self {
        Self {
            kernel,
            stride,
            switches: None,
        }
    }

    pub fn kernel(&self) -> usize {
        self.kernel
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    fn output_size(&self, height: usize, width: usize) -> Result<(usize, usize)> {
        conv_output_size(height, width, self.kernel, self.stride, 0).ok_or(
            NetworkError::KernelTooLarge {
                layer: Self::NAME,
                kernel: self.kernel,
                height,
                width,
            },
        )
    }

    pub fn forward(&mut self, input: Array4<f32>, mode: Mode) -> Result<Array4<f32>> {
        let (batch, channels, height, width) = input.dim();
        let (out_h, out_w) = self.output_size(height, width)?;
        let (kernel, stride) = (self.kernel, self.stride);

        let mut output = Array4::<f32>::zeros((batch, channels, out_h, out_w));
        let mut switches = Array4::<usize>::zeros((batch, channels, out_h, out_w));
        Zip::from(output.outer_iter_mut())
            .and(switches.outer_iter_mut())
            .and(input.outer_iter())
            .par_for_each(|mut out, mut arg, sample| {
                for c in 0..channels {
                    let plane = sample.index_axis(Axis(0), c);
                    for oy in 0..out_h {
                        for ox in 0..out_w {
                            let (mut best, mut best_at) = (f32::NEG_INFINITY, 0);
                            for ky in 0..kernel {
                                for kx in 0..kernel {
                                    let (y, x) = (oy * stride + ky, ox * stride + kx);
                                    let value = plane[[y, x]];
                                    if value > best || (ky == 0 && kx == 0) {
                                        best = value;
                                        best_at = y * width + x;
                                    }
                                }
                            }
                            out[[c, oy, ox]] = best;
                            arg[[c, oy, ox]] = best_at;
                        }
                    }
                }
            });

        self.switches = match mode {
            Mode::Train => Some((input.dim(), switches)),
            Mode::Eval => None,
        };
        Ok(output)
    }

    pub fn backward(&mut self, grad: Array4<f32>) -> Result<Array4<f32>> {
        let (input_dim, switches) = self
            .switches
            .take()
            .ok_or(NetworkError::BackwardBeforeForward(Self::NAME))?;
        if grad.dim() != switches.dim() {
            return Err(NetworkError::ShapeMismatch {
                layer: Self::NAME,
                what: "gradient elements",
                expected: switches.len(),
                actual: grad.len(),
            });
        }
        let width = input_dim.3;

        let mut grad_input = Array4::<f32>::zeros(input_dim);
        Zip::from(grad_input.outer_iter_mut())
            .and(grad.outer_iter())
            .and(switches.outer_iter())
            .par_for_each(|mut dx, dy, arg| {
                Zip::indexed(dy).and(arg).for_each(|(c, _, _), &g, &at| {
                    dx[[c, at / width, at % width]] += g;
                });
            });
        Ok(grad_input)
    }

    pub fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        expect_rank(Self::NAME, input, 4)?;
        let (out_h, out_w) = self.output_size(input[2], input[3])?;
        Ok(vec![input[0], input[1], out_h, out_w])
    }
}

/// Collapses `(N, C, H, W)` into `(N, C * H * W)` in row-major order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Flatten {
    #[serde(skip)]
    input_dim: Option<(usize, usize, usize, usize)>,
}

impl Flatten {
    pub const NAME: &'static str = "Flatten";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn forward(&mut self, input: Array4<f32>, mode: Mode) -> Result<Array2<f32>> {
        let (batch, channels, height, width) = input.dim();
        self.input_dim = match mode {
            Mode::Train => Some(input.dim()),
            Mode::Eval => None,
        };
        let input = input.as_standard_layout().into_owned();
        Ok(input.into_shape_with_order((batch, channels * height * width))?)
    }

    pub fn backward(&mut self, grad: Array2<f32>) -> Result<Array4<f32>> {
        let dim = self
            .input_dim
            .take()
            .ok_or(NetworkError::BackwardBeforeForward(Self::NAME))?;
        let grad = grad.as_standard_layout().into_owned();
        Ok(grad.into_shape_with_order(dim)?)
    }

    pub fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        expect_rank(Self::NAME, input, 4)?;
        Ok(vec![input[0], input[1..].iter().product()])
    }
}
