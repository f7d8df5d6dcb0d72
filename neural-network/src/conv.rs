//! 2-D convolution over `(N, C, H, W)` batches.
//!
//! Each sample is unfolded with [`im2col`] so the convolution becomes one
//! matrix product against the `(out_channels, in_channels * k * k)` weights.
//! Samples are processed in parallel on the rayon pool.
use crate::error::{NetworkError, Result};
use crate::layer::{Mode, ParamMut, expect_rank};
use ndarray::linalg::general_mat_mul;
use ndarray::parallel::prelude::*;
use ndarray::{Array1, Array2, Array3, Array4, ArrayView3, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tensor::init::kaiming_normal;
use tensor::{col2im, conv_output_size, im2col};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conv2d {
    in_channels: usize,
    out_channels: usize,
    kernel: usize,
    stride: usize,
    padding: usize,
    /// Flattened kernels, one row per output channel
    weight: Array2<f32>,
    bias: Array1<f32>,
    #[serde(skip)]
    grad_weight: Array2<f32>,
    #[serde(skip)]
    grad_bias: Array1<f32>,
    /// Input of the last training forward pass
    #[serde(skip)]
    input: Option<Array4<f32>>,
}

impl Conv2d {
    pub const NAME: &'static str = "Conv2d";

    /// Creates a square-kernel convolution.
    ///
    /// Weights are drawn from `N(0, sqrt(2 / n))` with `n = k * k * out_channels`
    /// and biases start at zero.
    pub fn new<R: Rng + ?Sized>(
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        stride: usize,
        padding: usize,
        rng: &mut R,
    ) -> Self {
        let fan_out = kernel * kernel * out_channels;
        let cols = in_channels * kernel * kernel;
        Self {
            in_channels,
            out_channels,
            kernel,
            stride,
            padding,
            weight: kaiming_normal((out_channels, cols), fan_out, rng),
            bias: Array1::zeros(out_channels),
            grad_weight: Array2::zeros((out_channels, cols)),
            grad_bias: Array1::zeros(out_channels),
            input: None,
        }
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    pub fn kernel(&self) -> usize {
        self.kernel
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn padding(&self) -> usize {
        self.padding
    }

    pub fn weight(&self) -> &Array2<f32> {
        &self.weight
    }

    pub fn grad_weight(&self) -> &Array2<f32> {
        &self.grad_weight
    }

    pub fn grad_bias(&self) -> &Array1<f32> {
        &self.grad_bias
    }

    pub fn param_count(&self) -> usize {
        self.weight.len() + self.bias.len()
    }

    fn output_size(&self, height: usize, width: usize) -> Result<(usize, usize)> {
        conv_output_size(height, width, self.kernel, self.stride, self.padding).ok_or(
            NetworkError::KernelTooLarge {
                layer: Self::NAME,
                kernel: self.kernel,
                height,
                width,
            },
        )
    }

    fn check_channels(&self, channels: usize) -> Result<()> {
        if channels != self.in_channels {
            return Err(NetworkError::ShapeMismatch {
                layer: Self::NAME,
                what: "input channels",
                expected: self.in_channels,
                actual: channels,
            });
        }
        Ok(())
    }

    fn unfold(&self, sample: ArrayView3<f32>) -> Result<Array2<f32>> {
        let (_, height, width) = sample.dim();
        im2col(sample, self.kernel, self.stride, self.padding).ok_or(NetworkError::KernelTooLarge {
            layer: Self::NAME,
            kernel: self.kernel,
            height,
            width,
        })
    }

    fn forward_sample(&self, sample: ArrayView3<f32>, out_h: usize, out_w: usize) -> Result<Array3<f32>> {
        let cols = self.unfold(sample)?;
        let mut out = self.weight.dot(&cols);
        out += &self.bias.view().insert_axis(Axis(1));
        Ok(out.into_shape_with_order((self.out_channels, out_h, out_w))?)
    }

    pub fn forward(&mut self, input: Array4<f32>, mode: Mode) -> Result<Array4<f32>> {
        let (batch, channels, height, width) = input.dim();
        self.check_channels(channels)?;
        let (out_h, out_w) = self.output_size(height, width)?;

        let mut output = Array4::<f32>::zeros((batch, self.out_channels, out_h, out_w));
        let layer = &*self;
        let samples = input
            .axis_iter(Axis(0))
            .into_par_iter()
            .map(|sample| layer.forward_sample(sample, out_h, out_w))
            .collect::<Result<Vec<_>>>()?;
        for (mut slot, sample) in output.outer_iter_mut().zip(samples) {
            slot.assign(&sample);
        }

        self.input = match mode {
            Mode::Train => Some(input),
            Mode::Eval => None,
        };
        Ok(output)
    }

    pub fn backward(&mut self, grad: Array4<f32>) -> Result<Array4<f32>> {
        let input = self
            .input
            .take()
            .ok_or(NetworkError::BackwardBeforeForward(Self::NAME))?;
        let (batch, channels, height, width) = input.dim();
        let (out_h, out_w) = self.output_size(height, width)?;
        if grad.dim() != (batch, self.out_channels, out_h, out_w) {
            return Err(NetworkError::ShapeMismatch {
                layer: Self::NAME,
                what: "gradient elements",
                expected: batch * self.out_channels * out_h * out_w,
                actual: grad.len(),
            });
        }

        self.ensure_grads();
        let positions = out_h * out_w;
        let weight_dim = self.weight.raw_dim();
        let zero = || {
            (
                Array2::<f32>::zeros(weight_dim),
                Array1::<f32>::zeros(self.out_channels),
                Vec::new(),
            )
        };

        let layer = &*self;
        let (grad_weight, grad_bias, mut input_grads) = input
            .axis_iter(Axis(0))
            .into_par_iter()
            .zip(grad.axis_iter(Axis(0)).into_par_iter())
            .enumerate()
            .try_fold(zero, |(mut dw, mut db, mut dx), (index, (sample, g))| {
                let cols = layer.unfold(sample)?;
                let g = g.to_shape((layer.out_channels, positions))?;
                general_mat_mul(1.0, &g, &cols.t(), 1.0, &mut dw);
                db += &g.sum_axis(Axis(1));

                let dcols = layer.weight.t().dot(&g);
                let image = col2im(
                    dcols.view(),
                    (channels, height, width),
                    layer.kernel,
                    layer.stride,
                    layer.padding,
                )
                .ok_or(NetworkError::KernelTooLarge {
                    layer: Self::NAME,
                    kernel: layer.kernel,
                    height,
                    width,
                })?;
                dx.push((index, image));
                Ok::<_, NetworkError>((dw, db, dx))
            })
            .try_reduce(zero, |(dw_a, db_a, mut dx_a), (dw_b, db_b, dx_b)| {
                dx_a.extend(dx_b);
                Ok((dw_a + dw_b, db_a + db_b, dx_a))
            })?;

        self.grad_weight += &grad_weight;
        self.grad_bias += &grad_bias;

        let mut grad_input = Array4::<f32>::zeros((batch, channels, height, width));
        input_grads.sort_unstable_by_key(|(index, _)| *index);
        for (mut slot, (_, image)) in grad_input.outer_iter_mut().zip(input_grads) {
            slot.assign(&image);
        }
        Ok(grad_input)
    }

    fn ensure_grads(&mut self) {
        if self.grad_weight.dim() != self.weight.dim() {
            self.grad_weight = Array2::zeros(self.weight.raw_dim());
        }
        if self.grad_bias.dim() != self.bias.dim() {
            self.grad_bias = Array1::zeros(self.bias.raw_dim());
        }
    }

    pub fn zero_grad(&mut self) {
        self.ensure_grads();
        self.grad_weight.fill(0.0);
        self.grad_bias.fill(0.0);
    }

    pub fn visit_params_mut(&mut self, visitor: &mut dyn FnMut(ParamMut<'_>)) {
        self.ensure_grads();
        visitor(ParamMut {
            name: "weight",
            value: self.weight.view_mut().into_dyn(),
            grad: self.grad_weight.view().into_dyn(),
        });
        visitor(ParamMut {
            name: "bias",
            value: self.bias.view_mut().into_dyn(),
            grad: self.grad_bias.view().into_dyn(),
        });
    }

    pub fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        expect_rank(Self::NAME, input, 4)?;
        self.check_channels(input[1])?;
        let (out_h, out_w) = self.output_size(input[2], input[3])?;
        Ok(vec![input[0], self.out_channels, out_h, out_w])
    }
}
