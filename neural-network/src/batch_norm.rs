use crate::error::{NetworkError, Result};
use crate::layer::{Mode, ParamMut, expect_rank};
use ndarray::{Array1, Array4, ArrayView1, ArrayView4, Axis};
use serde::{Deserialize, Serialize};

const EPS: f32 = 1e-5;
const MOMENTUM: f32 = 0.1;

/// Values the backward pass needs from a training forward pass.
#[derive(Debug, Clone)]
struct BatchCache {
    normalized: Array4<f32>,
    inv_std: Array1<f32>,
}

/// Per-channel batch normalization for `(N, C, H, W)` inputs.
///
/// Training normalizes with the biased batch variance and folds the unbiased
/// variance into the running estimate with momentum 0.1. Evaluation uses the
/// running estimates only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchNorm2d {
    channels: usize,
    gamma: Array1<f32>,
    beta: Array1<f32>,
    running_mean: Array1<f32>,
    running_var: Array1<f32>,
    #[serde(skip)]
    grad_gamma: Array1<f32>,
    #[serde(skip)]
    grad_beta: Array1<f32>,
    #[serde(skip)]
    cache: Option<BatchCache>,
}

/// Broadcasts a per-channel vector against an `(N, C, H, W)` tensor.
fn per_channel(v: &Array1<f32>) -> ArrayView4<'_, f32> {
    v.view()
        .insert_axis(Axis(0))
        .insert_axis(Axis(2))
        .insert_axis(Axis(3))
}

/// Sums an `(N, C, H, W)` tensor down to one value per channel.
fn channel_sum(x: ArrayView4<f32>) -> Array1<f32> {
    x.sum_axis(Axis(3)).sum_axis(Axis(2)).sum_axis(Axis(0))
}

impl BatchNorm2d {
    pub const NAME: &'static str = "BatchNorm2d";

    pub fn new(channels: usize) -> Self {
        Self {
            channels,
            gamma: Array1::ones(channels),
            beta: Array1::zeros(channels),
            running_mean: Array1::zeros(channels),
            running_var: Array1::ones(channels),
            grad_gamma: Array1::zeros(channels),
            grad_beta: Array1::zeros(channels),
            cache: None,
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn running_mean(&self) -> ArrayView1<'_, f32> {
        self.running_mean.view()
    }

    pub fn running_var(&self) -> ArrayView1<'_, f32> {
        self.running_var.view()
    }

    pub fn param_count(&self) -> usize {
        self.gamma.len() + self.beta.len()
    }

    fn check_channels(&self, channels: usize) -> Result<()> {
        if channels != self.channels {
            return Err(NetworkError::ShapeMismatch {
                layer: Self::NAME,
                what: "channels",
                expected: self.channels,
                actual: channels,
            });
        }
        Ok(())
    }

    pub fn forward(&mut self, input: Array4<f32>, mode: Mode) -> Result<Array4<f32>> {
        let (batch, channels, height, width) = input.dim();
        self.check_channels(channels)?;

        match mode {
            Mode::Eval => {
                self.cache = None;
                let inv_std = self.running_var.mapv(|v| 1.0 / (v + EPS).sqrt());
                let scale = &self.gamma * &inv_std;
                let shift = &self.beta - &(&self.running_mean * &scale);
                Ok(input * &per_channel(&scale) + &per_channel(&shift))
            }
            Mode::Train => {
                let m = batch * height * width;
                if m <= 1 {
                    return Err(NetworkError::InsufficientBatch {
                        layer: Self::NAME,
                        values: m,
                    });
                }
                let count = m as f32;
                let mean = channel_sum(input.view()) / count;
                let centered = input - &per_channel(&mean);
                let var = channel_sum(centered.mapv(|v| v * v).view()) / count;
                let inv_std = var.mapv(|v| 1.0 / (v + EPS).sqrt());
                let normalized = centered * &per_channel(&inv_std);
                let output = &normalized * &per_channel(&self.gamma) + &per_channel(&self.beta);

                let unbiased = &var * (count / (count - 1.0));
                self.running_mean = &self.running_mean * (1.0 - MOMENTUM) + &(mean * MOMENTUM);
                self.running_var = &self.running_var * (1.0 - MOMENTUM) + &(unbiased * MOMENTUM);

                self.cache = Some(BatchCache { normalized, inv_std });
                Ok(output)
            }
        }
    }

    pub fn backward(&mut self, grad: Array4<f32>) -> Result<Array4<f32>> {
        let BatchCache { normalized, inv_std } = self
            .cache
            .take()
            .ok_or(NetworkError::BackwardBeforeForward(Self::NAME))?;
        if grad.dim() != normalized.dim() {
            return Err(NetworkError::ShapeMismatch {
                layer: Self::NAME,
                what: "gradient elements",
                expected: normalized.len(),
                actual: grad.len(),
            });
        }
        self.ensure_grads();

        let (batch, _, height, width) = grad.dim();
        let count = (batch * height * width) as f32;
        let sum_grad = channel_sum(grad.view());
        let sum_grad_norm = channel_sum((&grad * &normalized).view());

        self.grad_gamma += &sum_grad_norm;
        self.grad_beta += &sum_grad;

        // dx = gamma * inv_std / m * (m * dy - sum(dy) - x_hat * sum(dy * x_hat))
        let scale = &self.gamma * &inv_std / count;
        let grad_input = (grad * count - &per_channel(&sum_grad)
            - &(normalized * &per_channel(&sum_grad_norm)))
            * &per_channel(&scale);
        Ok(grad_input)
    }

    fn ensure_grads(&mut self) {
        if self.grad_gamma.len() != self.channels {
            self.grad_gamma = Array1::zeros(self.channels);
        }
        if self.grad_beta.len() != self.channels {
            self.grad_beta = Array1::zeros(self.channels);
        }
    }

    pub fn zero_grad(&mut self) {
        self.ensure_grads();
        self.grad_gamma.fill(0.0);
        self.grad_beta.fill(0.0);
    }

    pub fn visit_params_mut(&mut self, visitor: &mut dyn FnMut(ParamMut<'_>)) {
        self.ensure_grads();
        visitor(ParamMut {
            name: "weight",
            value: self.gamma.view_mut().into_dyn(),
            grad: self.grad_gamma.view().into_dyn(),
        });
        visitor(ParamMut {
            name: "bias",
            value: self.beta.view_mut().into_dyn(),
            grad: self.grad_beta.view().into_dyn(),
        });
    }

    pub fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        expect_rank(Self::NAME, input, 4)?;
        self.check_channels(input[1])?;
        Ok(input.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array;

    fn sample_input() -> Array4<f32> {
        Array::from_shape_fn((4, 2, 3, 3), |(n, c, y, x)| {
            ((n * 18 + c * 9 + y * 3 + x) as f32 * 0.7).sin() * (c as f32 + 1.0)
        })
    }

    #[test]
    fn test_training_output_is_normalized() {
        let mut bn = BatchNorm2d::new(2);
        let output = bn.forward(sample_input(), Mode::Train).unwrap();

        for c in 0..2 {
            let channel = output.index_axis(Axis(1), c);
            let mean = channel.mean().unwrap();
            let var = channel.mapv(|v| (v - mean).powi(2)).mean().unwrap();
            assert_relative_eq!(mean, 0.0, epsilon = 1e-5);
            assert_relative_eq!(var, 1.0, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_running_statistics_update() {
        let mut bn = BatchNorm2d::new(1);
        // Channel values 1..=4: mean 2.5, unbiased variance 5/3.
        let input = Array::from_shape_vec((2, 1, 1, 2), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        bn.forward(input, Mode::Train).unwrap();

        assert_relative_eq!(bn.running_mean()[0], 0.25, epsilon = 1e-6);
        assert_relative_eq!(bn.running_var()[0], 0.9 + 0.1 * 5.0 / 3.0, epsilon = 1e-6);
    }

    #[test]
    fn test_eval_uses_running_statistics() {
        let mut bn = BatchNorm2d::new(1);
        bn.running_mean.fill(2.0);
        bn.running_var.fill(4.0);
        let input = Array::from_elem((1, 1, 1, 1), 6.0);

        let output = bn.forward(input, Mode::Eval).unwrap();
        assert_relative_eq!(output[[0, 0, 0, 0]], 2.0, epsilon = 1e-4);
        assert!(bn.backward(Array4::ones((1, 1, 1, 1))).is_err());
    }

    #[test]
    fn test_single_value_per_channel_is_rejected_in_training() {
        let mut bn = BatchNorm2d::new(3);
        let result = bn.forward(Array4::ones((1, 3, 1, 1)), Mode::Train);
        assert!(matches!(
            result,
            Err(NetworkError::InsufficientBatch { values: 1, .. })
        ));
    }

    #[test]
    fn test_gradients_match_finite_differences() {
        let mut bn = BatchNorm2d::new(2);
        bn.gamma = ndarray::array![1.5, 0.5];
        bn.beta = ndarray::array![0.1, -0.2];
        let input = sample_input();
        let upstream = Array::from_shape_fn(input.raw_dim(), |(n, c, y, x)| {
            ((n + 3 * c + 5 * y + 7 * x) as f32 * 0.3).cos()
        });
        let loss = |bn: &mut BatchNorm2d, input: &Array4<f32>| -> f32 {
            let out = bn.forward(input.clone(), Mode::Train).unwrap();
            bn.cache = None;
            (out * &upstream).sum()
        };

        bn.forward(input.clone(), Mode::Train).unwrap();
        let grad_input = bn.backward(upstream.clone()).unwrap();
        let grad_gamma = bn.grad_gamma.clone();

        let eps = 1e-2;
        for &index in &[[0, 0, 0, 0], [1, 1, 2, 1], [3, 0, 1, 2]] {
            let mut shifted = input.clone();
            shifted[index] += eps;
            let plus = loss(&mut bn, &shifted);
            shifted[index] -= 2.0 * eps;
            let minus = loss(&mut bn, &shifted);
            let numeric = (plus - minus) / (2.0 * eps);
            assert_relative_eq!(grad_input[index], numeric, epsilon = 2e-2);
        }

        for c in 0..2 {
            let original = bn.gamma[c];
            bn.gamma[c] = original + eps;
            let plus = loss(&mut bn, &input);
            bn.gamma[c] = original - eps;
            let minus = loss(&mut bn, &input);
            bn.gamma[c] = original;
            let numeric = (plus - minus) / (2.0 * eps);
            assert_relative_eq!(grad_gamma[c], numeric, epsilon = 2e-2);
        }
    }

    #[test]
    fn test_running_statistics_survive_serialization() {
        let mut bn = BatchNorm2d::new(2);
        bn.forward(sample_input(), Mode::Train).unwrap();

        let json = serde_json::to_string(&bn).unwrap();
        let mut restored: BatchNorm2d = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.running_mean(), bn.running_mean());
        assert_eq!(restored.running_var(), bn.running_var());
        // Gradients are not persisted but come back sized to the layer.
        restored.zero_grad();
        assert_eq!(restored.grad_gamma.len(), 2);
    }
}
