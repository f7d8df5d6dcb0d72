use crate::error::{NetworkError, Result};
use crate::layer::{Mode, ParamMut, expect_rank};
use ndarray::{Array1, Array2, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tensor::init::uniform;

/// Fully connected layer mapping `(N, in_features)` to `(N, out_features)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Linear {
    /// `(out_features, in_features)`
    weight: Array2<f32>,
    bias: Array1<f32>,
    #[serde(skip)]
    grad_weight: Array2<f32>,
    #[serde(skip)]
    grad_bias: Array1<f32>,
    #[serde(skip)]
    input: Option<Array2<f32>>,
}

impl Linear {
    pub const NAME: &'static str = "Linear";

    /// Weights and biases are drawn from `U(-1/sqrt(in), 1/sqrt(in))`.
    pub fn new<R: Rng + ?Sized>(in_features: usize, out_features: usize, rng: &mut R) -> Self {
        let bound = 1.0 / (in_features.max(1) as f32).sqrt();
        Self {
            weight: uniform((out_features, in_features), bound, rng),
            bias: uniform(out_features, bound, rng),
            grad_weight: Array2::zeros((out_features, in_features)),
            grad_bias: Array1::zeros(out_features),
            input: None,
        }
    }

    pub fn in_features(&self) -> usize {
        self.weight.ncols()
    }

    pub fn out_features(&self) -> usize {
        self.weight.nrows()
    }

    pub fn grad_weight(&self) -> &Array2<f32> {
        &self.grad_weight
    }

    pub fn param_count(&self) -> usize {
        self.weight.len() + self.bias.len()
    }

    fn check_features(&self, features: usize) -> Result<()> {
        if features != self.in_features() {
            return Err(NetworkError::ShapeMismatch {
                layer: Self::NAME,
                what: "input features",
                expected: self.in_features(),
                actual: features,
            });
        }
        Ok(())
    }

    pub fn forward(&mut self, input: Array2<f32>, mode: Mode) -> Result<Array2<f32>> {
        self.check_features(input.ncols())?;
        let output = input.dot(&self.weight.t()) + &self.bias;
        self.input = match mode {
            Mode::Train => Some(input),
            Mode::Eval => None,
        };
        Ok(output)
    }

    pub fn backward(&mut self, grad: Array2<f32>) -> Result<Array2<f32>> {
        let input = self
            .input
            .take()
            .ok_or(NetworkError::BackwardBeforeForward(Self::NAME))?;
        if grad.dim() != (input.nrows(), self.out_features()) {
            return Err(NetworkError::ShapeMismatch {
                layer: Self::NAME,
                what: "gradient elements",
                expected: input.nrows() * self.out_features(),
                actual: grad.len(),
            });
        }
        self.ensure_grads();
        self.grad_weight += &grad.t().dot(&input);
        self.grad_bias += &grad.sum_axis(Axis(0));
        Ok(grad.dot(&self.weight))
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
        expect_rank(Self::NAME, input, 2)?;
        self.check_features(input[1])?;
        Ok(vec![input[0], self.out_features()])
    }
}
