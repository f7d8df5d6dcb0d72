use crate::error::{NetworkError, Result};
use crate::layer::Mode;
use ndarray::ArrayD;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Inverted dropout: during training each element is zeroed with probability
/// `p` and survivors are scaled by `1 / (1 - p)`. Evaluation is the identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dropout {
    p: f32,
    #[serde(skip)]
    mask: Option<ArrayD<f32>>,
}

impl Dropout {
    pub const NAME: &'static str = "Dropout";

    pub fn new(p: f32) -> Self {
        Self { p, mask: None }
    }

    pub fn p(&self) -> f32 {
        self.p
    }

    pub fn forward(&mut self, input: ArrayD<f32>, mode: Mode) -> ArrayD<f32> {
        self.forward_with_rng(input, mode, &mut rand::rng())
    }

    pub fn forward_with_rng<R: Rng + ?Sized>(
        &mut self,
        input: ArrayD<f32>,
        mode: Mode,
        rng: &mut R,
    ) -> ArrayD<f32> {
        match mode {
            Mode::Eval => {
                self.mask = None;
                input
            }
            Mode::Train => {
                let keep = 1.0 - self.p;
                let scale = if keep > 0.0 { 1.0 / keep } else { 0.0 };
                let mask = input.mapv(|_| {
                    if rng.random::<f32>() < keep {
                        scale
                    } else {
                        0.0
                    }
                });
                let output = input * &mask;
                self.mask = Some(mask);
                output
            }
        }
    }

    pub fn backward(&mut self, grad: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let mask = self
            .mask
            .take()
            .ok_or(NetworkError::BackwardBeforeForward(Self::NAME))?;
        if grad.shape() != mask.shape() {
            return Err(NetworkError::ShapeMismatch {
                layer: Self::NAME,
                what: "gradient elements",
                expected: mask.len(),
                actual: grad.len(),
            });
        }
        Ok(grad * &mask)
    }
}
