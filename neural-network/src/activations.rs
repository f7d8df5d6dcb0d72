use crate::error::{NetworkError, Result};
use crate::layer::Mode;
use ndarray::{ArrayD, Zip};
use serde::{Deserialize, Serialize};

/// Rectified linear unit, `max(0, x)`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReLU {
    /// Where the training input was positive
    #[serde(skip)]
    active: Option<ArrayD<bool>>,
}

impl ReLU {
    pub const NAME: &'static str = "ReLU";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn forward(&mut self, input: ArrayD<f32>, mode: Mode) -> ArrayD<f32> {
        self.active = match mode {
            Mode::Train => Some(input.mapv(|x| x > 0.0)),
            Mode::Eval => None,
        };
        input.mapv_into(|x| x.max(0.0))
    }

    pub fn backward(&mut self, mut grad: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let active = self
            .active
            .take()
            .ok_or(NetworkError::BackwardBeforeForward(Self::NAME))?;
        if grad.shape() != active.shape() {
            return Err(NetworkError::ShapeMismatch {
                layer: Self::NAME,
                what: "gradient elements",
                expected: active.len(),
                actual: grad.len(),
            });
        }
        Zip::from(&mut grad).and(&active).for_each(|g, &on| {
            if !on {
                *g = 0.0;
            }
        });
        Ok(grad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_relu_forward_backward() {
        let mut relu = ReLU::new();
        let input = array![[-1.0_f32, 0.0, 2.0], [3.0, -0.5, 0.1]].into_dyn();

        let output = relu.forward(input, Mode::Train);
        assert_eq!(output, array![[0.0, 0.0, 2.0], [3.0, 0.0, 0.1]].into_dyn());

        let grad = relu
            .backward(array![[1.0, 1.0, 1.0], [2.0, 2.0, 2.0]].into_dyn())
            .unwrap();
        assert_eq!(grad, array![[0.0, 0.0, 1.0], [2.0, 0.0, 2.0]].into_dyn());
    }

    #[test]
    fn test_relu_backward_without_forward() {
        let mut relu = ReLU::new();
        assert!(matches!(
            relu.backward(array![1.0_f32].into_dyn()),
            Err(NetworkError::BackwardBeforeForward("ReLU"))
        ));
    }
}
