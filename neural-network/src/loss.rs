use crate::error::{NetworkError, Result};
use ndarray::{Array2, ArrayView2, Axis};

/// Softmax cross-entropy over raw logits, averaged over the batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct CrossEntropyLoss;

impl CrossEntropyLoss {
    pub fn new() -> Self {
        Self
    }

    /// Returns the mean loss and its gradient w.r.t. `logits`.
    ///
    /// Each row is shifted by its maximum before exponentiation, so large
    /// logits do not overflow. The gradient is `(softmax - onehot) / N`.
    pub fn forward(&self, logits: ArrayView2<f32>, targets: &[usize]) -> Result<(f32, Array2<f32>)> {
        let (batch, classes) = logits.dim();
        if batch != targets.len() {
            return Err(NetworkError::BatchMismatch {
                logits: batch,
                targets: targets.len(),
            });
        }
        if let Some(&target) = targets.iter().find(|&&t| t >= classes) {
            return Err(NetworkError::InvalidTarget { target, classes });
        }
        if batch == 0 {
            return Ok((0.0, Array2::zeros((0, classes))));
        }

        let mut grad = logits.to_owned();
        let mut total = 0.0_f32;
        for (mut row, &target) in grad.axis_iter_mut(Axis(0)).zip(targets) {
            let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
            let target_logit = row[target];
            row.mapv_inplace(|v| (v - max).exp());
            let sum = row.sum();
            // -log softmax(target) = log(sum(exp(x - max))) + max - x[target]
            total += sum.ln() + max - target_logit;
            row /= sum;
            row[target] -= 1.0;
        }
        let n = batch as f32;
        grad /= n;
        Ok((total / n, grad))
    }
}
