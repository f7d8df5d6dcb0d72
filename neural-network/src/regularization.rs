use ndarray::{ArrayViewD, ArrayViewMutD, Zip};
use serde::{Deserialize, Serialize};

/// Weight penalty folded into the gradient by the optimizer.
///
/// `L2` is what SGD's `weight_decay` means: `f(w) = (rate / 2) * sum(w^2)`
/// with gradient `rate * w`. `L1` uses `rate * sum(|w|)` with gradient
/// `rate * sign(w)`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum RegularizationType {
    L1,
    #[default]
    L2,
}

impl RegularizationType {
    /// Penalty term for one parameter tensor.
    pub fn penalty(&self, weights: ArrayViewD<f32>, rate: f32) -> f32 {
        match self {
            RegularizationType::L1 => weights.iter().map(|w| w.abs()).sum::<f32>() * rate,
            RegularizationType::L2 => weights.iter().map(|w| w * w).sum::<f32>() * (rate / 2.0),
        }
    }

    /// Adds the penalty gradient for `weights` into `grad`.
    pub fn accumulate_gradient(&self, mut grad: ArrayViewMutD<f32>, weights: ArrayViewD<f32>, rate: f32) {
        if rate == 0.0 {
            return;
        }
        let zip = Zip::from(&mut grad).and(&weights);
        match self {
            RegularizationType::L1 => zip.for_each(|g, &w| {
                if w != 0.0 {
                    *g += rate * w.signum();
                }
            }),
            RegularizationType::L2 => zip.for_each(|g, &w| *g += rate * w),
        }
    }
}
