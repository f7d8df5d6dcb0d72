//! Defines the building blocks of the network and how a batch flows through them.
//!
//! Every layer caches what its backward pass needs during a [`Mode::Train`]
//! forward pass. In [`Mode::Eval`] nothing is cached, so evaluation does not
//! pay for activations it will never differentiate.
use crate::activations::ReLU;
use crate::batch_norm::BatchNorm2d;
use crate::conv::Conv2d;
use crate::dropout::Dropout;
use crate::error::{NetworkError, Result};
use crate::linear::Linear;
use crate::pooling::{Flatten, MaxPool2d};
use ndarray::{Array, ArrayD, ArrayViewD, ArrayViewMutD, Dimension};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether a forward pass is part of training or inference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// Batch statistics, dropout and gradient caching are active.
    #[default]
    Train,
    /// Running statistics are used and nothing is cached.
    Eval,
}

/// A trainable tensor handed to an optimizer, together with its gradient.
pub struct ParamMut<'a> {
    pub name: &'static str,
    pub value: ArrayViewMutD<'a, f32>,
    pub grad: ArrayViewD<'a, f32>,
}

/// A single layer of the network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Layer {
    Conv2d(Conv2d),
    BatchNorm2d(BatchNorm2d),
    ReLU(ReLU),
    MaxPool2d(MaxPool2d),
    Flatten(Flatten),
    Dropout(Dropout),
    Linear(Linear),
}

impl Layer {
    /// Short name used in summaries and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Layer::Conv2d(_) => "Conv2d",
            Layer::BatchNorm2d(_) => "BatchNorm2d",
            Layer::ReLU(_) => "ReLU",
            Layer::MaxPool2d(_) => "MaxPool2d",
            Layer::Flatten(_) => "Flatten",
            Layer::Dropout(_) => "Dropout",
            Layer::Linear(_) => "Linear",
        }
    }

    /// Runs the layer on `input`. Only dropout draws from `rng`.
    pub fn forward<R: Rng + ?Sized>(
        &mut self,
        input: ArrayD<f32>,
        mode: Mode,
        rng: &mut R,
    ) -> Result<ArrayD<f32>> {
        match self {
            Layer::Conv2d(l) => Ok(l.forward(into_rank(Conv2d::NAME, input)?, mode)?.into_dyn()),
            Layer::BatchNorm2d(l) => Ok(l.forward(into_rank(BatchNorm2d::NAME, input)?, mode)?.into_dyn()),
            Layer::ReLU(l) => Ok(l.forward(input, mode)),
            Layer::MaxPool2d(l) => Ok(l.forward(into_rank(MaxPool2d::NAME, input)?, mode)?.into_dyn()),
            Layer::Flatten(l) => Ok(l.forward(into_rank(Flatten::NAME, input)?, mode)?.into_dyn()),
            Layer::Dropout(l) => Ok(l.forward_with_rng(input, mode, rng)),
            Layer::Linear(l) => Ok(l.forward(into_rank(Linear::NAME, input)?, mode)?.into_dyn()),
        }
    }

    /// Propagates the loss gradient w.r.t. this layer's output back to its input,
    /// accumulating parameter gradients on the way.
    pub fn backward(&mut self, grad: ArrayD<f32>) -> Result<ArrayD<f32>> {
        match self {
            Layer::Conv2d(l) => Ok(l.backward(into_rank(Conv2d::NAME, grad)?)?.into_dyn()),
            Layer::BatchNorm2d(l) => Ok(l.backward(into_rank(BatchNorm2d::NAME, grad)?)?.into_dyn()),
            Layer::ReLU(l) => l.backward(grad),
            Layer::MaxPool2d(l) => Ok(l.backward(into_rank(MaxPool2d::NAME, grad)?)?.into_dyn()),
            Layer::Flatten(l) => Ok(l.backward(into_rank(Flatten::NAME, grad)?)?.into_dyn()),
            Layer::Dropout(l) => l.backward(grad),
            Layer::Linear(l) => Ok(l.backward(into_rank(Linear::NAME, grad)?)?.into_dyn()),
        }
    }

    /// Hands every trainable tensor of this layer to `visitor`, in a fixed order.
    pub fn visit_params_mut(&mut self, visitor: &mut dyn FnMut(ParamMut<'_>)) {
        match self {
            Layer::Conv2d(l) => l.visit_params_mut(visitor),
            Layer::BatchNorm2d(l) => l.visit_params_mut(visitor),
            Layer::Linear(l) => l.visit_params_mut(visitor),
            Layer::ReLU(_) | Layer::MaxPool2d(_) | Layer::Flatten(_) | Layer::Dropout(_) => {}
        }
    }

    pub fn zero_grad(&mut self) {
        match self {
            Layer::Conv2d(l) => l.zero_grad(),
            Layer::BatchNorm2d(l) => l.zero_grad(),
            Layer::Linear(l) => l.zero_grad(),
            Layer::ReLU(_) | Layer::MaxPool2d(_) | Layer::Flatten(_) | Layer::Dropout(_) => {}
        }
    }

    /// Output shape for a given input shape (batch dimension included).
    pub fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        match self {
            Layer::Conv2d(l) => l.output_shape(input),
            Layer::BatchNorm2d(l) => l.output_shape(input),
            Layer::MaxPool2d(l) => l.output_shape(input),
            Layer::Flatten(l) => l.output_shape(input),
            Layer::Linear(l) => l.output_shape(input),
            Layer::ReLU(_) | Layer::Dropout(_) => Ok(input.to_vec()),
        }
    }

    /// Number of trainable scalars.
    pub fn param_count(&self) -> usize {
        match self {
            Layer::Conv2d(l) => l.param_count(),
            Layer::BatchNorm2d(l) => l.param_count(),
            Layer::Linear(l) => l.param_count(),
            Layer::ReLU(_) | Layer::MaxPool2d(_) | Layer::Flatten(_) | Layer::Dropout(_) => 0,
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Layer::Conv2d(l) => write!(
                f,
                "Conv2d({}, {}, kernel_size={}, stride={}, padding={})",
                l.in_channels(),
                l.out_channels(),
                l.kernel(),
                l.stride(),
                l.padding()
            ),
            Layer::BatchNorm2d(l) => write!(f, "BatchNorm2d({})", l.channels()),
            Layer::ReLU(_) => write!(f, "ReLU()"),
            Layer::MaxPool2d(l) => {
                write!(f, "MaxPool2d(kernel_size={}, stride={})", l.kernel(), l.stride())
            }
            Layer::Flatten(_) => write!(f, "Flatten()"),
            Layer::Dropout(l) => write!(f, "Dropout(p={})", l.p()),
            Layer::Linear(l) => write!(
                f,
                "Linear(in_features={}, out_features={})",
                l.in_features(),
                l.out_features()
            ),
        }
    }
}

/// Converts a dynamic-rank tensor into the fixed rank a layer works with.
pub(crate) fn into_rank<D: Dimension>(layer: &'static str, input: ArrayD<f32>) -> Result<Array<f32, D>> {
    let actual = input.shape().to_vec();
    input
        .into_dimensionality::<D>()
        .map_err(|_| NetworkError::RankMismatch {
            layer,
            expected: D::NDIM.unwrap_or(actual.len()),
            actual,
        })
}

/// Checks that a shape has the expected rank, for shape inference.
pub(crate) fn expect_rank(layer: &'static str, shape: &[usize], rank: usize) -> Result<()> {
    if shape.len() != rank {
        return Err(NetworkError::RankMismatch {
            layer,
            expected: rank,
            actual: shape.to_vec(),
        });
    }
    Ok(())
}
