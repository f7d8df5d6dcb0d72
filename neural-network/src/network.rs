use crate::error::{NetworkError, Result};
use crate::layer::{Layer, Mode, ParamMut};
use crate::network_config::NetworkConfig;
use crate::summary::{LayerSummary, NetworkSummary};
use log::debug;
use ndarray::{Array2, Array4, ArrayD, Ix2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// A feed-forward stack of layers built from a [`NetworkConfig`].
///
/// The network maps an `(N, C, H, W)` batch of images to `(N, num_classes)`
/// logits. Gradients accumulate across [`backward`](Self::backward) calls
/// until [`zero_grad`](Self::zero_grad) clears them.
///
/// # Examples
///
/// ```
/// use neural_network::{FeatureSpec, Mode, Network, NetworkConfig};
/// use ndarray::Array4;
///
/// let config = NetworkConfig {
///     in_channels: 3,
///     input_size: 4,
///     features: vec![FeatureSpec::Conv(4), FeatureSpec::MaxPool],
///     batch_norm: true,
///     classifier: vec![8],
///     dropout: 0.5,
///     num_classes: 10,
/// };
/// let mut network = Network::new(config).unwrap();
/// network.set_mode(Mode::Eval);
///
/// let logits = network.forward(Array4::zeros((2, 3, 4, 4))).unwrap();
/// assert_eq!(logits.dim(), (2, 10));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    config: NetworkConfig,
    layers: Vec<Layer>,
    #[serde(skip)]
    mode: Mode,
    /// Source of dropout masks
    #[serde(skip, default = "unseeded_rng")]
    rng: StdRng,
}

fn unseeded_rng() -> StdRng {
    StdRng::from_os_rng()
}

impl Network {
    /// Builds a network with freshly initialised weights.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::InvalidConfig`] if the configuration does not
    /// describe a buildable network.
    pub fn new(config: NetworkConfig) -> Result<Self> {
        Self::with_rng(config, &mut rand::rng())
    }

    /// Like [`new`](Self::new), drawing initial weights and the dropout
    /// seed from `rng`.
    pub fn with_rng<R: Rng + ?Sized>(config: NetworkConfig, rng: &mut R) -> Result<Self> {
        let layers = config.build_layers(rng)?;
        debug!("Built network with {} layers", layers.len());
        Ok(Self {
            config,
            layers,
            mode: Mode::Train,
            rng: StdRng::seed_from_u64(rng.random()),
        })
    }

    /// Restarts the dropout masks from `seed`. A loaded network draws its
    /// masks from the OS until this is called.
    pub fn seed_dropout(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Switches between training and evaluation behaviour for every layer.
    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    /// Computes logits for a batch of images.
    ///
    /// In [`Mode::Train`] every layer keeps what [`backward`](Self::backward)
    /// needs. In [`Mode::Eval`] nothing is kept.
    pub fn forward(&mut self, input: Array4<f32>) -> Result<Array2<f32>> {
        let mode = self.mode;
        let mut activation: ArrayD<f32> = input.into_dyn();
        for layer in &mut self.layers {
            activation = layer.forward(activation, mode, &mut self.rng)?;
        }
        let shape = activation.shape().to_vec();
        activation
            .into_dimensionality::<Ix2>()
            .map_err(|_| NetworkError::RankMismatch {
                layer: "Network",
                expected: 2,
                actual: shape,
            })
    }

    /// Backpropagates the loss gradient w.r.t. the logits of the last training
    /// forward pass, accumulating parameter gradients.
    pub fn backward(&mut self, grad: Array2<f32>) -> Result<()> {
        let mut grad: ArrayD<f32> = grad.into_dyn();
        for layer in self.layers.iter_mut().rev() {
            grad = layer.backward(grad)?;
        }
        Ok(())
    }

    pub fn zero_grad(&mut self) {
        for layer in &mut self.layers {
            layer.zero_grad();
        }
    }

    /// Visits every trainable tensor, layer by layer in forward order.
    pub fn visit_params_mut(&mut self, visitor: &mut dyn FnMut(ParamMut<'_>)) {
        for layer in &mut self.layers {
            layer.visit_params_mut(visitor);
        }
    }

    pub fn param_count(&self) -> usize {
        self.layers.iter().map(Layer::param_count).sum()
    }

    /// Output shape and parameter count of every layer for a batch of
    /// `batch_size` images.
    pub fn summary(&self, batch_size: usize) -> Result<NetworkSummary> {
        let input_shape = vec![
            batch_size,
            self.config.in_channels,
            self.config.input_size,
            self.config.input_size,
        ];
        let mut shape = input_shape.clone();
        let mut layers = Vec::with_capacity(self.layers.len());
        for layer in &self.layers {
            shape = layer.output_shape(&shape)?;
            layers.push(LayerSummary {
                name: layer.to_string(),
                output_shape: shape.clone(),
                params: layer.param_count(),
            });
        }
        Ok(NetworkSummary {
            input_shape,
            layers,
        })
    }

    /// Saves the network (configuration, weights and batch-norm statistics)
    /// as JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Loads a network saved with [`save`](Self::save). The loaded network
    /// starts in [`Mode::Train`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        let mut network: Network = serde_json::from_str(&json)?;
        network.config.validate()?;
        network.zero_grad();
        Ok(network)
    }
}
