use crate::network::Network;
use crate::regularization::RegularizationType;
use log::debug;
use ndarray::{ArrayD, Zip};
use serde::{Deserialize, Serialize};

/// Updates network parameters from their accumulated gradients.
pub trait Optimizer {
    fn step(&mut self, network: &mut Network);

    fn learning_rate(&self) -> f64;

    fn set_learning_rate(&mut self, lr: f64);
}

/// Hyperparameters of [`Sgd`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SgdConfig {
    pub lr: f64,
    pub momentum: f64,
    pub weight_decay: f64,
    #[serde(default)]
    pub regularization: RegularizationType,
}

impl Default for SgdConfig {
    fn default() -> Self {
        Self {
            lr: 0.1,
            momentum: 0.9,
            weight_decay: 5e-4,
            regularization: RegularizationType::L2,
        }
    }
}

/// Stochastic gradient descent with momentum and weight decay.
///
/// For every parameter `w` with gradient `g`:
///
/// ```text
/// d = g + weight_decay * w
/// v = momentum * v + d
/// w = w - lr * v
/// ```
///
/// Velocity buffers are created on the first step, one per parameter in the
/// order [`Network::visit_params_mut`] yields them.
#[derive(Debug, Clone)]
pub struct Sgd {
    config: SgdConfig,
    velocities: Vec<ArrayD<f32>>,
}

impl Sgd {
    pub fn new(config: SgdConfig) -> Self {
        Self {
            config,
            velocities: Vec::new(),
        }
    }

    pub fn config(&self) -> &SgdConfig {
        &self.config
    }
}

impl Optimizer for Sgd {
    fn step(&mut self, network: &mut Network) {
        let lr = self.config.lr as f32;
        let momentum = self.config.momentum as f32;
        let weight_decay = self.config.weight_decay as f32;
        let regularization = self.config.regularization;
        let velocities = &mut self.velocities;
        let mut index = 0;

        network.visit_params_mut(&mut |mut param| {
            let mut direction = param.grad.to_owned();
            regularization.accumulate_gradient(direction.view_mut(), param.value.view(), weight_decay);

            if momentum != 0.0 {
                match velocities.get_mut(index) {
                    Some(velocity) if velocity.shape() == direction.shape() => {
                        Zip::from(&mut *velocity)
                            .and(&direction)
                            .for_each(|v, &d| *v = momentum * *v + d);
                        direction.assign(velocity);
                    }
                    Some(velocity) => {
                        debug!("Resetting velocity for {} after a shape change", param.name);
                        *velocity = direction.clone();
                    }
                    None => velocities.push(direction.clone()),
                }
            }

            Zip::from(&mut param.value)
                .and(&direction)
                .for_each(|w, &d| *w -= lr * d);
            index += 1;
        });
    }

    fn learning_rate(&self) -> f64 {
        self.config.lr
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.config.lr = lr;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network_config::{FeatureSpec, NetworkConfig};
    use approx::assert_relative_eq;
    use ndarray::Array4;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn tiny_network() -> Network {
        let config = NetworkConfig {
            in_channels: 1,
            input_size: 2,
            features: vec![FeatureSpec::Conv(2), FeatureSpec::MaxPool],
            batch_norm: false,
            classifier: vec![],
            dropout: 0.0,
            num_classes: 2,
        };
        Network::with_rng(config, &mut StdRng::seed_from_u64(8)).unwrap()
    }

    fn snapshot(network: &mut Network) -> Vec<ArrayD<f32>> {
        let mut values = Vec::new();
        network.visit_params_mut(&mut |p| values.push(p.value.to_owned()));
        values
    }

    fn gradients(network: &mut Network) -> Vec<ArrayD<f32>> {
        let mut grads = Vec::new();
        network.visit_params_mut(&mut |p| grads.push(p.grad.to_owned()));
        grads
    }

    #[test]
    fn test_zero_gradient_applies_weight_decay_only() {
        let mut network = tiny_network();
        network.zero_grad();
        let before = snapshot(&mut network);

        let mut sgd = Sgd::new(SgdConfig {
            lr: 0.1,
            momentum: 0.0,
            weight_decay: 0.5,
            regularization: RegularizationType::L2,
        });
        sgd.step(&mut network);

        for (old, new) in before.iter().zip(snapshot(&mut network)) {
            // w - 0.1 * 0.5 * w
            assert_relative_eq!(new, old * 0.95, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_momentum_accumulates_velocity() {
        let mut network = tiny_network();
        let input = Array4::from_shape_fn((2, 1, 2, 2), |(n, _, y, x)| (n + y + x) as f32 - 1.0);
        network.forward(input).unwrap();
        network
            .backward(ndarray::array![[1.0, -1.0], [0.5, 0.5]])
            .unwrap();
        let grads = gradients(&mut network);
        let start = snapshot(&mut network);

        let mut sgd = Sgd::new(SgdConfig {
            lr: 0.1,
            momentum: 0.9,
            weight_decay: 0.0,
            regularization: RegularizationType::L2,
        });
        sgd.step(&mut network);
        sgd.step(&mut network);

        // Two steps with a fixed gradient move by lr * (g + (0.9 g + g)).
        for ((w0, w2), g) in start.iter().zip(snapshot(&mut network)).zip(&grads) {
            let expected = w0 - &(g * (0.1 * 2.9));
            assert_relative_eq!(w2, expected, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_learning_rate_is_adjustable() {
        let mut sgd = Sgd::new(SgdConfig::default());
        assert_eq!(sgd.learning_rate(), 0.1);
        sgd.set_learning_rate(0.01);
        assert_eq!(sgd.learning_rate(), 0.01);
        assert_eq!(sgd.config().momentum, 0.9);
    }
}
