use crate::activations::ReLU;
use crate::batch_norm::BatchNorm2d;
use crate::conv::Conv2d;
use crate::dropout::Dropout;
use crate::error::{NetworkError, Result};
use crate::layer::Layer;
use crate::linear::Linear;
use crate::pooling::{Flatten, MaxPool2d};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// One entry of a VGG feature extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureSpec {
    /// 3x3 convolution (stride 1, padding 1) with this many output channels,
    /// followed by an optional batch norm and a ReLU
    Conv(usize),
    /// 2x2 max pooling with stride 2
    MaxPool,
}

/// The standard VGG depths and their feature configurations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VggDepth {
    Vgg11,
    Vgg13,
    Vgg16,
    Vgg19,
}

impl VggDepth {
    /// Feature configuration: `Some(width)` is a convolution, `None` a pool.
    fn widths(&self) -> &'static [Option<usize>] {
        const M: Option<usize> = None;
        match self {
            VggDepth::Vgg11 => &[
                Some(64), M, Some(128), M, Some(256), Some(256), M, Some(512), Some(512), M,
                Some(512), Some(512), M,
            ],
            VggDepth::Vgg13 => &[
                Some(64), Some(64), M, Some(128), Some(128), M, Some(256), Some(256), M,
                Some(512), Some(512), M, Some(512), Some(512), M,
            ],
            VggDepth::Vgg16 => &[
                Some(64), Some(64), M, Some(128), Some(128), M, Some(256), Some(256), Some(256),
                M, Some(512), Some(512), Some(512), M, Some(512), Some(512), Some(512), M,
            ],
            VggDepth::Vgg19 => &[
                Some(64), Some(64), M, Some(128), Some(128), M, Some(256), Some(256), Some(256),
                Some(256), M, Some(512), Some(512), Some(512), Some(512), M, Some(512), Some(512),
                Some(512), Some(512), M,
            ],
        }
    }

    pub fn features(&self) -> Vec<FeatureSpec> {
        self.widths()
            .iter()
            .map(|w| w.map_or(FeatureSpec::MaxPool, FeatureSpec::Conv))
            .collect()
    }
}

/// Description of a VGG-style convolutional classifier.
///
/// The network is `features`, then a flatten, then one
/// `[Dropout, Linear, ReLU]` block per entry of `classifier`, then a final
/// `Linear` to `num_classes` logits.
///
/// # Example
///
/// ```
/// use neural_network::NetworkConfig;
///
/// let config = NetworkConfig::vgg16_bn(32);
/// assert_eq!(config.classifier, vec![512, 512]);
/// assert_eq!(config.num_classes, 10);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Channels of the input images
    pub in_channels: usize,
    /// Height and width of the (square) input images
    pub input_size: usize,
    pub features: Vec<FeatureSpec>,
    /// Insert a `BatchNorm2d` after every convolution
    pub batch_norm: bool,
    /// Widths of the hidden fully connected layers
    pub classifier: Vec<usize>,
    /// Dropout probability in front of each hidden fully connected layer.
    /// Zero leaves the dropout layers out.
    pub dropout: f32,
    pub num_classes: usize,
}

impl NetworkConfig {
    /// A VGG network for RGB images with a 10-way output.
    pub fn vgg(depth: VggDepth, batch_norm: bool, input_size: usize) -> Self {
        Self {
            in_channels: 3,
            input_size,
            features: depth.features(),
            batch_norm,
            classifier: vec![512, 512],
            dropout: 0.5,
            num_classes: 10,
        }
    }

    /// VGG16 with batch normalization, the default CIFAR-10 model.
    pub fn vgg16_bn(input_size: usize) -> Self {
        Self::vgg(VggDepth::Vgg16, true, input_size)
    }

    /// Loads a network configuration from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path)?;
        let config: NetworkConfig = serde_json::from_str(&config_str)?;
        config.validate()?;
        Ok(config)
    }

    fn pool_count(&self) -> usize {
        self.features
            .iter()
            .filter(|f| matches!(f, FeatureSpec::MaxPool))
            .count()
    }

    /// Channels and spatial size coming out of the feature extractor.
    pub fn feature_output(&self) -> (usize, usize) {
        let channels = self
            .features
            .iter()
            .rev()
            .find_map(|f| match f {
                FeatureSpec::Conv(c) => Some(*c),
                FeatureSpec::MaxPool => None,
            })
            .unwrap_or(self.in_channels);
        let size = u32::try_from(self.pool_count())
            .ok()
            .and_then(|pools| 2usize.checked_pow(pools))
            .map_or(0, |div| self.input_size / div);
        (channels, size)
    }

    /// Checks that the configuration describes a buildable network.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(NetworkError::InvalidConfig(msg));
        if self.in_channels == 0 || self.input_size == 0 || self.num_classes == 0 {
            return invalid(format!(
                "in_channels ({}), input_size ({}) and num_classes ({}) must be positive",
                self.in_channels, self.input_size, self.num_classes
            ));
        }
        if !self.features.iter().any(|f| matches!(f, FeatureSpec::Conv(_))) {
            return invalid("features must contain at least one convolution".to_string());
        }
        if self.features.contains(&FeatureSpec::Conv(0)) || self.classifier.contains(&0) {
            return invalid("layer widths must be positive".to_string());
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return invalid(format!("dropout must be in [0, 1), got {}", self.dropout));
        }
        let pools = self.pool_count();
        let divisor = u32::try_from(pools)
            .ok()
            .and_then(|p| 2usize.checked_pow(p))
            .filter(|&d| d <= self.input_size);
        match divisor {
            Some(d) if self.input_size % d == 0 => Ok(()),
            _ => invalid(format!(
                "input_size {} must be divisible by 2^{} for {} pooling layers",
                self.input_size, pools, pools
            )),
        }
    }

    /// Builds freshly initialised layers for this configuration.
    pub fn build_layers<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Vec<Layer>> {
        self.validate()?;
        let mut layers = Vec::new();

        let mut channels = self.in_channels;
        for feature in &self.features {
            match *feature {
                FeatureSpec::Conv(out) => {
                    layers.push(Layer::Conv2d(Conv2d::new(channels, out, 3, 1, 1, rng)));
                    if self.batch_norm {
                        layers.push(Layer::BatchNorm2d(BatchNorm2d::new(out)));
                    }
                    layers.push(Layer::ReLU(ReLU::new()));
                    channels = out;
                }
                FeatureSpec::MaxPool => layers.push(Layer::MaxPool2d(MaxPool2d::new(2, 2))),
            }
        }
        layers.push(Layer::Flatten(Flatten::new()));

        let (channels, size) = self.feature_output();
        let mut width = channels * size * size;
        for &hidden in &self.classifier {
            if self.dropout > 0.0 {
                layers.push(Layer::Dropout(Dropout::new(self.dropout)));
            }
            layers.push(Layer::Linear(Linear::new(width, hidden, rng)));
            layers.push(Layer::ReLU(ReLU::new()));
            width = hidden;
        }
        layers.push(Layer::Linear(Linear::new(width, self.num_classes, rng)));
        Ok(layers)
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self::vgg16_bn(32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_vgg16_feature_configuration() {
        let features = VggDepth::Vgg16.features();
        assert_eq!(features.len(), 18);
        assert_eq!(
            features.iter().filter(|f| matches!(f, FeatureSpec::Conv(_))).count(),
            13
        );
        assert_eq!(features[0], FeatureSpec::Conv(64));
        assert_eq!(features[2], FeatureSpec::MaxPool);
        assert_eq!(NetworkConfig::vgg16_bn(32).feature_output(), (512, 1));
    }

    #[test]
    fn test_conv_counts_per_depth() {
        let convs = |d: VggDepth| {
            d.features()
                .iter()
                .filter(|f| matches!(f, FeatureSpec::Conv(_)))
                .count()
        };
        assert_eq!(convs(VggDepth::Vgg11), 8);
        assert_eq!(convs(VggDepth::Vgg13), 10);
        assert_eq!(convs(VggDepth::Vgg19), 16);
    }

    #[test]
    fn test_vgg16_bn_layer_sequence() {
        let mut rng = StdRng::seed_from_u64(0);
        let layers = NetworkConfig::vgg16_bn(32).build_layers(&mut rng).unwrap();

        // 13 x (conv, bn, relu) + 5 pools + flatten + 2 x (dropout, linear, relu) + linear
        assert_eq!(layers.len(), 13 * 3 + 5 + 1 + 2 * 3 + 1);
        let tail: Vec<String> = layers[layers.len() - 7..].iter().map(|l| l.to_string()).collect();
        assert_eq!(
            tail,
            vec![
                "Dropout(p=0.5)",
                "Linear(in_features=512, out_features=512)",
                "ReLU()",
                "Dropout(p=0.5)",
                "Linear(in_features=512, out_features=512)",
                "ReLU()",
                "Linear(in_features=512, out_features=10)",
            ]
        );
    }

    #[test]
    fn test_larger_inputs_widen_classifier() {
        let mut rng = StdRng::seed_from_u64(0);
        let layers = NetworkConfig::vgg16_bn(64).build_layers(&mut rng).unwrap();
        let first_linear = layers.iter().find_map(|l| match l {
            Layer::Linear(linear) => Some(linear.in_features()),
            _ => None,
        });
        assert_eq!(first_linear, Some(512 * 2 * 2));
    }

    #[test]
    fn test_invalid_input_size() {
        let config = NetworkConfig::vgg16_bn(48);
        assert!(matches!(config.validate(), Err(NetworkError::InvalidConfig(_))));
        assert!(NetworkConfig::vgg16_bn(16).validate().is_err());
    }

    #[test]
    fn test_invalid_dropout_and_empty_features() {
        let mut config = NetworkConfig::vgg16_bn(32);
        config.dropout = 1.0;
        assert!(config.validate().is_err());

        let mut config = NetworkConfig::vgg16_bn(32);
        config.features = vec![FeatureSpec::MaxPool];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_config() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("vgg_small.json");

        let config_json = r#"{
            "in_channels": 3,
            "input_size": 8,
            "features": [{"Conv": 8}, "MaxPool", {"Conv": 16}, "MaxPool"],
            "batch_norm": true,
            "classifier": [32],
            "dropout": 0.25,
            "num_classes": 10
        }"#;

        let mut file = File::create(&config_path).unwrap();
        file.write_all(config_json.as_bytes()).unwrap();

        let config = NetworkConfig::load(&config_path).unwrap();
        assert_eq!(
            config.features,
            vec![
                FeatureSpec::Conv(8),
                FeatureSpec::MaxPool,
                FeatureSpec::Conv(16),
                FeatureSpec::MaxPool
            ]
        );
        assert_eq!(config.feature_output(), (16, 2));
        assert_eq!(config.classifier, vec![32]);
        assert_eq!(config.dropout, 0.25);
    }

    #[test]
    fn test_default_config() {
        assert_eq!(NetworkConfig::default(), NetworkConfig::vgg16_bn(32));
    }
}
