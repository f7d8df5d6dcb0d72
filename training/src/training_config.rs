use crate::error::{Result, TrainingError};
use neural_network::{MultiStepLr, RegularizationType, SgdConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Where and whether to write checkpoints during training.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Save after every epoch that improves the best test accuracy
    pub enabled: bool,
    pub dir: PathBuf,
    pub file: String,
}

impl CheckpointConfig {
    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.file)
    }
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: PathBuf::from("./checkpoint"),
            file: "ckpt.json".to_string(),
        }
    }
}

/// Configuration parameters for training.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Initial learning rate for SGD
    pub learning_rate: f64,
    pub momentum: f64,
    pub weight_decay: f64,
    /// Epochs at which the learning rate is multiplied by `gamma`
    pub milestones: Vec<usize>,
    pub gamma: f64,
    /// Number of epochs to run
    pub epochs: usize,
    pub train_batch_size: usize,
    pub test_batch_size: usize,
    pub checkpoint: CheckpointConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            momentum: 0.9,
            weight_decay: 5e-4,
            milestones: vec![50, 100, 150],
            gamma: 0.1,
            epochs: 200,
            train_batch_size: 128,
            test_batch_size: 100,
            checkpoint: CheckpointConfig::default(),
        }
    }
}

impl TrainingConfig {
    /// Loads a configuration from a JSON file. Missing fields take their
    /// default values.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path)?;
        let config: TrainingConfig = serde_json::from_str(&config_str)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(TrainingError::InvalidConfig(msg));
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return invalid(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            ));
        }
        if !(0.0..1.0).contains(&self.momentum) {
            return invalid(format!("momentum must be in [0, 1), got {}", self.momentum));
        }
        if self.weight_decay < 0.0 || self.gamma <= 0.0 {
            return invalid(format!(
                "weight_decay ({}) must be non-negative and gamma ({}) positive",
                self.weight_decay, self.gamma
            ));
        }
        if self.train_batch_size == 0 || self.test_batch_size == 0 {
            return invalid("batch sizes must be positive".to_string());
        }
        Ok(())
    }

    pub fn sgd_config(&self) -> SgdConfig {
        SgdConfig {
            lr: self.learning_rate,
            momentum: self.momentum,
            weight_decay: self.weight_decay,
            regularization: RegularizationType::L2,
        }
    }

    /// The milestone schedule, positioned so its first step yields the rate
    /// for the epoch `start_epoch`.
    pub fn scheduler(&self, start_epoch: usize) -> MultiStepLr {
        MultiStepLr::new(self.learning_rate, self.milestones.clone(), self.gamma)
            .starting_at(start_epoch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_training_config_default() {
        let config = TrainingConfig::default();
        assert_eq!(config.learning_rate, 0.1);
        assert_eq!(config.momentum, 0.9);
        assert_eq!(config.weight_decay, 5e-4);
        assert_eq!(config.milestones, vec![50, 100, 150]);
        assert_eq!(config.epochs, 200);
        assert_eq!(config.train_batch_size, 128);
        assert_eq!(config.test_batch_size, 100);
        assert!(!config.checkpoint.enabled);
        assert_eq!(config.checkpoint.path(), PathBuf::from("./checkpoint/ckpt.json"));
    }

    #[test]
    fn test_partial_json_uses_defaults() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        write!(file, r#"{{"learning_rate": 0.01, "checkpoint": {{"enabled": true}}}}"#)?;

        let config = TrainingConfig::load(file.path())?;
        assert_eq!(config.learning_rate, 0.01);
        assert_eq!(config.epochs, 200);
        assert!(config.checkpoint.enabled);
        assert_eq!(config.checkpoint.file, "ckpt.json");
        Ok(())
    }

    #[test]
    fn test_invalid_values_rejected() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        write!(file, r#"{{"train_batch_size": 0}}"#)?;
        assert!(matches!(
            TrainingConfig::load(file.path()),
            Err(TrainingError::InvalidConfig(_))
        ));

        let config = TrainingConfig {
            learning_rate: -1.0,
            ..TrainingConfig::default()
        };
        assert!(config.validate().is_err());
        Ok(())
    }

    #[test]
    fn test_scheduler_resumes_at_start_epoch() {
        let config = TrainingConfig::default();
        // Resuming at epoch 99 trains it at the rate after the 100 milestone.
        let mut scheduler = config.scheduler(99);
        assert!((scheduler.step() - 0.001).abs() < 1e-12);
        let mut scheduler = config.scheduler(48);
        assert!((scheduler.step() - 0.1).abs() < 1e-12);
        assert!((scheduler.step() - 0.01).abs() < 1e-12);
        assert_eq!(config.sgd_config().momentum, 0.9);
    }
}
