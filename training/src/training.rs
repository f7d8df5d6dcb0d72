//! The epoch loop: SGD training with augmentation, evaluation on the test
//! set, the milestone learning-rate schedule and best-accuracy checkpoints.

use crate::checkpoint::{Checkpoint, save_checkpoint};
use crate::error::Result;
use crate::metrics::{EpochMetrics, RunningMetrics};
use crate::training_config::TrainingConfig;
use crate::training_history::TrainingHistory;
use cifar10::{Cifar10Data, Compose, DataLoader};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::info;
use neural_network::{CrossEntropyLoss, Mode, MultiStepLr, Network, Optimizer, Sgd};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tensor::argmax_rows;

/// Trainer drives a [`Network`] through epochs of training and evaluation.
pub struct Trainer {
    network: Network,
    optimizer: Sgd,
    scheduler: MultiStepLr,
    criterion: CrossEntropyLoss,
    config: TrainingConfig,
    history: TrainingHistory,
    best_accuracy: f64,
    start_epoch: usize,
    progress: MultiProgress,
}

impl Trainer {
    /// Creates a trainer that starts from epoch 0 with no best accuracy.
    pub fn new(network: Network, config: TrainingConfig) -> Self {
        Self::starting_at(network, config, 0, 0.0)
    }

    /// Continues from a checkpoint: the best accuracy is the checkpoint's
    /// and the epoch loop and learning-rate schedule resume at its epoch.
    pub fn from_checkpoint(checkpoint: Checkpoint, config: TrainingConfig) -> Self {
        info!(
            "Resuming at epoch {} with best accuracy {:.2}%",
            checkpoint.epoch, checkpoint.acc
        );
        Self::starting_at(checkpoint.network, config, checkpoint.epoch, checkpoint.acc)
    }

    fn starting_at(
        network: Network,
        config: TrainingConfig,
        start_epoch: usize,
        best_accuracy: f64,
    ) -> Self {
        Self {
            network,
            optimizer: Sgd::new(config.sgd_config()),
            scheduler: config.scheduler(start_epoch),
            criterion: CrossEntropyLoss::new(),
            config,
            history: TrainingHistory::new(),
            best_accuracy,
            start_epoch,
            progress: MultiProgress::new(),
        }
    }

    /// Draws progress bars into `progress` instead of a fresh stderr target.
    pub fn with_progress(mut self, progress: MultiProgress) -> Self {
        self.progress = progress;
        self
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn into_network(self) -> Network {
        self.network
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Returns the training history containing accuracy and loss metrics
    pub fn history(&self) -> &TrainingHistory {
        &self.history
    }

    /// Best test accuracy reached so far, in percent.
    pub fn best_accuracy(&self) -> f64 {
        self.best_accuracy
    }

    pub fn start_epoch(&self) -> usize {
        self.start_epoch
    }

    pub fn learning_rate(&self) -> f64 {
        self.optimizer.learning_rate()
    }

    fn batch_bar(&self, len: usize, description: String) -> ProgressBar {
        let bar = self.progress.add(ProgressBar::new(len as u64));
        bar.set_style(create_progress_style(
            "{prefix}{spinner:.yellow} [{elapsed_precise}] {bar:40.yellow/blue} {pos:>4}/{len:4} {msg}",
        ));
        bar.set_prefix(description);
        bar
    }

    /// One optimisation pass over `loader`.
    ///
    /// Every batch runs zero-grad, forward, cross-entropy, backward and an
    /// SGD step. The returned loss is the mean of the per-batch losses.
    pub fn train_epoch<R: Rng + ?Sized>(
        &mut self,
        epoch: usize,
        loader: &DataLoader<'_>,
        rng: &mut R,
    ) -> Result<EpochMetrics> {
        self.network.set_mode(Mode::Train);
        let bar = self.batch_bar(loader.num_batches(), format!("Epoch={epoch}, Training "));
        let mut metrics = RunningMetrics::new();

        for batch in loader.batches(rng) {
            self.network.zero_grad();
            let logits = self.network.forward(batch.images)?;
            let (loss, grad) = self.criterion.forward(logits.view(), &batch.targets)?;
            let predicted = argmax_rows(logits.view());
            self.network.backward(grad)?;
            self.optimizer.step(&mut self.network);

            metrics.update(loss, &predicted, &batch.targets);
            bar.set_message(metrics.postfix());
            bar.inc(1);
        }

        bar.finish_and_clear();
        info!("Epoch {epoch} train: {}", metrics.postfix());
        Ok(metrics.finish())
    }

    /// Forward passes over `loader` in evaluation mode. Weights, gradients
    /// and batch-norm statistics are left untouched.
    pub fn test_epoch(&mut self, epoch: usize, loader: &DataLoader<'_>) -> Result<EpochMetrics> {
        self.network.set_mode(Mode::Eval);
        let bar = self.batch_bar(loader.num_batches(), format!("Epoch={epoch} Testing "));
        let mut metrics = RunningMetrics::new();
        // The evaluation pipeline has no random steps; the rng only feeds
        // the loader's per-sample seeds.
        let mut rng = StdRng::seed_from_u64(0);

        for batch in loader.batches(&mut rng) {
            let logits = self.network.forward(batch.images)?;
            let (loss, _) = self.criterion.forward(logits.view(), &batch.targets)?;
            let predicted = argmax_rows(logits.view());

            metrics.update(loss, &predicted, &batch.targets);
            bar.set_message(metrics.postfix());
            bar.inc(1);
        }

        bar.finish_and_clear();
        info!("Epoch {epoch} test: {}", metrics.postfix());
        Ok(metrics.finish())
    }

    /// Trains for `config.epochs` epochs starting at the start epoch.
    ///
    /// Each epoch takes its learning rate from the schedule, trains on
    /// `train` with the augmenting pipeline and evaluates on `test`. When
    /// checkpoints are enabled, every epoch that beats the best test
    /// accuracy is saved.
    pub fn run<R: Rng + ?Sized>(
        &mut self,
        train: &Cifar10Data,
        test: &Cifar10Data,
        rng: &mut R,
    ) -> Result<&TrainingHistory> {
        self.config.validate()?;
        self.network.seed_dropout(rng.random());
        let train_loader = DataLoader::new(
            train,
            self.config.train_batch_size,
            true,
            Compose::cifar10_train(),
        )?;
        let test_loader = DataLoader::new(
            test,
            self.config.test_batch_size,
            false,
            Compose::cifar10_test(),
        )?;

        let epoch_progress = self.progress.add(ProgressBar::new(self.config.epochs as u64));
        epoch_progress.set_style(create_progress_style(
            "{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} Epoch {msg}",
        ));
        info!(
            "Training {} epochs from epoch {} on {} images, testing on {}",
            self.config.epochs,
            self.start_epoch,
            train.len(),
            test.len()
        );

        let end = self.start_epoch + self.config.epochs;
        for epoch in self.start_epoch..end {
            let lr = self.scheduler.step();
            self.optimizer.set_learning_rate(lr);

            let train_metrics = self.train_epoch(epoch, &train_loader, rng)?;
            let test_metrics = self.test_epoch(epoch, &test_loader)?;
            self.history
                .record_epoch(epoch, lr, &train_metrics, &test_metrics);

            if test_metrics.accuracy > self.best_accuracy {
                if self.config.checkpoint.enabled {
                    save_checkpoint(
                        &self.network,
                        test_metrics.accuracy,
                        epoch,
                        &self.config.checkpoint.dir,
                        &self.config.checkpoint.file,
                    )?;
                }
                self.best_accuracy = test_metrics.accuracy;
            }

            epoch_progress.set_message(format!(
                "{epoch} - lr: {lr}, Train Acc: {:.2}%, Test Acc: {:.2}%, Best: {:.2}%",
                train_metrics.accuracy, test_metrics.accuracy, self.best_accuracy
            ));
            epoch_progress.inc(1);
        }

        epoch_progress.finish_with_message("Training completed!");
        Ok(&self.history)
    }
}

/// Creates a progress bar style with the specified template.
fn create_progress_style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training_config::CheckpointConfig;
    use assert_fs::prelude::*;
    use indicatif::ProgressDrawTarget;
    use ndarray::Array4;
    use neural_network::{FeatureSpec, NetworkConfig};

    /// Conv, three pools and a linear head on 32x32 inputs.
    fn tiny_network(seed: u64) -> Network {
        let config = NetworkConfig {
            in_channels: 3,
            input_size: 32,
            features: vec![
                FeatureSpec::Conv(4),
                FeatureSpec::MaxPool,
                FeatureSpec::MaxPool,
                FeatureSpec::MaxPool,
            ],
            batch_norm: true,
            classifier: vec![],
            dropout: 0.0,
            num_classes: 10,
        };
        Network::with_rng(config, &mut StdRng::seed_from_u64(seed)).unwrap()
    }

    /// Class 0 images are dark, class 1 images are bright.
    fn two_class_data(count: usize) -> Cifar10Data {
        let images = Array4::from_shape_fn((count, 3, 32, 32), |(n, c, y, x)| {
            let base = if n % 2 == 0 { 20 } else { 220 };
            (base + (c * 5 + y + x + n) % 30) as u8
        });
        let labels = (0..count).map(|n| n % 2).collect();
        Cifar10Data::new(images, labels).unwrap()
    }

    fn small_config(epochs: usize) -> TrainingConfig {
        TrainingConfig {
            learning_rate: 0.05,
            epochs,
            milestones: vec![2],
            train_batch_size: 4,
            test_batch_size: 5,
            ..TrainingConfig::default()
        }
    }

    fn quiet_trainer(network: Network, config: TrainingConfig) -> Trainer {
        Trainer::new(network, config)
            .with_progress(MultiProgress::with_draw_target(ProgressDrawTarget::hidden()))
    }

    #[test]
    fn test_train_epoch_counts_every_sample() -> Result<()> {
        let data = two_class_data(10);
        let loader = DataLoader::new(&data, 4, true, Compose::cifar10_train())?;
        let mut trainer = quiet_trainer(tiny_network(1), small_config(1));

        let metrics = trainer.train_epoch(0, &loader, &mut StdRng::seed_from_u64(2))?;
        assert_eq!(metrics.total, 10);
        assert!(metrics.correct <= 10);
        assert!(metrics.loss.is_finite() && metrics.loss > 0.0);
        assert_eq!(trainer.network().mode(), Mode::Train);
        Ok(())
    }

    #[test]
    fn test_test_epoch_is_deterministic_and_leaves_weights() -> Result<()> {
        let data = two_class_data(12);
        let loader = DataLoader::new(&data, 5, false, Compose::cifar10_test())?;
        let mut trainer = quiet_trainer(tiny_network(3), small_config(1));

        let first = trainer.test_epoch(0, &loader)?;
        let second = trainer.test_epoch(0, &loader)?;
        assert_eq!(first, second);
        assert_eq!(first.total, 12);
        assert_eq!(trainer.network().mode(), Mode::Eval);
        Ok(())
    }

    #[test]
    fn test_run_records_history_and_follows_schedule() -> Result<()> {
        let train = two_class_data(16);
        let test = two_class_data(10);
        let mut trainer = quiet_trainer(tiny_network(4), small_config(3));

        let history = trainer.run(&train, &test, &mut StdRng::seed_from_u64(9))?;
        assert_eq!(history.epochs, vec![0, 1, 2]);
        // Milestone 2 first applies to epoch 1: the schedule steps before each epoch.
        assert!((history.learning_rates[0] - 0.05).abs() < 1e-12);
        assert!((history.learning_rates[1] - 0.005).abs() < 1e-12);
        assert!((history.learning_rates[2] - 0.005).abs() < 1e-12);
        assert!(history.train_losses.iter().all(|l| l.is_finite()));
        assert_eq!(trainer.best_accuracy(), trainer.history().best_accuracy);
        Ok(())
    }

    #[test]
    fn test_learning_separable_classes() -> Result<()> {
        let train = two_class_data(32);
        let test = two_class_data(20);
        let config = TrainingConfig {
            milestones: vec![],
            weight_decay: 0.0,
            ..small_config(4)
        };
        let mut trainer = quiet_trainer(tiny_network(6), config);

        let history = trainer.run(&train, &test, &mut StdRng::seed_from_u64(1))?;
        let first = history.train_losses[0];
        assert!(
            history.train_losses[1..].iter().any(|&l| l < first),
            "loss never dropped below {first}: {:?}",
            history.train_losses
        );
        Ok(())
    }

    fn checkpointing_config(dir: &assert_fs::fixture::ChildPath, epochs: usize) -> TrainingConfig {
        TrainingConfig {
            checkpoint: CheckpointConfig {
                enabled: true,
                dir: dir.path().to_path_buf(),
                file: "ckpt.json".to_string(),
            },
            ..small_config(epochs)
        }
    }

    #[test]
    fn test_checkpoint_saved_on_improvement_and_resumed() -> Result<()> {
        let temp = assert_fs::TempDir::new().unwrap();
        let dir = temp.child("checkpoint");
        let config = checkpointing_config(&dir, 1);

        let mut trainer = quiet_trainer(tiny_network(7), config.clone());
        // Every accuracy, including 0%, beats this.
        trainer.best_accuracy = -1.0;
        let history = trainer.run(&two_class_data(8), &two_class_data(10), &mut StdRng::seed_from_u64(2))?;
        let accuracy = history.test_accuracies[0];

        let checkpoint = Checkpoint::load(config.checkpoint.path())?;
        assert_eq!(checkpoint.epoch, 0);
        assert_eq!(checkpoint.acc, accuracy);
        assert_eq!(trainer.best_accuracy(), accuracy);

        let resumed = Trainer::from_checkpoint(checkpoint, config);
        assert_eq!(resumed.start_epoch(), 0);
        assert_eq!(resumed.best_accuracy(), accuracy);
        Ok(())
    }

    #[test]
    fn test_checkpoint_untouched_without_improvement() -> Result<()> {
        let temp = assert_fs::TempDir::new().unwrap();
        let dir = temp.child("checkpoint");
        dir.create_dir_all().unwrap();
        let saved = dir.child("ckpt.json");
        saved.write_str("earlier best").unwrap();

        let mut trainer = quiet_trainer(tiny_network(7), checkpointing_config(&dir, 2));
        // No accuracy can reach this.
        trainer.best_accuracy = 101.0;
        trainer.run(&two_class_data(8), &two_class_data(10), &mut StdRng::seed_from_u64(2))?;

        assert_eq!(std::fs::read_to_string(saved.path())?, "earlier best");
        assert_eq!(trainer.best_accuracy(), 101.0);
        Ok(())
    }

    #[test]
    fn test_checkpoints_disabled_by_default() -> Result<()> {
        let temp = assert_fs::TempDir::new().unwrap();
        let mut config = small_config(1);
        config.checkpoint.dir = temp.path().join("checkpoint");

        let mut trainer = quiet_trainer(tiny_network(8), config);
        trainer.run(&two_class_data(4), &two_class_data(4), &mut StdRng::seed_from_u64(0))?;
        assert!(!temp.path().join("checkpoint").exists());
        Ok(())
    }
}
