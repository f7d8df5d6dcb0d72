use crate::error::{Result, TrainingError};
use crate::metrics::EpochMetrics;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Training history containing metrics recorded during training
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    /// Epoch number of each record
    pub epochs: Vec<usize>,
    /// Learning rate in effect for each epoch
    pub learning_rates: Vec<f64>,
    pub train_losses: Vec<f64>,
    pub train_accuracies: Vec<f64>,
    pub test_losses: Vec<f64>,
    pub test_accuracies: Vec<f64>,
    /// Best test accuracy seen so far
    pub best_accuracy: f64,
    /// Epoch where best test accuracy was achieved
    pub best_epoch: usize,
}

impl TrainingHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    pub fn record_epoch(
        &mut self,
        epoch: usize,
        learning_rate: f64,
        train: &EpochMetrics,
        test: &EpochMetrics,
    ) {
        self.epochs.push(epoch);
        self.learning_rates.push(learning_rate);
        self.train_losses.push(train.loss);
        self.train_accuracies.push(train.accuracy);
        self.test_losses.push(test.loss);
        self.test_accuracies.push(test.accuracy);

        if self.len() == 1 || test.accuracy > self.best_accuracy {
            self.best_accuracy = test.accuracy;
            self.best_epoch = epoch;
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Loads a history written by [`save`](Self::save).
    ///
    /// # Errors
    ///
    /// Returns [`TrainingError::InvalidHistory`] unless every per-epoch list
    /// has one entry per recorded epoch.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        let history: TrainingHistory = serde_json::from_str(&json)?;
        history.validate()?;
        Ok(history)
    }

    pub fn validate(&self) -> Result<()> {
        let len = self.len();
        let columns = [
            ("learning_rates", self.learning_rates.len()),
            ("train_losses", self.train_losses.len()),
            ("train_accuracies", self.train_accuracies.len()),
            ("test_losses", self.test_losses.len()),
            ("test_accuracies", self.test_accuracies.len()),
        ];
        match columns.iter().find(|(_, n)| *n != len) {
            Some((name, n)) => Err(TrainingError::InvalidHistory(format!(
                "{name} has {n} entries for {len} epochs"
            ))),
            None => Ok(()),
        }
    }

    /// One line of the progression table, if every list reaches `idx`.
    fn progression_row(&self, idx: usize) -> Option<String> {
        Some(format!(
            "Epoch {}: train {:.2}%, test {:.2}% (loss: {:.4}, lr: {})",
            self.epochs.get(idx)?,
            self.train_accuracies.get(idx)?,
            self.test_accuracies.get(idx)?,
            self.test_losses.get(idx)?,
            self.learning_rates.get(idx)?
        ))
    }

    /// Prints a summary of the training history
    pub fn print_summary(&self) {
        println!("\nTraining History Summary:");
        println!("------------------------");
        if self.is_empty() {
            println!("No epochs recorded");
            return;
        }
        println!(
            "Best test accuracy: {:.2}% (epoch {})",
            self.best_accuracy, self.best_epoch
        );
        println!(
            "Final test accuracy: {:.2}%",
            self.test_accuracies.last().unwrap_or(&0.0)
        );
        println!("Final test loss: {:.4}", self.test_losses.last().unwrap_or(&0.0));

        // Progression at 25% intervals
        let len = self.len();
        if len >= 4 {
            println!("\nAccuracy progression:");
            for i in 0..=3 {
                if let Some(row) = self.progression_row(i * (len - 1) / 3) {
                    println!("{row}");
                }
            }
        }
    }
}
