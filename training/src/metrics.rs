use serde::{Deserialize, Serialize};

/// Loss and accuracy accumulated batch by batch over one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningMetrics {
    loss_sum: f64,
    batches: usize,
    correct: usize,
    total: usize,
}

impl RunningMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one batch: its mean loss and the predicted class of each sample.
    pub fn update(&mut self, loss: f32, predicted: &[usize], targets: &[usize]) {
        self.loss_sum += f64::from(loss);
        self.batches += 1;
        self.total += targets.len();
        self.correct += predicted
            .iter()
            .zip(targets)
            .filter(|(p, t)| p == t)
            .count();
    }

    /// Mean of the per-batch losses, so a short final batch weighs as much
    /// as a full one.
    pub fn avg_loss(&self) -> f64 {
        if self.batches == 0 {
            0.0
        } else {
            self.loss_sum / self.batches as f64
        }
    }

    /// Percentage of correctly classified samples.
    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            100.0 * self.correct as f64 / self.total as f64
        }
    }

    pub fn correct(&self) -> usize {
        self.correct
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn batches(&self) -> usize {
        self.batches
    }

    /// Status line shown next to the progress bar.
    pub fn postfix(&self) -> String {
        format!(
            "Loss: {:.3} | Acc: {:.3}% ({}/{})",
            self.avg_loss(),
            self.accuracy(),
            self.correct,
            self.total
        )
    }

    pub fn finish(&self) -> EpochMetrics {
        EpochMetrics {
            loss: self.avg_loss(),
            accuracy: self.accuracy(),
            correct: self.correct,
            total: self.total,
        }
    }
}

/// Final figures of one training or evaluation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub loss: f64,
    /// Percentage in `[0, 100]`
    pub accuracy: f64,
    pub correct: usize,
    pub total: usize,
}
