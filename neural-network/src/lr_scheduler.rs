use serde::{Deserialize, Serialize};

/// Piecewise-constant learning rate that decays by `gamma` at each milestone.
///
/// The rate at step `e` is `base_lr * gamma^k`, where `k` is the number of
/// milestones `<= e`. The schedule is created at step 0 and every
/// [`step`](MultiStepLr::step) moves it forward before reporting the rate, so
/// when `step` runs at the top of each epoch, epoch `e` trains at
/// `lr_at(e + 1)` and the first decay hits the epoch just before a milestone.
///
/// # Example
///
/// ```
/// use neural_network::MultiStepLr;
///
/// let mut schedule = MultiStepLr::new(0.1, vec![50, 100, 150], 0.1);
/// assert_eq!(schedule.step(), 0.1);
/// assert!((schedule.lr_at(100) - 0.001).abs() < 1e-12);
///
/// // Epoch 49 is the 50th step and already runs at the decayed rate.
/// let mut schedule = MultiStepLr::new(0.1, vec![50], 0.1).starting_at(49);
/// assert!((schedule.step() - 0.01).abs() < 1e-12);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiStepLr {
    base_lr: f64,
    milestones: Vec<usize>,
    gamma: f64,
    /// Steps taken so far
    last_epoch: usize,
}

impl MultiStepLr {
    pub fn new(base_lr: f64, mut milestones: Vec<usize>, gamma: f64) -> Self {
        milestones.sort_unstable();
        Self {
            base_lr,
            milestones,
            gamma,
            last_epoch: 0,
        }
    }

    /// Positions the schedule as if `epoch` steps had already been taken, so
    /// the next [`step`](Self::step) yields the rate for `epoch + 1`.
    pub fn starting_at(mut self, epoch: usize) -> Self {
        self.last_epoch = epoch;
        self
    }

    pub fn lr_at(&self, epoch: usize) -> f64 {
        let decays = self.milestones.iter().filter(|&&m| m <= epoch).count();
        (0..decays).fold(self.base_lr, |lr, _| lr * self.gamma)
    }

    /// Advances the schedule by one epoch and returns the new rate.
    pub fn step(&mut self) -> f64 {
        self.last_epoch += 1;
        self.lr_at(self.last_epoch)
    }

    pub fn last_epoch(&self) -> usize {
        self.last_epoch
    }

    pub fn milestones(&self) -> &[usize] {
        &self.milestones
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_rate_before_and_after_milestones() {
        let schedule = MultiStepLr::new(0.1, vec![50, 100, 150], 0.1);
        assert_relative_eq!(schedule.lr_at(0), 0.1);
        assert_relative_eq!(schedule.lr_at(49), 0.1);
        assert_relative_eq!(schedule.lr_at(50), 0.01, epsilon = 1e-12);
        assert_relative_eq!(schedule.lr_at(99), 0.01, epsilon = 1e-12);
        assert_relative_eq!(schedule.lr_at(100), 0.001, epsilon = 1e-12);
        assert_relative_eq!(schedule.lr_at(199), 0.0001, epsilon = 1e-12);
    }

    #[test]
    fn test_step_walks_epochs() {
        let mut schedule = MultiStepLr::new(1.0, vec![2], 0.5);
        let rates: Vec<f64> = (0..4).map(|_| schedule.step()).collect();
        assert_eq!(rates, vec![1.0, 0.5, 0.5, 0.5]);
        assert_eq!(schedule.last_epoch(), 4);
    }

    #[test]
    fn test_resume_position() {
        let mut schedule = MultiStepLr::new(0.1, vec![50, 100, 150], 0.1).starting_at(120);
        assert_relative_eq!(schedule.step(), 0.001, epsilon = 1e-12);
        assert_eq!(schedule.last_epoch(), 121);

        let mut schedule = MultiStepLr::new(0.1, vec![50, 100, 150], 0.1).starting_at(99);
        assert_relative_eq!(schedule.step(), 0.001, epsilon = 1e-12);
    }

    #[test]
    fn test_decay_lands_on_epoch_before_each_milestone() {
        // Stepping at the top of every epoch: epoch e trains at lr_at(e + 1).
        let mut schedule = MultiStepLr::new(0.1, vec![50, 100, 150], 0.1);
        let rates: Vec<f64> = (0..200).map(|_| schedule.step()).collect();
        for (epoch, &rate) in rates.iter().enumerate() {
            let decays = [50, 100, 150].iter().filter(|&&m| m <= epoch + 1).count();
            let expected = 0.1 * 0.1_f64.powi(decays as i32);
            assert_relative_eq!(rate, expected, epsilon = 1e-12);
        }
        assert_relative_eq!(rates[48], 0.1);
        assert_relative_eq!(rates[49], 0.01, epsilon = 1e-12);
        assert_relative_eq!(rates[99], 0.001, epsilon = 1e-12);
        assert_relative_eq!(rates[149], 0.0001, epsilon = 1e-12);
    }

    #[test]
    fn test_unsorted_milestones() {
        let schedule = MultiStepLr::new(1.0, vec![30, 10], 0.1);
        assert_eq!(schedule.milestones(), &[10, 30]);
        assert_relative_eq!(schedule.lr_at(20), 0.1, epsilon = 1e-12);
    }
}
