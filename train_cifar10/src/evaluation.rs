use cifar10::{CLASSES, NUM_CLASSES};
use std::fmt;

/// Counts of actual class (rows) against predicted class (columns).
///
/// The diagonal holds correct predictions; everything off the diagonal is a
/// mistake. A row such as
///
/// ```text
/// cat   |   12    1   30  702   41   98   52   21   18   25
/// ```
///
/// says that of the cats in the test set, 702 were recognised and 98 were
/// taken for dogs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfusionMatrix {
    matrix: [[usize; NUM_CLASSES]; NUM_CLASSES],
}

/// Per-class figures derived from a [`ConfusionMatrix`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassMetrics {
    pub correct: usize,
    pub total: usize,
    /// Percentage of this class's samples that were recognised
    pub accuracy: f64,
    /// When the model predicts this class, how often is it right?
    pub precision: f64,
    /// Of all samples of this class, how many were found?
    pub recall: f64,
    /// Harmonic mean of precision and recall
    pub f1: f64,
}

impl ConfusionMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one prediction. Out-of-range classes are ignored.
    pub fn record(&mut self, actual: usize, predicted: usize) {
        if let Some(cell) = self
            .matrix
            .get_mut(actual)
            .and_then(|row| row.get_mut(predicted))
        {
            *cell += 1;
        }
    }

    pub fn record_batch(&mut self, actual: &[usize], predicted: &[usize]) {
        for (&a, &p) in actual.iter().zip(predicted) {
            self.record(a, p);
        }
    }

    pub fn get(&self, actual: usize, predicted: usize) -> usize {
        self.matrix[actual][predicted]
    }

    pub fn total(&self) -> usize {
        self.matrix.iter().flatten().sum()
    }

    pub fn correct(&self) -> usize {
        (0..NUM_CLASSES).map(|c| self.matrix[c][c]).sum()
    }

    /// Overall accuracy in percent.
    pub fn accuracy(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => 100.0 * self.correct() as f64 / total as f64,
        }
    }

    pub fn class_metrics(&self, class: usize) -> ClassMetrics {
        let true_positives = self.matrix[class][class];
        let total: usize = self.matrix[class].iter().sum();
        let predicted: usize = self.matrix.iter().map(|row| row[class]).sum();

        let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f64 / den as f64 };
        let precision = ratio(true_positives, predicted);
        let recall = ratio(true_positives, total);
        let f1 = match precision + recall {
            sum if sum > 0.0 => 2.0 * precision * recall / sum,
            _ => 0.0,
        };

        ClassMetrics {
            correct: true_positives,
            total,
            accuracy: 100.0 * recall,
            precision,
            recall,
            f1,
        }
    }

    /// Per-class performance table followed by the matrix itself.
    pub fn report(&self) -> String {
        let mut out = String::new();
        out.push_str("Class | Correct | Total | Accuracy | Precision | Recall | F1 Score\n");
        out.push_str("------|---------|-------|----------|-----------|--------|---------\n");
        for (class, name) in CLASSES.iter().enumerate() {
            let m = self.class_metrics(class);
            out.push_str(&format!(
                "{name:<5} | {:^7} | {:^5} | {:>7.2}% | {:>8.2}% | {:>5.2}% | {:>7.2}%\n",
                m.correct,
                m.total,
                m.accuracy,
                m.precision * 100.0,
                m.recall * 100.0,
                m.f1 * 100.0
            ));
        }
        out.push_str(&self.to_string());
        out
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\nConfusion Matrix:")?;
        writeln!(f, "      Predicted →")?;
        write!(f, "Actual")?;
        for name in CLASSES {
            write!(f, " {name:>5}")?;
        }
        writeln!(f)?;
        writeln!(f, "  ↓   +{}", "-".repeat(6 * NUM_CLASSES))?;
        for (class, row) in self.matrix.iter().enumerate() {
            write!(f, "{:<5} |", CLASSES[class])?;
            for count in row {
                write!(f, " {count:5}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
