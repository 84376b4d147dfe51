//! Per-batch bookkeeping for one pass.

/// Incremental arithmetic mean.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunningMean {
    sum: f64,
    count: usize,
}

impl RunningMean {
    pub fn push(&mut self, value: f32) {
        self.sum += value as f64;
        self.count += 1;
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Mean of everything pushed so far; 0 before the first value.
    pub fn value(&self) -> f32 {
        if self.count == 0 {
            0.0
        } else {
            (self.sum / self.count as f64) as f32
        }
    }
}

/// Loss, Dice and Hausdorff for every batch of a pass, in batch order.
#[derive(Debug, Clone, Default)]
pub struct EpochHistory {
    pub loss: Vec<f32>,
    pub dice: Vec<f32>,
    pub hausdorff: Vec<f32>,
    running_loss: RunningMean,
    running_dice: RunningMean,
    running_hausdorff: RunningMean,
}

impl EpochHistory {
    pub fn with_capacity(batches: usize) -> Self {
        Self {
            loss: Vec::with_capacity(batches),
            dice: Vec::with_capacity(batches),
            hausdorff: Vec::with_capacity(batches),
            ..Default::default()
        }
    }

    pub fn record(&mut self, loss: f32, dice: f32, hausdorff: f32) {
        self.loss.push(loss);
        self.dice.push(dice);
        self.hausdorff.push(hausdorff);
        self.running_loss.push(loss);
        self.running_dice.push(dice);
        self.running_hausdorff.push(hausdorff);
    }

    pub fn len(&self) -> usize {
        self.loss.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loss.is_empty()
    }

    pub fn running_loss(&self) -> f32 {
        self.running_loss.value()
    }

    pub fn running_dice(&self) -> f32 {
        self.running_dice.value()
    }

    pub fn running_hausdorff(&self) -> f32 {
        self.running_hausdorff.value()
    }

    pub fn mean_loss(&self) -> f32 {
        mean(&self.loss)
    }

    pub fn mean_dice(&self) -> f32 {
        mean(&self.dice)
    }

    pub fn mean_hausdorff(&self) -> f32 {
        mean(&self.hausdorff)
    }

    pub fn summary(&self) -> PassSummary {
        PassSummary {
            loss: self.mean_loss(),
            dice: self.mean_dice(),
            hausdorff: self.mean_hausdorff(),
            batches: self.len(),
        }
    }
}

/// Means over one pass, as reported on the console.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PassSummary {
    pub loss: f32,
    pub dice: f32,
    pub hausdorff: f32,
    pub batches: usize,
}

fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    (values.iter().map(|v| *v as f64).sum::<f64>() / values.len() as f64) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_keeps_sequences_aligned() {
        let mut h = EpochHistory::with_capacity(2);
        h.record(0.5, 0.7, 3.0);
        h.record(0.3, 0.9, 1.0);
        assert_eq!(h.len(), 2);
        assert_eq!(h.loss, vec![0.5, 0.3]);
        assert_eq!(h.dice, vec![0.7, 0.9]);
        assert_eq!(h.hausdorff, vec![3.0, 1.0]);
    }

    #[test]
    fn running_means_match_pass_means() {
        let mut h = EpochHistory::default();
        for (i, loss) in [0.1f32, 0.2, 0.3].into_iter().enumerate() {
            h.record(loss, i as f32 / 2.0, 4.0);
        }
        let s = h.summary();
        assert!((s.loss - 0.2).abs() < 1e-6);
        assert!((s.dice - 0.5).abs() < 1e-6);
        assert_eq!(s.batches, 3);
        assert_eq!(h.running_loss(), s.loss);
        assert_eq!(h.running_dice(), s.dice);
        assert_eq!(h.running_hausdorff(), s.hausdorff);
    }

    #[test]
    fn empty_history_reports_zero() {
        let h = EpochHistory::default();
        assert!(h.is_empty());
        assert_eq!(h.summary().loss, 0.0);
    }
}
