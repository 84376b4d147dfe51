//! Console output for a training run.

use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;

use crate::history::PassSummary;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochReport {
    /// 1-based.
    pub epoch: usize,
    pub epochs: usize,
    pub lr: f64,
    pub train: PassSummary,
    pub val: PassSummary,
}

/// Receives the human-facing milestones of a run.
pub trait TrainingReporter {
    fn device(&self, description: &str);
    fn epoch_started(&self, epoch: usize, epochs: usize);
    fn epoch_finished(&self, report: &EpochReport);
    fn training_complete(&self);
    fn test_finished(&self, summary: &PassSummary);
    fn model_saved(&self, path: &Path);
}

/// Prints summaries to stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleReporter;

impl TrainingReporter for ConsoleReporter {
    fn device(&self, description: &str) {
        println!("Using device: {description}");
    }

    fn epoch_started(&self, epoch: usize, epochs: usize) {
        println!("\nEpoch [{epoch}/{epochs}]\n{}", "-".repeat(30));
    }

    fn epoch_finished(&self, report: &EpochReport) {
        println!("lr: {:.6}", report.lr);
        println!(
            "Train Loss: {:.4} - Train Dice: {:.4}",
            report.train.loss, report.train.dice
        );
        println!(
            "Val Loss: {:.4} - Val Dice: {:.4}",
            report.val.loss, report.val.dice
        );
    }

    fn training_complete(&self) {
        let rule = "-".repeat(30);
        println!("{rule}\nTraining complete\n{rule}");
    }

    fn test_finished(&self, summary: &PassSummary) {
        println!(
            "Test Loss: {:.4} - Test Dice: {:.4}",
            summary.loss, summary.dice
        );
    }

    fn model_saved(&self, path: &Path) {
        println!("Saved model to {}", path.display());
    }
}

/// Live bar for one pass. Hidden bars swallow all updates.
pub fn pass_progress(total: usize, label: &str, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(total as u64);
    let style = ProgressStyle::with_template(
        "{prefix:>10} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} batch {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("#>-");
    bar.set_style(style);
    bar.set_prefix(label.to_string());
    bar
}

/// Postfix shown next to the bar: running means so far.
pub fn progress_message(loss: f32, dice: f32) -> String {
    format!("loss: {loss:.4} dice: {dice:.4}")
}
