use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Result, TrainerError};

/// When to evaluate or save during training.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalStrategy {
    No,
    Steps,
    Epoch,
}

/// Execution options of a training run.
///
/// Required options have no defaults, so a typo or omission in the YAML is a
/// load error rather than a silently different run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrainingArguments {
    /// Checkpoints and reports are written here.
    pub output_dir: PathBuf,
    pub per_device_train_batch_size: usize,
    pub per_device_eval_batch_size: usize,
    pub num_train_epochs: usize,
    pub learning_rate: f64,
    /// Log the mean training loss every this many optimizer steps.
    pub logging_steps: usize,
    pub evaluation_strategy: IntervalStrategy,
    #[serde(default)]
    pub eval_steps: Option<usize>,
    pub save_strategy: IntervalStrategy,
    #[serde(default)]
    pub save_steps: Option<usize>,
    /// Seeds the per-epoch shuffle.
    pub seed: u64,
    #[serde(default)]
    pub weight_decay: f64,
    /// Linear warmup from 0 to `learning_rate` over this many steps.
    #[serde(default)]
    pub warmup_steps: usize,
    #[serde(default)]
    pub max_grad_norm: Option<f64>,
    /// Turns the model's key/value cache off for training. Activations are not
    /// recomputed; this does not reduce memory.
    #[serde(default)]
    pub gradient_checkpointing: bool,
}

impl TrainingArguments {
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(TrainerError::InvalidArgument(msg));

        if self.per_device_train_batch_size == 0 || self.per_device_eval_batch_size == 0 {
            return invalid("batch sizes must be positive".to_string());
        }
        if self.num_train_epochs == 0 {
            return invalid("num_train_epochs must be positive".to_string());
        }
        if !(self.learning_rate > 0.0) {
            return invalid(format!("learning_rate must be positive, got {}", self.learning_rate));
        }
        if self.logging_steps == 0 {
            return invalid("logging_steps must be positive".to_string());
        }
        if self.weight_decay < 0.0 {
            return invalid(format!("weight_decay must be non-negative, got {}", self.weight_decay));
        }
        if let Some(norm) = self.max_grad_norm {
            if !(norm > 0.0) {
                return invalid(format!("max_grad_norm must be positive, got {norm}"));
            }
        }
        for (name, strategy, steps) in [
            ("eval_steps", self.evaluation_strategy, self.eval_steps),
            ("save_steps", self.save_strategy, self.save_steps),
        ] {
            if strategy == IntervalStrategy::Steps && !steps.is_some_and(|s| s > 0) {
                return invalid(format!("{name} must be a positive integer for the `steps` strategy"));
            }
        }
        Ok(())
    }

    /// Interval in steps when `strategy` is `steps`.
    pub(crate) fn step_interval(strategy: IntervalStrategy, steps: Option<usize>) -> Option<usize> {
        match strategy {
            IntervalStrategy::Steps => steps,
            _ => None,
        }
    }
}
