use datasets::TokenizedSplit;
use lora_core::SequenceClassifier;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;

use crate::batch::Batch;
use crate::error::{Result, TrainerError};
use crate::metrics;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Mean cross-entropy per example.
    pub loss: f64,
    pub accuracy: f64,
    pub num_examples: usize,
    pub runtime_secs: f64,
    pub samples_per_second: f64,
    pub steps_per_second: f64,
}

impl EvaluationResult {
    /// Flat metrics named `<prefix>_loss`, `<prefix>_accuracy`, ...
    pub fn to_metrics(&self, prefix: &str) -> BTreeMap<String, f64> {
        BTreeMap::from([
            (format!("{prefix}_loss"), self.loss),
            (format!("{prefix}_accuracy"), self.accuracy),
            (format!("{prefix}_runtime"), self.runtime_secs),
            (format!("{prefix}_samples_per_second"), self.samples_per_second),
            (format!("{prefix}_steps_per_second"), self.steps_per_second),
        ])
    }
}

/// Accuracy and mean loss of `model` over `split`, without gradients.
///
/// Works for any [`SequenceClassifier`], adapted or not.
pub fn evaluate<M: SequenceClassifier + ?Sized>(
    model: &M,
    split: &TokenizedSplit,
    batch_size: usize,
) -> Result<EvaluationResult> {
    if split.is_empty() {
        return Err(TrainerError::EmptyDataset(split.name().to_string()));
    }
    if batch_size == 0 {
        return Err(TrainerError::InvalidArgument("eval batch size must be positive".to_string()));
    }

    let _guard = tch::no_grad_guard();
    let device = model.device();
    let start = Instant::now();

    let indices: Vec<usize> = (0..split.len()).collect();
    let mut loss_sum = 0.0;
    let mut correct = 0;
    let mut steps = 0;

    for chunk in indices.chunks(batch_size) {
        let batch = Batch::collate(split, chunk, device)?;
        let logits = model.classify_t(&batch.input_ids, &batch.attention_mask, false)?;
        let loss = logits.cross_entropy_for_logits(&batch.labels);
        loss_sum += loss.double_value(&[]) * batch.len() as f64;
        correct += metrics::correct_predictions(&logits, &batch.labels);
        steps += 1;
    }

    let runtime = start.elapsed().as_secs_f64().max(f64::EPSILON);
    let n = split.len();
    let result = EvaluationResult {
        loss: loss_sum / n as f64,
        accuracy: metrics::accuracy(correct, n),
        num_examples: n,
        runtime_secs: runtime,
        samples_per_second: n as f64 / runtime,
        steps_per_second: steps as f64 / runtime,
    };
    log::info!(
        "Evaluated `{}`: loss {:.4}, accuracy {:.4} ({} examples, {:.1}s)",
        split.name(),
        result.loss,
        result.accuracy,
        n,
        runtime
    );
    Ok(result)
}
