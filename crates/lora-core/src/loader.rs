//! Building a sequence classifier from a pretrained GPT-2 checkpoint.

use tch::Device;

use crate::classifier::{Gpt2ForSequenceClassification, SCORE_WEIGHT};
use crate::config::Gpt2Config;
use crate::error::{ModelError, Result};
use crate::hub::ModelFiles;
use crate::safetensors_util::load_safetensors;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    pub num_labels: i64,
    pub pad_token_id: i64,
    /// Seed for the classification head when the checkpoint has none.
    pub seed: u64,
}

/// Hub GPT-2 checkpoints store backbone tensors without the `transformer.`
/// prefix (`h.0.attn.c_attn.weight`); fine-tuned ones keep it.
fn variable_name(key: &str) -> String {
    if key.starts_with("transformer.") || key.starts_with("score.") {
        key.to_string()
    } else {
        format!("transformer.{key}")
    }
}

/// Loads the backbone from `files` and attaches a `num_labels` head.
///
/// Every backbone tensor must be present with the right shape. A head missing
/// from the checkpoint is initialised from `options.seed`. Checkpoint tensors
/// with no counterpart (the LM head, attention mask buffers) are skipped.
pub fn load_for_sequence_classification(
    files: &ModelFiles,
    options: LoadOptions,
    device: Device,
) -> Result<Gpt2ForSequenceClassification> {
    let mut config = Gpt2Config::from_file(&files.config)?;
    if config.model_type != "gpt2" {
        return Err(ModelError::UnsupportedArchitecture(config.model_type));
    }
    config.num_labels = options.num_labels;
    config.pad_token_id = Some(options.pad_token_id);

    let mut model = Gpt2ForSequenceClassification::new(&config, device);
    let report = load_safetensors(model.var_store_mut(), &files.weights, variable_name)?;

    if !report.unexpected.is_empty() {
        log::debug!(
            "Skipped {} checkpoint tensors with no counterpart: {:?}",
            report.unexpected.len(),
            report.unexpected
        );
    }

    let (head, backbone): (Vec<String>, Vec<String>) =
        report.missing.into_iter().partition(|name| name == SCORE_WEIGHT);
    if !backbone.is_empty() {
        return Err(ModelError::MissingWeights(backbone));
    }
    if !head.is_empty() {
        log::warn!(
            "Some weights of GPT2ForSequenceClassification were not initialized from the checkpoint at {} and are newly initialized: [{}]",
            files.model_id,
            SCORE_WEIGHT
        );
        model.reset_classification_head(options.seed)?;
    }

    log::info!(
        "Loaded {} ({} layers, {} parameters, {} labels, pad id {})",
        files.model_id,
        config.n_layer,
        model.num_parameters(),
        config.num_labels,
        options.pad_token_id
    );
    Ok(model)
}
