#![allow(dead_code)]

use datasets::{Sentiment, TokenizedExample, TokenizedSplit};
use lora_core::safetensors_util::save_safetensors;
use lora_core::{Gpt2Config, Gpt2ForSequenceClassification, LoadOptions, ModelFiles};
use peft::{LoraConfig, TaskType};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use std::path::Path;
use tch::{Device, Tensor};
use trainer::{IntervalStrategy, TrainingArguments};

pub const EOS: &str = "<|endoftext|>";
pub const PAD_ID: i64 = 27;

pub fn tiny_config() -> Gpt2Config {
    Gpt2Config {
        vocab_size: 64,
        n_positions: 32,
        n_embd: 32,
        n_layer: 2,
        n_head: 4,
        ..Default::default()
    }
}

pub fn lora_config() -> LoraConfig {
    LoraConfig {
        r: 4,
        lora_alpha: 16.0,
        lora_dropout: 0.0,
        target_modules: vec!["c_attn".to_string()],
        task_type: TaskType::SeqCls,
        fan_in_fan_out: true,
        modules_to_save: vec![],
        base_model_name_or_path: None,
    }
}

pub fn options() -> LoadOptions {
    LoadOptions {
        num_labels: 2,
        pad_token_id: PAD_ID,
        seed: 42,
    }
}

pub fn training_args(output_dir: &Path) -> TrainingArguments {
    TrainingArguments {
        output_dir: output_dir.to_path_buf(),
        per_device_train_batch_size: 4,
        per_device_eval_batch_size: 8,
        num_train_epochs: 2,
        learning_rate: 1e-2,
        logging_steps: 1,
        evaluation_strategy: IntervalStrategy::Epoch,
        eval_steps: None,
        save_strategy: IntervalStrategy::Epoch,
        save_steps: None,
        seed: 42,
        weight_decay: 0.0,
        warmup_steps: 0,
        max_grad_norm: Some(1.0),
        gradient_checkpointing: false,
    }
}

/// Positive when the first token is odd, right-padded with `PAD_ID`.
pub fn synthetic_split(name: &str, n: usize, max_length: usize, seed: u64) -> TokenizedSplit {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let examples = (0..n)
        .map(|_| {
            let real = rng.gen_range(1..=max_length);
            let mut input_ids: Vec<i64> = (0..real).map(|_| rng.gen_range(0..26)).collect();
            let label = if input_ids[0] % 2 == 1 { Sentiment::Positive } else { Sentiment::Negative };
            input_ids.resize(max_length, PAD_ID);
            let mut attention_mask = vec![1; real];
            attention_mask.resize(max_length, 0);
            TokenizedExample {
                input_ids,
                attention_mask,
                label,
            }
        })
        .collect();
    TokenizedSplit::new(name, max_length, examples).unwrap()
}

/// A checkpoint directory laid out like the Hub's `gpt2` repository, with a
/// character-level vocabulary (`a`..`z`, `Ġ`, `<|endoftext|>`).
pub fn write_model_dir(dir: &Path) -> ModelFiles {
    std::fs::create_dir_all(dir).unwrap();
    let config = tiny_config();
    let source = Gpt2ForSequenceClassification::new(&config, Device::Cpu);
    let tensors: Vec<(String, Tensor)> = source
        .var_store()
        .variables()
        .into_iter()
        .filter(|(name, _)| name.starts_with("transformer."))
        .map(|(name, t)| (name.trim_start_matches("transformer.").to_string(), t))
        .collect();

    let mut vocab: HashMap<String, u32> = "abcdefghijklmnopqrstuvwxyz\u{0120}"
        .chars()
        .enumerate()
        .map(|(id, c)| (c.to_string(), id as u32))
        .collect();
    vocab.insert(EOS.to_string(), PAD_ID as u32);

    let files = ModelFiles {
        model_id: dir.display().to_string(),
        config: dir.join("config.json"),
        weights: dir.join("model.safetensors"),
        vocab: dir.join("vocab.json"),
        merges: dir.join("merges.txt"),
    };
    std::fs::write(&files.config, serde_json::to_string(&config).unwrap()).unwrap();
    std::fs::write(&files.vocab, serde_json::to_string(&vocab).unwrap()).unwrap();
    std::fs::write(&files.merges, "#version: 0.2\n").unwrap();
    save_safetensors(&tensors, &files.weights).unwrap();
    files
}
