mod common;

use common::*;
use lora_core::{load_for_sequence_classification, SequenceClassifier};
use peft::{get_peft_model, PeftModel, ADAPTER_CONFIG_FILE, ADAPTER_WEIGHTS_FILE};
use std::collections::HashMap;
use tch::{Device, Tensor};
use trainer::{evaluate, IntervalStrategy, Trainer, TrainerError};

#[test]
fn training_changes_adapters_and_leaves_base_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let files = write_model_dir(&dir.path().join("model"));
    let train = synthetic_split("train", 12, 8, 1);
    let eval = synthetic_split("validation", 6, 8, 2);

    let base = load_for_sequence_classification(&files, options(), Device::Cpu).unwrap();
    let before: HashMap<String, Tensor> = base
        .var_store()
        .variables()
        .into_iter()
        .map(|(name, t)| (name, t.copy()))
        .collect();

    let model = get_peft_model(base, lora_config()).unwrap();
    let out_dir = dir.path().join("run");
    let mut trainer = Trainer::new(model, training_args(&out_dir), Device::Cpu).unwrap();
    let output = trainer.train(&train, Some(&eval)).unwrap();

    // 12 examples in batches of 4, two epochs.
    assert_eq!(output.global_step, 6);
    assert!(output.training_loss.is_finite());
    assert!(output.metrics.contains_key("train_samples_per_second"));
    let evals = output
        .log_history
        .iter()
        .filter(|entry| entry.metrics.contains_key("eval_accuracy"))
        .count();
    assert_eq!(evals, 2);
    for step in [3, 6] {
        let checkpoint = out_dir.join(format!("checkpoint-{step}"));
        assert!(checkpoint.join(ADAPTER_CONFIG_FILE).is_file());
        assert!(checkpoint.join(ADAPTER_WEIGHTS_FILE).is_file());
    }

    let model = trainer.into_model();
    for (name, tensor) in model.base_model().var_store().variables() {
        assert!(tensor.equal(&before[&name]), "{name} changed during training");
    }
    let moved = model
        .adapter_tensors()
        .into_iter()
        .filter(|(name, _)| name.contains("lora_B"))
        .any(|(_, t)| t.abs().max().double_value(&[]) > 0.0);
    assert!(moved, "lora_B stayed at zero");
}

#[test]
fn saved_adapter_reloads_onto_a_fresh_base() {
    let dir = tempfile::tempdir().unwrap();
    let files = write_model_dir(&dir.path().join("model"));
    let train = synthetic_split("train", 8, 8, 3);
    let eval = synthetic_split("validation", 8, 8, 4);

    let base = load_for_sequence_classification(&files, options(), Device::Cpu).unwrap();
    let model = get_peft_model(base, lora_config()).unwrap();
    let mut args = training_args(&dir.path().join("run"));
    args.evaluation_strategy = IntervalStrategy::No;
    args.save_strategy = IntervalStrategy::No;
    let mut trainer = Trainer::new(model, args, Device::Cpu).unwrap();
    trainer.train(&train, None).unwrap();

    let adapter_dir = dir.path().join("adapter");
    trainer.save_model(&adapter_dir).unwrap();
    let in_memory = evaluate(trainer.model(), &eval, 4).unwrap();

    let base = load_for_sequence_classification(&files, options(), Device::Cpu).unwrap();
    let reloaded = PeftModel::from_pretrained(base, &adapter_dir).unwrap();
    let from_disk = evaluate(&reloaded, &eval, 4).unwrap();

    assert_eq!(in_memory.accuracy, from_disk.accuracy);
    assert!((in_memory.loss - from_disk.loss).abs() < 1e-6);
}

#[test]
fn score_head_is_trained_and_saved_with_the_adapter() {
    let dir = tempfile::tempdir().unwrap();
    let files = write_model_dir(&dir.path().join("model"));
    let train = synthetic_split("train", 8, 8, 7);

    let base = load_for_sequence_classification(&files, options(), Device::Cpu).unwrap();
    let seeded_head = base.var_store().variables()["score.weight"].copy();
    let config = lora_config();
    assert!(config.modules_to_save.is_empty());

    let model = get_peft_model(base, config).unwrap();
    let mut args = training_args(&dir.path().join("run"));
    args.evaluation_strategy = IntervalStrategy::No;
    args.save_strategy = IntervalStrategy::No;
    let mut trainer = Trainer::new(model, args, Device::Cpu).unwrap();
    trainer.train(&train, None).unwrap();

    let trained_head = trainer.model().adapter_var_store().variables()["score.weight"].copy();
    assert!(!trained_head.equal(&seeded_head), "score head was not trained");

    let adapter_dir = dir.path().join("adapter");
    trainer.save_model(&adapter_dir).unwrap();
    let saved = std::fs::read_to_string(adapter_dir.join(ADAPTER_CONFIG_FILE)).unwrap();
    let saved: serde_json::Value = serde_json::from_str(&saved).unwrap();
    assert_eq!(saved["modules_to_save"], serde_json::json!(["score"]));

    let base = load_for_sequence_classification(&files, options(), Device::Cpu).unwrap();
    let reloaded = PeftModel::from_pretrained(base, &adapter_dir).unwrap();
    let reloaded_vars = reloaded.adapter_var_store().variables();
    assert!(reloaded_vars["score.weight"].equal(&trained_head));
}

#[test]
fn adapter_for_a_different_base_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let files = write_model_dir(&dir.path().join("model"));
    let base = load_for_sequence_classification(&files, options(), Device::Cpu).unwrap();
    let model = get_peft_model(base, lora_config()).unwrap();
    let adapter_dir = dir.path().join("adapter");
    model.save_pretrained(&adapter_dir).unwrap();

    let wider = lora_core::Gpt2Config {
        n_embd: 48,
        pad_token_id: Some(PAD_ID),
        ..tiny_config()
    };
    let other = lora_core::Gpt2ForSequenceClassification::new(&wider, Device::Cpu);
    let err = PeftModel::from_pretrained(other, &adapter_dir).err().unwrap();
    assert!(matches!(err, peft::PeftError::AdapterMismatch { .. }));
}

#[test]
fn evaluation_accepts_base_and_adapted_models() {
    let dir = tempfile::tempdir().unwrap();
    let files = write_model_dir(&dir.path().join("model"));
    let eval = synthetic_split("validation", 10, 8, 5);

    let base = load_for_sequence_classification(&files, options(), Device::Cpu).unwrap();
    let baseline = evaluate(&base, &eval, 4).unwrap();

    let adapted = get_peft_model(base, lora_config()).unwrap();
    let fresh = evaluate(&adapted, &eval, 4).unwrap();

    // Zero-initialised lora_B: identical predictions before training.
    assert_eq!(baseline.accuracy, fresh.accuracy);
    assert!((baseline.loss - fresh.loss).abs() < 1e-6);

    let models: [&dyn SequenceClassifier; 1] = [&adapted];
    for model in models {
        assert_eq!(evaluate(model, &eval, 3).unwrap().num_examples, 10);
    }
}

#[test]
fn empty_training_split_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let files = write_model_dir(&dir.path().join("model"));
    let base = load_for_sequence_classification(&files, options(), Device::Cpu).unwrap();
    let model = get_peft_model(base, lora_config()).unwrap();
    let mut trainer = Trainer::new(model, training_args(&dir.path().join("run")), Device::Cpu).unwrap();

    let empty = datasets::TokenizedSplit::new("train", 8, vec![]).unwrap();
    let eval = synthetic_split("validation", 2, 8, 6);
    assert!(matches!(trainer.train(&empty, Some(&eval)), Err(TrainerError::EmptyDataset(_))));
}

#[test]
fn gradient_checkpointing_only_turns_off_the_cache() {
    let dir = tempfile::tempdir().unwrap();
    let files = write_model_dir(&dir.path().join("model"));
    let eval = synthetic_split("validation", 6, 8, 8);
    let base = load_for_sequence_classification(&files, options(), Device::Cpu).unwrap();
    assert!(base.config().use_cache);
    let without = evaluate(&base, &eval, 3).unwrap();

    let model = get_peft_model(base, lora_config()).unwrap();
    let mut args = training_args(&dir.path().join("run"));
    args.gradient_checkpointing = true;
    let trainer = Trainer::new(model, args, Device::Cpu).unwrap();

    let config = trainer.model().base_model().config();
    assert!(config.gradient_checkpointing);
    assert!(!config.use_cache);

    let with = evaluate(trainer.model(), &eval, 3).unwrap();
    assert_eq!(with.accuracy, without.accuracy);
    assert!((with.loss - without.loss).abs() < 1e-6);
}
