//! End-to-end comparison run: baseline evaluation, LoRA fine-tuning, reload,
//! and report.
//!
//! Each stage owns the models it creates and drops them when it ends, so at
//! most one GPT-2 instance (plus adapters) is alive at a time.

use anyhow::{Context, Result};
use datasets::{
    CorpusSchema, CorpusSource, DatasetProvider, DatasetSplit, HubCorpus, LocalCorpus, Sentiment, TokenizedSplit,
};
use lora_core::{load_for_sequence_classification, resolve_model, LoadOptions, ModelFiles};
use peft::{get_peft_model, LoraConfig, PeftModel};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tch::Device;
use tokenizer::{resolve_pad_token, FixedLengthEncoder, SpecialTokens, BPE};

use crate::args::TrainingArguments;
use crate::error::TrainerError;
use crate::evaluate::{evaluate, EvaluationResult};
use crate::report::ComparisonReport;
use crate::train::Trainer;

pub const REPORT_FILE: &str = "comparison.json";
pub const TRAIN_RESULTS_FILE: &str = "train_results.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DeviceChoice {
    /// CUDA when available, CPU otherwise.
    #[default]
    Auto,
    Cpu,
    Cuda,
}

impl DeviceChoice {
    pub fn resolve(self) -> Device {
        match self {
            DeviceChoice::Auto => Device::cuda_if_available(),
            DeviceChoice::Cpu => Device::Cpu,
            DeviceChoice::Cuda => Device::Cuda(0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Dataset,
    /// Resolving or downloading the checkpoint files.
    Model,
    Tokenizer,
    Baseline,
    Adapter,
    Training,
    Reload,
    Report,
}

impl Stage {
    pub fn failed(self) -> String {
        format!("{self} stage failed")
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Dataset => "dataset",
            Stage::Model => "model",
            Stage::Tokenizer => "tokenizer",
            Stage::Baseline => "baseline",
            Stage::Adapter => "adapter",
            Stage::Training => "training",
            Stage::Reload => "reload",
            Stage::Report => "report",
        };
        f.write_str(name)
    }
}

fn default_num_labels() -> i64 {
    Sentiment::COUNT as i64
}

fn default_revision() -> String {
    "main".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelSection {
    /// Hub id (`gpt2`) or a local directory with the checkpoint files.
    pub name_or_path: String,
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    pub max_length: usize,
    #[serde(default = "default_num_labels")]
    pub num_labels: i64,
    /// Seeds the classification head.
    pub seed: u64,
    #[serde(default)]
    pub special_tokens: SpecialTokens,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataSection {
    /// Local corpus root. Splits are fetched from the Hub when absent.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default = "default_revision")]
    pub revision: String,
    pub corpus: String,
    pub task: String,
    #[serde(default)]
    pub schema: CorpusSchema,
    pub train_split: String,
    pub eval_split: String,
    pub train_size: usize,
    /// The full evaluation split when absent.
    #[serde(default)]
    pub eval_size: Option<usize>,
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    pub model: ModelSection,
    pub data: DataSection,
    pub lora: LoraConfig,
    pub training: TrainingArguments,
    /// Where the final adapter is saved, `<output_dir>/adapter` by default.
    #[serde(default)]
    pub adapter_dir: Option<PathBuf>,
    #[serde(default)]
    pub device: DeviceChoice,
    /// Evaluate the trained model before saving and compare with the reload.
    #[serde(default)]
    pub verify_reload: bool,
}

impl PipelineConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let config: Self =
            serde_yaml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.lora.validate()?;
        self.training.validate()?;
        if self.model.max_length == 0 {
            return Err(TrainerError::InvalidArgument("model.max_length must be positive".to_string()).into());
        }
        if self.data.train_size == 0 {
            return Err(TrainerError::InvalidArgument("data.train_size must be positive".to_string()).into());
        }
        Ok(())
    }

    pub fn adapter_dir(&self) -> PathBuf {
        self.adapter_dir
            .clone()
            .unwrap_or_else(|| self.training.output_dir.join("adapter"))
    }

    pub fn dataset_id(&self) -> String {
        format!("{}/{}", self.data.corpus, self.data.task)
    }
}

fn sample_splits<S: CorpusSource>(
    provider: &DatasetProvider<S>,
    data: &DataSection,
) -> datasets::Result<(DatasetSplit, DatasetSplit)> {
    let train = provider.subset(&data.train_split, data.seed, data.train_size)?;
    let eval = match data.eval_size {
        Some(size) => provider.subset(&data.eval_split, data.seed, size)?,
        None => provider.split(&data.eval_split)?,
    };
    Ok((train, eval))
}

fn load_splits(data: &DataSection) -> datasets::Result<(DatasetSplit, DatasetSplit)> {
    match &data.data_dir {
        Some(root) => {
            let source = LocalCorpus::new(root, data.schema.clone());
            sample_splits(&DatasetProvider::new(source, &data.corpus, &data.task), data)
        }
        None => {
            let source = HubCorpus::new(data.cache_dir.clone(), data.revision.clone(), data.schema.clone());
            sample_splits(&DatasetProvider::new(source, &data.corpus, &data.task), data)
        }
    }
}

fn check_label_space(num_labels: i64) -> crate::Result<()> {
    let data = Sentiment::COUNT as i64;
    if num_labels != data {
        return Err(TrainerError::LabelSpaceMismatch {
            model: num_labels,
            data,
        });
    }
    Ok(())
}

fn tokenize(
    files: &ModelFiles,
    model: &ModelSection,
    train: &DatasetSplit,
    eval: &DatasetSplit,
) -> Result<(TokenizedSplit, TokenizedSplit, i64)> {
    let bpe = BPE::from_files(&files.vocab, &files.merges)?;
    let pad = resolve_pad_token(&bpe, &model.special_tokens)?;
    let pad_id = i64::from(pad.id);
    let encoder = FixedLengthEncoder::new(&bpe, model.max_length, pad)?;
    Ok((train.tokenize(&encoder)?, eval.tokenize(&encoder)?, pad_id))
}

fn evaluate_baseline(
    files: &ModelFiles,
    options: LoadOptions,
    device: Device,
    eval: &TokenizedSplit,
    batch_size: usize,
) -> Result<EvaluationResult> {
    check_label_space(options.num_labels)?;
    let model = load_for_sequence_classification(files, options, device)?;
    Ok(evaluate(&model, eval, batch_size)?)
}

fn attach_adapter(files: &ModelFiles, options: LoadOptions, device: Device, config: &PipelineConfig) -> Result<PeftModel> {
    let base = load_for_sequence_classification(files, options, device)?;
    let mut lora = config.lora.clone();
    lora.base_model_name_or_path
        .get_or_insert_with(|| config.model.name_or_path.clone());
    Ok(get_peft_model(base, lora)?)
}

/// Trains, optionally evaluates the in-memory result, and saves the adapter.
fn train_and_save(
    model: PeftModel,
    config: &PipelineConfig,
    device: Device,
    train: &TokenizedSplit,
    eval: &TokenizedSplit,
) -> Result<Option<EvaluationResult>> {
    let output_dir = &config.training.output_dir;
    let mut trainer = Trainer::new(model, config.training.clone(), device)?;
    let output = trainer.train(train, Some(eval))?;

    std::fs::create_dir_all(output_dir)?;
    std::fs::write(output_dir.join(TRAIN_RESULTS_FILE), serde_json::to_string_pretty(&output)?)?;

    let in_memory = if config.verify_reload {
        Some(evaluate(trainer.model(), eval, config.training.per_device_eval_batch_size)?)
    } else {
        None
    };
    trainer.save_model(config.adapter_dir())?;
    Ok(in_memory)
}

fn reload_and_evaluate(
    files: &ModelFiles,
    options: LoadOptions,
    device: Device,
    config: &PipelineConfig,
    eval: &TokenizedSplit,
) -> Result<EvaluationResult> {
    let adapter_dir = config.adapter_dir();
    let base = load_for_sequence_classification(files, options, device)?;
    let reloaded = PeftModel::from_pretrained(base, &adapter_dir)?;

    let trained_on = reloaded.config().base_model_name_or_path.as_deref();
    if trained_on != Some(config.model.name_or_path.as_str()) {
        log::warn!(
            "Adapter in {} was trained on {:?}, loading it onto {}",
            adapter_dir.display(),
            trained_on,
            config.model.name_or_path
        );
    }
    Ok(evaluate(&reloaded, eval, config.training.per_device_eval_batch_size)?)
}

/// Runs every stage and writes `comparison.json` to the output directory.
pub fn run(config: &PipelineConfig) -> Result<ComparisonReport> {
    config.validate()?;
    let device = config.device.resolve();
    let eval_batch_size = config.training.per_device_eval_batch_size;
    log::info!("Using device: {:?}", device);

    let (train_split, eval_split) = load_splits(&config.data).with_context(|| Stage::Dataset.failed())?;

    let files = resolve_model(&config.model.name_or_path, config.model.cache_dir.as_deref())
        .with_context(|| Stage::Model.failed())?;
    let (train_data, eval_data, pad_token_id) =
        tokenize(&files, &config.model, &train_split, &eval_split).with_context(|| Stage::Tokenizer.failed())?;

    let options = LoadOptions {
        num_labels: config.model.num_labels,
        pad_token_id,
        seed: config.model.seed,
    };

    let baseline = evaluate_baseline(&files, options, device, &eval_data, eval_batch_size)
        .with_context(|| Stage::Baseline.failed())?;
    log::info!("Baseline accuracy: {:.4}", baseline.accuracy);

    let model = attach_adapter(&files, options, device, config).with_context(|| Stage::Adapter.failed())?;
    let trainable = model.trainable_parameters();

    let in_memory = train_and_save(model, config, device, &train_data, &eval_data)
        .with_context(|| Stage::Training.failed())?;

    let adapted = reload_and_evaluate(&files, options, device, config, &eval_data)
        .with_context(|| Stage::Reload.failed())?;

    let mut report = ComparisonReport::new(
        config.model.name_or_path.clone(),
        config.dataset_id(),
        baseline,
        adapted,
        trainable,
    );
    if let Some(in_memory) = in_memory {
        report = report.with_in_memory(in_memory);
    }
    if report.reload_matches() == Some(false) {
        log::warn!("Reloaded adapter does not reproduce the in-memory evaluation");
    }
    report
        .save_json(config.training.output_dir.join(REPORT_FILE))
        .with_context(|| Stage::Report.failed())?;

    log::info!("\n{}", report);
    Ok(report)
}
