use datasets::TokenizedSplit;
use lora_core::SequenceClassifier;
use peft::PeftModel;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tch::{nn, nn::OptimizerConfig, Device};

use crate::args::{IntervalStrategy, TrainingArguments};
use crate::batch::Batch;
use crate::error::{Result, TrainerError};
use crate::evaluate::evaluate;

/// One row of the training log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub step: usize,
    /// Fractional epoch at the time of logging.
    pub epoch: f64,
    pub metrics: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainOutput {
    pub global_step: usize,
    /// Mean loss over every optimizer step.
    pub training_loss: f64,
    /// `train_runtime`, `train_samples_per_second`, `train_steps_per_second`,
    /// `train_loss` and `epoch`.
    pub metrics: BTreeMap<String, f64>,
    pub log_history: Vec<LogEntry>,
}

/// Linear warmup from 0, then linear decay to 0 at `total` steps.
pub fn learning_rate_at(step: usize, warmup: usize, total: usize, base: f64) -> f64 {
    if step < warmup {
        return base * step as f64 / warmup as f64;
    }
    let remaining = total.saturating_sub(step) as f64;
    base * remaining / total.saturating_sub(warmup).max(1) as f64
}

pub struct Trainer {
    model: PeftModel,
    args: TrainingArguments,
    optimizer: nn::Optimizer,
    device: Device,
    global_step: usize,
    log_history: Vec<LogEntry>,
}

impl Trainer {
    /// The optimizer sees the adapter store only; base weights stay frozen.
    pub fn new(mut model: PeftModel, args: TrainingArguments, device: Device) -> Result<Self> {
        args.validate()?;
        if model.device() != device {
            return Err(TrainerError::InvalidArgument(format!(
                "model lives on {:?} but training was requested on {:?}",
                model.device(),
                device
            )));
        }

        if args.gradient_checkpointing {
            let config = model.base_model_mut().config_mut();
            config.gradient_checkpointing = true;
            config.disable_cache_for_checkpointing();
        }

        let optimizer = nn::AdamW {
            wd: args.weight_decay,
            ..Default::default()
        }
        .build(model.adapter_var_store(), args.learning_rate)?;

        Ok(Self {
            model,
            args,
            optimizer,
            device,
            global_step: 0,
            log_history: Vec::new(),
        })
    }

    pub fn model(&self) -> &PeftModel {
        &self.model
    }

    pub fn into_model(self) -> PeftModel {
        self.model
    }

    pub fn args(&self) -> &TrainingArguments {
        &self.args
    }

    pub fn global_step(&self) -> usize {
        self.global_step
    }

    /// Runs `num_train_epochs` full passes over `train`.
    ///
    /// Each epoch visits the examples in a fresh order drawn from
    /// `seed + epoch`. Evaluation on `eval` and checkpointing follow the
    /// configured strategies.
    pub fn train(&mut self, train: &TokenizedSplit, eval: Option<&TokenizedSplit>) -> Result<TrainOutput> {
        if train.is_empty() {
            return Err(TrainerError::EmptyDataset(train.name().to_string()));
        }
        if self.args.evaluation_strategy != IntervalStrategy::No && eval.is_none() {
            return Err(TrainerError::InvalidArgument(
                "evaluation_strategy requires an evaluation split".to_string(),
            ));
        }

        let batch_size = self.args.per_device_train_batch_size;
        let epochs = self.args.num_train_epochs;
        let steps_per_epoch = train.len().div_ceil(batch_size);
        let total_steps = steps_per_epoch * epochs;
        let eval_every = TrainingArguments::step_interval(self.args.evaluation_strategy, self.args.eval_steps);
        let save_every = TrainingArguments::step_interval(self.args.save_strategy, self.args.save_steps);

        log::info!("***** Running training *****");
        log::info!("  Num examples = {}", train.len());
        log::info!("  Num epochs = {}", epochs);
        log::info!("  Batch size = {}", batch_size);
        log::info!("  Total optimization steps = {}", total_steps);
        log::info!("  {}", self.model.trainable_parameters());

        let start = Instant::now();
        let mut loss_total = 0.0;
        let mut loss_since_log = 0.0;
        let mut steps_since_log = 0;
        let mut order: Vec<usize> = (0..train.len()).collect();

        for epoch in 0..epochs {
            let mut rng = ChaCha8Rng::seed_from_u64(self.args.seed.wrapping_add(epoch as u64));
            order.sort_unstable();
            order.shuffle(&mut rng);

            for chunk in order.chunks(batch_size) {
                let batch = Batch::collate(train, chunk, self.device)?;
                let lr = learning_rate_at(self.global_step, self.args.warmup_steps, total_steps, self.args.learning_rate);
                self.optimizer.set_lr(lr);

                let logits = self
                    .model
                    .classify_t(&batch.input_ids, &batch.attention_mask, true)?;
                let loss = logits.cross_entropy_for_logits(&batch.labels);
                match self.args.max_grad_norm {
                    Some(max_norm) => self.optimizer.backward_step_clip_norm(&loss, max_norm),
                    None => self.optimizer.backward_step(&loss),
                }

                let loss_val = loss.double_value(&[]);
                loss_total += loss_val;
                loss_since_log += loss_val;
                steps_since_log += 1;
                self.global_step += 1;
                let progress = self.global_step as f64 / steps_per_epoch as f64;

                if self.global_step % self.args.logging_steps == 0 {
                    self.log(
                        progress,
                        BTreeMap::from([
                            ("loss".to_string(), loss_since_log / steps_since_log as f64),
                            ("learning_rate".to_string(), lr),
                        ]),
                    );
                    loss_since_log = 0.0;
                    steps_since_log = 0;
                }
                if let (Some(every), Some(eval)) = (eval_every, eval) {
                    if self.global_step % every == 0 {
                        self.run_evaluation(eval, progress)?;
                    }
                }
                if save_every.is_some_and(|every| self.global_step % every == 0) {
                    self.save_checkpoint()?;
                }
            }

            let progress = (epoch + 1) as f64;
            if self.args.evaluation_strategy == IntervalStrategy::Epoch {
                if let Some(eval) = eval {
                    self.run_evaluation(eval, progress)?;
                }
            }
            if self.args.save_strategy == IntervalStrategy::Epoch {
                self.save_checkpoint()?;
            }
        }

        let runtime = start.elapsed().as_secs_f64().max(f64::EPSILON);
        let training_loss = loss_total / self.global_step.max(1) as f64;
        let metrics = BTreeMap::from([
            ("train_runtime".to_string(), runtime),
            ("train_samples_per_second".to_string(), (train.len() * epochs) as f64 / runtime),
            ("train_steps_per_second".to_string(), self.global_step as f64 / runtime),
            ("train_loss".to_string(), training_loss),
            ("epoch".to_string(), epochs as f64),
        ]);
        self.log(epochs as f64, metrics.clone());
        log::info!("Training completed in {:.1}s", runtime);

        Ok(TrainOutput {
            global_step: self.global_step,
            training_loss,
            metrics,
            log_history: self.log_history.clone(),
        })
    }

    /// Persists the adapter only (config and tensors).
    pub fn save_model<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        self.model.save_pretrained(dir)?;
        Ok(())
    }

    fn log(&mut self, epoch: f64, metrics: BTreeMap<String, f64>) {
        log::info!("step {} | epoch {:.2} | {:?}", self.global_step, epoch, metrics);
        self.log_history.push(LogEntry {
            step: self.global_step,
            epoch,
            metrics,
        });
    }

    fn run_evaluation(&mut self, eval: &TokenizedSplit, epoch: f64) -> Result<()> {
        let result = evaluate(&self.model, eval, self.args.per_device_eval_batch_size)?;
        let mut metrics = result.to_metrics("eval");
        metrics.insert("epoch".to_string(), epoch);
        self.log(epoch, metrics);
        Ok(())
    }

    fn save_checkpoint(&self) -> Result<PathBuf> {
        let dir = self.args.output_dir.join(format!("checkpoint-{}", self.global_step));
        log::info!("Saving model checkpoint to {}", dir.display());
        self.save_model(&dir)?;
        Ok(dir)
    }
}
