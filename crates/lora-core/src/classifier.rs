//! GPT-2 with a sequence classification head.
//!
//! The head reads the hidden state of the last non-padding token of each
//! sequence, so padding must be identifiable through `pad_token_id`.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use tch::{nn, Device, Kind, Tensor};

use crate::config::Gpt2Config;
use crate::error::{ModelError, Result};
use crate::kv_cache::KVCache;
use crate::linear::{AdaptableLinear, Linear};
use crate::transformer::Gpt2Model;

pub const SCORE_WEIGHT: &str = "score.weight";

/// Anything that maps token ids to class logits.
///
/// Implemented by the base model and by adapted models wrapping it, so
/// evaluation runs unchanged on either.
pub trait SequenceClassifier {
    /// input_ids, attention_mask: [batch, seq_len] -> logits [batch, num_labels]
    fn classify_t(&self, input_ids: &Tensor, attention_mask: &Tensor, train: bool) -> Result<Tensor>;
    fn num_labels(&self) -> i64;
    fn device(&self) -> Device;
}

pub struct ClassifierOutput {
    pub logits: Tensor,
    pub past_key_values: Option<KVCache>,
}

pub struct Gpt2ForSequenceClassification {
    vs: nn::VarStore,
    transformer: Gpt2Model,
    score: Linear,
    config: Gpt2Config,
}

impl Gpt2ForSequenceClassification {
    /// Randomly initialised model. Use [`crate::loader`] for pretrained weights.
    pub fn new(config: &Gpt2Config, device: Device) -> Self {
        let vs = nn::VarStore::new(device);
        let root = vs.root();
        let transformer = Gpt2Model::new(&(&root / "transformer"), config);
        let score = Linear::new(&(&root / "score"), config.n_embd, config.num_labels, false, config.initializer_range);

        Self {
            vs,
            transformer,
            score,
            config: config.clone(),
        }
    }

    pub fn config(&self) -> &Gpt2Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Gpt2Config {
        &mut self.config
    }

    pub fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }

    pub fn var_store_mut(&mut self) -> &mut nn::VarStore {
        &mut self.vs
    }

    pub fn num_parameters(&self) -> i64 {
        self.vs.variables().values().map(|t| t.numel() as i64).sum()
    }

    pub fn forward_t(&self, input_ids: &Tensor, attention_mask: &Tensor, train: bool) -> Result<ClassifierOutput> {
        let (batch, seq_len) = input_ids.size2()?;
        let device = input_ids.device();

        let use_cache = self.config.use_cache && !(train && self.config.gradient_checkpointing);
        let (hidden, past_key_values) = self
            .transformer
            .forward_t(input_ids, Some(attention_mask), use_cache, train)?;

        let last = match self.config.pad_token_id {
            // Rightmost non-pad position; 0 for a row that is all padding.
            Some(pad) => {
                let positions = Tensor::arange(seq_len, (Kind::Int64, device));
                (input_ids.ne(pad).to_kind(Kind::Int64) * positions).argmax(-1, false)
            }
            None if batch == 1 => Tensor::full(&[1], seq_len - 1, (Kind::Int64, device)),
            None => return Err(ModelError::MissingPadToken(batch)),
        };

        let rows = Tensor::arange(batch, (Kind::Int64, device));
        let pooled = hidden.index(&[Some(&rows), Some(&last)]);
        let logits = self.score.forward_t(&pooled, train);

        Ok(ClassifierOutput {
            logits,
            past_key_values,
        })
    }

    /// Draws the head weight from `N(0, initializer_range)` with a seeded
    /// ChaCha8 stream, so equal seeds give equal heads on every platform.
    pub fn reset_classification_head(&mut self, seed: u64) -> Result<()> {
        let normal = Normal::new(0.0f32, self.config.initializer_range as f32)
            .map_err(|e| ModelError::InvalidInput(e.to_string()))?;
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let n = (self.config.num_labels * self.config.n_embd) as usize;
        let values: Vec<f32> = (0..n).map(|_| normal.sample(&mut rng)).collect();
        let init = Tensor::from_slice(&values)
            .view([self.config.num_labels, self.config.n_embd])
            .to_device(self.vs.device());

        let mut variables = self.vs.variables();
        let weight = variables
            .get_mut(SCORE_WEIGHT)
            .ok_or_else(|| ModelError::MissingWeights(vec![SCORE_WEIGHT.to_string()]))?;
        tch::no_grad(|| {
            weight.copy_(&init);
        });
        Ok(())
    }

    /// Projections adapters can attach to, with their dotted module names
    /// (`transformer.h.0.attn.c_attn`, ..., `score`).
    pub fn adaptable_layers(&self) -> Vec<(String, &dyn AdaptableLinear)> {
        let mut layers: Vec<(String, &dyn AdaptableLinear)> = Vec::new();
        for (i, block) in self.transformer.blocks.iter().enumerate() {
            let prefix = format!("transformer.h.{i}");
            layers.push((format!("{prefix}.attn.c_attn"), &block.attn.c_attn));
            layers.push((format!("{prefix}.attn.c_proj"), &block.attn.c_proj));
            layers.push((format!("{prefix}.mlp.c_fc"), &block.mlp.c_fc));
            layers.push((format!("{prefix}.mlp.c_proj"), &block.mlp.c_proj));
        }
        layers.push(("score".to_string(), &self.score));
        layers
    }

    pub fn adaptable_layers_mut(&mut self) -> Vec<(String, &mut dyn AdaptableLinear)> {
        let mut layers: Vec<(String, &mut dyn AdaptableLinear)> = Vec::new();
        for (i, block) in self.transformer.blocks.iter_mut().enumerate() {
            let prefix = format!("transformer.h.{i}");
            layers.push((format!("{prefix}.attn.c_attn"), &mut block.attn.c_attn));
            layers.push((format!("{prefix}.attn.c_proj"), &mut block.attn.c_proj));
            layers.push((format!("{prefix}.mlp.c_fc"), &mut block.mlp.c_fc));
            layers.push((format!("{prefix}.mlp.c_proj"), &mut block.mlp.c_proj));
        }
        layers.push(("score".to_string(), &mut self.score));
        layers
    }
}

impl SequenceClassifier for Gpt2ForSequenceClassification {
    fn classify_t(&self, input_ids: &Tensor, attention_mask: &Tensor, train: bool) -> Result<Tensor> {
        Ok(self.forward_t(input_ids, attention_mask, train)?.logits)
    }

    fn num_labels(&self) -> i64 {
        self.config.num_labels
    }

    fn device(&self) -> Device {
        self.vs.device()
    }
}

unsafe impl Send for Gpt2ForSequenceClassification {}
unsafe impl Sync for Gpt2ForSequenceClassification {}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny(pad: Option<i64>) -> Gpt2Config {
        Gpt2Config {
            vocab_size: 64,
            n_positions: 16,
            n_embd: 32,
            n_layer: 2,
            n_head: 4,
            pad_token_id: pad,
            ..Default::default()
        }
    }

    #[test]
    fn logits_have_one_column_per_label() {
        let model = Gpt2ForSequenceClassification::new(&tiny(Some(0)), Device::Cpu);
        let ids = Tensor::from_slice(&[3i64, 4, 5, 0, 7, 8, 0, 0]).view([2, 4]);
        let mask = ids.ne(0).to_kind(Kind::Int64);
        let out = model.forward_t(&ids, &mask, false).unwrap();
        assert_eq!(out.logits.size(), vec![2, 2]);
        assert_eq!(out.past_key_values.map(|c| c.len()), Some(2));
    }

    #[test]
    fn pooling_ignores_trailing_padding() {
        let model = Gpt2ForSequenceClassification::new(&tiny(Some(0)), Device::Cpu);
        let short = Tensor::from_slice(&[3i64, 4]).view([1, 2]);
        let padded = Tensor::from_slice(&[3i64, 4, 0, 0]).view([1, 4]);

        let a = model.classify_t(&short, &short.ones_like(), false).unwrap();
        let b = model
            .classify_t(&padded, &Tensor::from_slice(&[1i64, 1, 0, 0]).view([1, 4]), false)
            .unwrap();
        assert!(a.allclose(&b, 1e-5, 1e-5, false));
    }

    #[test]
    fn batch_without_pad_token_is_an_error() {
        let model = Gpt2ForSequenceClassification::new(&tiny(None), Device::Cpu);
        let ids = Tensor::from_slice(&[1i64, 2, 3, 4]).view([2, 2]);
        let err = model.classify_t(&ids, &ids.ones_like(), false).unwrap_err();
        assert!(matches!(err, ModelError::MissingPadToken(2)));

        let single = Tensor::from_slice(&[1i64, 2]).view([1, 2]);
        assert!(model.classify_t(&single, &single.ones_like(), false).is_ok());
    }

    #[test]
    fn checkpointing_drops_presents_while_training() {
        let mut config = tiny(Some(0));
        config.gradient_checkpointing = true;
        let model = Gpt2ForSequenceClassification::new(&config, Device::Cpu);
        let ids = Tensor::from_slice(&[1i64, 2]).view([1, 2]);
        let out = model.forward_t(&ids, &ids.ones_like(), true).unwrap();
        assert!(out.past_key_values.is_none());
    }

    #[test]
    fn head_reset_is_seeded() {
        let mut a = Gpt2ForSequenceClassification::new(&tiny(Some(0)), Device::Cpu);
        let mut b = Gpt2ForSequenceClassification::new(&tiny(Some(0)), Device::Cpu);
        a.reset_classification_head(42).unwrap();
        b.reset_classification_head(42).unwrap();
        let (va, vb) = (a.var_store().variables(), b.var_store().variables());
        assert!(va[SCORE_WEIGHT].equal(&vb[SCORE_WEIGHT]));

        b.reset_classification_head(7).unwrap();
        let vb = b.var_store().variables();
        assert!(!va[SCORE_WEIGHT].equal(&vb[SCORE_WEIGHT]));
    }

    #[test]
    fn parameter_count_matches_config() {
        let config = tiny(Some(0));
        let model = Gpt2ForSequenceClassification::new(&config, Device::Cpu);
        assert_eq!(model.num_parameters(), config.num_parameters());
        assert_eq!(model.adaptable_layers().len(), 2 * 4 + 1);
    }
}
