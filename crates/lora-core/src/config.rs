use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;

fn default_model_type() -> String {
    "gpt2".to_string()
}

fn default_num_labels() -> i64 {
    2
}

fn default_true() -> bool {
    true
}

/// GPT-2 hyperparameters, read from a Hugging Face `config.json`.
///
/// Keys this crate does not use (`architectures`, `task_specific_params`, ...)
/// are ignored on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gpt2Config {
    #[serde(default = "default_model_type")]
    pub model_type: String,
    pub vocab_size: i64,
    /// Maximum sequence length (learned position embeddings).
    pub n_positions: i64,
    /// Width of the residual stream.
    pub n_embd: i64,
    pub n_layer: i64,
    pub n_head: i64,
    /// Inner MLP width, `4 * n_embd` when absent.
    #[serde(default)]
    pub n_inner: Option<i64>,
    pub resid_pdrop: f64,
    pub embd_pdrop: f64,
    pub attn_pdrop: f64,
    pub layer_norm_epsilon: f64,
    pub initializer_range: f64,
    #[serde(default)]
    pub bos_token_id: Option<i64>,
    #[serde(default)]
    pub eos_token_id: Option<i64>,
    #[serde(default)]
    pub pad_token_id: Option<i64>,
    /// Output width of the classification head.
    #[serde(default = "default_num_labels")]
    pub num_labels: i64,
    /// Return per-layer key/value tensors from the forward pass.
    #[serde(default = "default_true")]
    pub use_cache: bool,
    /// Only reconciles the cache: when set, `use_cache` is turned off. No
    /// activations are recomputed, so memory use during training is unchanged.
    #[serde(default)]
    pub gradient_checkpointing: bool,
}

impl Default for Gpt2Config {
    fn default() -> Self {
        Self {
            model_type: default_model_type(),
            vocab_size: 50257,
            n_positions: 1024,
            n_embd: 768,
            n_layer: 12,
            n_head: 12,
            n_inner: None,
            resid_pdrop: 0.1,
            embd_pdrop: 0.1,
            attn_pdrop: 0.1,
            layer_norm_epsilon: 1e-5,
            initializer_range: 0.02,
            bos_token_id: Some(50256),
            eos_token_id: Some(50256),
            pad_token_id: None,
            num_labels: 2,
            use_cache: true,
            gradient_checkpointing: false,
        }
    }
}

impl Gpt2Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn head_size(&self) -> i64 {
        self.n_embd / self.n_head
    }

    pub fn inner_size(&self) -> i64 {
        self.n_inner.unwrap_or(4 * self.n_embd)
    }

    /// Parameter count of the backbone plus a bias-free `num_labels` head.
    pub fn num_parameters(&self) -> i64 {
        let e = self.n_embd;
        let inner = self.inner_size();
        let layer_norm = 2 * e;
        let attn = (e * 3 * e + 3 * e) + (e * e + e);
        let mlp = (e * inner + inner) + (inner * e + e);
        let block = 2 * layer_norm + attn + mlp;
        self.vocab_size * e + self.n_positions * e + self.n_layer * block + layer_norm + e * self.num_labels
    }

    /// Switches the cache off when `gradient_checkpointing` is set. This is
    /// the flag's whole effect. Returns true if it changed.
    pub fn disable_cache_for_checkpointing(&mut self) -> bool {
        if self.gradient_checkpointing && self.use_cache {
            log::warn!("`use_cache=true` is incompatible with gradient checkpointing. Setting `use_cache=false`.");
            self.use_cache = false;
            return true;
        }
        false
    }
}
