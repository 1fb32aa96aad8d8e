use tch::{nn, Kind, Tensor};

use crate::attention::CausalSelfAttention;
use crate::config::Gpt2Config;
use crate::error::{ModelError, Result};
use crate::kv_cache::KVCache;
use crate::layer_norm::LayerNorm;
use crate::linear::Conv1D;

/// FeedForward block (MLP)
pub struct Mlp {
    pub(crate) c_fc: Conv1D,
    pub(crate) c_proj: Conv1D,
    dropout: f64,
}

impl Mlp {
    pub fn new(vs: &nn::Path, config: &Gpt2Config) -> Self {
        let n_embd = config.n_embd;
        let n_inner = config.inner_size();
        let proj_std = config.initializer_range / (2.0 * config.n_layer as f64).sqrt();

        Self {
            c_fc: Conv1D::new(&(vs / "c_fc"), n_embd, n_inner, config.initializer_range),
            c_proj: Conv1D::new(&(vs / "c_proj"), n_inner, n_embd, proj_std),
            dropout: config.resid_pdrop,
        }
    }

    pub fn forward_t(&self, x: &Tensor, train: bool) -> Tensor {
        let h = self.c_fc.forward_t(x, train).gelu("tanh");
        self.c_proj.forward_t(&h, train).dropout(self.dropout, train)
    }
}

unsafe impl Send for Mlp {}
unsafe impl Sync for Mlp {}

/// Transformer Block
pub struct Block {
    ln_1: LayerNorm,
    pub(crate) attn: CausalSelfAttention,
    ln_2: LayerNorm,
    pub(crate) mlp: Mlp,
}

impl Block {
    pub fn new(vs: &nn::Path, config: &Gpt2Config) -> Self {
        Self {
            ln_1: LayerNorm::new(&(vs / "ln_1"), config),
            attn: CausalSelfAttention::new(&(vs / "attn"), config),
            ln_2: LayerNorm::new(&(vs / "ln_2"), config),
            mlp: Mlp::new(&(vs / "mlp"), config),
        }
    }

    pub fn forward_t(&self, x: &Tensor, padding_bias: Option<&Tensor>, train: bool) -> Result<(Tensor, Tensor, Tensor)> {
        let (attn_out, key, value) = self.attn.forward_t(&self.ln_1.forward(x), padding_bias, train)?;
        let x = x + attn_out;
        let mlp_out = self.mlp.forward_t(&self.ln_2.forward(&x), train);
        Ok((x + mlp_out, key, value))
    }
}

unsafe impl Send for Block {}
unsafe impl Sync for Block {}

/// GPT-2 decoder stack without a head. Variables live under `transformer.*`.
pub struct Gpt2Model {
    wte: nn::Embedding,
    wpe: nn::Embedding,
    drop: f64,
    pub(crate) blocks: Vec<Block>,
    ln_f: LayerNorm,
    n_positions: i64,
}

impl Gpt2Model {
    pub fn new(vs: &nn::Path, config: &Gpt2Config) -> Self {
        let emb_config = nn::EmbeddingConfig {
            ws_init: nn::Init::Randn {
                mean: 0.0,
                stdev: config.initializer_range,
            },
            ..Default::default()
        };
        let wte = nn::embedding(vs / "wte", config.vocab_size, config.n_embd, emb_config);
        let wpe = nn::embedding(vs / "wpe", config.n_positions, config.n_embd, emb_config);

        let blocks = (0..config.n_layer)
            .map(|i| Block::new(&(vs / "h" / i), config))
            .collect();

        Self {
            wte,
            wpe,
            drop: config.embd_pdrop,
            blocks,
            ln_f: LayerNorm::new(&(vs / "ln_f"), config),
            n_positions: config.n_positions,
        }
    }

    /// input_ids, attention_mask: [batch, seq_len]
    ///
    /// Masked positions are excluded from attention with an additive bias.
    /// Returns the final hidden states `[batch, seq_len, n_embd]` and, when
    /// `use_cache` is set, every layer's key and value.
    pub fn forward_t(
        &self,
        input_ids: &Tensor,
        attention_mask: Option<&Tensor>,
        use_cache: bool,
        train: bool,
    ) -> Result<(Tensor, Option<KVCache>)> {
        let (batch, seq_len) = input_ids.size2()?;
        if seq_len > self.n_positions {
            return Err(ModelError::SequenceTooLong {
                found: seq_len,
                max: self.n_positions,
            });
        }

        let device = input_ids.device();
        let positions = Tensor::arange(seq_len, (Kind::Int64, device)).unsqueeze(0);
        let mut x = (input_ids.apply(&self.wte) + positions.apply(&self.wpe)).dropout(self.drop, train);

        // 0 where attended, -1e9 where masked.
        let padding_bias = attention_mask
            .map(|mask| (mask.to_kind(Kind::Float) - 1.0).view([batch, 1, 1, seq_len]) * 1e9);

        let mut presents = use_cache.then(|| KVCache::with_capacity(self.blocks.len()));
        for block in &self.blocks {
            let (out, key, value) = block.forward_t(&x, padding_bias.as_ref(), train)?;
            if let Some(cache) = presents.as_mut() {
                cache.push(key, value);
            }
            x = out;
        }

        Ok((self.ln_f.forward(&x), presents))
    }
}

unsafe impl Send for Gpt2Model {}
unsafe impl Sync for Gpt2Model {}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::Device;

    fn tiny() -> Gpt2Config {
        Gpt2Config {
            vocab_size: 64,
            n_positions: 16,
            n_embd: 32,
            n_layer: 2,
            n_head: 4,
            ..Default::default()
        }
    }

    #[test]
    fn hidden_states_and_presents_have_expected_shapes() {
        let vs = nn::VarStore::new(Device::Cpu);
        let model = Gpt2Model::new(&(vs.root() / "transformer"), &tiny());
        let ids = Tensor::from_slice(&[1i64, 2, 3, 4, 5, 6]).view([2, 3]);

        let (hidden, presents) = model.forward_t(&ids, None, true, false).unwrap();
        assert_eq!(hidden.size(), vec![2, 3, 32]);
        let presents = presents.unwrap();
        assert_eq!(presents.len(), 2);
        assert_eq!(presents.seq_len(), 3);
        let (k, v) = presents.layer(1).unwrap();
        assert_eq!(k.size(), vec![2, 4, 3, 8]);
        assert_eq!(v.size(), vec![2, 4, 3, 8]);
    }

    #[test]
    fn no_presents_without_cache() {
        let vs = nn::VarStore::new(Device::Cpu);
        let model = Gpt2Model::new(&(vs.root() / "transformer"), &tiny());
        let ids = Tensor::from_slice(&[1i64, 2, 3]).view([1, 3]);
        let (_, presents) = model.forward_t(&ids, None, false, false).unwrap();
        assert!(presents.is_none());
    }

    #[test]
    fn padding_does_not_change_real_positions() {
        let vs = nn::VarStore::new(Device::Cpu);
        let model = Gpt2Model::new(&(vs.root() / "transformer"), &tiny());

        let short = Tensor::from_slice(&[5i64, 9, 3]).view([1, 3]);
        let padded = Tensor::from_slice(&[5i64, 9, 3, 0, 0]).view([1, 5]);
        let mask = Tensor::from_slice(&[1i64, 1, 1, 0, 0]).view([1, 5]);

        let (a, _) = model.forward_t(&short, None, false, false).unwrap();
        let (b, _) = model
            .forward_t(&padded, Some(&mask), false, false)
            .unwrap();
        assert!(a.allclose(&b.narrow(1, 0, 3), 1e-5, 1e-5, false));
    }

    #[test]
    fn overlong_input_is_rejected() {
        let vs = nn::VarStore::new(Device::Cpu);
        let model = Gpt2Model::new(&(vs.root() / "transformer"), &tiny());
        let ids = Tensor::zeros(&[1, 17], (Kind::Int64, Device::Cpu));
        assert!(matches!(
            model.forward_t(&ids, None, false, false),
            Err(ModelError::SequenceTooLong { found: 17, max: 16 })
        ));
    }

    #[test]
    fn variable_names_follow_gpt2_layout() {
        let vs = nn::VarStore::new(Device::Cpu);
        let _model = Gpt2Model::new(&(vs.root() / "transformer"), &tiny());
        let vars = vs.variables();
        for name in [
            "transformer.wte.weight",
            "transformer.wpe.weight",
            "transformer.h.0.ln_1.weight",
            "transformer.h.1.attn.c_attn.weight",
            "transformer.h.1.attn.c_attn.bias",
            "transformer.h.0.mlp.c_proj.weight",
            "transformer.ln_f.bias",
        ] {
            assert!(vars.contains_key(name), "missing {name}");
        }
        assert_eq!(vars["transformer.h.0.attn.c_attn.weight"].size(), vec![32, 96]);
    }
}
