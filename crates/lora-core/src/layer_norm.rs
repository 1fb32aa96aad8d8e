use tch::{nn, Tensor};

use crate::config::Gpt2Config;

#[derive(Debug)]
pub struct LayerNorm {
    weight: Tensor,
    bias: Tensor,
    dim: i64,
    eps: f64,
}

impl LayerNorm {
    pub fn new(vs: &nn::Path, config: &Gpt2Config) -> Self {
        let weight = vs.var("weight", &[config.n_embd], nn::Init::Const(1.0));
        let bias = vs.var("bias", &[config.n_embd], nn::Init::Const(0.0));
        Self {
            weight,
            bias,
            dim: config.n_embd,
            eps: config.layer_norm_epsilon,
        }
    }

    /// x: [batch, seq_len, n_embd]
    pub fn forward(&self, x: &Tensor) -> Tensor {
        x.layer_norm(&[self.dim][..], Some(&self.weight), Some(&self.bias), self.eps, true)
    }
}
