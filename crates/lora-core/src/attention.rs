use tch::{nn, Kind, Tensor};

use crate::config::Gpt2Config;
use crate::error::Result;
use crate::linear::Conv1D;

pub struct CausalSelfAttention {
    pub(crate) c_attn: Conv1D,
    pub(crate) c_proj: Conv1D,
    n_head: i64,
    attn_dropout: f64,
    resid_dropout: f64,
}

impl CausalSelfAttention {
    pub fn new(vs: &nn::Path, config: &Gpt2Config) -> Self {
        let n_embd = config.n_embd;
        let std = config.initializer_range;
        // GPT-2 scales residual projections by 1/sqrt(2 * n_layer).
        let proj_std = std / (2.0 * config.n_layer as f64).sqrt();

        Self {
            c_attn: Conv1D::new(&(vs / "c_attn"), n_embd, 3 * n_embd, std),
            c_proj: Conv1D::new(&(vs / "c_proj"), n_embd, n_embd, proj_std),
            n_head: config.n_head,
            attn_dropout: config.attn_pdrop,
            resid_dropout: config.resid_pdrop,
        }
    }

    /// x: [batch, seq_len, n_embd]
    ///
    /// `padding_bias` is added to the attention scores and must broadcast to
    /// `[batch, n_head, seq_len, seq_len]`. Returns the output together with this
    /// layer's key and value.
    pub fn forward_t(
        &self,
        x: &Tensor,
        padding_bias: Option<&Tensor>,
        train: bool,
    ) -> Result<(Tensor, Tensor, Tensor)> {
        let (b, t, c) = x.size3()?;
        let head_size = c / self.n_head;

        let qkv = self.c_attn.forward_t(x, train);
        let chunks = qkv.split(c, -1);
        let (q, k, v) = (&chunks[0], &chunks[1], &chunks[2]);

        let q = q.view([b, t, self.n_head, head_size]).transpose(1, 2);
        let k = k.view([b, t, self.n_head, head_size]).transpose(1, 2);
        let v = v.view([b, t, self.n_head, head_size]).transpose(1, 2);

        let mut att = q.matmul(&k.transpose(-2, -1)) * (1.0 / (head_size as f64).sqrt());

        let causal = Tensor::ones(&[t, t], (Kind::Float, x.device())).tril(0);
        att = att.masked_fill(&causal.eq(0.0), f64::NEG_INFINITY);
        if let Some(bias) = padding_bias {
            att = att + bias;
        }

        let att = att.softmax(-1, Kind::Float).dropout(self.attn_dropout, train);
        let y = att.matmul(&v).transpose(1, 2).contiguous().view([b, t, c]);
        let y = self.c_proj.forward_t(&y, train).dropout(self.resid_dropout, train);

        Ok((y, k, v))
    }
}

unsafe impl Send for CausalSelfAttention {}
unsafe impl Sync for CausalSelfAttention {}
