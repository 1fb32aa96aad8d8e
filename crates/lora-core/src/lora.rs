//! Low-rank adapters.
//!
//! A frozen weight `W` is adapted as
//!
//! ```text
//! W' = W + B A * (alpha / r)
//! ```
//!
//! with `A: [r, in]` drawn uniformly from `±1/sqrt(in)` and `B: [out, r]`
//! zero-initialised, so a fresh adapter leaves the layer output unchanged.

use tch::{nn, Tensor};

#[derive(Debug)]
pub struct LoraLayer {
    lora_a: Tensor,
    lora_b: Tensor,
    rank: i64,
    scaling: f64,
    dropout: f64,
    fan_in_fan_out: bool,
}

impl LoraLayer {
    /// Creates `lora_A.weight` and `lora_B.weight` under `path`.
    ///
    /// `fan_in_fan_out` must be true when the adapted layer stores its weight
    /// as `[in, out]`; it only affects [`LoraLayer::delta_weight`].
    pub fn new(
        path: &nn::Path,
        in_features: i64,
        out_features: i64,
        rank: i64,
        alpha: f64,
        dropout: f64,
        fan_in_fan_out: bool,
    ) -> Self {
        let bound = 1.0 / (in_features as f64).sqrt();
        let lora_a = (path / "lora_A").var(
            "weight",
            &[rank, in_features],
            nn::Init::Uniform { lo: -bound, up: bound },
        );
        let lora_b = (path / "lora_B").var("weight", &[out_features, rank], nn::Init::Const(0.0));

        Self {
            lora_a,
            lora_b,
            rank,
            scaling: alpha / rank as f64,
            dropout,
            fan_in_fan_out,
        }
    }

    /// Adapter contribution for `x: [.., in]`, to be added to the base output.
    pub fn forward_t(&self, x: &Tensor, train: bool) -> Tensor {
        x.dropout(self.dropout, train)
            .matmul(&self.lora_a.tr())
            .matmul(&self.lora_b.tr())
            * self.scaling
    }

    /// `B A * scaling`, in the adapted layer's own weight layout.
    pub fn delta_weight(&self) -> Tensor {
        let delta = self.lora_b.matmul(&self.lora_a) * self.scaling;
        if self.fan_in_fan_out {
            delta.tr()
        } else {
            delta
        }
    }

    pub fn lora_a(&self) -> &Tensor {
        &self.lora_a
    }

    pub fn lora_b(&self) -> &Tensor {
        &self.lora_b
    }

    pub fn rank(&self) -> i64 {
        self.rank
    }

    pub fn scaling(&self) -> f64 {
        self.scaling
    }

    pub fn fan_in_fan_out(&self) -> bool {
        self.fan_in_fan_out
    }

    pub fn num_parameters(&self) -> i64 {
        (self.lora_a.numel() + self.lora_b.numel()) as i64
    }
}
