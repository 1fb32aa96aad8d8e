//! Projection layers that can carry a LoRA adapter.

use tch::{nn, Tensor};

use crate::lora::LoraLayer;

/// How a layer stores its weight matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightLayout {
    /// `[out, in]`, as in `torch.nn.Linear`.
    OutIn,
    /// `[in, out]`, as in GPT-2's `Conv1D`.
    InOut,
}

/// A projection that adapter injection can target.
pub trait AdaptableLinear {
    fn layout(&self) -> WeightLayout;
    fn weight(&self) -> &Tensor;
    fn in_features(&self) -> i64;
    fn out_features(&self) -> i64;
    fn adapter(&self) -> Option<&LoraLayer>;
    fn attach_adapter(&mut self, adapter: LoraLayer);
    /// Swaps in a weight with the same shape, e.g. a trainable copy.
    fn replace_weight(&mut self, weight: Tensor);
}

/// GPT-2 projection: `y = x W + b` with `W: [in, out]`.
#[derive(Debug)]
pub struct Conv1D {
    weight: Tensor,
    bias: Tensor,
    adapter: Option<LoraLayer>,
}

impl Conv1D {
    pub fn new(path: &nn::Path, in_features: i64, out_features: i64, init_std: f64) -> Self {
        let weight = path.var(
            "weight",
            &[in_features, out_features],
            nn::Init::Randn { mean: 0.0, stdev: init_std },
        );
        let bias = path.var("bias", &[out_features], nn::Init::Const(0.0));
        Self {
            weight,
            bias,
            adapter: None,
        }
    }

    pub fn forward_t(&self, x: &Tensor, train: bool) -> Tensor {
        let y = x.matmul(&self.weight) + &self.bias;
        match &self.adapter {
            Some(lora) => y + lora.forward_t(x, train),
            None => y,
        }
    }
}

impl AdaptableLinear for Conv1D {
    fn layout(&self) -> WeightLayout {
        WeightLayout::InOut
    }

    fn weight(&self) -> &Tensor {
        &self.weight
    }

    fn in_features(&self) -> i64 {
        self.weight.size()[0]
    }

    fn out_features(&self) -> i64 {
        self.weight.size()[1]
    }

    fn adapter(&self) -> Option<&LoraLayer> {
        self.adapter.as_ref()
    }

    fn attach_adapter(&mut self, adapter: LoraLayer) {
        self.adapter = Some(adapter);
    }

    fn replace_weight(&mut self, weight: Tensor) {
        self.weight = weight;
    }
}

/// `y = x Wᵀ (+ b)` with `W: [out, in]`.
#[derive(Debug)]
pub struct Linear {
    weight: Tensor,
    bias: Option<Tensor>,
    adapter: Option<LoraLayer>,
}

impl Linear {
    pub fn new(path: &nn::Path, in_features: i64, out_features: i64, bias: bool, init_std: f64) -> Self {
        let weight = path.var(
            "weight",
            &[out_features, in_features],
            nn::Init::Randn { mean: 0.0, stdev: init_std },
        );
        let bias = bias.then(|| path.var("bias", &[out_features], nn::Init::Const(0.0)));
        Self {
            weight,
            bias,
            adapter: None,
        }
    }

    pub fn forward_t(&self, x: &Tensor, train: bool) -> Tensor {
        let mut y = x.matmul(&self.weight.tr());
        if let Some(bias) = &self.bias {
            y = y + bias;
        }
        match &self.adapter {
            Some(lora) => y + lora.forward_t(x, train),
            None => y,
        }
    }
}

impl AdaptableLinear for Linear {
    fn layout(&self) -> WeightLayout {
        WeightLayout::OutIn
    }

    fn weight(&self) -> &Tensor {
        &self.weight
    }

    fn in_features(&self) -> i64 {
        self.weight.size()[1]
    }

    fn out_features(&self) -> i64 {
        self.weight.size()[0]
    }

    fn adapter(&self) -> Option<&LoraLayer> {
        self.adapter.as_ref()
    }

    fn attach_adapter(&mut self, adapter: LoraLayer) {
        self.adapter = Some(adapter);
    }

    fn replace_weight(&mut self, weight: Tensor) {
        self.weight = weight;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{Device, Kind};

    #[test]
    fn conv1d_matches_linear_with_transposed_weight() {
        let vs = nn::VarStore::new(Device::Cpu);
        let root = vs.root();
        let conv = Conv1D::new(&(&root / "conv"), 6, 4, 0.02);
        let mut linear = Linear::new(&(&root / "linear"), 6, 4, false, 0.02);
        linear.replace_weight(conv.weight().tr().contiguous());

        let x = Tensor::randn(&[3, 6], (Kind::Float, Device::Cpu));
        assert!(conv.forward_t(&x, false).allclose(&linear.forward_t(&x, false), 1e-6, 1e-6, false));
        assert_eq!((conv.in_features(), conv.out_features()), (6, 4));
        assert_eq!((linear.in_features(), linear.out_features()), (6, 4));
        assert_eq!(conv.layout(), WeightLayout::InOut);
    }

    #[test]
    fn adapter_output_is_added() {
        let vs = nn::VarStore::new(Device::Cpu);
        let root = vs.root();
        let mut linear = Linear::new(&(&root / "score"), 8, 2, false, 0.02);
        let x = Tensor::randn(&[4, 8], (Kind::Float, Device::Cpu));
        let before = linear.forward_t(&x, false);

        let lora = LoraLayer::new(&(&root / "score" / "adapter"), 8, 2, 2, 4.0, 0.0, false);
        tch::no_grad(|| {
            let _ = lora.lora_b().shallow_clone().fill_(0.5);
        });
        let delta = lora.forward_t(&x, false);
        linear.attach_adapter(lora);

        let after = linear.forward_t(&x, false);
        assert!(after.allclose(&(before + delta), 1e-5, 1e-5, false));
    }
}
