//! Adapter injection.

use lora_core::{
    AdaptableLinear, Gpt2ForSequenceClassification, LoraLayer, SequenceClassifier, WeightLayout,
};
use std::fmt;
use tch::{nn, Device, Tensor};

use crate::config::LoraConfig;
use crate::error::{PeftError, Result};

/// Trainable versus total parameter counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ParameterCount {
    pub trainable: i64,
    pub total: i64,
}

impl ParameterCount {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.trainable as f64 / self.total as f64
    }
}

impl fmt::Display for ParameterCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "trainable params: {} || all params: {} || trainable%: {:.4}",
            self.trainable,
            self.total,
            100.0 * self.fraction()
        )
    }
}

/// A frozen base classifier with LoRA adapters attached.
///
/// Adapter tensors live in their own [`nn::VarStore`]; the base store is frozen,
/// so an optimizer built over [`PeftModel::adapter_var_store`] cannot touch the
/// base weights.
pub struct PeftModel {
    base: Gpt2ForSequenceClassification,
    adapter_vs: nn::VarStore,
    config: LoraConfig,
    adapted_modules: Vec<String>,
}

/// Dotted module names become nested var store paths; a single path segment
/// cannot contain a dot.
fn module_path<'a>(root: &nn::Path<'a>, name: &str) -> nn::Path<'a> {
    let mut segments = name.split('.');
    let first = segments.next().unwrap_or(name);
    segments.fold(root / first, |path, segment| path / segment)
}

/// Freezes `base` and attaches adapters to every layer `config` targets.
///
/// The task head (`score` for sequence classification) joins
/// `modules_to_save`, and the stored config records it.
pub fn get_peft_model(mut base: Gpt2ForSequenceClassification, config: LoraConfig) -> Result<PeftModel> {
    let config = config.with_task_heads();
    config.validate()?;
    base.var_store_mut().freeze();

    let adapter_vs = nn::VarStore::new(base.var_store().device());
    let root = adapter_vs.root();
    let mut adapted_modules = Vec::new();
    let mut corrected_layout = false;

    for (name, layer) in base.adaptable_layers_mut() {
        let path = module_path(&root, &name);

        if config.modules_to_save.contains(&name) {
            let copy = path.var_copy("weight", layer.weight());
            layer.replace_weight(copy);
            log::debug!("Training a full copy of `{}`", name);
            continue;
        }
        if !config.is_target(&name) {
            continue;
        }

        let fan_in_fan_out = layer.layout() == WeightLayout::InOut;
        corrected_layout |= fan_in_fan_out != config.fan_in_fan_out;
        let lora = LoraLayer::new(
            &path,
            layer.in_features(),
            layer.out_features(),
            config.r,
            config.lora_alpha,
            config.lora_dropout,
            fan_in_fan_out,
        );
        layer.attach_adapter(lora);
        adapted_modules.push(name);
    }

    if adapted_modules.is_empty() {
        return Err(PeftError::NoTargetModules(config.target_modules.clone()));
    }
    if corrected_layout {
        log::warn!(
            "fan_in_fan_out is set to {} but the target modules store weights the other way. Using the layout of each layer.",
            config.fan_in_fan_out
        );
    }

    let model = PeftModel {
        base,
        adapter_vs,
        config,
        adapted_modules,
    };
    log::info!("{}", model.trainable_parameters());
    Ok(model)
}

impl PeftModel {
    pub fn config(&self) -> &LoraConfig {
        &self.config
    }

    pub fn base_model(&self) -> &Gpt2ForSequenceClassification {
        &self.base
    }

    pub fn base_model_mut(&mut self) -> &mut Gpt2ForSequenceClassification {
        &mut self.base
    }

    pub fn adapter_var_store(&self) -> &nn::VarStore {
        &self.adapter_vs
    }

    /// Dotted names of the layers that carry an adapter.
    pub fn adapted_modules(&self) -> &[String] {
        &self.adapted_modules
    }

    /// Adapter tensors keyed by their var store name.
    pub fn adapter_tensors(&self) -> Vec<(String, Tensor)> {
        let mut tensors: Vec<(String, Tensor)> = self.adapter_vs.variables().into_iter().collect();
        tensors.sort_by(|a, b| a.0.cmp(&b.0));
        tensors
    }

    pub fn trainable_parameters(&self) -> ParameterCount {
        let trainable: i64 = self
            .adapter_vs
            .trainable_variables()
            .iter()
            .map(|t| t.numel() as i64)
            .sum();
        let adapter_total: i64 = self
            .adapter_vs
            .variables()
            .values()
            .map(|t| t.numel() as i64)
            .sum();
        ParameterCount {
            trainable,
            total: self.base.num_parameters() + adapter_total,
        }
    }

    /// `W + ΔW` for an adapted layer, in the layer's storage layout.
    pub fn merged_weight(&self, module: &str) -> Option<Tensor> {
        self.base
            .adaptable_layers()
            .into_iter()
            .find(|(name, _)| name == module)
            .and_then(|(_, layer)| layer.adapter().map(|lora| layer.weight() + lora.delta_weight()))
    }
}

impl SequenceClassifier for PeftModel {
    fn classify_t(&self, input_ids: &Tensor, attention_mask: &Tensor, train: bool) -> lora_core::Result<Tensor> {
        self.base.classify_t(input_ids, attention_mask, train)
    }

    fn num_labels(&self) -> i64 {
        self.base.num_labels()
    }

    fn device(&self) -> Device {
        self.adapter_vs.device()
    }
}

unsafe impl Send for PeftModel {}
unsafe impl Sync for PeftModel {}
