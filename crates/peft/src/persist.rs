//! Adapter persistence.
//!
//! A saved adapter is a directory with `adapter_config.json` (the
//! [`LoraConfig`]) and `adapter_model.safetensors`, whose tensors are named
//! `base_model.model.<module>.lora_A.weight` and so on. Base weights are never
//! written.

use lora_core::safetensors_util::{read_safetensors, save_safetensors};
use lora_core::Gpt2ForSequenceClassification;
use std::collections::HashSet;
use std::path::Path;

use crate::config::LoraConfig;
use crate::error::{PeftError, Result};
use crate::model::{get_peft_model, PeftModel};

pub const ADAPTER_CONFIG_FILE: &str = "adapter_config.json";
pub const ADAPTER_WEIGHTS_FILE: &str = "adapter_model.safetensors";
const KEY_PREFIX: &str = "base_model.model.";

impl PeftModel {
    pub fn save_pretrained<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;

        let config = serde_json::to_string_pretty(self.config())?;
        std::fs::write(dir.join(ADAPTER_CONFIG_FILE), config)?;

        let tensors: Vec<_> = self
            .adapter_tensors()
            .into_iter()
            .map(|(name, tensor)| (format!("{KEY_PREFIX}{name}"), tensor))
            .collect();
        save_safetensors(&tensors, dir.join(ADAPTER_WEIGHTS_FILE))?;

        log::info!("Saved adapter ({} tensors) to {}", tensors.len(), dir.display());
        Ok(())
    }

    /// Re-attaches a saved adapter to a freshly loaded `base`.
    ///
    /// Every stored tensor must correspond one-to-one, with equal shape, to an
    /// adapter tensor the saved config produces on `base`.
    pub fn from_pretrained<P: AsRef<Path>>(base: Gpt2ForSequenceClassification, dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let raw = std::fs::read_to_string(dir.join(ADAPTER_CONFIG_FILE))?;
        let config: LoraConfig = serde_json::from_str(&raw)?;

        let device = base.var_store().device();
        let model = get_peft_model(base, config)?;
        let stored = read_safetensors(dir.join(ADAPTER_WEIGHTS_FILE), device)?;

        let mut variables = model.adapter_var_store().variables();
        let mut unexpected = Vec::new();
        let mut mismatched = Vec::new();
        let mut seen = HashSet::new();

        for (key, tensor) in &stored {
            let Some(var) = key.strip_prefix(KEY_PREFIX).and_then(|name| variables.get_mut(name)) else {
                unexpected.push(key.clone());
                continue;
            };
            if var.size() != tensor.size() {
                mismatched.push(key.clone());
                continue;
            }
            tch::no_grad(|| {
                var.copy_(tensor);
            });
            seen.insert(key.clone());
        }

        let mut missing: Vec<String> = variables
            .keys()
            .map(|name| format!("{KEY_PREFIX}{name}"))
            .filter(|key| !seen.contains(key) && !mismatched.contains(key))
            .collect();

        if !(missing.is_empty() && unexpected.is_empty() && mismatched.is_empty()) {
            missing.sort();
            unexpected.sort();
            mismatched.sort();
            return Err(PeftError::AdapterMismatch {
                missing,
                unexpected,
                mismatched,
            });
        }

        log::info!("Loaded adapter ({} tensors) from {}", seen.len(), dir.display());
        Ok(model)
    }
}
