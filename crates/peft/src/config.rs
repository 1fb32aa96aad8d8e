use serde::{Deserialize, Serialize};

use crate::error::{PeftError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskType {
    #[serde(rename = "SEQ_CLS")]
    SeqCls,
}

impl TaskType {
    /// Task heads that are always trained in full for this task.
    pub fn head_modules(self) -> &'static [&'static str] {
        match self {
            TaskType::SeqCls => &["score"],
        }
    }
}

/// LoRA hyperparameters. Also the content of `adapter_config.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoraConfig {
    /// Rank of the update matrices.
    pub r: i64,
    pub lora_alpha: f64,
    pub lora_dropout: f64,
    /// Module names to adapt. `c_attn` matches every `*.c_attn`.
    pub target_modules: Vec<String>,
    pub task_type: TaskType,
    /// Set when targeted layers store weights as `[in, out]`. Corrected per
    /// layer on injection.
    #[serde(default)]
    pub fan_in_fan_out: bool,
    /// Modules trained in full alongside the adapters. Only `score` is
    /// supported; the task head is added on injection.
    #[serde(default)]
    pub modules_to_save: Vec<String>,
    #[serde(default)]
    pub base_model_name_or_path: Option<String>,
}

pub const SAVABLE_MODULES: &[&str] = &["score"];

impl LoraConfig {
    pub fn validate(&self) -> Result<()> {
        if self.r <= 0 {
            return Err(PeftError::InvalidConfig(format!("r must be positive, got {}", self.r)));
        }
        if self.lora_alpha <= 0.0 {
            return Err(PeftError::InvalidConfig(format!(
                "lora_alpha must be positive, got {}",
                self.lora_alpha
            )));
        }
        if !(0.0..1.0).contains(&self.lora_dropout) {
            return Err(PeftError::InvalidConfig(format!(
                "lora_dropout must be in [0, 1), got {}",
                self.lora_dropout
            )));
        }
        if self.target_modules.is_empty() {
            return Err(PeftError::InvalidConfig("target_modules is empty".to_string()));
        }
        if let Some(module) = self
            .modules_to_save
            .iter()
            .find(|m| !SAVABLE_MODULES.contains(&m.as_str()))
        {
            return Err(PeftError::InvalidConfig(format!(
                "modules_to_save entry `{module}` is not supported (expected one of {SAVABLE_MODULES:?})"
            )));
        }
        Ok(())
    }

    /// `modules_to_save` extended with the heads of `task_type`.
    pub fn with_task_heads(mut self) -> Self {
        for head in self.task_type.head_modules() {
            if !self.modules_to_save.iter().any(|m| m == head) {
                self.modules_to_save.push(head.to_string());
            }
        }
        self
    }

    pub fn scaling(&self) -> f64 {
        self.lora_alpha / self.r as f64
    }

    /// True when `name` is a target or ends with `.<target>`.
    pub fn is_target(&self, name: &str) -> bool {
        self.target_modules.iter().any(|target| {
            name == target
                || name
                    .strip_suffix(target.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> LoraConfig {
        LoraConfig {
            r: 8,
            lora_alpha: 32.0,
            lora_dropout: 0.1,
            target_modules: vec!["c_attn".to_string()],
            task_type: TaskType::SeqCls,
            fan_in_fan_out: false,
            modules_to_save: vec![],
            base_model_name_or_path: Some("gpt2".to_string()),
        }
    }

    #[test]
    fn suffix_matching_respects_module_boundaries() {
        let config = config();
        assert!(config.is_target("transformer.h.3.attn.c_attn"));
        assert!(config.is_target("c_attn"));
        assert!(!config.is_target("transformer.h.3.attn.c_proj"));
        assert!(!config.is_target("transformer.h.3.attn.xc_attn"));
    }

    #[test]
    fn scaling_is_alpha_over_rank() {
        assert_eq!(config().scaling(), 4.0);
    }

    #[test]
    fn validation_rejects_bad_values() {
        let bad = [
            LoraConfig { r: 0, ..config() },
            LoraConfig { lora_alpha: 0.0, ..config() },
            LoraConfig { lora_dropout: 1.0, ..config() },
            LoraConfig { target_modules: vec![], ..config() },
            LoraConfig { modules_to_save: vec!["lm_head".to_string()], ..config() },
        ];
        for config in bad {
            assert!(matches!(config.validate(), Err(PeftError::InvalidConfig(_))), "{config:?}");
        }
        assert!(config().validate().is_ok());
    }

    #[test]
    fn sequence_classification_trains_the_score_head() {
        let config = config().with_task_heads();
        assert_eq!(config.modules_to_save, ["score"]);
        assert_eq!(config.clone().with_task_heads(), config);
    }

    #[test]
    fn yaml_uses_peft_names_and_rejects_unknown_keys() {
        let yaml = "r: 8\nlora_alpha: 32\nlora_dropout: 0.1\ntarget_modules: [c_attn]\ntask_type: SEQ_CLS\n";
        let parsed: LoraConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(parsed.task_type, TaskType::SeqCls);
        assert!(!parsed.fan_in_fan_out);

        let typo = format!("{yaml}lora_rank: 4\n");
        assert!(serde_yaml::from_str::<LoraConfig>(&typo).is_err());
    }
}
