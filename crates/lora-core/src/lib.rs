pub mod error;
pub mod config;
pub mod lora;
pub mod linear;
pub mod layer_norm;
pub mod attention;
pub mod kv_cache;
pub mod transformer;
pub mod classifier;
pub mod safetensors_util;
pub mod hub;
pub mod loader;

pub use classifier::{ClassifierOutput, Gpt2ForSequenceClassification, SequenceClassifier};
pub use config::Gpt2Config;
pub use error::{ModelError, Result};
pub use hub::{resolve_model, ModelFiles};
pub use kv_cache::KVCache;
pub use linear::{AdaptableLinear, Conv1D, Linear, WeightLayout};
pub use loader::{load_for_sequence_classification, LoadOptions};
pub use lora::LoraLayer;
pub use transformer::Gpt2Model;
