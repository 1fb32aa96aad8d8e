pub mod config;
pub mod error;
pub mod model;
pub mod persist;

pub use config::{LoraConfig, TaskType};
pub use error::{PeftError, Result};
pub use model::{get_peft_model, ParameterCount, PeftModel};
pub use persist::{ADAPTER_CONFIG_FILE, ADAPTER_WEIGHTS_FILE};
