//! Locating pretrained GPT-2 files, either in a local directory or on the
//! Hugging Face Hub.

use hf_hub::api::sync::ApiBuilder;
use std::path::{Path, PathBuf};

use crate::error::{ModelError, Result};

pub const CONFIG_FILE: &str = "config.json";
pub const WEIGHTS_FILE: &str = "model.safetensors";
pub const VOCAB_FILE: &str = "vocab.json";
pub const MERGES_FILE: &str = "merges.txt";

/// Files that make up a pretrained checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFiles {
    pub model_id: String,
    pub config: PathBuf,
    pub weights: PathBuf,
    pub vocab: PathBuf,
    pub merges: PathBuf,
}

/// Resolves `model_id` to local files.
///
/// An existing directory is used as is. Anything else is treated as a Hub
/// repository id and downloaded into `cache_dir` (or the default hf-hub cache).
pub fn resolve_model(model_id: &str, cache_dir: Option<&Path>) -> Result<ModelFiles> {
    let local = Path::new(model_id);
    if local.is_dir() {
        return from_dir(model_id, local);
    }

    let unavailable = |reason: String| ModelError::Unavailable {
        id: model_id.to_string(),
        reason,
    };

    let mut builder = ApiBuilder::new();
    if let Some(dir) = cache_dir {
        builder = builder.with_cache_dir(dir.to_path_buf());
    }
    let api = builder.build().map_err(|e| unavailable(e.to_string()))?;
    let repo = api.model(model_id.to_string());
    log::info!("Resolving {} from the Hugging Face Hub", model_id);

    let fetch = |file: &str| {
        let path = repo
            .get(file)
            .map_err(|e| unavailable(format!("failed to fetch {file}: {e}")))?;
        log::debug!("Fetched {}: {:?}", file, path);
        Ok::<_, ModelError>(path)
    };

    Ok(ModelFiles {
        model_id: model_id.to_string(),
        config: fetch(CONFIG_FILE)?,
        weights: fetch(WEIGHTS_FILE)?,
        vocab: fetch(VOCAB_FILE)?,
        merges: fetch(MERGES_FILE)?,
    })
}

fn from_dir(model_id: &str, dir: &Path) -> Result<ModelFiles> {
    let require = |file: &str| {
        let path = dir.join(file);
        if path.is_file() {
            Ok(path)
        } else {
            Err(ModelError::Unavailable {
                id: model_id.to_string(),
                reason: format!("{} is missing {}", dir.display(), file),
            })
        }
    };

    Ok(ModelFiles {
        model_id: model_id.to_string(),
        config: require(CONFIG_FILE)?,
        weights: require(WEIGHTS_FILE)?,
        vocab: require(VOCAB_FILE)?,
        merges: require(MERGES_FILE)?,
    })
}
