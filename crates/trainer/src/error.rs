use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrainerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Torch error: {0}")]
    Tch(#[from] tch::TchError),

    #[error(transparent)]
    Model(#[from] lora_core::ModelError),

    #[error(transparent)]
    Peft(#[from] peft::PeftError),

    #[error("Split `{0}` has no examples")]
    EmptyDataset(String),

    #[error("Model predicts {model} labels but the dataset has {data}")]
    LabelSpaceMismatch { model: i64, data: i64 },

    #[error("Invalid training argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, TrainerError>;
