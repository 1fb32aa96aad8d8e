pub mod args;
pub mod batch;
pub mod error;
pub mod evaluate;
pub mod metrics;
pub mod pipeline;
pub mod report;
pub mod train;

pub use args::{IntervalStrategy, TrainingArguments};
pub use error::{Result, TrainerError};
pub use evaluate::{evaluate, EvaluationResult};
pub use pipeline::{DeviceChoice, PipelineConfig, Stage};
pub use report::ComparisonReport;
pub use train::{LogEntry, TrainOutput, Trainer};
