use peft::ParameterCount;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::error::Result;
use crate::evaluate::EvaluationResult;

/// Reloaded predictions may differ from in-memory ones by float noise only.
pub const RELOAD_TOLERANCE: f64 = 1e-4;

/// Baseline versus adapted evaluation on one split. Point estimates only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub model: String,
    pub dataset: String,
    pub eval_examples: usize,
    pub baseline: EvaluationResult,
    /// Evaluation of the adapter reloaded from disk.
    pub adapted: EvaluationResult,
    pub accuracy_delta: f64,
    pub loss_delta: f64,
    pub trainable: ParameterCount,
    /// Evaluation of the trained model before it was saved and dropped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_memory: Option<EvaluationResult>,
}

impl ComparisonReport {
    pub fn new(
        model: impl Into<String>,
        dataset: impl Into<String>,
        baseline: EvaluationResult,
        adapted: EvaluationResult,
        trainable: ParameterCount,
    ) -> Self {
        Self {
            model: model.into(),
            dataset: dataset.into(),
            eval_examples: adapted.num_examples,
            accuracy_delta: adapted.accuracy - baseline.accuracy,
            loss_delta: adapted.loss - baseline.loss,
            baseline,
            adapted,
            trainable,
            in_memory: None,
        }
    }

    pub fn with_in_memory(mut self, in_memory: EvaluationResult) -> Self {
        self.in_memory = Some(in_memory);
        self
    }

    /// Whether the reloaded adapter reproduces the in-memory metrics, `None`
    /// when no in-memory evaluation was recorded.
    pub fn reload_matches(&self) -> Option<bool> {
        self.in_memory.as_ref().map(|m| {
            (m.accuracy - self.adapted.accuracy).abs() <= RELOAD_TOLERANCE
                && (m.loss - self.adapted.loss).abs() <= RELOAD_TOLERANCE
        })
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

impl fmt::Display for ComparisonReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} on {} ({} eval examples)", self.model, self.dataset, self.eval_examples)?;
        writeln!(f, "{:<10} {:>10} {:>10}", "", "accuracy", "loss")?;
        writeln!(f, "{:<10} {:>10.4} {:>10.4}", "baseline", self.baseline.accuracy, self.baseline.loss)?;
        writeln!(f, "{:<10} {:>10.4} {:>10.4}", "lora", self.adapted.accuracy, self.adapted.loss)?;
        writeln!(f, "{:<10} {:>+10.4} {:>+10.4}", "delta", self.accuracy_delta, self.loss_delta)?;
        write!(f, "{}", self.trainable)?;
        if let Some(matches) = self.reload_matches() {
            write!(f, "\nreloaded adapter matches in-memory model: {matches}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(accuracy: f64, loss: f64) -> EvaluationResult {
        EvaluationResult {
            loss,
            accuracy,
            num_examples: 500,
            runtime_secs: 2.0,
            samples_per_second: 250.0,
            steps_per_second: 8.0,
        }
    }

    fn report() -> ComparisonReport {
        ComparisonReport::new(
            "gpt2",
            "glue/sst2",
            result(0.51, 0.74),
            result(0.87, 0.33),
            ParameterCount {
                trainable: 294_912,
                total: 124_734_720,
            },
        )
    }

    #[test]
    fn deltas_are_adapted_minus_baseline() {
        let report = report();
        assert!((report.accuracy_delta - 0.36).abs() < 1e-12);
        assert!((report.loss_delta + 0.41).abs() < 1e-12);
        assert_eq!(report.reload_matches(), None);
    }

    #[test]
    fn reload_check_uses_tolerance() {
        let close = report().with_in_memory(result(0.87, 0.33 + 5e-5));
        assert_eq!(close.reload_matches(), Some(true));
        let far = report().with_in_memory(result(0.86, 0.33));
        assert_eq!(far.reload_matches(), Some(false));
    }

    #[test]
    fn json_report_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run").join("comparison.json");
        report().save_json(&path).unwrap();
        let back: ComparisonReport = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back, report());
    }

    #[test]
    fn display_has_a_row_per_model() {
        let text = report().to_string();
        assert!(text.contains("baseline"));
        assert!(text.contains("lora"));
        assert!(text.contains("+0.3600"));
        assert!(text.contains("trainable params: 294912"));
    }
}
