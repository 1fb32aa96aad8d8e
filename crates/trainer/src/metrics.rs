use tch::{Kind, Tensor};

/// Rows whose arg-max logit equals the label.
pub fn correct_predictions(logits: &Tensor, labels: &Tensor) -> i64 {
    logits
        .argmax(-1, false)
        .eq_tensor(labels)
        .sum(Kind::Int64)
        .int64_value(&[])
}

pub fn accuracy(correct: i64, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    correct as f64 / total as f64
}
