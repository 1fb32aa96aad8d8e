use serde::{Deserialize, Serialize};

use crate::error::DatasetError;

/// Binary sentiment label. Discriminants are the class indices used by the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum Sentiment {
    Negative = 0,
    Positive = 1,
}

impl Sentiment {
    pub const COUNT: usize = 2;

    pub fn index(self) -> i64 {
        self as i64
    }
}

impl TryFrom<i64> for Sentiment {
    type Error = DatasetError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Sentiment::Negative),
            1 => Ok(Sentiment::Positive),
            other => Err(DatasetError::InvalidLabel(other)),
        }
    }
}

impl From<Sentiment> for i64 {
    fn from(label: Sentiment) -> Self {
        label.index()
    }
}

impl std::fmt::Display for Sentiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Sentiment::Negative => write!(f, "negative"),
            Sentiment::Positive => write!(f, "positive"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Example {
    pub text: String,
    pub label: Sentiment,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizedExample {
    pub input_ids: Vec<i64>,
    pub attention_mask: Vec<i64>,
    pub label: Sentiment,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_outside_the_class_set_are_rejected() {
        assert_eq!(Sentiment::try_from(1).unwrap(), Sentiment::Positive);
        assert!(matches!(Sentiment::try_from(2), Err(DatasetError::InvalidLabel(2))));
        assert!(matches!(Sentiment::try_from(-1), Err(DatasetError::InvalidLabel(-1))));
    }

    #[test]
    fn example_serializes_label_as_index() {
        let ex = Example {
            text: "fine".to_string(),
            label: Sentiment::Positive,
        };
        let json = serde_json::to_string(&ex).unwrap();
        assert_eq!(json, r#"{"text":"fine","label":1}"#);
        let back: Example = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ex);
    }
}
