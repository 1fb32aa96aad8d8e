use tokenizer::FixedLengthEncoder;

use crate::error::{DatasetError, Result};
use crate::example::{Example, Sentiment, TokenizedExample};

/// Ordered, read-only collection of examples.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetSplit {
    name: String,
    seed: Option<u64>,
    examples: Vec<Example>,
}

impl DatasetSplit {
    pub fn new(name: impl Into<String>, seed: Option<u64>, examples: Vec<Example>) -> Self {
        Self {
            name: name.into(),
            seed,
            examples,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shuffle seed the split was sampled with, `None` for a full split.
    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    pub fn examples(&self) -> &[Example] {
        &self.examples
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    /// Counts per class, indexed by [`Sentiment::index`].
    pub fn label_distribution(&self) -> [usize; Sentiment::COUNT] {
        let mut counts = [0; Sentiment::COUNT];
        for ex in &self.examples {
            counts[ex.label.index() as usize] += 1;
        }
        counts
    }

    pub fn tokenize(&self, encoder: &FixedLengthEncoder<'_>) -> Result<TokenizedSplit> {
        let texts: Vec<&str> = self.examples.iter().map(|ex| ex.text.as_str()).collect();
        let encodings = encoder.encode_batch(&texts);

        let saturated = encodings
            .iter()
            .filter(|enc| enc.real_length() == encoder.max_length())
            .count();
        log::debug!(
            "Tokenized `{}` to length {} ({} sequences fill the whole window)",
            self.name,
            encoder.max_length(),
            saturated
        );

        let examples = encodings
            .into_iter()
            .zip(&self.examples)
            .map(|(enc, ex)| TokenizedExample {
                input_ids: enc.input_ids,
                attention_mask: enc.attention_mask,
                label: ex.label,
            })
            .collect();

        TokenizedSplit::new(self.name.clone(), encoder.max_length(), examples)
    }
}

/// Tokenized split whose sequences all share one length.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenizedSplit {
    name: String,
    max_length: usize,
    examples: Vec<TokenizedExample>,
}

impl TokenizedSplit {
    pub fn new(
        name: impl Into<String>,
        max_length: usize,
        examples: Vec<TokenizedExample>,
    ) -> Result<Self> {
        let name = name.into();
        for (index, ex) in examples.iter().enumerate() {
            for found in [ex.input_ids.len(), ex.attention_mask.len()] {
                if found != max_length {
                    return Err(DatasetError::LengthMismatch {
                        split: name,
                        index,
                        expected: max_length,
                        found,
                    });
                }
            }
        }
        Ok(Self {
            name,
            max_length,
            examples,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub fn examples(&self) -> &[TokenizedExample] {
        &self.examples
    }

    pub fn get(&self, index: usize) -> Option<&TokenizedExample> {
        self.examples.get(index)
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tokenizer::{resolve_pad_token, SpecialTokens, Vocab, BPE};

    fn char_bpe() -> BPE {
        let mut vocab = Vocab::new();
        for (id, c) in "abcdefghijklmnopqrstuvwxyz\u{0120}".chars().enumerate() {
            vocab.insert(c.to_string(), id as u32);
        }
        vocab.insert("<|endoftext|>".to_string(), 27);
        BPE::new(vocab, HashMap::new()).unwrap()
    }

    fn split() -> DatasetSplit {
        DatasetSplit::new(
            "validation",
            Some(42),
            vec![
                Example { text: "good".into(), label: Sentiment::Positive },
                Example { text: "a truly awful film".into(), label: Sentiment::Negative },
                Example { text: "".into(), label: Sentiment::Negative },
            ],
        )
    }

    #[test]
    fn every_tokenized_example_has_max_length() {
        let bpe = char_bpe();
        let pad = resolve_pad_token(&bpe, &SpecialTokens::default()).unwrap();
        let encoder = FixedLengthEncoder::new(&bpe, 8, pad).unwrap();

        let tokenized = split().tokenize(&encoder).unwrap();
        assert_eq!(tokenized.len(), 3);
        for ex in tokenized.examples() {
            assert_eq!(ex.input_ids.len(), 8);
            assert_eq!(ex.attention_mask.len(), 8);
        }
        assert_eq!(tokenized.examples()[0].attention_mask, vec![1, 1, 1, 1, 0, 0, 0, 0]);
        assert_eq!(tokenized.examples()[1].attention_mask, vec![1; 8]);
        assert_eq!(tokenized.examples()[2].attention_mask, vec![0; 8]);
        assert_eq!(tokenized.examples()[1].label, Sentiment::Negative);
    }

    #[test]
    fn ragged_examples_are_rejected() {
        let examples = vec![
            TokenizedExample { input_ids: vec![1, 2, 3], attention_mask: vec![1, 1, 1], label: Sentiment::Positive },
            TokenizedExample { input_ids: vec![1, 2], attention_mask: vec![1, 1], label: Sentiment::Negative },
        ];
        let err = TokenizedSplit::new("train", 3, examples).unwrap_err();
        assert!(matches!(err, DatasetError::LengthMismatch { index: 1, found: 2, .. }));
    }

    #[test]
    fn label_distribution_counts_classes() {
        assert_eq!(split().label_distribution(), [2, 1]);
    }
}
