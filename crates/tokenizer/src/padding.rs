//! Fixed-length encoding: truncation, right padding and attention masks.
//!
//! GPT-2 vocabularies ship without a padding token. Batched inference over
//! padded inputs needs one, so [`resolve_pad_token`] falls back to the
//! end-of-sequence token when no dedicated pad token is available.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::bpe::BPE;
use crate::error::{Result, TokenizerError};

pub const GPT2_EOS_TOKEN: &str = "<|endoftext|>";

fn default_eos_token() -> String {
    GPT2_EOS_TOKEN.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpecialTokens {
    #[serde(default = "default_eos_token")]
    pub eos_token: String,
    #[serde(default)]
    pub pad_token: Option<String>,
}

impl Default for SpecialTokens {
    fn default() -> Self {
        Self {
            eos_token: default_eos_token(),
            pad_token: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PadToken {
    pub token: String,
    pub id: u32,
    /// True when the EOS token stands in for a missing pad token.
    pub substituted: bool,
}

pub fn resolve_pad_token(bpe: &BPE, special: &SpecialTokens) -> Result<PadToken> {
    if let Some(pad) = &special.pad_token {
        if let Some(id) = bpe.token_to_id(pad) {
            return Ok(PadToken {
                token: pad.clone(),
                id,
                substituted: false,
            });
        }
        log::warn!("Configured pad token {:?} is not in the vocabulary", pad);
    }

    let id = bpe
        .token_to_id(&special.eos_token)
        .ok_or_else(|| TokenizerError::TokenNotFound(special.eos_token.clone()))?;
    log::warn!(
        "Tokenizer has no pad token, using eos token {:?} (id {}) for padding",
        special.eos_token,
        id
    );
    Ok(PadToken {
        token: special.eos_token.clone(),
        id,
        substituted: true,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoding {
    pub input_ids: Vec<i64>,
    pub attention_mask: Vec<i64>,
}

impl Encoding {
    /// Number of non-padding positions.
    pub fn real_length(&self) -> usize {
        self.attention_mask.iter().filter(|&&m| m == 1).count()
    }
}

/// Encodes text to exactly `max_length` ids, truncating on the right and
/// padding on the right.
#[derive(Debug, Clone)]
pub struct FixedLengthEncoder<'a> {
    bpe: &'a BPE,
    max_length: usize,
    pad: PadToken,
}

impl<'a> FixedLengthEncoder<'a> {
    pub fn new(bpe: &'a BPE, max_length: usize, pad: PadToken) -> Result<Self> {
        if max_length == 0 {
            return Err(TokenizerError::InvalidMaxLength);
        }
        Ok(Self {
            bpe,
            max_length,
            pad,
        })
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub fn pad_token(&self) -> &PadToken {
        &self.pad
    }

    pub fn encode(&self, text: &str) -> Encoding {
        let mut input_ids: Vec<i64> = self
            .bpe
            .encode(text)
            .into_iter()
            .take(self.max_length)
            .map(i64::from)
            .collect();
        let real = input_ids.len();

        input_ids.resize(self.max_length, i64::from(self.pad.id));
        let mut attention_mask = vec![1i64; real];
        attention_mask.resize(self.max_length, 0);

        Encoding {
            input_ids,
            attention_mask,
        }
    }

    /// Parallel over texts; output order follows input order.
    pub fn encode_batch<S: AsRef<str> + Sync>(&self, texts: &[S]) -> Vec<Encoding> {
        texts.par_iter().map(|t| self.encode(t.as_ref())).collect()
    }
}
