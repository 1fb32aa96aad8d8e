use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::byte_level::ByteLevel;
use crate::error::{Result, TokenizerError};
use crate::vocab::Vocab;

/// GPT-2's pre-tokenizer without its `\s+(?!\S)` branch, which `regex` cannot
/// express. [`BPE::pre_tokenize`] restores that lookahead.
const PRETOKENIZE_PATTERN: &str =
    r"'s|'t|'re|'ve|'m|'ll|'d| ?\p{L}+| ?\p{N}+| ?[^\s\p{L}\p{N}]+|\s+";

/// Byte-level BPE tokenizer compatible with GPT-2 `vocab.json` / `merges.txt`.
#[derive(Clone)]
pub struct BPE {
    pub vocab: Vocab,
    pub merges: HashMap<(String, String), u32>,
    byte_level: ByteLevel,
    regex: Regex,
}

// Custom Debug impl to skip regex
impl std::fmt::Debug for BPE {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BPE")
         .field("vocab_size", &self.vocab.len())
         .field("merges_count", &self.merges.len())
         .finish()
    }
}

impl BPE {
    pub fn new(vocab: Vocab, merges: HashMap<(String, String), u32>) -> Result<Self> {
        Ok(Self {
            vocab,
            merges,
            byte_level: ByteLevel::new(),
            regex: Regex::new(PRETOKENIZE_PATTERN)?,
        })
    }

    pub fn from_files<P: AsRef<Path>>(vocab_path: P, merges_path: P) -> Result<Self> {
        let vocab = Vocab::load(vocab_path)?;

        let file = File::open(merges_path)?;
        let reader = BufReader::new(file);
        let mut merges = HashMap::new();

        for (i, line_res) in reader.lines().enumerate() {
            let line = line_res?;
            // "#version: 0.2" header and blank trailing lines
            if line.starts_with('#') || line.trim().is_empty() {
                continue;
            }

            let parts: Vec<&str> = line.split(' ').collect();
            if parts.len() != 2 {
                return Err(TokenizerError::InvalidMerge {
                    line: i + 1,
                    content: line,
                });
            }
            merges.insert((parts[0].to_string(), parts[1].to_string()), i as u32);
        }

        log::debug!("Loaded {} vocab entries and {} merges", vocab.len(), merges.len());
        Self::new(vocab, merges)
    }

    fn get_pairs(word: &[String]) -> HashSet<(String, String)> {
        let mut pairs = HashSet::new();
        if word.len() < 2 {
            return pairs;
        }
        for i in 0..word.len() - 1 {
            pairs.insert((word[i].clone(), word[i + 1].clone()));
        }
        pairs
    }

    fn bpe(&self, token: &str) -> Vec<String> {
        let mut word: Vec<String> = token.chars().map(|c| c.to_string()).collect();

        loop {
            let pairs = Self::get_pairs(&word);

            let best_pair = pairs
                .into_iter()
                .filter_map(|pair| self.merges.get(&pair).map(|&rank| (rank, pair)))
                .min_by_key(|(rank, _)| *rank);

            let Some((_, (first, second))) = best_pair else {
                break;
            };

            let mut new_word = Vec::with_capacity(word.len());
            let mut i = 0;

            while i < word.len() {
                if i < word.len() - 1 && word[i] == first && word[i + 1] == second {
                    new_word.push(format!("{}{}", first, second));
                    i += 2;
                } else {
                    new_word.push(word[i].clone());
                    i += 1;
                }
            }

            word = new_word;
            if word.len() == 1 {
                break;
            }
        }

        word
    }

    /// Splits `text` into the pieces BPE runs on.
    ///
    /// A whitespace run followed by a non-space leaves its last character to
    /// the next piece, so `"a  b"` splits as `["a", " ", " b"]`.
    pub fn pre_tokenize<'t>(&self, text: &'t str) -> Vec<&'t str> {
        let mut pieces = Vec::new();
        let mut start = 0;
        while let Some(mat) = self.regex.find_at(text, start) {
            let piece = mat.as_str();
            let mut end = mat.end();
            let before_word = text[end..].chars().next().is_some_and(|c| !c.is_whitespace());
            if before_word && piece.chars().all(char::is_whitespace) {
                if let Some((last, _)) = piece.char_indices().last().filter(|(i, _)| *i > 0) {
                    end = mat.start() + last;
                }
            }
            pieces.push(&text[mat.start()..end]);
            start = end;
        }
        pieces
    }

    pub fn encode(&self, text: &str) -> Vec<u32> {
        let mut ids = Vec::new();
        for piece in self.pre_tokenize(text) {
            let mapped = self.byte_level.encode(piece);

            for token in self.bpe(&mapped) {
                if let Some(id) = self.vocab.get_id(&token) {
                    ids.push(id);
                    continue;
                }
                // Incomplete vocabularies: fall back to single mapped bytes.
                for c in token.chars() {
                    match self.vocab.get_id(&c.to_string()) {
                        Some(id) => ids.push(id),
                        None => log::debug!("Dropping unknown symbol {:?}", c),
                    }
                }
            }
        }
        ids
    }

    pub fn decode(&self, ids: &[u32]) -> String {
        let mut mapped = String::new();
        for id in ids {
            if let Some(token) = self.vocab.get_token(*id) {
                mapped.push_str(token);
            }
        }
        self.byte_level.decode(&mapped)
    }

    pub fn token_to_id(&self, token: &str) -> Option<u32> {
        self.vocab.get_id(token)
    }

    pub fn vocab(&self) -> &Vocab {
        &self.vocab
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Tiny GPT-2 style vocabulary: single mapped characters plus a few merges.
    pub(crate) fn toy_bpe() -> BPE {
        let mut vocab = Vocab::new();
        let symbols = [
            "h", "e", "l", "o", "w", "r", "d", "g", "a", "t", "b", "\u{0120}", "he", "ll",
            "hell", "hello", "\u{0120}w", "<|endoftext|>",
        ];
        for (id, s) in symbols.iter().enumerate() {
            vocab.insert(s.to_string(), id as u32);
        }
        let mut merges = HashMap::new();
        for (rank, (a, b)) in [("h", "e"), ("l", "l"), ("he", "ll"), ("hell", "o"), ("\u{0120}", "w")]
            .iter()
            .enumerate()
        {
            merges.insert((a.to_string(), b.to_string()), rank as u32);
        }
        BPE::new(vocab, merges).unwrap()
    }

    #[test]
    fn merges_apply_in_rank_order() {
        let bpe = toy_bpe();
        let ids = bpe.encode("hello");
        assert_eq!(ids, vec![bpe.token_to_id("hello").unwrap()]);
    }

    #[test]
    fn leading_space_is_byte_mapped() {
        let bpe = toy_bpe();
        let ids = bpe.encode("hello world");
        let tokens: Vec<&str> = ids
            .iter()
            .map(|id| bpe.vocab.get_token(*id).unwrap().as_str())
            .collect();
        assert_eq!(tokens, vec!["hello", "\u{0120}w", "o", "r", "l", "d"]);
    }

    #[test]
    fn whitespace_runs_leave_one_space_to_the_next_word() {
        let bpe = toy_bpe();
        assert_eq!(bpe.pre_tokenize("a  b"), vec!["a", " ", " b"]);
        assert_eq!(bpe.pre_tokenize("hello   world"), vec!["hello", "  ", " world"]);
        assert_eq!(bpe.pre_tokenize("a \nb"), vec!["a", " ", "\n", "b"]);
        assert_eq!(bpe.pre_tokenize("a  "), vec!["a", "  "]);
    }

    #[test]
    fn double_space_matches_gpt2_ids() {
        // Ids of the real GPT-2 vocabulary.
        let mut vocab = Vocab::new();
        for (token, id) in [("a", 64), ("b", 65), ("\u{0120}", 220), ("\u{0120}b", 275)] {
            vocab.insert(token.to_string(), id);
        }
        let merges = HashMap::from([(("\u{0120}".to_string(), "b".to_string()), 0)]);
        let bpe = BPE::new(vocab, merges).unwrap();

        assert_eq!(bpe.encode("a  b"), vec![64, 220, 275]);
        assert_eq!(bpe.decode(&[64, 220, 275]), "a  b");
    }

    #[test]
    fn decode_restores_text() {
        let bpe = toy_bpe();
        let ids = bpe.encode("hello world");
        assert_eq!(bpe.decode(&ids), "hello world");
    }

    #[test]
    fn malformed_merge_line_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let vocab_path = dir.path().join("vocab.json");
        let merges_path = dir.path().join("merges.txt");
        std::fs::write(&vocab_path, r#"{"a": 0, "b": 1, "ab": 2}"#).unwrap();
        std::fs::write(&merges_path, "#version: 0.2\na b c\n").unwrap();

        let err = BPE::from_files(&vocab_path, &merges_path).unwrap_err();
        assert!(matches!(err, TokenizerError::InvalidMerge { line: 2, .. }));
    }
}
