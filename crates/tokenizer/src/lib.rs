pub mod error;
pub mod vocab;
pub mod byte_level;
pub mod bpe;
pub mod padding;

pub use bpe::BPE;
pub use vocab::Vocab;
pub use error::TokenizerError;
pub use padding::{resolve_pad_token, Encoding, FixedLengthEncoder, PadToken, SpecialTokens};
