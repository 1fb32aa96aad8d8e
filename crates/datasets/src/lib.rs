//! Labeled sentiment corpora: retrieval, deterministic subsets and tokenized splits.

pub mod error;
pub mod example;
pub mod corpus;
pub mod columnar;
pub mod provider;
pub mod split;

pub use columnar::read_parquet;
pub use corpus::{CorpusSchema, CorpusSource, HubCorpus, LocalCorpus};
pub use error::{DatasetError, Result};
pub use example::{Example, Sentiment, TokenizedExample};
pub use provider::DatasetProvider;
pub use split::{DatasetSplit, TokenizedSplit};
