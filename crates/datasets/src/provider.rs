use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::corpus::CorpusSource;
use crate::error::{DatasetError, Result};
use crate::split::DatasetSplit;

/// Named splits of one `(corpus_id, task)` pair.
#[derive(Debug, Clone)]
pub struct DatasetProvider<S> {
    source: S,
    corpus_id: String,
    task: String,
}

impl<S: CorpusSource> DatasetProvider<S> {
    pub fn new(source: S, corpus_id: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            source,
            corpus_id: corpus_id.into(),
            task: task.into(),
        }
    }

    pub fn corpus_id(&self) -> &str {
        &self.corpus_id
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    /// The full split in corpus order.
    pub fn split(&self, name: &str) -> Result<DatasetSplit> {
        let examples = self.source.load_split(&self.corpus_id, &self.task, name)?;
        log::info!(
            "Loaded split `{}` of {}/{}: {} examples",
            name,
            self.corpus_id,
            self.task,
            examples.len()
        );
        Ok(DatasetSplit::new(name, None, examples))
    }

    /// `size` examples of the split, shuffled with `seed`.
    ///
    /// The shuffle uses ChaCha8, so the same seed selects the same examples in
    /// the same order on every platform.
    pub fn subset(&self, name: &str, seed: u64, size: usize) -> Result<DatasetSplit> {
        let mut examples = self.source.load_split(&self.corpus_id, &self.task, name)?;
        if size > examples.len() {
            return Err(DatasetError::SubsetTooLarge {
                split: name.to_string(),
                requested: size,
                available: examples.len(),
            });
        }

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        examples.shuffle(&mut rng);
        examples.truncate(size);

        let split = DatasetSplit::new(name, Some(seed), examples);
        let dist = split.label_distribution();
        log::info!(
            "Selected {} examples from `{}` (seed {}): {} negative / {} positive",
            split.len(),
            name,
            seed,
            dist[0],
            dist[1]
        );
        Ok(split)
    }
}
