//! Corpus retrieval.
//!
//! A corpus is addressed by `(corpus_id, task)` and exposes named splits. On disk
//! a split is `<corpus_id>/<task>/<split>.jsonl` (one JSON object per line),
//! `<corpus_id>/<task>/<split>.tsv` (tab separated with a header row) or one or
//! more parquet shards `<corpus_id>/<task>/<split>-*.parquet`.

use hf_hub::api::sync::ApiBuilder;
use hf_hub::{Repo, RepoType};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::columnar::{is_split_shard, read_parquet};
use crate::error::{DatasetError, Result};
use crate::example::{Example, Sentiment};

/// Column names of the text and label fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CorpusSchema {
    pub text_field: String,
    pub label_field: String,
}

impl Default for CorpusSchema {
    fn default() -> Self {
        Self {
            text_field: "sentence".to_string(),
            label_field: "label".to_string(),
        }
    }
}

pub trait CorpusSource {
    fn load_split(&self, corpus_id: &str, task: &str, split: &str) -> Result<Vec<Example>>;
}

impl<S: CorpusSource + ?Sized> CorpusSource for Box<S> {
    fn load_split(&self, corpus_id: &str, task: &str, split: &str) -> Result<Vec<Example>> {
        (**self).load_split(corpus_id, task, split)
    }
}

fn read_shards(paths: &[PathBuf], schema: &CorpusSchema) -> Result<Vec<Example>> {
    let mut examples = Vec::new();
    for path in paths {
        examples.extend(read_parquet(path, schema)?);
    }
    Ok(examples)
}

#[derive(Debug, Clone)]
pub struct LocalCorpus {
    root: PathBuf,
    schema: CorpusSchema,
}

impl LocalCorpus {
    pub fn new(root: impl Into<PathBuf>, schema: CorpusSchema) -> Self {
        Self {
            root: root.into(),
            schema,
        }
    }
}

impl CorpusSource for LocalCorpus {
    fn load_split(&self, corpus_id: &str, task: &str, split: &str) -> Result<Vec<Example>> {
        let task_dir = self.root.join(corpus_id).join(task);
        let jsonl = task_dir.join(format!("{split}.jsonl"));
        let tsv = task_dir.join(format!("{split}.tsv"));

        if jsonl.is_file() {
            return read_jsonl(&jsonl, &self.schema);
        }
        if tsv.is_file() {
            return read_tsv(&tsv, &self.schema);
        }

        let mut shards = Vec::new();
        if task_dir.is_dir() {
            for entry in std::fs::read_dir(&task_dir)? {
                let path = entry?.path();
                let is_shard = path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| is_split_shard(name, "", split));
                if is_shard {
                    shards.push(path);
                }
            }
        }
        if shards.is_empty() {
            return Err(DatasetError::NotFound {
                corpus: corpus_id.to_string(),
                task: task.to_string(),
                split: split.to_string(),
            });
        }
        shards.sort();
        read_shards(&shards, &self.schema)
    }
}

/// Splits inside a Hugging Face dataset repository: parquet shards
/// `<task>/<split>-*.parquet` (the layout of `nyu-mll/glue`), or
/// `<task>/<split>.jsonl` when the repository has no shards for the split.
#[derive(Debug, Clone)]
pub struct HubCorpus {
    cache_dir: Option<PathBuf>,
    revision: String,
    schema: CorpusSchema,
}

impl HubCorpus {
    pub fn new(cache_dir: Option<PathBuf>, revision: impl Into<String>, schema: CorpusSchema) -> Self {
        Self {
            cache_dir,
            revision: revision.into(),
            schema,
        }
    }
}

impl CorpusSource for HubCorpus {
    fn load_split(&self, corpus_id: &str, task: &str, split: &str) -> Result<Vec<Example>> {
        let mut builder = ApiBuilder::new();
        if let Some(dir) = &self.cache_dir {
            builder = builder.with_cache_dir(dir.clone());
        }
        let api = builder.build().map_err(|e| DatasetError::Unavailable {
            corpus: corpus_id.to_string(),
            reason: e.to_string(),
        })?;

        let repo = api.repo(Repo::with_revision(
            corpus_id.to_string(),
            RepoType::Dataset,
            self.revision.clone(),
        ));

        let prefix = format!("{task}/");
        let shard_names: Vec<String> = match repo.info() {
            Ok(info) => {
                let mut names: Vec<String> = info
                    .siblings
                    .into_iter()
                    .map(|s| s.rfilename)
                    .filter(|name| is_split_shard(name, &prefix, split))
                    .collect();
                names.sort();
                names
            }
            Err(e) => {
                log::debug!("listing {} failed: {}", corpus_id, e);
                Vec::new()
            }
        };
        if !shard_names.is_empty() {
            log::info!("Fetching {} parquet shard(s) of {}/{} from {}", shard_names.len(), task, split, corpus_id);
            let shards = shard_names
                .iter()
                .map(|name| {
                    repo.get(name).map_err(|e| DatasetError::Unavailable {
                        corpus: corpus_id.to_string(),
                        reason: format!("failed to fetch {name}: {e}"),
                    })
                })
                .collect::<Result<Vec<PathBuf>>>()?;
            return read_shards(&shards, &self.schema);
        }

        let filename = format!("{task}/{split}.jsonl");
        log::info!("Fetching {} from dataset repo {}", filename, corpus_id);

        let path = repo.get(&filename).map_err(|e| {
            log::debug!("hub lookup for {} failed: {}", filename, e);
            DatasetError::NotFound {
                corpus: corpus_id.to_string(),
                task: task.to_string(),
                split: split.to_string(),
            }
        })?;
        read_jsonl(&path, &self.schema)
    }
}

fn parse_label(raw: i64) -> Result<Sentiment> {
    Sentiment::try_from(raw)
}

pub fn read_jsonl(path: &Path, schema: &CorpusSchema) -> Result<Vec<Example>> {
    let reader = BufReader::new(File::open(path)?);
    let mut examples = Vec::new();

    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let line_no = i + 1;
        if line.trim().is_empty() {
            continue;
        }

        let record: serde_json::Value = serde_json::from_str(&line).map_err(|e| DatasetError::Parse {
            path: path.to_path_buf(),
            line: line_no,
            message: e.to_string(),
        })?;

        let missing = |field: &str| DatasetError::MissingField {
            path: path.to_path_buf(),
            line: line_no,
            field: field.to_string(),
        };

        let text = record
            .get(&schema.text_field)
            .and_then(|v| v.as_str())
            .ok_or_else(|| missing(&schema.text_field))?;
        let label = record
            .get(&schema.label_field)
            .and_then(|v| v.as_i64().or_else(|| v.as_bool().map(i64::from)))
            .ok_or_else(|| missing(&schema.label_field))?;

        examples.push(Example {
            text: text.to_string(),
            label: parse_label(label)?,
        });
    }

    Ok(examples)
}

pub fn read_tsv(path: &Path, schema: &CorpusSchema) -> Result<Vec<Example>> {
    let reader = BufReader::new(File::open(path)?);
    let mut lines = reader.lines();

    let header = match lines.next() {
        Some(line) => line?,
        None => return Ok(Vec::new()),
    };
    let columns: Vec<&str> = header.split('\t').collect();
    let column = |field: &str| {
        columns
            .iter()
            .position(|c| c.trim() == field)
            .ok_or_else(|| DatasetError::MissingField {
                path: path.to_path_buf(),
                line: 1,
                field: field.to_string(),
            })
    };
    let text_col = column(&schema.text_field)?;
    let label_col = column(&schema.label_field)?;

    let mut examples = Vec::new();
    for (i, line) in lines.enumerate() {
        let line = line?;
        let line_no = i + 2;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        let (Some(text), Some(label)) = (fields.get(text_col), fields.get(label_col)) else {
            return Err(DatasetError::Parse {
                path: path.to_path_buf(),
                line: line_no,
                message: format!("expected {} columns, found {}", columns.len(), fields.len()),
            });
        };
        let label: i64 = label.trim().parse().map_err(|_| DatasetError::Parse {
            path: path.to_path_buf(),
            line: line_no,
            message: format!("label {:?} is not an integer", label),
        })?;

        examples.push(Example {
            text: text.to_string(),
            label: parse_label(label)?,
        });
    }

    Ok(examples)
}
