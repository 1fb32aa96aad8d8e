//! Parquet splits, the format Hugging Face dataset repositories publish
//! (`<task>/<split>-00000-of-00001.parquet`).

use arrow_array::{Array, Int32Array, Int64Array, LargeStringArray, RecordBatch, StringArray};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::fs::File;
use std::path::Path;

use crate::corpus::CorpusSchema;
use crate::error::{DatasetError, Result};
use crate::example::{Example, Sentiment};

/// True for `<prefix><split>.parquet` and `<prefix><split>-*.parquet`.
pub fn is_split_shard(file_name: &str, prefix: &str, split: &str) -> bool {
    let Some(rest) = file_name.strip_prefix(prefix).and_then(|r| r.strip_prefix(split)) else {
        return false;
    };
    rest == ".parquet" || (rest.starts_with('-') && rest.ends_with(".parquet") && !rest.contains('/'))
}

/// Reads every row of a parquet file. Row numbers in errors are 1-based.
pub fn read_parquet(path: &Path, schema: &CorpusSchema) -> Result<Vec<Example>> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?.build()?;
    let mut examples = Vec::new();

    for batch in reader {
        let batch = batch.map_err(|e| DatasetError::Parse {
            path: path.to_path_buf(),
            line: examples.len() + 1,
            message: e.to_string(),
        })?;
        append_batch(&batch, path, schema, &mut examples)?;
    }

    log::debug!("Read {} rows from {}", examples.len(), path.display());
    Ok(examples)
}

fn append_batch(batch: &RecordBatch, path: &Path, schema: &CorpusSchema, out: &mut Vec<Example>) -> Result<()> {
    let first_row = out.len() + 1;
    let column = |field: &str| {
        batch
            .column_by_name(field)
            .ok_or_else(|| DatasetError::MissingField {
                path: path.to_path_buf(),
                line: first_row,
                field: field.to_string(),
            })
    };
    let wrong_type = |field: &str, column: &dyn Array, expected: &str| DatasetError::Parse {
        path: path.to_path_buf(),
        line: first_row,
        message: format!("column `{field}` is {}, expected {expected}", column.data_type()),
    };

    let text_col = column(&schema.text_field)?;
    let label_col = column(&schema.label_field)?;
    let texts = text_values(text_col.as_ref())
        .ok_or_else(|| wrong_type(&schema.text_field, text_col.as_ref(), "a string column"))?;
    let labels = label_values(label_col.as_ref())
        .ok_or_else(|| wrong_type(&schema.label_field, label_col.as_ref(), "an integer column"))?;

    for (i, (text, label)) in texts.into_iter().zip(labels).enumerate() {
        let (Some(text), Some(label)) = (text, label) else {
            return Err(DatasetError::Parse {
                path: path.to_path_buf(),
                line: first_row + i,
                message: "null text or label".to_string(),
            });
        };
        out.push(Example {
            text: text.to_string(),
            label: Sentiment::try_from(label)?,
        });
    }
    Ok(())
}

fn text_values(column: &dyn Array) -> Option<Vec<Option<&str>>> {
    if let Some(array) = column.as_any().downcast_ref::<StringArray>() {
        return Some(array.iter().collect());
    }
    column
        .as_any()
        .downcast_ref::<LargeStringArray>()
        .map(|array| array.iter().collect())
}

fn label_values(column: &dyn Array) -> Option<Vec<Option<i64>>> {
    if let Some(array) = column.as_any().downcast_ref::<Int64Array>() {
        return Some(array.iter().collect());
    }
    column
        .as_any()
        .downcast_ref::<Int32Array>()
        .map(|array| array.iter().map(|v| v.map(i64::from)).collect())
}
