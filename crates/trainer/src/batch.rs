use datasets::TokenizedSplit;
use tch::{Device, Tensor};

use crate::error::{Result, TrainerError};

pub struct Batch {
    /// [batch_size, max_length]
    pub input_ids: Tensor,
    /// [batch_size, max_length]
    pub attention_mask: Tensor,
    /// [batch_size]
    pub labels: Tensor,
}

impl Batch {
    /// Stacks the examples at `indices` into tensors on `device`.
    pub fn collate(split: &TokenizedSplit, indices: &[usize], device: Device) -> Result<Self> {
        let len = split.max_length();
        let mut input_ids = Vec::with_capacity(indices.len() * len);
        let mut attention_mask = Vec::with_capacity(indices.len() * len);
        let mut labels = Vec::with_capacity(indices.len());

        for &i in indices {
            let ex = split.get(i).ok_or_else(|| {
                TrainerError::InvalidArgument(format!("index {i} out of range for split `{}`", split.name()))
            })?;
            input_ids.extend_from_slice(&ex.input_ids);
            attention_mask.extend_from_slice(&ex.attention_mask);
            labels.push(ex.label.index());
        }

        let shape = [indices.len() as i64, len as i64];
        Ok(Self {
            input_ids: Tensor::from_slice(&input_ids).view(shape).to(device),
            attention_mask: Tensor::from_slice(&attention_mask).view(shape).to(device),
            labels: Tensor::from_slice(&labels).to(device),
        })
    }

    pub fn len(&self) -> usize {
        self.labels.size()[0] as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datasets::{Sentiment, TokenizedExample};

    fn split() -> TokenizedSplit {
        let examples = (0..5)
            .map(|i| TokenizedExample {
                input_ids: vec![i, i + 1, 0],
                attention_mask: vec![1, 1, 0],
                label: if i % 2 == 0 { Sentiment::Positive } else { Sentiment::Negative },
            })
            .collect();
        TokenizedSplit::new("train", 3, examples).unwrap()
    }

    #[test]
    fn collate_stacks_selected_rows() {
        let batch = Batch::collate(&split(), &[4, 1], Device::Cpu).unwrap();
        assert_eq!(batch.input_ids.size(), vec![2, 3]);
        assert_eq!(batch.len(), 2);
        assert_eq!(Vec::<i64>::try_from(&batch.labels).unwrap(), vec![1, 0]);
        assert_eq!(Vec::<i64>::try_from(&batch.input_ids.flatten(0, -1)).unwrap(), vec![4, 5, 0, 1, 2, 0]);
    }

    #[test]
    fn out_of_range_index_is_an_error() {
        assert!(Batch::collate(&split(), &[5], Device::Cpu).is_err());
    }
}
