use tch::Tensor;

/// Per-layer key/value tensors produced by a forward pass.
///
/// Each entry is `(key, value)` with shape `[batch, n_head, seq_len, head_size]`.
#[derive(Debug, Default)]
pub struct KVCache {
    layers: Vec<(Tensor, Tensor)>,
}

impl KVCache {
    pub fn with_capacity(n_layers: usize) -> Self {
        Self {
            layers: Vec::with_capacity(n_layers),
        }
    }

    pub fn push(&mut self, key: Tensor, value: Tensor) {
        self.layers.push((key, value));
    }

    pub fn layer(&self, index: usize) -> Option<(&Tensor, &Tensor)> {
        self.layers.get(index).map(|(k, v)| (k, v))
    }

    /// Number of layers held.
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Cached positions, 0 when empty.
    pub fn seq_len(&self) -> i64 {
        self.layers.first().map(|(k, _)| k.size()[2]).unwrap_or(0)
    }

    pub fn clear(&mut self) {
        self.layers.clear();
    }
}
