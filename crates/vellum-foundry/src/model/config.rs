//! Decoder hyperparameters resolved from tensor-table metadata and shapes.

use vellum_loader::{Metadata, TensorTable};

use crate::FoundryError;

pub const DEFAULT_ARCHITECTURE: &str = "llama";
pub const DEFAULT_ROPE_FREQ_BASE: f32 = 10_000.0;
pub const DEFAULT_NORM_EPS: f32 = 1e-5;
pub const DEFAULT_ALIGNMENT: u32 = 32;

pub const TOKEN_EMBEDDING: &str = "token_embd.weight";
pub const OUTPUT_NORM: &str = "output_norm.weight";
pub const OUTPUT: &str = "output.weight";

/// Name of a per-layer tensor: `blk.{layer}.{part}.weight`.
pub fn block_tensor(layer: usize, part: &str) -> String {
    format!("blk.{layer}.{part}.weight")
}

/// Per-layer tensor parts, in forward-pass order.
pub const BLOCK_PARTS: [&str; 9] = [
    "attn_norm",
    "attn_q",
    "attn_k",
    "attn_v",
    "attn_output",
    "ffn_norm",
    "ffn_gate",
    "ffn_up",
    "ffn_down",
];

fn metadata_usize(metadata: &Metadata, keys: &[String]) -> Option<usize> {
    keys.iter().find_map(|key| metadata.get_u32(key)).map(|v| v as usize)
}

fn metadata_f32(metadata: &Metadata, keys: &[String]) -> Option<f32> {
    keys.iter().find_map(|key| metadata.get_f32(key))
}

#[derive(Clone, Debug, PartialEq)]
pub struct ModelConfig {
    pub name: String,
    pub architecture: String,
    pub alignment: u32,
    pub block_count: usize,
    pub vocab_size: usize,
    pub embedding_width: usize,
    pub ffn_width: usize,
    pub q_heads: usize,
    pub kv_heads: usize,
    pub head_dim: usize,
    pub rope_dims: usize,
    pub rope_freq_base: f32,
    pub norm_eps: f32,
    /// Rotating KV cache rows.
    pub context_len: usize,
}

impl ModelConfig {
    pub fn from_table(table: &dyn TensorTable, context_len: usize) -> Result<Self, FoundryError> {
        let metadata = table.metadata();
        let architecture = metadata.get_string("general.architecture").unwrap_or(DEFAULT_ARCHITECTURE).to_string();
        let arch_key = |suffix: &str| vec![format!("{architecture}.{suffix}")];

        let embd = table
            .tensor_info(TOKEN_EMBEDDING)
            .ok_or_else(|| FoundryError::MissingTensor(TOKEN_EMBEDDING.to_string()))?;
        let &[vocab_size, embedding_width] = embd.shape.as_slice() else {
            return Err(FoundryError::ShapeMismatch {
                name: TOKEN_EMBEDDING.to_string(),
                expected: vec![0, 0],
                actual: embd.shape.clone(),
            });
        };

        let block_count = metadata_usize(metadata, &arch_key("block_count"))
            .ok_or_else(|| FoundryError::InvalidMetadata(format!("{architecture}.block_count is missing")))?;
        let q_heads = metadata_usize(metadata, &arch_key("attention.head_count"))
            .filter(|&h| h > 0)
            .ok_or_else(|| FoundryError::InvalidMetadata(format!("{architecture}.attention.head_count is missing")))?;
        let kv_heads = metadata_usize(metadata, &arch_key("attention.head_count_kv")).unwrap_or(q_heads);
        let head_dim = metadata_usize(metadata, &arch_key("attention.key_length")).unwrap_or(embedding_width / q_heads);
        let value_dim = metadata_usize(metadata, &arch_key("attention.value_length")).unwrap_or(head_dim);
        if value_dim != head_dim {
            return Err(FoundryError::InvalidMetadata(format!(
                "value length {value_dim} differs from key length {head_dim}"
            )));
        }
        let rope_dims = metadata_usize(metadata, &arch_key("rope.dimension_count")).unwrap_or(head_dim);
        let rope_freq_base = metadata_f32(metadata, &arch_key("rope.freq_base")).unwrap_or(DEFAULT_ROPE_FREQ_BASE);
        let norm_eps = metadata
            .find_containing("epsilon")
            .and_then(|(_, value)| value.as_f32())
            .unwrap_or(DEFAULT_NORM_EPS);

        let gate = block_tensor(0, "ffn_gate");
        let ffn_width = match table.tensor_info(&gate) {
            Some(info) => info.shape.first().copied().unwrap_or(0),
            None if block_count == 0 => 0,
            None => return Err(FoundryError::MissingTensor(gate)),
        };

        let config = Self {
            name: metadata.get_string("general.name").unwrap_or("unknown").to_string(),
            alignment: metadata.get_u32("general.alignment").unwrap_or(DEFAULT_ALIGNMENT),
            architecture,
            block_count,
            vocab_size,
            embedding_width,
            ffn_width,
            q_heads,
            kv_heads,
            head_dim,
            rope_dims,
            rope_freq_base,
            norm_eps,
            context_len,
        };
        config.validate()?;
        tracing::debug!(?config, "resolved model config");
        Ok(config)
    }

    fn validate(&self) -> Result<(), FoundryError> {
        if self.kv_heads == 0 || self.q_heads % self.kv_heads != 0 {
            return Err(FoundryError::InvalidMetadata(format!(
                "{} query heads cannot be grouped over {} kv heads",
                self.q_heads, self.kv_heads
            )));
        }
        if self.head_dim == 0 || self.head_dim % 2 != 0 || self.rope_dims % 2 != 0 || self.rope_dims > self.head_dim {
            return Err(FoundryError::InvalidMetadata(format!(
                "head_dim {} / rope dims {} must be even with rope dims <= head_dim",
                self.head_dim, self.rope_dims
            )));
        }
        if self.context_len == 0 {
            return Err(FoundryError::InvalidMetadata("context length must be positive".to_string()));
        }
        Ok(())
    }

    pub fn q_width(&self) -> usize {
        self.q_heads * self.head_dim
    }

    pub fn kv_width(&self) -> usize {
        self.kv_heads * self.head_dim
    }
}

#[cfg(test)]
#[path = "config.test.rs"]
mod tests;
