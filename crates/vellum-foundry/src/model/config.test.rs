#![cfg(test)]

use vellum_loader::MemoryTensorTable;

use super::*;

fn table(metadata: Metadata, width: usize, ffn: usize) -> MemoryTensorTable {
    let mut table = MemoryTensorTable::new(metadata);
    table.insert(TOKEN_EMBEDDING, &[10, width], vec![0.0; 10 * width]).unwrap();
    table.insert(block_tensor(0, "ffn_gate"), &[ffn, width], vec![0.0; ffn * width]).unwrap();
    table
}

fn llama_metadata() -> Metadata {
    [
        ("llama.block_count", 1u32),
        ("llama.attention.head_count", 4u32),
        ("llama.attention.head_count_kv", 2u32),
    ]
    .into_iter()
    .collect()
}

#[test]
fn defaults_fill_missing_keys() {
    let config = ModelConfig::from_table(&table(llama_metadata(), 16, 24), 8).unwrap();
    assert_eq!(config.name, "unknown");
    assert_eq!(config.architecture, "llama");
    assert_eq!(config.alignment, DEFAULT_ALIGNMENT);
    assert_eq!(config.vocab_size, 10);
    assert_eq!(config.embedding_width, 16);
    assert_eq!(config.ffn_width, 24);
    assert_eq!(config.head_dim, 4);
    assert_eq!(config.rope_dims, 4);
    assert_eq!(config.rope_freq_base, DEFAULT_ROPE_FREQ_BASE);
    assert_eq!(config.norm_eps, DEFAULT_NORM_EPS);
    assert_eq!(config.q_width(), 16);
    assert_eq!(config.kv_width(), 8);
}

#[test]
fn architecture_prefix_selects_keys() {
    let mut metadata: Metadata = [
        ("qwen2.block_count", 1u32),
        ("qwen2.attention.head_count", 2u32),
        ("qwen2.rope.dimension_count", 4u32),
    ]
    .into_iter()
    .collect();
    metadata.insert("general.architecture", "qwen2");
    metadata.insert("general.name", "tiny");
    metadata.insert("qwen2.rope.freq_base", 500_000.0f32);
    metadata.insert("qwen2.attention.layer_norm_rms_epsilon", 1e-6f32);

    let config = ModelConfig::from_table(&table(metadata, 16, 8), 4).unwrap();
    assert_eq!(config.name, "tiny");
    assert_eq!(config.kv_heads, 2);
    assert_eq!(config.head_dim, 8);
    assert_eq!(config.rope_dims, 4);
    assert_eq!(config.rope_freq_base, 500_000.0);
    assert_eq!(config.norm_eps, 1e-6);
}

#[test]
fn missing_head_count_is_invalid_metadata() {
    let metadata: Metadata = [("llama.block_count", 1u32)].into_iter().collect();
    let err = ModelConfig::from_table(&table(metadata, 16, 8), 4).unwrap_err();
    assert!(matches!(err, FoundryError::InvalidMetadata(_)), "{err}");
}

#[test]
fn ungroupable_heads_are_rejected() {
    let mut metadata = llama_metadata();
    metadata.insert("llama.attention.head_count_kv", 3u32);
    let err = ModelConfig::from_table(&table(metadata, 16, 8), 4).unwrap_err();
    assert!(matches!(err, FoundryError::InvalidMetadata(_)), "{err}");
}

#[test]
fn missing_embedding_is_missing_tensor() {
    let table = MemoryTensorTable::new(llama_metadata());
    let err = ModelConfig::from_table(&table, 4).unwrap_err();
    assert!(matches!(err, FoundryError::MissingTensor(name) if name == TOKEN_EMBEDDING));
}

#[test]
fn block_tensor_names() {
    assert_eq!(block_tensor(3, "attn_q"), "blk.3.attn_q.weight");
    assert_eq!(BLOCK_PARTS.len(), 9);
}
