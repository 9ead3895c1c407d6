#![allow(dead_code)]

use rand::{Rng, SeedableRng, rngs::StdRng};
use vellum_foundry::{
    BackendChoice, Foundry, FoundryConfig, tokenizer::{Tokenizer, TokenizerError}
};
use vellum_loader::{Metadata, MemoryTensorTable};

pub const VOCAB: usize = 4;
pub const WIDTH: usize = 4;
pub const FFN: usize = 8;
pub const EOS: u32 = 3;

pub fn host_foundry(context_len: usize) -> Foundry {
    Foundry::host_with_config(
        FoundryConfig::default()
            .with_backend(BackendChoice::Host)
            .with_max_context_len(context_len),
    )
}

pub fn random_vec(rng: &mut StdRng, len: usize, scale: f32) -> Vec<f32> {
    (0..len).map(|_| rng.random_range(-scale..scale)).collect()
}

/// One block, one head, width 4, vocabulary 4 with token 3 as end-of-sequence.
///
/// Embeddings are one-hot and block weights are small, so the hidden state
/// stays close to the input token's basis vector. With an untied head the
/// greedy continuation of token `t` is `t + 1`; tensors named in `skip` are
/// left out.
pub fn tiny_table(seed: u64, untied_head: bool, skip: &[&str]) -> MemoryTensorTable {
    let mut metadata = Metadata::new();
    metadata.insert("general.architecture", "llama");
    metadata.insert("general.name", "tiny-chain");
    metadata.insert("llama.block_count", 1u32);
    metadata.insert("llama.attention.head_count", 1u32);
    metadata.insert("llama.attention.head_count_kv", 1u32);
    metadata.insert("llama.attention.layer_norm_rms_epsilon", 1e-5f32);

    let mut rng = StdRng::seed_from_u64(seed);
    let mut table = MemoryTensorTable::new(metadata);
    let mut put = |name: &str, shape: &[usize], data: Vec<f32>| {
        if !skip.contains(&name) {
            table.insert(name, shape, data).unwrap();
        }
    };

    let mut embd = vec![0.0; VOCAB * WIDTH];
    for t in 0..VOCAB {
        embd[t * WIDTH + t] = 1.0;
    }
    put("token_embd.weight", &[VOCAB, WIDTH], embd);

    put("blk.0.attn_norm.weight", &[WIDTH], vec![1.0; WIDTH]);
    put("blk.0.ffn_norm.weight", &[WIDTH], vec![1.0; WIDTH]);
    for name in ["blk.0.attn_q.weight", "blk.0.attn_k.weight", "blk.0.attn_v.weight", "blk.0.attn_output.weight"] {
        put(name, &[WIDTH, WIDTH], random_vec(&mut rng, WIDTH * WIDTH, 0.05));
    }
    put("blk.0.ffn_gate.weight", &[FFN, WIDTH], random_vec(&mut rng, FFN * WIDTH, 0.05));
    put("blk.0.ffn_up.weight", &[FFN, WIDTH], random_vec(&mut rng, FFN * WIDTH, 0.05));
    put("blk.0.ffn_down.weight", &[WIDTH, FFN], random_vec(&mut rng, WIDTH * FFN, 0.05));
    put("output_norm.weight", &[WIDTH], vec![1.0; WIDTH]);

    if untied_head {
        let mut head = vec![0.0; VOCAB * WIDTH];
        for t in 0..VOCAB - 1 {
            head[(t + 1) * WIDTH + t] = 1.0;
        }
        put("output.weight", &[VOCAB, WIDTH], head);
    }
    table
}

/// Digits in, letters out; no chat template.
pub struct DigitTokenizer;

impl Tokenizer for DigitTokenizer {
    fn tokenize(&self, text: &str, _prepend_template: bool) -> Result<Vec<u32>, TokenizerError> {
        text.chars()
            .map(|c| c.to_digit(10).ok_or_else(|| TokenizerError::InitializationFailed(format!("not a digit: {c}"))))
            .collect()
    }

    fn detokenize(&self, ids: &[u32]) -> Result<String, TokenizerError> {
        ids.iter()
            .map(|&id| match id {
                0..3 => Ok(char::from(b'a' + id as u8)),
                EOS => Ok('.'),
                _ => Err(TokenizerError::InvalidTokenId(id)),
            })
            .collect()
    }

    fn eos_token_id(&self) -> Option<u32> {
        Some(EOS)
    }
}
