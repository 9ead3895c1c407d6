use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use vellum_foundry::{
    BackendChoice, Foundry, FoundryConfig, ModelPipeline, SamplingConfig, generation::{SamplerBuffers, sample}
};
use vellum_loader::{MemoryTensorTable, Metadata};

const VOCAB_SIZE: usize = 256;
const WIDTH: usize = 64;
const FFN_WIDTH: usize = 160;
const HEADS: u32 = 4;
const KV_HEADS: u32 = 2;
const HEAD_DIM: usize = WIDTH / HEADS as usize;
const CONTEXT_LEN: usize = 128;
const RNG_SEED: u64 = 0x5EED_FACED;

/// Deterministic small weights without pulling an RNG into the bench.
fn weights(len: usize, salt: usize) -> Vec<f32> {
    (0..len).map(|i| (((i * 31 + salt * 17) % 97) as f32 - 48.0) * 0.0015).collect()
}

fn synthetic_table(blocks: u32) -> MemoryTensorTable {
    let mut metadata = Metadata::new();
    metadata.insert("general.architecture", "llama");
    metadata.insert("general.name", "bench");
    metadata.insert("llama.block_count", blocks);
    metadata.insert("llama.attention.head_count", HEADS);
    metadata.insert("llama.attention.head_count_kv", KV_HEADS);
    metadata.insert("llama.attention.layer_norm_rms_epsilon", 1e-5f32);

    let kv_width = KV_HEADS as usize * HEAD_DIM;
    let mut table = MemoryTensorTable::new(metadata);
    let mut put = |name: String, shape: &[usize], salt: usize| {
        let len = shape.iter().product();
        table.insert(name, shape, weights(len, salt)).expect("bench tensor");
    };

    put("token_embd.weight".to_string(), &[VOCAB_SIZE, WIDTH], 1);
    put("output_norm.weight".to_string(), &[WIDTH], 2);
    put("output.weight".to_string(), &[VOCAB_SIZE, WIDTH], 3);
    for layer in 0..blocks as usize {
        let salt = 10 + layer * 16;
        put(format!("blk.{layer}.attn_norm.weight"), &[WIDTH], salt);
        put(format!("blk.{layer}.attn_q.weight"), &[WIDTH, WIDTH], salt + 1);
        put(format!("blk.{layer}.attn_k.weight"), &[kv_width, WIDTH], salt + 2);
        put(format!("blk.{layer}.attn_v.weight"), &[kv_width, WIDTH], salt + 3);
        put(format!("blk.{layer}.attn_output.weight"), &[WIDTH, WIDTH], salt + 4);
        put(format!("blk.{layer}.ffn_norm.weight"), &[WIDTH], salt + 5);
        put(format!("blk.{layer}.ffn_gate.weight"), &[FFN_WIDTH, WIDTH], salt + 6);
        put(format!("blk.{layer}.ffn_up.weight"), &[FFN_WIDTH, WIDTH], salt + 7);
        put(format!("blk.{layer}.ffn_down.weight"), &[WIDTH, FFN_WIDTH], salt + 8);
    }
    table
}

fn host_foundry() -> Foundry {
    Foundry::host_with_config(
        FoundryConfig::default()
            .with_backend(BackendChoice::Host)
            .with_max_context_len(CONTEXT_LEN)
            .with_sample_seed(RNG_SEED),
    )
}

fn decode_step_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("host_decode_step");
    for blocks in [1u32, 4] {
        let table = synthetic_table(blocks);
        let mut foundry = host_foundry();
        let mut pipeline = ModelPipeline::load(&mut foundry, &table).expect("bench model");
        let mut token = 0u32;

        group.bench_with_input(BenchmarkId::from_parameter(blocks), &blocks, |b, _| {
            b.iter(|| {
                pipeline.step(&mut foundry, token).expect("decode step");
                token = (token + 1) % VOCAB_SIZE as u32;
            })
        });
    }
    group.finish();
}

fn sampling_benchmarks(c: &mut Criterion) {
    let logits: Vec<f32> = (0..32_000).map(|i| ((i % 97) as f32) * 0.021 - 1.3).collect();
    let mut group = c.benchmark_group("sampling");
    for (name, config) in [("greedy", SamplingConfig::greedy()), ("top_k_top_p", SamplingConfig::default())] {
        let mut rng = <rand::rngs::StdRng as rand::SeedableRng>::seed_from_u64(RNG_SEED);
        let mut buffers = SamplerBuffers::default();
        group.bench_function(name, |b| {
            b.iter(|| black_box(sample(black_box(&logits), &config, &mut rng, &mut buffers).expect("sample")))
        });
    }
    group.finish();
}

criterion_group!(benches, decode_step_benchmarks, sampling_benchmarks);
criterion_main!(benches);
