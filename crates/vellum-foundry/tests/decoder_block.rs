mod common;

use common::{host_foundry, random_vec};
use rand::{SeedableRng, rngs::StdRng};
use vellum_foundry::{
    metals::rope::inverse_frequencies, model::{BlockWeights, DecoderBlock, ModelConfig}
};

const WIDTH: usize = 8;
const Q_HEADS: usize = 2;
const KV_HEADS: usize = 1;
const HEAD_DIM: usize = 4;
const FFN: usize = 6;
const CAPACITY: usize = 3;
const EPS: f32 = 1e-5;

struct Weights {
    attn_norm: Vec<f32>,
    q: Vec<f32>,
    k: Vec<f32>,
    v: Vec<f32>,
    o: Vec<f32>,
    ffn_norm: Vec<f32>,
    gate: Vec<f32>,
    up: Vec<f32>,
    down: Vec<f32>,
}

fn rmsnorm(x: &[f32], gain: &[f32]) -> Vec<f32> {
    let mean = x.iter().map(|v| v * v).sum::<f32>() / x.len() as f32;
    let inv = 1.0 / (mean + EPS).sqrt();
    x.iter().zip(gain).map(|(v, g)| v * inv * g).collect()
}

fn matvec(w: &[f32], x: &[f32], out: usize) -> Vec<f32> {
    let inp = x.len();
    (0..out).map(|j| (0..inp).map(|k| w[j * inp + k] * x[k]).sum()).collect()
}

fn rope(v: &mut [f32], heads: usize, freqs: &[f32], position: usize) {
    for h in 0..heads {
        for (i, f) in freqs.iter().enumerate() {
            let base = h * HEAD_DIM + 2 * i;
            let (s, c) = (f * position as f32).sin_cos();
            let (a, b) = (v[base], v[base + 1]);
            v[base] = c * a - s * b;
            v[base + 1] = s * a + c * b;
        }
    }
}

/// CPU model of one layer with a rotating cache.
struct Reference {
    keys: Vec<Vec<f32>>,
    values: Vec<Vec<f32>>,
    freqs: Vec<f32>,
}

impl Reference {
    fn step(&mut self, w: &Weights, x: &[f32], position: usize) -> Vec<f32> {
        let n = rmsnorm(x, &w.attn_norm);
        let mut q = matvec(&w.q, &n, Q_HEADS * HEAD_DIM);
        let mut k = matvec(&w.k, &n, KV_HEADS * HEAD_DIM);
        let v = matvec(&w.v, &n, KV_HEADS * HEAD_DIM);
        rope(&mut q, Q_HEADS, &self.freqs, position);
        rope(&mut k, KV_HEADS, &self.freqs, position);
        self.keys[position % CAPACITY] = k;
        self.values[position % CAPACITY] = v;

        let len = (position + 1).min(CAPACITY);
        let scale = 1.0 / (HEAD_DIM as f32).sqrt();
        let mut attn = vec![0.0; Q_HEADS * HEAD_DIM];
        for h in 0..Q_HEADS {
            let kv = h / (Q_HEADS / KV_HEADS);
            let scores: Vec<f32> = (0..len)
                .map(|r| (0..HEAD_DIM).map(|d| q[h * HEAD_DIM + d] * self.keys[r][kv * HEAD_DIM + d]).sum::<f32>() * scale)
                .collect();
            let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let exps: Vec<f32> = scores.iter().map(|s| (s - max).exp()).collect();
            let sum: f32 = exps.iter().sum();
            for d in 0..HEAD_DIM {
                attn[h * HEAD_DIM + d] = (0..len).map(|r| exps[r] / sum * self.values[r][kv * HEAD_DIM + d]).sum();
            }
        }

        let a = matvec(&w.o, &attn, WIDTH);
        let h1: Vec<f32> = x.iter().zip(&a).map(|(x, a)| x + a).collect();
        let n2 = rmsnorm(&h1, &w.ffn_norm);
        let gate = matvec(&w.gate, &n2, FFN);
        let up = matvec(&w.up, &n2, FFN);
        let m: Vec<f32> = gate.iter().zip(&up).map(|(g, u)| g / (1.0 + (-g).exp()) * u).collect();
        let d = matvec(&w.down, &m, WIDTH);
        h1.iter().zip(&d).map(|(h, d)| h + d).collect()
    }
}

fn config() -> ModelConfig {
    ModelConfig {
        name: "block-parity".to_string(),
        architecture: "llama".to_string(),
        alignment: 32,
        block_count: 1,
        vocab_size: 1,
        embedding_width: WIDTH,
        ffn_width: FFN,
        q_heads: Q_HEADS,
        kv_heads: KV_HEADS,
        head_dim: HEAD_DIM,
        rope_dims: HEAD_DIM,
        rope_freq_base: 10_000.0,
        norm_eps: EPS,
        context_len: CAPACITY,
    }
}

#[test]
fn block_matches_cpu_reference_through_cache_wraparound() {
    let mut rng = StdRng::seed_from_u64(2024);
    let w = Weights {
        attn_norm: random_vec(&mut rng, WIDTH, 1.0).iter().map(|g| 1.0 + 0.5 * g).collect(),
        q: random_vec(&mut rng, Q_HEADS * HEAD_DIM * WIDTH, 0.5),
        k: random_vec(&mut rng, KV_HEADS * HEAD_DIM * WIDTH, 0.5),
        v: random_vec(&mut rng, KV_HEADS * HEAD_DIM * WIDTH, 0.5),
        o: random_vec(&mut rng, WIDTH * Q_HEADS * HEAD_DIM, 0.5),
        ffn_norm: random_vec(&mut rng, WIDTH, 1.0).iter().map(|g| 1.0 + 0.5 * g).collect(),
        gate: random_vec(&mut rng, FFN * WIDTH, 0.5),
        up: random_vec(&mut rng, FFN * WIDTH, 0.5),
        down: random_vec(&mut rng, WIDTH * FFN, 0.5),
    };
    let freqs = inverse_frequencies(HEAD_DIM, 10_000.0);

    let mut foundry = host_foundry(CAPACITY);
    let slots = foundry.slots_mut();
    let mut upload = |name: &str, data: &[f32]| {
        let slot = slots.storage::<f32>(name, data.len()).unwrap();
        slots.set_value(slot, data).unwrap();
        slot
    };
    let weights = BlockWeights {
        attn_norm: upload("attn_norm", &w.attn_norm),
        attn_q: upload("attn_q", &w.q),
        attn_k: upload("attn_k", &w.k),
        attn_v: upload("attn_v", &w.v),
        attn_output: upload("attn_output", &w.o),
        ffn_norm: upload("ffn_norm", &w.ffn_norm),
        ffn_gate: upload("ffn_gate", &w.gate),
        ffn_up: upload("ffn_up", &w.up),
        ffn_down: upload("ffn_down", &w.down),
    };
    let freq_slot = upload("freqs", &freqs);
    let position = slots.uniform::<u32>("position", 1).unwrap();
    let mut block = DecoderBlock::new(slots, 0, &config(), &weights, position, freq_slot).unwrap();

    let mut reference = Reference {
        keys: vec![vec![0.0; KV_HEADS * HEAD_DIM]; CAPACITY],
        values: vec![vec![0.0; KV_HEADS * HEAD_DIM]; CAPACITY],
        freqs,
    };

    for pos in 0..2 * CAPACITY + 1 {
        let x = random_vec(&mut rng, WIDTH, 1.0);
        foundry.slots_mut().set_value(block.input(), &x).unwrap();
        block.forward(&mut foundry, pos).unwrap();

        let got = foundry.slots().get_value::<f32>(block.output()).unwrap();
        let want = reference.step(&w, &x, pos);
        for (i, (g, e)) in got.iter().zip(&want).enumerate() {
            assert!((g - e).abs() <= 1e-4 * (1.0 + e.abs()), "pos {pos} [{i}]: {g} vs {e}");
        }

        let cache = foundry.slots().get_value::<f32>(block.key_cache()).unwrap();
        let row = pos % CAPACITY;
        let cached_row = &cache[row * KV_HEADS * HEAD_DIM..(row + 1) * KV_HEADS * HEAD_DIM];
        for (g, e) in cached_row.iter().zip(&reference.keys[row]) {
            assert!((g - e).abs() <= 1e-5 * (1.0 + e.abs()), "key row {row} at pos {pos}");
        }
    }
}
