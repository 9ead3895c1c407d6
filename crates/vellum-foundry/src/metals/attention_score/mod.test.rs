#![cfg(test)]

use rand::{Rng, SeedableRng, rngs::StdRng};

use super::*;
use crate::Foundry;

fn reference(query: &[f32], keys: &[f32], shape: AttentionShape, position: usize) -> Vec<f32> {
    let len = seq_len(position, shape.capacity);
    let scale = 1.0 / (shape.head_dim as f32).sqrt();
    let mut out = vec![0.0; shape.q_heads * shape.capacity];
    for q in 0..shape.q_heads {
        let kv = shape.kv_head(q);
        for pos in 0..shape.capacity {
            out[q * shape.capacity + pos] = if pos < len {
                let dot: f32 = (0..shape.head_dim)
                    .map(|d| query[q * shape.head_dim + d] * keys[(pos * shape.kv_heads + kv) * shape.head_dim + d])
                    .sum();
                dot * scale
            } else {
                MASKED_SCORE
            };
        }
    }
    out
}

#[test]
fn grouped_query_heads_map_onto_kv_heads() {
    let shape = AttentionShape {
        q_heads: 8,
        kv_heads: 2,
        head_dim: 4,
        capacity: 4,
    };
    let mapping: Vec<usize> = (0..8).map(|q| shape.kv_head(q)).collect();
    assert_eq!(mapping, vec![0, 0, 0, 0, 1, 1, 1, 1]);
}

#[test]
fn scores_match_reference_and_mask_future_positions() {
    let mut rng = StdRng::seed_from_u64(41);
    let shape = AttentionShape {
        q_heads: 8,
        kv_heads: 2,
        head_dim: 16,
        capacity: 6,
    };
    let query: Vec<f32> = (0..shape.q_heads * shape.head_dim).map(|_| rng.random_range(-1.0..1.0)).collect();
    let key_data: Vec<f32> = (0..shape.cache_len()).map(|_| rng.random_range(-1.0..1.0)).collect();

    let mut foundry = Foundry::host();
    let keys = foundry.slots_mut().storage::<f32>("k_cache", shape.cache_len()).unwrap();
    let position = foundry.slots_mut().uniform::<u32>("pos", 1).unwrap();
    foundry.slots_mut().set_value(keys, &key_data).unwrap();
    let mut op = AttentionScore::new(foundry.slots_mut(), "score", keys, position, shape).unwrap();
    let query_slot = op.kernel().query;
    foundry.slots_mut().set_value(query_slot, &query).unwrap();

    for pos in [2usize, 9] {
        foundry.slots_mut().set_value(position, &[pos as u32]).unwrap();
        op.compute(&foundry).unwrap();
        let scores = foundry.slots().get_value::<f32>(op.kernel().scores).unwrap();
        let expected = reference(&query, &key_data, shape, pos);
        for (i, (a, e)) in scores.iter().zip(&expected).enumerate() {
            assert!((a - e).abs() < 1e-4, "pos {pos} index {i}: {a} vs {e}");
        }
    }
}

#[test]
fn indivisible_head_counts_are_rejected() {
    let mut foundry = Foundry::host();
    let keys = foundry.slots_mut().storage::<f32>("k", 3 * 4).unwrap();
    let position = foundry.slots_mut().uniform::<u32>("pos", 1).unwrap();
    let shape = AttentionShape {
        q_heads: 3,
        kv_heads: 2,
        head_dim: 2,
        capacity: 3,
    };
    assert!(AttentionScore::new(foundry.slots_mut(), "score", keys, position, shape).is_err());
}
