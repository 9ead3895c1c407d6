#![cfg(test)]

use rand::{Rng, SeedableRng, rngs::StdRng};

use super::*;
use crate::Foundry;

#[test]
fn weighted_sum_matches_reference() {
    let mut rng = StdRng::seed_from_u64(61);
    let shape = AttentionShape {
        q_heads: 4,
        kv_heads: 2,
        head_dim: 8,
        capacity: 5,
    };
    let position = 3;
    let weights: Vec<f32> = (0..shape.q_heads * shape.capacity).map(|_| rng.random_range(0.0..1.0)).collect();
    let value_data: Vec<f32> = (0..shape.cache_len()).map(|_| rng.random_range(-1.0..1.0)).collect();

    let mut foundry = Foundry::host();
    let values = foundry.slots_mut().storage::<f32>("v_cache", shape.cache_len()).unwrap();
    let pos = foundry.slots_mut().uniform::<u32>("pos", 1).unwrap();
    foundry.slots_mut().set_value(values, &value_data).unwrap();
    foundry.slots_mut().set_value(pos, &[position as u32]).unwrap();
    let mut op = ValueSum::new(foundry.slots_mut(), "vsum", values, pos, shape).unwrap();
    let weight_slot = op.kernel().weights;
    foundry.slots_mut().set_value(weight_slot, &weights).unwrap();
    op.compute(&foundry).unwrap();
    let out = foundry.slots().get_value::<f32>(op.kernel().output).unwrap();

    let len = seq_len(position, shape.capacity);
    for q in 0..shape.q_heads {
        let kv = shape.kv_head(q);
        for d in 0..shape.head_dim {
            let expected: f32 = (0..len)
                .map(|p| weights[q * shape.capacity + p] * value_data[(p * shape.kv_heads + kv) * shape.head_dim + d])
                .sum();
            let actual = out[q * shape.head_dim + d];
            assert!((actual - expected).abs() < 1e-5, "head {q} dim {d}: {actual} vs {expected}");
        }
    }
}

#[test]
fn rows_past_the_sequence_are_ignored() {
    let shape = AttentionShape {
        q_heads: 1,
        kv_heads: 1,
        head_dim: 1,
        capacity: 3,
    };
    let mut foundry = Foundry::host();
    let values = foundry.slots_mut().storage::<f32>("v", 3).unwrap();
    let pos = foundry.slots_mut().uniform::<u32>("pos", 1).unwrap();
    foundry.slots_mut().set_value(values, &[1.0f32, 10.0, 100.0]).unwrap();
    foundry.slots_mut().set_value(pos, &[0u32]).unwrap();
    let mut op = ValueSum::new(foundry.slots_mut(), "vsum", values, pos, shape).unwrap();
    let weight_slot = op.kernel().weights;
    foundry.slots_mut().set_value(weight_slot, &[1.0f32, 1.0, 1.0]).unwrap();
    op.compute(&foundry).unwrap();
    assert_eq!(foundry.slots().get_value::<f32>(op.kernel().output).unwrap(), vec![1.0]);
}
