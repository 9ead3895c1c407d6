#![cfg(test)]

use rand::{Rng, SeedableRng, rngs::StdRng};

use super::*;
use crate::Foundry;

fn random(rng: &mut StdRng, n: usize) -> Vec<f32> {
    (0..n).map(|_| rng.random_range(-1.0..1.0)).collect()
}

fn reference(input: &[f32], weight: &[f32], in_f: usize, out_f: usize) -> Vec<f32> {
    (0..out_f)
        .map(|j| (0..in_f).map(|k| input[k] * weight[j * in_f + k]).sum())
        .collect()
}

fn assert_close(actual: &[f32], expected: &[f32]) {
    assert_eq!(actual.len(), expected.len());
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!((a - e).abs() <= 1e-4 * e.abs().max(1.0), "index {i}: {a} vs {e}");
    }
}

#[test]
fn matches_cpu_reference() {
    let mut rng = StdRng::seed_from_u64(3);
    let (in_f, out_f) = (37, 70);
    let input = random(&mut rng, in_f);
    let weight_data = random(&mut rng, in_f * out_f);

    let mut foundry = Foundry::host();
    let weight = foundry.slots_mut().storage::<f32>("w", in_f * out_f).unwrap();
    foundry.slots_mut().set_value(weight, &weight_data).unwrap();
    let mut op = MatMul::new(foundry.slots_mut(), "proj", weight, in_f, out_f).unwrap();
    let input_slot = op.kernel().input;
    foundry.slots_mut().set_value(input_slot, &input).unwrap();
    op.compute(&foundry).unwrap();

    let out = foundry.slots().get_value::<f32>(op.kernel().output).unwrap();
    assert_close(&out, &reference(&input, &weight_data, in_f, out_f));
}

#[test]
fn cached_variant_writes_the_row_for_the_position_and_wraps() {
    let mut rng = StdRng::seed_from_u64(4);
    let (in_f, out_f, capacity) = (8, 4, 3);
    let weight_data = random(&mut rng, in_f * out_f);

    let mut foundry = Foundry::host();
    let weight = foundry.slots_mut().storage::<f32>("w", in_f * out_f).unwrap();
    foundry.slots_mut().set_value(weight, &weight_data).unwrap();
    let position = foundry.slots_mut().uniform::<u32>("pos", 1).unwrap();
    let mut op = MatMul::cached(foundry.slots_mut(), "k", weight, in_f, out_f, capacity, position).unwrap();
    let input_slot = op.kernel().input;

    let mut expected_rows = vec![vec![0.0f32; out_f]; capacity];
    for pos in 0..5u32 {
        let input = random(&mut rng, in_f);
        foundry.slots_mut().set_value(position, &[pos]).unwrap();
        foundry.slots_mut().set_value(input_slot, &input).unwrap();
        op.compute(&foundry).unwrap();
        expected_rows[pos as usize % capacity] = reference(&input, &weight_data, in_f, out_f);
    }

    // Positions 3 and 4 overwrote rows 0 and 1; row 2 still holds position 2.
    let cache = foundry.slots().get_value::<f32>(op.kernel().output).unwrap();
    assert_close(&cache, &expected_rows.concat());
}

#[test]
fn weight_shape_is_checked() {
    let mut foundry = Foundry::host();
    let weight = foundry.slots_mut().storage::<f32>("w", 10).unwrap();
    assert!(MatMul::new(foundry.slots_mut(), "proj", weight, 4, 4).is_err());
}

#[test]
fn source_embeds_shape_constants() {
    let mut foundry = Foundry::host();
    let weight = foundry.slots_mut().storage::<f32>("w", 6).unwrap();
    let op = MatMul::new(foundry.slots_mut(), "proj", weight, 3, 2).unwrap();
    let source = op.source(&foundry).unwrap();
    assert!(source.text.contains("constant uint in_features = 3u;"));
    assert!(source.text.contains("constant uint out_features = 2u;"));
    assert!(source.text.contains("uint dst_row = row;"));
}
