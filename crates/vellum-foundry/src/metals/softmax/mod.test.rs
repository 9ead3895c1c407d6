#![cfg(test)]

use rand::{Rng, SeedableRng, rngs::StdRng};

use super::*;
use crate::Foundry;

fn run(scores: &[f32], heads: usize, capacity: usize, position: usize) -> Vec<f32> {
    let mut foundry = Foundry::host();
    let pos = foundry.slots_mut().uniform::<u32>("pos", 1).unwrap();
    foundry.slots_mut().set_value(pos, &[position as u32]).unwrap();
    let mut op = Softmax::new(foundry.slots_mut(), "softmax", pos, heads, capacity).unwrap();
    let slot = op.kernel().scores;
    foundry.slots_mut().set_value(slot, scores).unwrap();
    op.compute(&foundry).unwrap();
    foundry.slots().get_value::<f32>(op.kernel().weights).unwrap()
}

#[test]
fn rows_sum_to_one_and_are_non_negative() {
    let mut rng = StdRng::seed_from_u64(51);
    let (heads, capacity) = (4, 8);
    let scores: Vec<f32> = (0..heads * capacity).map(|_| rng.random_range(-10.0..10.0)).collect();
    let weights = run(&scores, heads, capacity, capacity - 1);

    for row in weights.chunks(capacity) {
        assert!(row.iter().all(|w| *w >= 0.0));
        let sum: f32 = row.iter().sum();
        assert!((sum - 1.0).abs() <= 1e-6, "sum {sum}");
    }
}

#[test]
fn adding_a_constant_does_not_change_the_result() {
    let mut rng = StdRng::seed_from_u64(52);
    let capacity = 12;
    let scores: Vec<f32> = (0..capacity).map(|_| rng.random_range(-3.0..3.0)).collect();
    let shifted: Vec<f32> = scores.iter().map(|s| s + 4.0).collect();

    let a = run(&scores, 1, capacity, capacity - 1);
    let b = run(&shifted, 1, capacity, capacity - 1);
    for (x, y) in a.iter().zip(&b) {
        assert!((x - y).abs() < 1e-6, "{x} vs {y}");
    }
}

#[test]
fn entries_past_the_sequence_length_are_zero() {
    let weights = run(&[1.0, 2.0, 3.0, 4.0], 1, 4, 1);
    assert_eq!(&weights[2..], &[0.0, 0.0]);
    let e = 1.0f32.exp();
    assert!((weights[1] - e / (1.0 + e)).abs() < 1e-6);
}

#[test]
fn masked_scores_vanish() {
    let weights = run(&[0.0, crate::metals::MASKED_SCORE, 0.0], 1, 3, 2);
    assert!((weights[0] - 0.5).abs() < 1e-6);
    assert!(weights[1] < 1e-30);
}
