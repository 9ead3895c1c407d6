#![cfg(test)]

use rand::{Rng, SeedableRng, rngs::StdRng};

use super::*;
use crate::Foundry;

#[test]
fn matches_x_times_sigmoid() {
    let mut rng = StdRng::seed_from_u64(81);
    let len = 40;
    let input: Vec<f32> = (0..len).map(|_| rng.random_range(-8.0..8.0)).collect();

    let mut foundry = Foundry::host();
    let mut op = Silu::new(foundry.slots_mut(), "silu", len).unwrap();
    let slot = op.kernel().input;
    foundry.slots_mut().set_value(slot, &input).unwrap();
    op.compute(&foundry).unwrap();

    let out = foundry.slots().get_value::<f32>(op.kernel().output).unwrap();
    for (x, y) in input.iter().zip(&out) {
        let sigmoid = 1.0 / (1.0 + (-x).exp());
        assert!((y - x * sigmoid).abs() < 1e-6, "silu({x}) = {y}");
    }
}

#[test]
fn known_points() {
    assert_eq!(silu(0.0), 0.0);
    assert!((silu(1.0) - 0.731_058_6).abs() < 1e-6);
    assert!(silu(-20.0).abs() < 1e-6);
}
