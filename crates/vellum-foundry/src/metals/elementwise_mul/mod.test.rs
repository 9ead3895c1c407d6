#![cfg(test)]

use rand::{Rng, SeedableRng, rngs::StdRng};

use super::*;
use crate::Foundry;

#[test]
fn multiplies_lane_by_lane() {
    let mut rng = StdRng::seed_from_u64(71);
    let len = 77;
    let a: Vec<f32> = (0..len).map(|_| rng.random_range(-4.0..4.0)).collect();
    let b: Vec<f32> = (0..len).map(|_| rng.random_range(-4.0..4.0)).collect();

    let mut foundry = Foundry::host();
    let mut op = ElementwiseMul::new(foundry.slots_mut(), "mul", len).unwrap();
    let (lhs, rhs) = (op.kernel().lhs, op.kernel().rhs);
    foundry.slots_mut().set_value(lhs, &a).unwrap();
    foundry.slots_mut().set_value(rhs, &b).unwrap();
    op.compute(&foundry).unwrap();

    let out = foundry.slots().get_value::<f32>(op.kernel().output).unwrap();
    let expected: Vec<f32> = a.iter().zip(&b).map(|(x, y)| x * y).collect();
    assert_eq!(out, expected);
}
