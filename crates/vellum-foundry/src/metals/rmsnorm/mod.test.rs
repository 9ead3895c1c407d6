#![cfg(test)]

use rand::{Rng, SeedableRng, rngs::StdRng};

use super::*;
use crate::Foundry;

const EPS: f32 = 1e-6;

fn run(foundry: &mut Foundry, op: &mut KernelOperator<RmsNorm>, input: &[f32]) -> Vec<f32> {
    let slot = op.kernel().input;
    foundry.slots_mut().set_value(slot, input).unwrap();
    op.compute(foundry).unwrap();
    foundry.slots().get_value::<f32>(op.kernel().output).unwrap()
}

fn setup(len: usize, gain_data: &[f32]) -> (Foundry, KernelOperator<RmsNorm>) {
    let mut foundry = Foundry::host();
    let gain = foundry.slots_mut().storage::<f32>("gain", len).unwrap();
    foundry.slots_mut().set_value(gain, gain_data).unwrap();
    let op = RmsNorm::new(foundry.slots_mut(), "norm", gain, len, EPS).unwrap();
    (foundry, op)
}

#[test]
fn matches_cpu_reference() {
    let mut rng = StdRng::seed_from_u64(21);
    let len = 45;
    let input: Vec<f32> = (0..len).map(|_| rng.random_range(-2.0..2.0)).collect();
    let gain: Vec<f32> = (0..len).map(|_| rng.random_range(0.5..1.5)).collect();
    let (mut foundry, mut op) = setup(len, &gain);

    let out = run(&mut foundry, &mut op, &input);
    let mean_sq = input.iter().map(|x| x * x).sum::<f32>() / len as f32;
    let inv_rms = 1.0 / (mean_sq + EPS).sqrt();
    for i in 0..len {
        let expected = input[i] * inv_rms * gain[i];
        assert!((out[i] - expected).abs() < 1e-5, "index {i}: {} vs {expected}", out[i]);
    }
}

#[test]
fn output_is_invariant_to_input_scale() {
    let mut rng = StdRng::seed_from_u64(22);
    let len = 64;
    let input: Vec<f32> = (0..len).map(|_| rng.random_range(-1.0..1.0)).collect();
    let gain: Vec<f32> = (0..len).map(|_| rng.random_range(0.5..1.5)).collect();
    let (mut foundry, mut op) = setup(len, &gain);

    let base = run(&mut foundry, &mut op, &input);
    for k in [3.0f32, -0.5, 40.0] {
        let scaled: Vec<f32> = input.iter().map(|x| x * k).collect();
        let out = run(&mut foundry, &mut op, &scaled);
        for (a, b) in out.iter().zip(&base) {
            let expected = b * k.signum();
            assert!((a - expected).abs() < 1e-3 * expected.abs().max(1.0), "k={k}: {a} vs {expected}");
        }
    }
}

#[test]
fn zero_input_stays_finite() {
    let (mut foundry, mut op) = setup(4, &[1.0; 4]);
    let out = run(&mut foundry, &mut op, &[0.0; 4]);
    assert!(out.iter().all(|v| *v == 0.0));
}
