#![cfg(test)]

use rand::{SeedableRng, rngs::StdRng};

use super::*;

fn draw(logits: &[f32], config: &SamplingConfig, rng: &mut StdRng) -> usize {
    sample(logits, config, rng, &mut SamplerBuffers::default()).unwrap()
}

#[test]
fn dominant_logit_wins_almost_always() {
    let logits = [10.0, 1.0, 1.0, 1.0];
    let config = SamplingConfig {
        temperature: 1.0,
        top_p: 0.99,
        top_k: 4,
    };
    let mut rng = StdRng::seed_from_u64(7);
    let mut buffers = SamplerBuffers::default();

    let trials = 2000;
    let hits = (0..trials)
        .filter(|_| sample(&logits, &config, &mut rng, &mut buffers).unwrap() == 0)
        .count();
    assert!(hits as f32 / trials as f32 >= 0.99, "index 0 drawn {hits}/{trials}");
}

#[test]
fn zero_temperature_is_argmax() {
    let mut rng = StdRng::seed_from_u64(1);
    let logits = [0.5, 3.0, -1.0, 2.9];
    assert_eq!(draw(&logits, &SamplingConfig::greedy(), &mut rng), 1);

    let negative = SamplingConfig {
        temperature: -1.0,
        ..SamplingConfig::default()
    };
    assert_eq!(draw(&logits, &negative, &mut rng), 1);
}

#[test]
fn top_k_one_is_argmax() {
    let mut rng = StdRng::seed_from_u64(2);
    let config = SamplingConfig {
        temperature: 5.0,
        top_p: 1.0,
        top_k: 1,
    };
    for _ in 0..50 {
        assert_eq!(draw(&[1.0, 1.5, 1.2], &config, &mut rng), 1);
    }
}

#[test]
fn tiny_top_p_keeps_one_candidate() {
    let mut rng = StdRng::seed_from_u64(3);
    let config = SamplingConfig {
        temperature: 1.0,
        top_p: 0.0,
        top_k: 10,
    };
    for _ in 0..50 {
        assert_eq!(draw(&[0.0, 0.1, 0.2, 0.3], &config, &mut rng), 3);
    }
}

#[test]
fn draws_stay_inside_top_k() {
    let mut rng = StdRng::seed_from_u64(4);
    let config = SamplingConfig {
        temperature: 1.0,
        top_p: 1.0,
        top_k: 2,
    };
    let logits = [2.0, 0.0, 2.1, 0.0, 1.9];
    for _ in 0..200 {
        let idx = draw(&logits, &config, &mut rng);
        assert!(idx == 0 || idx == 2, "drew {idx}");
    }
}

#[test]
fn uniform_logits_reach_every_index() {
    let mut rng = StdRng::seed_from_u64(5);
    let config = SamplingConfig {
        temperature: 1.0,
        top_p: 1.0,
        top_k: 4,
    };
    let mut seen = [false; 4];
    for _ in 0..400 {
        seen[draw(&[1.0; 4], &config, &mut rng)] = true;
    }
    assert!(seen.iter().all(|&s| s));
}

#[test]
fn non_finite_logits_are_skipped() {
    let mut rng = StdRng::seed_from_u64(6);
    let config = SamplingConfig {
        temperature: 1.0,
        top_p: 1.0,
        top_k: 4,
    };
    let logits = [f32::NAN, f32::NEG_INFINITY, 0.0, f32::NAN];
    for _ in 0..20 {
        assert_eq!(draw(&logits, &config, &mut rng), 2);
    }
}

#[test]
fn all_non_finite_is_an_error() {
    let mut rng = StdRng::seed_from_u64(8);
    let result = sample(&[f32::NAN, f32::NAN], &SamplingConfig::default(), &mut rng, &mut SamplerBuffers::default());
    assert!(matches!(result, Err(FoundryError::Sampling(_))));
    assert!(argmax(&[]).is_none());
}

#[test]
fn argmax_prefers_first_of_ties() {
    assert_eq!(argmax(&[1.0, 4.0, 4.0, 2.0]), Some(1));
}

#[test]
fn effective_top_k_bounds() {
    assert_eq!(effective_top_k(0, 10), 1);
    assert_eq!(effective_top_k(40, 10), 10);
    assert_eq!(effective_top_k(3, 10), 3);
}
