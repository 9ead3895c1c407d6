#![cfg(test)]

use rand::{Rng, SeedableRng, rngs::StdRng};

use super::*;
use crate::Foundry;

struct Harness {
    foundry: Foundry,
    freqs: SlotId,
    position: SlotId,
}

impl Harness {
    fn new(freq_data: &[f32]) -> Self {
        let mut foundry = Foundry::host();
        let freqs = foundry.slots_mut().storage::<f32>("freqs", freq_data.len()).unwrap();
        foundry.slots_mut().set_value(freqs, freq_data).unwrap();
        let position = foundry.slots_mut().uniform::<u32>("pos", 1).unwrap();
        Self { foundry, freqs, position }
    }

    fn rotate(&mut self, op: &mut KernelOperator<Rope>, input: &[f32], position: usize) -> Vec<f32> {
        let input_slot = op.kernel().input;
        self.foundry.slots_mut().set_value(input_slot, input).unwrap();
        self.foundry.slots_mut().set_value(self.position, &[position as u32]).unwrap();
        op.kernel_mut().set_position(position);
        op.compute(&self.foundry).unwrap();
        self.foundry.slots().get_value::<f32>(op.kernel().output).unwrap()
    }
}

fn row_shape(heads: usize, head_dim: usize, rope_dims: usize) -> RopeShape {
    RopeShape {
        heads,
        head_dim,
        rope_dims,
        capacity: None,
    }
}

#[test]
fn frequencies_follow_the_base() {
    let freqs = inverse_frequencies(8, 10000.0);
    assert_eq!(freqs.len(), 4);
    assert_eq!(freqs[0], 1.0);
    assert!((freqs[2] - 0.01).abs() < 1e-7);
}

#[test]
fn rotates_adjacent_pairs() {
    let mut h = Harness::new(&[1.0, 0.5]);
    let mut op = Rope::new(h.foundry.slots_mut(), "rope", None, h.freqs, h.position, row_shape(1, 4, 4)).unwrap();
    let out = h.rotate(&mut op, &[1.0, 0.0, 0.0, 1.0], 2);

    // pair 0: theta = 2; pair 1: theta = 1
    let (s0, c0) = 2.0f32.sin_cos();
    let (s1, c1) = 1.0f32.sin_cos();
    let expected = [c0, s0, -s1, c1];
    for (a, e) in out.iter().zip(expected) {
        assert!((a - e).abs() < 1e-6, "{a} vs {e}");
    }
}

#[test]
fn negated_frequencies_undo_the_rotation() {
    let mut rng = StdRng::seed_from_u64(31);
    let (heads, head_dim) = (3, 16);
    let freqs = inverse_frequencies(head_dim, 10000.0);
    let negated: Vec<f32> = freqs.iter().map(|f| -f).collect();
    let input: Vec<f32> = (0..heads * head_dim).map(|_| rng.random_range(-1.0..1.0)).collect();

    let mut forward = Harness::new(&freqs);
    let mut fwd_op = Rope::new(forward.foundry.slots_mut(), "fwd", None, forward.freqs, forward.position, row_shape(heads, head_dim, head_dim)).unwrap();
    let rotated = forward.rotate(&mut fwd_op, &input, 7);

    let mut backward = Harness::new(&negated);
    let mut bwd_op = Rope::new(backward.foundry.slots_mut(), "bwd", None, backward.freqs, backward.position, row_shape(heads, head_dim, head_dim)).unwrap();
    let restored = backward.rotate(&mut bwd_op, &rotated, 7);

    for (a, e) in restored.iter().zip(&input) {
        assert!((a - e).abs() <= 1e-5 * e.abs().max(1.0), "{a} vs {e}");
    }
}

#[test]
fn pairs_beyond_the_rotary_width_pass_through() {
    let mut h = Harness::new(&[1.0]);
    let mut op = Rope::new(h.foundry.slots_mut(), "rope", None, h.freqs, h.position, row_shape(1, 4, 2)).unwrap();
    let out = h.rotate(&mut op, &[1.0, 2.0, 3.0, 4.0], 5);
    assert_eq!(&out[2..], &[3.0, 4.0]);
    assert_ne!(&out[..2], &[1.0, 2.0]);
}

#[test]
fn cache_mode_rotates_only_the_active_row() {
    let (heads, head_dim, capacity) = (2, 4, 3);
    let mut h = Harness::new(&inverse_frequencies(head_dim, 10000.0));
    let cache = h.foundry.slots_mut().storage::<f32>("k_cache", capacity * heads * head_dim).unwrap();
    let shape = RopeShape {
        heads,
        head_dim,
        rope_dims: head_dim,
        capacity: Some(capacity),
    };
    let mut op = Rope::new(h.foundry.slots_mut(), "rope_k", Some(cache), h.freqs, h.position, shape).unwrap();
    assert_eq!(op.kernel().input, op.kernel().output);

    let row_len = heads * head_dim;
    let data: Vec<f32> = (0..capacity * row_len).map(|i| i as f32 * 0.1 + 1.0).collect();

    // Position 4 lands on row 1 once the cache has wrapped.
    let out = h.rotate(&mut op, &data, 4);
    assert_eq!(&out[..row_len], &data[..row_len]);
    assert_ne!(&out[row_len..2 * row_len], &data[row_len..2 * row_len]);
    // Rows past the active row are left alone.
    assert_eq!(&out[2 * row_len..], &data[2 * row_len..]);
}

#[test]
fn odd_rotary_width_is_rejected() {
    let mut h = Harness::new(&[1.0, 1.0]);
    assert!(Rope::new(h.foundry.slots_mut(), "rope", None, h.freqs, h.position, row_shape(1, 4, 3)).is_err());
}
