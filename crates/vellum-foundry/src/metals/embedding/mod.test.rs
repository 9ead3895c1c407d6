#![cfg(test)]

use rand::{Rng, SeedableRng, rngs::StdRng};

use super::*;
use crate::Foundry;

#[test]
fn copies_the_requested_row() {
    let mut rng = StdRng::seed_from_u64(11);
    let (vocab, width) = (7, 300);
    let table_data: Vec<f32> = (0..vocab * width).map(|_| rng.random_range(-1.0..1.0)).collect();

    let mut foundry = Foundry::host();
    let table = foundry.slots_mut().storage::<f32>("table", vocab * width).unwrap();
    foundry.slots_mut().set_value(table, &table_data).unwrap();
    let mut op = Embedding::new(foundry.slots_mut(), "embd", table, vocab, width).unwrap();

    for token in [0u32, 3, 6] {
        let slot = op.kernel().token;
        foundry.slots_mut().set_value(slot, &[token]).unwrap();
        op.compute(&foundry).unwrap();
        let out = foundry.slots().get_value::<f32>(op.kernel().output).unwrap();
        let start = token as usize * width;
        assert_eq!(out, table_data[start..start + width].to_vec());
    }
}

#[test]
fn undersized_table_is_rejected() {
    let mut foundry = Foundry::host();
    let table = foundry.slots_mut().storage::<f32>("table", 10).unwrap();
    let err = Embedding::new(foundry.slots_mut(), "embd", table, 4, 4).err().unwrap();
    assert!(matches!(err, FoundryError::ShapeMismatch { .. }));
}

#[test]
fn id_past_the_table_reads_nothing() {
    let (vocab, width) = (3, 4);
    let table_data: Vec<f32> = (0..vocab * width).map(|i| i as f32 + 1.0).collect();

    let mut foundry = Foundry::host();
    let table = foundry.slots_mut().storage::<f32>("table", vocab * width).unwrap();
    foundry.slots_mut().set_value(table, &table_data).unwrap();
    let mut op = Embedding::new(foundry.slots_mut(), "embd", table, vocab, width).unwrap();

    let slot = op.kernel().token;
    foundry.slots_mut().set_value(slot, &[vocab as u32]).unwrap();
    op.compute(&foundry).unwrap();
    assert_eq!(foundry.slots().get_value::<f32>(op.kernel().output).unwrap(), vec![0.0; width]);
}
