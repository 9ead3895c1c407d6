mod common;

use std::ops::ControlFlow;

use common::{DigitTokenizer, EOS, VOCAB, host_foundry, tiny_table};
use vellum_foundry::{
    FoundryError, generation::SamplingConfig, model::{FinishReason, ModelPipeline}
};

#[test]
fn greedy_chain_stops_at_eos() {
    let mut foundry = host_foundry(8);
    let table = tiny_table(11, true, &[]);
    let mut model = ModelPipeline::load(&mut foundry, &table).unwrap();

    let mut text = String::new();
    let generation = model
        .generate(&mut foundry, &DigitTokenizer, "0", &SamplingConfig::greedy(), |_, piece| {
            text.push_str(piece);
            ControlFlow::Continue(())
        })
        .unwrap();

    assert_eq!(generation.tokens, vec![1, 2]);
    assert_eq!(generation.finish, FinishReason::EndOfSequence);
    assert_eq!(generation.prompt_tokens, 1);
    assert_eq!(text, "bc");
    assert!(!generation.tokens.contains(&EOS));

    let state = model.state();
    assert_eq!(state.position, 3);
    assert!(!state.first_call);
    assert_eq!(state.last_token, Some(2));
}

#[test]
fn generation_is_deterministic() {
    let run = || {
        let mut foundry = host_foundry(8);
        let mut model = ModelPipeline::load(&mut foundry, &tiny_table(5, true, &[])).unwrap();
        let generation = model
            .generate(&mut foundry, &DigitTokenizer, "01", &SamplingConfig::greedy(), |_, _| ControlFlow::Continue(()))
            .unwrap();
        let logits = model.logits(&foundry).unwrap();
        (generation.tokens, logits)
    };

    let (tokens_a, logits_a) = run();
    let (tokens_b, logits_b) = run();
    assert_eq!(tokens_a, vec![2]);
    assert_eq!(tokens_a, tokens_b);
    assert_eq!(logits_a, logits_b);
    assert_eq!(logits_a.len(), VOCAB);
}

#[test]
fn session_continues_across_calls() {
    let mut foundry = host_foundry(8);
    let mut model = ModelPipeline::load(&mut foundry, &tiny_table(3, true, &[])).unwrap();
    let greedy = SamplingConfig::greedy();

    let first = model
        .generate(&mut foundry, &DigitTokenizer, "0", &greedy, |_, _| ControlFlow::Continue(()))
        .unwrap();
    assert_eq!(first.tokens, vec![1, 2]);

    let second = model
        .generate(&mut foundry, &DigitTokenizer, "1", &greedy, |_, _| ControlFlow::Continue(()))
        .unwrap();
    assert_eq!(second.tokens, vec![2]);
    assert_eq!(model.state().position, 5);
}

#[test]
fn eos_first_yields_nothing() {
    let mut foundry = host_foundry(8);
    let mut model = ModelPipeline::load(&mut foundry, &tiny_table(9, true, &[])).unwrap();
    let mut calls = 0;
    let generation = model
        .generate(&mut foundry, &DigitTokenizer, "2", &SamplingConfig::greedy(), |_, _| {
            calls += 1;
            ControlFlow::Continue(())
        })
        .unwrap();
    assert!(generation.tokens.is_empty());
    assert_eq!(generation.finish, FinishReason::EndOfSequence);
    assert_eq!(calls, 0);
}

#[test]
fn callback_break_cancels() {
    let mut foundry = host_foundry(8);
    // Tied head: each token predicts itself, so only the callback ends generation.
    let mut model = ModelPipeline::load(&mut foundry, &tiny_table(4, false, &[])).unwrap();
    let mut seen = Vec::new();
    let generation = model
        .generate(&mut foundry, &DigitTokenizer, "1", &SamplingConfig::greedy(), |token, _| {
            seen.push(token);
            if seen.len() == 3 { ControlFlow::Break(()) } else { ControlFlow::Continue(()) }
        })
        .unwrap();

    assert_eq!(generation.finish, FinishReason::Cancelled);
    assert_eq!(generation.tokens, vec![1, 1, 1]);
    assert_eq!(seen, generation.tokens);
    // Every yielded token has been fed back.
    assert_eq!(model.state().position, 4);
}

#[test]
fn kv_cache_wraps_past_capacity() {
    let mut foundry = host_foundry(2);
    let mut model = ModelPipeline::load(&mut foundry, &tiny_table(4, false, &[])).unwrap();
    let mut produced = 0;
    let generation = model
        .generate(&mut foundry, &DigitTokenizer, "0", &SamplingConfig::greedy(), |_, _| {
            produced += 1;
            if produced == 6 { ControlFlow::Break(()) } else { ControlFlow::Continue(()) }
        })
        .unwrap();
    assert_eq!(generation.tokens, vec![0; 6]);
    assert_eq!(model.state().position, 7);
}

#[test]
fn missing_block_tensor_fails_load() {
    let mut foundry = host_foundry(8);
    let table = tiny_table(1, true, &["blk.0.ffn_up.weight"]);
    let err = ModelPipeline::load(&mut foundry, &table).err().unwrap();
    assert!(matches!(err, FoundryError::MissingTensor(name) if name == "blk.0.ffn_up.weight"));
}

#[test]
fn empty_prompt_is_rejected() {
    let mut foundry = host_foundry(8);
    let mut model = ModelPipeline::load(&mut foundry, &tiny_table(1, true, &[])).unwrap();
    let err = model
        .generate(&mut foundry, &DigitTokenizer, "", &SamplingConfig::greedy(), |_, _| ControlFlow::Continue(()))
        .unwrap_err();
    assert!(matches!(err, FoundryError::InvalidOperation(_)));
    assert!(model.state().first_call);
}

#[test]
fn token_outside_vocabulary_is_rejected() {
    let mut foundry = host_foundry(8);
    let mut model = ModelPipeline::load(&mut foundry, &tiny_table(5, true, &[])).unwrap();

    for token in [VOCAB as u32, VOCAB as u32 + 100] {
        let err = model.step(&mut foundry, token).unwrap_err();
        assert!(matches!(err, FoundryError::TokenOutOfRange { token: t, vocab } if t == token && vocab == VOCAB));
    }
    assert_eq!(model.state().position, 0);

    let err = model
        .generate(&mut foundry, &DigitTokenizer, "7", &SamplingConfig::greedy(), |_, _| ControlFlow::Continue(()))
        .unwrap_err();
    assert!(matches!(err, FoundryError::TokenOutOfRange { token: 7, .. }));
    assert_eq!(model.state().position, 0);
}
