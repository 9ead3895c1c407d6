#![cfg(test)]

use super::*;

const TOKENS: [&str; 13] = [
    "<unk>",
    "a",
    "b",
    "c",
    "ab",
    "abc",
    "Ġ",
    "Ġa",
    "<|begin_of_text|>",
    "<|eot_id|>",
    "<0xE2>",
    "Ċ",
    "<|start_header_id|>",
];

fn metadata() -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("tokenizer.ggml.tokens", TOKENS.to_vec());
    metadata.insert("tokenizer.ggml.merges", vec!["a b", "ab c", "Ġ a"]);
    let types: Vec<i32> = (0..TOKENS.len() as u32)
        .map(|id| match id {
            0 | 8 | 9 | 12 => 3,
            10 => 6,
            _ => 1,
        })
        .collect();
    metadata.insert("tokenizer.ggml.token_type", types);
    metadata.insert("tokenizer.ggml.bos_token_id", 8u32);
    metadata.insert("tokenizer.ggml.eos_token_id", 9u32);
    metadata
}

fn tokenizer() -> BpeTokenizer {
    BpeTokenizer::from_metadata(&metadata()).unwrap()
}

#[test]
fn whole_piece_in_vocab_is_one_token() {
    assert_eq!(tokenizer().encode("abc").unwrap(), vec![5]);
}

#[test]
fn merges_apply_repeatedly() {
    let tok = tokenizer();
    assert_eq!(tok.encode("abab").unwrap(), vec![4, 4]);
    assert_eq!(tok.encode("cab").unwrap(), vec![3, 4]);
}

#[test]
fn lower_rank_merges_first() {
    // "Ġ a" would also apply, but "a b" ranks higher.
    assert_eq!(tokenizer().encode(" ab").unwrap(), vec![6, 4]);
}

#[test]
fn spaces_map_through_byte_alphabet() {
    assert_eq!(tokenizer().encode("a a").unwrap(), vec![1, 7]);
}

#[test]
fn special_tokens_are_matched_whole() {
    assert_eq!(tokenizer().encode("<|eot_id|>b").unwrap(), vec![9, 2]);
}

#[test]
fn bpe_results_are_cached() {
    let tok = tokenizer();
    assert_eq!(tok.cache_size().unwrap(), 0);
    tok.encode("abab").unwrap();
    assert_eq!(tok.cache_size().unwrap(), 1);
    assert_eq!(tok.encode("abab").unwrap(), vec![4, 4]);
    tok.clear_cache().unwrap();
    assert_eq!(tok.cache_size().unwrap(), 0);
}

#[test]
fn detokenize_reverses_byte_mapping() {
    let tok = tokenizer();
    assert_eq!(tok.detokenize(&[5, 7]).unwrap(), "abc a");
    assert_eq!(tok.detokenize(&[1, 11]).unwrap(), "a\n");
}

#[test]
fn control_tokens_decode_to_nothing() {
    assert_eq!(tokenizer().detokenize(&[8, 1, 9]).unwrap(), "a");
}

#[test]
fn unknown_id_is_an_error() {
    assert!(matches!(tokenizer().detokenize(&[99]), Err(TokenizerError::InvalidTokenId(99))));
}

#[test]
fn partial_utf8_is_an_error() {
    assert!(matches!(tokenizer().detokenize(&[10]), Err(TokenizerError::InvalidUtf8)));
}

#[test]
fn opening_turn_renders_system_prompt() {
    let text = render_chat_turn("Be brief.", "Hi", true);
    assert_eq!(
        text,
        "<|begin_of_text|><|start_header_id|>system<|end_header_id|>\n\nBe brief.<|eot_id|>\
         <|start_header_id|>user<|end_header_id|>\n\nHi<|eot_id|>\
         <|start_header_id|>assistant<|end_header_id|>\n\n"
    );
}

#[test]
fn follow_up_turn_has_no_preamble() {
    let text = render_chat_turn("Be brief.", "Hi", false);
    assert!(text.starts_with("\n\n<|start_header_id|>user"));
    assert!(!text.contains("begin_of_text"));
    assert!(!text.contains("Be brief."));
}

#[test]
fn tokenize_wraps_prompt_in_template() {
    let tok = tokenizer();

    let first = tok.tokenize("ab", true).unwrap();
    assert_eq!(&first[..2], &[8, 12]);
    assert!(first.contains(&9));

    let next = tok.tokenize("ab", false).unwrap();
    assert_eq!(&next[..3], &[11, 11, 12]);
    assert!(!next.contains(&8));
}

#[test]
fn disabled_template_encodes_raw_text() {
    let tok = tokenizer().with_chat_template(false);
    assert_eq!(tok.tokenize("ab", true).unwrap(), vec![4]);
}

#[test]
fn metadata_fields_are_read() {
    let tok = tokenizer();
    assert_eq!(tok.vocab_size(), TOKENS.len());
    assert_eq!(tok.eos_token_id(), Some(9));
    assert_eq!(tok.special_tokens().bos_token_id, Some(8));
    assert_eq!(tok.token(4).as_deref(), Some("ab"));
}

#[test]
fn missing_merges_are_reported() {
    let mut metadata = Metadata::new();
    metadata.insert("tokenizer.ggml.tokens", vec!["a"]);
    assert!(matches!(
        BpeTokenizer::from_metadata(&metadata),
        Err(TokenizerError::MissingData("tokenizer.ggml.merges"))
    ));
}
