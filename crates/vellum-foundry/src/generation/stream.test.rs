#![cfg(test)]

use super::*;

/// Each id is one raw byte.
struct ByteTokenizer;

impl Tokenizer for ByteTokenizer {
    fn tokenize(&self, text: &str, _prepend_template: bool) -> Result<Vec<u32>, TokenizerError> {
        Ok(text.bytes().map(u32::from).collect())
    }

    fn detokenize(&self, ids: &[u32]) -> Result<String, TokenizerError> {
        let bytes = ids
            .iter()
            .map(|&id| u8::try_from(id).map_err(|_| TokenizerError::InvalidTokenId(id)))
            .collect::<Result<Vec<_>, _>>()?;
        String::from_utf8(bytes).map_err(|_| TokenizerError::InvalidUtf8)
    }

    fn eos_token_id(&self) -> Option<u32> {
        None
    }
}

#[test]
fn ascii_passes_straight_through() {
    let mut decoder = StreamDecoder::new();
    assert_eq!(decoder.push(&ByteTokenizer, u32::from(b'h')).unwrap().as_deref(), Some("h"));
    assert!(decoder.pending().is_empty());
}

#[test]
fn split_character_is_held_until_complete() {
    let mut decoder = StreamDecoder::new();
    let bytes = "é".as_bytes();
    assert_eq!(decoder.push(&ByteTokenizer, u32::from(bytes[0])).unwrap(), None);
    assert_eq!(decoder.pending().len(), 1);
    assert_eq!(decoder.push(&ByteTokenizer, u32::from(bytes[1])).unwrap().as_deref(), Some("é"));
}

#[test]
fn unknown_ids_surface_immediately() {
    let mut decoder = StreamDecoder::new();
    assert!(matches!(decoder.push(&ByteTokenizer, 1000), Err(TokenizerError::InvalidTokenId(1000))));
    assert!(decoder.pending().is_empty());
}

#[test]
fn dangling_bytes_fail_on_finish() {
    let mut decoder = StreamDecoder::new();
    decoder.push(&ByteTokenizer, 0xE2).unwrap();
    assert!(matches!(decoder.finish(&ByteTokenizer), Err(TokenizerError::InvalidUtf8)));
    assert_eq!(decoder.finish(&ByteTokenizer).unwrap(), None);
}

#[test]
fn garbage_run_is_reported_after_limit() {
    let mut decoder = StreamDecoder::new();
    for _ in 0..MAX_PENDING - 1 {
        assert_eq!(decoder.push(&ByteTokenizer, 0xFF).unwrap(), None);
    }
    assert!(matches!(decoder.push(&ByteTokenizer, 0xFF), Err(TokenizerError::InvalidUtf8)));
}
