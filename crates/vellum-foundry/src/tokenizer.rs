//! Byte-level BPE tokenizer built from GGUF tokenizer metadata.
//!
//! Text is NFC-normalized, split on special tokens (`<|...|>`), pre-tokenized
//! with the GPT-2 piece pattern, mapped byte-by-byte into the printable
//! unicode alphabet and merged by rank. Decoding reverses the byte mapping and
//! requires the resulting bytes to be valid UTF-8.

use std::sync::{Arc, RwLock};

use fancy_regex::Regex;
use rustc_hash::FxHashMap;
use thiserror::Error;
use unicode_normalization::UnicodeNormalization;
use vellum_loader::Metadata;

use crate::config::DEFAULT_SYSTEM_PROMPT;

const SPECIAL_TOKEN_PATTERN: &str = r"<\|[^|>]+?\|>";
const PIECE_PATTERN: &str = r"'s|'t|'re|'ve|'m|'ll|'d| ?\p{L}+| ?\p{N}+| ?[^\s\p{L}\p{N}]+|\s+(?!\S)|\s+";

const TOKEN_TYPE_NORMAL: i32 = 1;
const TOKEN_TYPE_CONTROL: i32 = 3;
const TOKEN_TYPE_BYTE: i32 = 6;

const UNKNOWN_TOKEN_ID: u32 = 0;

fn bytes_to_unicode() -> [char; 256] {
    let mut bs = (b'!'..=b'~').chain(b'\xa1'..=b'\xac').chain(b'\xae'..=b'\xff').collect::<Vec<_>>();
    let mut cs = bs.iter().map(|b| u32::from(*b)).collect::<Vec<_>>();
    let mut n = 0;
    for b in 0..=255u8 {
        if !bs.contains(&b) {
            bs.push(b);
            cs.push(256 + n);
            n += 1;
        }
    }
    let mut table = ['\0'; 256];
    for (b, c) in bs.into_iter().zip(cs) {
        // Every code point produced above is below 0x144.
        table[b as usize] = char::from_u32(c).unwrap_or('\0');
    }
    table
}

#[derive(Debug, Error)]
pub enum TokenizerError {
    #[error("Invalid token ID: {0}")]
    InvalidTokenId(u32),
    #[error("Invalid UTF-8 sequence")]
    InvalidUtf8,
    #[error("Missing tokenizer data: {0}")]
    MissingData(&'static str),
    #[error("Tokenizer initialization failed: {0}")]
    InitializationFailed(String),
    #[error("Regex Tokenizer Errors: {0}")]
    RegexError(#[from] fancy_regex::Error),
}

/// Text <-> token conversion as the decode loop consumes it.
pub trait Tokenizer {
    /// Encode `text`. With `prepend_template` the text is wrapped as the opening
    /// turn of a chat session; otherwise it is wrapped as a follow-up turn.
    /// Implementations without a chat template ignore the flag.
    fn tokenize(&self, text: &str, prepend_template: bool) -> Result<Vec<u32>, TokenizerError>;

    fn detokenize(&self, ids: &[u32]) -> Result<String, TokenizerError>;

    fn eos_token_id(&self) -> Option<u32>;
}

#[derive(Default, Debug, Clone)]
pub struct SpecialTokens {
    pub bos_token_id: Option<u32>,
    pub eos_token_id: Option<u32>,
    pub pad_token_id: Option<u32>,
}

/// Llama 3 header-format chat turn.
///
/// The opening turn carries `<|begin_of_text|>` and the system prompt; later
/// turns continue the running transcript with a new user header.
pub fn render_chat_turn(system_prompt: &str, prompt: &str, opening: bool) -> String {
    let turn = format!("<|start_header_id|>user<|end_header_id|>\n\n{prompt}<|eot_id|><|start_header_id|>assistant<|end_header_id|>\n\n");
    if opening {
        format!("<|begin_of_text|><|start_header_id|>system<|end_header_id|>\n\n{system_prompt}<|eot_id|>{turn}")
    } else {
        format!("\n\n{turn}")
    }
}

pub struct BpeTokenizer {
    vocab: FxHashMap<u32, Arc<str>>,
    vocab_r: FxHashMap<String, u32>,
    token_types: FxHashMap<u32, i32>,
    special_tokens: SpecialTokens,
    add_bos_token: bool,
    /// Merge rank and merged id keyed by the id pair being merged.
    merges: FxHashMap<(u32, u32), (u32, u32)>,
    byte_encoder: [char; 256],
    byte_decoder: FxHashMap<char, u8>,
    char_vocab: FxHashMap<char, u32>,
    bpe_cache: RwLock<FxHashMap<String, Vec<u32>>>,
    special_re: Regex,
    piece_re: Regex,
    chat_template: bool,
    system_prompt: String,
}

impl BpeTokenizer {
    pub fn new(
        vocab: FxHashMap<u32, String>,
        merges: Vec<(String, String)>,
        token_types: FxHashMap<u32, i32>,
        special_tokens: SpecialTokens,
        add_bos_token: bool,
    ) -> Result<Self, TokenizerError> {
        if vocab.is_empty() {
            return Err(TokenizerError::MissingData("vocabulary"));
        }

        let mut vocab_arc = FxHashMap::default();
        let mut vocab_r = FxHashMap::default();
        for (id, token) in vocab {
            vocab_r.insert(token.clone(), id);
            vocab_arc.insert(id, Arc::<str>::from(token));
        }

        // Pairs whose halves or result are missing from the vocabulary can never fire.
        let mut merge_map = FxHashMap::default();
        for (rank, (left, right)) in merges.iter().enumerate() {
            let merged = format!("{left}{right}");
            if let (Some(&l), Some(&r), Some(&m)) = (vocab_r.get(left), vocab_r.get(right), vocab_r.get(&merged)) {
                merge_map.entry((l, r)).or_insert((rank as u32, m));
            }
        }

        let byte_encoder = bytes_to_unicode();
        let byte_decoder = byte_encoder.iter().enumerate().map(|(b, &c)| (c, b as u8)).collect();

        let mut char_vocab = FxHashMap::default();
        for (token, &id) in &vocab_r {
            let mut chars = token.chars();
            if let (Some(c), None) = (chars.next(), chars.next()) {
                char_vocab.insert(c, id);
            }
        }

        tracing::debug!(vocab = vocab_arc.len(), merges = merge_map.len(), "tokenizer built");

        Ok(Self {
            vocab: vocab_arc,
            vocab_r,
            token_types,
            special_tokens,
            add_bos_token,
            merges: merge_map,
            byte_encoder,
            byte_decoder,
            char_vocab,
            bpe_cache: RwLock::new(FxHashMap::default()),
            special_re: Regex::new(SPECIAL_TOKEN_PATTERN)?,
            piece_re: Regex::new(PIECE_PATTERN)?,
            chat_template: true,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        })
    }

    /// Build from the `tokenizer.ggml.*` metadata keys.
    pub fn from_metadata(metadata: &Metadata) -> Result<Self, TokenizerError> {
        let tokens = metadata
            .get_string_array("tokenizer.ggml.tokens")
            .ok_or(TokenizerError::MissingData("tokenizer.ggml.tokens"))?;
        let merges = metadata
            .get_string_array("tokenizer.ggml.merges")
            .ok_or(TokenizerError::MissingData("tokenizer.ggml.merges"))?
            .into_iter()
            .filter_map(|merge| merge.split_once(' '))
            .map(|(l, r)| (l.to_string(), r.to_string()))
            .collect::<Vec<_>>();

        let token_types = match metadata.get("tokenizer.ggml.token_type") {
            None => FxHashMap::default(),
            Some(_) => metadata
                .get_i64_array("tokenizer.ggml.token_type")
                .ok_or_else(|| TokenizerError::InitializationFailed("token_type is not an integer array".to_string()))?
                .into_iter()
                .enumerate()
                .map(|(i, t)| (i as u32, t as i32))
                .collect(),
        };

        let special_tokens = SpecialTokens {
            bos_token_id: metadata.get_u32("tokenizer.ggml.bos_token_id"),
            eos_token_id: metadata.get_u32("tokenizer.ggml.eos_token_id"),
            pad_token_id: metadata.get_u32("tokenizer.ggml.padding_token_id"),
        };
        let add_bos_token = metadata.get_bool("tokenizer.ggml.add_bos_token").unwrap_or(false);

        let vocab = tokens.into_iter().enumerate().map(|(i, t)| (i as u32, t.to_string())).collect();
        Self::new(vocab, merges, token_types, special_tokens, add_bos_token)
    }

    #[must_use]
    pub fn with_chat_template(mut self, enabled: bool) -> Self {
        self.chat_template = enabled;
        self
    }

    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Encode text as-is, with a leading BOS when the vocabulary asks for one.
    pub fn encode(&self, text: &str) -> Result<Vec<u32>, TokenizerError> {
        let norm_text: String = text.nfc().collect();

        let mut token_ids = Vec::with_capacity(norm_text.len() / 2);
        if let Some(bos_id) = self.special_tokens.bos_token_id
            && self.add_bos_token
        {
            token_ids.push(bos_id);
        }

        let mut last = 0;
        for mat in self.special_re.find_iter(&norm_text) {
            let mat = mat?;
            self.encode_plain(&norm_text[last..mat.start()], &mut token_ids)?;
            match self.vocab_r.get(mat.as_str()) {
                Some(&id) => token_ids.push(id),
                None => self.encode_plain(mat.as_str(), &mut token_ids)?,
            }
            last = mat.end();
        }
        self.encode_plain(&norm_text[last..], &mut token_ids)?;

        Ok(token_ids)
    }

    fn encode_plain(&self, text: &str, token_ids: &mut Vec<u32>) -> Result<(), TokenizerError> {
        for piece in self.piece_re.find_iter(text) {
            self.bpe_encode_ids(piece?.as_str(), token_ids)?;
        }
        Ok(())
    }

    fn bpe_encode_ids(&self, piece: &str, token_ids: &mut Vec<u32>) -> Result<(), TokenizerError> {
        let token_unicode: String = piece.bytes().map(|b| self.byte_encoder[b as usize]).collect();
        if let Some(&id) = self.vocab_r.get(&token_unicode) {
            token_ids.push(id);
            return Ok(());
        }

        if let Some(cached) = self.bpe_cache.read().map_err(|_| poisoned())?.get(&token_unicode) {
            token_ids.extend_from_slice(cached);
            return Ok(());
        }

        let mut piece_ids: Vec<u32> = token_unicode
            .chars()
            .map(|c| self.char_vocab.get(&c).copied().unwrap_or(UNKNOWN_TOKEN_ID))
            .collect();

        loop {
            let best = piece_ids
                .windows(2)
                .enumerate()
                .filter_map(|(i, pair)| self.merges.get(&(pair[0], pair[1])).map(|&(rank, merged)| (rank, i, merged)))
                .min_by_key(|&(rank, i, _)| (rank, i));
            match best {
                Some((_, pos, merged)) => {
                    piece_ids.splice(pos..pos + 2, std::iter::once(merged));
                }
                None => break,
            }
        }

        token_ids.extend_from_slice(&piece_ids);
        self.bpe_cache.write().map_err(|_| poisoned())?.insert(token_unicode, piece_ids);
        Ok(())
    }

    fn push_token_bytes(&self, id: u32, bytes: &mut Vec<u8>) -> Result<(), TokenizerError> {
        let token = self.vocab.get(&id).ok_or(TokenizerError::InvalidTokenId(id))?;
        match self.token_type(id) {
            TOKEN_TYPE_CONTROL => {}
            TOKEN_TYPE_BYTE => {
                let hex = token
                    .strip_prefix("<0x")
                    .and_then(|t| t.strip_suffix('>'))
                    .filter(|h| h.len() == 2)
                    .ok_or(TokenizerError::InvalidTokenId(id))?;
                bytes.push(u8::from_str_radix(hex, 16).map_err(|_| TokenizerError::InvalidTokenId(id))?);
            }
            _ => {
                for c in token.chars() {
                    match self.byte_decoder.get(&c) {
                        Some(&b) => bytes.push(b),
                        None => {
                            let mut buf = [0u8; 4];
                            bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn token_type(&self, id: u32) -> i32 {
        self.token_types.get(&id).copied().unwrap_or(TOKEN_TYPE_NORMAL)
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    pub fn special_tokens(&self) -> &SpecialTokens {
        &self.special_tokens
    }

    pub fn token(&self, id: u32) -> Option<Arc<str>> {
        self.vocab.get(&id).cloned()
    }

    pub fn clear_cache(&self) -> Result<(), TokenizerError> {
        self.bpe_cache.write().map_err(|_| poisoned())?.clear();
        Ok(())
    }

    pub fn cache_size(&self) -> Result<usize, TokenizerError> {
        Ok(self.bpe_cache.read().map_err(|_| poisoned())?.len())
    }
}

fn poisoned() -> TokenizerError {
    TokenizerError::InitializationFailed("Cache lock poisoned".to_string())
}

impl Tokenizer for BpeTokenizer {
    fn tokenize(&self, text: &str, prepend_template: bool) -> Result<Vec<u32>, TokenizerError> {
        if !self.chat_template {
            return self.encode(text);
        }
        let rendered = render_chat_turn(&self.system_prompt, text, prepend_template);
        let mut ids = self.encode(&rendered)?;
        // The template spells out its own BOS.
        if self.add_bos_token
            && let Some(bos) = self.special_tokens.bos_token_id
            && ids.len() >= 2
            && ids[0] == bos
            && ids[1] == bos
        {
            ids.remove(0);
        }
        Ok(ids)
    }

    fn detokenize(&self, ids: &[u32]) -> Result<String, TokenizerError> {
        let mut bytes = Vec::with_capacity(ids.len() * 4);
        for &id in ids {
            self.push_token_bytes(id, &mut bytes)?;
        }
        String::from_utf8(bytes).map_err(|_| TokenizerError::InvalidUtf8)
    }

    fn eos_token_id(&self) -> Option<u32> {
        self.special_tokens.eos_token_id
    }
}

#[cfg(test)]
#[path = "tokenizer.test.rs"]
mod tests;
