use crate::tokenizer::{Tokenizer, TokenizerError};

/// Longest run of tokens buffered while waiting for a UTF-8 sequence to complete.
const MAX_PENDING: usize = 4;

/// Turns a stream of token ids into text pieces.
///
/// A multi-byte character can be split across byte tokens, so ids whose bytes
/// do not yet form valid UTF-8 are held back until a later token completes them.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    pending: Vec<u32>,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one token. Returns the text it completes, if any.
    pub fn push(&mut self, tokenizer: &dyn Tokenizer, id: u32) -> Result<Option<String>, TokenizerError> {
        self.pending.push(id);
        match tokenizer.detokenize(&self.pending) {
            Ok(text) => {
                self.pending.clear();
                Ok((!text.is_empty()).then_some(text))
            }
            Err(TokenizerError::InvalidUtf8) if self.pending.len() < MAX_PENDING => Ok(None),
            Err(err) => {
                self.pending.clear();
                Err(err)
            }
        }
    }

    /// Tokens held back waiting for more bytes.
    pub fn pending(&self) -> &[u32] {
        &self.pending
    }

    /// Decode whatever is still buffered; an incomplete sequence is an error.
    pub fn finish(&mut self, tokenizer: &dyn Tokenizer) -> Result<Option<String>, TokenizerError> {
        if self.pending.is_empty() {
            return Ok(None);
        }
        let ids = std::mem::take(&mut self.pending);
        let text = tokenizer.detokenize(&ids)?;
        Ok((!text.is_empty()).then_some(text))
    }
}

#[cfg(test)]
#[path = "stream.test.rs"]
mod tests;
