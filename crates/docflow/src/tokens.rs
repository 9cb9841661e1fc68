//! Token counting for extracted chunks.

use std::fmt;

use tiktoken_rs::CoreBPE;

/// Counts tokens with a BPE encoding, or characters when no encoding is
/// available. Counting never fails.
pub struct TokenCounter {
    bpe: Option<CoreBPE>,
}

impl TokenCounter {
    /// Loads the `cl100k_base` encoding, degrading to character counts if
    /// it cannot be initialised.
    pub fn cl100k() -> Self {
        match tiktoken_rs::cl100k_base() {
            Ok(bpe) => Self { bpe: Some(bpe) },
            Err(e) => {
                tracing::warn!(error = %e, "Tokenizer unavailable, counting characters instead");
                Self::characters()
            }
        }
    }

    pub fn characters() -> Self {
        Self { bpe: None }
    }

    /// Builds the counter named in configuration.
    pub fn from_name(name: &str) -> Self {
        match name {
            "characters" => Self::characters(),
            _ => Self::cl100k(),
        }
    }

    pub fn count(&self, text: &str) -> usize {
        match &self.bpe {
            Some(bpe) => bpe.encode_with_special_tokens(text).len(),
            None => text.chars().count(),
        }
    }

    pub fn is_tokenizer(&self) -> bool {
        self.bpe.is_some()
    }
}

impl fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCounter")
            .field("tokenizer", &self.is_tokenizer())
            .finish()
    }
}
