//! Token counting service.
//!
//! The BPE tokenizer is loaded once per process on first use and never torn
//! down. If it cannot be loaded every count falls back to a fixed
//! characters-per-token estimate and reports itself as inexact.

use std::sync::OnceLock;

use tiktoken_rs::CoreBPE;
use tracing::{debug, warn};

/// Characters per token for the fallback estimate.
pub const CHARS_PER_TOKEN: usize = 4;

static COUNTER: OnceLock<TokenCounter> = OnceLock::new();

/// Result of counting one text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenCount {
    pub tokens: u64,
    /// False when the character estimate was used.
    pub exact: bool,
}

pub struct TokenCounter {
    bpe: Option<CoreBPE>,
}

impl TokenCounter {
    /// Returns the process-wide counter, loading the tokenizer on first call.
    pub fn ensure_initialized() -> &'static TokenCounter {
        COUNTER.get_or_init(|| match tiktoken_rs::cl100k_base() {
            Ok(bpe) => {
                debug!("Loaded cl100k_base tokenizer");
                TokenCounter { bpe: Some(bpe) }
            }
            Err(e) => {
                warn!(error = %e, "Tokenizer unavailable, estimating tokens from characters");
                TokenCounter { bpe: None }
            }
        })
    }

    /// A counter that always estimates.
    pub fn estimating() -> Self {
        TokenCounter { bpe: None }
    }

    pub fn is_exact(&self) -> bool {
        self.bpe.is_some()
    }

    pub fn count(&self, text: &str) -> TokenCount {
        match &self.bpe {
            Some(bpe) => TokenCount {
                tokens: bpe.encode_with_special_tokens(text).len() as u64,
                exact: true,
            },
            None => TokenCount {
                tokens: estimate_tokens(text),
                exact: false,
            },
        }
    }
}

pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() / CHARS_PER_TOKEN) as u64
}
