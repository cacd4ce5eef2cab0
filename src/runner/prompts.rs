//! Scripted answers to interactive prompts.
//!
//! The table is plain data so it can live in configuration files and be
//! tested without a terminal.

use serde::{Deserialize, Serialize};

/// A known prompt and the keystrokes that answer it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptSignature {
    /// Substring searched for in each output chunk.
    pub pattern: String,
    /// Bytes written back to the terminal when the pattern is seen.
    pub response: String,
}

impl PromptSignature {
    pub fn new(pattern: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            response: response.into(),
        }
    }

    /// Yes/no confirmations are accepted, option menus take the first entry.
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new("Continue? [Y/n]", "Y\n"),
            Self::new("[Y/N]", "Y\n"),
            Self::new("Choose option", "1\n"),
        ]
    }
}

/// Matches output chunks against an ordered signature table.
#[derive(Debug, Clone)]
pub struct PromptResponder {
    signatures: Vec<PromptSignature>,
}

impl PromptResponder {
    pub fn new(signatures: Vec<PromptSignature>) -> Self {
        Self { signatures }
    }

    /// Returns the first signature whose pattern occurs in `chunk`.
    pub fn match_chunk(&self, chunk: &str) -> Option<&PromptSignature> {
        self.signatures
            .iter()
            .find(|sig| !sig.pattern.is_empty() && chunk.contains(&sig.pattern))
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }
}

impl Default for PromptResponder {
    fn default() -> Self {
        Self::new(PromptSignature::defaults())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirmation_prompt() {
        let responder = PromptResponder::default();
        let sig = responder.match_chunk("Apply edits? Continue? [Y/n] ").unwrap();
        assert_eq!(sig.response, "Y\n");
    }

    #[test]
    fn test_option_menu() {
        let responder = PromptResponder::default();
        let sig = responder.match_chunk("Choose option (1-3):").unwrap();
        assert_eq!(sig.response, "1\n");
    }

    #[test]
    fn test_first_match_wins() {
        let responder = PromptResponder::new(vec![
            PromptSignature::new("[Y/N]", "N\n"),
            PromptSignature::new("Overwrite", "Y\n"),
        ]);
        let sig = responder.match_chunk("Overwrite file? [Y/N]").unwrap();
        assert_eq!(sig.response, "N\n");
    }

    #[test]
    fn test_no_match_and_empty_pattern() {
        let responder = PromptResponder::new(vec![PromptSignature::new("", "x")]);
        assert!(responder.match_chunk("anything").is_none());
        assert!(PromptResponder::default().match_chunk("Working...").is_none());
    }
}
