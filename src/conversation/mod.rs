//! Agent transcript analysis.
//!
//! Parses the agent's own newline-delimited event log to recover exact
//! token usage, tool and skill invocations, turn counts and protocol
//! markers, and locates that log for a given workspace.

mod locator;
mod parser;
mod reanalyze;

pub use locator::TranscriptLocator;
pub use parser::{
    parse_transcript, parse_transcript_file, ConversationMessage, ConversationMetrics, Role,
};
pub use reanalyze::{reanalyze_experiment, ReanalysisReport};
