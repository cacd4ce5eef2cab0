//! Agent transcript parsing.
//!
//! A transcript is newline-delimited JSON, one event per line. Only `user`
//! and `assistant` events contribute to the metrics; anything that does not
//! parse is skipped.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum retained characters per message.
const MESSAGE_LIMIT: usize = 5000;
/// Tool names with this prefix are calls into external integrations.
const MCP_PREFIX: &str = "mcp__";
const SKILL_TOOL: &str = "Skill";

static CHECKIN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^✓?\s*Check-In:").expect("valid regex"));
static FINAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^✓?\s*Final:").expect("valid regex"));
static FINAL_VERDICT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?mi)^✓?\s*Final:.*?(PASS|FAIL)").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Truncated message text kept for later inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
}

/// Counters recovered from one transcript file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationMetrics {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,

    pub assistant_messages: u64,
    pub user_messages: u64,

    /// Invocations per tool name.
    pub tool_calls: BTreeMap<String, u64>,
    /// Invocations per integration tool name (subset of `tool_calls`).
    pub mcp_breakdown: BTreeMap<String, u64>,
    pub mcp_calls: u64,
    pub skill_calls: u64,

    pub has_checkin: bool,
    pub has_final: bool,
    /// `PASS` or `FAIL` from the final marker line.
    pub final_status: Option<String>,

    pub first_message_time: Option<String>,
    pub last_message_time: Option<String>,
    pub messages: Vec<ConversationMessage>,
}

impl ConversationMetrics {
    /// All four token counters summed.
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens + self.cache_creation_tokens + self.cache_read_tokens
    }

    /// Tokens that count toward billing; cache reads are excluded.
    pub fn billable_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens + self.cache_creation_tokens
    }

    pub fn total_tool_calls(&self) -> u64 {
        self.tool_calls.values().sum()
    }

    /// Conservative pairing of user and assistant messages.
    pub fn total_turns(&self) -> u64 {
        self.user_messages.min(self.assistant_messages)
    }
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum TranscriptRecord {
    User(UserRecord),
    Assistant(AssistantRecord),
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct UserRecord {
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    message: Option<UserMessage>,
}

#[derive(Deserialize)]
struct UserMessage {
    #[serde(default)]
    content: Value,
}

#[derive(Deserialize)]
struct AssistantRecord {
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    message: Option<AssistantMessage>,
}

#[derive(Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    usage: Option<Usage>,
    #[serde(default)]
    content: Value,
}

#[derive(Deserialize, Default)]
struct Usage {
    #[serde(default)]
    input_tokens: Option<u64>,
    #[serde(default)]
    output_tokens: Option<u64>,
    #[serde(default)]
    cache_creation_input_tokens: Option<u64>,
    #[serde(default)]
    cache_read_input_tokens: Option<u64>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    ToolUse {
        #[serde(default)]
        name: String,
    },
    Text {
        #[serde(default)]
        text: String,
    },
    #[serde(other)]
    Other,
}

/// Parses a transcript file.
pub fn parse_transcript_file(path: &Path) -> io::Result<ConversationMetrics> {
    let file = File::open(path)?;
    Ok(parse_transcript(BufReader::new(file)))
}

/// Parses transcript lines from any buffered reader.
pub fn parse_transcript<R: BufRead>(reader: R) -> ConversationMetrics {
    let mut metrics = ConversationMetrics::default();
    for line in reader.split(b'\n') {
        let Ok(line) = line else {
            break;
        };
        let line = String::from_utf8_lossy(&line);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<TranscriptRecord>(line) {
            Ok(TranscriptRecord::User(record)) => metrics.record_user(record),
            Ok(TranscriptRecord::Assistant(record)) => metrics.record_assistant(record),
            Ok(TranscriptRecord::Other) | Err(_) => {}
        }
    }
    metrics
}

impl ConversationMetrics {
    fn record_user(&mut self, record: UserRecord) {
        self.user_messages += 1;
        if let Some(ts) = record.timestamp {
            if self.first_message_time.is_none() {
                self.first_message_time = Some(ts.clone());
            }
            self.last_message_time = Some(ts);
        }
        if let Some(Value::String(content)) = record.message.map(|m| m.content) {
            if !content.is_empty() {
                self.messages.push(ConversationMessage {
                    role: Role::User,
                    content: truncate_chars(&content, MESSAGE_LIMIT),
                });
            }
        }
    }

    fn record_assistant(&mut self, record: AssistantRecord) {
        self.assistant_messages += 1;
        if let Some(ts) = record.timestamp {
            self.last_message_time = Some(ts);
        }
        let Some(message) = record.message else {
            return;
        };

        let usage = message.usage.unwrap_or_default();
        self.input_tokens += usage.input_tokens.unwrap_or(0);
        self.output_tokens += usage.output_tokens.unwrap_or(0);
        self.cache_creation_tokens += usage.cache_creation_input_tokens.unwrap_or(0);
        self.cache_read_tokens += usage.cache_read_input_tokens.unwrap_or(0);

        let Value::Array(blocks) = &message.content else {
            return;
        };
        let mut texts = Vec::new();
        for block in blocks {
            match ContentBlock::deserialize(block) {
                Ok(ContentBlock::ToolUse { name }) => self.record_tool(name),
                Ok(ContentBlock::Text { text }) => {
                    self.scan_markers(&text);
                    texts.push(text);
                }
                Ok(ContentBlock::Other) | Err(_) => {}
            }
        }
        if !texts.is_empty() {
            self.messages.push(ConversationMessage {
                role: Role::Assistant,
                content: truncate_chars(&texts.join("\n"), MESSAGE_LIMIT),
            });
        }
    }

    fn record_tool(&mut self, name: String) {
        if name.starts_with(MCP_PREFIX) {
            self.mcp_calls += 1;
            *self.mcp_breakdown.entry(name.clone()).or_insert(0) += 1;
        }
        if name == SKILL_TOOL {
            self.skill_calls += 1;
        }
        *self.tool_calls.entry(name).or_insert(0) += 1;
    }

    fn scan_markers(&mut self, text: &str) {
        if CHECKIN_RE.is_match(text) {
            self.has_checkin = true;
        }
        if FINAL_RE.is_match(text) {
            self.has_final = true;
            if let Some(caps) = FINAL_VERDICT_RE.captures(text) {
                self.final_status = Some(caps[1].to_uppercase());
            }
        }
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
