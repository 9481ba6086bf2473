//! Inbound record classification.
//!
//! Turns one decoded NDJSON line into a [`Frame`]. Record shapes are open
//! ended, so every field is read defensively: a record with an unexpected
//! shape degrades to fewer blocks or to [`Frame::Unrecognized`], never to an
//! error that would abort the stream.
//!
//! # Known record types
//!
//! | `type`      | Maps to                  | Logged as                        |
//! |-------------|--------------------------|----------------------------------|
//! | `assistant` | [`Frame::Assistant`]     | `INFO` text / tool-use names     |
//! | `user`      | [`Frame::UserEcho`]      | `WARN` for failed tool results   |
//! | `result`    | [`Frame::Result`]        | `INFO` cost and duration         |
//! | `system`    | [`Frame::System`]        | `DEBUG`                          |
//! | *(other)*   | [`Frame::Unrecognized`]  | `DEBUG`                          |

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

/// Maximum number of characters of a failed tool result surfaced in logs.
const TOOL_ERROR_PREVIEW_CHARS: usize = 200;

/// One typed content block of an assistant or user-echo message.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    /// Text for display.
    Text {
        /// The text content.
        text: String,
    },
    /// A tool invocation. Execution happens inside the sandboxed process.
    ToolUse {
        /// Tool-use identifier, when present.
        id: Option<String>,
        /// Tool name.
        name: String,
        /// Tool arguments as sent by the agent.
        input: Value,
    },
    /// The outcome of an earlier tool invocation.
    ToolResult {
        /// Identifier of the invocation this result answers.
        tool_use_id: Option<String>,
        /// Whether the tool reported a failure.
        is_error: bool,
        /// Tool output (string or structured).
        content: Value,
    },
    /// A block of a type this crate does not interpret.
    Other {
        /// The block's `type` discriminant, or empty if absent.
        kind: String,
    },
}

/// Payload of the terminal `result` record that ends a turn.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TerminalResult {
    /// Final response text.
    pub result: String,
    /// Whether the agent reported the turn as failed.
    pub is_error: bool,
    /// Total cost of the turn in USD.
    pub total_cost_usd: f64,
    /// Wall-clock duration of the turn in milliseconds.
    pub duration_ms: u64,
    /// Conversation id reported with the result.
    pub session_id: Option<String>,
}

/// One classified inbound record.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Assistant message with text and tool-invocation blocks.
    Assistant {
        /// Ordered content blocks.
        blocks: Vec<ContentBlock>,
        /// Conversation id carried by the record.
        session_id: Option<String>,
    },
    /// Echo of user-role content, typically tool results.
    UserEcho {
        /// Ordered content blocks.
        blocks: Vec<ContentBlock>,
        /// Conversation id carried by the record.
        session_id: Option<String>,
    },
    /// End of the current turn.
    Result(TerminalResult),
    /// CLI system record, e.g. the `init` record emitted at startup.
    System {
        /// The record's `subtype`.
        subtype: Option<String>,
        /// Conversation id carried by the record.
        session_id: Option<String>,
    },
    /// Any record with a missing or unknown `type`.
    Unrecognized {
        /// The record's `type`, if it had one.
        kind: Option<String>,
        /// Conversation id carried by the record.
        session_id: Option<String>,
    },
}

impl Frame {
    /// The non-empty conversation id carried by this record, if any.
    #[must_use]
    pub fn conversation_id(&self) -> Option<&str> {
        match self {
            Self::Assistant { session_id, .. }
            | Self::UserEcho { session_id, .. }
            | Self::System { session_id, .. }
            | Self::Unrecognized { session_id, .. } => session_id.as_deref(),
            Self::Result(result) => result.session_id.as_deref(),
        }
    }

    /// Whether this record ends the current turn.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Result(_))
    }

    /// Content blocks, empty for record kinds that carry none.
    #[must_use]
    pub fn blocks(&self) -> &[ContentBlock] {
        match self {
            Self::Assistant { blocks, .. } | Self::UserEcho { blocks, .. } => blocks,
            _ => &[],
        }
    }

    /// Concatenated text of all [`ContentBlock::Text`] blocks.
    #[must_use]
    pub fn text(&self) -> String {
        self.blocks()
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

// ── Wire shapes ───────────────────────────────────────────────────────────────

/// Content block as it appears on the wire.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlock {
    Text {
        text: String,
    },
    ToolUse {
        #[serde(default)]
        id: Option<String>,
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        #[serde(default)]
        tool_use_id: Option<String>,
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        content: Value,
    },
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Parse one decoded line and classify it.
///
/// Returns `None` for blank lines and for lines that are not valid JSON; the
/// latter are logged at `DEBUG` and dropped so that decoding continues with
/// the next line.
#[must_use]
pub fn parse_line(session_id: &str, line: &str) -> Option<Frame> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    match serde_json::from_str::<Value>(line) {
        Ok(record) => Some(classify(&record)),
        Err(e) => {
            debug!(session_id, error = %e, raw_line = line, "dispatcher: malformed json, skipping line");
            None
        }
    }
}

/// Classify a parsed record by its `type` discriminant.
#[must_use]
pub fn classify(record: &Value) -> Frame {
    let session_id = record
        .get("session_id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_owned);

    match record.get("type").and_then(Value::as_str) {
        Some("assistant") => Frame::Assistant {
            blocks: content_blocks(record),
            session_id,
        },
        Some("user") => Frame::UserEcho {
            blocks: content_blocks(record),
            session_id,
        },
        Some("result") => Frame::Result(terminal_result(record, session_id)),
        Some("system") => Frame::System {
            subtype: record
                .get("subtype")
                .and_then(Value::as_str)
                .map(str::to_owned),
            session_id,
        },
        other => Frame::Unrecognized {
            kind: other.map(str::to_owned),
            session_id,
        },
    }
}

/// Emit the log lines a caller watching the agent expects for `frame`.
pub fn log_frame(session_id: &str, frame: &Frame) {
    match frame {
        Frame::Assistant { blocks, .. } => {
            for block in blocks {
                match block {
                    ContentBlock::Text { text } => info!(session_id, "[agent] {text}"),
                    ContentBlock::ToolUse { name, .. } => info!(session_id, "[tool_use] {name}"),
                    _ => {}
                }
            }
        }
        Frame::UserEcho { blocks, .. } => {
            for block in blocks {
                if let ContentBlock::ToolResult {
                    is_error: true,
                    content,
                    ..
                } = block
                {
                    let preview: String = value_text(content)
                        .chars()
                        .take(TOOL_ERROR_PREVIEW_CHARS)
                        .collect();
                    warn!(session_id, "[tool_error] {preview}");
                }
            }
        }
        Frame::Result(result) => {
            #[allow(clippy::cast_precision_loss)]
            let seconds = result.duration_ms as f64 / 1000.0;
            info!(
                session_id,
                is_error = result.is_error,
                "[done] cost=${:.4} duration={seconds:.1}s",
                result.total_cost_usd
            );
        }
        Frame::System { subtype, .. } => {
            debug!(session_id, subtype = subtype.as_deref(), "dispatcher: system record");
        }
        Frame::Unrecognized { kind, .. } => {
            debug!(
                session_id,
                kind = kind.as_deref(),
                "dispatcher: skipping unrecognized record"
            );
        }
    }
}

// ── Private helpers ───────────────────────────────────────────────────────────

/// Read `message.content` as an ordered list of blocks.
///
/// A bare string is treated as a single text block.
fn content_blocks(record: &Value) -> Vec<ContentBlock> {
    match record.pointer("/message/content") {
        Some(Value::Array(items)) => items.iter().map(content_block).collect(),
        Some(Value::String(text)) => vec![ContentBlock::Text { text: text.clone() }],
        _ => Vec::new(),
    }
}

fn content_block(item: &Value) -> ContentBlock {
    match WireBlock::deserialize(item) {
        Ok(WireBlock::Text { text }) => ContentBlock::Text { text },
        Ok(WireBlock::ToolUse { id, name, input }) => ContentBlock::ToolUse { id, name, input },
        Ok(WireBlock::ToolResult {
            tool_use_id,
            is_error,
            content,
        }) => ContentBlock::ToolResult {
            tool_use_id,
            is_error,
            content,
        },
        Err(_) => ContentBlock::Other {
            kind: item
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
        },
    }
}

/// Read a `result` record field by field, so one mistyped field only loses
/// that field.
fn terminal_result(record: &Value, session_id: Option<String>) -> TerminalResult {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let duration_ms = record
        .get("duration_ms")
        .and_then(Value::as_f64)
        .unwrap_or_default()
        .max(0.0) as u64;

    TerminalResult {
        result: record.get("result").map(value_text).unwrap_or_default(),
        is_error: record
            .get("is_error")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        total_cost_usd: record
            .get("total_cost_usd")
            .and_then(Value::as_f64)
            .unwrap_or_default(),
        duration_ms,
        session_id,
    }
}

/// Render a JSON value as display text: strings verbatim, `null` as empty,
/// anything else as compact JSON.
fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
