//! Turn-level output events.
//!
//! `OutputEvent` is what a turn produces for its caller, in order: the
//! demultiplexed narrative and reasoning text, status lines for tool calls,
//! and at most one terminal error. The gateway writes each event as one
//! line of newline-delimited JSON.

use serde::{Deserialize, Serialize};

/// Events emitted by the agent during a turn.
///
/// Wire form:
/// - `text_chunk`    user-facing narrative text
/// - `thought_chunk` reasoning text
/// - `status`        a tool call is about to run
/// - `error`         the turn aborted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum OutputEvent {
    #[serde(rename = "text_chunk")]
    NarrativeChunk(String),

    #[serde(rename = "thought_chunk")]
    ReasoningChunk(String),

    Status(String),

    Error(String),
}

impl OutputEvent {
    /// Wire name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::NarrativeChunk(_) => "text_chunk",
            Self::ReasoningChunk(_) => "thought_chunk",
            Self::Status(_) => "status",
            Self::Error(_) => "error",
        }
    }

    /// Serialize as one NDJSON record, including the trailing newline.
    pub fn to_ndjson_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}
