//! Folds a pass's fragment stream into one assistant message.

use ponder_core::message::{Message, ToolCallRequest};
use ponder_core::provider::{StreamChunk, Usage};

/// Merges stream fragments in arrival order.
///
/// Text is concatenated verbatim, markers included. Tool calls are merged
/// by id: a fragment repeating a known id extends that call's arguments.
/// A fragment with neither id nor name continues the most recent call; one
/// that names a tool but has no id is a new call. Calls still without an id
/// at the end are given a positional `call_<n>` id.
#[derive(Debug, Default)]
pub struct ResponseAccumulator {
    content: String,
    tool_calls: Vec<ToolCallRequest>,
    usage: Option<Usage>,
}

impl ResponseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &StreamChunk) {
        if let Some(text) = &chunk.content {
            self.content.push_str(text);
        }

        for call in &chunk.tool_calls {
            let existing = if call.id.is_empty() {
                if call.name.is_empty() {
                    self.tool_calls.last_mut()
                } else {
                    None
                }
            } else {
                self.tool_calls.iter_mut().find(|t| t.id == call.id)
            };

            match existing {
                Some(t) => {
                    if t.name.is_empty() {
                        t.name.clone_from(&call.name);
                    }
                    t.arguments.push_str(&call.arguments);
                }
                None => self.tool_calls.push(call.clone()),
            }
        }

        if chunk.usage.is_some() {
            self.usage = chunk.usage;
        }
    }

    pub fn usage(&self) -> Option<Usage> {
        self.usage
    }

    pub fn into_message(mut self) -> Message {
        for (i, call) in self.tool_calls.iter_mut().enumerate() {
            if call.id.is_empty() {
                call.id = format!("call_{i}");
            }
        }
        Message::assistant_with_tools(self.content, self.tool_calls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calls(calls: Vec<ToolCallRequest>) -> StreamChunk {
        StreamChunk {
            tool_calls: calls,
            ..StreamChunk::default()
        }
    }

    #[test]
    fn concatenates_text_in_order() {
        let mut acc = ResponseAccumulator::new();
        acc.push(&StreamChunk::text("<thinking>a"));
        acc.push(&StreamChunk::default());
        acc.push(&StreamChunk::text("</thinking>b"));
        let msg = acc.into_message();
        assert_eq!(msg.content, "<thinking>a</thinking>b");
        assert!(msg.tool_calls.is_empty());
    }

    #[test]
    fn merges_tool_call_fragments_by_id() {
        let mut acc = ResponseAccumulator::new();
        acc.push(&calls(vec![
            ToolCallRequest::new("c1", "search_documents", r#"{"que"#),
            ToolCallRequest::new("c2", "search_documents", r#"{"query":"b"}"#),
        ]));
        acc.push(&calls(vec![ToolCallRequest::new("c1", "", r#"ry":"a"}"#)]));

        let msg = acc.into_message();
        assert_eq!(msg.tool_calls.len(), 2);
        assert_eq!(msg.tool_calls[0].name, "search_documents");
        assert_eq!(msg.tool_calls[0].args()["query"], "a");
        assert_eq!(msg.tool_calls[1].args()["query"], "b");
    }

    #[test]
    fn anonymous_fragment_continues_last_call() {
        let mut acc = ResponseAccumulator::new();
        acc.push(&calls(vec![ToolCallRequest::new("c1", "search_documents", "{")]));
        acc.push(&calls(vec![ToolCallRequest::new("", "", "}")]));
        let msg = acc.into_message();
        assert_eq!(msg.tool_calls.len(), 1);
        assert_eq!(msg.tool_calls[0].arguments, "{}");
    }

    #[test]
    fn named_calls_without_ids_stay_separate() {
        let mut acc = ResponseAccumulator::new();
        acc.push(&calls(vec![
            ToolCallRequest::new("", "search_documents", r#"{"query":"a"}"#),
            ToolCallRequest::new("", "search_documents", r#"{"query":"b"}"#),
        ]));

        let msg = acc.into_message();
        assert_eq!(msg.tool_calls.len(), 2);
        assert_eq!(msg.tool_calls[0].args()["query"], "a");
        assert_eq!(msg.tool_calls[1].args()["query"], "b");
        assert_eq!(msg.tool_calls[0].id, "call_0");
        assert_eq!(msg.tool_calls[1].id, "call_1");
    }

    #[test]
    fn keeps_last_usage() {
        let mut acc = ResponseAccumulator::new();
        let usage = Usage {
            prompt_tokens: 1,
            completion_tokens: 2,
            total_tokens: 3,
        };
        acc.push(&StreamChunk {
            done: true,
            usage: Some(usage),
            ..StreamChunk::default()
        });
        acc.push(&StreamChunk::text("x"));
        assert_eq!(acc.usage(), Some(usage));
    }
}
