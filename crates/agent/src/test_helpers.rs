//! Shared test doubles for agent loop tests.

use async_trait::async_trait;
use ponder_core::error::{ProviderError, ToolError};
use ponder_core::message::ToolCallRequest;
use ponder_core::provider::{ChunkReceiver, Provider, ProviderRequest, ProviderResponse, StreamChunk};
use ponder_core::tool::{Tool, ToolRegistry, ToolResult};
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// What one `stream()` call produces.
pub enum Script {
    /// The request itself fails.
    Reject(ProviderError),
    /// The stream yields these items, then closes.
    Items(Vec<Result<StreamChunk, ProviderError>>),
}

/// A provider that replays scripted fragment streams, one per call.
///
/// Records every request so tests can inspect the prompt each pass saw.
/// Once the scripts run out, further calls are rejected.
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        Err(ProviderError::NotConfigured("scripted provider only streams".into()))
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let script = self.scripts.lock().unwrap().pop_front();

        match script {
            None => Err(ProviderError::NotConfigured("no more scripted responses".into())),
            Some(Script::Reject(e)) => Err(e),
            Some(Script::Items(items)) => {
                let (tx, rx) = mpsc::channel(items.len().max(1));
                for item in items {
                    tx.try_send(item).unwrap();
                }
                Ok(rx)
            }
        }
    }
}

/// A pass that streams text fragments and no tool calls.
pub fn text_pass(fragments: &[&str]) -> Script {
    let mut items: Vec<_> = fragments.iter().map(|f| Ok(StreamChunk::text(*f))).collect();
    items.push(Ok(StreamChunk {
        done: true,
        ..StreamChunk::default()
    }));
    Script::Items(items)
}

/// A pass that streams text fragments, then requests tool calls.
pub fn tool_pass(fragments: &[&str], calls: Vec<ToolCallRequest>) -> Script {
    let mut items: Vec<_> = fragments.iter().map(|f| Ok(StreamChunk::text(*f))).collect();
    items.push(Ok(StreamChunk {
        tool_calls: calls,
        done: true,
        ..StreamChunk::default()
    }));
    Script::Items(items)
}

pub fn search_call(id: &str, query: &str) -> ToolCallRequest {
    ToolCallRequest::new(id, "search_documents", serde_json::json!({ "query": query }).to_string())
}

/// Stand-in for the document search tool with a canned answer.
pub struct FakeSearchTool {
    pub output: String,
}

#[async_trait]
impl Tool for FakeSearchTool {
    fn name(&self) -> &str {
        "search_documents"
    }

    fn description(&self) -> &str {
        "Search the document store"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "query": { "type": "string" } },
            "required": ["query"]
        })
    }

    fn status_line(&self, arguments: &serde_json::Value) -> String {
        format!("Searching: {}", arguments["query"].as_str().unwrap_or("..."))
    }

    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        Ok(ToolResult::ok(self.output.clone()))
    }
}

/// A tool that always faults.
pub struct BrokenTool;

#[async_trait]
impl Tool for BrokenTool {
    fn name(&self) -> &str {
        "broken"
    }

    fn description(&self) -> &str {
        "Always fails"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object" })
    }

    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        Err(ToolError::ExecutionFailed {
            tool_name: "broken".into(),
            reason: "index offline".into(),
        })
    }
}

pub fn test_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(FakeSearchTool {
        output: "Title: Hostels\nSource: https://example.org/hostels\nThere are ten hostels.".into(),
    }));
    registry.register(Box::new(BrokenTool));
    registry
}
