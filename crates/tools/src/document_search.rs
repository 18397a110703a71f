//! Document search tool: queries an external retrieval service.
//!
//! The service is a plain JSON endpoint. The tool POSTs
//! `{"query": ..., "top_k": ...}` and expects back a list of hits, which are
//! rendered as text blocks the model can quote and cite.

use async_trait::async_trait;
use ponder_config::RetrievalConfig;
use ponder_core::error::ToolError;
use ponder_core::tool::{Tool, ToolResult};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

pub const TOOL_NAME: &str = "search_documents";

const NO_RESULTS: &str = "No results found.";
const HIT_SEPARATOR: &str = "\n\n---\n\n";
const MAX_TOP_K: u64 = 20;

pub struct DocumentSearchTool {
    endpoint: Option<String>,
    top_k: u32,
    client: reqwest::Client,
}

impl DocumentSearchTool {
    pub fn new(endpoint: Option<String>, top_k: u32) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            endpoint,
            top_k,
            client,
        }
    }

    pub fn from_config(config: &RetrievalConfig) -> Self {
        Self::new(config.url.clone(), config.top_k)
    }

    fn unavailable(reason: impl Into<String>) -> ToolError {
        ToolError::Unavailable {
            tool_name: TOOL_NAME.into(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl Tool for DocumentSearchTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Search the document store for passages relevant to a query. \
         Returns matching passages, each with a title and a `Source:` URL to cite."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What to search for, phrased as keywords or a question"
                },
                "top_k": {
                    "type": "integer",
                    "description": "Maximum number of passages to return",
                    "minimum": 1,
                    "maximum": MAX_TOP_K
                }
            },
            "required": ["query"]
        })
    }

    fn status_line(&self, arguments: &serde_json::Value) -> String {
        let query = arguments.get("query").and_then(|q| q.as_str()).unwrap_or("...");
        format!("Searching: {query}")
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let query = arguments["query"]
            .as_str()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'query' argument".into()))?;

        let top_k = arguments["top_k"]
            .as_u64()
            .unwrap_or(u64::from(self.top_k))
            .clamp(1, MAX_TOP_K);

        let endpoint = self
            .endpoint
            .as_deref()
            .ok_or_else(|| Self::unavailable("retrieval.url is not configured"))?;

        debug!(query, top_k, "Searching documents");

        let response = self
            .client
            .post(endpoint)
            .json(&serde_json::json!({ "query": query, "top_k": top_k }))
            .send()
            .await
            .map_err(|e| Self::unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::ExecutionFailed {
                tool_name: TOOL_NAME.into(),
                reason: format!("retrieval service returned {status}"),
            });
        }

        let body: SearchResponse = response.json().await.map_err(|e| ToolError::ExecutionFailed {
            tool_name: TOOL_NAME.into(),
            reason: format!("unreadable retrieval response: {e}"),
        })?;

        Ok(ToolResult::ok(format_hits(&body.into_hits())))
    }
}

/// One passage returned by the retrieval service.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchHit {
    #[serde(default)]
    pub title: Option<String>,

    #[serde(default, alias = "source")]
    pub url: Option<String>,

    #[serde(alias = "page_content")]
    pub content: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SearchResponse {
    Wrapped { results: Vec<SearchHit> },
    Bare(Vec<SearchHit>),
}

impl SearchResponse {
    fn into_hits(self) -> Vec<SearchHit> {
        match self {
            Self::Wrapped { results } => results,
            Self::Bare(hits) => hits,
        }
    }
}

/// Render hits as text blocks for the model.
pub fn format_hits(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return NO_RESULTS.into();
    }

    hits.iter()
        .map(|hit| {
            format!(
                "Title: {}\nSource: {}\n{}",
                hit.title.as_deref().unwrap_or("Untitled"),
                hit.url.as_deref().unwrap_or("unknown"),
                hit.content.trim()
            )
        })
        .collect::<Vec<_>>()
        .join(HIT_SEPARATOR)
}
