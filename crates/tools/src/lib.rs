//! Built-in tool implementations for Ponder.
//!
//! The agent currently has one capability: searching an external document
//! store for passages it can quote and cite.

pub mod document_search;

use ponder_config::AppConfig;
use ponder_core::tool::ToolRegistry;

pub use document_search::DocumentSearchTool;

/// Create the tool registry used by the agent loop.
pub fn default_registry(config: &AppConfig) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(DocumentSearchTool::from_config(&config.retrieval)));
    registry
}
