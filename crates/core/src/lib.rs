//! # Ponder Core
//!
//! Domain types, traits, and error definitions for the Ponder agent runtime.
//! This crate has **no framework dependencies**; it defines the domain model
//! that the other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every collaborator of the agent loop is a trait here:
//! - [`Provider`] produces the model's fragment stream
//! - [`Tool`] is one capability the model may invoke
//! - [`SessionStore`] owns conversation histories
//!
//! Implementations live in their respective crates, so the loop can be
//! exercised against scripted stand-ins in tests.

pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod session;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use event::{DomainEvent, EventBus};
pub use message::{Message, Role, ToolCallRequest};
pub use provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk};
pub use session::{Session, SessionHandle, SessionId, SessionStore};
pub use tool::{Tool, ToolRegistry, ToolResult};
