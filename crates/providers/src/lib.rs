//! Model provider implementations for Ponder.
//!
//! All providers implement the `ponder_core::Provider` trait.
//! The router selects the correct provider based on configuration.

pub mod openai_compat;
pub mod router;

pub use openai_compat::OpenAiCompatProvider;
pub use router::{ProviderRouter, build_from_config, requires_api_key, resolve_model};
