//! Session store implementations for Ponder.

pub mod in_memory;

pub use in_memory::InMemorySessionStore;
