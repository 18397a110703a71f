//! The agent turn loop.
//!
//! A turn runs as a sequence of model passes:
//!
//! 1. **Build the prompt**: system instructions + session history + user input
//! 2. **Stream a pass**: fragments flow through a [`TagDemultiplexer`] that
//!    separates narrative text from reasoning as it arrives
//! 3. **If tool calls**: announce and run each tool, append results, go to 2
//! 4. **If no tool calls**: commit the user input and final answer to the session
//!
//! The working prompt is capped at a fixed number of messages, so a model
//! that keeps requesting tools ends with an error instead of looping forever.

pub mod accumulator;
pub mod demux;
pub mod loop_runner;
pub mod stream_event;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use accumulator::ResponseAccumulator;
pub use demux::{Channel, MarkerError, Markers, TagDemultiplexer};
pub use loop_runner::{AgentLoop, LIMIT_REACHED_MESSAGE, TurnOutcome};
pub use stream_event::OutputEvent;
