//! Incremental splitter for reasoning-tagged model output.
//!
//! The model interleaves user-facing narrative with reasoning wrapped in a
//! start/end marker pair (`<thinking>...</thinking>` by default). Fragments
//! arrive with arbitrary boundaries, so a marker may be split across any
//! number of pushes. The demultiplexer emits text as early as possible while
//! withholding only the shortest tail that could still grow into a marker.
//!
//! Markers never nest: a start marker inside reasoning, or an end marker
//! inside narrative, is ordinary text.

use crate::stream_event::OutputEvent;

/// Which output channel text is currently routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Narrative,
    Reasoning,
}

impl Channel {
    fn toggled(self) -> Self {
        match self {
            Self::Narrative => Self::Reasoning,
            Self::Reasoning => Self::Narrative,
        }
    }

    fn chunk(self, text: impl Into<String>) -> OutputEvent {
        match self {
            Self::Narrative => OutputEvent::NarrativeChunk(text.into()),
            Self::Reasoning => OutputEvent::ReasoningChunk(text.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarkerError {
    #[error("reasoning markers must not be empty")]
    Empty,

    #[error("start and end markers must differ")]
    Identical,

    #[error("marker {inner:?} is contained in marker {outer:?}")]
    Overlapping { inner: String, outer: String },
}

/// A validated start/end marker pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Markers {
    start: String,
    end: String,
}

impl Markers {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Result<Self, MarkerError> {
        let (start, end) = (start.into(), end.into());

        if start.is_empty() || end.is_empty() {
            return Err(MarkerError::Empty);
        }
        if start == end {
            return Err(MarkerError::Identical);
        }
        if start.contains(end.as_str()) {
            return Err(MarkerError::Overlapping { inner: end, outer: start });
        }
        if end.contains(start.as_str()) {
            return Err(MarkerError::Overlapping { inner: start, outer: end });
        }

        Ok(Self { start, end })
    }

    pub fn start(&self) -> &str {
        &self.start
    }

    pub fn end(&self) -> &str {
        &self.end
    }

    /// The marker that leaves `channel`.
    fn exit(&self, channel: Channel) -> &str {
        match channel {
            Channel::Narrative => &self.start,
            Channel::Reasoning => &self.end,
        }
    }
}

impl Default for Markers {
    fn default() -> Self {
        Self {
            start: "<thinking>".into(),
            end: "</thinking>".into(),
        }
    }
}

/// Streaming narrative/reasoning demultiplexer.
///
/// Create one per generation pass; state does not carry over between passes.
#[derive(Debug)]
pub struct TagDemultiplexer {
    markers: Markers,
    channel: Channel,
    /// Withheld tail: always a strict prefix of the current exit marker.
    buffer: String,
}

impl TagDemultiplexer {
    pub fn new(markers: Markers) -> Self {
        Self {
            markers,
            channel: Channel::Narrative,
            buffer: String::new(),
        }
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Feed one fragment and collect the events it releases, in order.
    pub fn push(&mut self, fragment: &str) -> Vec<OutputEvent> {
        let mut events = Vec::new();
        if fragment.is_empty() {
            return events;
        }

        self.buffer.push_str(fragment);

        loop {
            let marker = self.markers.exit(self.channel);

            if let Some(pos) = self.buffer.find(marker) {
                if pos > 0 {
                    events.push(self.channel.chunk(&self.buffer[..pos]));
                }
                self.buffer.drain(..pos + marker.len());
                self.channel = self.channel.toggled();
                continue;
            }

            let held = partial_marker_len(&self.buffer, marker);
            let ready = self.buffer.len() - held;
            if ready > 0 {
                events.push(self.channel.chunk(&self.buffer[..ready]));
                self.buffer.drain(..ready);
            }
            return events;
        }
    }

    /// End of stream: release whatever is withheld into the current channel.
    pub fn finish(self) -> Option<OutputEvent> {
        (!self.buffer.is_empty()).then(|| self.channel.chunk(self.buffer))
    }
}

/// Length of the longest suffix of `buffer` that is a strict prefix of
/// `marker`, considering only UTF-8 character boundaries.
fn partial_marker_len(buffer: &str, marker: &str) -> usize {
    let longest = (marker.len() - 1).min(buffer.len());
    (1..=longest)
        .rev()
        .find(|&k| {
            let at = buffer.len() - k;
            buffer.is_char_boundary(at) && marker.starts_with(&buffer[at..])
        })
        .unwrap_or(0)
}
