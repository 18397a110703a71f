//! The agent turn loop.
//!
//! One turn: build the prompt from the session, stream a model pass through
//! the demultiplexer, run any requested tools, and repeat until the model
//! answers without tools. Only a completed turn touches session history.

use chrono::Utc;
use ponder_config::{AgentConfig, AppConfig, CommitPolicy};
use ponder_core::error::{Error, ProviderError};
use ponder_core::event::{DomainEvent, EventBus};
use ponder_core::message::{Message, ToolCallRequest};
use ponder_core::provider::{Provider, ProviderRequest, ToolDefinition};
use ponder_core::session::{SessionId, SessionStore};
use ponder_core::tool::ToolRegistry;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::accumulator::ResponseAccumulator;
use crate::demux::{Markers, TagDemultiplexer};
use crate::stream_event::OutputEvent;

pub const LIMIT_REACHED_MESSAGE: &str = "Max recursion limit reached.";

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The model answered without tools; the turn was committed.
    Completed { passes: usize, tool_calls: usize },
    /// The working prompt outgrew the message ceiling.
    LimitReached,
    /// The model stream faulted.
    Failed(String),
}

/// Orchestrates model passes and tool calls for one session turn at a time.
pub struct AgentLoop {
    /// The model provider
    provider: Arc<dyn Provider>,

    /// The model to request
    model: String,

    temperature: f32,

    max_tokens: Option<u32>,

    /// Tool registry, read-only after startup
    tools: Arc<ToolRegistry>,

    /// Conversation histories
    sessions: Arc<dyn SessionStore>,

    /// Event bus for domain events
    event_bus: Arc<EventBus>,

    /// Instruction text prepended to every prompt
    system_prompt: String,

    markers: Markers,

    /// Ceiling on messages in the working prompt
    max_prompt_messages: usize,

    /// Capacity of the per-turn output channel
    event_buffer: usize,

    commit_policy: CommitPolicy,
}

impl AgentLoop {
    /// Create an agent loop with default settings.
    pub fn new(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        tools: Arc<ToolRegistry>,
        sessions: Arc<dyn SessionStore>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let defaults = AgentConfig::default();
        Self {
            provider,
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
            tools,
            sessions,
            event_bus,
            system_prompt: defaults.system_prompt,
            markers: Markers::default(),
            max_prompt_messages: defaults.max_prompt_messages,
            event_buffer: defaults.event_buffer,
            commit_policy: defaults.commit_policy,
        }
    }

    /// Wire up the full runtime from configuration: provider router, tool
    /// registry, and session store.
    pub fn from_config(config: &AppConfig) -> Result<Self, Error> {
        let router = ponder_providers::build_from_config(config);
        let provider = router.default_provider().ok_or_else(|| {
            ProviderError::NotConfigured(format!("no provider named '{}'", config.default_provider))
        })?;

        let has_key = config.has_api_key()
            || config
                .providers
                .get(&config.default_provider)
                .is_some_and(|p| p.api_key.is_some());
        if !has_key && ponder_providers::requires_api_key(&config.default_provider) {
            return Err(ProviderError::NotConfigured(format!(
                "no API key configured for provider '{}'",
                config.default_provider
            ))
            .into());
        }

        let tools = Arc::new(ponder_tools::default_registry(config));
        let sessions: Arc<dyn SessionStore> =
            Arc::new(ponder_sessions::InMemorySessionStore::from_config(&config.sessions));

        let agent = Self::new(
            provider,
            ponder_providers::resolve_model(config),
            tools,
            sessions,
            Arc::new(EventBus::default()),
        )
        .with_temperature(config.default_temperature)
        .with_max_tokens(config.default_max_tokens)
        .with_agent_config(&config.agent)?;

        Ok(agent)
    }

    /// Apply the `[agent]` configuration section.
    pub fn with_agent_config(mut self, config: &AgentConfig) -> Result<Self, Error> {
        self.markers = Markers::new(&config.reasoning_start, &config.reasoning_end).map_err(|e| Error::Config {
            message: e.to_string(),
        })?;
        self.system_prompt.clone_from(&config.system_prompt);
        self.max_prompt_messages = config.max_prompt_messages;
        self.event_buffer = config.event_buffer.max(1);
        self.commit_policy = config.commit_policy;
        Ok(self)
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_markers(mut self, markers: Markers) -> Self {
        self.markers = markers;
        self
    }

    pub fn with_max_prompt_messages(mut self, max: usize) -> Self {
        self.max_prompt_messages = max;
        self
    }

    pub fn with_commit_policy(mut self, policy: CommitPolicy) -> Self {
        self.commit_policy = policy;
        self
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Start a turn on the runtime and return its event stream.
    ///
    /// The receiver closes when the turn ends. Dropping it early does not
    /// cancel the turn; a turn that completes is still committed.
    pub fn run_turn(self: Arc<Self>, session_id: SessionId, input: impl Into<String>) -> mpsc::Receiver<OutputEvent> {
        let (tx, rx) = mpsc::channel(self.event_buffer);
        let input = input.into();

        tokio::spawn(async move {
            let outcome = self.drive_turn(&session_id, &input, &tx).await;
            debug!(session_id = %session_id, ?outcome, "Turn finished");
        });

        rx
    }

    /// Run one turn inline, sending events to `tx`.
    pub async fn drive_turn(&self, session_id: &SessionId, input: &str, tx: &mpsc::Sender<OutputEvent>) -> TurnOutcome {
        let handle = self.sessions.get_or_create(session_id).await;
        // Held until the turn ends: turns on one session never interleave
        let mut session = handle.lock().await;

        info!(session_id = %session_id, history = session.len(), "Turn started");
        self.event_bus.publish(DomainEvent::TurnStarted {
            session_id: session_id.to_string(),
            history_len: session.len(),
            timestamp: Utc::now(),
        });

        let user = Message::user(input);
        let mut prompt = Vec::with_capacity(session.len() + 2);
        prompt.push(Message::system(&self.system_prompt));
        prompt.extend(session.history().iter().cloned());
        prompt.push(user.clone());

        if self.commit_policy == CommitPolicy::UserFirst {
            session.append(user.clone());
        }

        let tool_defs = self.tools.definitions();
        let mut passes = 0usize;
        let mut tool_calls_made = 0usize;

        let outcome = loop {
            passes += 1;

            let assistant = match self.run_pass(&prompt, &tool_defs, tx).await {
                Ok(message) => message,
                Err(e) => {
                    let reason = e.to_string();
                    warn!(session_id = %session_id, pass = passes, error = %reason, "Model stream failed");
                    emit(tx, OutputEvent::Error(reason.clone())).await;
                    break TurnOutcome::Failed(reason);
                }
            };

            self.event_bus.publish(DomainEvent::PassCompleted {
                session_id: session_id.to_string(),
                pass: passes,
                tool_calls: assistant.tool_calls.len(),
                timestamp: Utc::now(),
            });

            if assistant.tool_calls.is_empty() {
                let answer = Message::assistant(assistant.content);
                match self.commit_policy {
                    CommitPolicy::OnSuccess => session.commit_turn(user, answer),
                    CommitPolicy::UserFirst => session.append(answer),
                }
                break TurnOutcome::Completed {
                    passes,
                    tool_calls: tool_calls_made,
                };
            }

            let calls = assistant.tool_calls.clone();
            prompt.push(assistant);

            if prompt.len() > self.max_prompt_messages {
                warn!(
                    session_id = %session_id,
                    messages = prompt.len(),
                    limit = self.max_prompt_messages,
                    "Message ceiling reached"
                );
                emit(tx, OutputEvent::Error(LIMIT_REACHED_MESSAGE.into())).await;
                break TurnOutcome::LimitReached;
            }

            for call in &calls {
                let content = self.invoke_tool(call, tx).await;
                prompt.push(Message::tool_result(&call.id, content));
                tool_calls_made += 1;
            }
        };

        match &outcome {
            TurnOutcome::Completed { passes, tool_calls } => {
                info!(session_id = %session_id, passes, tool_calls, "Turn committed");
                self.event_bus.publish(DomainEvent::TurnCompleted {
                    session_id: session_id.to_string(),
                    passes: *passes,
                    tool_calls: *tool_calls,
                    timestamp: Utc::now(),
                });
            }
            TurnOutcome::LimitReached => self.publish_abort(session_id, LIMIT_REACHED_MESSAGE),
            TurnOutcome::Failed(reason) => self.publish_abort(session_id, reason),
        }

        outcome
    }

    /// Stream one model pass, forwarding demultiplexed text as it arrives.
    async fn run_pass(
        &self,
        prompt: &[Message],
        tool_defs: &[ToolDefinition],
        tx: &mpsc::Sender<OutputEvent>,
    ) -> Result<Message, ProviderError> {
        let request = ProviderRequest {
            model: self.model.clone(),
            messages: prompt.to_vec(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            tools: tool_defs.to_vec(),
        };

        let mut stream = self.provider.stream(request).await?;
        let mut demux = TagDemultiplexer::new(self.markers.clone());
        let mut response = ResponseAccumulator::new();

        while let Some(item) = stream.recv().await {
            let chunk = item?;
            if let Some(text) = &chunk.content {
                for event in demux.push(text) {
                    emit(tx, event).await;
                }
            }
            response.push(&chunk);
            if chunk.done {
                break;
            }
        }

        if let Some(event) = demux.finish() {
            emit(tx, event).await;
        }

        if let Some(usage) = response.usage() {
            debug!(total_tokens = usage.total_tokens, "Pass usage");
        }

        Ok(response.into_message())
    }

    /// Announce and run one tool call, returning the text fed back to the model.
    ///
    /// Every call gets a status line, unknown tools included: those are
    /// announced as `Calling tool: <name>` before the not-found result is
    /// returned, so clients see each request the model made.
    async fn invoke_tool(&self, call: &ToolCallRequest, tx: &mpsc::Sender<OutputEvent>) -> String {
        let args = call.args();
        let started = Instant::now();

        let Some(tool) = self.tools.get(&call.name) else {
            warn!(tool = %call.name, "Model requested unknown tool");
            emit(tx, OutputEvent::Status(format!("Calling tool: {}", call.name))).await;
            self.publish_tool(&call.name, false, started);
            return format!("Error: Tool '{}' not found.", call.name);
        };

        emit(tx, OutputEvent::Status(tool.status_line(&args))).await;

        match tool.execute(args).await {
            Ok(result) => {
                debug!(tool = %call.name, bytes = result.output.len(), "Tool succeeded");
                self.publish_tool(&call.name, result.success, started);
                result.output
            }
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Tool failed");
                self.publish_tool(&call.name, false, started);
                format!("Error executing tool: {e}")
            }
        }
    }

    fn publish_tool(&self, name: &str, success: bool, started: Instant) {
        self.event_bus.publish(DomainEvent::ToolExecuted {
            tool_name: name.to_string(),
            success,
            duration_ms: started.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
        });
    }

    fn publish_abort(&self, session_id: &SessionId, reason: &str) {
        self.event_bus.publish(DomainEvent::TurnAborted {
            session_id: session_id.to_string(),
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });
    }
}

/// Forward an event; a closed receiver is not an error.
async fn emit(tx: &mpsc::Sender<OutputEvent>, event: OutputEvent) {
    let kind = event.event_type();
    if tx.send(event).await.is_err() {
        debug!(kind, "Output receiver dropped; continuing turn");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use ponder_core::message::Role;
    use ponder_core::provider::StreamChunk;
    use ponder_sessions::InMemorySessionStore;

    struct Harness {
        agent: Arc<AgentLoop>,
        provider: Arc<ScriptedProvider>,
        sessions: Arc<dyn SessionStore>,
    }

    fn harness(scripts: Vec<Script>) -> Harness {
        harness_with(scripts, |a| a)
    }

    fn harness_with(scripts: Vec<Script>, configure: impl FnOnce(AgentLoop) -> AgentLoop) -> Harness {
        let provider = Arc::new(ScriptedProvider::new(scripts));
        let sessions: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::default());
        let agent = AgentLoop::new(
            provider.clone(),
            "mock-model",
            Arc::new(test_registry()),
            sessions.clone(),
            Arc::new(EventBus::default()),
        )
        .with_system_prompt("SYSTEM");
        Harness {
            agent: Arc::new(configure(agent)),
            provider,
            sessions,
        }
    }

    fn sid(s: &str) -> SessionId {
        SessionId::parse(s).unwrap()
    }

    async fn turn(h: &Harness, session: &str, input: &str) -> (TurnOutcome, Vec<OutputEvent>) {
        let (tx, mut rx) = mpsc::channel(1024);
        let outcome = h.agent.drive_turn(&sid(session), input, &tx).await;
        drop(tx);
        let mut events = Vec::new();
        while let Some(e) = rx.recv().await {
            events.push(e);
        }
        (outcome, events)
    }

    async fn history(h: &Harness, session: &str) -> Vec<(Role, String)> {
        match h.sessions.get(&sid(session)).await {
            Some(handle) => handle
                .lock()
                .await
                .history()
                .iter()
                .map(|m| (m.role, m.content.clone()))
                .collect(),
            None => vec![],
        }
    }

    #[tokio::test]
    async fn answer_without_tools_commits_single_pass() {
        let h = harness(vec![text_pass(&["<think", "ing>plan</thi", "nking>Hel", "lo"])]);

        let (outcome, events) = turn(&h, "s1", "hi").await;

        assert_eq!(outcome, TurnOutcome::Completed { passes: 1, tool_calls: 0 });
        assert_eq!(
            events,
            vec![
                OutputEvent::ReasoningChunk("plan".into()),
                OutputEvent::NarrativeChunk("Hel".into()),
                OutputEvent::NarrativeChunk("lo".into()),
            ]
        );
        assert_eq!(
            history(&h, "s1").await,
            vec![
                (Role::User, "hi".into()),
                (Role::Assistant, "<thinking>plan</thinking>Hello".into()),
            ]
        );

        let requests = h.provider.requests();
        let roles: Vec<_> = requests[0].messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, [Role::System, Role::User]);
        assert_eq!(requests[0].messages[0].content, "SYSTEM");
        assert_eq!(requests[0].tools.len(), 2);
    }

    #[tokio::test]
    async fn tool_call_then_final_answer() {
        let h = harness(vec![
            tool_pass(&["<thinking>need data</thinking>"], vec![search_call("c1", "hostels")]),
            text_pass(&["There are ten hostels."]),
        ]);

        let (outcome, events) = turn(&h, "s1", "how many hostels?").await;

        assert_eq!(outcome, TurnOutcome::Completed { passes: 2, tool_calls: 1 });
        assert_eq!(
            events,
            vec![
                OutputEvent::ReasoningChunk("need data".into()),
                OutputEvent::Status("Searching: hostels".into()),
                OutputEvent::NarrativeChunk("There are ten hostels.".into()),
            ]
        );

        // Only the final answer is committed, not the tool exchange
        assert_eq!(
            history(&h, "s1").await,
            vec![
                (Role::User, "how many hostels?".into()),
                (Role::Assistant, "There are ten hostels.".into()),
            ]
        );

        let second = &h.provider.requests()[1].messages;
        let roles: Vec<_> = second.iter().map(|m| m.role).collect();
        assert_eq!(roles, [Role::System, Role::User, Role::Assistant, Role::Tool]);
        assert_eq!(second[2].tool_calls[0].id, "c1");
        assert_eq!(second[3].tool_call_id.as_deref(), Some("c1"));
        assert!(second[3].content.contains("ten hostels"));
    }

    #[tokio::test]
    async fn multiple_calls_run_in_model_order() {
        let h = harness(vec![
            tool_pass(&[], vec![search_call("a", "first"), search_call("b", "second")]),
            text_pass(&["done"]),
        ]);

        let (outcome, events) = turn(&h, "s1", "q").await;

        assert_eq!(outcome, TurnOutcome::Completed { passes: 2, tool_calls: 2 });
        assert_eq!(events[0], OutputEvent::Status("Searching: first".into()));
        assert_eq!(events[1], OutputEvent::Status("Searching: second".into()));

        let second = &h.provider.requests()[1].messages;
        let ids: Vec<_> = second.iter().filter_map(|m| m.tool_call_id.as_deref()).collect();
        assert_eq!(ids, ["a", "b"]);
    }

    #[tokio::test]
    async fn unknown_tool_gets_status_line_and_not_found_result() {
        let h = harness(vec![
            tool_pass(&[], vec![ToolCallRequest::new("c1", "nope", "{}")]),
            text_pass(&["Sorry."]),
        ]);

        let (outcome, events) = turn(&h, "s1", "q").await;

        assert!(matches!(outcome, TurnOutcome::Completed { .. }));
        assert_eq!(events[0], OutputEvent::Status("Calling tool: nope".into()));
        let second = &h.provider.requests()[1].messages;
        assert_eq!(second.last().unwrap().content, "Error: Tool 'nope' not found.");
    }

    #[tokio::test]
    async fn calls_without_ids_run_separately() {
        let h = harness(vec![
            tool_pass(&[], vec![search_call("", "fees"), search_call("", "hostels")]),
            text_pass(&["Done."]),
        ]);

        let (outcome, events) = turn(&h, "s1", "q").await;

        assert_eq!(outcome, TurnOutcome::Completed { passes: 2, tool_calls: 2 });
        let statuses: Vec<_> = events.iter().filter(|e| matches!(e, OutputEvent::Status(_))).collect();
        assert_eq!(
            statuses,
            [
                &OutputEvent::Status("Searching: fees".into()),
                &OutputEvent::Status("Searching: hostels".into()),
            ]
        );

        let second = &h.provider.requests()[1].messages;
        let results: Vec<_> = second
            .iter()
            .filter(|m| m.role == Role::Tool)
            .map(|m| m.tool_call_id.as_deref().unwrap())
            .collect();
        assert_eq!(results, ["call_0", "call_1"]);
    }

    #[tokio::test]
    async fn tool_fault_is_reported_to_model() {
        let h = harness(vec![
            tool_pass(&[], vec![ToolCallRequest::new("c1", "broken", "{}")]),
            text_pass(&["Could not search."]),
        ]);

        let (outcome, events) = turn(&h, "s1", "q").await;

        assert!(matches!(outcome, TurnOutcome::Completed { .. }));
        assert_eq!(events[0], OutputEvent::Status("Calling tool: broken".into()));
        let second = &h.provider.requests()[1].messages;
        assert_eq!(
            second.last().unwrap().content,
            "Error executing tool: Tool execution failed: broken: index offline"
        );
        assert_eq!(history(&h, "s1").await.len(), 2);
    }

    #[tokio::test]
    async fn default_ceiling_stops_endless_tool_use() {
        // system + user + (assistant, tool) per pass: the 15th assistant
        // message takes the prompt to 31
        let scripts = (0..20)
            .map(|i| tool_pass(&["looking"], vec![search_call(&format!("c{i}"), "again")]))
            .collect();
        let h = harness(scripts);

        let (outcome, events) = turn(&h, "s1", "loop forever").await;

        assert_eq!(outcome, TurnOutcome::LimitReached);
        assert_eq!(h.provider.call_count(), 15);
        assert_eq!(events.last(), Some(&OutputEvent::Error(LIMIT_REACHED_MESSAGE.into())));
        assert_eq!(events.iter().filter(|e| matches!(e, OutputEvent::Error(_))).count(), 1);
        assert_eq!(
            events.iter().filter(|e| matches!(e, OutputEvent::Status(_))).count(),
            14
        );
        assert!(history(&h, "s1").await.is_empty());
    }

    #[tokio::test]
    async fn custom_ceiling() {
        let scripts = (0..5)
            .map(|i| tool_pass(&[], vec![search_call(&format!("c{i}"), "x")]))
            .collect();
        let h = harness_with(scripts, |a| a.with_max_prompt_messages(5));

        let (outcome, _) = turn(&h, "s1", "q").await;

        assert_eq!(outcome, TurnOutcome::LimitReached);
        assert_eq!(h.provider.call_count(), 3);
    }

    #[tokio::test]
    async fn stream_fault_aborts_without_commit() {
        let h = harness(vec![Script::Items(vec![
            Ok(StreamChunk::text("partial <thin")),
            Err(ProviderError::StreamInterrupted("connection reset".into())),
        ])]);

        let (outcome, events) = turn(&h, "s1", "q").await;

        assert_eq!(outcome, TurnOutcome::Failed("Stream interrupted: connection reset".into()));
        assert_eq!(
            events,
            vec![
                OutputEvent::NarrativeChunk("partial ".into()),
                OutputEvent::Error("Stream interrupted: connection reset".into()),
            ]
        );
        assert!(history(&h, "s1").await.is_empty());
    }

    #[tokio::test]
    async fn rejected_request_emits_single_error() {
        let h = harness(vec![Script::Reject(ProviderError::AuthenticationFailed("bad key".into()))]);

        let (outcome, events) = turn(&h, "s1", "q").await;

        assert!(matches!(outcome, TurnOutcome::Failed(_)));
        assert_eq!(events, vec![OutputEvent::Error("Authentication failed: bad key".into())]);
        assert!(history(&h, "s1").await.is_empty());
    }

    #[tokio::test]
    async fn fault_after_tool_use_discards_whole_turn() {
        let h = harness(vec![tool_pass(&["a"], vec![search_call("c1", "x")])]);

        let (outcome, events) = turn(&h, "s1", "q").await;

        assert!(matches!(outcome, TurnOutcome::Failed(_)));
        assert!(matches!(events.last(), Some(OutputEvent::Error(_))));
        assert!(history(&h, "s1").await.is_empty());
    }

    #[tokio::test]
    async fn user_first_policy_keeps_user_message_on_abort() {
        let h = harness_with(
            vec![
                Script::Reject(ProviderError::Network("down".into())),
                text_pass(&["ok"]),
            ],
            |a| a.with_commit_policy(CommitPolicy::UserFirst),
        );

        turn(&h, "s1", "first").await;
        assert_eq!(history(&h, "s1").await, vec![(Role::User, "first".into())]);

        turn(&h, "s1", "second").await;
        assert_eq!(
            history(&h, "s1").await,
            vec![
                (Role::User, "first".into()),
                (Role::User, "second".into()),
                (Role::Assistant, "ok".into()),
            ]
        );
    }

    #[tokio::test]
    async fn history_feeds_next_turn() {
        let h = harness(vec![text_pass(&["one"]), text_pass(&["two"])]);

        turn(&h, "s1", "first").await;
        turn(&h, "s1", "second").await;

        let second = &h.provider.requests()[1].messages;
        let contents: Vec<_> = second.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["SYSTEM", "first", "one", "second"]);
        assert_eq!(history(&h, "s1").await.len(), 4);
    }

    #[tokio::test]
    async fn sessions_are_independent() {
        let h = harness(vec![text_pass(&["for a"]), text_pass(&["for b"])]);

        turn(&h, "a", "hello a").await;
        turn(&h, "b", "hello b").await;

        assert_eq!(h.provider.requests()[1].messages.len(), 2);
        assert_eq!(history(&h, "a").await[1].1, "for a");
        assert_eq!(history(&h, "b").await[1].1, "for b");
    }

    #[tokio::test]
    async fn concurrent_turns_on_one_session_serialize() {
        let h = harness(vec![text_pass(&["r1"]), text_pass(&["r2"])]);

        let rx1 = h.agent.clone().run_turn(sid("s1"), "q1");
        let rx2 = h.agent.clone().run_turn(sid("s1"), "q2");
        for mut rx in [rx1, rx2] {
            while rx.recv().await.is_some() {}
        }

        let roles: Vec<_> = history(&h, "s1").await.into_iter().map(|(r, _)| r).collect();
        assert_eq!(roles, [Role::User, Role::Assistant, Role::User, Role::Assistant]);
    }

    #[tokio::test]
    async fn dropped_receiver_still_commits() {
        let h = harness(vec![text_pass(&["<thinking>x</thinking>answer"])]);
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let outcome = h.agent.drive_turn(&sid("s1"), "q", &tx).await;

        assert!(matches!(outcome, TurnOutcome::Completed { .. }));
        assert_eq!(history(&h, "s1").await.len(), 2);
    }

    #[tokio::test]
    async fn run_turn_streams_and_closes() {
        let h = harness(vec![text_pass(&["Hello"])]);
        let mut rx = h.agent.clone().run_turn(sid("s1"), "hi");

        assert_eq!(rx.recv().await, Some(OutputEvent::NarrativeChunk("Hello".into())));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn publishes_domain_events() {
        let h = harness(vec![
            tool_pass(&[], vec![search_call("c1", "x")]),
            text_pass(&["done"]),
        ]);
        let mut events = h.agent.event_bus().subscribe();

        turn(&h, "s1", "q").await;

        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            kinds.push(event.kind());
        }
        assert_eq!(
            kinds,
            [
                "turn_started",
                "pass_completed",
                "tool_executed",
                "pass_completed",
                "turn_completed"
            ]
        );
    }

    #[tokio::test]
    async fn custom_markers() {
        let h = harness_with(vec![text_pass(&["[[why]]because"])], |a| {
            a.with_markers(Markers::new("[[", "]]").unwrap())
        });

        let (_, events) = turn(&h, "s1", "q").await;

        assert_eq!(
            events,
            vec![
                OutputEvent::ReasoningChunk("why".into()),
                OutputEvent::NarrativeChunk("because".into()),
            ]
        );
    }

    #[test]
    fn from_config_requires_api_key_for_hosted_provider() {
        let config = AppConfig::default();
        assert!(AgentLoop::from_config(&config).is_err());
    }

    #[test]
    fn from_config_builds_with_key() {
        let config = AppConfig {
            api_key: Some("sk-test".into()),
            ..AppConfig::default()
        };
        let agent = AgentLoop::from_config(&config).unwrap();
        assert_eq!(agent.provider_name(), "openrouter");
        assert_eq!(agent.model(), config.default_model);
        assert_eq!(agent.max_prompt_messages, 30);
    }

    #[test]
    fn from_config_keyless_local_provider() {
        let config = AppConfig {
            default_provider: "ollama".into(),
            ..AppConfig::default()
        };
        assert!(AgentLoop::from_config(&config).is_ok());
    }

    #[test]
    fn from_config_rejects_bad_markers() {
        let mut config = AppConfig {
            api_key: Some("sk-test".into()),
            ..AppConfig::default()
        };
        config.agent.reasoning_end = config.agent.reasoning_start.clone();
        let err = AgentLoop::from_config(&config).err().unwrap();
        assert!(matches!(err, Error::Config { .. }));
    }
}
