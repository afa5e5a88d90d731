//! AgentSession / StreamingSession — drives one agent's turn: prepares the
//! chat request, consumes the streaming response, demultiplexes inline
//! markers, and folds the result back into conversation history.
//!
//! Grounded in `async_streaming_agent.py`'s `AsyncStreamingAgent.stream_turn`:
//! on a transport error the user message that triggered the turn is popped
//! back off history so a retried turn replays cleanly, and a `STATUS`
//! write reports `"{tokens} tokens | {elapsed:.1}s | {tok_per_sec:.1} tok/s"`
//! once the stream reaches `[DONE]`.

use crate::marker::{MarkerEvent, MarkerParser};
use crate::multiplexer::{OutputKind, OutputMultiplexer};
use crate::operations::{contains_plan, extract_operations, ExtractedOperations};
use crate::registry::AgentRegistry;
use futures::StreamExt;
use orc_core::{AgentId, ChatMessage};
use orc_llm::{ChatRequest, LlmClient};
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Per-agent conversation state and the streaming endpoint it talks to.
/// The first entry of `history` is always the system prompt.
pub struct AgentSession {
    pub agent_id: AgentId,
    pub client: Arc<dyn LlmClient>,
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    history: Mutex<Vec<ChatMessage>>,
    /// Serializes file-tool calls the orchestrator dispatches on behalf of
    /// operation blocks parsed from this agent's turns, so two
    /// `[FILE_WRITE]`s from one turn never interleave.
    pub file_mutex: Mutex<()>,
}

impl AgentSession {
    pub fn new(
        agent_id: AgentId,
        client: Arc<dyn LlmClient>,
        model: impl Into<String>,
        system_prompt: impl Into<String>,
        temperature: Option<f32>,
        max_tokens: Option<u32>,
    ) -> Self {
        Self {
            agent_id,
            client,
            model: model.into(),
            temperature,
            max_tokens,
            history: Mutex::new(vec![ChatMessage::system(system_prompt)]),
            file_mutex: Mutex::new(()),
        }
    }

    pub async fn history_snapshot(&self) -> Vec<ChatMessage> {
        self.history.lock().await.clone()
    }
}

/// What one turn produced.
#[derive(Debug)]
pub enum TurnOutcome {
    Completed {
        assistant_text: String,
        operations: ExtractedOperations,
        contains_plan: bool,
        token_count: usize,
        elapsed_secs: f64,
    },
    /// Transport failed; the triggering user message was rolled back out
    /// of history so a resend starts clean.
    TransportError(String),
}

/// Run one full turn: push the user message, stream the response, drive
/// the inline marker parser against it, and fold the assistant reply back
/// into history on success.
pub async fn run_turn<W: Write + Send>(
    session: &AgentSession,
    registry: &AgentRegistry,
    mux: &OutputMultiplexer<W>,
    user_message: impl Into<String>,
    cancel: Option<CancellationToken>,
) -> TurnOutcome {
    let user_message = user_message.into();
    {
        let mut history = session.history.lock().await;
        history.push(ChatMessage::user(user_message));
    }

    let messages: Vec<orc_llm::ChatMessage> = {
        let history = session.history.lock().await;
        history.iter().cloned().map(Into::into).collect()
    };
    let request = ChatRequest {
        model: session.model.clone(),
        messages,
        temperature: session.temperature,
        max_tokens: session.max_tokens,
        stream: true,
    };

    let mut stream = match session.client.complete_stream(request, cancel.clone()).await {
        Ok(stream) => stream,
        Err(e) => return rollback_and_report(session, mux, e.to_string()).await,
    };

    let mut parser = MarkerParser::new();
    let mut token_count = 0usize;
    let started = Instant::now();

    loop {
        match stream.next().await {
            Some(Ok(orc_llm::StreamDelta::Content(text))) => {
                token_count += 1;
                for event in parser.feed(&text) {
                    emit(mux, registry, &session.agent_id, event);
                }
            }
            Some(Ok(orc_llm::StreamDelta::Done)) => break,
            Some(Err(e)) => return rollback_and_report(session, mux, e.to_string()).await,
            None => break,
        }
    }
    for event in parser.finish() {
        emit(mux, registry, &session.agent_id, event);
    }

    let assistant_text = parser.full_text().to_string();
    {
        let mut history = session.history.lock().await;
        history.push(ChatMessage::assistant(assistant_text.clone()));
    }

    let elapsed_secs = started.elapsed().as_secs_f64();
    let tok_per_sec = if elapsed_secs > 0.0 { token_count as f64 / elapsed_secs } else { 0.0 };
    mux.write_status(
        &session.agent_id,
        "stream_complete",
        &format!("{token_count} tokens | {elapsed_secs:.1}s | {tok_per_sec:.1} tok/s"),
    );

    TurnOutcome::Completed {
        operations: extract_operations(&assistant_text),
        contains_plan: contains_plan(&assistant_text),
        assistant_text,
        token_count,
        elapsed_secs,
    }
}

async fn rollback_and_report<W: Write + Send>(
    session: &AgentSession,
    mux: &OutputMultiplexer<W>,
    error: String,
) -> TurnOutcome {
    {
        let mut history = session.history.lock().await;
        history.pop();
    }
    mux.write(&session.agent_id, &error, OutputKind::Error);
    TurnOutcome::TransportError(error)
}

fn emit<W: Write + Send>(
    mux: &OutputMultiplexer<W>,
    registry: &AgentRegistry,
    agent_id: &AgentId,
    event: MarkerEvent,
) {
    match event {
        MarkerEvent::Normal(text) => mux.write(agent_id, &text, OutputKind::Normal),
        MarkerEvent::Thinking(text) => mux.write(agent_id, &text, OutputKind::Thinking),
        MarkerEvent::Summary(text) => {
            let _ = registry.add_summary(agent_id, text.clone());
            mux.write_summary(agent_id, &text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multiplexer::OutputMultiplexer;
    use async_trait::async_trait;
    use orc_core::AgentRole;
    use orc_llm::{ChatRequest as Req, LlmError, LlmResult, LlmStream, StreamDelta};
    use std::pin::Pin;

    struct ScriptedClient {
        events: std::sync::Mutex<Vec<LlmResult<StreamDelta>>>,
    }

    impl ScriptedClient {
        fn new(events: Vec<LlmResult<StreamDelta>>) -> Self {
            Self { events: std::sync::Mutex::new(events) }
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedClient {
        fn provider_name(&self) -> &str {
            "scripted"
        }

        async fn complete_stream(
            &self,
            _request: Req,
            _cancel: Option<CancellationToken>,
        ) -> LlmResult<LlmStream> {
            let events = std::mem::take(&mut *self.events.lock().unwrap());
            Ok(Box::pin(futures::stream::iter(events)) as Pin<Box<_>>)
        }
    }

    fn registry_with_main() -> (AgentRegistry, AgentId) {
        let registry = AgentRegistry::new();
        let id = registry.register(AgentRole::Main, "m", "p", None, None, true).unwrap();
        (registry, id)
    }

    #[tokio::test]
    async fn completed_turn_appends_history_and_extracts_markers() {
        let (registry, id) = registry_with_main();
        let client: Arc<dyn LlmClient> = Arc::new(ScriptedClient::new(vec![
            Ok(StreamDelta::Content("Hello [THINKING]plan it[/THINKING]world".into())),
            Ok(StreamDelta::Done),
        ]));
        let session = AgentSession::new(id.clone(), client, "test-model", "sys", None, None);
        let mux = OutputMultiplexer::with_writer(Vec::new());

        let outcome = run_turn(&session, &registry, &mux, "hi", None).await;
        match outcome {
            TurnOutcome::Completed { assistant_text, token_count, .. } => {
                assert_eq!(assistant_text, "Hello [THINKING]plan it[/THINKING]world");
                assert_eq!(token_count, 2);
            }
            other => panic!("expected completion, got {other:?}"),
        }

        let history = session.history_snapshot().await;
        // system, user, assistant
        assert_eq!(history.len(), 3);
    }

    #[tokio::test]
    async fn transport_error_rolls_back_the_triggering_user_message() {
        let (registry, id) = registry_with_main();
        let client: Arc<dyn LlmClient> =
            Arc::new(ScriptedClient::new(vec![Err(LlmError::StreamDisconnected("boom".into()))]));
        let session = AgentSession::new(id.clone(), client, "test-model", "sys", None, None);
        let mux = OutputMultiplexer::with_writer(Vec::new());

        let before = session.history_snapshot().await.len();
        let outcome = run_turn(&session, &registry, &mux, "hi", None).await;
        assert!(matches!(outcome, TurnOutcome::TransportError(_)));
        let after = session.history_snapshot().await.len();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn summary_marker_is_forwarded_to_registry() {
        let (registry, id) = registry_with_main();
        let client: Arc<dyn LlmClient> = Arc::new(ScriptedClient::new(vec![
            Ok(StreamDelta::Content("[SUMMARY]did the work[/SUMMARY]".into())),
            Ok(StreamDelta::Done),
        ]));
        let session = AgentSession::new(id.clone(), client, "test-model", "sys", None, None);
        let mux = OutputMultiplexer::with_writer(Vec::new());

        run_turn(&session, &registry, &mux, "hi", None).await;
        let descriptor = registry.get(&id).unwrap();
        assert_eq!(descriptor.summaries, vec!["did the work"]);
    }
}
