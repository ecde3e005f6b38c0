// ── Chat Engine ──────────────────────────────────────────────────────────
// The tool-calling iteration loop: turns one user message into a
// final assistant reply by repeatedly calling the LLM gateway and executing
// any tool calls it returns. Bounded by `MAX_TOOL_ITERATIONS`; every
// iteration's token/cost accounting is attributed exactly, never estimated.
//
// Streaming is event-driven rather than token-delta: `LlmGatewayClient::complete`
// is a single non-streaming HTTP round trip per iteration (the gateway
// contract consumed here has no `stream` chunking on the wire),
// so there is no `token` partial-text event here — only the iteration/tool/
// thinking/done granularity the gateway response actually supports. A
// caller after true token-delta streaming needs a gateway that emits SSE,
// which is out of scope for this core.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use uuid::Uuid;

use crate::accounting::DailyTokenTracker;
use crate::error::{EngineError, EngineResult};
use crate::llm::fallback::{next_available, normalize_model_name};
use crate::llm::{ChatCompletionResponse, GatewayMessage, GatewayToolCall, LlmGatewayClient};
use crate::repository::Repository;
use crate::tools::ToolRegistry;
use crate::types::{FallbackEntry, Message, Role, Session, ToolCall, ToolDefinition, ToolResult};

/// Cooperative cancellation flag checked between iterations — an
/// `AtomicBool` a caller can set from another task without holding any
/// lock on the chat engine.
#[derive(Default)]
pub struct YieldSignal(AtomicBool);

impl YieldSignal {
    pub fn new() -> Self {
        YieldSignal(AtomicBool::new(false))
    }

    pub fn request_yield(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
pub enum ChatEvent {
    IterationStart { iteration: u32, tool_calls_so_far: u32 },
    Thinking { iteration: u32, text: String },
    IterationEnd { iteration: u32, has_tool_calls: bool, tool_count: usize, tokens_input: i64, tokens_output: i64 },
    ToolCall { iteration: u32, id: String, name: String, arguments: String },
    ToolResult { iteration: u32, id: String, success: bool, duration_ms: u64, output: String },
    Done { content: String, tokens_input: i64, tokens_output: i64, cost: f64, latency_ms: i64, status: &'static str },
    Error { reason: &'static str, message: String },
}

/// Sink for chat events. A CLI or orchestrator supplies an implementation;
/// tests use `CollectingSink`.
pub trait ChatEventSink: Send + Sync {
    fn emit(&self, event: ChatEvent);
}

pub struct NullSink;

impl ChatEventSink for NullSink {
    fn emit(&self, _event: ChatEvent) {}
}

#[derive(Default)]
pub struct CollectingSink(parking_lot::Mutex<Vec<ChatEvent>>);

impl CollectingSink {
    pub fn new() -> Self {
        CollectingSink::default()
    }

    pub fn take(&self) -> Vec<ChatEvent> {
        std::mem::take(&mut self.0.lock())
    }
}

impl ChatEventSink for CollectingSink {
    fn emit(&self, event: ChatEvent) {
        self.0.lock().push(event);
    }
}

#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub enable_tools: bool,
    pub model_override: Option<String>,
    /// `None` means unrestricted (the main agent); `Some` restricts the
    /// tool catalog to the named subset.
    pub capabilities: Option<Vec<String>>,
    pub temperature: f64,
    pub max_tokens: u32,
    pub cancel: Option<Arc<YieldSignal>>,
}

impl Default for ChatOptions {
    fn default() -> Self {
        ChatOptions {
            enable_tools: true,
            model_override: None,
            capabilities: None,
            temperature: 0.7,
            max_tokens: 4096,
            cancel: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatStatus {
    Done,
    Truncated,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub status: ChatStatus,
    pub final_content: String,
    pub iterations: u32,
    pub total_tokens_input: i64,
    pub total_tokens_output: i64,
    pub total_cost: f64,
    pub total_latency_ms: i64,
}

pub struct ChatEngine {
    repo: Arc<dyn Repository>,
    llm: Arc<LlmGatewayClient>,
    tools: Arc<ToolRegistry>,
    tracker: Arc<DailyTokenTracker>,
    fallback_chain: Vec<FallbackEntry>,
    max_tool_iterations: u32,
}

impl ChatEngine {
    pub fn new(
        repo: Arc<dyn Repository>,
        llm: Arc<LlmGatewayClient>,
        tools: Arc<ToolRegistry>,
        tracker: Arc<DailyTokenTracker>,
        config: &crate::config::RuntimeConfig,
    ) -> Self {
        let fallback_chain = config
            .llm_fallback_chain
            .iter()
            .map(|model| FallbackEntry { is_local: model.starts_with("local/"), model: model.clone() })
            .collect();
        ChatEngine { repo, llm, tools, tracker, fallback_chain, max_tool_iterations: config.max_tool_iterations }
    }

    /// Keeps only the most recent `keep_latest` messages for a session.
    /// A cron or subagent session reused across many ticks would otherwise
    /// grow its message table without bound even though each turn only
    /// ever reads the last `context_window` of them. Failure here is
    /// housekeeping, not the turn's result, so it is logged and swallowed.
    fn prune_history(&self, session_id: &str, keep_latest: u32) {
        if let Err(e) = self.repo.prune_messages(session_id, keep_latest) {
            log::warn!("[chat] failed to prune message history for session {session_id}: {e}");
        }
    }

    /// Drives one user-message-to-final-reply turn.
    /// `context_window` is the caller-resolved `RuntimeConfig::context_window_for`
    /// result for this session's type.
    pub async fn run_turn(
        &self,
        session: &Session,
        system_prompt: Option<&str>,
        user_message: &str,
        context_window: u32,
        opts: &ChatOptions,
        sink: &dyn ChatEventSink,
    ) -> EngineResult<ChatOutcome> {
        let user = Message {
            id: Uuid::new_v4().to_string(),
            session_id: session.session_id.clone(),
            role: Role::User,
            content: user_message.to_string(),
            thinking: None,
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            model: None,
            tokens_input: 0,
            tokens_output: 0,
            cost: 0.0,
            latency_ms: 0,
            created_at: Utc::now(),
        };
        self.repo.append_message(&user)?;

        let tool_catalog: Option<Vec<ToolDefinition>> =
            if opts.enable_tools { Some(self.tools.definitions_for(opts.capabilities.as_deref())) } else { None };

        let history = self.repo.list_recent_messages(&session.session_id, context_window)?;
        let mut gateway_messages = Vec::with_capacity(history.len() + 2);
        if let Some(sp) = system_prompt {
            gateway_messages.push(GatewayMessage {
                role: Role::System.as_str().to_string(),
                content: sp.to_string(),
                tool_calls: Vec::new(),
                tool_call_id: None,
            });
        }
        for message in &history {
            gateway_messages.push(GatewayMessage {
                role: message.role.as_str().to_string(),
                content: message.content.clone(),
                tool_calls: message.tool_calls.iter().map(GatewayToolCall::from).collect(),
                tool_call_id: None,
            });
            for result in &message.tool_results {
                gateway_messages.push(GatewayMessage {
                    role: Role::Tool.as_str().to_string(),
                    content: result.output.clone(),
                    tool_calls: Vec::new(),
                    tool_call_id: Some(result.tool_call_id.clone()),
                });
            }
        }

        let mut pending_tool_results: Vec<ToolResult> = Vec::new();
        let mut accumulated_tool_calls: u32 = 0;
        let mut total_tokens_input: i64 = 0;
        let mut total_tokens_output: i64 = 0;
        let mut total_cost: f64 = 0.0;
        let mut total_latency_ms: i64 = 0;

        for iteration in 1..=self.max_tool_iterations {
            sink.emit(ChatEvent::IterationStart { iteration, tool_calls_so_far: accumulated_tool_calls });

            let (response, model_used, latency_ms) =
                match self.complete_with_fallback(&gateway_messages, tool_catalog.as_deref(), opts).await {
                    Ok(ok) => ok,
                    Err(e) => {
                        sink.emit(ChatEvent::Error { reason: e.reason(), message: e.to_string() });
                        return Err(e);
                    }
                };

            total_tokens_input += response.usage.input_tokens;
            total_tokens_output += response.usage.output_tokens;
            total_cost += response.usage.cost;
            total_latency_ms += latency_ms as i64;
            self.tracker.record(&model_used, response.usage.input_tokens, response.usage.output_tokens, response.usage.cost);

            if let Some(thinking) = &response.thinking {
                sink.emit(ChatEvent::Thinking { iteration, text: thinking.clone() });
            }

            let tool_calls: Vec<ToolCall> = response
                .tool_calls
                .iter()
                .map(|t| ToolCall { id: t.id.clone(), name: t.name.clone(), arguments: t.arguments.clone() })
                .collect();
            accumulated_tool_calls += tool_calls.len() as u32;

            let assistant_message = Message {
                id: Uuid::new_v4().to_string(),
                session_id: session.session_id.clone(),
                role: Role::Assistant,
                content: response.content.clone(),
                thinking: response.thinking.clone(),
                tool_calls: tool_calls.clone(),
                tool_results: std::mem::take(&mut pending_tool_results),
                model: Some(model_used.clone()),
                tokens_input: response.usage.input_tokens,
                tokens_output: response.usage.output_tokens,
                cost: response.usage.cost,
                latency_ms: latency_ms as i64,
                created_at: Utc::now(),
            };
            self.repo.append_message(&assistant_message)?;
            self.prune_history(&session.session_id, context_window);

            sink.emit(ChatEvent::IterationEnd {
                iteration,
                has_tool_calls: !tool_calls.is_empty(),
                tool_count: tool_calls.len(),
                tokens_input: response.usage.input_tokens,
                tokens_output: response.usage.output_tokens,
            });

            gateway_messages.push(GatewayMessage {
                role: Role::Assistant.as_str().to_string(),
                content: response.content.clone(),
                tool_calls: response.tool_calls.clone(),
                tool_call_id: None,
            });

            if let Some(cancel) = &opts.cancel {
                if cancel.is_requested() {
                    sink.emit(ChatEvent::Error { reason: "cancelled", message: "chat turn cancelled".to_string() });
                    return Ok(ChatOutcome {
                        status: ChatStatus::Cancelled,
                        final_content: response.content,
                        iterations: iteration,
                        total_tokens_input,
                        total_tokens_output,
                        total_cost,
                        total_latency_ms,
                    });
                }
            }

            if tool_calls.is_empty() {
                sink.emit(ChatEvent::Done {
                    content: response.content.clone(),
                    tokens_input: total_tokens_input,
                    tokens_output: total_tokens_output,
                    cost: total_cost,
                    latency_ms: total_latency_ms,
                    status: "done",
                });
                return Ok(ChatOutcome {
                    status: ChatStatus::Done,
                    final_content: response.content,
                    iterations: iteration,
                    total_tokens_input,
                    total_tokens_output,
                    total_cost,
                    total_latency_ms,
                });
            }

            for call in &tool_calls {
                sink.emit(ChatEvent::ToolCall {
                    iteration,
                    id: call.id.clone(),
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                });
                let arguments: serde_json::Value = serde_json::from_str(&call.arguments).unwrap_or(serde_json::Value::Null);
                let started = Instant::now();
                let (success, output) = match self.tools.execute(&call.name, arguments).await {
                    Ok(outcome) => (true, outcome.output.to_string()),
                    Err(e) => (false, e.to_string()),
                };
                let duration_ms = started.elapsed().as_millis() as u64;
                sink.emit(ChatEvent::ToolResult { iteration, id: call.id.clone(), success, duration_ms, output: output.clone() });

                pending_tool_results.push(ToolResult { tool_call_id: call.id.clone(), success, output: output.clone() });
                gateway_messages.push(GatewayMessage {
                    role: Role::Tool.as_str().to_string(),
                    content: output,
                    tool_calls: Vec::new(),
                    tool_call_id: Some(call.id.clone()),
                });
            }
        }

        // Iteration cap hit: persist a final message so the pending tool
        // results from the last executed iteration are not lost, and report
        // truncation to the caller.
        let truncated_content =
            format!("Reached the maximum of {} tool iterations without a final answer.", self.max_tool_iterations);
        let final_message = Message {
            id: Uuid::new_v4().to_string(),
            session_id: session.session_id.clone(),
            role: Role::Assistant,
            content: truncated_content.clone(),
            thinking: None,
            tool_calls: Vec::new(),
            tool_results: std::mem::take(&mut pending_tool_results),
            model: None,
            tokens_input: 0,
            tokens_output: 0,
            cost: 0.0,
            latency_ms: 0,
            created_at: Utc::now(),
        };
        self.repo.append_message(&final_message)?;
        self.prune_history(&session.session_id, context_window);

        sink.emit(ChatEvent::Done {
            content: truncated_content.clone(),
            tokens_input: total_tokens_input,
            tokens_output: total_tokens_output,
            cost: total_cost,
            latency_ms: total_latency_ms,
            status: "truncated",
        });
        Ok(ChatOutcome {
            status: ChatStatus::Truncated,
            final_content: truncated_content,
            iterations: self.max_tool_iterations,
            total_tokens_input,
            total_tokens_output,
            total_cost,
            total_latency_ms,
        })
    }

    /// Tries each fallback chain entry in order, skipping ones already
    /// tried this call and ones whose circuit breaker is open. Returns the
    /// response plus the (normalized) model name that served it.
    async fn complete_with_fallback(
        &self,
        messages: &[GatewayMessage],
        tools: Option<&[ToolDefinition]>,
        opts: &ChatOptions,
    ) -> EngineResult<(ChatCompletionResponse, String, u64)> {
        let chain: Vec<FallbackEntry> = match &opts.model_override {
            Some(model) => vec![FallbackEntry { is_local: model.starts_with("local/"), model: model.clone() }],
            None => self.fallback_chain.clone(),
        };

        let mut tried: Vec<String> = Vec::new();
        let mut last_err: Option<EngineError> = None;

        loop {
            let next = next_available(&chain, &tried, |model| self.llm.breaker(model).check().is_err());
            let Some(entry) = next else { break };
            tried.push(entry.model.clone());
            let model = normalize_model_name(&entry.model).to_string();

            match self.llm.complete(&model, messages, tools, opts.temperature, opts.max_tokens).await {
                Ok((response, latency_ms)) => return Ok((response, model, latency_ms)),
                Err(e) => {
                    last_err = Some(e);
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| EngineError::Llm("all_llm_unavailable".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::sqlite::SqliteRepository;
    use crate::transport::Transport;
    use crate::types::{SessionMetadata, SessionStatus, SessionType};

    fn engine() -> (ChatEngine, Arc<dyn Repository>) {
        let repo: Arc<dyn Repository> = Arc::new(SqliteRepository::open_in_memory().unwrap());
        let config = crate::config::test_defaults();
        let transport = Arc::new(Transport::new(&config).unwrap());
        let llm = Arc::new(LlmGatewayClient::new(transport, config.llm_gateway_url.clone(), config.llm_gateway_token.clone()));
        let tools = Arc::new(ToolRegistry::new());
        let tracker = Arc::new(DailyTokenTracker::new());
        (ChatEngine::new(repo.clone(), llm, tools, tracker, &config), repo)
    }

    fn session(repo: &Arc<dyn Repository>) -> Session {
        let now = Utc::now();
        let session = Session {
            session_id: Uuid::new_v4().to_string(),
            agent_id: "main".to_string(),
            session_type: SessionType::Interactive,
            status: SessionStatus::Active,
            created_at: now,
            updated_at: now,
            ended_at: None,
            message_count: 0,
            total_tokens: 0,
            total_cost: 0.0,
            metadata: SessionMetadata::default(),
        };
        repo.create_session(&session).unwrap();
        session
    }

    #[test]
    fn fallback_chain_entries_mark_local_models_by_prefix() {
        let (engine, _repo) = engine();
        assert_eq!(engine.fallback_chain.len(), 1);
        assert!(!engine.fallback_chain[0].is_local);
        assert_eq!(engine.fallback_chain[0].model, "a");
    }

    #[tokio::test]
    async fn complete_with_fallback_fails_fast_when_every_breaker_is_open() {
        let (engine, _repo) = engine();
        let threshold = crate::config::test_defaults().cb_threshold;
        for entry in &engine.fallback_chain {
            let breaker = engine.llm.breaker(normalize_model_name(&entry.model));
            for _ in 0..threshold {
                breaker.record_failure();
            }
        }
        let opts = ChatOptions::default();
        let result = engine.complete_with_fallback(&[], None, &opts).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn run_turn_persists_user_message_even_when_llm_is_unreachable() {
        let (engine, repo) = engine();
        let sess = session(&repo);
        let opts = ChatOptions::default();
        let sink = CollectingSink::new();
        let result = engine.run_turn(&sess, Some("you are a test agent"), "hello", 40, &opts, &sink).await;
        assert!(result.is_err());
        let history = repo.list_recent_messages(&sess.session_id, 10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::User);
    }

    #[test]
    fn prune_history_trims_a_session_down_to_keep_latest() {
        let (engine, repo) = engine();
        let sess = session(&repo);
        for n in 0..6 {
            let message = Message {
                id: format!("m{n}"),
                session_id: sess.session_id.clone(),
                role: Role::User,
                content: format!("message {n}"),
                thinking: None,
                tool_calls: vec![],
                tool_results: vec![],
                model: None,
                tokens_input: 0,
                tokens_output: 0,
                cost: 0.0,
                latency_ms: 0,
                created_at: Utc::now() + chrono::Duration::milliseconds(n),
            };
            repo.append_message(&message).unwrap();
        }
        engine.prune_history(&sess.session_id, 3);
        let remaining = repo.list_recent_messages(&sess.session_id, 10).unwrap();
        assert_eq!(remaining.len(), 3);
        assert_eq!(remaining[0].content, "message 3");
    }
}
