//! The agent run loop: stream the model, dispatch tool calls, repeat
//! until a tool-free response or the iteration cap.
//!
//! All activity surfaces as [`ExecutionEvent`]s on an mpsc channel whose
//! producer closes when the run ends. Tool-side failures are fed back to
//! the model as observations and never abort the loop; model-side
//! failures end the run with an `error` event.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;

use maestro_context::{ContextConfig, ContextManager};
use maestro_dag::DagExecutor;
use maestro_domain::error::Error;
use maestro_domain::event::ExecutionEvent;
use maestro_domain::stream::{StreamChunk, Usage};
use maestro_domain::tool::{Attachment, Message, ToolCall, ToolContext};
use maestro_memory::LongTermMemory;
use maestro_providers::{ChatRequest, LlmProvider};
use maestro_skills::SkillRegistry;

use crate::builtins::{self, CreateTaskArgs, PlanArgs, RecallArgs, RememberArgs};
use crate::cancel::CancelToken;
use crate::history::HistoryRepo;

/// How many top-ranked memories augment the system prompt.
const MEMORY_PROMPT_LIMIT: usize = 3;
/// Default recall size for the `memory_recall` built-in.
const RECALL_DEFAULT_LIMIT: usize = 5;

const STEP_LIMIT_NOTICE: &str =
    "I reached my step limit before completing the request. Here is where things \
     stand so far; please send a follow-up message and I will continue.";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Configuration and input
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Fixed guidance prepended to every run's system prompt.
    pub system_prompt: String,
    /// Maximum model turns per run.
    pub max_iterations: usize,
    /// Hard deadline per non-built-in tool invocation.
    pub tool_timeout: Duration,
    pub temperature: Option<f32>,
    /// Model override passed to the provider. `None` uses its default.
    pub model: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: "You are a capable assistant. Use the available tools when \
                            they help, and answer directly when they do not."
                .into(),
            max_iterations: 10,
            tool_timeout: Duration::from_secs(60),
            temperature: Some(0.2),
            model: None,
        }
    }
}

/// One user request plus its conversational state.
pub struct RunInput {
    pub input: String,
    pub session_id: String,
    pub user_id: Option<String>,
    /// Prior turns. When empty and a history repo is attached, the repo
    /// is consulted instead.
    pub history: Vec<Message>,
    pub attachments: Vec<Attachment>,
    pub cancel: CancelToken,
}

impl RunInput {
    pub fn new(input: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            session_id: session_id.into(),
            user_id: None,
            history: Vec::new(),
            attachments: Vec::new(),
            cancel: CancelToken::new(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Agent {
    provider: Arc<dyn LlmProvider>,
    registry: Arc<SkillRegistry>,
    context: ContextManager,
    long_term: Option<Arc<LongTermMemory>>,
    dag: Option<Arc<DagExecutor>>,
    history: Option<Arc<dyn HistoryRepo>>,
    config: AgentConfig,
}

impl Agent {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        registry: Arc<SkillRegistry>,
        context_config: ContextConfig,
        config: AgentConfig,
    ) -> Self {
        Self {
            provider,
            registry,
            context: ContextManager::new(context_config),
            long_term: None,
            dag: None,
            history: None,
            config,
        }
    }

    pub fn with_long_term(mut self, memory: Arc<LongTermMemory>) -> Self {
        self.long_term = Some(memory);
        self
    }

    pub fn with_dag(mut self, dag: Arc<DagExecutor>) -> Self {
        self.dag = Some(dag);
        self
    }

    pub fn with_history(mut self, history: Arc<dyn HistoryRepo>) -> Self {
        self.history = Some(history);
        self
    }

    /// Start one run. Events arrive lazily on the returned channel; the
    /// producer closes it when the run terminates.
    pub fn run(self: Arc<Self>, input: RunInput) -> mpsc::Receiver<ExecutionEvent> {
        let (tx, rx) = mpsc::channel::<ExecutionEvent>(64);
        tokio::spawn(async move {
            self.run_inner(input, tx).await;
        });
        rx
    }

    // ── Setup ──────────────────────────────────────────────────────

    /// Fixed guidance plus up to three top-ranked memories for the input.
    async fn compose_system_prompt(&self, input: &str) -> String {
        let mut prompt = self.config.system_prompt.clone();
        let Some(memory) = &self.long_term else { return prompt };

        match memory.search(input, MEMORY_PROMPT_LIMIT).await {
            Ok(entries) if !entries.is_empty() => {
                prompt.push_str("\n\nRelevant memories:");
                for entry in entries {
                    prompt.push_str(&format!("\n- {}", entry.content));
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "memory retrieval for system prompt failed");
            }
        }
        prompt
    }

    async fn load_history(&self, input: &RunInput) -> Vec<Message> {
        if !input.history.is_empty() {
            return input.history.clone();
        }
        let Some(repo) = &self.history else { return Vec::new() };
        match repo.get_messages(&input.session_id).await {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!(error = %e, "history load failed, starting fresh");
                Vec::new()
            }
        }
    }

    // ── The loop ───────────────────────────────────────────────────

    async fn run_inner(&self, input: RunInput, tx: mpsc::Sender<ExecutionEvent>) {
        let system = Message::system(self.compose_system_prompt(&input.input).await);
        let history = self.load_history(&input).await;
        let current = vec![
            Message::user(input.input.clone()).with_attachments(input.attachments.clone())
        ];

        let mut messages = self
            .context
            .fit(&system, &history, &current, Some(self.provider.as_ref()))
            .await;

        let mut tools = builtins::builtin_tools(self.long_term.is_some(), self.dag.is_some());
        tools.extend(self.registry.tool_descriptors().await);

        let ctx = ToolContext {
            session_id: input.session_id.clone(),
            user_id: input.user_id.clone(),
        };

        let mut total_usage = Usage::default();

        for iteration in 0..self.config.max_iterations {
            if input.cancel.is_cancelled() {
                tracing::debug!(session = %input.session_id, "run cancelled before model call");
                return;
            }
            tracing::debug!(session = %input.session_id, iteration, "agent iteration");

            let req = ChatRequest {
                messages: messages.clone(),
                tools: tools.clone(),
                temperature: self.config.temperature,
                max_tokens: None,
                model: self.config.model.clone(),
            };

            let mut stream = match self.provider.chat_stream(&req).await {
                Ok(s) => s,
                Err(e) => {
                    let _ = tx.send(ExecutionEvent::Error { message: e.to_string() }).await;
                    return;
                }
            };

            // ── Consume the stream ─────────────────────────────────
            let mut text_buf = String::new();
            let mut pending_calls: Vec<ToolCall> = Vec::new();
            // call_id -> (tool_name, args_buffer) for calls still streaming.
            let mut open_calls: Vec<(String, String, String)> = Vec::new();

            while let Some(item) = stream.next().await {
                if input.cancel.is_cancelled() {
                    tracing::debug!(session = %input.session_id, "run cancelled mid-stream");
                    return;
                }

                let chunk = match item {
                    Ok(c) => c,
                    Err(e) => {
                        let _ =
                            tx.send(ExecutionEvent::Error { message: e.to_string() }).await;
                        return;
                    }
                };

                match chunk {
                    StreamChunk::Content { delta } => {
                        text_buf.push_str(&delta);
                        let _ = tx.send(ExecutionEvent::Content { text: delta }).await;
                    }
                    StreamChunk::ToolCallStarted { call_id, tool_name } => {
                        open_calls.push((call_id, tool_name, String::new()));
                    }
                    StreamChunk::ToolCallDelta { call_id, delta } => {
                        match open_calls.iter_mut().find(|(id, _, _)| *id == call_id) {
                            Some((_, _, args)) => args.push_str(&delta),
                            // Providers that never announce a start still
                            // key deltas by a synthetic id.
                            None => open_calls.push((call_id, String::new(), delta)),
                        }
                    }
                    StreamChunk::ToolCallFinished { call_id, tool_name, arguments } => {
                        open_calls.retain(|(id, _, _)| *id != call_id);
                        pending_calls.push(ToolCall { id: call_id, name: tool_name, arguments });
                    }
                    StreamChunk::Done { usage, .. } => {
                        if let Some(u) = usage {
                            total_usage.add(&u);
                        }
                    }
                    StreamChunk::Error { message } => {
                        let _ = tx.send(ExecutionEvent::Error { message }).await;
                        return;
                    }
                }
            }

            // Calls that streamed start/deltas but no terminal marker.
            for (call_id, tool_name, arguments) in open_calls.drain(..) {
                pending_calls.push(ToolCall { id: call_id, name: tool_name, arguments });
            }

            messages.push(Message::assistant_with_calls(text_buf.clone(), pending_calls.clone()));

            // ── Tool-free response: the answer ─────────────────────
            if pending_calls.is_empty() {
                let usage = (total_usage.total_tokens > 0).then(|| total_usage.clone());
                self.persist_turn(&input, &text_buf).await;
                let _ = tx.send(ExecutionEvent::Answer { text: text_buf, usage }).await;
                return;
            }

            // ── Dispatch each call, in model order ─────────────────
            for call in &pending_calls {
                if input.cancel.is_cancelled() {
                    tracing::debug!(session = %input.session_id, "run cancelled during tool dispatch");
                    return;
                }
                let reply = self.dispatch_call(call, &ctx, &tx).await;
                messages.push(Message::tool_reply(&call.id, reply));
            }
        }

        let _ = tx
            .send(ExecutionEvent::Answer {
                text: STEP_LIMIT_NOTICE.into(),
                usage: (total_usage.total_tokens > 0).then_some(total_usage),
            })
            .await;
    }

    /// Persist the exchange once the run has produced its final answer.
    /// Cancelled runs never reach this point, so no partial state lands.
    async fn persist_turn(&self, input: &RunInput, answer: &str) {
        let Some(repo) = &self.history else { return };
        let user = Message::user(input.input.clone()).with_attachments(input.attachments.clone());
        if let Err(e) = repo.save_message(&input.session_id, user).await {
            tracing::warn!(error = %e, "failed to persist user message");
            return;
        }
        if let Err(e) = repo.save_message(&input.session_id, Message::assistant(answer)).await {
            tracing::warn!(error = %e, "failed to persist assistant message");
        }
    }

    // ── Tool dispatch ──────────────────────────────────────────────

    /// Handle one tool call, emitting events and returning the tool-reply
    /// text appended to the conversation. Never fails the run.
    async fn dispatch_call(
        &self,
        call: &ToolCall,
        ctx: &ToolContext,
        tx: &mpsc::Sender<ExecutionEvent>,
    ) -> String {
        match call.name.as_str() {
            builtins::PLAN_TASK => self.handle_plan(call, tx).await,
            builtins::MEMORY_REMEMBER if self.long_term.is_some() => {
                self.handle_remember(call, ctx, tx).await
            }
            builtins::MEMORY_RECALL if self.long_term.is_some() => {
                self.handle_recall(call, tx).await
            }
            builtins::DAG_CREATE_TASK if self.dag.is_some() => {
                self.handle_create_task(call, ctx, tx).await
            }
            builtins::DAG_GET_STATUS if self.dag.is_some() => {
                self.handle_dag_status(ctx, tx).await
            }
            builtins::DAG_EXECUTE if self.dag.is_some() => self.handle_dag_execute(ctx, tx).await,
            _ => self.handle_external(call, ctx, tx).await,
        }
    }

    async fn handle_plan(&self, call: &ToolCall, tx: &mpsc::Sender<ExecutionEvent>) -> String {
        let args: PlanArgs = match parse_args(call) {
            Ok(a) => a,
            Err(reply) => return self.observe_error(tx, reply).await,
        };

        if !args.thought.is_empty() {
            let _ = tx.send(ExecutionEvent::Thought { text: args.thought.clone() }).await;
        }
        let _ = tx.send(ExecutionEvent::Plan { steps: args.steps.clone() }).await;

        let steps_json =
            serde_json::to_string(&args.steps).unwrap_or_else(|_| "[]".into());
        format!(
            "Plan acknowledged. Steps: {steps_json}. Proceed with the plan, starting \
             at the first step."
        )
    }

    async fn handle_remember(
        &self,
        call: &ToolCall,
        ctx: &ToolContext,
        tx: &mpsc::Sender<ExecutionEvent>,
    ) -> String {
        let Some(memory) = &self.long_term else {
            return self.observe_error(tx, "Error: long-term memory is not configured".into()).await;
        };
        let args: RememberArgs = match parse_args(call) {
            Ok(a) => a,
            Err(reply) => return self.observe_error(tx, reply).await,
        };

        let metadata = serde_json::json!({ "tags": args.tag_list() });
        match memory.remember(&args.content, Some(metadata), Some(&ctx.session_id)).await {
            Ok(id) => {
                let text = format!("Memory saved (id: {id})");
                let _ = tx.send(ExecutionEvent::observation(text.clone())).await;
                text
            }
            Err(e) => self.observe_error(tx, format!("Error: {e}")).await,
        }
    }

    async fn handle_recall(&self, call: &ToolCall, tx: &mpsc::Sender<ExecutionEvent>) -> String {
        let Some(memory) = &self.long_term else {
            return self.observe_error(tx, "Error: long-term memory is not configured".into()).await;
        };
        let args: RecallArgs = match parse_args(call) {
            Ok(a) => a,
            Err(reply) => return self.observe_error(tx, reply).await,
        };

        match memory.search(&args.query, args.limit.unwrap_or(RECALL_DEFAULT_LIMIT)).await {
            Ok(entries) => {
                let text = if entries.is_empty() {
                    "No relevant memories found.".to_string()
                } else {
                    entries
                        .iter()
                        .map(|e| format!("- {}", e.content))
                        .collect::<Vec<_>>()
                        .join("\n")
                };
                let _ = tx.send(ExecutionEvent::observation(text.clone())).await;
                text
            }
            Err(e) => self.observe_error(tx, format!("Error: {e}")).await,
        }
    }

    async fn handle_create_task(
        &self,
        call: &ToolCall,
        ctx: &ToolContext,
        tx: &mpsc::Sender<ExecutionEvent>,
    ) -> String {
        let Some(dag) = &self.dag else {
            return self.observe_error(tx, "Error: task graph is not enabled".into()).await;
        };
        let args: CreateTaskArgs = match parse_args(call) {
            Ok(a) => a,
            Err(reply) => return self.observe_error(tx, reply).await,
        };

        match dag.repo().create_task(&ctx.session_id, &args.description, args.dependencies).await {
            Ok(task) => {
                let _ = tx
                    .send(ExecutionEvent::TaskCreated {
                        task_id: task.id.clone(),
                        description: task.description.clone(),
                    })
                    .await;
                format!("Task created (id: {})", task.id)
            }
            Err(e) => self.observe_error(tx, format!("Error: {e}")).await,
        }
    }

    async fn handle_dag_status(
        &self,
        ctx: &ToolContext,
        tx: &mpsc::Sender<ExecutionEvent>,
    ) -> String {
        let Some(dag) = &self.dag else {
            return self.observe_error(tx, "Error: task graph is not enabled".into()).await;
        };
        match dag.repo().get_dag(&ctx.session_id).await {
            Ok(view) => {
                let text = serde_json::to_string(&view)
                    .unwrap_or_else(|e| format!("Error: {e}"));
                let _ = tx.send(ExecutionEvent::observation(text.clone())).await;
                text
            }
            Err(e) => self.observe_error(tx, format!("Error: {e}")).await,
        }
    }

    async fn handle_dag_execute(
        &self,
        ctx: &ToolContext,
        tx: &mpsc::Sender<ExecutionEvent>,
    ) -> String {
        let Some(dag) = &self.dag else {
            return self.observe_error(tx, "Error: task graph is not enabled".into()).await;
        };
        let mut events = dag.clone().execute(&ctx.session_id);
        let mut completed = 0usize;
        let mut failed = 0usize;

        while let Some(event) = events.recv().await {
            match &event {
                ExecutionEvent::TaskCompleted { .. } => completed += 1,
                ExecutionEvent::TaskFailed { .. } => failed += 1,
                _ => {}
            }
            let _ = tx.send(event).await;
        }

        format!("DAG execution finished: {completed} completed, {failed} failed.")
    }

    /// Everything that is not a built-in goes through the registry with a
    /// hard per-call timeout.
    async fn handle_external(
        &self,
        call: &ToolCall,
        ctx: &ToolContext,
        tx: &mpsc::Sender<ExecutionEvent>,
    ) -> String {
        let params = call.parsed_arguments().unwrap_or_else(|e| {
            tracing::warn!(tool = %call.name, error = %e, "unparseable tool arguments, using {{}}");
            Value::Object(Default::default())
        });

        let _ = tx
            .send(ExecutionEvent::Action { tool: call.name.clone(), input: params.clone() })
            .await;

        let outcome = tokio::time::timeout(
            self.config.tool_timeout,
            self.registry.execute_action(&call.name, params, ctx),
        )
        .await;

        match outcome {
            Ok(Ok(value)) => {
                let text = stringify_tool_result(value);
                let _ = tx.send(ExecutionEvent::observation(text.clone())).await;
                text
            }
            Ok(Err(e)) => self.observe_error(tx, format!("Error: {e}")).await,
            Err(_) => {
                let e = Error::ToolTimeout {
                    tool: call.name.clone(),
                    seconds: self.config.tool_timeout.as_secs(),
                };
                self.observe_error(tx, format!("Error: {e}")).await
            }
        }
    }

    /// Emit an error observation and hand the same text back as the reply.
    async fn observe_error(&self, tx: &mpsc::Sender<ExecutionEvent>, text: String) -> String {
        let _ = tx.send(ExecutionEvent::observation_error(text.clone())).await;
        text
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parse a call's arguments into the expected shape; the error branch
/// carries the reply text fed back to the model.
fn parse_args<T: serde::de::DeserializeOwned>(call: &ToolCall) -> Result<T, String> {
    let value = call
        .parsed_arguments()
        .map_err(|e| format!("Error: invalid arguments for {}: {e}", call.name))?;
    serde_json::from_value(value)
        .map_err(|e| format!("Error: invalid arguments for {}: {e}", call.name))
}

/// Strings pass through; any other result is JSON-stringified.
fn stringify_tool_result(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}
