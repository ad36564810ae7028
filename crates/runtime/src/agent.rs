//! A model-backed conversation participant.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::model::{
    Completion, CompletionRequest, Message, ModelClient, Role, TokenUsage, ToolCall, ToolOutcome,
    ToolResult, ToolSpec,
};
use crate::retry::RetryPolicy;
use crate::tools::ToolCatalog;
use crate::transcript::{Degradation, ToolInvocation, Turn};

/// Per-turn tool call budget used when none is configured.
pub const DEFAULT_TOOL_CALL_BUDGET: usize = 20;

/// Counters shared by both agents for the lifetime of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConversationState {
    /// Usage of every model call made so far.
    pub usage: TokenUsage,
    /// Tool invocations executed so far.
    pub tool_calls: usize,
}

/// One side of a role-playing session.
///
/// An agent keeps its own message memory: what it receives is recorded as a
/// user message and what it produces as an assistant message, so both agents
/// see a well-formed conversation regardless of their session role.
pub struct Agent {
    role: Role,
    system: String,
    model: Arc<dyn ModelClient>,
    catalog: Option<ToolCatalog>,
    temperature: f32,
    tool_call_budget: usize,
    retry: RetryPolicy,
    memory: Vec<Message>,
}

impl Agent {
    pub fn new(role: Role, system: impl Into<String>, model: Arc<dyn ModelClient>) -> Self {
        Self {
            role,
            system: system.into(),
            model,
            catalog: None,
            temperature: 0.0,
            tool_call_budget: DEFAULT_TOOL_CALL_BUDGET,
            retry: RetryPolicy::default(),
            memory: Vec::new(),
        }
    }

    /// Attach a tool catalog, making this a tool-enabled agent.
    pub fn with_tools(mut self, catalog: ToolCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_tool_call_budget(mut self, budget: usize) -> Self {
        self.tool_call_budget = budget;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn memory(&self) -> &[Message] {
        &self.memory
    }

    /// Respond to `incoming`, running tool calls until the model answers
    /// without requesting any or the per-turn budget runs out.
    pub async fn respond(&mut self, incoming: &str, state: &mut ConversationState) -> Result<Turn> {
        self.memory.push(Message::user(incoming));

        let tools: Vec<ToolSpec> = self
            .catalog
            .as_ref()
            .map(ToolCatalog::specs)
            .unwrap_or_default();

        let mut turn = Turn::new(self.role, String::new());
        loop {
            let completion = match self.complete(&tools).await {
                Ok(completion) => completion,
                Err(source) if !turn.tool_calls.is_empty() => {
                    return Err(Error::TurnFailed {
                        turn: Box::new(turn),
                        source: Box::new(source),
                    });
                }
                Err(e) => return Err(e),
            };
            turn.usage += completion.usage;
            state.usage += completion.usage;

            let content = completion.content();
            let Some(catalog) = self.catalog.clone() else {
                if completion.message.has_tool_calls() {
                    debug!(role = %self.role, "ignoring tool calls from a tool-less agent");
                }
                return Ok(self.finish(turn, content));
            };

            let calls: Vec<ToolCall> = completion.tool_calls().into_iter().cloned().collect();
            if calls.is_empty() {
                return Ok(self.finish(turn, content));
            }
            self.memory.push(completion.message);

            let mut results = Vec::with_capacity(calls.len());
            for call in &calls {
                if turn.tool_calls.len() >= self.tool_call_budget {
                    warn!(
                        tool = %call.name,
                        budget = self.tool_call_budget,
                        "tool call budget exhausted, rejecting call"
                    );
                    results.push(ToolResult::error(
                        &call.id,
                        format!("tool call budget of {} exhausted", self.tool_call_budget),
                    ));
                    turn.degraded = Some(Degradation::ToolCallBudgetExceeded {
                        budget: self.tool_call_budget,
                    });
                    continue;
                }

                let outcome = invoke(&catalog, call).await;
                state.tool_calls += 1;
                results.push(ToolResult::new(&call.id, outcome.clone()));
                turn.tool_calls.push(ToolInvocation {
                    call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                    arguments: call.input.clone(),
                    outcome,
                });
            }
            self.memory.push(Message::tool_results(results));

            if let Some(degradation) = turn.degraded {
                if content.is_empty() {
                    return Ok(self.finish(turn, degradation.to_string()));
                }
                // Already in memory as part of the tool-requesting message.
                turn.content = content;
                return Ok(turn);
            }
        }
    }

    async fn complete(&self, tools: &[ToolSpec]) -> Result<Completion> {
        let request = CompletionRequest {
            system: Some(&self.system),
            messages: &self.memory,
            tools,
            temperature: self.temperature,
        };
        let completion = self
            .retry
            .execute(|| self.model.complete(request))
            .await?;
        Ok(completion)
    }

    fn finish(&mut self, mut turn: Turn, content: String) -> Turn {
        self.memory.push(Message::assistant(content.clone()));
        turn.content = content;
        turn
    }
}

async fn invoke(catalog: &ToolCatalog, call: &ToolCall) -> ToolOutcome {
    debug!(tool = %call.name, "invoking tool");
    match catalog.invoke(&call.name, call.input.clone()).await {
        Ok(output) => ToolOutcome::success(output),
        Err(e) => {
            debug!(tool = %call.name, error = %e, "tool call failed");
            ToolOutcome::error(e.to_string())
        }
    }
}
