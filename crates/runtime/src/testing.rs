//! In-process doubles for the model and tool-provider boundaries.
//!
//! Used by this crate's tests and available to embedders that want to
//! exercise a session without network access or child processes.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::model::{
    Completion, CompletionRequest, Message, ModelClient, ModelError, Part, Role, TokenUsage,
    ToolCall, ToolSpec,
};
use crate::tools::{ToolError, ToolProvider};

/// Usage reported by scripted replies unless one is given explicitly.
pub const SCRIPTED_USAGE: TokenUsage = TokenUsage {
    prompt_tokens: 10,
    completion_tokens: 5,
    total_tokens: 15,
};

/// What a [`ScriptedModel`] was asked.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub system: Option<String>,
    pub messages: Vec<Message>,
    /// Names of the tools offered.
    pub tools: Vec<String>,
    pub temperature: f32,
}

/// A model client that replays queued completions in order.
///
/// When the queue is empty it repeats the fallback reply if one was set,
/// otherwise it fails with [`ModelError::Exhausted`].
#[derive(Default)]
pub struct ScriptedModel {
    script: Mutex<VecDeque<Result<Completion, ModelError>>>,
    fallback: Option<Completion>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a text reply.
    pub fn reply(self, text: impl Into<String>) -> Self {
        self.reply_with_usage(text, SCRIPTED_USAGE)
    }

    pub fn reply_with_usage(self, text: impl Into<String>, usage: TokenUsage) -> Self {
        self.push(Completion {
            message: Message::assistant(text),
            usage,
        })
    }

    /// Queue a reply that requests one tool call.
    pub fn tool_call(self, id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        self.tool_calls([ToolCall::new(id, name, input)])
    }

    /// Queue a reply that requests several tool calls at once.
    pub fn tool_calls(self, calls: impl IntoIterator<Item = ToolCall>) -> Self {
        let parts = calls.into_iter().map(Part::ToolCall).collect();
        self.push(Completion {
            message: Message::from_parts(Role::Assistant, parts),
            usage: SCRIPTED_USAGE,
        })
    }

    pub fn push(self, completion: Completion) -> Self {
        self.enqueue(Ok(completion))
    }

    /// Queue a failure.
    pub fn fail(self, error: ModelError) -> Self {
        self.enqueue(Err(error))
    }

    /// Reply with `text` whenever the queue is empty.
    pub fn repeating(mut self, text: impl Into<String>) -> Self {
        self.fallback = Some(Completion {
            message: Message::assistant(text),
            usage: SCRIPTED_USAGE,
        });
        self
    }

    fn enqueue(self, entry: Result<Completion, ModelError>) -> Self {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(entry);
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<Completion, ModelError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedRequest {
                system: request.system.map(str::to_string),
                messages: request.messages.to_vec(),
                tools: request.tools.iter().map(|t| t.name.clone()).collect(),
                temperature: request.temperature,
            });

        let next = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match (next, &self.fallback) {
            (Some(entry), _) => entry,
            (None, Some(fallback)) => Ok(fallback.clone()),
            (None, None) => Err(ModelError::Exhausted("script is empty".into())),
        }
    }
}

/// An in-memory tool provider with injectable failures and call counters.
///
/// Tools echo their arguments as `{"tool": <name>, "arguments": <args>}`
/// unless a result was set with [`FakeProvider::with_result`].
#[derive(Default)]
pub struct FakeProvider {
    tools: Vec<ToolSpec>,
    results: HashMap<String, Result<Value, ToolError>>,
    connect_failure: Option<ToolError>,
    // Number of connect attempts that fail before one succeeds.
    connect_failures_left: AtomicUsize,
    list_failure: Option<ToolError>,
    connect_delay: Duration,
    connects: AtomicUsize,
    closes: AtomicUsize,
    invocations: Mutex<Vec<(String, Value)>>,
}

impl FakeProvider {
    pub fn new(tools: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            tools: tools
                .into_iter()
                .map(|name| {
                    let name = name.into();
                    ToolSpec::new(
                        name.clone(),
                        format!("fake tool {name}"),
                        json!({"type": "object", "properties": {}}),
                    )
                })
                .collect(),
            ..Self::default()
        }
    }

    /// Every connect attempt fails.
    pub fn failing_connect(self, message: impl Into<String>) -> Self {
        self.failing_connect_times(usize::MAX, message)
    }

    /// The first `times` connect attempts fail.
    pub fn failing_connect_times(mut self, times: usize, message: impl Into<String>) -> Self {
        self.connect_failure = Some(ToolError::Connection(message.into()));
        self.connect_failures_left = AtomicUsize::new(times);
        self
    }

    /// Listing tools fails after a successful connect.
    pub fn failing_list(mut self, message: impl Into<String>) -> Self {
        self.list_failure = Some(ToolError::Execution(message.into()));
        self
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    pub fn with_result(mut self, tool: impl Into<String>, result: Result<Value, ToolError>) -> Self {
        self.results.insert(tool.into(), result);
        self
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// `(tool, arguments)` for every invocation, in call order.
    pub fn invocations(&self) -> Vec<(String, Value)> {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ToolProvider for FakeProvider {
    async fn connect(&self) -> Result<(), ToolError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        if let Some(error) = &self.connect_failure {
            let failing = self
                .connect_failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok();
            if failing {
                return Err(error.clone());
            }
        }
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolError> {
        match &self.list_failure {
            Some(error) => Err(error.clone()),
            None => Ok(self.tools.clone()),
        }
    }

    async fn invoke(&self, name: &str, arguments: Value) -> Result<Value, ToolError> {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((name.to_string(), arguments.clone()));

        if let Some(result) = self.results.get(name) {
            return result.clone();
        }
        if !self.tools.iter().any(|tool| tool.name == name) {
            return Err(ToolError::UnknownTool(name.to_string()));
        }
        Ok(json!({"tool": name, "arguments": arguments}))
    }

    async fn close(&self) -> Result<(), ToolError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
