//! Two-agent role-playing session state machine.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::agent::{Agent, ConversationState, DEFAULT_TOOL_CALL_BUDGET};
use crate::error::{Error, Result};
use crate::model::{CompletionRequest, Message, ModelClient, Role, TokenUsage};
use crate::prompts::{self, RoleNames};
use crate::retry::RetryPolicy;
use crate::tools::ToolCatalog;
use crate::transcript::{Transcript, Turn};

/// The task a session works on. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    prompt: String,
    specify: bool,
}

impl Task {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            specify: false,
        }
    }

    /// Rewrite the prompt with one extra model call before the session starts.
    pub fn with_specify(mut self, specify: bool) -> Self {
        self.specify = specify;
        self
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn specify(&self) -> bool {
        self.specify
    }
}

/// Strings that end a session when an agent emits them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminationMarkers {
    pub completion: Vec<String>,
    pub give_up: Vec<String>,
}

impl Default for TerminationMarkers {
    fn default() -> Self {
        Self {
            completion: vec!["TASK_DONE".to_string(), "TASK_COMPLETE".to_string()],
            give_up: vec!["TASK_GIVE_UP".to_string()],
        }
    }
}

impl TerminationMarkers {
    /// Status signalled by `content`, if any. Give-up markers win over
    /// completion markers.
    pub fn detect(&self, content: &str) -> Option<TerminationStatus> {
        let contains = |markers: &[String]| {
            markers
                .iter()
                .any(|marker| !marker.is_empty() && content.contains(marker.as_str()))
        };
        if contains(self.give_up.as_slice()) {
            Some(TerminationStatus::GaveUp)
        } else if contains(self.completion.as_slice()) {
            Some(TerminationStatus::TaskComplete)
        } else {
            None
        }
    }

    pub(crate) fn primary_completion(&self) -> &str {
        self.completion.first().map_or("TASK_DONE", String::as_str)
    }

    pub(crate) fn primary_give_up(&self) -> &str {
        self.give_up.first().map_or("TASK_GIVE_UP", String::as_str)
    }
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationStatus {
    TaskComplete,
    GaveUp,
    /// The round limit was reached without a marker. Not an error.
    MaxTurnsExceeded,
    /// Too many assistant turns hit the tool call budget.
    ToolBudgetCeiling,
}

impl fmt::Display for TerminationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TerminationStatus::TaskComplete => "task_complete",
            TerminationStatus::GaveUp => "gave_up",
            TerminationStatus::MaxTurnsExceeded => "max_turns_exceeded",
            TerminationStatus::ToolBudgetCeiling => "tool_budget_ceiling",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Rounds (user turn plus assistant turn) before `MaxTurnsExceeded`.
    pub max_rounds: usize,
    /// Tool invocations allowed within one assistant turn.
    pub tool_call_budget: usize,
    /// Degraded assistant turns that end the session; 0 disables the ceiling.
    pub max_degraded_turns: usize,
    /// Word limit given to the task specifier.
    pub word_limit: usize,
    pub temperature: f32,
    pub markers: TerminationMarkers,
    pub roles: RoleNames,
    /// Retry applied to every model call.
    pub retry: RetryPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_rounds: 15,
            tool_call_budget: DEFAULT_TOOL_CALL_BUDGET,
            max_degraded_turns: 3,
            word_limit: 50,
            temperature: 0.0,
            markers: TerminationMarkers::default(),
            roles: RoleNames::default(),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initializing,
    /// Zero-based index of the next round.
    Active { round: usize },
    Terminated(TerminationStatus),
}

struct Agents {
    user: Agent,
    assistant: Agent,
}

/// A user-proxy agent and an assistant agent working on one task.
///
/// `Initializing → Active → Terminated`. Call [`initialize`] once, then
/// [`step`] until it reports a terminal status.
///
/// [`initialize`]: RolePlayingSession::initialize
/// [`step`]: RolePlayingSession::step
pub struct RolePlayingSession {
    task: Task,
    config: SessionConfig,
    user_model: Arc<dyn ModelClient>,
    assistant_model: Arc<dyn ModelClient>,
    specifier: Arc<dyn ModelClient>,
    catalog: ToolCatalog,
    agents: Option<Agents>,
    state: SessionState,
    first_message: Option<String>,
    pending: Option<String>,
    conversation: ConversationState,
    degraded_turns: usize,
    final_answer: Option<String>,
}

impl RolePlayingSession {
    pub fn new(
        task: Task,
        user_model: Arc<dyn ModelClient>,
        assistant_model: Arc<dyn ModelClient>,
        catalog: ToolCatalog,
        config: SessionConfig,
    ) -> Self {
        Self {
            task,
            config,
            user_model,
            specifier: assistant_model.clone(),
            assistant_model,
            catalog,
            agents: None,
            state: SessionState::Initializing,
            first_message: None,
            pending: None,
            conversation: ConversationState::default(),
            degraded_turns: 0,
            final_answer: None,
        }
    }

    /// Use a dedicated model for task specification instead of the
    /// assistant's.
    pub fn with_specifier(mut self, specifier: Arc<dyn ModelClient>) -> Self {
        self.specifier = specifier;
        self
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn status(&self) -> Option<TerminationStatus> {
        match self.state {
            SessionState::Terminated(status) => Some(status),
            _ => None,
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.status().is_some()
    }

    /// The message that opened the conversation, once initialized.
    pub fn first_message(&self) -> Option<&str> {
        self.first_message.as_deref()
    }

    /// Content of the latest assistant turn.
    pub fn final_answer(&self) -> Option<&str> {
        self.final_answer.as_deref()
    }

    pub fn usage(&self) -> TokenUsage {
        self.conversation.usage
    }

    pub fn tool_calls(&self) -> usize {
        self.conversation.tool_calls
    }

    /// Specify the task if requested, set up both agents and move to
    /// `Active`. Returns the first message.
    pub async fn initialize(&mut self) -> Result<&str> {
        if self.state != SessionState::Initializing {
            return Err(Error::InvalidState("session is already initialized".into()));
        }
        if self.config.max_rounds == 0 {
            return Err(Error::Config("max_rounds must be at least 1".into()));
        }

        let task = if self.task.specify() {
            let specified = self.specify().await?;
            info!(original = %self.task.prompt(), specified = %specified, "task specified");
            specified
        } else {
            self.task.prompt().to_string()
        };

        let SessionConfig {
            roles,
            markers,
            temperature,
            tool_call_budget,
            retry,
            ..
        } = &self.config;

        let user = Agent::new(
            Role::User,
            prompts::user_system_prompt(roles, &task, markers),
            self.user_model.clone(),
        )
        .with_temperature(*temperature)
        .with_retry(retry.clone());

        let assistant = Agent::new(
            Role::Assistant,
            prompts::assistant_system_prompt(roles, &task, markers),
            self.assistant_model.clone(),
        )
        .with_tools(self.catalog.clone())
        .with_temperature(*temperature)
        .with_tool_call_budget(*tool_call_budget)
        .with_retry(retry.clone());

        self.agents = Some(Agents { user, assistant });
        self.pending = Some(task.clone());
        self.state = SessionState::Active { round: 0 };
        debug!(tools = self.catalog.len(), "session active");

        Ok(self.first_message.insert(task).as_str())
    }

    async fn specify(&mut self) -> Result<String> {
        let prompt = prompts::specify_prompt(
            &self.config.roles,
            self.task.prompt(),
            self.config.word_limit,
        );
        let messages = [Message::user(prompt)];
        let request = CompletionRequest {
            system: None,
            messages: &messages,
            tools: &[],
            temperature: self.config.temperature,
        };
        let specifier = &self.specifier;
        let completion = self
            .config
            .retry
            .execute(|| specifier.complete(request))
            .await?;
        self.conversation.usage += completion.usage;

        let specified = completion.content().trim().to_string();
        if specified.is_empty() {
            return Err(Error::InvalidState("task specifier returned no text".into()));
        }
        Ok(specified)
    }

    /// Play one round: the user-proxy turn, then the assistant turn. Each
    /// turn is appended to `transcript` as soon as it is produced.
    ///
    /// Returns the terminal status once the session has ended.
    pub async fn step(&mut self, transcript: &mut Transcript) -> Result<Option<TerminationStatus>> {
        let SessionState::Active { round } = self.state else {
            return Err(Error::InvalidState(format!(
                "cannot step a session in state {:?}",
                self.state
            )));
        };
        let (Some(agents), Some(incoming)) = (self.agents.as_mut(), self.pending.take()) else {
            return Err(Error::InvalidState("session has no pending message".into()));
        };
        let markers = &self.config.markers;

        debug!(round = round + 1, "round started");

        let responded = agents.user.respond(&incoming, &mut self.conversation).await;
        let mut user_turn = keep_partial(responded, transcript)?;
        let user_signal = markers.detect(&user_turn.content);
        user_turn.terminal = user_signal.is_some();
        let instruction = user_turn.content.clone();
        transcript.push(user_turn);

        let responded = agents
            .assistant
            .respond(&instruction, &mut self.conversation)
            .await;
        let mut assistant_turn = keep_partial(responded, transcript)?;
        let assistant_signal = markers.detect(&assistant_turn.content);
        assistant_turn.terminal = assistant_signal.is_some();
        let degraded = assistant_turn.is_degraded();
        let answer = assistant_turn.content.clone();
        transcript.push(assistant_turn);

        if degraded {
            self.degraded_turns += 1;
        }
        self.final_answer = Some(answer.clone());

        let status = self.round_outcome(round, user_signal.or(assistant_signal));
        match status {
            Some(status) => {
                info!(rounds = round + 1, %status, "session terminated");
                self.state = SessionState::Terminated(status);
            }
            None => {
                self.pending = Some(answer);
                self.state = SessionState::Active { round: round + 1 };
            }
        }
        Ok(status)
    }

    fn round_outcome(&self, round: usize, signal: Option<TerminationStatus>) -> Option<TerminationStatus> {
        let ceiling = self.config.max_degraded_turns;
        if signal.is_some() {
            signal
        } else if ceiling > 0 && self.degraded_turns >= ceiling {
            Some(TerminationStatus::ToolBudgetCeiling)
        } else if round + 1 >= self.config.max_rounds {
            Some(TerminationStatus::MaxTurnsExceeded)
        } else {
            None
        }
    }
}

/// Append the partial turn of a failed response so its tool calls stay on
/// record, then surface the underlying error.
fn keep_partial(responded: Result<Turn>, transcript: &mut Transcript) -> Result<Turn> {
    match responded {
        Err(Error::TurnFailed { turn, source }) => {
            transcript.push(*turn);
            Err(*source)
        }
        other => other,
    }
}
