//! Drives a role-playing session to completion.

use serde_json::Value;
use storage::{Event, EventKind, EventStore, SessionId};
use thiserror::Error;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::model::{TokenUsage, ToolOutcome};
use crate::session::{RolePlayingSession, TerminationStatus};
use crate::transcript::{Transcript, Turn};

/// Status recorded for sessions that ended in an error.
const ABORTED_STATUS: &str = "aborted";

/// A finished session.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub session_id: SessionId,
    /// Content of the last assistant turn, verbatim.
    pub final_answer: String,
    pub transcript: Transcript,
    pub usage: TokenUsage,
    pub status: TerminationStatus,
    /// Tool invocations executed across the whole session.
    pub tool_calls: usize,
}

impl SessionOutcome {
    pub fn into_parts(self) -> (String, Transcript, TokenUsage) {
        (self.final_answer, self.transcript, self.usage)
    }
}

/// A session that hit an unrecoverable error, with everything recorded
/// before the failure.
#[derive(Debug, Error)]
#[error("session aborted after {} turns: {source}", .transcript.len())]
pub struct SessionAborted {
    pub source: Error,
    pub transcript: Transcript,
    pub usage: TokenUsage,
    /// Tool invocations that ran before the failure.
    pub tool_calls: usize,
}

impl From<Error> for SessionAborted {
    fn from(source: Error) -> Self {
        Self {
            source,
            transcript: Transcript::new(),
            usage: TokenUsage::default(),
            tool_calls: 0,
        }
    }
}

/// Runs sessions, optionally persisting every turn to an event store.
#[derive(Default)]
pub struct SessionRunner {
    store: Option<EventStore>,
}

impl SessionRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(mut self, store: EventStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn store(&self) -> Option<&EventStore> {
        self.store.as_ref()
    }

    /// Run `session` until it terminates.
    ///
    /// Turns are strictly ordered, user-proxy first in every round. On error
    /// the partial transcript and usage are returned in [`SessionAborted`].
    pub async fn run(
        &mut self,
        mut session: RolePlayingSession,
    ) -> std::result::Result<SessionOutcome, SessionAborted> {
        let session_id = SessionId::new();
        let mut transcript = Transcript::new();
        info!(session = %session_id, task = %session.task().prompt(), "session started");

        match self.drive(session_id, &mut session, &mut transcript).await {
            Ok(status) => {
                let usage = session.usage();
                self.record(session_id, end_event(&status.to_string(), usage))
                    .map_err(|source| SessionAborted {
                        source,
                        transcript: transcript.clone(),
                        usage,
                        tool_calls: session.tool_calls(),
                    })?;
                info!(
                    session = %session_id,
                    %status,
                    turns = transcript.len(),
                    tokens = usage.total_tokens,
                    "session finished"
                );

                let final_answer = transcript
                    .last_assistant()
                    .map(|turn| turn.content.clone())
                    .unwrap_or_default();
                Ok(SessionOutcome {
                    session_id,
                    final_answer,
                    transcript,
                    usage,
                    status,
                    tool_calls: session.tool_calls(),
                })
            }
            Err(source) => {
                let usage = session.usage();
                warn!(session = %session_id, error = %source, turns = transcript.len(), "session aborted");
                if let Err(e) = self.record(session_id, end_event(ABORTED_STATUS, usage)) {
                    warn!(session = %session_id, error = %e, "failed to record session end");
                }
                Err(SessionAborted {
                    source,
                    transcript,
                    usage,
                    tool_calls: session.tool_calls(),
                })
            }
        }
    }

    async fn drive(
        &mut self,
        session_id: SessionId,
        session: &mut RolePlayingSession,
        transcript: &mut Transcript,
    ) -> Result<TerminationStatus> {
        let first = session.initialize().await?.to_string();
        self.record(session_id, EventKind::SessionStart { task: first })?;

        loop {
            let recorded = transcript.len();
            let stepped = session.step(transcript).await;
            for turn in &transcript.turns()[recorded..] {
                self.record_turn(session_id, turn)?;
            }
            if let Some(status) = stepped? {
                return Ok(status);
            }
        }
    }

    fn record(&self, session_id: SessionId, kind: EventKind) -> Result<()> {
        if let Some(store) = &self.store {
            store.append(&Event::new(session_id, kind))?;
        }
        Ok(())
    }

    fn record_turn(&self, session_id: SessionId, turn: &Turn) -> Result<()> {
        for call in &turn.tool_calls {
            self.record(
                session_id,
                EventKind::ToolCall {
                    name: call.tool_name.clone(),
                    input: call.arguments.clone(),
                },
            )?;
            let (output, is_error) = match &call.outcome {
                ToolOutcome::Success { output } => (output.clone(), false),
                ToolOutcome::Error { message } => (Value::String(message.clone()), true),
            };
            self.record(
                session_id,
                EventKind::ToolResult {
                    name: call.tool_name.clone(),
                    output,
                    is_error,
                },
            )?;
        }
        self.record(
            session_id,
            EventKind::Message {
                role: turn.role,
                content: turn.content.clone(),
            },
        )
    }
}

fn end_event(status: &str, usage: TokenUsage) -> EventKind {
    EventKind::SessionEnd {
        status: status.to_string(),
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
    }
}
