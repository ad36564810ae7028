use std::sync::Arc;

use pretty_assertions::assert_eq;
use runtime::testing::{FakeProvider, SCRIPTED_USAGE, ScriptedModel};
use runtime::{
    ConnectionOptions, Degradation, Error, ModelError, ProviderEntry, RetryPolicy, Role,
    RolePlayingSession, SessionConfig, SessionRunner, Task, TerminationStatus, TokenUsage,
    ToolCall, ToolCatalog, ToolConnectionManager, ToolOutcome,
};
use serde_json::json;
use storage::{EventKind, EventStore};

fn config() -> SessionConfig {
    SessionConfig {
        retry: RetryPolicy::none(),
        ..SessionConfig::default()
    }
}

fn session(
    task: Task,
    user: &Arc<ScriptedModel>,
    assistant: &Arc<ScriptedModel>,
    catalog: ToolCatalog,
    config: SessionConfig,
) -> RolePlayingSession {
    RolePlayingSession::new(task, user.clone(), assistant.clone(), catalog, config)
}

fn assert_alternates(roles: &[Role]) {
    assert_eq!(roles.first(), Some(&Role::User));
    for pair in roles.windows(2) {
        assert_ne!(pair[0], pair[1], "consecutive turns share a role: {roles:?}");
    }
}

#[tokio::test]
async fn what_is_two_plus_two() {
    let user = Arc::new(
        ScriptedModel::new().reply_with_usage("Compute 2+2 and report it.", TokenUsage::new(20, 8)),
    );
    let assistant =
        Arc::new(ScriptedModel::new().reply_with_usage("4, TASK_COMPLETE", TokenUsage::new(30, 4)));

    let mut runner = SessionRunner::new();
    let outcome = runner
        .run(session(
            Task::new("What is 2+2?"),
            &user,
            &assistant,
            ToolCatalog::empty(),
            config(),
        ))
        .await
        .unwrap();

    assert_eq!(outcome.status, TerminationStatus::TaskComplete);
    let (final_answer, transcript, usage) = outcome.into_parts();
    assert_eq!(final_answer, "4, TASK_COMPLETE");
    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript.turns()[0].role, Role::User);
    assert_eq!(transcript.turns()[1].role, Role::Assistant);
    assert!(transcript.turns()[1].terminal);
    assert_eq!(usage, TokenUsage::new(50, 12));
    assert_eq!(usage, transcript.usage());
}

#[tokio::test]
async fn never_terminating_session_stops_after_max_rounds() {
    let user = Arc::new(ScriptedModel::new().repeating("Keep going."));
    let assistant = Arc::new(ScriptedModel::new().repeating("Working on it."));

    let mut runner = SessionRunner::new();
    let outcome = runner
        .run(session(
            Task::new("Count forever"),
            &user,
            &assistant,
            ToolCatalog::empty(),
            SessionConfig {
                max_rounds: 3,
                ..config()
            },
        ))
        .await
        .unwrap();

    assert_eq!(outcome.status, TerminationStatus::MaxTurnsExceeded);
    assert_eq!(outcome.transcript.len(), 6);
    assert_eq!(outcome.final_answer, "Working on it.");
    let roles: Vec<Role> = outcome.transcript.iter().map(|turn| turn.role).collect();
    assert_alternates(&roles);
    assert_eq!(user.call_count(), 3);
    assert_eq!(assistant.call_count(), 3);
}

#[tokio::test]
async fn without_specify_the_prompt_is_the_first_message() {
    let user = Arc::new(ScriptedModel::new().reply("Do it."));
    let assistant = Arc::new(ScriptedModel::new().reply("Done. TASK_DONE"));
    let mut session = session(
        Task::new("Write a haiku about ferris"),
        &user,
        &assistant,
        ToolCatalog::empty(),
        config(),
    );

    let first = session.initialize().await.unwrap().to_string();

    assert_eq!(first, "Write a haiku about ferris");
    assert_eq!(assistant.call_count(), 0);
    let mut transcript = runtime::Transcript::new();
    session.step(&mut transcript).await.unwrap();
    let requests = user.requests();
    assert_eq!(requests[0].messages[0].text(), "Write a haiku about ferris");
}

#[tokio::test]
async fn with_specify_the_specified_task_is_the_first_message() {
    let user = Arc::new(ScriptedModel::new().reply("Do it."));
    let assistant = Arc::new(ScriptedModel::new().reply("Done. TASK_DONE"));
    let specifier = Arc::new(
        ScriptedModel::new().reply("Write a 3-line haiku about a crab named Ferris."),
    );
    let mut session = session(
        Task::new("Write a haiku about ferris").with_specify(true),
        &user,
        &assistant,
        ToolCatalog::empty(),
        config(),
    )
    .with_specifier(specifier.clone());

    let first = session.initialize().await.unwrap().to_string();

    assert_eq!(first, "Write a 3-line haiku about a crab named Ferris.");
    assert_ne!(first, "Write a haiku about ferris");
    assert_eq!(specifier.call_count(), 1);
    assert_eq!(session.usage(), SCRIPTED_USAGE);

    let mut transcript = runtime::Transcript::new();
    session.step(&mut transcript).await.unwrap();
    assert_eq!(user.requests()[0].messages[0].text(), first);
    assert!(user.requests()[0].system.as_deref().unwrap().contains(&first));

    // Specifier, user and assistant calls each add their usage.
    assert_eq!(transcript.usage(), TokenUsage::new(20, 10));
    assert_eq!(session.usage(), TokenUsage::new(30, 15));
}

#[tokio::test]
async fn outcome_usage_includes_the_specify_call() {
    let user = Arc::new(ScriptedModel::new().reply("Do it."));
    let assistant = Arc::new(ScriptedModel::new().reply("Done. TASK_DONE"));
    let specifier = Arc::new(ScriptedModel::new().reply_with_usage(
        "Write a limerick about a crab.",
        TokenUsage::new(40, 12),
    ));
    let specified = session(
        Task::new("Write a poem").with_specify(true),
        &user,
        &assistant,
        ToolCatalog::empty(),
        config(),
    )
    .with_specifier(specifier);

    let outcome = SessionRunner::new().run(specified).await.unwrap();

    assert_eq!(outcome.transcript.usage(), TokenUsage::new(20, 10));
    assert_eq!(outcome.usage, TokenUsage::new(60, 22));
}

#[tokio::test]
async fn assistant_uses_tools_and_results_flow_back() {
    let math = Arc::new(
        FakeProvider::new(["add"]).with_result("add", Ok(json!({"sum": 4}))),
    );
    let manager = ToolConnectionManager::new(
        vec![ProviderEntry::new("math", math.clone())],
        ConnectionOptions::default(),
    );

    let user = Arc::new(ScriptedModel::new().reply("Add 2 and 2."));
    let assistant = Arc::new(
        ScriptedModel::new()
            .tool_call("call-1", "add", json!({"a": 2, "b": 2}))
            .reply("The sum is 4. TASK_DONE"),
    );

    let mut runner = SessionRunner::new();
    let outcome = manager
        .scoped(|catalog| {
            let session = session(Task::new("What is 2+2?"), &user, &assistant, catalog, config());
            async move { runner.run(session).await }
        })
        .await
        .unwrap();

    assert_eq!(outcome.final_answer, "The sum is 4. TASK_DONE");
    assert_eq!(outcome.tool_calls, 1);
    let turn = &outcome.transcript.turns()[1];
    assert_eq!(turn.tool_calls.len(), 1);
    assert_eq!(turn.tool_calls[0].tool_name, "add");
    assert_eq!(turn.tool_calls[0].arguments, json!({"a": 2, "b": 2}));
    assert_eq!(turn.tool_calls[0].outcome, ToolOutcome::success(json!({"sum": 4})));
    assert_eq!(math.close_count(), 1);

    // The continuation call saw the tool result.
    let requests = assistant.requests();
    let continuation = &requests[1];
    let last = continuation.messages.last().unwrap();
    assert_eq!(last.role, Role::User);
    assert!(format!("{last:?}").contains("sum"));
    assert_eq!(continuation.tools, ["add"]);
}

#[tokio::test]
async fn unknown_tool_is_reported_back_not_fatal() {
    let user = Arc::new(ScriptedModel::new().reply("Look it up."));
    let assistant = Arc::new(
        ScriptedModel::new()
            .tool_call("call-1", "teleport", json!({}))
            .reply("No such tool, answering directly. TASK_DONE"),
    );

    let mut runner = SessionRunner::new();
    let outcome = runner
        .run(session(
            Task::new("Find it"),
            &user,
            &assistant,
            ToolCatalog::empty(),
            config(),
        ))
        .await
        .unwrap();

    let invocation = &outcome.transcript.turns()[1].tool_calls[0];
    assert_eq!(
        invocation.outcome,
        ToolOutcome::error("unknown tool: teleport")
    );
    assert_eq!(outcome.status, TerminationStatus::TaskComplete);
}

#[tokio::test]
async fn tool_budget_rejects_the_extra_call_and_degrades_the_turn() {
    let fake = Arc::new(FakeProvider::new(["step"]));
    let manager = ToolConnectionManager::new(
        vec![ProviderEntry::new("walker", fake.clone())],
        ConnectionOptions::default(),
    );
    let scope = manager.connect().await.unwrap();

    let user = Arc::new(ScriptedModel::new().repeating("Walk."));
    let assistant = Arc::new(
        ScriptedModel::new()
            .tool_calls([
                ToolCall::new("1", "step", json!({"n": 1})),
                ToolCall::new("2", "step", json!({"n": 2})),
            ])
            .tool_calls([
                ToolCall::new("3", "step", json!({"n": 3})),
                ToolCall::new("4", "step", json!({"n": 4})),
            ])
            .repeating("Resting. TASK_DONE"),
    );

    let mut runner = SessionRunner::new();
    let outcome = runner
        .run(session(
            Task::new("Walk far"),
            &user,
            &assistant,
            scope.catalog().clone(),
            SessionConfig {
                tool_call_budget: 3,
                max_degraded_turns: 0,
                ..config()
            },
        ))
        .await
        .unwrap();
    scope.close().await;

    let turn = &outcome.transcript.turns()[1];
    assert_eq!(turn.tool_calls.len(), 3);
    assert_eq!(
        turn.degraded,
        Some(Degradation::ToolCallBudgetExceeded { budget: 3 })
    );
    assert_eq!(fake.invocations().len(), 3);
    assert_eq!(outcome.tool_calls, 3);

    // The session carried on after the degraded turn.
    assert_eq!(outcome.transcript.len(), 4);
    assert_eq!(outcome.status, TerminationStatus::TaskComplete);
}

#[tokio::test]
async fn repeated_budget_exhaustion_hits_the_ceiling() {
    let fake = Arc::new(FakeProvider::new(["step"]));
    let manager = ToolConnectionManager::new(
        vec![ProviderEntry::new("walker", fake.clone())],
        ConnectionOptions::default(),
    );
    let scope = manager.connect().await.unwrap();

    let user = Arc::new(ScriptedModel::new().repeating("Walk."));
    let mut assistant = ScriptedModel::new();
    for round in 0..2 {
        assistant = assistant.tool_calls([
            ToolCall::new(format!("{round}-a"), "step", json!({})),
            ToolCall::new(format!("{round}-b"), "step", json!({})),
        ]);
    }
    let assistant = Arc::new(assistant);

    let mut runner = SessionRunner::new();
    let outcome = runner
        .run(session(
            Task::new("Walk far"),
            &user,
            &assistant,
            scope.catalog().clone(),
            SessionConfig {
                tool_call_budget: 1,
                max_degraded_turns: 2,
                ..config()
            },
        ))
        .await
        .unwrap();
    scope.close().await;

    assert_eq!(outcome.status, TerminationStatus::ToolBudgetCeiling);
    assert_eq!(outcome.transcript.len(), 4);
    assert!(outcome.transcript.iter().filter(|t| t.is_degraded()).count() == 2);
    assert!(!outcome.final_answer.is_empty());
}

#[tokio::test]
async fn model_failure_aborts_with_partial_transcript() {
    let user = Arc::new(ScriptedModel::new().repeating("Next step."));
    let assistant = Arc::new(
        ScriptedModel::new()
            .reply_with_usage("Step one done.", TokenUsage::new(7, 3))
            .fail(ModelError::Network("connection reset".into())),
    );

    let mut runner = SessionRunner::new();
    let aborted = runner
        .run(session(
            Task::new("Two steps"),
            &user,
            &assistant,
            ToolCatalog::empty(),
            config(),
        ))
        .await
        .unwrap_err();

    assert!(matches!(aborted.source, Error::Model(ModelError::Network(_))));
    // Round one plus the user turn of round two.
    assert_eq!(aborted.transcript.len(), 3);
    assert_eq!(aborted.transcript.last().unwrap().role, Role::User);
    assert!(aborted.usage.total_tokens >= 10);
    assert!(aborted.to_string().contains("3 turns"));
}

#[tokio::test]
async fn failed_turn_keeps_tool_calls_that_already_ran() {
    let fs = Arc::new(FakeProvider::new(["write_file"]));
    let manager = ToolConnectionManager::new(
        vec![ProviderEntry::new("fs", fs.clone())],
        ConnectionOptions::default(),
    );
    let user = Arc::new(ScriptedModel::new().reply("Write notes.txt."));
    let assistant = Arc::new(
        ScriptedModel::new()
            .tool_call("c1", "write_file", json!({"path": "notes.txt"}))
            .fail(ModelError::Network("connection reset".into())),
    );

    let mut runner = SessionRunner::new().with_store(EventStore::in_memory().unwrap());
    let driver = &mut runner;
    let aborted = manager
        .scoped(|catalog| {
            let session = session(Task::new("Save notes"), &user, &assistant, catalog, config());
            async move { Ok::<_, Error>(driver.run(session).await) }
        })
        .await
        .unwrap()
        .unwrap_err();

    assert_eq!(fs.invocations().len(), 1);
    assert!(matches!(aborted.source, Error::Model(ModelError::Network(_))));
    assert_eq!(aborted.tool_calls, 1);
    assert_eq!(aborted.transcript.len(), 2);
    let partial = &aborted.transcript.turns()[1];
    assert_eq!(partial.role, Role::Assistant);
    assert_eq!(partial.tool_calls.len(), 1);
    assert_eq!(partial.tool_calls[0].tool_name, "write_file");

    let store = runner.store().unwrap();
    let sessions = store.list_sessions().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].status.as_deref(), Some("aborted"));
    let calls = store
        .load_events(sessions[0].id, Some("tool_call"))
        .unwrap();
    assert_eq!(calls.len(), 1);
    let results = store
        .load_events(sessions[0].id, Some("tool_result"))
        .unwrap();
    assert_eq!(results.len(), 1);
}

#[tokio::test]
async fn runs_are_recorded_in_the_event_store() {
    let fake = Arc::new(FakeProvider::new(["add"]));
    let manager = ToolConnectionManager::new(
        vec![ProviderEntry::new("math", fake.clone())],
        ConnectionOptions::default(),
    );
    let user = Arc::new(ScriptedModel::new().reply("Add."));
    let assistant = Arc::new(
        ScriptedModel::new()
            .tool_call("c", "add", json!({"a": 1}))
            .reply("1 TASK_DONE"),
    );

    let mut runner = SessionRunner::new().with_store(EventStore::in_memory().unwrap());
    let driver = &mut runner;
    let outcome = manager
        .scoped(|catalog| {
            let session = session(Task::new("Sum"), &user, &assistant, catalog, config());
            async move { driver.run(session).await }
        })
        .await
        .unwrap();

    let store = runner.store().unwrap();
    let kinds: Vec<&str> = store
        .load_session(outcome.session_id)
        .unwrap()
        .iter()
        .map(|event| event.kind.name())
        .collect();
    assert_eq!(
        kinds,
        [
            "session_start",
            "message",
            "tool_call",
            "tool_result",
            "message",
            "session_end"
        ]
    );

    let ended = store
        .load_events(outcome.session_id, Some("session_end"))
        .unwrap();
    match &ended[0].kind {
        EventKind::SessionEnd { status, .. } => assert_eq!(status, "task_complete"),
        other => panic!("unexpected event: {other:?}"),
    }
}
