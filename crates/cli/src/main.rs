mod config;
mod error;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Local, TimeZone};
use clap::{Parser, Subcommand};
use runtime::{
    ModelClient, RolePlayingSession, SessionOutcome, SessionRunner, Task, ToolConnectionManager,
    Transcript,
};
use storage::{Event, EventKind, EventStore, Role};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use config::Config;
use error::{Error, Result};

const CONFIG_FILE: &str = "society.toml";

#[derive(Parser)]
#[command(name = "society")]
#[command(about = "Two-agent role-playing sessions over MCP tools", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration
    #[arg(short, long, global = true, default_value = CONFIG_FILE)]
    config: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a session on a task and print the final answer
    Run {
        /// The task the two agents work on
        #[arg(short, long)]
        task: String,
        /// Also write the final answer to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Let a model rewrite the task into a more specific one first
        #[arg(long)]
        specify: bool,
        /// Add tool providers from an mcpServers JSON file
        #[arg(long)]
        mcp_config: Option<PathBuf>,
        /// Override session.max_rounds
        #[arg(long)]
        max_rounds: Option<usize>,
        /// Do not record events to the session database
        #[arg(long)]
        no_record: bool,
    },
    /// List recorded sessions
    Sessions {
        /// Show only the last N sessions
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Show event logs for a session
    Logs {
        /// Session ID (prefix match supported)
        #[arg(short, long)]
        session: String,
        /// Filter by event kind (session_start, message, tool_call, tool_result, session_end)
        #[arg(short, long)]
        kind: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run {
            task,
            output,
            specify,
            mcp_config,
            max_rounds,
            no_record,
        } => {
            let mut config = Config::load_or_default(&cli.config)?;
            if let Some(path) = mcp_config {
                config.add_mcp_servers(path)?;
            }
            if let Some(max_rounds) = max_rounds {
                config.session.max_rounds = max_rounds;
            }
            config.session.specify |= specify;
            cmd_run(&config, task, output.as_deref(), !no_record).await
        }
        Commands::Sessions { limit } => cmd_sessions(limit),
        Commands::Logs { session, kind } => cmd_logs(&session, kind.as_deref()),
    }
}

async fn cmd_run(config: &Config, task: String, output: Option<&Path>, record: bool) -> Result<()> {
    let model: Arc<dyn ModelClient> = Arc::new(config.model_client()?);
    let task = Task::new(task).with_specify(config.session.specify);
    let session_config = config.session_config();

    let mut runner = SessionRunner::new();
    if record {
        let data_dir = dirs_data_dir().unwrap_or_else(|| ".society".into());
        std::fs::create_dir_all(&data_dir)?;
        let db_path = data_dir.join("events.db");
        runner = runner.with_store(EventStore::open(&db_path)?);
        info!(path = %db_path.display(), "recording session");
    }

    let manager =
        ToolConnectionManager::from_configs(config.providers.clone(), config.connection_options());
    info!(
        providers = manager.len(),
        model = %config.model.model,
        "connecting tool providers"
    );

    let driver = &mut runner;
    let result = manager
        .scoped(|catalog| async move {
            info!(tools = catalog.len(), "tool catalog ready");
            let session =
                RolePlayingSession::new(task, model.clone(), model, catalog, session_config);
            Ok::<_, runtime::Error>(driver.run(session).await)
        })
        .await?;

    match result {
        Ok(outcome) => {
            report(&outcome);
            if let Some(path) = output {
                std::fs::write(path, &outcome.final_answer)?;
                eprintln!("Answer written to {}", path.display());
            }
            Ok(())
        }
        Err(aborted) => {
            eprintln!("Partial transcript:");
            print_transcript(&aborted.transcript);
            eprintln!(
                "Tool calls: {}, tokens: {} prompt, {} completion",
                aborted.tool_calls, aborted.usage.prompt_tokens, aborted.usage.completion_tokens
            );
            Err(Error::Session(aborted))
        }
    }
}

fn report(outcome: &SessionOutcome) {
    eprintln!("Session: {}", outcome.session_id);
    eprintln!("Status: {}", outcome.status);
    eprintln!(
        "Turns: {}, tool calls: {}, tokens: {} prompt, {} completion",
        outcome.transcript.len(),
        outcome.tool_calls,
        outcome.usage.prompt_tokens,
        outcome.usage.completion_tokens
    );
    println!("{}", outcome.final_answer);
}

fn print_transcript(transcript: &Transcript) {
    for turn in transcript {
        eprintln!("{}: {}", role_label(turn.role), truncate(&turn.content, 200));
        for call in &turn.tool_calls {
            let status = if call.outcome.is_error() { "error" } else { "ok" };
            eprintln!(
                "    tool {} [{status}] {}",
                call.tool_name,
                truncate(&call.outcome.to_text(), 120)
            );
        }
    }
}

fn cmd_sessions(limit: usize) -> Result<()> {
    let store = open_store()?;
    let sessions = store.list_sessions()?;

    if sessions.is_empty() {
        println!("No sessions found.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<16}  {:<5}  {:<16}  TASK",
        "SESSION ID", "STARTED", "MSGS", "STATUS"
    );
    println!("{}", "-".repeat(100));

    for summary in sessions.into_iter().take(limit) {
        let started = Local
            .from_utc_datetime(&summary.started_at.naive_utc())
            .format("%Y-%m-%d %H:%M");
        let status = summary.status.as_deref().unwrap_or("running");
        let task = summary.task.as_deref().map(|t| truncate(t, 40)).unwrap_or_default();
        println!(
            "{:<36}  {:<16}  {:<5}  {:<16}  {task}",
            summary.id, started, summary.message_count, status
        );
    }

    Ok(())
}

fn cmd_logs(session_prefix: &str, kind_filter: Option<&str>) -> Result<()> {
    let store = open_store()?;

    let matching = store.find_sessions(session_prefix)?;
    let session_id = match matching.as_slice() {
        [] => {
            return Err(Error::SessionNotFound {
                prefix: session_prefix.to_string(),
            });
        }
        [only] => *only,
        _ => {
            return Err(Error::AmbiguousSession {
                prefix: session_prefix.to_string(),
                matches: matching.iter().map(ToString::to_string).collect(),
            });
        }
    };

    let events = store.load_events(session_id, kind_filter)?;

    if events.is_empty() {
        println!("No events found for session {session_id}");
        return Ok(());
    }

    println!("Session: {session_id}\n");

    for event in events {
        print_event(&event);
    }

    Ok(())
}

fn print_event(event: &Event) {
    let time = Local
        .from_utc_datetime(&event.timestamp.naive_utc())
        .format("%H:%M:%S");

    match &event.kind {
        EventKind::SessionStart { task } => {
            println!("[{time}] === Session started: {} ===", truncate(task, 200));
        }
        EventKind::SessionEnd {
            status,
            prompt_tokens,
            completion_tokens,
        } => {
            println!(
                "[{time}] === Session ended: {status} ({prompt_tokens} prompt, {completion_tokens} completion tokens) ==="
            );
        }
        EventKind::Message { role, content } => {
            println!("[{time}] {}: {}", role_label(*role), truncate(content, 200));
        }
        EventKind::ToolCall { name, input } => {
            println!("[{time}] TOOL CALL: {name} {input}");
        }
        EventKind::ToolResult {
            name,
            output,
            is_error,
        } => {
            let label = if *is_error { "TOOL ERROR" } else { "TOOL RESULT" };
            println!("[{time}] {label}: {name} {}", truncate(&output.to_string(), 200));
        }
    }
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::User => "USER",
        Role::Assistant => "ASSISTANT",
    }
}

/// Shorten `text` to at most `max` characters for display.
fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}

fn open_store() -> Result<EventStore> {
    let data_dir = dirs_data_dir().unwrap_or_else(|| ".society".into());
    let db_path = data_dir.join("events.db");

    if !db_path.exists() {
        return Err(Error::DatabaseNotFound { path: db_path });
    }

    Ok(EventStore::open(&db_path)?)
}

fn dirs_data_dir() -> Option<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/share/society"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/share")))
            .map(|p| p.join("society"))
    }
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|h| PathBuf::from(h).join("society"))
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé...");
        assert_eq!(truncate("short", 10), "short");
    }

    #[test]
    fn run_arguments_parse() {
        let cli = Cli::try_parse_from([
            "society",
            "run",
            "--task",
            "What is 2+2?",
            "--max-rounds",
            "3",
            "--no-record",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                task,
                max_rounds,
                no_record,
                specify,
                ..
            } => {
                assert_eq!(task, "What is 2+2?");
                assert_eq!(max_rounds, Some(3));
                assert!(no_record);
                assert!(!specify);
            }
            _ => panic!("expected run"),
        }
        assert_eq!(cli.config, PathBuf::from(CONFIG_FILE));
    }
}
