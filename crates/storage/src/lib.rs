//! SQLite-backed event log for role-playing sessions.
//!
//! Every run of the `society` binary is recorded here: the task it started
//! with, each agent message, each tool call and its result, and how the
//! session ended (status and token usage). The log is what `society
//! sessions` and `society logs` read back.
//!
//! # Core Concepts
//!
//! - [`EventStore`] wraps a SQLite database; events are appended and read
//!   back in append order.
//! - [`Event`] is one thing that happened in a session, tagged with a
//!   [`SessionId`] and a timestamp.
//! - [`EventKind`] enumerates what can happen: `SessionStart`, `Message`,
//!   `ToolCall`, `ToolResult`, `SessionEnd`.
//!
//! # Example
//!
//! ```no_run
//! use storage::{Event, EventKind, EventStore, Role, SessionId};
//!
//! let store = EventStore::open("events.db")?;
//!
//! let session_id = SessionId::new();
//! store.append(&Event::new(
//!     session_id,
//!     EventKind::SessionStart { task: "What is 2+2?".into() },
//! ))?;
//! store.append(&Event::message(session_id, Role::User, "Compute 2+2."))?;
//! store.append(&Event::message(session_id, Role::Assistant, "4"))?;
//!
//! for summary in store.list_sessions()? {
//!     println!("{}: {} messages", summary.id, summary.message_count);
//! }
//! # Ok::<(), storage::Error>(())
//! ```

mod error;
mod event;
mod store;

pub use error::{Error, Result};
pub use event::{Event, EventKind, Role, SessionId};
pub use store::{EventStore, SessionSummary};
