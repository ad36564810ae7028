//! SQLite event store implementation.

use crate::{Error, Event, EventKind, Result, SessionId};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;

/// Overview of one recorded session.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub id: SessionId,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub task: Option<String>,
    pub status: Option<String>,
    pub message_count: usize,
}

/// SQLite-backed event store.
pub struct EventStore {
    conn: Connection,
}

impl EventStore {
    /// Open or create an event store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory event store (useful for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        // `seq` gives a total order even when timestamps collide.
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                session_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                kind TEXT NOT NULL,
                data TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_events_session
                ON events(session_id, seq);
            "#,
        )?;
        Ok(())
    }

    /// Append an event to the store.
    pub fn append(&self, event: &Event) -> Result<()> {
        self.conn.execute(
            "INSERT INTO events (id, session_id, timestamp, kind, data) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                event.id.to_string(),
                event.session_id.to_string(),
                event.timestamp.to_rfc3339(),
                event.kind.name(),
                serde_json::to_string(&event.kind)?,
            ],
        )?;
        Ok(())
    }

    /// Load all events for a session in append order.
    pub fn load_session(&self, session_id: SessionId) -> Result<Vec<Event>> {
        self.load_events(session_id, None)
    }

    /// Load events for a session, optionally restricted to one kind
    /// (`message`, `tool_call`, `tool_result`, ...).
    pub fn load_events(&self, session_id: SessionId, kind: Option<&str>) -> Result<Vec<Event>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, session_id, timestamp, data FROM events
             WHERE session_id = ?1 AND (?2 IS NULL OR kind = ?2)
             ORDER BY seq",
        )?;

        let rows = stmt
            .query_map(params![session_id.to_string(), kind], |row| {
                Ok(RawEvent {
                    id: row.get(0)?,
                    session_id: row.get(1)?,
                    timestamp: row.get(2)?,
                    data: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter().map(RawEvent::decode).collect()
    }

    /// List recorded sessions, most recent first.
    pub fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT
                e.session_id,
                MIN(e.timestamp),
                MAX(CASE WHEN e.kind = 'session_end' THEN e.timestamp END),
                SUM(CASE WHEN e.kind = 'message' THEN 1 ELSE 0 END),
                (SELECT s.data FROM events s
                    WHERE s.session_id = e.session_id AND s.kind = 'session_start'
                    ORDER BY s.seq LIMIT 1),
                (SELECT x.data FROM events x
                    WHERE x.session_id = e.session_id AND x.kind = 'session_end'
                    ORDER BY x.seq DESC LIMIT 1)
            FROM events e
            GROUP BY e.session_id
            ORDER BY MIN(e.seq) DESC
            "#,
        )?;

        let rows = stmt
            .query_map([], RawSummary::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter().map(RawSummary::decode).collect()
    }

    /// Sessions whose id starts with `prefix`.
    pub fn find_sessions(&self, prefix: &str) -> Result<Vec<SessionId>> {
        let pattern = format!("{prefix}%");
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT session_id FROM events WHERE session_id LIKE ?1")?;
        let matches = stmt
            .query_map([pattern], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        matches.iter().map(|raw| parse_session_id(raw)).collect()
    }

    /// Number of events stored for a session.
    pub fn count_events(&self, session_id: SessionId) -> Result<usize> {
        let count: Option<i64> = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM events WHERE session_id = ?1",
                [session_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(count.unwrap_or(0) as usize)
    }
}

struct RawEvent {
    id: String,
    session_id: String,
    timestamp: String,
    data: String,
}

impl RawEvent {
    fn decode(self) -> Result<Event> {
        let corrupt = |reason: String| Error::Corrupt {
            id: self.id.clone(),
            reason,
        };
        Ok(Event {
            id: self.id.parse().map_err(|e| corrupt(format!("id: {e}")))?,
            session_id: parse_session_id(&self.session_id)?,
            timestamp: parse_timestamp(&self.timestamp).map_err(corrupt)?,
            kind: serde_json::from_str(&self.data)?,
        })
    }
}

struct RawSummary {
    session_id: String,
    started_at: String,
    ended_at: Option<String>,
    message_count: i64,
    start_data: Option<String>,
    end_data: Option<String>,
}

impl RawSummary {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            session_id: row.get(0)?,
            started_at: row.get(1)?,
            ended_at: row.get(2)?,
            message_count: row.get(3)?,
            start_data: row.get(4)?,
            end_data: row.get(5)?,
        })
    }

    fn decode(self) -> Result<SessionSummary> {
        let corrupt = |reason: String| Error::Corrupt {
            id: self.session_id.clone(),
            reason,
        };

        let task = match decode_kind(self.start_data.as_deref())? {
            Some(EventKind::SessionStart { task }) => Some(task),
            _ => None,
        };
        let status = match decode_kind(self.end_data.as_deref())? {
            Some(EventKind::SessionEnd { status, .. }) => Some(status),
            _ => None,
        };

        Ok(SessionSummary {
            id: parse_session_id(&self.session_id)?,
            started_at: parse_timestamp(&self.started_at).map_err(corrupt)?,
            ended_at: self
                .ended_at
                .as_deref()
                .map(parse_timestamp)
                .transpose()
                .map_err(corrupt)?,
            task,
            status,
            message_count: self.message_count.max(0) as usize,
        })
    }
}

fn decode_kind(data: Option<&str>) -> Result<Option<EventKind>> {
    Ok(data.map(serde_json::from_str).transpose()?)
}

fn parse_session_id(raw: &str) -> Result<SessionId> {
    raw.parse().map_err(|e| Error::Corrupt {
        id: raw.to_string(),
        reason: format!("session id: {e}"),
    })
}

fn parse_timestamp(raw: &str) -> std::result::Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("timestamp: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Role;
    use pretty_assertions::assert_eq;

    fn record_session(store: &EventStore, task: &str, finish: bool) -> SessionId {
        let id = SessionId::new();
        store
            .append(&Event::new(id, EventKind::SessionStart { task: task.into() }))
            .unwrap();
        store.append(&Event::message(id, Role::User, "go")).unwrap();
        store
            .append(&Event::new(
                id,
                EventKind::ToolCall {
                    name: "add".into(),
                    input: serde_json::json!({"a": 2, "b": 2}),
                },
            ))
            .unwrap();
        store.append(&Event::message(id, Role::Assistant, "4")).unwrap();
        if finish {
            store
                .append(&Event::new(
                    id,
                    EventKind::SessionEnd {
                        status: "task_complete".into(),
                        prompt_tokens: 10,
                        completion_tokens: 2,
                    },
                ))
                .unwrap();
        }
        id
    }

    #[test]
    fn events_load_in_append_order() {
        let store = EventStore::in_memory().unwrap();
        let id = record_session(&store, "add numbers", true);

        let names: Vec<_> = store
            .load_session(id)
            .unwrap()
            .iter()
            .map(|e| e.kind.name())
            .collect();
        assert_eq!(
            names,
            vec!["session_start", "message", "tool_call", "message", "session_end"]
        );
    }

    #[test]
    fn kind_filter_restricts_events() {
        let store = EventStore::in_memory().unwrap();
        let id = record_session(&store, "add numbers", true);

        let messages = store.load_events(id, Some("message")).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(store.count_events(id).unwrap(), 5);
    }

    #[test]
    fn list_sessions_summarizes_each_run() {
        let store = EventStore::in_memory().unwrap();
        let first = record_session(&store, "first", true);
        let second = record_session(&store, "second", false);

        let sessions = store.list_sessions().unwrap();
        assert_eq!(sessions.len(), 2);

        assert_eq!(sessions[0].id, second);
        assert_eq!(sessions[0].task.as_deref(), Some("second"));
        assert!(sessions[0].ended_at.is_none());
        assert!(sessions[0].status.is_none());

        assert_eq!(sessions[1].id, first);
        assert_eq!(sessions[1].status.as_deref(), Some("task_complete"));
        assert_eq!(sessions[1].message_count, 2);
    }

    #[test]
    fn find_session_by_prefix() {
        let store = EventStore::in_memory().unwrap();
        let id = record_session(&store, "task", true);
        let prefix = &id.to_string()[..8];

        assert_eq!(store.find_sessions(prefix).unwrap(), vec![id]);
        assert!(store.find_sessions("zzzz").unwrap().is_empty());
    }
}
