//! Persisted workflow events.

use rusqlite::params;
use serde::Serialize;
use serde_json::Value;

use super::database::{Database, json_column, now_rfc3339};
use crate::types::{Result, ResultExt};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventRecord {
    pub id: i64,
    pub project_id: String,
    pub event_type: String,
    pub payload: Value,
    pub published_at: String,
}

impl Database {
    /// Append an event; returns the stored record
    pub fn insert_event(&self, project_id: &str, event_type: &str, payload: &Value) -> Result<EventRecord> {
        let text = serde_json::to_string(payload)?;
        let published_at = now_rfc3339();
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO events (project_id, event_type, payload, published_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![project_id, event_type, text, published_at],
        )
        .with_context("Failed to insert event")?;

        Ok(EventRecord {
            id: conn.last_insert_rowid(),
            project_id: project_id.to_string(),
            event_type: event_type.to_string(),
            payload: payload.clone(),
            published_at,
        })
    }

    /// Latest `limit` events of a project, newest first
    pub fn recent_events(&self, project_id: &str, limit: usize) -> Result<Vec<EventRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, project_id, event_type, payload, published_at
                 FROM events WHERE project_id = ?1 ORDER BY id DESC LIMIT ?2",
            )
            .with_context("Failed to prepare events query")?;

        let rows = stmt
            .query_map(params![project_id, limit as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()
            .with_context("Failed to fetch events")?;

        let mut events = Vec::with_capacity(rows.len());
        for (id, project_id, event_type, payload, published_at) in rows {
            events.push(EventRecord {
                payload: json_column(Some(payload), "event payload")?.unwrap_or(Value::Null),
                id,
                project_id,
                event_type,
                published_at,
            });
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_events_newest_first() {
        let db = Database::open_in_memory_initialized().unwrap();
        db.insert_event("proj", "workflow_started", &json!({"workflow_id": "r1"}))
            .unwrap();
        let last = db
            .insert_event("proj", "workflow_completed", &json!({"workflow_id": "r1"}))
            .unwrap();
        db.insert_event("other", "workflow_started", &json!({})).unwrap();

        let events = db.recent_events("proj", 10).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], last);
        assert_eq!(events[1].event_type, "workflow_started");
        assert_eq!(db.recent_events("proj", 1).unwrap().len(), 1);
    }
}
