use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use relay_core::{EventId, EventType, ThreadId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// An immutable event-log record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub thread_id: ThreadId,
    pub r#type: EventType,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

/// Append-only event log. Rows are never updated or deleted; ordering is
/// (timestamp, id) where the id embeds the process-wide monotonic counter.
pub struct EventRepo {
    db: Database,
    base_dir: PathBuf,
}

impl EventRepo {
    pub fn new(db: Database, base_dir: PathBuf) -> Self {
        Self { db, base_dir }
    }

    /// Append one event. Never rejects on content; fails only on storage
    /// errors. Also appends a human-readable line to the per-thread log
    /// file (best effort).
    pub fn append(
        &self,
        thread_id: &ThreadId,
        r#type: EventType,
        payload: Value,
    ) -> Result<Event, StoreError> {
        let event = Event {
            id: EventId::next(),
            thread_id: thread_id.clone(),
            r#type,
            payload,
            timestamp: Utc::now(),
        };

        let payload_json = serde_json::to_string(&event.payload)?;
        self.db.with_conn_retry(|conn| {
            conn.execute(
                "INSERT INTO events (id, thread_id, type, payload, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    event.id.as_str(),
                    event.thread_id.as_str(),
                    event.r#type.as_str(),
                    payload_json,
                    event.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
                ],
            )?;
            Ok(())
        })?;

        let _ = self.append_log_line(&event, &payload_json);
        Ok(event)
    }

    /// Events for a thread in ascending time order, optionally filtered by
    /// type. A limit of 0 means no limit.
    pub fn list(
        &self,
        thread_id: &ThreadId,
        types: &[EventType],
        limit: usize,
    ) -> Result<Vec<Event>, StoreError> {
        let mut sql = String::from(
            "SELECT id, thread_id, type, payload, timestamp FROM events WHERE thread_id = ?1",
        );
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> =
            vec![Box::new(thread_id.as_str().to_string())];

        if !types.is_empty() {
            let placeholders: Vec<String> = types
                .iter()
                .map(|t| {
                    params.push(Box::new(t.as_str().to_string()));
                    format!("?{}", params.len())
                })
                .collect();
            sql.push_str(&format!(" AND type IN ({})", placeholders.join(",")));
        }

        sql.push_str(" ORDER BY timestamp ASC, id ASC");
        if limit > 0 {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        self.query_events(&sql, &params)
    }

    /// Events strictly newer than the timestamp of `after_id`.
    pub fn since(
        &self,
        thread_id: &ThreadId,
        after_id: &EventId,
        limit: usize,
    ) -> Result<Vec<Event>, StoreError> {
        let after_ts: Option<String> = self.db.with_conn(|conn| {
            match conn.query_row(
                "SELECT timestamp FROM events WHERE id = ?1",
                [after_id.as_str()],
                |row| row.get(0),
            ) {
                Ok(ts) => Ok(Some(ts)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })?;

        let mut sql = String::from(
            "SELECT id, thread_id, type, payload, timestamp FROM events WHERE thread_id = ?1",
        );
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> =
            vec![Box::new(thread_id.as_str().to_string())];
        if let Some(ts) = after_ts {
            params.push(Box::new(ts));
            sql.push_str(&format!(" AND timestamp > ?{}", params.len()));
        }
        sql.push_str(" ORDER BY timestamp ASC, id ASC");
        if limit > 0 {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        self.query_events(&sql, &params)
    }

    pub fn mark_checkpoint(&self, thread_id: &ThreadId, label: &str) -> Result<Event, StoreError> {
        self.append(
            thread_id,
            EventType::CheckpointCreated,
            serde_json::json!({ "label": label }),
        )
    }

    fn query_events(
        &self,
        sql: &str,
        params: &[Box<dyn rusqlite::types::ToSql>],
    ) -> Result<Vec<Event>, StoreError> {
        self.db.with_conn(|conn| {
            let param_refs: Vec<&dyn rusqlite::types::ToSql> =
                params.iter().map(|p| p.as_ref()).collect();
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt
                .query_map(param_refs.as_slice(), row_to_event)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().collect()
        })
    }

    fn append_log_line(&self, event: &Event, payload_json: &str) -> Result<(), StoreError> {
        let dir = self.base_dir.join("threads").join(event.thread_id.as_str());
        std::fs::create_dir_all(&dir)?;
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(dir.join("events.log"))?;
        writeln!(
            file,
            "[{}] {} {} {}",
            event.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            event.id,
            event.r#type,
            payload_json
        )?;
        Ok(())
    }
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<Event, StoreError>> {
    let id: String = row.get(0)?;
    let thread_id: String = row.get(1)?;
    let r#type: String = row.get(2)?;
    let payload: String = row.get(3)?;
    let timestamp: String = row.get(4)?;

    Ok((|| {
        Ok(Event {
            id: EventId::from_raw(id),
            thread_id: ThreadId::from_raw(thread_id),
            r#type: r#type.parse().map_err(|_| StoreError::CorruptRow {
                table: "events",
                column: "type",
                detail: format!("unknown variant: {}", r#type),
            })?,
            payload: row_helpers::parse_json(&payload, "events", "payload")?,
            timestamp: row_helpers::parse_timestamp(&timestamp, "events", "timestamp")?,
        })
    })())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn setup() -> (EventRepo, ThreadId, PathBuf) {
        let dir = std::env::temp_dir().join(format!("relay-events-test-{}", uuid::Uuid::now_v7()));
        let repo = EventRepo::new(Database::in_memory().unwrap(), dir.clone());
        (repo, ThreadId::new(), dir)
    }

    #[test]
    fn append_assigns_ordered_ids() {
        let (repo, tid, dir) = setup();
        let e1 = repo.append(&tid, EventType::ThreadCreated, json!({})).unwrap();
        let e2 = repo
            .append(&tid, EventType::StatePatchApplied, json!({"ops": 1, "version": 2}))
            .unwrap();
        assert!(e1.id.as_str() < e2.id.as_str());
        assert!(e1.timestamp <= e2.timestamp);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn list_ascending_order() {
        let (repo, tid, dir) = setup();
        for i in 0..5 {
            repo.append(&tid, EventType::MessageReceived, json!({"n": i})).unwrap();
        }
        let events = repo.list(&tid, &[], 0).unwrap();
        assert_eq!(events.len(), 5);
        for (i, e) in events.iter().enumerate() {
            assert_eq!(e.payload["n"], i as i64);
        }
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn list_filters_by_type() {
        let (repo, tid, dir) = setup();
        repo.append(&tid, EventType::ThreadCreated, json!({})).unwrap();
        repo.append(&tid, EventType::ArtifactCreated, json!({})).unwrap();
        repo.append(&tid, EventType::ArtifactCreated, json!({})).unwrap();

        let events = repo
            .list(&tid, &[EventType::ArtifactCreated], 0)
            .unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.r#type == EventType::ArtifactCreated));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn list_respects_limit() {
        let (repo, tid, dir) = setup();
        for _ in 0..5 {
            repo.append(&tid, EventType::MessageReceived, json!({})).unwrap();
        }
        assert_eq!(repo.list(&tid, &[], 2).unwrap().len(), 2);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn since_returns_strictly_newer() {
        let (repo, tid, dir) = setup();
        let mut ids = Vec::new();
        for i in 0..5 {
            std::thread::sleep(std::time::Duration::from_millis(2));
            ids.push(repo.append(&tid, EventType::MessageReceived, json!({"n": i})).unwrap().id);
        }
        let newer = repo.since(&tid, &ids[2], 0).unwrap();
        assert_eq!(newer.len(), 2);
        assert_eq!(newer[0].payload["n"], 3);
        assert_eq!(newer[1].payload["n"], 4);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn since_unknown_id_returns_all() {
        let (repo, tid, dir) = setup();
        repo.append(&tid, EventType::MessageReceived, json!({})).unwrap();
        let all = repo.since(&tid, &EventId::from_raw("ffffffffffffff000000"), 0).unwrap();
        assert_eq!(all.len(), 1);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn checkpoint_event() {
        let (repo, tid, dir) = setup();
        let e = repo.mark_checkpoint(&tid, "before-refactor").unwrap();
        assert_eq!(e.r#type, EventType::CheckpointCreated);
        assert_eq!(e.payload["label"], "before-refactor");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn log_file_mirrors_appends() {
        let (repo, tid, dir) = setup();
        repo.append(&tid, EventType::ThreadCreated, json!({"name": "t"})).unwrap();
        repo.append(&tid, EventType::CheckpointCreated, json!({"label": "x"})).unwrap();

        let log = std::fs::read_to_string(
            dir.join("threads").join(tid.as_str()).join("events.log"),
        )
        .unwrap();
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("thread.created"));
        assert!(lines[1].contains("checkpoint.created"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn nanosecond_timestamps_roundtrip() {
        let (repo, tid, dir) = setup();
        let e = repo.append(&tid, EventType::MessageReceived, json!({})).unwrap();
        let listed = repo.list(&tid, &[], 0).unwrap();
        assert_eq!(listed[0].timestamp, e.timestamp);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
