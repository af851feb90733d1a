use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use relay_core::ThreadId;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Identity and lifecycle root for a session. Never deleted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Thread {
    pub id: ThreadId,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub hop_count: i64,
}

pub struct ThreadRepo {
    db: Database,
}

impl ThreadRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn create(&self, name: Option<&str>) -> Result<Thread, StoreError> {
        let id = ThreadId::new();
        let now = Utc::now();
        self.db.with_conn_retry(|conn| {
            conn.execute(
                "INSERT INTO threads (id, name, created_at, hop_count) VALUES (?1, ?2, ?3, 0)",
                rusqlite::params![id.as_str(), name, now.to_rfc3339()],
            )
            .map_err(|e| StoreError::from(e).or_conflict(|| format!("thread {id}")))?;
            Ok(Thread {
                id: id.clone(),
                name: name.map(str::to_string),
                created_at: now,
                hop_count: 0,
            })
        })
    }

    pub fn get(&self, id: &ThreadId) -> Result<Thread, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, name, created_at, hop_count FROM threads WHERE id = ?1",
                [id.as_str()],
                row_to_thread,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    StoreError::NotFound(format!("thread {id}"))
                }
                other => other.into(),
            })?
        })
    }

    pub fn list(&self, limit: u32) -> Result<Vec<Thread>, StoreError> {
        let limit = if limit == 0 { 100 } else { limit };
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, created_at, hop_count FROM threads
                 ORDER BY created_at DESC, id DESC LIMIT ?1",
            )?;
            let rows = stmt
                .query_map([limit], row_to_thread)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().collect()
        })
    }

    /// Increment the hop counter and return the new value.
    pub fn increment_hops(&self, id: &ThreadId) -> Result<i64, StoreError> {
        self.db.with_conn_retry(|conn| {
            conn.query_row(
                "UPDATE threads SET hop_count = hop_count + 1 WHERE id = ?1 RETURNING hop_count",
                [id.as_str()],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    StoreError::NotFound(format!("thread {id}"))
                }
                other => other.into(),
            })
        })
    }
}

fn row_to_thread(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<Thread, StoreError>> {
    let id: String = row.get(0)?;
    let name: Option<String> = row.get(1)?;
    let created_at: String = row.get(2)?;
    let hop_count: i64 = row.get(3)?;
    Ok(
        row_helpers::parse_timestamp(&created_at, "threads", "created_at").map(|created_at| {
            Thread {
                id: ThreadId::from_raw(id),
                name,
                created_at,
                hop_count,
            }
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_get() {
        let repo = ThreadRepo::new(Database::in_memory().unwrap());
        let t = repo.create(Some("research")).unwrap();
        assert!(t.id.as_str().starts_with("th_"));
        assert_eq!(t.hop_count, 0);

        let fetched = repo.get(&t.id).unwrap();
        assert_eq!(fetched.id, t.id);
        assert_eq!(fetched.name.as_deref(), Some("research"));
    }

    #[test]
    fn get_missing_is_not_found() {
        let repo = ThreadRepo::new(Database::in_memory().unwrap());
        let err = repo.get(&ThreadId::from_raw("th_missing")).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn list_newest_first() {
        let repo = ThreadRepo::new(Database::in_memory().unwrap());
        for i in 0..3 {
            repo.create(Some(&format!("t{i}"))).unwrap();
        }
        let threads = repo.list(10).unwrap();
        assert_eq!(threads.len(), 3);
        assert!(threads[0].created_at >= threads[2].created_at);
    }

    #[test]
    fn hop_counter_monotonic() {
        let repo = ThreadRepo::new(Database::in_memory().unwrap());
        let t = repo.create(None).unwrap();
        assert_eq!(repo.increment_hops(&t.id).unwrap(), 1);
        assert_eq!(repo.increment_hops(&t.id).unwrap(), 2);
        assert_eq!(repo.get(&t.id).unwrap().hop_count, 2);
    }

    #[test]
    fn increment_missing_thread_fails() {
        let repo = ThreadRepo::new(Database::in_memory().unwrap());
        let err = repo.increment_hops(&ThreadId::from_raw("th_nope")).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
