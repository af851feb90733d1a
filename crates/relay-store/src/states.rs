use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::debug;

use relay_core::patch::{apply_patch, validate_patch, PatchOp};
use relay_core::{State, ThreadId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Per-thread write lock so read-modify-write patch cycles are serialized.
/// The plain INSERT on the (thread_id, version) primary key backstops this:
/// a concurrent writer that slips past the lock surfaces as Conflict instead
/// of silently overwriting a version.
struct ThreadLocks {
    locks: HashMap<String, Arc<Mutex<()>>>,
}

impl ThreadLocks {
    fn new() -> Self {
        Self {
            locks: HashMap::new(),
        }
    }

    fn get(&mut self, thread_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(thread_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

pub struct StateRepo {
    db: Database,
    base_dir: PathBuf,
    thread_locks: Mutex<ThreadLocks>,
}

impl StateRepo {
    pub fn new(db: Database, base_dir: PathBuf) -> Self {
        Self {
            db,
            base_dir,
            thread_locks: Mutex::new(ThreadLocks::new()),
        }
    }

    /// Insert the empty canonical state at version 1.
    pub fn create(&self, thread_id: &ThreadId) -> Result<State, StoreError> {
        let state = State::new(thread_id.as_str());
        self.put(&state)?;
        Ok(state)
    }

    /// The highest-version state for a thread.
    pub fn get(&self, thread_id: &ThreadId) -> Result<State, StoreError> {
        self.db.with_conn(|conn| {
            let data: String = conn
                .query_row(
                    "SELECT data FROM states WHERE thread_id = ?1 ORDER BY version DESC LIMIT 1",
                    [thread_id.as_str()],
                    |row| row.get(0),
                )
                .map_err(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => {
                        StoreError::NotFound(format!("state for thread {thread_id}"))
                    }
                    other => other.into(),
                })?;
            row_helpers::parse_json(&data, "states", "data")
        })
    }

    /// Validate and apply a patch against the latest state, persist the
    /// result as the next version, and mirror it to state.json.
    pub fn patch(&self, thread_id: &ThreadId, ops: &[PatchOp]) -> Result<State, StoreError> {
        validate_patch(ops)?;

        let lock = self.thread_locks.lock().get(thread_id.as_str());
        let _guard = lock.lock();

        let current = self.get(thread_id)?;
        let next = apply_patch(&current, ops)?;
        self.put(&next)?;
        debug!(thread = %thread_id, version = next.version, ops = ops.len(), "state patched");
        Ok(next)
    }

    /// Persist a state row. The version must not already exist; a concurrent
    /// writer racing to the same version surfaces as Conflict.
    pub fn put(&self, state: &State) -> Result<(), StoreError> {
        let data = serde_json::to_string(state)?;
        let thread_id = state.thread_id.clone();
        let version = state.version;

        self.db.with_conn_retry(|conn| {
            conn.execute(
                "INSERT INTO states (thread_id, version, data, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![thread_id, version, data, Utc::now().to_rfc3339()],
            )
            .map_err(|e| {
                StoreError::from(e)
                    .or_conflict(|| format!("state version {version} for thread {thread_id}"))
            })?;
            Ok(())
        })?;

        self.write_mirror(state)?;
        Ok(())
    }

    /// Mirror the latest state as pretty-printed JSON for transparency.
    fn write_mirror(&self, state: &State) -> Result<(), StoreError> {
        let dir = self.base_dir.join("threads").join(&state.thread_id);
        std::fs::create_dir_all(&dir)?;
        let pretty = serde_json::to_string_pretty(state)?;
        std::fs::write(dir.join("state.json"), pretty)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn setup() -> (StateRepo, ThreadId) {
        let dir = std::env::temp_dir().join(format!("relay-states-test-{}", uuid::Uuid::now_v7()));
        let repo = StateRepo::new(Database::in_memory().unwrap(), dir);
        (repo, ThreadId::new())
    }

    fn add_fact(id: &str) -> PatchOp {
        PatchOp {
            op: "add".into(),
            path: "/facts/-".into(),
            value: json!({"id": id, "key": "phase", "value": "init"}),
            from: None,
        }
    }

    #[test]
    fn create_then_get() {
        let (repo, tid) = setup();
        let created = repo.create(&tid).unwrap();
        assert_eq!(created.version, 1);

        let fetched = repo.get(&tid).unwrap();
        assert_eq!(fetched.version, 1);
        assert_eq!(fetched.thread_id, tid.as_str());
    }

    #[test]
    fn get_without_create_is_not_found() {
        let (repo, tid) = setup();
        assert!(matches!(repo.get(&tid), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn patch_advances_version() {
        let (repo, tid) = setup();
        repo.create(&tid).unwrap();

        let next = repo.patch(&tid, &[add_fact("f1")]).unwrap();
        assert_eq!(next.version, 2);
        assert_eq!(next.facts.len(), 1);
        assert_eq!(next.facts[0].key, "phase");

        // get returns the new version.
        assert_eq!(repo.get(&tid).unwrap().version, 2);
    }

    #[test]
    fn invalid_patch_leaves_state_unchanged() {
        let (repo, tid) = setup();
        repo.create(&tid).unwrap();

        let bad = PatchOp {
            op: "merge".into(),
            path: "/facts".into(),
            value: json!([]),
            from: None,
        };
        assert!(matches!(
            repo.patch(&tid, &[bad]),
            Err(StoreError::Patch(_))
        ));
        assert_eq!(repo.get(&tid).unwrap().version, 1);
    }

    #[test]
    fn duplicate_version_is_conflict() {
        let (repo, tid) = setup();
        let state = repo.create(&tid).unwrap();
        let err = repo.put(&state).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn mirror_file_written() {
        let (repo, tid) = setup();
        repo.create(&tid).unwrap();
        repo.patch(&tid, &[add_fact("f1")]).unwrap();

        let path = repo
            .base_dir
            .join("threads")
            .join(tid.as_str())
            .join("state.json");
        let contents = std::fs::read_to_string(&path).unwrap();
        let parsed: State = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed.version, 2);
        let _ = std::fs::remove_dir_all(&repo.base_dir);
    }

    #[test]
    fn version_dense_across_patch_sequence() {
        let (repo, tid) = setup();
        repo.create(&tid).unwrap();
        for i in 0..5 {
            repo.patch(&tid, &[add_fact(&format!("f{i}"))]).unwrap();
        }
        let st = repo.get(&tid).unwrap();
        assert_eq!(st.version, 6);
        assert_eq!(st.facts.len(), 5);
    }

    #[test]
    fn concurrent_patches_serialized() {
        let dir = std::env::temp_dir().join(format!("relay-states-test-{}", uuid::Uuid::now_v7()));
        let repo = Arc::new(StateRepo::new(Database::in_memory().unwrap(), dir));
        let tid = ThreadId::new();
        repo.create(&tid).unwrap();

        let mut handles = vec![];
        for i in 0..8 {
            let repo = repo.clone();
            let tid = tid.clone();
            handles.push(std::thread::spawn(move || {
                repo.patch(&tid, &[add_fact(&format!("f{i}"))]).unwrap()
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        let st = repo.get(&tid).unwrap();
        assert_eq!(st.version, 9);
        assert_eq!(st.facts.len(), 8);
    }
}
