/// SQL DDL for the relay database.
/// WAL mode + foreign keys enabled at connection time.
pub const SCHEMA_VERSION: u32 = 1;

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS threads (
    id         TEXT PRIMARY KEY,
    name       TEXT,
    created_at TEXT NOT NULL,
    hop_count  INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS states (
    thread_id  TEXT NOT NULL,
    version    INTEGER NOT NULL,
    data       TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (thread_id, version)
);

CREATE TABLE IF NOT EXISTS artifacts (
    ref             TEXT PRIMARY KEY,
    thread_id       TEXT NOT NULL,
    type            TEXT NOT NULL,
    mime            TEXT NOT NULL,
    name            TEXT,
    size            INTEGER NOT NULL,
    hash            TEXT NOT NULL,
    preview_json    TEXT NOT NULL,
    provenance_json TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    path            TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS events (
    id        TEXT PRIMARY KEY,
    thread_id TEXT NOT NULL,
    type      TEXT NOT NULL,
    payload   TEXT NOT NULL,
    timestamp TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS cache (
    key          TEXT PRIMARY KEY,
    capability   TEXT NOT NULL,
    args_hash    TEXT NOT NULL,
    preview      TEXT NOT NULL,
    artifact_ref TEXT NOT NULL,
    thread_id    TEXT NOT NULL,
    created_at   TEXT NOT NULL,
    expires_at   TEXT NOT NULL,
    hit_count    INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_states_thread ON states(thread_id);
CREATE INDEX IF NOT EXISTS idx_artifacts_thread ON artifacts(thread_id);
CREATE INDEX IF NOT EXISTS idx_artifacts_hash ON artifacts(hash);
CREATE INDEX IF NOT EXISTS idx_events_thread ON events(thread_id);
CREATE INDEX IF NOT EXISTS idx_events_type ON events(type);
CREATE INDEX IF NOT EXISTS idx_events_ts ON events(timestamp);
CREATE INDEX IF NOT EXISTS idx_cache_capability ON cache(capability);
CREATE INDEX IF NOT EXISTS idx_cache_expires ON cache(expires_at);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
"#;

pub const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
"#;
