use rusqlite::ErrorCode;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid patch: {0}")]
    Patch(#[from] relay_core::PatchError),

    #[error("corrupt row in {table}.{column}: {detail}")]
    CorruptRow {
        table: &'static str,
        column: &'static str,
        detail: String,
    },
}

impl StoreError {
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Database(_) => "database",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Serialization(_) => "serialization",
            Self::Io(_) => "io",
            Self::Patch(_) => "patch",
            Self::CorruptRow { .. } => "corrupt_row",
        }
    }

    /// Transient SQLite contention; callers may retry with backoff.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            Self::Database(rusqlite::Error::SqliteFailure(e, _))
                if e.code == ErrorCode::DatabaseBusy || e.code == ErrorCode::DatabaseLocked
        )
    }

    /// Map a unique/primary-key violation to a Conflict with context.
    pub fn or_conflict(self, what: impl FnOnce() -> String) -> Self {
        match &self {
            Self::Database(rusqlite::Error::SqliteFailure(e, _))
                if e.code == ErrorCode::ConstraintViolation =>
            {
                Self::Conflict(what())
            }
            _ => self,
        }
    }
}
