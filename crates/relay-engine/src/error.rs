use relay_core::compact::IntegrityError;
use relay_core::limits::LimitError;
use relay_store::StoreError;

/// Engine-level error taxonomy. `status_code()` gives the HTTP-equivalent
/// surfacing for callers at the daemon boundary.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    #[error("quota exceeded: {0}")]
    Quota(String),

    #[error("storage: {0}")]
    Store(StoreError),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    #[error("cancelled")]
    Cancelled,
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => Self::NotFound(what),
            StoreError::Patch(e) => Self::Validation(e.to_string()),
            other => Self::Store(other),
        }
    }
}

impl From<LimitError> for EngineError {
    fn from(err: LimitError) -> Self {
        match err {
            LimitError::HopLimitExceeded { .. } => Self::Quota(err.to_string()),
            other => Self::Validation(other.to_string()),
        }
    }
}

impl EngineError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Validation(_) => "validation",
            Self::Integrity(_) => "integrity",
            Self::Quota(_) => "quota",
            Self::Store(_) => "storage",
            Self::Serialization(_) => "serialization",
            Self::Http(_) => "http",
            Self::Cancelled => "cancelled",
        }
    }

    /// HTTP-equivalent status for surfacing at the caller boundary.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::Validation(_) => 400,
            Self::Integrity(_) => 500,
            Self::Quota(_) => 429,
            Self::Store(e) if e.is_busy() => 503,
            Self::Store(_) | Self::Serialization(_) => 500,
            Self::Http(_) => 502,
            Self::Cancelled => 499,
        }
    }

    /// Transient failures worth a bounded retry with backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_busy(),
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_not_found_maps_to_not_found() {
        let err = EngineError::from(StoreError::NotFound("thread th_x".into()));
        assert!(matches!(err, EngineError::NotFound(_)));
        assert_eq!(err.status_code(), 404);
    }

    #[test]
    fn patch_error_maps_to_validation() {
        let patch_err = relay_core::patch::PatchError::MissingPath { index: 0 };
        let err = EngineError::from(StoreError::Patch(patch_err));
        assert!(matches!(err, EngineError::Validation(_)));
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn hop_limit_maps_to_quota() {
        let err = EngineError::from(LimitError::HopLimitExceeded { hops: 50, max: 50 });
        assert!(matches!(err, EngineError::Quota(_)));
        assert_eq!(err.status_code(), 429);
    }

    #[test]
    fn envelope_errors_map_to_validation() {
        let err = EngineError::from(LimitError::MissingField("schema"));
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn integrity_is_server_error() {
        let err = EngineError::from(IntegrityError {
            artifact_ref: "r1".into(),
        });
        assert_eq!(err.status_code(), 500);
        assert!(!err.is_retryable());
        assert_eq!(err.error_kind(), "integrity");
    }

    #[test]
    fn busy_store_is_retryable() {
        let busy = StoreError::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        ));
        let err = EngineError::from(busy);
        assert!(err.is_retryable());
        assert_eq!(err.status_code(), 503);
    }
}
