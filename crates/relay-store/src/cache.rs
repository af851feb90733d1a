use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use relay_core::limits::DEFAULT_CACHE_TTL;
use relay_core::ThreadId;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// A cached capability outcome. Weakly references its artifact.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub capability: String,
    pub args_hash: String,
    pub preview: Value,
    pub artifact_ref: String,
    pub thread_id: ThreadId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub hit_count: i64,
}

/// Deterministic cache key: first 32 lowercase-hex chars of
/// SHA256(tenant | capability | canonical_args | scope | version).
/// Args canonicalization relies on serde_json's sorted object keys, so
/// identical inputs produce byte-identical keys across processes.
pub fn cache_key(tenant: &str, capability: &str, args: &Value, scope: &str, version: &str) -> String {
    let canonical = args.to_string();
    let digest = Sha256::digest(format!("{tenant}|{capability}|{canonical}|{scope}|{version}"));
    hex::encode(digest)[..32].to_string()
}

pub struct CacheRepo {
    db: Database,
}

impl CacheRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Look up an entry. Expired rows are lazily deleted and reported as a
    /// miss; hits increment the stored count atomically in one statement.
    pub fn get(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        let row = self.db.with_conn(|conn| {
            match conn.query_row(
                "SELECT key, capability, args_hash, preview, artifact_ref, thread_id, created_at, expires_at, hit_count
                 FROM cache WHERE key = ?1",
                [key],
                row_to_entry,
            ) {
                Ok(entry) => entry.map(Some),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })?;

        let Some(mut entry) = row else {
            return Ok(None);
        };

        if Utc::now() > entry.expires_at {
            self.db.with_conn_retry(|conn| {
                conn.execute("DELETE FROM cache WHERE key = ?1", [key])?;
                Ok(())
            })?;
            return Ok(None);
        }

        entry.hit_count = self.db.with_conn_retry(|conn| {
            conn.query_row(
                "UPDATE cache SET hit_count = hit_count + 1 WHERE key = ?1 RETURNING hit_count",
                [key],
                |row| row.get(0),
            )
            .map_err(StoreError::from)
        })?;

        Ok(Some(entry))
    }

    /// Insert or replace an entry. A non-positive TTL falls back to the
    /// 24-hour default.
    pub fn set(
        &self,
        key: &str,
        capability: &str,
        args_hash: &str,
        preview: &Value,
        artifact_ref: &str,
        thread_id: &ThreadId,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let ttl = if ttl.is_zero() { DEFAULT_CACHE_TTL } else { ttl };
        let now = Utc::now();
        let expires_at = now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::hours(24));
        let preview_json = preview.to_string();

        self.db.with_conn_retry(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO cache
                 (key, capability, args_hash, preview, artifact_ref, thread_id, created_at, expires_at, hit_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0)",
                rusqlite::params![
                    key,
                    capability,
                    args_hash,
                    preview_json,
                    artifact_ref,
                    thread_id.as_str(),
                    now.to_rfc3339(),
                    expires_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    pub fn invalidate(&self, key: &str) -> Result<(), StoreError> {
        self.db.with_conn_retry(|conn| {
            conn.execute("DELETE FROM cache WHERE key = ?1", [key])?;
            Ok(())
        })
    }

    /// Remove all expired rows, returning how many were deleted.
    pub fn purge(&self) -> Result<usize, StoreError> {
        self.db.with_conn_retry(|conn| {
            let deleted = conn.execute(
                "DELETE FROM cache WHERE expires_at < ?1",
                [Utc::now().to_rfc3339()],
            )?;
            Ok(deleted)
        })
    }

    /// (total rows, expired rows).
    pub fn stats(&self) -> Result<(i64, i64), StoreError> {
        self.db.with_conn(|conn| {
            let total: i64 = conn.query_row("SELECT COUNT(*) FROM cache", [], |row| row.get(0))?;
            let expired: i64 = conn.query_row(
                "SELECT COUNT(*) FROM cache WHERE expires_at < ?1",
                [Utc::now().to_rfc3339()],
                |row| row.get(0),
            )?;
            Ok((total, expired))
        })
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<CacheEntry, StoreError>> {
    let key: String = row.get(0)?;
    let capability: String = row.get(1)?;
    let args_hash: String = row.get(2)?;
    let preview: String = row.get(3)?;
    let artifact_ref: String = row.get(4)?;
    let thread_id: String = row.get(5)?;
    let created_at: String = row.get(6)?;
    let expires_at: String = row.get(7)?;
    let hit_count: i64 = row.get(8)?;

    Ok((|| {
        Ok(CacheEntry {
            key,
            capability,
            args_hash,
            preview: row_helpers::parse_json(&preview, "cache", "preview")?,
            artifact_ref,
            thread_id: ThreadId::from_raw(thread_id),
            created_at: row_helpers::parse_timestamp(&created_at, "cache", "created_at")?,
            expires_at: row_helpers::parse_timestamp(&expires_at, "cache", "expires_at")?,
            hit_count,
        })
    })())
}
