use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use relay_core::limits::MAX_PREVIEW_BYTES;
use relay_core::sanitize::{count_ignore_ascii_case, find_ignore_ascii_case, sanitize};
use relay_core::{ArtifactRef, ThreadId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

const PREVIEW_ELLIPSIS: &str = "\n...";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    ToolOutput,
    Email,
    Markdown,
    Json,
    Html,
    Text,
    Binary,
}

impl ArtifactType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ToolOutput => "tool_output",
            Self::Email => "email",
            Self::Markdown => "markdown",
            Self::Json => "json",
            Self::Html => "html",
            Self::Text => "text",
            Self::Binary => "binary",
        }
    }
}

impl std::fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ArtifactType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tool_output" => Ok(Self::ToolOutput),
            "email" => Ok(Self::Email),
            "markdown" => Ok(Self::Markdown),
            "json" => Ok(Self::Json),
            "html" => Ok(Self::Html),
            "text" => Ok(Self::Text),
            "binary" => Ok(Self::Binary),
            other => Err(format!("unknown artifact type: {other}")),
        }
    }
}

/// Bounded, sanitized summary of artifact content, derived once at write.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Preview {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub line_count: i64,
    #[serde(default)]
    pub truncated: bool,
    #[serde(default)]
    pub size: i64,
}

fn is_zero(n: &i64) -> bool {
    *n == 0
}

/// Where an artifact came from.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Provenance {
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_refs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability: Option<String>,
}

impl Provenance {
    pub fn new(created_by: &str) -> Self {
        Self {
            created_by: created_by.to_string(),
            created_at: Utc::now(),
            source_refs: Vec::new(),
            capability: None,
        }
    }

    pub fn capability(name: &str) -> Self {
        Self {
            capability: Some(name.to_string()),
            ..Self::new(name)
        }
    }
}

/// Stored artifact metadata. The blob itself lives on disk at `path`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Artifact {
    pub r#ref: ArtifactRef,
    pub thread_id: ThreadId,
    pub r#type: ArtifactType,
    pub mime: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub size: i64,
    pub hash: String,
    pub preview: Preview,
    pub provenance: Provenance,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub path: PathBuf,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchResult {
    pub r#ref: ArtifactRef,
    pub r#type: ArtifactType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub snippet: String,
    pub score: usize,
}

pub struct ArtifactRepo {
    db: Database,
    base_dir: PathBuf,
}

impl ArtifactRepo {
    pub fn new(db: Database, base_dir: PathBuf) -> Self {
        Self { db, base_dir }
    }

    /// Store a new artifact: read the stream fully, hash, write via a temp
    /// file and atomic rename, then insert the metadata row. Any failure
    /// rolls the on-disk file back; a ref collision is rejected as Conflict.
    pub fn put(
        &self,
        thread_id: &ThreadId,
        name: Option<&str>,
        atype: ArtifactType,
        mime: &str,
        reader: &mut dyn Read,
        provenance: Provenance,
    ) -> Result<Artifact, StoreError> {
        let r#ref = ArtifactRef::generate();
        let dir = self
            .base_dir
            .join("threads")
            .join(thread_id.as_str())
            .join("artifacts");
        std::fs::create_dir_all(&dir)?;

        let mut content = Vec::new();
        reader.read_to_end(&mut content)?;

        let path = dir.join(format!("{}{}", r#ref, ext_for_type(atype, mime)));
        let tmp = path.with_extension("tmp");
        if let Err(e) = std::fs::write(&tmp, &content) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        if let Err(e) = std::fs::rename(&tmp, &path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }

        let hash = hex::encode(Sha256::digest(&content));
        let preview = generate_preview(&content, atype);

        let artifact = Artifact {
            r#ref: r#ref.clone(),
            thread_id: thread_id.clone(),
            r#type: atype,
            mime: mime.to_string(),
            name: name.map(str::to_string),
            size: content.len() as i64,
            hash,
            preview,
            provenance,
            created_at: Utc::now(),
            path: path.clone(),
        };

        if let Err(e) = self.insert_row(&artifact) {
            let _ = std::fs::remove_file(&path);
            return Err(e);
        }

        debug!(thread = %thread_id, artifact_ref = %artifact.r#ref, size = artifact.size, "artifact stored");
        Ok(artifact)
    }

    fn insert_row(&self, art: &Artifact) -> Result<(), StoreError> {
        let preview_json = serde_json::to_string(&art.preview)?;
        let provenance_json = serde_json::to_string(&art.provenance)?;
        self.db.with_conn_retry(|conn| {
            conn.execute(
                "INSERT INTO artifacts
                 (ref, thread_id, type, mime, name, size, hash, preview_json, provenance_json, created_at, path)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                rusqlite::params![
                    art.r#ref.as_str(),
                    art.thread_id.as_str(),
                    art.r#type.as_str(),
                    art.mime,
                    art.name,
                    art.size,
                    art.hash,
                    preview_json,
                    provenance_json,
                    art.created_at.to_rfc3339(),
                    art.path.to_string_lossy(),
                ],
            )
            .map_err(|e| {
                StoreError::from(e).or_conflict(|| format!("artifact ref {}", art.r#ref))
            })?;
            Ok(())
        })
    }

    pub fn get(&self, thread_id: &ThreadId, r#ref: &ArtifactRef) -> Result<Artifact, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT ref, thread_id, type, mime, name, size, hash, preview_json, provenance_json, created_at, path
                 FROM artifacts WHERE thread_id = ?1 AND ref = ?2",
                rusqlite::params![thread_id.as_str(), r#ref.as_str()],
                row_to_artifact,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    StoreError::NotFound(format!("artifact {} in thread {}", r#ref, thread_id))
                }
                other => other.into(),
            })?
        })
    }

    /// Reader over the stored blob.
    pub fn open(&self, thread_id: &ThreadId, r#ref: &ArtifactRef) -> Result<std::fs::File, StoreError> {
        let art = self.get(thread_id, r#ref)?;
        Ok(std::fs::File::open(&art.path)?)
    }

    /// All artifacts for a thread, newest first.
    pub fn list(&self, thread_id: &ThreadId) -> Result<Vec<Artifact>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT ref, thread_id, type, mime, name, size, hash, preview_json, provenance_json, created_at, path
                 FROM artifacts WHERE thread_id = ?1 ORDER BY created_at DESC, ref DESC",
            )?;
            let rows = stmt
                .query_map([thread_id.as_str()], row_to_artifact)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().collect()
        })
    }

    /// Case-insensitive substring scan over the full content of every
    /// non-binary artifact whose file still exists. Linear with early
    /// termination at `limit`; large corpora are out of scope.
    pub fn search_full(
        &self,
        thread_id: &ThreadId,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchResult>, StoreError> {
        let artifacts = self.list(thread_id)?;
        let mut results = Vec::new();

        for art in artifacts {
            if art.r#type == ArtifactType::Binary {
                continue;
            }
            let Ok(bytes) = std::fs::read(&art.path) else {
                continue;
            };
            let Ok(content) = String::from_utf8(bytes) else {
                continue;
            };
            let Some(idx) = find_ignore_ascii_case(&content, query, 0) else {
                continue;
            };

            let start = floor_char_boundary(&content, idx.saturating_sub(100));
            let end = ceil_char_boundary(&content, (idx + 200).min(content.len()));
            results.push(SearchResult {
                r#ref: art.r#ref.clone(),
                r#type: art.r#type,
                name: art.name.clone(),
                snippet: content[start..end].trim().to_string(),
                score: count_ignore_ascii_case(&content, query),
            });

            if results.len() >= limit {
                break;
            }
        }
        Ok(results)
    }
}

fn row_to_artifact(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<Artifact, StoreError>> {
    let r#ref: String = row.get(0)?;
    let thread_id: String = row.get(1)?;
    let r#type: String = row.get(2)?;
    let mime: String = row.get(3)?;
    let name: Option<String> = row.get(4)?;
    let size: i64 = row.get(5)?;
    let hash: String = row.get(6)?;
    let preview_json: String = row.get(7)?;
    let provenance_json: String = row.get(8)?;
    let created_at: String = row.get(9)?;
    let path: String = row.get(10)?;

    Ok((|| {
        Ok(Artifact {
            r#ref: ArtifactRef::from_raw(r#ref),
            thread_id: ThreadId::from_raw(thread_id),
            r#type: r#type.parse().map_err(|_| StoreError::CorruptRow {
                table: "artifacts",
                column: "type",
                detail: format!("unknown variant: {}", r#type),
            })?,
            mime,
            name,
            size,
            hash,
            preview: row_helpers::parse_json(&preview_json, "artifacts", "preview_json")?,
            provenance: row_helpers::parse_json(&provenance_json, "artifacts", "provenance_json")?,
            created_at: row_helpers::parse_timestamp(&created_at, "artifacts", "created_at")?,
            path: PathBuf::from(path),
        })
    })())
}

/// Derive the bounded preview from the full in-memory content.
pub fn generate_preview(content: &[u8], atype: ArtifactType) -> Preview {
    let size = content.len() as i64;

    let text = match atype {
        ArtifactType::Binary => None,
        _ => std::str::from_utf8(content).ok(),
    };
    let Some(text) = text else {
        return Preview {
            text: format!("[binary, {} bytes]", content.len()),
            line_count: 0,
            truncated: true,
            size,
        };
    };

    let text = sanitize(text);
    let line_count = text.split('\n').count() as i64;

    if text.len() > MAX_PREVIEW_BYTES {
        // Truncate on a line boundary inside the window where one exists.
        let limit = floor_char_boundary(&text, MAX_PREVIEW_BYTES - PREVIEW_ELLIPSIS.len());
        let window = &text[..limit];
        let cut = match window.rfind('\n') {
            Some(idx) if idx > 0 => idx,
            _ => limit,
        };
        Preview {
            text: format!("{}{PREVIEW_ELLIPSIS}", &text[..cut]),
            line_count,
            truncated: true,
            size,
        }
    } else {
        Preview {
            text,
            line_count,
            truncated: false,
            size,
        }
    }
}

fn ext_for_type(atype: ArtifactType, mime: &str) -> &'static str {
    match atype {
        ArtifactType::Markdown => ".md",
        ArtifactType::Json => ".json",
        ArtifactType::Html => ".html",
        ArtifactType::Text | ArtifactType::ToolOutput => ".txt",
        ArtifactType::Email => ".eml",
        ArtifactType::Binary => {
            if mime.contains("pdf") {
                ".pdf"
            } else {
                ".bin"
            }
        }
    }
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx < s.len() && !s.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}
