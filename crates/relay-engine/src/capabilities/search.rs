use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use relay_store::{ArtifactRepo, ArtifactType, Provenance};

use crate::error::EngineError;
use crate::registry::{CapabilityDescriptor, CapabilityHandler, HandlerOutput, InvokeRequest};

const NAME: &str = "retrieval.search";
const DEFAULT_LIMIT: usize = 10;
const MAX_LIMIT: usize = 50;

pub fn descriptor() -> CapabilityDescriptor {
    CapabilityDescriptor {
        name: NAME.into(),
        description: "Full-text search over stored artifacts in a thread".into(),
        args_schema: json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "Search query"},
                "limit": {"type": "integer", "default": DEFAULT_LIMIT}
            },
            "required": ["query"]
        }),
        cacheable: true,
        cache_ttl_secs: 300,
    }
}

#[derive(Deserialize)]
struct SearchArgs {
    #[serde(default)]
    query: String,
    #[serde(default)]
    limit: usize,
}

/// Built-in artifact full-text search. The full result list is stored as
/// a JSON artifact; the preview carries the query, count and results.
pub struct RetrievalSearch {
    artifacts: Arc<ArtifactRepo>,
}

impl RetrievalSearch {
    pub fn new(artifacts: Arc<ArtifactRepo>) -> Self {
        Self { artifacts }
    }
}

#[async_trait]
impl CapabilityHandler for RetrievalSearch {
    async fn invoke(&self, req: &InvokeRequest) -> Result<HandlerOutput, EngineError> {
        let args: SearchArgs = serde_json::from_value(req.args.clone())
            .map_err(|e| EngineError::Validation(format!("invalid args: {e}")))?;
        if args.query.is_empty() {
            return Err(EngineError::Validation("query is required".into()));
        }
        let limit = match args.limit {
            0 => DEFAULT_LIMIT,
            n => n.min(MAX_LIMIT),
        };

        let results = self.artifacts.search_full(&req.thread_id, &args.query, limit)?;

        let preview = json!({
            "query": args.query,
            "count": results.len(),
            "results": results,
        });

        let full = serde_json::to_string_pretty(&json!({
            "query": args.query,
            "results": results,
        }))?;

        let artifact_ref = self
            .artifacts
            .put(
                &req.thread_id,
                Some(&format!("search-{}", args.query)),
                ArtifactType::Json,
                "application/json",
                &mut full.as_bytes(),
                Provenance::capability(NAME),
            )
            .map(|a| a.r#ref)
            .ok();

        Ok(HandlerOutput {
            preview,
            artifact_ref,
        })
    }
}
