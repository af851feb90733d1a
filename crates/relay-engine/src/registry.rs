use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use relay_core::{ArtifactRef, ThreadId};

use crate::error::EngineError;

/// A named, schema-tagged operation agents can invoke.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    pub name: String,
    pub description: String,
    pub args_schema: Value,
    pub cacheable: bool,
    #[serde(default)]
    pub cache_ttl_secs: u64,
}

/// Caller-boundary invocation request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InvokeRequest {
    pub capability: String,
    pub thread_id: ThreadId,
    pub args: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
}

/// Caller-boundary invocation response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InvokeResult {
    pub capability: String,
    pub preview: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_ref: Option<String>,
    pub cache_hit: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_key: Option<String>,
    pub duration_ms: i64,
}

/// What a handler produces. Handlers must store large output as an
/// artifact and keep the preview small; the engine wraps the rest
/// (cache, hops, events, duration) around this.
#[derive(Clone, Debug)]
pub struct HandlerOutput {
    pub preview: Value,
    pub artifact_ref: Option<ArtifactRef>,
}

#[async_trait]
pub trait CapabilityHandler: Send + Sync {
    async fn invoke(&self, req: &InvokeRequest) -> Result<HandlerOutput, EngineError>;
}

struct CapabilityEntry {
    descriptor: CapabilityDescriptor,
    handler: Arc<dyn CapabilityHandler>,
}

/// Registry of available capabilities. Duplicate names are rejected.
#[derive(Default)]
pub struct CapabilityRegistry {
    entries: HashMap<String, CapabilityEntry>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn register(
        &mut self,
        descriptor: CapabilityDescriptor,
        handler: Arc<dyn CapabilityHandler>,
    ) -> Result<(), EngineError> {
        if descriptor.name.is_empty() {
            return Err(EngineError::Validation("capability name is required".into()));
        }
        if self.entries.contains_key(&descriptor.name) {
            return Err(EngineError::Validation(format!(
                "capability {:?} already registered",
                descriptor.name
            )));
        }
        self.entries.insert(
            descriptor.name.clone(),
            CapabilityEntry { descriptor, handler },
        );
        Ok(())
    }

    pub fn get(
        &self,
        name: &str,
    ) -> Result<(CapabilityDescriptor, Arc<dyn CapabilityHandler>), EngineError> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| EngineError::NotFound(format!("capability {name:?}")))?;
        Ok((entry.descriptor.clone(), Arc::clone(&entry.handler)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// All descriptors, sorted by name.
    pub fn list(&self) -> Vec<CapabilityDescriptor> {
        let mut descriptors: Vec<CapabilityDescriptor> = self
            .entries
            .values()
            .map(|e| e.descriptor.clone())
            .collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }
}
