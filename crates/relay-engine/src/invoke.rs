use std::time::Instant;

use serde_json::json;
use tracing::{debug, info};

use relay_core::limits::check_hop_limit;
use relay_core::EventType;
use relay_store::cache_key;

use crate::engine::Engine;
use crate::error::EngineError;
use crate::registry::{InvokeRequest, InvokeResult};

/// Cache key version tag; bump to invalidate every cached outcome.
const CACHE_VERSION: &str = "v1";

impl Engine {
    /// Invoke a capability: hop-limit check, cache lookup, handler
    /// dispatch, cache fill, hop increment, event append.
    pub async fn invoke(&self, req: &InvokeRequest) -> Result<InvokeResult, EngineError> {
        if req.capability.is_empty() {
            return Err(EngineError::Validation("capability is required".into()));
        }

        let tenant = req
            .tenant
            .clone()
            .unwrap_or_else(|| self.config.tenant.clone());

        let thread = self.threads.get(&req.thread_id)?;
        check_hop_limit(thread.hop_count, self.config.max_hops)?;

        let (descriptor, handler) = self.registry.get(&req.capability)?;

        let key = descriptor.cacheable.then(|| {
            cache_key(
                &tenant,
                &req.capability,
                &req.args,
                req.thread_id.as_str(),
                CACHE_VERSION,
            )
        });

        if let Some(key) = &key {
            if let Some(entry) = self.cache.get(key)? {
                debug!(capability = %req.capability, key = %key, "cache hit");
                self.threads.increment_hops(&req.thread_id)?;
                let _ = self.events.append(
                    &req.thread_id,
                    EventType::CapabilityInvoked,
                    json!({ "capability": req.capability, "cache_hit": true }),
                );
                return Ok(InvokeResult {
                    capability: req.capability.clone(),
                    preview: entry.preview,
                    artifact_ref: (!entry.artifact_ref.is_empty()).then_some(entry.artifact_ref),
                    cache_hit: true,
                    cache_key: Some(key.clone()),
                    duration_ms: 0,
                });
            }
        }

        let start = Instant::now();
        let output = handler.invoke(req).await?;
        let duration_ms = start.elapsed().as_millis() as i64;

        let artifact_ref = output.artifact_ref.as_ref().map(|r| r.as_str().to_string());

        if let Some(key) = &key {
            self.cache.set(
                key,
                &req.capability,
                key,
                &output.preview,
                artifact_ref.as_deref().unwrap_or(""),
                &req.thread_id,
                std::time::Duration::from_secs(descriptor.cache_ttl_secs),
            )?;
        }

        self.threads.increment_hops(&req.thread_id)?;
        let _ = self.events.append(
            &req.thread_id,
            EventType::CapabilityInvoked,
            json!({
                "capability": req.capability,
                "cache_hit": false,
                "artifact_ref": artifact_ref,
                "duration_ms": duration_ms,
            }),
        );

        info!(
            capability = %req.capability,
            thread = %req.thread_id,
            duration_ms,
            "capability invoked"
        );

        Ok(InvokeResult {
            capability: req.capability.clone(),
            preview: output.preview,
            artifact_ref,
            cache_hit: false,
            cache_key: key,
            duration_ms,
        })
    }
}
