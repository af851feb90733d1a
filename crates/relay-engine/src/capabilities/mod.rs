pub mod fetch;
pub mod search;

use std::sync::Arc;

use relay_store::ArtifactRepo;

use crate::error::EngineError;
use crate::registry::CapabilityRegistry;

/// Register the built-in capabilities.
pub fn register_builtins(
    registry: &mut CapabilityRegistry,
    artifacts: Arc<ArtifactRepo>,
) -> Result<(), EngineError> {
    registry.register(
        search::descriptor(),
        Arc::new(search::RetrievalSearch::new(Arc::clone(&artifacts))),
    )?;
    registry.register(fetch::descriptor(), Arc::new(fetch::HttpFetch::new(artifacts)))?;
    Ok(())
}
