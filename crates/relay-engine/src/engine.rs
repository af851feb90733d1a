use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::info;

use relay_core::limits::{self, MAX_HOPS, MAX_PAYLOAD_BYTES};
use relay_core::patch::PatchOp;
use relay_core::{compact, EventType, Header, State, ThreadId};
use relay_store::{
    Artifact, ArtifactRepo, ArtifactType, CacheRepo, Database, EngineLock, Event, EventRepo,
    Provenance, StateRepo, Thread, ThreadRepo,
};

use crate::capabilities;
use crate::error::EngineError;
use crate::registry::{CapabilityDescriptor, CapabilityHandler, CapabilityRegistry};

/// Engine configuration. The base directory defaults to `$RELAY_HOME`,
/// falling back to `$HOME/.relay`.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub base_dir: Option<PathBuf>,
    pub tenant: String,
    pub max_hops: i64,
    pub max_payload_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_dir: None,
            tenant: limits::DEFAULT_TENANT.to_string(),
            max_hops: MAX_HOPS,
            max_payload_bytes: MAX_PAYLOAD_BYTES,
        }
    }
}

/// The local memory engine: one base directory, one database, one holder
/// of the advisory lock. All thread/state/artifact/event/cache operations
/// go through here.
pub struct Engine {
    pub(crate) config: EngineConfig,
    base_dir: PathBuf,
    _lock: EngineLock,
    pub(crate) threads: ThreadRepo,
    pub(crate) states: StateRepo,
    pub(crate) artifacts: Arc<ArtifactRepo>,
    pub(crate) events: EventRepo,
    pub(crate) cache: CacheRepo,
    pub(crate) registry: CapabilityRegistry,
}

impl Engine {
    /// Open (or initialize) the engine under the configured base directory.
    /// Blocks until the advisory lock is available; the lock is released
    /// on drop.
    pub fn open(config: EngineConfig) -> Result<Self, EngineError> {
        let base_dir = resolve_base_dir(&config);
        std::fs::create_dir_all(&base_dir).map_err(relay_store::StoreError::from)?;

        let lock = EngineLock::acquire(&base_dir.join("relay.lock"))?;
        let db = Database::open(&base_dir.join("relay.db"))?;

        let artifacts = Arc::new(ArtifactRepo::new(db.clone(), base_dir.clone()));
        let mut registry = CapabilityRegistry::new();
        capabilities::register_builtins(&mut registry, Arc::clone(&artifacts))?;

        info!(base_dir = %base_dir.display(), "engine opened");

        Ok(Self {
            threads: ThreadRepo::new(db.clone()),
            states: StateRepo::new(db.clone(), base_dir.clone()),
            artifacts,
            events: EventRepo::new(db.clone(), base_dir.clone()),
            cache: CacheRepo::new(db),
            registry,
            config,
            base_dir,
            _lock: lock,
        })
    }

    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    // --- Threads ---

    pub fn create_thread(&self, name: Option<&str>) -> Result<(Thread, State), EngineError> {
        let thread = self.threads.create(name)?;
        let state = self.states.create(&thread.id)?;

        let _ = self.events.append(
            &thread.id,
            EventType::ThreadCreated,
            json!({ "thread_id": thread.id, "name": name }),
        );
        let _ = self.events.append(
            &thread.id,
            EventType::StateCreated,
            json!({ "version": state.version }),
        );

        Ok((thread, state))
    }

    pub fn get_thread(&self, thread_id: &ThreadId) -> Result<Thread, EngineError> {
        Ok(self.threads.get(thread_id)?)
    }

    pub fn list_threads(&self, limit: u32) -> Result<Vec<Thread>, EngineError> {
        Ok(self.threads.list(limit)?)
    }

    // --- State ---

    pub fn state(&self, thread_id: &ThreadId) -> Result<State, EngineError> {
        Ok(self.states.get(thread_id)?)
    }

    pub fn state_header(&self, thread_id: &ThreadId) -> Result<Header, EngineError> {
        Ok(self.states.get(thread_id)?.header())
    }

    pub fn patch_state(
        &self,
        thread_id: &ThreadId,
        ops: &[PatchOp],
    ) -> Result<State, EngineError> {
        let next = self.states.patch(thread_id, ops)?;
        let _ = self.events.append(
            thread_id,
            EventType::StatePatchApplied,
            json!({ "ops": ops.len(), "version": next.version }),
        );
        Ok(next)
    }

    /// Run the compactor against the latest state and persist the result
    /// as the next version. Nothing is persisted when the closure check
    /// fails or when compaction was a no-op.
    pub fn compact_thread(&self, thread_id: &ThreadId) -> Result<State, EngineError> {
        let current = self.states.get(thread_id)?;
        let mut compacted = current.clone();
        compact(&mut compacted)?;

        let unchanged = serde_json::to_string(&compacted)? == serde_json::to_string(&current)?;
        if unchanged {
            return Ok(current);
        }

        compacted.version = current.version + 1;
        compacted.updated_at = chrono::Utc::now();
        self.states.put(&compacted)?;
        Ok(compacted)
    }

    // --- Artifacts ---

    pub fn put_artifact(
        &self,
        thread_id: &ThreadId,
        name: Option<&str>,
        atype: ArtifactType,
        mime: &str,
        reader: &mut dyn Read,
        provenance: Provenance,
    ) -> Result<Artifact, EngineError> {
        let artifact = self
            .artifacts
            .put(thread_id, name, atype, mime, reader, provenance)?;
        let _ = self.events.append(
            thread_id,
            EventType::ArtifactCreated,
            json!({ "ref": artifact.r#ref, "type": artifact.r#type, "size": artifact.size }),
        );
        Ok(artifact)
    }

    pub fn get_artifact(
        &self,
        thread_id: &ThreadId,
        r#ref: &relay_core::ArtifactRef,
    ) -> Result<Artifact, EngineError> {
        Ok(self.artifacts.get(thread_id, r#ref)?)
    }

    pub fn list_artifacts(&self, thread_id: &ThreadId) -> Result<Vec<Artifact>, EngineError> {
        Ok(self.artifacts.list(thread_id)?)
    }

    pub fn artifact_content(
        &self,
        thread_id: &ThreadId,
        r#ref: &relay_core::ArtifactRef,
    ) -> Result<Vec<u8>, EngineError> {
        let mut file = self.artifacts.open(thread_id, r#ref)?;
        let mut content = Vec::new();
        file.read_to_end(&mut content)
            .map_err(relay_store::StoreError::from)?;
        Ok(content)
    }

    // --- Events ---

    pub fn events(
        &self,
        thread_id: &ThreadId,
        types: &[EventType],
        limit: usize,
    ) -> Result<Vec<Event>, EngineError> {
        Ok(self.events.list(thread_id, types, limit)?)
    }

    pub fn events_since(
        &self,
        thread_id: &ThreadId,
        after_id: &relay_core::EventId,
        limit: usize,
    ) -> Result<Vec<Event>, EngineError> {
        Ok(self.events.since(thread_id, after_id, limit)?)
    }

    pub fn mark_checkpoint(
        &self,
        thread_id: &ThreadId,
        label: &str,
    ) -> Result<Event, EngineError> {
        Ok(self.events.mark_checkpoint(thread_id, label)?)
    }

    /// Validate an agent message envelope and record it on the event log.
    pub fn receive_message(
        &self,
        thread_id: &ThreadId,
        envelope: Value,
    ) -> Result<Event, EngineError> {
        limits::validate_envelope(&envelope, self.config.max_payload_bytes)?;
        self.threads.get(thread_id)?;
        Ok(self
            .events
            .append(thread_id, EventType::MessageReceived, envelope)?)
    }

    // --- Capabilities ---

    pub fn register_capability(
        &mut self,
        descriptor: CapabilityDescriptor,
        handler: Arc<dyn CapabilityHandler>,
    ) -> Result<(), EngineError> {
        self.registry.register(descriptor, handler)
    }

    pub fn list_capabilities(&self) -> Vec<CapabilityDescriptor> {
        self.registry.list()
    }

    // --- Cache ---

    pub fn cache_stats(&self) -> Result<(i64, i64), EngineError> {
        Ok(self.cache.stats()?)
    }

    pub fn cache_purge(&self) -> Result<usize, EngineError> {
        Ok(self.cache.purge()?)
    }

    pub fn cache_invalidate(&self, key: &str) -> Result<(), EngineError> {
        Ok(self.cache.invalidate(key)?)
    }
}

fn resolve_base_dir(config: &EngineConfig) -> PathBuf {
    if let Some(dir) = &config.base_dir {
        return dir.clone();
    }
    if let Ok(dir) = std::env::var("RELAY_HOME") {
        return PathBuf::from(dir);
    }
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".relay")
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn temp_engine() -> Engine {
        let dir = std::env::temp_dir().join(format!("relay-engine-test-{}", uuid::Uuid::now_v7()));
        Engine::open(EngineConfig {
            base_dir: Some(dir),
            ..EngineConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn open_creates_layout() {
        let engine = temp_engine();
        assert!(engine.base_dir().join("relay.db").exists());
        assert!(engine.base_dir().join("relay.lock").exists());
        let _ = std::fs::remove_dir_all(engine.base_dir());
    }

    #[test]
    fn create_thread_emits_events_and_state() {
        let engine = temp_engine();
        let (thread, state) = engine.create_thread(Some("demo")).unwrap();
        assert_eq!(state.version, 1);

        let events = engine.events(&thread.id, &[], 0).unwrap();
        let types: Vec<EventType> = events.iter().map(|e| e.r#type).collect();
        assert_eq!(types, vec![EventType::ThreadCreated, EventType::StateCreated]);
        let _ = std::fs::remove_dir_all(engine.base_dir());
    }

    #[test]
    fn patch_emits_event_with_count_and_version() {
        let engine = temp_engine();
        let (thread, _) = engine.create_thread(None).unwrap();

        let ops = vec![PatchOp {
            op: "add".into(),
            path: "/facts/-".into(),
            value: json!({"id": "f1", "key": "phase", "value": "init"}),
            from: None,
        }];
        let next = engine.patch_state(&thread.id, &ops).unwrap();
        assert_eq!(next.version, 2);

        let events = engine
            .events(&thread.id, &[EventType::StatePatchApplied], 0)
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload["ops"], 1);
        assert_eq!(events[0].payload["version"], 2);
        let _ = std::fs::remove_dir_all(engine.base_dir());
    }

    #[test]
    fn compact_noop_keeps_version() {
        let engine = temp_engine();
        let (thread, _) = engine.create_thread(None).unwrap();
        let state = engine.compact_thread(&thread.id).unwrap();
        assert_eq!(state.version, 1);
        let _ = std::fs::remove_dir_all(engine.base_dir());
    }

    #[test]
    fn receive_message_validates_envelope() {
        let engine = temp_engine();
        let (thread, _) = engine.create_thread(None).unwrap();

        let bad = json!({"msg_id": "m1"});
        assert!(matches!(
            engine.receive_message(&thread.id, bad),
            Err(EngineError::Validation(_))
        ));

        let good = json!({
            "msg_id": "m1",
            "thread_id": thread.id,
            "from": "agent-a",
            "type": "request",
            "schema": "com.relay.msg.v1",
            "payload": "hi",
        });
        let event = engine.receive_message(&thread.id, good).unwrap();
        assert_eq!(event.r#type, EventType::MessageReceived);
        let _ = std::fs::remove_dir_all(engine.base_dir());
    }

    #[test]
    fn builtins_registered_on_open() {
        let engine = temp_engine();
        let names: Vec<String> = engine
            .list_capabilities()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["http.fetch", "retrieval.search"]);
        let _ = std::fs::remove_dir_all(engine.base_dir());
    }
}
