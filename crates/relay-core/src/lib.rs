pub mod compact;
pub mod events;
pub mod ids;
pub mod limits;
pub mod patch;
pub mod sanitize;
pub mod state;

pub use compact::{compact, IntegrityError};
pub use events::EventType;
pub use ids::{ArtifactRef, EventId, ThreadId};
pub use patch::{apply_patch, validate_patch, PatchError, PatchOp};
pub use state::{Header, State, STATE_SCHEMA};
