use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! branded_id {
    ($name:ident, $prefix:expr) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::now_v7()))
            }

            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

branded_id!(ThreadId, "th");

/// Process-wide monotonic counter for event id tie-breaks.
static EVENT_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Time-ordered event identifier: 13 hex chars of unix-millis followed by
/// 6 hex chars of a monotonic counter. Lexicographic order matches
/// (timestamp, counter) order, so `ORDER BY timestamp, id` is total.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    pub fn next() -> Self {
        let count = EVENT_COUNTER.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        let millis = Utc::now().timestamp_millis();
        Self(format!("{millis:013x}{:06x}", count & 0xFF_FFFF))
    }

    pub fn from_raw(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for EventId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Sortable artifact reference: 13 hex chars of unix-millis followed by
/// 12 hex chars of randomness (48 bits). Collisions are possible in theory
/// and must be rejected at insert by the store.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactRef(String);

impl ArtifactRef {
    pub fn generate() -> Self {
        let millis = Utc::now().timestamp_millis();
        let random: u64 = rand::random::<u64>() & 0xFFFF_FFFF_FFFF;
        Self(format!("{millis:013x}{random:012x}"))
    }

    pub fn from_raw(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ArtifactRef {
    type Err = std::convert::Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_owned()))
    }
}

impl AsRef<str> for ArtifactRef {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_id_has_prefix() {
        let id = ThreadId::new();
        assert!(id.as_str().starts_with("th_"), "got: {id}");
    }

    #[test]
    fn thread_ids_are_unique() {
        let a = ThreadId::new();
        let b = ThreadId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn event_id_shape() {
        let id = EventId::next();
        assert_eq!(id.as_str().len(), 19, "got: {id}");
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn event_ids_monotonic_within_millisecond() {
        let ids: Vec<EventId> = (0..100).map(|_| EventId::next()).collect();
        for w in ids.windows(2) {
            assert!(w[0].as_str() < w[1].as_str(), "not monotonic: {} >= {}", w[0], w[1]);
        }
    }

    #[test]
    fn artifact_ref_shape() {
        let r = ArtifactRef::generate();
        assert_eq!(r.as_str().len(), 25, "got: {r}");
        assert!(r.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn artifact_refs_sort_by_creation_time() {
        let a = ArtifactRef::generate();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = ArtifactRef::generate();
        assert!(a.as_str() < b.as_str());
    }

    #[test]
    fn serde_roundtrip() {
        let id = ThreadId::new();
        let json = serde_json::to_string(&id).unwrap();
        let parsed: ThreadId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);

        let r = ArtifactRef::generate();
        let json = serde_json::to_string(&r).unwrap();
        let parsed: ArtifactRef = serde_json::from_str(&json).unwrap();
        assert_eq!(r, parsed);
    }
}
