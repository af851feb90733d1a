use serde::{Deserialize, Serialize};

/// The fixed taxonomy of event-log record types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "thread.created")]
    ThreadCreated,
    #[serde(rename = "state.created")]
    StateCreated,
    #[serde(rename = "state.patch.applied")]
    StatePatchApplied,
    #[serde(rename = "artifact.created")]
    ArtifactCreated,
    #[serde(rename = "capability.invoked")]
    CapabilityInvoked,
    #[serde(rename = "message.received")]
    MessageReceived,
    #[serde(rename = "report.generated")]
    ReportGenerated,
    #[serde(rename = "checkpoint.created")]
    CheckpointCreated,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ThreadCreated => "thread.created",
            Self::StateCreated => "state.created",
            Self::StatePatchApplied => "state.patch.applied",
            Self::ArtifactCreated => "artifact.created",
            Self::CapabilityInvoked => "capability.invoked",
            Self::MessageReceived => "message.received",
            Self::ReportGenerated => "report.generated",
            Self::CheckpointCreated => "checkpoint.created",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "thread.created" => Ok(Self::ThreadCreated),
            "state.created" => Ok(Self::StateCreated),
            "state.patch.applied" => Ok(Self::StatePatchApplied),
            "artifact.created" => Ok(Self::ArtifactCreated),
            "capability.invoked" => Ok(Self::CapabilityInvoked),
            "message.received" => Ok(Self::MessageReceived),
            "report.generated" => Ok(Self::ReportGenerated),
            "checkpoint.created" => Ok(Self::CheckpointCreated),
            other => Err(format!("unknown event type: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: &[EventType] = &[
        EventType::ThreadCreated,
        EventType::StateCreated,
        EventType::StatePatchApplied,
        EventType::ArtifactCreated,
        EventType::CapabilityInvoked,
        EventType::MessageReceived,
        EventType::ReportGenerated,
        EventType::CheckpointCreated,
    ];

    #[test]
    fn display_and_parse_roundtrip() {
        for t in ALL {
            let s = t.to_string();
            let parsed: EventType = s.parse().unwrap();
            assert_eq!(*t, parsed);
        }
    }

    #[test]
    fn serde_uses_dotted_names() {
        let json = serde_json::to_string(&EventType::StatePatchApplied).unwrap();
        assert_eq!(json, r#""state.patch.applied""#);
    }

    #[test]
    fn unknown_type_rejected() {
        assert!("thread.deleted".parse::<EventType>().is_err());
    }
}
