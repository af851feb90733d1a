use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::limits::{
    MAX_HEADER_ACTIONS, MAX_HEADER_ARTIFACTS, MAX_HEADER_BYTES, MAX_HEADER_CONSTRAINTS,
    MAX_HEADER_FACTS, MAX_HEADER_PLAN_STEPS, MAX_HEADER_QUESTIONS,
};

pub const STATE_SCHEMA: &str = "com.relay.state.v1";

/// Canonical per-thread memory. Immutable snapshot at a version; mutated
/// only through the patch dialect.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct State {
    #[serde(rename = "$schema", default = "default_schema")]
    pub schema: String,
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub thread_id: String,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub facts: Vec<Fact>,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
    #[serde(default)]
    pub open_questions: Vec<Question>,
    #[serde(default)]
    pub decisions: Vec<Decision>,
    #[serde(default)]
    pub plan: Vec<PlanStep>,
    #[serde(default)]
    pub artifacts: Vec<ArtifactEntry>,
    #[serde(default)]
    pub last_actions: Vec<Action>,
    #[serde(default)]
    pub metrics: Metrics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_summary: Option<String>,
}

fn default_schema() -> String {
    STATE_SCHEMA.to_string()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub description: String,
    /// "hard" | "soft"
    #[serde(default)]
    pub severity: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Question {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub question: String,
    /// "open" | "resolved"; empty counts as open in the header projection.
    #[serde(default)]
    pub status: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub reason_codes: Vec<String>,
    #[serde(default)]
    pub evidence_refs: Vec<String>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub step: String,
    /// "pending" | "done" | "skipped"; empty counts as pending in the header.
    #[serde(default)]
    pub status: String,
}

/// Weak pointer into the artifact store; never an embedded record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactEntry {
    #[serde(default)]
    pub r#ref: String,
    #[serde(default)]
    pub r#type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(default)]
    pub at: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub result_ref: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    #[serde(default)]
    pub cache_hits: i64,
    #[serde(default)]
    pub cache_misses: i64,
    #[serde(default)]
    pub tokens_estimate: i64,
    #[serde(default)]
    pub tokens_avoided: i64,
    #[serde(default)]
    pub hop_count: i64,
}

impl State {
    /// The empty canonical state at version 1.
    pub fn new(thread_id: &str) -> Self {
        Self {
            schema: STATE_SCHEMA.to_string(),
            version: 1,
            thread_id: thread_id.to_string(),
            updated_at: Utc::now(),
            facts: Vec::new(),
            constraints: Vec::new(),
            open_questions: Vec::new(),
            decisions: Vec::new(),
            plan: Vec::new(),
            artifacts: Vec::new(),
            last_actions: Vec::new(),
            metrics: Metrics::default(),
            session_summary: None,
        }
    }

    /// Bounded, token-efficient view of state for use in agent prompts.
    /// Field counts are capped first; then if the serialized JSON still
    /// exceeds MAX_HEADER_BYTES, oldest facts are dropped until it fits.
    pub fn header(&self) -> Header {
        let mut h = Header {
            schema: STATE_SCHEMA.to_string(),
            thread_id: self.thread_id.clone(),
            version: self.version,
            top_facts: Vec::new(),
            top_constraints: Vec::new(),
            open_questions: Vec::new(),
            next_steps: Vec::new(),
            artifact_refs: Vec::new(),
            last_actions: Vec::new(),
            metrics: self.metrics.clone(),
            truncated: false,
        };

        // Newest facts; drop oldest when over limit.
        let skip = self.facts.len().saturating_sub(MAX_HEADER_FACTS);
        h.top_facts = self.facts[skip..].to_vec();

        // First constraints (highest priority rules).
        h.top_constraints = self
            .constraints
            .iter()
            .take(MAX_HEADER_CONSTRAINTS)
            .cloned()
            .collect();

        // Open questions only.
        h.open_questions = self
            .open_questions
            .iter()
            .filter(|q| q.status == "open" || q.status.is_empty())
            .take(MAX_HEADER_QUESTIONS)
            .cloned()
            .collect();

        // Pending plan steps.
        h.next_steps = self
            .plan
            .iter()
            .filter(|p| p.status == "pending" || p.status.is_empty())
            .take(MAX_HEADER_PLAN_STEPS)
            .cloned()
            .collect();

        // Newest artifacts.
        let skip = self.artifacts.len().saturating_sub(MAX_HEADER_ARTIFACTS);
        h.artifact_refs = self.artifacts[skip..].to_vec();

        // Newest actions.
        let skip = self.last_actions.len().saturating_sub(MAX_HEADER_ACTIONS);
        h.last_actions = self.last_actions[skip..].to_vec();

        // Hard JSON size cap: drop oldest facts one by one until it fits.
        while !h.top_facts.is_empty() {
            match serde_json::to_vec(&h) {
                Ok(data) if data.len() > MAX_HEADER_BYTES => {
                    h.top_facts.remove(0);
                    h.truncated = true;
                }
                _ => break,
            }
        }

        h
    }
}

/// Size-capped projection of state suitable for LLM prompts.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Header {
    #[serde(rename = "$schema")]
    pub schema: String,
    pub thread_id: String,
    pub version: i64,
    pub top_facts: Vec<Fact>,
    pub top_constraints: Vec<Constraint>,
    pub open_questions: Vec<Question>,
    pub next_steps: Vec<PlanStep>,
    pub artifact_refs: Vec<ArtifactEntry>,
    pub last_actions: Vec<Action>,
    pub metrics: Metrics,
    /// Set when facts were dropped to meet MAX_HEADER_BYTES.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}
