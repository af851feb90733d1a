use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::State;

/// A single patch operation (RFC 6902 subset).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PatchOp {
    pub op: String,
    pub path: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error("patch[{index}]: unknown op {op:?}")]
    UnknownOp { index: usize, op: String },

    #[error("patch[{index}]: path is required")]
    MissingPath { index: usize },

    #[error("patch[{index}] {op} {path}: path must start with /")]
    BadPath { index: usize, op: String, path: String },

    #[error("patch[{index}] {op} {path}: deep paths are not supported; replace the containing top-level field instead")]
    Unsupported { index: usize, op: String, path: String },

    #[error("patch serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

const VALID_OPS: &[&str] = &["add", "remove", "replace", "move", "copy", "test"];

/// Validate patch operations before applying. Failures here leave state
/// untouched.
pub fn validate_patch(ops: &[PatchOp]) -> Result<(), PatchError> {
    for (index, op) in ops.iter().enumerate() {
        if !VALID_OPS.contains(&op.op.as_str()) {
            return Err(PatchError::UnknownOp {
                index,
                op: op.op.clone(),
            });
        }
        if op.path.is_empty() {
            return Err(PatchError::MissingPath { index });
        }
    }
    Ok(())
}

/// Apply patch operations to a state, producing the next version.
///
/// The dialect supports add/replace on a top-level field, append to a
/// top-level sequence via the `-` sentinel, remove on a top-level field,
/// and `test` as an accepted no-op. Deep indexed paths and move/copy are
/// rejected. The state round-trips through JSON for a clean apply.
pub fn apply_patch(state: &State, ops: &[PatchOp]) -> Result<State, PatchError> {
    let mut doc = match serde_json::to_value(state)? {
        Value::Object(map) => map,
        _ => unreachable!("state serializes to an object"),
    };

    for (index, op) in ops.iter().enumerate() {
        apply_op(&mut doc, index, op)?;
    }

    let mut next: State = serde_json::from_value(Value::Object(doc))?;
    next.version = state.version + 1;
    next.updated_at = Utc::now();
    Ok(next)
}

fn apply_op(
    doc: &mut serde_json::Map<String, Value>,
    index: usize,
    op: &PatchOp,
) -> Result<(), PatchError> {
    let Some(rest) = op.path.strip_prefix('/') else {
        return Err(PatchError::BadPath {
            index,
            op: op.op.clone(),
            path: op.path.clone(),
        });
    };
    let parts: Vec<&str> = rest.split('/').collect();
    let field = parts[0].to_string();

    let unsupported = || PatchError::Unsupported {
        index,
        op: op.op.clone(),
        path: op.path.clone(),
    };

    match op.op.as_str() {
        "add" | "replace" => {
            if parts.len() == 1 {
                doc.insert(field, op.value.clone());
            } else if parts.len() == 2 && parts[1] == "-" {
                // Append to a top-level sequence.
                let entry = doc.entry(field).or_insert_with(|| Value::Array(Vec::new()));
                match entry {
                    Value::Array(arr) => arr.push(op.value.clone()),
                    other => {
                        *other = Value::Array(vec![op.value.clone()]);
                    }
                }
            } else {
                return Err(unsupported());
            }
        }
        "remove" => {
            if parts.len() == 1 {
                doc.remove(&field);
            } else {
                return Err(unsupported());
            }
        }
        "test" => {
            // Accepted but not enforced in this version.
        }
        "move" | "copy" => return Err(unsupported()),
        other => {
            return Err(PatchError::UnknownOp {
                index,
                op: other.to_string(),
            })
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn op(op: &str, path: &str, value: Value) -> PatchOp {
        PatchOp {
            op: op.to_string(),
            path: path.to_string(),
            value,
            from: None,
        }
    }

    #[test]
    fn validate_rejects_unknown_op() {
        let ops = vec![op("merge", "/facts", json!([]))];
        let err = validate_patch(&ops).unwrap_err();
        assert!(matches!(err, PatchError::UnknownOp { index: 0, .. }));
    }

    #[test]
    fn validate_rejects_empty_path() {
        let ops = vec![op("add", "", json!(1))];
        assert!(matches!(
            validate_patch(&ops),
            Err(PatchError::MissingPath { index: 0 })
        ));
    }

    #[test]
    fn append_to_sequence() {
        let st = State::new("th_x");
        let ops = vec![op(
            "add",
            "/facts/-",
            json!({"id": "f1", "key": "phase", "value": "init"}),
        )];
        let next = apply_patch(&st, &ops).unwrap();
        assert_eq!(next.version, 2);
        assert_eq!(next.facts.len(), 1);
        assert_eq!(next.facts[0].key, "phase");
        assert_eq!(next.facts[0].value, json!("init"));
    }

    #[test]
    fn replace_top_level_field() {
        let mut st = State::new("th_x");
        st.facts.push(crate::state::Fact {
            id: "f1".into(),
            key: "old".into(),
            value: json!(1),
            at: None,
        });
        let ops = vec![op(
            "replace",
            "/facts",
            json!([{"id": "f2", "key": "new", "value": 2}]),
        )];
        let next = apply_patch(&st, &ops).unwrap();
        assert_eq!(next.facts.len(), 1);
        assert_eq!(next.facts[0].key, "new");
    }

    #[test]
    fn remove_top_level_field_resets_to_default() {
        let mut st = State::new("th_x");
        st.facts.push(crate::state::Fact {
            id: "f1".into(),
            key: "k".into(),
            value: json!(1),
            at: None,
        });
        let next = apply_patch(&st, &[op("remove", "/facts", Value::Null)]).unwrap();
        assert!(next.facts.is_empty());
        assert_eq!(next.version, 2);
    }

    #[test]
    fn deep_path_rejected() {
        let st = State::new("th_x");
        let err = apply_patch(&st, &[op("replace", "/facts/3/value", json!(1))]).unwrap_err();
        assert!(matches!(err, PatchError::Unsupported { .. }));
    }

    #[test]
    fn move_and_copy_rejected() {
        let st = State::new("th_x");
        for o in ["move", "copy"] {
            let err = apply_patch(&st, &[op(o, "/facts", Value::Null)]).unwrap_err();
            assert!(matches!(err, PatchError::Unsupported { .. }), "op {o}");
        }
    }

    #[test]
    fn test_op_is_noop() {
        let st = State::new("th_x");
        let next = apply_patch(&st, &[op("test", "/facts", json!([]))]).unwrap();
        assert_eq!(next.version, 2);
        assert!(next.facts.is_empty());
    }

    #[test]
    fn versions_are_dense_across_patch_chain() {
        let mut st = State::new("th_x");
        let prev_updated = st.updated_at;
        for i in 0..5 {
            let ops = vec![op("add", "/facts/-", json!({"id": format!("f{i}"), "key": "k"}))];
            st = apply_patch(&st, &ops).unwrap();
        }
        assert_eq!(st.version, 6);
        assert_eq!(st.facts.len(), 5);
        assert!(st.updated_at >= prev_updated);
    }

    #[test]
    fn failed_op_leaves_no_partial_state() {
        let st = State::new("th_x");
        let ops = vec![
            op("add", "/facts/-", json!({"id": "f1", "key": "k"})),
            op("replace", "/plan/2", json!("boom")),
        ];
        assert!(apply_patch(&st, &ops).is_err());
        // Caller still holds the untouched original.
        assert!(st.facts.is_empty());
        assert_eq!(st.version, 1);
    }
}
