use std::collections::HashSet;

use crate::limits::{MAX_ACTIONS_KEEP, MAX_ARTIFACTS_KEEP};
use crate::state::{Action, ArtifactEntry, State};

/// Referential closure was violated: an action points at an artifact ref
/// absent from the compacted artifact list. The compactor must not persist
/// anything when this is raised.
#[derive(Debug, thiserror::Error)]
#[error("referential closure violated: action references missing artifact {artifact_ref}")]
pub struct IntegrityError {
    pub artifact_ref: String,
}

/// Reduce unbounded growth in state while keeping it useful.
///
/// - Collapses adjacent repeated actions into counts and keeps the newest
///   MAX_ACTIONS_KEEP.
/// - Keeps the newest MAX_ARTIFACTS_KEEP artifact refs plus any referenced
///   by a remaining action; stale referenced refs are re-appended in (ref,
///   name) order. The cap counts only unreferenced entries, so a second
///   run is a fixed point.
/// - Records a session summary when either sequence changed.
/// - Verifies referential closure over the result.
pub fn compact(st: &mut State) -> Result<(), IntegrityError> {
    let original_actions = st.last_actions.len();
    let original_artifacts = st.artifacts.len();

    if !st.last_actions.is_empty() {
        st.last_actions = collapse_actions(std::mem::take(&mut st.last_actions));
        let skip = st.last_actions.len().saturating_sub(MAX_ACTIONS_KEEP);
        if skip > 0 {
            st.last_actions.drain(..skip);
        }
    }

    let referenced = referenced_refs(&st.last_actions);
    st.artifacts = compact_artifacts(std::mem::take(&mut st.artifacts), &referenced);

    if st.last_actions.len() != original_actions || st.artifacts.len() != original_artifacts {
        st.session_summary = Some(format!(
            "Compacted: actions {original_actions}\u{2192}{}, artifacts {original_artifacts}\u{2192}{}",
            st.last_actions.len(),
            st.artifacts.len()
        ));
    }

    ensure_referential_closure(&st.last_actions, &st.artifacts)
}

fn collapse_actions(actions: Vec<Action>) -> Vec<Action> {
    let mut out: Vec<Action> = Vec::with_capacity(actions.len());
    let mut iter = actions.into_iter();
    let Some(mut cur) = iter.next() else {
        return out;
    };
    let mut count = 1usize;

    let flush = |out: &mut Vec<Action>, mut a: Action, n: usize| {
        if n > 1 {
            a.description = format!("{} (x{n})", a.description.trim());
        }
        out.push(a);
    };

    for a in iter {
        if a.description == cur.description && a.result_ref == cur.result_ref {
            count += 1;
            continue;
        }
        flush(&mut out, cur, count);
        cur = a;
        count = 1;
    }
    flush(&mut out, cur, count);
    out
}

fn referenced_refs(actions: &[Action]) -> HashSet<String> {
    actions
        .iter()
        .filter(|a| !a.result_ref.is_empty())
        .map(|a| a.result_ref.clone())
        .collect()
}

fn compact_artifacts(artifacts: Vec<ArtifactEntry>, keep_refs: &HashSet<String>) -> Vec<ArtifactEntry> {
    if artifacts.is_empty() {
        return artifacts;
    }

    // Oldest unreferenced entries beyond the cap are dropped; referenced
    // entries in that stale span are pulled out and re-appended.
    let unreferenced = artifacts
        .iter()
        .filter(|a| !keep_refs.contains(&a.r#ref))
        .count();
    let mut to_drop = unreferenced.saturating_sub(MAX_ARTIFACTS_KEEP);

    let mut kept: Vec<ArtifactEntry> = Vec::with_capacity(artifacts.len().min(MAX_ARTIFACTS_KEEP + keep_refs.len()));
    let mut readded: Vec<ArtifactEntry> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for a in artifacts {
        if to_drop > 0 {
            if keep_refs.contains(&a.r#ref) {
                if seen.insert(a.r#ref.clone()) {
                    readded.push(a);
                }
            } else {
                to_drop -= 1;
            }
            continue;
        }
        if seen.insert(a.r#ref.clone()) {
            kept.push(a);
        }
    }

    readded.sort_by(|a, b| a.r#ref.cmp(&b.r#ref).then_with(|| a.name.cmp(&b.name)));
    kept.extend(readded);
    kept
}

fn ensure_referential_closure(
    actions: &[Action],
    artifacts: &[ArtifactEntry],
) -> Result<(), IntegrityError> {
    if actions.is_empty() {
        return Ok(());
    }
    let present: HashSet<&str> = artifacts.iter().map(|a| a.r#ref.as_str()).collect();
    for a in actions {
        if !a.result_ref.is_empty() && !present.contains(a.result_ref.as_str()) {
            return Err(IntegrityError {
                artifact_ref: a.result_ref.clone(),
            });
        }
    }
    Ok(())
}
