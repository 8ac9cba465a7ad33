//! Temporal read projections: diffs and changelogs.
//!
//! A thin layer over the temporal store. The diff is a set difference over
//! user properties — `_`-prefixed temporal keys are skipped, values compare
//! with deep structural equality, and an absent side marks an add or a
//! remove.

use crate::error::{GraphError, Result};
use crate::models::{PropMap, PropertyDelta, State, StateDiff};
use crate::store::TemporalStore;

/// Property-level set difference between two maps, skipping `_` keys.
pub fn diff_props(old: &PropMap, new: &PropMap) -> Vec<PropertyDelta> {
    let mut changes = Vec::new();

    let mut keys: Vec<&String> = old
        .keys()
        .chain(new.keys())
        .filter(|k| !k.starts_with('_'))
        .collect();
    keys.sort_unstable();
    keys.dedup();

    for key in keys {
        let old_value = old.get(key);
        let new_value = new.get(key);
        if old_value != new_value {
            changes.push(PropertyDelta {
                property: key.clone(),
                old: old_value.cloned(),
                new: new_value.cloned(),
            });
        }
    }
    changes
}

/// Diff two states of the same entity.
pub fn diff_states(old: &State, new: &State) -> StateDiff {
    StateDiff {
        entity_id: new.entity_id.clone(),
        from_version: old.version,
        to_version: new.version,
        changes: diff_props(&old.props, &new.props),
    }
}

/// Pairwise diffs across the whole history, ascending by version.
pub async fn changelog(store: &TemporalStore, id: &str) -> Result<Vec<StateDiff>> {
    let mut history = store.get_history(id).await?;
    if history.is_empty() {
        return Err(GraphError::not_found(format!("entity {id}")));
    }
    history.sort_by_key(|s| s.version);

    Ok(history
        .windows(2)
        .map(|pair| diff_states(&pair[0], &pair[1]))
        .collect())
}

/// Diff two specific versions of one entity.
pub async fn diff_versions(
    store: &TemporalStore,
    id: &str,
    from_version: i64,
    to_version: i64,
) -> Result<StateDiff> {
    let history = store.get_history(id).await?;
    let find = |v: i64| history.iter().find(|s| s.version == v);

    let old = find(from_version)
        .ok_or_else(|| GraphError::not_found(format!("entity {id} version {from_version}")))?;
    let new = find(to_version)
        .ok_or_else(|| GraphError::not_found(format!("entity {id} version {to_version}")))?;

    Ok(diff_states(old, new))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn state(version: i64, props: serde_json::Value) -> State {
        State {
            entity_id: "e1".into(),
            version,
            valid_from: Utc::now(),
            valid_to: None,
            recorded_at: Utc::now(),
            actor: "alice".into(),
            props: props.as_object().unwrap().clone(),
        }
    }

    #[test]
    fn diff_of_identical_states_is_empty() {
        let s = state(1, json!({"name": "auth", "status": "active"}));
        let diff = diff_states(&s, &s);
        assert!(diff.changes.is_empty());
    }

    #[test]
    fn diff_reports_changed_property() {
        let old = state(1, json!({"name": "auth", "status": "active"}));
        let new = state(2, json!({"name": "auth", "status": "deprecated"}));
        let diff = diff_states(&old, &new);
        assert_eq!(diff.from_version, 1);
        assert_eq!(diff.to_version, 2);
        assert_eq!(
            diff.changes,
            vec![PropertyDelta {
                property: "status".into(),
                old: Some(json!("active")),
                new: Some(json!("deprecated")),
            }]
        );
    }

    #[test]
    fn diff_reports_adds_and_removes() {
        let old = state(1, json!({"a": 1, "gone": true}));
        let new = state(2, json!({"a": 1, "fresh": "x"}));
        let diff = diff_states(&old, &new);

        let added = diff.changes.iter().find(|c| c.property == "fresh").unwrap();
        assert_eq!(added.old, None);
        assert_eq!(added.new, Some(json!("x")));

        let removed = diff.changes.iter().find(|c| c.property == "gone").unwrap();
        assert_eq!(removed.old, Some(json!(true)));
        assert_eq!(removed.new, None);
    }

    #[test]
    fn diff_skips_temporal_keys() {
        let old = state(1, json!({"name": "auth", "_syncHash": "aaa"}));
        let new = state(2, json!({"name": "auth", "_syncHash": "bbb"}));
        assert!(diff_states(&old, &new).changes.is_empty());
    }

    #[test]
    fn diff_compares_nested_values_structurally() {
        let old = state(1, json!({"meta": {"a": [1, 2]}}));
        let same = state(2, json!({"meta": {"a": [1, 2]}}));
        let changed = state(3, json!({"meta": {"a": [2, 1]}}));

        assert!(diff_states(&old, &same).changes.is_empty());
        assert_eq!(diff_states(&old, &changed).changes.len(), 1);
    }
}
