//! Mutation pipeline: validate → version → audit.
//!
//! The only write path into the graph. Every mutation is schema-validated
//! against the compiled registry before it reaches the temporal store,
//! which executes it as one atomic transaction. Between any two store
//! calls the graph can change (other agents write concurrently); within a
//! single call it cannot, so the create-or-update decision is retried once
//! when a concurrent writer wins the race.

use chrono::Utc;
use uuid::Uuid;

use crate::error::{GraphError, Result};
use crate::models::{PropMap, UpsertOutcome};
use crate::reader;
use crate::registry::SchemaRegistry;
use crate::store::TemporalStore;

/// Validate and write one entity state.
///
/// With no `id`, a fresh opaque id is generated and the entity is created
/// at version 1. With an `id`, the current head decides: absent head →
/// create; present head → close it and append the next version.
pub async fn upsert(
    store: &TemporalStore,
    registry: &SchemaRegistry,
    label: &str,
    id: Option<&str>,
    props: &PropMap,
    actor: &str,
) -> Result<UpsertOutcome> {
    let validator = registry
        .node_validator(label)
        .ok_or_else(|| GraphError::UnknownLabel(label.to_string()))?;
    let normalized = validator.validate(props)?;

    let entity_id = match id {
        Some(id) => id.to_string(),
        None => Uuid::new_v4().to_string(),
    };

    let mut attempt = upsert_once(store, label, &entity_id, &normalized, actor).await;
    if let Err(err) = &attempt {
        // A concurrent writer can create the entity between our read and
        // write; the primary-key violation is transient here.
        if err.is_transient() || matches!(err, GraphError::Storage(_)) {
            attempt = upsert_once(store, label, &entity_id, &normalized, actor).await;
        }
    }
    attempt
}

async fn upsert_once(
    store: &TemporalStore,
    label: &str,
    entity_id: &str,
    props: &PropMap,
    actor: &str,
) -> Result<UpsertOutcome> {
    let now = Utc::now();
    let audit_id = Uuid::new_v4().to_string();

    match store.get_current(entity_id).await? {
        None => {
            // Deleted entities read as absent; re-creating one is rejected
            // by the primary key rather than silently resurrecting it.
            store
                .create_entity(entity_id, label, props, actor, now, &audit_id)
                .await?;
            Ok(UpsertOutcome {
                id: entity_id.to_string(),
                version: 1,
                created: true,
            })
        }
        Some(record) => {
            if record.entity.label != label {
                return Err(GraphError::validation(vec![
                    crate::error::ValidationIssue::new(
                        "label",
                        format!(
                            "entity {entity_id} has label '{}', not '{label}'",
                            record.entity.label
                        ),
                    ),
                ]));
            }
            let changes = reader::diff_props(&record.state.props, props);
            let changes_json = if changes.is_empty() {
                None
            } else {
                Some(serde_json::to_value(&changes)?)
            };
            let version = store
                .update_entity(entity_id, props, actor, now, &audit_id, changes_json)
                .await?;
            Ok(UpsertOutcome {
                id: entity_id.to_string(),
                version,
                created: false,
            })
        }
    }
}

/// Soft-delete an entity. Idempotent when already deleted.
pub async fn delete(store: &TemporalStore, id: &str, actor: &str) -> Result<bool> {
    let now = Utc::now();
    let audit_id = Uuid::new_v4().to_string();
    store.soft_delete_entity(id, actor, now, &audit_id).await
}

/// Validate and create a typed edge between two entities.
#[allow(clippy::too_many_arguments)]
pub async fn relate(
    store: &TemporalStore,
    registry: &SchemaRegistry,
    from_id: &str,
    to_id: &str,
    rel_type: &str,
    from_label: &str,
    to_label: &str,
    props: Option<&PropMap>,
    actor: &str,
) -> Result<String> {
    let validator = registry
        .edge_validator(from_label, rel_type, to_label)
        .ok_or_else(|| GraphError::UnknownEdge {
            from: from_label.to_string(),
            rel_type: rel_type.to_string(),
            to: to_label.to_string(),
        })?;
    let empty = PropMap::new();
    let normalized = validator.validate(props.unwrap_or(&empty))?;

    let now = Utc::now();
    let audit_id = Uuid::new_v4().to_string();
    store
        .create_relationship(from_id, to_id, rel_type, &normalized, actor, now, &audit_id)
        .await
}

/// Close the active edge of a type between two entities.
///
/// A silent no-op when nothing is active.
pub async fn unrelate(
    store: &TemporalStore,
    from_id: &str,
    to_id: &str,
    rel_type: &str,
    actor: &str,
) -> Result<bool> {
    let now = Utc::now();
    let audit_id = Uuid::new_v4().to_string();
    store
        .close_relationship(from_id, to_id, rel_type, actor, now, &audit_id)
        .await
}

/// Outcome of one member of a batch upsert.
#[derive(Debug, serde::Serialize)]
pub struct BatchItemResult {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<UpsertOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One member of a batch upsert request.
#[derive(Debug, Clone)]
pub struct BatchUpsertItem {
    pub label: String,
    pub id: Option<String>,
    pub props: PropMap,
}

/// Validate every member first, then commit each in its own transaction.
///
/// Validation failures reject the whole batch up front; commit-time
/// failures of individual members accumulate in the result and never
/// abort the remainder.
pub async fn batch_upsert(
    store: &TemporalStore,
    registry: &SchemaRegistry,
    items: &[BatchUpsertItem],
    actor: &str,
) -> Result<Vec<BatchItemResult>> {
    let mut issues = Vec::new();
    for (index, item) in items.iter().enumerate() {
        match registry.node_validator(&item.label) {
            None => issues.push(crate::error::ValidationIssue::new(
                format!("[{index}].label"),
                format!("unknown label '{}'", item.label),
            )),
            Some(validator) => {
                if let Err(GraphError::Validation {
                    issues: item_issues, ..
                }) = validator.validate(&item.props)
                {
                    for issue in item_issues {
                        issues.push(crate::error::ValidationIssue::new(
                            format!("[{index}].{}", issue.path),
                            issue.message,
                        ));
                    }
                }
            }
        }
    }
    if !issues.is_empty() {
        return Err(GraphError::validation(issues));
    }

    let mut results = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        match upsert(
            store,
            registry,
            &item.label,
            item.id.as_deref(),
            &item.props,
            actor,
        )
        .await
        {
            Ok(outcome) => results.push(BatchItemResult {
                index,
                outcome: Some(outcome),
                error: None,
            }),
            Err(err) => results.push(BatchItemResult {
                index,
                outcome: None,
                error: Some(err.to_string()),
            }),
        }
    }
    Ok(results)
}
