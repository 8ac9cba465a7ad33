//! Bidirectional reconciliation between the graph and the document tree.
//!
//! `sync` computes a changeset per entity id seen on either side, applies
//! the configured conflict strategy, writes the graph side through the
//! mutation pipeline, then re-renders the whole current-state tree so
//! every surviving document ends stamped with the current `_syncHash`.
//!
//! Drift detection hinges on the stamped hash: a doc whose `_syncHash`
//! still matches the recomputed graph hash but whose properties differ
//! was edited locally (the graph follows); a stale stamp means the graph
//! moved since the doc was rendered, so both sides drifted and the
//! strategy decides.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::adapter::FormatAdapter;
use crate::canonical::{compute_sync_hash, user_props_equal};
use crate::config::ConflictStrategy;
use crate::docparse::{parse_doc_tree, ParsedDoc};
use crate::error::{GraphError, Result};
use crate::models::{EntityRecord, PropMap};
use crate::mutate;
use crate::registry::SchemaRegistry;
use crate::render::{render_tree, RenderStats};
use crate::store::TemporalStore;

/// One detected conflict and how it was resolved.
#[derive(Debug, Clone, Serialize)]
pub struct ConflictRecord {
    pub entity_id: String,
    pub label: String,
    pub graph_hash: String,
    pub doc_hash: String,
    pub resolution: String,
}

/// A non-fatal per-change failure.
#[derive(Debug, Clone, Serialize)]
pub struct SyncErrorRecord {
    pub entity_id: String,
    pub message: String,
}

/// Outcome of one reconciliation run.
#[derive(Debug, Default, Serialize)]
pub struct SyncResult {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub conflicts: Vec<ConflictRecord>,
    pub errors: Vec<SyncErrorRecord>,
    pub docs_written: usize,
    pub docs_unchanged: usize,
}

/// Reconcile the graph with the document tree.
#[allow(clippy::too_many_arguments)]
pub async fn sync(
    store: &TemporalStore,
    registry: &SchemaRegistry,
    docs_dir: &Path,
    adapter: &dyn FormatAdapter,
    path_template: Option<&str>,
    strategy: ConflictStrategy,
    actor: &str,
    labels: Option<&[String]>,
) -> Result<SyncResult> {
    let target_labels: Vec<String> = match labels {
        Some(labels) => labels.to_vec(),
        None => registry.labels().iter().map(|s| s.to_string()).collect(),
    };

    // Graph side: current heads per target label.
    let mut graph_side: BTreeMap<String, EntityRecord> = BTreeMap::new();
    for label in &target_labels {
        for record in store.query_by_label(label).await? {
            graph_side.insert(record.entity.id.clone(), record);
        }
    }

    // Doc side: parsed tree, restricted to the target labels.
    let mut doc_side: BTreeMap<String, ParsedDoc> = BTreeMap::new();
    for doc in parse_doc_tree(docs_dir, adapter.extension())? {
        let Some(label) = doc.label() else { continue };
        if !target_labels.iter().any(|l| l == label) {
            continue;
        }
        if let Some(id) = doc.id() {
            doc_side.insert(id.to_string(), doc);
        }
    }

    let mut result = SyncResult::default();

    let mut ids: Vec<String> = graph_side.keys().chain(doc_side.keys()).cloned().collect();
    ids.sort_unstable();
    ids.dedup();

    for id in &ids {
        match (graph_side.get(id), doc_side.get(id)) {
            // Only in the graph: the doc is created by the re-render below.
            (Some(_), None) => {
                result.created += 1;
            }
            // Only in the docs: either the entity was soft-deleted (the
            // doc follows it out) or the doc is new (the graph follows).
            (None, Some(doc)) => {
                if let Some(entity) = store.get_entity(id).await? {
                    if entity.is_deleted() {
                        std::fs::remove_file(&doc.file_path)?;
                        result.deleted += 1;
                        continue;
                    }
                }
                let label = doc.label().unwrap_or_default().to_string();
                let props = doc.user_props();
                match mutate::upsert(store, registry, &label, Some(id), &props, actor).await {
                    Ok(_) => result.created += 1,
                    Err(err) => result.errors.push(SyncErrorRecord {
                        entity_id: id.clone(),
                        message: err.to_string(),
                    }),
                }
            }
            (Some(record), Some(doc)) => {
                let graph_hash = compute_sync_hash(&record.state.props);
                let doc_hash = doc.sync_hash().unwrap_or_default().to_string();
                let doc_props = doc.user_props();

                if graph_hash == doc_hash {
                    if user_props_equal(&record.state.props, &doc_props) {
                        continue;
                    }
                    // Doc edited while the graph stood still: graph follows.
                    match mutate::upsert(
                        store,
                        registry,
                        &record.entity.label,
                        Some(id),
                        &doc_props,
                        actor,
                    )
                    .await
                    {
                        Ok(_) => result.updated += 1,
                        Err(err) => result.errors.push(SyncErrorRecord {
                            entity_id: id.clone(),
                            message: err.to_string(),
                        }),
                    }
                } else {
                    // Both sides drifted.
                    if strategy == ConflictStrategy::Fail {
                        return Err(GraphError::Conflict {
                            entity_id: id.clone(),
                            label: record.entity.label.clone(),
                            graph_hash,
                            doc_hash,
                        });
                    }

                    let winning: Option<PropMap> = match strategy {
                        // Graph wins: no graph write; the re-render
                        // restores the doc.
                        ConflictStrategy::GraphWins => None,
                        ConflictStrategy::DocsWins => Some(doc_props),
                        ConflictStrategy::Merge => {
                            Some(merge_props(&record.state.props, &doc_props))
                        }
                        ConflictStrategy::Fail => unreachable!(),
                    };

                    if let Some(props) = winning {
                        if let Err(err) = mutate::upsert(
                            store,
                            registry,
                            &record.entity.label,
                            Some(id),
                            &props,
                            actor,
                        )
                        .await
                        {
                            result.errors.push(SyncErrorRecord {
                                entity_id: id.clone(),
                                message: err.to_string(),
                            });
                        }
                    }

                    // Exactly one record per conflict, never double-counted
                    // in `updated`.
                    result.conflicts.push(ConflictRecord {
                        entity_id: id.clone(),
                        label: record.entity.label.clone(),
                        graph_hash,
                        doc_hash,
                        resolution: strategy.as_str().to_string(),
                    });
                }
            }
            (None, None) => unreachable!(),
        }
    }

    // Re-render the entire current-state tree from the post-write graph,
    // with active relationships, so every surviving doc carries the
    // current hash.
    let mut records = Vec::new();
    for label in &target_labels {
        records.extend(store.query_by_label(label).await?);
    }
    let mut edge_map = BTreeMap::new();
    for record in &records {
        edge_map.insert(
            record.entity.id.clone(),
            store.get_relationships(&record.entity.id).await?,
        );
    }

    let stats: RenderStats = render_tree(
        &records,
        |id| edge_map.get(id).cloned().unwrap_or_default(),
        docs_dir,
        path_template,
        adapter,
    )?;
    result.docs_written = stats.written;
    result.docs_unchanged = stats.unchanged;
    result.deleted += stats.removed;

    Ok(result)
}

/// Merge strategy property union: graph's map with the doc's entries
/// overriding on overlap.
fn merge_props(graph: &PropMap, doc: &PropMap) -> PropMap {
    let mut merged: PropMap = graph
        .iter()
        .filter(|(k, _)| !k.starts_with('_'))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    for (key, value) in doc {
        if !key.starts_with('_') {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_prefers_doc_on_overlap() {
        let graph: PropMap = json!({"name": "auth", "status": "active", "_v": 1})
            .as_object()
            .unwrap()
            .clone();
        let doc: PropMap = json!({"status": "deprecated", "description": "new"})
            .as_object()
            .unwrap()
            .clone();

        let merged = merge_props(&graph, &doc);
        assert_eq!(merged["name"], json!("auth"));
        assert_eq!(merged["status"], json!("deprecated"));
        assert_eq!(merged["description"], json!("new"));
        assert!(!merged.contains_key("_v"));
    }

    #[test]
    fn merge_value_is_superset_of_both_sides() {
        let graph: PropMap = json!({"a": 1}).as_object().unwrap().clone();
        let doc: PropMap = json!({"b": 2}).as_object().unwrap().clone();
        let merged = merge_props(&graph, &doc);
        assert_eq!(merged.len(), 2);
    }
}
