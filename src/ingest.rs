//! Scanner ingest: mapped entities into the graph, two passes.
//!
//! Pass one upserts every mapped entity under its deterministic id,
//! collecting per-artifact errors without ever aborting the batch. An
//! upsert whose properties deep-equal the current head is skipped, so an
//! unchanged symbol in a changed file does not grow a new version.
//!
//! Pass two resolves every artifact ref against the batch — direct id
//! match first, then name match, then file-path match for `file`
//! artifacts — and creates the corresponding edge through the mutation
//! pipeline when the schema declares the relationship type. Relationship
//! failures are silent: a schema is free not to declare every ref kind.

use std::collections::HashMap;

use crate::canonical::user_props_equal;
use crate::error::Result;
use crate::mapping::MappedEntity;
use crate::mutate;
use crate::parsers::ArtifactKind;
use crate::registry::SchemaRegistry;
use crate::store::TemporalStore;

/// Counters from one ingest batch.
#[derive(Debug, Default)]
pub struct IngestStats {
    pub entities_upserted: usize,
    pub entities_skipped: usize,
    pub relationships_created: usize,
    pub errors: Vec<String>,
}

/// Run both ingest passes. With `dry_run`, nothing is written and only
/// the would-upsert counters are produced.
pub async fn ingest_batch(
    store: &TemporalStore,
    registry: &SchemaRegistry,
    batch: &[MappedEntity],
    actor: &str,
    dry_run: bool,
) -> Result<IngestStats> {
    let mut stats = IngestStats::default();

    // Pass 1: upsert entities.
    for entity in batch {
        if dry_run {
            stats.entities_upserted += 1;
            continue;
        }

        match store.get_current(&entity.entity_id).await? {
            Some(current) if user_props_equal(&current.state.props, &entity.props) => {
                stats.entities_skipped += 1;
            }
            _ => {
                match mutate::upsert(
                    store,
                    registry,
                    &entity.label,
                    Some(&entity.entity_id),
                    &entity.props,
                    actor,
                )
                .await
                {
                    Ok(_) => stats.entities_upserted += 1,
                    Err(err) => stats.errors.push(format!(
                        "{} ({}): {err}",
                        entity.artifact.name, entity.label
                    )),
                }
            }
        }
    }

    if dry_run {
        return Ok(stats);
    }

    // Pass 2: resolve refs and create edges.
    let by_id: HashMap<&str, &MappedEntity> = batch
        .iter()
        .map(|e| (e.entity_id.as_str(), e))
        .collect();
    let mut by_name: HashMap<&str, &MappedEntity> = HashMap::new();
    let mut by_path: HashMap<&str, &MappedEntity> = HashMap::new();
    for entity in batch {
        by_name.entry(entity.artifact.name.as_str()).or_insert(entity);
        if entity.artifact.kind == ArtifactKind::File {
            by_path
                .entry(entity.artifact.file_path.as_str())
                .or_insert(entity);
        }
    }

    for entity in batch {
        for artifact_ref in &entity.artifact.refs {
            let target = by_id
                .get(artifact_ref.target.as_str())
                .or_else(|| by_name.get(artifact_ref.target.as_str()))
                .or_else(|| by_path.get(artifact_ref.target.as_str()));
            let Some(target) = target else { continue };
            if target.entity_id == entity.entity_id {
                continue;
            }

            let rel_type = artifact_ref.kind.edge_type();
            if registry
                .edge_validator(&entity.label, rel_type, &target.label)
                .is_none()
            {
                // Schema does not declare this ref kind for these labels.
                continue;
            }

            match mutate::relate(
                store,
                registry,
                &entity.entity_id,
                &target.entity_id,
                rel_type,
                &entity.label,
                &target.label,
                None,
                actor,
            )
            .await
            {
                Ok(_) => stats.relationships_created += 1,
                Err(err) => {
                    tracing::debug!(
                        from = %entity.entity_id,
                        to = %target.entity_id,
                        rel_type,
                        error = %err,
                        "skipping unresolvable relationship"
                    );
                }
            }
        }
    }

    Ok(stats)
}
