//! Document projection: entity state → file tree.
//!
//! Maps each current-state entity to one file under the output directory,
//! `{label}/{id}.{ext}` by default. The frontmatter carries the
//! reconciliation keys (`_id`, `_label`, `_version`, `_syncHash`) plus
//! every non-underscore property except `content`, which becomes the body
//! so humans edit prose rather than YAML. An optional relationship
//! diagram is appended under a `## Relationships` heading; the parser
//! strips it when reading `content` back.
//!
//! The renderer is idempotent: a file whose byte content already equals
//! what would be produced is never rewritten.

use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::adapter::FormatAdapter;
use crate::canonical::compute_sync_hash;
use crate::error::Result;
use crate::models::{Direction, DirectedRelationship, EntityRecord, PropMap};

/// Heading that separates user content from the generated diagram.
pub const RELATIONSHIPS_HEADING: &str = "## Relationships";

/// Counters from one tree render.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub written: usize,
    pub unchanged: usize,
    pub removed: usize,
}

/// Relative doc path for one entity.
pub fn doc_path(label: &str, id: &str, ext: &str, template: Option<&str>) -> PathBuf {
    let pattern = template.unwrap_or("{label}/{id}.{ext}");
    PathBuf::from(
        pattern
            .replace("{label}", label)
            .replace("{id}", id)
            .replace("{ext}", ext),
    )
}

/// Render one entity to its document text.
pub fn render_doc(
    record: &EntityRecord,
    edges: &[DirectedRelationship],
    adapter: &dyn FormatAdapter,
) -> Result<String> {
    let state = &record.state;

    let mut frontmatter = PropMap::new();
    frontmatter.insert("_id".into(), Value::String(record.entity.id.clone()));
    frontmatter.insert("_label".into(), Value::String(record.entity.label.clone()));
    frontmatter.insert("_version".into(), Value::Number(state.version.into()));
    frontmatter.insert(
        "_syncHash".into(),
        Value::String(compute_sync_hash(&state.props)),
    );
    for (key, value) in &state.props {
        if !key.starts_with('_') && key != "content" {
            frontmatter.insert(key.clone(), value.clone());
        }
    }
    let frontmatter = adapter.transform_frontmatter(frontmatter);

    let yaml = serde_yaml::to_string(&Value::Object(frontmatter))?;

    let mut out = String::new();
    out.push_str("---\n");
    out.push_str(&yaml);
    out.push_str("---\n");

    let content = state
        .props
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if !content.is_empty() {
        out.push('\n');
        out.push_str(content.trim_end());
        out.push('\n');
    }

    if !edges.is_empty() {
        out.push('\n');
        out.push_str(RELATIONSHIPS_HEADING);
        out.push_str("\n\n");
        out.push_str(&adapter.wrap_diagram(&relationship_diagram(&record.entity.id, edges)));
        out.push('\n');
    }

    Ok(out)
}

/// Textual graph description of an entity's active edges, outgoing then
/// incoming, deterministic order.
fn relationship_diagram(entity_id: &str, edges: &[DirectedRelationship]) -> String {
    let mut lines = vec!["graph TD".to_string()];
    let this = node_ref(entity_id);
    for edge in edges {
        let rel = &edge.relationship;
        match edge.direction {
            Direction::Outgoing => lines.push(format!(
                "    {this} -->|{}| {}",
                rel.rel_type,
                node_ref(&rel.to_id)
            )),
            Direction::Incoming => lines.push(format!(
                "    {} -->|{}| {this}",
                node_ref(&rel.from_id),
                rel.rel_type
            )),
        }
    }
    lines.join("\n")
}

/// Mermaid node reference: short alphanumeric id with the full id as label.
fn node_ref(id: &str) -> String {
    let short: String = id.chars().filter(char::is_ascii_alphanumeric).take(8).collect();
    format!("n{short}[\"{id}\"]")
}

/// Render the full current-state tree.
///
/// Writes every entity's doc (skipping byte-identical files), prunes
/// stale docs under the managed label directories, and asks the adapter
/// for an index. `edges_for` supplies each entity's active edges.
pub fn render_tree(
    records: &[EntityRecord],
    edges_for: impl Fn(&str) -> Vec<DirectedRelationship>,
    output_dir: &Path,
    template: Option<&str>,
    adapter: &dyn FormatAdapter,
) -> Result<RenderStats> {
    let ext = adapter.extension();
    let mut stats = RenderStats::default();
    let mut expected: HashSet<PathBuf> = HashSet::new();
    let mut labels: HashSet<&str> = HashSet::new();

    for record in records {
        let rel_path = doc_path(&record.entity.label, &record.entity.id, ext, template);
        let path = output_dir.join(&rel_path);
        expected.insert(path.clone());
        labels.insert(record.entity.label.as_str());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let rendered = render_doc(record, &edges_for(&record.entity.id), adapter)?;
        match std::fs::read_to_string(&path) {
            Ok(existing) if existing == rendered => {
                stats.unchanged += 1;
            }
            _ => {
                std::fs::write(&path, rendered)?;
                stats.written += 1;
            }
        }
    }

    // Prune docs for entities that no longer exist, but only inside the
    // label directories this projection manages.
    for label in &labels {
        let label_dir = output_dir.join(label);
        let Ok(entries) = std::fs::read_dir(&label_dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let is_doc = path.extension().and_then(|e| e.to_str()) == Some(ext);
            if is_doc && !expected.contains(&path) {
                std::fs::remove_file(&path)?;
                stats.removed += 1;
            }
        }
    }

    adapter.generate_index(records, output_dir)?;
    Ok(stats)
}
