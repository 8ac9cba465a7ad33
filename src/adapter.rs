//! Format adapters for the document projection.
//!
//! An adapter customizes how entity docs land on disk for a particular
//! documentation framework: the file extension, framework-specific
//! frontmatter, diagram fencing, and an optional generated index. The
//! transform must preserve the reconciliation keys (`_id`, `_label`,
//! `_syncHash`, `_version`); everything else is the adapter's business.
//!
//! Unknown adapter names resolve to the pass-through adapter, so a typo in
//! configuration degrades to plain output instead of failing a sync.

use std::path::Path;

use crate::error::Result;
use crate::models::{EntityRecord, PropMap};

/// Per-framework rendering seam.
pub trait FormatAdapter: Send + Sync {
    /// Adapter name as referenced from configuration.
    fn name(&self) -> &str;

    /// Target file extension, without the dot.
    fn extension(&self) -> &str;

    /// Rewrite base frontmatter into framework frontmatter. Must preserve
    /// `_id`, `_label`, `_syncHash`, and `_version`.
    fn transform_frontmatter(&self, base: PropMap) -> PropMap {
        base
    }

    /// Fence a relationship diagram for the target framework.
    fn wrap_diagram(&self, code: &str) -> String {
        format!("```mermaid\n{code}\n```")
    }

    /// Optionally write an index file over all rendered entities.
    fn generate_index(&self, _entities: &[EntityRecord], _output_dir: &Path) -> Result<()> {
        Ok(())
    }
}

/// Pass-through adapter; the default and the fallback for unknown names.
pub struct PlainAdapter {
    extension: String,
}

impl PlainAdapter {
    pub fn new(extension: &str) -> Self {
        Self {
            extension: extension.to_string(),
        }
    }
}

impl FormatAdapter for PlainAdapter {
    fn name(&self) -> &str {
        "plain"
    }

    fn extension(&self) -> &str {
        &self.extension
    }
}

/// Obsidian vault adapter: markdown with a wikilink index per label.
pub struct ObsidianAdapter;

impl FormatAdapter for ObsidianAdapter {
    fn name(&self) -> &str {
        "obsidian"
    }

    fn extension(&self) -> &str {
        "md"
    }

    fn transform_frontmatter(&self, mut base: PropMap) -> PropMap {
        // Obsidian surfaces `tags`; derive one from the label so vault
        // queries can group entities without touching user properties.
        if let Some(label) = base.get("_label").and_then(|v| v.as_str()) {
            let tag = format!("engram/{}", label.to_lowercase());
            base.entry("tags".to_string())
                .or_insert_with(|| serde_json::json!([tag]));
        }
        base
    }

    fn generate_index(&self, entities: &[EntityRecord], output_dir: &Path) -> Result<()> {
        let mut labels: Vec<&str> = entities
            .iter()
            .map(|r| r.entity.label.as_str())
            .collect();
        labels.sort_unstable();
        labels.dedup();

        let mut index = String::from("# Index\n");
        for label in labels {
            index.push_str(&format!("\n## {label}\n\n"));
            for record in entities.iter().filter(|r| r.entity.label == label) {
                index.push_str(&format!("- [[{label}/{}]]\n", record.entity.id));
            }
        }

        std::fs::write(output_dir.join("_index.md"), index)?;
        Ok(())
    }
}

/// Resolve an adapter by name; unknown names fall back to pass-through
/// with the configured extension.
pub fn resolve_adapter(name: Option<&str>, fallback_extension: &str) -> Box<dyn FormatAdapter> {
    match name {
        Some("obsidian") => Box::new(ObsidianAdapter),
        Some("plain") | None => Box::new(PlainAdapter::new(fallback_extension)),
        Some(other) => {
            tracing::warn!(adapter = other, "unknown format adapter, using pass-through");
            Box::new(PlainAdapter::new(fallback_extension))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_adapter_falls_back_to_plain() {
        let adapter = resolve_adapter(Some("docusaurus-v3"), "md");
        assert_eq!(adapter.name(), "plain");
        assert_eq!(adapter.extension(), "md");
    }

    #[test]
    fn obsidian_preserves_reconciliation_keys() {
        let base: PropMap = json!({
            "_id": "e1",
            "_label": "Service",
            "_version": 3,
            "_syncHash": "abc",
            "name": "auth",
        })
        .as_object()
        .unwrap()
        .clone();

        let out = ObsidianAdapter.transform_frontmatter(base);
        for key in ["_id", "_label", "_version", "_syncHash"] {
            assert!(out.contains_key(key), "{key} must survive the transform");
        }
        assert_eq!(out["tags"], json!(["engram/service"]));
    }

    #[test]
    fn default_diagram_fence_is_mermaid() {
        let adapter = PlainAdapter::new("md");
        let wrapped = adapter.wrap_diagram("graph TD\n  a --> b");
        assert!(wrapped.starts_with("```mermaid\n"));
        assert!(wrapped.ends_with("\n```"));
    }
}
