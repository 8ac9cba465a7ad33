//! Document tree parser: files → structured docs.
//!
//! The read side of the projection. Walks the output tree for files with
//! the target extension, splits the `---` frontmatter fences, and decodes
//! the YAML header. Files missing `_id` or `_label` are skipped with a
//! warning — never an abort, since humans drop scratch files into doc
//! trees all the time.

use serde_json::Value;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{GraphError, Result};
use crate::models::PropMap;
use crate::render::RELATIONSHIPS_HEADING;

/// One parsed document from the tree.
#[derive(Debug, Clone)]
pub struct ParsedDoc {
    pub file_path: PathBuf,
    pub relative_path: String,
    pub frontmatter: PropMap,
    /// Body text with the generated relationships section stripped.
    pub content: String,
    pub raw: String,
}

impl ParsedDoc {
    pub fn id(&self) -> Option<&str> {
        self.frontmatter.get("_id").and_then(Value::as_str)
    }

    pub fn label(&self) -> Option<&str> {
        self.frontmatter.get("_label").and_then(Value::as_str)
    }

    pub fn sync_hash(&self) -> Option<&str> {
        self.frontmatter.get("_syncHash").and_then(Value::as_str)
    }

    /// The doc-side user property map: non-underscore frontmatter keys
    /// plus the body as `content` when non-empty.
    pub fn user_props(&self) -> PropMap {
        let mut props: PropMap = self
            .frontmatter
            .iter()
            .filter(|(k, _)| !k.starts_with('_'))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if !self.content.is_empty() {
            props.insert("content".into(), Value::String(self.content.clone()));
        }
        props
    }
}

/// Split a raw document into frontmatter and body.
pub fn split_frontmatter(raw: &str) -> Result<(PropMap, String)> {
    let rest = raw
        .strip_prefix("---\n")
        .or_else(|| raw.strip_prefix("---\r\n"))
        .ok_or_else(|| GraphError::parse("<doc>", "missing frontmatter open fence"))?;

    let (end, fence_len) = match rest.find("\n---\n") {
        Some(i) => (i, "\n---\n".len()),
        None => {
            let i = rest
                .find("\n---\r\n")
                .ok_or_else(|| GraphError::parse("<doc>", "missing frontmatter close fence"))?;
            (i, "\n---\r\n".len())
        }
    };

    let header = &rest[..end];
    let body = rest[end + fence_len..].trim_start_matches('\n');

    let yaml: serde_yaml::Value = serde_yaml::from_str(header)
        .map_err(|e| GraphError::parse("<doc>", format!("frontmatter is not valid YAML: {e}")))?;
    let json = serde_json::to_value(yaml)?;
    let frontmatter = json
        .as_object()
        .cloned()
        .ok_or_else(|| GraphError::parse("<doc>", "frontmatter is not a map"))?;

    Ok((frontmatter, body.to_string()))
}

/// Strip the generated relationships section from a body, leaving the
/// user's content.
pub fn strip_relationships_section(body: &str) -> String {
    match body.find(RELATIONSHIPS_HEADING) {
        Some(idx) => body[..idx].trim_end().to_string(),
        None => body.trim_end().to_string(),
    }
}

/// Parse one document file.
pub fn parse_doc_file(path: &Path, root: &Path) -> Result<ParsedDoc> {
    let raw = std::fs::read_to_string(path)?;
    let (frontmatter, body) = split_frontmatter(&raw).map_err(|e| match e {
        GraphError::Parse { message, .. } => {
            GraphError::parse(path.display().to_string(), message)
        }
        other => other,
    })?;

    let relative_path = path
        .strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .to_string();

    Ok(ParsedDoc {
        file_path: path.to_path_buf(),
        relative_path,
        content: strip_relationships_section(&body),
        frontmatter,
        raw,
    })
}

/// Parse every `*.{ext}` file under `docs_dir`.
///
/// Unparseable files and docs without `_id`/`_label` are skipped with a
/// warning; the scan of the rest continues.
pub fn parse_doc_tree(docs_dir: &Path, ext: &str) -> Result<Vec<ParsedDoc>> {
    let mut docs = Vec::new();
    if !docs_dir.exists() {
        return Ok(docs);
    }

    for entry in WalkDir::new(docs_dir) {
        let entry = entry.map_err(|e| {
            GraphError::parse(docs_dir.display().to_string(), e.to_string())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(ext) {
            continue;
        }
        // Generated indexes are not entity docs.
        if path.file_name().and_then(|n| n.to_str()) == Some("_index.md") {
            continue;
        }

        match parse_doc_file(path, docs_dir) {
            Ok(doc) => {
                if doc.id().is_none() || doc.label().is_none() {
                    tracing::warn!(
                        path = %path.display(),
                        "skipping doc without _id/_label frontmatter"
                    );
                    continue;
                }
                docs.push(doc);
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "skipping unparseable doc");
            }
        }
    }

    docs.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(docs)
}
