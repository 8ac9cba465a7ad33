//! Error types for the engram graph.

use thiserror::Error;

/// A single schema violation inside a property map.
///
/// `path` is the offending key (dotted for nested values), `message`
/// explains the cause. A [`GraphError::Validation`] carries every issue
/// found in one pass so callers can fix all of them at once.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Errors that can occur in the graph system.
#[derive(Debug, Error)]
pub enum GraphError {
    /// One or more properties violated the schema.
    #[error("validation failed: {message}")]
    Validation {
        message: String,
        issues: Vec<ValidationIssue>,
    },

    /// The schema declares no node with this label.
    #[error("unknown label: {0}")]
    UnknownLabel(String),

    /// The schema declares no edge for this (from, type, to) triple.
    #[error("unknown edge: ({from})-[{rel_type}]->({to})")]
    UnknownEdge {
        from: String,
        rel_type: String,
        to: String,
    },

    /// An entity or state was required but missing.
    #[error("not found: {0}")]
    NotFound(String),

    /// Transport, driver, or serialization failure at the storage boundary.
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Reconciliation aborted under the `fail` strategy.
    #[error("sync conflict on entity {entity_id} ({label}): graph hash {graph_hash} != doc hash {doc_hash}")]
    Conflict {
        entity_id: String,
        label: String,
        graph_hash: String,
        doc_hash: String,
    },

    /// A document or source file could not be parsed.
    #[error("parse error in {path}: {message}")]
    Parse { path: String, message: String },

    /// The scan target does not exist or could not be reached.
    #[error("scan target error: {0}")]
    Target(String),

    /// JSON serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML frontmatter serialization error.
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl GraphError {
    /// Build a validation error from collected issues, concatenating the
    /// per-path messages into one human-readable line.
    pub fn validation(issues: Vec<ValidationIssue>) -> Self {
        let message = issues
            .iter()
            .map(|i| format!("{}: {}", i.path, i.message))
            .collect::<Vec<_>>()
            .join("; ");
        Self::Validation { message, issues }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn parse(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn target(msg: impl Into<String>) -> Self {
        Self::Target(msg.into())
    }

    /// Whether a storage error is transient and worth a single retry.
    ///
    /// SQLite reports lock contention as `SQLITE_BUSY`/`SQLITE_LOCKED`;
    /// everything else is treated as persistent.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Storage(sqlx::Error::Database(db)) => {
                let code = db.code();
                matches!(code.as_deref(), Some("5") | Some("6") | Some("517"))
            }
            _ => false,
        }
    }
}

/// Result type for graph operations.
pub type Result<T> = std::result::Result<T, GraphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_concatenates_issue_messages() {
        let err = GraphError::validation(vec![
            ValidationIssue::new("name", "required property missing"),
            ValidationIssue::new("status", "not a member of the enum"),
        ]);
        let text = err.to_string();
        assert!(text.contains("name: required property missing"));
        assert!(text.contains("status: not a member of the enum"));
    }

    #[test]
    fn unknown_edge_names_the_triple() {
        let err = GraphError::UnknownEdge {
            from: "Service".into(),
            rel_type: "DEPENDS_ON".into(),
            to: "Database".into(),
        };
        assert_eq!(
            err.to_string(),
            "unknown edge: (Service)-[DEPENDS_ON]->(Database)"
        );
    }
}
