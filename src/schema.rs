//! Declarative schema definitions.
//!
//! A [`SchemaDef`] describes the node labels, edge types, and storage
//! constraints the graph accepts. It is loaded once at startup from the
//! `[schema]` section of the config file (or a sidecar file the section
//! points at) and compiled into validators by [`crate::registry`].
//!
//! # Property kinds
//!
//! | Kind | Accepts |
//! |------|---------|
//! | `string` | JSON string |
//! | `number` | JSON number (integer or float) |
//! | `boolean` | JSON boolean |
//! | `date` | ISO-8601 date or date-time with offset |
//! | `url` | absolute URL with scheme and host |
//! | `email` | `local@domain` with a dotted domain |
//! | `enum` | one of the declared `values` (case-insensitive on input) |
//! | `string_list` | JSON array whose elements are all strings |
//! | `json` | anything |

use serde::Deserialize;
use std::collections::BTreeMap;

/// Relationship types reserved for the version/audit structure.
///
/// User edge types must not collide with these; the registry rejects the
/// schema at startup if they do.
pub const RESERVED_EDGE_TYPES: [&str; 3] = ["CURRENT", "PREVIOUS", "AUDITED"];

/// The kind of a single property, driving per-kind validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKind {
    String,
    Number,
    Boolean,
    Date,
    Url,
    Email,
    Enum,
    StringList,
    Json,
}

/// Declaration of one property on a node label or edge type.
#[derive(Debug, Clone, Deserialize)]
pub struct PropertyDef {
    pub kind: PropertyKind,
    #[serde(default)]
    pub required: bool,
    /// Enum members; only meaningful when `kind` is `enum`.
    #[serde(default)]
    pub values: Vec<String>,
    /// Applied when the key is absent from the input map.
    #[serde(default)]
    pub default: Option<serde_json::Value>,
}

/// Declaration of one node label.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeDef {
    pub label: String,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyDef>,
    /// Properties whose head-state values must be unique per label.
    #[serde(default)]
    pub unique_keys: Vec<String>,
}

/// Declaration of one edge type between two labels.
#[derive(Debug, Clone, Deserialize)]
pub struct EdgeDef {
    #[serde(rename = "type")]
    pub rel_type: String,
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyDef>,
}

/// A label/property pair to index at the storage level.
#[derive(Debug, Clone, Deserialize)]
pub struct ConstraintDef {
    pub label: String,
    pub property: String,
    pub kind: PropertyKind,
}

/// The full declarative schema, loaded at startup.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SchemaDef {
    #[serde(default)]
    pub nodes: Vec<NodeDef>,
    #[serde(default)]
    pub edges: Vec<EdgeDef>,
    #[serde(default)]
    pub constraints: Vec<ConstraintDef>,
}

/// Checks the identifier discipline for labels and relationship types:
/// `[A-Za-z_][A-Za-z0-9_]*`. This is a hard contract — identifiers that
/// fail it are never interpolated anywhere near a storage query.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
