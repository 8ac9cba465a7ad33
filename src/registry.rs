//! Schema registry and validator compiler.
//!
//! Compiles a [`SchemaDef`] into per-label node validators and per-triple
//! edge validators, once, at startup. Compilation errors (an enum with no
//! members, a reserved edge type, an edge referencing an undeclared label)
//! are fatal; per-mutation validation failures surface as
//! [`GraphError::Validation`] with one issue per offending path.
//!
//! The registry is immutable after compilation and shared across all
//! readers without locks.

use anyhow::{bail, Result as CompileResult};
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::error::{GraphError, Result, ValidationIssue};
use crate::schema::{
    is_valid_identifier, NodeDef, PropertyDef, PropertyKind, SchemaDef, RESERVED_EDGE_TYPES,
};

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.-]*://[^\s]+$").unwrap());
static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());

/// A compiled validator for one node label.
///
/// Given an arbitrary property map, returns either the normalized map
/// (defaults applied, enum members canonicalized to their declared casing)
/// or a [`GraphError::Validation`] listing every offending path.
#[derive(Debug, Clone)]
pub struct NodeValidator {
    pub label: String,
    properties: std::collections::BTreeMap<String, PropertyDef>,
}

/// A compiled validator for one edge type.
///
/// Edge validators with no declared properties accept any map, including
/// an empty one; with declared properties they behave like node validators.
#[derive(Debug, Clone)]
pub struct EdgeValidator {
    pub rel_type: String,
    pub from: String,
    pub to: String,
    properties: std::collections::BTreeMap<String, PropertyDef>,
}

/// Compiled lookup tables: `label -> NodeValidator` and
/// `(from, type, to) -> EdgeValidator`.
#[derive(Debug)]
pub struct SchemaRegistry {
    nodes: HashMap<String, NodeValidator>,
    edges: HashMap<(String, String, String), EdgeValidator>,
    schema: SchemaDef,
}

impl SchemaRegistry {
    /// Compile the declarative schema into validators.
    ///
    /// Fatal on: invalid identifiers, reserved relationship types,
    /// duplicate labels or edge triples, enums with no members, edges
    /// referencing undeclared labels, and unique keys naming undeclared
    /// properties.
    pub fn compile(schema: SchemaDef) -> CompileResult<Self> {
        let mut nodes = HashMap::new();
        for node in &schema.nodes {
            if !is_valid_identifier(&node.label) {
                bail!("invalid node label: '{}'", node.label);
            }
            check_property_defs(&node.label, node)?;
            for key in &node.unique_keys {
                if !node.properties.contains_key(key) {
                    bail!(
                        "unique key '{}' on label '{}' names an undeclared property",
                        key,
                        node.label
                    );
                }
            }
            let validator = NodeValidator {
                label: node.label.clone(),
                properties: node.properties.clone(),
            };
            if nodes.insert(node.label.clone(), validator).is_some() {
                bail!("duplicate node label: '{}'", node.label);
            }
        }

        let mut edges = HashMap::new();
        for edge in &schema.edges {
            if !is_valid_identifier(&edge.rel_type) {
                bail!("invalid relationship type: '{}'", edge.rel_type);
            }
            if RESERVED_EDGE_TYPES.contains(&edge.rel_type.as_str()) {
                bail!(
                    "relationship type '{}' collides with the reserved structural namespace",
                    edge.rel_type
                );
            }
            if !nodes.contains_key(&edge.from) {
                bail!(
                    "edge '{}' references undeclared label '{}'",
                    edge.rel_type,
                    edge.from
                );
            }
            if !nodes.contains_key(&edge.to) {
                bail!(
                    "edge '{}' references undeclared label '{}'",
                    edge.rel_type,
                    edge.to
                );
            }
            for (name, def) in &edge.properties {
                if def.kind == PropertyKind::Enum && def.values.is_empty() {
                    bail!(
                        "enum property '{}' on edge '{}' has no members",
                        name,
                        edge.rel_type
                    );
                }
            }
            let key = (edge.from.clone(), edge.rel_type.clone(), edge.to.clone());
            let validator = EdgeValidator {
                rel_type: edge.rel_type.clone(),
                from: edge.from.clone(),
                to: edge.to.clone(),
                properties: edge.properties.clone(),
            };
            if edges.insert(key, validator).is_some() {
                bail!(
                    "duplicate edge declaration: ({})-[{}]->({})",
                    edge.from,
                    edge.rel_type,
                    edge.to
                );
            }
        }

        for constraint in &schema.constraints {
            if !nodes.contains_key(&constraint.label) {
                bail!(
                    "constraint references undeclared label '{}'",
                    constraint.label
                );
            }
        }

        Ok(Self {
            nodes,
            edges,
            schema,
        })
    }

    /// O(1) node validator lookup.
    pub fn node_validator(&self, label: &str) -> Option<&NodeValidator> {
        self.nodes.get(label)
    }

    /// O(1) edge validator lookup by `(from, type, to)`.
    pub fn edge_validator(&self, from: &str, rel_type: &str, to: &str) -> Option<&EdgeValidator> {
        self.edges
            .get(&(from.to_string(), rel_type.to_string(), to.to_string()))
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.nodes.contains_key(label)
    }

    pub fn labels(&self) -> Vec<&str> {
        let mut labels: Vec<&str> = self.nodes.keys().map(String::as_str).collect();
        labels.sort_unstable();
        labels
    }

    /// Whether any declared edge uses this relationship type, regardless of
    /// endpoint labels. Used by the scanner's ref resolver.
    pub fn has_edge_type(&self, rel_type: &str) -> bool {
        self.edges.keys().any(|(_, t, _)| t == rel_type)
    }

    pub fn schema(&self) -> &SchemaDef {
        &self.schema
    }

    /// The compiled `{nodes, edges}` view exposed as the `schema` resource.
    pub fn describe(&self) -> Value {
        let mut node_list: Vec<Value> = Vec::new();
        for label in self.labels() {
            let node = &self.nodes[label];
            let props: Map<String, Value> = node
                .properties
                .iter()
                .map(|(name, def)| (name.clone(), describe_property(def)))
                .collect();
            node_list.push(serde_json::json!({ "label": label, "properties": props }));
        }
        let mut edge_list: Vec<Value> = self
            .edges
            .values()
            .map(|e| {
                serde_json::json!({
                    "type": e.rel_type,
                    "from": e.from,
                    "to": e.to,
                })
            })
            .collect();
        edge_list.sort_by_key(|e| e.to_string());
        serde_json::json!({ "nodes": node_list, "edges": edge_list })
    }
}

fn describe_property(def: &PropertyDef) -> Value {
    let mut out = Map::new();
    out.insert(
        "kind".into(),
        Value::String(format!("{:?}", def.kind).to_lowercase()),
    );
    out.insert("required".into(), Value::Bool(def.required));
    if !def.values.is_empty() {
        out.insert(
            "values".into(),
            Value::Array(def.values.iter().cloned().map(Value::String).collect()),
        );
    }
    if let Some(default) = &def.default {
        out.insert("default".into(), default.clone());
    }
    Value::Object(out)
}

fn check_property_defs(label: &str, node: &NodeDef) -> CompileResult<()> {
    for (name, def) in &node.properties {
        if def.kind == PropertyKind::Enum && def.values.is_empty() {
            bail!("enum property '{}' on label '{}' has no members", name, label);
        }
    }
    Ok(())
}

impl NodeValidator {
    /// Validate and normalize a property map against this label.
    pub fn validate(&self, props: &Map<String, Value>) -> Result<Map<String, Value>> {
        validate_props(&self.properties, props)
    }
}

impl EdgeValidator {
    /// Validate and normalize a property map against this edge type.
    pub fn validate(&self, props: &Map<String, Value>) -> Result<Map<String, Value>> {
        if self.properties.is_empty() {
            // No declared properties: accept any map as-is.
            return Ok(props.clone());
        }
        validate_props(&self.properties, props)
    }
}

/// Shared validation core for node and edge property maps.
///
/// Unknown top-level keys are rejected (strict mode). Defaults are applied
/// only when the key is absent from the input.
fn validate_props(
    defs: &std::collections::BTreeMap<String, PropertyDef>,
    props: &Map<String, Value>,
) -> Result<Map<String, Value>> {
    let mut issues = Vec::new();
    let mut normalized = Map::new();

    for key in props.keys() {
        if !defs.contains_key(key) {
            issues.push(ValidationIssue::new(key, "unknown property"));
        }
    }

    for (name, def) in defs {
        match props.get(name) {
            Some(value) => match check_value(name, def, value) {
                Ok(canonical) => {
                    normalized.insert(name.clone(), canonical);
                }
                Err(issue) => issues.push(issue),
            },
            None => {
                if let Some(default) = &def.default {
                    normalized.insert(name.clone(), default.clone());
                } else if def.required {
                    issues.push(ValidationIssue::new(name, "required property missing"));
                }
            }
        }
    }

    if issues.is_empty() {
        Ok(normalized)
    } else {
        Err(GraphError::validation(issues))
    }
}

/// Per-kind value check; returns the canonical value on success.
fn check_value(
    name: &str,
    def: &PropertyDef,
    value: &Value,
) -> std::result::Result<Value, ValidationIssue> {
    match def.kind {
        PropertyKind::String => match value {
            Value::String(_) => Ok(value.clone()),
            _ => Err(ValidationIssue::new(name, "expected a string")),
        },
        PropertyKind::Number => match value {
            Value::Number(_) => Ok(value.clone()),
            _ => Err(ValidationIssue::new(name, "expected a number")),
        },
        PropertyKind::Boolean => match value {
            Value::Bool(_) => Ok(value.clone()),
            _ => Err(ValidationIssue::new(name, "expected a boolean")),
        },
        PropertyKind::Date => match value {
            Value::String(s) if is_iso_date(s) => Ok(value.clone()),
            Value::String(_) => Err(ValidationIssue::new(
                name,
                "expected an ISO-8601 date or date-time with offset",
            )),
            _ => Err(ValidationIssue::new(name, "expected a date string")),
        },
        PropertyKind::Url => match value {
            Value::String(s) if URL_RE.is_match(s) => Ok(value.clone()),
            _ => Err(ValidationIssue::new(name, "expected a URL")),
        },
        PropertyKind::Email => match value {
            Value::String(s) if EMAIL_RE.is_match(s) => Ok(value.clone()),
            _ => Err(ValidationIssue::new(name, "expected an email address")),
        },
        PropertyKind::Enum => match value {
            Value::String(s) => {
                // Canonicalize to the declared casing.
                match def.values.iter().find(|v| v.eq_ignore_ascii_case(s)) {
                    Some(canonical) => Ok(Value::String(canonical.clone())),
                    None => Err(ValidationIssue::new(
                        name,
                        format!("not a member of the enum [{}]", def.values.join(", ")),
                    )),
                }
            }
            _ => Err(ValidationIssue::new(name, "expected an enum string")),
        },
        PropertyKind::StringList => match value {
            Value::Array(items) if items.iter().all(Value::is_string) => Ok(value.clone()),
            _ => Err(ValidationIssue::new(name, "expected a list of strings")),
        },
        PropertyKind::Json => Ok(value.clone()),
    }
}

fn is_iso_date(s: &str) -> bool {
    chrono::DateTime::parse_from_rfc3339(s).is_ok()
        || chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}
