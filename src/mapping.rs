//! Declarative mapping from scanner artifacts to schema-labeled entities.
//!
//! A [`MappingRule`] turns artifacts of one kind into entities of one
//! label, resolving each target property through a [`PropertyMapping`].
//! Rules are evaluated in order; the first matching rule wins. Rules whose
//! label is unknown to the schema registry route the artifact to the
//! `unmapped` bucket instead of emitting a broken entity.
//!
//! Entity identity is content-addressed and deterministic across runs:
//! the first half of `sha256(root ":" relative_path ":" kind ":" name)`.

use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::models::PropMap;
use crate::parsers::RawArtifact;

/// Callback form of a property mapping, for library callers.
pub type ComputeFn = Arc<dyn Fn(&RawArtifact) -> Option<Value> + Send + Sync>;

/// How one target property gets its value.
///
/// From configuration this is a bare field name, a `{ from = "dotted.path" }`
/// lookup, or a `{ value = ... }` literal; the `Compute` variant is only
/// constructible from code.
#[derive(Clone)]
pub enum PropertyMapping {
    /// Bare field name, looked up on the artifact top level then `meta`.
    Field(String),
    /// Dotted path into the artifact (`meta.version`, `name`, ...).
    From(String),
    /// Literal value.
    Value(Value),
    /// Arbitrary computation over the artifact.
    Compute(ComputeFn),
}

impl std::fmt::Debug for PropertyMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Field(name) => write!(f, "Field({name})"),
            Self::From(path) => write!(f, "From({path})"),
            Self::Value(v) => write!(f, "Value({v})"),
            Self::Compute(_) => write!(f, "Compute(..)"),
        }
    }
}

impl<'de> Deserialize<'de> for PropertyMapping {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Bare(String),
            Tagged {
                #[serde(default)]
                from: Option<String>,
                #[serde(default)]
                value: Option<Value>,
            },
        }

        match Repr::deserialize(deserializer)? {
            Repr::Bare(name) => Ok(Self::Field(name)),
            Repr::Tagged {
                from: Some(path), ..
            } => Ok(Self::From(path)),
            Repr::Tagged {
                value: Some(v), ..
            } => Ok(Self::Value(v)),
            Repr::Tagged { .. } => Err(serde::de::Error::custom(
                "property mapping needs 'from' or 'value'",
            )),
        }
    }
}

/// Filter callback deciding whether a rule applies to an artifact.
pub type FilterFn = Arc<dyn Fn(&RawArtifact) -> bool + Send + Sync>;

/// One declarative mapping rule.
#[derive(Clone, Deserialize)]
pub struct MappingRule {
    /// Artifact kind this rule consumes (e.g. `"function"`).
    pub artifact_kind: String,
    /// Target schema label.
    pub label: String,
    /// Target property resolutions.
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyMapping>,
    /// Optional short-circuit predicate; only settable from code.
    #[serde(skip)]
    pub filter: Option<FilterFn>,
}

impl std::fmt::Debug for MappingRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappingRule")
            .field("artifact_kind", &self.artifact_kind)
            .field("label", &self.label)
            .field("properties", &self.properties)
            .field("filter", &self.filter.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// An artifact resolved into an upsertable entity.
#[derive(Debug, Clone)]
pub struct MappedEntity {
    pub entity_id: String,
    pub label: String,
    pub props: PropMap,
    pub artifact: RawArtifact,
}

/// Outcome of mapping one batch of artifacts.
#[derive(Debug, Default)]
pub struct MappingOutcome {
    pub mapped: Vec<MappedEntity>,
    /// Artifacts with no matching rule, or whose rule targets a label the
    /// schema does not declare.
    pub unmapped: Vec<RawArtifact>,
}

/// Deterministic, collision-resistant entity id for a scanned artifact.
pub fn artifact_entity_id(root: &str, artifact: &RawArtifact) -> String {
    let mut hasher = Sha256::new();
    hasher.update(root.as_bytes());
    hasher.update(b":");
    hasher.update(artifact.file_path.as_bytes());
    hasher.update(b":");
    hasher.update(artifact.kind.as_str().as_bytes());
    hasher.update(b":");
    hasher.update(artifact.name.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..32].to_string()
}

/// Apply the rule list to a batch of artifacts. First matching rule wins;
/// `filter` short-circuits; `known_label` gates rules against the schema.
pub fn apply_mappings(
    root: &str,
    artifacts: Vec<RawArtifact>,
    rules: &[MappingRule],
    known_label: impl Fn(&str) -> bool,
) -> MappingOutcome {
    let mut outcome = MappingOutcome::default();

    'next_artifact: for artifact in artifacts {
        for rule in rules {
            if rule.artifact_kind != artifact.kind.as_str() {
                continue;
            }
            if let Some(filter) = &rule.filter {
                if !filter(&artifact) {
                    continue;
                }
            }

            if !known_label(&rule.label) {
                outcome.unmapped.push(artifact);
                continue 'next_artifact;
            }

            let mut props = PropMap::new();
            for (target, mapping) in &rule.properties {
                if let Some(value) = resolve_mapping(mapping, &artifact) {
                    props.insert(target.clone(), value);
                }
            }

            outcome.mapped.push(MappedEntity {
                entity_id: artifact_entity_id(root, &artifact),
                label: rule.label.clone(),
                props,
                artifact,
            });
            continue 'next_artifact;
        }
        outcome.unmapped.push(artifact);
    }

    outcome
}

fn resolve_mapping(mapping: &PropertyMapping, artifact: &RawArtifact) -> Option<Value> {
    match mapping {
        PropertyMapping::Field(name) => lookup_field(artifact, name),
        PropertyMapping::From(path) => lookup_path(artifact, path),
        PropertyMapping::Value(v) => Some(v.clone()),
        PropertyMapping::Compute(f) => f(artifact),
    }
}

/// Bare field resolution: artifact top level first, then `meta`.
fn lookup_field(artifact: &RawArtifact, name: &str) -> Option<Value> {
    match name {
        "name" => Some(Value::String(artifact.name.clone())),
        "kind" => Some(Value::String(artifact.kind.as_str().to_string())),
        "filePath" | "file_path" => Some(Value::String(artifact.file_path.clone())),
        "language" => Some(Value::String(artifact.language.as_str().to_string())),
        "location" => artifact.location.map(|l| Value::Number(l.into())),
        _ => artifact.meta.get(name).cloned(),
    }
}

/// Dotted-path resolution: the first segment resolves like a bare field,
/// the rest walk nested maps.
fn lookup_path(artifact: &RawArtifact, path: &str) -> Option<Value> {
    let mut segments = path.split('.');
    let head = segments.next()?;

    let mut current = if head == "meta" {
        Value::Object(artifact.meta.clone())
    } else {
        lookup_field(artifact, head)?
    };

    for segment in segments {
        current = current.get(segment)?.clone();
    }
    Some(current)
}
