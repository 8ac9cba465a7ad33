//! Core data models for the bitemporal graph.
//!
//! Entities form an identity layer; versioned states hang off them; an
//! append-only audit log records every mutation. Relationships are separate
//! edges with their own temporal validity. The data lifecycle is:
//!
//! ```text
//! upsert → validate (registry) → Entity + State v1 ... vN → AuditEntry
//!                                       ↓
//!                               relate() → Relationship
//! ```
//!
//! # Type Relationships
//!
//! - An **[`Entity`]** is an immutable identity: created on first upsert of
//!   an id, never destroyed, only soft-deleted.
//! - A **[`State`]** is one immutable snapshot of an entity's user-defined
//!   properties with a validity interval. Exactly one state per live entity
//!   has `valid_to = None` (the head state).
//! - An **[`AuditEntry`]** is created in the same transaction as the
//!   mutation it records; never updated, never deleted.
//! - A **[`Relationship`]** is a typed, directional, temporal edge between
//!   two entities.
//!
//! Timestamps are `chrono::DateTime<Utc>` in the API and epoch milliseconds
//! in storage; milliseconds keep dense version chains distinguishable.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

/// Dynamic user-property map carried by states, relationships, and docs.
pub type PropMap = Map<String, Value>;

/// Immutable identity of a graph node.
#[derive(Debug, Clone, Serialize)]
pub struct Entity {
    /// Globally unique, stable id.
    pub id: String,
    /// One of the schema's node labels.
    pub label: String,
    pub created_at: DateTime<Utc>,
    /// Set by soft delete; never cleared.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_by: Option<String>,
}

impl Entity {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// A versioned snapshot of an entity's user properties.
#[derive(Debug, Clone, Serialize)]
pub struct State {
    pub entity_id: String,
    /// Monotonic, dense, starting at 1.
    pub version: i64,
    pub valid_from: DateTime<Utc>,
    /// `None` marks the head state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_to: Option<DateTime<Utc>>,
    pub recorded_at: DateTime<Utc>,
    pub actor: String,
    /// The user property set, schema-normalized on ingress.
    pub props: PropMap,
}

impl State {
    /// Whether this state covers instant `t`: `valid_from <= t < valid_to`.
    pub fn covers(&self, t: DateTime<Utc>) -> bool {
        self.valid_from <= t && self.valid_to.map_or(true, |end| end > t)
    }
}

/// The five recorded mutation actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Relate,
    Unrelate,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Relate => "relate",
            Self::Unrelate => "unrelate",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            "relate" => Some(Self::Relate),
            "unrelate" => Some(Self::Unrelate),
            _ => None,
        }
    }
}

/// Append-only record of one mutation.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub id: String,
    pub entity_id: String,
    pub entity_label: String,
    pub action: AuditAction,
    pub actor: String,
    pub at: DateTime<Utc>,
    /// Serialized property deltas, present on updates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changes: Option<Value>,
}

/// Typed, directional, temporal edge between two entities.
#[derive(Debug, Clone, Serialize)]
pub struct Relationship {
    pub id: String,
    pub from_id: String,
    pub to_id: String,
    pub rel_type: String,
    pub valid_from: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_to: Option<DateTime<Utc>>,
    pub actor: String,
    pub props: PropMap,
}

/// Direction of an edge relative to the queried entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Outgoing,
    Incoming,
}

/// An edge tagged with its direction relative to a queried entity.
#[derive(Debug, Clone, Serialize)]
pub struct DirectedRelationship {
    pub direction: Direction,
    #[serde(flatten)]
    pub relationship: Relationship,
}

/// An entity paired with one of its states (usually the head).
#[derive(Debug, Clone, Serialize)]
pub struct EntityRecord {
    pub entity: Entity,
    pub state: State,
}

/// Result of an upsert through the mutation pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct UpsertOutcome {
    pub id: String,
    pub version: i64,
    pub created: bool,
}

/// One changed property in a state-to-state diff.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyDelta {
    pub property: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new: Option<Value>,
}

/// Diff between two states of the same entity.
#[derive(Debug, Clone, Serialize)]
pub struct StateDiff {
    pub entity_id: String,
    pub from_version: i64,
    pub to_version: i64,
    pub changes: Vec<PropertyDelta>,
}

/// Summary row returned by `changes-since`.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeSummary {
    pub entity_id: String,
    pub entity_label: String,
    pub last_action: AuditAction,
    pub last_actor: String,
    pub last_at: DateTime<Utc>,
}

/// Full graph snapshot at one instant: states plus active edges.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub at: DateTime<Utc>,
    pub entities: Vec<EntityRecord>,
    pub relationships: Vec<Relationship>,
}

/// Filter operators accepted by `search`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Contains,
    Gt,
    Lt,
    Gte,
    Lte,
    In,
}

impl FilterOp {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "eq" => Some(Self::Eq),
            "contains" => Some(Self::Contains),
            "gt" => Some(Self::Gt),
            "lt" => Some(Self::Lt),
            "gte" => Some(Self::Gte),
            "lte" => Some(Self::Lte),
            "in" => Some(Self::In),
            _ => None,
        }
    }
}

/// One conjunctive predicate over head-state properties.
#[derive(Debug, Clone)]
pub struct Filter {
    pub property: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    /// Evaluate this predicate against one property map.
    pub fn matches(&self, props: &PropMap) -> bool {
        let actual = props.get(&self.property);
        match self.op {
            FilterOp::Eq => actual == Some(&self.value),
            FilterOp::Contains => match (actual, &self.value) {
                (Some(Value::String(hay)), Value::String(needle)) => hay.contains(needle.as_str()),
                (Some(Value::Array(items)), needle) => items.contains(needle),
                _ => false,
            },
            FilterOp::Gt | FilterOp::Lt | FilterOp::Gte | FilterOp::Lte => {
                let Some(actual) = actual else { return false };
                let Some(ord) = compare_values(actual, &self.value) else {
                    return false;
                };
                match self.op {
                    FilterOp::Gt => ord.is_gt(),
                    FilterOp::Lt => ord.is_lt(),
                    FilterOp::Gte => ord.is_ge(),
                    FilterOp::Lte => ord.is_le(),
                    _ => unreachable!(),
                }
            }
            FilterOp::In => match &self.value {
                Value::Array(options) => actual.map_or(false, |a| options.contains(a)),
                _ => false,
            },
        }
    }
}

/// Ordering between two JSON scalars of the same shape: numbers compare
/// numerically, strings lexicographically. Mixed shapes are unordered.
fn compare_values(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}
