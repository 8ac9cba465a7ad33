//! Temporal store: the only process → storage boundary.
//!
//! Persists the entity/state/audit model on SQLite and exposes atomic
//! mutation primitives plus the fixed temporal read set. Every mutation
//! primitive runs in a single `BEGIN IMMEDIATE` transaction: the write
//! lock is taken before the first read, so a read-then-write primitive
//! never acts on a stale snapshot, and the whole primitive either fully
//! applies or fully aborts. Lock contention surfaces as `SQLITE_BUSY`
//! within the configured busy timeout; every primitive retries such
//! transient failures exactly once.
//!
//! Version-chain representation: the CURRENT link is
//! `entities.current_version`, the PREVIOUS chain is the dense version
//! sequence, and head states satisfy `valid_to IS NULL`. The reserved
//! structural relationship types (`CURRENT`, `PREVIOUS`, `AUDITED`) never
//! appear in the `relationships` table by construction, so user-facing
//! relationship reads cannot leak them.
//!
//! Labels and relationship types are validated against the identifier
//! discipline before any statement references them; property values are
//! always bound as parameters.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Connection, Row, SqlitePool};
use uuid::Uuid;

use crate::error::{GraphError, Result};
use crate::models::{
    AuditAction, AuditEntry, ChangeSummary, DirectedRelationship, Direction, Entity, EntityRecord,
    Filter, PropMap, Relationship, Snapshot, State,
};
use crate::schema::is_valid_identifier;

/// Handle on the graph storage backend.
#[derive(Debug, Clone)]
pub struct TemporalStore {
    pool: SqlitePool,
}

fn ms(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

fn from_ms(v: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(v).unwrap_or(DateTime::UNIX_EPOCH)
}

fn parse_props(raw: &str) -> PropMap {
    serde_json::from_str::<Value>(raw)
        .ok()
        .and_then(|v| v.as_object().cloned())
        .unwrap_or_default()
}

fn check_identifier(name: &str, what: &str) -> Result<()> {
    if is_valid_identifier(name) {
        Ok(())
    } else {
        Err(GraphError::parse(
            name.to_string(),
            format!("invalid {what} identifier"),
        ))
    }
}

fn entity_from_row(row: &SqliteRow) -> Entity {
    Entity {
        id: row.get("id"),
        label: row.get("label"),
        created_at: from_ms(row.get("created_at")),
        deleted_at: row
            .get::<Option<i64>, _>("deleted_at")
            .map(from_ms),
        deleted_by: row.get("deleted_by"),
    }
}

fn state_from_row(row: &SqliteRow) -> State {
    State {
        entity_id: row.get("entity_id"),
        version: row.get("version"),
        valid_from: from_ms(row.get("valid_from")),
        valid_to: row.get::<Option<i64>, _>("valid_to").map(from_ms),
        recorded_at: from_ms(row.get("recorded_at")),
        actor: row.get("actor"),
        props: parse_props(row.get::<String, _>("props").as_str()),
    }
}

fn relationship_from_row(row: &SqliteRow) -> Relationship {
    Relationship {
        id: row.get("id"),
        from_id: row.get("from_id"),
        to_id: row.get("to_id"),
        rel_type: row.get("rel_type"),
        valid_from: from_ms(row.get("valid_from")),
        valid_to: row.get::<Option<i64>, _>("valid_to").map(from_ms),
        actor: row.get("actor"),
        props: parse_props(row.get::<String, _>("props").as_str()),
    }
}

fn audit_from_row(row: &SqliteRow) -> AuditEntry {
    let action: String = row.get("action");
    AuditEntry {
        id: row.get("id"),
        entity_id: row.get("entity_id"),
        entity_label: row.get("entity_label"),
        action: AuditAction::parse(&action).unwrap_or(AuditAction::Update),
        actor: row.get("actor"),
        at: from_ms(row.get("at")),
        changes: row
            .get::<Option<String>, _>("changes")
            .and_then(|raw| serde_json::from_str(&raw).ok()),
    }
}

impl TemporalStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ------------------------------------------------------------------
    // Mutation primitives (one IMMEDIATE transaction each, one retry on
    // busy)
    // ------------------------------------------------------------------

    /// Create an entity and its first state (`version = 1`), linking the
    /// CURRENT head and appending the `create` audit entry.
    pub async fn create_entity(
        &self,
        id: &str,
        label: &str,
        props: &PropMap,
        actor: &str,
        now: DateTime<Utc>,
        audit_id: &str,
    ) -> Result<()> {
        check_identifier(label, "label")?;
        let mut attempt = self
            .try_create_entity(id, label, props, actor, now, audit_id)
            .await;
        if let Err(err) = &attempt {
            if err.is_transient() {
                attempt = self
                    .try_create_entity(id, label, props, actor, now, audit_id)
                    .await;
            }
        }
        attempt
    }

    async fn try_create_entity(
        &self,
        id: &str,
        label: &str,
        props: &PropMap,
        actor: &str,
        now: DateTime<Utc>,
        audit_id: &str,
    ) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        let mut tx = conn.begin_with("BEGIN IMMEDIATE").await?;

        sqlx::query(
            "INSERT INTO entities (id, label, created_at, current_version) VALUES (?, ?, ?, 1)",
        )
        .bind(id)
        .bind(label)
        .bind(ms(now))
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO states (entity_id, version, label, valid_from, valid_to, recorded_at, actor, props)
            VALUES (?, 1, ?, ?, NULL, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(label)
        .bind(ms(now))
        .bind(ms(now))
        .bind(actor)
        .bind(serde_json::to_string(&Value::Object(props.clone()))?)
        .execute(&mut *tx)
        .await?;

        insert_audit(&mut tx, audit_id, id, label, AuditAction::Create, actor, now, None).await?;

        tx.commit().await?;
        Ok(())
    }

    /// Close the current head at `now`, append a new state with the next
    /// version, move the CURRENT link, and record the `update` audit entry
    /// with the serialized property deltas.
    ///
    /// Returns the new version. Requires an existing, non-deleted head.
    pub async fn update_entity(
        &self,
        id: &str,
        props: &PropMap,
        actor: &str,
        now: DateTime<Utc>,
        audit_id: &str,
        changes: Option<Value>,
    ) -> Result<i64> {
        let mut attempt = self
            .try_update_entity(id, props, actor, now, audit_id, changes.clone())
            .await;
        if let Err(err) = &attempt {
            if err.is_transient() {
                attempt = self
                    .try_update_entity(id, props, actor, now, audit_id, changes)
                    .await;
            }
        }
        attempt
    }

    async fn try_update_entity(
        &self,
        id: &str,
        props: &PropMap,
        actor: &str,
        now: DateTime<Utc>,
        audit_id: &str,
        changes: Option<Value>,
    ) -> Result<i64> {
        let mut conn = self.pool.acquire().await?;
        let mut tx = conn.begin_with("BEGIN IMMEDIATE").await?;

        let row = sqlx::query(
            "SELECT label, current_version, deleted_at FROM entities WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| GraphError::not_found(format!("entity {id}")))?;

        if row.get::<Option<i64>, _>("deleted_at").is_some() {
            return Err(GraphError::not_found(format!("entity {id} is deleted")));
        }

        let label: String = row.get("label");
        let current: i64 = row.get("current_version");
        let next = current + 1;

        sqlx::query("UPDATE states SET valid_to = ? WHERE entity_id = ? AND version = ?")
            .bind(ms(now))
            .bind(id)
            .bind(current)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO states (entity_id, version, label, valid_from, valid_to, recorded_at, actor, props)
            VALUES (?, ?, ?, ?, NULL, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(next)
        .bind(&label)
        .bind(ms(now))
        .bind(ms(now))
        .bind(actor)
        .bind(serde_json::to_string(&Value::Object(props.clone()))?)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE entities SET current_version = ? WHERE id = ?")
            .bind(next)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        insert_audit(
            &mut tx,
            audit_id,
            id,
            &label,
            AuditAction::Update,
            actor,
            now,
            changes,
        )
        .await?;

        tx.commit().await?;
        Ok(next)
    }

    /// Close the head state at `now` and mark the entity deleted.
    ///
    /// Idempotent: deleting an already-deleted entity is a no-op that
    /// returns `false` without touching the audit log.
    pub async fn soft_delete_entity(
        &self,
        id: &str,
        actor: &str,
        now: DateTime<Utc>,
        audit_id: &str,
    ) -> Result<bool> {
        let mut attempt = self.try_soft_delete_entity(id, actor, now, audit_id).await;
        if let Err(err) = &attempt {
            if err.is_transient() {
                attempt = self.try_soft_delete_entity(id, actor, now, audit_id).await;
            }
        }
        attempt
    }

    async fn try_soft_delete_entity(
        &self,
        id: &str,
        actor: &str,
        now: DateTime<Utc>,
        audit_id: &str,
    ) -> Result<bool> {
        let mut conn = self.pool.acquire().await?;
        let mut tx = conn.begin_with("BEGIN IMMEDIATE").await?;

        let row = sqlx::query("SELECT label, deleted_at FROM entities WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| GraphError::not_found(format!("entity {id}")))?;

        if row.get::<Option<i64>, _>("deleted_at").is_some() {
            return Ok(false);
        }
        let label: String = row.get("label");

        sqlx::query("UPDATE states SET valid_to = ? WHERE entity_id = ? AND valid_to IS NULL")
            .bind(ms(now))
            .bind(id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE entities SET deleted_at = ?, deleted_by = ? WHERE id = ?")
            .bind(ms(now))
            .bind(actor)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        insert_audit(&mut tx, audit_id, id, &label, AuditAction::Delete, actor, now, None).await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Create a typed edge active from `now`, appending the `relate` audit
    /// entry on the `from` entity.
    ///
    /// Both endpoints must exist. If an active edge of this type already
    /// connects the ordered pair, the existing edge id is returned and no
    /// new edge or audit entry is written.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_relationship(
        &self,
        from_id: &str,
        to_id: &str,
        rel_type: &str,
        props: &PropMap,
        actor: &str,
        now: DateTime<Utc>,
        audit_id: &str,
    ) -> Result<String> {
        check_identifier(rel_type, "relationship type")?;
        let mut attempt = self
            .try_create_relationship(from_id, to_id, rel_type, props, actor, now, audit_id)
            .await;
        if let Err(err) = &attempt {
            if err.is_transient() {
                attempt = self
                    .try_create_relationship(from_id, to_id, rel_type, props, actor, now, audit_id)
                    .await;
            }
        }
        attempt
    }

    #[allow(clippy::too_many_arguments)]
    async fn try_create_relationship(
        &self,
        from_id: &str,
        to_id: &str,
        rel_type: &str,
        props: &PropMap,
        actor: &str,
        now: DateTime<Utc>,
        audit_id: &str,
    ) -> Result<String> {
        let mut conn = self.pool.acquire().await?;
        let mut tx = conn.begin_with("BEGIN IMMEDIATE").await?;

        let from_label: String = sqlx::query_scalar("SELECT label FROM entities WHERE id = ?")
            .bind(from_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| GraphError::not_found(format!("entity {from_id}")))?;

        let to_exists: Option<String> = sqlx::query_scalar("SELECT id FROM entities WHERE id = ?")
            .bind(to_id)
            .fetch_optional(&mut *tx)
            .await?;
        if to_exists.is_none() {
            return Err(GraphError::not_found(format!("entity {to_id}")));
        }

        let existing: Option<String> = sqlx::query_scalar(
            r#"
            SELECT id FROM relationships
            WHERE from_id = ? AND rel_type = ? AND to_id = ? AND valid_to IS NULL
            "#,
        )
        .bind(from_id)
        .bind(rel_type)
        .bind(to_id)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some(id) = existing {
            return Ok(id);
        }

        let rel_id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO relationships (id, from_id, to_id, rel_type, valid_from, valid_to, actor, props)
            VALUES (?, ?, ?, ?, ?, NULL, ?, ?)
            "#,
        )
        .bind(&rel_id)
        .bind(from_id)
        .bind(to_id)
        .bind(rel_type)
        .bind(ms(now))
        .bind(actor)
        .bind(serde_json::to_string(&Value::Object(props.clone()))?)
        .execute(&mut *tx)
        .await?;

        let changes = serde_json::json!({ "type": rel_type, "to": to_id });
        insert_audit(
            &mut tx,
            audit_id,
            from_id,
            &from_label,
            AuditAction::Relate,
            actor,
            now,
            Some(changes),
        )
        .await?;

        tx.commit().await?;
        Ok(rel_id)
    }

    /// Close the unique active edge of `rel_type` between the ordered
    /// pair, appending the `unrelate` audit entry.
    ///
    /// Returns `false` without writing anything when no such edge is
    /// active.
    pub async fn close_relationship(
        &self,
        from_id: &str,
        to_id: &str,
        rel_type: &str,
        actor: &str,
        now: DateTime<Utc>,
        audit_id: &str,
    ) -> Result<bool> {
        let mut attempt = self
            .try_close_relationship(from_id, to_id, rel_type, actor, now, audit_id)
            .await;
        if let Err(err) = &attempt {
            if err.is_transient() {
                attempt = self
                    .try_close_relationship(from_id, to_id, rel_type, actor, now, audit_id)
                    .await;
            }
        }
        attempt
    }

    async fn try_close_relationship(
        &self,
        from_id: &str,
        to_id: &str,
        rel_type: &str,
        actor: &str,
        now: DateTime<Utc>,
        audit_id: &str,
    ) -> Result<bool> {
        let mut conn = self.pool.acquire().await?;
        let mut tx = conn.begin_with("BEGIN IMMEDIATE").await?;

        let existing: Option<String> = sqlx::query_scalar(
            r#"
            SELECT id FROM relationships
            WHERE from_id = ? AND rel_type = ? AND to_id = ? AND valid_to IS NULL
            "#,
        )
        .bind(from_id)
        .bind(rel_type)
        .bind(to_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(rel_id) = existing else {
            return Ok(false);
        };

        sqlx::query("UPDATE relationships SET valid_to = ? WHERE id = ?")
            .bind(ms(now))
            .bind(&rel_id)
            .execute(&mut *tx)
            .await?;

        let from_label: String = sqlx::query_scalar("SELECT label FROM entities WHERE id = ?")
            .bind(from_id)
            .fetch_optional(&mut *tx)
            .await?
            .unwrap_or_default();

        let changes = serde_json::json!({ "type": rel_type, "to": to_id });
        insert_audit(
            &mut tx,
            audit_id,
            from_id,
            &from_label,
            AuditAction::Unrelate,
            actor,
            now,
            Some(changes),
        )
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Read operations (one transaction each)
    // ------------------------------------------------------------------

    /// The entity row regardless of deletion, for audit-style reads.
    pub async fn get_entity(&self, id: &str) -> Result<Option<Entity>> {
        let row = sqlx::query("SELECT * FROM entities WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(entity_from_row))
    }

    /// Current entity + head state; `None` once the entity is deleted.
    pub async fn get_current(&self, id: &str) -> Result<Option<EntityRecord>> {
        let row = sqlx::query("SELECT * FROM entities WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else { return Ok(None) };
        let entity = entity_from_row(&row);
        if entity.is_deleted() {
            return Ok(None);
        }

        let state_row = sqlx::query(
            "SELECT * FROM states WHERE entity_id = ? AND valid_to IS NULL",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        let Some(state_row) = state_row else {
            return Ok(None);
        };
        Ok(Some(EntityRecord {
            entity,
            state: state_from_row(&state_row),
        }))
    }

    /// The state covering instant `t`, found by walking the version chain.
    pub async fn get_at_time(&self, id: &str, t: DateTime<Utc>) -> Result<Option<EntityRecord>> {
        let row = sqlx::query("SELECT * FROM entities WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else { return Ok(None) };
        let entity = entity_from_row(&row);

        let state_row = sqlx::query(
            r#"
            SELECT * FROM states
            WHERE entity_id = ? AND valid_from <= ? AND (valid_to IS NULL OR valid_to > ?)
            ORDER BY version DESC LIMIT 1
            "#,
        )
        .bind(id)
        .bind(ms(t))
        .bind(ms(t))
        .fetch_optional(&self.pool)
        .await?;

        Ok(state_row.map(|s| EntityRecord {
            entity,
            state: state_from_row(&s),
        }))
    }

    /// All states, newest version first.
    pub async fn get_history(&self, id: &str) -> Result<Vec<State>> {
        let rows = sqlx::query("SELECT * FROM states WHERE entity_id = ? ORDER BY version DESC")
            .bind(id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(state_from_row).collect())
    }

    /// All non-deleted entities of a label with their head state.
    pub async fn query_by_label(&self, label: &str) -> Result<Vec<EntityRecord>> {
        check_identifier(label, "label")?;
        let rows = sqlx::query(
            r#"
            SELECT e.id AS id, e.label AS label, e.created_at AS created_at,
                   e.deleted_at AS deleted_at, e.deleted_by AS deleted_by,
                   s.entity_id AS entity_id, s.version AS version,
                   s.valid_from AS valid_from, s.valid_to AS valid_to,
                   s.recorded_at AS recorded_at, s.actor AS actor, s.props AS props
            FROM entities e
            JOIN states s ON s.entity_id = e.id AND s.valid_to IS NULL
            WHERE e.label = ? AND e.deleted_at IS NULL
            ORDER BY e.id
            "#,
        )
        .bind(label)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| EntityRecord {
                entity: entity_from_row(row),
                state: state_from_row(row),
            })
            .collect())
    }

    /// Active outgoing and incoming edges for one entity, direction-tagged.
    pub async fn get_relationships(&self, id: &str) -> Result<Vec<DirectedRelationship>> {
        let outgoing = sqlx::query(
            "SELECT * FROM relationships WHERE from_id = ? AND valid_to IS NULL ORDER BY rel_type, to_id",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        let incoming = sqlx::query(
            "SELECT * FROM relationships WHERE to_id = ? AND valid_to IS NULL ORDER BY rel_type, from_id",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        let mut edges = Vec::with_capacity(outgoing.len() + incoming.len());
        for row in &outgoing {
            edges.push(DirectedRelationship {
                direction: Direction::Outgoing,
                relationship: relationship_from_row(row),
            });
        }
        for row in &incoming {
            edges.push(DirectedRelationship {
                direction: Direction::Incoming,
                relationship: relationship_from_row(row),
            });
        }
        Ok(edges)
    }

    /// Audit entries for one entity, oldest first.
    pub async fn get_audit(&self, entity_id: &str) -> Result<Vec<AuditEntry>> {
        let rows = sqlx::query("SELECT * FROM audit_log WHERE entity_id = ? ORDER BY at, id")
            .bind(entity_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(audit_from_row).collect())
    }

    /// Entities with audit activity after `t`, most recently active first.
    pub async fn changes_since(
        &self,
        t: DateTime<Utc>,
        labels: &[String],
        actors: &[String],
        limit: i64,
    ) -> Result<Vec<ChangeSummary>> {
        for label in labels {
            check_identifier(label, "label")?;
        }

        let mut sql = String::from(
            "SELECT entity_id, MAX(at) AS last_at FROM audit_log WHERE at > ?",
        );
        if !labels.is_empty() {
            sql.push_str(" AND entity_label IN (");
            sql.push_str(&placeholders(labels.len()));
            sql.push(')');
        }
        if !actors.is_empty() {
            sql.push_str(" AND actor IN (");
            sql.push_str(&placeholders(actors.len()));
            sql.push(')');
        }
        sql.push_str(" GROUP BY entity_id ORDER BY last_at DESC LIMIT ?");

        let mut query = sqlx::query(&sql).bind(ms(t));
        for label in labels {
            query = query.bind(label);
        }
        for actor in actors {
            query = query.bind(actor);
        }
        query = query.bind(limit);

        let heads = query.fetch_all(&self.pool).await?;

        let mut summaries = Vec::with_capacity(heads.len());
        for head in &heads {
            let entity_id: String = head.get("entity_id");
            let last_at: i64 = head.get("last_at");
            let row = sqlx::query(
                "SELECT * FROM audit_log WHERE entity_id = ? AND at = ? ORDER BY id LIMIT 1",
            )
            .bind(&entity_id)
            .bind(last_at)
            .fetch_optional(&self.pool)
            .await?;
            if let Some(row) = row {
                let entry = audit_from_row(&row);
                summaries.push(ChangeSummary {
                    entity_id: entry.entity_id,
                    entity_label: entry.entity_label,
                    last_action: entry.action,
                    last_actor: entry.actor,
                    last_at: entry.at,
                });
            }
        }
        Ok(summaries)
    }

    /// Filter current heads of a label by conjunctive predicates.
    ///
    /// Predicates evaluate over the decoded property maps; ordering is by
    /// the named property (entities missing it sort last).
    pub async fn search(
        &self,
        label: &str,
        filters: &[Filter],
        limit: usize,
        order_by: Option<&str>,
    ) -> Result<Vec<EntityRecord>> {
        let mut records = self.query_by_label(label).await?;
        records.retain(|r| filters.iter().all(|f| f.matches(&r.state.props)));

        if let Some(key) = order_by {
            records.sort_by(|a, b| {
                let av = a.state.props.get(key);
                let bv = b.state.props.get(key);
                match (av, bv) {
                    (Some(x), Some(y)) => canonical_order(x, y),
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (None, None) => std::cmp::Ordering::Equal,
                }
            });
        }

        records.truncate(limit);
        Ok(records)
    }

    /// Cartesian snapshot: every matching entity's state at `t` plus every
    /// edge active at `t`.
    pub async fn snapshot_at(
        &self,
        t: DateTime<Utc>,
        labels: &[String],
    ) -> Result<Snapshot> {
        for label in labels {
            check_identifier(label, "label")?;
        }

        let mut sql = String::from(
            "SELECT * FROM entities WHERE created_at <= ? AND (deleted_at IS NULL OR deleted_at > ?)",
        );
        if !labels.is_empty() {
            sql.push_str(" AND label IN (");
            sql.push_str(&placeholders(labels.len()));
            sql.push(')');
        }
        sql.push_str(" ORDER BY id");

        let mut query = sqlx::query(&sql).bind(ms(t)).bind(ms(t));
        for label in labels {
            query = query.bind(label);
        }
        let entity_rows = query.fetch_all(&self.pool).await?;

        let mut entities = Vec::new();
        for row in &entity_rows {
            let entity = entity_from_row(row);
            let state_row = sqlx::query(
                r#"
                SELECT * FROM states
                WHERE entity_id = ? AND valid_from <= ? AND (valid_to IS NULL OR valid_to > ?)
                ORDER BY version DESC LIMIT 1
                "#,
            )
            .bind(&entity.id)
            .bind(ms(t))
            .bind(ms(t))
            .fetch_optional(&self.pool)
            .await?;
            if let Some(state_row) = state_row {
                entities.push(EntityRecord {
                    entity,
                    state: state_from_row(&state_row),
                });
            }
        }

        let rel_rows = sqlx::query(
            r#"
            SELECT * FROM relationships
            WHERE valid_from <= ? AND (valid_to IS NULL OR valid_to > ?)
            ORDER BY rel_type, from_id, to_id
            "#,
        )
        .bind(ms(t))
        .bind(ms(t))
        .fetch_all(&self.pool)
        .await?;

        Ok(Snapshot {
            at: t,
            entities,
            relationships: rel_rows.iter().map(relationship_from_row).collect(),
        })
    }
}

/// Append one audit row inside the caller's transaction.
#[allow(clippy::too_many_arguments)]
async fn insert_audit(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    audit_id: &str,
    entity_id: &str,
    entity_label: &str,
    action: AuditAction,
    actor: &str,
    now: DateTime<Utc>,
    changes: Option<Value>,
) -> Result<()> {
    let changes_text = match &changes {
        Some(v) => Some(serde_json::to_string(v)?),
        None => None,
    };
    sqlx::query(
        r#"
        INSERT INTO audit_log (id, entity_id, entity_label, action, actor, at, changes)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(audit_id)
    .bind(entity_id)
    .bind(entity_label)
    .bind(action.as_str())
    .bind(actor)
    .bind(ms(now))
    .bind(changes_text)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Total order over JSON values for `order_by`: numbers, then strings,
/// then everything else by canonical text.
fn canonical_order(a: &Value, b: &Value) -> std::cmp::Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(std::cmp::Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}
