//! Database schema migrations.
//!
//! Creates all required tables and ensures idempotent execution.
//! Designed to be run via `engram init`.
//!
//! # Schema
//!
//! ```text
//! ┌──────────────────┐     ┌──────────────────┐     ┌──────────────────┐
//! │    entities      │──┐  │     states       │     │    audit_log     │
//! │                  │  │  │                  │     │                  │
//! │ id (PK)          │  └──│ entity_id        │     │ id (PK)          │
//! │ label            │     │ version          │     │ entity_id        │
//! │ created_at       │     │ label            │     │ entity_label     │
//! │ deleted_at       │     │ valid_from       │     │ action           │
//! │ deleted_by       │     │ valid_to         │     │ actor            │
//! │ current_version  │     │ recorded_at      │     │ at               │
//! └──────────────────┘     │ actor            │     │ changes          │
//!                          │ props (JSON)     │     └──────────────────┘
//! ┌──────────────────┐     └──────────────────┘
//! │  relationships   │
//! │                  │     The CURRENT link is entities.current_version;
//! │ id (PK)          │     the PREVIOUS chain is the dense version
//! │ from_id / to_id  │     sequence. Head states satisfy
//! │ rel_type         │     valid_to IS NULL.
//! │ valid_from/to    │
//! │ actor            │
//! │ props (JSON)     │
//! └──────────────────┘
//! ```
//!
//! # Tables
//!
//! | Table | Purpose |
//! |-------|---------|
//! | `entities` | Immutable identities with soft-delete markers |
//! | `states` | Versioned property snapshots with validity intervals |
//! | `audit_log` | Append-only mutation records |
//! | `relationships` | Typed temporal edges |
//!
//! # Schema-driven constraints
//!
//! Each `unique_keys` entry on a node label becomes a partial unique index
//! over the head states of that label; each `constraints` entry becomes a
//! plain index. Labels and property names are checked against the
//! identifier discipline before they are interpolated into DDL — this is
//! the only place identifiers ever reach SQL text, and invalid ones are
//! rejected first.
//!
//! # Idempotency
//!
//! All statements use `IF NOT EXISTS`; running `engram init` repeatedly is
//! safe.

use anyhow::{bail, Result};
use sqlx::SqlitePool;

use crate::schema::{is_valid_identifier, SchemaDef};

/// Run all database migrations, including schema-driven indexes.
pub async fn run_migrations(pool: &SqlitePool, schema: &SchemaDef) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entities (
            id TEXT PRIMARY KEY,
            label TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            deleted_at INTEGER,
            deleted_by TEXT,
            current_version INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS states (
            entity_id TEXT NOT NULL,
            version INTEGER NOT NULL,
            label TEXT NOT NULL,
            valid_from INTEGER NOT NULL,
            valid_to INTEGER,
            recorded_at INTEGER NOT NULL,
            actor TEXT NOT NULL,
            props TEXT NOT NULL DEFAULT '{}',
            PRIMARY KEY (entity_id, version),
            FOREIGN KEY (entity_id) REFERENCES entities(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS audit_log (
            id TEXT PRIMARY KEY,
            entity_id TEXT NOT NULL,
            entity_label TEXT NOT NULL,
            action TEXT NOT NULL,
            actor TEXT NOT NULL,
            at INTEGER NOT NULL,
            changes TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS relationships (
            id TEXT PRIMARY KEY,
            from_id TEXT NOT NULL,
            to_id TEXT NOT NULL,
            rel_type TEXT NOT NULL,
            valid_from INTEGER NOT NULL,
            valid_to INTEGER,
            actor TEXT NOT NULL,
            props TEXT NOT NULL DEFAULT '{}'
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Indexes for the fixed query set
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_entities_label ON entities(label)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_states_head ON states(entity_id) WHERE valid_to IS NULL",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_states_label_head ON states(label) WHERE valid_to IS NULL",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_audit_entity ON audit_log(entity_id, at DESC)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_audit_at ON audit_log(at DESC)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_rel_from ON relationships(from_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_rel_to ON relationships(to_id)")
        .execute(pool)
        .await?;

    // At most one active edge of a given type between an ordered pair.
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS uq_rel_active
        ON relationships(from_id, rel_type, to_id) WHERE valid_to IS NULL
        "#,
    )
    .execute(pool)
    .await?;

    // Schema-driven unique keys over head states, per label.
    for node in &schema.nodes {
        for key in &node.unique_keys {
            create_state_index(pool, &node.label, key, true).await?;
        }
    }

    // Declared storage-level indexes.
    for constraint in &schema.constraints {
        create_state_index(pool, &constraint.label, &constraint.property, false).await?;
    }

    Ok(())
}

/// Create a (unique) index over one head-state property of one label.
///
/// The label and property name are interpolated into DDL, so both must
/// pass the identifier discipline first; property values themselves are
/// never interpolated anywhere.
async fn create_state_index(
    pool: &SqlitePool,
    label: &str,
    property: &str,
    unique: bool,
) -> Result<()> {
    if !is_valid_identifier(label) {
        bail!("invalid label in constraint: '{}'", label);
    }
    if !is_valid_identifier(property) {
        bail!("invalid property in constraint: '{}'", property);
    }

    let kind = if unique { "UNIQUE INDEX" } else { "INDEX" };
    let prefix = if unique { "uq" } else { "idx" };
    let sql = format!(
        "CREATE {kind} IF NOT EXISTS {prefix}_state_{label}_{property} \
         ON states(label, json_extract(props, '$.{property}')) \
         WHERE valid_to IS NULL AND label = '{label}'"
    );
    sqlx::query(&sql).execute(pool).await?;
    Ok(())
}
