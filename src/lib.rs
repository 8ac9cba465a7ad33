//! # Engram
//!
//! **A schema-enforced, bitemporal memory graph for concurrent agents.**
//!
//! Engram is shared, versioned working memory: agents and humans read and
//! write typed entities and relationships, every mutation is
//! schema-validated, versioned with a full predecessor chain, and recorded
//! in an audit log. A reconciliation engine keeps the graph in two-way
//! agreement with a directory of human-readable documents, and a codebase
//! scanner populates the graph from source trees.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌─────────────┐
//! │   Scanner   │──▶│   Mutation    │──▶│   SQLite    │
//! │ globs+regex │   │ validate →    │   │ entities    │
//! └─────────────┘   │ version →     │   │ states      │
//! ┌─────────────┐   │ audit         │   │ audit_log   │
//! │ Reconciler  │──▶│ (registry-    │   │ rels        │
//! │ docs ⇄ graph│   │  gated)       │   └──────┬──────┘
//! └──────▲──────┘   └──────────────┘          │
//!        │          ┌──────────────┐          │
//!        └──────────│   Temporal    │◀─────────┘
//!                   │   reads      │
//!                   └──────────────┘
//! ```
//!
//! ## Data Flow
//!
//! 1. The **schema registry** ([`registry`]) compiles the declarative
//!    schema ([`schema`]) into per-label validators once at startup.
//! 2. All writes go through the **mutation pipeline** ([`mutate`]):
//!    validate → version → audit, committed atomically by the
//!    **temporal store** ([`store`]).
//! 3. The **temporal reader** ([`reader`]) derives diffs and changelogs
//!    from the version chains.
//! 4. The **document projection** renders current state to a file tree
//!    ([`render`]) and parses it back ([`docparse`]), delegating
//!    per-framework cosmetics to a [`adapter::FormatAdapter`].
//! 5. The **reconciliation engine** ([`reconcile`]) computes the
//!    graph⇄doc changeset, applies a conflict strategy, and re-renders.
//! 6. The **codebase scanner** ([`scanner`]) discovers and fingerprints
//!    source files, parses them ([`parsers`]), maps artifacts to entities
//!    ([`mapping`]), and ingests them in two passes ([`ingest`]).
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`schema`] | Declarative schema definitions |
//! | [`registry`] | Validator compiler with O(1) lookup |
//! | [`models`] | Core data types: `Entity`, `State`, `AuditEntry`, `Relationship` |
//! | [`error`] | Error taxonomy (`GraphError`) |
//! | [`db`] | SQLite connection pool with WAL mode |
//! | [`migrate`] | Schema migrations and schema-driven indexes |
//! | [`store`] | Atomic mutation primitives and temporal reads |
//! | [`mutate`] | Validate → version → audit pipeline |
//! | [`reader`] | Diff and changelog projections |
//! | [`canonical`] | Canonical serialization and the 160-bit sync hash |
//! | [`render`] | Entity state → hash-stamped document tree |
//! | [`docparse`] | Document tree → structured docs |
//! | [`adapter`] | Per-framework format adapters |
//! | [`reconcile`] | Graph ⇄ docs changeset and conflict resolution |
//! | [`scanner`] | Content-addressed incremental discovery |
//! | [`parsers`] | Regex-based language parsers |
//! | [`mapping`] | Artifact → entity mapping rules |
//! | [`ingest`] | Two-pass scanner ingest |
//!
//! ## Quick Start
//!
//! ```bash
//! engram init                              # create database + indexes
//! engram upsert --label Service --props '{"name":"auth"}'
//! engram history --id <id>                 # full version chain
//! engram sync --actor alice                # reconcile docs ⇄ graph
//! engram scan --target ./src --actor bot   # ingest a codebase
//! ```

pub mod adapter;
pub mod canonical;
pub mod config;
pub mod db;
pub mod docparse;
pub mod error;
pub mod ingest;
pub mod mapping;
pub mod migrate;
pub mod models;
pub mod mutate;
pub mod parsers;
pub mod reader;
pub mod reconcile;
pub mod registry;
pub mod render;
pub mod scanner;
pub mod schema;
pub mod store;
