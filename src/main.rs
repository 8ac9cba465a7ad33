//! # Engram CLI (`engram`)
//!
//! The `engram` binary is the front-end for the memory graph. It exposes
//! every agent-facing operation as a subcommand.
//!
//! ## Usage
//!
//! ```bash
//! engram --config ./config/engram.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `engram init` | Create the SQLite database and schema-driven indexes |
//! | `engram validate` | Check a property map against a label, without writing |
//! | `engram upsert` | Create or version an entity |
//! | `engram delete` | Soft-delete an entity |
//! | `engram relate` / `unrelate` | Open / close a typed relationship |
//! | `engram query` | Current entities by label or one entity by id |
//! | `engram search` | Filter current heads by predicates |
//! | `engram get-at` | Point-in-time read |
//! | `engram history` / `changelog` / `diff` | Version chain views |
//! | `engram snapshot` | Entities + edges at one instant |
//! | `engram changes-since` | Recently mutated entities |
//! | `engram audit` | Audit entries for one entity |
//! | `engram sync` | Reconcile the graph with the document tree |
//! | `engram scan` | Scan a codebase into the graph |
//! | `engram schema` | Show the compiled schema |
//!
//! ## Exit codes
//!
//! 0 on success; non-zero when `validate` reports a violation and when
//! `sync` aborts with a conflict under the `fail` strategy.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::{Path, PathBuf};

use engram::adapter::resolve_adapter;
use engram::config::{self, ConflictStrategy};
use engram::error::GraphError;
use engram::models::{Filter, FilterOp, PropMap};
use engram::parsers::ParserRegistry;
use engram::registry::SchemaRegistry;
use engram::store::TemporalStore;
use engram::{db, migrate, mutate, reader, reconcile, scanner};

/// Engram — a schema-enforced, bitemporal memory graph for concurrent
/// agents, with document reconciliation and a codebase scanner.
#[derive(Parser)]
#[command(
    name = "engram",
    about = "Engram — schema-enforced bitemporal memory graph",
    version,
    long_about = "Engram is shared, versioned working memory for agents: typed entities and \
    relationships with full version chains and an audit log, kept in two-way agreement with a \
    directory of human-readable documents, and populated from codebases by an incremental scanner."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/engram.toml")]
    config: PathBuf,

    /// Actor recorded on mutations.
    #[arg(long, global = true, default_value = "cli")]
    actor: String,

    /// Wall-clock budget for the command, in seconds.
    #[arg(long, global = true, default_value_t = 60)]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema and schema-driven indexes.
    ///
    /// Idempotent — running it multiple times is safe.
    Init,

    /// Validate a property map against a label without writing.
    Validate {
        /// Node label to validate against.
        #[arg(long)]
        label: String,
        /// Property map as a JSON object.
        #[arg(long)]
        props: String,
    },

    /// Create or version an entity.
    Upsert {
        #[arg(long)]
        label: String,
        /// Existing entity id; omitted for creation with a fresh id.
        #[arg(long)]
        id: Option<String>,
        /// Property map as a JSON object.
        #[arg(long)]
        props: String,
    },

    /// Soft-delete an entity (idempotent).
    Delete {
        #[arg(long)]
        id: String,
    },

    /// Open a typed relationship between two entities.
    Relate {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long = "type")]
        rel_type: String,
        #[arg(long)]
        from_label: String,
        #[arg(long)]
        to_label: String,
        /// Optional edge properties as a JSON object.
        #[arg(long)]
        props: Option<String>,
    },

    /// Close the active relationship of a type between two entities.
    Unrelate {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long = "type")]
        rel_type: String,
    },

    /// Current entities of a label, or one entity by id (with edges).
    Query {
        #[arg(long)]
        label: Option<String>,
        #[arg(long)]
        id: Option<String>,
    },

    /// Filter current heads of a label by conjunctive predicates.
    Search {
        #[arg(long)]
        label: String,
        /// Predicates as `property:op:value`, value in JSON
        /// (op: eq, contains, gt, lt, gte, lte, in).
        #[arg(long = "filter")]
        filters: Vec<String>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
        #[arg(long)]
        order_by: Option<String>,
    },

    /// Point-in-time read of one entity.
    GetAt {
        #[arg(long)]
        id: String,
        /// RFC 3339 timestamp.
        #[arg(long)]
        at: String,
    },

    /// Full state history of one entity, newest first.
    History {
        #[arg(long)]
        id: String,
    },

    /// Pairwise version diffs of one entity, oldest first.
    Changelog {
        #[arg(long)]
        id: String,
    },

    /// Diff two versions of one entity.
    Diff {
        #[arg(long)]
        id: String,
        #[arg(long)]
        from: i64,
        #[arg(long)]
        to: i64,
    },

    /// Entities and active edges at one instant.
    Snapshot {
        /// RFC 3339 timestamp.
        #[arg(long)]
        at: String,
        /// Comma-separated label filter.
        #[arg(long)]
        labels: Option<String>,
    },

    /// Entities whose audit log has entries after a timestamp.
    ChangesSince {
        /// RFC 3339 timestamp.
        #[arg(long)]
        since: String,
        #[arg(long)]
        labels: Option<String>,
        #[arg(long)]
        actors: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },

    /// Audit entries for one entity, oldest first.
    Audit {
        #[arg(long)]
        id: String,
    },

    /// Reconcile the graph with the document tree.
    Sync {
        /// Override the configured docs directory.
        #[arg(long)]
        docs_dir: Option<PathBuf>,
        /// Conflict strategy: graph-wins, docs-wins, merge, or fail.
        #[arg(long)]
        strategy: Option<String>,
        /// Comma-separated label filter.
        #[arg(long)]
        labels: Option<String>,
    },

    /// Scan a codebase (local path or remote repository) into the graph.
    Scan {
        /// Local directory or `https://`/`git@` repository URL.
        #[arg(long)]
        target: String,
        /// Map and count without writing or persisting fingerprints.
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the compiled schema.
    Schema,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let timeout = std::time::Duration::from_secs(cli.timeout_secs);

    match tokio::time::timeout(timeout, run(cli)).await {
        Ok(result) => result,
        Err(_) => bail!("command timed out after {}s", timeout.as_secs()),
    }
}

// ENGRAM_LOG_FORMAT=json enables machine-parseable output.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("engram=info"));

    if std::env::var("ENGRAM_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

async fn run(cli: Cli) -> Result<()> {
    let cfg = config::load_config(&cli.config)?;
    let config_dir = cli
        .config
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let schema = cfg.schema_def(&config_dir)?;
    let registry = SchemaRegistry::compile(schema)?;

    let pool = db::connect(&cfg.storage).await?;
    let store = TemporalStore::new(pool);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(store.pool(), registry.schema()).await?;
            println!("Database initialized successfully.");
        }

        Commands::Validate { label, props } => {
            let props = parse_props(&props)?;
            let validator = registry
                .node_validator(&label)
                .with_context(|| format!("unknown label: {label}"))?;
            match validator.validate(&props) {
                Ok(normalized) => {
                    println!("{}", serde_json::to_string_pretty(&Value::Object(normalized))?);
                    println!("ok");
                }
                Err(err) => {
                    // Non-zero exit on explicit validation.
                    bail!("{err}");
                }
            }
        }

        Commands::Upsert { label, id, props } => {
            let props = parse_props(&props)?;
            let outcome =
                mutate::upsert(&store, &registry, &label, id.as_deref(), &props, &cli.actor)
                    .await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }

        Commands::Delete { id } => {
            let deleted = mutate::delete(&store, &id, &cli.actor).await?;
            println!("{}", if deleted { "deleted" } else { "already deleted" });
        }

        Commands::Relate {
            from,
            to,
            rel_type,
            from_label,
            to_label,
            props,
        } => {
            let props = props.as_deref().map(parse_props).transpose()?;
            mutate::relate(
                &store,
                &registry,
                &from,
                &to,
                &rel_type,
                &from_label,
                &to_label,
                props.as_ref(),
                &cli.actor,
            )
            .await?;
            println!("ok");
        }

        Commands::Unrelate { from, to, rel_type } => {
            mutate::unrelate(&store, &from, &to, &rel_type, &cli.actor).await?;
            println!("ok");
        }

        Commands::Query { label, id } => match (label, id) {
            (_, Some(id)) => {
                let record = store.get_current(&id).await?;
                match record {
                    None => println!("null"),
                    Some(record) => {
                        let edges = store.get_relationships(&id).await?;
                        let view = serde_json::json!({
                            "entity": record.entity,
                            "state": record.state,
                            "relationships": edges,
                        });
                        println!("{}", serde_json::to_string_pretty(&view)?);
                    }
                }
            }
            (Some(label), None) => {
                let records = store.query_by_label(&label).await?;
                println!("{}", serde_json::to_string_pretty(&records)?);
            }
            (None, None) => bail!("query needs --label or --id"),
        },

        Commands::Search {
            label,
            filters,
            limit,
            order_by,
        } => {
            let filters = filters
                .iter()
                .map(|raw| parse_filter(raw))
                .collect::<Result<Vec<_>>>()?;
            let records = store
                .search(&label, &filters, limit, order_by.as_deref())
                .await?;
            println!("{}", serde_json::to_string_pretty(&records)?);
        }

        Commands::GetAt { id, at } => {
            let at = parse_timestamp(&at)?;
            match store.get_at_time(&id, at).await? {
                None => println!("null"),
                Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
            }
        }

        Commands::History { id } => {
            let history = store.get_history(&id).await?;
            if history.is_empty() {
                bail!("not found: entity {id}");
            }
            println!("{}", serde_json::to_string_pretty(&history)?);
        }

        Commands::Changelog { id } => {
            let diffs = reader::changelog(&store, &id).await?;
            println!("{}", serde_json::to_string_pretty(&diffs)?);
        }

        Commands::Diff { id, from, to } => {
            let diff = reader::diff_versions(&store, &id, from, to).await?;
            println!("{}", serde_json::to_string_pretty(&diff)?);
        }

        Commands::Snapshot { at, labels } => {
            let at = parse_timestamp(&at)?;
            let labels = parse_list(labels);
            let snapshot = store.snapshot_at(at, &labels).await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }

        Commands::ChangesSince {
            since,
            labels,
            actors,
            limit,
        } => {
            let since = parse_timestamp(&since)?;
            let labels = parse_list(labels);
            let actors = parse_list(actors);
            let summaries = store.changes_since(since, &labels, &actors, limit).await?;
            println!("{}", serde_json::to_string_pretty(&summaries)?);
        }

        Commands::Audit { id } => {
            let entries = store.get_audit(&id).await?;
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }

        Commands::Sync {
            docs_dir,
            strategy,
            labels,
        } => {
            let strategy = match strategy {
                None => cfg.sync.conflict_strategy,
                Some(raw) => ConflictStrategy::parse(&raw)
                    .with_context(|| format!("unknown conflict strategy: {raw}"))?,
            };
            let docs_dir = docs_dir.unwrap_or_else(|| cfg.docs.output_dir.clone());
            let adapter = resolve_adapter(cfg.docs.framework.as_deref(), &cfg.docs.format);
            let labels = parse_list(labels);
            let labels = if labels.is_empty() {
                None
            } else {
                Some(labels.as_slice())
            };

            match reconcile::sync(
                &store,
                &registry,
                &docs_dir,
                adapter.as_ref(),
                cfg.docs.path_template.as_deref(),
                strategy,
                &cli.actor,
                labels,
            )
            .await
            {
                Ok(result) => {
                    println!("sync {}", strategy.as_str());
                    println!("  created: {}", result.created);
                    println!("  updated: {}", result.updated);
                    println!("  deleted: {}", result.deleted);
                    println!("  conflicts: {}", result.conflicts.len());
                    for conflict in &result.conflicts {
                        println!(
                            "    {} ({}) resolved {}",
                            conflict.entity_id, conflict.label, conflict.resolution
                        );
                    }
                    println!("  docs written: {}", result.docs_written);
                    println!("  docs unchanged: {}", result.docs_unchanged);
                    for error in &result.errors {
                        println!("  error {}: {}", error.entity_id, error.message);
                    }
                    println!("ok");
                }
                Err(err @ GraphError::Conflict { .. }) => {
                    // Non-zero exit under the fail strategy.
                    bail!("{err}");
                }
                Err(err) => return Err(err.into()),
            }
        }

        Commands::Scan { target, dry_run } => {
            let parsers = ParserRegistry::new();
            let result = scanner::run_scan(
                &store,
                &registry,
                &parsers,
                &cfg.scan,
                &target,
                dry_run,
                &cli.actor,
            )
            .await?;

            println!("scan {}{}", target, if dry_run { " (dry-run)" } else { "" });
            println!("  files discovered: {}", result.files_discovered);
            println!("  files parsed: {}", result.files_parsed);
            println!("  files skipped: {}", result.files_skipped);
            println!("  files removed: {}", result.files_removed);
            println!("  artifacts: {}", result.artifacts_extracted);
            println!("  entities upserted: {}", result.entities_upserted);
            println!("  entities skipped: {}", result.entities_skipped);
            println!("  relationships created: {}", result.relationships_created);
            println!("  unmapped: {}", result.unmapped);
            for error in &result.errors {
                println!("  error: {}", error);
            }
            println!("ok");
        }

        Commands::Schema => {
            println!("{}", serde_json::to_string_pretty(&registry.describe())?);
        }
    }

    Ok(())
}

fn parse_props(raw: &str) -> Result<PropMap> {
    let value: Value =
        serde_json::from_str(raw).with_context(|| "props must be a JSON object")?;
    value
        .as_object()
        .cloned()
        .context("props must be a JSON object")
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("invalid RFC 3339 timestamp: {raw}"))
}

fn parse_list(raw: Option<String>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(|part| part.trim().to_string())
            .filter(|part| !part.is_empty())
            .collect()
    })
    .unwrap_or_default()
}

/// Parse a `property:op:value` predicate; the value is JSON, with a bare
/// string fallback.
fn parse_filter(raw: &str) -> Result<Filter> {
    let mut parts = raw.splitn(3, ':');
    let property = parts.next().context("empty filter")?.to_string();
    let op = parts
        .next()
        .and_then(FilterOp::parse)
        .with_context(|| format!("bad filter op in '{raw}'"))?;
    let value_raw = parts
        .next()
        .with_context(|| format!("missing filter value in '{raw}'"))?;
    let value = serde_json::from_str(value_raw)
        .unwrap_or_else(|_| Value::String(value_raw.to_string()));
    Ok(Filter {
        property,
        op,
        value,
    })
}
