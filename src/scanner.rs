//! Codebase scanner: discover → fingerprint → parse → map → ingest.
//!
//! A five-stage pipeline over a filesystem root or a freshly
//! shallow-cloned remote repository (whose temp directory is removed
//! unconditionally on exit). Discovery expands include globs against the
//! root, applies the unconditional vendored/build excludes plus user
//! excludes, reads each surviving file, and fingerprints it with a
//! 256-bit content digest. A previous fingerprint store restricts parsing
//! to added and changed files; removed files are reported but not parsed.
//!
//! The fingerprint store lives at `<root>/.scanstate/fingerprints` as one
//! JSON map, rewritten whole after every non-dry run.

use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::ScanConfig;
use crate::error::{GraphError, Result};
use crate::ingest;
use crate::mapping::apply_mappings;
use crate::parsers::{Language, ParserRegistry, RawArtifact};
use crate::registry::SchemaRegistry;
use crate::store::TemporalStore;

/// Relative path of the fingerprint store under the scan root.
pub const FINGERPRINT_STORE: &str = ".scanstate/fingerprints";

/// Content identity of one discovered file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileFingerprint {
    pub relative_path: String,
    /// Lowercase hex SHA-256 of the file content.
    pub hash: String,
    pub size: u64,
    pub recorded_at: DateTime<Utc>,
}

/// One file surviving discovery, with its content in memory.
#[derive(Debug)]
pub struct DiscoveredFile {
    pub relative_path: String,
    pub language: Language,
    pub content: String,
    pub fingerprint: FileFingerprint,
}

/// Counters from one scan run.
#[derive(Debug, Default, Serialize)]
pub struct ScanResult {
    pub files_discovered: usize,
    pub files_parsed: usize,
    pub files_skipped: usize,
    pub files_removed: usize,
    pub artifacts_extracted: usize,
    pub entities_upserted: usize,
    pub entities_skipped: usize,
    pub relationships_created: usize,
    pub unmapped: usize,
    pub errors: Vec<String>,
    pub dry_run: bool,
}

fn default_include_globs() -> Vec<String> {
    [
        "**/*.ts", "**/*.tsx", "**/*.js", "**/*.jsx", "**/*.py", "**/*.go",
        "**/package.json", "**/tsconfig.json", "**/go.mod", "**/Dockerfile", "**/.env",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Vendored, build, and cache directories excluded unconditionally.
fn unconditional_excludes() -> Vec<String> {
    [
        "**/.git/**",
        "**/node_modules/**",
        "**/target/**",
        "**/dist/**",
        "**/build/**",
        "**/.next/**",
        "**/__pycache__/**",
        "**/vendor/**",
        "**/.venv/**",
        "**/venv/**",
        "**/coverage/**",
        "**/.scanstate/**",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| GraphError::parse(pattern.clone(), e.to_string()))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| GraphError::parse("<globset>", e.to_string()))
}

/// Walk the root and fingerprint every file matching the glob rules.
pub fn discover(root: &Path, config: &ScanConfig) -> Result<Vec<DiscoveredFile>> {
    let include = if config.include.is_empty() {
        default_include_globs()
    } else {
        config.include.clone()
    };
    let include_set = build_globset(&include)?;

    let mut excludes = unconditional_excludes();
    excludes.extend(config.exclude.clone());
    let exclude_set = build_globset(&excludes)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|e| GraphError::target(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude_set.is_match(&rel_str) {
            continue;
        }
        if !include_set.is_match(&rel_str) {
            continue;
        }

        let metadata = std::fs::metadata(path)?;
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "skipping unreadable file");
                continue;
            }
        };

        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        let hash = format!("{:x}", hasher.finalize());

        files.push(DiscoveredFile {
            language: Language::detect(relative),
            fingerprint: FileFingerprint {
                relative_path: rel_str.clone(),
                hash,
                size: metadata.len(),
                recorded_at: Utc::now(),
            },
            relative_path: rel_str,
            content,
        });
    }

    // Sort for deterministic ordering
    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(files)
}

/// Load the previous fingerprint store, if any.
pub fn load_fingerprints(root: &Path) -> BTreeMap<String, FileFingerprint> {
    let path = root.join(FINGERPRINT_STORE);
    let Ok(content) = std::fs::read_to_string(&path) else {
        return BTreeMap::new();
    };
    match serde_json::from_str(&content) {
        Ok(map) => map,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "ignoring corrupt fingerprint store");
            BTreeMap::new()
        }
    }
}

/// Rewrite the fingerprint store whole.
pub fn save_fingerprints(root: &Path, fingerprints: &BTreeMap<String, FileFingerprint>) -> Result<()> {
    let path = root.join(FINGERPRINT_STORE);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, serde_json::to_string_pretty(fingerprints)?)?;
    Ok(())
}

/// Shallow-clone a remote repository into a temp directory.
///
/// The directory is removed when the returned guard drops, success or
/// failure. Clone failures and timeouts are fatal target errors.
async fn clone_remote(
    target: &str,
    depth: u32,
    branch: &str,
    timeout_secs: u64,
) -> Result<tempfile::TempDir> {
    let tmp = tempfile::TempDir::new()?;

    let mut cmd = tokio::process::Command::new("git");
    cmd.args([
        "clone",
        "--depth",
        &depth.to_string(),
        "--branch",
        branch,
        "--single-branch",
        target,
    ])
    .arg(tmp.path());

    let output = tokio::time::timeout(std::time::Duration::from_secs(timeout_secs), cmd.output())
        .await
        .map_err(|_| GraphError::target(format!("git clone of {target} timed out")))?
        .map_err(|e| GraphError::target(format!("failed to execute git clone: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(GraphError::target(format!(
            "git clone of {target} failed: {}",
            stderr.trim()
        )));
    }

    Ok(tmp)
}

fn is_remote_target(target: &str) -> bool {
    target.starts_with("http://") || target.starts_with("https://") || target.starts_with("git@")
}

/// Run the full scan pipeline against a local path or remote repository.
pub async fn run_scan(
    store: &TemporalStore,
    registry: &SchemaRegistry,
    parsers: &ParserRegistry,
    config: &ScanConfig,
    target: &str,
    dry_run: bool,
    actor: &str,
) -> Result<ScanResult> {
    // Keep the guard alive for the whole scan; dropping it removes the
    // clone directory.
    let (root, _clone_guard): (PathBuf, Option<tempfile::TempDir>) = if is_remote_target(target) {
        let guard = clone_remote(
            target,
            config.remote.depth,
            &config.remote.branch,
            config.remote.timeout_secs,
        )
        .await?;
        (guard.path().to_path_buf(), Some(guard))
    } else {
        let path = PathBuf::from(target);
        if !path.exists() {
            return Err(GraphError::target(format!(
                "scan target does not exist: {target}"
            )));
        }
        (path, None)
    };

    let mut result = ScanResult {
        dry_run,
        ..Default::default()
    };

    // Discover + fingerprint
    let files = discover(&root, config)?;
    result.files_discovered = files.len();

    let new_fingerprints: BTreeMap<String, FileFingerprint> = files
        .iter()
        .map(|f| (f.relative_path.clone(), f.fingerprint.clone()))
        .collect();

    // Incremental: restrict parsing to added ∪ changed.
    let previous = load_fingerprints(&root);
    result.files_removed = previous
        .keys()
        .filter(|path| !new_fingerprints.contains_key(*path))
        .count();

    let language_filter: Vec<Language> = config
        .languages
        .iter()
        .filter_map(|s| Language::parse(s))
        .collect();

    let parseable: Vec<&DiscoveredFile> = files
        .iter()
        .filter(|f| language_filter.is_empty() || language_filter.contains(&f.language))
        .filter(|f| {
            previous
                .get(&f.relative_path)
                .map_or(true, |prev| prev.hash != f.fingerprint.hash)
        })
        .collect();

    // Parse; one bad file never aborts the scan.
    let root_str = root.to_string_lossy().to_string();
    let mut artifacts: Vec<RawArtifact> = Vec::new();
    for file in parseable {
        let Some(parser) = parsers.parser_for(file.language) else {
            result.files_skipped += 1;
            continue;
        };
        match parser.parse(&file.relative_path, &file.content) {
            Ok(mut file_artifacts) => {
                result.files_parsed += 1;
                artifacts.append(&mut file_artifacts);
            }
            Err(err) => {
                tracing::warn!(path = %file.relative_path, error = %err, "parser error, skipping file");
                result.files_skipped += 1;
            }
        }
    }
    result.artifacts_extracted = artifacts.len();

    // Map artifacts to schema-labeled entities.
    let outcome = apply_mappings(&root_str, artifacts, &config.mappings, |label| {
        registry.has_label(label)
    });
    result.unmapped = outcome.unmapped.len();

    // Ingest in two passes (entities, then refs).
    let stats = ingest::ingest_batch(store, registry, &outcome.mapped, actor, dry_run).await?;
    result.entities_upserted = stats.entities_upserted;
    result.entities_skipped = stats.entities_skipped;
    result.relationships_created = stats.relationships_created;
    result.errors = stats.errors;

    // Persist the fresh fingerprints (whole-store rewrite) unless dry-run.
    if !dry_run {
        save_fingerprints(&root, &new_fingerprints)?;
    }

    Ok(result)
}
