use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::mapping::MappingRule;
use crate::schema::SchemaDef;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub schema: SchemaSection,
    #[serde(default)]
    pub docs: DocsConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub scan: ScanConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub path: PathBuf,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_busy_timeout_ms() -> u64 {
    5000
}
fn default_max_connections() -> u32 {
    5
}

/// The schema either inline (`[[schema.nodes]]`, ...) or in a sidecar
/// file referenced by `schema.path` (resolved relative to the config
/// file). A sidecar takes precedence over inline definitions.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct SchemaSection {
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(flatten)]
    pub inline: SchemaDef,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DocsConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Target file extension (without the dot).
    #[serde(default = "default_format")]
    pub format: String,
    /// Format adapter name; unknown names fall back to pass-through.
    #[serde(default)]
    pub framework: Option<String>,
    /// Path template with `{label}`, `{id}`, and `{ext}` placeholders.
    #[serde(default)]
    pub path_template: Option<String>,
}

impl Default for DocsConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            format: default_format(),
            framework: None,
            path_template: None,
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("docs/graph")
}
fn default_format() -> String {
    "md".to_string()
}

/// Conflict resolution strategy for the reconciliation engine.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictStrategy {
    #[default]
    GraphWins,
    DocsWins,
    Merge,
    Fail,
}

impl ConflictStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GraphWins => "graph-wins",
            Self::DocsWins => "docs-wins",
            Self::Merge => "merge",
            Self::Fail => "fail",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "graph-wins" => Some(Self::GraphWins),
            "docs-wins" => Some(Self::DocsWins),
            "merge" => Some(Self::Merge),
            "fail" => Some(Self::Fail),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SyncConfig {
    #[serde(default)]
    pub conflict_strategy: ConflictStrategy,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ScanConfig {
    /// Include globs; empty means the built-in source/manifest defaults.
    #[serde(default)]
    pub include: Vec<String>,
    /// User excludes, added to the unconditional vendored/build set.
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Languages eligible for parsing; empty means all.
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub mappings: Vec<MappingRule>,
    #[serde(default)]
    pub remote: RemoteConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RemoteConfig {
    #[serde(default = "default_depth")]
    pub depth: u32,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default = "default_clone_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            depth: default_depth(),
            branch: default_branch(),
            timeout_secs: default_clone_timeout_secs(),
        }
    }
}

fn default_depth() -> u32 {
    1
}
fn default_branch() -> String {
    "main".to_string()
}
fn default_clone_timeout_secs() -> u64 {
    120
}

impl Config {
    /// Resolve the effective schema: the sidecar file when `schema.path`
    /// is set (TOML or JSON by extension), otherwise the inline sections.
    pub fn schema_def(&self, config_dir: &Path) -> Result<SchemaDef> {
        match &self.schema.path {
            None => Ok(self.inline_schema()),
            Some(path) => {
                let resolved = if path.is_absolute() {
                    path.clone()
                } else {
                    config_dir.join(path)
                };
                let content = std::fs::read_to_string(&resolved).with_context(|| {
                    format!("Failed to read schema file: {}", resolved.display())
                })?;
                let schema = if resolved.extension().and_then(|e| e.to_str()) == Some("json") {
                    serde_json::from_str(&content)
                        .with_context(|| "Failed to parse schema file as JSON")?
                } else {
                    toml::from_str(&content)
                        .with_context(|| "Failed to parse schema file as TOML")?
                };
                Ok(schema)
            }
        }
    }

    fn inline_schema(&self) -> SchemaDef {
        self.schema.inline.clone()
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate storage
    if config.storage.busy_timeout_ms == 0 {
        anyhow::bail!("storage.busy_timeout_ms must be > 0");
    }
    if config.storage.max_connections == 0 {
        anyhow::bail!("storage.max_connections must be > 0");
    }

    // Validate docs
    if config.docs.format.is_empty() || config.docs.format.starts_with('.') {
        anyhow::bail!("docs.format must be a bare extension, e.g. \"md\"");
    }

    // Validate scan
    if config.scan.remote.depth == 0 {
        anyhow::bail!("scan.remote.depth must be >= 1");
    }
    for (i, rule) in config.scan.mappings.iter().enumerate() {
        if rule.artifact_kind.is_empty() {
            anyhow::bail!("scan.mappings[{}].artifact_kind must not be empty", i);
        }
        if rule.label.is_empty() {
            anyhow::bail!("scan.mappings[{}].label must not be empty", i);
        }
    }

    Ok(config)
}
