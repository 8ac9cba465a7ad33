//! Language parsers for the codebase scanner.
//!
//! Each parser consumes `(file, content)` and yields [`RawArtifact`]
//! records — language-agnostic descriptions of code elements with typed
//! refs to external names. Parsers are regex-based and deliberately
//! forgiving: they only need to recover the artifact surface, not build a
//! syntax tree, and a parser error on one file never aborts a scan.
//!
//! A [`ParserRegistry`] dispatches per language; later registrations win,
//! so callers can override the built-ins.
//!
//! # Built-in coverage
//!
//! | Parser | Extracts |
//! |--------|----------|
//! | typed-JS family | exported `function` / arrow-const / `class` (with `extends`/`implements`) / `interface` (with `extends`) / `type`; literal imports |
//! | Python | top-level `def` (with decorators), `class` with bases, `import` / `from … import` |
//! | Go | `func` (with receiver), `type … struct`, `type … interface`, import singles and blocks; `go.mod` module + requires |
//! | generic | `package.json`, `tsconfig.json`, `.env`, `Dockerfile`, JSON fallback, bare `file` |

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::LazyLock;

/// Languages the scanner can dispatch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    TypeScript,
    Python,
    Go,
    Generic,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TypeScript => "typescript",
            Self::Python => "python",
            Self::Go => "go",
            Self::Generic => "generic",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "typescript" | "javascript" => Some(Self::TypeScript),
            "python" => Some(Self::Python),
            "go" => Some(Self::Go),
            "generic" => Some(Self::Generic),
            _ => None,
        }
    }

    /// Detect a file's language: recognized basenames first, then the
    /// extension, falling through to `generic`.
    pub fn detect(path: &Path) -> Self {
        let basename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        match basename.as_str() {
            "go.mod" => return Self::Go,
            "package.json" | "tsconfig.json" | "Dockerfile" | ".env" => return Self::Generic,
            _ => {}
        }
        match path.extension().and_then(|e| e.to_str()) {
            Some("ts" | "tsx" | "js" | "jsx" | "mts" | "cts") => Self::TypeScript,
            Some("py") => Self::Python,
            Some("go") => Self::Go,
            _ => Self::Generic,
        }
    }
}

/// The closed set of artifact kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    File,
    Module,
    Function,
    Class,
    Interface,
    Type,
    ApiEndpoint,
    Dependency,
    EnvVar,
    ConfigKey,
    Export,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Module => "module",
            Self::Function => "function",
            Self::Class => "class",
            Self::Interface => "interface",
            Self::Type => "type",
            Self::ApiEndpoint => "api_endpoint",
            Self::Dependency => "dependency",
            Self::EnvVar => "env_var",
            Self::ConfigKey => "config_key",
            Self::Export => "export",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "file" => Some(Self::File),
            "module" => Some(Self::Module),
            "function" => Some(Self::Function),
            "class" => Some(Self::Class),
            "interface" => Some(Self::Interface),
            "type" => Some(Self::Type),
            "api_endpoint" => Some(Self::ApiEndpoint),
            "dependency" => Some(Self::Dependency),
            "env_var" => Some(Self::EnvVar),
            "config_key" => Some(Self::ConfigKey),
            "export" => Some(Self::Export),
            _ => None,
        }
    }
}

/// Typed pointer from an artifact to an external name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefKind {
    Imports,
    Extends,
    Implements,
    Calls,
    DependsOn,
    Configures,
}

impl RefKind {
    /// The declared relationship type this ref kind maps to at ingest.
    pub fn edge_type(&self) -> &'static str {
        match self {
            Self::Imports => "IMPORTS",
            Self::Extends => "EXTENDS",
            Self::Implements => "IMPLEMENTS",
            Self::Calls => "CALLS",
            Self::DependsOn => "DEPENDS_ON",
            Self::Configures => "CONFIGURES",
        }
    }
}

/// A typed reference carried by an artifact.
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactRef {
    pub kind: RefKind,
    pub target: String,
}

/// Language-agnostic description of one code element.
#[derive(Debug, Clone, Serialize)]
pub struct RawArtifact {
    pub kind: ArtifactKind,
    pub name: String,
    pub file_path: String,
    pub language: Language,
    pub meta: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<u32>,
    pub refs: Vec<ArtifactRef>,
}

impl RawArtifact {
    fn new(kind: ArtifactKind, name: impl Into<String>, file: &str, language: Language) -> Self {
        Self {
            kind,
            name: name.into(),
            file_path: file.to_string(),
            language,
            meta: Map::new(),
            location: None,
            refs: Vec::new(),
        }
    }

    fn at(mut self, line: u32) -> Self {
        self.location = Some(line);
        self
    }

    fn with_meta(mut self, key: &str, value: Value) -> Self {
        self.meta.insert(key.to_string(), value);
        self
    }

    fn with_ref(mut self, kind: RefKind, target: impl Into<String>) -> Self {
        self.refs.push(ArtifactRef {
            kind,
            target: target.into(),
        });
        self
    }
}

/// Capability implemented by every parser: the languages it claims and a
/// parse function. This is the scanner's only runtime-dispatch seam.
pub trait LanguageParser: Send + Sync {
    fn languages(&self) -> &[Language];
    fn parse(&self, file: &str, content: &str) -> anyhow::Result<Vec<RawArtifact>>;
}

/// Per-language parser dispatch; later registrations win.
pub struct ParserRegistry {
    parsers: Vec<Box<dyn LanguageParser>>,
}

impl ParserRegistry {
    /// Registry with the built-in parsers.
    pub fn new() -> Self {
        let mut registry = Self {
            parsers: Vec::new(),
        };
        registry.register(Box::new(TypedJsParser));
        registry.register(Box::new(PythonParser));
        registry.register(Box::new(GoParser));
        registry.register(Box::new(GenericParser));
        registry
    }

    /// Register a parser; it overrides earlier ones on its languages.
    pub fn register(&mut self, parser: Box<dyn LanguageParser>) {
        self.parsers.push(parser);
    }

    pub fn parser_for(&self, language: Language) -> Option<&dyn LanguageParser> {
        self.parsers
            .iter()
            .rev()
            .find(|p| p.languages().contains(&language))
            .map(|p| p.as_ref())
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn line_of(content: &str, byte_offset: usize) -> u32 {
    content[..byte_offset].bytes().filter(|b| *b == b'\n').count() as u32 + 1
}

// ----------------------------------------------------------------------
// Typed-JS family
// ----------------------------------------------------------------------

static TS_FN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*export\s+(?:default\s+)?(?:async\s+)?function\s+([A-Za-z_$][A-Za-z0-9_$]*)")
        .unwrap()
});
static TS_ARROW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^\s*export\s+const\s+([A-Za-z_$][A-Za-z0-9_$]*)[^=\n]*=\s*(?:async\s+)?(?:\([^)\n]*\)|[A-Za-z_$][A-Za-z0-9_$]*)[^=\n>]*=>",
    )
    .unwrap()
});
static TS_CONST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*export\s+const\s+([A-Za-z_$][A-Za-z0-9_$]*)").unwrap()
});
static TS_CLASS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^\s*export\s+(?:default\s+)?(?:abstract\s+)?class\s+([A-Za-z_$][A-Za-z0-9_$]*)(?:\s+extends\s+([A-Za-z_$][A-Za-z0-9_$.]*))?(?:\s+implements\s+([A-Za-z_$][A-Za-z0-9_$.,<>\s]*?))?\s*\{",
    )
    .unwrap()
});
static TS_INTERFACE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^\s*export\s+interface\s+([A-Za-z_$][A-Za-z0-9_$]*)(?:\s+extends\s+([A-Za-z_$][A-Za-z0-9_$.,<>\s]*?))?\s*\{",
    )
    .unwrap()
});
static TS_TYPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*export\s+type\s+([A-Za-z_$][A-Za-z0-9_$]*)").unwrap()
});
static TS_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^\s*import\s+(?:[^;'"]*?from\s+)?['"]([^'"]+)['"]"#).unwrap()
});

/// TypeScript/JavaScript parser (shared across the typed-JS family).
pub struct TypedJsParser;

impl LanguageParser for TypedJsParser {
    fn languages(&self) -> &[Language] {
        &[Language::TypeScript]
    }

    fn parse(&self, file: &str, content: &str) -> anyhow::Result<Vec<RawArtifact>> {
        let lang = Language::TypeScript;
        let mut artifacts = Vec::new();

        let mut file_artifact = RawArtifact::new(ArtifactKind::File, basename(file), file, lang);
        for cap in TS_IMPORT.captures_iter(content) {
            file_artifact = file_artifact.with_ref(RefKind::Imports, &cap[1]);
        }
        artifacts.push(file_artifact);

        let mut arrow_names = Vec::new();
        for cap in TS_FN.captures_iter(content) {
            let m = cap.get(1).unwrap();
            artifacts.push(
                RawArtifact::new(ArtifactKind::Function, m.as_str(), file, lang)
                    .at(line_of(content, m.start())),
            );
        }
        for cap in TS_ARROW.captures_iter(content) {
            let m = cap.get(1).unwrap();
            arrow_names.push(m.as_str().to_string());
            artifacts.push(
                RawArtifact::new(ArtifactKind::Function, m.as_str(), file, lang)
                    .at(line_of(content, m.start()))
                    .with_meta("arrow", Value::Bool(true)),
            );
        }
        for cap in TS_CLASS.captures_iter(content) {
            let m = cap.get(1).unwrap();
            let mut artifact = RawArtifact::new(ArtifactKind::Class, m.as_str(), file, lang)
                .at(line_of(content, m.start()));
            if let Some(base) = cap.get(2) {
                artifact = artifact.with_ref(RefKind::Extends, base.as_str());
            }
            if let Some(impls) = cap.get(3) {
                for name in impls.as_str().split(',') {
                    let name = name.trim();
                    if !name.is_empty() {
                        artifact = artifact.with_ref(RefKind::Implements, name);
                    }
                }
            }
            artifacts.push(artifact);
        }
        for cap in TS_INTERFACE.captures_iter(content) {
            let m = cap.get(1).unwrap();
            let mut artifact = RawArtifact::new(ArtifactKind::Interface, m.as_str(), file, lang)
                .at(line_of(content, m.start()));
            if let Some(bases) = cap.get(2) {
                for name in bases.as_str().split(',') {
                    let name = name.trim();
                    if !name.is_empty() {
                        artifact = artifact.with_ref(RefKind::Extends, name);
                    }
                }
            }
            artifacts.push(artifact);
        }
        for cap in TS_TYPE.captures_iter(content) {
            let m = cap.get(1).unwrap();
            artifacts.push(
                RawArtifact::new(ArtifactKind::Type, m.as_str(), file, lang)
                    .at(line_of(content, m.start())),
            );
        }
        // Exported consts that are not arrow functions
        for cap in TS_CONST.captures_iter(content) {
            let m = cap.get(1).unwrap();
            if arrow_names.iter().any(|n| n == m.as_str()) {
                continue;
            }
            artifacts.push(
                RawArtifact::new(ArtifactKind::Export, m.as_str(), file, lang)
                    .at(line_of(content, m.start())),
            );
        }

        Ok(artifacts)
    }
}

// ----------------------------------------------------------------------
// Python
// ----------------------------------------------------------------------

static PY_DEF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^def\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(").unwrap());
static PY_CLASS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^class\s+([A-Za-z_][A-Za-z0-9_]*)\s*(?:\(([^)]*)\))?\s*:").unwrap()
});
static PY_DECORATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^@([A-Za-z_][A-Za-z0-9_.]*)").unwrap());
static PY_IMPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^import\s+([A-Za-z_][A-Za-z0-9_.]*)").unwrap());
static PY_FROM_IMPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^from\s+([A-Za-z_][A-Za-z0-9_.]*)\s+import\s+").unwrap());

/// Python parser: top-level defs, classes, imports.
pub struct PythonParser;

impl LanguageParser for PythonParser {
    fn languages(&self) -> &[Language] {
        &[Language::Python]
    }

    fn parse(&self, file: &str, content: &str) -> anyhow::Result<Vec<RawArtifact>> {
        let lang = Language::Python;
        let mut artifacts = Vec::new();
        let mut file_artifact = RawArtifact::new(ArtifactKind::File, basename(file), file, lang);
        let mut pending_decorators: Vec<String> = Vec::new();

        for (idx, line) in content.lines().enumerate() {
            let line_no = idx as u32 + 1;

            if let Some(cap) = PY_DECORATOR.captures(line) {
                pending_decorators.push(cap[1].to_string());
                continue;
            }

            if let Some(cap) = PY_DEF.captures(line) {
                let mut artifact =
                    RawArtifact::new(ArtifactKind::Function, &cap[1], file, lang).at(line_no);
                if !pending_decorators.is_empty() {
                    artifact = artifact.with_meta(
                        "decorators",
                        Value::Array(
                            pending_decorators
                                .iter()
                                .cloned()
                                .map(Value::String)
                                .collect(),
                        ),
                    );
                }
                artifacts.push(artifact);
            } else if let Some(cap) = PY_CLASS.captures(line) {
                let mut artifact =
                    RawArtifact::new(ArtifactKind::Class, &cap[1], file, lang).at(line_no);
                if let Some(bases) = cap.get(2) {
                    for base in bases.as_str().split(',') {
                        let base = base.trim();
                        if !base.is_empty() && base != "object" {
                            artifact = artifact.with_ref(RefKind::Extends, base);
                        }
                    }
                }
                artifacts.push(artifact);
            } else if let Some(cap) = PY_IMPORT.captures(line) {
                file_artifact = file_artifact.with_ref(RefKind::Imports, &cap[1]);
            } else if let Some(cap) = PY_FROM_IMPORT.captures(line) {
                file_artifact = file_artifact.with_ref(RefKind::Imports, &cap[1]);
            }

            pending_decorators.clear();
        }

        artifacts.insert(0, file_artifact);
        Ok(artifacts)
    }
}

// ----------------------------------------------------------------------
// Go
// ----------------------------------------------------------------------

static GO_FUNC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^func\s+(?:\(([^)]+)\)\s+)?([A-Za-z_][A-Za-z0-9_]*)\s*\(").unwrap()
});
static GO_STRUCT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^type\s+([A-Za-z_][A-Za-z0-9_]*)\s+struct\b").unwrap());
static GO_INTERFACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^type\s+([A-Za-z_][A-Za-z0-9_]*)\s+interface\b").unwrap());
static GO_IMPORT_SINGLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?m)^import\s+(?:[A-Za-z_.]+\s+)?"([^"]+)""#).unwrap());
static GO_IMPORT_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?ms)^import\s*\((.*?)\)").unwrap());
static GO_IMPORT_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([^"]+)""#).unwrap());
static GO_MOD_MODULE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^module\s+(\S+)").unwrap());
static GO_MOD_REQUIRE_SINGLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^require\s+(\S+)\s+(\S+)").unwrap());
static GO_MOD_REQUIRE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?ms)^require\s*\((.*?)\)").unwrap());
static GO_MOD_REQUIRE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(\S+)\s+(v\S+)").unwrap());

/// Go parser: funcs (with receivers), structs, interfaces, imports, and
/// `go.mod` modules with their requires.
pub struct GoParser;

impl LanguageParser for GoParser {
    fn languages(&self) -> &[Language] {
        &[Language::Go]
    }

    fn parse(&self, file: &str, content: &str) -> anyhow::Result<Vec<RawArtifact>> {
        if basename(file) == "go.mod" {
            return Ok(parse_go_mod(file, content));
        }

        let lang = Language::Go;
        let mut artifacts = Vec::new();

        let mut file_artifact = RawArtifact::new(ArtifactKind::File, basename(file), file, lang);
        for cap in GO_IMPORT_SINGLE.captures_iter(content) {
            file_artifact = file_artifact.with_ref(RefKind::Imports, &cap[1]);
        }
        for block in GO_IMPORT_BLOCK.captures_iter(content) {
            for line in GO_IMPORT_LINE.captures_iter(&block[1]) {
                file_artifact = file_artifact.with_ref(RefKind::Imports, &line[1]);
            }
        }
        artifacts.push(file_artifact);

        for cap in GO_FUNC.captures_iter(content) {
            let m = cap.get(2).unwrap();
            let mut artifact = RawArtifact::new(ArtifactKind::Function, m.as_str(), file, lang)
                .at(line_of(content, m.start()));
            if let Some(receiver) = cap.get(1) {
                artifact =
                    artifact.with_meta("receiver", Value::String(receiver.as_str().trim().into()));
            }
            artifacts.push(artifact);
        }
        for cap in GO_STRUCT.captures_iter(content) {
            let m = cap.get(1).unwrap();
            artifacts.push(
                RawArtifact::new(ArtifactKind::Class, m.as_str(), file, lang)
                    .at(line_of(content, m.start()))
                    .with_meta("go_kind", Value::String("struct".into())),
            );
        }
        for cap in GO_INTERFACE.captures_iter(content) {
            let m = cap.get(1).unwrap();
            artifacts.push(
                RawArtifact::new(ArtifactKind::Interface, m.as_str(), file, lang)
                    .at(line_of(content, m.start())),
            );
        }

        Ok(artifacts)
    }
}

fn parse_go_mod(file: &str, content: &str) -> Vec<RawArtifact> {
    let lang = Language::Go;
    let mut artifacts = Vec::new();

    let module_name = GO_MOD_MODULE
        .captures(content)
        .map(|c| c[1].to_string())
        .unwrap_or_else(|| basename(file));

    let mut requires: Vec<(String, String)> = Vec::new();
    for cap in GO_MOD_REQUIRE_SINGLE.captures_iter(content) {
        if &cap[1] != "(" {
            requires.push((cap[1].to_string(), cap[2].to_string()));
        }
    }
    for block in GO_MOD_REQUIRE_BLOCK.captures_iter(content) {
        for line in GO_MOD_REQUIRE_LINE.captures_iter(&block[1]) {
            requires.push((line[1].to_string(), line[2].to_string()));
        }
    }

    let mut module = RawArtifact::new(ArtifactKind::Module, &module_name, file, lang);
    for (name, _) in &requires {
        module = module.with_ref(RefKind::DependsOn, name.clone());
    }
    artifacts.push(module);

    for (name, version) in requires {
        artifacts.push(
            RawArtifact::new(ArtifactKind::Dependency, &name, file, lang)
                .with_meta("version", Value::String(version)),
        );
    }
    artifacts
}

// ----------------------------------------------------------------------
// Generic (manifests, JSON, bare files)
// ----------------------------------------------------------------------

static ENV_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^([A-Za-z_][A-Za-z0-9_]*)=").unwrap());
static DOCKER_FROM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?mi)^FROM\s+(\S+)").unwrap());
static DOCKER_ENV: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^ENV\s+([A-Za-z_][A-Za-z0-9_]*)").unwrap());
static DOCKER_EXPOSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^EXPOSE\s+(\d+)").unwrap());

/// Recognized-basename manifest parsing with a JSON fallback.
pub struct GenericParser;

impl LanguageParser for GenericParser {
    fn languages(&self) -> &[Language] {
        &[Language::Generic]
    }

    fn parse(&self, file: &str, content: &str) -> anyhow::Result<Vec<RawArtifact>> {
        let lang = Language::Generic;
        match basename(file).as_str() {
            "package.json" => Ok(parse_package_json(file, content)),
            "tsconfig.json" => Ok(parse_tsconfig(file, content)),
            ".env" => {
                let mut artifacts =
                    vec![RawArtifact::new(ArtifactKind::File, basename(file), file, lang)];
                for cap in ENV_LINE.captures_iter(content) {
                    artifacts.push(RawArtifact::new(ArtifactKind::EnvVar, &cap[1], file, lang));
                }
                Ok(artifacts)
            }
            "Dockerfile" => {
                let mut artifacts =
                    vec![RawArtifact::new(ArtifactKind::File, basename(file), file, lang)];
                for cap in DOCKER_FROM.captures_iter(content) {
                    artifacts.push(
                        RawArtifact::new(ArtifactKind::Dependency, &cap[1], file, lang)
                            .with_meta("source", Value::String("docker".into())),
                    );
                }
                for cap in DOCKER_ENV.captures_iter(content) {
                    artifacts.push(RawArtifact::new(ArtifactKind::EnvVar, &cap[1], file, lang));
                }
                for cap in DOCKER_EXPOSE.captures_iter(content) {
                    artifacts.push(
                        RawArtifact::new(ArtifactKind::ConfigKey, format!("expose:{}", &cap[1]), file, lang),
                    );
                }
                Ok(artifacts)
            }
            name if name.ends_with(".json") => {
                let mut artifact = RawArtifact::new(ArtifactKind::File, basename(file), file, lang);
                if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(content) {
                    let keys: Vec<Value> =
                        map.keys().cloned().map(Value::String).collect();
                    artifact = artifact.with_meta("keys", Value::Array(keys));
                }
                Ok(vec![artifact])
            }
            _ => Ok(vec![RawArtifact::new(
                ArtifactKind::File,
                basename(file),
                file,
                lang,
            )]),
        }
    }
}

fn parse_package_json(file: &str, content: &str) -> Vec<RawArtifact> {
    let lang = Language::Generic;
    let Ok(Value::Object(map)) = serde_json::from_str::<Value>(content) else {
        return vec![RawArtifact::new(ArtifactKind::File, basename(file), file, lang)];
    };

    let module_name = map
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("package")
        .to_string();

    let mut deps: Vec<(String, String)> = Vec::new();
    for section in ["dependencies", "devDependencies"] {
        if let Some(Value::Object(section_map)) = map.get(section) {
            for (name, version) in section_map {
                deps.push((
                    name.clone(),
                    version.as_str().unwrap_or_default().to_string(),
                ));
            }
        }
    }

    let mut module = RawArtifact::new(ArtifactKind::Module, &module_name, file, lang);
    if let Some(version) = map.get("version").and_then(Value::as_str) {
        module = module.with_meta("version", Value::String(version.into()));
    }
    for (name, _) in &deps {
        module = module.with_ref(RefKind::DependsOn, name.clone());
    }

    let mut artifacts = vec![module];
    for (name, version) in deps {
        artifacts.push(
            RawArtifact::new(ArtifactKind::Dependency, &name, file, lang)
                .with_meta("version", Value::String(version)),
        );
    }
    artifacts
}

fn parse_tsconfig(file: &str, content: &str) -> Vec<RawArtifact> {
    let lang = Language::Generic;
    let mut artifacts = vec![RawArtifact::new(ArtifactKind::File, basename(file), file, lang)];
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(content) {
        if let Some(Value::Object(options)) = map.get("compilerOptions") {
            for (key, value) in options {
                artifacts.push(
                    RawArtifact::new(ArtifactKind::ConfigKey, key, file, lang)
                        .with_meta("value", value.clone()),
                );
            }
        }
    }
    artifacts
}

fn basename(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds_and_names(artifacts: &[RawArtifact]) -> Vec<(ArtifactKind, &str)> {
        artifacts
            .iter()
            .map(|a| (a.kind, a.name.as_str()))
            .collect()
    }

    #[test]
    fn language_detection_prefers_basename() {
        assert_eq!(Language::detect(Path::new("api/go.mod")), Language::Go);
        assert_eq!(
            Language::detect(Path::new("web/package.json")),
            Language::Generic
        );
        assert_eq!(Language::detect(Path::new("src/app.tsx")), Language::TypeScript);
        assert_eq!(Language::detect(Path::new("tasks.py")), Language::Python);
        assert_eq!(Language::detect(Path::new("README.md")), Language::Generic);
    }

    #[test]
    fn ts_parser_extracts_exports_and_imports() {
        let src = r#"
import { api } from "./api";
import fs from "fs";

export function handler(req: Request): Response {
  return new Response();
}

export const format = (value: string) => value.trim();

export const VERSION = "1.0";

export class Repo extends Base implements Storable, Closeable {
}

export interface Storable extends Serializable {
  save(): void;
}

export type Mode = "fast" | "slow";
"#;
        let artifacts = TypedJsParser.parse("src/app.ts", src).unwrap();
        let items = kinds_and_names(&artifacts);

        assert!(items.contains(&(ArtifactKind::File, "app.ts")));
        assert!(items.contains(&(ArtifactKind::Function, "handler")));
        assert!(items.contains(&(ArtifactKind::Function, "format")));
        assert!(items.contains(&(ArtifactKind::Export, "VERSION")));
        assert!(items.contains(&(ArtifactKind::Class, "Repo")));
        assert!(items.contains(&(ArtifactKind::Interface, "Storable")));
        assert!(items.contains(&(ArtifactKind::Type, "Mode")));

        let file = &artifacts[0];
        let import_targets: Vec<&str> = file.refs.iter().map(|r| r.target.as_str()).collect();
        assert_eq!(import_targets, vec!["./api", "fs"]);

        let class = artifacts.iter().find(|a| a.name == "Repo").unwrap();
        assert!(class
            .refs
            .iter()
            .any(|r| r.kind == RefKind::Extends && r.target == "Base"));
        assert!(class
            .refs
            .iter()
            .any(|r| r.kind == RefKind::Implements && r.target == "Storable"));
        assert!(class
            .refs
            .iter()
            .any(|r| r.kind == RefKind::Implements && r.target == "Closeable"));
    }

    #[test]
    fn python_parser_extracts_defs_classes_imports() {
        let src = r#"
import os
from flask import Flask

@app.route("/health")
def health():
    return "ok"

class UserRepo(BaseRepo, Loggable):
    def save(self):
        pass
"#;
        let artifacts = PythonParser.parse("app.py", src).unwrap();
        let items = kinds_and_names(&artifacts);

        assert!(items.contains(&(ArtifactKind::Function, "health")));
        assert!(items.contains(&(ArtifactKind::Class, "UserRepo")));
        // indented def is not top-level
        assert!(!items.contains(&(ArtifactKind::Function, "save")));

        let health = artifacts.iter().find(|a| a.name == "health").unwrap();
        assert_eq!(health.meta["decorators"], serde_json::json!(["app.route"]));

        let class = artifacts.iter().find(|a| a.name == "UserRepo").unwrap();
        assert_eq!(class.refs.len(), 2);

        let file = &artifacts[0];
        let imports: Vec<&str> = file.refs.iter().map(|r| r.target.as_str()).collect();
        assert_eq!(imports, vec!["os", "flask"]);
    }

    #[test]
    fn go_parser_extracts_funcs_and_types() {
        let src = r#"
package server

import "fmt"

import (
    "net/http"
    "strings"
)

func Start(addr string) error {
    return nil
}

func (s *Server) Stop() {}

type Server struct {
    addr string
}

type Handler interface {
    Serve()
}
"#;
        let artifacts = GoParser.parse("server.go", src).unwrap();
        let items = kinds_and_names(&artifacts);

        assert!(items.contains(&(ArtifactKind::Function, "Start")));
        assert!(items.contains(&(ArtifactKind::Function, "Stop")));
        assert!(items.contains(&(ArtifactKind::Class, "Server")));
        assert!(items.contains(&(ArtifactKind::Interface, "Handler")));

        let stop = artifacts.iter().find(|a| a.name == "Stop").unwrap();
        assert_eq!(stop.meta["receiver"], serde_json::json!("s *Server"));

        let file = &artifacts[0];
        let imports: Vec<&str> = file.refs.iter().map(|r| r.target.as_str()).collect();
        assert_eq!(imports, vec!["fmt", "net/http", "strings"]);
    }

    #[test]
    fn go_mod_yields_module_and_dependencies() {
        let src = r#"
module github.com/acme/api

go 1.21

require github.com/pkg/errors v0.9.1

require (
    github.com/stretchr/testify v1.8.0
    golang.org/x/sync v0.5.0
)
"#;
        let artifacts = GoParser.parse("go.mod", src).unwrap();
        let module = artifacts.iter().find(|a| a.kind == ArtifactKind::Module).unwrap();
        assert_eq!(module.name, "github.com/acme/api");
        assert_eq!(module.refs.len(), 3);

        let deps: Vec<&str> = artifacts
            .iter()
            .filter(|a| a.kind == ArtifactKind::Dependency)
            .map(|a| a.name.as_str())
            .collect();
        assert_eq!(
            deps,
            vec![
                "github.com/pkg/errors",
                "github.com/stretchr/testify",
                "golang.org/x/sync"
            ]
        );
    }

    #[test]
    fn package_json_yields_module_and_dependencies() {
        let src = r#"{
            "name": "web-app",
            "version": "2.1.0",
            "dependencies": {"react": "^18.0.0"},
            "devDependencies": {"vitest": "^1.0.0"}
        }"#;
        let artifacts = GenericParser.parse("package.json", src).unwrap();
        let module = artifacts.iter().find(|a| a.kind == ArtifactKind::Module).unwrap();
        assert_eq!(module.name, "web-app");
        assert_eq!(module.meta["version"], serde_json::json!("2.1.0"));
        assert_eq!(module.refs.len(), 2);

        let deps: Vec<&str> = artifacts
            .iter()
            .filter(|a| a.kind == ArtifactKind::Dependency)
            .map(|a| a.name.as_str())
            .collect();
        assert!(deps.contains(&"react"));
        assert!(deps.contains(&"vitest"));
    }

    #[test]
    fn env_and_dockerfile_parsing() {
        let env = GenericParser.parse(".env", "DB_URL=postgres://x\nPORT=8080\n").unwrap();
        let env_vars: Vec<&str> = env
            .iter()
            .filter(|a| a.kind == ArtifactKind::EnvVar)
            .map(|a| a.name.as_str())
            .collect();
        assert_eq!(env_vars, vec!["DB_URL", "PORT"]);

        let docker = GenericParser
            .parse("Dockerfile", "FROM rust:1.80\nENV APP_MODE production\nEXPOSE 8080\n")
            .unwrap();
        assert!(docker
            .iter()
            .any(|a| a.kind == ArtifactKind::Dependency && a.name == "rust:1.80"));
        assert!(docker
            .iter()
            .any(|a| a.kind == ArtifactKind::EnvVar && a.name == "APP_MODE"));
        assert!(docker
            .iter()
            .any(|a| a.kind == ArtifactKind::ConfigKey && a.name == "expose:8080"));
    }

    #[test]
    fn unknown_generic_file_yields_bare_file_artifact() {
        let artifacts = GenericParser.parse("notes.txt", "whatever").unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].kind, ArtifactKind::File);
    }

    #[test]
    fn later_registrations_override_builtins() {
        struct Stub;
        impl LanguageParser for Stub {
            fn languages(&self) -> &[Language] {
                &[Language::Python]
            }
            fn parse(&self, file: &str, _content: &str) -> anyhow::Result<Vec<RawArtifact>> {
                Ok(vec![RawArtifact::new(
                    ArtifactKind::File,
                    "stub",
                    file,
                    Language::Python,
                )])
            }
        }

        let mut registry = ParserRegistry::new();
        registry.register(Box::new(Stub));
        let parser = registry.parser_for(Language::Python).unwrap();
        let artifacts = parser.parse("x.py", "def real(): pass").unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].name, "stub");
    }
}
