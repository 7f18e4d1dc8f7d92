//! Raw signal detectors over one change request.
//!
//! Detectors are pure functions over a precomputed [`SignalContext`]. Counts
//! are normalized by a saturation constant and clamped to [0,1] by the
//! caller; ratios are emitted directly.

use std::collections::HashSet;
use std::sync::LazyLock;

use gauge_core::ChangeRequest;
use regex::Regex;

/// Coarse file categories used for signal applicability. Classification is
/// path-based only; unknown extensions land in `Other` and detectors skip
/// them silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    Source,
    Test,
    Config,
    DependencyManifest,
    Migration,
    Ci,
    Docs,
    Other,
}

const SOURCE_EXTENSIONS: &[&str] = &[
    "rs", "py", "js", "ts", "tsx", "jsx", "go", "java", "rb", "php", "c", "cc", "cpp", "h", "hpp",
    "cs", "kt", "swift", "scala", "sql", "sh",
];

const CONFIG_EXTENSIONS: &[&str] = &[
    "toml", "yaml", "yml", "json", "ini", "cfg", "conf", "properties", "env",
];

const DOC_EXTENSIONS: &[&str] = &["md", "rst", "adoc", "txt"];

const DEPENDENCY_MANIFESTS: &[&str] = &[
    "cargo.toml",
    "cargo.lock",
    "package.json",
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "go.mod",
    "go.sum",
    "requirements.txt",
    "pyproject.toml",
    "poetry.lock",
    "gemfile",
    "gemfile.lock",
    "pom.xml",
    "build.gradle",
];

pub fn classify_path(path: &str) -> FileKind {
    let normalized = path.replace('\\', "/").to_ascii_lowercase();
    let file_name = normalized.rsplit('/').next().unwrap_or(&normalized);
    let extension = file_name.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");

    if normalized.starts_with(".github/")
        || normalized.contains(".gitlab-ci")
        || normalized.contains(".circleci/")
        || file_name == "jenkinsfile"
    {
        return FileKind::Ci;
    }
    if DEPENDENCY_MANIFESTS.contains(&file_name) {
        return FileKind::DependencyManifest;
    }
    if normalized.contains("/migrations/")
        || normalized.starts_with("migrations/")
        || file_name.contains("migration")
    {
        return FileKind::Migration;
    }
    if normalized.contains("/tests/")
        || normalized.starts_with("tests/")
        || normalized.contains("/test/")
        || file_name.starts_with("test_")
        || file_name.contains("_test.")
        || file_name.contains(".test.")
        || file_name.contains(".spec.")
    {
        return FileKind::Test;
    }
    if normalized.starts_with("docs/") || DOC_EXTENSIONS.contains(&extension) {
        return FileKind::Docs;
    }
    if file_name == ".env" || file_name.starts_with(".env.") || CONFIG_EXTENSIONS.contains(&extension)
    {
        return FileKind::Config;
    }
    if SOURCE_EXTENSIONS.contains(&extension) {
        return FileKind::Source;
    }

    FileKind::Other
}

fn is_sensitive_path(path: &str) -> bool {
    let normalized = path.replace('\\', "/").to_ascii_lowercase();
    let file_name = normalized.rsplit('/').next().unwrap_or(&normalized);

    if file_name == ".env"
        || file_name.starts_with(".env.")
        || file_name.ends_with(".pem")
        || file_name.ends_with(".key")
    {
        return true;
    }

    [
        "auth", "login", "session", "password", "secret", "security", "crypto", "token", "acl",
        "permission",
    ]
    .iter()
    .any(|marker| normalized.contains(marker))
}

fn is_interface_path(path: &str) -> bool {
    let normalized = path.replace('\\', "/").to_ascii_lowercase();
    let file_name = normalized.rsplit('/').next().unwrap_or(&normalized);
    let extension = file_name.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");

    normalized.contains("/api/")
        || normalized.starts_with("api/")
        || ["proto", "graphql", "thrift", "avsc"].contains(&extension)
        || file_name.contains("openapi")
        || file_name.contains("swagger")
}

static SQL_STRING_CONCAT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)"[^"]*\b(?:select|insert|update|delete|drop|union)\b[^"]*"\s*\+|'[^']*\b(?:select|insert|update|delete|drop|union)\b[^']*'\s*\+"#,
    )
    .expect("sql concat regex")
});

// Redaction rewrites secret spans into placeholders before text reaches
// scoring, so the detector counts both the raw shape and the placeholders.
static HARDCODED_SECRET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r#"(?i)\b(?:password|passwd|secret|api[_-]?key|access[_-]?token|auth[_-]?token)\b\s*[:=]\s*["'][^"']{{4,}}["']|\b(?:{}|{}|{})\b"#,
        gauge_redact::SECRET_ASSIGNMENT_PLACEHOLDER,
        gauge_redact::TOKEN_PLACEHOLDER,
        gauge_redact::URL_CREDENTIAL_PLACEHOLDER,
    ))
    .expect("hardcoded secret regex")
});

static RISKY_API: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:eval|execv?p?|system|popen|spawnSync|dangerouslySetInnerHTML|pickle\.loads|yaml\.load|child_process|Runtime\.getRuntime)\b|innerHTML\s*=",
    )
    .expect("risky api regex")
});

static ERROR_HANDLING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:try|catch|except|rescue|recover)\b|\.unwrap\(\)").expect("error handling regex")
});

static TODO_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:TODO|FIXME|HACK|XXX)\b").expect("todo marker regex"));

static IMPORT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:use\s|import\s|from\s+\S+\s+import\b|require\s*\(|#include\s)")
        .expect("import line regex")
});

static PUBLIC_API_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:pub\s+(?:async\s+)?(?:fn|struct|enum|trait|mod|const)|export\s+(?:default\s+)?(?:async\s+)?(?:function|class|const|interface|type)|public\s+(?:static\s+)?(?:class|interface|[A-Za-z_<>\[\]]+\s+\w+\s*\())",
    )
    .expect("public api regex")
});

/// Everything the detectors need, computed once per request.
pub struct SignalContext<'a> {
    pub request: &'a ChangeRequest,
    pub added_lines: Vec<&'a str>,
    pub removed_lines: Vec<&'a str>,
    pub kinds: Vec<FileKind>,
}

impl<'a> SignalContext<'a> {
    pub fn new(request: &'a ChangeRequest) -> Self {
        let mut added_lines = Vec::new();
        let mut removed_lines = Vec::new();
        for line in request.diff_text.lines() {
            if let Some(rest) = line.strip_prefix('+') {
                if !line.starts_with("+++") {
                    added_lines.push(rest);
                }
            } else if let Some(rest) = line.strip_prefix('-')
                && !line.starts_with("---")
            {
                removed_lines.push(rest);
            }
        }

        let kinds = request
            .files
            .iter()
            .map(|file| classify_path(&file.path))
            .collect();

        Self {
            request,
            added_lines,
            removed_lines,
            kinds,
        }
    }

    pub fn touches_kind(&self, kind: FileKind) -> bool {
        self.kinds.contains(&kind)
    }

    fn count_added(&self, pattern: &Regex) -> usize {
        self.added_lines
            .iter()
            .filter(|line| pattern.is_match(line))
            .count()
    }

    fn count_removed(&self, pattern: &Regex) -> usize {
        self.removed_lines
            .iter()
            .filter(|line| pattern.is_match(line))
            .count()
    }

    fn count_files(&self, predicate: impl Fn(&str) -> bool) -> usize {
        self.request
            .files
            .iter()
            .filter(|file| predicate(&file.path))
            .count()
    }

    fn count_kinds(&self, kind: FileKind) -> usize {
        self.kinds.iter().filter(|k| **k == kind).count()
    }
}

// -- complexity ---------------------------------------------------------

pub fn churn_volume(ctx: &SignalContext) -> f64 {
    ctx.request.total_churn() as f64 / 800.0
}

pub fn files_touched(ctx: &SignalContext) -> f64 {
    ctx.request.changed_file_count() as f64 / 20.0
}

pub fn avg_churn_per_file(ctx: &SignalContext) -> f64 {
    let files = ctx.request.changed_file_count();
    if files == 0 {
        return 0.0;
    }
    ctx.request.total_churn() as f64 / files as f64 / 150.0
}

pub fn deep_nesting_ratio(ctx: &SignalContext) -> f64 {
    if ctx.added_lines.is_empty() {
        return 0.0;
    }
    let deep = ctx
        .added_lines
        .iter()
        .filter(|line| leading_whitespace_width(line) >= 16)
        .count();
    deep as f64 / ctx.added_lines.len() as f64
}

fn leading_whitespace_width(line: &str) -> usize {
    let mut width = 0usize;
    for ch in line.chars() {
        match ch {
            ' ' => width += 1,
            '\t' => width += 4,
            _ => break,
        }
    }
    width
}

// -- security -----------------------------------------------------------

pub fn sql_string_concat(ctx: &SignalContext) -> f64 {
    ctx.count_added(&SQL_STRING_CONCAT) as f64
}

pub fn hardcoded_secrets(ctx: &SignalContext) -> f64 {
    ctx.count_added(&HARDCODED_SECRET) as f64
}

pub fn risky_api_calls(ctx: &SignalContext) -> f64 {
    ctx.count_added(&RISKY_API) as f64 / 3.0
}

pub fn sensitive_paths_touched(ctx: &SignalContext) -> f64 {
    ctx.count_files(is_sensitive_path) as f64 / 2.0
}

// -- bug probability ----------------------------------------------------

pub fn deletion_ratio(ctx: &SignalContext) -> f64 {
    let churn = ctx.request.total_churn();
    if churn == 0 {
        return 0.0;
    }
    ctx.request.deletions as f64 / churn as f64
}

pub fn error_handling_removed(ctx: &SignalContext) -> f64 {
    ctx.count_removed(&ERROR_HANDLING) as f64 / 3.0
}

pub fn untested_source_changes(ctx: &SignalContext) -> f64 {
    if ctx.touches_kind(FileKind::Source) && !ctx.touches_kind(FileKind::Test) {
        1.0
    } else {
        0.0
    }
}

pub fn todo_markers_added(ctx: &SignalContext) -> f64 {
    ctx.count_added(&TODO_MARKER) as f64 / 3.0
}

// -- coupling -----------------------------------------------------------

pub fn directory_spread(ctx: &SignalContext) -> f64 {
    let top_dirs: HashSet<&str> = ctx
        .request
        .files
        .iter()
        .map(|file| {
            file.path
                .split(['/', '\\'])
                .next()
                .unwrap_or(file.path.as_str())
        })
        .collect();
    top_dirs.len() as f64 / 5.0
}

pub fn import_churn(ctx: &SignalContext) -> f64 {
    ctx.count_added(&IMPORT_LINE) as f64 / 10.0
}

pub fn interface_changes(ctx: &SignalContext) -> f64 {
    ctx.count_files(is_interface_path) as f64 / 3.0
}

pub fn config_beside_code(ctx: &SignalContext) -> f64 {
    if ctx.touches_kind(FileKind::Config) && ctx.touches_kind(FileKind::Source) {
        1.0
    } else {
        0.0
    }
}

// -- volatility ---------------------------------------------------------

pub fn dependency_manifest_changes(ctx: &SignalContext) -> f64 {
    ctx.count_kinds(FileKind::DependencyManifest) as f64 / 2.0
}

pub fn migration_changes(ctx: &SignalContext) -> f64 {
    ctx.count_kinds(FileKind::Migration) as f64 / 2.0
}

pub fn ci_config_changes(ctx: &SignalContext) -> f64 {
    ctx.count_kinds(FileKind::Ci) as f64 / 2.0
}

// -- change surface -----------------------------------------------------

pub fn additions_volume(ctx: &SignalContext) -> f64 {
    ctx.request.additions as f64 / 500.0
}

pub fn deletions_volume(ctx: &SignalContext) -> f64 {
    ctx.request.deletions as f64 / 500.0
}

pub fn file_spread(ctx: &SignalContext) -> f64 {
    ctx.request.changed_file_count() as f64 / 20.0
}

pub fn public_api_additions(ctx: &SignalContext) -> f64 {
    ctx.count_added(&PUBLIC_API_LINE) as f64 / 5.0
}
