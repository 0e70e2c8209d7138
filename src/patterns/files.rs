//! File-change classification.

use serde::{Deserialize, Serialize};

/// Working-tree status of one path, as reported by `git status --porcelain`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    Added,
    Modified,
    Deleted,
    Renamed,
    Untracked,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub status: ChangeStatus,
}

impl FileChange {
    pub fn new(path: &str, status: ChangeStatus) -> Self {
        Self {
            path: path.to_string(),
            status,
        }
    }

    /// Untracked files count as additions for every rule that cares.
    pub fn is_new(&self) -> bool {
        matches!(self.status, ChangeStatus::Added | ChangeStatus::Untracked)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Test,
    Docs,
    Config,
    Source,
    Other,
}

const SOURCE_EXTENSIONS: &[&str] = &[
    "rs", "ts", "tsx", "js", "jsx", "mjs", "py", "go", "java", "kt", "rb", "c", "h", "cpp", "hpp",
    "cs", "swift", "php", "vue", "svelte", "scala",
];
const DOC_EXTENSIONS: &[&str] = &["md", "mdx", "rst", "adoc", "txt"];
const CONFIG_FILES: &[&str] = &[
    "cargo.toml",
    "cargo.lock",
    "package.json",
    "package-lock.json",
    "tsconfig.json",
    "pyproject.toml",
    "go.mod",
    "makefile",
    "dockerfile",
];
const CONFIG_EXTENSIONS: &[&str] = &["toml", "yaml", "yml", "json", "ini", "cfg", "lock"];
const FEATURE_SEGMENTS: &[&str] = &[
    "components",
    "component",
    "features",
    "feature",
    "pages",
    "page",
    "views",
    "screens",
    "routes",
    "modules",
];

pub fn classify(path: &str) -> FileKind {
    let lower = path.to_ascii_lowercase();
    let file_name = lower.rsplit('/').next().unwrap_or(&lower);
    let ext = file_name.rsplit_once('.').map_or("", |(_, ext)| ext);

    let in_test_dir = lower
        .split('/')
        .any(|seg| matches!(seg, "test" | "tests" | "__tests__" | "spec" | "specs"));
    let test_name = file_name.contains(".test.")
        || file_name.contains(".spec.")
        || file_name.starts_with("test_")
        || file_name.ends_with("_test.go")
        || file_name.ends_with("_test.rs")
        || file_name.ends_with("_test.py");
    if in_test_dir || test_name {
        return FileKind::Test;
    }

    if DOC_EXTENSIONS.contains(&ext) || lower.starts_with("docs/") || lower.contains("/docs/") {
        return FileKind::Docs;
    }
    if CONFIG_FILES.contains(&file_name) || CONFIG_EXTENSIONS.contains(&ext) {
        return FileKind::Config;
    }
    if SOURCE_EXTENSIONS.contains(&ext) {
        return FileKind::Source;
    }
    FileKind::Other
}

/// Whether a new file at `path` looks like the start of a feature
/// (a component, page, view, or feature module).
pub fn is_feature_path(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    let mut segments: Vec<&str> = lower.split('/').collect();
    segments.pop();
    segments.iter().any(|seg| FEATURE_SEGMENTS.contains(seg))
}

/// Aggregate view of a change set used by the suggestion rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSummary {
    pub added: usize,
    pub modified: usize,
    pub deleted: usize,
    pub tests: usize,
    pub docs: usize,
    pub source: usize,
    pub config: usize,
}

impl ChangeSummary {
    pub fn from_changes(changes: &[FileChange]) -> Self {
        let mut summary = Self::default();
        for change in changes {
            match change.status {
                ChangeStatus::Added | ChangeStatus::Untracked => summary.added += 1,
                ChangeStatus::Modified | ChangeStatus::Renamed => summary.modified += 1,
                ChangeStatus::Deleted => summary.deleted += 1,
            }
            match classify(&change.path) {
                FileKind::Test => summary.tests += 1,
                FileKind::Docs => summary.docs += 1,
                FileKind::Source => summary.source += 1,
                FileKind::Config => summary.config += 1,
                FileKind::Other => {}
            }
        }
        summary
    }

    /// Additions, modifications and deletions all in one change set.
    pub fn is_mixed(&self) -> bool {
        self.added > 0 && self.modified > 0 && self.deleted > 0
    }

    pub fn has_tests_and_code(&self) -> bool {
        self.tests > 0 && self.source > 0
    }

    pub fn has_docs_and_code(&self) -> bool {
        self.docs > 0 && self.source > 0
    }
}

/// Parse `git status --porcelain` (v1) output.
///
/// Renames keep the destination path. Lines that are too short to carry a
/// status are skipped.
pub fn parse_porcelain(output: &str) -> Vec<FileChange> {
    output
        .lines()
        .filter(|line| line.len() > 3)
        .filter_map(|line| {
            let (code, rest) = line.split_at(2);
            let path = rest.trim_start();
            let path = path.rsplit_once(" -> ").map_or(path, |(_, to)| to);
            let path = path.trim_matches('"');
            let status = match code {
                "??" => ChangeStatus::Untracked,
                c if c.contains('R') => ChangeStatus::Renamed,
                c if c.contains('D') => ChangeStatus::Deleted,
                c if c.contains('A') => ChangeStatus::Added,
                c if c.contains('M') || c.contains('T') || c.contains('U') => {
                    ChangeStatus::Modified
                }
                _ => return None,
            };
            Some(FileChange::new(path, status))
        })
        .collect()
}
