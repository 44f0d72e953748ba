//! Architectural Enforcement Integration Tests
//!
//! This package holds source scans that keep production code honest:
//! - No sleep() calls in production code
//! - No blocking I/O inside async functions
//!
//! The scans are line based. Everything from a file's test module onwards
//! is treated as test code and skipped.

use std::fs;
use std::path::{Path, PathBuf};

/// Production source directories, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["feed/core/src", "feed/daemon/src"];

/// Workspace root, two levels above this crate
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// A scanned production line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLine {
    /// File the line came from
    pub path: PathBuf,
    /// 1-based line number
    pub number: usize,
    /// Line text with any trailing `//` comment removed
    pub code: String,
    /// Whether the enclosing function is `async`
    pub in_async_fn: bool,
}

impl SourceLine {
    /// `path:line - what: code` report line
    #[must_use]
    pub fn report(&self, what: &str) -> String {
        format!(
            "{}:{} - {what}: {}",
            self.path.display(),
            self.number,
            self.code.trim()
        )
    }
}

/// All `.rs` files under the production directories
#[must_use]
pub fn production_files() -> Vec<PathBuf> {
    let root = workspace_root();
    let mut files = Vec::new();

    for dir in PRODUCTION_DIRS {
        let path = root.join(dir);
        assert!(path.exists(), "missing production directory {}", path.display());

        for entry in walkdir::WalkDir::new(path)
            .into_iter()
            .filter_map(Result::ok)
        {
            if entry.path().extension().and_then(|s| s.to_str()) == Some("rs") {
                files.push(entry.into_path());
            }
        }
    }

    files.sort();
    files
}

/// Non-test lines of every production file
#[must_use]
pub fn production_lines() -> Vec<SourceLine> {
    production_files()
        .into_iter()
        .flat_map(|path| {
            let content = fs::read_to_string(&path).unwrap_or_default();
            scan_source(&path, &content)
        })
        .collect()
}

/// Split `content` into production lines
#[must_use]
pub fn scan_source(path: &Path, content: &str) -> Vec<SourceLine> {
    let mut lines = Vec::new();
    let mut in_async_fn = false;

    for (idx, line) in content.lines().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("#[cfg(test)]") {
            break;
        }
        if trimmed.starts_with("//") {
            continue;
        }

        let code = line.split("//").next().unwrap_or(line);
        if let Some(is_async) = fn_header(code) {
            in_async_fn = is_async;
        }

        lines.push(SourceLine {
            path: path.to_path_buf(),
            number: idx + 1,
            code: code.to_string(),
            in_async_fn,
        });
    }

    lines
}

/// `Some(is_async)` when `code` opens a function
fn fn_header(code: &str) -> Option<bool> {
    let mut qualifiers = Vec::new();
    for word in code.split_whitespace() {
        if word == "fn" {
            return Some(qualifiers.contains(&"async"));
        }
        if !matches!(
            word,
            "pub" | "pub(crate)" | "pub(super)" | "async" | "const" | "unsafe"
        ) {
            return None;
        }
        qualifiers.push(word);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(code: &str) -> Vec<SourceLine> {
        scan_source(Path::new("x.rs"), code)
    }

    #[test]
    fn test_async_fn_tracking() {
        let lines = scan(
            "fn load() {\n    read();\n}\npub async fn run(&self) {\n    go().await;\n}\n",
        );
        assert!(!lines[1].in_async_fn);
        assert!(lines[4].in_async_fn);
    }

    #[test]
    fn test_stops_at_test_module() {
        let lines = scan("fn a() {}\n#[cfg(test)]\nmod tests {\n    fn b() {}\n}\n");
        assert_eq!(lines.len(), 1);
    }

    #[test]
    fn test_comments_stripped() {
        let lines = scan("// std::fs::read\nlet x = 1; // sleep(1)\n");
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].code.trim(), "let x = 1;");
        assert_eq!(lines[0].number, 2);
    }

    #[test]
    fn test_fn_header() {
        assert_eq!(fn_header("pub(crate) async fn go() {"), Some(true));
        assert_eq!(fn_header("    fn name(self) -> &'static str {"), Some(false));
        assert_eq!(fn_header("let f = fn_ptr;"), None);
        assert_eq!(fn_header("impl Fn(&str) for X"), None);
    }

    #[test]
    fn test_workspace_sources_found() {
        let files = production_files();
        assert!(files.iter().any(|f| f.ends_with("feed/core/src/lib.rs")));
        assert!(files.iter().any(|f| f.ends_with("feed/daemon/src/main.rs")));
    }
}
