//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural principles:
//! - No sleep() calls in production code except reconnect backoff and notice expiry
//! - The physical connection is only touched inside the transport layer
//! - The core crate stays free of terminal/UI dependencies
//!
//! The helpers below walk the workspace sources; the rules live in `tests/`.

use std::fs;
use std::path::{Path, PathBuf};

/// Workspace root, two levels above this package
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
}

/// Every `.rs` file under `dir` (relative to the workspace root)
pub fn rust_sources(dir: &str) -> Vec<PathBuf> {
    let root = workspace_root().join(dir);
    if !root.exists() {
        return Vec::new();
    }
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .map(|e| e.into_path())
        .collect()
}

/// Production lines of a source file as `(line_number, code)`
///
/// Comments are stripped and everything from the first `#[cfg(test)]` on is
/// dropped, since test modules sit at the bottom of each file.
pub fn production_lines(content: &str) -> Vec<(usize, String)> {
    content
        .lines()
        .enumerate()
        .take_while(|(_, line)| !line.trim_start().starts_with("#[cfg(test)]"))
        .map(|(idx, line)| {
            let code = line.split("//").next().unwrap_or(line);
            (idx + 1, code.to_string())
        })
        .collect()
}

/// Read a file, returning an empty string if it cannot be read
pub fn read_source(path: &Path) -> String {
    fs::read_to_string(path).unwrap_or_default()
}

/// Whether any of the lines around `idx` mention one of `keywords`
pub fn context_mentions(lines: &[(usize, String)], idx: usize, before: usize, keywords: &[&str]) -> bool {
    let start = idx.saturating_sub(before);
    let end = (idx + 3).min(lines.len());
    lines[start..end].iter().any(|(_, line)| {
        let lower = line.to_lowercase();
        keywords.iter().any(|k| lower.contains(k))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_lines_stop_at_test_module() {
        let src = "fn a() {} // trailing\n#[cfg(test)]\nmod tests { fn b() {} }\n";
        let lines = production_lines(src);
        assert_eq!(lines, vec![(1, "fn a() {} ".to_string())]);
    }

    #[test]
    fn test_context_mentions() {
        let lines = production_lines("let delay = backoff;\nfoo();\nsleep(delay);\n");
        assert!(context_mentions(&lines, 2, 5, &["backoff"]));
        assert!(!context_mentions(&lines, 2, 5, &["frame"]));
    }

    #[test]
    fn test_workspace_root_has_manifest() {
        assert!(workspace_root().join("Cargo.toml").exists());
    }
}
