//! Integration Test: Layering
//!
//! - Only the transport layer holds a physical connection (`dyn Connection`).
//! - The core crate has no terminal or rendering dependencies.

use architectural_enforcement::{production_lines, read_source, rust_sources, workspace_root};

#[test]
fn test_connection_handle_stays_in_transport() {
    let mut violations = Vec::new();

    let sources = rust_sources("heurctl/core/src")
        .into_iter()
        .chain(rust_sources("heurctl/cli/src"));
    for path in sources {
        let in_transport = path.components().any(|c| c.as_os_str() == "transport");
        if in_transport {
            continue;
        }
        let content = read_source(&path);
        for (line_number, code) in production_lines(&content) {
            if code.contains("dyn Connection") || code.contains("impl Connection for") {
                violations.push(format!("{}:{} - {}", path.display(), line_number, code.trim()));
            }
        }
    }

    assert!(
        violations.is_empty(),
        "connection handles used outside the transport layer:\n{}",
        violations.join("\n")
    );
}

#[test]
fn test_core_has_no_ui_dependencies() {
    let manifest = read_source(&workspace_root().join("heurctl/core/Cargo.toml"));
    assert!(!manifest.is_empty(), "core manifest not found");

    for forbidden in ["ratatui", "crossterm", "termion", "clap"] {
        assert!(
            !manifest.contains(forbidden),
            "heurctl-core must not depend on `{forbidden}`"
        );
    }
}
