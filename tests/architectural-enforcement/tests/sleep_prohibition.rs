//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code in the client MUST NOT call sleep methods.
//! **Exceptions**: reconnect backoff in the transport supervisor, notice
//! expiry timers, test code.

use architectural_enforcement::{context_mentions, production_lines, read_source, rust_sources};

const BACKOFF_WORDS: &[&str] = &["backoff", "reconnect", "retry", "attempt"];
const EXPIRY_WORDS: &[&str] = &["ttl", "expir"];

fn find_sleep_violations() -> Vec<String> {
    let mut violations = Vec::new();

    for dir in ["heurctl/core/src", "heurctl/cli/src"] {
        for path in rust_sources(dir) {
            let content = read_source(&path);
            let lines = production_lines(&content);

            for (idx, (line_number, code)) in lines.iter().enumerate() {
                if !(code.contains("::sleep(") || code.contains(".sleep(")) {
                    continue;
                }
                if context_mentions(&lines, idx, 15, BACKOFF_WORDS)
                    || context_mentions(&lines, idx, 10, EXPIRY_WORDS)
                {
                    continue;
                }
                violations.push(format!(
                    "{}:{} - {}",
                    path.display(),
                    line_number,
                    code.trim()
                ));
            }
        }
    }

    violations
}

#[test]
fn test_no_sleep_in_production_code() {
    let violations = find_sleep_violations();

    if !violations.is_empty() {
        eprintln!("\nSleep calls found in production code:\n");
        for violation in &violations {
            eprintln!("  {violation}");
        }
        eprintln!("\nAcceptable sleep uses:");
        eprintln!("  - Exponential backoff between reconnect attempts");
        eprintln!("  - Notice expiry timers");
        eprintln!("  - Test code (#[cfg(test)] modules)");

        panic!(
            "\nFound {} sleep violation(s) in production code.",
            violations.len()
        );
    }
}

#[test]
fn test_sources_are_scanned() {
    assert!(
        !rust_sources("heurctl/core/src").is_empty(),
        "core sources not found; is the workspace layout unchanged?"
    );
}
