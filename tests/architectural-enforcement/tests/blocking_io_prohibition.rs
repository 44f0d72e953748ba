//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: async functions in the feed crates MUST NOT use blocking I/O.
//! **Required**: `tokio::net`, `tokio::io`, async `reqwest`.
//!
//! Blocking calls in plain functions are accepted; configuration is read
//! that way before any stream is opened.

use architectural_enforcement::{production_lines, SourceLine};

const BLOCKING: &[(&str, &str)] = &[
    ("std::fs::", "Blocking file I/O"),
    ("std::net::", "Blocking network I/O"),
    ("std::process::Command", "Blocking process I/O"),
    ("reqwest::blocking", "Blocking HTTP client"),
    ("std::io::stdin()", "Blocking stdin"),
    ("std::thread::sleep", "Blocking sleep"),
];

fn violations(lines: &[SourceLine]) -> Vec<String> {
    lines
        .iter()
        .filter(|line| line.in_async_fn)
        .flat_map(|line| {
            BLOCKING
                .iter()
                .filter(|(pattern, _)| line.code.contains(pattern))
                .map(|(_, what)| line.report(what))
        })
        .collect()
}

#[test]
fn test_no_blocking_io_in_async_code() {
    let lines = production_lines();
    assert!(!lines.is_empty(), "no production sources found");

    let violations = violations(&lines);
    if !violations.is_empty() {
        for violation in &violations {
            eprintln!("  {violation}");
        }
        panic!(
            "Found {} blocking I/O call(s) in async code; use the tokio equivalents",
            violations.len()
        );
    }
}

#[test]
fn test_detector_flags_async_only() {
    let source = "fn load() {\n    std::fs::read_to_string(p);\n}\n\
                  async fn fetch() {\n    std::net::TcpStream::connect(a);\n}\n";
    let lines = architectural_enforcement::scan_source(std::path::Path::new("x.rs"), source);

    let found = violations(&lines);
    assert_eq!(found.len(), 1);
    assert!(found[0].contains("x.rs:5 - Blocking network I/O"));
}
