//! Integration Test: Sleep Prohibition
//!
//! **Policy**: production code waits on I/O, channels or
//! `tokio::time::interval`, never on sleep. Reconnects happen immediately
//! and stall detection runs on an interval. Test code may sleep.

use architectural_enforcement::production_lines;

#[test]
fn test_no_sleep_in_production_code() {
    let violations: Vec<String> = production_lines()
        .iter()
        .filter(|line| line.code.contains("::sleep(") || line.code.contains(".sleep("))
        .map(|line| line.report("Sleep call"))
        .collect();

    if !violations.is_empty() {
        for violation in &violations {
            eprintln!("  {violation}");
        }
        panic!(
            "Found {} sleep call(s) in production code; wait on I/O or an interval instead",
            violations.len()
        );
    }
}
