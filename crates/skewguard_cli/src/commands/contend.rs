//! Contend command implementation.

use skewguard_testkit::{run_contention, ContentionConfig, ContentionReport, TestStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Runs the contend command.
pub fn run(
    key: &str,
    threads: usize,
    attempts: usize,
    timeout_ms: u64,
    hold_ms: u64,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    if threads == 0 {
        return Err("at least one thread is required".into());
    }

    let config = ContentionConfig {
        key: key.to_string(),
        threads,
        attempts_per_thread: attempts,
        lock_timeout: Duration::from_millis(timeout_ms),
        hold: Duration::from_millis(hold_ms),
        ..Default::default()
    };

    info!(key, threads, attempts, "starting contention run");
    let store = TestStore::new();
    let serializer = Arc::new(store.serializer_with_timeout(config.lock_timeout));
    let report = run_contention(serializer, &config)?;

    match format {
        "json" => println!("{}", report.to_json()?),
        _ => print_text(&report),
    }

    if !report.is_consistent() {
        return Err(format!(
            "key {:?} was held by {} sessions at once or lost updates (counter {}, granted {})",
            report.key, report.max_concurrent_holders, report.counter, report.granted
        )
        .into());
    }
    Ok(())
}

fn print_text(report: &ContentionReport) {
    report.print_summary("Contention");
    if report.is_consistent() {
        println!("Result: consistent, the key was never held twice");
    }
}
