//! Write-skew command implementation.

use serde::Serialize;
use skewguard_core::sanitize;
use skewguard_testkit::{DoctorsScenario, WriteSkewOutcome};
use std::time::Duration;
use tracing::info;

/// Both runs of the doctors scenario.
#[derive(Debug, Serialize)]
pub struct WriteSkewResult {
    /// Doctors taking part.
    pub doctors: Vec<String>,
    /// Run without the serializer.
    pub unserialized: WriteSkewOutcome,
    /// Run with every transaction serialized on the shift key.
    pub serialized: WriteSkewOutcome,
}

/// Runs the write-skew command.
pub fn run(
    doctors: &[String],
    hold_ms: u64,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    if doctors.len() < 2 {
        return Err("write skew needs at least two doctors".into());
    }
    for doctor in doctors {
        sanitize(doctor)?;
    }
    let names: Vec<&str> = doctors.iter().map(String::as_str).collect();

    info!(doctors = names.len(), "running without serialization");
    let unserialized = DoctorsScenario::new(&names).run_unserialized()?;

    info!(doctors = names.len(), "running with keyed serialization");
    let serialized =
        DoctorsScenario::new(&names).run_serialized(Duration::from_millis(hold_ms))?;

    let result = WriteSkewResult {
        doctors: doctors.to_vec(),
        unserialized,
        serialized,
    };

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text(&result),
    }
    Ok(())
}

fn print_text(result: &WriteSkewResult) {
    println!("\n=== Write Skew: on-call doctors ===");
    println!("Doctors: {}", result.doctors.join(", "));
    print_outcome("Snapshot isolation only", &result.unserialized);
    print_outcome("Serialized on shift key", &result.serialized);
}

fn print_outcome(label: &str, outcome: &WriteSkewOutcome) {
    println!("\n{label}:");
    println!("  On call before: {}", outcome.on_call_before);
    println!("  Went off call:  {}", outcome.went_off_call);
    println!("  On call after:  {}", outcome.on_call_after);
    if outcome.serialized {
        println!("  Lock conflicts: {}", outcome.conflicts);
    }
    let verdict = if outcome.invariant_held() {
        "invariant held"
    } else {
        "INVARIANT VIOLATED"
    };
    println!("  Result:         {verdict}");
}
