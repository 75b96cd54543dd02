//! Human-readable and JSON reporting of [`RunResult`]s.

use std::fmt;
use std::time::{Duration, SystemTime};

use bytesize::ByteSize;
use serde::Serialize;
use sketches_ddsketch::DDSketch;
use yansi::Paint;

use crate::run::RunResult;
use crate::workload::Operation;

/// Prints the elapsed time and a summary of the run to stdout.
///
/// The first line is always `Elapsed time: <duration>`.
pub fn print_result(title: &str, result: &RunResult) {
    println!("Elapsed time: {}", format_elapsed(result.elapsed));
    println!();
    println!(
        "{} {} (workers: {})",
        "##".bold(),
        title.bold().blue(),
        result.workers.bold()
    );

    let label = format!("{}:", result.operation.as_str().to_uppercase());
    print!("{} ({} ops", label.bold().green(), result.processed().bold());
    if result.failed() > 0 {
        print!(
            ", {}",
            format!("{} FAILURES", result.failed()).bold().red()
        );
    }
    if result.skipped > 0 {
        print!(
            ", {}",
            format!("{} SKIPPED", result.skipped).bold().yellow()
        );
    }
    println!(")");

    let timing = &result.metrics.timing;
    if timing.count() > 0 {
        print_ops(result);
        match result.operation {
            Operation::Delete => println!(),
            Operation::Upload | Operation::Download => {
                print_throughput(result.bytes(), result.elapsed)
            }
        }
        print_percentiles(timing, Duration::from_secs_f64);
    }
}

/// Prints a single-line JSON summary of the run to stdout.
pub fn print_json(result: &RunResult) -> serde_json::Result<()> {
    println!("{}", serde_json::to_string(&RunSummary::from(result))?);
    Ok(())
}

fn format_elapsed(elapsed: Duration) -> humantime::FormattedDuration {
    humantime::format_duration(Duration::from_millis(elapsed.as_millis() as u64))
}

fn per_second(total: f64, duration: Duration) -> f64 {
    match duration.as_secs_f64() {
        secs if secs > 0.0 => total / secs,
        _ => 0.0,
    }
}

fn print_percentiles<T: fmt::Debug>(sketch: &DDSketch, map: impl Fn(f64) -> T) {
    let quantile = |q| sketch.quantile(q).ok().flatten().unwrap_or_default();

    let avg = map(sketch.sum().unwrap_or_default() / sketch.count() as f64);
    let p50 = map(quantile(0.5));
    let p90 = map(quantile(0.9));
    let p99 = map(quantile(0.99));
    println!(
        "  avg: {:.2?}; p50: {p50:.2?}; p90: {p90:.2?}; p99: {p99:.2?}",
        avg.bold()
    );
}

/// Successful operations per second of wall-clock time.
fn ops_per_sec(result: &RunResult) -> f64 {
    per_second(result.succeeded() as f64, result.elapsed)
}

fn print_ops(result: &RunResult) {
    print!("  {:.2} operations/s", ops_per_sec(result).bold());
}

fn print_throughput(total: u64, duration: Duration) {
    let throughput = per_second(total as f64, duration) as u64;
    println!(", {:.2}/s", ByteSize::b(throughput).bold());
}

/// Machine-readable summary of a [`RunResult`].
#[derive(Debug, Serialize)]
pub struct RunSummary {
    operation: Operation,
    count: usize,
    workers: usize,
    succeeded: u64,
    failed: u64,
    skipped: usize,
    cancelled: bool,
    bytes: u64,
    elapsed_ms: u64,
    ops_per_sec: f64,
    started_at: String,
    finished_at: String,
}

fn rfc3339(time: SystemTime) -> String {
    humantime::format_rfc3339_millis(time).to_string()
}

impl From<&RunResult> for RunSummary {
    fn from(result: &RunResult) -> Self {
        Self {
            operation: result.operation,
            count: result.total,
            workers: result.workers,
            succeeded: result.succeeded(),
            failed: result.failed(),
            skipped: result.skipped,
            cancelled: result.cancelled,
            bytes: result.bytes(),
            elapsed_ms: result.elapsed.as_millis() as u64,
            ops_per_sec: ops_per_sec(result),
            started_at: rfc3339(result.started_at),
            finished_at: rfc3339(result.finished_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::UNIX_EPOCH;

    use super::*;
    use crate::worker::WorkerMetrics;

    fn result() -> RunResult {
        let started_at = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        RunResult {
            operation: Operation::Upload,
            workers: 5,
            total: 50,
            skipped: 0,
            cancelled: false,
            started_at,
            finished_at: started_at + Duration::from_millis(2500),
            elapsed: Duration::from_millis(2500),
            metrics: WorkerMetrics {
                timing: DDSketch::default(),
                bytes: 50 * 1024,
                succeeded: 48,
                failed: 2,
            },
        }
    }

    #[test]
    fn json_summary() {
        let json = serde_json::to_value(RunSummary::from(&result())).unwrap();

        assert_eq!(json["operation"], "upload");
        assert_eq!(json["count"], 50);
        assert_eq!(json["succeeded"], 48);
        assert_eq!(json["failed"], 2);
        assert_eq!(json["elapsed_ms"], 2500);
        assert_eq!(json["ops_per_sec"], 19.2);
        assert_eq!(json["started_at"], "2023-11-14T22:13:20.000Z");
        assert_eq!(json["finished_at"], "2023-11-14T22:13:22.500Z");
    }

    #[test]
    fn failures_do_not_count_towards_rate() {
        let mut result = result();
        result.metrics.succeeded = 0;
        result.metrics.failed = 50;

        let json = serde_json::to_value(RunSummary::from(&result)).unwrap();
        assert_eq!(json["ops_per_sec"], 0.0);
        assert_eq!(ops_per_sec(&result), 0.0);
    }

    #[test]
    fn elapsed_is_rounded_to_millis() {
        let elapsed = Duration::new(1, 234_567_890);
        assert_eq!(format_elapsed(elapsed).to_string(), "1s 234ms");
    }

    #[test]
    fn zero_duration_rates() {
        assert_eq!(per_second(10.0, Duration::ZERO), 0.0);
        assert_eq!(per_second(10.0, Duration::from_secs(2)), 5.0);
    }
}
