//! Logging to stderr and to an append-only log file.

use std::env;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing::Level;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, prelude::*};

/// Log file used when none is given on the command line.
pub const DEFAULT_LOG_FILE: &str = "s3-benchmark.log";

/// Installs the global tracing subscriber.
///
/// Events are written to stderr, filtered by `RUST_LOG`, and appended to `log_file` at `DEBUG`
/// level and above. The file is created if it does not exist.
pub fn init_tracing(log_file: &Path) -> std::io::Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)?;

    let (level, env_filter) = parse_rust_log(env::var(EnvFilter::DEFAULT_ENV).ok().as_deref());
    let stderr = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);
    let file = tracing_subscriber::fmt::layer()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(true);

    tracing_subscriber::registry()
        .with(stderr.with_filter(LevelFilter::from(level)))
        .with(file.with_filter(LevelFilter::DEBUG))
        .with(env_filter)
        .init();

    Ok(())
}

/// Resolves the value of `RUST_LOG` into a stderr level and a global filter.
///
/// A plain level like `debug` only changes what is shown on stderr. Anything else is used
/// literally as filter directives.
pub fn parse_rust_log(rust_log: Option<&str>) -> (Level, EnvFilter) {
    let level = match rust_log {
        Some(value) => match value.parse::<Level>() {
            Ok(level) => level,
            Err(_) => return (Level::TRACE, EnvFilter::new(value)),
        },
        None => Level::INFO,
    };

    // This is the maximum verbosity that will be logged, we filter this down to `level`.
    let env_filter = EnvFilter::new(
        "INFO,\
        s3bench=TRACE,\
        s3bench_store=TRACE,\
        ",
    );

    (level, env_filter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_level_only_sets_stderr() {
        let (level, filter) = parse_rust_log(Some("warn"));
        assert_eq!(level, Level::WARN);
        assert!(filter.to_string().contains("s3bench=trace"));

        let (level, _) = parse_rust_log(None);
        assert_eq!(level, Level::INFO);
    }

    #[test]
    fn directives_are_used_literally() {
        let (level, filter) = parse_rust_log(Some("s3bench::worker=debug"));
        assert_eq!(level, Level::TRACE);
        assert_eq!(filter.to_string(), "s3bench::worker=debug");
    }
}
