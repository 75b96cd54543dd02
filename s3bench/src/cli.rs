//! Command line entry point: argument parsing, runtime setup and the cleanup pass.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use argh::FromArgs;
use indicatif::{ProgressBar, ProgressStyle};
use s3bench_store::{S3CompatibleStore, SharedStore};
use tokio_util::sync::CancellationToken;

use crate::config::{Config, ConfigOverrides, RunConfig};
use crate::observability::{self, DEFAULT_LOG_FILE};
use crate::report;
use crate::run::{Coordinator, RunError, RunResult};
use crate::workload::Operation;

/// Load generator for S3-compatible object stores.
///
/// Uploads, downloads or deletes a fixed number of objects using a pool of concurrent workers
/// and reports the elapsed wall-clock time.
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the YAML configuration file
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,

    /// http(s) endpoint of the S3 service
    #[argh(option, short = 'e')]
    endpoint: Option<String>,

    /// access key ID
    #[argh(option)]
    access_key: Option<String>,

    /// secret access key
    #[argh(option)]
    secret_key: Option<String>,

    /// name of the bucket to use
    #[argh(option, short = 'b')]
    bucket: Option<String>,

    /// region used for request signing (default: us-east-1)
    #[argh(option)]
    region: Option<String>,

    /// prefix for all object keys, a trailing `/` is added if missing
    #[argh(option, short = 'p')]
    prefix: Option<String>,

    /// size of uploaded objects, e.g. 1024, 10K, 2M or 1G (default: 1024 bytes)
    #[argh(option, short = 's')]
    size: Option<String>,

    /// operation to perform: upload, download or delete
    #[argh(option, short = 'o')]
    operation: Option<String>,

    /// number of objects to process
    #[argh(option, short = 'n')]
    count: Option<u64>,

    /// number of concurrent workers, at most 100 (default: 10)
    #[argh(option, short = 't')]
    workers: Option<usize>,

    /// abort after this many failures in a row, 0 to never abort (default: 50)
    #[argh(option)]
    max_consecutive_failures: Option<u64>,

    /// delete all objects again after an upload run
    #[argh(switch)]
    cleanup: bool,

    /// additionally print a JSON summary of every run
    #[argh(switch)]
    json: bool,

    /// file the log of the run is appended to (default: s3-benchmark.log)
    #[argh(option, default = "PathBuf::from(DEFAULT_LOG_FILE)")]
    log_file: PathBuf,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            endpoint: self.endpoint.clone(),
            region: self.region.clone(),
            bucket: self.bucket.clone(),
            access_key: self.access_key.clone(),
            secret_key: self.secret_key.clone(),
            prefix: self.prefix.clone(),
            size: self.size.clone(),
            operation: self.operation.clone(),
            count: self.count,
            workers: self.workers,
            max_consecutive_failures: self.max_consecutive_failures,
            cleanup: self.cleanup.then_some(true),
        }
    }
}

/// Bootstrap the runtime and execute the benchmark.
pub fn execute() -> Result<()> {
    let args: Args = argh::from_env();

    observability::init_tracing(&args.log_file)
        .with_context(|| format!("failed to open log file {}", args.log_file.display()))?;
    tracing::info!("==== Starting new run ====");

    let result = execute_args(args);
    if let Err(ref error) = result {
        tracing::error!("{error:#}");
    }
    result
}

fn execute_args(args: Args) -> Result<()> {
    let config = Config::load(args.config.as_deref(), args.overrides())?;
    tracing::debug!(?config);

    let run_config = RunConfig::from_config(&config)?;
    let store = S3CompatibleStore::new(config.store_config()?)
        .context("failed to configure object store")?;
    tracing::debug!(?store);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("s3bench")
        .enable_all()
        .build()?;

    runtime.block_on(run(Arc::new(store), run_config, config.cleanup, args.json))
}

async fn run(store: SharedStore, config: RunConfig, cleanup: bool, json: bool) -> Result<()> {
    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("received interrupt, stopping run");
                cancel.cancel();
            }
        }
    });

    run_batches(&store, config, cleanup, json, &cancel).await
}

/// Runs the configured batch followed by the cleanup pass, if requested.
///
/// Cleanup only follows an upload that was not cancelled.
async fn run_batches(
    store: &SharedStore,
    config: RunConfig,
    cleanup: bool,
    json: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let title = format!("{} {} objects", config.operation, config.count);
    let result = run_reported(&title, store, config.clone(), cancel, json).await?;

    if cleanup && config.operation == Operation::Upload && !result.cancelled {
        let config = config.with_operation(Operation::Delete);
        run_reported("CLEANUP", store, config, cancel, json).await?;
    }

    Ok(())
}

/// Runs one batch and prints its result, also if the run was aborted.
async fn run_reported(
    title: &str,
    store: &SharedStore,
    config: RunConfig,
    cancel: &CancellationToken,
    json: bool,
) -> Result<RunResult> {
    let bar = ProgressBar::new(config.count as u64)
        .with_message(format!("Running {}...", config.operation))
        .with_style(ProgressStyle::with_template(
            "{msg}\n{wide_bar} {pos}/{len} {elapsed}",
        )?);
    bar.enable_steady_tick(Duration::from_millis(100));

    let mut coordinator = Coordinator::new(Arc::clone(store), config)
        .with_cancellation(cancel.clone())
        .with_progress(bar);

    match coordinator.run().await {
        Ok(result) => {
            print(title, &result, json)?;
            Ok(result)
        }
        Err(RunError::Aborted {
            consecutive_failures,
            result,
        }) => {
            print(title, &result, json)?;
            Err(RunError::Aborted {
                consecutive_failures,
                result,
            }
            .into())
        }
        Err(error) => Err(error.into()),
    }
}

fn print(title: &str, result: &RunResult, json: bool) -> Result<()> {
    report::print_result(title, result);
    if json {
        report::print_json(result)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use bytes::Bytes;
    use s3bench_store::{InMemoryStore, ObjectStore, StoreError, StoreResult};

    use super::*;

    /// In-memory store that can fail uploads or cancel the run on the first upload.
    #[derive(Debug, Default)]
    struct TestStore {
        inner: InMemoryStore,
        fail_puts: bool,
        cancel_on_put: Option<CancellationToken>,
        deletes: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ObjectStore for TestStore {
        fn name(&self) -> &'static str {
            "test"
        }

        async fn put_object(&self, key: &str, payload: Bytes) -> StoreResult<()> {
            if let Some(cancel) = &self.cancel_on_put {
                cancel.cancel();
            }
            if self.fail_puts {
                return Err(StoreError::NotFound {
                    key: key.to_owned(),
                });
            }
            self.inner.put_object(key, payload).await
        }

        async fn get_object(&self, key: &str) -> StoreResult<Bytes> {
            self.inner.get_object(key).await
        }

        async fn list_objects(&self, prefix: &str) -> StoreResult<Vec<String>> {
            self.inner.list_objects(prefix).await
        }

        async fn delete_object(&self, key: &str) -> StoreResult<()> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            self.inner.delete_object(key).await
        }
    }

    fn run_config(operation: Operation, count: usize, workers: usize) -> RunConfig {
        RunConfig {
            operation,
            bucket: "bench".into(),
            prefix: "cli/".into(),
            payload_size: 16,
            count,
            workers,
            max_consecutive_failures: 0,
        }
    }

    fn parse(args: &[&str]) -> std::result::Result<Args, argh::EarlyExit> {
        Args::from_args(&["s3bench"], args)
    }

    #[test]
    fn parses_flags() {
        let args = parse(&[
            "--endpoint",
            "http://localhost:9000",
            "-b",
            "bench",
            "-o",
            "upload",
            "-n",
            "50",
            "-t",
            "5",
            "--size",
            "10K",
            "--cleanup",
        ])
        .unwrap();

        let overrides = args.overrides();
        assert_eq!(overrides.bucket.as_deref(), Some("bench"));
        assert_eq!(overrides.count, Some(50));
        assert_eq!(overrides.workers, Some(5));
        assert_eq!(overrides.size.as_deref(), Some("10K"));
        assert_eq!(overrides.cleanup, Some(true));
        assert_eq!(args.log_file, PathBuf::from(DEFAULT_LOG_FILE));
        assert!(!args.json);
    }

    #[test]
    fn unset_flags_do_not_override() {
        let overrides = parse(&[]).unwrap().overrides();
        assert!(overrides.cleanup.is_none());
        assert!(overrides.workers.is_none());
        assert!(overrides.operation.is_none());
    }

    #[test]
    fn rejects_non_numeric_count() {
        assert!(parse(&["-n", "many"]).is_err());
    }

    #[tokio::test]
    async fn cleanup_removes_uploaded_objects() {
        let store = Arc::new(TestStore::default());
        let shared: SharedStore = store.clone();

        run_batches(
            &shared,
            run_config(Operation::Upload, 20, 4),
            true,
            false,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(store.deletes.load(Ordering::SeqCst), 20);
        assert!(store.inner.is_empty());
    }

    #[tokio::test]
    async fn upload_without_cleanup_keeps_objects() {
        let store = Arc::new(TestStore::default());
        let shared: SharedStore = store.clone();

        run_batches(
            &shared,
            run_config(Operation::Upload, 5, 2),
            false,
            false,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(store.deletes.load(Ordering::SeqCst), 0);
        assert_eq!(store.inner.len(), 5);
    }

    #[tokio::test]
    async fn cleanup_only_follows_uploads() {
        let store = Arc::new(TestStore::default());
        for index in 0..3 {
            store
                .inner
                .insert(crate::workload::object_key("cli/", index), "x");
        }
        let shared: SharedStore = store.clone();

        run_batches(
            &shared,
            run_config(Operation::Download, 3, 2),
            true,
            false,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(store.deletes.load(Ordering::SeqCst), 0);
        assert_eq!(store.inner.len(), 3);
    }

    #[tokio::test]
    async fn cancelled_upload_skips_cleanup() {
        let cancel = CancellationToken::new();
        let store = Arc::new(TestStore {
            cancel_on_put: Some(cancel.clone()),
            ..Default::default()
        });
        let shared: SharedStore = store.clone();

        run_batches(
            &shared,
            run_config(Operation::Upload, 10, 1),
            true,
            false,
            &cancel,
        )
        .await
        .unwrap();

        assert_eq!(store.deletes.load(Ordering::SeqCst), 0);
        assert_eq!(store.inner.len(), 1);
    }

    #[tokio::test]
    async fn aborted_upload_fails_and_skips_cleanup() {
        let store = Arc::new(TestStore {
            fail_puts: true,
            ..Default::default()
        });
        let shared: SharedStore = store.clone();
        let config = RunConfig {
            max_consecutive_failures: 2,
            ..run_config(Operation::Upload, 10, 1)
        };

        let error = run_batches(&shared, config, true, true, &CancellationToken::new())
            .await
            .unwrap_err();

        match error.downcast_ref::<RunError>() {
            Some(RunError::Aborted {
                consecutive_failures,
                result,
            }) => {
                assert_eq!(*consecutive_failures, 2);
                assert_eq!(result.failed(), 2);
                assert_eq!(result.skipped, 8);
            }
            other => panic!("expected an aborted run, got {other:?}"),
        }
        assert_eq!(store.deletes.load(Ordering::SeqCst), 0);
    }
}
