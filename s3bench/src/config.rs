//! Configuration for a benchmark run.
//!
//! Configuration is merged from the following sources, later ones overriding earlier ones:
//!
//! 1. Defaults
//! 2. YAML configuration file (specified via `-c` or `--config` flag)
//! 3. Environment variables (prefixed with `S3BENCH__`)
//! 4. Command line flags
//!
//! The merged [`Config`] is then validated into an immutable [`RunConfig`] before any work starts.
//!
//! # YAML Configuration File
//!
//! ```yaml
//! endpoint: http://localhost:9000
//! bucket: bench
//! access_key: minioadmin
//! secret_key: minioadmin
//! prefix: nightly
//! size: 4M
//! operation: upload
//! count: 1000
//! workers: 32
//! ```

use std::fmt;
use std::path::Path;
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Yaml};
use s3bench_store::S3CompatibleStoreConfig;
use secrecy::{CloneableSecret, ExposeSecret, SecretBox, SerializableSecret, zeroize::Zeroize};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::workload::Operation;

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "S3BENCH__";

/// Upper bound for the number of concurrent workers.
pub const MAX_WORKERS: usize = 100;
/// Number of workers used when none is configured.
pub const DEFAULT_WORKERS: usize = 10;
/// Payload size in bytes used when none is configured.
pub const DEFAULT_PAYLOAD_SIZE: usize = 1024;
/// Upper bound for the payload size, the largest object S3 accepts in a single PUT (5 GiB).
pub const MAX_PAYLOAD_SIZE: u64 = 5 << 30;
/// Consecutive failures after which a run is aborted, unless configured.
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u64 = 50;

/// Errors detected while loading or validating the configuration.
///
/// All of these are fatal and reported before any work is started.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration sources could not be read or merged.
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    /// A value without default was not provided by any source.
    #[error("missing required option `{0}`")]
    Missing(&'static str),

    /// The operation is not one of the supported kinds.
    #[error("unknown operation `{0}`, expected one of: upload, download, delete")]
    UnknownOperation(String),

    /// The payload size could not be parsed.
    #[error("invalid size `{0}`, expected a number of bytes with an optional K, M or G suffix")]
    InvalidSize(String),

    /// The payload size exceeds [`MAX_PAYLOAD_SIZE`] or does not fit into memory.
    #[error("the payload size must be at most {max} bytes, got {requested}")]
    PayloadTooLarge {
        /// The configured size in bytes.
        requested: u64,
        /// The ceiling in bytes.
        max: u64,
    },

    /// The object count is zero.
    #[error("the number of objects must be a positive integer")]
    ZeroCount,

    /// The object count does not fit into memory on this platform.
    #[error("the number of objects is too large: {0}")]
    CountTooLarge(u64),

    /// The worker count is zero.
    #[error("the number of workers must be at least 1")]
    NoWorkers,

    /// The worker count exceeds [`MAX_WORKERS`].
    #[error("the number of workers must be at most {max}, got {requested}")]
    TooManyWorkers {
        /// The configured worker count.
        requested: usize,
        /// The ceiling.
        max: usize,
    },
}

/// Newtype around `String` that may protect against accidental logging of secrets in our
/// configuration struct. Use with [`secrecy::SecretBox`].
#[derive(Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConfigSecret(String);

impl ConfigSecret {
    /// Returns the secret as a string slice.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Debug for ConfigSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "[redacted]")
    }
}

impl CloneableSecret for ConfigSecret {}
impl SerializableSecret for ConfigSecret {}
impl Zeroize for ConfigSecret {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

/// A payload size, either given as a plain number of bytes or as a string with a unit suffix.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
pub enum SizeSpec {
    /// A plain number of bytes, e.g. `2048`.
    Bytes(u64),
    /// A size string such as `"10K"` or `"2M"`.
    Text(String),
}

impl SizeSpec {
    /// Resolves this size to a number of bytes.
    pub fn to_bytes(&self) -> Result<u64, ConfigError> {
        match self {
            SizeSpec::Bytes(bytes) => Ok(*bytes),
            SizeSpec::Text(text) => parse_size(text),
        }
    }
}

/// Merged configuration from all sources.
///
/// See the [module docs](self) for the precedence of sources.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// HTTP(S) endpoint of the S3 service.
    pub endpoint: Option<String>,
    /// Region used for request signing.
    ///
    /// # Default
    ///
    /// `us-east-1`
    pub region: String,
    /// Bucket all objects are written to and read from.
    pub bucket: Option<String>,
    /// Access key ID.
    pub access_key: Option<String>,
    /// Secret access key.
    pub secret_key: Option<SecretBox<ConfigSecret>>,
    /// Whether to use path-style addressing.
    ///
    /// # Default
    ///
    /// `true`, which is what most self-hosted deployments expect.
    pub path_style: bool,
    /// Timeout applied to every single request.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Option<Duration>,

    /// Prefix prepended to every object key. A trailing `/` is added if missing.
    pub prefix: Option<String>,
    /// Payload size of uploaded objects, e.g. `1024`, `10K`, `2M` or `1G`.
    ///
    /// # Default
    ///
    /// `1024` bytes
    pub size: Option<SizeSpec>,
    /// The operation to perform: `upload`, `download` or `delete`.
    pub operation: Option<String>,
    /// Total number of objects to process.
    pub count: Option<u64>,
    /// Number of concurrent workers, at most [`MAX_WORKERS`].
    ///
    /// # Default
    ///
    /// `10`
    pub workers: usize,
    /// Abort the run once this many operations in a row have failed. `0` disables the check.
    ///
    /// # Default
    ///
    /// `50`
    pub max_consecutive_failures: u64,
    /// Delete all uploaded objects after an upload run.
    pub cleanup: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: "us-east-1".into(),
            bucket: None,
            access_key: None,
            secret_key: None,
            path_style: true,
            request_timeout: None,
            prefix: None,
            size: None,
            operation: None,
            count: None,
            workers: DEFAULT_WORKERS,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            cleanup: false,
        }
    }
}

/// Values given explicitly on the command line.
///
/// Only fields that are set override the other configuration sources.
#[derive(Debug, Default, Serialize)]
pub struct ConfigOverrides {
    /// Overrides [`Config::endpoint`] from `--endpoint`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Overrides [`Config::region`] from `--region`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Overrides [`Config::bucket`] from `--bucket`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    /// Overrides [`Config::access_key`] from `--access-key`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,
    /// Overrides [`Config::secret_key`] from `--secret-key`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
    /// Overrides [`Config::prefix`] from `--prefix`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    /// Overrides [`Config::size`] from `--size`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    /// Overrides [`Config::operation`] from `--operation`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    /// Overrides [`Config::count`] from `--count`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    /// Overrides [`Config::workers`] from `--workers`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
    /// Overrides [`Config::max_consecutive_failures`] from `--max-consecutive-failures`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_consecutive_failures: Option<u64>,
    /// Overrides [`Config::cleanup`] from `--cleanup`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleanup: Option<bool>,
}

impl Config {
    /// Loads configuration from all sources.
    ///
    /// Configuration is merged in the following order (later sources override earlier ones):
    /// 1. Default values
    /// 2. YAML configuration file (if `path` is given)
    /// 3. Environment variables (prefixed with `S3BENCH__`)
    /// 4. The given command line `overrides`
    pub fn load(path: Option<&Path>, overrides: ConfigOverrides) -> Result<Self, ConfigError> {
        let mut figment = figment::Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(Serialized::defaults(overrides))
            .extract()
            .map_err(Box::new)?;

        Ok(config)
    }

    /// Returns the connection settings for the S3 store.
    pub fn store_config(&self) -> Result<S3CompatibleStoreConfig, ConfigError> {
        let endpoint = self.endpoint.clone().ok_or(ConfigError::Missing("endpoint"))?;
        let bucket = self.bucket.clone().ok_or(ConfigError::Missing("bucket"))?;

        Ok(S3CompatibleStoreConfig {
            bucket,
            region: self.region.clone(),
            endpoint,
            path_style: self.path_style,
            request_timeout: self.request_timeout,
            access_key: self.access_key.clone(),
            secret_key: self
                .secret_key
                .as_ref()
                .map(|secret| secret.expose_secret().as_str().to_owned()),
        })
    }
}

/// The validated, immutable parameters of one run.
#[derive(Clone, Debug)]
pub struct RunConfig {
    /// The operation every work item performs.
    pub operation: Operation,
    /// The bucket the run targets, for reporting.
    pub bucket: String,
    /// Normalized key prefix, empty or ending in `/`.
    pub prefix: String,
    /// Size of uploaded payloads in bytes.
    pub payload_size: usize,
    /// Number of work items.
    pub count: usize,
    /// Number of concurrent workers.
    pub workers: usize,
    /// Consecutive failures that abort the run, `0` to never abort.
    pub max_consecutive_failures: u64,
}

impl RunConfig {
    /// Validates the merged configuration.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let operation = config
            .operation
            .as_deref()
            .ok_or(ConfigError::Missing("operation"))?
            .parse::<Operation>()?;

        let count = config.count.ok_or(ConfigError::Missing("count"))?;
        if count == 0 {
            return Err(ConfigError::ZeroCount);
        }

        let payload_size = match &config.size {
            Some(size) => validate_payload_size(size.to_bytes()?)?,
            None => DEFAULT_PAYLOAD_SIZE,
        };

        Ok(Self {
            operation,
            bucket: config.bucket.clone().ok_or(ConfigError::Missing("bucket"))?,
            prefix: normalize_prefix(config.prefix.as_deref()),
            payload_size,
            count: usize::try_from(count).map_err(|_| ConfigError::CountTooLarge(count))?,
            workers: validate_workers(config.workers)?,
            max_consecutive_failures: config.max_consecutive_failures,
        })
    }

    /// Returns a copy of this configuration running a different operation.
    pub fn with_operation(&self, operation: Operation) -> Self {
        Self {
            operation,
            ..self.clone()
        }
    }
}

/// Checks the worker count against `1..=MAX_WORKERS`.
pub fn validate_workers(workers: usize) -> Result<usize, ConfigError> {
    match workers {
        0 => Err(ConfigError::NoWorkers),
        requested if requested > MAX_WORKERS => Err(ConfigError::TooManyWorkers {
            requested,
            max: MAX_WORKERS,
        }),
        workers => Ok(workers),
    }
}

/// Checks the payload size against [`MAX_PAYLOAD_SIZE`] and the platform's address space.
pub fn validate_payload_size(requested: u64) -> Result<usize, ConfigError> {
    let too_large = || ConfigError::PayloadTooLarge {
        requested,
        max: MAX_PAYLOAD_SIZE,
    };
    if requested > MAX_PAYLOAD_SIZE {
        return Err(too_large());
    }
    usize::try_from(requested).map_err(|_| too_large())
}

/// Ensures a non-empty prefix ends with `/`.
pub fn normalize_prefix(prefix: Option<&str>) -> String {
    match prefix {
        None | Some("") => String::new(),
        Some(prefix) if prefix.ends_with('/') => prefix.to_owned(),
        Some(prefix) => format!("{prefix}/"),
    }
}

/// Parses a size string into bytes.
///
/// Accepts a plain number of bytes, optionally followed by one of the binary suffixes `K`
/// (1024), `M` (1024²) or `G` (1024³). Suffixes are case-insensitive.
///
/// - `"1024"` → 1024 bytes
/// - `"10K"` → 10240 bytes
/// - `"2M"` → 2097152 bytes
pub fn parse_size(input: &str) -> Result<u64, ConfigError> {
    let invalid = || ConfigError::InvalidSize(input.to_owned());
    let trimmed = input.trim();

    let (digits, multiplier) = match trimmed.char_indices().last() {
        Some((idx, c)) if c.is_ascii_alphabetic() => {
            let multiplier = match c.to_ascii_uppercase() {
                'K' => 1 << 10,
                'M' => 1 << 20,
                'G' => 1 << 30,
                _ => return Err(invalid()),
            };
            (&trimmed[..idx], multiplier)
        }
        _ => (trimmed, 1),
    };

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    let value: u64 = digits.parse().map_err(|_| invalid())?;
    value.checked_mul(multiplier).ok_or_else(invalid)
}
