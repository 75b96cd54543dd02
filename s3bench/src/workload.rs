//! A module for defining the [`Workload`] of a run: which operation to perform on which objects.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};
use serde::Serialize;

use crate::config::{ConfigError, RunConfig};

/// Base name of all object keys, followed by `-<index>`.
pub const BASENAME: &str = "testfile";

/// The operation performed for every work item of a run.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Write the payload to the item's key.
    Upload,
    /// Read the object at the item's key.
    Download,
    /// Delete the object at the item's key.
    Delete,
}

impl Operation {
    /// Returns `true` if items of this operation carry a payload.
    pub fn needs_payload(self) -> bool {
        matches!(self, Operation::Upload)
    }

    /// The name used on the command line and in reports.
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Upload => "upload",
            Operation::Download => "download",
            Operation::Delete => "delete",
        }
    }
}

impl FromStr for Operation {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upload" => Ok(Operation::Upload),
            "download" => Ok(Operation::Download),
            "delete" => Ok(Operation::Delete),
            other => Err(ConfigError::UnknownOperation(other.to_owned())),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One logical operation on one object.
///
/// Items are created by a [`Workload`] and consumed exactly once by one worker.
#[derive(Clone, Debug)]
pub struct WorkItem {
    index: usize,
    key: String,
    payload: Option<Bytes>,
}

impl WorkItem {
    /// The ordinal of this item within its run.
    pub fn index(&self) -> usize {
        self.index
    }

    /// The object key this item operates on.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The payload to upload, shared between all items of a run.
    pub fn payload(&self) -> Option<&Bytes> {
        self.payload.as_ref()
    }
}

/// A builder for creating a [`Workload`].
#[derive(Debug)]
pub struct WorkloadBuilder {
    prefix: String,
    count: usize,
    payload: Option<Bytes>,
}

impl WorkloadBuilder {
    /// The number of items, named with indexes `0..count`.
    pub fn count(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    /// The payload attached to every item.
    pub fn payload(mut self, payload: Bytes) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Creates the workload instance.
    pub fn build(self) -> Workload {
        Workload {
            prefix: self.prefix,
            count: self.count,
            payload: self.payload,
        }
    }
}

/// The ordered, deterministic sequence of items a run processes.
#[derive(Debug)]
pub struct Workload {
    prefix: String,
    count: usize,
    payload: Option<Bytes>,
}

impl Workload {
    /// Constructs a new workload builder for keys under the given (normalized) prefix.
    pub fn builder(prefix: impl Into<String>) -> WorkloadBuilder {
        WorkloadBuilder {
            prefix: prefix.into(),
            count: 0,
            payload: None,
        }
    }

    /// Creates the workload for a run, generating the upload payload from `seed` if needed.
    pub fn for_run(config: &RunConfig, seed: u64) -> Self {
        let mut builder = Self::builder(config.prefix.as_str()).count(config.count);
        if config.operation.needs_payload() {
            builder = builder.payload(generate_payload(config.payload_size, seed));
        }
        builder.build()
    }

    /// The number of items in this workload.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Returns `true` if this workload has no items.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// All object keys in order.
    pub fn keys(&self) -> impl Iterator<Item = String> + '_ {
        (0..self.count).map(|index| object_key(&self.prefix, index))
    }

    /// All work items in order.
    pub fn items(&self) -> impl Iterator<Item = WorkItem> + '_ {
        (0..self.count).map(|index| WorkItem {
            index,
            key: object_key(&self.prefix, index),
            payload: self.payload.clone(),
        })
    }
}

/// The key of the object with the given index, e.g. `bench/testfile-3`.
pub fn object_key(prefix: &str, index: usize) -> String {
    format!("{prefix}{BASENAME}-{index}")
}

/// Generates `len` pseudo-random bytes, deterministic for a given `seed`.
pub fn generate_payload(len: usize, seed: u64) -> Bytes {
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut buf = vec![0; len];
    rng.fill_bytes(&mut buf);
    Bytes::from(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_prefixed_and_ordered() {
        let workload = Workload::builder("bench/").count(3).build();
        let keys: Vec<_> = workload.keys().collect();
        assert_eq!(keys, ["bench/testfile-0", "bench/testfile-1", "bench/testfile-2"]);
    }

    #[test]
    fn naming_is_reproducible() {
        let first: Vec<_> = Workload::builder("x/").count(100).build().keys().collect();
        let second: Vec<_> = Workload::builder("x/").count(100).build().keys().collect();
        assert_eq!(first, second);
        assert_eq!(first.last().map(String::as_str), Some("x/testfile-99"));
    }

    #[test]
    fn items_share_payload() {
        let payload = generate_payload(16, 42);
        let workload = Workload::builder("").count(2).payload(payload.clone()).build();

        let items: Vec<_> = workload.items().collect();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].index(), 1);
        assert_eq!(items[1].key(), "testfile-1");
        for item in &items {
            let shared = item.payload().unwrap();
            assert_eq!(shared, &payload);
            assert_eq!(shared.as_ptr(), payload.as_ptr());
        }
    }

    #[test]
    fn empty_workload() {
        let workload = Workload::builder("").build();
        assert!(workload.is_empty());
        assert_eq!(workload.items().count(), 0);
    }

    #[test]
    fn payload_is_deterministic() {
        let a = generate_payload(1024, 7);
        assert_eq!(a.len(), 1024);
        assert_eq!(a, generate_payload(1024, 7));
        assert_ne!(a, generate_payload(1024, 8));
        assert!(generate_payload(0, 7).is_empty());
    }

    #[test]
    fn parses_operations() {
        assert_eq!("upload".parse::<Operation>().unwrap(), Operation::Upload);
        assert_eq!("download".parse::<Operation>().unwrap(), Operation::Download);
        assert_eq!("delete".parse::<Operation>().unwrap(), Operation::Delete);
        assert!("Upload".parse::<Operation>().is_err());
        assert_eq!(Operation::Download.to_string(), "download");
    }
}
