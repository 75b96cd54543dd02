//! The object store client used by the benchmark.
//!
//! Every store implements the [`ObjectStore`] trait, which exposes the handful of single-object
//! operations the benchmark needs against one bucket. The store is shared read-only by all
//! concurrent workers, so implementations must be `Send + Sync`.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

use std::fmt::Debug;
use std::sync::Arc;

use bytes::Bytes;

mod error;
mod in_memory;
mod s3_compatible;

pub use error::*;
pub use in_memory::InMemoryStore;
pub use s3_compatible::{S3CompatibleStore, S3CompatibleStoreConfig};

/// A type-erased, shareable [`ObjectStore`] instance.
pub type SharedStore = Arc<dyn ObjectStore>;

/// Operations against a single bucket of an object store.
#[async_trait::async_trait]
pub trait ObjectStore: Debug + Send + Sync + 'static {
    /// The store name, used for diagnostics.
    fn name(&self) -> &'static str;

    /// Stores or overwrites the object at `key`.
    async fn put_object(&self, key: &str, payload: Bytes) -> StoreResult<()>;

    /// Retrieves the full contents of the object at `key`.
    ///
    /// Returns [`StoreError::NotFound`] if there is no such object.
    async fn get_object(&self, key: &str) -> StoreResult<Bytes>;

    /// Lists the keys of all objects starting with `prefix`.
    async fn list_objects(&self, prefix: &str) -> StoreResult<Vec<String>>;

    /// Deletes the object at `key`.
    async fn delete_object(&self, key: &str) -> StoreResult<()>;
}
