use thiserror::Error;

/// Errors returned by [`ObjectStore`](crate::ObjectStore) operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested object does not exist.
    #[error("object not found: {key}")]
    NotFound {
        /// The key that was requested.
        key: String,
    },

    /// All errors stemming from the S3 client.
    ///
    /// These can be network errors encountered when sending the requests, but can also indicate
    /// errors returned by the API itself.
    #[error("s3 error: {context}")]
    S3 {
        /// The operation that failed.
        context: String,
        /// The underlying client error.
        #[source]
        cause: s3::error::S3Error,
    },

    /// The configured credentials could not be used.
    #[error("invalid credentials: {0}")]
    Credentials(#[from] s3::creds::error::CredentialsError),
}

impl StoreError {
    pub(crate) fn s3(context: impl Into<String>, cause: s3::error::S3Error) -> Self {
        Self::S3 {
            context: context.into(),
            cause,
        }
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
