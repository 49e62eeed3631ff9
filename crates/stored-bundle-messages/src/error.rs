//! Bundle error.

use std::convert::Infallible;

use stored_bundle_client::StorageClientError;

/// Error surfaced by the remote-backed bundle.
#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[from] StorageClientError),
    #[error("{0} is not supported by the remote-backed bundle")]
    Unsupported(&'static str),
}

impl From<Infallible> for BundleError {
    fn from(never: Infallible) -> Self {
        match never {}
    }
}
