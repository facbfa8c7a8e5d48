use thiserror::Error;

use vev_core::StoreError;

#[derive(Error, Debug)]
pub enum ReplicationError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Malformed fact path: {0}")]
    MalformedPath(String),

    #[error("Malformed reference value: {0}")]
    MalformedReference(String),
}
