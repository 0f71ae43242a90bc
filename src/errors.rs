//! Error types for the krogon crate.
//!
//! This module defines the single error enumeration returned by every
//! fallible core operation (job queue, layer store, pull/push pipelines).
//! Boundary modules (`registry`, `tarcodec`) own their own `thiserror`
//! enums and convert into `ClientError` at the point the core calls
//! across the boundary.
//!
//! Notes:
//! - Each variant carries the context needed to explain the failure.
//! - No panics for flow control: every failure here is a value.

use thiserror::Error;

use crate::registry::RegistryError;
use crate::tarcodec::TarError;

#[derive(Error, Debug)]
/// Unified error enumeration for the krogon library.
pub enum ClientError {
    /// push/commit invoked on a rootfs that isn't a layered store.
    #[error("{0} is not a layered rootfs store")]
    NotAStore(String),

    /// commit or uncommitted-export invoked with a clean working tree.
    #[error("no change to commit")]
    NoChange,

    /// Recoverable per-endpoint registry failure; caller should retry
    /// against the next endpoint.
    #[error("registry endpoint `{endpoint}` failed: {source}")]
    RegistryTransient {
        endpoint: String,
        #[source]
        source: RegistryError,
    },

    /// Registry failure after exhausting retries: auth, not-found,
    /// manifest decode, or similar unrecoverable condition.
    #[error("registry error: {0}")]
    RegistryFatal(#[source] RegistryError),

    /// V2 computed tarsum did not match the manifest digest.
    #[error("tarsum verification failed: expected {expected}, computed {computed}")]
    Verification { expected: String, computed: String },

    /// Failure from the revision-control layer store, wrapped with its
    /// textual output for diagnosis.
    #[error("layer store error: {0}")]
    StoreError(String),

    /// Failure from the tar codec boundary.
    #[error("tar codec error: {0}")]
    TarError(#[from] TarError),

    /// I/O error not otherwise classified above.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON layer metadata or manifest.
    #[error("invalid layer metadata: {0}")]
    InvalidMetadata(String),

    /// Malformed digest string (expected `<algorithm>:<hex>`).
    #[error("invalid digest: {0}")]
    InvalidDigest(String),
}

impl ClientError {
    /// `AlreadyExists` is not a distinct variant: the registry boundary
    /// reports it as `RegistryError::AlreadyExists` and callers treat it
    /// as success inline (see `push::push_layer`), so it never needs to
    /// surface as a `ClientError` on its own.
    pub fn is_already_exists(err: &RegistryError) -> bool {
        matches!(err, RegistryError::AlreadyExists)
    }
}
