//! The registry capability consumed by the core.
//!
//! The core never talks HTTP directly — the low-level transport to a
//! Docker-compatible registry is an external concern. Instead it
//! depends on two small object-safe traits, `V1Registry` and
//! `V2Registry`, that a caller implements against whatever HTTP client
//! it likes. These traits are synchronous: every [`crate::job::Job`]
//! runs its body straight through on a worker thread, so there is no
//! `async`/`await` anywhere in the core.

use std::io::Read;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors reported by a registry implementation.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Recoverable failure scoped to one endpoint; the caller should
    /// move on to the next endpoint in the list.
    #[error("{0}")]
    Transient(String),

    /// Authentication, authorization, not-found, or manifest-decode
    /// failure that should abort the pipeline outright.
    #[error("{0}")]
    Fatal(String),

    /// The target already exists remotely; idempotent pushes treat
    /// this as success.
    #[error("already exists")]
    AlreadyExists,

    /// The requested object does not exist remotely.
    #[error("not found")]
    NotFound,
}

/// Endpoints plus bearer tokens returned by `get_repository_data`.
#[derive(Debug, Clone, Default)]
pub struct RepositoryData {
    pub endpoints: Vec<String>,
    pub tokens: Vec<String>,
}

/// One image entry in a V1 push index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageIndexEntry {
    pub id: String,
    pub tag: String,
}

/// The V1 registry capability.
///
/// Implementors are expected to retry nothing internally; looping over
/// `repository_data.endpoints` and mapping per-endpoint failures to
/// `RegistryError::Transient` is the caller's job (see
/// [`crate::job::V1FetchJob`]).
pub trait V1Registry: Send + Sync {
    /// Resolve endpoints and auth tokens for `repository_name`.
    fn get_repository_data(&self, repository_name: &str) -> Result<RepositoryData, RegistryError>;

    /// Map every tag in the repository to its image ID.
    fn get_remote_tags(
        &self,
        endpoint: &str,
        repository_name: &str,
        tokens: &[String],
    ) -> Result<std::collections::HashMap<String, String>, RegistryError>;

    /// Ordered image IDs from `image_id` back to the root, child first.
    fn get_remote_history(
        &self,
        endpoint: &str,
        image_id: &str,
        tokens: &[String],
    ) -> Result<Vec<String>, RegistryError>;

    /// The layer's JSON metadata and its declared size in bytes.
    fn get_remote_image_json(
        &self,
        endpoint: &str,
        image_id: &str,
        tokens: &[String],
    ) -> Result<(Vec<u8>, usize), RegistryError>;

    /// Open a streaming reader over the layer's tar bytes.
    fn get_remote_image_layer(
        &self,
        endpoint: &str,
        image_id: &str,
        tokens: &[String],
        declared_size: usize,
    ) -> Result<Box<dyn Read + Send>, RegistryError>;

    /// Existence probe used by the push pipeline to skip already-present
    /// layers.
    fn lookup_remote_image(
        &self,
        endpoint: &str,
        image_id: &str,
        tokens: &[String],
    ) -> Result<bool, RegistryError>;

    /// Two-phase index push: `finalize = false` registers a preliminary
    /// index and returns the endpoints to finalize against;
    /// `finalize = true` commits it.
    fn push_image_json_index(
        &self,
        repository_name: &str,
        index: &[ImageIndexEntry],
        finalize: bool,
        endpoints: Option<&[String]>,
    ) -> Result<RepositoryData, RegistryError>;

    /// Upload a layer's JSON metadata.
    fn push_json(
        &self,
        endpoint: &str,
        image_id: &str,
        json: &[u8],
        tokens: &[String],
    ) -> Result<(), RegistryError>;

    /// Upload a layer's tar bytes, returning the registry-computed
    /// checksum and its signed payload.
    fn push_layer(
        &self,
        endpoint: &str,
        image_id: &str,
        layer: &mut dyn Read,
        tokens: &[String],
    ) -> Result<(String, Vec<u8>), RegistryError>;

    /// Push the checksum record produced by `push_layer`.
    fn push_checksum(
        &self,
        endpoint: &str,
        image_id: &str,
        checksum: &str,
        checksum_payload: &[u8],
        tokens: &[String],
    ) -> Result<(), RegistryError>;

    /// Push the tag pointing `tag` to `image_id`.
    fn push_tag(
        &self,
        endpoint: &str,
        repository_name: &str,
        image_id: &str,
        tag: &str,
        tokens: &[String],
    ) -> Result<(), RegistryError>;
}

/// A decoded V2 manifest: name, tag, and ordered FS-layer digests
/// (outermost layer first, matching the wire order before chain
/// resolution reverses it).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestData {
    pub name: String,
    pub tag: String,
    #[serde(rename = "fsLayers")]
    pub fs_layers: Vec<FsLayer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsLayer {
    #[serde(rename = "blobSum")]
    pub blob_sum: String,
}

/// The V2 registry capability.
pub trait V2Registry: Send + Sync {
    /// Resolve the V2 endpoint and bearer authorization for
    /// `repository_name`.
    fn resolve_endpoint(&self, repository_name: &str) -> Result<String, RegistryError>;

    fn get_image_manifest(
        &self,
        endpoint: &str,
        repository_name: &str,
        tag: &str,
    ) -> Result<ManifestData, RegistryError>;

    /// Existence probe by digest.
    fn head_blob(
        &self,
        endpoint: &str,
        repository_name: &str,
        digest: &str,
    ) -> Result<bool, RegistryError>;

    /// Open a streaming reader over the blob's bytes and report its
    /// size.
    fn get_blob_reader(
        &self,
        endpoint: &str,
        repository_name: &str,
        digest: &str,
    ) -> Result<(Box<dyn Read + Send>, u64), RegistryError>;

    fn put_blob(
        &self,
        endpoint: &str,
        repository_name: &str,
        digest: &str,
        data: &mut dyn Read,
    ) -> Result<(), RegistryError>;

    fn put_manifest(
        &self,
        endpoint: &str,
        repository_name: &str,
        tag: &str,
        manifest: &ManifestData,
    ) -> Result<(), RegistryError>;
}

/// Collapse adjacent duplicate FS-layer digests, preserving the first
/// occurrence of each run. This is adjacency-based rather than a
/// global dedup — see DESIGN.md for the reasoning.
pub fn dedup_adjacent_fs_layers(layers: &[FsLayer]) -> Vec<FsLayer> {
    let mut out: Vec<FsLayer> = Vec::with_capacity(layers.len());
    for layer in layers {
        if out.last().map(|l| &l.blob_sum) != Some(&layer.blob_sum) {
            out.push(layer.clone());
        }
    }
    out
}
