//! Push pipeline: push a layered rootfs store back to a V1 registry,
//! plus an experimental V2 path.

use std::io::Read;
use std::path::Path;

use chrono::Utc;
use tracing::info;

use crate::errors::ClientError;
use crate::hash::generate_random_id;
use crate::reference::ImageReference;
use crate::registry::{
    FsLayer, ImageIndexEntry, ManifestData, RegistryError, V1Registry, V2Registry,
};
use crate::store::{Branch, LayerStore};
use crate::tarcodec::TarCodec;

/// Per-layer outcome of the push pipeline's step 4, surfaced so the
/// CLI front-end can print "already pushed" vs. "done" the way the
/// original does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerPushOutcome {
    AlreadyPresent,
    Uploaded { bytes: u64 },
}

pub struct PushPipeline<'a> {
    pub codec: &'a dyn TarCodec,
}

impl<'a> PushPipeline<'a> {
    pub fn new(codec: &'a dyn TarCodec) -> Self {
        PushPipeline { codec }
    }

    /// Synthesize a new top layer from uncommitted changes and commit
    /// it, ready to push.
    pub fn commit(
        &self,
        store: &LayerStore,
        rootfs: &Path,
        message: &str,
    ) -> Result<Branch, ClientError> {
        let mut tar_buf = Vec::new();
        store
            .export_uncommitted(self.codec)?
            .read_to_end(&mut tar_buf)?;

        let json_path = rootfs.join("json");
        let raw = std::fs::read(&json_path)?;
        let mut top: serde_json::Value = serde_json::from_slice(&raw)
            .map_err(|e| ClientError::InvalidMetadata(e.to_string()))?;

        let old_id = top
            .get("id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| ClientError::InvalidMetadata("layer json missing id".to_string()))?;
        let new_id = generate_random_id();

        if let Some(obj) = top.as_object_mut() {
            obj.insert("parent".to_string(), serde_json::Value::String(old_id));
            obj.insert("id".to_string(), serde_json::Value::String(new_id.clone()));
            obj.insert(
                "created".to_string(),
                serde_json::Value::String(Utc::now().to_rfc3339()),
            );
            obj.insert(
                "comment".to_string(),
                serde_json::Value::String(message.to_string()),
            );
            obj.insert(
                "size".to_string(),
                serde_json::Value::Number(tar_buf.len().into()),
            );
        }

        std::fs::write(&json_path, serde_json::to_vec(&top).unwrap())?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&json_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let n = store.branches()?.len();
        let branch = Branch::new(n, new_id);
        store.checkout_new(&branch)?;
        store.stage_and_commit(message)?;
        Ok(branch)
    }

    /// Push every layer of `rootfs`'s store to the V1 registry under
    /// `reference`.
    pub fn push_v1(
        &self,
        registry: &dyn V1Registry,
        store: &LayerStore,
        reference: &ImageReference,
    ) -> Result<Vec<LayerPushOutcome>, ClientError> {
        let branches = store.branches()?;
        if branches.is_empty() {
            return Err(ClientError::NotAStore(
                store.root().to_string_lossy().into_owned(),
            ));
        }

        let index: Vec<ImageIndexEntry> = branches
            .iter()
            .map(|b| ImageIndexEntry {
                id: b.id.clone(),
                tag: reference.tag.clone(),
            })
            .collect();

        let preliminary = registry
            .push_image_json_index(&reference.name, &index, false, None)
            .map_err(ClientError::RegistryFatal)?;

        let mut outcomes = Vec::with_capacity(branches.len());
        for branch in &branches {
            let endpoint = preliminary
                .endpoints
                .first()
                .ok_or_else(|| {
                    ClientError::RegistryFatal(RegistryError::Fatal(
                        "no endpoints returned by preliminary index push".to_string(),
                    ))
                })?;

            let already_present = registry
                .lookup_remote_image(endpoint, &branch.id, &preliminary.tokens)
                .map_err(ClientError::RegistryFatal)?;

            if already_present {
                outcomes.push(LayerPushOutcome::AlreadyPresent);
            } else {
                store.checkout(branch)?;
                let json = std::fs::read(store.root().join("json"))?;

                match registry.push_json(endpoint, &branch.id, &json, &preliminary.tokens) {
                    Ok(()) => {}
                    Err(e) if ClientError::is_already_exists(&e) => {}
                    Err(e) => return Err(ClientError::RegistryFatal(e)),
                }

                let mut tar_buf = Vec::new();
                store
                    .export_changeset(branch, self.codec)?
                    .read_to_end(&mut tar_buf)?;
                let bytes = tar_buf.len() as u64;

                let (checksum, checksum_payload) = registry
                    .push_layer(endpoint, &branch.id, &mut &tar_buf[..], &preliminary.tokens)
                    .map_err(ClientError::RegistryFatal)?;
                registry
                    .push_checksum(
                        endpoint,
                        &branch.id,
                        &checksum,
                        &checksum_payload,
                        &preliminary.tokens,
                    )
                    .map_err(ClientError::RegistryFatal)?;

                outcomes.push(LayerPushOutcome::Uploaded { bytes });
            }

            registry
                .push_tag(
                    endpoint,
                    &reference.name,
                    &branch.id,
                    &reference.tag,
                    &preliminary.tokens,
                )
                .map_err(ClientError::RegistryFatal)?;

            info!(branch = %branch, outcome = ?outcomes.last().unwrap(), "pushed layer");
        }

        registry
            .push_image_json_index(
                &reference.name,
                &index,
                true,
                Some(&preliminary.endpoints),
            )
            .map_err(ClientError::RegistryFatal)?;

        Ok(outcomes)
    }

    /// Experimental V2 push. Not wired into the default CLI path — see
    /// DESIGN.md.
    pub fn push_v2(
        &self,
        registry: &dyn V2Registry,
        store: &LayerStore,
        reference: &ImageReference,
    ) -> Result<Vec<LayerPushOutcome>, ClientError> {
        let branches = store.branches()?;
        if branches.is_empty() {
            return Err(ClientError::NotAStore(
                store.root().to_string_lossy().into_owned(),
            ));
        }

        let endpoint = registry
            .resolve_endpoint(&reference.name)
            .map_err(ClientError::RegistryFatal)?;

        let mut outcomes = Vec::with_capacity(branches.len());
        for branch in branches.iter().rev() {
            let digest = format!(
                "{}:{}",
                store
                    .branch_description(branch)?
                    .unwrap_or_else(|| "tarsum.dev+sha256".to_string()),
                branch.id
            );

            let exists = registry
                .head_blob(&endpoint, &reference.name, &digest)
                .map_err(ClientError::RegistryFatal)?;

            if exists {
                outcomes.push(LayerPushOutcome::AlreadyPresent);
            } else {
                store.checkout(branch)?;
                let mut tar_buf = Vec::new();
                store
                    .export_changeset(branch, self.codec)?
                    .read_to_end(&mut tar_buf)?;
                let bytes = tar_buf.len() as u64;
                let mut cursor: &[u8] = &tar_buf;
                registry
                    .put_blob(&endpoint, &reference.name, &digest, &mut cursor as &mut dyn Read)
                    .map_err(ClientError::RegistryFatal)?;
                outcomes.push(LayerPushOutcome::Uploaded { bytes });
            }
        }

        let manifest = generate_manifest_v2(reference, &branches, store)?;
        registry
            .put_manifest(&endpoint, &reference.name, &reference.tag, &manifest)
            .map_err(ClientError::RegistryFatal)?;

        Ok(outcomes)
    }
}

/// Rebuild a V2 manifest's FS-layer list from branch descriptions
/// (digest algorithm persisted via `describe_branch` at pull time).
fn generate_manifest_v2(
    reference: &ImageReference,
    branches: &[Branch],
    store: &LayerStore,
) -> Result<ManifestData, ClientError> {
    let mut fs_layers = Vec::with_capacity(branches.len());
    for branch in branches.iter().rev() {
        let algorithm = store
            .branch_description(branch)?
            .unwrap_or_else(|| "tarsum.dev+sha256".to_string());
        fs_layers.push(FsLayer {
            blob_sum: format!("{algorithm}:{}", branch.id),
        });
    }
    Ok(ManifestData {
        name: reference.name.clone(),
        tag: reference.tag.clone(),
        fs_layers,
    })
}
