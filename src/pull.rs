//! Pull pipeline: resolve a reference's layer chain,
//! fetch every layer concurrently, then apply them in strict chain
//! order onto a rootfs, optionally committing each one to a
//! [`crate::store::LayerStore`].

use std::fs;
use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::ClientConfig;
use crate::errors::ClientError;
use crate::hash::Digest;
use crate::job::{Job, V1FetchJob, V2FetchJob};
use crate::queue::JobQueue;
use crate::reference::ImageReference;
use crate::registry::{dedup_adjacent_fs_layers, RegistryError, V1Registry, V2Registry};
use crate::store::{Branch, LayerStore};
use crate::tarcodec::TarCodec;

/// One resolved chain element, child-to-parent order already reversed
/// so index 0 is the base layer.
struct ChainElement {
    id: String,
}

/// Drives a single pull of `reference` into `rootfs`.
pub struct PullPipeline<'a> {
    pub config: &'a ClientConfig,
    pub codec: &'a dyn TarCodec,
}

impl<'a> PullPipeline<'a> {
    pub fn new(config: &'a ClientConfig, codec: &'a dyn TarCodec) -> Self {
        PullPipeline { config, codec }
    }

    /// V1 pull: resolve history via tags, fetch concurrently, apply in
    /// order, optionally layering into a `LayerStore`.
    pub fn pull_v1(
        &self,
        registry: Arc<dyn V1Registry>,
        reference: &ImageReference,
        rootfs: &Path,
        git_layering: bool,
    ) -> Result<(), ClientError> {
        fs::create_dir_all(rootfs)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(rootfs, fs::Permissions::from_mode(0o700))?;
        }

        let store = if git_layering {
            Some(LayerStore::open_or_init(rootfs)?)
        } else {
            None
        };

        let repo_data = registry
            .get_repository_data(&reference.name)
            .map_err(ClientError::RegistryFatal)?;

        let mut last_err = None;
        let mut chain: Vec<ChainElement> = Vec::new();
        for endpoint in &repo_data.endpoints {
            let tags = match registry.get_remote_tags(endpoint, &reference.name, &repo_data.tokens)
            {
                Ok(t) => t,
                Err(e) => {
                    warn!(
                        "{}",
                        ClientError::RegistryTransient {
                            endpoint: endpoint.clone(),
                            source: clone_registry_error(&e),
                        }
                    );
                    last_err = Some(e);
                    continue;
                }
            };
            let image_id = match tags.get(&reference.tag) {
                Some(id) => id.clone(),
                None => {
                    last_err = Some(RegistryError::NotFound);
                    continue;
                }
            };
            let history =
                match registry.get_remote_history(endpoint, &image_id, &repo_data.tokens) {
                    Ok(h) => h,
                    Err(e) => {
                        warn!(
                            "{}",
                            ClientError::RegistryTransient {
                                endpoint: endpoint.clone(),
                                source: clone_registry_error(&e),
                            }
                        );
                        last_err = Some(e);
                        continue;
                    }
                };
            chain = history
                .into_iter()
                .rev()
                .map(|id| ChainElement { id })
                .collect();
            break;
        }
        if chain.is_empty() {
            return Err(ClientError::RegistryFatal(
                last_err.unwrap_or(RegistryError::NotFound),
            ));
        }

        // Every endpoint is handed to each fetch job so a flaky primary
        // endpoint falls back to the next rather than hard-failing the
        // whole layer (`V1FetchJob::start`'s endpoint loop).
        let mut queue: JobQueue<V1FetchJob> = JobQueue::new(self.config.concurrency);
        for elem in &chain {
            queue.enqueue(V1FetchJob::new(
                elem.id.clone(),
                repo_data.endpoints.clone(),
                repo_data.tokens.clone(),
                Arc::clone(&registry),
            ));
        }
        let mut completed = queue.run();

        for (n, elem) in chain.iter().enumerate() {
            let mut job = completed
                .remove(&elem.id)
                .ok_or_else(|| ClientError::StoreError(format!("job missing for {}", elem.id)))?;
            if let Some(err) = job.error() {
                return Err(ClientError::RegistryFatal(match err {
                    ClientError::RegistryFatal(e) => clone_registry_error(e),
                    _ => RegistryError::Fatal(err.to_string()),
                }));
            }

            if let Some(store) = &store {
                let branch = Branch::new(n, elem.id.clone());
                store.checkout_new(&branch)?;
            }

            let mut reader = job.reader.take().expect("fetch job succeeded without a reader");
            self.codec
                .apply_layer(rootfs, &mut reader, self.config.effective_restore_ownership())?;

            let json = job.json.take().expect("fetch job succeeded without json");
            let json_path = rootfs.join("json");
            fs::write(&json_path, &json)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&json_path, fs::Permissions::from_mode(0o644))?;
            }
            if store.is_some() {
                fs::write(rootfs.join("layersize"), job.declared_size.to_string())?;
            }

            if let Some(store) = &store {
                store.stage_and_commit(&format!("adding layer {}", elem.id))?;
            }
            info!(layer = %elem.id, "applied V1 layer");
        }

        Ok(())
    }

    /// V2 pull: resolve the manifest, dedup adjacent FS layers, fetch
    /// concurrently, apply in order with tarsum verification.
    pub fn pull_v2(
        &self,
        registry: Arc<dyn V2Registry>,
        reference: &ImageReference,
        rootfs: &Path,
        git_layering: bool,
    ) -> Result<(), ClientError> {
        fs::create_dir_all(rootfs)?;

        let store = if git_layering {
            Some(LayerStore::open_or_init(rootfs)?)
        } else {
            None
        };

        let endpoint = registry
            .resolve_endpoint(&reference.name)
            .map_err(ClientError::RegistryFatal)?;
        let manifest = registry
            .get_image_manifest(&endpoint, &reference.name, &reference.tag)
            .map_err(ClientError::RegistryFatal)?;

        // Wire order is outermost-layer-first; the adjacency dedup and
        // the chain-order reversal below both expect that order
        // preserved until the final `.rev()`.
        let deduped = dedup_adjacent_fs_layers(&manifest.fs_layers);
        let digests: Vec<String> = deduped.into_iter().rev().map(|l| l.blob_sum).collect();

        let mut queue: JobQueue<V2FetchJob> = JobQueue::new(self.config.concurrency);
        for digest in &digests {
            queue.enqueue(V2FetchJob::new(
                digest.clone(),
                endpoint.clone(),
                reference.name.clone(),
                Arc::clone(&registry),
            ));
        }
        let mut completed = queue.run();

        for (n, digest) in digests.iter().enumerate() {
            let mut job = completed
                .remove(digest)
                .ok_or_else(|| ClientError::StoreError(format!("job missing for {digest}")))?;
            if let Some(err) = job.error() {
                return Err(ClientError::RegistryFatal(match err {
                    ClientError::RegistryFatal(e) => clone_registry_error(e),
                    _ => RegistryError::Fatal(err.to_string()),
                }));
            }

            let parsed: Digest = digest
                .parse()
                .map_err(|_| ClientError::InvalidDigest(digest.clone()))?;

            if let Some(store) = &store {
                let branch = Branch::new(n, digest.clone());
                store.checkout_new(&branch)?;
                let algorithm_label = parsed
                    .tarsum_algorithm()
                    .map(|a| a.label())
                    .unwrap_or("unknown");
                store.describe_branch(&branch, algorithm_label)?;
            }

            let mut reader = job.reader.take().expect("fetch job succeeded without a reader");
            self.codec
                .apply_layer(rootfs, &mut reader, self.config.effective_restore_ownership())?;
            let computed = reader.finalize();

            if !parsed.matches_hex(&computed) {
                warn!(digest = %digest, computed = %computed, "tarsum verification failed");
                return Err(ClientError::Verification {
                    expected: parsed.hex,
                    computed,
                });
            }

            if let Some(store) = &store {
                store.stage_and_commit(&format!("adding layer {digest}"))?;
            }
            info!(digest = %digest, "applied V2 layer");
        }

        Ok(())
    }
}

fn clone_registry_error(e: &RegistryError) -> RegistryError {
    match e {
        RegistryError::Transient(s) => RegistryError::Transient(s.clone()),
        RegistryError::Fatal(s) => RegistryError::Fatal(s.clone()),
        RegistryError::AlreadyExists => RegistryError::AlreadyExists,
        RegistryError::NotFound => RegistryError::NotFound,
    }
}
