//! Fetch jobs run by a [`crate::queue::JobQueue`].
//!
//! `Job` is the capability the queue is generic over. `V1FetchJob` and
//! `V2FetchJob` are the two concrete implementations the pull pipeline
//! enqueues; the queue hands each job back to the pipeline once
//! `start()` has run, with its fetched bytes or reader (or its error)
//! attached.

use std::io::Read;
use std::sync::Arc;

use crate::errors::ClientError;
use crate::hash::{TarsumAlgorithm, TarsumReader};
use crate::registry::{RegistryError, V1Registry, V2Registry};

/// A unit of work the job queue can run on a worker thread.
///
/// `start` runs synchronously to completion — there is no `async` body
/// to poll. A job
/// that fails records its error internally rather than returning one,
/// so the queue can hand the (now-inert) job straight back to the
/// pipeline for inspection.
pub trait Job: Send {
    fn id(&self) -> &str;
    fn start(&mut self);
    fn error(&self) -> Option<&ClientError>;
}

/// Fetches one V1 layer: its JSON metadata and an open streaming
/// reader over its tar bytes, tried across each repository endpoint in
/// order until one succeeds.
pub struct V1FetchJob {
    pub layer_id: String,
    endpoints: Vec<String>,
    tokens: Vec<String>,
    registry: Arc<dyn V1Registry>,

    pub json: Option<Vec<u8>>,
    pub declared_size: usize,
    pub reader: Option<Box<dyn Read + Send>>,
    error: Option<ClientError>,
}

impl V1FetchJob {
    pub fn new(
        layer_id: String,
        endpoints: Vec<String>,
        tokens: Vec<String>,
        registry: Arc<dyn V1Registry>,
    ) -> Self {
        V1FetchJob {
            layer_id,
            endpoints,
            tokens,
            registry,
            json: None,
            declared_size: 0,
            reader: None,
            error: None,
        }
    }
}

impl Job for V1FetchJob {
    fn id(&self) -> &str {
        &self.layer_id
    }

    fn start(&mut self) {
        let mut last_err: Option<RegistryError> = None;

        for endpoint in &self.endpoints {
            let json_result = self
                .registry
                .get_remote_image_json(endpoint, &self.layer_id, &self.tokens);
            let (json, declared_size) = match json_result {
                Ok(v) => v,
                Err(e) => {
                    last_err = Some(e);
                    continue;
                }
            };

            let layer_result = self.registry.get_remote_image_layer(
                endpoint,
                &self.layer_id,
                &self.tokens,
                declared_size,
            );
            match layer_result {
                Ok(reader) => {
                    self.json = Some(json);
                    self.declared_size = declared_size;
                    self.reader = Some(reader);
                    return;
                }
                Err(e) => {
                    last_err = Some(e);
                    continue;
                }
            }
        }

        self.error = Some(match last_err {
            Some(e) => ClientError::RegistryFatal(e),
            None => ClientError::RegistryFatal(RegistryError::Fatal(
                "no endpoints configured".to_string(),
            )),
        });
    }

    fn error(&self) -> Option<&ClientError> {
        self.error.as_ref()
    }
}

/// Fetches one V2 blob by digest and wraps its reader in a
/// [`TarsumReader`] so bytes the applier consumes are hashed on the
/// fly, ready for verification against the manifest digest once the
/// stream is drained.
pub struct V2FetchJob {
    pub digest: String,
    endpoint: String,
    repository_name: String,
    registry: Arc<dyn V2Registry>,

    pub reader: Option<TarsumReader<Box<dyn Read + Send>>>,
    error: Option<ClientError>,
}

impl V2FetchJob {
    pub fn new(
        digest: String,
        endpoint: String,
        repository_name: String,
        registry: Arc<dyn V2Registry>,
    ) -> Self {
        V2FetchJob {
            digest,
            endpoint,
            repository_name,
            registry,
            reader: None,
            error: None,
        }
    }
}

impl Job for V2FetchJob {
    fn id(&self) -> &str {
        &self.digest
    }

    fn start(&mut self) {
        let algorithm = match self
            .digest
            .split_once(':')
            .and_then(|(algo, _)| TarsumAlgorithm::from_label(algo))
        {
            Some(a) => a,
            None => {
                self.error = Some(ClientError::InvalidDigest(self.digest.clone()));
                return;
            }
        };

        match self
            .registry
            .get_blob_reader(&self.endpoint, &self.repository_name, &self.digest)
        {
            Ok((reader, _size)) => {
                self.reader = Some(TarsumReader::new(reader, algorithm));
            }
            Err(e) => {
                self.error = Some(ClientError::RegistryFatal(e));
            }
        }
    }

    fn error(&self) -> Option<&ClientError> {
        self.error.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RepositoryData;
    use std::collections::HashMap;
    use std::io::Cursor;

    struct FakeV1 {
        json: Vec<u8>,
        layer_bytes: Vec<u8>,
        fail_first_endpoint: bool,
    }

    impl V1Registry for FakeV1 {
        fn get_repository_data(&self, _repo: &str) -> Result<RepositoryData, RegistryError> {
            unimplemented!("not exercised by this job test")
        }

        fn get_remote_tags(
            &self,
            _e: &str,
            _r: &str,
            _t: &[String],
        ) -> Result<HashMap<String, String>, RegistryError> {
            unimplemented!()
        }

        fn get_remote_history(
            &self,
            _e: &str,
            _i: &str,
            _t: &[String],
        ) -> Result<Vec<String>, RegistryError> {
            unimplemented!()
        }

        fn get_remote_image_json(
            &self,
            endpoint: &str,
            _image_id: &str,
            _tokens: &[String],
        ) -> Result<(Vec<u8>, usize), RegistryError> {
            if self.fail_first_endpoint && endpoint == "endpoint-a" {
                return Err(RegistryError::Transient("down".to_string()));
            }
            Ok((self.json.clone(), self.layer_bytes.len()))
        }

        fn get_remote_image_layer(
            &self,
            _endpoint: &str,
            _image_id: &str,
            _tokens: &[String],
            _declared_size: usize,
        ) -> Result<Box<dyn Read + Send>, RegistryError> {
            Ok(Box::new(Cursor::new(self.layer_bytes.clone())))
        }

        fn lookup_remote_image(
            &self,
            _e: &str,
            _i: &str,
            _t: &[String],
        ) -> Result<bool, RegistryError> {
            unimplemented!()
        }

        fn push_image_json_index(
            &self,
            _repository_name: &str,
            _index: &[crate::registry::ImageIndexEntry],
            _finalize: bool,
            _endpoints: Option<&[String]>,
        ) -> Result<RepositoryData, RegistryError> {
            unimplemented!()
        }

        fn push_json(
            &self,
            _e: &str,
            _i: &str,
            _j: &[u8],
            _t: &[String],
        ) -> Result<(), RegistryError> {
            unimplemented!()
        }

        fn push_layer(
            &self,
            _e: &str,
            _i: &str,
            _l: &mut dyn Read,
            _t: &[String],
        ) -> Result<(String, Vec<u8>), RegistryError> {
            unimplemented!()
        }

        fn push_checksum(
            &self,
            _e: &str,
            _i: &str,
            _c: &str,
            _p: &[u8],
            _t: &[String],
        ) -> Result<(), RegistryError> {
            unimplemented!()
        }

        fn push_tag(
            &self,
            _e: &str,
            _r: &str,
            _i: &str,
            _t: &str,
            _tk: &[String],
        ) -> Result<(), RegistryError> {
            unimplemented!()
        }
    }

    #[test]
    fn v1_fetch_job_falls_back_to_next_endpoint() {
        let registry = Arc::new(FakeV1 {
            json: br#"{"id":"abc"}"#.to_vec(),
            layer_bytes: b"tar-bytes".to_vec(),
            fail_first_endpoint: true,
        });
        let mut job = V1FetchJob::new(
            "abc".to_string(),
            vec!["endpoint-a".to_string(), "endpoint-b".to_string()],
            vec![],
            registry,
        );
        job.start();
        assert!(job.error().is_none());
        assert_eq!(job.json.as_deref(), Some(&br#"{"id":"abc"}"#[..]));
        assert_eq!(job.declared_size, 9);
    }

    #[test]
    fn v1_fetch_job_surfaces_error_when_every_endpoint_fails() {
        struct AlwaysFails;
        impl V1Registry for AlwaysFails {
            fn get_repository_data(&self, _: &str) -> Result<RepositoryData, RegistryError> {
                unimplemented!()
            }
            fn get_remote_tags(
                &self,
                _: &str,
                _: &str,
                _: &[String],
            ) -> Result<HashMap<String, String>, RegistryError> {
                unimplemented!()
            }
            fn get_remote_history(
                &self,
                _: &str,
                _: &str,
                _: &[String],
            ) -> Result<Vec<String>, RegistryError> {
                unimplemented!()
            }
            fn get_remote_image_json(
                &self,
                _: &str,
                _: &str,
                _: &[String],
            ) -> Result<(Vec<u8>, usize), RegistryError> {
                Err(RegistryError::Transient("down".to_string()))
            }
            fn get_remote_image_layer(
                &self,
                _: &str,
                _: &str,
                _: &[String],
                _: usize,
            ) -> Result<Box<dyn Read + Send>, RegistryError> {
                unimplemented!()
            }
            fn lookup_remote_image(&self, _: &str, _: &str, _: &[String]) -> Result<bool, RegistryError> {
                unimplemented!()
            }
            fn push_image_json_index(
                &self,
                _: &str,
                _: &[crate::registry::ImageIndexEntry],
                _: bool,
                _: Option<&[String]>,
            ) -> Result<RepositoryData, RegistryError> {
                unimplemented!()
            }
            fn push_json(&self, _: &str, _: &str, _: &[u8], _: &[String]) -> Result<(), RegistryError> {
                unimplemented!()
            }
            fn push_layer(
                &self,
                _: &str,
                _: &str,
                _: &mut dyn Read,
                _: &[String],
            ) -> Result<(String, Vec<u8>), RegistryError> {
                unimplemented!()
            }
            fn push_checksum(
                &self,
                _: &str,
                _: &str,
                _: &str,
                _: &[u8],
                _: &[String],
            ) -> Result<(), RegistryError> {
                unimplemented!()
            }
            fn push_tag(
                &self,
                _: &str,
                _: &str,
                _: &str,
                _: &str,
                _: &[String],
            ) -> Result<(), RegistryError> {
                unimplemented!()
            }
        }

        let mut job = V1FetchJob::new(
            "abc".to_string(),
            vec!["endpoint-a".to_string()],
            vec![],
            Arc::new(AlwaysFails),
        );
        job.start();
        assert!(job.error().is_some());
        assert!(job.json.is_none());
    }

    #[test]
    fn v2_fetch_job_rejects_malformed_digest() {
        struct UnusedV2;
        impl V2Registry for UnusedV2 {
            fn resolve_endpoint(&self, _: &str) -> Result<String, RegistryError> {
                unimplemented!()
            }
            fn get_image_manifest(
                &self,
                _: &str,
                _: &str,
                _: &str,
            ) -> Result<crate::registry::ManifestData, RegistryError> {
                unimplemented!()
            }
            fn head_blob(&self, _: &str, _: &str, _: &str) -> Result<bool, RegistryError> {
                unimplemented!()
            }
            fn get_blob_reader(
                &self,
                _: &str,
                _: &str,
                _: &str,
            ) -> Result<(Box<dyn Read + Send>, u64), RegistryError> {
                unimplemented!()
            }
            fn put_blob(
                &self,
                _: &str,
                _: &str,
                _: &str,
                _: &mut dyn Read,
            ) -> Result<(), RegistryError> {
                unimplemented!()
            }
            fn put_manifest(
                &self,
                _: &str,
                _: &str,
                _: &str,
                _: &crate::registry::ManifestData,
            ) -> Result<(), RegistryError> {
                unimplemented!()
            }
        }

        let mut job = V2FetchJob::new(
            "not-a-digest".to_string(),
            "https://registry.example".to_string(),
            "library/ubuntu".to_string(),
            Arc::new(UnusedV2),
        );
        job.start();
        assert!(matches!(job.error(), Some(ClientError::InvalidDigest(_))));
    }
}
