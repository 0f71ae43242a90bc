//! In-memory stand-ins for `V1Registry`, `V2Registry`, and `TarCodec`,
//! wired only behind `--dry-run` so the CLI has something to exercise
//! without a real registry or tar dependency. A real deployment
//! supplies its own implementations against an HTTP client and a tar
//! crate; these are demo fixtures, not the core.

use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use krogon::config::RegistrySession;
use krogon::registry::{
    FsLayer, ImageIndexEntry, ManifestData, RegistryError, RepositoryData, V1Registry, V2Registry,
};
use krogon::tarcodec::{ChangeKind, TarCodec, TarError};

const DEMO_IMAGE_ID: &str = "0000000000000000000000000000000000000000000000000000000000000001";
const DEMO_LAYER_CONTENT: &[u8] = b"hello from the demo layer\n";

/// A single-layer V1 registry that always succeeds, used for
/// `--dry-run`. The token it hands back reflects whether the session
/// it was built with is anonymous or authenticated.
pub struct DemoV1Registry {
    session: RegistrySession,
    pushed: Mutex<Vec<String>>,
}

impl DemoV1Registry {
    pub fn new(session: RegistrySession) -> Self {
        DemoV1Registry {
            session,
            pushed: Mutex::new(Vec::new()),
        }
    }

    fn token(&self) -> String {
        match &self.session {
            RegistrySession::Anonymous => "demo-token-anonymous".to_string(),
            RegistrySession::Authenticated { username, .. } => {
                format!("demo-token-authenticated-{username}")
            }
        }
    }
}

impl V1Registry for DemoV1Registry {
    fn get_repository_data(&self, _repository_name: &str) -> Result<RepositoryData, RegistryError> {
        Ok(RepositoryData {
            endpoints: vec!["demo://localhost".to_string()],
            tokens: vec![self.token()],
        })
    }

    fn get_remote_tags(
        &self,
        _endpoint: &str,
        _repository_name: &str,
        _tokens: &[String],
    ) -> Result<HashMap<String, String>, RegistryError> {
        let mut tags = HashMap::new();
        tags.insert("latest".to_string(), DEMO_IMAGE_ID.to_string());
        Ok(tags)
    }

    fn get_remote_history(
        &self,
        _endpoint: &str,
        image_id: &str,
        _tokens: &[String],
    ) -> Result<Vec<String>, RegistryError> {
        Ok(vec![image_id.to_string()])
    }

    fn get_remote_image_json(
        &self,
        _endpoint: &str,
        image_id: &str,
        _tokens: &[String],
    ) -> Result<(Vec<u8>, usize), RegistryError> {
        let json = format!(r#"{{"id":"{image_id}","parent":null}}"#).into_bytes();
        Ok((json, DEMO_LAYER_CONTENT.len()))
    }

    fn get_remote_image_layer(
        &self,
        _endpoint: &str,
        _image_id: &str,
        _tokens: &[String],
        _declared_size: usize,
    ) -> Result<Box<dyn Read + Send>, RegistryError> {
        Ok(Box::new(Cursor::new(
            minimal_tar::single_file_archive("hello.txt", DEMO_LAYER_CONTENT),
        )))
    }

    fn lookup_remote_image(
        &self,
        _endpoint: &str,
        image_id: &str,
        _tokens: &[String],
    ) -> Result<bool, RegistryError> {
        Ok(self.pushed.lock().unwrap().iter().any(|id| id == image_id))
    }

    fn push_image_json_index(
        &self,
        _repository_name: &str,
        _index: &[ImageIndexEntry],
        _finalize: bool,
        _endpoints: Option<&[String]>,
    ) -> Result<RepositoryData, RegistryError> {
        Ok(RepositoryData {
            endpoints: vec!["demo://localhost".to_string()],
            tokens: vec![self.token()],
        })
    }

    fn push_json(
        &self,
        _endpoint: &str,
        _image_id: &str,
        _json: &[u8],
        _tokens: &[String],
    ) -> Result<(), RegistryError> {
        Ok(())
    }

    fn push_layer(
        &self,
        _endpoint: &str,
        image_id: &str,
        _layer: &mut dyn Read,
        _tokens: &[String],
    ) -> Result<(String, Vec<u8>), RegistryError> {
        self.pushed.lock().unwrap().push(image_id.to_string());
        Ok(("tarsum.dev+sha256:demo".to_string(), Vec::new()))
    }

    fn push_checksum(
        &self,
        _endpoint: &str,
        _image_id: &str,
        _checksum: &str,
        _checksum_payload: &[u8],
        _tokens: &[String],
    ) -> Result<(), RegistryError> {
        Ok(())
    }

    fn push_tag(
        &self,
        _endpoint: &str,
        _repository_name: &str,
        _image_id: &str,
        _tag: &str,
        _tokens: &[String],
    ) -> Result<(), RegistryError> {
        Ok(())
    }
}

/// A single-blob V2 registry for `--v2 --dry-run`.
pub struct DemoV2Registry {
    session: RegistrySession,
}

impl DemoV2Registry {
    pub fn new(session: RegistrySession) -> Self {
        DemoV2Registry { session }
    }
}

impl V2Registry for DemoV2Registry {
    fn resolve_endpoint(&self, _repository_name: &str) -> Result<String, RegistryError> {
        if self.session.is_anonymous() {
            Ok("demo://localhost".to_string())
        } else {
            Ok("demo://localhost/authenticated".to_string())
        }
    }

    fn get_image_manifest(
        &self,
        _endpoint: &str,
        name: &str,
        tag: &str,
    ) -> Result<ManifestData, RegistryError> {
        let digest = format!(
            "tarsum.dev+sha256:{}",
            demo_digest_hex(DEMO_LAYER_CONTENT)
        );
        Ok(ManifestData {
            name: name.to_string(),
            tag: tag.to_string(),
            fs_layers: vec![FsLayer { blob_sum: digest }],
        })
    }

    fn head_blob(
        &self,
        _endpoint: &str,
        _repository_name: &str,
        _digest: &str,
    ) -> Result<bool, RegistryError> {
        Ok(false)
    }

    fn get_blob_reader(
        &self,
        _endpoint: &str,
        _repository_name: &str,
        _digest: &str,
    ) -> Result<(Box<dyn Read + Send>, u64), RegistryError> {
        let archive = minimal_tar::single_file_archive("hello.txt", DEMO_LAYER_CONTENT);
        let size = archive.len() as u64;
        Ok((Box::new(Cursor::new(archive)), size))
    }

    fn put_blob(
        &self,
        _endpoint: &str,
        _repository_name: &str,
        _digest: &str,
        _data: &mut dyn Read,
    ) -> Result<(), RegistryError> {
        Ok(())
    }

    fn put_manifest(
        &self,
        _endpoint: &str,
        _repository_name: &str,
        _tag: &str,
        _manifest: &ManifestData,
    ) -> Result<(), RegistryError> {
        Ok(())
    }
}

fn demo_digest_hex(data: &[u8]) -> String {
    use sha2::Digest;
    hex::encode(sha2::Sha256::digest(data))
}

/// A minimal tar codec, enough to round-trip the demo layer's single
/// file. Real deployments bring their own `TarCodec` against a proper
/// tar crate; this one only understands flat regular files plus
/// whiteout markers, which is all the demo path ever produces.
pub struct DemoTarCodec;

impl TarCodec for DemoTarCodec {
    fn apply_layer(
        &self,
        dest: &Path,
        layer: &mut dyn Read,
        _restore_ownership: bool,
    ) -> Result<(), TarError> {
        let mut bytes = Vec::new();
        layer.read_to_end(&mut bytes)?;
        for (name, content) in minimal_tar::read_entries(&bytes)? {
            if let Some(target) = name.strip_prefix(".wh.") {
                let _ = std::fs::remove_file(dest.join(target));
                continue;
            }
            let path = dest.join(&name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, content)?;
        }
        Ok(())
    }

    fn export_changes(
        &self,
        root: &Path,
        changes: &[(ChangeKind, PathBuf)],
    ) -> Result<Box<dyn Read + Send>, TarError> {
        let mut out = Vec::new();
        for (kind, path) in changes {
            match kind {
                ChangeKind::Delete => {
                    let name = format!(
                        ".wh.{}",
                        path.file_name().and_then(|n| n.to_str()).unwrap_or("")
                    );
                    minimal_tar::write_entry(&mut out, &name, &[])?;
                }
                ChangeKind::Add | ChangeKind::Modify => {
                    let content = std::fs::read(root.join(path))?;
                    let name = path.to_string_lossy().into_owned();
                    minimal_tar::write_entry(&mut out, &name, &content)?;
                }
            }
        }
        Ok(Box::new(Cursor::new(out)))
    }
}

/// A deliberately tiny, non-POSIX-compliant tar-like container used
/// only by the demo codec above: `<8-hex-len-name>\0<name><8-hex-len-body>\0<body>`
/// repeated. It is not wire-compatible with real tar; production code
/// must supply a `TarCodec` backed by an actual tar implementation.
mod minimal_tar {
    use std::io::Write;

    use krogon::tarcodec::TarError;

    pub fn write_entry(out: &mut Vec<u8>, name: &str, body: &[u8]) -> Result<(), TarError> {
        write!(out, "{:08x}", name.len()).map_err(TarError::Io)?;
        out.extend_from_slice(name.as_bytes());
        write!(out, "{:08x}", body.len()).map_err(TarError::Io)?;
        out.extend_from_slice(body);
        Ok(())
    }

    pub fn single_file_archive(name: &str, body: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        write_entry(&mut out, name, body).expect("writing to a Vec never fails");
        out
    }

    pub fn read_entries(bytes: &[u8]) -> Result<Vec<(String, Vec<u8>)>, TarError> {
        let mut entries = Vec::new();
        let mut cursor = 0;
        while cursor < bytes.len() {
            let name_len = read_hex_len(bytes, &mut cursor)?;
            let name = String::from_utf8(bytes[cursor..cursor + name_len].to_vec())
                .map_err(|e| TarError::MalformedEntry(e.to_string()))?;
            cursor += name_len;
            let body_len = read_hex_len(bytes, &mut cursor)?;
            let body = bytes[cursor..cursor + body_len].to_vec();
            cursor += body_len;
            entries.push((name, body));
        }
        Ok(entries)
    }

    fn read_hex_len(bytes: &[u8], cursor: &mut usize) -> Result<usize, TarError> {
        if *cursor + 8 > bytes.len() {
            return Err(TarError::MalformedEntry("truncated length field".to_string()));
        }
        let field = std::str::from_utf8(&bytes[*cursor..*cursor + 8])
            .map_err(|e| TarError::MalformedEntry(e.to_string()))?;
        let len = usize::from_str_radix(field, 16)
            .map_err(|e| TarError::MalformedEntry(e.to_string()))?;
        *cursor += 8;
        Ok(len)
    }
}
