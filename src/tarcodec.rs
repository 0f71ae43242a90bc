//! The tar codec capability consumed by the core.
//!
//! Decoding and re-encoding tar archives, and the AUFS whiteout
//! convention layered on top of them, is treated as an external
//! capability rather than something the core implements against a
//! specific tar crate. A caller supplies a `TarCodec` implementation;
//! the core only needs to apply a layer's byte stream to a directory
//! and, in the other direction, turn a changeset into a tar byte
//! stream to push.

use std::io::Read;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TarError {
    #[error("malformed tar entry: {0}")]
    MalformedEntry(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The kind of filesystem change a changeset entry represents, as
/// reported by the layer store's diff and translated into tar/whiteout
/// form on export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Add,
    Modify,
    Delete,
}

/// Decodes and encodes the tar byte streams flowing in and out of a
/// layer store. Implementations own the choice of tar crate and of
/// whether to decompress (gzip) before decoding; the core only ever
/// sees already-decompressed bytes (the job queue's fetch stage is
/// responsible for any decompression upstream of `apply_layer`).
pub trait TarCodec: Send + Sync {
    /// Extract `layer`'s tar stream into `dest`, applying AUFS
    /// whiteout semantics: a `.wh.<name>` entry deletes `<name>` in the
    /// same directory instead of being materialized, and a
    /// `.wh..wh..opq` entry marks its directory opaque (passed through
    /// to the layer store rather than synthesized here).
    /// `restore_ownership` toggles `lchown` calls; callers disable it
    /// on non-Linux hosts.
    fn apply_layer(
        &self,
        dest: &Path,
        layer: &mut dyn Read,
        restore_ownership: bool,
    ) -> Result<(), TarError>;

    /// Encode `changes` (rooted at `root`) into a streaming tar archive.
    /// A `Delete` entry is encoded as a `.wh.<basename>` marker rather
    /// than reading `root` for that path.
    fn export_changes(
        &self,
        root: &Path,
        changes: &[(ChangeKind, PathBuf)],
    ) -> Result<Box<dyn Read + Send>, TarError>;
}

/// Build the whiteout entry name for a deleted path, e.g. `etc/passwd`
/// becomes `etc/.wh.passwd`.
pub fn whiteout_name(repo_relative_path: &str) -> String {
    match repo_relative_path.rsplit_once('/') {
        Some((dir, base)) => format!("{dir}/.wh.{base}"),
        None => format!(".wh.{repo_relative_path}"),
    }
}

/// The reserved marker name for an opaque directory.
pub const OPAQUE_MARKER: &str = ".wh..wh..opq";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whiteout_name_nested_path() {
        assert_eq!(whiteout_name("etc/passwd"), "etc/.wh.passwd");
    }

    #[test]
    fn whiteout_name_top_level_path() {
        assert_eq!(whiteout_name("passwd"), ".wh.passwd");
    }
}
