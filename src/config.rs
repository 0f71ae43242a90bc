//! Ambient configuration carried alongside the core pipelines: job queue
//! concurrency, ownership-restoration policy, the scratch directory
//! used for push-time temporary archives, and the registry session a
//! pull/push is authorized under.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Distinguishes an anonymous registry session from one built with
/// parsed `<user>:<password>` credentials, kept as its own variant
/// rather than collapsed into "credentials or not" so a caller's
/// registry implementation can branch on it when building whatever
/// auth header its transport needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrySession {
    Anonymous,
    Authenticated { username: String, password: String },
}

impl RegistrySession {
    /// Build a session from parsed credentials; empty username and
    /// password (the anonymous/malformed-input case from
    /// `parse_credentials`) yields `Anonymous`.
    pub fn from_credentials(username: String, password: String) -> Self {
        if username.is_empty() && password.is_empty() {
            RegistrySession::Anonymous
        } else {
            RegistrySession::Authenticated { username, password }
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, RegistrySession::Anonymous)
    }
}

/// Tunables for a [`crate::queue::JobQueue`]-driven pull or push.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Maximum number of fetch jobs running at once.
    pub concurrency: usize,
    /// Whether the tar codec should attempt to restore file ownership
    /// (`lchown`) while applying a layer. Forced off on non-Linux hosts
    /// regardless of this value, to avoid privilege errors.
    pub restore_ownership: bool,
    /// Directory used for temporary push-time archives.
    pub temp_dir: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            concurrency: 7,
            restore_ownership: cfg!(target_os = "linux"),
            temp_dir: std::env::temp_dir(),
        }
    }
}

impl ClientConfig {
    /// Load a config from a TOML file, falling back to defaults for any
    /// field the file doesn't set.
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// Whether ownership restoration should actually be attempted,
    /// folding in the host-platform override.
    pub fn effective_restore_ownership(&self) -> bool {
        self.restore_ownership && cfg!(target_os = "linux")
    }
}

/// Static identity of this build, backing the `version` CLI subcommand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub supported_schemas: &'static [&'static str],
}

impl ClientInfo {
    pub const CURRENT: ClientInfo = ClientInfo {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        supported_schemas: &["v1", "v2"],
    };
}

impl std::fmt::Display for ClientInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} (schemas: {})",
            self.name,
            self.version,
            self.supported_schemas.join(", ")
        )
    }
}
