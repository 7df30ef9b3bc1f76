//! Configuration file: a list of mappings, one per synchronized kind.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::descriptor::{DescriptorError, ResourceConfig, ResourceDescriptor};

pub const CONFIG_VERSION: &str = "v1";

fn default_version() -> String {
    CONFIG_VERSION.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub mappings: Vec<ResourceConfig>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading config {path}: {source}", path = path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("unsupported config version {0:?} (expected {CONFIG_VERSION})")]
    UnsupportedVersion(String),
    #[error("config declares no mappings")]
    Empty,
    #[error("duplicate mapping for {0}")]
    Duplicate(String),
    #[error("mapping {key}: {source}")]
    Descriptor {
        key: String,
        #[source]
        source: DescriptorError,
    },
}

impl SyncConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let cfg: SyncConfig = serde_yaml::from_str(yaml)?;
        if cfg.version != CONFIG_VERSION {
            return Err(ConfigError::UnsupportedVersion(cfg.version));
        }
        Ok(cfg)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        debug!(path = %path.display(), bytes = raw.len(), "loaded config");
        Self::from_yaml(&raw)
    }

    /// Build and validate one descriptor per mapping.
    pub fn descriptors(&self) -> Result<Vec<ResourceDescriptor>, ConfigError> {
        if self.mappings.is_empty() {
            return Err(ConfigError::Empty);
        }
        let mut seen = std::collections::BTreeSet::new();
        let mut out = Vec::with_capacity(self.mappings.len());
        for m in self.mappings.iter() {
            let key = format!("{}/{}", m.api_version, m.kind);
            if !seen.insert(key.clone()) {
                return Err(ConfigError::Duplicate(key));
            }
            let d = ResourceDescriptor::new(m.clone()).map_err(|source| ConfigError::Descriptor { key, source })?;
            out.push(d);
        }
        Ok(out)
    }

    /// Descriptor for `kind`, matched case-insensitively against the kind or
    /// the full `apiVersion/Kind` key.
    pub fn descriptor_for(&self, kind: &str) -> Result<Option<ResourceDescriptor>, ConfigError> {
        Ok(self
            .descriptors()?
            .into_iter()
            .find(|d| d.kind().eq_ignore_ascii_case(kind) || d.gvk_key().eq_ignore_ascii_case(kind)))
    }
}
