//! vsync core types: the semantic document tree, paths into it, and diffs.

#![forbid(unsafe_code)]

pub mod diff;
pub mod doc;
pub mod path;

pub use diff::{diff_summary, is_noop_patch, merge_patch, DiffSummary};
pub use doc::{structurally_equal, DocError, Node, Scalar};
pub use path::{Path, PathError, Segment};

/// Object <-> document tree conversion failure.
#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("serializing object: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("deserializing object: {0}")]
    Deserialize(#[source] serde_json::Error),
    #[error("document root must be a mapping, found {0}")]
    NotAMapping(&'static str),
    #[error("object has no metadata.name")]
    MissingName,
}

/// Object key on one plane: `(namespace, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: Option<&str>, name: &str) -> Self {
        Self { namespace: namespace.map(str::to_string), name: name.to_string() }
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => f.write_str(&self.name),
        }
    }
}
