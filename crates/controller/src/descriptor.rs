//! Immutable per-kind synchronization settings.

use kube::core::GroupVersionKind;
use serde::{Deserialize, Serialize};
use vsync_core::PathError;
use vsync_patch::PatchRule;

use crate::object::SyncObject;
use crate::selector::{self, Selector, SelectorConfig, SelectorParseError};

/// One mapping as written in the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceConfig {
    pub kind: String,
    pub api_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<SelectorConfig>,
    /// Virtual -> physical rules.
    #[serde(default)]
    pub patches: Vec<PatchRule>,
    /// Physical -> virtual rules.
    #[serde(default)]
    pub reverse_patches: Vec<PatchRule>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Reverse,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Direction::Forward => "patches",
            Direction::Reverse => "reversePatches",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    #[error("kind must not be empty")]
    MissingKind,
    #[error("apiVersion must not be empty")]
    MissingApiVersion,
    #[error("parse label selector: {0}")]
    Selector(#[from] SelectorParseError),
    #[error("{direction} rule #{index}: {source}")]
    Rule {
        direction: Direction,
        index: usize,
        #[source]
        source: PathError,
    },
}

#[derive(Debug, Clone)]
pub struct ResourceDescriptor {
    kind: String,
    api_version: String,
    selector: Option<Selector>,
    patches: Vec<PatchRule>,
    reverse_patches: Vec<PatchRule>,
}

impl ResourceDescriptor {
    /// Validate a configured mapping. Bad selectors and unparsable rule
    /// paths reject the descriptor before any reconciliation runs.
    pub fn new(cfg: ResourceConfig) -> Result<Self, DescriptorError> {
        if cfg.kind.trim().is_empty() {
            return Err(DescriptorError::MissingKind);
        }
        if cfg.api_version.trim().is_empty() {
            return Err(DescriptorError::MissingApiVersion);
        }
        let selector = match &cfg.selector {
            Some(s) => Selector::parse(s)?,
            None => None,
        };
        for (direction, rules) in [(Direction::Forward, &cfg.patches), (Direction::Reverse, &cfg.reverse_patches)] {
            for (index, rule) in rules.iter().enumerate() {
                rule.validate().map_err(|source| DescriptorError::Rule { direction, index, source })?;
            }
        }
        Ok(Self {
            kind: cfg.kind,
            api_version: cfg.api_version,
            selector,
            patches: cfg.patches,
            reverse_patches: cfg.reverse_patches,
        })
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    pub fn selector(&self) -> Option<&Selector> {
        self.selector.as_ref()
    }

    pub fn patches(&self) -> &[PatchRule] {
        &self.patches
    }

    pub fn reverse_patches(&self) -> &[PatchRule] {
        &self.reverse_patches
    }

    pub fn rules(&self, direction: Direction) -> &[PatchRule] {
        match direction {
            Direction::Forward => &self.patches,
            Direction::Reverse => &self.reverse_patches,
        }
    }

    pub fn gvk(&self) -> GroupVersionKind {
        let (group, version) = match self.api_version.split_once('/') {
            Some((g, v)) => (g, v),
            None => ("", self.api_version.as_str()),
        };
        GroupVersionKind::gvk(group, version, &self.kind)
    }

    /// `group/version/Kind`, or `version/Kind` for the core group.
    pub fn gvk_key(&self) -> String {
        format!("{}/{}", self.api_version, self.kind)
    }

    pub fn matches<O: SyncObject>(&self, obj: &O) -> bool {
        selector::matches(obj, self.selector())
    }
}
