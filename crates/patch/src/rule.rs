//! Declarative patch rules as they appear in configuration.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use vsync_core::{Path, PathError};

/// Which document a rule reads from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    /// The document being patched.
    #[serde(rename = "self", alias = "primary")]
    Primary,
    /// The object on the other plane.
    #[default]
    #[serde(rename = "counterpart", alias = "other")]
    Counterpart,
}

impl Side {
    fn primary() -> Self {
        Side::Primary
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum PatchOp {
    /// Write a literal value, creating intermediate nodes.
    #[serde(alias = "add")]
    Set { path: String, value: Json },
    /// Write a literal value only where the path already exists.
    Replace { path: String, value: Json },
    Remove { path: String },
    /// Copy a value from `from_path` (default: `path`) of the `from` document.
    #[serde(alias = "copyFromObject", rename_all = "camelCase")]
    Copy {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from_path: Option<String>,
        #[serde(default)]
        from: Side,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<Json>,
    },
    /// Pass the name(s) at `path` through the name resolver.
    #[serde(rename_all = "camelCase")]
    RewriteName {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        namespace_path: Option<String>,
    },
}

impl PatchOp {
    /// Target path in the primary document.
    pub fn path(&self) -> &str {
        match self {
            PatchOp::Set { path, .. }
            | PatchOp::Replace { path, .. }
            | PatchOp::Remove { path }
            | PatchOp::Copy { path, .. }
            | PatchOp::RewriteName { path, .. } => path,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PatchOp::Set { .. } => "set",
            PatchOp::Replace { .. } => "replace",
            PatchOp::Remove { .. } => "remove",
            PatchOp::Copy { .. } => "copy",
            PatchOp::RewriteName { .. } => "rewriteName",
        }
    }
}

/// Guard on a rule. Every given check must hold, otherwise the rule is skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub path: String,
    #[serde(default = "Side::primary")]
    pub on: Side,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equal: Option<Json>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_equal: Option<Json>,
    /// `true`: missing, null or empty. `false`: present and non-empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub empty: Option<bool>,
}

impl Condition {
    /// Holds when `path` on `on` is present and non-empty.
    pub fn exists(path: impl Into<String>, on: Side) -> Self {
        Self { path: path.into(), on, equal: None, not_equal: None, empty: Some(false) }
    }

    pub fn equals(path: impl Into<String>, on: Side, value: Json) -> Self {
        Self { path: path.into(), on, equal: Some(value), not_equal: None, empty: None }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchRule {
    #[serde(flatten)]
    pub op: PatchOp,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl PatchRule {
    pub fn new(op: PatchOp) -> Self {
        Self { op, conditions: Vec::new() }
    }

    pub fn set(path: impl Into<String>, value: Json) -> Self {
        Self::new(PatchOp::Set { path: path.into(), value })
    }

    pub fn remove(path: impl Into<String>) -> Self {
        Self::new(PatchOp::Remove { path: path.into() })
    }

    /// Copy `from_path` of the counterpart into `path`.
    pub fn copy(from_path: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(PatchOp::Copy { path: path.into(), from_path: Some(from_path.into()), from: Side::Counterpart, default: None })
    }

    pub fn rewrite_name(path: impl Into<String>) -> Self {
        Self::new(PatchOp::RewriteName { path: path.into(), namespace_path: None })
    }

    pub fn when(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Parse every path the rule mentions.
    pub fn validate(&self) -> Result<(), PathError> {
        Path::parse(self.op.path())?;
        match &self.op {
            PatchOp::Copy { from_path: Some(p), .. } => {
                Path::parse(p)?;
            }
            PatchOp::RewriteName { namespace_path: Some(p), .. } => {
                Path::parse(p)?;
            }
            _ => {}
        }
        for c in self.conditions.iter() {
            Path::parse(&c.path)?;
        }
        Ok(())
    }
}
