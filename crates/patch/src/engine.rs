//! Applies an ordered list of patch rules to a document tree.

use tracing::{debug, trace};
use vsync_core::{DocError, Node, Path, PathError};

use crate::names::{NameResolver, ResolveError};
use crate::rule::{Condition, PatchOp, PatchRule, Side};

/// Per-call inputs besides the two trees.
pub struct PatchContext<'a> {
    /// Namespace of the virtual object; default scope for name rewrites.
    pub namespace: &'a str,
    pub resolver: &'a dyn NameResolver,
}

#[derive(Debug, thiserror::Error)]
pub enum TransformErrorKind {
    #[error("invalid path: {0}")]
    InvalidPath(#[from] PathError),
    #[error(transparent)]
    Document(#[from] DocError),
    #[error("no counterpart document to read {0:?} from")]
    MissingCounterpart(String),
    #[error("source path {0:?} not found")]
    MissingSource(String),
    #[error("expected a name or list of names, found {0}")]
    NotAName(&'static str),
    #[error("name resolution failed: {0}")]
    Resolve(#[from] ResolveError),
}

/// Failure of one rule. Earlier rules have already been applied.
#[derive(Debug, thiserror::Error)]
#[error("rule #{index} ({op} {path}): {kind}")]
pub struct TransformError {
    pub index: usize,
    pub op: &'static str,
    pub path: String,
    #[source]
    pub kind: TransformErrorKind,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyStats {
    pub applied: usize,
    pub skipped: usize,
}

/// Stateless rule interpreter.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatchEngine;

impl PatchEngine {
    pub fn new() -> Self {
        Self
    }

    /// Apply `rules` in order to `primary`, reading from `counterpart` where a
    /// rule asks for it. Stops at the first failing rule without rolling back.
    pub fn apply(
        &self,
        primary: &mut Node,
        counterpart: Option<&Node>,
        rules: &[PatchRule],
        ctx: &PatchContext<'_>,
    ) -> Result<ApplyStats, TransformError> {
        let mut stats = ApplyStats::default();
        for (index, rule) in rules.iter().enumerate() {
            let fail = |kind: TransformErrorKind| TransformError {
                index,
                op: rule.op.name(),
                path: rule.op.path().to_string(),
                kind,
            };
            if !guards_hold(&rule.conditions, primary, counterpart).map_err(fail)? {
                debug!(index, op = rule.op.name(), path = rule.op.path(), "rule skipped: conditions not met");
                stats.skipped += 1;
                continue;
            }
            if apply_rule(&rule.op, primary, counterpart, ctx).map_err(fail)? {
                stats.applied += 1;
            } else {
                stats.skipped += 1;
            }
        }
        trace!(applied = stats.applied, skipped = stats.skipped, "patches applied");
        Ok(stats)
    }
}

fn guards_hold(conditions: &[Condition], primary: &Node, counterpart: Option<&Node>) -> Result<bool, TransformErrorKind> {
    for c in conditions {
        let path = Path::parse(&c.path)?;
        let tree = match c.on {
            Side::Primary => Some(primary),
            Side::Counterpart => counterpart,
        };
        let value = tree.and_then(|t| t.get(&path));
        if let Some(want_empty) = c.empty {
            if value.map(Node::is_empty).unwrap_or(true) != want_empty {
                return Ok(false);
            }
        }
        if let Some(expected) = &c.equal {
            let expected = Node::from_json(expected.clone());
            if value != Some(&expected) {
                return Ok(false);
            }
        }
        if let Some(unexpected) = &c.not_equal {
            let unexpected = Node::from_json(unexpected.clone());
            if value == Some(&unexpected) {
                return Ok(false);
            }
        }
    }
    Ok(true)
}

/// Returns whether the rule changed anything it was asked to touch.
fn apply_rule(
    op: &PatchOp,
    primary: &mut Node,
    counterpart: Option<&Node>,
    ctx: &PatchContext<'_>,
) -> Result<bool, TransformErrorKind> {
    match op {
        PatchOp::Set { path, value } => {
            let path = Path::parse(path)?;
            primary.set(&path, Node::from_json(value.clone()))?;
            Ok(true)
        }
        PatchOp::Replace { path, value } => {
            let path = Path::parse(path)?;
            if !primary.contains(&path) {
                return Ok(false);
            }
            primary.set(&path, Node::from_json(value.clone()))?;
            Ok(true)
        }
        PatchOp::Remove { path } => {
            let path = Path::parse(path)?;
            Ok(primary.remove(&path).is_some())
        }
        PatchOp::Copy { path, from_path, from, default } => {
            let target = Path::parse(path)?;
            let source_raw = from_path.as_deref().unwrap_or(path);
            let source = Path::parse(source_raw)?;
            let found = match from {
                Side::Primary => primary.get(&source).cloned(),
                Side::Counterpart => match counterpart {
                    Some(doc) => doc.get(&source).cloned(),
                    None if default.is_some() => None,
                    None => return Err(TransformErrorKind::MissingCounterpart(source_raw.to_string())),
                },
            };
            let value = match (found, default) {
                (Some(v), _) => v,
                (None, Some(d)) => Node::from_json(d.clone()),
                (None, None) => return Err(TransformErrorKind::MissingSource(source_raw.to_string())),
            };
            primary.set(&target, value)?;
            Ok(true)
        }
        PatchOp::RewriteName { path, namespace_path } => {
            let target = Path::parse(path)?;
            let namespace = match namespace_path {
                Some(p) => {
                    let p = Path::parse(p)?;
                    primary
                        .get(&p)
                        .and_then(Node::as_str)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .unwrap_or_else(|| ctx.namespace.to_string())
                }
                None => ctx.namespace.to_string(),
            };
            let node = match primary.get_mut(&target) {
                Some(n) if !n.is_null() => n,
                _ => return Ok(false),
            };
            match node {
                Node::Sequence(items) => {
                    for item in items.iter_mut() {
                        rewrite_one(item, &namespace, ctx.resolver)?;
                    }
                }
                other => rewrite_one(other, &namespace, ctx.resolver)?,
            }
            Ok(true)
        }
    }
}

fn rewrite_one(node: &mut Node, namespace: &str, resolver: &dyn NameResolver) -> Result<(), TransformErrorKind> {
    let resolved = match node.as_str() {
        Some(name) => resolver.resolve(name, namespace)?,
        None => return Err(TransformErrorKind::NotAName(node.type_name())),
    };
    *node = Node::string(resolved);
    Ok(())
}
