//! vsync patch engine: declarative rules applied to document trees, plus the
//! name resolvers rules use to rewrite cross-plane references.

#![forbid(unsafe_code)]

pub mod engine;
pub mod names;
pub mod rule;

pub use engine::{ApplyStats, PatchContext, PatchEngine, TransformError, TransformErrorKind};
pub use names::{NameResolver, PhysicalNames, ResolveError, VirtualNames};
pub use rule::{Condition, PatchOp, PatchRule, Side};
