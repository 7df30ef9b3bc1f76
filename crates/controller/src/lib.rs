//! vsync controller: selector matching, per-kind descriptors and the
//! two-plane sync controller.
//!
//! A `SyncController` drives one kind. Given the current virtual object and
//! its physical counterpart (either may be absent) it creates, patches or
//! deletes so the two planes converge, using the forward and reverse patch
//! rules of its `ResourceDescriptor`.

#![forbid(unsafe_code)]

pub mod collab;
pub mod config;
pub mod controller;
pub mod descriptor;
pub mod object;
pub mod selector;
pub mod translate;

pub use collab::{ClientError, EventRecorder, MetadataTranslator, NoopRecorder, PlaneClient};
pub use config::{ConfigError, SyncConfig};
pub use controller::{Action, Collaborators, Outcome, Plane, SyncController, SyncError, SyncState, SYNC_ERROR_REASON};
pub use descriptor::{DescriptorError, Direction, ResourceConfig, ResourceDescriptor};
pub use object::SyncObject;
pub use selector::{matches, Selector, SelectorConfig, SelectorParseError};
pub use translate::{owner_key, PhysicalTranslator};

pub use tokio_util::sync::CancellationToken;
