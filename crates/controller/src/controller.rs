//! The sync controller: admit, reconcile and orphan handling for one kind.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vsync_core::{ConversionError, Node, ObjectKey};
use vsync_patch::{NameResolver, PatchContext, PatchEngine, TransformError};

use crate::collab::{ClientError, EventRecorder, MetadataTranslator, PlaneClient};
use crate::descriptor::{Direction, ResourceDescriptor};
use crate::object::SyncObject;

/// Event reason for failed plane writes.
pub const SYNC_ERROR_REASON: &str = "SyncError";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plane {
    Virtual,
    Physical,
}

impl std::fmt::Display for Plane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Plane::Virtual => "virtual",
            Plane::Physical => "physical",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Create,
    Patch,
    Delete,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Action::Create => "create",
            Action::Patch => "patch",
            Action::Delete => "delete",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("applying {direction} to {kind} {key}: {source}")]
    Transform {
        kind: String,
        key: ObjectKey,
        direction: Direction,
        #[source]
        source: TransformError,
    },
    #[error("converting {kind} {key}: {source}")]
    Conversion {
        kind: String,
        key: ObjectKey,
        #[source]
        source: ConversionError,
    },
    #[error("{action} {kind} {key} on {plane} plane: {source}")]
    Client {
        action: Action,
        plane: Plane,
        kind: String,
        key: ObjectKey,
        #[source]
        source: ClientError,
    },
    #[error("cancelled while syncing {key}")]
    Cancelled { key: ObjectKey },
}

impl SyncError {
    pub fn key(&self) -> &ObjectKey {
        match self {
            SyncError::Transform { key, .. }
            | SyncError::Conversion { key, .. }
            | SyncError::Client { key, .. }
            | SyncError::Cancelled { key } => key,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncError::Cancelled { .. })
    }
}

/// What a reconciliation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Selector miss with nothing on the physical plane.
    Skipped,
    Created,
    /// The physical object was already there.
    AlreadyExists,
    Deleted,
    /// Both sides structurally equal.
    InSync,
    /// Reverse rules produced no change to the virtual object.
    Unchanged,
    Patched,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Skipped => "skipped",
            Outcome::Created => "created",
            Outcome::AlreadyExists => "already-exists",
            Outcome::Deleted => "deleted",
            Outcome::InSync => "in-sync",
            Outcome::Unchanged => "unchanged",
            Outcome::Patched => "patched",
        }
    }
}

/// Classification of a `(virtual, physical)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Nothing to do on either plane.
    Absent,
    /// Physical counterpart needs to be created.
    Creating,
    InSync,
    Diverged,
    /// Physical object must go.
    Deleting,
}

/// Everything the controller calls out to.
pub struct Collaborators<O: SyncObject> {
    pub translator: Arc<dyn MetadataTranslator<O>>,
    pub virtual_plane: Arc<dyn PlaneClient<O>>,
    pub physical_plane: Arc<dyn PlaneClient<O>>,
    pub recorder: Arc<dyn EventRecorder<O>>,
    /// Virtual -> physical, used by forward rules.
    pub forward_names: Arc<dyn NameResolver>,
    /// Physical -> virtual, used by reverse rules.
    pub reverse_names: Arc<dyn NameResolver>,
}

impl<O: SyncObject> Clone for Collaborators<O> {
    fn clone(&self) -> Self {
        Self {
            translator: self.translator.clone(),
            virtual_plane: self.virtual_plane.clone(),
            physical_plane: self.physical_plane.clone(),
            recorder: self.recorder.clone(),
            forward_names: self.forward_names.clone(),
            reverse_names: self.reverse_names.clone(),
        }
    }
}

/// Level-triggered reconciler for the kind described by one descriptor.
///
/// Holds no per-key state; every call recomputes from its inputs and may run
/// concurrently with calls for other keys.
pub struct SyncController<O: SyncObject> {
    descriptor: Arc<ResourceDescriptor>,
    engine: PatchEngine,
    collab: Collaborators<O>,
}

impl<O: SyncObject> Clone for SyncController<O> {
    fn clone(&self) -> Self {
        Self { descriptor: self.descriptor.clone(), engine: self.engine, collab: self.collab.clone() }
    }
}

async fn guarded<F: Future>(cancel: &CancellationToken, key: &ObjectKey, fut: F) -> Result<F::Output, SyncError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SyncError::Cancelled { key: key.clone() }),
        out = fut => Ok(out),
    }
}

impl<O: SyncObject> SyncController<O> {
    pub fn new(descriptor: Arc<ResourceDescriptor>, collab: Collaborators<O>) -> Self {
        Self { descriptor, engine: PatchEngine::new(), collab }
    }

    pub fn descriptor(&self) -> &ResourceDescriptor {
        &self.descriptor
    }

    pub fn matches(&self, virtual_obj: &O) -> bool {
        self.descriptor.matches(virtual_obj)
    }

    fn conversion(&self, key: &ObjectKey) -> impl FnOnce(ConversionError) -> SyncError {
        let kind = self.descriptor.kind().to_string();
        let key = key.clone();
        move |source| SyncError::Conversion { kind, key, source }
    }

    fn run_rules(
        &self,
        direction: Direction,
        primary: &mut Node,
        counterpart: &Node,
        virtual_obj: &O,
    ) -> Result<(), SyncError> {
        let resolver = match direction {
            Direction::Forward => self.collab.forward_names.as_ref(),
            Direction::Reverse => self.collab.reverse_names.as_ref(),
        };
        let ctx = PatchContext { namespace: virtual_obj.namespace().unwrap_or_default(), resolver };
        match self.engine.apply(primary, Some(counterpart), self.descriptor.rules(direction), &ctx) {
            Ok(stats) => {
                debug!(kind = %self.descriptor.kind(), %direction, applied = stats.applied, skipped = stats.skipped, "rules applied");
                Ok(())
            }
            Err(source) => {
                counter!("vsync_transform_err", 1u64);
                warn!(kind = %self.descriptor.kind(), key = %virtual_obj.key(), %direction, error = %source, "transform failed");
                Err(SyncError::Transform {
                    kind: self.descriptor.kind().to_string(),
                    key: virtual_obj.key(),
                    direction,
                    source,
                })
            }
        }
    }

    /// Physical object the forward rules produce for `virtual_obj`.
    pub fn forward(&self, virtual_obj: &O) -> Result<O, SyncError> {
        let key = virtual_obj.key();
        let translated = self.collab.translator.translate(virtual_obj).map_err(self.conversion(&key))?;
        let mut doc = translated.to_doc().map_err(self.conversion(&key))?;
        let counterpart = virtual_obj.to_doc().map_err(self.conversion(&key))?;
        self.run_rules(Direction::Forward, &mut doc, &counterpart, virtual_obj)?;
        O::from_doc(doc).map_err(self.conversion(&key))
    }

    fn reverse_doc(&self, virtual_obj: &O, virtual_doc: &Node, physical_doc: &Node) -> Result<Node, SyncError> {
        let mut doc = virtual_doc.clone();
        self.run_rules(Direction::Reverse, &mut doc, physical_doc, virtual_obj)?;
        Ok(doc)
    }

    /// Virtual object the reverse rules compute from `physical_obj`.
    pub fn reverse(&self, virtual_obj: &O, physical_obj: &O) -> Result<O, SyncError> {
        let key = virtual_obj.key();
        let v = virtual_obj.to_doc().map_err(self.conversion(&key))?;
        let p = physical_obj.to_doc().map_err(self.conversion(&key))?;
        let doc = self.reverse_doc(virtual_obj, &v, &p)?;
        O::from_doc(doc).map_err(self.conversion(&key))
    }

    pub fn state(&self, virtual_obj: Option<&O>, physical_obj: Option<&O>) -> Result<SyncState, SyncError> {
        Ok(match (virtual_obj, physical_obj) {
            (None, None) => SyncState::Absent,
            (None, Some(_)) => SyncState::Deleting,
            (Some(v), None) if self.matches(v) => SyncState::Creating,
            (Some(_), None) => SyncState::Absent,
            (Some(v), Some(_)) if !self.matches(v) => SyncState::Deleting,
            (Some(v), Some(p)) => {
                let key = v.key();
                let vd = v.to_doc().map_err(self.conversion(&key))?;
                let pd = p.to_doc().map_err(self.conversion(&key))?;
                if vd == pd {
                    SyncState::InSync
                } else {
                    SyncState::Diverged
                }
            }
        })
    }

    /// Dispatch on which side exists.
    pub async fn sync(
        &self,
        cancel: &CancellationToken,
        virtual_obj: Option<&O>,
        physical_obj: Option<&O>,
    ) -> Result<Outcome, SyncError> {
        let t0 = Instant::now();
        let res = match (virtual_obj, physical_obj) {
            (Some(v), None) => self.admit(cancel, v).await,
            (Some(v), Some(p)) => self.reconcile(cancel, v, p).await,
            (None, Some(p)) => self.orphan(cancel, p).await,
            (None, None) => Ok(Outcome::Skipped),
        };
        histogram!("vsync_reconcile_ms", t0.elapsed().as_secs_f64() * 1000.0);
        res
    }

    /// Create the physical counterpart of a virtual object that has none.
    pub async fn admit(&self, cancel: &CancellationToken, virtual_obj: &O) -> Result<Outcome, SyncError> {
        let kind = self.descriptor.kind();
        let key = virtual_obj.key();
        if !self.matches(virtual_obj) {
            debug!(kind, ns = ?key.namespace, name = %key.name, "selector miss; not admitting");
            return Ok(Outcome::Skipped);
        }
        let target = self.forward(virtual_obj)?;
        let pkey = target.key();
        info!(kind, ns = ?pkey.namespace, name = %pkey.name, "create physical");
        counter!("vsync_create_total", 1u64);
        match guarded(cancel, &key, self.collab.physical_plane.create(cancel, &target)).await? {
            Ok(()) => Ok(Outcome::Created),
            Err(ClientError::AlreadyExists(_)) => {
                debug!(kind, ns = ?pkey.namespace, name = %pkey.name, "physical already exists");
                Ok(Outcome::AlreadyExists)
            }
            Err(source) => {
                counter!("vsync_create_err", 1u64);
                warn!(kind, ns = ?key.namespace, name = %key.name, error = %source, "error syncing to physical cluster");
                self.collab.recorder.record_warning(
                    virtual_obj,
                    SYNC_ERROR_REASON,
                    &format!("Error syncing to physical cluster: {}", source),
                );
                Err(SyncError::Client { action: Action::Create, plane: Plane::Physical, kind: kind.to_string(), key, source })
            }
        }
    }

    /// Bring an existing pair back together.
    pub async fn reconcile(&self, cancel: &CancellationToken, virtual_obj: &O, physical_obj: &O) -> Result<Outcome, SyncError> {
        let kind = self.descriptor.kind();
        let key = virtual_obj.key();
        if !self.matches(virtual_obj) {
            let pkey = physical_obj.key();
            info!(kind, ns = ?pkey.namespace, name = %pkey.name, "delete physical; virtual object no longer selected");
            return self.delete_physical(cancel, &key, physical_obj).await;
        }

        let v = virtual_obj.to_doc().map_err(self.conversion(&key))?;
        let p = physical_obj.to_doc().map_err(self.conversion(&key))?;
        if v == p {
            debug!(kind, ns = ?key.namespace, name = %key.name, "in sync");
            return Ok(Outcome::InSync);
        }

        debug!(kind, ns = ?key.namespace, name = %key.name, "semantic difference between physical and virtual object");
        let target_doc = self.reverse_doc(virtual_obj, &v, &p)?;
        if target_doc == v {
            debug!(kind, ns = ?key.namespace, name = %key.name, "reverse rules changed nothing");
            return Ok(Outcome::Unchanged);
        }
        let target = O::from_doc(target_doc).map_err(self.conversion(&key))?;

        counter!("vsync_patch_total", 1u64);
        match guarded(cancel, &key, self.collab.virtual_plane.patch(cancel, virtual_obj, &target)).await? {
            Ok(()) => {
                info!(kind, ns = ?key.namespace, name = %key.name, "patched virtual");
                Ok(Outcome::Patched)
            }
            Err(source) => {
                counter!("vsync_patch_err", 1u64);
                warn!(kind, ns = ?key.namespace, name = %key.name, error = %source, "error syncing to virtual cluster");
                self.collab.recorder.record_warning(
                    physical_obj,
                    SYNC_ERROR_REASON,
                    &format!("Error syncing to virtual cluster: {}", source),
                );
                Err(SyncError::Client { action: Action::Patch, plane: Plane::Virtual, kind: kind.to_string(), key, source })
            }
        }
    }

    /// Remove a physical object whose virtual object is gone.
    pub async fn orphan(&self, cancel: &CancellationToken, physical_obj: &O) -> Result<Outcome, SyncError> {
        let key = physical_obj.key();
        info!(kind = self.descriptor.kind(), ns = ?key.namespace, name = %key.name, "delete physical; virtual object gone");
        self.delete_physical(cancel, &key, physical_obj).await
    }

    async fn delete_physical(&self, cancel: &CancellationToken, key: &ObjectKey, physical_obj: &O) -> Result<Outcome, SyncError> {
        counter!("vsync_delete_total", 1u64);
        match guarded(cancel, key, self.collab.physical_plane.delete(cancel, physical_obj)).await? {
            Ok(()) | Err(ClientError::NotFound(_)) => Ok(Outcome::Deleted),
            Err(source) => {
                warn!(kind = self.descriptor.kind(), key = %physical_obj.key(), error = %source, "error deleting physical");
                Err(SyncError::Client {
                    action: Action::Delete,
                    plane: Plane::Physical,
                    kind: self.descriptor.kind().to_string(),
                    key: key.clone(),
                    source,
                })
            }
        }
    }
}
