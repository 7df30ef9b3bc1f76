//! vsync kubehub: kube-rs clients, discovery and the plane/recorder
//! implementations the controller runs against.

#![forbid(unsafe_code)]

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use kube::{
    api::{Api, DeleteParams, Patch, PatchParams, PostParams},
    config::KubeConfigOptions,
    core::{ApiResource, DynamicObject, GroupVersionKind},
    discovery::{ApiCapabilities, Discovery, Scope},
    runtime::events::{Event, EventType, Recorder, Reporter},
    Client, Resource,
};
use metrics::counter;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vsync_controller::{ClientError, EventRecorder, PlaneClient, SyncObject};
use vsync_core::{is_noop_patch, merge_patch};

/// Field manager and event reporter name.
pub const MANAGER: &str = "vsync";

/// Client for a kubeconfig context, or the inferred default when `None`.
pub async fn client_for_context(context: Option<&str>) -> Result<Client> {
    match context {
        None => Client::try_default().await.context("building default kube client"),
        Some(ctx) => {
            let opts = KubeConfigOptions { context: Some(ctx.to_string()), ..Default::default() };
            let cfg = kube::Config::from_kubeconfig(&opts)
                .await
                .with_context(|| format!("loading kubeconfig context {}", ctx))?;
            Client::try_from(cfg).context("building kube client")
        }
    }
}

/// Parse `v1/Kind` or `group/v1/Kind`.
pub fn parse_gvk_key(key: &str) -> Result<GroupVersionKind> {
    let parts: Vec<_> = key.split('/').collect();
    match parts.as_slice() {
        [version, kind] if !version.is_empty() && !kind.is_empty() => Ok(GroupVersionKind::gvk("", version, kind)),
        [group, version, kind] if !version.is_empty() && !kind.is_empty() => Ok(GroupVersionKind::gvk(group, version, kind)),
        _ => Err(anyhow!("invalid gvk key: {} (expect v1/Kind or group/v1/Kind)", key)),
    }
}

/// Resolve a GVK against the served resources of one cluster.
pub async fn find_api_resource(client: Client, gvk: &GroupVersionKind) -> Result<(ApiResource, ApiCapabilities)> {
    let discovery = Discovery::new(client).run().await.context("running discovery")?;
    for group in discovery.groups() {
        for (ar, caps) in group.recommended_resources() {
            if ar.group == gvk.group && ar.version == gvk.version && ar.kind == gvk.kind {
                return Ok((ar, caps));
            }
        }
    }
    Err(anyhow!("GVK not found: {}/{}/{}", gvk.group, gvk.version, gvk.kind))
}

fn has_status_subresource(caps: &ApiCapabilities) -> bool {
    caps.subresources.iter().any(|(sub, _)| sub.plural == "status")
}

/// Split a merge patch into the main-resource part and the `/status` part.
/// Either side is `None` when it would change nothing.
pub fn split_status(mut body: serde_json::Value) -> (Option<serde_json::Value>, Option<serde_json::Value>) {
    let status = body.as_object_mut().and_then(|m| m.remove("status"));
    let main = Some(body).filter(|b| !is_noop_patch(b));
    let status = status.map(|s| serde_json::json!({ "status": s }));
    (main, status)
}

/// Map a kube error onto the controller's client error kinds.
pub fn client_error(err: kube::Error) -> ClientError {
    match err {
        kube::Error::Api(resp) => match (resp.code, resp.reason.as_str()) {
            (404, _) => ClientError::NotFound(resp.message),
            (409, "AlreadyExists") => ClientError::AlreadyExists(resp.message),
            (409, _) => ClientError::Conflict(resp.message),
            (code, _) => ClientError::Api { code, message: resp.message },
        },
        other => ClientError::other(other),
    }
}

/// One plane, one kind: create, merge-patch and delete through `Api<DynamicObject>`.
/// With a status subresource, `/status` changes go through `patch_status`.
#[derive(Clone)]
pub struct KubePlane {
    client: Client,
    resource: ApiResource,
    namespaced: bool,
    status_subresource: bool,
}

impl KubePlane {
    pub fn new(client: Client, resource: ApiResource, namespaced: bool) -> Self {
        Self { client, resource, namespaced, status_subresource: false }
    }

    pub fn with_status_subresource(mut self, enabled: bool) -> Self {
        self.status_subresource = enabled;
        self
    }

    /// Build a plane by discovering `gvk` on the client's cluster.
    pub async fn discover(client: Client, gvk: &GroupVersionKind) -> Result<Self> {
        let (resource, caps) = find_api_resource(client.clone(), gvk).await?;
        let namespaced = matches!(caps.scope, Scope::Namespaced);
        let status = has_status_subresource(&caps);
        debug!(group = %resource.group, version = %resource.version, kind = %resource.kind, namespaced, status, "plane resource resolved");
        Ok(Self::new(client, resource, namespaced).with_status_subresource(status))
    }

    pub fn api_resource(&self) -> &ApiResource {
        &self.resource
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn api(&self, namespace: Option<&str>) -> Api<DynamicObject> {
        match (self.namespaced, namespace) {
            (true, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, &self.resource),
            (true, None) => Api::default_namespaced_with(self.client.clone(), &self.resource),
            (false, _) => Api::all_with(self.client.clone(), &self.resource),
        }
    }

    pub async fn get(&self, namespace: Option<&str>, name: &str) -> Result<Option<DynamicObject>> {
        self.api(namespace)
            .get_opt(name)
            .await
            .with_context(|| format!("getting {} {}/{}", self.resource.kind, namespace.unwrap_or_default(), name))
    }
}

async fn race<T>(
    cancel: &CancellationToken,
    fut: impl std::future::Future<Output = Result<T, kube::Error>>,
) -> Result<T, ClientError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ClientError::Other("request cancelled".into())),
        res = fut => res.map_err(client_error),
    }
}

#[async_trait]
impl PlaneClient<DynamicObject> for KubePlane {
    async fn create(&self, cancel: &CancellationToken, obj: &DynamicObject) -> Result<(), ClientError> {
        let pp = PostParams { field_manager: Some(MANAGER.to_string()), ..Default::default() };
        let api = self.api(obj.namespace());
        race(cancel, api.create(&pp, obj)).await?;
        info!(kind = %self.resource.kind, ns = ?obj.namespace(), name = obj.name(), "created");
        Ok(())
    }

    async fn patch(&self, cancel: &CancellationToken, current: &DynamicObject, target: &DynamicObject) -> Result<(), ClientError> {
        let cur = serde_json::to_value(current).map_err(ClientError::other)?;
        let tgt = serde_json::to_value(target).map_err(ClientError::other)?;
        let body = merge_patch(&cur, &tgt);
        if is_noop_patch(&body) {
            debug!(kind = %self.resource.kind, name = current.name(), "empty merge patch; skipped");
            return Ok(());
        }
        let pp = PatchParams { field_manager: Some(MANAGER.to_string()), ..Default::default() };
        let api = self.api(current.namespace());
        if !self.status_subresource {
            race(cancel, api.patch(current.name(), &pp, &Patch::Merge(&body))).await?;
            return Ok(());
        }
        let (main, status) = split_status(body);
        if let Some(main) = main {
            race(cancel, api.patch(current.name(), &pp, &Patch::Merge(&main))).await?;
        }
        if let Some(status) = status {
            race(cancel, api.patch_status(current.name(), &pp, &Patch::Merge(&status))).await?;
        }
        Ok(())
    }

    async fn delete(&self, cancel: &CancellationToken, obj: &DynamicObject) -> Result<(), ClientError> {
        let api = self.api(obj.namespace());
        race(cancel, api.delete(obj.name(), &DeleteParams::background())).await?;
        Ok(())
    }
}

/// Publishes `Warning` events for objects of one resource type.
#[derive(Clone)]
pub struct KubeRecorder {
    client: Client,
    reporter: Reporter,
    resource: ApiResource,
}

impl KubeRecorder {
    pub fn new(client: Client, resource: ApiResource) -> Self {
        let reporter = Reporter { controller: MANAGER.to_string(), instance: std::env::var("HOSTNAME").ok() };
        Self { client, reporter, resource }
    }
}

impl EventRecorder<DynamicObject> for KubeRecorder {
    fn record_warning(&self, obj: &DynamicObject, reason: &str, message: &str) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(h) => h,
            Err(_) => {
                warn!(reason, name = obj.name(), "no runtime; event dropped");
                return;
            }
        };
        let recorder = Recorder::new(self.client.clone(), self.reporter.clone(), obj.object_ref(&self.resource));
        let event = Event {
            type_: EventType::Warning,
            reason: reason.to_string(),
            note: Some(message.to_string()),
            action: "Sync".to_string(),
            secondary: None,
        };
        let name = obj.name().to_string();
        handle.spawn(async move {
            if let Err(e) = recorder.publish(event).await {
                counter!("vsync_event_err", 1u64);
                warn!(name = %name, error = %e, "failed to publish event");
            }
        });
    }
}
