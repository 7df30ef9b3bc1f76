#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use serde_json::{json, Value};
use vsync_controller::{
    matches, Action, CancellationToken, ClientError, Collaborators, EventRecorder, Outcome, PhysicalTranslator,
    Plane, PlaneClient, ResourceConfig, ResourceDescriptor, SelectorConfig, SyncController, SyncError, SyncObject,
    SyncState,
};
use vsync_core::ObjectKey;
use vsync_patch::{PatchRule, PhysicalNames, VirtualNames};

#[derive(Default)]
struct FakePlane {
    objects: Mutex<BTreeMap<ObjectKey, DynamicObject>>,
    creates: AtomicUsize,
    patches: AtomicUsize,
    deletes: AtomicUsize,
    last_patch: Mutex<Option<DynamicObject>>,
    fail: AtomicBool,
    hang: AtomicBool,
}

impl FakePlane {
    async fn gate(&self) -> Result<(), ClientError> {
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(ClientError::Api { code: 500, message: "boom".into() });
        }
        Ok(())
    }

    fn get(&self, key: &ObjectKey) -> Option<DynamicObject> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    fn insert(&self, obj: DynamicObject) {
        self.objects.lock().unwrap().insert(obj.key(), obj);
    }

    fn counts(&self) -> (usize, usize, usize) {
        (
            self.creates.load(Ordering::SeqCst),
            self.patches.load(Ordering::SeqCst),
            self.deletes.load(Ordering::SeqCst),
        )
    }
}

#[async_trait]
impl PlaneClient<DynamicObject> for FakePlane {
    async fn create(&self, _cancel: &CancellationToken, obj: &DynamicObject) -> Result<(), ClientError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.gate().await?;
        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(&obj.key()) {
            return Err(ClientError::AlreadyExists(obj.key().to_string()));
        }
        objects.insert(obj.key(), obj.clone());
        Ok(())
    }

    async fn patch(&self, _cancel: &CancellationToken, _current: &DynamicObject, target: &DynamicObject) -> Result<(), ClientError> {
        self.patches.fetch_add(1, Ordering::SeqCst);
        self.gate().await?;
        *self.last_patch.lock().unwrap() = Some(target.clone());
        self.objects.lock().unwrap().insert(target.key(), target.clone());
        Ok(())
    }

    async fn delete(&self, _cancel: &CancellationToken, obj: &DynamicObject) -> Result<(), ClientError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.gate().await?;
        match self.objects.lock().unwrap().remove(&obj.key()) {
            Some(_) => Ok(()),
            None => Err(ClientError::NotFound(obj.key().to_string())),
        }
    }
}

#[derive(Default)]
struct Events(Mutex<Vec<(String, String, String)>>);

impl Events {
    fn all(&self) -> Vec<(String, String, String)> {
        self.0.lock().unwrap().clone()
    }
}

impl EventRecorder<DynamicObject> for Events {
    fn record_warning(&self, obj: &DynamicObject, reason: &str, message: &str) {
        self.0.lock().unwrap().push((obj.name().to_string(), reason.to_string(), message.to_string()));
    }
}

struct Harness {
    ctrl: SyncController<DynamicObject>,
    translator: Arc<PhysicalTranslator>,
    virt: Arc<FakePlane>,
    phys: Arc<FakePlane>,
    events: Arc<Events>,
}

impl Harness {
    fn new(selector: &[(&str, &str)], patches: Vec<PatchRule>, reverse_patches: Vec<PatchRule>) -> Self {
        let cfg = ResourceConfig {
            kind: "Widget".into(),
            api_version: "example.com/v1".into(),
            selector: Some(SelectorConfig {
                label_selector: selector.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
                match_expressions: vec![],
            }),
            patches,
            reverse_patches,
        };
        let descriptor = Arc::new(ResourceDescriptor::new(cfg).unwrap());
        let names = Arc::new(PhysicalNames::new("vc1"));
        let translator = Arc::new(PhysicalTranslator::new(names.clone(), "host"));
        let virt = Arc::new(FakePlane::default());
        let phys = Arc::new(FakePlane::default());
        let events = Arc::new(Events::default());
        let collab: Collaborators<DynamicObject> = Collaborators {
            translator: translator.clone(),
            virtual_plane: virt.clone(),
            physical_plane: phys.clone(),
            recorder: events.clone(),
            forward_names: names.clone(),
            reverse_names: Arc::new(VirtualNames::new(names)),
        };
        Self { ctrl: SyncController::new(descriptor, collab), translator, virt, phys, events }
    }

    fn physical_of(&self, v: &DynamicObject) -> Option<DynamicObject> {
        let key = self.translator.physical_key(v.namespace(), v.name()).unwrap();
        self.phys.get(&key)
    }

    /// One level-triggered pass: look up the counterpart, then sync.
    async fn run(&self, v: &DynamicObject) -> Result<Outcome, SyncError> {
        let p = self.physical_of(v);
        self.ctrl.sync(&CancellationToken::new(), Some(v), p.as_ref()).await
    }
}

fn widget(name: &str, labels: &[(&str, &str)], data: Value) -> DynamicObject {
    let ar = ApiResource::from_gvk(&GroupVersionKind::gvk("example.com", "v1", "Widget"));
    let mut obj = DynamicObject::new(name, &ar).within("team-a").data(data);
    obj.metadata.labels = Some(labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect());
    obj
}

fn synced(name: &str) -> DynamicObject {
    widget(name, &[("tier", "sync")], json!({ "spec": { "replicas": 1 }, "status": { "ready": false } }))
}

#[test]
fn absent_selector_matches_every_object() {
    for labels in [&[][..], &[("tier", "other")][..], &[("a", "b"), ("c", "d")][..]] {
        assert!(matches(&widget("w", labels, json!({})), None));
    }
}

#[tokio::test]
async fn admit_applies_forward_literal() {
    let h = Harness::new(&[("tier", "sync")], vec![PatchRule::set("/spec/replicas", json!(3))], vec![]);
    let v = synced("w1");

    assert_eq!(h.run(&v).await.unwrap(), Outcome::Created);
    let p = h.physical_of(&v).expect("physical created");
    assert_eq!(p.data["spec"]["replicas"], json!(3));
    assert_eq!(p.namespace(), Some("host"));
    assert_eq!(p.name(), PhysicalNames::new("vc1").physical_name("w1", "team-a"));
    assert_eq!(v.data["spec"]["replicas"], json!(1), "virtual object untouched");
    assert!(h.events.all().is_empty());
}

#[tokio::test]
async fn repeated_sync_creates_once() {
    let h = Harness::new(&[("tier", "sync")], vec![PatchRule::set("/spec/replicas", json!(3))], vec![]);
    let v = synced("w1");

    assert_eq!(h.run(&v).await.unwrap(), Outcome::Created);
    assert_eq!(h.run(&v).await.unwrap(), Outcome::Unchanged);
    assert_eq!(h.run(&v).await.unwrap(), Outcome::Unchanged);
    assert_eq!(h.phys.counts(), (1, 0, 0));
    assert_eq!(h.virt.counts(), (0, 0, 0));

    // A stale caller that still believes there is no counterpart converges too.
    let out = h.ctrl.admit(&CancellationToken::new(), &v).await.unwrap();
    assert_eq!(out, Outcome::AlreadyExists);
    assert!(h.events.all().is_empty());
}

#[tokio::test]
async fn selector_miss_skips_admit_and_deletes_existing() {
    let h = Harness::new(&[("tier", "sync")], vec![], vec![]);
    let v = widget("w1", &[("tier", "other")], json!({ "spec": { "replicas": 1 } }));

    assert_eq!(h.run(&v).await.unwrap(), Outcome::Skipped);
    assert_eq!(h.phys.counts(), (0, 0, 0));

    let p = h.ctrl.forward(&synced("w1")).unwrap();
    h.phys.insert(p.clone());
    let out = h.ctrl.reconcile(&CancellationToken::new(), &v, &p).await.unwrap();
    assert_eq!(out, Outcome::Deleted);
    assert_eq!(h.phys.counts(), (0, 0, 1));
    assert!(h.physical_of(&v).is_none());
    assert_eq!(h.virt.counts(), (0, 0, 0));
}

#[tokio::test]
async fn delete_failure_is_returned_and_object_kept() {
    let h = Harness::new(&[("tier", "sync")], vec![], vec![]);
    let v = widget("w1", &[("tier", "other")], json!({ "spec": { "replicas": 1 } }));
    let p = h.ctrl.forward(&synced("w1")).unwrap();
    h.phys.insert(p.clone());
    h.phys.fail.store(true, Ordering::SeqCst);

    let err = h.ctrl.reconcile(&CancellationToken::new(), &v, &p).await.unwrap_err();
    assert!(
        matches!(err, SyncError::Client { action: Action::Delete, plane: Plane::Physical, source: ClientError::Api { code: 500, .. }, .. }),
        "{err:?}"
    );
    assert_eq!(h.phys.counts(), (0, 0, 1));
    assert!(h.physical_of(&v).is_some());

    // orphan cleanup surfaces the same failure
    let err = h.ctrl.orphan(&CancellationToken::new(), &p).await.unwrap_err();
    assert!(matches!(err, SyncError::Client { action: Action::Delete, .. }));
    assert_eq!(h.phys.counts(), (0, 0, 2));
    assert!(h.physical_of(&v).is_some());

    // the next pass succeeds once the plane recovers
    h.phys.fail.store(false, Ordering::SeqCst);
    assert_eq!(h.ctrl.orphan(&CancellationToken::new(), &p).await.unwrap(), Outcome::Deleted);
    assert!(h.physical_of(&v).is_none());
}

#[tokio::test]
async fn identical_objects_make_no_requests() {
    let h = Harness::new(&[], vec![], vec![PatchRule::copy("/status", "/status")]);
    let v = synced("w1");
    let p = v.clone();

    let out = h.ctrl.reconcile(&CancellationToken::new(), &v, &p).await.unwrap();
    assert_eq!(out, Outcome::InSync);
    assert_eq!(h.phys.counts(), (0, 0, 0));
    assert_eq!(h.virt.counts(), (0, 0, 0));
    assert_eq!(h.ctrl.state(Some(&v), Some(&p)).unwrap(), SyncState::InSync);
}

#[tokio::test]
async fn reverse_rules_propagate_physical_status() {
    let h = Harness::new(&[("tier", "sync")], vec![], vec![PatchRule::copy("/status/ready", "/status/ready")]);
    let v = synced("w1");
    let mut p = h.ctrl.forward(&v).unwrap();
    p.data["status"]["ready"] = json!(true);
    p.data["spec"]["replicas"] = json!(9);

    assert_eq!(h.ctrl.state(Some(&v), Some(&p)).unwrap(), SyncState::Diverged);
    let out = h.ctrl.reconcile(&CancellationToken::new(), &v, &p).await.unwrap();
    assert_eq!(out, Outcome::Patched);
    assert_eq!(h.virt.counts(), (0, 1, 0));
    assert_eq!(h.phys.counts(), (0, 0, 0));

    let target = h.virt.last_patch.lock().unwrap().clone().unwrap();
    assert_eq!(target.data["status"]["ready"], json!(true));
    assert_eq!(target.data["spec"]["replicas"], json!(1), "only ruled fields come back");
    assert_eq!(target.name(), "w1");
    assert_eq!(target.namespace(), Some("team-a"));
}

#[tokio::test]
async fn names_round_trip_through_both_directions() {
    let h = Harness::new(
        &[],
        vec![PatchRule::rewrite_name("/spec/secretName")],
        vec![PatchRule::copy("/spec/secretName", "/status/secretName"), PatchRule::rewrite_name("/status/secretName")],
    );
    let v = widget("w1", &[], json!({ "spec": { "secretName": "tls-cert" } }));
    let p = h.ctrl.forward(&v).unwrap();
    let physical_secret = PhysicalNames::new("vc1").physical_name("tls-cert", "team-a");
    assert_eq!(p.data["spec"]["secretName"], json!(physical_secret));

    let back = h.ctrl.reverse(&v, &p).unwrap();
    assert_eq!(back.data["status"]["secretName"], json!("tls-cert"));
}

#[tokio::test]
async fn create_failure_records_warning_on_virtual_object() {
    let h = Harness::new(&[], vec![], vec![]);
    h.phys.fail.store(true, Ordering::SeqCst);
    let v = synced("w1");

    let err = h.run(&v).await.unwrap_err();
    assert!(
        matches!(err, SyncError::Client { action: Action::Create, plane: Plane::Physical, source: ClientError::Api { code: 500, .. }, .. }),
        "{err:?}"
    );
    assert_eq!(err.key(), &ObjectKey::new(Some("team-a"), "w1"));
    let events = h.events.all();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, "w1");
    assert_eq!(events[0].1, "SyncError");
    assert!(events[0].2.starts_with("Error syncing to physical cluster: api error 500"), "{}", events[0].2);
}

#[tokio::test]
async fn patch_failure_records_warning_on_physical_object() {
    let h = Harness::new(&[], vec![], vec![PatchRule::copy("/status", "/status")]);
    h.virt.fail.store(true, Ordering::SeqCst);
    let v = synced("w1");
    let mut p = h.ctrl.forward(&v).unwrap();
    p.data["status"]["ready"] = json!(true);

    let err = h.ctrl.reconcile(&CancellationToken::new(), &v, &p).await.unwrap_err();
    assert!(matches!(err, SyncError::Client { action: Action::Patch, plane: Plane::Virtual, .. }));
    let events = h.events.all();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, p.name());
}

#[tokio::test]
async fn transform_failure_aborts_before_any_request() {
    let rule = PatchRule::copy("/spec/missing", "/spec/target");
    let h = Harness::new(&[], vec![rule], vec![]);
    let err = h.run(&synced("w1")).await.unwrap_err();
    match err {
        SyncError::Transform { source, .. } => assert_eq!(source.index, 0),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(h.phys.counts(), (0, 0, 0));
    assert!(h.events.all().is_empty());
}

#[tokio::test]
async fn cancellation_aborts_a_blocked_call() {
    let h = Harness::new(&[], vec![], vec![]);
    h.phys.hang.store(true, Ordering::SeqCst);
    let v = synced("w1");

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });
    let res = tokio::time::timeout(Duration::from_secs(5), h.ctrl.admit(&cancel, &v))
        .await
        .expect("cancellation must unblock admit");
    assert!(matches!(res, Err(SyncError::Cancelled { .. })));
    assert!(h.events.all().is_empty());

    // Already cancelled: nothing is attempted.
    h.phys.hang.store(false, Ordering::SeqCst);
    let err = h.ctrl.admit(&cancel, &v).await.unwrap_err();
    assert!(err.is_cancelled());
    assert!(h.physical_of(&v).is_none());
}

#[tokio::test]
async fn orphaned_physical_objects_are_deleted() {
    let h = Harness::new(&[], vec![], vec![]);
    let v = synced("w1");
    assert_eq!(h.run(&v).await.unwrap(), Outcome::Created);
    let p = h.physical_of(&v).unwrap();

    assert_eq!(h.ctrl.state(None, Some(&p)).unwrap(), SyncState::Deleting);
    let cancel = CancellationToken::new();
    assert_eq!(h.ctrl.sync(&cancel, None, Some(&p)).await.unwrap(), Outcome::Deleted);
    // Already gone counts as deleted.
    assert_eq!(h.ctrl.sync(&cancel, None, Some(&p)).await.unwrap(), Outcome::Deleted);
    assert_eq!(h.phys.counts(), (1, 0, 2));
    assert_eq!(h.ctrl.sync(&cancel, None, None).await.unwrap(), Outcome::Skipped);
    assert_eq!(h.ctrl.state(None, None).unwrap(), SyncState::Absent);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn distinct_keys_reconcile_concurrently() {
    let h = Arc::new(Harness::new(&[("tier", "sync")], vec![PatchRule::set("/spec/replicas", json!(2))], vec![]));
    let mut handles = Vec::new();
    for i in 0..16 {
        let h = h.clone();
        handles.push(tokio::spawn(async move { h.run(&synced(&format!("w{i}"))).await }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), Outcome::Created);
    }
    assert_eq!(h.phys.counts(), (16, 0, 0));
    assert_eq!(h.phys.objects.lock().unwrap().len(), 16);
}
