//! Default metadata translator for `DynamicObject`.
//!
//! The physical copy gets the resolved name, the target namespace and
//! ownership labels/annotations. Fields the API server owns are dropped so the
//! copy can be submitted as a fresh create.

use std::sync::Arc;

use kube::core::DynamicObject;
use vsync_core::{ConversionError, ObjectKey};
use vsync_patch::{NameResolver, PhysicalNames};

use crate::collab::MetadataTranslator;
use crate::object::SyncObject;

pub const MANAGED_BY_LABEL: &str = "vsync.dev/managed-by";
pub const NAMESPACE_LABEL: &str = "vsync.dev/namespace";
pub const NAME_ANNOTATION: &str = "vsync.dev/object-name";
pub const NAMESPACE_ANNOTATION: &str = "vsync.dev/object-namespace";

#[derive(Debug, Clone)]
pub struct PhysicalTranslator {
    names: Arc<PhysicalNames>,
    target_namespace: String,
}

impl PhysicalTranslator {
    pub fn new(names: Arc<PhysicalNames>, target_namespace: impl Into<String>) -> Self {
        Self { names, target_namespace: target_namespace.into() }
    }

    pub fn target_namespace(&self) -> &str {
        &self.target_namespace
    }

    /// Key of the physical counterpart of a virtual `(namespace, name)`.
    pub fn physical_key(&self, namespace: Option<&str>, name: &str) -> Result<ObjectKey, ConversionError> {
        let physical = self.names.resolve(name, namespace.unwrap_or_default()).map_err(|_| ConversionError::MissingName)?;
        let ns = namespace.map(|_| self.target_namespace.as_str());
        Ok(ObjectKey::new(ns, &physical))
    }
}

/// Virtual key recorded on a physical object, if it carries one.
pub fn owner_key(physical: &DynamicObject) -> Option<ObjectKey> {
    let ann = physical.metadata.annotations.as_ref()?;
    let name = ann.get(NAME_ANNOTATION)?;
    Some(ObjectKey::new(ann.get(NAMESPACE_ANNOTATION).map(String::as_str), name))
}

impl MetadataTranslator<DynamicObject> for PhysicalTranslator {
    fn translate(&self, obj: &DynamicObject) -> Result<DynamicObject, ConversionError> {
        let name = obj.name();
        if name.is_empty() {
            return Err(ConversionError::MissingName);
        }
        let key = self.physical_key(obj.namespace(), name)?;

        let mut out = obj.clone();
        let meta = &mut out.metadata;
        meta.name = Some(key.name);
        meta.namespace = key.namespace;
        meta.generate_name = None;
        meta.uid = None;
        meta.resource_version = None;
        meta.managed_fields = None;
        meta.generation = None;
        meta.creation_timestamp = None;
        meta.deletion_timestamp = None;
        meta.deletion_grace_period_seconds = None;
        meta.owner_references = None;
        meta.finalizers = None;
        meta.self_link = None;

        let labels = meta.labels.get_or_insert_with(Default::default);
        labels.insert(MANAGED_BY_LABEL.to_string(), self.names.suffix().to_string());
        if let Some(ns) = obj.namespace() {
            labels.insert(NAMESPACE_LABEL.to_string(), ns.to_string());
        }
        let annotations = meta.annotations.get_or_insert_with(Default::default);
        annotations.insert(NAME_ANNOTATION.to_string(), name.to_string());
        if let Some(ns) = obj.namespace() {
            annotations.insert(NAMESPACE_ANNOTATION.to_string(), ns.to_string());
        }
        Ok(out)
    }
}
