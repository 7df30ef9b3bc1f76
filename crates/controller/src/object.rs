//! Narrow view of an object that can take part in synchronization.

use std::collections::BTreeMap;

use kube::core::DynamicObject;
use vsync_core::{ConversionError, Node, ObjectKey};

/// Anything with a name, an optional namespace, labels and a lossless
/// document-tree form.
pub trait SyncObject: Clone + Send + Sync + 'static {
    fn name(&self) -> &str;
    fn namespace(&self) -> Option<&str>;
    fn labels(&self) -> Option<&BTreeMap<String, String>>;
    fn to_doc(&self) -> Result<Node, ConversionError>;
    fn from_doc(doc: Node) -> Result<Self, ConversionError>;

    fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace(), self.name())
    }
}

impl SyncObject for DynamicObject {
    fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    fn namespace(&self) -> Option<&str> {
        self.metadata.namespace.as_deref()
    }

    fn labels(&self) -> Option<&BTreeMap<String, String>> {
        self.metadata.labels.as_ref()
    }

    fn to_doc(&self) -> Result<Node, ConversionError> {
        let v = serde_json::to_value(self).map_err(ConversionError::Serialize)?;
        match Node::from_json(v) {
            doc @ Node::Mapping(_) => Ok(doc),
            other => Err(ConversionError::NotAMapping(other.type_name())),
        }
    }

    fn from_doc(doc: Node) -> Result<Self, ConversionError> {
        if !matches!(doc, Node::Mapping(_)) {
            return Err(ConversionError::NotAMapping(doc.type_name()));
        }
        serde_json::from_value(doc.into_json()).map_err(ConversionError::Deserialize)
    }
}
