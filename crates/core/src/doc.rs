//! Semantic document tree.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Number, Value as Json};

use crate::path::{Path, Segment};

#[derive(Debug, Clone)]
pub enum Scalar {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
}

/// A typed tree node. Mapping keys are kept sorted so rendering is stable.
#[derive(Debug, Clone)]
pub enum Node {
    Mapping(BTreeMap<String, Node>),
    Sequence(Vec<Node>),
    Scalar(Scalar),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DocError {
    #[error("expected {expected} at {at:?}, found {found}")]
    TypeMismatch { at: String, expected: &'static str, found: &'static str },
    #[error("index {index} out of range at {at:?} (len {len})")]
    IndexOutOfRange { at: String, index: usize, len: usize },
}

impl Node {
    pub fn null() -> Self {
        Node::Scalar(Scalar::Null)
    }

    pub fn mapping() -> Self {
        Node::Mapping(BTreeMap::new())
    }

    pub fn string(s: impl Into<String>) -> Self {
        Node::Scalar(Scalar::String(s.into()))
    }

    pub fn from_json(v: Json) -> Self {
        match v {
            Json::Null => Node::Scalar(Scalar::Null),
            Json::Bool(b) => Node::Scalar(Scalar::Bool(b)),
            Json::Number(n) => Node::Scalar(Scalar::Number(n)),
            Json::String(s) => Node::Scalar(Scalar::String(s)),
            Json::Array(items) => Node::Sequence(items.into_iter().map(Node::from_json).collect()),
            Json::Object(map) => Node::Mapping(map.into_iter().map(|(k, v)| (k, Node::from_json(v))).collect()),
        }
    }

    pub fn into_json(self) -> Json {
        match self {
            Node::Scalar(Scalar::Null) => Json::Null,
            Node::Scalar(Scalar::Bool(b)) => Json::Bool(b),
            Node::Scalar(Scalar::Number(n)) => Json::Number(n),
            Node::Scalar(Scalar::String(s)) => Json::String(s),
            Node::Sequence(items) => Json::Array(items.into_iter().map(Node::into_json).collect()),
            Node::Mapping(map) => Json::Object(map.into_iter().map(|(k, v)| (k, v.into_json())).collect()),
        }
    }

    pub fn to_json(&self) -> Json {
        self.clone().into_json()
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Node::Mapping(_) => "mapping",
            Node::Sequence(_) => "sequence",
            Node::Scalar(Scalar::Null) => "null",
            Node::Scalar(_) => "scalar",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Node::Scalar(Scalar::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Node::Scalar(Scalar::Null))
    }

    /// Null, empty string, empty mapping or empty sequence.
    pub fn is_empty(&self) -> bool {
        match self {
            Node::Scalar(Scalar::Null) => true,
            Node::Scalar(Scalar::String(s)) => s.is_empty(),
            Node::Scalar(_) => false,
            Node::Mapping(m) => m.is_empty(),
            Node::Sequence(v) => v.is_empty(),
        }
    }

    pub fn get(&self, path: &Path) -> Option<&Node> {
        let mut cur = self;
        for seg in path.segments() {
            cur = match (cur, seg) {
                (Node::Mapping(m), seg) => m.get(&seg.as_key())?,
                (Node::Sequence(v), Segment::Index(i)) => v.get(*i)?,
                _ => return None,
            };
        }
        Some(cur)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.get(path).is_some()
    }

    fn lookup_mut(&mut self, segments: &[Segment]) -> Option<&mut Node> {
        let mut cur = self;
        for seg in segments {
            cur = match (cur, seg) {
                (Node::Mapping(m), seg) => m.get_mut(&seg.as_key())?,
                (Node::Sequence(v), Segment::Index(i)) => v.get_mut(*i)?,
                _ => return None,
            };
        }
        Some(cur)
    }

    pub fn get_mut(&mut self, path: &Path) -> Option<&mut Node> {
        self.lookup_mut(path.segments())
    }

    /// Write `value` at `path`, creating missing intermediate mappings or
    /// sequences. A null intermediate is replaced by a container; any other
    /// scalar in the way is an error. Returns the previous value.
    pub fn set(&mut self, path: &Path, value: Node) -> Result<Option<Node>, DocError> {
        let segments = path.segments();
        let mut cur = self;
        for (depth, seg) in segments.iter().enumerate() {
            if cur.is_null() {
                *cur = if seg.wants_sequence() { Node::Sequence(Vec::new()) } else { Node::mapping() };
            }
            let last = depth + 1 == segments.len();
            let at = || render_prefix(&segments[..depth]);
            let slot: &mut Node = match cur {
                Node::Mapping(m) => m.entry(seg.as_key()).or_insert_with(Node::null),
                Node::Sequence(v) => {
                    let len = v.len();
                    let index = match seg {
                        Segment::Index(i) => *i,
                        Segment::Append => len,
                        Segment::Field(_) => {
                            return Err(DocError::TypeMismatch { at: at(), expected: "mapping", found: "sequence" })
                        }
                    };
                    if index > len {
                        return Err(DocError::IndexOutOfRange { at: at(), index, len });
                    }
                    if index == len {
                        v.push(Node::null());
                        if last {
                            v[index] = value;
                            return Ok(None);
                        }
                    }
                    &mut v[index]
                }
                Node::Scalar(_) => {
                    let expected = if seg.wants_sequence() { "sequence" } else { "mapping" };
                    return Err(DocError::TypeMismatch { at: at(), expected, found: cur.type_name() });
                }
            };
            if last {
                let prev = std::mem::replace(slot, value);
                return Ok(Some(prev));
            }
            cur = slot;
        }
        Ok(None)
    }

    /// Remove the node at `path`. Missing paths are not an error.
    pub fn remove(&mut self, path: &Path) -> Option<Node> {
        let (last, parent) = path.split_last()?;
        match (self.lookup_mut(parent)?, last) {
            (Node::Mapping(m), seg) => m.remove(&seg.as_key()),
            (Node::Sequence(v), Segment::Index(i)) if *i < v.len() => Some(v.remove(*i)),
            _ => None,
        }
    }
}

fn render_prefix(segments: &[Segment]) -> String {
    if segments.is_empty() {
        return "/".to_string();
    }
    let mut out = String::new();
    for seg in segments {
        out.push('/');
        out.push_str(&seg.as_key().replace('~', "~0").replace('/', "~1"));
    }
    out
}

fn as_integer(n: &Number) -> Option<i128> {
    n.as_i64().map(i128::from).or_else(|| n.as_u64().map(i128::from))
}

/// Exact: a float equals an integer only if it is integral and converts
/// back to that same integer.
fn integer_equals_float(i: i128, f: f64) -> bool {
    f.is_finite() && f.fract() == 0.0 && f.abs() < 2f64.powi(127) && f as i128 == i
}

fn numbers_equal(a: &Number, b: &Number) -> bool {
    match (as_integer(a), as_integer(b)) {
        (Some(x), Some(y)) => x == y,
        (Some(i), None) => b.as_f64().map(|f| integer_equals_float(i, f)).unwrap_or(false),
        (None, Some(i)) => a.as_f64().map(|f| integer_equals_float(i, f)).unwrap_or(false),
        (None, None) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
    }
}

/// Recursive structural equality over all node types. Numbers compare by
/// value, so `3` and `3.0` are equal.
pub fn structurally_equal(a: &Node, b: &Node) -> bool {
    match (a, b) {
        (Node::Scalar(x), Node::Scalar(y)) => match (x, y) {
            (Scalar::Null, Scalar::Null) => true,
            (Scalar::Bool(p), Scalar::Bool(q)) => p == q,
            (Scalar::Number(p), Scalar::Number(q)) => numbers_equal(p, q),
            (Scalar::String(p), Scalar::String(q)) => p == q,
            _ => false,
        },
        (Node::Sequence(x), Node::Sequence(y)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(p, q)| structurally_equal(p, q))
        }
        (Node::Mapping(x), Node::Mapping(y)) => {
            x.len() == y.len()
                && x.iter().all(|(k, v)| y.get(k).map(|w| structurally_equal(v, w)).unwrap_or(false))
        }
        _ => false,
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        structurally_equal(self, other)
    }
}

impl From<Json> for Node {
    fn from(v: Json) -> Self {
        Node::from_json(v)
    }
}

impl From<Node> for Json {
    fn from(n: Node) -> Self {
        n.into_json()
    }
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Node {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Json::deserialize(deserializer).map(Node::from_json)
    }
}
