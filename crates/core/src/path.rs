//! Paths into a document tree.
//!
//! Two spellings are accepted:
//! - pointer form: `/spec/replicas`, `/metadata/labels/app.kubernetes.io~1name`, `/items/-`
//! - dotted form: `spec.replicas`, `spec.items[0].name`

use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Segment {
    /// Mapping key.
    Field(String),
    /// Sequence index. On a mapping this addresses the key with the same digits.
    Index(usize),
    /// One past the end of a sequence (`-` in pointer form).
    Append,
}

impl Segment {
    /// Key to use when this segment lands on a mapping.
    pub fn as_key(&self) -> String {
        match self {
            Segment::Field(k) => k.clone(),
            Segment::Index(i) => i.to_string(),
            Segment::Append => "-".to_string(),
        }
    }

    /// Whether a missing container for this segment should be a sequence.
    pub fn wants_sequence(&self) -> bool {
        matches!(self, Segment::Index(_) | Segment::Append)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("empty path")]
    Empty,
    #[error("empty segment in path {0:?}")]
    EmptySegment(String),
    #[error("invalid escape in path {0:?} (only ~0 and ~1 are allowed)")]
    BadEscape(String),
    #[error("invalid character {ch:?} in path {path:?}")]
    BadChar { path: String, ch: char },
    #[error("malformed index in path {0:?}")]
    BadIndex(String),
}

/// Parsed path. Never empty: the document root itself is not addressable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Path {
    segments: SmallVec<[Segment; 8]>,
}

impl Path {
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        if raw.is_empty() {
            return Err(PathError::Empty);
        }
        let segments = match raw.strip_prefix('/') {
            Some(rest) => parse_pointer(raw, rest)?,
            None => parse_dotted(raw)?,
        };
        if segments.is_empty() {
            return Err(PathError::Empty);
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Final segment and the parent segments. `None` never happens for parsed paths.
    pub fn split_last(&self) -> Option<(&Segment, &[Segment])> {
        self.segments.split_last()
    }
}

impl std::str::FromStr for Path {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Path::parse(s)
    }
}

impl fmt::Display for Path {
    /// Always renders in pointer form.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for seg in self.segments.iter() {
            match seg {
                Segment::Field(k) => write!(f, "/{}", k.replace('~', "~0").replace('/', "~1"))?,
                Segment::Index(i) => write!(f, "/{}", i)?,
                Segment::Append => f.write_str("/-")?,
            }
        }
        Ok(())
    }
}

fn parse_index(token: &str) -> Option<usize> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    // "01" is a key, not an index
    if token.len() > 1 && token.starts_with('0') {
        return None;
    }
    token.parse().ok()
}

fn parse_pointer(raw: &str, rest: &str) -> Result<SmallVec<[Segment; 8]>, PathError> {
    let mut out = SmallVec::new();
    for token in rest.split('/') {
        if token.is_empty() {
            return Err(PathError::EmptySegment(raw.to_string()));
        }
        if token == "-" {
            out.push(Segment::Append);
            continue;
        }
        if let Some(i) = parse_index(token) {
            out.push(Segment::Index(i));
            continue;
        }
        let mut key = String::with_capacity(token.len());
        let mut chars = token.chars();
        while let Some(c) = chars.next() {
            if c == '~' {
                match chars.next() {
                    Some('0') => key.push('~'),
                    Some('1') => key.push('/'),
                    _ => return Err(PathError::BadEscape(raw.to_string())),
                }
            } else {
                key.push(c);
            }
        }
        out.push(Segment::Field(key));
    }
    Ok(out)
}

fn parse_dotted(raw: &str) -> Result<SmallVec<[Segment; 8]>, PathError> {
    let s = raw.strip_prefix('.').unwrap_or(raw);
    let mut out = SmallVec::new();
    for seg in s.split('.') {
        if seg.is_empty() {
            return Err(PathError::EmptySegment(raw.to_string()));
        }
        let (key, mut tail) = match seg.find('[') {
            Some(brk) => (&seg[..brk], &seg[brk..]),
            None => (seg, ""),
        };
        if key.is_empty() {
            return Err(PathError::EmptySegment(raw.to_string()));
        }
        if let Some(ch) = key.chars().find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-')) {
            return Err(PathError::BadChar { path: raw.to_string(), ch });
        }
        out.push(Segment::Field(key.to_string()));
        // any number of [n] suffixes
        while !tail.is_empty() {
            let inner = tail.strip_prefix('[').ok_or_else(|| PathError::BadIndex(raw.to_string()))?;
            let end = inner.find(']').ok_or_else(|| PathError::BadIndex(raw.to_string()))?;
            let idx: usize = inner[..end]
                .parse()
                .map_err(|_| PathError::BadIndex(raw.to_string()))?;
            out.push(Segment::Index(idx));
            tail = &inner[end + 1..];
        }
    }
    Ok(out)
}
