//! Cross-plane name resolution.
//!
//! Forward (`PhysicalNames`): virtual `(namespace, name)` -> physical name.
//! The physical name is a readable `{name}-x-{namespace}-x-{suffix}` base,
//! sanitized to DNS-1123 label characters and cut to 52 chars, followed by
//! `-` and 10 hex chars of SHA-256 over the raw pair. The hash covers the
//! unsanitized input, so distinct pairs stay distinct after sanitizing or
//! truncation.
//!
//! Reverse (`VirtualNames`): physical name -> virtual name within a virtual
//! namespace. The readable base is parsed and the candidate is verified by
//! running the forward function again. Names that do not survive that (dots,
//! uppercase, truncation) resolve only when the caller registered them as
//! known names up front. The result depends on nothing but the inputs and
//! the resolver's construction.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use sha2::{Digest, Sha256};
use tracing::trace;

/// Maximum length of a DNS-1123 label.
pub const MAX_NAME_LEN: usize = 63;
const HASH_LEN: usize = 10;
const BASE_LEN: usize = MAX_NAME_LEN - HASH_LEN - 1;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("cannot resolve an empty name")]
    EmptyName,
    #[error("no virtual name known for {name:?} in namespace {namespace:?}")]
    Unknown { name: String, namespace: String },
}

/// Maps a name scoped by a namespace onto the other plane.
pub trait NameResolver: Send + Sync {
    fn resolve(&self, name: &str, namespace: &str) -> Result<String, ResolveError>;
}

/// Lowercase and replace anything outside `[a-z0-9-]` with `-`.
fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' { c } else { '-' }
        })
        .collect()
}

/// Virtual -> physical name resolver.
#[derive(Debug)]
pub struct PhysicalNames {
    suffix: String,
}

impl PhysicalNames {
    pub fn new(suffix: impl Into<String>) -> Self {
        Self { suffix: suffix.into() }
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    fn digest(&self, name: &str, namespace: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(namespace.as_bytes());
        hasher.update(b"/");
        hasher.update(name.as_bytes());
        hasher.update(b"/");
        hasher.update(self.suffix.as_bytes());
        let mut out = hex::encode(hasher.finalize());
        out.truncate(HASH_LEN);
        out
    }

    fn readable_tail(&self, namespace: &str) -> String {
        format!("-x-{}-x-{}", sanitize(namespace), sanitize(&self.suffix))
    }

    /// Pure forward mapping, without recording it.
    pub fn physical_name(&self, name: &str, namespace: &str) -> String {
        let mut base = sanitize(name);
        base.push_str(&self.readable_tail(namespace));
        base.truncate(BASE_LEN);
        let base = base.trim_matches('-');
        let digest = self.digest(name, namespace);
        if base.is_empty() {
            digest
        } else {
            format!("{}-{}", base, digest)
        }
    }
}

impl NameResolver for PhysicalNames {
    fn resolve(&self, name: &str, namespace: &str) -> Result<String, ResolveError> {
        if name.is_empty() {
            return Err(ResolveError::EmptyName);
        }
        let physical = self.physical_name(name, namespace);
        trace!(name, namespace, physical = %physical, "resolved physical name");
        Ok(physical)
    }
}

/// Physical -> virtual name resolver backed by a forward resolver.
#[derive(Debug, Clone)]
pub struct VirtualNames {
    forward: Arc<PhysicalNames>,
    known: Arc<FxHashMap<(String, String), String>>,
}

impl VirtualNames {
    pub fn new(forward: Arc<PhysicalNames>) -> Self {
        Self { forward, known: Arc::default() }
    }

    /// Register virtual `(namespace, name)` pairs whose physical names cannot
    /// be parsed back, such as names with dots, uppercase or over 52 chars.
    pub fn with_known<I, N, S>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (N, S)>,
        N: Into<String>,
        S: Into<String>,
    {
        let mut known = (*self.known).clone();
        for (namespace, name) in pairs {
            let (namespace, name) = (namespace.into(), name.into());
            if name.is_empty() {
                continue;
            }
            let physical = self.forward.physical_name(&name, &namespace);
            known.insert((namespace, physical), name);
        }
        self.known = Arc::new(known);
        self
    }

    fn parse_candidate<'a>(&self, physical: &'a str, namespace: &str) -> Option<&'a str> {
        // forward output is always ASCII
        if !physical.is_ascii() {
            return None;
        }
        let cut = physical.len().checked_sub(HASH_LEN + 1)?;
        let (base, hash) = physical.split_at(cut);
        if !hash.starts_with('-') || !hash[1..].bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        base.strip_suffix(self.forward.readable_tail(namespace).as_str())
            .filter(|name| !name.is_empty())
    }
}

impl NameResolver for VirtualNames {
    fn resolve(&self, name: &str, namespace: &str) -> Result<String, ResolveError> {
        if name.is_empty() {
            return Err(ResolveError::EmptyName);
        }
        if let Some(candidate) = self.parse_candidate(name, namespace) {
            if self.forward.physical_name(candidate, namespace) == name {
                return Ok(candidate.to_string());
            }
        }
        self.known
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| ResolveError::Unknown { name: name.to_string(), namespace: namespace.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn is_dns_label(s: &str) -> bool {
        !s.is_empty()
            && s.len() <= MAX_NAME_LEN
            && s.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
            && !s.starts_with('-')
            && !s.ends_with('-')
    }

    #[test]
    fn resolution_is_deterministic_and_readable() {
        let names = PhysicalNames::new("vc1");
        let a = names.resolve("web", "team-a").unwrap();
        let b = names.resolve("web", "team-a").unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with("web-x-team-a-x-vc1-"), "{}", a);
        assert_eq!(a.len(), "web-x-team-a-x-vc1-".len() + HASH_LEN);
        // a second resolver instance agrees
        assert_eq!(PhysicalNames::new("vc1").physical_name("web", "team-a"), a);
    }

    #[test]
    fn resolution_is_injective_over_pairs() {
        let names = PhysicalNames::new("vc1");
        let pairs = [
            ("a-x-b", "c"),
            ("a", "b-x-c"),
            ("web", "team-a"),
            ("web", "team-b"),
            ("Web", "team-a"),
            ("web.v2", "team-a"),
            ("web-v2", "team-a"),
            ("team-a", "web"),
        ];
        let mut seen = HashSet::new();
        for (name, ns) in pairs {
            assert!(seen.insert(names.resolve(name, ns).unwrap()), "collision for {}/{}", ns, name);
        }
        for i in 0..200 {
            let long = format!("{}-{}", "x".repeat(80), i);
            assert!(seen.insert(names.resolve(&long, "ns").unwrap()));
        }
    }

    #[test]
    fn physical_names_are_valid_dns_labels() {
        let names = PhysicalNames::new("My.Cluster");
        for (name, ns) in [
            ("web", "default"),
            ("UPPER.case_name", "ns"),
            (&"y".repeat(200)[..], "very-long-namespace-name-that-goes-on-and-on"),
            ("-leading", "trailing-"),
            ("...", "..."),
        ] {
            let p = names.resolve(name, ns).unwrap();
            assert!(is_dns_label(&p), "{:?} -> {:?}", (name, ns), p);
        }
    }

    #[test]
    fn empty_name_is_rejected() {
        let names = PhysicalNames::new("vc1");
        assert_eq!(names.resolve("", "ns"), Err(ResolveError::EmptyName));
    }

    #[test]
    fn reverse_resolution_parses_and_verifies() {
        let forward = Arc::new(PhysicalNames::new("vc1"));
        let reverse = VirtualNames::new(Arc::clone(&forward));
        let physical = forward.physical_name("my-secret", "team-a");
        assert_eq!(reverse.resolve(&physical, "team-a").unwrap(), "my-secret");
        // wrong namespace does not verify
        assert!(matches!(reverse.resolve(&physical, "team-b"), Err(ResolveError::Unknown { .. })));
        // forged hash does not verify
        let forged = format!("{}0000000000", &physical[..physical.len() - HASH_LEN]);
        assert!(reverse.resolve(&forged, "team-a").is_err());
    }

    #[test]
    fn reverse_resolution_uses_registered_names() {
        let forward = Arc::new(PhysicalNames::new("vc1"));
        let long = "z".repeat(70);
        let dotted = "web.v2";
        let p_long = forward.physical_name(&long, "ns");
        let p_dotted = forward.physical_name(dotted, "ns");

        let bare = VirtualNames::new(Arc::clone(&forward));
        assert!(matches!(bare.resolve(&p_long, "ns"), Err(ResolveError::Unknown { .. })));
        assert!(matches!(bare.resolve(&p_dotted, "ns"), Err(ResolveError::Unknown { .. })));

        let known = VirtualNames::new(Arc::clone(&forward)).with_known([("ns", long.as_str()), ("ns", dotted)]);
        assert_eq!(known.resolve(&p_long, "ns").unwrap(), long);
        assert_eq!(known.resolve(&p_dotted, "ns").unwrap(), dotted);
        // registered under one namespace only
        assert!(known.resolve(&p_dotted, "other").is_err());
    }

    #[test]
    fn reverse_resolution_ignores_forward_history() {
        let forward = Arc::new(PhysicalNames::new("vc1"));
        let reverse = VirtualNames::new(Arc::clone(&forward));
        let dotted = forward.physical_name("web.v2", "ns");
        let plain = forward.physical_name("web", "ns");
        let before = (reverse.resolve(&dotted, "ns"), reverse.resolve(&plain, "ns"));
        for i in 0..100 {
            forward.resolve(&format!("web.v{}", i), "ns").unwrap();
        }
        forward.resolve("web.v2", "ns").unwrap();
        let after = (reverse.resolve(&dotted, "ns"), reverse.resolve(&plain, "ns"));
        assert_eq!(before, after);
        assert!(after.0.is_err());
        assert_eq!(after.1.unwrap(), "web");
    }

    #[test]
    fn reverse_resolution_rejects_non_ascii_without_panicking() {
        let reverse = VirtualNames::new(Arc::new(PhysicalNames::new("vc1")));
        for input in ["ééééééé", "é", "web-x-ns-x-vc1-ééééé", "名前-x-ns-x-vc1-0123456789"] {
            assert!(matches!(reverse.resolve(input, "ns"), Err(ResolveError::Unknown { .. })), "{}", input);
        }
    }
}
