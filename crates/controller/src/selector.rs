//! Label selector matching.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelectorRequirement;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::object::SyncObject;

static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z0-9][-A-Za-z0-9_.]*)?[A-Za-z0-9]$").expect("valid regex"));
static SUBDOMAIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$").expect("valid regex")
});

const MAX_NAME_LEN: usize = 63;
const MAX_PREFIX_LEN: usize = 253;

/// Selector as written in configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectorConfig {
    /// Exact `key: value` requirements, AND-combined.
    #[serde(default, alias = "matchLabels", skip_serializing_if = "BTreeMap::is_empty")]
    pub label_selector: BTreeMap<String, String>,
    /// Set-based requirements with Kubernetes semantics.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_expressions: Vec<LabelSelectorRequirement>,
}

impl SelectorConfig {
    pub fn is_empty(&self) -> bool {
        self.label_selector.is_empty() && self.match_expressions.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectorParseError {
    #[error("invalid label key {key:?}: {reason}")]
    InvalidKey { key: String, reason: &'static str },
    #[error("invalid label value {value:?} for key {key:?}")]
    InvalidValue { key: String, value: String },
    #[error("unknown operator {op:?} for key {key:?}")]
    UnknownOperator { key: String, op: String },
    #[error("operator {op} for key {key:?} needs at least one value")]
    MissingValues { key: String, op: Operator },
    #[error("operator {op} for key {key:?} takes no values")]
    UnexpectedValues { key: String, op: Operator },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equals,
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Operator::Equals => "=",
            Operator::In => "In",
            Operator::NotIn => "NotIn",
            Operator::Exists => "Exists",
            Operator::DoesNotExist => "DoesNotExist",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    key: String,
    op: Operator,
    values: SmallVec<[String; 2]>,
}

impl Requirement {
    fn matches(&self, labels: Option<&BTreeMap<String, String>>) -> bool {
        let value = labels.and_then(|l| l.get(&self.key));
        match self.op {
            Operator::Equals | Operator::In => value.map(|v| self.values.contains(v)).unwrap_or(false),
            Operator::NotIn => value.map(|v| !self.values.contains(v)).unwrap_or(true),
            Operator::Exists => value.is_some(),
            Operator::DoesNotExist => value.is_none(),
        }
    }
}

/// Parsed, validated label selector. Requirements are AND-combined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    requirements: Vec<Requirement>,
}

fn validate_key(key: &str) -> Result<(), SelectorParseError> {
    let invalid = |reason| SelectorParseError::InvalidKey { key: key.to_string(), reason };
    let name = match key.split_once('/') {
        Some((prefix, name)) => {
            if prefix.is_empty() || prefix.len() > MAX_PREFIX_LEN || !SUBDOMAIN_RE.is_match(prefix) {
                return Err(invalid("prefix must be a DNS subdomain of at most 253 characters"));
            }
            name
        }
        None => key,
    };
    if name.is_empty() || name.len() > MAX_NAME_LEN || !NAME_RE.is_match(name) {
        return Err(invalid("name must be 1-63 alphanumeric characters, '-', '_' or '.', starting and ending alphanumeric"));
    }
    Ok(())
}

fn validate_value(key: &str, value: &str) -> Result<(), SelectorParseError> {
    if value.is_empty() || (value.len() <= MAX_NAME_LEN && NAME_RE.is_match(value)) {
        Ok(())
    } else {
        Err(SelectorParseError::InvalidValue { key: key.to_string(), value: value.to_string() })
    }
}

impl Selector {
    /// Parse a configured selector. An empty configuration yields `None`,
    /// which matches every object.
    pub fn parse(cfg: &SelectorConfig) -> Result<Option<Self>, SelectorParseError> {
        if cfg.is_empty() {
            return Ok(None);
        }
        let mut requirements = Vec::with_capacity(cfg.label_selector.len() + cfg.match_expressions.len());
        for (key, value) in cfg.label_selector.iter() {
            validate_key(key)?;
            validate_value(key, value)?;
            requirements.push(Requirement { key: key.clone(), op: Operator::Equals, values: smallvec::smallvec![value.clone()] });
        }
        for expr in cfg.match_expressions.iter() {
            validate_key(&expr.key)?;
            let op = match expr.operator.as_str() {
                "In" => Operator::In,
                "NotIn" => Operator::NotIn,
                "Exists" => Operator::Exists,
                "DoesNotExist" => Operator::DoesNotExist,
                other => return Err(SelectorParseError::UnknownOperator { key: expr.key.clone(), op: other.to_string() }),
            };
            let values: SmallVec<[String; 2]> = expr.values.iter().flatten().cloned().collect();
            match op {
                Operator::In | Operator::NotIn if values.is_empty() => {
                    return Err(SelectorParseError::MissingValues { key: expr.key.clone(), op })
                }
                Operator::Exists | Operator::DoesNotExist if !values.is_empty() => {
                    return Err(SelectorParseError::UnexpectedValues { key: expr.key.clone(), op })
                }
                _ => {}
            }
            for v in values.iter() {
                validate_value(&expr.key, v)?;
            }
            requirements.push(Requirement { key: expr.key.clone(), op, values });
        }
        Ok(Some(Self { requirements }))
    }

    /// Exact-match selector from a label map.
    pub fn from_labels<I, K, V>(labels: I) -> Result<Option<Self>, SelectorParseError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let cfg = SelectorConfig {
            label_selector: labels.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
            match_expressions: Vec::new(),
        };
        Self::parse(&cfg)
    }

    pub fn matches_labels(&self, labels: Option<&BTreeMap<String, String>>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }

    pub fn len(&self) -> usize {
        self.requirements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }
}

/// Whether `obj` participates in synchronization. No selector matches everything.
pub fn matches<O: SyncObject>(obj: &O, selector: Option<&Selector>) -> bool {
    selector.map(|s| s.matches_labels(obj.labels())).unwrap_or(true)
}
