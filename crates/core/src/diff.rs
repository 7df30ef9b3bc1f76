//! Minimal diffs between two JSON documents.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub adds: usize,
    pub updates: usize,
    pub removes: usize,
}

impl DiffSummary {
    pub fn is_empty(&self) -> bool {
        self.adds == 0 && self.updates == 0 && self.removes == 0
    }
}

/// Count keys added, updated and removed going from `base` to `target`.
pub fn diff_summary(target: &Json, base: &Json) -> DiffSummary {
    fn walk(a: &Json, b: &Json, out: &mut DiffSummary) {
        match (a, b) {
            (Json::Object(ao), Json::Object(bo)) => {
                for (k, av) in ao.iter() {
                    match bo.get(k) {
                        Some(bv) if av == bv => {}
                        Some(bv) => walk(av, bv, out),
                        None => out.adds += 1,
                    }
                }
                out.removes += bo.keys().filter(|k| !ao.contains_key(*k)).count();
            }
            (Json::Array(aa), Json::Array(bb)) => {
                let min_len = aa.len().min(bb.len());
                out.updates += (0..min_len).filter(|i| aa[*i] != bb[*i]).count();
                out.adds += aa.len().saturating_sub(bb.len());
                out.removes += bb.len().saturating_sub(aa.len());
            }
            (av, bv) => {
                if av != bv {
                    out.updates += 1;
                }
            }
        }
    }
    let mut out = DiffSummary::default();
    walk(target, base, &mut out);
    out
}

/// JSON merge patch (RFC 7386) that turns `current` into `target`.
/// Arrays are replaced wholesale; removed keys become `null`.
pub fn merge_patch(current: &Json, target: &Json) -> Json {
    match (current, target) {
        (Json::Object(cur), Json::Object(tgt)) => {
            let mut patch = Map::new();
            for (k, tv) in tgt.iter() {
                match cur.get(k) {
                    Some(cv) if cv == tv => {}
                    Some(cv) if cv.is_object() && tv.is_object() => {
                        patch.insert(k.clone(), merge_patch(cv, tv));
                    }
                    _ => {
                        patch.insert(k.clone(), tv.clone());
                    }
                }
            }
            for k in cur.keys() {
                if !tgt.contains_key(k) {
                    patch.insert(k.clone(), Json::Null);
                }
            }
            Json::Object(patch)
        }
        (_, tgt) => tgt.clone(),
    }
}

/// Whether a merge patch changes nothing.
pub fn is_noop_patch(patch: &Json) -> bool {
    matches!(patch, Json::Object(m) if m.is_empty())
}
