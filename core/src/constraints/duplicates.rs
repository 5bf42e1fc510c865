//! Duplicate and conflict detection between entries that govern the same
//! pair of selections.
//!
//! Each entry's first two `elements` are reduced to structural keys; the
//! sorted pair forms its signature. Entries sharing a signature are
//! duplicates when their types fall in the same family, conflicts
//! otherwise. Both kinds are reported with status `duplicate`.

use super::types::ConstraintEntry;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Deepest selection nesting walked when building a key.
pub const MAX_KEY_DEPTH: usize = 5;

const ID_FIELDS: &[&str] = &["uuid", "id", "componentId", "component_id", "objectId"];
const NAME_FIELDS: &[&str] = &["name", "componentName", "component_name", "label"];

/// Families whose entries are compared for duplicates. Aliases are matched
/// after stripping case, whitespace and separators.
const FAMILIES: &[(&str, &[&str])] = &[
    ("touch_align", &["touchalign", "touch", "align", "touchalignconstraint"]),
    ("distance", &["distance", "offset", "distanceconstraint"]),
    ("coincident", &["coincident", "mate", "coincidentconstraint"]),
    ("angle", &["angle", "angleconstraint"]),
    ("parallel", &["parallel", "parallelconstraint"]),
];

#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateInfo {
    pub message: String,
    pub signature: String,
    /// Same-family IDs first, then cross-family, each in first-seen order.
    pub related_ids: Vec<String>,
    pub duplicate_ids: Vec<String>,
    pub conflict_ids: Vec<String>,
    pub family: &'static str,
}

/// Keyed by entry ID.
pub type DuplicateMap = HashMap<String, DuplicateInfo>;

pub fn duplicate_family(constraint_type: &str) -> Option<&'static str> {
    let compact: String = constraint_type
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect();
    FAMILIES
        .iter()
        .find(|(_, aliases)| aliases.contains(&compact.as_str()))
        .map(|(family, _)| *family)
}

/// Structural key of one selection, or `None` when nothing stable can be
/// derived from it.
pub fn selection_key(selection: &Value) -> Option<String> {
    let mut visited = HashSet::new();
    structural_key(selection, 0, &mut visited)
}

fn structural_key(value: &Value, depth: usize, visited: &mut HashSet<*const Value>) -> Option<String> {
    if depth > MAX_KEY_DEPTH {
        return None;
    }
    let addr = value as *const Value;
    if !visited.insert(addr) {
        return None;
    }

    let key = match value {
        Value::String(s) if !s.trim().is_empty() => Some(format!("ref:{}", s.trim())),
        Value::Number(n) => Some(format!("num:{}", n)),
        Value::Object(map) => {
            let direct = |fields: &[&str], tag: &str| {
                fields.iter().find_map(|f| match map.get(*f) {
                    Some(Value::String(s)) if !s.trim().is_empty() => Some(format!("{}:{}", tag, s.trim())),
                    Some(Value::Number(n)) => Some(format!("{}:{}", tag, n)),
                    _ => None,
                })
            };
            direct(ID_FIELDS, "id")
                .or_else(|| direct(NAME_FIELDS, "name"))
                .or_else(|| path_key(map.get("path")))
                .or_else(|| composite_key(map, depth, visited))
        }
        Value::Array(items) => {
            let parts: Vec<String> = items
                .iter()
                .filter_map(|item| structural_key(item, depth + 1, visited))
                .collect();
            (!parts.is_empty()).then(|| format!("[{}]", parts.join(",")))
        }
        _ => None,
    };

    visited.remove(&addr);
    key
}

fn path_key(path: Option<&Value>) -> Option<String> {
    let Some(Value::Array(segments)) = path else {
        return None;
    };
    let parts: Vec<String> = segments
        .iter()
        .filter_map(|s| match s {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .collect();
    (!parts.is_empty()).then(|| format!("path:{}", parts.join("/")))
}

fn composite_key(
    map: &serde_json::Map<String, Value>,
    depth: usize,
    visited: &mut HashSet<*const Value>,
) -> Option<String> {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    let mut parts = Vec::new();
    for k in keys {
        let v = &map[k];
        let part = match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Null => None,
            nested => structural_key(nested, depth + 1, visited),
        };
        if let Some(part) = part {
            parts.push(format!("{}={}", k, part));
        }
    }
    (!parts.is_empty()).then(|| format!("{{{}}}", parts.join(";")))
}

/// Sorted, joined keys of the first two elements.
pub fn signature_for(elements: &[Value]) -> Option<String> {
    if elements.len() < 2 {
        return None;
    }
    let mut keys = [selection_key(&elements[0])?, selection_key(&elements[1])?];
    keys.sort();
    Some(format!("{}|{}", keys[0], keys[1]))
}

/// Groups enabled, duplicate-comparable entries by signature and reports
/// every group with more than one member.
pub fn detect_duplicates(entries: &[ConstraintEntry]) -> DuplicateMap {
    struct Candidate<'a> {
        id: &'a str,
        family: &'static str,
    }

    let mut groups: Vec<(String, Vec<Candidate<'_>>)> = Vec::new();
    let mut group_index: HashMap<String, usize> = HashMap::new();

    for entry in entries.iter().filter(|e| e.enabled) {
        let Some(family) = duplicate_family(&entry.constraint_type) else {
            continue;
        };
        let Some(signature) = signature_for(entry.elements()) else {
            continue;
        };
        let slot = *group_index.entry(signature.clone()).or_insert_with(|| {
            groups.push((signature, Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(Candidate { id: &entry.id, family });
    }

    let mut report = DuplicateMap::new();
    for (signature, members) in groups.iter().filter(|(_, m)| m.len() > 1) {
        for member in members {
            let mut duplicate_ids: Vec<String> = Vec::new();
            let mut conflict_ids: Vec<String> = Vec::new();
            for other in members.iter().filter(|o| o.id != member.id) {
                let bucket = if other.family == member.family {
                    &mut duplicate_ids
                } else {
                    &mut conflict_ids
                };
                if !bucket.iter().any(|id| id == other.id) {
                    bucket.push(other.id.to_string());
                }
            }

            let mut message_parts = Vec::new();
            if !duplicate_ids.is_empty() {
                message_parts.push(format!("Duplicate of {}", duplicate_ids.join(", ")));
            }
            if !conflict_ids.is_empty() {
                message_parts.push(format!("Conflicts with {}", conflict_ids.join(", ")));
            }

            let mut related_ids = duplicate_ids.clone();
            for id in &conflict_ids {
                if !related_ids.contains(id) {
                    related_ids.push(id.clone());
                }
            }

            report.insert(
                member.id.to_string(),
                DuplicateInfo {
                    message: message_parts.join("; "),
                    signature: signature.clone(),
                    related_ids,
                    duplicate_ids,
                    conflict_ids,
                    family: member.family,
                },
            );
        }
    }
    report
}
