//! Ordered collection of constraint entries.
//!
//! Every mutation goes through the history so that duplicate statuses stay
//! fresh, listeners hear about it, and an attached [`RunScheduler`] gets a
//! (coalesced) solve request.

use super::duplicates::{detect_duplicates, DuplicateMap};
use super::merge::{mark_duplicate, mark_status};
use super::registry::{normalize_type_key, ConstraintKind, ConstraintRegistry};
use super::scheduler::RunScheduler;
use super::types::{ConstraintEntry, ConstraintStatus, InputParams, PersistentData};
use super::{AssemblyError, AssemblyResult};
use crate::variables::VariableStore;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

pub const DISABLED_MESSAGE: &str = "Constraint disabled";

/// Prefix for generated IDs of entries whose type is not registered.
const FALLBACK_ID_PREFIX: &str = "C";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Add,
    Remove,
    Move,
    Update,
    Enable,
    Open,
    Replace,
    Check,
    Solve,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryChange {
    pub kind: ChangeKind,
    pub id: Option<String>,
}

type Listener = Box<dyn Fn(&HistoryChange) + Send + Sync>;

/// Plain serializable form of a history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySnapshot {
    pub id_counter: u64,
    pub constraints: Vec<SnapshotEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotEntry {
    #[serde(rename = "type")]
    pub constraint_type: String,
    #[serde(default)]
    pub input_params: InputParams,
    #[serde(default)]
    pub persistent_data: PersistentData,
    #[serde(default)]
    pub open: bool,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

pub struct ConstraintHistory {
    entries: Vec<ConstraintEntry>,
    id_counter: u64,
    registry: Arc<ConstraintRegistry>,
    /// Document variables referenced by expression-valued parameters.
    pub variables: VariableStore,
    listeners: Vec<Listener>,
    scheduler: Option<Arc<RunScheduler>>,
}

impl fmt::Debug for ConstraintHistory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConstraintHistory")
            .field("entries", &self.entries)
            .field("id_counter", &self.id_counter)
            .field("registry", &self.registry)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl ConstraintHistory {
    pub fn new(registry: Arc<ConstraintRegistry>) -> Self {
        Self {
            entries: Vec::new(),
            id_counter: 0,
            registry,
            variables: VariableStore::new(),
            listeners: Vec::new(),
            scheduler: None,
        }
    }

    pub fn with_builtin() -> Self {
        Self::new(Arc::new(ConstraintRegistry::with_builtin()))
    }

    pub fn registry(&self) -> &Arc<ConstraintRegistry> {
        &self.registry
    }

    pub fn entries(&self) -> &[ConstraintEntry] {
        &self.entries
    }

    pub(crate) fn entries_mut(&mut self) -> &mut [ConstraintEntry] {
        &mut self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn id_counter(&self) -> u64 {
        self.id_counter
    }

    pub fn get(&self, id: &str) -> Option<&ConstraintEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index_of(id).is_some()
    }

    /// Implementation bound to an entry's type, if it still resolves.
    pub fn kind_of(&self, entry: &ConstraintEntry) -> Option<Arc<dyn ConstraintKind>> {
        self.registry.get_safe(&entry.constraint_type)
    }

    /// False for entries whose implementation is missing, e.g. from a
    /// removed plugin. Such entries stay editable and removable.
    pub fn is_registered(&self, id: &str) -> bool {
        self.get(id).map(|e| self.registry.contains(&e.constraint_type)).unwrap_or(false)
    }

    pub fn subscribe<F>(&mut self, listener: F)
    where
        F: Fn(&HistoryChange) + Send + Sync + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    pub fn attach_scheduler(&mut self, scheduler: Arc<RunScheduler>) {
        self.scheduler = Some(scheduler);
    }

    pub fn detach_scheduler(&mut self) -> Option<Arc<RunScheduler>> {
        self.scheduler.take()
    }

    pub(crate) fn emit(&self, kind: ChangeKind, id: Option<&str>) {
        let change = HistoryChange { kind, id: id.map(str::to_string) };
        for listener in &self.listeners {
            listener(&change);
        }
    }

    fn request_run(&self) {
        if let Some(scheduler) = &self.scheduler {
            scheduler.request();
        }
    }

    fn generate_id(&mut self, prefix: &str) -> String {
        loop {
            self.id_counter += 1;
            let candidate = format!("{}{}", prefix, self.id_counter);
            if !self.contains(&candidate) {
                return candidate;
            }
        }
    }

    fn bump_counter_for(&mut self, id: &str) {
        if let Some(n) = numeric_suffix(id) {
            self.id_counter = self.id_counter.max(n);
        }
    }

    /// Appends a new entry seeded from the type's schema defaults, with
    /// `initial_input` overlaid. Returns the entry's ID.
    pub fn add_constraint(
        &mut self,
        constraint_type: &str,
        initial_input: Option<InputParams>,
    ) -> AssemblyResult<String> {
        let kind = self
            .registry
            .get_safe(constraint_type)
            .ok_or_else(|| AssemblyError::UnknownConstraintType(constraint_type.to_string()))?;

        let mut params = kind.default_params();
        if let Some(input) = initial_input {
            params.extend(input);
        }
        migrate_legacy_id(&mut params);

        let id = match requested_id(&params) {
            Some(id) if !self.contains(&id) => {
                self.bump_counter_for(&id);
                id
            }
            _ => self.generate_id(kind.id_prefix()),
        };

        self.entries.push(ConstraintEntry::new(&id, kind.type_key(), params));
        self.emit(ChangeKind::Add, Some(&id));
        self.refresh_statuses();
        self.request_run();
        Ok(id)
    }

    pub fn remove_constraint(&mut self, id: &str) -> Option<ConstraintEntry> {
        let index = self.index_of(id)?;
        let removed = self.entries.remove(index);
        self.emit(ChangeKind::Remove, Some(id));
        self.refresh_statuses();
        self.request_run();
        Some(removed)
    }

    /// Moves an entry by `delta` positions. Returns false when the entry is
    /// missing or the target index falls outside the list.
    pub fn move_constraint(&mut self, id: &str, delta: isize) -> bool {
        let Some(index) = self.index_of(id) else {
            return false;
        };
        let target = index as isize + delta;
        if target < 0 || target >= self.entries.len() as isize {
            return false;
        }
        if delta == 0 {
            return true;
        }
        let entry = self.entries.remove(index);
        self.entries.insert(target as usize, entry);
        self.emit(ChangeKind::Move, Some(id));
        self.request_run();
        true
    }

    /// Applies `mutator` to the entry's parameters, then re-syncs the ID
    /// mirrored in `inputParams.id`.
    pub fn update_constraint_params<F>(&mut self, id: &str, mutator: F) -> AssemblyResult<()>
    where
        F: FnOnce(&mut InputParams),
    {
        let index = self
            .index_of(id)
            .ok_or_else(|| AssemblyError::ConstraintNotFound(id.to_string()))?;

        let mut params = self.entries[index].input_params.clone();
        mutator(&mut params);
        migrate_legacy_id(&mut params);

        let current = self.entries[index].id.clone();
        let new_id = match requested_id(&params) {
            Some(requested) if requested != current && !self.contains(&requested) => {
                self.bump_counter_for(&requested);
                requested
            }
            _ => current,
        };

        let entry = &mut self.entries[index];
        entry.input_params = params;
        entry.id = new_id.clone();
        entry.sync_id_param();

        self.emit(ChangeKind::Update, Some(&new_id));
        self.refresh_statuses();
        self.request_run();
        Ok(())
    }

    /// Returns whether the flag changed.
    pub fn set_constraint_enabled(&mut self, id: &str, enabled: bool) -> AssemblyResult<bool> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| AssemblyError::ConstraintNotFound(id.to_string()))?;
        if entry.enabled == enabled {
            return Ok(false);
        }

        entry.enabled = enabled;
        let data = &mut entry.persistent_data;
        if !enabled {
            mark_status(data, ConstraintStatus::Disabled, DISABLED_MESSAGE);
            data.error = None;
        } else if data.status == ConstraintStatus::Disabled {
            mark_status(data, ConstraintStatus::Pending, "");
        }

        self.emit(ChangeKind::Enable, Some(id));
        self.refresh_statuses();
        self.request_run();
        Ok(true)
    }

    pub fn set_open_state(&mut self, id: &str, open: bool) -> bool {
        let Some(entry) = self.entries.iter_mut().find(|e| e.id == id) else {
            return false;
        };
        if entry.open != open {
            entry.open = open;
            self.emit(ChangeKind::Open, Some(id));
        }
        true
    }

    /// Opens `id` and closes every other entry.
    pub fn set_exclusive_open(&mut self, id: &str) -> bool {
        if !self.contains(id) {
            return false;
        }
        for entry in &mut self.entries {
            entry.open = entry.id == id;
        }
        self.emit(ChangeKind::Open, Some(id));
        true
    }

    /// Duplicate groups of the current entries, without touching statuses.
    pub fn detect_duplicates(&self) -> DuplicateMap {
        detect_duplicates(&self.entries)
    }

    /// Status-only refresh: marks duplicates and unregistered types and
    /// clears stale duplicate marks. Never solves, never moves the scene.
    pub fn check_constraint_errors(&mut self) -> DuplicateMap {
        let duplicates = self.refresh_statuses();
        self.emit(ChangeKind::Check, None);
        duplicates
    }

    pub(crate) fn refresh_statuses(&mut self) -> DuplicateMap {
        let duplicates = detect_duplicates(&self.entries);
        for entry in &mut self.entries {
            let data = &mut entry.persistent_data;
            if !entry.enabled {
                if data.status != ConstraintStatus::Disabled {
                    mark_status(data, ConstraintStatus::Disabled, DISABLED_MESSAGE);
                }
                continue;
            }
            if let Some(info) = duplicates.get(&entry.id) {
                mark_duplicate(data, info);
                continue;
            }
            if !self.registry.contains(&entry.constraint_type) {
                let message = format!("Unregistered constraint type '{}'", entry.constraint_type);
                mark_status(data, ConstraintStatus::Error, &message);
                continue;
            }
            if data.status == ConstraintStatus::Duplicate {
                mark_status(data, ConstraintStatus::Pending, "");
            }
        }
        duplicates
    }

    pub fn snapshot(&self) -> HistorySnapshot {
        HistorySnapshot {
            id_counter: self.id_counter,
            constraints: self
                .entries
                .iter()
                .map(|e| SnapshotEntry {
                    constraint_type: e.constraint_type.clone(),
                    input_params: e.input_params.clone(),
                    persistent_data: e.persistent_data.clone(),
                    open: e.open,
                    enabled: e.enabled,
                })
                .collect(),
        }
    }

    /// Replaces every entry. Types are re-bound against the registry;
    /// entries whose type no longer resolves are kept unbound and flagged
    /// with an `error` status. The ID counter becomes the larger of
    /// `id_counter` and every numeric ID suffix seen.
    pub fn replace_all(&mut self, list: Vec<SnapshotEntry>, id_counter: Option<u64>) {
        let mut counter = id_counter.unwrap_or(0);
        let mut claimed: HashSet<String> = HashSet::new();
        let mut staged = Vec::with_capacity(list.len());

        for item in list {
            let kind = self.registry.get_safe(&item.constraint_type);
            let constraint_type = match &kind {
                Some(kind) => kind.type_key().to_string(),
                None => {
                    warn!(constraint_type = %item.constraint_type, "restoring entry with unregistered type");
                    normalize_type_key(&item.constraint_type)
                }
            };
            let mut params = item.input_params;
            migrate_legacy_id(&mut params);

            let id = requested_id(&params).filter(|id| claimed.insert(id.clone()));
            if let Some(n) = id.as_deref().and_then(numeric_suffix) {
                counter = counter.max(n);
            }
            let prefix = kind
                .as_ref()
                .map(|k| k.id_prefix().to_string())
                .unwrap_or_else(|| FALLBACK_ID_PREFIX.to_string());
            staged.push((id, prefix, constraint_type, params, item.persistent_data, item.enabled, item.open));
        }

        self.id_counter = counter;
        self.entries.clear();
        for (id, prefix, constraint_type, params, persistent_data, enabled, open) in staged {
            let id = match id {
                Some(id) => id,
                None => loop {
                    // Must not take an ID that a later staged entry claims.
                    let candidate = self.generate_id(&prefix);
                    if !claimed.contains(&candidate) {
                        claimed.insert(candidate.clone());
                        break candidate;
                    }
                },
            };
            let mut entry = ConstraintEntry {
                id,
                constraint_type,
                input_params: params,
                persistent_data,
                enabled,
                open,
            };
            entry.sync_id_param();
            self.entries.push(entry);
        }

        self.refresh_statuses();
        self.emit(ChangeKind::Replace, None);
    }

    /// Accepts a snapshot object or a bare array of constraint objects.
    pub fn deserialize(&mut self, payload: &Value) -> AssemblyResult<()> {
        let (items, counter) = match payload {
            Value::Array(items) => (items, None),
            Value::Object(map) => match map.get("constraints") {
                Some(Value::Array(items)) => (items, map.get("idCounter").and_then(Value::as_u64)),
                _ => {
                    return Err(AssemblyError::InvalidSnapshot(
                        "missing 'constraints' array".to_string(),
                    ))
                }
            },
            _ => {
                return Err(AssemblyError::InvalidSnapshot(
                    "expected an object or an array".to_string(),
                ))
            }
        };
        let list = items
            .iter()
            .map(migrate_legacy_fields)
            .collect::<AssemblyResult<Vec<_>>>()?;
        self.replace_all(list, counter);
        Ok(())
    }

    pub fn from_json(&mut self, json: &str) -> AssemblyResult<()> {
        let payload: Value = serde_json::from_str(json)?;
        self.deserialize(&payload)
    }

    pub fn to_json(&self) -> AssemblyResult<String> {
        Ok(serde_json::to_string(&self.snapshot())?)
    }
}

/// Normalizes one raw stored constraint into the current shape.
///
/// A legacy `constraintID` (top-level or inside `inputParams`) becomes
/// `inputParams.id` unless a current ID is already present.
pub fn migrate_legacy_fields(raw: &Value) -> AssemblyResult<SnapshotEntry> {
    let Value::Object(map) = raw else {
        return Err(AssemblyError::InvalidSnapshot(
            "constraint entry must be an object".to_string(),
        ));
    };

    let constraint_type = map
        .get("type")
        .or_else(|| map.get("constraintType"))
        .and_then(Value::as_str)
        .ok_or_else(|| AssemblyError::InvalidSnapshot("constraint entry without a type".to_string()))?
        .to_string();

    let mut input_params = match map.get("inputParams") {
        Some(Value::Object(params)) => params.clone(),
        _ => Map::new(),
    };
    if requested_id(&input_params).is_none() {
        let legacy = [map.get("id"), input_params.get("constraintID"), map.get("constraintID")]
            .into_iter()
            .flatten()
            .find_map(non_empty_str);
        if let Some(id) = legacy {
            input_params.insert("id".to_string(), Value::String(id));
        }
    }
    input_params.remove("constraintID");

    let persistent_data = match map.get("persistentData") {
        Some(data @ Value::Object(_)) => serde_json::from_value(data.clone()).unwrap_or_else(|e| {
            warn!(error = %e, "discarding unreadable persisted status");
            PersistentData::default()
        }),
        _ => PersistentData::default(),
    };

    Ok(SnapshotEntry {
        constraint_type,
        input_params,
        persistent_data,
        open: map.get("open").and_then(Value::as_bool).unwrap_or(false),
        enabled: map.get("enabled").and_then(Value::as_bool).unwrap_or(true),
    })
}

fn migrate_legacy_id(params: &mut InputParams) {
    if let Some(legacy) = params.remove("constraintID") {
        if requested_id(params).is_none() {
            if let Some(id) = non_empty_str(&legacy) {
                params.insert("id".to_string(), Value::String(id));
            }
        }
    }
}

fn non_empty_str(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn requested_id(params: &InputParams) -> Option<String> {
    params.get("id").and_then(non_empty_str)
}

/// Trailing decimal digits of an ID (`"DIST12"` -> 12).
pub(crate) fn numeric_suffix(id: &str) -> Option<u64> {
    let digits = id.len() - id.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return None;
    }
    id[id.len() - digits..].parse().ok()
}
