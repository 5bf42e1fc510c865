//! Scene boundary for the solver.
//!
//! The solve loop never owns geometry. It resolves opaque selections to
//! components through a [`SceneAdapter`] and mutates component transforms
//! only through the helpers in [`transform`].

pub mod transform;


use crate::geometry::{Isometry3, Point3, Quaternion, UnitQuaternion, Vector3, EPSILON};
use nalgebra::Translation3;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Stable identifier of a component (rigid sub-assembly) in the scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentId(pub Uuid);

impl ComponentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Deterministic ID derived from a seed string, so a reloaded assembly
    /// gets the same IDs for the same component names.
    pub fn new_deterministic(seed: &str) -> Self {
        Self(Uuid::new_v5(&Uuid::NAMESPACE_OID, seed.as_bytes()))
    }
}

impl Default for ComponentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error, Clone)]
pub enum SceneError {
    #[error("Render failed: {0}")]
    RenderFailed(String),
}

/// A rigid component positioned in the scene.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Component {
    pub id: ComponentId,
    pub name: String,
    pub position: Vector3,
    /// Kept at unit length by the transform helpers.
    pub orientation: Quaternion,
    #[serde(default)]
    pub fixed: bool,
    #[serde(skip, default = "Isometry3::identity")]
    world: Isometry3,
}

impl Component {
    pub fn new(name: &str) -> Self {
        let mut component = Self {
            id: ComponentId::new_deterministic(name),
            name: name.to_string(),
            position: Vector3::zeros(),
            orientation: Quaternion::identity(),
            fixed: false,
            world: Isometry3::identity(),
        };
        component.update_world_transform();
        component
    }

    pub fn at(mut self, position: Vector3) -> Self {
        self.position = position;
        self.update_world_transform();
        self
    }

    pub fn with_orientation(mut self, orientation: UnitQuaternion) -> Self {
        self.orientation = orientation.into_inner();
        self.update_world_transform();
        self
    }

    pub fn fixed(mut self) -> Self {
        self.fixed = true;
        self
    }

    /// Cached world transform, refreshed by [`Component::update_world_transform`].
    pub fn world_transform(&self) -> &Isometry3 {
        &self.world
    }

    pub fn update_world_transform(&mut self) {
        let rotation = if self.orientation.norm() > EPSILON {
            UnitQuaternion::new_normalize(self.orientation)
        } else {
            UnitQuaternion::identity()
        };
        self.world = Isometry3::from_parts(Translation3::from(self.position), rotation);
    }

    pub fn to_world_point(&self, local: &Point3) -> Point3 {
        self.world.transform_point(local)
    }

    pub fn to_world_vector(&self, local: &Vector3) -> Vector3 {
        self.world.transform_vector(local)
    }
}

/// The external boundary through which the solver reads and moves components.
pub trait SceneAdapter: Send {
    /// Resolves an opaque selection to a component, or `None` if it points
    /// at nothing in the current scene.
    fn resolve_object(&self, selection: &Value) -> Option<ComponentId>;

    fn component(&self, id: ComponentId) -> Option<&Component>;

    fn component_mut(&mut self, id: ComponentId) -> Option<&mut Component>;

    fn is_component_fixed(&self, id: ComponentId) -> bool {
        self.component(id).map(|c| c.fixed).unwrap_or(false)
    }

    fn apply_translation(&mut self, id: ComponentId, delta: &Vector3) -> bool {
        transform::apply_translation(self.component_mut(id), delta)
    }

    fn apply_rotation(&mut self, id: ComponentId, rotation: &Quaternion) -> bool {
        transform::apply_rotation(self.component_mut(id), rotation)
    }

    /// Pushes the final transforms of components moved during a run to
    /// whatever mirrors the scene (renderer, host document).
    fn sync_transforms(&mut self, _updated: &[ComponentId]) {}

    /// Best-effort redraw hint.
    fn render_scene(&mut self) -> Result<(), SceneError> {
        Ok(())
    }
}

/// Maximum nesting followed when a selection wraps another selection.
const MAX_SELECTION_NESTING: usize = 5;

const ID_FIELDS: &[&str] = &["id", "uuid", "componentId", "component_id"];
const NAME_FIELDS: &[&str] = &["name", "componentName", "component_name"];

/// In-memory scene used by the backend host and by tests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssemblyScene {
    pub components: Vec<Component>,
    #[serde(skip)]
    pub render_count: usize,
    #[serde(skip)]
    pub last_synced: Vec<ComponentId>,
}

impl AssemblyScene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_component(&mut self, component: Component) -> ComponentId {
        let id = component.id;
        self.components.retain(|c| c.id != id);
        self.components.push(component);
        id
    }

    pub fn remove_component(&mut self, id: ComponentId) -> Option<Component> {
        let index = self.components.iter().position(|c| c.id == id)?;
        Some(self.components.remove(index))
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Component> {
        self.components.iter().find(|c| c.name == name)
    }

    /// Rebuilds cached world transforms (call after deserialization).
    pub fn refresh_transforms(&mut self) {
        for component in &mut self.components {
            component.update_world_transform();
        }
    }

    fn lookup(&self, key: &str) -> Option<ComponentId> {
        if let Ok(uuid) = Uuid::parse_str(key) {
            if let Some(c) = self.components.iter().find(|c| c.id.0 == uuid) {
                return Some(c.id);
            }
        }
        self.find_by_name(key).map(|c| c.id)
    }

    fn resolve_nested(&self, selection: &Value, depth: usize) -> Option<ComponentId> {
        if depth > MAX_SELECTION_NESTING {
            return None;
        }
        match selection {
            Value::String(key) => self.lookup(key),
            Value::Object(map) => {
                for field in ID_FIELDS.iter().chain(NAME_FIELDS) {
                    if let Some(Value::String(key)) = map.get(*field) {
                        if let Some(id) = self.lookup(key) {
                            return Some(id);
                        }
                    }
                }
                if let Some(Value::Array(path)) = map.get("path") {
                    if let Some(Value::String(last)) = path.last() {
                        return self.lookup(last);
                    }
                }
                map.get("component")
                    .and_then(|inner| self.resolve_nested(inner, depth + 1))
            }
            _ => None,
        }
    }
}

impl SceneAdapter for AssemblyScene {
    fn resolve_object(&self, selection: &Value) -> Option<ComponentId> {
        self.resolve_nested(selection, 0)
    }

    fn component(&self, id: ComponentId) -> Option<&Component> {
        self.components.iter().find(|c| c.id == id)
    }

    fn component_mut(&mut self, id: ComponentId) -> Option<&mut Component> {
        self.components.iter_mut().find(|c| c.id == id)
    }

    fn sync_transforms(&mut self, updated: &[ComponentId]) {
        for id in updated {
            if let Some(component) = self.component_mut(*id) {
                component.update_world_transform();
            }
        }
        self.last_synced = updated.to_vec();
    }

    fn render_scene(&mut self) -> Result<(), SceneError> {
        self.render_count += 1;
        Ok(())
    }
}
