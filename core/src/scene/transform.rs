//! The only code paths allowed to move a component.

use super::Component;
use crate::geometry::{is_finite_vector, Quaternion, Vector3};

/// Drift from unit length tolerated before an orientation is renormalized.
pub const NORMALIZE_EPSILON: f64 = 1e-9;

/// Adds `delta` to the component's position.
/// Returns false (and leaves the component untouched) when there is no
/// component or the delta is zero or non-finite.
pub fn apply_translation(component: Option<&mut Component>, delta: &Vector3) -> bool {
    let Some(component) = component else {
        return false;
    };
    if !is_finite_vector(delta) || delta.norm_squared() == 0.0 {
        return false;
    }
    component.position += delta;
    component.update_world_transform();
    true
}

/// Premultiplies the component's orientation by `rotation`.
pub fn apply_rotation(component: Option<&mut Component>, rotation: &Quaternion) -> bool {
    let Some(component) = component else {
        return false;
    };
    if !rotation.coords.iter().all(|c| c.is_finite()) {
        return false;
    }
    let mut orientation = rotation * component.orientation;
    let norm = orientation.norm();
    if norm == 0.0 || !norm.is_finite() {
        return false;
    }
    if (norm - 1.0).abs() > NORMALIZE_EPSILON {
        orientation = orientation.normalize();
    }
    component.orientation = orientation;
    component.update_world_transform();
    true
}
