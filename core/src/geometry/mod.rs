use nalgebra as na;
use serde_json::Value;

pub type Point3 = na::Point3<f64>;
pub type Vector3 = na::Vector3<f64>;
pub type Quaternion = na::Quaternion<f64>;
pub type UnitQuaternion = na::UnitQuaternion<f64>;
pub type Isometry3 = na::Isometry3<f64>;

pub const EPSILON: f64 = 1e-6;

pub trait ApproxEq {
    fn approx_eq(&self, other: &Self) -> bool;
}

impl ApproxEq for f64 {
    fn approx_eq(&self, other: &Self) -> bool {
        (self - other).abs() < EPSILON
    }
}

impl ApproxEq for Point3 {
    fn approx_eq(&self, other: &Self) -> bool {
        na::distance_squared(self, other) < EPSILON * EPSILON
    }
}

impl ApproxEq for Vector3 {
    fn approx_eq(&self, other: &Self) -> bool {
        (self - other).norm_squared() < EPSILON * EPSILON
    }
}

pub fn is_finite_vector(v: &Vector3) -> bool {
    v.iter().all(|c| c.is_finite())
}

/// Reads a 3-vector stored either as `[x, y, z]` or `{ "x": .., "y": .., "z": .. }`.
pub fn vector_from_value(value: &Value) -> Option<Vector3> {
    let coords = match value {
        Value::Array(items) if items.len() == 3 => [
            items[0].as_f64()?,
            items[1].as_f64()?,
            items[2].as_f64()?,
        ],
        Value::Object(map) => [
            map.get("x")?.as_f64()?,
            map.get("y")?.as_f64()?,
            map.get("z")?.as_f64()?,
        ],
        _ => return None,
    };
    let v = Vector3::new(coords[0], coords[1], coords[2]);
    is_finite_vector(&v).then_some(v)
}

/// Some unit vector perpendicular to `v`.
pub fn any_perpendicular(v: &Vector3) -> Vector3 {
    let helper = if v.x.abs() < 0.9 { Vector3::x() } else { Vector3::y() };
    v.cross(&helper).normalize()
}

/// Shortest rotation taking direction `from` onto direction `to`.
/// Antiparallel inputs rotate half a turn about an arbitrary perpendicular axis.
pub fn rotation_between(from: &Vector3, to: &Vector3) -> UnitQuaternion {
    match UnitQuaternion::rotation_between(from, to) {
        Some(rotation) => rotation,
        None => {
            let axis = na::Unit::new_normalize(any_perpendicular(from));
            UnitQuaternion::from_axis_angle(&axis, std::f64::consts::PI)
        }
    }
}

/// Scales a rotation's angle by `gain`, keeping its axis.
pub fn scale_rotation(rotation: &UnitQuaternion, gain: f64) -> UnitQuaternion {
    match rotation.axis_angle() {
        Some((axis, angle)) => UnitQuaternion::from_axis_angle(&axis, angle * gain),
        None => UnitQuaternion::identity(),
    }
}

/// Unsigned angle between two directions, in radians.
pub fn angle_between(a: &Vector3, b: &Vector3) -> f64 {
    let denom = a.norm() * b.norm();
    if denom < EPSILON {
        return 0.0;
    }
    (a.dot(b) / denom).clamp(-1.0, 1.0).acos()
}
