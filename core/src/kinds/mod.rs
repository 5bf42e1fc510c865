//! Built-in constraint kinds.
//!
//! Every kind reads its selections through the solve context, measures a
//! residual, and applies a gain-damped correction to whichever side is free.

pub mod common;
pub mod fixed;
pub mod distance;
pub mod touch_align;
pub mod angle;


pub use angle::{AngleKind, ParallelKind};
pub use distance::{CoincidentKind, DistanceKind};
pub use fixed::FixedKind;
pub use touch_align::TouchAlignKind;

use crate::constraints::ConstraintRegistry;

pub fn register_builtin(registry: &mut ConstraintRegistry) {
    registry.register_kind(FixedKind);
    registry.register_kind(DistanceKind);
    registry.register_kind(CoincidentKind);
    registry.register_kind(TouchAlignKind);
    registry.register_kind(AngleKind);
    registry.register_kind(ParallelKind);
}
