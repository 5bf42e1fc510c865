pub mod geometry;
pub mod scene;
pub mod variables;
pub mod constraints;
pub mod kinds;

pub use constraints::{
    run_all, AssemblyError, AssemblyResult, CancelToken, ConstraintEntry, ConstraintHistory,
    ConstraintRegistry, ConstraintStatus, RunOptions, RunReport,
};
pub use scene::{AssemblyScene, Component, ComponentId, SceneAdapter};

/// Crate version, as reported by hosts.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
