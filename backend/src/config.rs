//! Layered host configuration.
//!
//! Sources, highest priority last:
//! 1. Built-in defaults
//! 2. `assembly.toml` in the working directory (or `ASSEMBLY_CONFIG`)
//! 3. Environment variables, `ASSEMBLY_` prefix with `__` between sections
//!    (`ASSEMBLY_SOLVER__MAX_ITERATIONS=20` -> `solver.max_iterations`)

use assembly_core::RunOptions;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::{AddrParseError, SocketAddr};
use std::path::PathBuf;

pub const DEFAULT_CONFIG_FILE: &str = "assembly.toml";

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BackendConfig {
    pub host: String,
    pub port: u16,
    /// Constraint document restored at startup.
    pub document: Option<PathBuf>,
    /// Scene restored at startup.
    pub scene: Option<PathBuf>,
    /// Solve automatically after every history edit.
    pub auto_run: bool,
    #[serde(default)]
    pub solver: SolverSettings,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            document: None,
            scene: None,
            auto_run: true,
            solver: SolverSettings::default(),
        }
    }
}

/// Defaults for runs started by the host.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SolverSettings {
    pub tolerance: f64,
    pub max_iterations: usize,
    pub translation_gain: f64,
    pub rotation_gain: f64,
    pub iteration_delay_ms: u64,
}

impl Default for SolverSettings {
    fn default() -> Self {
        let options = RunOptions::default();
        Self {
            tolerance: options.tolerance,
            max_iterations: 10,
            translation_gain: options.translation_gain,
            rotation_gain: options.rotation_gain,
            iteration_delay_ms: options.iteration_delay_ms,
        }
    }
}

impl SolverSettings {
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            tolerance: self.tolerance,
            max_iterations: self.max_iterations,
            translation_gain: self.translation_gain,
            rotation_gain: self.rotation_gain,
            iteration_delay_ms: self.iteration_delay_ms,
            ..RunOptions::default()
        }
        .normalized()
    }
}

impl BackendConfig {
    pub fn load() -> Result<Self, figment::Error> {
        Self::figment().extract()
    }

    pub fn figment() -> Figment {
        let path = std::env::var("ASSEMBLY_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));

        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if path.exists() {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed("ASSEMBLY_").ignore(&["config"]).split("__"))
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}
