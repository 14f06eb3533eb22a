//! Embedding configuration
//!
//! A [`Config`] is handed to every [`Runtime`](crate::Runtime) at construction.
//! The process-wide default is installed at most once (usually at startup) and
//! is only read afterwards; runtimes created later all see the same policy.

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

static GLOBAL: OnceCell<Config> = OnceCell::new();

/// How runtimes and contexts are torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cleanup {
    /// Dropping a handle frees it.
    #[default]
    Finalizer,
    /// Only an explicit `free()` tears anything down. A context dropped
    /// without `free()` is parked on its runtime until the runtime is freed.
    Manual,
}

/// What happens to host values that have no guest representation.
///
/// Only [`Native::Opaque`](crate::Native::Opaque) falls in this category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unmapped {
    /// Silently becomes guest `null`.
    #[default]
    Null,
    /// Fails with [`Error::Conversion`](crate::Error::Conversion).
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cleanup: Cleanup,
    pub unmapped: Unmapped,
    /// Engine heap limit in bytes.
    pub memory_limit: Option<usize>,
    /// Guest stack limit in bytes.
    pub max_stack_size: Option<usize>,
    /// Allocation volume that triggers a collection, in bytes.
    pub gc_threshold: Option<usize>,
    /// Maximum number of live host callbacks per context.
    pub max_callbacks: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cleanup: Cleanup::Finalizer,
            unmapped: Unmapped::Null,
            memory_limit: None,
            max_stack_size: None,
            gc_threshold: None,
            max_callbacks: 4096,
        }
    }
}

impl Config {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Installs the process-wide configuration.
///
/// Fails (handing the config back) when a configuration is already in place,
/// including the default one installed by an earlier [`current`] call.
pub fn install(config: Config) -> Result<(), Config> {
    GLOBAL.set(config)?;
    tracing::debug!("process-wide embedding config installed");
    Ok(())
}

/// The process-wide configuration, installing the default on first read.
pub fn current() -> &'static Config {
    GLOBAL.get_or_init(Config::default)
}
