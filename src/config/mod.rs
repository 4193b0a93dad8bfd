//! Node Configuration Module
//!
//! Deployment parameters loaded from TOML, replacing the per-tier firmware
//! constants with operator-tunable values.
//!
//! ## Loading Order
//!
//! 1. `SIF_CONFIG` environment variable (path to TOML file)
//! 2. `node_config.toml` in the current working directory
//! 3. Built-in defaults (the low-tier reference profile)
//!
//! ## Usage
//!
//! ```ignore
//! // In main():
//! config::init(NodeConfig::load());
//!
//! // Anywhere in the codebase:
//! let profile = config::get().device_profile();
//! ```

pub mod defaults;
mod node_config;
pub mod validation;

pub use node_config::*;

use std::sync::OnceLock;

/// Global node configuration, initialized once at startup.
static NODE_CONFIG: OnceLock<NodeConfig> = OnceLock::new();

/// Initialize the global node configuration.
///
/// A second call is ignored with a warning.
pub fn init(config: NodeConfig) {
    if NODE_CONFIG.set(config).is_err() {
        tracing::warn!("config::init() called more than once, ignoring");
    }
}

/// Get a reference to the global node configuration.
///
/// Falls back to built-in defaults if `init()` was never called.
pub fn get() -> &'static NodeConfig {
    NODE_CONFIG.get_or_init(|| {
        tracing::warn!("config::get() called before config::init(), using defaults");
        NodeConfig::default()
    })
}
