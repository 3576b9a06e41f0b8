//! Configuration types for the broker and the application manager.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default maximum size of a single encoded message (16 MB).
pub const DEFAULT_MAX_MESSAGE_SIZE: u32 = 16 * 1024 * 1024;

/// Top-level configuration, usually loaded from `~/.relay/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Log level used when `RUST_LOG` is not set.
    pub log_level: String,
    /// Maximum size of a single encoded message, in bytes.
    pub max_message_size: u32,
    /// URL rewrites applied before resolution (`from` → `to`).
    pub mappings: HashMap<String, String>,
    /// Per-application settings, keyed by URL.
    pub apps: HashMap<String, AppConfig>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            mappings: HashMap::new(),
            apps: HashMap::new(),
        }
    }
}

/// Settings for one application URL.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Arguments passed to the application's `initialize`.
    pub args: Vec<String>,
}
