//! Engine and controller configuration.

use crate::error::{Result, RhaiError};
use serde::Deserialize;
use std::time::Duration;

/// Bridge configuration.
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```rust
/// use armature_rhai_mvc::EngineConfig;
///
/// let config = EngineConfig::from_json(r#"{ "handlers_dir": "Handlers" }"#).unwrap();
/// assert_eq!(config.handlers_dir, "Handlers");
/// assert_eq!(config.class_suffix, "Controller");
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum operations per script call.
    pub max_operations: Option<u64>,
    /// Maximum call stack depth.
    pub max_call_depth: usize,
    /// Maximum string length.
    pub max_string_size: usize,
    /// Maximum array size.
    pub max_array_size: usize,
    /// Maximum map size.
    pub max_map_size: usize,
    /// Script file extension.
    pub extension: String,
    /// Directory holding controller sources, relative to the application root.
    pub handlers_dir: String,
    /// Appended to a logical controller name to form the class name.
    pub class_suffix: String,
    /// Virtual path of the routes script.
    pub routes_path: String,
    /// Subdirectories added to the module search path after the root.
    pub load_paths: Vec<String>,
    /// Class method returning the action to filters mapping.
    pub filters_method: String,
    /// Instance method called right after instantiation.
    pub initializer: String,
    /// Instance method called when a controller is released.
    pub dispose_method: String,
    /// Deadline for a dispatched request, in milliseconds.
    pub request_timeout_ms: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_operations: Some(1_000_000),
            max_call_depth: 64,
            max_string_size: 1024 * 1024, // 1MB
            max_array_size: 10_000,
            max_map_size: 10_000,
            extension: "rhai".to_string(),
            handlers_dir: "Controllers".to_string(),
            class_suffix: "Controller".to_string(),
            routes_path: "~/routes.rhai".to_string(),
            load_paths: ["Controllers", "Models", "Filters", "Helpers", "Lib", "bin"]
                .iter()
                .map(|dir| dir.to_string())
                .collect(),
            filters_method: "action_filters".to_string(),
            initializer: "initialize".to_string(),
            dispose_method: "dispose".to_string(),
            request_timeout_ms: None,
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from JSON, filling gaps with defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the bridge cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.extension.trim().is_empty() {
            return Err(RhaiError::config("extension must not be empty"));
        }
        if self.extension.starts_with('.') {
            return Err(RhaiError::config("extension must not start with '.'"));
        }
        if self.filters_method.trim().is_empty() {
            return Err(RhaiError::config("filters_method must not be empty"));
        }
        if self.max_call_depth == 0 {
            return Err(RhaiError::config("max_call_depth must be positive"));
        }
        Ok(())
    }

    /// Request deadline as a duration.
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    /// Class name for a logical controller name: `home` -> `HomeController`.
    pub fn class_name_for(&self, logical_name: &str) -> String {
        format!("{}{}", crate::naming::pascalize(logical_name), self.class_suffix)
    }

    /// Virtual source path for a class: `~/Controllers/HomeController.rhai`.
    pub fn virtual_path_for(&self, class_name: &str) -> String {
        format!("~/{}/{}.{}", self.handlers_dir, class_name, self.extension)
    }
}
