//! Configuration management for the aggregate compiler
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (aggregate-schema.toml)
//! - Environment variables (AGGSCHEMA_*)
//!
//! ## Example config file (aggregate-schema.toml):
//! ```toml
//! [keys]
//! max_depth = 32
//!
//! [persistence]
//! version_column = true
//! version_column_name = "Version"
//!
//! [naming]
//! separator = "_"
//! display_name_suffix = "DisplayName"
//! instance_key_field = "InstanceKey"
//!
//! [diagnostics]
//! warnings_as_errors = false
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::graph::ValidationOptions;
use crate::relation::KeyOptions;
use crate::shape::ShapeOptions;

/// Config file name looked up in the project and user config directories
pub const CONFIG_FILE_NAME: &str = "aggregate-schema.toml";

/// Main configuration for the compiler
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilerConfig {
    /// Key flattening settings
    #[serde(default)]
    pub keys: KeysConfig,

    /// Persistence shape settings
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Derived field naming
    #[serde(default)]
    pub naming: NamingConfig,

    /// Diagnostic handling
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
}

/// Key flattening configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeysConfig {
    /// Maximum depth of a key reference chain
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

/// Persistence configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Add an optimistic concurrency column to root aggregates
    #[serde(default = "default_true")]
    pub version_column: bool,

    #[serde(default = "default_version_column_name")]
    pub version_column_name: String,
}

/// Naming configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamingConfig {
    /// Joins composed names (`Product_ProductId`)
    #[serde(default = "default_separator")]
    pub separator: String,

    #[serde(default = "default_display_name_suffix")]
    pub display_name_suffix: String,

    #[serde(default = "default_instance_key_field")]
    pub instance_key_field: String,
}

/// Diagnostics configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticsConfig {
    /// Refuse emission on warnings too
    #[serde(default)]
    pub warnings_as_errors: bool,
}

// Default value functions
fn default_max_depth() -> usize {
    32
}

fn default_true() -> bool {
    true
}

fn default_version_column_name() -> String {
    "Version".to_string()
}

fn default_separator() -> String {
    "_".to_string()
}

fn default_display_name_suffix() -> String {
    "DisplayName".to_string()
}

fn default_instance_key_field() -> String {
    "InstanceKey".to_string()
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            version_column: true,
            version_column_name: default_version_column_name(),
        }
    }
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            separator: default_separator(),
            display_name_suffix: default_display_name_suffix(),
            instance_key_field: default_instance_key_field(),
        }
    }
}

impl CompilerConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration, with an explicit file taking precedence over the
    /// default locations
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        // User config directory first so the project file overrides it
        if let Some(dirs) = directories::ProjectDirs::from("dev", "familiar", "aggregate-schema") {
            let user_config = dirs.config_dir().join(CONFIG_FILE_NAME);
            if user_config.exists() {
                builder = builder.add_source(File::from(user_config).required(false));
            }
        }

        for location in [CONFIG_FILE_NAME, ".aggregate-schema.toml"] {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path).required(true));
        }

        // Environment variables (AGGSCHEMA_NAMING__SEPARATOR=...)
        builder = builder.add_source(
            Environment::with_prefix("AGGSCHEMA")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validation_options(&self) -> ValidationOptions {
        ValidationOptions {
            max_key_depth: self.keys.max_depth,
        }
    }

    pub fn key_options(&self) -> KeyOptions {
        KeyOptions {
            max_depth: self.keys.max_depth,
            separator: self.naming.separator.clone(),
        }
    }

    pub fn shape_options(&self) -> ShapeOptions {
        ShapeOptions {
            separator: self.naming.separator.clone(),
            display_name_suffix: self.naming.display_name_suffix.clone(),
            instance_key_field: self.naming.instance_key_field.clone(),
            version_column: self
                .persistence
                .version_column
                .then(|| self.persistence.version_column_name.clone()),
        }
    }
}
