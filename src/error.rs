//! Error types for the aggregate compiler
//!
//! Schema problems are never errors here: they are collected as
//! [`Diagnostics`](crate::graph::Diagnostics). This type only covers the
//! fallible boundary (reading sources, loading configuration) and the final
//! "schema rejected" outcome.

use thiserror::Error;

use crate::graph::Diagnostics;

/// Result type for compiler operations
pub type Result<T> = std::result::Result<T, CompileError>;

/// Compiler errors
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("Schema rejected with {} error(s)", .0.error_count())]
    Rejected(Diagnostics),

    #[error("Invalid schema document {path}: {message}")]
    InvalidDocument { path: String, message: String },

    #[error("Included file not found: {0}")]
    IncludeNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config_crate::ConfigError),

    #[error("TOML serialization error: {0}")]
    Toml(#[from] toml::ser::Error),

    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

impl CompileError {
    /// Diagnostics carried by a rejected schema, if any
    pub fn diagnostics(&self) -> Option<&Diagnostics> {
        match self {
            Self::Rejected(diagnostics) => Some(diagnostics),
            _ => None,
        }
    }
}
