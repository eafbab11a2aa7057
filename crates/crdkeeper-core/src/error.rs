//! Core error types

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CoreError {
    #[error("failed to read directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("failed to read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to unmarshal {path} to CRD: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid CRD pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("no CRDs matched pattern(s): {}", .patterns.join(", "))]
    UnmatchedPatterns { patterns: Vec<String> },

    #[error("couldn't find goal CRD '{name}'. This is unexpected!")]
    UnknownGoal { name: String },
}

impl CoreError {
    /// Errors raised while reading definitions from their source
    pub fn is_load_error(&self) -> bool {
        matches!(
            self,
            CoreError::ReadDir { .. } | CoreError::ReadFile { .. } | CoreError::Parse { .. }
        )
    }

    /// Errors caused by operator-supplied configuration
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            CoreError::InvalidPattern { .. } | CoreError::UnmatchedPatterns { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
