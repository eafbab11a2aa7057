//! CLI error types with exit code handling
//!
//! This module provides a unified error type for CLI operations that
//! maps errors to appropriate exit codes.

use crdkeeper_core::CoreError;
use crdkeeper_kube::KubeError;
use miette::Diagnostic;
use thiserror::Error;

use crate::exit_codes;

/// CLI-specific error type that includes exit code information
#[derive(Error, Debug, Diagnostic, Clone)]
pub enum CliError {
    /// Configuration or CRD selection is invalid
    #[error("Validation failed: {message}")]
    #[diagnostic(code(crdkeeper::cli::validation))]
    Validation {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Goal CRDs could not be loaded
    #[error("Failed to load CRDs: {message}")]
    #[diagnostic(code(crdkeeper::cli::load))]
    Load {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Kubernetes API failure
    #[error("Cluster error: {message}")]
    #[diagnostic(code(crdkeeper::cli::cluster))]
    Cluster { message: String },

    /// Leadership was taken away while applying
    #[error("{message}")]
    #[diagnostic(
        code(crdkeeper::cli::leadership_lost),
        help("another replica holds the lease now; this replica must restart")
    )]
    LeadershipLost { message: String },

    /// Internal error (runtime, unexpected failure)
    #[error("Internal error: {message}")]
    #[diagnostic(code(crdkeeper::cli::internal))]
    Internal { message: String },
}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Validation { .. } => exit_codes::VALIDATION_ERROR,
            CliError::Load { .. } => exit_codes::LOAD_ERROR,
            CliError::Cluster { .. } => exit_codes::CLUSTER_ERROR,
            CliError::LeadershipLost { .. } => exit_codes::ERROR,
            CliError::Internal { .. } => exit_codes::ERROR,
        }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            help: None,
        }
    }

    /// Create a validation error with help text
    pub fn validation_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            help: Some(help.into()),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        let message = err.to_string();
        match err {
            CoreError::UnmatchedPatterns { .. } => CliError::validation_with_help(
                message,
                "every --crd-pattern clause must match at least one CRD name in --crd-path",
            ),
            CoreError::InvalidPattern { .. } => CliError::validation_with_help(
                message,
                "patterns are ';'-separated globs, e.g. 'widgets.*;*.example.com'",
            ),
            err if err.is_load_error() => CliError::Load {
                message,
                help: Some("check --crd-path (CRDKEEPER_CRD_PATH)".to_string()),
            },
            _ => CliError::internal(message),
        }
    }
}

impl From<KubeError> for CliError {
    fn from(err: KubeError) -> Self {
        match err {
            KubeError::Core(core) => core.into(),
            KubeError::NothingSelected => CliError::validation_with_help(
                err.to_string(),
                "set --crd-pattern (CRDKEEPER_CRD_PATTERN) to select CRDs to install",
            ),
            KubeError::InvalidLeaseConfig(_) => CliError::validation_with_help(
                err.to_string(),
                "lease duration > renew deadline > retry period > 0 is required",
            ),
            KubeError::LeadershipLost => CliError::LeadershipLost {
                message: err.to_string(),
            },
            KubeError::ElectionTask(_) | KubeError::Cancelled => CliError::internal(err.to_string()),
            _ => CliError::Cluster {
                message: err.to_string(),
            },
        }
    }
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
