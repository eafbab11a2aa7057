//! Error types for crdkeeper-kube

use thiserror::Error;

/// Result type for crdkeeper-kube operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Errors that can occur while coordinating CRD installation
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// Listing the installed CRDs failed
    #[error("failed to list CRDs: {0}")]
    List(#[source] Box<KubeError>),

    /// Writing a single CRD failed
    #[error("failed to apply CRD {name}: {source}")]
    Apply {
        name: String,
        #[source]
        source: Box<KubeError>,
    },

    /// Loading, pattern or planning error
    #[error(transparent)]
    Core(#[from] crdkeeper_core::CoreError),

    /// Invalid leader election configuration
    #[error("invalid leader election configuration: {0}")]
    InvalidLeaseConfig(String),

    /// A lease lock operation failed
    #[error("failed to {operation} lease {name}: {source}")]
    Lease {
        name: String,
        operation: &'static str,
        #[source]
        source: Box<KubeError>,
    },

    /// Another replica or a network condition took leadership away
    #[error("leadership was lost involuntarily while applying CRDs")]
    LeadershipLost,

    /// Cancelled before leadership was acquired
    #[error("cancelled while waiting for the leader lease")]
    Cancelled,

    /// The election task ended unexpectedly
    #[error("leader election task failed: {0}")]
    ElectionTask(String),

    /// Invalid manifest
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// Neither existing CRDs nor a pattern selected anything
    #[error("no existing CRDs in cluster and no CRD pattern specified")]
    NothingSelected,
}

impl KubeError {
    /// Check if this is a conflict error (409)
    pub fn is_conflict(&self) -> bool {
        matches!(self, KubeError::Api(kube::Error::Api(resp)) if resp.code == 409)
    }

    /// Check if this error came from loading the goal CRDs
    pub fn is_load_error(&self) -> bool {
        matches!(self, KubeError::Core(e) if e.is_load_error())
    }

    /// Check if this error was caused by invalid operator configuration
    pub fn is_validation_error(&self) -> bool {
        match self {
            KubeError::Core(e) => e.is_validation_error(),
            KubeError::NothingSelected | KubeError::InvalidLeaseConfig(_) => true,
            _ => false,
        }
    }
}

/// Build an API error response, as returned by the API server
pub fn api_error(code: u16, reason: &str, message: impl Into<String>) -> KubeError {
    KubeError::Api(kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_string(),
        message: message.into(),
        reason: reason.to_string(),
        code,
    }))
}
