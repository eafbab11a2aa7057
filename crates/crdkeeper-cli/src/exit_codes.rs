//! Standard exit codes for CLI operations
//!
//! These exit codes follow Unix conventions and sysexits.h where applicable.

/// Success - operation completed, including "CRDs applied, restart me"
pub const SUCCESS: i32 = 0;

/// General error - unspecified failure, or leadership lost involuntarily
pub const ERROR: i32 = 1;

/// Validation error - bad pattern, lease settings or CRD selection
pub const VALIDATION_ERROR: i32 = 2;

/// Load error - CRD directory or file could not be read or parsed
pub const LOAD_ERROR: i32 = 3;

/// Cluster error - the Kubernetes API could not be reached or refused a call
pub const CLUSTER_ERROR: i32 = 4;

/// Usage error - invalid arguments or options (following sysexits.h convention)
pub const USAGE_ERROR: i32 = 64;
