//! crdkeeper Core - CRD installation planning for leader-elected operators
//!
//! This crate provides the pure, cluster-independent half of crdkeeper:
//! - `definition`: Load CRDs from a directory and rewrite install-namespace references
//! - `compare`: Composable equality predicates over CRD pairs
//! - `pattern`: Glob-based selection of CRDs with "every pattern used" validation
//! - `plan`: Classify every goal CRD into an installation instruction

pub mod compare;
pub mod definition;
pub mod error;
pub mod pattern;
pub mod plan;

pub use compare::{
    Comparator, find_matching, find_non_matching, spec_equal,
    spec_equal_ignoring_conversion_webhook, version_equal,
};
pub use definition::{
    APP_LABEL, CERT_MANAGER_INJECT_CA_FROM, DEFAULT_APP_NAME, DEFAULT_CRD_PATH, Definition,
    VERSION_LABEL, load_definitions, match_string, rewrite_namespace, rewrite_namespaces,
};
pub use error::{CoreError, Result};
pub use pattern::{MatchResult, PatternMatcher};
pub use plan::{
    DiffResult, FilterResult, InstallationInstruction, applicable, included, plan,
};
