//! crdkeeper Kube - Kubernetes integration for crdkeeper
//!
//! This crate provides:
//! - **CRD Client**: List and create-or-update CustomResourceDefinitions
//! - **Lease Lock**: Leader records stored in `coordination.k8s.io/v1` Leases
//! - **Leader Election**: Acquire/renew loop with started/stopped-leading callbacks
//! - **Leader Sessions**: One-shot "acquired" / "released" signals with cooperative
//!   vs involuntary loss detection
//! - **Apply Engine**: Double-checked CRD installation under the lease, ending in a
//!   restart signal
//! - **Mocks**: In-memory client and lease for tests

pub mod client;
pub mod error;
pub mod leader;
pub mod lease;
pub mod manager;
pub mod mock;

pub use client::{ApplyOperation, CrdClient, KubeCrdClient};
pub use error::{KubeError, Result};
pub use leader::{LeaderElection, LeaderSession, LeadershipEnd};
pub use lease::{
    DEFAULT_LEASE_NAME, ElectionConfig, KubeLeaseLock, LeaderCallbacks, LeaderElector, LeaseLock,
};
pub use manager::{ApplyOutcome, CrdManager, InstallOptions};
pub use mock::{MockCrdClient, MockLeaseLock, OperationCounts};
