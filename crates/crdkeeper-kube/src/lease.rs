//! Lease-based leader election
//!
//! A [`LeaseLock`] records which replica currently holds a time-bounded grant.
//! [`LeaderElector`] drives the lock: it retries until the grant is acquired,
//! reports it through [`LeaderCallbacks`], renews it until cancelled or until
//! renewal fails for longer than the renew deadline, and always reports the
//! end of leadership exactly once.
//!
//! ```text
//!   acquire ──(every retry_period)──► started_leading(token)
//!                                         │
//!                                         ▼
//!   renew ──(every retry_period, deadline renew_deadline)──► stopped_leading
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::{
    Client,
    api::{Api, PostParams},
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{KubeError, Result};

/// Default name of the Lease guarding CRD management
pub const DEFAULT_LEASE_NAME: &str = "crdkeeper-crd-management";

/// A distributed lock recording the current leader
#[async_trait]
pub trait LeaseLock: Send + Sync {
    /// Identity written into the lock when this replica holds it
    fn identity(&self) -> &str;

    /// Human-readable lock location, for logs and errors
    fn describe(&self) -> String;

    /// Take the lock if it is free or expired, or renew it if already held
    ///
    /// Returns `Ok(false)` when another replica holds a live grant.
    async fn try_acquire_or_renew(&self, lease_duration: Duration) -> Result<bool>;

    /// Give the lock up if this replica holds it
    async fn release(&self) -> Result<()>;
}

/// Hooks invoked by [`LeaderElector::run`]
pub trait LeaderCallbacks: Send + Sync {
    /// Called once when this replica becomes leader
    ///
    /// `leadership` is a child of the token passed to `run`; it is cancelled
    /// when the caller asks the elector to step down.
    fn on_started_leading(&self, leadership: CancellationToken);

    /// Called exactly once when the run loop ends, whether or not leadership
    /// was ever acquired
    fn on_stopped_leading(&self);
}

/// Leader election timing
#[derive(Debug, Clone)]
pub struct ElectionConfig {
    /// How long a grant stays valid without renewal
    pub lease_duration: Duration,
    /// How long the leader keeps retrying a renewal before giving up
    pub renew_deadline: Duration,
    /// Interval between acquire and renew attempts
    pub retry_period: Duration,
    /// Release the lock when the run loop is cancelled
    pub release_on_cancel: bool,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            lease_duration: Duration::from_secs(15),
            renew_deadline: Duration::from_secs(10),
            retry_period: Duration::from_secs(2),
            release_on_cancel: true,
        }
    }
}

impl ElectionConfig {
    /// Check the timing invariants
    pub fn validate(&self) -> Result<()> {
        if self.retry_period.is_zero() {
            return Err(KubeError::InvalidLeaseConfig(
                "retry period must be greater than zero".to_string(),
            ));
        }
        if self.renew_deadline <= self.retry_period {
            return Err(KubeError::InvalidLeaseConfig(format!(
                "renew deadline ({:?}) must be greater than retry period ({:?})",
                self.renew_deadline, self.retry_period
            )));
        }
        if self.lease_duration <= self.renew_deadline {
            return Err(KubeError::InvalidLeaseConfig(format!(
                "lease duration ({:?}) must be greater than renew deadline ({:?})",
                self.lease_duration, self.renew_deadline
            )));
        }
        Ok(())
    }
}

/// Drives a [`LeaseLock`] and reports leadership changes
pub struct LeaderElector {
    lock: Arc<dyn LeaseLock>,
    config: ElectionConfig,
    callbacks: Arc<dyn LeaderCallbacks>,
}

impl LeaderElector {
    /// Create an elector, validating its configuration
    pub fn new(
        lock: Arc<dyn LeaseLock>,
        config: ElectionConfig,
        callbacks: Arc<dyn LeaderCallbacks>,
    ) -> Result<Self> {
        config.validate()?;
        if lock.identity().is_empty() {
            return Err(KubeError::InvalidLeaseConfig(
                "leader election identity must not be empty".to_string(),
            ));
        }

        Ok(Self {
            lock,
            config,
            callbacks,
        })
    }

    /// Run the election until `cancel` fires or leadership is lost
    pub async fn run(self, cancel: CancellationToken) {
        if self.acquire(&cancel).await {
            self.callbacks.on_started_leading(cancel.child_token());
            self.renew(&cancel).await;
        }
        self.callbacks.on_stopped_leading();
    }

    async fn acquire(&self, cancel: &CancellationToken) -> bool {
        tracing::info!(lease = %self.lock.describe(), identity = self.lock.identity(), "Attempting to acquire leader lease");

        loop {
            if cancel.is_cancelled() {
                return false;
            }

            match self.lock.try_acquire_or_renew(self.config.lease_duration).await {
                Ok(true) => {
                    tracing::info!(lease = %self.lock.describe(), "Successfully acquired lease");
                    return true;
                }
                Ok(false) => {
                    tracing::debug!(lease = %self.lock.describe(), "Lease is held by another replica")
                }
                Err(e) => tracing::warn!(error = %e, "Error acquiring lease"),
            }

            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(self.config.retry_period) => {}
            }
        }
    }

    async fn renew(&self, cancel: &CancellationToken) {
        let mut last_renewed = Instant::now();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    if self.config.release_on_cancel {
                        match self.lock.release().await {
                            Ok(()) => tracing::info!(lease = %self.lock.describe(), "Released lease"),
                            Err(e) => tracing::warn!(error = %e, "Failed to release lease"),
                        }
                    }
                    return;
                }
                _ = tokio::time::sleep(self.config.retry_period) => {}
            }

            let attempt = tokio::time::timeout(
                self.config.renew_deadline,
                self.lock.try_acquire_or_renew(self.config.lease_duration),
            )
            .await;

            match attempt {
                Ok(Ok(true)) => last_renewed = Instant::now(),
                Ok(Ok(false)) => {
                    tracing::debug!(lease = %self.lock.describe(), "Lease renewal refused")
                }
                Ok(Err(e)) => tracing::warn!(error = %e, "Error renewing lease"),
                Err(_) => tracing::warn!(lease = %self.lock.describe(), "Timed out renewing lease"),
            }

            if last_renewed.elapsed() > self.config.renew_deadline {
                tracing::warn!(lease = %self.lock.describe(), "Failed to renew lease within the renew deadline");
                return;
            }
        }
    }
}

/// [`LeaseLock`] stored in a `coordination.k8s.io/v1` Lease
pub struct KubeLeaseLock {
    api: Api<Lease>,
    namespace: String,
    name: String,
    identity: String,
}

impl KubeLeaseLock {
    /// Create a lock on the Lease `namespace/name` held as `identity`
    pub fn new(
        client: Client,
        namespace: impl Into<String>,
        name: impl Into<String>,
        identity: impl Into<String>,
    ) -> Result<Self> {
        let namespace = namespace.into();
        let name = name.into();
        let identity = identity.into();

        if namespace.is_empty() || name.is_empty() {
            return Err(KubeError::InvalidLeaseConfig(
                "lease namespace and name must not be empty".to_string(),
            ));
        }
        if identity.is_empty() {
            return Err(KubeError::InvalidLeaseConfig(
                "leader election identity must not be empty".to_string(),
            ));
        }

        Ok(Self {
            api: Api::namespaced(client, &namespace),
            namespace,
            name,
            identity,
        })
    }

    fn lease_error(&self, operation: &'static str, source: impl Into<KubeError>) -> KubeError {
        KubeError::Lease {
            name: self.describe(),
            operation,
            source: Box::new(source.into()),
        }
    }
}

fn lease_seconds(duration: Duration) -> i32 {
    i32::try_from(duration.as_secs()).unwrap_or(i32::MAX).max(1)
}

fn grant_expired(spec: &LeaseSpec, now: chrono::DateTime<Utc>) -> bool {
    match (&spec.renew_time, spec.lease_duration_seconds) {
        (Some(renewed), Some(seconds)) => {
            renewed.0 + chrono::Duration::seconds(i64::from(seconds)) < now
        }
        _ => true,
    }
}

#[async_trait]
impl LeaseLock for KubeLeaseLock {
    fn identity(&self) -> &str {
        &self.identity
    }

    fn describe(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    async fn try_acquire_or_renew(&self, lease_duration: Duration) -> Result<bool> {
        let now = Utc::now();
        let seconds = lease_seconds(lease_duration);

        let existing = self
            .api
            .get_opt(&self.name)
            .await
            .map_err(|e| self.lease_error("get", e))?;

        let Some(mut lease) = existing else {
            let lease = Lease {
                metadata: ObjectMeta {
                    name: Some(self.name.clone()),
                    namespace: Some(self.namespace.clone()),
                    ..Default::default()
                },
                spec: Some(LeaseSpec {
                    holder_identity: Some(self.identity.clone()),
                    lease_duration_seconds: Some(seconds),
                    acquire_time: Some(MicroTime(now)),
                    renew_time: Some(MicroTime(now)),
                    lease_transitions: Some(0),
                    ..Default::default()
                }),
            };

            return match self
                .api
                .create(&PostParams::default(), &lease)
                .await
                .map_err(KubeError::from)
            {
                Ok(_) => Ok(true),
                Err(e) if e.is_conflict() => Ok(false),
                Err(e) => Err(self.lease_error("create", e)),
            };
        };

        let spec = lease.spec.take().unwrap_or_default();
        let holder = spec.holder_identity.clone().unwrap_or_default();
        let held_by_us = holder == self.identity;

        if !held_by_us && !holder.is_empty() && !grant_expired(&spec, now) {
            return Ok(false);
        }

        let transitions = spec.lease_transitions.unwrap_or(0);
        lease.spec = Some(LeaseSpec {
            holder_identity: Some(self.identity.clone()),
            lease_duration_seconds: Some(seconds),
            acquire_time: if held_by_us {
                spec.acquire_time.clone()
            } else {
                Some(MicroTime(now))
            },
            renew_time: Some(MicroTime(now)),
            lease_transitions: Some(if held_by_us {
                transitions
            } else {
                transitions.saturating_add(1)
            }),
            ..spec
        });

        match self
            .api
            .replace(&self.name, &PostParams::default(), &lease)
            .await
            .map_err(KubeError::from)
        {
            Ok(_) => Ok(true),
            Err(e) if e.is_conflict() => Ok(false),
            Err(e) => Err(self.lease_error("update", e)),
        }
    }

    async fn release(&self) -> Result<()> {
        let existing = self
            .api
            .get_opt(&self.name)
            .await
            .map_err(|e| self.lease_error("get", e))?;

        let Some(mut lease) = existing else {
            return Ok(());
        };

        let spec = lease.spec.get_or_insert_with(LeaseSpec::default);
        if spec.holder_identity.as_deref() != Some(self.identity.as_str()) {
            return Ok(());
        }

        spec.holder_identity = None;
        spec.lease_duration_seconds = Some(1);
        spec.renew_time = Some(MicroTime(Utc::now()));

        self.api
            .replace(&self.name, &PostParams::default(), &lease)
            .await
            .map_err(|e| self.lease_error("release", e))?;
        Ok(())
    }
}
