//! In-memory collaborators for testing
//!
//! [`MockCrdClient`] stores CRDs in memory and [`MockLeaseLock`] keeps a lease
//! record shared between simulated replicas, useful for unit tests without
//! requiring a Kubernetes cluster.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use crdkeeper_core::{Definition, match_string};
use tokio::time::Instant;

use crate::client::{ApplyOperation, CrdClient};
use crate::error::{Result, api_error};
use crate::lease::LeaseLock;

/// In-memory CRD client for testing
#[derive(Clone, Default)]
pub struct MockCrdClient {
    /// Storage: name -> CRD
    store: Arc<RwLock<BTreeMap<String, Definition>>>,
    /// Track operation counts for assertions
    operations: Arc<RwLock<OperationCounts>>,
    /// Injected failures: name -> (status code, message)
    apply_failures: Arc<RwLock<HashMap<String, (u16, String)>>>,
    list_failure: Arc<RwLock<Option<(u16, String)>>>,
    next_version: Arc<RwLock<u64>>,
}

/// Counts of operations performed for testing assertions
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OperationCounts {
    pub lists: usize,
    pub creates: usize,
    pub updates: usize,
}

impl OperationCounts {
    /// Total number of write calls
    pub fn writes(&self) -> usize {
        self.creates + self.updates
    }
}

impl MockCrdClient {
    /// Create a new empty mock client
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with pre-installed CRDs
    pub fn with_definitions(definitions: Vec<Definition>) -> Self {
        let client = Self::new();
        for definition in definitions {
            client.insert(definition);
        }
        client
    }

    /// Install a CRD directly, bypassing operation counts
    pub fn insert(&self, mut definition: Definition) {
        definition.metadata.resource_version = Some(self.bump_version());
        self.store
            .write()
            .unwrap()
            .insert(match_string(&definition).to_string(), definition);
    }

    /// Get an installed CRD
    pub fn get(&self, name: &str) -> Option<Definition> {
        self.store.read().unwrap().get(name).cloned()
    }

    /// All installed CRDs, sorted by name
    pub fn definitions(&self) -> Vec<Definition> {
        self.store.read().unwrap().values().cloned().collect()
    }

    /// Make `create_or_update` fail for a CRD
    pub fn fail_apply(&self, name: &str, code: u16, message: &str) {
        self.apply_failures
            .write()
            .unwrap()
            .insert(name.to_string(), (code, message.to_string()));
    }

    /// Make `list` fail
    pub fn fail_list(&self, code: u16, message: &str) {
        *self.list_failure.write().unwrap() = Some((code, message.to_string()));
    }

    /// Get operation counts for assertions
    pub fn operation_counts(&self) -> OperationCounts {
        self.operations.read().unwrap().clone()
    }

    /// Reset operation counts
    pub fn reset_counts(&self) {
        *self.operations.write().unwrap() = OperationCounts::default();
    }

    fn bump_version(&self) -> String {
        let mut next = self.next_version.write().unwrap();
        *next += 1;
        next.to_string()
    }
}

fn selector_matches(definition: &Definition, label_selector: &str) -> bool {
    let labels = definition.metadata.labels.clone().unwrap_or_default();
    label_selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((key, value)) => labels.get(key.trim()).map(String::as_str) == Some(value.trim()),
            None => labels.contains_key(term),
        })
}

#[async_trait]
impl CrdClient for MockCrdClient {
    async fn list(&self, label_selector: &str) -> Result<Vec<Definition>> {
        self.operations.write().unwrap().lists += 1;

        if let Some((code, message)) = self.list_failure.read().unwrap().clone() {
            return Err(api_error(code, "InternalError", message));
        }

        Ok(self
            .store
            .read()
            .unwrap()
            .values()
            .filter(|d| selector_matches(d, label_selector))
            .cloned()
            .collect())
    }

    async fn create_or_update(&self, definition: &Definition) -> Result<ApplyOperation> {
        let name = match_string(definition).to_string();

        if let Some((code, message)) = self.apply_failures.read().unwrap().get(&name).cloned() {
            return Err(api_error(code, "InternalError", message));
        }

        let live_version = self
            .store
            .read()
            .unwrap()
            .get(&name)
            .and_then(|live| live.metadata.resource_version.clone());

        let mut to_apply = definition.clone();
        let operation = match live_version {
            Some(version) => {
                to_apply.metadata.resource_version = Some(version);
                self.operations.write().unwrap().updates += 1;
                ApplyOperation::Updated
            }
            None => {
                self.operations.write().unwrap().creates += 1;
                ApplyOperation::Created
            }
        };

        to_apply.metadata.resource_version = Some(self.bump_version());
        self.store.write().unwrap().insert(name, to_apply);

        Ok(operation)
    }
}

#[derive(Debug, Default)]
struct LeaseRecord {
    holder: Option<String>,
    expires: Option<Instant>,
    acquire_attempts: usize,
    releases: usize,
}

/// In-memory lease lock
///
/// Clones made with [`MockLeaseLock::for_identity`] share the same record, so
/// several replicas can compete for it.
#[derive(Clone)]
pub struct MockLeaseLock {
    identity: String,
    record: Arc<Mutex<LeaseRecord>>,
}

impl MockLeaseLock {
    /// Create a free lease held as `identity` once acquired
    pub fn new(identity: &str) -> Self {
        Self {
            identity: identity.to_string(),
            record: Arc::new(Mutex::new(LeaseRecord::default())),
        }
    }

    /// Another replica competing for the same lease
    pub fn for_identity(&self, identity: &str) -> Self {
        Self {
            identity: identity.to_string(),
            record: Arc::clone(&self.record),
        }
    }

    /// Take the lease unconditionally for `duration`
    pub fn hold_for(&self, duration: Duration) {
        let mut record = self.record.lock().unwrap();
        record.holder = Some(self.identity.clone());
        record.expires = Some(Instant::now() + duration);
    }

    /// Current holder, if any
    pub fn holder(&self) -> Option<String> {
        self.record.lock().unwrap().holder.clone()
    }

    /// Number of acquire or renew attempts across all replicas
    pub fn acquire_attempts(&self) -> usize {
        self.record.lock().unwrap().acquire_attempts
    }

    /// Number of releases across all replicas
    pub fn release_count(&self) -> usize {
        self.record.lock().unwrap().releases
    }
}

#[async_trait]
impl LeaseLock for MockLeaseLock {
    fn identity(&self) -> &str {
        &self.identity
    }

    fn describe(&self) -> String {
        "mock/lease".to_string()
    }

    async fn try_acquire_or_renew(&self, lease_duration: Duration) -> Result<bool> {
        let mut record = self.record.lock().unwrap();
        record.acquire_attempts += 1;

        let now = Instant::now();
        let held_by_other = record
            .holder
            .as_deref()
            .is_some_and(|holder| holder != self.identity)
            && record.expires.is_some_and(|expires| expires > now);
        if held_by_other {
            return Ok(false);
        }

        record.holder = Some(self.identity.clone());
        record.expires = Some(now + lease_duration);
        Ok(true)
    }

    async fn release(&self) -> Result<()> {
        let mut record = self.record.lock().unwrap();
        if record.holder.as_deref() == Some(self.identity.as_str()) {
            record.holder = None;
            record.expires = None;
            record.releases += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crd(name: &str, app: Option<&str>) -> Definition {
        let mut definition = Definition::default();
        definition.metadata.name = Some(name.to_string());
        definition.metadata.labels = app.map(|a| {
            BTreeMap::from([("app.kubernetes.io/name".to_string(), a.to_string())])
        });
        definition
    }

    #[tokio::test]
    async fn test_list_filters_by_label() {
        let client = MockCrdClient::with_definitions(vec![
            crd("a.example.com", Some("crdkeeper")),
            crd("b.example.com", Some("other")),
            crd("c.example.com", None),
        ]);

        let listed = client.list("app.kubernetes.io/name=crdkeeper").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(match_string(&listed[0]), "a.example.com");
        assert_eq!(client.operation_counts().lists, 1);
    }

    #[tokio::test]
    async fn test_create_then_update() {
        let client = MockCrdClient::new();
        let definition = crd("a.example.com", Some("crdkeeper"));

        assert_eq!(
            client.create_or_update(&definition).await.unwrap(),
            ApplyOperation::Created
        );
        let first_version = client.get("a.example.com").unwrap().metadata.resource_version;

        assert_eq!(
            client.create_or_update(&definition).await.unwrap(),
            ApplyOperation::Updated
        );
        let second_version = client.get("a.example.com").unwrap().metadata.resource_version;

        assert_ne!(first_version, second_version);
        assert_eq!(
            client.operation_counts(),
            OperationCounts {
                lists: 0,
                creates: 1,
                updates: 1
            }
        );
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let client = MockCrdClient::new();
        client.fail_apply("a.example.com", 500, "boom");

        let err = client
            .create_or_update(&crd("a.example.com", None))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("boom"));
        assert_eq!(client.operation_counts().writes(), 0);
    }

    #[tokio::test]
    async fn test_lease_contention() {
        let a = MockLeaseLock::new("replica-a");
        let b = a.for_identity("replica-b");
        let ttl = Duration::from_secs(30);

        assert!(a.try_acquire_or_renew(ttl).await.unwrap());
        assert!(!b.try_acquire_or_renew(ttl).await.unwrap());
        assert!(a.try_acquire_or_renew(ttl).await.unwrap());

        // Releasing as a non-holder does nothing
        b.release().await.unwrap();
        assert_eq!(a.holder().as_deref(), Some("replica-a"));

        a.release().await.unwrap();
        assert!(b.try_acquire_or_renew(ttl).await.unwrap());
        assert_eq!(a.holder().as_deref(), Some("replica-b"));
        assert_eq!(a.release_count(), 1);
        assert_eq!(a.acquire_attempts(), 4);
    }
}
