//! Cluster access for CRDs
//!
//! The apply engine only needs two operations from the cluster: list the CRDs
//! owned by the operator, and create-or-update a single CRD by name.

use std::fmt;

use async_trait::async_trait;
use crdkeeper_core::{Definition, match_string};
use kube::{
    Client,
    api::{Api, ListParams, PostParams},
};

use crate::error::{KubeError, Result};

/// What a create-or-update call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOperation {
    Created,
    Updated,
}

impl fmt::Display for ApplyOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Updated => write!(f, "updated"),
        }
    }
}

/// CRD store operations consumed by the apply engine
///
/// Implementations must be Send + Sync for use across async tasks.
#[async_trait]
pub trait CrdClient: Send + Sync {
    /// List CRDs matching a label selector (`key=value[,key=value]`)
    async fn list(&self, label_selector: &str) -> Result<Vec<Definition>>;

    /// Create the CRD, or overwrite the live object with it
    ///
    /// The live object's `resourceVersion` is carried over onto the goal so
    /// the update does not fail as a stale write.
    async fn create_or_update(&self, definition: &Definition) -> Result<ApplyOperation>;
}

/// [`CrdClient`] backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeCrdClient {
    client: Client,
}

impl KubeCrdClient {
    /// Create a new client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using the default kubeconfig or in-cluster configuration
    pub async fn try_default() -> Result<Self> {
        Ok(Self::new(Client::try_default().await?))
    }

    /// Get the underlying Kubernetes client
    pub fn client(&self) -> &Client {
        &self.client
    }

    // CRDs are cluster-scoped
    fn api(&self) -> Api<Definition> {
        Api::all(self.client.clone())
    }
}

#[async_trait]
impl CrdClient for KubeCrdClient {
    async fn list(&self, label_selector: &str) -> Result<Vec<Definition>> {
        let list = self
            .api()
            .list(&ListParams::default().labels(label_selector))
            .await?;
        Ok(list.items)
    }

    async fn create_or_update(&self, definition: &Definition) -> Result<ApplyOperation> {
        let name = match_string(definition);
        if name.is_empty() {
            return Err(KubeError::InvalidManifest(
                "CRD missing metadata.name".to_string(),
            ));
        }

        let api = self.api();
        let mut to_apply = definition.clone();

        match api.get_opt(name).await? {
            Some(live) => {
                to_apply.metadata.resource_version = live.metadata.resource_version;
                api.replace(name, &PostParams::default(), &to_apply).await?;
                Ok(ApplyOperation::Updated)
            }
            None => {
                to_apply.metadata.resource_version = None;
                api.create(&PostParams::default(), &to_apply).await?;
                Ok(ApplyOperation::Created)
            }
        }
    }
}
