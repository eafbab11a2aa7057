//! Shared command-line arguments

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use crdkeeper_core::{DEFAULT_APP_NAME, DEFAULT_CRD_PATH};
use crdkeeper_kube::{DEFAULT_LEASE_NAME, ElectionConfig, InstallOptions};

/// Where the goal CRDs come from and which ones to select
#[derive(Args, Debug, Clone)]
pub struct CrdArgs {
    /// Directory holding one CRD manifest per file
    #[arg(long, env = "CRDKEEPER_CRD_PATH", default_value = DEFAULT_CRD_PATH)]
    pub crd_path: PathBuf,

    /// Namespace the operator is installed in
    #[arg(short, long, env = "POD_NAMESPACE", default_value = "default")]
    pub namespace: String,

    /// ';'-separated glob patterns selecting CRDs to install (e.g. 'widgets.*;*.example.com')
    #[arg(long, env = "CRDKEEPER_CRD_PATTERN", default_value = "")]
    pub crd_pattern: String,

    /// Value of the app.kubernetes.io/name label marking the operator's CRDs
    #[arg(long, env = "CRDKEEPER_APP_NAME", default_value = DEFAULT_APP_NAME)]
    pub app_name: String,
}

impl CrdArgs {
    pub fn install_options(&self) -> InstallOptions {
        InstallOptions {
            path: self.crd_path.clone(),
            namespace: self.namespace.clone(),
            crd_patterns: self.crd_pattern.clone(),
        }
    }
}

/// Leader election settings
#[derive(Args, Debug, Clone)]
pub struct LeaderArgs {
    /// Apply CRDs only while holding the leader lease
    #[arg(long, env = "CRDKEEPER_LEADER_ELECT")]
    pub leader_elect: bool,

    /// Name of the Lease object
    #[arg(long, default_value = DEFAULT_LEASE_NAME)]
    pub lease_name: String,

    /// Namespace of the Lease object (defaults to --namespace)
    #[arg(long)]
    pub lease_namespace: Option<String>,

    /// Identity recorded in the lease (defaults to the hostname)
    #[arg(long, env = "POD_NAME")]
    pub identity: Option<String>,

    /// Seconds a lease stays valid without renewal
    #[arg(long, default_value_t = 15)]
    pub lease_duration: u64,

    /// Seconds the leader keeps retrying a renewal before giving up
    #[arg(long, default_value_t = 10)]
    pub renew_deadline: u64,

    /// Seconds between acquire and renew attempts
    #[arg(long, default_value_t = 2)]
    pub retry_period: u64,
}

impl LeaderArgs {
    pub fn election_config(&self) -> ElectionConfig {
        ElectionConfig {
            lease_duration: Duration::from_secs(self.lease_duration),
            renew_deadline: Duration::from_secs(self.renew_deadline),
            retry_period: Duration::from_secs(self.retry_period),
            ..Default::default()
        }
    }

    pub fn lease_namespace<'a>(&'a self, install_namespace: &'a str) -> &'a str {
        self.lease_namespace.as_deref().unwrap_or(install_namespace)
    }

    /// Lease holder identity, unique per process
    pub fn identity(&self) -> String {
        if let Some(identity) = self.identity.as_deref().filter(|i| !i.is_empty()) {
            return identity.to_string();
        }

        let hostname = std::env::var("HOSTNAME")
            .ok()
            .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "crdkeeper".to_string());

        format!("{}_{}", hostname, std::process::id())
    }
}
