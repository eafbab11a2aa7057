//! Leader-coordinated CRD apply engine
//!
//! [`CrdManager`] loads the operator's goal CRDs, compares them with what is
//! installed, and writes the ones that need it. With leader election enabled
//! the writes happen under the lease, after re-reading the cluster state
//! (double-checked locking), so a fleet of replicas applies each change once.
//!
//! ```text
//!   apply_crds ──► nothing applicable? ──► NothingToApply
//!        │
//!        ▼
//!   acquire lease ──► re-list + re-plan ──► nothing left? ──► RecheckedUpToDate
//!        │
//!        ▼
//!   create-or-update each CRD ──► step down ──► Applied (restart required)
//! ```
//!
//! Losing the lease involuntarily at any point after acquisition fails the
//! pass with [`KubeError::LeadershipLost`]. Cancelling after acquisition stops
//! between writes, releases the lease and returns [`ApplyOutcome::Interrupted`].

use std::path::{Path, PathBuf};

use crdkeeper_core::{
    APP_LABEL, DEFAULT_APP_NAME, DEFAULT_CRD_PATH, Definition, InstallationInstruction, included,
    load_definitions, match_string, plan, rewrite_namespaces,
};
use tokio_util::sync::CancellationToken;

use crate::client::CrdClient;
use crate::error::{KubeError, Result};
use crate::leader::{LeaderElection, LeaderSession, LeadershipEnd};

/// Result of an apply pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Every CRD was already up to date; the lease was not touched
    NothingToApply,
    /// Another replica applied the CRDs while this one waited for the lease
    RecheckedUpToDate,
    /// CRDs were written
    Applied {
        count: usize,
        /// How leadership ended, when the writes ran under the lease
        handoff: Option<LeadershipEnd>,
    },
    /// Cancelled while holding the lease; the lease was released cooperatively
    Interrupted {
        /// CRDs written before the cancellation was observed
        applied: usize,
    },
}

impl ApplyOutcome {
    /// Whether the process must restart to pick up the new CRDs
    pub fn restart_required(&self) -> bool {
        match self {
            Self::Applied { .. } => true,
            Self::Interrupted { applied } => *applied > 0,
            Self::NothingToApply | Self::RecheckedUpToDate => false,
        }
    }
}

/// What happened while holding the lease
enum LeaderPass {
    UpToDate,
    Written(usize),
    Interrupted(usize),
}

/// Where to load the goal CRDs from and how to select them
#[derive(Debug, Clone)]
pub struct InstallOptions {
    /// Directory holding one CRD per file
    pub path: PathBuf,
    /// Namespace the operator is installed in
    pub namespace: String,
    /// `;`-separated glob patterns selecting CRDs to install
    pub crd_patterns: String,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_CRD_PATH),
            namespace: "default".to_string(),
            crd_patterns: String::new(),
        }
    }
}

/// Installs and upgrades the operator's CRDs
pub struct CrdManager<C: CrdClient> {
    client: C,
    leader_election: Option<LeaderElection>,
    app_name: String,
    crds: Option<Vec<Definition>>,
}

impl<C: CrdClient> CrdManager<C> {
    /// Create a manager; without leader election CRDs are written directly
    pub fn new(client: C, leader_election: Option<LeaderElection>) -> Self {
        Self {
            client,
            leader_election,
            app_name: DEFAULT_APP_NAME.to_string(),
            crds: None,
        }
    }

    /// Set the app label value identifying the operator's CRDs
    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    /// Label selector matching the operator's CRDs
    pub fn label_selector(&self) -> String {
        format!("{}={}", APP_LABEL, self.app_name)
    }

    /// List the operator's CRDs currently installed
    pub async fn list_crds(&self) -> Result<Vec<Definition>> {
        let crds = self
            .client
            .list(&self.label_selector())
            .await
            .map_err(|e| KubeError::List(Box::new(e)))?;

        for crd in &crds {
            tracing::debug!(crd = match_string(crd), "Found existing CRD");
        }
        Ok(crds)
    }

    /// Load the goal CRDs, rewritten for `namespace`
    ///
    /// Loaded once per manager; later calls return the cached set.
    pub fn load_operator_crds(&mut self, path: &Path, namespace: &str) -> Result<&[Definition]> {
        let crds = match self.crds.take() {
            Some(crds) => crds,
            None => rewrite_namespaces(&load_definitions(path)?, namespace),
        };
        Ok(self.crds.insert(crds).as_slice())
    }

    /// Plan the installation of `goal` against `existing`
    pub fn determine_crds_to_install_or_upgrade(
        &self,
        goal: &[Definition],
        existing: &[Definition],
        crd_patterns: &str,
    ) -> Result<Vec<InstallationInstruction>> {
        Ok(plan(goal, existing, crd_patterns)?)
    }

    /// Instructions that must be written, optionally logging each decision
    pub fn filter_installation_instructions(
        instructions: &[InstallationInstruction],
        log: bool,
    ) -> Vec<&InstallationInstruction> {
        instructions
            .iter()
            .filter(|instruction| {
                let (apply, reason) = instruction.should_apply();
                if log {
                    if apply {
                        tracing::info!(crd = instruction.name(), reason = %reason, "Will update CRD");
                    } else {
                        tracing::info!(crd = instruction.name(), reason = %reason, "Will NOT update CRD");
                    }
                }
                apply
            })
            .collect()
    }

    /// Apply the instructions that need it
    ///
    /// With leader election the cluster is re-read once the lease is held and
    /// only what is still out of date is written. The first failed write
    /// aborts the batch.
    pub async fn apply_crds(
        &self,
        cancel: &CancellationToken,
        goal: &[Definition],
        instructions: &[InstallationInstruction],
        options: &InstallOptions,
    ) -> Result<ApplyOutcome> {
        let to_apply = Self::filter_installation_instructions(instructions, true);
        if to_apply.is_empty() {
            tracing::info!("All CRDs are up to date");
            return Ok(ApplyOutcome::NothingToApply);
        }

        let Some(election) = &self.leader_election else {
            let count = self.write_all(&to_apply).await?;
            tracing::info!(count, "Updated CRDs, operator restart required");
            return Ok(ApplyOutcome::Applied {
                count,
                handoff: None,
            });
        };

        tracing::info!(
            lease = %election.describe(),
            identity = election.identity(),
            "Waiting for leader lease before applying CRDs"
        );
        let mut session = election.start(cancel.child_token())?;
        let result = self.apply_as_leader(&mut session, goal, options).await;
        let stepped_down = session.step_down().await;

        let pass = match result {
            Ok(pass) => pass,
            Err(e) => {
                if let Err(release_error) = stepped_down {
                    tracing::warn!(error = %release_error, "Failed to step down after aborted apply");
                }
                return Err(e);
            }
        };

        // An involuntary end is a fault whatever was written
        let end = stepped_down?;
        if end == LeadershipEnd::Involuntary {
            return Err(KubeError::LeadershipLost);
        }

        match pass {
            LeaderPass::UpToDate => Ok(ApplyOutcome::RecheckedUpToDate),
            LeaderPass::Interrupted(applied) => {
                tracing::info!(applied, "Cancelled while applying CRDs, released leader lease");
                Ok(ApplyOutcome::Interrupted { applied })
            }
            LeaderPass::Written(count) => {
                tracing::info!(count, "Updated CRDs, operator restart required");
                Ok(ApplyOutcome::Applied {
                    count,
                    handoff: Some(end),
                })
            }
        }
    }

    async fn apply_as_leader(
        &self,
        session: &mut LeaderSession,
        goal: &[Definition],
        options: &InstallOptions,
    ) -> Result<LeaderPass> {
        session.wait_acquired().await?;

        tracing::info!("Acquired leader lease, rechecking CRDs");
        let existing = self.list_crds().await?;
        let instructions =
            self.determine_crds_to_install_or_upgrade(goal, &existing, &options.crd_patterns)?;

        let to_apply = Self::filter_installation_instructions(&instructions, true);
        if to_apply.is_empty() {
            tracing::info!("CRDs were updated by another replica while waiting for the lease");
            return Ok(LeaderPass::UpToDate);
        }

        let total = to_apply.len();
        for (index, instruction) in to_apply.iter().enumerate() {
            tokio::select! {
                biased;
                end = session.released() => {
                    return match end? {
                        LeadershipEnd::Involuntary => Err(KubeError::LeadershipLost),
                        _ => Ok(LeaderPass::Interrupted(index)),
                    };
                }
                written = self.write_one(index, total, instruction) => written?,
            }
        }

        Ok(LeaderPass::Written(total))
    }

    async fn write_all(&self, instructions: &[&InstallationInstruction]) -> Result<usize> {
        let total = instructions.len();
        for (index, instruction) in instructions.iter().enumerate() {
            self.write_one(index, total, instruction).await?;
        }
        Ok(total)
    }

    async fn write_one(
        &self,
        index: usize,
        total: usize,
        instruction: &InstallationInstruction,
    ) -> Result<()> {
        let name = instruction.name();
        tracing::info!(
            crd = name,
            progress = %format!("{}/{}", index + 1, total),
            "Applying CRD"
        );

        let operation = self
            .client
            .create_or_update(&instruction.definition)
            .await
            .map_err(|e| KubeError::Apply {
                name: name.to_string(),
                source: Box::new(e),
            })?;

        tracing::debug!(crd = name, %operation, "Applied CRD");
        Ok(())
    }

    /// Load, plan and apply the operator's CRDs
    ///
    /// Fails with [`KubeError::NothingSelected`] when no CRD exists in the
    /// cluster and no pattern selects one.
    pub async fn install(
        &mut self,
        cancel: &CancellationToken,
        options: &InstallOptions,
    ) -> Result<ApplyOutcome> {
        let goal = self
            .load_operator_crds(&options.path, &options.namespace)?
            .to_vec();
        let existing = self.list_crds().await?;

        let instructions =
            self.determine_crds_to_install_or_upgrade(&goal, &existing, &options.crd_patterns)?;
        if included(&instructions).is_empty() {
            return Err(KubeError::NothingSelected);
        }

        self.apply_crds(cancel, &goal, &instructions, options).await
    }
}
