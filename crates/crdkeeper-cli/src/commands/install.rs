//! Install command - install or upgrade the operator's CRDs

use std::sync::Arc;

use console::style;
use crdkeeper_kube::{
    ApplyOutcome, CrdManager, KubeCrdClient, KubeLeaseLock, LeaderElection, LeadershipEnd,
};
use tokio_util::sync::CancellationToken;

use crate::args::{CrdArgs, LeaderArgs};
use crate::error::Result;

/// Run the install command
///
/// Returns `Ok(())` when CRDs were applied; the caller exits with status 0 so
/// the process supervisor restarts the replica with the new schema.
pub async fn run(crds: &CrdArgs, leader: &LeaderArgs) -> Result<()> {
    let options = crds.install_options();

    // Lease settings are checked before any cluster access
    let election_config = leader.election_config();
    if leader.leader_elect {
        election_config.validate()?;
    }

    println!(
        "{} Installing CRDs from {} into namespace {}",
        style("→").blue().bold(),
        style(options.path.display()).cyan(),
        style(&options.namespace).cyan()
    );

    let client = KubeCrdClient::try_default().await?;

    let election = if leader.leader_elect {
        let lock = KubeLeaseLock::new(
            client.client().clone(),
            leader.lease_namespace(&options.namespace),
            &leader.lease_name,
            leader.identity(),
        )?;
        Some(LeaderElection::new(Arc::new(lock), election_config)?)
    } else {
        None
    };

    let mut manager = CrdManager::new(client, election).with_app_name(&crds.app_name);

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received interrupt, shutting down");
            shutdown.cancel();
        }
    });

    match manager.install(&cancel, &options).await? {
        ApplyOutcome::NothingToApply => {
            println!("{} All CRDs are up to date", style("✓").green().bold());
        }
        ApplyOutcome::RecheckedUpToDate => {
            println!(
                "{} CRDs were updated by another replica",
                style("✓").green().bold()
            );
        }
        ApplyOutcome::Applied { count, handoff } => {
            println!("{} Applied {} CRD(s)", style("✓").green().bold(), count);
            if handoff == Some(LeadershipEnd::Cooperative) {
                println!("  {} Released leader lease", style("→").blue());
            }
            tracing::info!("Restarting operator after updating CRDs");
        }
        ApplyOutcome::Interrupted { applied } => {
            println!(
                "{} Interrupted after applying {} CRD(s), released leader lease",
                style("!").yellow().bold(),
                applied
            );
            if applied > 0 {
                tracing::info!("Restarting operator after updating CRDs");
            }
        }
    }

    Ok(())
}
