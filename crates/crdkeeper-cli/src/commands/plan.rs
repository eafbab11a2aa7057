//! Plan command - show what install would do, without writing anything

use console::style;
use crdkeeper_core::{load_definitions, match_string, rewrite_namespaces};
use crdkeeper_kube::{CrdManager, KubeCrdClient};

use crate::args::CrdArgs;
use crate::display::{self, PlanEntry};
use crate::error::{CliError, Result};

/// Run the plan command
pub async fn run(crds: &CrdArgs, show_diff: bool, json_output: bool) -> Result<()> {
    let options = crds.install_options();

    let goal = rewrite_namespaces(&load_definitions(&options.path)?, &options.namespace);

    let client = KubeCrdClient::try_default().await?;
    let manager = CrdManager::new(client, None).with_app_name(&crds.app_name);
    let existing = manager.list_crds().await?;

    let instructions =
        manager.determine_crds_to_install_or_upgrade(&goal, &existing, &options.crd_patterns)?;

    if json_output {
        let entries: Vec<PlanEntry<'_>> = instructions.iter().map(PlanEntry::from).collect();
        let json = serde_json::to_string_pretty(&entries)
            .map_err(|e| CliError::internal(e.to_string()))?;
        println!("{}", json);
        return Ok(());
    }

    println!(
        "{} Planning {} goal CRD(s) against {} installed CRD(s) labelled {}",
        style("→").blue().bold(),
        goal.len(),
        existing.len(),
        style(manager.label_selector()).cyan()
    );
    println!();
    display::print_plan(&instructions);

    if show_diff {
        for instruction in display::pending(&instructions) {
            let installed = existing
                .iter()
                .find(|d| match_string(d) == instruction.name());
            display::print_spec_diff(instruction.name(), installed, &instruction.definition)?;
        }
    }

    Ok(())
}
