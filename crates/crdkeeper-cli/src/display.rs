//! Display formatting for CLI output
//!
//! Provides structured display for:
//! - The installation plan, one row per goal CRD
//! - Unified diffs between installed and goal CRD specs

use console::{Style, style};
use crdkeeper_core::{Definition, DiffResult, FilterResult, InstallationInstruction};
use serde::Serialize;
use similar::{ChangeTag, TextDiff};

use crate::error::{CliError, Result};

/// One row of the plan, as rendered by `plan --json`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanEntry<'a> {
    pub name: &'a str,
    pub filter_result: FilterResult,
    pub filter_reason: &'a str,
    pub diff_result: DiffResult,
    pub apply: bool,
    pub reason: String,
}

impl<'a> From<&'a InstallationInstruction> for PlanEntry<'a> {
    fn from(instruction: &'a InstallationInstruction) -> Self {
        let (apply, reason) = instruction.should_apply();
        Self {
            name: instruction.name(),
            filter_result: instruction.filter_result,
            filter_reason: &instruction.filter_reason,
            diff_result: instruction.diff_result,
            apply,
            reason,
        }
    }
}

fn filter_style(result: FilterResult) -> Style {
    match result {
        FilterResult::Excluded => Style::new().dim(),
        FilterResult::MatchedExisting => Style::new().cyan(),
        FilterResult::MatchedPattern => Style::new().blue(),
    }
}

fn diff_style(result: DiffResult) -> Style {
    match result {
        DiffResult::NoDifference => Style::new().green(),
        DiffResult::SpecDifferent => Style::new().yellow(),
        DiffResult::VersionDifferent => Style::new().yellow().bold(),
    }
}

/// Print the plan as a table
pub fn print_plan(instructions: &[InstallationInstruction]) {
    let width = instructions
        .iter()
        .map(|i| i.name().len())
        .max()
        .unwrap_or(0)
        .max("CRD".len());

    println!(
        "{}",
        style(format!(
            "  {:<width$}  {:<16}  {:<16}  ACTION",
            "CRD", "FILTER", "DIFF"
        ))
        .bold()
    );

    for instruction in instructions {
        let (apply, reason) = instruction.should_apply();
        let action = if apply {
            style("apply".to_string()).green().bold()
        } else {
            style("skip".to_string()).dim()
        };

        println!(
            "  {:<width$}  {}  {}  {}",
            instruction.name(),
            filter_style(instruction.filter_result)
                .apply_to(format!("{:<16}", instruction.filter_result.to_string())),
            diff_style(instruction.diff_result)
                .apply_to(format!("{:<16}", instruction.diff_result.to_string())),
            action,
        );
        println!("  {:<width$}  {}", "", style(reason).dim());
    }

    let to_apply = pending(instructions).len();
    println!();
    println!(
        "{} {} of {} CRD(s) will be applied",
        style("→").blue(),
        style(to_apply).bold(),
        instructions.len()
    );
}

/// Instructions install would write
pub fn pending(instructions: &[InstallationInstruction]) -> Vec<&InstallationInstruction> {
    instructions.iter().filter(|i| i.should_apply().0).collect()
}

/// Render `spec` as YAML for diffing
pub fn spec_yaml(definition: &Definition) -> Result<String> {
    serde_yaml::to_string(&definition.spec).map_err(|e| {
        CliError::internal(format!(
            "failed to render spec of {}: {}",
            definition.metadata.name.as_deref().unwrap_or("<unnamed>"),
            e
        ))
    })
}

/// Print a unified diff between the installed and goal spec of one CRD
pub fn print_spec_diff(name: &str, existing: Option<&Definition>, goal: &Definition) -> Result<()> {
    let old = existing.map(spec_yaml).transpose()?.unwrap_or_default();
    let new = spec_yaml(goal)?;

    println!();
    match existing {
        Some(_) => println!("{} {}", style("~").yellow().bold(), style(name).bold()),
        None => println!("{} {} (new)", style("+").green().bold(), style(name).bold()),
    }

    let diff = TextDiff::from_lines(&old, &new);
    for group in diff.grouped_ops(3) {
        for op in group {
            for change in diff.iter_changes(&op) {
                let line = change.value().trim_end();
                match change.tag() {
                    ChangeTag::Delete => println!("    {}", style(format!("- {}", line)).red()),
                    ChangeTag::Insert => println!("    {}", style(format!("+ {}", line)).green()),
                    ChangeTag::Equal => println!("    {}", style(format!("  {}", line)).dim()),
                }
            }
        }
        println!("    {}", style("...").dim());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crdkeeper_core::plan;

    fn crd(name: &str, group: &str) -> Definition {
        let mut definition = Definition::default();
        definition.metadata.name = Some(name.to_string());
        definition.spec.group = group.to_string();
        definition
    }

    #[test]
    fn test_plan_entry_json() {
        let goal = vec![crd("widgets.example.com", "example.com")];
        let instructions = plan(&goal, &[], "widgets.*").unwrap();

        let entry = PlanEntry::from(&instructions[0]);
        let json = serde_json::to_value(&entry).unwrap();

        assert_eq!(json["name"], "widgets.example.com");
        assert_eq!(json["filterResult"], "matchedPattern");
        assert_eq!(json["diffResult"], "specDifferent");
        assert_eq!(json["apply"], true);
    }

    #[test]
    fn test_spec_yaml_contains_group() {
        let yaml = spec_yaml(&crd("widgets.example.com", "example.com")).unwrap();
        assert!(yaml.contains("group: example.com"));
    }

    #[test]
    fn test_pending_skips_up_to_date_and_excluded() {
        let installed = vec![crd("widgets.example.com", "example.com")];
        let goal = vec![
            crd("widgets.example.com", "example.com"),
            crd("gadgets.example.com", "example.com"),
            crd("sprockets.example.com", "example.com"),
        ];
        let instructions = plan(&goal, &installed, "gadgets.*").unwrap();

        let names: Vec<&str> = pending(&instructions).iter().map(|i| i.name()).collect();
        assert_eq!(names, vec!["gadgets.example.com"]);
    }
}
