//! Validate command - check CRDs and patterns offline

use std::collections::BTreeMap;

use console::style;
use crdkeeper_core::{PatternMatcher, load_definitions, match_string, rewrite_namespaces};

use crate::args::CrdArgs;
use crate::error::{CliError, Result};

/// Run the validate command
///
/// Loads and rewrites every CRD, then checks that each one is named, that
/// names are unique, and that every pattern clause matches a CRD.
pub fn run(crds: &CrdArgs) -> Result<()> {
    let options = crds.install_options();

    println!(
        "{} Validating CRDs in {}",
        style("→").blue(),
        options.path.display()
    );

    let definitions = rewrite_namespaces(&load_definitions(&options.path)?, &options.namespace);
    if definitions.is_empty() {
        return Err(CliError::validation_with_help(
            format!("no CRDs found in {}", options.path.display()),
            "--crd-path must point at a directory with one CRD manifest per file",
        ));
    }

    let mut seen: BTreeMap<&str, usize> = BTreeMap::new();
    for definition in &definitions {
        let name = match_string(definition);
        if name.is_empty() {
            return Err(CliError::validation("CRD without metadata.name"));
        }
        *seen.entry(name).or_default() += 1;
    }

    let duplicates: Vec<&str> = seen
        .iter()
        .filter(|(_, count)| **count > 1)
        .map(|(name, _)| *name)
        .collect();
    if !duplicates.is_empty() {
        return Err(CliError::validation(format!(
            "duplicate CRD name(s): {}",
            duplicates.join(", ")
        )));
    }

    for name in seen.keys() {
        println!("  {} {}", style("✓").green(), name);
    }

    if !options.crd_patterns.trim().is_empty() {
        let mut matcher = PatternMatcher::new(&options.crd_patterns)?;
        let matches = matcher.evaluate(seen.keys().copied());

        println!();
        for (name, pattern) in &matches {
            println!(
                "  {} {} matched pattern {}",
                style("→").blue(),
                name,
                style(pattern).cyan()
            );
        }
        matcher.validate_all_used()?;
    }

    println!();
    println!(
        "{} Validation passed: {} CRD(s)",
        style("✓").green().bold(),
        definitions.len()
    );
    Ok(())
}
