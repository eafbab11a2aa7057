//! Equality predicates over CRD pairs
//!
//! Comparators are plain functions taking `(existing, goal)`. They are combined
//! by [`find_matching`] (all must hold) and [`find_non_matching`] (any fails).

use std::collections::{BTreeMap, HashMap};

use crate::definition::{Definition, VERSION_LABEL, match_string};

/// A predicate deciding whether two CRDs are equal in some respect
pub type Comparator = fn(&Definition, &Definition) -> bool;

fn version_label(definition: &Definition) -> Option<&str> {
    definition
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(VERSION_LABEL))
        .map(String::as_str)
}

/// Compare the operator version labels of two CRDs
///
/// Equal when neither carries the label, unequal when only one does.
pub fn version_equal(a: &Definition, b: &Definition) -> bool {
    match (version_label(a), version_label(b)) {
        (None, None) => true,
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Compare specs, ignoring the conversion webhook CA bundle
///
/// The CA bundle is injected into the live object by cert-manager, so it never
/// matches what is on disk.
pub fn spec_equal(a: &Definition, b: &Definition) -> bool {
    strip_ca_bundle(a).spec == strip_ca_bundle(b).spec
}

/// Compare specs, ignoring the conversion webhook entirely
pub fn spec_equal_ignoring_conversion_webhook(a: &Definition, b: &Definition) -> bool {
    strip_conversion_webhook(a).spec == strip_conversion_webhook(b).spec
}

fn strip_ca_bundle(definition: &Definition) -> Definition {
    let mut result = definition.clone();
    if let Some(client_config) = result
        .spec
        .conversion
        .as_mut()
        .and_then(|c| c.webhook.as_mut())
        .and_then(|w| w.client_config.as_mut())
    {
        client_config.ca_bundle = None;
    }
    result
}

fn strip_conversion_webhook(definition: &Definition) -> Definition {
    let mut result = definition.clone();
    if let Some(conversion) = result.spec.conversion.as_mut() {
        conversion.webhook = None;
    }
    result
}

/// Find the goal CRDs for which every comparator holds against the existing CRD
///
/// A goal CRD with no existing counterpart is compared against a default
/// (empty) CRD, so comparators testing for absence can still classify the
/// pair as equal.
pub fn find_matching(
    existing: &[Definition],
    goal: &[Definition],
    comparators: &[Comparator],
) -> BTreeMap<String, Definition> {
    select(existing, goal, |e, g| comparators.iter().all(|c| c(e, g)))
}

/// Find the goal CRDs for which at least one comparator fails
pub fn find_non_matching(
    existing: &[Definition],
    goal: &[Definition],
    comparators: &[Comparator],
) -> BTreeMap<String, Definition> {
    select(existing, goal, |e, g| !comparators.iter().all(|c| c(e, g)))
}

fn select(
    existing: &[Definition],
    goal: &[Definition],
    predicate: impl Fn(&Definition, &Definition) -> bool,
) -> BTreeMap<String, Definition> {
    let by_name: HashMap<&str, &Definition> =
        existing.iter().map(|d| (match_string(d), d)).collect();
    let missing = Definition::default();

    goal.iter()
        .filter(|g| {
            let existing = by_name.get(match_string(g)).copied().unwrap_or(&missing);
            predicate(existing, *g)
        })
        .map(|g| (match_string(g).to_string(), g.clone()))
        .collect()
}
