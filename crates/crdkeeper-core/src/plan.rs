//! Installation planning
//!
//! Produces exactly one [`InstallationInstruction`] per goal CRD. Each
//! instruction carries two independent classifications:
//!
//! - a [`FilterResult`] deciding whether the CRD is eligible at all
//!   (already installed, or selected by a pattern)
//! - a [`DiffResult`] deciding whether an eligible CRD needs writing
//!
//! Both only escalate within one planning pass. The existing-CRD pass runs
//! before the pattern pass, and spec differences are recorded before version
//! differences so a version change always wins.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::compare::{find_non_matching, spec_equal, version_equal};
use crate::definition::{Definition, match_string};
use crate::error::{CoreError, Result};
use crate::pattern::PatternMatcher;

/// Why a goal CRD is (or is not) eligible for installation
///
/// Variants are ordered by strength; classification only ever moves up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterResult {
    Excluded,
    MatchedExisting,
    MatchedPattern,
}

impl fmt::Display for FilterResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Excluded => write!(f, "Excluded"),
            Self::MatchedExisting => write!(f, "MatchedExisting"),
            Self::MatchedPattern => write!(f, "MatchedPattern"),
        }
    }
}

/// How an eligible goal CRD differs from the installed one
///
/// Variants are ordered by strength; a version difference outranks a spec
/// difference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DiffResult {
    #[default]
    NoDifference,
    SpecDifferent,
    VersionDifferent,
}

impl fmt::Display for DiffResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoDifference => write!(f, "NoDifference"),
            Self::SpecDifferent => write!(f, "SpecDifferent"),
            Self::VersionDifferent => write!(f, "VersionDifferent"),
        }
    }
}

/// The planned action for one goal CRD
#[derive(Debug, Clone, PartialEq)]
pub struct InstallationInstruction {
    pub definition: Definition,
    pub filter_result: FilterResult,
    pub filter_reason: String,
    pub diff_result: DiffResult,
}

impl InstallationInstruction {
    fn excluded(definition: Definition) -> Self {
        let filter_reason = format!(
            "{:?} was not matched by CRD pattern and did not already exist in cluster",
            match_string(&definition)
        );
        Self {
            definition,
            filter_result: FilterResult::Excluded,
            filter_reason,
            diff_result: DiffResult::NoDifference,
        }
    }

    /// CRD name
    pub fn name(&self) -> &str {
        match_string(&self.definition)
    }

    /// Whether the CRD is eligible for installation
    pub fn is_included(&self) -> bool {
        self.filter_result != FilterResult::Excluded
    }

    /// Whether the CRD must be written, with a human-readable reason
    pub fn should_apply(&self) -> (bool, String) {
        if self.filter_result == FilterResult::Excluded {
            return (false, self.filter_reason.clone());
        }

        match self.diff_result {
            DiffResult::NoDifference => (
                false,
                "the CRD in the cluster is already up to date".to_string(),
            ),
            DiffResult::SpecDifferent => (
                true,
                "the spec of the CRD in the cluster differs".to_string(),
            ),
            DiffResult::VersionDifferent => (
                true,
                "the version label of the CRD in the cluster differs".to_string(),
            ),
        }
    }

    fn escalate_filter(&mut self, result: FilterResult, reason: String) {
        if result > self.filter_result {
            self.filter_result = result;
            self.filter_reason = reason;
        }
    }

    fn escalate_diff(&mut self, result: DiffResult) {
        self.diff_result = self.diff_result.max(result);
    }
}

/// Decide which goal CRDs to install or upgrade
///
/// Returns one instruction per goal CRD name, sorted by name. Fails if
/// `patterns` is non-empty and any pattern matches no goal CRD.
pub fn plan(
    goal: &[Definition],
    existing: &[Definition],
    patterns: &str,
) -> Result<Vec<InstallationInstruction>> {
    tracing::info!(count = goal.len(), "Goal CRDs");
    tracing::info!(count = existing.len(), "Existing CRDs");

    let mut instructions: BTreeMap<String, InstallationInstruction> = goal
        .iter()
        .map(|d| (match_string(d).to_string(), InstallationInstruction::excluded(d.clone())))
        .collect();

    filter_by_existing(existing, &mut instructions);
    filter_by_patterns(patterns, &mut instructions)?;

    let filtered: Vec<Definition> = instructions
        .values()
        .filter(|i| i.is_included())
        .map(|i| i.definition.clone())
        .collect();

    let different_spec = find_non_matching(existing, &filtered, &[spec_equal]);
    let different_version = find_non_matching(existing, &filtered, &[version_equal]);

    for (name, result) in different_spec
        .keys()
        .map(|n| (n, DiffResult::SpecDifferent))
        .chain(different_version.keys().map(|n| (n, DiffResult::VersionDifferent)))
    {
        instructions
            .get_mut(name)
            .ok_or_else(|| CoreError::UnknownGoal { name: name.clone() })?
            .escalate_diff(result);
    }

    Ok(instructions.into_values().collect())
}

fn filter_by_existing(
    existing: &[Definition],
    instructions: &mut BTreeMap<String, InstallationInstruction>,
) {
    for definition in existing {
        let name = match_string(definition);
        let Some(instruction) = instructions.get_mut(name) else {
            tracing::warn!(
                existing = name,
                "Found existing CRD for which no goal CRD exists. This is unexpected!"
            );
            continue;
        };

        instruction.escalate_filter(
            FilterResult::MatchedExisting,
            format!(
                "A CRD named {:?} was already installed, considering that existing CRD for update",
                name
            ),
        );
    }
}

fn filter_by_patterns(
    patterns: &str,
    instructions: &mut BTreeMap<String, InstallationInstruction>,
) -> Result<()> {
    if patterns.trim().is_empty() {
        return Ok(());
    }

    let mut matcher = PatternMatcher::new(patterns)?;
    for (name, instruction) in instructions.iter_mut() {
        if let Some(pattern) = matcher.matches(name).matching_pattern {
            instruction.escalate_filter(
                FilterResult::MatchedPattern,
                format!("CRD named {:?} matched pattern {:?}", name, pattern),
            );
        }
    }

    matcher.validate_all_used()
}

/// Instructions eligible for installation
pub fn included(instructions: &[InstallationInstruction]) -> Vec<&InstallationInstruction> {
    instructions.iter().filter(|i| i.is_included()).collect()
}

/// Instructions that must be written to the cluster
pub fn applicable(instructions: &[InstallationInstruction]) -> Vec<&InstallationInstruction> {
    instructions.iter().filter(|i| i.should_apply().0).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::VERSION_LABEL;
    use std::collections::BTreeMap;

    fn crd(name: &str, version: Option<&str>, group: &str) -> Definition {
        let mut definition = Definition::default();
        definition.metadata.name = Some(name.to_string());
        definition.metadata.labels = version.map(|v| {
            BTreeMap::from([(VERSION_LABEL.to_string(), v.to_string())])
        });
        definition.spec.group = group.to_string();
        definition
    }

    fn find<'a>(instructions: &'a [InstallationInstruction], name: &str) -> &'a InstallationInstruction {
        instructions.iter().find(|i| i.name() == name).unwrap()
    }

    #[test]
    fn test_absent_without_pattern_is_excluded() {
        let goal = vec![crd("widgets.example.com", Some("v1"), "example.com")];

        let instructions = plan(&goal, &[], "").unwrap();
        let widgets = find(&instructions, "widgets.example.com");

        assert_eq!(widgets.filter_result, FilterResult::Excluded);
        assert_eq!(widgets.diff_result, DiffResult::NoDifference);
        assert!(widgets.filter_reason.contains("was not matched by CRD pattern"));
        assert!(applicable(&instructions).is_empty());
        assert!(included(&instructions).is_empty());
    }

    #[test]
    fn test_identical_existing_is_no_difference() {
        let goal = vec![crd("widgets.example.com", Some("v1"), "example.com")];
        let existing = goal.clone();

        let instructions = plan(&goal, &existing, "").unwrap();
        let widgets = find(&instructions, "widgets.example.com");

        assert_eq!(widgets.filter_result, FilterResult::MatchedExisting);
        assert_eq!(widgets.diff_result, DiffResult::NoDifference);
        assert!(!widgets.should_apply().0);
        assert!(applicable(&instructions).is_empty());
        assert_eq!(included(&instructions).len(), 1);
    }

    #[test]
    fn test_spec_difference() {
        let goal = vec![crd("widgets.example.com", Some("v1"), "example.com")];
        let existing = vec![crd("widgets.example.com", Some("v1"), "old.example.com")];

        let instructions = plan(&goal, &existing, "").unwrap();
        assert_eq!(
            find(&instructions, "widgets.example.com").diff_result,
            DiffResult::SpecDifferent
        );
        assert_eq!(applicable(&instructions).len(), 1);
    }

    #[test]
    fn test_version_difference_overrides_spec_difference() {
        let goal = vec![
            crd("widgets.example.com", Some("v2"), "example.com"),
            crd("gadgets.example.com", Some("v2"), "example.com"),
        ];
        let existing = vec![
            crd("widgets.example.com", Some("v1"), "old.example.com"),
            crd("gadgets.example.com", Some("v1"), "example.com"),
        ];

        let instructions = plan(&goal, &existing, "").unwrap();
        assert_eq!(
            find(&instructions, "widgets.example.com").diff_result,
            DiffResult::VersionDifferent
        );
        assert_eq!(
            find(&instructions, "gadgets.example.com").diff_result,
            DiffResult::VersionDifferent
        );
    }

    #[test]
    fn test_pattern_selects_absent_definition() {
        let goal = vec![
            crd("foo-bar", Some("v1"), "example.com"),
            crd("other", Some("v1"), "example.com"),
        ];

        let instructions = plan(&goal, &[], "foo-*").unwrap();
        let foo = find(&instructions, "foo-bar");

        assert_eq!(foo.filter_result, FilterResult::MatchedPattern);
        assert!(foo.filter_reason.contains("foo-*"));
        // Spec differs from the empty default
        assert_eq!(foo.diff_result, DiffResult::VersionDifferent);
        assert_eq!(
            applicable(&instructions)
                .iter()
                .map(|i| i.name())
                .collect::<Vec<_>>(),
            vec!["foo-bar"]
        );
        assert_eq!(find(&instructions, "other").filter_result, FilterResult::Excluded);
    }

    #[test]
    fn test_pattern_selected_spec_only_difference() {
        // No version label on either side, so only the spec comparison fires
        let goal = vec![crd("foo-bar", None, "example.com")];

        let instructions = plan(&goal, &[], "foo-*").unwrap();
        assert_eq!(find(&instructions, "foo-bar").diff_result, DiffResult::SpecDifferent);
    }

    #[test]
    fn test_pattern_never_downgrades_existing_match() {
        let goal = vec![crd("widgets.example.com", Some("v1"), "example.com")];
        let existing = goal.clone();

        let instructions = plan(&goal, &existing, "widgets.*").unwrap();
        let widgets = find(&instructions, "widgets.example.com");

        assert!(widgets.filter_result >= FilterResult::MatchedExisting);
        assert!(widgets.is_included());
    }

    #[test]
    fn test_unmatched_pattern_fails() {
        let goal = vec![crd("widgets.example.com", Some("v1"), "example.com")];

        let err = plan(&goal, &[], "nomatch-*").unwrap_err();
        assert!(matches!(err, CoreError::UnmatchedPatterns { .. }));
        assert!(err.to_string().contains("nomatch-*"));
    }

    #[test]
    fn test_one_instruction_per_goal() {
        let goal = vec![
            crd("a.example.com", Some("v1"), "example.com"),
            crd("b.example.com", Some("v1"), "example.com"),
            crd("c.example.com", Some("v1"), "example.com"),
        ];
        let existing = vec![
            crd("a.example.com", Some("v1"), "example.com"),
            crd("stale.example.com", Some("v0"), "example.com"),
        ];

        let instructions = plan(&goal, &existing, "b.*").unwrap();
        let names: Vec<&str> = instructions.iter().map(|i| i.name()).collect();

        assert_eq!(names, vec!["a.example.com", "b.example.com", "c.example.com"]);
    }

    #[test]
    fn test_plan_is_idempotent() {
        let goal = vec![
            crd("c.example.com", Some("v2"), "example.com"),
            crd("a.example.com", Some("v2"), "example.com"),
            crd("b.example.com", None, "example.com"),
        ];
        let existing = vec![
            crd("a.example.com", Some("v1"), "example.com"),
            crd("b.example.com", None, "old.example.com"),
        ];

        let first = plan(&goal, &existing, "c.*").unwrap();
        let second = plan(&goal, &existing, "c.*").unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_should_apply_reasons() {
        let mut instruction = InstallationInstruction::excluded(crd("a.example.com", None, ""));
        assert!(!instruction.should_apply().0);

        instruction.escalate_filter(FilterResult::MatchedPattern, "picked".to_string());
        instruction.escalate_diff(DiffResult::SpecDifferent);
        let (apply, reason) = instruction.should_apply();
        assert!(apply);
        assert!(reason.contains("spec"));

        // Escalation never goes backwards
        instruction.escalate_filter(FilterResult::MatchedExisting, "existing".to_string());
        instruction.escalate_diff(DiffResult::NoDifference);
        assert_eq!(instruction.filter_result, FilterResult::MatchedPattern);
        assert_eq!(instruction.filter_reason, "picked");
        assert_eq!(instruction.diff_result, DiffResult::SpecDifferent);
    }
}
