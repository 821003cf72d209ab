//! Structural checks over the part hierarchy.

use std::collections::HashSet;
use std::fmt;

use qti_core::part::control::TimeLimits;
use qti_core::{AbstractPart, AssessmentTest, BranchRule, BranchTarget, PartKind};
use serde::Serialize;

/// Severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Warning => write!(f, "WARN"),
        }
    }
}

/// Which check produced a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Rule {
    EmptyTest,
    EmptyContainer,
    EmptyHref,
    DuplicateIdentifier,
    TimeLimits,
    SelectionBelowRequired,
    SelectionAboveChildren,
    DuplicateWeight,
    TestPartBranchTarget,
    JumpsDisabled,
    PreConditionIgnored,
    ExitSectionOutsideSection,
    UnknownBranchTarget,
    BranchTargetOtherTestPart,
    BackwardBranch,
    BranchIntoOwnSubtree,
    UnsafeBranchSource,
    UnsafeBranchTarget,
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Rule::EmptyTest => "empty-test",
            Rule::EmptyContainer => "empty-container",
            Rule::EmptyHref => "empty-href",
            Rule::DuplicateIdentifier => "duplicate-identifier",
            Rule::TimeLimits => "time-limits",
            Rule::SelectionBelowRequired => "selection-below-required",
            Rule::SelectionAboveChildren => "selection-above-children",
            Rule::DuplicateWeight => "duplicate-weight",
            Rule::TestPartBranchTarget => "test-part-branch-target",
            Rule::JumpsDisabled => "jumps-disabled",
            Rule::PreConditionIgnored => "precondition-ignored",
            Rule::ExitSectionOutsideSection => "exit-section-outside-section",
            Rule::UnknownBranchTarget => "unknown-branch-target",
            Rule::BranchTargetOtherTestPart => "branch-target-other-test-part",
            Rule::BackwardBranch => "backward-branch",
            Rule::BranchIntoOwnSubtree => "branch-into-own-subtree",
            Rule::UnsafeBranchSource => "unsafe-branch-source",
            Rule::UnsafeBranchTarget => "unsafe-branch-target",
        };
        f.write_str(name)
    }
}

/// A problem found in a test definition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub rule: Rule,
    pub message: String,
    /// Identifier of the offending part, `None` for test-level problems.
    pub part: Option<String>,
    pub global_index: Option<usize>,
    pub suggestion: Option<String>,
}

impl Diagnostic {
    fn error(rule: Rule, part: Option<&AbstractPart>, message: String) -> Self {
        Self::new(Severity::Error, rule, part, message)
    }

    fn warning(rule: Rule, part: Option<&AbstractPart>, message: String) -> Self {
        Self::new(Severity::Warning, rule, part, message)
    }

    fn new(severity: Severity, rule: Rule, part: Option<&AbstractPart>, message: String) -> Self {
        Self {
            severity,
            rule,
            message,
            part: part.map(|p| p.identifier.clone()),
            global_index: part.map(|p| p.global_index()),
            suggestion: None,
        }
    }

    fn suggest(mut self, suggestion: &str) -> Self {
        self.suggestion = Some(suggestion.to_string());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// Run every structural check over `test`.
pub fn validate(test: &AssessmentTest) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    if test.test_parts().next().is_none() {
        diagnostics.push(
            Diagnostic::error(Rule::EmptyTest, None, "test has no test parts".into())
                .suggest("Add at least one testPart"),
        );
    }
    if let Some(limits) = test.time_limits() {
        check_time_limits(None, limits, &mut diagnostics);
    }

    let mut seen = HashSet::new();
    for part in test.parts() {
        if !seen.insert(part.identifier.as_str()) {
            diagnostics.push(Diagnostic::warning(
                Rule::DuplicateIdentifier,
                Some(part),
                format!("identifier {} is used by more than one part", part.identifier),
            ));
        }
        if let Some(limits) = &part.time_limits {
            check_time_limits(Some(part), limits, &mut diagnostics);
        }
        match &part.kind {
            PartKind::TestPart(_) | PartKind::Section(_) if part.children.is_empty() => {
                diagnostics.push(Diagnostic::error(
                    Rule::EmptyContainer,
                    Some(part),
                    format!("{} has no children", part),
                ));
            }
            _ => {}
        }
        match &part.kind {
            PartKind::Section(_) => check_selection(test, part, &mut diagnostics),
            PartKind::ItemRef(info) => {
                if info.href.trim().is_empty() {
                    diagnostics.push(Diagnostic::error(
                        Rule::EmptyHref,
                        Some(part),
                        format!("item reference {} has an empty href", part.identifier),
                    ));
                }
                check_weights(part, &mut diagnostics);
            }
            PartKind::TestPart(_) => {}
        }
        check_pre_conditions(test, part, &mut diagnostics);
        for rule in &part.branch_rules {
            check_branch_rule(test, part, rule, &mut diagnostics);
        }
    }

    tracing::debug!(
        test = test.identifier(),
        diagnostics = diagnostics.len(),
        "structural validation finished"
    );
    diagnostics
}

fn check_time_limits(part: Option<&AbstractPart>, limits: &TimeLimits, out: &mut Vec<Diagnostic>) {
    let owner = part.map_or_else(|| "test".to_string(), |p| p.to_string());
    for (name, bound) in [("minTime", limits.min_time), ("maxTime", limits.max_time)] {
        if bound.is_some_and(|b| b < 0.0) {
            out.push(Diagnostic::error(
                Rule::TimeLimits,
                part,
                format!("{name} on {owner} must not be negative"),
            ));
        }
    }
    if let (Some(min), Some(max)) = (limits.min_time, limits.max_time) {
        if min > max {
            out.push(Diagnostic::error(
                Rule::TimeLimits,
                part,
                format!("minTime {min} on {owner} exceeds maxTime {max}"),
            ));
        }
    }
}

fn check_selection(test: &AssessmentTest, section: &AbstractPart, out: &mut Vec<Diagnostic>) {
    let Some(selection) = section.selection() else {
        return;
    };
    let children: Vec<&AbstractPart> = test.children(section.id).collect();
    let required = children.iter().filter(|c| c.is_required()).count();
    let select = selection.select as usize;
    if select < required {
        out.push(
            Diagnostic::error(
                Rule::SelectionBelowRequired,
                Some(section),
                format!(
                    "select={select} is smaller than the {required} required children of {}",
                    section.identifier
                ),
            )
            .suggest("Raise select or mark fewer children as required"),
        );
    }
    if !selection.with_replacement && select > children.len() {
        out.push(
            Diagnostic::error(
                Rule::SelectionAboveChildren,
                Some(section),
                format!(
                    "select={select} exceeds the {} children of {} without replacement",
                    children.len(),
                    section.identifier
                ),
            )
            .suggest("Lower select or enable withReplacement"),
        );
    }
}

fn check_weights(item: &AbstractPart, out: &mut Vec<Diagnostic>) {
    let Some(info) = item.as_item_ref() else {
        return;
    };
    let mut seen = HashSet::new();
    for weight in &info.weights {
        if !seen.insert(weight.identifier.as_str()) {
            out.push(Diagnostic::error(
                Rule::DuplicateWeight,
                Some(item),
                format!(
                    "weight {} is declared more than once on {}",
                    weight.identifier, item.identifier
                ),
            ));
        }
    }
}

fn check_pre_conditions(test: &AssessmentTest, part: &AbstractPart, out: &mut Vec<Diagnostic>) {
    if part.pre_conditions.is_empty() || part.is_test_part() || test.jumps_enabled(part.id) {
        return;
    }
    out.push(Diagnostic::warning(
        Rule::PreConditionIgnored,
        Some(part),
        format!(
            "preconditions on {} are ignored outside linear/individual test parts",
            part.identifier
        ),
    ));
}

fn check_branch_rule(
    test: &AssessmentTest,
    source: &AbstractPart,
    rule: &BranchRule,
    out: &mut Vec<Diagnostic>,
) {
    if source.is_test_part() {
        if rule.target != BranchTarget::ExitTest {
            out.push(
                Diagnostic::error(
                    Rule::TestPartBranchTarget,
                    Some(source),
                    format!(
                        "branch rule on test part {} targets {}; only EXIT_TEST is allowed",
                        source.identifier, rule.target
                    ),
                )
                .suggest("Use EXIT_TEST or move the rule onto a section"),
            );
        }
        return;
    }

    if !test.jumps_enabled(source.id) {
        out.push(
            Diagnostic::error(
                Rule::JumpsDisabled,
                Some(source),
                format!(
                    "branch rule on {} requires a linear/individual test part",
                    source.identifier
                ),
            )
            .suggest("Switch the test part to linear navigation and individual submission"),
        );
        return;
    }

    match &rule.target {
        BranchTarget::ExitTest | BranchTarget::ExitTestPart => {}
        BranchTarget::ExitSection => {
            // A section exits its parent section; an item exits its own.
            if test.enclosing_section(source.id).is_none() {
                out.push(Diagnostic::error(
                    Rule::ExitSectionOutsideSection,
                    Some(source),
                    format!(
                        "EXIT_SECTION on {} has no enclosing section to exit",
                        source.identifier
                    ),
                ));
            }
        }
        BranchTarget::Part(identifier) => {
            check_part_target(test, source, identifier, out);
        }
    }
}

fn check_part_target(
    test: &AssessmentTest,
    source: &AbstractPart,
    identifier: &str,
    out: &mut Vec<Diagnostic>,
) {
    let Some(target) = test.lookup_first_descendant(identifier) else {
        out.push(Diagnostic::error(
            Rule::UnknownBranchTarget,
            Some(source),
            format!("branch target {identifier} does not exist"),
        ));
        return;
    };
    let source_tp = test.enclosing_test_part(source.id).map(|p| p.id);
    let target_tp = test.enclosing_test_part(target.id).map(|p| p.id);
    if target.is_test_part() || source_tp != target_tp {
        out.push(Diagnostic::error(
            Rule::BranchTargetOtherTestPart,
            Some(source),
            format!(
                "branch target {identifier} is not inside the test part of {}",
                source.identifier
            ),
        ));
        return;
    }
    if target.global_index() <= source.global_index() {
        out.push(
            Diagnostic::error(
                Rule::BackwardBranch,
                Some(source),
                format!(
                    "cannot jump back from {} (index {}) to {identifier} (index {})",
                    source.identifier,
                    source.global_index(),
                    target.global_index()
                ),
            )
            .suggest("Branch targets must come later in the test"),
        );
        return;
    }
    if test.is_descendant_of(target.id, source.id) {
        out.push(Diagnostic::error(
            Rule::BranchIntoOwnSubtree,
            Some(source),
            format!(
                "branch target {identifier} lies inside {} itself",
                source.identifier
            ),
        ));
        return;
    }
    if test.is_in_scope_of_ordering_or_selection(source.id) {
        out.push(Diagnostic::warning(
            Rule::UnsafeBranchSource,
            Some(source),
            format!(
                "jumping from {} is unreliable because of selection or ordering",
                source.identifier
            ),
        ));
    }
    if test.is_in_scope_of_ordering_or_selection(target.id) {
        out.push(Diagnostic::warning(
            Rule::UnsafeBranchTarget,
            Some(source),
            format!(
                "target {identifier} may not be selected or may be reordered"
            ),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qti_core::builder::{ItemRefBuilder, SectionBuilder, TestBuilder, TestPartBuilder};

    fn rules(diags: &[Diagnostic]) -> Vec<Rule> {
        diags.iter().map(|d| d.rule).collect()
    }

    #[test]
    fn clean_test_has_no_diagnostics() {
        let test = TestBuilder::new("T")
            .test_part(
                TestPartBuilder::linear_individual("P")
                    .section(
                        SectionBuilder::new("S")
                            .item(ItemRefBuilder::new("Q1", "q1").branch_rule("Q3", "true"))
                            .item(ItemRefBuilder::new("Q2", "q2"))
                            .item(ItemRefBuilder::new("Q3", "q3")),
                    )
                    .branch_rule("EXIT_TEST", "false"),
            )
            .build()
            .unwrap();
        assert!(validate(&test).is_empty());
    }

    #[test]
    fn empty_test_and_containers() {
        let test = TestBuilder::new("T").build().unwrap();
        assert_eq!(rules(&validate(&test)), vec![Rule::EmptyTest]);

        let test = TestBuilder::new("T")
            .test_part(TestPartBuilder::linear_individual("P").section(SectionBuilder::new("S")))
            .build()
            .unwrap();
        assert_eq!(rules(&validate(&test)), vec![Rule::EmptyContainer]);
    }

    #[test]
    fn duplicate_weights_are_errors() {
        let test = TestBuilder::new("T")
            .test_part(
                TestPartBuilder::linear_individual("P").item(
                    ItemRefBuilder::new("Q", "q")
                        .weight("W", 1.0)
                        .weight("W", 2.0),
                ),
            )
            .build()
            .unwrap();
        let diags = validate(&test);
        assert_eq!(rules(&diags), vec![Rule::DuplicateWeight]);
        assert!(diags[0].is_error());
    }

    #[test]
    fn time_limit_bounds() {
        let test = TestBuilder::new("T")
            .time_limits(TimeLimits {
                min_time: Some(-1.0),
                max_time: Some(10.0),
                allow_late_submission: false,
            })
            .test_part(
                TestPartBuilder::linear_individual("P")
                    .time_limits(TimeLimits {
                        min_time: Some(20.0),
                        max_time: Some(10.0),
                        allow_late_submission: false,
                    })
                    .item(ItemRefBuilder::new("Q", "q")),
            )
            .build()
            .unwrap();
        let diags = validate(&test);
        assert_eq!(rules(&diags), vec![Rule::TimeLimits, Rule::TimeLimits]);
        assert_eq!(diags[0].part, None);
        assert_eq!(diags[1].part.as_deref(), Some("P"));
    }

    #[test]
    fn duplicate_identifiers_warn() {
        let test = TestBuilder::new("T")
            .test_part(
                TestPartBuilder::linear_individual("P")
                    .item(ItemRefBuilder::new("Q", "q1"))
                    .item(ItemRefBuilder::new("Q", "q2")),
            )
            .build()
            .unwrap();
        let diags = validate(&test);
        assert_eq!(rules(&diags), vec![Rule::DuplicateIdentifier]);
        assert_eq!(diags[0].severity, Severity::Warning);
        assert_eq!(diags[0].global_index, Some(2));
    }

    #[test]
    fn empty_href_is_error() {
        let test = TestBuilder::new("T")
            .test_part(TestPartBuilder::linear_individual("P").item(ItemRefBuilder::new("Q", " ")))
            .build()
            .unwrap();
        assert_eq!(rules(&validate(&test)), vec![Rule::EmptyHref]);
    }

    #[test]
    fn preconditions_outside_jump_modes_warn() {
        let test = TestBuilder::new("T")
            .test_part(
                TestPartBuilder::nonlinear_simultaneous("P")
                    .pre_condition("true")
                    .item(ItemRefBuilder::new("Q", "q").pre_condition("false")),
            )
            .build()
            .unwrap();
        let diags = validate(&test);
        assert_eq!(rules(&diags), vec![Rule::PreConditionIgnored]);
        assert_eq!(diags[0].part.as_deref(), Some("Q"));
    }
}
