use proptest::prelude::*;
use qti_core::builder::{ItemRefBuilder, SectionBuilder, TestBuilder, TestPartBuilder};
use qti_core::{AssessmentTest, NavigationMode, SubmissionMode};
use qti_verify::{validate, Rule, Severity};

fn rules_for(test: &AssessmentTest) -> Vec<Rule> {
    validate(test).into_iter().map(|d| d.rule).collect()
}

/// P / S1{Q1, Q2} / S2{Q3}, with an extra branch rule on Q2.
fn linear_with_branch_on_q2(target: &str) -> AssessmentTest {
    TestBuilder::new("T")
        .test_part(
            TestPartBuilder::linear_individual("P")
                .section(
                    SectionBuilder::new("S1")
                        .item(ItemRefBuilder::new("Q1", "q1"))
                        .item(ItemRefBuilder::new("Q2", "q2").branch_rule(target, "true")),
                )
                .section(SectionBuilder::new("S2").item(ItemRefBuilder::new("Q3", "q3"))),
        )
        .test_part(TestPartBuilder::linear_individual("P2").item(ItemRefBuilder::new("Q9", "q9")))
        .build()
        .unwrap()
}

#[test]
fn forward_targets_are_valid() {
    assert!(rules_for(&linear_with_branch_on_q2("S2")).is_empty());
    assert!(rules_for(&linear_with_branch_on_q2("Q3")).is_empty());
    assert!(rules_for(&linear_with_branch_on_q2("EXIT_SECTION")).is_empty());
    assert!(rules_for(&linear_with_branch_on_q2("EXIT_TESTPART")).is_empty());
    assert!(rules_for(&linear_with_branch_on_q2("EXIT_TEST")).is_empty());
}

#[test]
fn backward_and_self_targets_are_errors() {
    assert_eq!(rules_for(&linear_with_branch_on_q2("Q1")), vec![Rule::BackwardBranch]);
    assert_eq!(rules_for(&linear_with_branch_on_q2("Q2")), vec![Rule::BackwardBranch]);
    assert_eq!(rules_for(&linear_with_branch_on_q2("S1")), vec![Rule::BackwardBranch]);
}

#[test]
fn unknown_and_foreign_targets_are_errors() {
    assert_eq!(rules_for(&linear_with_branch_on_q2("Nope")), vec![Rule::UnknownBranchTarget]);
    assert_eq!(
        rules_for(&linear_with_branch_on_q2("Q9")),
        vec![Rule::BranchTargetOtherTestPart]
    );
    assert_eq!(
        rules_for(&linear_with_branch_on_q2("P2")),
        vec![Rule::BranchTargetOtherTestPart]
    );
}

#[test]
fn jump_into_own_subtree_is_error() {
    let test = TestBuilder::new("T")
        .test_part(
            TestPartBuilder::linear_individual("P").section(
                SectionBuilder::new("S")
                    .branch_rule("Q2", "true")
                    .item(ItemRefBuilder::new("Q1", "q1"))
                    .item(ItemRefBuilder::new("Q2", "q2")),
            ),
        )
        .build()
        .unwrap();
    assert_eq!(rules_for(&test), vec![Rule::BranchIntoOwnSubtree]);
}

#[test]
fn test_part_rules_must_exit_test() {
    for target in ["EXIT_TESTPART", "EXIT_SECTION", "P2"] {
        let test = TestBuilder::new("T")
            .test_part(
                TestPartBuilder::linear_individual("P1")
                    .branch_rule(target, "true")
                    .item(ItemRefBuilder::new("Q1", "q1")),
            )
            .test_part(TestPartBuilder::linear_individual("P2").item(ItemRefBuilder::new("Q2", "q2")))
            .build()
            .unwrap();
        assert_eq!(rules_for(&test), vec![Rule::TestPartBranchTarget], "target {target}");
    }
}

#[test]
fn test_part_exit_test_is_valid_in_any_mode() {
    let test = TestBuilder::new("T")
        .test_part(
            TestPartBuilder::nonlinear_simultaneous("P1")
                .branch_rule("EXIT_TEST", "true")
                .item(ItemRefBuilder::new("Q1", "q1")),
        )
        .build()
        .unwrap();
    assert!(rules_for(&test).is_empty());
}

#[test]
fn section_part_rules_need_jumps_enabled() {
    for (nav, sub) in [
        (NavigationMode::Linear, SubmissionMode::Simultaneous),
        (NavigationMode::Nonlinear, SubmissionMode::Individual),
        (NavigationMode::Nonlinear, SubmissionMode::Simultaneous),
    ] {
        let test = TestBuilder::new("T")
            .test_part(
                TestPartBuilder::new("P", nav, sub)
                    .item(ItemRefBuilder::new("Q1", "q1").branch_rule("Q2", "true"))
                    .item(ItemRefBuilder::new("Q2", "q2")),
            )
            .build()
            .unwrap();
        assert_eq!(rules_for(&test), vec![Rule::JumpsDisabled]);
    }
}

#[test]
fn exit_section_needs_a_section() {
    let test = TestBuilder::new("T")
        .test_part(
            TestPartBuilder::linear_individual("P")
                .item(ItemRefBuilder::new("Q1", "q1").branch_rule("EXIT_SECTION", "true"))
                .section(
                    SectionBuilder::new("S")
                        .branch_rule("EXIT_SECTION", "true")
                        .item(ItemRefBuilder::new("Q2", "q2")),
                ),
        )
        .build()
        .unwrap();
    assert_eq!(
        rules_for(&test),
        vec![Rule::ExitSectionOutsideSection, Rule::ExitSectionOutsideSection]
    );
}

#[test]
fn targets_in_selection_scope_only_warn() {
    let test = TestBuilder::new("T")
        .test_part(
            TestPartBuilder::linear_individual("P")
                .item(ItemRefBuilder::new("Q0", "q0").branch_rule("Q2", "true"))
                .section(
                    SectionBuilder::new("S")
                        .select(1, false)
                        .item(ItemRefBuilder::new("Q1", "q1"))
                        .item(ItemRefBuilder::new("Q2", "q2")),
                ),
        )
        .build()
        .unwrap();
    let diags = validate(&test);
    assert_eq!(diags.len(), 1);
    assert_eq!(diags[0].rule, Rule::UnsafeBranchTarget);
    assert_eq!(diags[0].severity, Severity::Warning);
}

#[test]
fn sources_in_shuffle_scope_only_warn() {
    let test = TestBuilder::new("T")
        .test_part(
            TestPartBuilder::linear_individual("P")
                .section(
                    SectionBuilder::new("S")
                        .shuffle()
                        .item(ItemRefBuilder::new("Q1", "q1").branch_rule("Q3", "true"))
                        .item(ItemRefBuilder::new("Q2", "q2")),
                )
                .item(ItemRefBuilder::new("Q3", "q3")),
        )
        .build()
        .unwrap();
    assert_eq!(rules_for(&test), vec![Rule::UnsafeBranchSource]);
}

fn section_with(children: usize, required: usize, select: u32, with_replacement: bool) -> AssessmentTest {
    let mut section = SectionBuilder::new("S").select(select, with_replacement);
    for i in 0..children {
        let mut item = ItemRefBuilder::new(&format!("Q{i}"), "q");
        if i < required {
            item = item.required();
        }
        section = section.item(item);
    }
    TestBuilder::new("T")
        .test_part(TestPartBuilder::linear_individual("P").section(section))
        .build()
        .unwrap()
}

proptest! {
    #[test]
    fn selection_fails_iff_out_of_bounds(
        children in 1usize..8,
        required_seed in 0usize..8,
        select in 0u32..12,
        with_replacement in any::<bool>(),
    ) {
        let required = required_seed % (children + 1);
        let test = section_with(children, required, select, with_replacement);
        let selection_errors = validate(&test)
            .into_iter()
            .filter(|d| {
                matches!(d.rule, Rule::SelectionBelowRequired | Rule::SelectionAboveChildren)
            })
            .count();
        let expected_fail = (select as usize) < required
            || (!with_replacement && select as usize > children);
        prop_assert_eq!(selection_errors > 0, expected_fail);
    }
}
