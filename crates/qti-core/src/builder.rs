//! Fluent construction of test definitions.
//!
//! # Example
//!
//! ```rust
//! use qti_core::builder::{ItemRefBuilder, SectionBuilder, TestBuilder, TestPartBuilder};
//!
//! let test = TestBuilder::new("T")
//!     .test_part(
//!         TestPartBuilder::linear_individual("P1").section(
//!             SectionBuilder::new("S1")
//!                 .item(ItemRefBuilder::new("Q1", "q1.xml"))
//!                 .item(ItemRefBuilder::new("Q2", "q2.xml").required())
//!                 .select(1, false),
//!         ),
//!     )
//!     .build()
//!     .unwrap();
//! assert_eq!(test.part_count(), 4);
//! ```

use crate::definition::{
    ItemRefDefinition, SectionDefinition, SectionPartDefinition, TestDefinition,
    TestPartDefinition,
};
use crate::part::control::{
    ItemSessionControl, NavigationMode, Ordering, Selection, SubmissionMode, TimeLimits, Weight,
};
use crate::part::jump::{BranchRule, BranchTarget, PreCondition};
use crate::part::{AssessmentTest, OutcomeDeclaration, PartError};

pub struct TestBuilder {
    def: TestDefinition,
}

impl TestBuilder {
    pub fn new(identifier: &str) -> Self {
        Self {
            def: TestDefinition {
                identifier: identifier.to_string(),
                title: String::new(),
                time_limits: None,
                outcome_declarations: Vec::new(),
                test_parts: Vec::new(),
            },
        }
    }

    pub fn title(mut self, title: &str) -> Self {
        self.def.title = title.to_string();
        self
    }

    pub fn time_limits(mut self, limits: TimeLimits) -> Self {
        self.def.time_limits = Some(limits);
        self
    }

    pub fn outcome(mut self, decl: OutcomeDeclaration) -> Self {
        self.def.outcome_declarations.push(decl);
        self
    }

    pub fn test_part(mut self, part: TestPartBuilder) -> Self {
        self.def.test_parts.push(part.def);
        self
    }

    pub fn definition(self) -> TestDefinition {
        self.def
    }

    pub fn build(self) -> Result<AssessmentTest, PartError> {
        AssessmentTest::from_definition(&self.def)
    }
}

pub struct TestPartBuilder {
    def: TestPartDefinition,
}

impl TestPartBuilder {
    pub fn new(identifier: &str, navigation: NavigationMode, submission: SubmissionMode) -> Self {
        Self {
            def: TestPartDefinition {
                identifier: identifier.to_string(),
                navigation_mode: navigation,
                submission_mode: submission,
                time_limits: None,
                item_session_control: None,
                pre_conditions: Vec::new(),
                branch_rules: Vec::new(),
                children: Vec::new(),
            },
        }
    }

    pub fn linear_individual(identifier: &str) -> Self {
        Self::new(identifier, NavigationMode::Linear, SubmissionMode::Individual)
    }

    pub fn nonlinear_simultaneous(identifier: &str) -> Self {
        Self::new(identifier, NavigationMode::Nonlinear, SubmissionMode::Simultaneous)
    }

    pub fn section(mut self, section: SectionBuilder) -> Self {
        self.def
            .children
            .push(SectionPartDefinition::Section(section.def));
        self
    }

    pub fn item(mut self, item: ItemRefBuilder) -> Self {
        self.def.children.push(SectionPartDefinition::ItemRef(item.def));
        self
    }

    pub fn control(mut self, isc: ItemSessionControl) -> Self {
        self.def.item_session_control = Some(isc);
        self
    }

    pub fn time_limits(mut self, limits: TimeLimits) -> Self {
        self.def.time_limits = Some(limits);
        self
    }

    pub fn pre_condition(mut self, expr: &str) -> Self {
        self.def.pre_conditions.push(PreCondition::new(expr));
        self
    }

    pub fn branch_rule(mut self, target: impl Into<BranchTarget>, expr: &str) -> Self {
        self.def.branch_rules.push(BranchRule::new(target, expr));
        self
    }
}

pub struct SectionBuilder {
    def: SectionDefinition,
}

impl SectionBuilder {
    pub fn new(identifier: &str) -> Self {
        Self {
            def: SectionDefinition {
                identifier: identifier.to_string(),
                title: String::new(),
                visible: true,
                keep_together: true,
                required: false,
                fixed: false,
                selection: None,
                ordering: None,
                time_limits: None,
                item_session_control: None,
                pre_conditions: Vec::new(),
                branch_rules: Vec::new(),
                children: Vec::new(),
            },
        }
    }

    pub fn title(mut self, title: &str) -> Self {
        self.def.title = title.to_string();
        self
    }

    pub fn into_definition(self) -> SectionDefinition {
        self.def
    }

    pub fn section(mut self, section: SectionBuilder) -> Self {
        self.def
            .children
            .push(SectionPartDefinition::Section(section.def));
        self
    }

    pub fn item(mut self, item: ItemRefBuilder) -> Self {
        self.def.children.push(SectionPartDefinition::ItemRef(item.def));
        self
    }

    pub fn select(mut self, select: u32, with_replacement: bool) -> Self {
        self.def.selection = Some(Selection {
            select,
            with_replacement,
        });
        self
    }

    pub fn shuffle(mut self) -> Self {
        self.def.ordering = Some(Ordering { shuffle: true });
        self
    }

    pub fn invisible(mut self, keep_together: bool) -> Self {
        self.def.visible = false;
        self.def.keep_together = keep_together;
        self
    }

    pub fn required(mut self) -> Self {
        self.def.required = true;
        self
    }

    pub fn fixed(mut self) -> Self {
        self.def.fixed = true;
        self
    }

    pub fn control(mut self, isc: ItemSessionControl) -> Self {
        self.def.item_session_control = Some(isc);
        self
    }

    pub fn time_limits(mut self, limits: TimeLimits) -> Self {
        self.def.time_limits = Some(limits);
        self
    }

    pub fn pre_condition(mut self, expr: &str) -> Self {
        self.def.pre_conditions.push(PreCondition::new(expr));
        self
    }

    pub fn branch_rule(mut self, target: impl Into<BranchTarget>, expr: &str) -> Self {
        self.def.branch_rules.push(BranchRule::new(target, expr));
        self
    }
}

pub struct ItemRefBuilder {
    def: ItemRefDefinition,
}

impl ItemRefBuilder {
    pub fn new(identifier: &str, href: &str) -> Self {
        Self {
            def: ItemRefDefinition {
                identifier: identifier.to_string(),
                href: href.to_string(),
                required: false,
                fixed: false,
                categories: Vec::new(),
                weights: Vec::new(),
                time_limits: None,
                item_session_control: None,
                pre_conditions: Vec::new(),
                branch_rules: Vec::new(),
            },
        }
    }

    pub fn into_definition(self) -> ItemRefDefinition {
        self.def
    }

    pub fn required(mut self) -> Self {
        self.def.required = true;
        self
    }

    pub fn fixed(mut self) -> Self {
        self.def.fixed = true;
        self
    }

    pub fn category(mut self, category: &str) -> Self {
        self.def.categories.push(category.to_string());
        self
    }

    pub fn weight(mut self, identifier: &str, value: f64) -> Self {
        self.def.weights.push(Weight {
            identifier: identifier.to_string(),
            value,
        });
        self
    }

    pub fn control(mut self, isc: ItemSessionControl) -> Self {
        self.def.item_session_control = Some(isc);
        self
    }

    pub fn time_limits(mut self, limits: TimeLimits) -> Self {
        self.def.time_limits = Some(limits);
        self
    }

    pub fn pre_condition(mut self, expr: &str) -> Self {
        self.def.pre_conditions.push(PreCondition::new(expr));
        self
    }

    pub fn branch_rule(mut self, target: impl Into<BranchTarget>, expr: &str) -> Self {
        self.def.branch_rules.push(BranchRule::new(target, expr));
        self
    }
}
