//! Serializable authoring form of a test.
//!
//! Test definitions are nested documents (JSON or TOML) that mirror the
//! QTI structure. [`AssessmentTest::from_definition`] flattens one into the
//! part arena, assigning global indexes in pre-order.

use serde::{Deserialize, Serialize};

use crate::part::control::{
    ItemSessionControl, NavigationMode, Ordering, Selection, SubmissionMode, TimeLimits, Weight,
};
use crate::part::jump::{BranchRule, PreCondition};
use crate::part::node::{
    AbstractPart, ItemRefInfo, PartId, PartKind, SectionInfo, TestPartInfo,
};
use crate::part::{AssessmentTest, OutcomeDeclaration, PartError};
use crate::value::is_valid_identifier;

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestDefinition {
    pub identifier: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub time_limits: Option<TimeLimits>,
    #[serde(default)]
    pub outcome_declarations: Vec<OutcomeDeclaration>,
    #[serde(default)]
    pub test_parts: Vec<TestPartDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestPartDefinition {
    pub identifier: String,
    pub navigation_mode: NavigationMode,
    pub submission_mode: SubmissionMode,
    #[serde(default)]
    pub time_limits: Option<TimeLimits>,
    #[serde(default)]
    pub item_session_control: Option<ItemSessionControl>,
    #[serde(default)]
    pub pre_conditions: Vec<PreCondition>,
    #[serde(default)]
    pub branch_rules: Vec<BranchRule>,
    #[serde(default)]
    pub children: Vec<SectionPartDefinition>,
}

/// A child of a test part or section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SectionPartDefinition {
    Section(SectionDefinition),
    ItemRef(ItemRefDefinition),
}

impl SectionPartDefinition {
    pub fn identifier(&self) -> &str {
        match self {
            SectionPartDefinition::Section(s) => &s.identifier,
            SectionPartDefinition::ItemRef(i) => &i.identifier,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionDefinition {
    pub identifier: String,
    #[serde(default)]
    pub title: String,
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(default = "default_true")]
    pub keep_together: bool,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub fixed: bool,
    #[serde(default)]
    pub selection: Option<Selection>,
    #[serde(default)]
    pub ordering: Option<Ordering>,
    #[serde(default)]
    pub time_limits: Option<TimeLimits>,
    #[serde(default)]
    pub item_session_control: Option<ItemSessionControl>,
    #[serde(default)]
    pub pre_conditions: Vec<PreCondition>,
    #[serde(default)]
    pub branch_rules: Vec<BranchRule>,
    #[serde(default)]
    pub children: Vec<SectionPartDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRefDefinition {
    pub identifier: String,
    pub href: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub fixed: bool,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub weights: Vec<Weight>,
    #[serde(default)]
    pub time_limits: Option<TimeLimits>,
    #[serde(default)]
    pub item_session_control: Option<ItemSessionControl>,
    #[serde(default)]
    pub pre_conditions: Vec<PreCondition>,
    #[serde(default)]
    pub branch_rules: Vec<BranchRule>,
}

fn check_identifier(identifier: &str) -> Result<(), PartError> {
    if is_valid_identifier(identifier) {
        Ok(())
    } else {
        Err(PartError::InvalidIdentifier(identifier.to_string()))
    }
}

impl AssessmentTest {
    /// Flatten a definition into the part arena.
    ///
    /// Only lexical problems (malformed identifiers, duplicate outcome
    /// declarations) fail here. Semantic problems are left for validation.
    pub fn from_definition(def: &TestDefinition) -> Result<Self, PartError> {
        check_identifier(&def.identifier)?;
        for (i, decl) in def.outcome_declarations.iter().enumerate() {
            check_identifier(&decl.identifier)?;
            if def.outcome_declarations[..i]
                .iter()
                .any(|d| d.identifier == decl.identifier)
            {
                return Err(PartError::DuplicateOutcome(decl.identifier.clone()));
            }
        }

        let mut test = AssessmentTest::empty(
            def.identifier.clone(),
            def.title.clone(),
            def.time_limits,
            def.outcome_declarations.clone(),
        );
        for tp in &def.test_parts {
            check_identifier(&tp.identifier)?;
            let id = test.push(AbstractPart {
                id: PartId(0),
                identifier: tp.identifier.clone(),
                parent: None,
                children: Vec::new(),
                time_limits: tp.time_limits,
                item_session_control: tp.item_session_control,
                pre_conditions: tp.pre_conditions.clone(),
                branch_rules: tp.branch_rules.clone(),
                kind: PartKind::TestPart(TestPartInfo {
                    navigation_mode: tp.navigation_mode,
                    submission_mode: tp.submission_mode,
                }),
            });
            for child in &tp.children {
                push_section_part(&mut test, id, child)?;
            }
        }
        tracing::debug!(
            test = %def.identifier,
            parts = test.part_count(),
            "test definition flattened"
        );
        Ok(test)
    }
}

fn push_section_part(
    test: &mut AssessmentTest,
    parent: PartId,
    def: &SectionPartDefinition,
) -> Result<(), PartError> {
    check_identifier(def.identifier())?;
    match def {
        SectionPartDefinition::Section(s) => {
            let id = test.push(AbstractPart {
                id: PartId(0),
                identifier: s.identifier.clone(),
                parent: Some(parent),
                children: Vec::new(),
                time_limits: s.time_limits,
                item_session_control: s.item_session_control,
                pre_conditions: s.pre_conditions.clone(),
                branch_rules: s.branch_rules.clone(),
                kind: PartKind::Section(SectionInfo {
                    title: s.title.clone(),
                    visible: s.visible,
                    keep_together: s.keep_together,
                    required: s.required,
                    fixed: s.fixed,
                    selection: s.selection,
                    ordering: s.ordering,
                }),
            });
            for child in &s.children {
                push_section_part(test, id, child)?;
            }
        }
        SectionPartDefinition::ItemRef(i) => {
            test.push(AbstractPart {
                id: PartId(0),
                identifier: i.identifier.clone(),
                parent: Some(parent),
                children: Vec::new(),
                time_limits: i.time_limits,
                item_session_control: i.item_session_control,
                pre_conditions: i.pre_conditions.clone(),
                branch_rules: i.branch_rules.clone(),
                kind: PartKind::ItemRef(ItemRefInfo {
                    href: i.href.clone(),
                    required: i.required,
                    fixed: i.fixed,
                    categories: i.categories.clone(),
                    weights: i.weights.clone(),
                }),
            });
        }
    }
    Ok(())
}
