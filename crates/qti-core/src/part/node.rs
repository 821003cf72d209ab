//! Nodes of the part arena.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::control::{
    ItemSessionControl, NavigationMode, Ordering, Selection, SubmissionMode, TimeLimits, Weight,
};
use super::jump::{BranchRule, PreCondition};

/// Position of a part in the pre-order traversal of its test. Doubles as
/// the part's global index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartId(pub usize);

impl PartId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for PartId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Type tag shared by parts and plan nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartType {
    TestPart,
    AssessmentSection,
    AssessmentItemRef,
}

impl fmt::Display for PartType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartType::TestPart => write!(f, "testPart"),
            PartType::AssessmentSection => write!(f, "assessmentSection"),
            PartType::AssessmentItemRef => write!(f, "assessmentItemRef"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TestPartInfo {
    pub navigation_mode: NavigationMode,
    pub submission_mode: SubmissionMode,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SectionInfo {
    pub title: String,
    pub visible: bool,
    pub keep_together: bool,
    pub required: bool,
    pub fixed: bool,
    pub selection: Option<Selection>,
    pub ordering: Option<Ordering>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemRefInfo {
    pub href: String,
    pub required: bool,
    pub fixed: bool,
    pub categories: Vec<String>,
    pub weights: Vec<Weight>,
}

/// Kind-specific attributes.
#[derive(Debug, Clone, PartialEq)]
pub enum PartKind {
    TestPart(TestPartInfo),
    Section(SectionInfo),
    ItemRef(ItemRefInfo),
}

/// One authored part: a test part, a section or an item reference.
#[derive(Debug, Clone, PartialEq)]
pub struct AbstractPart {
    pub id: PartId,
    pub identifier: String,
    /// `None` for test parts, whose parent is the test itself.
    pub parent: Option<PartId>,
    pub children: Vec<PartId>,
    pub time_limits: Option<TimeLimits>,
    pub item_session_control: Option<ItemSessionControl>,
    pub pre_conditions: Vec<PreCondition>,
    pub branch_rules: Vec<BranchRule>,
    pub kind: PartKind,
}

impl AbstractPart {
    pub fn global_index(&self) -> usize {
        self.id.0
    }

    pub fn part_type(&self) -> PartType {
        match self.kind {
            PartKind::TestPart(_) => PartType::TestPart,
            PartKind::Section(_) => PartType::AssessmentSection,
            PartKind::ItemRef(_) => PartType::AssessmentItemRef,
        }
    }

    pub fn is_test_part(&self) -> bool {
        matches!(self.kind, PartKind::TestPart(_))
    }

    pub fn is_section(&self) -> bool {
        matches!(self.kind, PartKind::Section(_))
    }

    pub fn is_item_ref(&self) -> bool {
        matches!(self.kind, PartKind::ItemRef(_))
    }

    pub fn as_test_part(&self) -> Option<&TestPartInfo> {
        match &self.kind {
            PartKind::TestPart(info) => Some(info),
            _ => None,
        }
    }

    pub fn as_section(&self) -> Option<&SectionInfo> {
        match &self.kind {
            PartKind::Section(info) => Some(info),
            _ => None,
        }
    }

    pub fn as_item_ref(&self) -> Option<&ItemRefInfo> {
        match &self.kind {
            PartKind::ItemRef(info) => Some(info),
            _ => None,
        }
    }

    /// Section parts only; test parts are never required.
    pub fn is_required(&self) -> bool {
        match &self.kind {
            PartKind::Section(s) => s.required,
            PartKind::ItemRef(i) => i.required,
            PartKind::TestPart(_) => false,
        }
    }

    pub fn is_fixed(&self) -> bool {
        match &self.kind {
            PartKind::Section(s) => s.fixed,
            PartKind::ItemRef(i) => i.fixed,
            PartKind::TestPart(_) => false,
        }
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.as_section().and_then(|s| s.selection.as_ref())
    }

    pub fn ordering(&self) -> Option<&Ordering> {
        self.as_section().and_then(|s| s.ordering.as_ref())
    }

    /// True for sections with a shuffling ordering.
    pub fn shuffles(&self) -> bool {
        self.ordering().is_some_and(|o| o.shuffle)
    }

    /// Invisible sections are flattened into their parent in the plan.
    pub fn is_invisible_section(&self) -> bool {
        self.as_section().is_some_and(|s| !s.visible)
    }
}

impl fmt::Display for AbstractPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}{}", self.part_type(), self.identifier, self.id)
    }
}
