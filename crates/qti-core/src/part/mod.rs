//! The authored part hierarchy: test → test parts → sections → item refs.
//!
//! Parts live in an arena ordered by pre-order traversal, so a part's
//! [`PartId`] is also its global index and every subtree occupies a
//! contiguous id range. Parent and child links are ids, never references.

pub mod control;
pub mod jump;
pub mod node;

use serde::{Deserialize, Serialize};

use crate::value::{BaseType, Cardinality, Value};
use control::{jumps_enabled, TimeLimits};
use node::{AbstractPart, PartId};

/// Errors from building or querying a part hierarchy.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PartError {
    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("no part with global index {0}")]
    GlobalIndexOutOfBounds(usize),

    #[error("duplicate outcome declaration: {0}")]
    DuplicateOutcome(String),
}

/// A test-level outcome variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeDeclaration {
    pub identifier: String,
    pub cardinality: Cardinality,
    #[serde(default)]
    pub base_type: Option<BaseType>,
    #[serde(default)]
    pub default_value: Option<Value>,
}

/// The root of a part hierarchy.
#[derive(Debug, Clone, PartialEq)]
pub struct AssessmentTest {
    identifier: String,
    title: String,
    time_limits: Option<TimeLimits>,
    outcome_declarations: Vec<OutcomeDeclaration>,
    parts: Vec<AbstractPart>,
    test_parts: Vec<PartId>,
}

impl AssessmentTest {
    pub(crate) fn empty(
        identifier: String,
        title: String,
        time_limits: Option<TimeLimits>,
        outcome_declarations: Vec<OutcomeDeclaration>,
    ) -> Self {
        Self {
            identifier,
            title,
            time_limits,
            outcome_declarations,
            parts: Vec::new(),
            test_parts: Vec::new(),
        }
    }

    /// Append a part. Callers push in pre-order so ids match global indexes.
    pub(crate) fn push(&mut self, mut part: AbstractPart) -> PartId {
        let id = PartId(self.parts.len());
        part.id = id;
        part.children.clear();
        match part.parent {
            Some(parent) => self.parts[parent.0].children.push(id),
            None => self.test_parts.push(id),
        }
        self.parts.push(part);
        id
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn time_limits(&self) -> Option<&TimeLimits> {
        self.time_limits.as_ref()
    }

    pub fn outcome_declarations(&self) -> &[OutcomeDeclaration] {
        &self.outcome_declarations
    }

    /// All parts in pre-order.
    pub fn parts(&self) -> &[AbstractPart] {
        &self.parts
    }

    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    pub fn part(&self, id: PartId) -> Option<&AbstractPart> {
        self.parts.get(id.0)
    }

    /// Look up a part by global index, failing when out of range.
    pub fn resolve_global_index(&self, index: usize) -> Result<&AbstractPart, PartError> {
        self.parts
            .get(index)
            .ok_or(PartError::GlobalIndexOutOfBounds(index))
    }

    pub fn test_parts(&self) -> impl Iterator<Item = &AbstractPart> {
        self.test_parts.iter().map(move |id| &self.parts[id.0])
    }

    pub fn children(&self, id: PartId) -> impl Iterator<Item = &AbstractPart> {
        self.part(id)
            .map(|p| p.children.as_slice())
            .unwrap_or_default()
            .iter()
            .map(move |c| &self.parts[c.0])
    }

    /// Parent chain from the nearest ancestor up to the test part.
    pub fn ancestors(&self, id: PartId) -> Ancestors<'_> {
        Ancestors {
            test: self,
            next: self.part(id).and_then(|p| p.parent),
        }
    }

    /// The test part containing `id`, or `id` itself if it is a test part.
    pub fn enclosing_test_part(&self, id: PartId) -> Option<&AbstractPart> {
        let part = self.part(id)?;
        if part.is_test_part() {
            return Some(part);
        }
        self.ancestors(id).find(|p| p.is_test_part())
    }

    /// The nearest ancestor section, if any.
    pub fn enclosing_section(&self, id: PartId) -> Option<&AbstractPart> {
        self.ancestors(id).find(|p| p.is_section())
    }

    /// Whether preconditions and branch rules apply inside `id`'s test part.
    pub fn jumps_enabled(&self, id: PartId) -> bool {
        self.enclosing_test_part(id)
            .and_then(|tp| tp.as_test_part())
            .is_some_and(|info| jumps_enabled(info.navigation_mode, info.submission_mode))
    }

    /// One past the last descendant of `id`. Descendants of `id` are
    /// exactly the ids in `id+1 .. subtree_end(id)`.
    pub fn subtree_end(&self, id: PartId) -> usize {
        let mut current = id;
        while let Some(last) = self.part(current).and_then(|p| p.children.last()) {
            current = *last;
        }
        current.0 + 1
    }

    pub fn is_descendant_of(&self, id: PartId, ancestor: PartId) -> bool {
        id.0 > ancestor.0 && id.0 < self.subtree_end(ancestor)
    }

    /// First part in pre-order with the given identifier.
    pub fn lookup_first_descendant(&self, identifier: &str) -> Option<&AbstractPart> {
        self.parts.iter().find(|p| p.identifier == identifier)
    }

    /// First strict descendant of `id` with the given identifier.
    pub fn lookup_first_descendant_of(&self, id: PartId, identifier: &str) -> Option<&AbstractPart> {
        let end = self.subtree_end(id).min(self.parts.len());
        self.parts
            .get(id.0 + 1..end)?
            .iter()
            .find(|p| p.identifier == identifier)
    }

    /// Whether a selection or shuffle on some ancestor section may drop or
    /// move this part in a plan.
    pub fn is_in_scope_of_ordering_or_selection(&self, id: PartId) -> bool {
        self.ancestors(id)
            .any(|p| p.selection().is_some() || p.shuffles())
    }
}

/// Iterator over a part's ancestors, nearest first.
pub struct Ancestors<'a> {
    test: &'a AssessmentTest,
    next: Option<PartId>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a AbstractPart;

    fn next(&mut self) -> Option<Self::Item> {
        let part = self.test.part(self.next?)?;
        self.next = part.parent;
        Some(part)
    }
}
