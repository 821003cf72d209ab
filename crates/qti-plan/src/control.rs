//! Effective item session control.
//!
//! Each level of the hierarchy may override individual fields of
//! `itemSessionControl`. The effective value for a part starts from the
//! QTI defaults and applies each ancestor's overrides, root first, then the
//! part's own.

use std::collections::HashMap;

use qti_core::{AssessmentTest, ItemSessionControl, PartId};
use serde::{Deserialize, Serialize};

/// Fully resolved item session control. No field is unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectiveItemSessionControl {
    /// Zero means unlimited.
    pub max_attempts: u32,
    pub show_feedback: bool,
    pub allow_review: bool,
    pub show_solution: bool,
    pub allow_comment: bool,
    pub allow_skipping: bool,
    pub validate_responses: bool,
}

impl Default for EffectiveItemSessionControl {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            show_feedback: false,
            allow_review: true,
            show_solution: false,
            allow_comment: false,
            allow_skipping: true,
            validate_responses: false,
        }
    }
}

impl EffectiveItemSessionControl {
    /// Override field by field; unset fields keep this record's values.
    pub fn apply(&self, overrides: &ItemSessionControl) -> Self {
        Self {
            max_attempts: overrides.max_attempts.unwrap_or(self.max_attempts),
            show_feedback: overrides.show_feedback.unwrap_or(self.show_feedback),
            allow_review: overrides.allow_review.unwrap_or(self.allow_review),
            show_solution: overrides.show_solution.unwrap_or(self.show_solution),
            allow_comment: overrides.allow_comment.unwrap_or(self.allow_comment),
            allow_skipping: overrides.allow_skipping.unwrap_or(self.allow_skipping),
            validate_responses: overrides
                .validate_responses
                .unwrap_or(self.validate_responses),
        }
    }

    pub fn has_unlimited_attempts(&self) -> bool {
        self.max_attempts == 0
    }

    /// Whether another attempt is allowed after `attempts_made`.
    pub fn allows_attempt(&self, attempts_made: u32) -> bool {
        self.has_unlimited_attempts() || attempts_made < self.max_attempts
    }
}

/// Memoizing resolver. Each part is resolved once, reusing its parent's
/// result.
#[derive(Debug, Default)]
pub struct ControlResolver {
    cache: HashMap<PartId, EffectiveItemSessionControl>,
}

impl ControlResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Effective control for `id`. Unknown ids resolve to the defaults.
    pub fn resolve(&mut self, test: &AssessmentTest, id: PartId) -> EffectiveItemSessionControl {
        if let Some(cached) = self.cache.get(&id) {
            return *cached;
        }
        let Some(part) = test.part(id) else {
            return EffectiveItemSessionControl::default();
        };
        let inherited = match part.parent {
            Some(parent) => self.resolve(test, parent),
            None => EffectiveItemSessionControl::default(),
        };
        let effective = match &part.item_session_control {
            Some(overrides) => inherited.apply(overrides),
            None => inherited,
        };
        self.cache.insert(id, effective);
        effective
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qti_core::builder::{ItemRefBuilder, SectionBuilder, TestBuilder, TestPartBuilder};

    #[test]
    fn defaults_match_qti() {
        let d = EffectiveItemSessionControl::default();
        assert_eq!(d.max_attempts, 1);
        assert!(!d.show_feedback);
        assert!(d.allow_review);
        assert!(!d.show_solution);
        assert!(!d.allow_comment);
        assert!(d.allow_skipping);
        assert!(!d.validate_responses);
    }

    #[test]
    fn child_without_control_inherits() {
        let test = TestBuilder::new("T")
            .test_part(TestPartBuilder::linear_individual("P").item(ItemRefBuilder::new("Q", "q")))
            .build()
            .unwrap();
        let mut resolver = ControlResolver::new();
        assert_eq!(
            resolver.resolve(&test, PartId(1)),
            EffectiveItemSessionControl::default()
        );
    }

    #[test]
    fn override_is_field_by_field() {
        let test = TestBuilder::new("T")
            .test_part(
                TestPartBuilder::linear_individual("P")
                    .control(ItemSessionControl::default().with_allow_review(false))
                    .section(
                        SectionBuilder::new("S")
                            .control(ItemSessionControl::default().with_show_feedback(true))
                            .item(
                                ItemRefBuilder::new("Q", "q")
                                    .control(ItemSessionControl::default().with_max_attempts(3)),
                            ),
                    ),
            )
            .build()
            .unwrap();
        let mut resolver = ControlResolver::new();
        let q = resolver.resolve(&test, PartId(2));
        assert_eq!(q.max_attempts, 3);
        assert!(q.show_feedback);
        assert!(!q.allow_review);
        assert!(q.allow_skipping);

        let s = resolver.resolve(&test, PartId(1));
        assert_eq!(s.max_attempts, 1);
        assert!(s.show_feedback);
    }

    #[test]
    fn unlimited_attempts() {
        let unlimited = EffectiveItemSessionControl::default()
            .apply(&ItemSessionControl::default().with_max_attempts(0));
        assert!(unlimited.allows_attempt(1_000));
        let once = EffectiveItemSessionControl::default();
        assert!(once.allows_attempt(0));
        assert!(!once.allows_attempt(1));
    }
}
