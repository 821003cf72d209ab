//! Per-attempt session state.
//!
//! One record per plan node, keyed by [`TestPlanNodeKey`]. Records refer
//! back to the plan by key only, so the whole state serializes as plain
//! data.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use qti_core::{AssessmentTest, Value};
use qti_plan::{TestPlan, TestPlanNodeKey};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::DurationClock;

/// Lifecycle record shared by the test, test parts, sections and items.
///
/// `not entered -> entered -> ended -> exited`. A node can also be ended
/// or exited without ever being entered when navigation passes it by.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AbstractPartSessionState {
    pub entry_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub exit_time: Option<DateTime<Utc>>,
    pub duration: DurationClock,
    pub pre_condition_failed: bool,
    pub jumped_by_branch_rule: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_rule_target: Option<String>,
}

impl AbstractPartSessionState {
    pub fn is_entered(&self) -> bool {
        self.entry_time.is_some()
    }

    pub fn is_ended(&self) -> bool {
        self.end_time.is_some()
    }

    pub fn is_exited(&self) -> bool {
        self.exit_time.is_some()
    }

    /// Entered and not yet ended.
    pub fn is_open(&self) -> bool {
        self.is_entered() && !self.is_ended()
    }

    /// Never entered, ended, skipped or jumped over.
    pub fn is_untouched(&self) -> bool {
        !self.is_entered() && !self.is_ended() && !self.pre_condition_failed
    }

    pub fn enter(&mut self, now: DateTime<Utc>) {
        self.entry_time = Some(now);
        self.duration.touch_in(now);
    }

    pub fn end(&mut self, now: DateTime<Utc>) {
        self.duration.touch_out(now);
        self.end_time = Some(now);
    }

    /// Mark as passed over without being entered.
    pub fn end_unentered(&mut self, now: DateTime<Utc>) {
        if self.is_untouched() {
            self.end_time = Some(now);
        }
    }

    pub fn exit(&mut self, now: DateTime<Utc>) {
        if !self.is_exited() {
            self.duration.touch_out(now);
            self.exit_time = Some(now);
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

pub type TestPartSessionState = AbstractPartSessionState;
pub type SectionSessionState = AbstractPartSessionState;

/// `completionStatus` built-in outcome of an item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    #[default]
    NotAttempted,
    Unknown,
    Completed,
    Incomplete,
}

impl CompletionStatus {
    pub fn qti_name(self) -> &'static str {
        match self {
            CompletionStatus::NotAttempted => "not_attempted",
            CompletionStatus::Unknown => "unknown",
            CompletionStatus::Completed => "completed",
            CompletionStatus::Incomplete => "incomplete",
        }
    }
}

impl fmt::Display for CompletionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.qti_name())
    }
}

/// State of one item instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemSessionState {
    #[serde(flatten)]
    pub part: AbstractPartSessionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspend_time: Option<DateTime<Utc>>,
    pub presented: bool,
    pub responded: bool,
    pub num_attempts: u32,
    pub completion_status: CompletionStatus,
    #[serde(default)]
    pub raw_responses: BTreeMap<String, Value>,
    /// Bound responses waiting for the end of a simultaneous test part.
    #[serde(default)]
    pub uncommitted_responses: BTreeMap<String, Value>,
    #[serde(default)]
    pub response_values: BTreeMap<String, Value>,
    #[serde(default)]
    pub invalid_response_ids: BTreeSet<String>,
    #[serde(default)]
    pub unbound_response_ids: BTreeSet<String>,
    #[serde(default)]
    pub template_values: BTreeMap<String, Value>,
    #[serde(default)]
    pub outcome_values: BTreeMap<String, Value>,
    #[serde(default)]
    pub overridden_defaults: BTreeMap<String, Value>,
    #[serde(default)]
    shuffled_choice_orders: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_comment: Option<String>,
}

impl ItemSessionState {
    pub fn is_suspended(&self) -> bool {
        self.suspend_time.is_some()
    }

    pub fn suspend(&mut self, now: DateTime<Utc>) {
        if self.part.is_open() && !self.is_suspended() {
            self.part.duration.touch_out(now);
            self.suspend_time = Some(now);
        }
    }

    pub fn unsuspend(&mut self, now: DateTime<Utc>) {
        if self.suspend_time.take().is_some() {
            self.part.duration.touch_in(now);
        }
    }

    /// End the item, clearing any suspension.
    pub fn end(&mut self, now: DateTime<Utc>) {
        self.suspend_time = None;
        self.part.end(now);
    }

    pub fn is_closed(&self) -> bool {
        self.part.is_ended()
    }

    pub fn has_uncommitted_responses(&self) -> bool {
        !self.uncommitted_responses.is_empty()
    }

    pub fn shuffled_choice_order(&self, interaction: &str) -> Option<&[String]> {
        self.shuffled_choice_orders.get(interaction).map(Vec::as_slice)
    }

    /// Record the shuffled choice order of an interaction. An empty order
    /// removes the entry.
    pub fn set_shuffled_choice_order(&mut self, interaction: &str, order: Vec<String>) {
        if order.is_empty() {
            self.shuffled_choice_orders.remove(interaction);
        } else {
            self.shuffled_choice_orders.insert(interaction.to_string(), order);
        }
    }

    pub fn shuffled_choice_orders(&self) -> &BTreeMap<String, Vec<String>> {
        &self.shuffled_choice_orders
    }

    /// Built-in item variables: `duration`, `numAttempts` and
    /// `completionStatus`.
    pub fn built_in_value(&self, identifier: &str) -> Option<Value> {
        match identifier {
            "duration" => Some(Value::duration(self.part.duration.seconds())),
            "numAttempts" => Some(Value::integer(i64::from(self.num_attempts))),
            "completionStatus" => Some(Value::identifier(self.completion_status.qti_name())),
            _ => None,
        }
    }

    /// Response, outcome or template value, including built-ins.
    pub fn variable(&self, identifier: &str) -> Option<Value> {
        self.built_in_value(identifier)
            .or_else(|| self.response_values.get(identifier).cloned())
            .or_else(|| self.outcome_values.get(identifier).cloned())
            .or_else(|| self.template_values.get(identifier).cloned())
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Everything that changes during one candidate attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSessionState {
    pub session_id: Uuid,
    pub plan: TestPlan,
    /// Lifecycle of the test as a whole.
    pub test: AbstractPartSessionState,
    pub test_part_states: BTreeMap<TestPlanNodeKey, TestPartSessionState>,
    pub section_states: BTreeMap<TestPlanNodeKey, SectionSessionState>,
    pub item_states: BTreeMap<TestPlanNodeKey, ItemSessionState>,
    pub outcome_values: BTreeMap<String, Value>,
    pub current_test_part_key: Option<TestPlanNodeKey>,
    pub current_item_key: Option<TestPlanNodeKey>,
}

impl TestSessionState {
    /// Fresh state with one record per plan node.
    pub fn new(plan: TestPlan) -> Self {
        let mut state = Self {
            session_id: Uuid::new_v4(),
            test: AbstractPartSessionState::default(),
            test_part_states: BTreeMap::new(),
            section_states: BTreeMap::new(),
            item_states: BTreeMap::new(),
            outcome_values: BTreeMap::new(),
            current_test_part_key: None,
            current_item_key: None,
            plan,
        };
        state.reset_nodes();
        state
    }

    /// Return every record to its initial value and set test outcomes to
    /// their declared defaults.
    pub fn reset(&mut self, test: &AssessmentTest) {
        self.test.reset();
        self.reset_nodes();
        self.current_test_part_key = None;
        self.current_item_key = None;
        self.outcome_values = test
            .outcome_declarations()
            .iter()
            .map(|d| {
                (
                    d.identifier.clone(),
                    d.default_value.clone().unwrap_or_default(),
                )
            })
            .collect();
        self.outcome_values
            .insert("duration".to_string(), Value::duration(0.0));
    }

    fn reset_nodes(&mut self) {
        self.test_part_states.clear();
        self.section_states.clear();
        self.item_states.clear();
        for node in self.plan.nodes() {
            let key = node.key.clone();
            if node.is_test_part() {
                self.test_part_states.insert(key, TestPartSessionState::default());
            } else if node.is_section() {
                self.section_states.insert(key, SectionSessionState::default());
            } else {
                self.item_states.insert(key, ItemSessionState::default());
            }
        }
    }

    pub fn item_state(&self, key: &TestPlanNodeKey) -> Option<&ItemSessionState> {
        self.item_states.get(key)
    }

    pub fn test_part_state(&self, key: &TestPlanNodeKey) -> Option<&TestPartSessionState> {
        self.test_part_states.get(key)
    }

    pub fn section_state(&self, key: &TestPlanNodeKey) -> Option<&SectionSessionState> {
        self.section_states.get(key)
    }

    /// Lifecycle record of any node.
    pub fn part_state(&self, key: &TestPlanNodeKey) -> Option<&AbstractPartSessionState> {
        self.test_part_states
            .get(key)
            .or_else(|| self.section_states.get(key))
            .or_else(|| self.item_states.get(key).map(|i| &i.part))
    }

    pub(crate) fn part_state_mut(
        &mut self,
        key: &TestPlanNodeKey,
    ) -> Option<&mut AbstractPartSessionState> {
        if let Some(s) = self.test_part_states.get_mut(key) {
            return Some(s);
        }
        if let Some(s) = self.section_states.get_mut(key) {
            return Some(s);
        }
        self.item_states.get_mut(key).map(|i| &mut i.part)
    }

    /// Every running clock, including the test's own.
    pub(crate) fn clocks_mut(&mut self) -> impl Iterator<Item = &mut DurationClock> {
        std::iter::once(&mut self.test.duration)
            .chain(self.test_part_states.values_mut().map(|s| &mut s.duration))
            .chain(self.section_states.values_mut().map(|s| &mut s.duration))
            .chain(self.item_states.values_mut().map(|s| &mut s.part.duration))
            .filter(|c| c.is_running())
    }

    /// Accumulated test duration in seconds.
    pub fn duration_seconds(&self) -> f64 {
        self.test.duration.seconds()
    }

    pub fn is_ended(&self) -> bool {
        self.test.is_ended()
    }

    pub fn outcome(&self, identifier: &str) -> Option<&Value> {
        self.outcome_values.get(identifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use qti_core::builder::{ItemRefBuilder, SectionBuilder, TestBuilder, TestPartBuilder};
    use qti_core::{BaseType, Cardinality, OutcomeDeclaration};
    use qti_plan::{IdentityResolver, TestPlanner};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
    }

    fn sample() -> (AssessmentTest, TestPlan) {
        let test = TestBuilder::new("T")
            .outcome(OutcomeDeclaration {
                identifier: "SCORE".into(),
                cardinality: Cardinality::Single,
                base_type: Some(BaseType::Float),
                default_value: Some(Value::float(0.0)),
            })
            .test_part(
                TestPartBuilder::linear_individual("P").section(
                    SectionBuilder::new("S")
                        .item(ItemRefBuilder::new("Q1", "q1"))
                        .item(ItemRefBuilder::new("Q2", "q2")),
                ),
            )
            .build()
            .unwrap();
        let plan = TestPlanner::new(&test, &IdentityResolver)
            .plan(&mut StdRng::seed_from_u64(0))
            .unwrap();
        (test, plan)
    }

    #[test]
    fn one_record_per_node() {
        let (_, plan) = sample();
        let state = TestSessionState::new(plan);
        assert_eq!(state.test_part_states.len(), 1);
        assert_eq!(state.section_states.len(), 1);
        assert_eq!(state.item_states.len(), 2);
    }

    #[test]
    fn reset_applies_outcome_defaults() {
        let (test, plan) = sample();
        let mut state = TestSessionState::new(plan);
        state.reset(&test);
        assert_eq!(state.outcome("SCORE"), Some(&Value::float(0.0)));
        assert_eq!(state.outcome("duration"), Some(&Value::duration(0.0)));
    }

    #[test]
    fn lifecycle_flags() {
        let mut s = AbstractPartSessionState::default();
        assert!(s.is_untouched());
        s.enter(now());
        assert!(s.is_open());
        s.end(now());
        assert!(s.is_ended() && !s.is_open());
        s.exit(now());
        assert!(s.is_exited());

        let mut skipped = AbstractPartSessionState::default();
        skipped.end_unentered(now());
        assert!(skipped.is_ended() && !skipped.is_entered());

        let mut failed = AbstractPartSessionState {
            pre_condition_failed: true,
            ..Default::default()
        };
        failed.end_unentered(now());
        assert!(!failed.is_ended());
    }

    #[test]
    fn empty_choice_order_removes_entry() {
        let mut item = ItemSessionState::default();
        item.set_shuffled_choice_order("RESPONSE", vec!["B".into(), "A".into()]);
        assert_eq!(
            item.shuffled_choice_order("RESPONSE"),
            Some(&["B".to_string(), "A".to_string()][..])
        );
        item.set_shuffled_choice_order("RESPONSE", Vec::new());
        assert!(item.shuffled_choice_order("RESPONSE").is_none());
    }

    #[test]
    fn built_ins() {
        let mut item = ItemSessionState::default();
        item.num_attempts = 2;
        item.completion_status = CompletionStatus::Completed;
        assert_eq!(item.built_in_value("numAttempts"), Some(Value::integer(2)));
        assert_eq!(
            item.variable("completionStatus"),
            Some(Value::identifier("completed"))
        );
        assert_eq!(item.variable("nope"), None);
    }

    #[test]
    fn state_round_trips_through_json() {
        let (test, plan) = sample();
        let mut state = TestSessionState::new(plan);
        state.reset(&test);
        let key = state.item_states.keys().next().unwrap().clone();
        state.item_states.get_mut(&key).unwrap().part.enter(now());
        let json = serde_json::to_string(&state).unwrap();
        let back: TestSessionState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
