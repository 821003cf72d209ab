//! The navigation controller.
//!
//! [`TestSessionController`] is the single writer of a [`TestSessionState`].
//! It owns the state for the duration of a request, borrows the authored
//! test, and calls out to an [`ExpressionEvaluator`] for preconditions,
//! branch rules and response processing.
//!
//! Navigation works on arena indices of the plan. A node's subtree is the
//! contiguous range `index..plan.subtree_end(index)`, so walking forward
//! through a test part is a walk through increasing indices.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use qti_core::{
    jumps_enabled, AbstractPart, AssessmentTest, BranchTarget, NavigationMode, SubmissionMode,
    Value,
};
use qti_plan::{NodeIndex, TestPlan, TestPlanNode, TestPlanNodeKey};
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::evaluator::{holds, ExpressionEvaluator, ProcessingContext, ResponseSubmission};
use crate::state::{CompletionStatus, TestSessionState};

/// Where the linear walk goes after a branch rule fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// Resume the walk at this arena index.
    Continue(usize),
    EndTestPart,
    EndTest,
}

pub struct TestSessionController<'a, E: ExpressionEvaluator> {
    test: &'a AssessmentTest,
    state: TestSessionState,
    evaluator: E,
}

impl<'a, E: ExpressionEvaluator> TestSessionController<'a, E> {
    /// Start a fresh attempt over `plan`.
    pub fn new(test: &'a AssessmentTest, plan: TestPlan, evaluator: E) -> Result<Self, SessionError> {
        Self::resume(test, TestSessionState::new(plan), evaluator)
    }

    /// Continue an attempt from previously persisted state. Every plan
    /// node must still resolve to the part it was planned from.
    pub fn resume(
        test: &'a AssessmentTest,
        state: TestSessionState,
        evaluator: E,
    ) -> Result<Self, SessionError> {
        state
            .plan
            .check_against(test)
            .map_err(|e| SessionError::invalid("attach session", e.to_string()))?;
        Ok(Self {
            test,
            state,
            evaluator,
        })
    }

    pub fn test(&self) -> &'a AssessmentTest {
        self.test
    }

    pub fn state(&self) -> &TestSessionState {
        &self.state
    }

    pub fn into_state(self) -> TestSessionState {
        self.state
    }

    pub fn plan(&self) -> &TestPlan {
        &self.state.plan
    }

    pub fn evaluator_mut(&mut self) -> &mut E {
        &mut self.evaluator
    }

    pub fn current_test_part(&self) -> Option<&TestPlanNodeKey> {
        self.state.current_test_part_key.as_ref()
    }

    pub fn current_item(&self) -> Option<&TestPlanNodeKey> {
        self.state.current_item_key.as_ref()
    }

    // ---- lifecycle -------------------------------------------------------

    /// Reset every record and set outcomes to their declared defaults.
    pub fn initialize(&mut self, now: DateTime<Utc>) {
        self.state.reset(self.test);
        info!(
            session = %self.state.session_id,
            test = %self.test.identifier(),
            nodes = self.state.plan.len(),
            %now,
            "session initialized"
        );
    }

    pub fn enter_test(&mut self, now: DateTime<Utc>) -> Result<(), SessionError> {
        if self.state.test.is_entered() {
            return Err(SessionError::invalid("enter test", "test already entered"));
        }
        self.state.test.enter(now);
        info!(session = %self.state.session_id, "test entered");
        Ok(())
    }

    /// Fold every running clock at `now` and refresh the test `duration`
    /// outcome.
    pub fn touch_durations(&mut self, now: DateTime<Utc>) {
        for clock in self.state.clocks_mut() {
            clock.touch(now);
        }
        let seconds = self.state.test.duration.seconds();
        self.state
            .outcome_values
            .insert("duration".to_string(), Value::duration(seconds));
    }

    // ---- test parts ------------------------------------------------------

    /// The next test part, after the current one, whose preconditions all
    /// hold. Nothing is recorded.
    pub fn find_next_enterable_test_part(
        &mut self,
    ) -> Result<Option<TestPlanNodeKey>, SessionError> {
        for key in self.later_test_parts() {
            if self.pre_conditions_hold(&key)? {
                return Ok(Some(key));
            }
        }
        Ok(None)
    }

    /// Exit the current test part (which must have ended) and enter the
    /// next one whose preconditions hold. In a linear part the first
    /// enterable item becomes current.
    ///
    /// Returns `None`, after ending the test, when no test part remains.
    pub fn enter_next_available_test_part(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<Option<TestPlanNodeKey>, SessionError> {
        const OP: &str = "enter next test part";
        self.ensure_test_open(OP)?;
        if let Some(current) = &self.state.current_test_part_key {
            let ended = self
                .state
                .test_part_state(current)
                .is_some_and(|s| s.is_ended());
            if !ended {
                return Err(SessionError::invalid(OP, "current test part has not ended"));
            }
        }

        self.touch_durations(now);
        let candidates = self.later_test_parts();
        if let Some(current) = self.state.current_test_part_key.take() {
            self.exit_subtree(&current, now);
        }
        self.state.current_item_key = None;

        for key in candidates {
            if !self.pre_conditions_hold(&key)? {
                if let Some(s) = self.state.part_state_mut(&key) {
                    s.pre_condition_failed = true;
                }
                debug!(test_part = %key, "test part skipped by precondition");
                continue;
            }
            if let Some(s) = self.state.part_state_mut(&key) {
                s.enter(now);
            }
            self.state.current_test_part_key = Some(key.clone());
            let (navigation, _) = self.test_part_modes(&key)?;
            info!(test_part = %key, %navigation, "test part entered");
            if navigation == NavigationMode::Linear {
                let first = self.index_of(&key)? + 1;
                self.walk(first, now, false)?;
            }
            return Ok(Some(key));
        }

        self.end_test(now);
        Ok(None)
    }

    pub fn may_end_current_test_part(&self) -> Result<bool, SessionError> {
        let Some(tp) = self.open_test_part() else {
            return Ok(false);
        };
        let (navigation, _) = self.test_part_modes(tp)?;
        if navigation == NavigationMode::Linear {
            return Ok(false);
        }
        for node in self.state.plan.items_in(tp) {
            let Some(item) = self.state.item_state(&node.key) else {
                continue;
            };
            let control = &node.effective_control;
            if !control.allow_skipping && !item.responded {
                return Ok(false);
            }
            if control.validate_responses && !item.invalid_response_ids.is_empty() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// End the current nonlinear test part, committing any buffered
    /// simultaneous responses.
    pub fn end_current_test_part(&mut self, now: DateTime<Utc>) -> Result<(), SessionError> {
        if !self.may_end_current_test_part()? {
            return Err(SessionError::invalid(
                "end test part",
                "no open nonlinear test part, or an item still needs a response",
            ));
        }
        self.touch_durations(now);
        self.finish_test_part(now, false)
    }

    // ---- linear navigation -----------------------------------------------

    /// Whether the current item of a linear test part may be left.
    pub fn may_advance_item_linear(&self) -> Result<bool, SessionError> {
        let Some(tp) = self.open_test_part() else {
            return Ok(false);
        };
        if self.test_part_modes(tp)?.0 != NavigationMode::Linear {
            return Ok(false);
        }
        let Some(key) = self.state.current_item_key.as_ref() else {
            return Ok(false);
        };
        let node = self.node(key)?;
        let Some(item) = self.state.item_state(key) else {
            return Err(SessionError::NotAnItem(key.clone()));
        };
        if item.part.is_ended() {
            return Ok(true);
        }
        let control = &node.effective_control;
        if !control.allow_skipping && !item.responded {
            return Ok(false);
        }
        Ok(!(control.validate_responses && !item.invalid_response_ids.is_empty()))
    }

    /// End the current linear item. It stays current, closed, until
    /// [`advance_item_linear`](Self::advance_item_linear) moves on.
    pub fn end_item_linear(&mut self, now: DateTime<Utc>) -> Result<(), SessionError> {
        if !self.may_advance_item_linear()? {
            return Err(SessionError::invalid(
                "end item",
                "no current linear item, or it may not be left yet",
            ));
        }
        self.touch_durations(now);
        if let Some(key) = self.state.current_item_key.clone() {
            if let Some(item) = self.state.item_states.get_mut(&key) {
                item.end(now);
            }
            debug!(item = %key, "item ended");
        }
        Ok(())
    }

    /// Leave the current linear item and move to the next enterable one,
    /// honouring branch rules and preconditions.
    ///
    /// Returns `None` once the walk runs off the end of the test part,
    /// which ends the part.
    pub fn advance_item_linear(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<Option<TestPlanNodeKey>, SessionError> {
        if !self.may_advance_item_linear()? {
            return Err(SessionError::invalid(
                "advance item",
                "no current linear item, or it may not be left yet",
            ));
        }
        self.touch_durations(now);
        let Some(key) = self.state.current_item_key.take() else {
            return Ok(None);
        };
        if let Some(item) = self.state.item_states.get_mut(&key) {
            if item.part.is_open() {
                item.end(now);
            }
        }
        let index = self.index_of(&key)?;
        let step = if self.current_jumps_enabled()? {
            self.branch_from(index, now)?
        } else {
            None
        };
        self.resume_walk(step, index + 1, now)
    }

    // ---- nonlinear navigation --------------------------------------------

    pub fn may_select_item_nonlinear(&self, key: &TestPlanNodeKey) -> Result<bool, SessionError> {
        let node = self.node(key)?;
        if !node.is_item() {
            return Err(SessionError::NotAnItem(key.clone()));
        }
        let Some(tp) = self.open_test_part() else {
            return Ok(false);
        };
        if self.test_part_modes(tp)?.0 != NavigationMode::Nonlinear {
            return Ok(false);
        }
        Ok(self
            .state
            .plan
            .enclosing_test_part(key)
            .is_some_and(|n| &n.key == tp))
    }

    /// Make `key` the current item, or deselect with `None`. The previous
    /// current item is suspended.
    pub fn select_item_nonlinear(
        &mut self,
        now: DateTime<Utc>,
        key: Option<&TestPlanNodeKey>,
    ) -> Result<Option<TestPlanNodeKey>, SessionError> {
        const OP: &str = "select item";
        match key {
            Some(k) => {
                if !self.may_select_item_nonlinear(k)? {
                    return Err(SessionError::invalid(
                        OP,
                        format!("{k} is not in the open nonlinear test part"),
                    ));
                }
            }
            None => {
                let nonlinear = match self.open_test_part() {
                    Some(tp) => self.test_part_modes(tp)?.0 == NavigationMode::Nonlinear,
                    None => false,
                };
                if !nonlinear {
                    return Err(SessionError::invalid(OP, "no open nonlinear test part"));
                }
            }
        }

        self.touch_durations(now);
        if let Some(current) = self.state.current_item_key.take() {
            if Some(&current) != key {
                if let Some(item) = self.state.item_states.get_mut(&current) {
                    item.suspend(now);
                }
                debug!(item = %current, "item suspended");
            } else {
                self.state.current_item_key = Some(current);
            }
        }

        let Some(key) = key else {
            return Ok(None);
        };
        let index = self.index_of(key)?;
        self.enter_ancestor_sections(index, now);
        if let Some(item) = self.state.item_states.get_mut(key) {
            if item.part.is_entered() {
                item.unsuspend(now);
            } else {
                item.part.enter(now);
                item.completion_status = CompletionStatus::Unknown;
            }
        }
        self.state.current_item_key = Some(key.clone());
        debug!(item = %key, "item selected");
        Ok(Some(key.clone()))
    }

    // ---- items -----------------------------------------------------------

    pub fn suspend_current_item(&mut self, now: DateTime<Utc>) -> Result<(), SessionError> {
        let Some(key) = self.state.current_item_key.clone() else {
            return Err(SessionError::invalid("suspend item", "no current item"));
        };
        let open = self
            .state
            .item_state(&key)
            .is_some_and(|i| i.part.is_open() && !i.is_suspended());
        if !open {
            return Err(SessionError::invalid(
                "suspend item",
                format!("{key} is not open, or already suspended"),
            ));
        }
        self.touch_durations(now);
        if let Some(item) = self.state.item_states.get_mut(&key) {
            item.suspend(now);
        }
        debug!(item = %key, "item suspended");
        Ok(())
    }

    pub fn may_submit_responses_to_current_item(&self) -> Result<bool, SessionError> {
        let Some(tp) = self.open_test_part() else {
            return Ok(false);
        };
        let Some(key) = self.state.current_item_key.as_ref() else {
            return Ok(false);
        };
        let node = self.node(key)?;
        let Some(item) = self.state.item_state(key) else {
            return Err(SessionError::NotAnItem(key.clone()));
        };
        if !item.part.is_open() {
            return Ok(false);
        }
        Ok(match self.test_part_modes(tp)?.1 {
            SubmissionMode::Individual => node.effective_control.allows_attempt(item.num_attempts),
            SubmissionMode::Simultaneous => true,
        })
    }

    /// Record responses for the current item. In individual mode they are
    /// committed at once; in simultaneous mode they wait for the end of the
    /// test part. With `validate_responses` set, an invalid submission is
    /// recorded but never committed.
    pub fn handle_responses_to_current_item(
        &mut self,
        now: DateTime<Utc>,
        submission: ResponseSubmission,
    ) -> Result<(), SessionError> {
        const OP: &str = "submit responses";
        if !self.may_submit_responses_to_current_item()? {
            return Err(SessionError::invalid(
                OP,
                "no open current item, or no attempts left",
            ));
        }
        let Some(key) = self.state.current_item_key.clone() else {
            return Err(SessionError::invalid(OP, "no current item"));
        };
        if let Some(limit) = self.exceeded_time_limit(&key, now)? {
            return Err(SessionError::invalid(
                OP,
                format!("{limit} exceeded its time limit"),
            ));
        }

        self.touch_durations(now);
        let validate = self.node(&key)?.effective_control.validate_responses;
        let (_, submission_mode) = self.current_modes(OP)?;
        let Some(item) = self.state.item_states.get_mut(&key) else {
            return Err(SessionError::NotAnItem(key));
        };
        if item.is_suspended() {
            item.unsuspend(now);
        }
        item.raw_responses = submission.values.clone();
        item.responded = true;
        item.invalid_response_ids = submission.invalid.clone();
        item.unbound_response_ids = submission.unbound.clone();

        if validate && !submission.is_valid() {
            debug!(item = %key, "responses failed validation, not committed");
            return Ok(());
        }
        match submission_mode {
            SubmissionMode::Individual => self.commit_responses(&key, submission.values),
            SubmissionMode::Simultaneous => {
                item.uncommitted_responses = submission.values;
                debug!(item = %key, "responses buffered until the test part ends");
                Ok(())
            }
        }
    }

    /// Whether an item may be revisited for review or feedback: its test
    /// part has ended, the item was presented, and its control allows it.
    pub fn may_review_item(&self, key: &TestPlanNodeKey) -> Result<bool, SessionError> {
        let node = self.node(key)?;
        let Some(item) = self.state.item_state(key) else {
            return Err(SessionError::NotAnItem(key.clone()));
        };
        let part_ended = self
            .state
            .plan
            .enclosing_test_part(key)
            .and_then(|tp| self.state.test_part_state(&tp.key))
            .is_some_and(|s| s.is_ended());
        let control = &node.effective_control;
        Ok(part_ended && item.part.is_entered() && (control.allow_review || control.show_feedback))
    }

    /// The item nodes under every instance of `section` (or the whole plan
    /// when `None`), keeping those carrying at least one `include` category
    /// (any, when empty) and none of the `exclude` categories.
    pub fn item_subset(
        &self,
        section: Option<&str>,
        include: &[&str],
        exclude: &[&str],
    ) -> Vec<&TestPlanNode> {
        let plan = &self.state.plan;
        let roots: Vec<&TestPlanNode> = match section {
            Some(identifier) => plan
                .nodes_for_identifier(identifier)
                .into_iter()
                .filter(|n| n.is_section())
                .collect(),
            None => plan.test_parts().collect(),
        };
        let mut seen = HashSet::new();
        let mut subset = Vec::new();
        for root in roots {
            for node in plan.items_in(&root.key) {
                if !seen.insert(&node.key) {
                    continue;
                }
                let categories = self
                    .test
                    .part(node.key.part_id())
                    .and_then(AbstractPart::as_item_ref)
                    .map(|info| info.categories.as_slice())
                    .unwrap_or_default();
                let has = |c: &&str| categories.iter().any(|own| own == c);
                if !include.is_empty() && !include.iter().any(has) {
                    continue;
                }
                if exclude.iter().any(has) {
                    continue;
                }
                subset.push(node);
            }
        }
        subset
    }

    // ---- leaving the test ------------------------------------------------

    /// Exit a test that has ended.
    pub fn exit_test(&mut self, now: DateTime<Utc>) -> Result<(), SessionError> {
        if !self.state.test.is_ended() {
            return Err(SessionError::invalid("exit test", "test has not ended"));
        }
        if self.state.test.is_exited() {
            return Err(SessionError::invalid("exit test", "test already exited"));
        }
        self.exit_everything(now);
        info!(session = %self.state.session_id, "test exited");
        Ok(())
    }

    /// Abandon the attempt: end whatever is open, mark everything not yet
    /// reached as ended without entry, then exit.
    pub fn exit_test_incomplete(&mut self, now: DateTime<Utc>) -> Result<(), SessionError> {
        if !self.state.test.is_entered() || self.state.test.is_exited() {
            return Err(SessionError::invalid(
                "exit test",
                "test is not entered, or already exited",
            ));
        }
        self.touch_durations(now);
        if let Some(tp) = self.open_test_part().cloned() {
            let (start, end) = self.range_of(&tp)?;
            self.close_range(start + 1, end, now);
            if let Some(s) = self.state.part_state_mut(&tp) {
                s.end(now);
            }
        }
        let later = self.later_test_parts();
        for key in later {
            self.skip_subtree(&key, now);
        }
        if !self.state.test.is_ended() {
            self.end_test(now);
        }
        self.exit_everything(now);
        info!(session = %self.state.session_id, "test exited before completion");
        Ok(())
    }

    // ---- walking ---------------------------------------------------------

    /// Walk forward from arena index `next` to the next enterable item of
    /// the current test part. `jumped` is true when the walk resumes after
    /// a branch jump, so sections left on the way do not run their rules.
    fn walk(
        &mut self,
        mut next: usize,
        now: DateTime<Utc>,
        mut jumped: bool,
    ) -> Result<Option<TestPlanNodeKey>, SessionError> {
        let (_, tp_end) = self.current_range("walk")?;
        let jumps = self.current_jumps_enabled()?;
        loop {
            match self.close_sections(next, now, jumps && !jumped)? {
                Some(Step::Continue(target)) => {
                    next = target;
                    jumped = true;
                    continue;
                }
                Some(Step::EndTestPart) => {
                    next = tp_end;
                    jumped = true;
                    continue;
                }
                Some(Step::EndTest) => {
                    self.finish_test_part(now, true)?;
                    return Ok(None);
                }
                None => {}
            }
            jumped = false;

            if next >= tp_end {
                self.finish_test_part(now, false)?;
                return Ok(None);
            }
            let node = &self.state.plan.nodes()[next];
            let key = node.key.clone();
            let is_section = node.is_section();

            if jumps && !self.pre_conditions_hold(&key)? {
                if let Some(s) = self.state.part_state_mut(&key) {
                    s.pre_condition_failed = true;
                }
                debug!(node = %key, "skipped by precondition");
                next = self.state.plan.subtree_end(NodeIndex(next));
                continue;
            }
            if is_section {
                if let Some(s) = self.state.section_states.get_mut(&key) {
                    s.enter(now);
                }
                debug!(section = %key, "section entered");
                next += 1;
                continue;
            }

            self.enter_ancestor_sections(next, now);
            if let Some(item) = self.state.item_states.get_mut(&key) {
                item.part.enter(now);
                item.completion_status = CompletionStatus::Unknown;
            }
            self.state.current_item_key = Some(key.clone());
            debug!(item = %key, "item entered");
            return Ok(Some(key));
        }
    }

    fn resume_walk(
        &mut self,
        step: Option<Step>,
        next: usize,
        now: DateTime<Utc>,
    ) -> Result<Option<TestPlanNodeKey>, SessionError> {
        match step {
            None => self.walk(next, now, false),
            Some(Step::Continue(target)) => self.walk(target, now, true),
            Some(Step::EndTestPart) => {
                let (_, tp_end) = self.current_range("advance item")?;
                self.walk(tp_end, now, true)
            }
            Some(Step::EndTest) => {
                self.finish_test_part(now, true)?;
                Ok(None)
            }
        }
    }

    /// End open sections of the current test part that do not contain
    /// `next`, deepest first. With `run_rules`, each section's branch rules
    /// run as it closes and the first jump stops the unwinding.
    fn close_sections(
        &mut self,
        next: usize,
        now: DateTime<Utc>,
        run_rules: bool,
    ) -> Result<Option<Step>, SessionError> {
        let (tp, tp_end) = self.current_range("close sections")?;
        loop {
            let open = (tp + 1..tp_end).rev().find(|i| {
                let node = &self.state.plan.nodes()[*i];
                node.is_section()
                    && self
                        .state
                        .section_state(&node.key)
                        .is_some_and(|s| s.is_open())
            });
            let Some(open) = open else {
                return Ok(None);
            };
            if next < self.state.plan.subtree_end(NodeIndex(open)) {
                return Ok(None);
            }
            let key = self.state.plan.nodes()[open].key.clone();
            if let Some(s) = self.state.section_states.get_mut(&key) {
                s.end(now);
            }
            debug!(section = %key, "section ended");
            if run_rules {
                if let Some(step) = self.branch_from(open, now)? {
                    return Ok(Some(step));
                }
            }
        }
    }

    /// Run the branch rules of the node at `source`. The first rule that
    /// holds and resolves decides the jump; nodes passed over are ended
    /// without entry.
    fn branch_from(
        &mut self,
        source: usize,
        now: DateTime<Utc>,
    ) -> Result<Option<Step>, SessionError> {
        let key = self.state.plan.nodes()[source].key.clone();
        let part = self.state.plan.resolve_abstract_part(self.test, &key)?;
        if part.branch_rules.is_empty() {
            return Ok(None);
        }
        let (_, tp_end) = self.current_range("branch")?;
        let source_end = self.state.plan.subtree_end(NodeIndex(source));

        for rule in &part.branch_rules {
            let context = ProcessingContext {
                test: self.test,
                state: &self.state,
                node: Some(&key),
            };
            if !holds(&mut self.evaluator, &rule.expression, &context)? {
                continue;
            }
            let step = match &rule.target {
                BranchTarget::ExitTest => {
                    self.skip_range(source_end, tp_end, None, now);
                    Step::EndTest
                }
                BranchTarget::ExitTestPart => {
                    self.skip_range(source_end, tp_end, None, now);
                    Step::EndTestPart
                }
                BranchTarget::ExitSection => {
                    let section = self.state.plan.nodes()[source]
                        .parent
                        .filter(|p| self.state.plan.nodes()[p.0].is_section());
                    let Some(section) = section else {
                        warn!(node = %key, "EXIT_SECTION outside a section, advancing normally");
                        return Ok(None);
                    };
                    let end = self.state.plan.subtree_end(section);
                    self.skip_range(source_end, end, None, now);
                    Step::Continue(end)
                }
                BranchTarget::Part(identifier) => {
                    let target = self
                        .state
                        .plan
                        .nodes_for_identifier(identifier)
                        .into_iter()
                        .filter_map(|n| self.state.plan.index_of(&n.key))
                        .map(|i| i.0)
                        .find(|i| (source_end..tp_end).contains(i));
                    let Some(target) = target else {
                        warn!(
                            node = %key,
                            branch_target = %identifier,
                            "branch target not ahead in this test part, advancing normally"
                        );
                        return Ok(None);
                    };
                    self.skip_range(source_end, target, Some(target), now);
                    Step::Continue(target)
                }
            };
            if let Some(s) = self.state.part_state_mut(&key) {
                s.jumped_by_branch_rule = true;
                s.branch_rule_target = Some(rule.target.to_string());
            }
            debug!(node = %key, branch_target = %rule.target, "branch rule fired");
            return Ok(Some(step));
        }
        Ok(None)
    }

    /// End the current test part: commit buffered responses, end every
    /// open node, mark the rest ended without entry and run the part's
    /// `EXIT_TEST` rules. With `exit_test` the test ends as well.
    fn finish_test_part(&mut self, now: DateTime<Utc>, exit_test: bool) -> Result<(), SessionError> {
        let Some(tp) = self.state.current_test_part_key.clone() else {
            return Err(SessionError::invalid("end test part", "no current test part"));
        };
        let (start, end) = self.range_of(&tp)?;
        let (_, submission) = self.test_part_modes(&tp)?;

        if submission == SubmissionMode::Simultaneous {
            let pending: Vec<TestPlanNodeKey> = self.state.plan.nodes()[start + 1..end]
                .iter()
                .filter(|n| {
                    self.state
                        .item_state(&n.key)
                        .is_some_and(|i| i.has_uncommitted_responses())
                })
                .map(|n| n.key.clone())
                .collect();
            for key in pending {
                let values = self
                    .state
                    .item_states
                    .get_mut(&key)
                    .map(|i| std::mem::take(&mut i.uncommitted_responses))
                    .unwrap_or_default();
                self.commit_responses(&key, values)?;
            }
        }

        self.close_range(start + 1, end, now);
        if let Some(s) = self.state.part_state_mut(&tp) {
            s.end(now);
        }
        self.state.current_item_key = None;
        info!(test_part = %tp, "test part ended");

        let mut exit_test = exit_test;
        if !exit_test {
            let part = self.state.plan.resolve_abstract_part(self.test, &tp)?;
            for rule in &part.branch_rules {
                if rule.target != BranchTarget::ExitTest {
                    debug!(test_part = %tp, branch_target = %rule.target, "ignoring test part branch rule");
                    continue;
                }
                let context = ProcessingContext {
                    test: self.test,
                    state: &self.state,
                    node: Some(&tp),
                };
                if holds(&mut self.evaluator, &rule.expression, &context)? {
                    if let Some(s) = self.state.part_state_mut(&tp) {
                        s.jumped_by_branch_rule = true;
                        s.branch_rule_target = Some(rule.target.to_string());
                    }
                    exit_test = true;
                    break;
                }
            }
        }
        if exit_test {
            for key in self.later_test_parts() {
                self.skip_subtree(&key, now);
            }
            self.end_test(now);
        }
        Ok(())
    }

    fn commit_responses(
        &mut self,
        key: &TestPlanNodeKey,
        values: BTreeMap<String, Value>,
    ) -> Result<(), SessionError> {
        let Some(item) = self.state.item_states.get_mut(key) else {
            return Err(SessionError::NotAnItem(key.clone()));
        };
        item.response_values.extend(values);
        item.num_attempts += 1;
        item.completion_status =
            if item.invalid_response_ids.is_empty() && item.unbound_response_ids.is_empty() {
                CompletionStatus::Completed
            } else {
                CompletionStatus::Incomplete
            };
        self.evaluator
            .process_responses(key, item)
            .map_err(|e| SessionError::Evaluation(Box::new(e)))?;
        debug!(item = %key, attempts = item.num_attempts, "responses committed");
        Ok(())
    }

    // ---- state helpers ---------------------------------------------------

    fn end_test(&mut self, now: DateTime<Utc>) {
        self.state.test.end(now);
        let seconds = self.state.test.duration.seconds();
        self.state
            .outcome_values
            .insert("duration".to_string(), Value::duration(seconds));
        info!(session = %self.state.session_id, "test ended");
    }

    fn exit_everything(&mut self, now: DateTime<Utc>) {
        let keys: Vec<TestPlanNodeKey> =
            self.state.plan.nodes().iter().map(|n| n.key.clone()).collect();
        for key in keys {
            if let Some(s) = self.state.part_state_mut(&key) {
                s.exit(now);
            }
        }
        self.state.test.exit(now);
        self.state.current_test_part_key = None;
        self.state.current_item_key = None;
    }

    fn exit_subtree(&mut self, root: &TestPlanNodeKey, now: DateTime<Utc>) {
        let keys: Vec<TestPlanNodeKey> = self
            .state
            .plan
            .subtree(root)
            .iter()
            .map(|n| n.key.clone())
            .collect();
        for key in keys {
            if let Some(s) = self.state.part_state_mut(&key) {
                s.exit(now);
            }
        }
        debug!(test_part = %root, "test part exited");
    }

    /// End open nodes in `start..end` and mark untouched ones ended
    /// without entry.
    fn close_range(&mut self, start: usize, end: usize, now: DateTime<Utc>) {
        for i in start..end {
            let key = self.state.plan.nodes()[i].key.clone();
            if let Some(item) = self.state.item_states.get_mut(&key) {
                if item.part.is_open() {
                    item.end(now);
                } else {
                    item.part.end_unentered(now);
                }
            } else if let Some(s) = self.state.part_state_mut(&key) {
                if s.is_open() {
                    s.end(now);
                } else {
                    s.end_unentered(now);
                }
            }
        }
    }

    /// Mark untouched nodes in `start..end` ended without entry, sparing
    /// the ancestors of `keep`.
    fn skip_range(&mut self, start: usize, end: usize, keep: Option<usize>, now: DateTime<Utc>) {
        for i in start..end {
            if let Some(target) = keep {
                if i < target && target < self.state.plan.subtree_end(NodeIndex(i)) {
                    continue;
                }
            }
            let key = self.state.plan.nodes()[i].key.clone();
            if let Some(s) = self.state.part_state_mut(&key) {
                s.end_unentered(now);
            }
        }
    }

    fn skip_subtree(&mut self, root: &TestPlanNodeKey, now: DateTime<Utc>) {
        if let Ok((start, end)) = self.range_of(root) {
            self.skip_range(start, end, None, now);
        }
    }

    fn enter_ancestor_sections(&mut self, index: usize, now: DateTime<Utc>) {
        let key = self.state.plan.nodes()[index].key.clone();
        let pending: Vec<TestPlanNodeKey> = self
            .state
            .plan
            .ancestors(&key)
            .into_iter()
            .rev()
            .filter(|n| n.is_section())
            .map(|n| n.key.clone())
            .collect();
        for section in pending {
            if let Some(s) = self.state.section_states.get_mut(&section) {
                if !s.is_entered() {
                    s.enter(now);
                    debug!(section = %section, "section entered");
                }
            }
        }
    }

    fn pre_conditions_hold(&mut self, key: &TestPlanNodeKey) -> Result<bool, SessionError> {
        let part = self.state.plan.resolve_abstract_part(self.test, key)?;
        for pre_condition in &part.pre_conditions {
            let context = ProcessingContext {
                test: self.test,
                state: &self.state,
                node: Some(key),
            };
            if !holds(&mut self.evaluator, &pre_condition.expression, &context)? {
                debug!(node = %key, expression = %pre_condition.expression, "precondition failed");
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// The first limit exceeded by `key` or one of its ancestors, unless
    /// that part allows late submission.
    fn exceeded_time_limit(
        &self,
        key: &TestPlanNodeKey,
        now: DateTime<Utc>,
    ) -> Result<Option<String>, SessionError> {
        let mut chain = vec![self.node(key)?];
        chain.extend(self.state.plan.ancestors(key));
        for node in chain {
            let part = self.state.plan.resolve_abstract_part(self.test, &node.key)?;
            let (Some(limits), Some(state)) = (part.time_limits, self.state.part_state(&node.key))
            else {
                continue;
            };
            let elapsed = state.duration.elapsed_ms(now) as f64 / 1000.0;
            if limits.is_exceeded(elapsed) && !limits.allow_late_submission {
                return Ok(Some(node.key.to_string()));
            }
        }
        if let Some(limits) = self.test.time_limits() {
            let elapsed = self.state.test.duration.elapsed_ms(now) as f64 / 1000.0;
            if limits.is_exceeded(elapsed) && !limits.allow_late_submission {
                return Ok(Some(self.test.identifier().to_string()));
            }
        }
        Ok(None)
    }

    // ---- lookups ---------------------------------------------------------

    fn ensure_test_open(&self, operation: &'static str) -> Result<(), SessionError> {
        if !self.state.test.is_entered() {
            return Err(SessionError::invalid(operation, "test not entered"));
        }
        if self.state.test.is_ended() {
            return Err(SessionError::invalid(operation, "test has ended"));
        }
        Ok(())
    }

    fn node(&self, key: &TestPlanNodeKey) -> Result<&TestPlanNode, SessionError> {
        self.state
            .plan
            .node(key)
            .ok_or_else(|| SessionError::UnknownKey(key.clone()))
    }

    fn index_of(&self, key: &TestPlanNodeKey) -> Result<usize, SessionError> {
        self.state
            .plan
            .index_of(key)
            .map(|i| i.0)
            .ok_or_else(|| SessionError::UnknownKey(key.clone()))
    }

    fn range_of(&self, key: &TestPlanNodeKey) -> Result<(usize, usize), SessionError> {
        let index = self.index_of(key)?;
        Ok((index, self.state.plan.subtree_end(NodeIndex(index))))
    }

    fn current_range(&self, operation: &'static str) -> Result<(usize, usize), SessionError> {
        match &self.state.current_test_part_key {
            Some(tp) => self.range_of(tp),
            None => Err(SessionError::invalid(operation, "no current test part")),
        }
    }

    /// The current test part, if it is entered and not yet ended.
    fn open_test_part(&self) -> Option<&TestPlanNodeKey> {
        self.state.current_test_part_key.as_ref().filter(|tp| {
            self.state
                .test_part_state(tp)
                .is_some_and(|s| s.is_open())
        })
    }

    /// Test parts after the current one, or all of them before the first.
    fn later_test_parts(&self) -> Vec<TestPlanNodeKey> {
        let skip = self
            .state
            .current_test_part_key
            .as_ref()
            .and_then(|k| self.state.plan.node(k))
            .map_or(0, |n| n.sibling_index + 1);
        self.state
            .plan
            .test_parts()
            .skip(skip)
            .map(|n| n.key.clone())
            .collect()
    }

    fn test_part_modes(
        &self,
        key: &TestPlanNodeKey,
    ) -> Result<(NavigationMode, SubmissionMode), SessionError> {
        let part = self.state.plan.resolve_abstract_part(self.test, key)?;
        let info = part.as_test_part().ok_or_else(|| {
            SessionError::invalid("read test part", format!("{key} is not a test part"))
        })?;
        Ok((info.navigation_mode, info.submission_mode))
    }

    fn current_modes(
        &self,
        operation: &'static str,
    ) -> Result<(NavigationMode, SubmissionMode), SessionError> {
        match &self.state.current_test_part_key {
            Some(tp) => self.test_part_modes(tp),
            None => Err(SessionError::invalid(operation, "no current test part")),
        }
    }

    fn current_jumps_enabled(&self) -> Result<bool, SessionError> {
        let (navigation, submission) = self.current_modes("navigate")?;
        Ok(jumps_enabled(navigation, submission))
    }
}
