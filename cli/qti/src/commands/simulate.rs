//! `qti simulate`: walk a candidate through one attempt.
//!
//! Every item reached is submitted once with a NULL `RESPONSE`.
//! Linear parts advance item by item; nonlinear parts visit their items in
//! plan order and are then ended. Preconditions and branch rules are
//! evaluated by [`LiteralEvaluator`] against the outcomes given with
//! `--var`. Time is simulated: each navigation step advances the clock by
//! one second from the start of the run.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use qti_core::{AssessmentTest, BaseType, NavigationMode, Value};
use qti_plan::{IdentityResolver, TestPlanNodeKey, TestPlanner};
use qti_session::{
    LiteralEvaluator, ResponseSubmission, SessionSnapshot, TestSessionController,
    TestSessionState,
};
use tracing::debug;

use crate::commands::plan::check_strict;
use crate::commands::{load_test, make_rng, resolve_input};
use crate::manifest::QtiManifest;

type Controller<'a> = TestSessionController<'a, LiteralEvaluator>;

pub fn run(
    project_dir: &Path,
    manifest: Option<&QtiManifest>,
    input: Option<&str>,
    seed: Option<u64>,
    vars: &[String],
    snapshot: Option<&str>,
) -> Result<()> {
    let path = resolve_input(project_dir, manifest, input)?;
    let test = load_test(&path)?;
    check_strict(&test, manifest)?;

    let plan = TestPlanner::new(&test, &IdentityResolver)
        .plan(&mut make_rng(seed, manifest))
        .with_context(|| format!("planning {}", path.display()))?;

    let mut state = TestSessionState::new(plan);
    state.reset(&test);
    for var in vars {
        let (identifier, value) = parse_var(&test, var)?;
        state.outcome_values.insert(identifier, value);
    }

    let state = simulate(&test, state, Utc::now())?;
    print!("{}", render_states(&state));

    if let Some(out) = snapshot {
        let bytes = SessionSnapshot::new(state)
            .to_bytes()
            .context("encoding session snapshot")?;
        fs::write(out, bytes).with_context(|| format!("writing {out}"))?;
        println!("snapshot written to {out}");
    }
    Ok(())
}

/// Parse `ID=VALUE`. A declared outcome is parsed by its base type; an
/// undeclared one as a boolean if it reads as one, else as an identifier.
fn parse_var(test: &AssessmentTest, var: &str) -> Result<(String, Value)> {
    let (identifier, literal) = var
        .split_once('=')
        .ok_or_else(|| anyhow!("--var expects ID=VALUE, got '{var}'"))?;
    let identifier = identifier.trim();
    let literal = literal.trim();
    if identifier.is_empty() {
        bail!("--var expects ID=VALUE, got '{var}'");
    }
    let declared = test
        .outcome_declarations()
        .iter()
        .find(|d| d.identifier == identifier)
        .and_then(|d| d.base_type);
    let value = match declared {
        Some(base_type) => Value::parse_single(base_type, literal)
            .with_context(|| format!("value for {identifier} must be a {base_type}"))?,
        None => Value::parse_single(BaseType::Boolean, literal)
            .or_else(|_| Value::parse_single(BaseType::Identifier, literal))
            .with_context(|| format!("cannot read a value for {identifier} from '{literal}'"))?,
    };
    Ok((identifier.to_string(), value))
}

/// Run the attempt to completion and exit the test.
fn simulate(
    test: &AssessmentTest,
    state: TestSessionState,
    start: DateTime<Utc>,
) -> Result<TestSessionState> {
    let mut clock = SimClock(start);
    let mut c = TestSessionController::resume(test, state, LiteralEvaluator)?;
    c.enter_test(clock.tick())?;

    while !c.state().is_ended() {
        let Some(tp) = c.enter_next_available_test_part(clock.tick())? else {
            break;
        };
        let navigation = test
            .part(tp.part_id())
            .and_then(|p| p.as_test_part())
            .map(|info| info.navigation_mode)
            .ok_or_else(|| anyhow!("plan node {tp} is not a test part"))?;
        match navigation {
            NavigationMode::Linear => walk_linear(&mut c, &mut clock)?,
            NavigationMode::Nonlinear => visit_nonlinear(&mut c, &tp, &mut clock)?,
        }
    }

    c.exit_test(clock.tick())?;
    Ok(c.into_state())
}

fn walk_linear(c: &mut Controller<'_>, clock: &mut SimClock) -> Result<()> {
    while let Some(item) = c.current_item().cloned() {
        respond(c, clock)?;
        let next = c.advance_item_linear(clock.tick())?;
        debug!(%item, next = ?next.as_ref().map(|k| k.to_string()), "advanced");
    }
    Ok(())
}

fn visit_nonlinear(
    c: &mut Controller<'_>,
    test_part: &TestPlanNodeKey,
    clock: &mut SimClock,
) -> Result<()> {
    let items: Vec<TestPlanNodeKey> = c
        .plan()
        .items_in(test_part)
        .map(|n| n.key.clone())
        .collect();
    for key in &items {
        if c.may_select_item_nonlinear(key)? {
            c.select_item_nonlinear(clock.tick(), Some(key))?;
            respond(c, clock)?;
        }
    }
    c.select_item_nonlinear(clock.tick(), None)?;
    c.end_current_test_part(clock.tick())?;
    Ok(())
}

fn respond(c: &mut Controller<'_>, clock: &mut SimClock) -> Result<()> {
    if c.may_submit_responses_to_current_item()? {
        let submission = ResponseSubmission::new().with("RESPONSE", Value::Null);
        c.handle_responses_to_current_item(clock.tick(), submission)?;
    }
    Ok(())
}

struct SimClock(DateTime<Utc>);

impl SimClock {
    fn tick(&mut self) -> DateTime<Utc> {
        self.0 += Duration::seconds(1);
        self.0
    }
}

fn render_states(state: &TestSessionState) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "session {} ({}s)",
        state.session_id,
        state.duration_seconds()
    );
    for node in state.plan.nodes() {
        let depth = state.plan.ancestors(&node.key).len() + 1;
        let Some(part) = state.part_state(&node.key) else {
            continue;
        };
        let lifecycle = if part.pre_condition_failed {
            "skipped (precondition)"
        } else if part.is_exited() && part.is_entered() {
            "exited"
        } else if part.is_ended() && !part.is_entered() {
            "passed over"
        } else if part.is_ended() {
            "ended"
        } else if part.is_entered() {
            "open"
        } else {
            "untouched"
        };
        let _ = write!(
            out,
            "{:indent$}{} [{}] {lifecycle}",
            "",
            node.key,
            node.node_type,
            indent = depth * 2
        );
        if let Some(target) = &part.branch_rule_target {
            let _ = write!(out, " -> {target}");
        }
        if let Some(item) = state.item_state(&node.key) {
            let _ = write!(
                out,
                " attempts={} status={} {}s",
                item.num_attempts,
                item.completion_status,
                part.duration.seconds()
            );
        }
        out.push('\n');
    }
    out.push_str("outcomes:\n");
    for (identifier, value) in &state.outcome_values {
        let _ = writeln!(out, "  {identifier} = {value}");
    }
    out
}
