//! `qti plan`: build one attempt's test plan and print it.

use std::path::Path;

use anyhow::{bail, Context, Result};
use qti_plan::{EffectiveItemSessionControl, IdentityResolver, TestPlan, TestPlanner};
use qti_verify::ValidationReport;

use crate::commands::{load_test, make_rng, resolve_input};
use crate::manifest::QtiManifest;

pub fn run(
    project_dir: &Path,
    manifest: Option<&QtiManifest>,
    input: Option<&str>,
    seed: Option<u64>,
    format: Option<&str>,
) -> Result<()> {
    let format = format.unwrap_or("tree");
    if !matches!(format, "tree" | "json") {
        bail!("unknown format '{format}'. Available: tree, json");
    }

    let path = resolve_input(project_dir, manifest, input)?;
    let test = load_test(&path)?;
    check_strict(&test, manifest)?;

    let mut rng = make_rng(seed, manifest);
    let plan = TestPlanner::new(&test, &IdentityResolver)
        .plan(&mut rng)
        .with_context(|| format!("planning {}", path.display()))?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&plan_json(&plan))?);
    } else {
        print!("{}", render_tree(&plan));
    }
    Ok(())
}

/// In strict mode a test with validation errors is not planned.
pub(crate) fn check_strict(
    test: &qti_core::AssessmentTest,
    manifest: Option<&QtiManifest>,
) -> Result<()> {
    if !manifest.is_some_and(|m| m.delivery.strict) {
        return Ok(());
    }
    let report = ValidationReport::build(test);
    if report.has_errors() {
        for d in report.errors() {
            eprintln!("  [{}] {}", d.rule, d.message);
        }
        bail!(
            "{} has {} validation error(s); run 'qti validate' for details",
            test.identifier(),
            report.summary.errors
        );
    }
    Ok(())
}

fn render_tree(plan: &TestPlan) -> String {
    let mut out = plan.to_string();
    out.push_str(&format!("fingerprint: {}\n", plan.fingerprint()));
    out.push_str("item controls:\n");
    for node in plan.item_nodes() {
        out.push_str(&format!(
            "  {:<16} {}\n",
            node.key.to_string(),
            describe_control(&node.effective_control)
        ));
    }
    out
}

fn describe_control(control: &EffectiveItemSessionControl) -> String {
    let attempts = if control.has_unlimited_attempts() {
        "unlimited".to_string()
    } else {
        control.max_attempts.to_string()
    };
    let mut flags = Vec::new();
    for (name, on) in [
        ("review", control.allow_review),
        ("skipping", control.allow_skipping),
        ("comment", control.allow_comment),
        ("feedback", control.show_feedback),
        ("solution", control.show_solution),
        ("validate", control.validate_responses),
    ] {
        if on {
            flags.push(name);
        }
    }
    format!("attempts={attempts} allow=[{}]", flags.join(","))
}

fn plan_json(plan: &TestPlan) -> serde_json::Value {
    let nodes: Vec<serde_json::Value> = plan
        .nodes()
        .iter()
        .map(|node| {
            serde_json::json!({
                "key": node.key.to_string(),
                "type": node.node_type.to_string(),
                "parent": node.parent.and_then(|p| plan.node_at(p)).map(|p| p.key.to_string()),
                "item_system_id": node.item_system_id,
                "effective_control": node.effective_control,
            })
        })
        .collect();
    serde_json::json!({
        "test": plan.test_identifier(),
        "fingerprint": plan.fingerprint(),
        "nodes": nodes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use qti_core::builder::{ItemRefBuilder, TestBuilder, TestPartBuilder};
    use qti_core::ItemSessionControl;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn sample_plan() -> TestPlan {
        let test = TestBuilder::new("T")
            .test_part(
                TestPartBuilder::linear_individual("P")
                    .control(ItemSessionControl::default().with_max_attempts(0))
                    .item(ItemRefBuilder::new("Q1", "q1")),
            )
            .build()
            .unwrap();
        TestPlanner::new(&test, &IdentityResolver)
            .plan(&mut StdRng::seed_from_u64(3))
            .unwrap()
    }

    #[test]
    fn tree_lists_item_controls() {
        let tree = render_tree(&sample_plan());
        assert!(tree.contains("test plan for T"));
        assert!(tree.contains("attempts=unlimited"));
        assert!(tree.contains("fingerprint: "));
    }

    #[test]
    fn json_names_parents_by_key() {
        let plan = sample_plan();
        let json = plan_json(&plan);
        assert_eq!(json["test"], "T");
        let nodes = json["nodes"].as_array().unwrap();
        assert_eq!(nodes.len(), 2);
        assert!(nodes[0]["parent"].is_null());
        assert_eq!(nodes[1]["parent"], plan.nodes()[0].key.to_string());
        assert_eq!(nodes[1]["effective_control"]["max_attempts"], 0);
    }

    #[test]
    fn strict_mode_refuses_invalid_tests() {
        let test = TestBuilder::new("T")
            .test_part(TestPartBuilder::linear_individual("P"))
            .build()
            .unwrap();
        let strict = QtiManifest::from_str(&QtiManifest::template("p")).unwrap();
        assert!(check_strict(&test, Some(&strict)).is_err());
        assert!(check_strict(&test, None).is_ok());
    }

    #[test]
    fn plans_the_sample_project_with_a_seed() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("p");
        crate::commands::init::create_project(&project, "p").unwrap();
        let manifest = QtiManifest::from_str(&QtiManifest::template("p")).unwrap();
        run(&project, Some(&manifest), None, Some(7), Some("json")).unwrap();
        assert!(run(&project, Some(&manifest), None, Some(7), Some("dot")).is_err());
    }
}
