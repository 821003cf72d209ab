//! `qti init`: project scaffolding.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::manifest::QtiManifest;

/// Sample definition written by `qti init`: a linear part with a
/// precondition and a branch rule, then a nonlinear review part.
pub const SAMPLE_TEST: &str = r#"{
  "identifier": "sample",
  "title": "Sample test",
  "outcome_declarations": [
    { "identifier": "PASSED", "cardinality": "single", "base_type": "boolean" }
  ],
  "test_parts": [
    {
      "identifier": "main",
      "navigation_mode": "linear",
      "submission_mode": "individual",
      "children": [
        {
          "type": "section",
          "identifier": "warmup",
          "title": "Warm-up",
          "selection": { "select": 2 },
          "ordering": { "shuffle": true },
          "children": [
            { "type": "item_ref", "identifier": "w1", "href": "items/w1.xml" },
            { "type": "item_ref", "identifier": "w2", "href": "items/w2.xml" },
            { "type": "item_ref", "identifier": "w3", "href": "items/w3.xml" }
          ]
        },
        {
          "type": "section",
          "identifier": "core",
          "title": "Core",
          "children": [
            { "type": "item_ref", "identifier": "q1", "href": "items/q1.xml",
              "branch_rules": [ { "target": "bonus", "expression": "PASSED" } ] },
            { "type": "item_ref", "identifier": "q2", "href": "items/q2.xml" },
            { "type": "item_ref", "identifier": "bonus", "href": "items/bonus.xml",
              "pre_conditions": [ "PASSED" ] }
          ]
        }
      ]
    },
    {
      "identifier": "review",
      "navigation_mode": "nonlinear",
      "submission_mode": "simultaneous",
      "children": [
        { "type": "item_ref", "identifier": "r1", "href": "items/r1.xml" }
      ]
    }
  ]
}
"#;

/// Create a new QTI project in directory `name`, relative to cwd.
pub fn run(name: &str) -> Result<()> {
    create_project(Path::new(name), name)
}

pub(crate) fn create_project(project_dir: &Path, name: &str) -> Result<()> {
    if project_dir.exists() {
        bail!("directory '{}' already exists", project_dir.display());
    }

    fs::create_dir_all(project_dir.join("tests")).context("creating tests/ directory")?;
    fs::create_dir_all(project_dir.join("items")).context("creating items/ directory")?;

    fs::write(project_dir.join("qti.toml"), QtiManifest::template(name))
        .context("writing qti.toml")?;
    fs::write(project_dir.join("tests").join("main.json"), SAMPLE_TEST)
        .context("writing tests/main.json")?;
    fs::write(project_dir.join(".gitignore"), "out/\n").context("writing .gitignore")?;

    println!("Created project '{name}'");
    println!("  {name}/qti.toml");
    println!("  {name}/tests/main.json");
    println!("  {name}/items/");
    println!("  {name}/.gitignore");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_creates_project_structure() {
        let dir = tempfile::tempdir().unwrap();
        let project_path = dir.path().join("quiz");
        create_project(&project_path, "quiz").unwrap();

        assert!(project_path.join("qti.toml").is_file());
        assert!(project_path.join("tests/main.json").is_file());
        assert!(project_path.join("items").is_dir());
        assert!(project_path.join(".gitignore").is_file());
    }

    #[test]
    fn init_generates_valid_manifest_and_test() {
        let dir = tempfile::tempdir().unwrap();
        let project_path = dir.path().join("valid");
        create_project(&project_path, "valid").unwrap();

        let content = fs::read_to_string(project_path.join("qti.toml")).unwrap();
        let manifest = QtiManifest::from_str(&content).unwrap();
        assert_eq!(manifest.project.name, "valid");

        let test = crate::commands::load_test(&project_path.join("tests/main.json")).unwrap();
        assert_eq!(test.identifier(), "sample");
        assert!(!qti_verify::ValidationReport::build(&test).has_errors());
    }

    #[test]
    fn init_refuses_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let project_path = dir.path().join("existing");
        fs::create_dir(&project_path).unwrap();

        let err = create_project(&project_path, "existing").unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }
}
