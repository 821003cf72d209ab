//! `qti validate`: structural checks on a test definition.

use std::path::Path;

use anyhow::{bail, Result};
use qti_verify::ValidationReport;

use crate::commands::{load_test, resolve_input};
use crate::manifest::QtiManifest;

pub fn run(
    project_dir: &Path,
    manifest: Option<&QtiManifest>,
    input: Option<&str>,
    format: Option<&str>,
) -> Result<()> {
    let path = resolve_input(project_dir, manifest, input)?;
    let test = load_test(&path)?;
    let report = ValidationReport::build(&test);

    match format.unwrap_or("text") {
        "json" => println!("{}", report.to_json()?),
        "text" => print!("{report}"),
        other => bail!("unknown format '{other}'. Available: text, json"),
    }

    if report.has_errors() {
        bail!(
            "validation failed with {} error(s) in {}",
            report.summary.errors,
            path.display()
        );
    }
    Ok(())
}
