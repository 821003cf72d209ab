//! CLI command implementations.

pub mod init;
pub mod plan;
pub mod simulate;
pub mod validate;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use qti_core::{AssessmentTest, TestDefinition};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::manifest::QtiManifest;

/// The test definition to operate on: the explicit argument, else the
/// manifest's `project.test`, relative to the project directory.
pub fn resolve_input(
    project_dir: &Path,
    manifest: Option<&QtiManifest>,
    input: Option<&str>,
) -> Result<PathBuf> {
    match (input, manifest) {
        (Some(path), _) => Ok(PathBuf::from(path)),
        (None, Some(m)) => Ok(project_dir.join(&m.project.test)),
        (None, None) => bail!(
            "no test definition given and no qti.toml found. Pass a file or run 'qti init'."
        ),
    }
}

/// Load a test definition from JSON or TOML, chosen by file extension.
pub fn load_test(path: &Path) -> Result<AssessmentTest> {
    if !path.exists() {
        bail!("test definition not found: {}", path.display());
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let definition: TestDefinition = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => {
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?
        }
        Some("json") => serde_json::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?,
        _ => bail!(
            "unsupported test definition format: {} (expected .json or .toml)",
            path.display()
        ),
    };
    AssessmentTest::from_definition(&definition)
        .with_context(|| format!("loading {}", path.display()))
}

/// Seeded RNG when a seed is given (flag first, then manifest), else one
/// seeded from the OS.
pub fn make_rng(seed: Option<u64>, manifest: Option<&QtiManifest>) -> StdRng {
    match seed.or_else(|| manifest.and_then(QtiManifest::seed)) {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}
