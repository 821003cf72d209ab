//! `qti.toml` manifest parsing and project configuration.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// The top-level manifest structure for a QTI project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QtiManifest {
    /// Project metadata (required).
    pub project: ProjectConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Test definition used when a command is given no file.
    #[serde(default = "default_test")]
    pub test: String,
}

fn default_version() -> String {
    "0.1.0".to_string()
}

fn default_test() -> String {
    "tests/main.json".to_string()
}

/// How attempts are planned.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Fixed seed for selection and shuffling. Unset means a fresh seed
    /// per run.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Refuse to plan a test whose validation reports errors.
    #[serde(default)]
    pub strict: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing` filter directive, e.g. `info` or `qti_plan=debug`.
    #[serde(default)]
    pub level: Option<String>,
}

impl QtiManifest {
    /// Search upward from `start_dir` for a `qti.toml` file, parse and return
    /// it along with the directory it was found in.
    pub fn find_and_load(start_dir: &Path) -> Result<Option<(Self, PathBuf)>> {
        let mut dir = start_dir.to_path_buf();
        loop {
            let candidate = dir.join("qti.toml");
            if candidate.is_file() {
                let content = std::fs::read_to_string(&candidate)
                    .with_context(|| format!("reading {}", candidate.display()))?;
                let manifest: QtiManifest = toml::from_str(&content)
                    .with_context(|| format!("parsing {}", candidate.display()))?;
                return Ok(Some((manifest, dir)));
            }
            if !dir.pop() {
                break;
            }
        }
        Ok(None)
    }

    #[cfg(test)]
    pub fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s).context("parsing qti.toml")
    }

    pub fn seed(&self) -> Option<u64> {
        self.delivery.seed
    }

    pub fn log_level(&self) -> Option<&str> {
        self.logging.level.as_deref()
    }

    /// Generate the default template for `qti init`.
    pub fn template(name: &str) -> String {
        format!(
            r#"[project]
name = "{name}"
version = "0.1.0"
test = "tests/main.json"

[delivery]
strict = true

[logging]
level = "info"
"#
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_manifest() {
        let manifest = QtiManifest::from_str(
            r#"
[project]
name = "maths-quiz"
version = "1.2.0"
description = "Weekly quiz"
test = "defs/quiz.toml"

[delivery]
seed = 42
strict = true

[logging]
level = "qti_session=debug"
"#,
        )
        .unwrap();
        assert_eq!(manifest.project.name, "maths-quiz");
        assert_eq!(manifest.project.test, "defs/quiz.toml");
        assert_eq!(manifest.seed(), Some(42));
        assert!(manifest.delivery.strict);
        assert_eq!(manifest.log_level(), Some("qti_session=debug"));
    }

    #[test]
    fn parse_minimal_manifest() {
        let manifest = QtiManifest::from_str("[project]\nname = \"minimal\"\n").unwrap();
        assert_eq!(manifest.project.version, "0.1.0");
        assert_eq!(manifest.project.test, "tests/main.json");
        assert_eq!(manifest.seed(), None);
        assert!(!manifest.delivery.strict);
        assert!(manifest.log_level().is_none());
    }

    #[test]
    fn template_parses() {
        let manifest = QtiManifest::from_str(&QtiManifest::template("demo")).unwrap();
        assert_eq!(manifest.project.name, "demo");
        assert!(manifest.delivery.strict);
    }

    #[test]
    fn missing_project_is_an_error() {
        assert!(QtiManifest::from_str("[delivery]\nseed = 1\n").is_err());
    }

    #[test]
    fn find_walks_upward() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("qti.toml"), QtiManifest::template("up")).unwrap();
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();

        let (manifest, found) = QtiManifest::find_and_load(&nested).unwrap().unwrap();
        assert_eq!(manifest.project.name, "up");
        assert_eq!(found, dir.path());
    }
}
