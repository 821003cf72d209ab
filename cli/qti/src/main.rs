//! qti: plan and walk through QTI assessment tests from the command line.

mod commands;
mod manifest;

use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use manifest::QtiManifest;

#[derive(Parser)]
#[command(name = "qti", version, about = "QTI test planning and delivery")]
struct Cli {
    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new QTI project
    Init {
        /// Project name
        name: String,
    },
    /// Check a test definition for structural errors
    Validate {
        /// Test definition (.json or .toml; default: project.test from qti.toml)
        file: Option<String>,
        /// Output format (text, json)
        #[arg(long)]
        format: Option<String>,
    },
    /// Build and print the test plan for one attempt
    Plan {
        /// Test definition (.json or .toml; default: project.test from qti.toml)
        file: Option<String>,
        /// Seed for selection and shuffling
        #[arg(long)]
        seed: Option<u64>,
        /// Output format (tree, json)
        #[arg(long)]
        format: Option<String>,
    },
    /// Walk a candidate through one attempt and print every node's state
    Simulate {
        /// Test definition (.json or .toml; default: project.test from qti.toml)
        file: Option<String>,
        /// Seed for selection and shuffling
        #[arg(long)]
        seed: Option<u64>,
        /// Set a test outcome before the attempt starts (ID=VALUE, repeatable)
        #[arg(long = "var", value_name = "ID=VALUE")]
        vars: Vec<String>,
        /// Write the final session as a binary snapshot
        #[arg(long)]
        snapshot: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = run(cli);
    if let Err(e) = result {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let cwd = std::env::current_dir()?;
    let (manifest, project_dir) = load_manifest_optional(&cwd)?;
    init_logging(cli.verbose, manifest.as_ref());
    let project_dir = project_dir.unwrap_or(cwd);

    match cli.command {
        Commands::Init { name } => commands::init::run(&name),

        Commands::Validate { file, format } => commands::validate::run(
            &project_dir,
            manifest.as_ref(),
            file.as_deref(),
            format.as_deref(),
        ),

        Commands::Plan { file, seed, format } => commands::plan::run(
            &project_dir,
            manifest.as_ref(),
            file.as_deref(),
            seed,
            format.as_deref(),
        ),

        Commands::Simulate {
            file,
            seed,
            vars,
            snapshot,
        } => commands::simulate::run(
            &project_dir,
            manifest.as_ref(),
            file.as_deref(),
            seed,
            &vars,
            snapshot.as_deref(),
        ),
    }
}

/// Logs go to stderr so JSON output stays machine-readable. `RUST_LOG`
/// wins, then `--verbose`, then `logging.level` from qti.toml.
fn init_logging(verbose: bool, manifest: Option<&QtiManifest>) {
    let fallback = if verbose {
        "debug"
    } else {
        manifest.and_then(QtiManifest::log_level).unwrap_or("info")
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Try to load manifest; returns (None, None) if not found.
fn load_manifest_optional(cwd: &Path) -> anyhow::Result<(Option<QtiManifest>, Option<PathBuf>)> {
    match QtiManifest::find_and_load(cwd)? {
        Some((m, dir)) => Ok((Some(m), Some(dir))),
        None => Ok((None, None)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn simulate_collects_repeated_vars() {
        let cli = Cli::parse_from([
            "qti", "simulate", "t.json", "--var", "A=true", "--var", "B=2", "--seed", "9",
        ]);
        match cli.command {
            Commands::Simulate {
                file, seed, vars, ..
            } => {
                assert_eq!(file.as_deref(), Some("t.json"));
                assert_eq!(seed, Some(9));
                assert_eq!(vars, ["A=true", "B=2"]);
            }
            _ => panic!("expected simulate"),
        }
    }

    #[test]
    fn verbose_is_global() {
        let cli = Cli::parse_from(["qti", "validate", "--verbose"]);
        assert!(cli.verbose);
    }
}
