//! # prebake
//!
//! Command-line tool that prebuilds dependency frameworks after install.
//!
//! ## Overview
//!
//! `prebake` is the CLI front end for [`prebake_sdk`]. The host dependency
//! manager's post-install plugin writes an install manifest and calls
//! `prebake build`, which:
//!
//! - **Invalidates** - Diffs the lockfile against the cached snapshot and
//!   removes published artifacts of changed packages and their dependents
//! - **Builds** - Compiles every remaining package once per SDK variant
//! - **Merges** - Combines variants with `lipo` or `-create-xcframework`
//! - **Publishes** - Copies artifacts into the destination directory
//!
//! ## Quick Start
//!
//! ```bash
//! # Write a starter configuration
//! prebake init
//!
//! # Prebuild everything listed in the install manifest
//! prebake build --manifest Pods/.prebake/install.json
//!
//! # Preview what would be rebuilt without running any tool
//! prebake --dry-run build --manifest Pods/.prebake/install.json
//!
//! # Compare two lockfiles
//! prebake diff --previous Pods/.prebake/Manifest.lock --current Podfile.lock
//!
//! # Remove every output and the snapshot cache
//! prebake clean --manifest Pods/.prebake/install.json
//! ```
//!
//! ## Global Flags
//!
//! - `--verbose` / `-v` - Debug-level logging and echoed tool output
//! - `--dry-run` - Plan only; no files are touched and no tool runs
//! - `--config <PATH>` - Use this `prebake.toml` instead of discovering one
//!
//! Logging goes through `tracing`; set `RUST_LOG` to override the level.
//!
//! ## Configuration
//!
//! See the [`config`] module for the `prebake.toml` format.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use prebake_sdk::{
    BuildHooks, BuildMode, InstallContext, InvalidationOutcome, LockSnapshot, LockfileDiff,
    Orchestrator, RunPlan, RunReport, SystemRunner, shell_hook,
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_subscriber::EnvFilter;

pub mod config;

use config::{BuildOverrides, CONFIG_FILE_NAME, ConfigResolver, PrebakeConfig};

/// Prebuild dependency frameworks after install and keep them cached across runs.
#[derive(Parser, Debug)]
#[command(name = "prebake", author, version, about = "Prebuilt framework cache for dependency sandboxes", long_about = None)]
struct Cli {
    /// Debug-level logging and echoed tool output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print the plan without touching the filesystem or running tools.
    #[arg(long, global = true)]
    dry_run: bool,

    /// Path to a prebake.toml (default: discovered from the working directory).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Invalidate, build, merge and publish every package in the install manifest.
    Build {
        #[arg(long, help = "Install manifest written by the host plugin")]
        manifest: Option<PathBuf>,
        #[arg(long, help = "Xcode build configuration (default: Debug)")]
        configuration: Option<String>,
        #[arg(long, value_enum, help = "Merge strategy for per-variant outputs")]
        mode: Option<ModeArg>,
        #[arg(long, help = "Published directory name, created next to the sandbox")]
        destination: Option<String>,
        #[arg(long, help = "Skip dSYM generation and collection")]
        no_debug_symbols: bool,
    },
    /// Show which packages changed between two lockfiles and what depends on them.
    Diff {
        #[arg(long, help = "Previous lockfile (usually the cached snapshot)")]
        previous: PathBuf,
        #[arg(long, help = "Current lockfile")]
        current: PathBuf,
        #[arg(long, help = "Print the diff as JSON")]
        json: bool,
    },
    /// Remove the build, debug-symbol and destination directories and the snapshot cache.
    Clean {
        #[arg(long, help = "Install manifest written by the host plugin")]
        manifest: Option<PathBuf>,
        #[arg(long, help = "Published directory name, created next to the sandbox")]
        destination: Option<String>,
    },
    /// Write a starter prebake.toml.
    Init {
        #[arg(long, default_value = CONFIG_FILE_NAME)]
        output: PathBuf,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    /// Fat binaries merged with lipo.
    Framework,
    /// Multi-platform containers.
    #[value(alias = "xc-framework")]
    Xcframework,
}

impl From<ModeArg> for BuildMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Framework => BuildMode::Framework,
            ModeArg::Xcframework => BuildMode::XcFramework,
        }
    }
}

/// Entry point shared by the `prebake` binary.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let resolver = match &cli.config {
        Some(path) => ConfigResolver::from_file(path)?,
        None => ConfigResolver::new()?,
    };
    if let Some(path) = &resolver.config_path {
        debug!(path = %path.display(), "loaded configuration");
    }

    match cli.command {
        Command::Build {
            manifest,
            configuration,
            mode,
            destination,
            no_debug_symbols,
        } => {
            let overrides = BuildOverrides {
                configuration,
                mode: mode.map(BuildMode::from),
                no_debug_symbols,
            };
            let context = load_context(&resolver, manifest)?;
            let orchestrator = orchestrator(&resolver, &overrides, destination, cli.verbose);

            if cli.dry_run {
                let plan = orchestrator.plan(&context)?;
                print_plan(&plan);
            } else {
                let report = orchestrator.run(&context)?;
                print_report(&report);
            }
        }
        Command::Diff {
            previous,
            current,
            json,
        } => {
            let previous = LockSnapshot::load(&previous)?;
            let current = LockSnapshot::load(&current)?;
            let diff = LockfileDiff::between(&previous, &current);
            if json {
                println!("{}", serde_json::to_string_pretty(&diff)?);
            } else {
                print_diff(&diff);
            }
        }
        Command::Clean {
            manifest,
            destination,
        } => {
            let context = load_context(&resolver, manifest)?;
            let orchestrator = orchestrator(&resolver, &BuildOverrides::default(), destination, cli.verbose);

            if cli.dry_run {
                let layout = orchestrator.layout(&context);
                println!("Would remove:");
                for path in [
                    &layout.build_dir,
                    &layout.dsym_dir,
                    &layout.destination,
                    &layout.snapshot_cache,
                ] {
                    println!("  {}", path.display());
                }
            } else {
                let removed = orchestrator.clean(&context)?;
                if removed.is_empty() {
                    println!("Nothing to clean");
                }
                for path in removed {
                    println!("Removed {}", path.display());
                }
            }
        }
        Command::Init { output } => {
            if cli.dry_run {
                print!("{}", PrebakeConfig::generate_starter_toml());
            } else {
                write_config_template(&output)?;
                println!("Wrote starter config to {:?}", output);
            }
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    // A subscriber may already be installed when embedded in another binary.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .without_time()
        .try_init();
}

fn load_context(resolver: &ConfigResolver, manifest: Option<PathBuf>) -> Result<InstallContext> {
    let Some(path) = resolver.manifest(manifest) else {
        bail!(
            "no install manifest given; pass --manifest or set output.manifest in {}",
            CONFIG_FILE_NAME
        );
    };
    InstallContext::load(&path).with_context(|| format!("loading install manifest {:?}", path))
}

fn orchestrator(
    resolver: &ConfigResolver,
    overrides: &BuildOverrides,
    destination: Option<String>,
    verbose: bool,
) -> Orchestrator<SystemRunner> {
    let runner = SystemRunner::new().verbose(verbose);
    let hooks = resolver.hooks();

    let mut build_hooks = BuildHooks::new();
    if let Some(script) = hooks.pre_build {
        build_hooks = build_hooks.pre_build(shell_hook(runner.clone(), script));
    }
    if let Some(script) = hooks.post_build {
        build_hooks = build_hooks.post_build(shell_hook(runner.clone(), script));
    }

    Orchestrator::new(runner)
        .config(resolver.build_config(overrides))
        .destination(destination.unwrap_or_else(|| resolver.destination()))
        .hooks(build_hooks)
}

fn write_config_template(path: &Path) -> Result<()> {
    ensure_can_write(path)?;
    fs::write(path, PrebakeConfig::generate_starter_toml())
        .with_context(|| format!("writing config {:?}", path))?;
    Ok(())
}

fn ensure_can_write(path: &Path) -> Result<()> {
    if path.exists() {
        bail!("refusing to overwrite existing file: {:?}", path);
    }
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating parent directory {:?}", parent))?;
    }
    Ok(())
}

fn describe_invalidation(outcome: &InvalidationOutcome) -> String {
    match outcome {
        InvalidationOutcome::FirstRun => "no cached snapshot, rebuilding everything".to_string(),
        InvalidationOutcome::Unchanged => "lockfile unchanged".to_string(),
        InvalidationOutcome::Invalidated { diff, stale } => format!(
            "{} changed, {} affected, {} stale artifact(s)",
            diff.changed.len(),
            diff.affected.len(),
            stale.len()
        ),
    }
}

fn print_plan(plan: &RunPlan) {
    println!("Invalidation: {}", describe_invalidation(&plan.invalidation));
    if let InvalidationOutcome::Invalidated { stale, .. } = &plan.invalidation {
        for artifact in stale.iter().filter(|a| a.present) {
            println!("  would remove {}", artifact.path.display());
        }
    }

    if plan.commands.is_empty() {
        println!("Nothing to build");
    } else {
        println!("Would run {} build(s):", plan.commands.len());
        for command in &plan.commands {
            println!("  {}", command);
        }
    }

    for skipped in &plan.skipped {
        println!(
            "  skip {} ({}): {:?}",
            skipped.module, skipped.target, skipped.reason
        );
    }
}

fn print_report(report: &RunReport) {
    println!("Invalidation: {}", describe_invalidation(&report.invalidation));
    println!(
        "Built {} module(s) with {} build and {} merge invocation(s), skipped {}",
        report.built.len(),
        report.build_invocations,
        report.merge_invocations,
        report.skipped.len()
    );
    for module in &report.built {
        println!("  {} [{}]", module.module, module.sdks.join(", "));
    }
    println!("Published {} artifact(s)", report.published.len());
    if report.debug_symbols_collected > 0 {
        println!("Collected {} dSYM bundle(s)", report.debug_symbols_collected);
    }
}

fn print_diff(diff: &LockfileDiff) {
    if diff.is_empty() {
        println!("No changes");
        return;
    }
    let list = |set: &std::collections::BTreeSet<String>| {
        set.iter().cloned().collect::<Vec<_>>().join(", ")
    };
    println!("Changed:  {}", list(&diff.changed));
    if !diff.removed.is_empty() {
        println!("Removed:  {}", list(&diff.removed));
    }
    println!("Affected: {}", list(&diff.affected));
}
