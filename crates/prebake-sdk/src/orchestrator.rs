//! Run orchestration
//!
//! This module ties the pipeline together. One [`Orchestrator::run`] performs,
//! strictly in order:
//!
//! 1. Lockfile-driven invalidation of published artifacts
//! 2. The pre-build hook
//! 3. Builds for every target, then debug-symbol collection and one merge
//!    per module
//! 4. Publishing and pruning of the build directory
//! 5. Persisting the lockfile snapshot
//! 6. The post-build hook and the JSON run report
//!
//! Any failure aborts the run; nothing is retried.

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, info};

use crate::builders::{ModuleBuild, PlatformBuildStep};
use crate::builders::common::{fs_error, remove_if_exists, validate_project_path};
use crate::invalidate::{CacheInvalidator, InvalidationOutcome};
use crate::merge::{ArtifactMerger, MergeOutcome};
use crate::paths::{ArtifactPaths, DEFAULT_DESTINATION, SandboxLayout};
use crate::process::{ProcessRunner, ToolCommand};
use crate::publish::{PublishPlan, PublishStep, collect_debug_symbols};
use crate::skip::{SkipReason, skip_reason};
use crate::types::{BuildConfig, BuildMode, InstallContext, Module, Platform, PrebakeError, Target};

/// What a hook gets to see.
#[derive(Debug, Clone, Copy)]
pub struct HookContext<'a> {
    pub layout: &'a SandboxLayout,
    pub targets: &'a [Target],
    pub config: &'a BuildConfig,
}

/// A pre- or post-build callback.
pub type Hook = Box<dyn Fn(&HookContext<'_>) -> Result<(), PrebakeError>>;

/// Optional callbacks around the build phase.
#[derive(Default)]
pub struct BuildHooks {
    pre_build: Option<Hook>,
    post_build: Option<Hook>,
}

impl BuildHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs after invalidation, before the first compiler invocation.
    pub fn pre_build(mut self, hook: impl Fn(&HookContext<'_>) -> Result<(), PrebakeError> + 'static) -> Self {
        self.pre_build = Some(Box::new(hook));
        self
    }

    /// Runs after publishing and persisting the snapshot.
    pub fn post_build(mut self, hook: impl Fn(&HookContext<'_>) -> Result<(), PrebakeError> + 'static) -> Self {
        self.post_build = Some(Box::new(hook));
        self
    }
}

impl std::fmt::Debug for BuildHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildHooks")
            .field("pre_build", &self.pre_build.is_some())
            .field("post_build", &self.post_build.is_some())
            .finish()
    }
}

/// Wraps a shell command as a hook.
///
/// The command runs through `sh -c` with `PREBAKE_SANDBOX_ROOT`,
/// `PREBAKE_BUILD_DIR` and `PREBAKE_DESTINATION` exported, in the directory
/// containing the sandbox.
pub fn shell_hook<R>(runner: R, script: impl Into<String>) -> Hook
where
    R: ProcessRunner + 'static,
{
    let script = script.into();
    Box::new(move |ctx: &HookContext<'_>| {
        let mut command = ToolCommand::new("sh")
            .arg("-c")
            .arg(script.as_str())
            .env(
                "PREBAKE_SANDBOX_ROOT",
                ctx.layout.sandbox_root.to_string_lossy(),
            )
            .env("PREBAKE_BUILD_DIR", ctx.layout.build_dir.to_string_lossy())
            .env(
                "PREBAKE_DESTINATION",
                ctx.layout.destination.to_string_lossy(),
            );
        if let Some(dir) = ctx.layout.sandbox_root.parent().filter(|p| p.is_dir()) {
            command = command.current_dir(dir);
        }
        runner
            .run(&command)
            .map(|_| ())
            .map_err(|e| PrebakeError::Hook(format!("'{}' failed: {}", script, e)))
    })
}

/// One module that was compiled during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuiltModule {
    /// Labels of the targets whose builds went into this module's artifact.
    pub targets: Vec<String>,
    pub package: String,
    pub module: String,
    pub sdks: Vec<String>,
    /// Merged artifact, or `None` when the per-variant outputs were kept.
    pub merged: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedModule {
    pub target: String,
    pub module: String,
    pub reason: SkipReason,
}

/// Summary of a completed run, also written as JSON next to the snapshot cache.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub invalidation: InvalidationOutcome,
    pub built: Vec<BuiltModule>,
    pub skipped: Vec<SkippedModule>,
    pub published: Vec<PathBuf>,
    pub build_invocations: usize,
    pub merge_invocations: usize,
    pub debug_symbols_collected: usize,
    pub metadata_files_kept: usize,
    /// RFC 3339 timestamp of when the run finished.
    pub finished_at: String,
}

/// Per-variant builds of one module waiting for the merge step.
struct PendingMerge {
    targets: Vec<String>,
    build: ModuleBuild,
}

/// Planned work, computed without touching the filesystem.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub invalidation: InvalidationOutcome,
    pub layout: SandboxLayout,
    /// Compiler invocations the run would perform, in order.
    pub commands: Vec<ToolCommand>,
    pub skipped: Vec<SkippedModule>,
}

/// Drives a full prebuild run.
///
/// # Example
///
/// ```ignore
/// use prebake_sdk::{BuildConfig, InstallContext, Orchestrator, SystemRunner};
///
/// let context = InstallContext::load("Pods/.prebake/install.json".as_ref())?;
/// let report = Orchestrator::new(SystemRunner::new())
///     .config(BuildConfig::default())
///     .destination("Prebuilt")
///     .run(&context)?;
/// println!("built {} modules", report.built.len());
/// # Ok::<(), prebake_sdk::PrebakeError>(())
/// ```
#[derive(Debug)]
pub struct Orchestrator<R: ProcessRunner> {
    runner: R,
    config: BuildConfig,
    destination: String,
    hooks: BuildHooks,
}

impl<R: ProcessRunner> Orchestrator<R> {
    pub fn new(runner: R) -> Self {
        Self {
            runner,
            config: BuildConfig::default(),
            destination: DEFAULT_DESTINATION.to_string(),
            hooks: BuildHooks::default(),
        }
    }

    pub fn config(mut self, config: BuildConfig) -> Self {
        self.config = config;
        self
    }

    /// Name of the published directory next to the sandbox.
    pub fn destination(mut self, name: impl Into<String>) -> Self {
        self.destination = name.into();
        self
    }

    pub fn hooks(mut self, hooks: BuildHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn build_config(&self) -> &BuildConfig {
        &self.config
    }

    pub fn layout(&self, context: &InstallContext) -> SandboxLayout {
        SandboxLayout::new(&context.sandbox_root, &self.destination)
    }

    /// Runs the whole pipeline for one install.
    pub fn run(&self, context: &InstallContext) -> Result<RunReport, PrebakeError> {
        let layout = self.layout(context);
        let paths = ArtifactPaths::for_layout(&layout, &self.config);
        let invalidator = CacheInvalidator::new(&layout, &paths);
        let hook_context = HookContext {
            layout: &layout,
            targets: &context.targets,
            config: &self.config,
        };

        let invalidation = invalidator.invalidate(context)?;

        if let Some(hook) = &self.hooks.pre_build {
            info!("running pre-build hook");
            hook(&hook_context)?;
        }

        let needs_build = context.targets.iter().any(|target| {
            target
                .unique_modules()
                .into_iter()
                .any(|module| skip_reason(&paths, module).is_none())
        });
        if needs_build {
            validate_project_path(&context.project_path)?;
        }

        let step = PlatformBuildStep::new(&self.runner, &self.config, &paths, &context.project_path);
        let merger = ArtifactMerger::new(&self.runner, &paths, self.config.debug_symbols);

        let mut built = Vec::new();
        let mut skipped = Vec::new();
        let mut outcomes = Vec::new();
        let mut build_invocations = 0;
        let mut merge_invocations = 0;
        let mut debug_symbols_collected = 0;

        // Every target builds before the first merge, so a container gets a
        // slice for each platform the module appears under.
        let mut built_for: HashSet<(String, Option<Platform>)> = HashSet::new();
        let mut pending: Vec<PendingMerge> = Vec::new();
        for target in &context.targets {
            let result = step.build_target_except(target, |module, platform| {
                built_for.contains(&self.build_key(module, platform))
            })?;
            let platform = target.platform()?;
            build_invocations += result.invocations;
            skipped.extend(result.skipped.into_iter().map(|(module, reason)| SkippedModule {
                target: target.label.clone(),
                module,
                reason,
            }));

            for module_build in result.built {
                built_for.insert(self.build_key(&module_build.module, platform));
                match pending
                    .iter_mut()
                    .find(|p| p.build.module.module == module_build.module.module)
                {
                    Some(existing) => {
                        existing.targets.push(target.label.clone());
                        existing.build.artifacts.extend(module_build.artifacts);
                    }
                    None => pending.push(PendingMerge {
                        targets: vec![target.label.clone()],
                        build: module_build,
                    }),
                }
            }
        }

        if build_invocations > 0 && !layout.build_dir.exists() {
            return Err(PrebakeError::MissingBuildOutput(layout.build_dir.clone()));
        }

        for PendingMerge { targets, build } in pending {
            if self.config.debug_symbols {
                debug_symbols_collected += collect_debug_symbols(&build, &layout.dsym_dir)?;
            }
            let outcome = merger.merge(&build)?;
            if outcome.is_merged() {
                merge_invocations += 1;
            }
            built.push(BuiltModule {
                targets,
                package: build.module.package.clone(),
                module: build.module.module.clone(),
                sdks: build
                    .artifacts
                    .iter()
                    .map(|a| a.variant.sdk.to_string())
                    .collect(),
                merged: match &outcome {
                    MergeOutcome::Merged(path) => Some(path.clone()),
                    MergeOutcome::Unmerged(_) => None,
                },
            });
            outcomes.push(outcome);
        }

        let publisher = PublishStep::new(&paths);
        let plan = PublishPlan::collect(&outcomes, context);
        let published = if plan.is_empty() {
            debug!("nothing to publish");
            Vec::new()
        } else {
            publisher.publish(&plan)?
        };
        let metadata_files_kept = publisher.clean_build_dir()?;

        invalidator.persist_snapshot(context.lockfile.as_deref())?;

        if let Some(hook) = &self.hooks.post_build {
            info!("running post-build hook");
            hook(&hook_context)?;
        }

        let report = RunReport {
            invalidation,
            built,
            skipped,
            published,
            build_invocations,
            merge_invocations,
            debug_symbols_collected,
            metadata_files_kept,
            finished_at: OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .unwrap_or_default(),
        };
        write_report(&layout, &report)?;

        info!(
            built = report.built.len(),
            skipped = report.skipped.len(),
            published = report.published.len(),
            "prebuild finished"
        );
        Ok(report)
    }

    /// Computes what [`Self::run`] would do, without running tools or
    /// modifying the filesystem.
    pub fn plan(&self, context: &InstallContext) -> Result<RunPlan, PrebakeError> {
        let layout = self.layout(context);
        let paths = ArtifactPaths::for_layout(&layout, &self.config);
        let invalidation = CacheInvalidator::new(&layout, &paths).assess(context)?;

        let first_run = invalidation == InvalidationOutcome::FirstRun;
        let removed: HashSet<PathBuf> = match &invalidation {
            InvalidationOutcome::Invalidated { stale, .. } => {
                stale.iter().map(|s| s.path.clone()).collect()
            }
            _ => HashSet::new(),
        };

        let step = PlatformBuildStep::new(&self.runner, &self.config, &paths, &context.project_path);
        let mut commands = Vec::new();
        let mut skipped = Vec::new();
        let mut planned: HashSet<(String, Option<Platform>)> = HashSet::new();

        for target in &context.targets {
            let platform = target.platform()?;
            for module in target.unique_modules() {
                let reason = match skip_reason(&paths, module) {
                    Some(SkipReason::AlreadyBuilt | SkipReason::AlreadyPublished) if first_run => None,
                    // Invalidation removes both the published and the merged output.
                    Some(SkipReason::AlreadyBuilt | SkipReason::AlreadyPublished)
                        if removed.contains(&paths.published(&module.module)) =>
                    {
                        None
                    }
                    other => other,
                };
                let key = self.build_key(module, platform);
                let reason =
                    reason.or_else(|| planned.contains(&key).then_some(SkipReason::AlreadyBuilt));
                if let Some(reason) = reason {
                    skipped.push(SkippedModule {
                        target: target.label.clone(),
                        module: module.module.clone(),
                        reason,
                    });
                    continue;
                }
                planned.insert(key);
                for &variant in platform.variants() {
                    commands.push(step.command_for(platform, target, module, variant));
                }
            }
        }

        Ok(RunPlan {
            invalidation,
            layout,
            commands,
            skipped,
        })
    }

    /// Builds sharing a key are done once per run and merged together. Fat
    /// binaries keep the first platform a module is built for; containers
    /// take one build per platform.
    fn build_key(&self, module: &Module, platform: Platform) -> (String, Option<Platform>) {
        match self.config.mode {
            BuildMode::Framework => (module.module.clone(), None),
            BuildMode::XcFramework => (module.module.clone(), Some(platform)),
        }
    }

    /// Removes every output and the snapshot cache so the next run starts
    /// from scratch. Returns the paths that existed.
    pub fn clean(&self, context: &InstallContext) -> Result<Vec<PathBuf>, PrebakeError> {
        let layout = self.layout(context);
        let mut removed = Vec::new();
        for path in [
            &layout.build_dir,
            &layout.dsym_dir,
            &layout.destination,
            &layout.snapshot_cache,
        ] {
            if remove_if_exists(path)? {
                info!(path = %path.display(), "removed");
                removed.push(path.clone());
            }
        }
        Ok(removed)
    }
}

fn write_report(layout: &SandboxLayout, report: &RunReport) -> Result<(), PrebakeError> {
    let path = &layout.report_path;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| fs_error("create directory", parent, e))?;
    }
    let json = serde_json::to_string_pretty(report)?;
    fs::write(path, json).map_err(|e| fs_error("write run report to", path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{SystemRunner, ToolOutput};
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recorder {
        commands: RefCell<Vec<ToolCommand>>,
    }

    impl ProcessRunner for Recorder {
        fn run(&self, command: &ToolCommand) -> Result<ToolOutput, PrebakeError> {
            self.commands.borrow_mut().push(command.clone());
            Ok(ToolOutput::default())
        }
    }

    fn context(dir: &TempDir, modules: Vec<Module>) -> InstallContext {
        let sandbox = dir.path().join("Pods");
        fs::create_dir_all(sandbox.join("Pods.xcodeproj")).unwrap();
        InstallContext {
            project_path: sandbox.join("Pods.xcodeproj"),
            sandbox_root: sandbox,
            lockfile: Some(dir.path().join("Podfile.lock")),
            targets: vec![Target {
                label: "Pods-App".to_string(),
                platform: "ios".to_string(),
                deployment_target: "13.0".to_string(),
                modules,
            }],
            ..InstallContext::default()
        }
    }

    #[test]
    fn test_plan_lists_build_commands_without_side_effects() {
        let dir = TempDir::new().unwrap();
        let context = context(&dir, vec![Module::new("A", "A"), Module::aggregate("Pods-App")]);
        let runner = Recorder::default();
        let orchestrator = Orchestrator::new(&runner);

        let plan = orchestrator.plan(&context).unwrap();

        assert_eq!(plan.invalidation, InvalidationOutcome::FirstRun);
        assert_eq!(plan.commands.len(), 2);
        assert_eq!(plan.skipped.len(), 1);
        assert!(runner.commands.borrow().is_empty());
        assert!(!plan.layout.report_path.exists());
    }

    #[test]
    fn test_plan_rebuilds_published_modules_on_first_run() {
        let dir = TempDir::new().unwrap();
        let context = context(&dir, vec![Module::new("A", "A")]);
        fs::create_dir_all(dir.path().join("Prebuilt/A.framework")).unwrap();
        let orchestrator = Orchestrator::new(Recorder::default());

        let plan = orchestrator.plan(&context).unwrap();

        assert_eq!(plan.commands.len(), 2);
        assert!(dir.path().join("Prebuilt/A.framework").exists());
    }

    fn with_tv_target(mut context: InstallContext, modules: Vec<Module>) -> InstallContext {
        context.targets.push(Target {
            label: "Pods-TV".to_string(),
            platform: "tvos".to_string(),
            deployment_target: "15.0".to_string(),
            modules,
        });
        context
    }

    #[test]
    fn test_plan_builds_shared_module_per_platform_for_containers() {
        let dir = TempDir::new().unwrap();
        let context = with_tv_target(
            context(&dir, vec![Module::new("A", "A")]),
            vec![Module::new("A", "A")],
        );
        let config = BuildConfig {
            mode: BuildMode::XcFramework,
            ..BuildConfig::default()
        };

        let plan = Orchestrator::new(Recorder::default())
            .config(config)
            .plan(&context)
            .unwrap();

        let sdks: Vec<_> = plan
            .commands
            .iter()
            .filter_map(|c| c.flag_value("-sdk"))
            .collect();
        assert_eq!(sdks, vec!["iphoneos", "iphonesimulator", "appletvos", "appletvsimulator"]);
        assert!(plan.skipped.is_empty());
    }

    #[test]
    fn test_plan_keeps_first_platform_for_fat_binaries() {
        let dir = TempDir::new().unwrap();
        let context = with_tv_target(
            context(&dir, vec![Module::new("A", "A")]),
            vec![Module::new("A", "A")],
        );

        let plan = Orchestrator::new(Recorder::default()).plan(&context).unwrap();

        assert_eq!(plan.commands.len(), 2);
        assert_eq!(plan.skipped.len(), 1);
        assert_eq!(plan.skipped[0].target, "Pods-TV");
        assert_eq!(plan.skipped[0].reason, SkipReason::AlreadyBuilt);
    }

    #[test]
    fn test_hooks_run_around_build() {
        let dir = TempDir::new().unwrap();
        let context = context(&dir, vec![Module::aggregate("Pods-App")]);
        let calls = Rc::new(Cell::new(0));
        let (pre, post) = (calls.clone(), calls.clone());
        let hooks = BuildHooks::new()
            .pre_build(move |_| {
                assert_eq!(pre.get(), 0);
                pre.set(1);
                Ok(())
            })
            .post_build(move |ctx| {
                assert_eq!(post.get(), 1);
                assert_eq!(ctx.targets.len(), 1);
                post.set(2);
                Ok(())
            });

        let report = Orchestrator::new(Recorder::default())
            .hooks(hooks)
            .run(&context)
            .unwrap();

        assert_eq!(calls.get(), 2);
        assert_eq!(report.build_invocations, 0);
    }

    #[test]
    fn test_failing_hook_aborts_run() {
        let dir = TempDir::new().unwrap();
        let context = context(&dir, vec![Module::new("A", "A")]);
        let runner = Recorder::default();
        let hooks = BuildHooks::new().pre_build(|_| Err(PrebakeError::Hook("nope".to_string())));

        let err = Orchestrator::new(&runner).hooks(hooks).run(&context).unwrap_err();

        assert!(matches!(err, PrebakeError::Hook(_)));
        assert!(runner.commands.borrow().is_empty());
    }

    #[test]
    fn test_missing_build_output_is_fatal() {
        let dir = TempDir::new().unwrap();
        let context = context(&dir, vec![Module::new("A", "A")]);

        let err = Orchestrator::new(Recorder::default()).run(&context).unwrap_err();

        assert!(matches!(err, PrebakeError::MissingBuildOutput(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_shell_hook_exports_layout() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("Pods")).unwrap();
        let layout = SandboxLayout::new(dir.path().join("Pods"), "Prebuilt");
        let config = BuildConfig::default();
        let ctx = HookContext {
            layout: &layout,
            targets: &[],
            config: &config,
        };

        let hook = shell_hook(SystemRunner::new(), "echo \"$PREBAKE_DESTINATION\" > hook.out");
        hook(&ctx).unwrap();
        let out = fs::read_to_string(dir.path().join("hook.out")).unwrap();
        assert_eq!(out.trim(), layout.destination.to_string_lossy());

        let failing = shell_hook(SystemRunner::new(), "exit 3");
        let err = failing(&ctx).unwrap_err();
        assert!(matches!(err, PrebakeError::Hook(_)));
        assert!(err.to_string().contains("exit 3"));
    }

    #[test]
    fn test_clean_removes_outputs_and_snapshot() {
        let dir = TempDir::new().unwrap();
        let context = context(&dir, vec![]);
        let orchestrator = Orchestrator::new(Recorder::default());
        let layout = orchestrator.layout(&context);
        fs::create_dir_all(&layout.destination).unwrap();
        fs::create_dir_all(layout.snapshot_cache.parent().unwrap()).unwrap();
        fs::write(&layout.snapshot_cache, "PODS: []").unwrap();

        let removed = orchestrator.clean(&context).unwrap();

        assert_eq!(removed, vec![layout.destination.clone(), layout.snapshot_cache.clone()]);
        assert!(!layout.snapshot_cache.exists());
    }
}
