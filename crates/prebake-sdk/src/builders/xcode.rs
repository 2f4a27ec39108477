//! Per-platform framework compilation with xcodebuild
//!
//! This module compiles each module of a target once per architecture variant
//! of the target's platform family: device and simulator for iOS, tvOS and
//! watchOS, a single desktop build for macOS.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::paths::ArtifactPaths;
use crate::process::{ProcessRunner, ToolCommand};
use crate::skip::{SkipReason, skip_reason};
use crate::types::{ArchVariant, BuildConfig, Module, Platform, PrebakeError, Target};

/// Per-variant output of one compiler invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantArtifact {
    pub variant: ArchVariant,
    /// Framework container at the path the resolver computes; it may lack a
    /// binary when the module has nothing to compile for this variant.
    pub path: PathBuf,
}

/// Per-variant artifacts of one module, device variant first for each platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleBuild {
    pub module: Module,
    pub artifacts: Vec<VariantArtifact>,
}

/// Result of building one target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetBuild {
    pub target_label: String,
    pub built: Vec<ModuleBuild>,
    pub skipped: Vec<(String, SkipReason)>,
    pub invocations: usize,
}

/// Builds the modules of one target for every variant of its platform family.
pub struct PlatformBuildStep<'a, R: ProcessRunner> {
    runner: &'a R,
    config: &'a BuildConfig,
    paths: &'a ArtifactPaths,
    project_path: &'a Path,
}

impl<'a, R: ProcessRunner> PlatformBuildStep<'a, R> {
    /// Creates a build step
    ///
    /// # Arguments
    ///
    /// * `runner` - Executes the xcodebuild invocations
    /// * `config` - Build configuration shared by the whole run
    /// * `paths` - Resolver for per-variant output locations
    /// * `project_path` - The generated `.xcodeproj` holding one scheme per package
    pub fn new(
        runner: &'a R,
        config: &'a BuildConfig,
        paths: &'a ArtifactPaths,
        project_path: &'a Path,
    ) -> Self {
        Self {
            runner,
            config,
            paths,
            project_path,
        }
    }

    /// Builds every module of `target` that is not skipped.
    ///
    /// Modules are processed in target order; for each module all variants
    /// complete before the next module starts. The first failing invocation
    /// aborts the step.
    ///
    /// # Returns
    ///
    /// * `Ok(TargetBuild)` with the per-variant artifacts of each built module
    /// * `Err(PrebakeError::UnknownPlatform)` before any invocation when the
    ///   platform has no recipe
    /// * `Err(PrebakeError::ToolInvocation)` when xcodebuild fails
    pub fn build_target(&self, target: &Target) -> Result<TargetBuild, PrebakeError> {
        self.build_target_except(target, |_, _| false)
    }

    /// Like [`Self::build_target`], additionally skipping modules for which
    /// `built_earlier(module, platform)` holds. Those are reported as
    /// [`SkipReason::AlreadyBuilt`].
    pub fn build_target_except<F>(
        &self,
        target: &Target,
        built_earlier: F,
    ) -> Result<TargetBuild, PrebakeError>
    where
        F: Fn(&Module, Platform) -> bool,
    {
        let platform = target.platform()?;
        let mut result = TargetBuild {
            target_label: target.label.clone(),
            ..TargetBuild::default()
        };

        for module in target.unique_modules() {
            let reason = skip_reason(self.paths, module).or_else(|| {
                built_earlier(module, platform).then_some(SkipReason::AlreadyBuilt)
            });
            if let Some(reason) = reason {
                result.skipped.push((module.module.clone(), reason));
                continue;
            }

            info!(
                target = %target.label,
                module = %module.module,
                platform = platform.as_str(),
                "building module"
            );

            let mut artifacts = Vec::with_capacity(platform.variants().len());
            for &variant in platform.variants() {
                let command = self.command_for(platform, target, module, variant);
                self.runner.run(&command)?;
                result.invocations += 1;
                artifacts.push(VariantArtifact {
                    variant,
                    path: self
                        .paths
                        .variant_artifact(variant, &module.package, &module.module),
                });
            }

            result.built.push(ModuleBuild {
                module: module.clone(),
                artifacts,
            });
        }

        Ok(result)
    }

    /// The xcodebuild invocation compiling `module` for one variant.
    ///
    /// `CONFIGURATION_BUILD_DIR` pins the product location to the path
    /// [`ArtifactPaths::variant_artifact`] computes, so no tool output needs
    /// to be parsed.
    pub fn command_for(
        &self,
        platform: Platform,
        target: &Target,
        module: &Module,
        variant: ArchVariant,
    ) -> ToolCommand {
        let product_dir = self.paths.variant_dir(variant, &module.package);
        let mut command = ToolCommand::new("xcodebuild")
            .arg("-project")
            .arg_path(self.project_path)
            .args(["-scheme", module.package.as_str()])
            .args(["-configuration", self.config.configuration.as_str()])
            .args(["-sdk", variant.sdk])
            .arg(format!(
                "CONFIGURATION_BUILD_DIR={}",
                product_dir.to_string_lossy()
            ))
            .arg(format!(
                "{}={}",
                platform.deployment_target_setting(),
                target.deployment_target
            ))
            .args(self.config.build_settings());
        if let Some(dir) = self.project_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            command = command.current_dir(dir);
        }
        command
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BuildMode;
    use std::cell::RefCell;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recorder {
        commands: RefCell<Vec<ToolCommand>>,
        fail_on_sdk: Option<&'static str>,
    }

    impl ProcessRunner for Recorder {
        fn run(&self, command: &ToolCommand) -> Result<crate::process::ToolOutput, PrebakeError> {
            self.commands.borrow_mut().push(command.clone());
            if command.flag_value("-sdk") == self.fail_on_sdk {
                return Err(PrebakeError::ToolInvocation {
                    tool: command.to_string(),
                    status: Some(65),
                    output: "** BUILD FAILED **".to_string(),
                });
            }
            Ok(Default::default())
        }
    }

    fn target(platform: &str, modules: Vec<Module>) -> Target {
        Target {
            label: "Pods-App".to_string(),
            platform: platform.to_string(),
            deployment_target: "13.0".to_string(),
            modules,
        }
    }

    fn paths(dir: &TempDir, config: &BuildConfig) -> ArtifactPaths {
        ArtifactPaths::new(dir.path().join("build"), dir.path().join("Prebuilt"), config)
    }

    #[test]
    fn test_mobile_target_builds_device_then_simulator() {
        let dir = TempDir::new().unwrap();
        let config = BuildConfig::default();
        let paths = paths(&dir, &config);
        let runner = Recorder::default();
        let project = dir.path().join("Pods/Pods.xcodeproj");
        let step = PlatformBuildStep::new(&runner, &config, &paths, &project);

        let result = step
            .build_target(&target("ios", vec![Module::new("A", "A"), Module::new("B", "B")]))
            .unwrap();

        assert_eq!(result.invocations, 4);
        let sdks: Vec<_> = runner
            .commands
            .borrow()
            .iter()
            .map(|c| (c.flag_value("-scheme").unwrap().to_string(), c.flag_value("-sdk").unwrap().to_string()))
            .collect();
        assert_eq!(
            sdks,
            vec![
                ("A".to_string(), "iphoneos".to_string()),
                ("A".to_string(), "iphonesimulator".to_string()),
                ("B".to_string(), "iphoneos".to_string()),
                ("B".to_string(), "iphonesimulator".to_string()),
            ]
        );
        assert_eq!(result.built.len(), 2);
        assert_eq!(
            result.built[0].artifacts[0].path,
            dir.path().join("build/Debug-iphoneos/A/A.framework")
        );
        assert!(result.built[0].artifacts[1].variant.is_simulator());
    }

    #[test]
    fn test_desktop_target_builds_once() {
        let dir = TempDir::new().unwrap();
        let config = BuildConfig::default();
        let paths = paths(&dir, &config);
        let runner = Recorder::default();
        let project = dir.path().join("Pods/Pods.xcodeproj");
        let step = PlatformBuildStep::new(&runner, &config, &paths, &project);

        let result = step
            .build_target(&target("osx", vec![Module::new("A", "A")]))
            .unwrap();

        assert_eq!(result.invocations, 1);
        let commands = runner.commands.borrow();
        assert_eq!(commands[0].flag_value("-sdk"), Some("macosx"));
        assert_eq!(commands[0].setting("MACOSX_DEPLOYMENT_TARGET"), Some("13.0"));
    }

    #[test]
    fn test_command_carries_project_configuration_and_settings() {
        let dir = TempDir::new().unwrap();
        let config = BuildConfig {
            configuration: "Release".to_string(),
            mode: BuildMode::XcFramework,
            ..BuildConfig::default()
        };
        let paths = paths(&dir, &config);
        let runner = Recorder::default();
        let project = dir.path().join("Pods/Pods.xcodeproj");
        let step = PlatformBuildStep::new(&runner, &config, &paths, &project);
        let module = Module::new("Protobuf-ObjC", "Protobuf");
        let t = target("ios", vec![module.clone()]);

        let cmd = step.command_for(Platform::Ios, &t, &module, ArchVariant::device("iphoneos"));

        assert_eq!(cmd.program(), "xcodebuild");
        assert_eq!(cmd.flag_value("-project"), Some(project.to_str().unwrap()));
        assert_eq!(cmd.flag_value("-scheme"), Some("Protobuf-ObjC"));
        assert_eq!(cmd.flag_value("-configuration"), Some("Release"));
        assert_eq!(cmd.setting("IPHONEOS_DEPLOYMENT_TARGET"), Some("13.0"));
        assert_eq!(cmd.setting("BUILD_LIBRARY_FOR_DISTRIBUTION"), Some("YES"));
        let build_dir = dir.path().join("build/Release-iphoneos/Protobuf-ObjC");
        assert_eq!(
            cmd.setting("CONFIGURATION_BUILD_DIR"),
            Some(build_dir.to_str().unwrap())
        );
        assert_eq!(cmd.get_current_dir(), Some(dir.path().join("Pods").as_path()));
    }

    #[test]
    fn test_modules_built_earlier_are_skipped() {
        let dir = TempDir::new().unwrap();
        let config = BuildConfig::default();
        let paths = paths(&dir, &config);
        let runner = Recorder::default();
        let project = dir.path().join("Pods/Pods.xcodeproj");
        let step = PlatformBuildStep::new(&runner, &config, &paths, &project);

        let result = step
            .build_target_except(
                &target("tvos", vec![Module::new("A", "A"), Module::new("B", "B")]),
                |module, platform| module.module == "A" && platform == Platform::Tvos,
            )
            .unwrap();

        assert_eq!(result.invocations, 2);
        assert_eq!(result.skipped, vec![("A".to_string(), SkipReason::AlreadyBuilt)]);
        assert_eq!(result.built[0].module.module, "B");
        assert_eq!(runner.commands.borrow()[0].flag_value("-sdk"), Some("appletvos"));
    }

    #[test]
    fn test_skipped_modules_are_not_built() {
        let dir = TempDir::new().unwrap();
        let config = BuildConfig::default();
        let paths = paths(&dir, &config);
        std::fs::create_dir_all(paths.published("A")).unwrap();
        let runner = Recorder::default();
        let project = dir.path().join("Pods/Pods.xcodeproj");
        let step = PlatformBuildStep::new(&runner, &config, &paths, &project);

        let result = step
            .build_target(&target(
                "ios",
                vec![Module::new("A", "A"), Module::aggregate("Pods-App")],
            ))
            .unwrap();

        assert_eq!(result.invocations, 0);
        assert!(result.built.is_empty());
        assert_eq!(
            result.skipped,
            vec![
                ("A".to_string(), SkipReason::AlreadyPublished),
                ("Pods-App".to_string(), SkipReason::NotNative),
            ]
        );
    }

    #[test]
    fn test_failure_aborts_remaining_invocations() {
        let dir = TempDir::new().unwrap();
        let config = BuildConfig::default();
        let paths = paths(&dir, &config);
        let runner = Recorder {
            fail_on_sdk: Some("iphonesimulator"),
            ..Recorder::default()
        };
        let project = dir.path().join("Pods/Pods.xcodeproj");
        let step = PlatformBuildStep::new(&runner, &config, &paths, &project);

        let err = step
            .build_target(&target("ios", vec![Module::new("A", "A"), Module::new("B", "B")]))
            .unwrap_err();

        assert!(matches!(err, PrebakeError::ToolInvocation { status: Some(65), .. }));
        assert_eq!(runner.commands.borrow().len(), 2);
    }

    #[test]
    fn test_unknown_platform_fails_before_building() {
        let dir = TempDir::new().unwrap();
        let config = BuildConfig::default();
        let paths = paths(&dir, &config);
        let runner = Recorder::default();
        let project = dir.path().join("Pods/Pods.xcodeproj");
        let step = PlatformBuildStep::new(&runner, &config, &paths, &project);

        let err = step
            .build_target(&target("android", vec![Module::new("A", "A")]))
            .unwrap_err();

        assert!(matches!(err, PrebakeError::UnknownPlatform { .. }));
        assert!(runner.commands.borrow().is_empty());
    }
}
