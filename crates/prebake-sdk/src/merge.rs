//! Combining per-architecture artifacts into one artifact per module.
//!
//! Two strategies exist, selected by [`BuildMode`]:
//!
//! - **Fat-binary merge** (`framework`): the device and simulator binaries are
//!   combined with `lipo` and written into the device container, which is
//!   moved to `{build}/{module}.framework`.
//! - **Container merge** (`xcframework`): every per-variant framework becomes
//!   one slice of `{build}/{module}.xcframework`.
//!
//! Either way the result is found again by [`ArtifactPaths::merged`].

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::builders::common::{copy_path, fs_error, move_path, path_exists, remove_if_exists};
use crate::builders::{ModuleBuild, VariantArtifact};
use crate::paths::ArtifactPaths;
use crate::process::{ProcessRunner, ToolCommand};
use crate::types::{BuildMode, PrebakeError};

/// What the merger did with a module's per-variant artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// A single artifact now lives at this path.
    Merged(PathBuf),
    /// Nothing to combine; these per-variant containers are published as-is.
    Unmerged(Vec<VariantArtifact>),
}

impl MergeOutcome {
    pub fn is_merged(&self) -> bool {
        matches!(self, MergeOutcome::Merged(_))
    }
}

/// Folds per-architecture artifacts of one module into a single artifact.
pub struct ArtifactMerger<'a, R: ProcessRunner> {
    runner: &'a R,
    paths: &'a ArtifactPaths,
    debug_symbols: bool,
}

impl<'a, R: ProcessRunner> ArtifactMerger<'a, R> {
    pub fn new(runner: &'a R, paths: &'a ArtifactPaths, debug_symbols: bool) -> Self {
        Self {
            runner,
            paths,
            debug_symbols,
        }
    }

    /// Merges `build` with the strategy of the configured build mode.
    pub fn merge(&self, build: &ModuleBuild) -> Result<MergeOutcome, PrebakeError> {
        match self.paths.mode() {
            BuildMode::Framework => self.merge_fat_binary(build),
            BuildMode::XcFramework => self.merge_container(build),
        }
    }

    /// Legacy merge through `lipo`.
    ///
    /// Variants whose container has no binary are excluded. With fewer than
    /// two binaries nothing is merged and the existing containers are
    /// returned untouched.
    pub fn merge_fat_binary(&self, build: &ModuleBuild) -> Result<MergeOutcome, PrebakeError> {
        let module = build.module.module.as_str();
        let with_binary: Vec<&VariantArtifact> = build
            .artifacts
            .iter()
            .filter(|artifact| {
                let present = ArtifactPaths::binary_in(&artifact.path, module).is_file();
                if !present {
                    debug!(module, sdk = artifact.variant.sdk, "variant produced no binary");
                }
                present
            })
            .collect();

        if with_binary.len() < 2 {
            let existing = build
                .artifacts
                .iter()
                .filter(|artifact| artifact.path.exists())
                .cloned()
                .collect();
            return Ok(MergeOutcome::Unmerged(existing));
        }

        let scratch = self.paths.fat_binary_scratch(module);
        let mut lipo = ToolCommand::new("lipo")
            .arg("-create")
            .arg("-output")
            .arg_path(&scratch);
        for artifact in &with_binary {
            lipo = lipo.arg_path(&ArtifactPaths::binary_in(&artifact.path, module));
        }
        self.runner.run(&lipo)?;

        let merged = self.paths.merged(module);
        remove_if_exists(&merged)?;
        let kept = with_binary[0];
        move_path(&kept.path, &merged)?;
        move_path(&scratch, &ArtifactPaths::binary_in(&merged, module))?;

        for artifact in build.artifacts.iter().filter(|a| a.path != kept.path) {
            fold_swift_modules(&artifact.path, &merged, module)?;
            remove_if_exists(&artifact.path)?;
        }

        info!(module, path = %merged.display(), "merged fat binary");
        Ok(MergeOutcome::Merged(merged))
    }

    /// Modern merge through `xcodebuild -create-xcframework`.
    pub fn merge_container(&self, build: &ModuleBuild) -> Result<MergeOutcome, PrebakeError> {
        let module = build.module.module.as_str();
        let inputs: Vec<&VariantArtifact> = build
            .artifacts
            .iter()
            .filter(|artifact| artifact.path.exists())
            .collect();
        if inputs.is_empty() {
            debug!(module, "no per-variant frameworks to combine");
            return Ok(MergeOutcome::Unmerged(Vec::new()));
        }

        let merged = self.paths.merged(module);
        remove_if_exists(&merged)?;

        let mut command = ToolCommand::new("xcodebuild").arg("-create-xcframework");
        for artifact in &inputs {
            command = command.arg("-framework").arg_path(&artifact.path);
            let dsym = ArtifactPaths::dsym_for(&artifact.path);
            if self.debug_symbols && dsym.exists() {
                command = command.arg("-debug-symbols").arg_path(&dsym);
            }
        }
        command = command.arg("-output").arg_path(&merged);
        self.runner.run(&command)?;

        for artifact in &inputs {
            remove_if_exists(&artifact.path)?;
        }

        info!(module, path = %merged.display(), "created xcframework");
        Ok(MergeOutcome::Merged(merged))
    }
}

/// Copies `Modules/{module}.swiftmodule` entries of `other` into `kept`,
/// leaving entries the kept container already has.
fn fold_swift_modules(other: &Path, kept: &Path, module: &str) -> Result<(), PrebakeError> {
    let relative = Path::new("Modules").join(format!("{}.swiftmodule", module));
    let source = other.join(&relative);
    if !source.is_dir() {
        return Ok(());
    }
    let target = kept.join(&relative);
    fs::create_dir_all(&target).map_err(|e| fs_error("create directory", &target, e))?;

    for entry in fs::read_dir(&source).map_err(|e| fs_error("read directory", &source, e))? {
        let entry = entry.map_err(|e| fs_error("read entry in", &source, e))?;
        let dest = target.join(entry.file_name());
        if !path_exists(&dest) {
            copy_path(&entry.path(), &dest)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ToolOutput;
    use crate::types::{ArchVariant, BuildConfig, Module};
    use std::cell::RefCell;
    use tempfile::TempDir;

    /// Writes whatever `-output` names, as the real tools would.
    #[derive(Default)]
    struct FakeTools {
        commands: RefCell<Vec<ToolCommand>>,
    }

    impl ProcessRunner for FakeTools {
        fn run(&self, command: &ToolCommand) -> Result<ToolOutput, PrebakeError> {
            self.commands.borrow_mut().push(command.clone());
            let output = PathBuf::from(command.flag_value("-output").unwrap());
            if command.program() == "lipo" {
                fs::write(&output, b"fat").unwrap();
            } else {
                fs::create_dir_all(&output).unwrap();
                fs::write(output.join("Info.plist"), "<plist/>").unwrap();
            }
            Ok(ToolOutput::default())
        }
    }

    fn framework(paths: &ArtifactPaths, variant: ArchVariant, binary: Option<&[u8]>) -> VariantArtifact {
        let path = paths.variant_artifact(variant, "A", "A");
        fs::create_dir_all(path.join("Modules/A.swiftmodule")).unwrap();
        fs::write(
            path.join(format!("Modules/A.swiftmodule/{}.swiftinterface", variant.sdk)),
            variant.sdk,
        )
        .unwrap();
        if let Some(bytes) = binary {
            fs::write(path.join("A"), bytes).unwrap();
        }
        VariantArtifact { variant, path }
    }

    fn setup(mode: BuildMode) -> (TempDir, ArtifactPaths) {
        let dir = TempDir::new().unwrap();
        let config = BuildConfig {
            mode,
            ..BuildConfig::default()
        };
        let paths = ArtifactPaths::new(dir.path().join("build"), dir.path().join("Prebuilt"), &config);
        (dir, paths)
    }

    #[test]
    fn test_fat_merge_keeps_device_container() {
        let (_dir, paths) = setup(BuildMode::Framework);
        let device = framework(&paths, ArchVariant::device("iphoneos"), Some(b"arm64"));
        let sim = framework(&paths, ArchVariant::simulator("iphonesimulator"), Some(b"x86_64"));
        let build = ModuleBuild {
            module: Module::new("A", "A"),
            artifacts: vec![device.clone(), sim.clone()],
        };
        let runner = FakeTools::default();

        let outcome = ArtifactMerger::new(&runner, &paths, true).merge(&build).unwrap();

        let merged = paths.merged("A");
        assert_eq!(outcome, MergeOutcome::Merged(merged.clone()));
        assert_eq!(fs::read(merged.join("A")).unwrap(), b"fat");
        assert!(!device.path.exists());
        assert!(!sim.path.exists());
        assert!(!paths.fat_binary_scratch("A").exists());
        let swiftmodule = merged.join("Modules/A.swiftmodule");
        assert!(swiftmodule.join("iphoneos.swiftinterface").exists());
        assert!(swiftmodule.join("iphonesimulator.swiftinterface").exists());

        let commands = runner.commands.borrow();
        assert_eq!(commands.len(), 1);
        let args = commands[0].get_args();
        assert_eq!(args[3], device.path.join("A").to_string_lossy());
        assert_eq!(args[4], sim.path.join("A").to_string_lossy());
    }

    #[test]
    fn test_fat_merge_with_single_binary_is_untouched() {
        let (_dir, paths) = setup(BuildMode::Framework);
        let device = framework(&paths, ArchVariant::device("iphoneos"), Some(b"arm64"));
        let sim = framework(&paths, ArchVariant::simulator("iphonesimulator"), None);
        let build = ModuleBuild {
            module: Module::new("A", "A"),
            artifacts: vec![device.clone(), sim.clone()],
        };
        let runner = FakeTools::default();

        let outcome = ArtifactMerger::new(&runner, &paths, true).merge(&build).unwrap();

        assert_eq!(outcome, MergeOutcome::Unmerged(vec![device.clone(), sim.clone()]));
        assert!(runner.commands.borrow().is_empty());
        assert!(device.path.join("A").exists());
        assert!(!paths.merged("A").exists());
    }

    #[test]
    fn test_desktop_build_is_not_merged() {
        let (_dir, paths) = setup(BuildMode::Framework);
        let mac = framework(&paths, ArchVariant::desktop("macosx"), Some(b"universal"));
        let build = ModuleBuild {
            module: Module::new("A", "A"),
            artifacts: vec![mac.clone()],
        };
        let runner = FakeTools::default();

        let outcome = ArtifactMerger::new(&runner, &paths, true).merge(&build).unwrap();
        assert!(!outcome.is_merged());
        assert_eq!(outcome, MergeOutcome::Unmerged(vec![mac]));
    }

    #[test]
    fn test_container_merge_passes_frameworks_and_symbols() {
        let (_dir, paths) = setup(BuildMode::XcFramework);
        let device = framework(&paths, ArchVariant::device("iphoneos"), Some(b"arm64"));
        let sim = framework(&paths, ArchVariant::simulator("iphonesimulator"), Some(b"x86_64"));
        fs::create_dir_all(ArtifactPaths::dsym_for(&device.path)).unwrap();
        let build = ModuleBuild {
            module: Module::new("A", "A"),
            artifacts: vec![device.clone(), sim.clone()],
        };
        let runner = FakeTools::default();

        let outcome = ArtifactMerger::new(&runner, &paths, true).merge(&build).unwrap();

        assert_eq!(outcome, MergeOutcome::Merged(paths.merged("A")));
        assert!(paths.merged("A").is_dir());
        assert!(!device.path.exists());
        assert!(!sim.path.exists());

        let commands = runner.commands.borrow();
        let args = commands[0].get_args();
        assert_eq!(args[0], "-create-xcframework");
        assert_eq!(args.iter().filter(|a| *a == "-framework").count(), 2);
        assert_eq!(args.iter().filter(|a| *a == "-debug-symbols").count(), 1);
        assert_eq!(
            commands[0].flag_value("-output"),
            Some(paths.merged("A").to_str().unwrap())
        );
    }

    #[test]
    fn test_container_merge_without_debug_symbols() {
        let (_dir, paths) = setup(BuildMode::XcFramework);
        let device = framework(&paths, ArchVariant::device("iphoneos"), Some(b"arm64"));
        fs::create_dir_all(ArtifactPaths::dsym_for(&device.path)).unwrap();
        let build = ModuleBuild {
            module: Module::new("A", "A"),
            artifacts: vec![device],
        };
        let runner = FakeTools::default();

        ArtifactMerger::new(&runner, &paths, false).merge(&build).unwrap();

        let commands = runner.commands.borrow();
        assert!(commands[0].flag_value("-debug-symbols").is_none());
    }

    #[test]
    fn test_fat_merge_replaces_leftover_metadata() {
        let (_dir, paths) = setup(BuildMode::Framework);
        let leftover = paths.merged("A").join("Modules/A.swiftmodule");
        fs::create_dir_all(&leftover).unwrap();
        fs::write(leftover.join("old.swiftdoc"), "stale").unwrap();
        let device = framework(&paths, ArchVariant::device("iphoneos"), Some(b"arm64"));
        let sim = framework(&paths, ArchVariant::simulator("iphonesimulator"), Some(b"x86_64"));
        let build = ModuleBuild {
            module: Module::new("A", "A"),
            artifacts: vec![device, sim],
        };
        let runner = FakeTools::default();

        ArtifactMerger::new(&runner, &paths, true).merge(&build).unwrap();

        assert!(paths.has_merged("A"));
        assert!(!leftover.join("old.swiftdoc").exists());
        assert!(leftover.join("iphoneos.swiftinterface").exists());
    }

    #[test]
    fn test_container_merge_spans_platforms() {
        let (_dir, paths) = setup(BuildMode::XcFramework);
        let artifacts = vec![
            framework(&paths, ArchVariant::device("iphoneos"), Some(b"arm64")),
            framework(&paths, ArchVariant::simulator("iphonesimulator"), Some(b"x86_64")),
            framework(&paths, ArchVariant::device("appletvos"), Some(b"arm64")),
            framework(&paths, ArchVariant::simulator("appletvsimulator"), Some(b"x86_64")),
        ];
        let build = ModuleBuild {
            module: Module::new("A", "A"),
            artifacts,
        };
        let runner = FakeTools::default();

        let outcome = ArtifactMerger::new(&runner, &paths, false).merge(&build).unwrap();

        assert!(outcome.is_merged());
        assert!(paths.has_merged("A"));
        let commands = runner.commands.borrow();
        assert_eq!(commands.len(), 1);
        let args = commands[0].get_args();
        assert!(args.iter().any(|a| a.contains("Debug-appletvsimulator")));
        assert!(args.iter().any(|a| a.contains("Debug-iphoneos")));
        assert_eq!(
            args.iter().filter(|a| *a == "-framework").count(),
            4
        );
    }
}
