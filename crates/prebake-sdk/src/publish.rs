//! Publishing built and vendored artifacts into the destination directory.
//!
//! Publishing is all-or-nothing with respect to missing inputs: every source
//! is checked before the first copy. Once copied, the transient build
//! directory is pruned down to the Swift metadata files IDEs use for
//! source navigation.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::builders::common::{copy_path, fs_error, move_path, path_exists, remove_if_exists};
use crate::builders::ModuleBuild;
use crate::merge::MergeOutcome;
use crate::paths::ArtifactPaths;
use crate::types::{InstallContext, PrebakeError};

/// File extensions kept in the build directory after cleanup.
pub const PRESERVED_EXTENSIONS: &[&str] = &["swiftsourceinfo", "swiftdoc"];

/// Sources to publish, grouped the way they are copied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishPlan {
    /// Build outputs, simulator entries before device entries.
    pub built: Vec<PathBuf>,
    /// Vendored frameworks followed by vendored static libraries.
    pub vendored: Vec<PathBuf>,
    pub resources: Vec<PathBuf>,
}

impl PublishPlan {
    /// Collects the sources of one run. Each list is de-duplicated with the
    /// first occurrence kept.
    pub fn collect(outcomes: &[MergeOutcome], context: &InstallContext) -> Self {
        let mut simulator = Vec::new();
        let mut device = Vec::new();
        for outcome in outcomes {
            match outcome {
                MergeOutcome::Merged(path) => device.push(path.clone()),
                MergeOutcome::Unmerged(artifacts) => {
                    for artifact in artifacts {
                        if artifact.variant.is_simulator() {
                            simulator.push(artifact.path.clone());
                        } else {
                            device.push(artifact.path.clone());
                        }
                    }
                }
            }
        }
        simulator.extend(device);

        Self {
            built: dedup(simulator),
            vendored: dedup(
                context
                    .vendored_frameworks
                    .iter()
                    .chain(&context.vendored_libraries)
                    .cloned()
                    .collect(),
            ),
            resources: dedup(context.resource_bundles.clone()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.built.is_empty() && self.vendored.is_empty() && self.resources.is_empty()
    }

    fn sources(&self) -> impl Iterator<Item = &PathBuf> {
        self.built.iter().chain(&self.vendored).chain(&self.resources)
    }
}

fn dedup(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    paths
        .into_iter()
        .filter(|p| seen.insert(p.clone()))
        .collect()
}

/// Copies a [`PublishPlan`] into the destination and prunes the build directory.
pub struct PublishStep<'a> {
    paths: &'a ArtifactPaths,
}

impl<'a> PublishStep<'a> {
    pub fn new(paths: &'a ArtifactPaths) -> Self {
        Self { paths }
    }

    /// Copies every source into the destination, replacing same-named entries.
    ///
    /// # Returns
    ///
    /// * `Ok(paths)` of the published entries, in copy order
    /// * `Err(PrebakeError::Publish)` before any write if a source is missing
    pub fn publish(&self, plan: &PublishPlan) -> Result<Vec<PathBuf>, PrebakeError> {
        let missing: Vec<String> = plan
            .sources()
            .filter(|p| !path_exists(p))
            .map(|p| p.display().to_string())
            .collect();
        if !missing.is_empty() {
            return Err(PrebakeError::Publish(format!(
                "Cannot publish, sources are missing:\n  {}\n\n\
                 Vendored paths come from the install manifest; re-run the \
                 dependency install if they were removed.",
                missing.join("\n  ")
            )));
        }

        let destination = self.paths.destination();
        fs::create_dir_all(destination).map_err(|e| fs_error("create directory", destination, e))?;

        let mut published = Vec::new();
        for source in plan.sources() {
            let Some(name) = source.file_name() else {
                return Err(PrebakeError::Publish(format!(
                    "Invalid artifact path: {}",
                    source.display()
                )));
            };
            let dest = destination.join(name);
            copy_path(source, &dest)?;
            debug!(source = %source.display(), dest = %dest.display(), "published");
            published.push(dest);
        }

        info!(count = published.len(), destination = %destination.display(), "published artifacts");
        Ok(published)
    }

    /// Removes the build directory, keeping only preserved metadata files.
    ///
    /// Files are moved to a sibling holding directory with their relative
    /// paths, the build directory is deleted, and the holding directory takes
    /// its place. Returns the number of files kept.
    pub fn clean_build_dir(&self) -> Result<usize, PrebakeError> {
        let build_dir = self.paths.build_dir();
        if !build_dir.exists() {
            return Ok(0);
        }
        let holding = holding_dir(build_dir);
        remove_if_exists(&holding)?;

        let preserved: Vec<PathBuf> = walkdir::WalkDir::new(build_dir)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .map(walkdir::DirEntry::into_path)
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| PRESERVED_EXTENSIONS.contains(&ext))
            })
            .collect();

        let mut kept = 0;
        for path in &preserved {
            let Ok(relative) = path.strip_prefix(build_dir) else {
                continue;
            };
            move_path(path, &holding.join(relative))?;
            kept += 1;
        }

        remove_if_exists(build_dir)?;
        if holding.exists() {
            fs::rename(&holding, build_dir).map_err(|e| fs_error("restore", build_dir, e))?;
        }
        debug!(kept, "cleaned build directory");
        Ok(kept)
    }
}

fn holding_dir(build_dir: &Path) -> PathBuf {
    let mut name = build_dir
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".metadata");
    build_dir.with_file_name(name)
}

/// Copies the dSYM bundles next to each per-variant framework into
/// `{dsym_root}/{sdk}/`. Returns the number copied.
pub fn collect_debug_symbols(build: &ModuleBuild, dsym_root: &Path) -> Result<usize, PrebakeError> {
    let mut copied = 0;
    for artifact in &build.artifacts {
        let dsym = ArtifactPaths::dsym_for(&artifact.path);
        let Some(name) = dsym.file_name() else {
            continue;
        };
        if !dsym.exists() {
            debug!(module = %build.module.module, sdk = artifact.variant.sdk, "no debug symbols");
            continue;
        }
        copy_path(&dsym, &dsym_root.join(artifact.variant.sdk).join(name))?;
        copied += 1;
    }
    Ok(copied)
}
