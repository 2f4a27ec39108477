//! Lockfile-driven invalidation of published artifacts.
//!
//! Runs before anything is built. Published artifacts of packages affected
//! by a lockfile change are deleted together with their merged output in the
//! build directory, so the skip check no longer finds them and they are
//! rebuilt.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::builders::common::{fs_error, remove_if_exists};
use crate::lockfile::{LockSnapshot, LockfileDiff};
use crate::paths::{ArtifactPaths, SandboxLayout};
use crate::types::{InstallContext, PrebakeError};

/// Published artifact belonging to an affected package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StaleArtifact {
    pub package: String,
    pub module: String,
    pub path: PathBuf,
    /// Whether the artifact was on disk when the diff was computed.
    pub present: bool,
    /// Whether the previous snapshot knew the package.
    pub tracked: bool,
}

/// Result of comparing the cached snapshot with the current lockfile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InvalidationOutcome {
    /// No cached snapshot; every output directory is wiped.
    FirstRun,
    /// Lockfile is byte-identical to the cached snapshot.
    Unchanged,
    Invalidated {
        diff: LockfileDiff,
        stale: Vec<StaleArtifact>,
    },
}

impl InvalidationOutcome {
    /// Stale artifacts that were expected but not found.
    pub fn missing(&self) -> impl Iterator<Item = &StaleArtifact> {
        let stale: &[StaleArtifact] = match self {
            InvalidationOutcome::Invalidated { stale, .. } => stale,
            _ => &[],
        };
        stale.iter().filter(|s| s.tracked && !s.present)
    }
}

/// Compares lockfile snapshots and removes stale published artifacts.
pub struct CacheInvalidator<'a> {
    layout: &'a SandboxLayout,
    paths: &'a ArtifactPaths,
}

impl<'a> CacheInvalidator<'a> {
    pub fn new(layout: &'a SandboxLayout, paths: &'a ArtifactPaths) -> Self {
        Self { layout, paths }
    }

    /// Computes what invalidation would do without touching the filesystem.
    pub fn assess(&self, context: &InstallContext) -> Result<InvalidationOutcome, PrebakeError> {
        let cache = &self.layout.snapshot_cache;
        if !cache.exists() {
            return Ok(InvalidationOutcome::FirstRun);
        }

        let previous_bytes = fs::read(cache).map_err(|e| fs_error("read", cache, e))?;
        let current_bytes = match context.lockfile.as_deref().filter(|p| p.exists()) {
            Some(path) => Some(fs::read(path).map_err(|e| fs_error("read", path, e))?),
            None => None,
        };
        if current_bytes.as_deref() == Some(previous_bytes.as_slice()) {
            return Ok(InvalidationOutcome::Unchanged);
        }

        let previous = LockSnapshot::parse(&String::from_utf8_lossy(&previous_bytes))?;
        let current = match &current_bytes {
            Some(bytes) => LockSnapshot::parse(&String::from_utf8_lossy(bytes))?,
            None => LockSnapshot::default(),
        };
        let diff = LockfileDiff::between(&previous, &current);

        let stale = diff
            .affected
            .iter()
            .map(|package| {
                let module = context.module_name_for(package);
                let path = self.paths.published(&module);
                StaleArtifact {
                    present: path.exists(),
                    tracked: previous.is_tracked(package),
                    package: package.clone(),
                    module,
                    path,
                }
            })
            .collect();

        Ok(InvalidationOutcome::Invalidated { diff, stale })
    }

    /// Applies an outcome computed by [`Self::assess`].
    pub fn apply(&self, outcome: &InvalidationOutcome) -> Result<(), PrebakeError> {
        match outcome {
            InvalidationOutcome::FirstRun => {
                info!("no lockfile snapshot found, clearing all outputs");
                for dir in [
                    &self.layout.build_dir,
                    &self.layout.dsym_dir,
                    &self.layout.destination,
                ] {
                    remove_if_exists(dir)?;
                }
            }
            InvalidationOutcome::Unchanged => {
                info!("lockfile unchanged, keeping published artifacts");
            }
            InvalidationOutcome::Invalidated { diff, stale } => {
                info!(
                    changed = diff.changed.len(),
                    affected = diff.affected.len(),
                    "lockfile changed"
                );
                for artifact in stale {
                    let merged = self.paths.merged(&artifact.module);
                    if remove_if_exists(&merged)? {
                        debug!(
                            module = %artifact.module,
                            path = %merged.display(),
                            "removed merged build output"
                        );
                    }
                    if remove_if_exists(&artifact.path)? {
                        info!(module = %artifact.module, "removed stale artifact");
                    } else if artifact.tracked {
                        error!(
                            package = %artifact.package,
                            path = %artifact.path.display(),
                            "expected published artifact is missing"
                        );
                    }
                }
            }
        }
        Ok(())
    }

    /// Assesses and applies in one step.
    pub fn invalidate(&self, context: &InstallContext) -> Result<InvalidationOutcome, PrebakeError> {
        let outcome = self.assess(context)?;
        self.apply(&outcome)?;
        Ok(outcome)
    }

    /// Records `lockfile` as the snapshot for the next run, or forgets the
    /// snapshot when there is no current lockfile.
    pub fn persist_snapshot(&self, lockfile: Option<&Path>) -> Result<(), PrebakeError> {
        let cache = &self.layout.snapshot_cache;
        match lockfile.filter(|p| p.exists()) {
            Some(path) => {
                if let Some(parent) = cache.parent() {
                    fs::create_dir_all(parent).map_err(|e| fs_error("create directory", parent, e))?;
                }
                fs::copy(path, cache).map_err(|e| fs_error("copy lockfile to", cache, e))?;
            }
            None => {
                if remove_if_exists(cache)? {
                    warn!("no current lockfile, removed snapshot cache");
                }
            }
        }
        Ok(())
    }
}
