//! Rebuild avoidance.

use serde::Serialize;
use tracing::debug;

use crate::paths::ArtifactPaths;
use crate::types::Module;

/// Why a module does not need building.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// A merged product is already in the build directory, typically left by
    /// an interrupted run. Metadata-only leftovers of a cleanup do not count.
    AlreadyBuilt,
    /// An artifact survived cache invalidation in the destination.
    AlreadyPublished,
    /// Aggregate target without sources of its own.
    NotNative,
}

/// Decides whether `module` can be skipped.
///
/// Returns `None` when the module must be built.
pub fn skip_reason(paths: &ArtifactPaths, module: &Module) -> Option<SkipReason> {
    let reason = if !module.native {
        Some(SkipReason::NotNative)
    } else if paths.has_merged(&module.module) {
        Some(SkipReason::AlreadyBuilt)
    } else if paths.published(&module.module).exists() {
        Some(SkipReason::AlreadyPublished)
    } else {
        None
    };
    if let Some(reason) = reason {
        debug!(module = %module.module, ?reason, "skipping module");
    }
    reason
}

pub fn should_skip(paths: &ArtifactPaths, module: &Module) -> bool {
    skip_reason(paths, module).is_some()
}
