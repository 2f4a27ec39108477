//! Incremental prebuilt frameworks for dependency sandboxes
//!
//! `prebake-sdk` runs after a dependency manager has installed its packages
//! and generated a project. It compiles every package as a standalone
//! framework for each architecture of its platform, merges the per-architecture
//! outputs into one artifact per module, and publishes them into a stable
//! directory. Between runs it diffs the lockfile and rebuilds only what changed,
//! plus everything that transitively depends on it.
//!
//! # Quick Start
//!
//! 1. Have the host plugin write an install manifest (see [`InstallContext`]).
//!
//! 2. Run the pipeline:
//! ```ignore
//! use prebake_sdk::{BuildConfig, BuildMode, InstallContext, Orchestrator, SystemRunner};
//!
//! fn main() -> Result<(), prebake_sdk::PrebakeError> {
//!     let context = InstallContext::load("install.json".as_ref())?;
//!     let config = BuildConfig {
//!         configuration: "Release".to_string(),
//!         mode: BuildMode::XcFramework,
//!         ..BuildConfig::default()
//!     };
//!
//!     let report = Orchestrator::new(SystemRunner::new())
//!         .config(config)
//!         .run(&context)?;
//!
//!     println!("Published {} artifacts", report.published.len());
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! The SDK consists of several components:
//!
//! - **Process**: Typed tool invocations behind the [`ProcessRunner`] seam
//! - **Paths**: Canonical locations of per-variant, merged and published artifacts
//! - **Builders**: One `xcodebuild` invocation per module and SDK variant
//! - **Merge**: `lipo` fat binaries or `-create-xcframework` containers
//! - **Lockfile / Invalidate**: Transitive change detection between runs
//! - **Publish**: Copying into the destination and pruning the build directory
//! - **Orchestrator**: The run itself, hooks, and the JSON run report

// Public modules
pub mod builders;
pub mod invalidate;
pub mod lockfile;
pub mod merge;
pub mod orchestrator;
pub mod paths;
pub mod process;
pub mod publish;
pub mod skip;
pub mod types;

// Re-export key types for convenience
pub use invalidate::{CacheInvalidator, InvalidationOutcome};
pub use lockfile::{LockSnapshot, LockfileDiff};
pub use merge::{ArtifactMerger, MergeOutcome};
pub use orchestrator::{BuildHooks, Hook, HookContext, Orchestrator, RunPlan, RunReport, shell_hook};
pub use paths::{ArtifactPaths, SandboxLayout};
pub use process::{ProcessRunner, SystemRunner, ToolCommand, ToolOutput};
pub use skip::{SkipReason, should_skip};
pub use types::{
    ArchVariant, BuildConfig, BuildMode, InstallContext, Linkage, Module, Platform, PrebakeError,
    Target, VariantKind,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
