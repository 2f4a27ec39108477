//! Build automation for Apple platform frameworks.
//!
//! This module compiles the packages of an installed dependency graph into
//! per-architecture framework bundles, one `xcodebuild` invocation per
//! module and SDK variant.
//!
//! ## Overview
//!
//! For every target the build step:
//!
//! 1. **Resolves the platform family** - iOS, macOS, tvOS or watchOS
//! 2. **Skips finished work** - aggregate targets, merged outputs and artifacts
//!    that survived cache invalidation
//! 3. **Compiles each variant** - device and simulator for mobile families,
//!    a single desktop build for macOS
//!
//! ## Variants
//!
//! | Platform | Variants |
//! |----------|----------|
//! | `ios` | `iphoneos`, `iphonesimulator` |
//! | `osx` | `macosx` |
//! | `tvos` | `appletvos`, `appletvsimulator` |
//! | `watchos` | `watchos`, `watchsimulator` |
//!
//! ## Common Utilities
//!
//! The [`common`] module provides the symlink-preserving copy, move and
//! removal helpers used by the merge and publish steps.
//!
//! ## Example
//!
//! ```ignore
//! use prebake_sdk::builders::PlatformBuildStep;
//! use prebake_sdk::paths::ArtifactPaths;
//! use prebake_sdk::{BuildConfig, SystemRunner};
//!
//! let config = BuildConfig::default();
//! let paths = ArtifactPaths::new("build", "Prebuilt", &config);
//! let runner = SystemRunner::new();
//! let step = PlatformBuildStep::new(&runner, &config, &paths, project.as_path());
//!
//! let result = step.build_target(&target)?;
//! println!("{} invocations", result.invocations);
//! # Ok::<(), prebake_sdk::PrebakeError>(())
//! ```

pub mod common;
pub mod xcode;

pub use xcode::{ModuleBuild, PlatformBuildStep, TargetBuild, VariantArtifact};
