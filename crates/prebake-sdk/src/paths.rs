//! Canonical artifact locations.
//!
//! All components agree on where things live by recomputing paths from the
//! same inputs instead of passing discovered locations around.
//!
//! ```text
//! <project>/
//! ├── Pods/                      sandbox root
//! │   └── .prebake/
//! │       ├── Manifest.lock      previous lockfile snapshot
//! │       └── last-run.json      run report
//! ├── build/                     transient build directory
//! │   ├── Debug-iphoneos/<Package>/<Module>.framework
//! │   ├── Debug-iphonesimulator/<Package>/<Module>.framework
//! │   └── <Module>.framework     merged output
//! ├── dSYM/<sdk>/                collected debug symbols
//! └── Prebuilt/<Module>.framework published artifacts
//! ```

use std::path::{Path, PathBuf};

use crate::types::{ArchVariant, BuildConfig, BuildMode};

/// Default name of the published artifacts directory.
pub const DEFAULT_DESTINATION: &str = "Prebuilt";

/// Directory under the sandbox root holding prebake's own state.
pub const STATE_DIR: &str = ".prebake";

/// File name of the persisted lockfile snapshot.
pub const SNAPSHOT_FILE: &str = "Manifest.lock";

/// File name of the JSON run report.
pub const REPORT_FILE: &str = "last-run.json";

/// Directory layout derived from the sandbox root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxLayout {
    pub sandbox_root: PathBuf,
    /// Transient build directory, pruned at the end of every run.
    pub build_dir: PathBuf,
    /// Published artifacts, kept across runs.
    pub destination: PathBuf,
    /// Collected debug symbols, one subdirectory per SDK.
    pub dsym_dir: PathBuf,
    /// Previous lockfile snapshot.
    pub snapshot_cache: PathBuf,
    pub report_path: PathBuf,
}

impl SandboxLayout {
    /// Derives the layout for a sandbox, publishing into `destination_name`
    /// next to the sandbox directory.
    pub fn new(sandbox_root: impl Into<PathBuf>, destination_name: &str) -> Self {
        let sandbox_root = sandbox_root.into();
        let parent = sandbox_root
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let state_dir = sandbox_root.join(STATE_DIR);
        Self {
            build_dir: parent.join("build"),
            destination: parent.join(destination_name),
            dsym_dir: parent.join("dSYM"),
            snapshot_cache: state_dir.join(SNAPSHOT_FILE),
            report_path: state_dir.join(REPORT_FILE),
            sandbox_root,
        }
    }
}

/// Computes per-architecture, merged, and published artifact paths.
///
/// # Example
///
/// ```
/// use prebake_sdk::paths::ArtifactPaths;
/// use prebake_sdk::{ArchVariant, BuildConfig};
/// use std::path::Path;
///
/// let paths = ArtifactPaths::new("/p/build", "/p/Prebuilt", &BuildConfig::default());
/// assert_eq!(
///     paths.variant_artifact(ArchVariant::device("iphoneos"), "Alamofire", "Alamofire"),
///     Path::new("/p/build/Debug-iphoneos/Alamofire/Alamofire.framework")
/// );
/// assert_eq!(paths.published("Alamofire"), Path::new("/p/Prebuilt/Alamofire.framework"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    build_dir: PathBuf,
    destination: PathBuf,
    configuration: String,
    mode: BuildMode,
}

impl ArtifactPaths {
    pub fn new(
        build_dir: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
        config: &BuildConfig,
    ) -> Self {
        Self {
            build_dir: build_dir.into(),
            destination: destination.into(),
            configuration: config.configuration.clone(),
            mode: config.mode,
        }
    }

    pub fn for_layout(layout: &SandboxLayout, config: &BuildConfig) -> Self {
        Self::new(&layout.build_dir, &layout.destination, config)
    }

    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn mode(&self) -> BuildMode {
        self.mode
    }

    /// Directory xcodebuild writes one variant's products into.
    pub fn variant_dir(&self, variant: ArchVariant, target_label: &str) -> PathBuf {
        self.build_dir
            .join(format!("{}-{}", self.configuration, variant.sdk))
            .join(target_label)
    }

    /// `{build}/{configuration}-{sdk}/{target_label}/{module}.framework`
    pub fn variant_artifact(&self, variant: ArchVariant, target_label: &str, module: &str) -> PathBuf {
        self.variant_dir(variant, target_label)
            .join(format!("{}.framework", module))
    }

    /// Binary inside a per-variant framework container.
    pub fn binary_in(framework: &Path, module: &str) -> PathBuf {
        framework.join(module)
    }

    /// Debug symbols xcodebuild emits next to a per-variant framework.
    pub fn dsym_for(framework: &Path) -> PathBuf {
        let mut name = framework
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".dSYM");
        framework.with_file_name(name)
    }

    /// `{build}/{module}.{ext}`, the merged output of one module.
    pub fn merged(&self, module: &str) -> PathBuf {
        self.build_dir
            .join(format!("{}.{}", module, self.mode.extension()))
    }

    /// Whether the merged output of `module` holds a product, rather than
    /// only Swift metadata kept from an earlier run's cleanup.
    ///
    /// A fat framework needs its binary, a container needs `Info.plist`.
    pub fn has_merged(&self, module: &str) -> bool {
        let merged = self.merged(module);
        match self.mode {
            BuildMode::Framework => Self::binary_in(&merged, module).is_file(),
            BuildMode::XcFramework => merged.join("Info.plist").is_file(),
        }
    }

    /// Scratch location for the combined fat binary before it is moved into place.
    pub fn fat_binary_scratch(&self, module: &str) -> PathBuf {
        self.build_dir.join(module)
    }

    /// `{destination}/{module}.{ext}`
    pub fn published(&self, module: &str) -> PathBuf {
        self.destination
            .join(format!("{}.{}", module, self.mode.extension()))
    }
}
