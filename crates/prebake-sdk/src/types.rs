//! Core types for prebake-sdk.
//!
//! This module defines the fundamental types used throughout the SDK:
//!
//! - [`PrebakeError`] - Error type for every orchestration step
//! - [`Platform`] / [`ArchVariant`] - Platform families and the SDK variants they build for
//! - [`BuildConfig`] / [`BuildMode`] / [`Linkage`] - Immutable build configuration
//! - [`Target`] / [`Module`] - The resolved dependency graph handed over by the host
//! - [`InstallContext`] - Everything the host supplies for one run

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// Error types for prebake-sdk operations.
///
/// Every variant except the lockfile and I/O wrappers maps onto one failure
/// class of the pipeline. All of them abort the run; conditions that only
/// affect cache optimality (a stale artifact that is already gone, a variant
/// without a binary) are logged instead of surfaced here.
///
/// # Example
///
/// ```ignore
/// use prebake_sdk::{Orchestrator, PrebakeError};
///
/// match orchestrator.run(&context) {
///     Ok(report) => println!("Built {} modules", report.built.len()),
///     Err(PrebakeError::ToolInvocation { tool, output, .. }) => {
///         eprintln!("{} failed:\n{}", tool, output);
///     }
///     Err(e) => eprintln!("Other error: {}", e),
/// }
/// ```
#[derive(Debug, thiserror::Error)]
pub enum PrebakeError {
    /// An external tool (xcodebuild, lipo, a hook command) exited unsuccessfully
    /// or could not be started.
    ///
    /// `output` carries the captured stdout and stderr verbatim.
    #[error("{tool} failed (exit status: {code}).\n\n{output}", code = display_status(.status))]
    ToolInvocation {
        tool: String,
        status: Option<i32>,
        output: String,
    },

    /// A target reported a platform family there is no build recipe for.
    #[error("target '{target}' uses unsupported platform '{platform}'. Supported platforms: ios, osx, tvos, watchos")]
    UnknownPlatform { target: String, platform: String },

    /// Builds ran but the transient build directory was never created.
    ///
    /// This usually means xcodebuild ignored `CONFIGURATION_BUILD_DIR` or the
    /// project path points at the wrong project.
    #[error("build directory was not found at {0:?} after building. Check that the project path in the install manifest is correct")]
    MissingBuildOutput(PathBuf),

    /// A lockfile could not be interpreted.
    #[error("lockfile error: {0}")]
    Lockfile(String),

    /// YAML parsing of a lockfile failed.
    #[error("lockfile parse error: {0}. Check that the lockfile is valid YAML")]
    Yaml(#[from] serde_yaml::Error),

    /// An I/O error occurred.
    #[error("I/O error: {0}. Check file paths and permissions")]
    Io(#[from] std::io::Error),

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}. Check the install manifest for JSON validity")]
    Serialization(#[from] serde_json::Error),

    /// Invalid or incomplete configuration or install manifest.
    #[error("configuration error: {0}")]
    Config(String),

    /// Publishing into the destination directory could not proceed.
    #[error("publish error: {0}")]
    Publish(String),

    /// A pre- or post-build hook failed.
    #[error("hook error: {0}")]
    Hook(String),
}

fn display_status(status: &Option<i32>) -> String {
    status
        .map(|code| code.to_string())
        .unwrap_or_else(|| "terminated by signal".to_string())
}

/// Platform families a target can belong to.
///
/// # Example
///
/// ```
/// use prebake_sdk::Platform;
///
/// let platform = Platform::from_identifier("ios").unwrap();
/// assert_eq!(platform.variants().len(), 2);
/// assert!(Platform::from_identifier("android").is_none());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Ios,
    Macos,
    Tvos,
    Watchos,
}

impl Platform {
    /// Parses the identifier the host uses for a platform family.
    ///
    /// Returns `None` for families without a build recipe.
    pub fn from_identifier(identifier: &str) -> Option<Self> {
        match identifier.to_ascii_lowercase().as_str() {
            "ios" => Some(Platform::Ios),
            "osx" | "macos" => Some(Platform::Macos),
            "tvos" => Some(Platform::Tvos),
            "watchos" => Some(Platform::Watchos),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Ios => "ios",
            Platform::Macos => "osx",
            Platform::Tvos => "tvos",
            Platform::Watchos => "watchos",
        }
    }

    /// Build setting carrying the deployment version floor for this family.
    pub fn deployment_target_setting(&self) -> &'static str {
        match self {
            Platform::Ios => "IPHONEOS_DEPLOYMENT_TARGET",
            Platform::Macos => "MACOSX_DEPLOYMENT_TARGET",
            Platform::Tvos => "TVOS_DEPLOYMENT_TARGET",
            Platform::Watchos => "WATCHOS_DEPLOYMENT_TARGET",
        }
    }

    /// Architecture variants built for this family, in merge order.
    ///
    /// The device variant always comes first: the legacy merge keeps the
    /// first variant's framework container.
    pub fn variants(&self) -> &'static [ArchVariant] {
        static IOS: [ArchVariant; 2] = [
            ArchVariant::device("iphoneos"),
            ArchVariant::simulator("iphonesimulator"),
        ];
        static MACOS: [ArchVariant; 1] = [ArchVariant::desktop("macosx")];
        static TVOS: [ArchVariant; 2] = [
            ArchVariant::device("appletvos"),
            ArchVariant::simulator("appletvsimulator"),
        ];
        static WATCHOS: [ArchVariant; 2] = [
            ArchVariant::device("watchos"),
            ArchVariant::simulator("watchsimulator"),
        ];
        match self {
            Platform::Ios => &IOS,
            Platform::Macos => &MACOS,
            Platform::Tvos => &TVOS,
            Platform::Watchos => &WATCHOS,
        }
    }
}

/// Whether a variant runs on hardware, in a simulator, or on the desktop host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariantKind {
    Device,
    Simulator,
    Desktop,
}

/// One SDK a module is compiled against; one compiler invocation each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArchVariant {
    /// SDK identifier passed to `xcodebuild -sdk`.
    pub sdk: &'static str,
    pub kind: VariantKind,
}

impl ArchVariant {
    pub const fn device(sdk: &'static str) -> Self {
        Self {
            sdk,
            kind: VariantKind::Device,
        }
    }

    pub const fn simulator(sdk: &'static str) -> Self {
        Self {
            sdk,
            kind: VariantKind::Simulator,
        }
    }

    pub const fn desktop(sdk: &'static str) -> Self {
        Self {
            sdk,
            kind: VariantKind::Desktop,
        }
    }

    pub fn is_simulator(&self) -> bool {
        self.kind == VariantKind::Simulator
    }
}

/// How per-architecture outputs are combined.
///
/// # Example
///
/// ```
/// use prebake_sdk::BuildMode;
///
/// assert_eq!(BuildMode::Framework.extension(), "framework");
/// assert_eq!(BuildMode::XcFramework.extension(), "xcframework");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
    /// Legacy single-binary framework; device and simulator binaries are
    /// merged with `lipo`.
    #[default]
    Framework,
    /// Multi-platform container created with `xcodebuild -create-xcframework`.
    #[serde(alias = "xc-framework")]
    XcFramework,
}

impl BuildMode {
    /// Bundle extension of merged and published artifacts.
    pub fn extension(&self) -> &'static str {
        match self {
            BuildMode::Framework => "framework",
            BuildMode::XcFramework => "xcframework",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BuildMode::Framework => "framework",
            BuildMode::XcFramework => "xcframework",
        }
    }
}

/// Mach-O linkage of the produced frameworks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Linkage {
    #[default]
    Dynamic,
    Static,
}

/// Immutable configuration threaded through every build step.
///
/// # Example
///
/// ```
/// use prebake_sdk::{BuildConfig, BuildMode};
///
/// let config = BuildConfig {
///     configuration: "Release".to_string(),
///     mode: BuildMode::XcFramework,
///     ..BuildConfig::default()
/// };
/// assert!(config.debug_symbols);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Xcode build configuration name.
    pub configuration: String,
    pub mode: BuildMode,
    pub linkage: Linkage,
    /// Emit dSYM bundles and collect them into the debug-symbol directory.
    pub debug_symbols: bool,
    /// Allow non-modular header includes inside framework modules.
    pub allow_non_modular_includes: bool,
    /// Embed bitcode in every compiled binary.
    pub force_bitcode: bool,
    /// Swift language version for pods that do not declare one.
    pub swift_version: Option<String>,
    /// Raw `KEY=VALUE` build settings appended to every compiler invocation.
    pub extra_build_settings: Vec<String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            configuration: "Debug".to_string(),
            mode: BuildMode::Framework,
            linkage: Linkage::Dynamic,
            debug_symbols: true,
            allow_non_modular_includes: false,
            force_bitcode: false,
            swift_version: None,
            extra_build_settings: Vec::new(),
        }
    }
}

impl BuildConfig {
    /// Build settings implied by this configuration, in invocation order.
    pub fn build_settings(&self) -> Vec<String> {
        let mut settings = Vec::new();
        if self.debug_symbols {
            settings.push("DEBUG_INFORMATION_FORMAT=dwarf-with-dsym".to_string());
        }
        if self.mode == BuildMode::XcFramework {
            settings.push("BUILD_LIBRARY_FOR_DISTRIBUTION=YES".to_string());
            settings.push("SKIP_INSTALL=NO".to_string());
        }
        if self.linkage == Linkage::Static {
            settings.push("MACH_O_TYPE=staticlib".to_string());
        }
        if self.allow_non_modular_includes {
            settings.push("CLANG_ALLOW_NON_MODULAR_INCLUDES_IN_FRAMEWORK_MODULES=YES".to_string());
        }
        if self.force_bitcode {
            settings.push("BITCODE_GENERATION_MODE=bitcode".to_string());
            settings.push("OTHER_CFLAGS=$(inherited) -fembed-bitcode".to_string());
        }
        if let Some(version) = &self.swift_version {
            settings.push(format!("SWIFT_VERSION={}", version));
        }
        settings.extend(self.extra_build_settings.iter().cloned());
        settings
    }
}

/// One compiled library/framework unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    /// Root package name; also the scheme built for this module.
    pub package: String,
    /// Binary module name, e.g. `SDWebImage` for package `SDWebImage`
    /// or `Protobuf` for package `Protobuf-ObjC`.
    pub module: String,
    /// `false` for aggregate targets that produce no binary of their own.
    #[serde(default = "default_true")]
    pub native: bool,
}

fn default_true() -> bool {
    true
}

impl Module {
    pub fn new(package: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            module: module.into(),
            native: true,
        }
    }

    /// Creates a module for an aggregate target that is never compiled.
    pub fn aggregate(package: impl Into<String>) -> Self {
        let package = package.into();
        Self {
            module: package.clone(),
            package,
            native: false,
        }
    }
}

/// A buildable unit for one platform family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Umbrella label, e.g. `Pods-App`.
    pub label: String,
    /// Platform identifier as reported by the host (`ios`, `osx`, ...).
    pub platform: String,
    /// Deployment version floor, e.g. `13.0`.
    pub deployment_target: String,
    #[serde(default)]
    pub modules: Vec<Module>,
}

impl Target {
    /// Modules with duplicates collapsed by package name, first occurrence kept.
    pub fn unique_modules(&self) -> Vec<&Module> {
        let mut seen = HashSet::new();
        self.modules
            .iter()
            .filter(|m| seen.insert(m.package.as_str()))
            .collect()
    }

    /// Resolves the platform family, failing for families without a recipe.
    pub fn platform(&self) -> Result<Platform, PrebakeError> {
        Platform::from_identifier(&self.platform).ok_or_else(|| PrebakeError::UnknownPlatform {
            target: self.label.clone(),
            platform: self.platform.clone(),
        })
    }
}

/// Everything the host dependency manager supplies for one run.
///
/// Filled once at the start of a run; the engine never calls back into the
/// host. Usually loaded from the JSON install manifest the host plugin writes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstallContext {
    /// Sandbox root (the `Pods/` directory).
    pub sandbox_root: PathBuf,
    /// Generated project containing one scheme per package.
    pub project_path: PathBuf,
    /// Current lockfile, if the host wrote one.
    #[serde(default)]
    pub lockfile: Option<PathBuf>,
    #[serde(default)]
    pub targets: Vec<Target>,
    /// Package root name to binary module name.
    #[serde(default)]
    pub module_names: BTreeMap<String, String>,
    #[serde(default)]
    pub vendored_frameworks: Vec<PathBuf>,
    #[serde(default)]
    pub vendored_libraries: Vec<PathBuf>,
    #[serde(default)]
    pub resource_bundles: Vec<PathBuf>,
}

impl InstallContext {
    /// Loads an install manifest and resolves relative paths against the
    /// manifest's directory.
    pub fn load(path: &Path) -> Result<Self, PrebakeError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            PrebakeError::Config(format!(
                "Failed to read install manifest {:?}: {}\n\n\
                 The manifest is written by the host plugin after dependency installation.",
                path, e
            ))
        })?;
        let mut context: InstallContext = serde_json::from_str(&contents)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        context.resolve_relative_to(base);
        Ok(context)
    }

    fn resolve_relative_to(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.sandbox_root);
        resolve(&mut self.project_path);
        if let Some(lockfile) = self.lockfile.as_mut() {
            resolve(lockfile);
        }
        self.vendored_frameworks.iter_mut().for_each(resolve);
        self.vendored_libraries.iter_mut().for_each(resolve);
        self.resource_bundles.iter_mut().for_each(resolve);
    }

    /// Binary module name for a package, falling back to a sanitized
    /// identifier when the host supplied no mapping.
    pub fn module_name_for(&self, package: &str) -> String {
        self.module_names
            .get(package)
            .cloned()
            .unwrap_or_else(|| sanitized_module_name(package))
    }
}

/// Converts a package name into a valid C99 identifier.
///
/// A leading digit is prefixed with an underscore and every character that is
/// not ASCII alphanumeric becomes an underscore.
///
/// # Example
///
/// ```
/// use prebake_sdk::types::sanitized_module_name;
///
/// assert_eq!(sanitized_module_name("1PasswordExtension"), "_1PasswordExtension");
/// assert_eq!(sanitized_module_name("Protobuf-ObjC"), "Protobuf_ObjC");
/// ```
pub fn sanitized_module_name(package: &str) -> String {
    let mut name: String = package
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    name
}
