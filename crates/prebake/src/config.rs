//! Configuration file support for prebake.
//!
//! This module provides support for `prebake.toml` configuration files that
//! persist build settings, so the host plugin can invoke `prebake build` with
//! nothing but the install manifest.
//!
//! ## Configuration File Location
//!
//! The configuration file is searched for in the following order:
//! 1. Current working directory (`./prebake.toml`)
//! 2. Parent directories (up to the repository root or filesystem root)
//!
//! ## Example Configuration
//!
//! ```toml
//! [build]
//! configuration = "Release"
//! mode = "xcframework"
//! linkage = "static"
//! debug_symbols = true
//!
//! [output]
//! destination = "Prebuilt"
//! manifest = "Pods/.prebake/install.json"
//!
//! [hooks]
//! post_build = "ruby scripts/strip_archs.rb"
//! ```

use anyhow::{Context, Result};
use prebake_sdk::paths::DEFAULT_DESTINATION;
use prebake_sdk::{BuildConfig, BuildMode, Linkage};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The default configuration file name.
pub const CONFIG_FILE_NAME: &str = "prebake.toml";

/// Root configuration structure for `prebake.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrebakeConfig {
    /// Compiler and merge settings.
    pub build: BuildSection,

    /// Where artifacts go and where the install manifest is.
    pub output: OutputSection,

    /// Shell commands run around the build phase.
    pub hooks: HooksSection,
}

/// Compiler and merge settings.
///
/// Unset values fall back to the [`BuildConfig`] defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildSection {
    /// Xcode build configuration (default: `Debug`).
    pub configuration: Option<String>,

    /// `framework` or `xcframework` (default: `framework`).
    pub mode: Option<BuildMode>,

    /// `dynamic` or `static` (default: `dynamic`).
    pub linkage: Option<Linkage>,

    /// Emit and collect dSYM bundles (default: true).
    pub debug_symbols: Option<bool>,

    /// Allow non-modular includes in framework modules.
    pub allow_non_modular_includes: bool,

    /// Embed bitcode.
    pub force_bitcode: bool,

    /// Swift version for pods that do not declare one.
    pub swift_version: Option<String>,

    /// Raw `KEY=VALUE` settings appended to every xcodebuild invocation.
    pub extra_build_settings: Vec<String>,
}

/// Output locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSection {
    /// Published directory name, created next to the sandbox.
    ///
    /// Defaults to `Prebuilt`.
    pub destination: String,

    /// Install manifest used when `--manifest` is not given.
    ///
    /// Relative paths resolve against the directory holding `prebake.toml`.
    pub manifest: Option<PathBuf>,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            destination: DEFAULT_DESTINATION.to_string(),
            manifest: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HooksSection {
    pub pre_build: Option<String>,
    pub post_build: Option<String>,
}

impl PrebakeConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from the specified file path.
    ///
    /// # Returns
    ///
    /// * `Ok(PrebakeConfig)` - Successfully loaded configuration
    /// * `Err` - If the file cannot be read or parsed
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: PrebakeConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        Ok(config)
    }

    /// Attempts to find and load configuration from the current directory
    /// or any parent directory.
    pub fn discover() -> Result<Option<(Self, PathBuf)>> {
        let cwd = std::env::current_dir().context("Failed to get current directory")?;
        Self::discover_from(&cwd)
    }

    /// Attempts to find and load configuration starting from the specified directory.
    ///
    /// # Returns
    ///
    /// * `Ok(Some((config, path)))` - Found and loaded configuration with its path
    /// * `Ok(None)` - No configuration file found
    /// * `Err` - If a config file was found but couldn't be parsed
    pub fn discover_from(start_dir: &Path) -> Result<Option<(Self, PathBuf)>> {
        let mut current = start_dir.to_path_buf();

        loop {
            let config_path = current.join(CONFIG_FILE_NAME);

            if config_path.is_file() {
                let config = Self::load_from_file(&config_path)?;
                return Ok(Some((config, config_path)));
            }

            // Stop at repository root or filesystem root
            if current.join(".git").exists() || !current.pop() {
                break;
            }
        }

        Ok(None)
    }

    /// Generates a starter configuration file as a formatted TOML string.
    ///
    /// Every setting is present with its default value or commented out, so
    /// the file documents itself.
    pub fn generate_starter_toml() -> String {
        format!(
            r#"# prebake configuration file
# Prebuilds dependency frameworks after install and caches them across runs.
# CLI flags override these settings when provided.

[build]
# Xcode build configuration (default: Debug)
configuration = "Debug"

# "framework" merges device and simulator binaries with lipo,
# "xcframework" creates a multi-platform container (default: framework)
mode = "framework"

# "dynamic" or "static" (default: dynamic)
linkage = "dynamic"

# Emit dSYM bundles and collect them into ../dSYM (default: true)
debug_symbols = true

# Allow non-modular header includes inside framework modules (default: false)
allow_non_modular_includes = false

# Embed bitcode in every binary (default: false)
force_bitcode = false

# Swift version for pods that do not declare one (optional)
# swift_version = "5.0"

# Raw build settings appended to every xcodebuild invocation
extra_build_settings = []

[output]
# Published directory, created next to the Pods directory (default: {destination})
destination = "{destination}"

# Install manifest written by the host plugin (optional, else pass --manifest)
# manifest = "Pods/.prebake/install.json"

[hooks]
# Shell commands run before and after the build phase. They see
# PREBAKE_SANDBOX_ROOT, PREBAKE_BUILD_DIR and PREBAKE_DESTINATION.
# pre_build = "echo starting"
# post_build = "echo done"
"#,
            destination = DEFAULT_DESTINATION,
        )
    }
}

/// Values given on the command line for `prebake build`.
#[derive(Debug, Clone, Default)]
pub struct BuildOverrides {
    pub configuration: Option<String>,
    pub mode: Option<BuildMode>,
    pub no_debug_symbols: bool,
}

/// Configuration resolver that merges config file values with CLI arguments.
///
/// CLI arguments always take precedence over config file values, which take
/// precedence over defaults.
#[derive(Debug, Default)]
pub struct ConfigResolver {
    /// Loaded configuration, if any.
    pub config: Option<PrebakeConfig>,

    /// Path to the loaded config file, if any.
    pub config_path: Option<PathBuf>,
}

impl ConfigResolver {
    /// Creates a new resolver by discovering and loading configuration.
    pub fn new() -> Result<Self> {
        match PrebakeConfig::discover()? {
            Some((config, path)) => Ok(Self {
                config: Some(config),
                config_path: Some(path),
            }),
            None => Ok(Self::default()),
        }
    }

    /// Creates a resolver from an explicit config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        Ok(Self {
            config: Some(PrebakeConfig::load_from_file(path)?),
            config_path: Some(path.to_path_buf()),
        })
    }

    /// Resolves the complete build configuration.
    pub fn build_config(&self, overrides: &BuildOverrides) -> BuildConfig {
        let defaults = BuildConfig::default();
        let build = self.config.as_ref().map(|c| &c.build);

        BuildConfig {
            configuration: self.resolve(
                overrides.configuration.clone(),
                |c| c.build.configuration.clone(),
                defaults.configuration,
            ),
            mode: self.resolve(overrides.mode, |c| c.build.mode, defaults.mode),
            linkage: self.resolve(None, |c| c.build.linkage, defaults.linkage),
            debug_symbols: self.resolve(
                overrides.no_debug_symbols.then_some(false),
                |c| c.build.debug_symbols,
                defaults.debug_symbols,
            ),
            allow_non_modular_includes: build.is_some_and(|b| b.allow_non_modular_includes),
            force_bitcode: build.is_some_and(|b| b.force_bitcode),
            swift_version: build.and_then(|b| b.swift_version.clone()),
            extra_build_settings: build
                .map(|b| b.extra_build_settings.clone())
                .unwrap_or_default(),
        }
    }

    /// Returns the destination directory name.
    pub fn destination(&self) -> String {
        self.config
            .as_ref()
            .map(|c| c.output.destination.clone())
            .unwrap_or_else(|| DEFAULT_DESTINATION.to_string())
    }

    /// Returns the install manifest path, preferring the CLI value.
    pub fn manifest(&self, cli_value: Option<PathBuf>) -> Option<PathBuf> {
        cli_value.or_else(|| {
            let manifest = self.config.as_ref()?.output.manifest.clone()?;
            if manifest.is_relative()
                && let Some(base) = self.config_path.as_ref().and_then(|p| p.parent())
            {
                return Some(base.join(manifest));
            }
            Some(manifest)
        })
    }

    /// Returns the configured hooks.
    pub fn hooks(&self) -> HooksSection {
        self.config
            .as_ref()
            .map(|c| c.hooks.clone())
            .unwrap_or_default()
    }

    /// Resolves a CLI value, using config as fallback.
    ///
    /// # Arguments
    ///
    /// * `cli_value` - Value from CLI argument (None if not provided)
    /// * `config_getter` - Function to get value from config
    /// * `default` - Default value if neither CLI nor config provides a value
    pub fn resolve<T, F>(&self, cli_value: Option<T>, config_getter: F, default: T) -> T
    where
        F: FnOnce(&PrebakeConfig) -> Option<T>,
    {
        cli_value
            .or_else(|| self.config.as_ref().and_then(config_getter))
            .unwrap_or(default)
    }
}
