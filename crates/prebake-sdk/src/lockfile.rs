//! Lockfile snapshots and the transitive change set between two of them.
//!
//! Only three sections of the host lockfile matter here:
//!
//! ```yaml
//! PODS:
//!   - A (1.0)
//!   - C (2.1):
//!     - B (~> 3.0)
//! SPEC CHECKSUMS:
//!   A: 3f2e...
//! CHECKOUT OPTIONS:
//!   B:
//!     :commit: 1a2b3c
//!     :git: https://example.com/B.git
//! ```
//!
//! Every other section is ignored. Subspec names (`Firebase/Core`) are
//! collapsed to their root package (`Firebase`).

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::types::PrebakeError;

#[derive(Debug, Default, Deserialize)]
struct RawLockfile {
    #[serde(rename = "PODS", default)]
    pods: Vec<PodListing>,
    #[serde(rename = "SPEC CHECKSUMS", default)]
    checksums: BTreeMap<String, serde_yaml::Value>,
    #[serde(rename = "CHECKOUT OPTIONS", default)]
    checkout_options: BTreeMap<String, serde_yaml::Value>,
}

/// One entry of the nested `PODS` listing.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PodListing {
    Leaf(String),
    WithDependencies(BTreeMap<String, Vec<String>>),
}

/// Root package name of a listing entry such as `Firebase/Core (10.0.0)`.
///
/// # Example
///
/// ```
/// use prebake_sdk::lockfile::root_package_name;
///
/// assert_eq!(root_package_name("Firebase/Core (10.0.0)"), "Firebase");
/// assert_eq!(root_package_name("Alamofire (~> 5.0)"), "Alamofire");
/// assert_eq!(root_package_name("SnapKit"), "SnapKit");
/// ```
pub fn root_package_name(entry: &str) -> &str {
    let name = entry.split(" (").next().unwrap_or(entry).trim();
    name.split('/').next().unwrap_or(name)
}

/// Parsed lockfile reduced to what invalidation needs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LockSnapshot {
    /// Root package to the root packages it depends on.
    dependencies: BTreeMap<String, BTreeSet<String>>,
    checksums: BTreeMap<String, serde_yaml::Value>,
    checkout_options: BTreeMap<String, serde_yaml::Value>,
}

impl LockSnapshot {
    /// Parses lockfile YAML. An empty document is an empty snapshot.
    pub fn parse(contents: &str) -> Result<Self, PrebakeError> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        let raw: RawLockfile = serde_yaml::from_str(contents)?;

        let mut dependencies: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for listing in raw.pods {
            match listing {
                PodListing::Leaf(entry) => {
                    dependencies
                        .entry(root_package_name(&entry).to_string())
                        .or_default();
                }
                PodListing::WithDependencies(map) => {
                    for (entry, deps) in map {
                        let root = root_package_name(&entry).to_string();
                        let edges = dependencies.entry(root.clone()).or_default();
                        edges.extend(
                            deps.iter()
                                .map(|dep| root_package_name(dep))
                                .filter(|dep| *dep != root)
                                .map(str::to_string),
                        );
                    }
                }
            }
        }

        let checksums = raw
            .checksums
            .into_iter()
            .map(|(name, value)| (root_package_name(&name).to_string(), value))
            .collect();

        Ok(Self {
            dependencies,
            checksums,
            checkout_options: raw.checkout_options,
        })
    }

    /// Loads a lockfile from disk.
    pub fn load(path: &Path) -> Result<Self, PrebakeError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            PrebakeError::Lockfile(format!("Failed to read lockfile {:?}: {}", path, e))
        })?;
        Self::parse(&contents)
    }

    /// Loads a lockfile, treating a missing file as an empty snapshot.
    pub fn load_or_empty(path: Option<&Path>) -> Result<Self, PrebakeError> {
        match path {
            Some(path) if path.exists() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }

    /// Package names in the checksum table.
    pub fn packages(&self) -> impl Iterator<Item = &str> {
        self.checksums.keys().map(String::as_str)
    }

    pub fn checksum(&self, package: &str) -> Option<&serde_yaml::Value> {
        self.checksums.get(package)
    }

    pub fn is_tracked(&self, package: &str) -> bool {
        self.checksums.contains_key(package)
    }

    /// Direct dependencies of `package` from the nested listing.
    pub fn dependencies_of(&self, package: &str) -> Option<&BTreeSet<String>> {
        self.dependencies.get(package)
    }

    /// Reverse dependency graph of this snapshot's nested listing.
    pub fn dependency_graph(&self) -> DependencyGraph {
        let mut dependents: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (package, deps) in &self.dependencies {
            for dep in deps {
                dependents
                    .entry(dep.clone())
                    .or_default()
                    .insert(package.clone());
            }
        }
        DependencyGraph { dependents }
    }
}

/// Materialised "is depended on by" adjacency.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    dependents: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    /// Packages that list `package` as a direct dependency.
    pub fn dependents_of(&self, package: &str) -> impl Iterator<Item = &str> {
        self.dependents
            .get(package)
            .into_iter()
            .flatten()
            .map(String::as_str)
    }

    /// Transitive closure of `seeds` over the dependents relation.
    ///
    /// Breadth-first worklist; stops once a pass adds nothing new, so
    /// dependency cycles terminate.
    pub fn affected<'s, I>(&self, seeds: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'s str>,
    {
        let mut affected = BTreeSet::new();
        let mut queue = VecDeque::new();
        for seed in seeds {
            if affected.insert(seed.to_string()) {
                queue.push_back(seed.to_string());
            }
        }
        while let Some(package) = queue.pop_front() {
            for dependent in self.dependents_of(&package) {
                if affected.insert(dependent.to_string()) {
                    queue.push_back(dependent.to_string());
                }
            }
        }
        affected
    }
}

/// Packages that changed between two snapshots and everything depending on them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LockfileDiff {
    /// Checksum or checkout metadata differs, or the package was removed.
    pub changed: BTreeSet<String>,
    /// Packages present in the previous snapshot but not the current one.
    pub removed: BTreeSet<String>,
    /// Transitive closure of `changed`, restricted to packages the current
    /// snapshot still tracks.
    pub affected: BTreeSet<String>,
}

impl LockfileDiff {
    /// Diffs `previous` against `current`.
    ///
    /// # Example
    ///
    /// ```
    /// use prebake_sdk::lockfile::{LockSnapshot, LockfileDiff};
    ///
    /// let previous = LockSnapshot::parse("SPEC CHECKSUMS:\n  A: one\n").unwrap();
    /// let current = LockSnapshot::parse("SPEC CHECKSUMS:\n  A: two\n").unwrap();
    /// let diff = LockfileDiff::between(&previous, &current);
    /// assert!(diff.affected.contains("A"));
    /// ```
    pub fn between(previous: &LockSnapshot, current: &LockSnapshot) -> Self {
        let mut changed = BTreeSet::new();

        for (package, checksum) in &current.checksums {
            if previous.checksums.get(package) != Some(checksum) {
                changed.insert(package.clone());
            }
        }

        let checkout_keys: BTreeSet<&String> = previous
            .checkout_options
            .keys()
            .chain(current.checkout_options.keys())
            .collect();
        for package in checkout_keys {
            if previous.checkout_options.get(package) != current.checkout_options.get(package) {
                changed.insert(root_package_name(package).to_string());
            }
        }

        let removed: BTreeSet<String> = previous
            .checksums
            .keys()
            .filter(|package| !current.checksums.contains_key(*package))
            .cloned()
            .collect();
        changed.extend(removed.iter().cloned());

        let affected = current
            .dependency_graph()
            .affected(changed.iter().map(String::as_str))
            .into_iter()
            .filter(|package| current.is_tracked(package))
            .collect();

        Self {
            changed,
            removed,
            affected,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREVIOUS: &str = r#"
PODS:
  - A (1.0)
  - B (2.0)
  - C (1.0):
    - B (~> 2.0)

DEPENDENCIES:
  - A
  - C

SPEC CHECKSUMS:
  A: csum1
  B: csum2
  C: csum4

COCOAPODS: 1.12.1
"#;

    const CURRENT: &str = r#"
PODS:
  - A (1.0)
  - B (2.1)
  - C (1.0):
    - B (~> 2.0)

SPEC CHECKSUMS:
  A: csum1
  B: csum3
  C: csum4
"#;

    #[test]
    fn test_parse_nested_listing_and_subspecs() {
        let snapshot = LockSnapshot::parse(
            r#"
PODS:
  - Firebase/Core (10.0.0):
    - Firebase/CoreOnly
    - FirebaseAnalytics (~> 10.0)
  - Firebase/CoreOnly (10.0.0)
  - FirebaseAnalytics (10.0.0)
SPEC CHECKSUMS:
  Firebase: aaa
  FirebaseAnalytics: bbb
"#,
        )
        .unwrap();

        let deps = snapshot.dependencies_of("Firebase").unwrap();
        assert_eq!(deps.iter().collect::<Vec<_>>(), vec!["FirebaseAnalytics"]);
        assert!(snapshot.is_tracked("Firebase"));
        assert_eq!(snapshot.packages().count(), 2);
    }

    #[test]
    fn test_empty_document_is_empty_snapshot() {
        assert_eq!(LockSnapshot::parse("").unwrap(), LockSnapshot::default());
        assert_eq!(LockSnapshot::load_or_empty(None).unwrap(), LockSnapshot::default());
    }

    #[test]
    fn test_invalid_yaml_is_error() {
        let err = LockSnapshot::parse("PODS: [unterminated").unwrap_err();
        assert!(matches!(err, PrebakeError::Yaml(_)));
    }

    #[test]
    fn test_checksum_change_propagates_to_dependents() {
        let previous = LockSnapshot::parse(PREVIOUS).unwrap();
        let current = LockSnapshot::parse(CURRENT).unwrap();

        let diff = LockfileDiff::between(&previous, &current);

        assert_eq!(diff.changed, BTreeSet::from(["B".to_string()]));
        assert_eq!(
            diff.affected,
            BTreeSet::from(["B".to_string(), "C".to_string()])
        );
        assert!(diff.removed.is_empty());
    }

    #[test]
    fn test_identical_snapshots_have_no_changes() {
        let snapshot = LockSnapshot::parse(CURRENT).unwrap();
        let diff = LockfileDiff::between(&snapshot, &snapshot);
        assert!(diff.is_empty());
        assert!(diff.affected.is_empty());
    }

    #[test]
    fn test_checkout_option_change_is_detected() {
        let previous = LockSnapshot::parse(
            "SPEC CHECKSUMS:\n  A: x\nCHECKOUT OPTIONS:\n  A:\n    :commit: abc\n    :git: https://example.com/A.git\n",
        )
        .unwrap();
        let current = LockSnapshot::parse(
            "SPEC CHECKSUMS:\n  A: x\nCHECKOUT OPTIONS:\n  A:\n    :commit: def\n    :git: https://example.com/A.git\n",
        )
        .unwrap();

        let diff = LockfileDiff::between(&previous, &current);
        assert_eq!(diff.affected, BTreeSet::from(["A".to_string()]));
    }

    #[test]
    fn test_removed_package_is_changed_but_not_affected() {
        let previous = LockSnapshot::parse(
            "PODS:\n  - A (1.0)\n  - B (1.0):\n    - A\nSPEC CHECKSUMS:\n  A: x\n  B: y\n",
        )
        .unwrap();
        let current = LockSnapshot::parse(
            "PODS:\n  - B (1.0)\nSPEC CHECKSUMS:\n  B: y\n",
        )
        .unwrap();

        let diff = LockfileDiff::between(&previous, &current);
        assert_eq!(diff.removed, BTreeSet::from(["A".to_string()]));
        assert!(diff.changed.contains("A"));
        assert!(diff.affected.is_empty());
    }

    #[test]
    fn test_closure_is_transitive_and_excludes_unreachable() {
        let snapshot = LockSnapshot::parse(
            r#"
PODS:
  - A (1.0)
  - B (1.0):
    - A
  - C (1.0):
    - B
  - D (1.0):
    - C
  - E (1.0)
SPEC CHECKSUMS:
  A: a
  B: b
  C: c
  D: d
  E: e
"#,
        )
        .unwrap();

        let affected = snapshot.dependency_graph().affected(["A"]);
        assert_eq!(affected.len(), 4);
        assert!(!affected.contains("E"));
    }

    #[test]
    fn test_closure_terminates_on_cycles() {
        let snapshot = LockSnapshot::parse(
            "PODS:\n  - A (1.0):\n    - B\n  - B (1.0):\n    - A\n",
        )
        .unwrap();
        let affected = snapshot.dependency_graph().affected(["A"]);
        assert_eq!(affected, BTreeSet::from(["A".to_string(), "B".to_string()]));
    }
}
