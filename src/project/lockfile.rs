//! Lockfile model
//!
//! The lockfile (`Kiln.lock`) pins every package in the resolved graph to
//! an exact version and content checksum. Same lockfile = same dependency
//! artifact.

use crate::cache::store::write_atomic;
use crate::error::{KilnError, KilnResult};
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::Path;
use tracing::debug;

/// Lockfile name at the project root
pub const LOCKFILE: &str = "Kiln.lock";

/// Current lockfile format version
const LOCKFILE_VERSION: u32 = 1;

/// Resolved, pinned dependency graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lockfile {
    /// Lockfile format version
    pub version: u32,

    /// Locked packages, sorted by name
    #[serde(default, rename = "package")]
    pub packages: Vec<LockedPackage>,
}

/// A pinned package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedPackage {
    /// Package name
    pub name: String,

    /// Exact version
    pub version: Version,

    /// Content checksum from the registry
    pub checksum: String,

    /// Requirements this package places on other packages
    #[serde(default)]
    pub dependencies: BTreeMap<String, VersionReq>,
}

impl Lockfile {
    /// Build a lockfile from packages; order of input does not matter
    pub fn from_packages(mut packages: Vec<LockedPackage>) -> Self {
        packages.sort_by(|a, b| a.name.cmp(&b.name));
        Self {
            version: LOCKFILE_VERSION,
            packages,
        }
    }

    /// Read the lockfile from the project directory, if present
    pub async fn load(project_dir: &Path) -> KilnResult<Option<Self>> {
        let path = project_dir.join(LOCKFILE);
        if !path.exists() {
            return Ok(None);
        }

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| KilnError::io(format!("reading lockfile {}", path.display()), e))?;

        let lockfile: Self = toml::from_str(&content).map_err(|e| KilnError::LockfileInvalid {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        if lockfile.version != LOCKFILE_VERSION {
            return Err(KilnError::LockfileInvalid {
                path,
                reason: format!(
                    "unsupported lockfile version {} (expected {})",
                    lockfile.version, LOCKFILE_VERSION
                ),
            });
        }

        Ok(Some(lockfile))
    }

    /// Write the lockfile to the project directory
    pub async fn save(&self, project_dir: &Path) -> KilnResult<()> {
        let path = project_dir.join(LOCKFILE);
        let content = toml::to_string_pretty(self)?;
        write_atomic(&path, content.as_bytes()).await?;
        debug!("Wrote {} ({} packages)", path.display(), self.packages.len());
        Ok(())
    }

    /// Look up a locked package by name
    pub fn get(&self, name: &str) -> Option<&LockedPackage> {
        self.packages.iter().find(|p| p.name == name)
    }

    /// Whether this lockfile already satisfies the given root requirements.
    ///
    /// Every root requirement must have a matching entry, every recorded
    /// transitive requirement must match the locked version of its target,
    /// and every entry must be reachable from the roots.
    pub fn satisfies(&self, roots: &BTreeMap<String, VersionReq>) -> bool {
        for (name, req) in roots {
            match self.get(name) {
                Some(locked) if req.matches(&locked.version) => {}
                _ => return false,
            }
        }

        for package in &self.packages {
            for (dep, req) in &package.dependencies {
                match self.get(dep) {
                    Some(locked) if req.matches(&locked.version) => {}
                    _ => return false,
                }
            }
        }

        let mut reachable: BTreeSet<&str> = BTreeSet::new();
        let mut queue: VecDeque<&str> = roots.keys().map(String::as_str).collect();
        while let Some(name) = queue.pop_front() {
            if !reachable.insert(name) {
                continue;
            }
            if let Some(package) = self.get(name) {
                queue.extend(package.dependencies.keys().map(String::as_str));
            }
        }

        reachable.len() == self.packages.len()
    }
}
