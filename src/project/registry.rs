//! Registry snapshot
//!
//! A registry snapshot is a fixed, local view of the upstream package
//! index. Resolution is deterministic for a given snapshot.

use crate::error::{KilnError, KilnResult};
use semver::{Version, VersionReq};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// A published package version
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryEntry {
    /// Package name
    pub name: String,

    /// Published version
    pub version: Version,

    /// Content checksum
    pub checksum: String,

    /// Requirements on other packages
    #[serde(default)]
    pub dependencies: BTreeMap<String, VersionReq>,
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    snapshot: String,

    #[serde(default, rename = "package")]
    packages: Vec<RegistryEntry>,
}

/// In-memory registry snapshot, versions sorted highest first
#[derive(Debug, Clone, Default)]
pub struct Registry {
    snapshot: String,
    packages: BTreeMap<String, Vec<RegistryEntry>>,
}

impl Registry {
    /// Build a registry from entries
    pub fn from_entries(snapshot: impl Into<String>, entries: Vec<RegistryEntry>) -> Self {
        let mut packages: BTreeMap<String, Vec<RegistryEntry>> = BTreeMap::new();
        for entry in entries {
            packages.entry(entry.name.clone()).or_default().push(entry);
        }
        for versions in packages.values_mut() {
            versions.sort_by(|a, b| b.version.cmp(&a.version));
            versions.dedup_by(|a, b| a.version == b.version);
        }

        Self {
            snapshot: snapshot.into(),
            packages,
        }
    }

    /// Load a registry snapshot index from disk
    pub async fn load(path: &Path) -> KilnResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| KilnError::io(format!("reading registry {}", path.display()), e))?;
        Self::parse(&content).map_err(|reason| KilnError::RegistryInvalid {
            path: path.to_path_buf(),
            reason,
        })
    }

    fn parse(content: &str) -> Result<Self, String> {
        let file: RegistryFile = toml::from_str(content).map_err(|e| e.to_string())?;
        Ok(Self::from_entries(file.snapshot, file.packages))
    }

    /// Snapshot identifier
    pub fn snapshot(&self) -> &str {
        &self.snapshot
    }

    /// All published versions of `name`, highest first
    pub fn versions(&self, name: &str) -> &[RegistryEntry] {
        self.packages.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
}
