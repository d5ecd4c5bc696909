//! Project manifest parsing
//!
//! The manifest (`Kiln.toml`) declares the project identity, dependency
//! constraints, the toolchain requirement and platform-specific extras.
//! It is read once per run and never mutated.

use crate::error::{KilnError, KilnResult};
use semver::{Version, VersionReq};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Manifest file name at the project root
pub const MANIFEST_FILE: &str = "Kiln.toml";

/// Parsed project manifest
#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    /// Project identity
    pub package: PackageMeta,

    /// Dependency constraints for every platform
    #[serde(default)]
    pub dependencies: BTreeMap<String, DependencySpec>,

    /// Platform-specific sections keyed by `<arch>-<os>`
    #[serde(default)]
    pub target: BTreeMap<String, TargetSection>,
}

/// `[package]` section
#[derive(Debug, Clone, Deserialize)]
pub struct PackageMeta {
    /// Project name
    pub name: String,

    /// Project version
    pub version: Version,

    /// Required toolchain version
    #[serde(default)]
    pub toolchain: Option<VersionReq>,
}

/// A dependency constraint, either `"^1.0"` or `{ version = "^1.0" }`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DependencySpec {
    /// Bare version requirement
    Simple(VersionReq),

    /// Table form
    Detailed {
        /// Version requirement
        version: VersionReq,
    },
}

impl DependencySpec {
    /// The version requirement
    pub fn requirement(&self) -> &VersionReq {
        match self {
            Self::Simple(req) => req,
            Self::Detailed { version } => version,
        }
    }
}

/// `[target.<platform>]` section
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TargetSection {
    /// Extra build inputs (system libraries, frameworks) for this platform
    #[serde(default)]
    pub extra_inputs: Vec<String>,

    /// Extra dependencies for this platform
    #[serde(default)]
    pub dependencies: BTreeMap<String, DependencySpec>,
}

impl Manifest {
    /// Read the manifest from the project directory
    pub async fn load(project_dir: &Path) -> KilnResult<Self> {
        let path = project_dir.join(MANIFEST_FILE);
        if !path.exists() {
            return Err(KilnError::ManifestNotFound(path));
        }

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| KilnError::io(format!("reading manifest {}", path.display()), e))?;

        toml::from_str(&content).map_err(|e| KilnError::ManifestInvalid {
            path,
            reason: e.to_string(),
        })
    }

    /// Parse a manifest from a TOML string
    pub fn parse(content: &str) -> KilnResult<Self> {
        toml::from_str(content).map_err(|e| KilnError::ManifestInvalid {
            path: MANIFEST_FILE.into(),
            reason: e.to_string(),
        })
    }

    /// Dependency requirements that apply on `platform`.
    ///
    /// Platform sections add to (and override) the common dependencies.
    pub fn dependencies_for(&self, platform: &str) -> BTreeMap<String, VersionReq> {
        let mut deps: BTreeMap<String, VersionReq> = self
            .dependencies
            .iter()
            .map(|(name, spec)| (name.clone(), spec.requirement().clone()))
            .collect();

        if let Some(section) = self.target.get(platform) {
            for (name, spec) in &section.dependencies {
                deps.insert(name.clone(), spec.requirement().clone());
            }
        }

        deps
    }

    /// Extra build inputs that apply on `platform`, sorted and deduplicated
    pub fn extra_inputs_for(&self, platform: &str) -> Vec<String> {
        let mut inputs = self
            .target
            .get(platform)
            .map(|s| s.extra_inputs.clone())
            .unwrap_or_default();
        inputs.sort();
        inputs.dedup();
        inputs
    }

    /// Fail unless `version` satisfies the manifest's toolchain requirement
    pub fn check_toolchain(&self, version: &str) -> KilnResult<()> {
        let Some(required) = &self.package.toolchain else {
            return Ok(());
        };

        let actual = Version::parse(version).map_err(|e| KilnError::ConfigInvalid {
            path: "toolchain.version".into(),
            reason: format!("'{}' is not a semantic version: {}", version, e),
        })?;

        if required.matches(&actual) {
            Ok(())
        } else {
            Err(KilnError::ToolchainMismatch {
                required: required.to_string(),
                actual: version.to_string(),
            })
        }
    }
}
