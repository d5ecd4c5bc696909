//! Build fingerprints
//!
//! A fingerprint is the SHA-256 of a canonical JSON record describing every
//! input that can change a build's output. Maps are `BTreeMap`s, so key
//! order is fixed and equal inputs always hash equal.

use crate::error::KilnResult;
use crate::project::lockfile::{LockedPackage, Lockfile};
use crate::toolchain::{BuildRecipe, ToolchainIdentity};
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Domain separator mixed into every fingerprint
const FINGERPRINT_DOMAIN: &[u8] = b"kiln-fingerprint/1\0";

/// Content-derived cache key (64 hex chars)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Hash a serializable input record
    fn of<T: Serialize>(input: &T) -> KilnResult<Self> {
        let canonical = serde_json::to_vec(input)?;
        let mut hasher = Sha256::new();
        hasher.update(FINGERPRINT_DOMAIN);
        hasher.update(&canonical);
        Ok(Self(hex::encode(hasher.finalize())))
    }

    /// Arbitrary fingerprint derived from a seed string
    #[cfg(test)]
    pub(crate) fn from_seed(seed: &str) -> Self {
        Self::of(&seed).unwrap()
    }

    /// Full hex digest
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex chars, for display
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything the dependency artifact depends on
#[derive(Debug, Clone, Copy)]
pub struct DependencyInputs<'a> {
    pub lockfile: &'a Lockfile,
    pub constraints: &'a BTreeMap<String, VersionReq>,
    pub extra_inputs: &'a [String],
    pub toolchain: &'a ToolchainIdentity,
    pub recipe: &'a BuildRecipe,
    pub platform: &'a str,
    pub env: &'a BTreeMap<String, String>,
}

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Record<'a> {
    Dependencies {
        packages: &'a [LockedPackage],
        constraints: &'a BTreeMap<String, VersionReq>,
        extra_inputs: &'a [String],
        toolchain: &'a ToolchainIdentity,
        build: &'a BuildRecipe,
        platform: &'a str,
        env: &'a BTreeMap<String, String>,
    },
    Project {
        dependencies: &'a str,
        snapshot: &'a str,
        package: &'a str,
        version: &'a Version,
        build: &'a BuildRecipe,
    },
    Check {
        name: &'a str,
        project: &'a str,
        command: &'a [String],
        data_version: Option<&'a str>,
    },
}

/// Fingerprint of the dependency graph build
pub fn fingerprint_deps(inputs: &DependencyInputs<'_>) -> KilnResult<Fingerprint> {
    Fingerprint::of(&Record::Dependencies {
        packages: &inputs.lockfile.packages,
        constraints: inputs.constraints,
        extra_inputs: inputs.extra_inputs,
        toolchain: inputs.toolchain,
        build: inputs.recipe,
        platform: inputs.platform,
        env: inputs.env,
    })
}

/// Fingerprint of the full project build: the dependency fingerprint plus
/// the source snapshot hash, package identity and project build recipe
pub fn fingerprint_project(
    deps: &Fingerprint,
    snapshot_hash: &str,
    package: &str,
    version: &Version,
    recipe: &BuildRecipe,
) -> KilnResult<Fingerprint> {
    Fingerprint::of(&Record::Project {
        dependencies: deps.as_str(),
        snapshot: snapshot_hash,
        package,
        version,
        build: recipe,
    })
}

/// Cache key of one check against one project build.
///
/// The check's external data version lives here and nowhere else, so a new
/// advisory database only invalidates that check.
pub fn check_key(
    name: &str,
    project: &Fingerprint,
    command: &[String],
    data_version: Option<&str>,
) -> KilnResult<Fingerprint> {
    Fingerprint::of(&Record::Check {
        name,
        project: project.as_str(),
        command,
        data_version,
    })
}
