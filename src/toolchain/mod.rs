//! Language toolchain abstraction
//!
//! Kiln never compiles anything itself. Builds and checks are delegated to
//! a [`Toolchain`]; the production implementation runs configured commands
//! ([`CommandToolchain`]), tests substitute a scripted fake.

mod command;
#[cfg(test)]
pub(crate) mod scripted;

pub use command::CommandToolchain;

use crate::config::schema::ToolchainConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Max number of output lines kept as diagnostics
const DIAGNOSTIC_TAIL_LINES: usize = 50;

/// Toolchain identity folded into dependency fingerprints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolchainIdentity {
    pub name: String,
    pub version: String,
}

impl fmt::Display for ToolchainIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.version)
    }
}

/// How a toolchain turns its inputs into an artifact, beyond the locked
/// graph and the sources. Folded into fingerprints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildRecipe {
    pub command: Vec<String>,
    /// Variable the output directory is passed through
    pub target_dir_env: String,
    /// Generated files (path -> content)
    pub stubs: BTreeMap<String, String>,
    /// SHA-256 of each project file the build copies; `None` when absent
    pub files: BTreeMap<String, Option<String>>,
}

/// Compile the dependency graph only
#[derive(Debug, Clone)]
pub struct DependencyBuildRequest {
    /// Project root the manifest files are taken from
    pub project_dir: PathBuf,
    /// Dependency fingerprint being built
    pub fingerprint: String,
    /// Directory owned by this build; replaced wholesale on every attempt
    pub output_dir: PathBuf,
    /// Environment for the toolchain process
    pub env: BTreeMap<String, String>,
}

/// Compile the project on top of a dependency artifact
#[derive(Debug, Clone)]
pub struct ProjectBuildRequest {
    pub project_dir: PathBuf,
    pub fingerprint: String,
    /// Output directory of the dependency artifact (read-only)
    pub deps_output: PathBuf,
    pub output_dir: PathBuf,
    pub env: BTreeMap<String, String>,
}

/// Run one named check against a project artifact
#[derive(Debug, Clone)]
pub struct CheckRequest {
    pub name: String,
    pub command: Vec<String>,
    pub project_dir: PathBuf,
    /// Output directory of the project artifact (read-only)
    pub project_output: PathBuf,
    /// Private working directory for this check run
    pub scratch_dir: PathBuf,
    pub env: BTreeMap<String, String>,
}

/// A successful build
#[derive(Debug, Clone, Default)]
pub struct BuildOutput {
    /// Opaque artifact blob stored in the cache
    pub payload: Vec<u8>,
    /// Toolchain output worth keeping (warnings)
    pub diagnostics: Vec<String>,
}

/// A failed build, with toolchain diagnostics
#[derive(Debug, Clone, Default)]
pub struct ToolFailure {
    pub diagnostics: Vec<String>,
}

impl ToolFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            diagnostics: vec![message.into()],
        }
    }
}

/// What happened when a check was run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckRun {
    /// Ran and found nothing
    Passed { diagnostics: Vec<String> },
    /// Ran and found violations
    Violations { diagnostics: Vec<String> },
    /// Could not run (tool missing, data unreachable)
    Unavailable { reason: String },
}

/// External build/check capability
#[async_trait]
pub trait Toolchain: Send + Sync {
    /// Name and version, part of every dependency fingerprint
    fn identity(&self) -> ToolchainIdentity;

    /// Recipe of the dependency build for the project at `project_dir`
    fn dependency_recipe(&self, project_dir: &Path) -> std::io::Result<BuildRecipe>;

    /// Recipe of the project build
    fn project_recipe(&self) -> BuildRecipe;

    /// Compile every dependency and no project code
    async fn build_dependencies(
        &self,
        request: &DependencyBuildRequest,
    ) -> Result<BuildOutput, ToolFailure>;

    /// Compile the project
    async fn build_project(&self, request: &ProjectBuildRequest) -> Result<BuildOutput, ToolFailure>;

    /// Run a check
    async fn run_check(&self, request: &CheckRequest) -> CheckRun;

    /// Resolve the version of a check's external data by running `command`
    async fn data_version(
        &self,
        command: &[String],
        project_dir: &Path,
        env: &BTreeMap<String, String>,
    ) -> Result<String, String>;
}

/// Create the process-backed toolchain from configuration
pub fn create_toolchain(config: &ToolchainConfig) -> Arc<dyn Toolchain> {
    Arc::new(CommandToolchain::new(config.clone()))
}

/// Platform string `<arch>-<os>` for the running host
pub fn host_platform() -> String {
    format!("{}-{}", std::env::consts::ARCH, std::env::consts::OS)
}

/// Keep the useful tail of process output as diagnostics.
///
/// Combines stdout and stderr, then returns the last
/// `DIAGNOSTIC_TAIL_LINES` lines.
pub(crate) fn diagnostic_tail(stdout: &str, stderr: &str) -> Vec<String> {
    let lines: Vec<&str> = stdout.lines().chain(stderr.lines()).collect();
    let start = lines.len().saturating_sub(DIAGNOSTIC_TAIL_LINES);
    lines[start..].iter().map(|l| l.to_string()).collect()
}
