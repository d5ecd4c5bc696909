//! Build and verification pipeline
//!
//! Wires the whole data flow:
//!
//! ```text
//! Kiln.toml ─► resolve ─► Kiln.lock ─┐
//!                                    ├─► deps fingerprint ─► DependencyCache ─┐
//! toolchain + platform + [env] ──────┘                                        │
//! source snapshot ──────────────────────► full fingerprint ─► ProjectBuilder ◄┘
//!                                                                  │
//!                                           CheckOrchestrator ◄────┘
//! ```
//!
//! The lock step runs before the snapshot is taken, so a freshly written
//! `Kiln.lock` is already part of the first build's inputs.

pub mod artifact;
pub mod checks;
pub mod deps;
pub mod project;
pub mod shell;

pub use artifact::Artifact;
pub use checks::{CheckOrchestrator, CheckOutcome, CheckReport, CheckResult};
pub use deps::DependencyCache;
pub use project::ProjectBuilder;
pub use shell::ShellEnvironment;

use crate::cache::{ArtifactStore, DependencyInputs, Fingerprint};
use crate::config::{CheckConfig, Config, ConfigManager};
use crate::error::{KilnError, KilnResult};
use crate::journal::Journal;
use crate::project::{
    resolve, ExclusionRules, Lockfile, Manifest, Registry, Resolution, SourceSnapshot,
};
use crate::toolchain::{host_platform, Toolchain};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Every fingerprint of the current project state
#[derive(Debug, Clone)]
pub struct Fingerprints {
    pub snapshot: String,
    pub files: usize,
    pub deps: Fingerprint,
    pub project: Fingerprint,
}

/// Outcome of a successful build
#[derive(Debug, Clone)]
pub struct BuildResult {
    pub manifest: Manifest,
    pub resolution: Resolution,
    pub snapshot: SourceSnapshot,
    pub deps: Arc<Artifact>,
    pub project: Arc<Artifact>,
}

/// The pipeline for one project
pub struct Pipeline {
    config: Config,
    project_dir: PathBuf,
    platform: String,
    /// Declared variables, fingerprinted
    declared_env: BTreeMap<String, String>,
    /// Declared plus passthrough variables, handed to the toolchain
    env: BTreeMap<String, String>,
    store: ArtifactStore,
    toolchain: Arc<dyn Toolchain>,
    deps: DependencyCache,
    project: ProjectBuilder,
    checks: CheckOrchestrator,
}

impl Pipeline {
    /// Create a pipeline using the configured (or default) cache directory
    pub fn new(config: Config, project_dir: impl Into<PathBuf>, toolchain: Arc<dyn Toolchain>) -> Self {
        let project_dir = project_dir.into();
        let cache_dir = ConfigManager::cache_dir(&config, &project_dir);
        Self::with_cache_dir(config, project_dir, toolchain, cache_dir)
    }

    /// Create a pipeline caching into `cache_dir`, taken relative to the
    /// project root when not absolute
    pub fn with_cache_dir(
        config: Config,
        project_dir: impl Into<PathBuf>,
        toolchain: Arc<dyn Toolchain>,
        cache_dir: impl Into<PathBuf>,
    ) -> Self {
        let project_dir = project_dir.into();
        let cache_dir = project_dir.join(cache_dir.into());
        let store = ArtifactStore::new(&cache_dir);
        let journal = Journal::new(&cache_dir, config.general.journal);

        let platform = config.toolchain.platform.clone().unwrap_or_else(host_platform);
        let declared_env = config.env.vars.clone();
        let mut env = declared_env.clone();
        for name in &config.env.passthrough {
            if let Ok(value) = std::env::var(name) {
                env.entry(name.clone()).or_insert(value);
            }
        }
        debug!(
            "Pipeline for {} on {} (cache {})",
            project_dir.display(),
            platform,
            cache_dir.display()
        );

        Self {
            deps: DependencyCache::new(store.clone(), Arc::clone(&toolchain), journal.clone()),
            project: ProjectBuilder::new(store.clone(), Arc::clone(&toolchain), journal.clone()),
            checks: CheckOrchestrator::new(store.clone(), Arc::clone(&toolchain), journal),
            config,
            project_dir,
            platform,
            declared_env,
            env,
            store,
            toolchain,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Environment handed to every toolchain invocation
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Read the manifest and make sure `Kiln.lock` satisfies it.
    ///
    /// The registry snapshot is only read when the lockfile is missing or
    /// stale; a changed lockfile is written back.
    pub async fn lock(&self) -> KilnResult<(Manifest, Resolution)> {
        self.ensure_project_dir()?;

        let manifest = Manifest::load(&self.project_dir).await?;
        manifest.check_toolchain(&self.toolchain.identity().version)?;

        let roots = manifest.dependencies_for(&self.platform);
        let existing = Lockfile::load(&self.project_dir).await?;
        let stale = existing.as_ref().map_or(true, |lock| !lock.satisfies(&roots));

        let registry = match (&self.config.registry.index, stale) {
            (Some(index), true) => Some(Registry::load(&self.project_dir.join(index)).await?),
            _ => None,
        };
        if let Some(registry) = &registry {
            debug!("Resolving against registry snapshot '{}'", registry.snapshot());
        }

        let resolution = resolve(
            &manifest.package.name,
            &roots,
            existing.as_ref(),
            registry.as_ref(),
        )?;
        if resolution.changed {
            resolution.lockfile.save(&self.project_dir).await?;
            info!("Wrote lockfile with {} packages", resolution.lockfile.packages.len());
        }

        Ok((manifest, resolution))
    }

    /// Capture the filtered source snapshot
    pub async fn snapshot(&self) -> KilnResult<SourceSnapshot> {
        let mut rules = ExclusionRules::from_config(&self.config.snapshot);
        if let Some(inside) = self.cache_inside_project() {
            debug!("Cache lives inside the project, excluding {}", inside.display());
            rules = rules.with_prefix(inside);
        }
        SourceSnapshot::capture(&self.project_dir, &rules).await
    }

    /// Cache root relative to the project root, when nested in it
    fn cache_inside_project(&self) -> Option<PathBuf> {
        let root = normalize(self.store.root());
        let project = normalize(&self.project_dir);
        root.strip_prefix(&project)
            .ok()
            .filter(|inside| !inside.as_os_str().is_empty())
            .map(Path::to_path_buf)
    }

    /// Dependency fingerprint for a locked manifest
    pub fn deps_fingerprint(&self, manifest: &Manifest, lockfile: &Lockfile) -> KilnResult<Fingerprint> {
        let constraints = manifest.dependencies_for(&self.platform);
        let extra_inputs = manifest.extra_inputs_for(&self.platform);
        let toolchain = self.toolchain.identity();
        let recipe = self
            .toolchain
            .dependency_recipe(&self.project_dir)
            .map_err(|e| KilnError::io("failed to read dependency build inputs", e))?;

        self.deps.fingerprint(&DependencyInputs {
            lockfile,
            constraints: &constraints,
            extra_inputs: &extra_inputs,
            toolchain: &toolchain,
            recipe: &recipe,
            platform: &self.platform,
            env: &self.declared_env,
        })
    }

    /// Compute every fingerprint without building anything
    pub async fn fingerprints(&self) -> KilnResult<Fingerprints> {
        let (manifest, resolution) = self.lock().await?;
        let snapshot = self.snapshot().await?;
        let deps = self.deps_fingerprint(&manifest, &resolution.lockfile)?;
        let project = self.project.fingerprint(&deps, &snapshot, &manifest)?;

        Ok(Fingerprints {
            snapshot: snapshot.hash().to_string(),
            files: snapshot.entries().len(),
            deps,
            project,
        })
    }

    /// Lock, build dependencies, then build the project
    pub async fn build(&self) -> KilnResult<BuildResult> {
        let (manifest, resolution) = self.lock().await?;
        let snapshot = self.snapshot().await?;

        let deps_fp = self.deps_fingerprint(&manifest, &resolution.lockfile)?;
        let deps = self
            .deps
            .get_or_build(&deps_fp, &self.project_dir, &self.env)
            .await?;

        let project_fp = self.project.fingerprint(&deps.fingerprint, &snapshot, &manifest)?;
        let project = self.project.build(&project_fp, &deps, &snapshot, &self.env).await?;

        info!(
            "Built {} {} ({})",
            manifest.package.name,
            manifest.package.version,
            project.fingerprint.short()
        );

        Ok(BuildResult {
            manifest,
            resolution,
            snapshot,
            deps,
            project,
        })
    }

    /// Resolve check names against the configuration
    pub fn select_checks(
        &self,
        requested: &[String],
        skip: &[String],
    ) -> KilnResult<Vec<(String, CheckConfig)>> {
        self.checks.select(&self.config.checks, requested, skip)
    }

    /// Run `selected` checks against a finished build
    pub async fn run_checks(
        &self,
        selected: &[(String, CheckConfig)],
        build: &BuildResult,
        on_result: &(dyn Fn(&CheckResult) + Sync),
    ) -> CheckReport {
        self.checks
            .run_all_with(selected, &build.project, &self.project_dir, &self.env, on_result)
            .await
    }

    /// Build, then run the selected checks against the project artifact.
    ///
    /// Check names are validated before anything is built. The report holds
    /// every outcome; use [`CheckReport::ensure_passed`] to turn it into an
    /// error.
    pub async fn check(
        &self,
        requested: &[String],
        skip: &[String],
    ) -> KilnResult<(BuildResult, CheckReport)> {
        let selected = self.select_checks(requested, skip)?;
        let build = self.build().await?;
        let report = self.run_checks(&selected, &build, &|_| {}).await;
        Ok((build, report))
    }

    /// Assemble the interactive environment on the cached dependency artifact
    pub async fn provision(&self) -> KilnResult<ShellEnvironment> {
        let (manifest, resolution) = self.lock().await?;
        let deps_fp = self.deps_fingerprint(&manifest, &resolution.lockfile)?;
        let deps = self
            .deps
            .get_or_build(&deps_fp, &self.project_dir, &self.env)
            .await?;

        let host_path = std::env::var("PATH").ok();
        ShellEnvironment::assemble(
            &self.config,
            &self.project_dir,
            &self.env,
            deps.as_ref().clone(),
            host_path.as_deref(),
        )
    }

    fn ensure_project_dir(&self) -> KilnResult<()> {
        if self.project_dir.is_dir() {
            Ok(())
        } else {
            Err(KilnError::InvalidPath {
                path: self.project_dir.clone(),
                reason: "project directory does not exist".to_string(),
            })
        }
    }
}

/// Canonical form of `path`, or its lexical normal form when it does not
/// exist yet
fn normalize(path: &Path) -> PathBuf {
    if let Ok(canonical) = std::fs::canonicalize(path) {
        return canonical;
    }
    let mut normal = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normal.pop();
            }
            other => normal.push(other),
        }
    }
    normal
}
