//! In-process toolchain for tests
//!
//! Counts every invocation and returns scripted outcomes, so caching and
//! coalescing behaviour can be asserted without a real compiler.

use super::{
    BuildOutput, BuildRecipe, CheckRequest, CheckRun, DependencyBuildRequest, ProjectBuildRequest,
    ToolFailure, Toolchain, ToolchainIdentity,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Scripted result of a check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Scripted {
    Pass,
    Fail,
    Unavailable,
}

pub(crate) struct ScriptedToolchain {
    version: String,
    delay: Duration,
    deps_builds: AtomicUsize,
    project_builds: AtomicUsize,
    fail_deps: AtomicBool,
    fail_project: AtomicBool,
    checks: Mutex<HashMap<String, Scripted>>,
    check_runs: Mutex<HashMap<String, usize>>,
    data_versions: Mutex<HashMap<String, String>>,
    /// File rewritten while the next project build runs
    mid_build_edit: Mutex<Option<(PathBuf, String)>>,
}

impl ScriptedToolchain {
    pub(crate) fn new() -> Self {
        Self {
            version: "1.82.0".to_string(),
            delay: Duration::from_millis(20),
            deps_builds: AtomicUsize::new(0),
            project_builds: AtomicUsize::new(0),
            fail_deps: AtomicBool::new(false),
            fail_project: AtomicBool::new(false),
            checks: Mutex::new(HashMap::new()),
            check_runs: Mutex::new(HashMap::new()),
            data_versions: Mutex::new(HashMap::new()),
            mid_build_edit: Mutex::new(None),
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn script_check(&self, name: &str, outcome: Scripted) {
        self.checks.lock().unwrap().insert(name.to_string(), outcome);
    }

    /// Set the output of a data-version command (keyed by the joined command)
    pub(crate) fn set_data_version(&self, command: &str, version: &str) {
        self.data_versions
            .lock()
            .unwrap()
            .insert(command.to_string(), version.to_string());
    }

    pub(crate) fn fail_dependencies(&self, fail: bool) {
        self.fail_deps.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn edit_during_project_build(&self, path: PathBuf, content: &str) {
        *self.mid_build_edit.lock().unwrap() = Some((path, content.to_string()));
    }

    pub(crate) fn fail_project(&self, fail: bool) {
        self.fail_project.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn deps_builds(&self) -> usize {
        self.deps_builds.load(Ordering::SeqCst)
    }

    pub(crate) fn project_builds(&self) -> usize {
        self.project_builds.load(Ordering::SeqCst)
    }

    pub(crate) fn check_runs(&self, name: &str) -> usize {
        self.check_runs.lock().unwrap().get(name).copied().unwrap_or(0)
    }

    async fn produce(&self, output_dir: &Path, what: &str, fingerprint: &str) -> BuildOutput {
        tokio::time::sleep(self.delay).await;
        tokio::fs::create_dir_all(output_dir.join("target")).await.unwrap();
        tokio::fs::write(output_dir.join("target").join(what), fingerprint)
            .await
            .unwrap();
        BuildOutput {
            payload: format!("{}:{}", what, fingerprint).into_bytes(),
            diagnostics: vec![],
        }
    }
}

#[async_trait]
impl Toolchain for ScriptedToolchain {
    fn identity(&self) -> ToolchainIdentity {
        ToolchainIdentity {
            name: "scripted".to_string(),
            version: self.version.clone(),
        }
    }

    fn dependency_recipe(&self, _project_dir: &Path) -> std::io::Result<BuildRecipe> {
        Ok(BuildRecipe {
            command: vec!["scripted-deps".to_string()],
            ..BuildRecipe::default()
        })
    }

    fn project_recipe(&self) -> BuildRecipe {
        BuildRecipe {
            command: vec!["scripted-project".to_string()],
            ..BuildRecipe::default()
        }
    }

    async fn build_dependencies(
        &self,
        request: &DependencyBuildRequest,
    ) -> Result<BuildOutput, ToolFailure> {
        self.deps_builds.fetch_add(1, Ordering::SeqCst);
        if self.fail_deps.load(Ordering::SeqCst) {
            tokio::time::sleep(self.delay).await;
            return Err(ToolFailure::new("error: failed to compile `serde`"));
        }
        Ok(self.produce(&request.output_dir, "deps", &request.fingerprint).await)
    }

    async fn build_project(&self, request: &ProjectBuildRequest) -> Result<BuildOutput, ToolFailure> {
        self.project_builds.fetch_add(1, Ordering::SeqCst);
        if self.fail_project.load(Ordering::SeqCst) {
            tokio::time::sleep(self.delay).await;
            return Err(ToolFailure::new("error[E0308]: mismatched types"));
        }
        let edit = self.mid_build_edit.lock().unwrap().take();
        if let Some((path, content)) = edit {
            tokio::fs::write(path, content).await.unwrap();
        }
        Ok(self.produce(&request.output_dir, "project", &request.fingerprint).await)
    }

    async fn run_check(&self, request: &CheckRequest) -> CheckRun {
        *self
            .check_runs
            .lock()
            .unwrap()
            .entry(request.name.clone())
            .or_insert(0) += 1;
        tokio::time::sleep(self.delay).await;

        let scripted = self
            .checks
            .lock()
            .unwrap()
            .get(&request.name)
            .copied()
            .unwrap_or(Scripted::Pass);
        match scripted {
            Scripted::Pass => CheckRun::Passed {
                diagnostics: vec![],
            },
            Scripted::Fail => CheckRun::Violations {
                diagnostics: vec![format!("{}: 1 violation", request.name)],
            },
            Scripted::Unavailable => CheckRun::Unavailable {
                reason: format!("{}: tool not installed", request.name),
            },
        }
    }

    async fn data_version(
        &self,
        command: &[String],
        _project_dir: &Path,
        _env: &BTreeMap<String, String>,
    ) -> Result<String, String> {
        self.data_versions
            .lock()
            .unwrap()
            .get(&command.join(" "))
            .cloned()
            .ok_or_else(|| format!("{}: data source unreachable", command.join(" ")))
    }
}
