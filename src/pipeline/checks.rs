//! Check orchestrator
//!
//! Runs named checks against a project artifact. Every check is cached on
//! its own key (check name, project fingerprint, command, external data
//! version) and fails on its own; all requested checks always run and the
//! report collects every outcome.
//!
//! Outcomes:
//!
//! | Outcome | Meaning                          | Cached |
//! |---------|----------------------------------|--------|
//! | `pass`  | ran, found nothing               | yes    |
//! | `fail`  | ran, found violations            | yes    |
//! | `error` | could not run (tool, data source) | no     |

use super::artifact::Artifact;
use crate::cache::{check_key, ArtifactStore, Fingerprint, Flight, Namespace};
use crate::config::schema::{CheckConfig, ChecksConfig};
use crate::error::{KilnError, KilnResult};
use crate::journal::Journal;
use crate::toolchain::{CheckRequest, CheckRun, Toolchain};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Result of one check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckOutcome {
    Pass,
    Fail,
    Error,
}

impl fmt::Display for CheckOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Error => "error",
        })
    }
}

/// Recorded outcome of one check against one project build
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    /// Project fingerprint the check ran against
    pub fingerprint: Fingerprint,
    /// Cache key; absent when the key could not be computed
    pub key: Option<Fingerprint>,
    pub data_version: Option<String>,
    pub outcome: CheckOutcome,
    pub diagnostics: Vec<String>,
    pub duration_ms: u64,
    /// Served from cache in this run
    #[serde(default)]
    pub cached: bool,
}

impl CheckResult {
    fn error(
        name: &str,
        project: &Fingerprint,
        key: Option<Fingerprint>,
        data_version: Option<String>,
        reason: String,
    ) -> Self {
        Self {
            name: name.to_string(),
            fingerprint: project.clone(),
            key,
            data_version,
            outcome: CheckOutcome::Error,
            diagnostics: vec![reason],
            duration_ms: 0,
            cached: false,
        }
    }
}

/// Aggregate of every check in one orchestration run, in request order
#[derive(Debug, Clone, Default, Serialize)]
pub struct CheckReport {
    pub results: Vec<CheckResult>,
}

impl CheckReport {
    fn names_with(&self, outcome: CheckOutcome) -> Vec<String> {
        self.results
            .iter()
            .filter(|r| r.outcome == outcome)
            .map(|r| r.name.clone())
            .collect()
    }

    pub fn passed(&self) -> Vec<String> {
        self.names_with(CheckOutcome::Pass)
    }

    pub fn failed(&self) -> Vec<String> {
        self.names_with(CheckOutcome::Fail)
    }

    pub fn errored(&self) -> Vec<String> {
        self.names_with(CheckOutcome::Error)
    }

    /// `Pass` only if every check passed
    pub fn status(&self) -> CheckOutcome {
        if self.results.iter().all(|r| r.outcome == CheckOutcome::Pass) {
            CheckOutcome::Pass
        } else {
            CheckOutcome::Fail
        }
    }

    /// Turn a failing report into an error naming every failed and errored check
    pub fn ensure_passed(&self) -> KilnResult<()> {
        match self.status() {
            CheckOutcome::Pass => Ok(()),
            _ => Err(KilnError::ChecksFailed {
                failed: self.failed(),
                errored: self.errored(),
            }),
        }
    }

    /// Look up a result by check name
    pub fn get(&self, name: &str) -> Option<&CheckResult> {
        self.results.iter().find(|r| r.name == name)
    }
}

/// Runs and caches checks
pub struct CheckOrchestrator {
    store: ArtifactStore,
    toolchain: Arc<dyn Toolchain>,
    journal: Journal,
    flight: Flight<CheckResult>,
}

impl CheckOrchestrator {
    pub fn new(store: ArtifactStore, toolchain: Arc<dyn Toolchain>, journal: Journal) -> Self {
        Self {
            store,
            toolchain,
            journal,
            flight: Flight::new(),
        }
    }

    /// Pick the checks to run.
    ///
    /// With no `requested` names, every enabled check in configured order.
    /// Named checks run even when disabled in config. `skip` always wins.
    pub fn select(
        &self,
        checks: &ChecksConfig,
        requested: &[String],
        skip: &[String],
    ) -> KilnResult<Vec<(String, CheckConfig)>> {
        for name in requested.iter().chain(skip) {
            if checks.get(name).is_none() {
                return Err(KilnError::UnknownCheck(name.clone()));
            }
        }

        let names: Vec<String> = if requested.is_empty() {
            checks
                .names()
                .into_iter()
                .filter(|n| checks.get(n).map(|c| c.enabled).unwrap_or(false))
                .collect()
        } else {
            let mut names = Vec::new();
            for name in requested {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
            names
        };

        Ok(names
            .into_iter()
            .filter(|n| !skip.contains(n))
            .filter_map(|n| checks.get(&n).cloned().map(|c| (n, c)))
            .collect())
    }

    /// Run every selected check concurrently; none short-circuits the others
    pub async fn run_all(
        &self,
        selected: &[(String, CheckConfig)],
        project: &Artifact,
        project_dir: &Path,
        env: &BTreeMap<String, String>,
    ) -> CheckReport {
        self.run_all_with(selected, project, project_dir, env, &|_| {}).await
    }

    /// Like [`run_all`](Self::run_all), calling `on_result` as each check finishes
    pub async fn run_all_with(
        &self,
        selected: &[(String, CheckConfig)],
        project: &Artifact,
        project_dir: &Path,
        env: &BTreeMap<String, String>,
        on_result: &(dyn Fn(&CheckResult) + Sync),
    ) -> CheckReport {
        let runs = selected.iter().map(|(name, check)| async move {
            let result = self.run_check(name, check, project, project_dir, env).await;
            on_result(&result);
            result
        });
        CheckReport {
            results: join_all(runs).await,
        }
    }

    /// Run one check, or return its cached result
    pub async fn run_check(
        &self,
        name: &str,
        check: &CheckConfig,
        project: &Artifact,
        project_dir: &Path,
        env: &BTreeMap<String, String>,
    ) -> CheckResult {
        let project_fp = &project.fingerprint;

        let data_version = match self.data_version(check, project_dir, env).await {
            Ok(version) => version,
            Err(reason) => {
                warn!("Check '{}' cannot resolve its data version: {}", name, reason);
                return CheckResult::error(name, project_fp, None, None, reason);
            }
        };

        let key = match check_key(name, project_fp, &check.command, data_version.as_deref()) {
            Ok(key) => key,
            Err(e) => return CheckResult::error(name, project_fp, None, data_version, e.to_string()),
        };

        if let Some(result) = cached_result(&self.store, &key).await {
            return result;
        }

        let job = CheckJob {
            store: self.store.clone(),
            toolchain: Arc::clone(&self.toolchain),
            journal: self.journal.clone(),
            request: CheckRequest {
                name: name.to_string(),
                command: check.command.clone(),
                project_dir: project_dir.to_path_buf(),
                project_output: project.output_dir.clone(),
                scratch_dir: self.store.scratch_dir(key.as_str()),
                env: env.clone(),
            },
            project: project_fp.clone(),
            key: key.clone(),
            data_version: data_version.clone(),
        };

        match self.flight.run(key.as_str(), move || job.execute()).await {
            Ok(result) => result,
            Err(e) => CheckResult::error(name, project_fp, Some(key), data_version, e.to_string()),
        }
    }

    /// Literal data version, or the output of the data version command
    async fn data_version(
        &self,
        check: &CheckConfig,
        project_dir: &Path,
        env: &BTreeMap<String, String>,
    ) -> Result<Option<String>, String> {
        if let Some(version) = &check.data_version {
            return Ok(Some(version.clone()));
        }
        if check.data_version_command.is_empty() {
            return Ok(None);
        }
        self.toolchain
            .data_version(&check.data_version_command, project_dir, env)
            .await
            .map(Some)
    }
}

/// Everything a shared check execution needs, owned
struct CheckJob {
    store: ArtifactStore,
    toolchain: Arc<dyn Toolchain>,
    journal: Journal,
    request: CheckRequest,
    project: Fingerprint,
    key: Fingerprint,
    data_version: Option<String>,
}

impl CheckJob {
    async fn execute(self) -> CheckResult {
        let CheckJob {
            store,
            toolchain,
            journal,
            request,
            project,
            key,
            data_version,
        } = self;

        // A previous flight may have stored the result after our miss
        if let Some(result) = cached_result(&store, &key).await {
            return result;
        }

        info!("Running check '{}'", request.name);
        let started = Instant::now();
        let run = toolchain.run_check(&request).await;
        let duration_ms = started.elapsed().as_millis() as u64;
        remove_scratch(&request.scratch_dir).await;

        let (outcome, diagnostics) = match run {
            CheckRun::Passed { diagnostics } => (CheckOutcome::Pass, diagnostics),
            CheckRun::Violations { diagnostics } => (CheckOutcome::Fail, diagnostics),
            CheckRun::Unavailable { reason } => (CheckOutcome::Error, vec![reason]),
        };

        let result = CheckResult {
            name: request.name,
            fingerprint: project,
            key: Some(key.clone()),
            data_version,
            outcome,
            diagnostics,
            duration_ms,
            cached: false,
        };

        if outcome != CheckOutcome::Error {
            persist(&store, &key, &result).await;
        }

        journal
            .record(
                "check.completed",
                serde_json::json!({
                    "check": result.name,
                    "key": key.as_str(),
                    "outcome": result.outcome,
                    "duration_ms": duration_ms,
                }),
            )
            .await;

        result
    }
}

async fn persist(store: &ArtifactStore, key: &Fingerprint, result: &CheckResult) {
    let payload = match serde_json::to_vec(result) {
        Ok(payload) => payload,
        Err(e) => {
            warn!("Failed to encode result of check '{}': {}", result.name, e);
            return;
        }
    };
    if let Err(e) = store.put(Namespace::Checks, key.as_str(), &payload, vec![]).await {
        warn!("Failed to cache result of check '{}': {}", result.name, e);
    }
}

async fn cached_result(store: &ArtifactStore, key: &Fingerprint) -> Option<CheckResult> {
    let entry = match store.get(Namespace::Checks, key.as_str()).await {
        Ok(Some(entry)) => entry,
        Ok(None) => return None,
        Err(e) => {
            warn!("Failed to read check result {}: {}", key.short(), e);
            return None;
        }
    };

    match serde_json::from_slice::<CheckResult>(&entry.payload) {
        Ok(mut result) => {
            debug!("Reusing result of check '{}'", result.name);
            result.cached = true;
            Some(result)
        }
        Err(e) => {
            warn!("Discarding undecodable check result {}: {}", key.short(), e);
            let _ = store.remove(Namespace::Checks, key.as_str()).await;
            None
        }
    }
}

async fn remove_scratch(dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(dir).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            debug!("Failed to remove scratch dir {}: {}", dir.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolchain::scripted::{Scripted, ScriptedToolchain};
    use chrono::Utc;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Setup {
        dir: TempDir,
        store: ArtifactStore,
        toolchain: Arc<ScriptedToolchain>,
        orchestrator: Arc<CheckOrchestrator>,
        project: Artifact,
    }

    fn setup() -> Setup {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path().join("cache"));
        let toolchain = Arc::new(ScriptedToolchain::new().with_delay(Duration::from_millis(5)));
        let orchestrator = Arc::new(CheckOrchestrator::new(
            store.clone(),
            toolchain.clone(),
            Journal::disabled(),
        ));
        let project = Artifact {
            fingerprint: Fingerprint::from_seed("project"),
            output_dir: dir.path().join("project-out"),
            payload: vec![],
            diagnostics: vec![],
            created_at: Utc::now(),
            fresh: true,
        };
        Setup {
            dir,
            store,
            toolchain,
            orchestrator,
            project,
        }
    }

    fn check(command: &[&str]) -> CheckConfig {
        CheckConfig {
            command: command.iter().map(|s| s.to_string()).collect(),
            ..CheckConfig::default()
        }
    }

    fn audit(data_version: &str) -> CheckConfig {
        CheckConfig {
            data_version: Some(data_version.to_string()),
            ..check(&["cargo", "audit"])
        }
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn collects_every_outcome() {
        let s = setup();
        s.toolchain.script_check("lint", Scripted::Fail);
        let selected = vec![
            ("lint".to_string(), check(&["cargo", "clippy"])),
            ("fmt".to_string(), check(&["cargo", "fmt"])),
            ("audit".to_string(), audit("db-1")),
        ];

        let report = s
            .orchestrator
            .run_all(&selected, &s.project, s.dir.path(), &BTreeMap::new())
            .await;

        assert_eq!(report.results.len(), 3);
        assert_eq!(report.get("lint").unwrap().outcome, CheckOutcome::Fail);
        assert_eq!(report.get("fmt").unwrap().outcome, CheckOutcome::Pass);
        assert_eq!(report.get("audit").unwrap().outcome, CheckOutcome::Pass);
        assert_eq!(report.status(), CheckOutcome::Fail);
        assert_eq!(report.failed(), vec!["lint"]);
        assert!(matches!(report.ensure_passed(), Err(KilnError::ChecksFailed { .. })));

        let order: Vec<&str> = report.results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(order, vec!["lint", "fmt", "audit"]);
    }

    #[tokio::test]
    async fn reports_each_result_as_it_finishes() {
        let s = setup();
        let selected = vec![
            ("lint".to_string(), check(&["cargo", "clippy"])),
            ("fmt".to_string(), check(&["cargo", "fmt"])),
        ];
        let seen = std::sync::Mutex::new(Vec::new());

        s.orchestrator
            .run_all_with(&selected, &s.project, s.dir.path(), &BTreeMap::new(), &|r| {
                seen.lock().unwrap().push(r.name.clone())
            })
            .await;

        let mut seen = seen.into_inner().unwrap();
        seen.sort();
        assert_eq!(seen, vec!["fmt", "lint"]);
    }

    #[tokio::test]
    async fn pass_and_fail_are_cached() {
        let s = setup();
        s.toolchain.script_check("lint", Scripted::Fail);
        let lint = check(&["cargo", "clippy"]);
        let fmt = check(&["cargo", "fmt"]);
        let env = BTreeMap::new();

        let first = s.orchestrator.run_check("lint", &lint, &s.project, s.dir.path(), &env).await;
        s.orchestrator.run_check("fmt", &fmt, &s.project, s.dir.path(), &env).await;
        let again = s.orchestrator.run_check("lint", &lint, &s.project, s.dir.path(), &env).await;
        s.orchestrator.run_check("fmt", &fmt, &s.project, s.dir.path(), &env).await;

        assert!(!first.cached);
        assert!(again.cached);
        assert_eq!(again.outcome, CheckOutcome::Fail);
        assert_eq!(again.diagnostics, first.diagnostics);
        assert_eq!(s.toolchain.check_runs("lint"), 1);
        assert_eq!(s.toolchain.check_runs("fmt"), 1);
    }

    #[tokio::test]
    async fn errors_are_not_cached() {
        let s = setup();
        s.toolchain.script_check("license", Scripted::Unavailable);
        let license = check(&["cargo", "deny"]);
        let env = BTreeMap::new();

        let result = s.orchestrator.run_check("license", &license, &s.project, s.dir.path(), &env).await;
        assert_eq!(result.outcome, CheckOutcome::Error);
        assert!(result.diagnostics[0].contains("not installed"));
        assert!(!s.store.contains(Namespace::Checks, result.key.unwrap().as_str()).await);

        s.toolchain.script_check("license", Scripted::Pass);
        let result = s.orchestrator.run_check("license", &license, &s.project, s.dir.path(), &env).await;
        assert_eq!(result.outcome, CheckOutcome::Pass);
        assert_eq!(s.toolchain.check_runs("license"), 2);
    }

    #[tokio::test]
    async fn data_version_change_invalidates_only_that_check() {
        let s = setup();
        let lint = check(&["cargo", "clippy"]);
        let env = BTreeMap::new();

        s.orchestrator.run_check("lint", &lint, &s.project, s.dir.path(), &env).await;
        s.orchestrator.run_check("audit", &audit("db-1"), &s.project, s.dir.path(), &env).await;

        s.orchestrator.run_check("lint", &lint, &s.project, s.dir.path(), &env).await;
        let audit2 = s.orchestrator.run_check("audit", &audit("db-2"), &s.project, s.dir.path(), &env).await;

        assert!(!audit2.cached);
        assert_eq!(audit2.data_version.as_deref(), Some("db-2"));
        assert_eq!(s.toolchain.check_runs("lint"), 1);
        assert_eq!(s.toolchain.check_runs("audit"), 2);
    }

    #[tokio::test]
    async fn data_version_command_feeds_the_key() {
        let s = setup();
        let env = BTreeMap::new();
        let audit = CheckConfig {
            data_version_command: names(&["git", "rev-parse", "HEAD"]),
            ..check(&["cargo", "audit"])
        };

        let unreachable = s.orchestrator.run_check("audit", &audit, &s.project, s.dir.path(), &env).await;
        assert_eq!(unreachable.outcome, CheckOutcome::Error);
        assert!(unreachable.key.is_none());
        assert_eq!(s.toolchain.check_runs("audit"), 0);

        s.toolchain.set_data_version("git rev-parse HEAD", "abc123");
        let result = s.orchestrator.run_check("audit", &audit, &s.project, s.dir.path(), &env).await;
        assert_eq!(result.outcome, CheckOutcome::Pass);
        assert_eq!(result.data_version.as_deref(), Some("abc123"));
    }

    #[tokio::test]
    async fn concurrent_runs_of_one_check_execute_once() {
        let s = setup();
        let lint = check(&["cargo", "clippy"]);

        let mut handles = Vec::new();
        for _ in 0..6 {
            let orchestrator = Arc::clone(&s.orchestrator);
            let lint = lint.clone();
            let project = s.project.clone();
            let dir = s.dir.path().to_path_buf();
            handles.push(tokio::spawn(async move {
                orchestrator
                    .run_check("lint", &lint, &project, &dir, &BTreeMap::new())
                    .await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().outcome, CheckOutcome::Pass);
        }
        assert_eq!(s.toolchain.check_runs("lint"), 1);
    }

    #[tokio::test]
    async fn corrupt_result_is_rerun() {
        let s = setup();
        let lint = check(&["cargo", "clippy"]);
        let env = BTreeMap::new();

        let first = s.orchestrator.run_check("lint", &lint, &s.project, s.dir.path(), &env).await;
        let key = first.key.unwrap();
        s.store
            .put(Namespace::Checks, key.as_str(), b"not json", vec![])
            .await
            .unwrap();

        let again = s.orchestrator.run_check("lint", &lint, &s.project, s.dir.path(), &env).await;
        assert!(!again.cached);
        assert_eq!(s.toolchain.check_runs("lint"), 2);
    }

    #[test]
    fn select_defaults_to_enabled_checks_in_order() {
        let s = setup();
        let mut config = ChecksConfig::default();
        config.defs.get_mut("license").unwrap().enabled = false;

        let selected = s.orchestrator.select(&config, &[], &[]).unwrap();
        let selected: Vec<&str> = selected.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(selected, vec!["lint", "fmt", "audit", "test"]);
    }

    #[test]
    fn select_named_skip_and_unknown() {
        let s = setup();
        let mut config = ChecksConfig::default();
        config.defs.get_mut("license").unwrap().enabled = false;

        let selected = s
            .orchestrator
            .select(&config, &names(&["license", "lint", "lint"]), &[])
            .unwrap();
        let selected: Vec<&str> = selected.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(selected, vec!["license", "lint"]);

        let selected = s.orchestrator.select(&config, &[], &names(&["audit"])).unwrap();
        assert!(selected.iter().all(|(n, _)| n != "audit"));

        let err = s.orchestrator.select(&config, &names(&["nope"]), &[]).unwrap_err();
        assert!(matches!(err, KilnError::UnknownCheck(name) if name == "nope"));
    }

    #[test]
    fn empty_report_passes() {
        let report = CheckReport::default();
        assert_eq!(report.status(), CheckOutcome::Pass);
        assert!(report.ensure_passed().is_ok());
    }
}
