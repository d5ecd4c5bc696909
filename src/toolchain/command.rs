//! Process-backed toolchain
//!
//! Runs the configured build and check commands. Dependencies are compiled
//! in a skeleton copy of the project (manifest files plus stub sources), so
//! the dependency artifact never contains project code.

use super::{
    diagnostic_tail, BuildOutput, BuildRecipe, CheckRequest, CheckRun, DependencyBuildRequest,
    ProjectBuildRequest, ToolFailure, Toolchain, ToolchainIdentity,
};
use crate::config::schema::ToolchainConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use tokio::process::Command;
use tracing::{debug, info};

/// Payload stored for a command-built artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildReceipt {
    pub fingerprint: String,
    pub command: Vec<String>,
    pub target_dir: PathBuf,
    pub finished_at: DateTime<Utc>,
}

/// Toolchain that shells out to configured commands
pub struct CommandToolchain {
    config: ToolchainConfig,
}

impl CommandToolchain {
    pub fn new(config: ToolchainConfig) -> Self {
        Self { config }
    }

    /// Run `command` in `dir` with `env` on top of the inherited environment
    async fn exec(
        &self,
        command: &[String],
        dir: &Path,
        env: &BTreeMap<String, String>,
        target_dir: Option<&Path>,
    ) -> std::io::Result<Output> {
        let Some((program, args)) = command.split_first() else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty command",
            ));
        };
        debug!("Executing in {}: {:?}", dir.display(), command);

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(dir)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(target) = target_dir {
            if !self.config.target_dir_env.is_empty() {
                cmd.env(&self.config.target_dir_env, target);
            }
        }

        cmd.output().await
    }

    /// Run a build command, turning every failure mode into diagnostics
    async fn build(
        &self,
        command: &[String],
        dir: &Path,
        env: &BTreeMap<String, String>,
        fingerprint: &str,
        target_dir: &Path,
    ) -> Result<BuildOutput, ToolFailure> {
        let diagnostics = if command.is_empty() {
            debug!("No build command configured, nothing to run");
            Vec::new()
        } else {
            let output = self
                .exec(command, dir, env, Some(target_dir))
                .await
                .map_err(|e| ToolFailure::new(format!("failed to run {}: {}", command.join(" "), e)))?;
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            let diagnostics = diagnostic_tail(&stdout, &stderr);

            if !output.status.success() {
                let mut diagnostics = diagnostics;
                diagnostics.push(exit_description(&output));
                return Err(ToolFailure { diagnostics });
            }
            diagnostics
        };

        let receipt = BuildReceipt {
            fingerprint: fingerprint.to_string(),
            command: command.to_vec(),
            target_dir: target_dir.to_path_buf(),
            finished_at: Utc::now(),
        };
        let payload = serde_json::to_vec(&receipt)
            .map_err(|e| ToolFailure::new(format!("failed to encode build receipt: {}", e)))?;

        Ok(BuildOutput {
            payload,
            diagnostics,
        })
    }
}

#[async_trait]
impl Toolchain for CommandToolchain {
    fn identity(&self) -> ToolchainIdentity {
        ToolchainIdentity {
            name: self.config.name.clone(),
            version: self.config.version.clone(),
        }
    }

    fn dependency_recipe(&self, project_dir: &Path) -> std::io::Result<BuildRecipe> {
        let mut files = BTreeMap::new();
        for file in &self.config.skeleton_files {
            let digest = match std::fs::read(project_dir.join(file)) {
                Ok(bytes) => Some(hex::encode(Sha256::digest(&bytes))),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                Err(e) => return Err(e),
            };
            files.insert(file.clone(), digest);
        }

        Ok(BuildRecipe {
            command: self.config.deps_build.clone(),
            target_dir_env: self.config.target_dir_env.clone(),
            stubs: self.config.skeleton_stubs.clone(),
            files,
        })
    }

    fn project_recipe(&self) -> BuildRecipe {
        BuildRecipe {
            command: self.config.project_build.clone(),
            target_dir_env: self.config.target_dir_env.clone(),
            ..BuildRecipe::default()
        }
    }

    async fn build_dependencies(
        &self,
        request: &DependencyBuildRequest,
    ) -> Result<BuildOutput, ToolFailure> {
        info!("Building dependencies ({})", short(&request.fingerprint));

        reset_dir(&request.output_dir).await?;
        let skeleton = request.output_dir.join("skeleton");
        let target = request.output_dir.join("target");

        let project_dir = request.project_dir.clone();
        let skeleton_dir = skeleton.clone();
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || prepare_skeleton(&config, &project_dir, &skeleton_dir))
            .await
            .map_err(|e| ToolFailure::new(format!("skeleton task failed: {}", e)))?
            .map_err(|e| ToolFailure::new(format!("failed to prepare dependency skeleton: {}", e)))?;

        self.build(
            &self.config.deps_build,
            &skeleton,
            &request.env,
            &request.fingerprint,
            &target,
        )
        .await
    }

    async fn build_project(&self, request: &ProjectBuildRequest) -> Result<BuildOutput, ToolFailure> {
        info!("Building project ({})", short(&request.fingerprint));

        reset_dir(&request.output_dir).await?;
        let target = request.output_dir.join("target");

        // Seed from the dependency artifact; the artifact itself stays untouched
        let seed = request.deps_output.join("target");
        let dest = target.clone();
        tokio::task::spawn_blocking(move || copy_tree(&seed, &dest))
            .await
            .map_err(|e| ToolFailure::new(format!("seed task failed: {}", e)))?
            .map_err(|e| ToolFailure::new(format!("failed to seed target directory: {}", e)))?;

        self.build(
            &self.config.project_build,
            &request.project_dir,
            &request.env,
            &request.fingerprint,
            &target,
        )
        .await
    }

    async fn run_check(&self, request: &CheckRequest) -> CheckRun {
        if request.command.is_empty() {
            return CheckRun::Unavailable {
                reason: format!("check '{}' has no command configured", request.name),
            };
        }

        // Checks work on a private copy of the project target dir
        let scratch = request.scratch_dir.clone();
        let seed = request.project_output.join("target");
        let dest = scratch.clone();
        let seeded = tokio::task::spawn_blocking(move || {
            if dest.exists() {
                std::fs::remove_dir_all(&dest)?;
            }
            copy_tree(&seed, &dest)
        })
        .await;
        match seeded {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return CheckRun::Unavailable {
                    reason: format!("failed to prepare check directory: {}", e),
                }
            }
            Err(e) => {
                return CheckRun::Unavailable {
                    reason: format!("check setup task failed: {}", e),
                }
            }
        }

        let output = match self
            .exec(&request.command, &request.project_dir, &request.env, Some(&scratch))
            .await
        {
            Ok(output) => output,
            Err(e) => {
                return CheckRun::Unavailable {
                    reason: format!("failed to run {}: {}", request.command.join(" "), e),
                }
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let diagnostics = diagnostic_tail(&stdout, &stderr);

        match output.status.code() {
            Some(0) => CheckRun::Passed { diagnostics },
            Some(_) => CheckRun::Violations { diagnostics },
            None => CheckRun::Unavailable {
                reason: exit_description(&output),
            },
        }
    }

    async fn data_version(
        &self,
        command: &[String],
        project_dir: &Path,
        env: &BTreeMap<String, String>,
    ) -> Result<String, String> {
        let output = self
            .exec(command, project_dir, env, None)
            .await
            .map_err(|e| format!("failed to run {}: {}", command.join(" "), e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!(
                "{} failed: {}",
                command.join(" "),
                stderr.trim()
            ));
        }

        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if version.is_empty() {
            return Err(format!("{} printed no version", command.join(" ")));
        }
        Ok(version)
    }
}

/// Lay out manifest files and stub sources for a dependency-only build
fn prepare_skeleton(config: &ToolchainConfig, project_dir: &Path, skeleton: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(skeleton)?;

    for file in &config.skeleton_files {
        let from = project_dir.join(file);
        if !from.is_file() {
            debug!("Skeleton file {} not present, skipping", file);
            continue;
        }
        let to = skeleton.join(file);
        if let Some(parent) = to.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(&from, &to)?;
    }

    for (file, content) in &config.skeleton_stubs {
        let to = skeleton.join(file);
        if let Some(parent) = to.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&to, content)?;
    }

    Ok(())
}

async fn reset_dir(dir: &Path) -> Result<(), ToolFailure> {
    if tokio::fs::metadata(dir).await.is_ok() {
        tokio::fs::remove_dir_all(dir)
            .await
            .map_err(|e| ToolFailure::new(format!("failed to clear {}: {}", dir.display(), e)))?;
    }
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| ToolFailure::new(format!("failed to create {}: {}", dir.display(), e)))
}

/// Recursively copy `from` into `to`; a missing `from` is an empty tree
fn copy_tree(from: &Path, to: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(to)?;
    if !from.is_dir() {
        return Ok(());
    }

    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let dest = to.join(entry.file_name());
        if file_type.is_dir() {
            copy_tree(&entry.path(), &dest)?;
        } else if file_type.is_file() {
            std::fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}

fn exit_description(output: &Output) -> String {
    match output.status.code() {
        Some(code) => format!("exited with code {}", code),
        None => "terminated by signal".to_string(),
    }
}

fn short(fingerprint: &str) -> &str {
    &fingerprint[..12.min(fingerprint.len())]
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    fn config(deps: &str, project: &str) -> ToolchainConfig {
        ToolchainConfig {
            deps_build: sh(deps),
            project_build: sh(project),
            target_dir_env: "KILN_TEST_TARGET".to_string(),
            skeleton_files: vec!["Kiln.toml".to_string()],
            skeleton_stubs: BTreeMap::from([("src/lib.rs".to_string(), String::new())]),
            ..ToolchainConfig::default()
        }
    }

    fn project() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("Kiln.toml"), "[package]\n").unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "real project code\n").unwrap();
        dir
    }

    #[test]
    fn dependency_recipe_hashes_copied_files() {
        let project = project();
        let toolchain = CommandToolchain::new(ToolchainConfig {
            skeleton_files: vec!["Kiln.toml".to_string(), "Cargo.lock".to_string()],
            ..config("make deps", "make")
        });

        let before = toolchain.dependency_recipe(project.path()).unwrap();
        assert_eq!(before.command, sh("make deps"));
        assert!(before.files["Kiln.toml"].is_some());
        assert_eq!(before.files["Cargo.lock"], None);

        std::fs::write(project.path().join("Cargo.lock"), "serde 1.0.0\n").unwrap();
        let locked = toolchain.dependency_recipe(project.path()).unwrap();
        std::fs::write(project.path().join("Cargo.lock"), "serde 1.0.999\n").unwrap();
        let bumped = toolchain.dependency_recipe(project.path()).unwrap();

        assert_ne!(before, locked);
        assert_ne!(locked, bumped);
        assert_eq!(bumped.stubs["src/lib.rs"], "");

        let project_recipe = toolchain.project_recipe();
        assert_eq!(project_recipe.command, sh("make"));
        assert!(project_recipe.files.is_empty());
    }

    #[tokio::test]
    async fn dependency_build_runs_in_skeleton() {
        let project = project();
        let out = TempDir::new().unwrap();
        let toolchain = CommandToolchain::new(config(
            "mkdir -p \"$KILN_TEST_TARGET\" && cat src/lib.rs > \"$KILN_TEST_TARGET/seen\" && ls Kiln.toml",
            "true",
        ));

        let output = toolchain
            .build_dependencies(&DependencyBuildRequest {
                project_dir: project.path().to_path_buf(),
                fingerprint: "f".repeat(64),
                output_dir: out.path().join("deps"),
                env: BTreeMap::new(),
            })
            .await
            .unwrap();

        // The stub, not the project's real source, was visible to the build
        let seen = std::fs::read_to_string(out.path().join("deps/target/seen")).unwrap();
        assert_eq!(seen, "");

        let receipt: BuildReceipt = serde_json::from_slice(&output.payload).unwrap();
        assert_eq!(receipt.target_dir, out.path().join("deps/target"));
    }

    #[tokio::test]
    async fn failed_build_carries_diagnostics() {
        let project = project();
        let out = TempDir::new().unwrap();
        let toolchain = CommandToolchain::new(config("echo 'error: cannot find crate' >&2; exit 101", "true"));

        let failure = toolchain
            .build_dependencies(&DependencyBuildRequest {
                project_dir: project.path().to_path_buf(),
                fingerprint: "f".repeat(64),
                output_dir: out.path().join("deps"),
                env: BTreeMap::new(),
            })
            .await
            .unwrap_err();

        assert!(failure.diagnostics.iter().any(|l| l.contains("cannot find crate")));
        assert!(failure.diagnostics.iter().any(|l| l.contains("101")));
    }

    #[tokio::test]
    async fn project_build_is_seeded_from_dependencies() {
        let project = project();
        let out = TempDir::new().unwrap();
        let deps_output = out.path().join("deps");
        std::fs::create_dir_all(deps_output.join("target")).unwrap();
        std::fs::write(deps_output.join("target/libdep.rlib"), "dep").unwrap();

        let toolchain = CommandToolchain::new(config("true", "test -f \"$KILN_TEST_TARGET/libdep.rlib\""));
        toolchain
            .build_project(&ProjectBuildRequest {
                project_dir: project.path().to_path_buf(),
                fingerprint: "e".repeat(64),
                deps_output: deps_output.clone(),
                output_dir: out.path().join("project"),
                env: BTreeMap::new(),
            })
            .await
            .unwrap();

        assert!(out.path().join("project/target/libdep.rlib").exists());
        assert!(deps_output.join("target/libdep.rlib").exists());
    }

    #[tokio::test]
    async fn check_outcomes_follow_exit_status() {
        let project = project();
        let out = TempDir::new().unwrap();
        let toolchain = CommandToolchain::new(config("true", "true"));
        let request = |command: Vec<String>| CheckRequest {
            name: "lint".to_string(),
            command,
            project_dir: project.path().to_path_buf(),
            project_output: out.path().to_path_buf(),
            scratch_dir: out.path().join("scratch"),
            env: BTreeMap::from([("KILN_TEST_VAR".to_string(), "set".to_string())]),
        };

        let passed = toolchain.run_check(&request(sh("test \"$KILN_TEST_VAR\" = set"))).await;
        assert!(matches!(passed, CheckRun::Passed { .. }));

        let failed = toolchain.run_check(&request(sh("echo 'warning: unused'; exit 1"))).await;
        match failed {
            CheckRun::Violations { diagnostics } => {
                assert_eq!(diagnostics, vec!["warning: unused"]);
            }
            other => panic!("expected violations, got {other:?}"),
        }

        let missing = toolchain
            .run_check(&request(vec!["kiln-test-no-such-tool".to_string()]))
            .await;
        assert!(matches!(missing, CheckRun::Unavailable { .. }));
    }

    #[tokio::test]
    async fn data_version_reads_stdout() {
        let project = project();
        let toolchain = CommandToolchain::new(config("true", "true"));

        let version = toolchain
            .data_version(&sh("echo ' 2026-10-01 '"), project.path(), &BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(version, "2026-10-01");

        let err = toolchain
            .data_version(&sh("exit 3"), project.path(), &BTreeMap::new())
            .await
            .unwrap_err();
        assert!(err.contains("failed"));
    }
}
