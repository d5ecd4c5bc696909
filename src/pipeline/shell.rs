//! Environment provisioner
//!
//! Assembles the interactive development environment: the project
//! toolchain, every tool a configured check needs, and the declared
//! environment. The dependency artifact comes from the same cache the
//! builds use.

use super::artifact::Artifact;
use crate::config::Config;
use crate::error::{KilnError, KilnResult};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Variable pointing at the dependency artifact's outputs
pub const DEPS_DIR_VAR: &str = "KILN_DEPS_DIR";

/// Variable holding the dependency fingerprint
pub const DEPS_FINGERPRINT_VAR: &str = "KILN_DEPS_FINGERPRINT";

/// A provisioned interactive environment
#[derive(Debug, Clone)]
pub struct ShellEnvironment {
    /// Shell spawned when no command is given
    pub program: String,
    pub working_dir: PathBuf,
    /// Tools the environment must expose, deduplicated in config order
    pub tools: Vec<String>,
    /// Variables set on top of the inherited environment
    pub env: BTreeMap<String, String>,
    /// Dependency artifact the environment was built on
    pub deps: Artifact,
}

impl ShellEnvironment {
    /// Assemble the environment for `project_dir`.
    ///
    /// `host_path` is the inherited `PATH`; configured directories are
    /// prepended to it.
    pub fn assemble(
        config: &Config,
        project_dir: &Path,
        env: &BTreeMap<String, String>,
        deps: Artifact,
        host_path: Option<&str>,
    ) -> KilnResult<Self> {
        let mut tools: Vec<String> = Vec::new();
        let check_tools = config
            .checks
            .names()
            .into_iter()
            .filter_map(|name| config.checks.get(&name).cloned())
            .filter(|check| check.enabled)
            .filter_map(|check| check.tool_name().map(str::to_string));
        for tool in config.shell.tools.iter().cloned().chain(check_tools) {
            if !tools.contains(&tool) {
                tools.push(tool);
            }
        }

        let mut vars = env.clone();
        vars.insert(DEPS_DIR_VAR.to_string(), deps.output_dir.display().to_string());
        vars.insert(DEPS_FINGERPRINT_VAR.to_string(), deps.fingerprint.to_string());

        let prepend: Vec<PathBuf> = config
            .shell
            .path_prepend
            .iter()
            .map(|dir| project_dir.join(dir))
            .collect();
        let mut path = prepend.clone();
        if let Some(host) = host_path.filter(|p| !p.is_empty()) {
            path.extend(std::env::split_paths(host));
        }
        if !path.is_empty() {
            let joined = std::env::join_paths(&path).map_err(|e| KilnError::InvalidPath {
                path: prepend
                    .iter()
                    .find(|dir| std::env::join_paths([dir]).is_err())
                    .cloned()
                    .unwrap_or_else(|| project_dir.to_path_buf()),
                reason: format!("cannot be added to PATH: {}", e),
            })?;
            vars.insert("PATH".to_string(), joined.to_string_lossy().into_owned());
        }

        Ok(Self {
            program: config.shell.program.clone(),
            working_dir: project_dir.to_path_buf(),
            tools,
            env: vars,
            deps,
        })
    }

    /// Tools not found on the environment's `PATH`
    pub fn missing_tools(&self) -> Vec<String> {
        let dirs: Vec<PathBuf> = self
            .env
            .get("PATH")
            .map(|p| std::env::split_paths(p).collect())
            .unwrap_or_default();

        self.tools
            .iter()
            .filter(|tool| !dirs.iter().any(|dir| dir.join(tool.as_str()).is_file()))
            .cloned()
            .collect()
    }

    /// `export NAME='value'` lines for sourcing into an existing shell
    pub fn export_lines(&self) -> Vec<String> {
        self.env
            .iter()
            .map(|(name, value)| format!("export {}={}", name, shell_quote(value)))
            .collect()
    }

    /// Run `command` (or the shell when empty) attached to the terminal.
    ///
    /// Returns the exit code; -1 when killed by a signal.
    pub async fn spawn(&self, command: &[String]) -> KilnResult<i32> {
        let (program, args) = match command.split_first() {
            Some((program, args)) => (program.as_str(), args),
            None => (self.program.as_str(), &[][..]),
        };
        debug!("Spawning in {}: {} {:?}", self.working_dir.display(), program, args);

        let status = Command::new(program)
            .args(args)
            .current_dir(&self.working_dir)
            .envs(&self.env)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| KilnError::command_failed(program, e))?;

        Ok(status.code().unwrap_or(-1))
    }
}

/// Quote for POSIX shells
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
