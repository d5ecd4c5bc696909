//! Error types for Kiln
//!
//! All modules use `KilnResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Kiln operations
pub type KilnResult<T> = Result<T, KilnError>;

/// All errors that can occur in Kiln
#[derive(Error, Debug)]
pub enum KilnError {
    // Source snapshot errors
    #[error("Invalid path: {path}: {reason}")]
    InvalidPath { path: PathBuf, reason: String },

    // Manifest and resolution errors
    #[error("Manifest not found: {0}")]
    ManifestNotFound(PathBuf),

    #[error("Invalid manifest at {path}: {reason}")]
    ManifestInvalid { path: PathBuf, reason: String },

    #[error("Invalid lockfile at {path}: {reason}")]
    LockfileInvalid { path: PathBuf, reason: String },

    #[error("Invalid registry snapshot at {path}: {reason}")]
    RegistryInvalid { path: PathBuf, reason: String },

    #[error("Lockfile is missing or stale and no registry snapshot is configured")]
    RegistryMissing,

    #[error("Cannot satisfy constraints for {package}: {}", .requirements.join("; "))]
    Unsatisfiable {
        package: String,
        requirements: Vec<String>,
    },

    #[error("Toolchain {actual} does not satisfy manifest requirement {required}")]
    ToolchainMismatch { required: String, actual: String },

    // Build errors
    #[error("Dependency build failed for {fingerprint}{}", format_diagnostics(.diagnostics))]
    DependencyBuild {
        fingerprint: String,
        diagnostics: Vec<String>,
    },

    #[error("Project build failed for {fingerprint}{}", format_diagnostics(.diagnostics))]
    ProjectBuild {
        fingerprint: String,
        diagnostics: Vec<String>,
    },

    // Check errors
    #[error("Unknown check: {0}")]
    UnknownCheck(String),

    #[error("{}", checks_failed_message(.failed, .errored))]
    ChecksFailed {
        failed: Vec<String>,
        errored: Vec<String>,
    },

    // Cache errors
    #[error("Corrupt cache entry {path}: {reason}")]
    CacheCorruption { path: PathBuf, reason: String },

    #[error("Failed to write cache entry {key}: {reason}")]
    CacheWrite { key: String, reason: String },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Shell exited with code {0}")]
    ShellExited(i32),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    User(String),
}

fn format_diagnostics(diagnostics: &[String]) -> String {
    if diagnostics.is_empty() {
        String::new()
    } else {
        format!(":\n{}", diagnostics.join("\n"))
    }
}

fn checks_failed_message(failed: &[String], errored: &[String]) -> String {
    let mut parts = Vec::new();
    if !failed.is_empty() {
        parts.push(format!("failed: {}", failed.join(", ")));
    }
    if !errored.is_empty() {
        parts.push(format!("could not run: {}", errored.join(", ")));
    }
    format!("Checks did not pass ({})", parts.join("; "))
}

impl KilnError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::RegistryMissing => {
                Some("Set registry.index in .kiln.toml, or commit an up-to-date Kiln.lock")
            }
            Self::ManifestNotFound(_) => Some("Run kiln from the project root or pass --project"),
            Self::ToolchainMismatch { .. } => {
                Some("Update toolchain.version in .kiln.toml to match the manifest")
            }
            Self::UnknownCheck(_) => Some("List configured checks with: kiln config show"),
            Self::DependencyBuild { .. } => Some("Dependency builds are not cached; retry with: kiln build"),
            Self::ChecksFailed { .. } => Some("Reproduce a check locally with: kiln shell"),
            _ => None,
        }
    }
}
