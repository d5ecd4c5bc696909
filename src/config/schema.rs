//! Configuration schema for Kiln
//!
//! Global configuration is stored at `~/.config/kiln/config.toml`; a
//! project-local `.kiln.toml` is merged over it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Toolchain identity and build commands
    pub toolchain: ToolchainConfig,

    /// Source snapshot filtering
    pub snapshot: SnapshotConfig,

    /// Registry snapshot used for dependency resolution
    pub registry: RegistryConfig,

    /// Artifact cache settings
    pub cache: CacheConfig,

    /// Environment passed to toolchain invocations
    pub env: EnvConfig,

    /// Interactive shell settings
    pub shell: ShellConfig,

    /// Named checks run by `kiln check`
    pub checks: ChecksConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Append pipeline events to the journal
    pub journal: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self { journal: true }
    }
}

/// Toolchain configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainConfig {
    /// Toolchain name (part of the toolchain identity)
    pub name: String,

    /// Toolchain version, checked against the manifest requirement
    pub version: String,

    /// Target platform override (`<arch>-<os>`); detected when unset
    pub platform: Option<String>,

    /// Command that compiles the dependency skeleton
    pub deps_build: Vec<String>,

    /// Command that compiles the project
    pub project_build: Vec<String>,

    /// Environment variable the toolchain reads its output directory from
    pub target_dir_env: String,

    /// Project files copied into the dependency skeleton
    pub skeleton_files: Vec<String>,

    /// Stub sources written into the dependency skeleton (path -> content)
    pub skeleton_stubs: BTreeMap<String, String>,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        let mut skeleton_stubs = BTreeMap::new();
        skeleton_stubs.insert("src/lib.rs".to_string(), String::new());
        skeleton_stubs.insert("src/main.rs".to_string(), "fn main() {}\n".to_string());

        Self {
            name: "rust".to_string(),
            version: "1.82.0".to_string(),
            platform: None,
            deps_build: strings(&["cargo", "build", "--locked", "--release"]),
            project_build: strings(&["cargo", "build", "--locked", "--release"]),
            target_dir_env: "CARGO_TARGET_DIR".to_string(),
            skeleton_files: strings(&["Cargo.toml", "Cargo.lock"]),
            skeleton_stubs,
        }
    }
}

/// Source snapshot configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Path prefixes (relative to the project root) never included
    pub exclude: Vec<String>,

    /// Exclude every path with a component starting with '.'
    pub exclude_hidden: bool,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            exclude: strings(&[
                ".git",
                ".github",
                ".direnv",
                ".kiln",
                "docs",
                "target",
                "result",
                "flake.lock",
                "README.md",
                "CHANGELOG.md",
                "LICENSE",
            ]),
            exclude_hidden: true,
        }
    }
}

/// Registry configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Path to the registry snapshot index (TOML)
    pub index: Option<PathBuf>,
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache directory (defaults to the user cache dir)
    pub dir: Option<PathBuf>,

    /// Entries older than N days are removed by `kiln cache gc` (0 = disabled)
    pub gc_days: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: None,
            gc_days: 30,
        }
    }
}

/// Environment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvConfig {
    /// Declared variables, passed to the toolchain and fingerprinted
    pub vars: BTreeMap<String, String>,

    /// Host variables captured at startup and passed through unmodified
    pub passthrough: Vec<String>,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            vars: BTreeMap::new(),
            passthrough: strings(&[
                "LD_LIBRARY_PATH",
                "DYLD_LIBRARY_PATH",
                "LIBRARY_PATH",
                "PKG_CONFIG_PATH",
            ]),
        }
    }
}

/// Interactive shell configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    /// Shell program spawned by `kiln shell`
    pub program: String,

    /// Auxiliary tools exposed besides the check tools
    pub tools: Vec<String>,

    /// Directories prepended to PATH
    pub path_prepend: Vec<String>,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            program: "/bin/bash".to_string(),
            tools: strings(&["cargo", "rustc"]),
            path_prepend: vec![],
        }
    }
}

/// A single named check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckConfig {
    /// Command to run; a nonzero exit means violations were found
    pub command: Vec<String>,

    /// Tool the check needs (defaults to the command's program)
    pub tool: Option<String>,

    /// Disabled checks are skipped unless named explicitly
    pub enabled: bool,

    /// Literal version of the external data the check consults
    pub data_version: Option<String>,

    /// Command whose trimmed stdout is the external data version
    pub data_version_command: Vec<String>,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            command: vec![],
            tool: None,
            enabled: true,
            data_version: None,
            data_version_command: vec![],
        }
    }
}

impl CheckConfig {
    fn with_command(command: &[&str]) -> Self {
        Self {
            command: strings(command),
            ..Self::default()
        }
    }

    /// The tool this check depends on
    pub fn tool_name(&self) -> Option<&str> {
        self.tool
            .as_deref()
            .or_else(|| self.command.first().map(String::as_str))
    }
}

/// Check set configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChecksConfig {
    /// Order in which checks are reported
    pub order: Vec<String>,

    /// Check definitions by name
    #[serde(flatten)]
    pub defs: BTreeMap<String, CheckConfig>,
}

impl Default for ChecksConfig {
    fn default() -> Self {
        let mut defs = BTreeMap::new();
        defs.insert(
            "lint".to_string(),
            CheckConfig {
                tool: Some("cargo-clippy".to_string()),
                ..CheckConfig::with_command(&[
                    "cargo",
                    "clippy",
                    "--all-targets",
                    "--locked",
                    "--",
                    "--deny",
                    "warnings",
                ])
            },
        );
        defs.insert(
            "fmt".to_string(),
            CheckConfig {
                tool: Some("cargo-fmt".to_string()),
                ..CheckConfig::with_command(&["cargo", "fmt", "--all", "--check"])
            },
        );
        defs.insert(
            "audit".to_string(),
            CheckConfig {
                tool: Some("cargo-audit".to_string()),
                data_version_command: strings(&[
                    "git",
                    "-C",
                    "advisory-db",
                    "rev-parse",
                    "HEAD",
                ]),
                ..CheckConfig::with_command(&["cargo", "audit", "--db", "advisory-db", "--no-fetch"])
            },
        );
        defs.insert(
            "license".to_string(),
            CheckConfig {
                tool: Some("cargo-deny".to_string()),
                ..CheckConfig::with_command(&["cargo", "deny", "check", "licenses"])
            },
        );
        defs.insert(
            "test".to_string(),
            CheckConfig::with_command(&["cargo", "test", "--locked"]),
        );

        Self {
            order: strings(&["lint", "fmt", "audit", "license", "test"]),
            defs,
        }
    }
}

impl ChecksConfig {
    /// All configured check names: `order` first, then the rest alphabetically
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .order
            .iter()
            .filter(|n| self.defs.contains_key(*n))
            .cloned()
            .collect();
        for name in self.defs.keys() {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        names
    }

    /// Look up a check definition
    pub fn get(&self, name: &str) -> Option<&CheckConfig> {
        self.defs.get(name)
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
