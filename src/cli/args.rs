//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Kiln - layered build cache and check gate
///
/// Builds the dependency graph once per fingerprint, builds the project on
/// top of it, and runs independently cached checks against the result.
#[derive(Parser, Debug)]
#[command(name = "kiln")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Global configuration file path
    #[arg(short, long, global = true, env = "KILN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Skip project-local .kiln.toml discovery
    #[arg(long, global = true)]
    pub no_local: bool,

    /// Project directory (defaults to the current directory)
    #[arg(short = 'C', long, global = true, env = "KILN_PROJECT")]
    pub project: Option<PathBuf>,

    /// Log line format
    #[arg(long, global = true, default_value = "text")]
    pub log_format: LogFormat,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Resolve dependencies and write Kiln.lock
    Lock,

    /// Build dependencies (cached) and the project
    Build,

    /// Build, then run checks
    Check(CheckArgs),

    /// Open a shell with the project toolchain and check tools
    Shell(ShellArgs),

    /// Print the snapshot hash and build fingerprints
    Fingerprint,

    /// Inspect and evict cached artifacts
    Cache(CacheArgs),

    /// Show configuration
    Config(ConfigArgs),
}

/// Arguments for the check command
#[derive(Parser, Debug)]
pub struct CheckArgs {
    /// Checks to run (defaults to every enabled check)
    pub names: Vec<String>,

    /// Checks to skip for this run
    #[arg(long, value_delimiter = ',')]
    pub skip: Vec<String>,

    /// Report format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the shell command
#[derive(Parser, Debug)]
pub struct ShellArgs {
    /// Print export lines instead of spawning a shell
    #[arg(long)]
    pub print: bool,

    /// Command to run inside the environment (defaults to the shell)
    #[arg(last = true)]
    pub command: Vec<String>,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the merged configuration
    Show,

    /// Show the global configuration file path
    Path,

    /// Write the default configuration to the global file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

/// Output format for reports and listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
}

/// Log line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Arguments for the cache command
#[derive(Parser, Debug)]
pub struct CacheArgs {
    /// Subcommand for cache
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// List cached entries, newest first
    List {
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Remove entries older than N days
    Gc {
        /// Age threshold in days (default: cache.gc_days)
        #[arg(long)]
        days: Option<u32>,

        /// Show what would be removed
        #[arg(long)]
        dry_run: bool,
    },

    /// Remove every cached entry and output
    Clear {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}
