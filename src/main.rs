//! Kiln - layered build cache and check gate
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use kiln::cli::args::LogFormat;
use kiln::cli::{Cli, Commands};
use kiln::config::ConfigManager;
use kiln::error::{KilnError, KilnResult};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        // The shell already reported whatever went wrong
        Err(KilnError::ShellExited(code)) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> KilnResult<()> {
    let cli = Cli::parse();

    // Initialize logging: 0 = warn, 1 = info, 2+ = debug; KILN_LOG overrides
    let default_filter = match cli.verbose {
        0 => "kiln=warn",
        1 => "kiln=info",
        _ => "kiln=debug",
    };
    let filter = EnvFilter::try_from_env("KILN_LOG").unwrap_or_else(|_| EnvFilter::new(default_filter));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    match cli.log_format {
        LogFormat::Text => subscriber.without_time().init(),
        LogFormat::Json => subscriber.json().init(),
    }

    kiln::ui::init_theme();

    let cwd = std::env::current_dir().map_err(|e| KilnError::io("getting current directory", e))?;
    let project_dir = match cli.project {
        Some(ref path) if path.is_absolute() => path.clone(),
        Some(ref path) => cwd.join(path),
        None => cwd,
    };
    let project_dir = project_dir.canonicalize().unwrap_or(project_dir);

    // Load configuration
    let config_manager = if let Some(ref path) = cli.config {
        ConfigManager::with_path(path.clone())
    } else {
        ConfigManager::new()
    };

    // Find local config unless --no-local is set
    let local_config_path: Option<PathBuf> = if cli.no_local {
        debug!("Local config discovery disabled (--no-local)");
        None
    } else {
        let found = ConfigManager::find_local_config(&project_dir);
        if let Some(ref path) = found {
            debug!("Found local config: {}", path.display());
        }
        found
    };

    let config = config_manager
        .load_merged(local_config_path.as_deref())
        .await?;

    // Dispatch to command
    match cli.command {
        Commands::Lock => kiln::cli::commands::lock(&config, &project_dir).await,
        Commands::Build => kiln::cli::commands::build(&config, &project_dir).await,
        Commands::Check(args) => kiln::cli::commands::check(args, &config, &project_dir).await,
        Commands::Shell(args) => kiln::cli::commands::shell(args, &config, &project_dir).await,
        Commands::Fingerprint => kiln::cli::commands::fingerprint(&config, &project_dir).await,
        Commands::Cache(args) => kiln::cli::commands::cache(args, &config, &project_dir).await,
        Commands::Config(args) => kiln::cli::commands::config(args, &config, &config_manager).await,
    }
}
