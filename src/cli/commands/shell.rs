//! Shell command - interactive environment with the project toolchain

use super::open_pipeline;
use crate::cli::args::ShellArgs;
use crate::config::Config;
use crate::error::{KilnError, KilnResult};
use crate::ui::{self, TaskSpinner, UiContext};
use std::path::Path;
use tracing::warn;

/// Execute the shell command
pub async fn execute(args: ShellArgs, config: &Config, project_dir: &Path) -> KilnResult<()> {
    let pipeline = open_pipeline(config, project_dir);

    // stdout carries only export lines with --print
    if args.print {
        let env = pipeline.provision().await?;
        for tool in env.missing_tools() {
            warn!("{} not found on PATH", tool);
        }
        for line in env.export_lines() {
            println!("{}", line);
        }
        return Ok(());
    }

    let ctx = UiContext::detect();
    let mut spinner = TaskSpinner::new(&ctx);
    spinner.start("Preparing environment...");
    let env = match pipeline.provision().await {
        Ok(env) => env,
        Err(e) => {
            spinner.stop_error("Environment unavailable");
            return Err(e);
        }
    };
    spinner.stop(&format!(
        "Environment ready (dependencies {})",
        env.deps.fingerprint.short()
    ));

    for tool in env.missing_tools() {
        ui::step_warn_hint(
            &ctx,
            &format!("{} not found on PATH", tool),
            "Checks that need it will report an error",
        );
    }

    let code = env.spawn(&args.command).await?;
    if code == 0 {
        Ok(())
    } else {
        Err(KilnError::ShellExited(code))
    }
}
