//! Build command - build dependencies and the project

use super::{open_pipeline, origin};
use crate::config::Config;
use crate::error::KilnResult;
use crate::ui::{self, TaskSpinner, UiContext};
use std::path::Path;

/// Execute the build command
pub async fn execute(config: &Config, project_dir: &Path) -> KilnResult<()> {
    let ctx = UiContext::detect();
    let pipeline = open_pipeline(config, project_dir);

    let mut spinner = TaskSpinner::new(&ctx);
    spinner.start("Building...");
    let build = match pipeline.build().await {
        Ok(build) => build,
        Err(e) => {
            spinner.stop_error("Build failed");
            return Err(e);
        }
    };
    spinner.stop(&format!(
        "Built {} {}",
        build.manifest.package.name, build.manifest.package.version
    ));

    ui::key_value(
        &ctx,
        "dependencies",
        &format!("{} ({})", build.deps.fingerprint.short(), origin(build.deps.fresh)),
    );
    ui::key_value(
        &ctx,
        "project",
        &format!("{} ({})", build.project.fingerprint.short(), origin(build.project.fresh)),
    );
    if !build.project.diagnostics.is_empty() {
        ui::step_warn(&ctx, "Toolchain reported warnings");
        for line in &build.project.diagnostics {
            ui::remark(&ctx, line);
        }
    }

    Ok(())
}
