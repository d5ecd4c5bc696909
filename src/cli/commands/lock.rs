//! Lock command - resolve dependencies and write Kiln.lock

use super::open_pipeline;
use crate::config::Config;
use crate::error::KilnResult;
use crate::project::LOCKFILE;
use crate::ui::{self, UiContext};
use std::path::Path;

/// Execute the lock command
pub async fn execute(config: &Config, project_dir: &Path) -> KilnResult<()> {
    let ctx = UiContext::detect();
    let pipeline = open_pipeline(config, project_dir);

    let (manifest, resolution) = pipeline.lock().await?;
    let packages = &resolution.lockfile.packages;

    if resolution.changed {
        ui::step_ok_detail(
            &ctx,
            &format!("Wrote {}", LOCKFILE),
            &format!("{} packages", packages.len()),
        );
    } else {
        ui::step_ok_detail(
            &ctx,
            &format!("{} is up to date", LOCKFILE),
            &format!("{} packages", packages.len()),
        );
    }

    if packages.is_empty() {
        ui::remark(&ctx, &format!("{} has no dependencies", manifest.package.name));
    }
    for package in packages {
        ui::key_value(&ctx, &package.name, &package.version.to_string());
    }

    Ok(())
}
