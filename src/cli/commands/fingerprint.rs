//! Fingerprint command - show what the next build would be keyed on

use super::open_pipeline;
use crate::config::Config;
use crate::error::KilnResult;
use crate::ui::{self, UiContext};
use std::path::Path;

/// Execute the fingerprint command
pub async fn execute(config: &Config, project_dir: &Path) -> KilnResult<()> {
    let ctx = UiContext::detect();
    let pipeline = open_pipeline(config, project_dir);

    let fingerprints = pipeline.fingerprints().await?;

    ui::key_value(&ctx, "platform", pipeline.platform());
    ui::key_value(
        &ctx,
        "snapshot",
        &format!("{} ({} files)", fingerprints.snapshot, fingerprints.files),
    );
    ui::key_value(&ctx, "dependencies", fingerprints.deps.as_str());
    ui::key_value(&ctx, "project", fingerprints.project.as_str());

    Ok(())
}
