//! CLI command implementations

pub mod build;
pub mod cache;
pub mod check;
pub mod config;
pub mod fingerprint;
pub mod lock;
pub mod shell;

pub use build::execute as build;
pub use cache::execute as cache;
pub use check::execute as check;
pub use config::execute as config;
pub use fingerprint::execute as fingerprint;
pub use lock::execute as lock;
pub use shell::execute as shell;

use crate::config::Config;
use crate::pipeline::Pipeline;
use crate::toolchain::create_toolchain;
use std::path::Path;

/// Pipeline for `project_dir` using the configured toolchain
fn open_pipeline(config: &Config, project_dir: &Path) -> Pipeline {
    Pipeline::new(config.clone(), project_dir, create_toolchain(&config.toolchain))
}

/// Label for where an artifact came from
fn origin(fresh: bool) -> &'static str {
    if fresh {
        "built"
    } else {
        "cached"
    }
}
