//! Kiln - layered build cache and check gate
//!
//! Builds a project's dependency graph once per dependency fingerprint,
//! builds the project on top of the cached result, and runs independently
//! cached checks against the project build.

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod journal;
pub mod pipeline;
pub mod project;
pub mod toolchain;
pub mod ui;

pub use error::{KilnError, KilnResult};
