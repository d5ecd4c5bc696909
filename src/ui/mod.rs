//! Terminal output
//!
//! Uses `cliclack` for spinners and prompts when attached to a terminal,
//! with plain line output in CI and when piping.
//!
//! # Example
//!
//! ```rust,ignore
//! use kiln::ui::{self, UiContext, TaskSpinner};
//!
//! let ctx = UiContext::detect();
//!
//! let mut spinner = TaskSpinner::new(&ctx);
//! spinner.start("Building dependencies...");
//! // ... build ...
//! spinner.stop("Dependencies ready");
//!
//! ui::step_warn_hint(&ctx, "cargo-audit not on PATH", "Install it to run the audit check");
//! ```

mod context;
mod output;
mod progress;
mod prompts;
mod theme;

pub use context::UiContext;
pub use output::{
    key_value, outro_error, outro_success, remark, section, step_error_detail, step_info,
    step_ok, step_ok_detail, step_warn, step_warn_hint,
};
pub use progress::{CheckProgress, TaskSpinner};
pub use prompts::confirm;
pub use theme::{init_theme, KilnTheme};
