//! Progress indicators with CI fallback

use super::context::UiContext;
use crate::pipeline::{CheckOutcome, CheckResult};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// A spinner for one pipeline phase
pub struct TaskSpinner {
    spinner: Option<cliclack::ProgressBar>,
    interactive: bool,
}

impl TaskSpinner {
    pub fn new(ctx: &UiContext) -> Self {
        Self {
            spinner: None,
            interactive: ctx.use_fancy_output(),
        }
    }

    pub fn start(&mut self, message: &str) {
        if self.interactive {
            let spinner = cliclack::spinner();
            spinner.start(message);
            self.spinner = Some(spinner);
        } else {
            println!("{} {}", style("...").dim(), message);
        }
    }

    /// Stop with a success message
    pub fn stop(&mut self, message: &str) {
        if let Some(spinner) = self.spinner.take() {
            spinner.stop(message);
        } else if self.interactive {
            println!("{} {}", style("✓").green(), message);
        } else {
            println!("{} {}", style("[OK]").green(), message);
        }
    }

    /// Stop with an error message
    pub fn stop_error(&mut self, message: &str) {
        if let Some(spinner) = self.spinner.take() {
            spinner.error(message);
        } else if self.interactive {
            println!("{} {}", style("✗").red(), message);
        } else {
            println!("{} {}", style("[FAIL]").red(), message);
        }
    }
}

/// Progress over a set of concurrently running checks.
///
/// Shows an indicatif bar in interactive mode; prints nothing otherwise,
/// since the final report lists every result.
pub struct CheckProgress {
    bar: Option<ProgressBar>,
}

impl CheckProgress {
    pub fn new(ctx: &UiContext, total: usize) -> Self {
        if !ctx.use_fancy_output() || total == 0 {
            return Self { bar: None };
        }

        let bar = ProgressBar::new(total as u64);
        let style = ProgressStyle::with_template(
            "  {spinner:.yellow} Checks  {bar:20.yellow/dim} {pos}/{len} {msg:.dim}  {elapsed:.dim}",
        )
        .map(|s| s.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ").progress_chars("━╸─"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar: Some(bar) }
    }

    /// Record one finished check
    pub fn on_result(&self, result: &CheckResult) {
        if let Some(bar) = &self.bar {
            bar.inc(1);
            bar.set_message(progress_message(result));
        }
    }

    /// Clear the bar
    pub fn finish(&self) {
        if let Some(bar) = &self.bar {
            bar.disable_steady_tick();
            bar.finish_and_clear();
        }
    }
}

fn progress_message(result: &CheckResult) -> String {
    let origin = if result.cached { ", cached" } else { "" };
    match result.outcome {
        CheckOutcome::Pass => format!("{} passed{}", result.name, origin),
        CheckOutcome::Fail => format!("{} failed{}", result.name, origin),
        CheckOutcome::Error => format!("{} could not run", result.name),
    }
}
