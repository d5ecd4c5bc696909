//! Check command - build, then run checks against the project artifact

use super::open_pipeline;
use crate::cli::args::{CheckArgs, OutputFormat};
use crate::config::Config;
use crate::error::KilnResult;
use crate::pipeline::{BuildResult, CheckOutcome, CheckReport, CheckResult};
use crate::ui::{self, CheckProgress, TaskSpinner, UiContext};
use console::style;
use serde::Serialize;
use std::path::Path;

/// Diagnostic lines shown per check in the table report
const TABLE_DIAGNOSTIC_LINES: usize = 10;

/// Execute the check command
pub async fn execute(args: CheckArgs, config: &Config, project_dir: &Path) -> KilnResult<()> {
    let json = args.format == OutputFormat::Json;
    let ctx = UiContext::detect().plain(json);
    let pipeline = open_pipeline(config, project_dir);

    // Unknown names fail here, before anything is built
    let selected = pipeline.select_checks(&args.names, &args.skip)?;

    let build = if json {
        pipeline.build().await?
    } else {
        let mut spinner = TaskSpinner::new(&ctx);
        spinner.start("Building...");
        match pipeline.build().await {
            Ok(build) => {
                spinner.stop(&format!(
                    "Built {} ({})",
                    build.manifest.package.name,
                    build.project.fingerprint.short()
                ));
                build
            }
            Err(e) => {
                spinner.stop_error("Build failed");
                return Err(e);
            }
        }
    };

    let progress = CheckProgress::new(&ctx, selected.len());
    let report = pipeline
        .run_checks(&selected, &build, &|result| progress.on_result(result))
        .await;
    progress.finish();

    match args.format {
        OutputFormat::Json => print_report_json(&build, &report)?,
        OutputFormat::Table => print_report_table(&ctx, &report),
    }

    report.ensure_passed()
}

fn print_report_table(ctx: &UiContext, report: &CheckReport) {
    if report.results.is_empty() {
        ui::step_info(ctx, "No checks selected");
        return;
    }

    println!();
    println!("{:<16} {:<8} {:<8} {:>8}", "CHECK", "OUTCOME", "SOURCE", "TIME");
    println!("{}", "-".repeat(43));

    for result in &report.results {
        let outcome = match result.outcome {
            CheckOutcome::Pass => style(format!("{:<8}", "pass")).green(),
            CheckOutcome::Fail => style(format!("{:<8}", "fail")).red(),
            CheckOutcome::Error => style(format!("{:<8}", "error")).yellow(),
        };
        let source = if result.cached { "cached" } else { "ran" };
        println!(
            "{:<16} {} {:<8} {:>6}ms",
            result.name, outcome, source, result.duration_ms
        );
    }

    let unhealthy: Vec<&CheckResult> = report
        .results
        .iter()
        .filter(|r| r.outcome != CheckOutcome::Pass)
        .collect();
    if !unhealthy.is_empty() {
        ui::section(ctx, "Diagnostics");
    }
    for result in unhealthy {
        print_diagnostics(ctx, result);
    }

    println!();
    let summary = format!(
        "{} passed, {} failed, {} could not run",
        report.passed().len(),
        report.failed().len(),
        report.errored().len()
    );
    match report.status() {
        CheckOutcome::Pass => ui::outro_success(ctx, &summary),
        _ => ui::outro_error(ctx, &summary),
    }
}

fn print_diagnostics(ctx: &UiContext, result: &CheckResult) {
    let heading = match result.outcome {
        CheckOutcome::Fail => "found violations",
        _ => "could not run",
    };
    ui::step_error_detail(ctx, &result.name, heading);

    let skipped = result.diagnostics.len().saturating_sub(TABLE_DIAGNOSTIC_LINES);
    if skipped > 0 {
        ui::remark(ctx, &format!("... {} earlier lines", skipped));
    }
    for line in &result.diagnostics[skipped..] {
        ui::remark(ctx, line);
    }
}

fn print_report_json(build: &BuildResult, report: &CheckReport) -> KilnResult<()> {
    #[derive(Serialize)]
    struct ReportJson<'a> {
        package: &'a str,
        project: &'a str,
        dependencies: &'a str,
        status: CheckOutcome,
        checks: &'a [CheckResult],
    }

    let json = ReportJson {
        package: &build.manifest.package.name,
        project: build.project.fingerprint.as_str(),
        dependencies: build.deps.fingerprint.as_str(),
        status: report.status(),
        checks: &report.results,
    };
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
