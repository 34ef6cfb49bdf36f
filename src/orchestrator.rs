use crate::config::Config;
use crate::dispatch::{self, DispatchReport};
use crate::droid::Remediator;
use crate::linter::Autofixer;
use crate::plan;
use crate::render::{self, RunReport};
use crate::util::Confirm;
use crate::worker::{BACKOFF_BASE, RetryPolicy};
use anyhow::Context;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Autofix the target, then dispatch droids for whatever is left
///
/// This function coordinates the entire run:
/// - Runs the autofixer and collects remaining violations
/// - Plans work units from them
/// - Lists units and stops on dry run, or asks for confirmation
/// - Dispatches units with bounded concurrency
/// - Logs a summary and optionally writes a report file
///
/// Fatal errors (autofixer unavailable, report not writable) are returned;
/// per-droid failures are recorded in the returned report. A shutdown signal
/// before or during the prompt ends the run with every unit cancelled.
pub async fn orchestrate_and_run(
    config: &Config,
    autofixer: &dyn Autofixer,
    remediator: &dyn Remediator,
    confirm: &dyn Confirm,
    shutdown: &CancellationToken,
) -> anyhow::Result<RunReport> {
    let outcome = autofixer
        .fix(&config.path)
        .await
        .context("Autofix pass failed")?;
    info!(
        "Autofix resolved {} violation(s), {} remaining",
        outcome.fixed,
        outcome.remaining.len()
    );

    let mut report = RunReport {
        generated_at: Utc::now(),
        path: config.path.display().to_string(),
        auto_fixed: outcome.fixed,
        remaining: outcome.remaining.len(),
        planned: 0,
        dry_run: config.dry_run,
        declined: false,
        dispatch: DispatchReport::default(),
    };

    if outcome.remaining.is_empty() {
        info!("No remaining violations after auto-fix. Done!");
        finish(config, &report)?;
        return Ok(report);
    }

    let units = plan::plan(
        outcome.remaining,
        config.group_by,
        &config.exclude,
        &config.path,
    );
    report.planned = units.len();
    if units.is_empty() {
        info!("All remaining violations are excluded. Done!");
        finish(config, &report)?;
        return Ok(report);
    }

    info!(
        "Found {} linter violation(s), will spin up {} droid(s) to fix them",
        report.remaining,
        units.len()
    );

    if config.dry_run {
        info!("Dry run - {} droid(s) to dispatch:", units.len());
        for unit in &units {
            info!("  Droid {}: {}", unit.id, unit.description());
        }
        finish(config, &report)?;
        return Ok(report);
    }

    if config.assume_yes {
        debug!("Confirmation skipped");
    } else if !shutdown.is_cancelled() {
        let answer = tokio::select! {
            _ = shutdown.cancelled() => None,
            answer = confirm.confirm(&units) => Some(answer),
        };
        if answer == Some(false) {
            warn!("Aborted.");
            report.declined = true;
            finish(config, &report)?;
            return Ok(report);
        }
    }

    if shutdown.is_cancelled() {
        warn!("Run interrupted: {} droid(s) never dispatched", units.len());
        report.dispatch.cancelled = units;
        finish(config, &report)?;
        return Ok(report);
    }

    let policy = RetryPolicy {
        retries: config.retries,
        backoff_base: BACKOFF_BASE,
        timeout: config.timeout,
    };
    report.dispatch =
        dispatch::dispatch_all(units, remediator, config.concurrency, &policy, shutdown).await;

    if !report.dispatch.cancelled.is_empty() {
        warn!(
            "Run interrupted: {} droid(s) never dispatched",
            report.dispatch.cancelled.len()
        );
    }

    finish(config, &report)?;
    Ok(report)
}

fn finish(config: &Config, report: &RunReport) -> anyhow::Result<()> {
    render::print_summary(report);
    if let Some((path, format)) = &config.output {
        render::write_output(path, *format, report)?;
    }
    Ok(())
}
