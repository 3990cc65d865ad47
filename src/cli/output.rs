//! CLI output formatting

use crate::{
    core::ExecutionStatus,
    execution::ExecutionEvent,
    persistence::{RunSummary, StepSummary},
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Mutex;
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");

/// Create a progress bar over the jobs of a step
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    let style = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("#>-");
    progress.set_style(style);
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Format an execution status for display
pub fn format_status(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Pending => style("PENDING").dim().to_string(),
        ExecutionStatus::Running => style("RUNNING").yellow().to_string(),
        ExecutionStatus::Completed => style("COMPLETED").green().to_string(),
        ExecutionStatus::Failed => style("FAILED").red().to_string(),
        ExecutionStatus::Cancelled => style("CANCELLED").yellow().to_string(),
    }
}

/// Format one step line of a run summary
pub fn format_step_summary(step: &StepSummary) -> String {
    let label = format!("{:>2} {}", step.ordinal, step.key);
    match step.status.as_str() {
        "completed" => format!(
            "{} {} ({} artifact(s), {} job(s))",
            CHECK,
            style(label).green(),
            step.artifacts,
            step.jobs
        ),
        "failed" => format!(
            "{} {}: {}",
            CROSS,
            style(label).red(),
            style(step.error.as_deref().unwrap_or("")).dim()
        ),
        other => format!("   {} {}", style(label).dim(), style(other).dim()),
    }
}

/// Format run summary for display
pub fn format_run_summary(summary: &RunSummary) -> String {
    let status_icon = match summary.status {
        ExecutionStatus::Completed => CHECK,
        ExecutionStatus::Failed => CROSS,
        ExecutionStatus::Running => SPINNER,
        _ => INFO,
    };

    format!(
        "{} {} - {} - {} ({}/{}) - {}",
        status_icon,
        style(&summary.run_id.to_string()[..8]).dim(),
        style(&summary.name).bold(),
        format_status(summary.status),
        summary.completed_steps,
        summary.total_steps,
        style(format!("{:.0}%", summary.progress() * 100.0)).cyan()
    )
}

/// Format an execution event for display
///
/// Job progress is shown on the progress bar instead of a line.
pub fn format_execution_event(event: &ExecutionEvent) -> Option<String> {
    let line = match event {
        ExecutionEvent::RunStarted {
            run_id,
            name,
            steps,
        } => format!(
            "{} Starting run {} ({}) with {} step(s)",
            ROCKET,
            style(name).bold(),
            style(&run_id.to_string()[..8]).dim(),
            steps
        ),
        ExecutionEvent::StepStarted {
            ordinal,
            module,
            key,
        } => {
            if key == module {
                format!("{} {} {}", SPINNER, style(ordinal).dim(), style(module).cyan())
            } else {
                format!(
                    "{} {} {} ({})",
                    SPINNER,
                    style(ordinal).dim(),
                    style(module).cyan(),
                    style(key).dim()
                )
            }
        }
        ExecutionEvent::JobsSubmitted { count, .. } => {
            format!("{} Dispatching {} job(s)", INFO, style(count).cyan())
        }
        ExecutionEvent::JobProgress { .. } => return None,
        ExecutionEvent::StepCompleted {
            ordinal,
            module,
            artifacts,
            ..
        } => format!(
            "{} {} {} → {} artifact(s)",
            CHECK,
            style(ordinal).dim(),
            style(module).green(),
            artifacts
        ),
        ExecutionEvent::StepFailed {
            ordinal,
            module,
            error,
        } => format!(
            "{} {} {}: {}",
            CROSS,
            style(ordinal).dim(),
            style(module).red(),
            style(error).dim()
        ),
        ExecutionEvent::RunCompleted { run_id, status } => {
            let status_str = match status {
                ExecutionStatus::Completed => {
                    format!("{} completed", style("successfully").green())
                }
                ExecutionStatus::Failed => style("failed").red().to_string(),
                ExecutionStatus::Cancelled => style("was interrupted").yellow().to_string(),
                other => other.as_str().to_string(),
            };
            format!(
                "{} Run ({}) {}",
                INFO,
                style(&run_id.to_string()[..8]).dim(),
                status_str
            )
        }
    };
    Some(line)
}

/// Console reporter fed by execution events
///
/// Prints one line per event and keeps a progress bar over the jobs of the
/// step that is running.
#[derive(Default)]
pub struct ConsoleReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl ConsoleReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self, event: &ExecutionEvent) {
        let Ok(mut bar) = self.bar.lock() else {
            return;
        };

        match event {
            ExecutionEvent::JobsSubmitted { count, .. } => {
                if let Some(old) = bar.take() {
                    old.finish_and_clear();
                }
                *bar = Some(create_progress_bar(*count));
            }
            ExecutionEvent::JobProgress {
                finished, failed, ..
            } => {
                if let Some(bar) = bar.as_ref() {
                    bar.set_position(*finished as u64);
                    if *failed > 0 {
                        bar.set_message(format!("{} failed", style(failed).red()));
                    }
                }
            }
            ExecutionEvent::StepCompleted { .. }
            | ExecutionEvent::StepFailed { .. }
            | ExecutionEvent::RunCompleted { .. } => {
                if let Some(old) = bar.take() {
                    old.finish_and_clear();
                }
            }
            _ => {}
        }

        if let Some(line) = format_execution_event(event) {
            match bar.as_ref() {
                Some(bar) => bar.println(line),
                None => println!("{}", line),
            }
        }
    }
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
