//! Progress output for a run.
//!
//! Pure formatting functions returning strings; the controller decides
//! where (and whether) they are printed.

use chrono::Duration;
use colored::Colorize;
use std::fmt::Write;

use super::RunOutcome;

/// Formats a duration for display (e.g., "2m 5s").
pub(crate) fn format_duration(duration: &Duration) -> String {
    let total_seconds = duration.num_seconds().max(0);
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

/// Formats the banner printed once the build configuration is known.
pub(crate) fn format_run_banner(repo: &str, git_ref: &str, image: &str, commands: usize) -> String {
    let mut out = String::new();
    let _ = writeln!(&mut out, "{}", "━".repeat(50).dimmed());
    let _ = writeln!(&mut out, "  Repository: {}", repo.cyan().bold());
    let _ = writeln!(&mut out, "  Ref:        {}", git_ref.cyan());
    let _ = writeln!(&mut out, "  Image:      {}", image.cyan());
    let _ = writeln!(&mut out, "  Commands:   {}", commands.to_string().cyan());
    let _ = write!(&mut out, "{}", "━".repeat(50).dimmed());
    out
}

/// Formats the header printed before a command runs (`[2/5] make test`).
pub(crate) fn format_step_header(index: usize, total: usize, command: &str) -> String {
    format!(
        "{} {}",
        format!("[{}/{}]", index + 1, total).dimmed(),
        command.bold()
    )
}

/// Formats the closing summary of a run.
pub(crate) fn format_summary(outcome: &RunOutcome) -> String {
    let mut out = String::new();
    let elapsed = format_duration(&(outcome.finished_at - outcome.started_at));

    if outcome.succeeded {
        let _ = writeln!(
            &mut out,
            "\n{} Run succeeded: {} command(s) in {}",
            "✔".green(),
            outcome.commands_run,
            elapsed.cyan()
        );
    } else if let Some(code) = outcome.failing_exit_code {
        let _ = writeln!(
            &mut out,
            "\n{} Run failed: command exited with {} after {}",
            "✘".red(),
            code.to_string().red().bold(),
            elapsed.cyan()
        );
    } else {
        let reason = outcome
            .error
            .as_ref()
            .map_or_else(|| "unknown error".to_string(), ToString::to_string);
        let _ = writeln!(
            &mut out,
            "\n{} Run failed after {}: {}",
            "✘".red(),
            elapsed.cyan(),
            reason
        );
    }

    if let Some(ref teardown) = outcome.teardown_error {
        let _ = writeln!(
            &mut out,
            "  {} teardown: {}",
            "warning:".yellow(),
            teardown
        );
    }

    out
}
