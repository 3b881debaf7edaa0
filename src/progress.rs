//! Terminal progress for `apply`.
//!
//! A spinner shows the node in flight; finished nodes are printed above it
//! as one line each.

use colored::Colorize;
use converge::{NodeId, NodeOutcome, Origin, ProgressCallback};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

pub struct ApplyProgress {
    bar: ProgressBar,
    /// Print a line per finished node
    lines: bool,
}

impl ApplyProgress {
    /// `verbose` is the `-v` count; from debug logging on, the log lines
    /// replace the spinner, which would otherwise redraw over them.
    pub fn new(quiet: bool, verbose: u8) -> Self {
        let bar = if quiet || verbose >= 2 {
            ProgressBar::hidden()
        } else {
            let bar = ProgressBar::new_spinner();
            bar.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.green} {msg} {elapsed:.dim}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            bar.enable_steady_tick(Duration::from_millis(100));
            bar
        };
        Self { bar, lines: !quiet }
    }

    /// Remove the spinner
    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }

    fn line(&self, line: String) {
        if self.lines {
            self.bar.suspend(|| println!("{line}"));
        }
    }
}

fn outcome_label(outcome: &NodeOutcome) -> String {
    match outcome {
        NodeOutcome::Resolved(Origin::Created) => "created".green().to_string(),
        NodeOutcome::Resolved(Origin::Adopted) => "adopted".cyan().to_string(),
        NodeOutcome::Resolved(Origin::LookedUp) => "found".to_string(),
        NodeOutcome::Resolved(Origin::Derived) => "ready".to_string(),
        NodeOutcome::Ran => "done".green().to_string(),
        NodeOutcome::Skipped { reason } => format!("skipped: {reason}").dimmed().to_string(),
    }
}

impl ProgressCallback for ApplyProgress {
    fn on_wave_start(&self, index: usize, count: usize) {
        log::debug!("Wave {} ({count} node(s))", index + 1);
    }

    fn on_node_start(&self, node: &NodeId, description: &str) {
        self.bar.set_message(format!("{} {}", node.id().bold(), description.dimmed()));
    }

    fn on_node_complete(&self, node: &NodeId, outcome: &NodeOutcome) {
        self.line(format!("  {} {} ({})", "✓".green(), node.id(), outcome_label(outcome)));
    }

    fn on_node_failed(&self, node: &NodeId, error: &str) {
        self.line(format!("  {} {} {}", "✗".red(), node.id(), error.red()));
    }

    fn on_wait(&self, host: &str, attempt: u32, elapsed: Duration) {
        self.bar.set_message(format!(
            "waiting for {} to accept SSH (attempt {attempt}, {}s)",
            host.bold(),
            elapsed.as_secs()
        ));
    }

    fn on_retry(&self, node: &str, attempt: u32, max_attempts: u32, delay: Duration) {
        self.line(format!(
            "  {} {node}: retrying in {:.1}s ({attempt}/{max_attempts})",
            "⚠".yellow(),
            delay.as_secs_f64()
        ));
    }
}
