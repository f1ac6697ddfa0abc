//! Progress bar for converge runs.

use indicatif::{ProgressBar, ProgressStyle};
use reconcile::{Action, ProgressCallback, TaskKey, TaskReport, TaskState};

/// Drives an indicatif bar from engine callbacks.
pub struct TaskProgress {
    bar: ProgressBar,
}

impl TaskProgress {
    pub fn new(quiet: bool) -> Self {
        let bar = if quiet {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(0)
        };
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        Self { bar }
    }
}

/// Status glyph for a finished task.
pub fn symbol(report: &TaskReport) -> &'static str {
    match (report.state, report.action) {
        (TaskState::Done, Some(Action::Created | Action::Updated)) => "✓",
        (TaskState::Done, _) => "○",
        (TaskState::Failed, _) => "✗",
        (TaskState::Skipped | TaskState::Cancelled, _) => "⊘",
        _ => "?",
    }
}

impl ProgressCallback for TaskProgress {
    fn on_run_start(&mut self, total: usize) {
        self.bar.set_length(total as u64);
    }

    fn on_task_start(&mut self, key: &TaskKey) {
        self.bar.set_message(key.to_string());
    }

    fn on_task_complete(&mut self, report: &TaskReport) {
        self.bar
            .set_message(format!("{} {}", symbol(report), report.key));
        self.bar.inc(1);
    }

    fn on_run_complete(&mut self) {
        self.bar.finish_and_clear();
    }
}
