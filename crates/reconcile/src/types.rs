//! Options and reports for converge runs

use crate::error::Error;
use crate::state::TaskState;
use crate::task::TaskKey;
use serde::Serialize;
use std::time::Duration;

/// Options for a converge run
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Maximum number of tasks running at once
    pub jobs: usize,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self { jobs: 4 }
    }
}

/// What the engine did with a task that reached `Done`.
///
/// Under the dry-run target these describe what would have been done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Action {
    /// The resource did not exist and was rendered
    Created,
    /// The resource existed with differences and was rendered
    Updated,
    /// The resource already matched
    Unchanged,
    /// Lifecycle is `Ignore`
    Ignored,
    /// Lifecycle only checks the resource; it was found
    Verified,
}

/// Terminal outcome of one task.
#[derive(Debug)]
pub struct TaskReport {
    pub key: TaskKey,
    pub state: TaskState,
    /// Set when `state` is `Done`
    pub action: Option<Action>,
    /// Fields that differed between actual and expected
    pub changed: Vec<&'static str>,
    /// The task's identity key after write-back
    pub identifier: Option<String>,
    /// Set when `state` is `Failed` or `Cancelled`
    pub error: Option<Error>,
    /// For `Skipped` tasks, the failed task that blocked them
    pub blocked_by: Option<TaskKey>,
    /// Surplus objects removed (or, for dry-run, that would be removed)
    pub deletions: Vec<String>,
}

impl TaskReport {
    pub(crate) fn new(key: TaskKey, state: TaskState) -> Self {
        Self {
            key,
            state,
            action: None,
            changed: Vec::new(),
            identifier: None,
            error: None,
            blocked_by: None,
            deletions: Vec::new(),
        }
    }

    /// Whether the task created or updated its resource.
    pub fn is_change(&self) -> bool {
        matches!(self.action, Some(Action::Created | Action::Updated)) || !self.deletions.is_empty()
    }
}

/// Overall outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    /// Every task is `Done`
    Converged,
    /// At least one task failed or was skipped
    Failed,
    /// The run was cancelled
    Cancelled,
}

/// Every task's terminal state, ordered by task key.
#[derive(Debug, Default)]
pub struct RunReport {
    pub tasks: Vec<TaskReport>,
}

impl RunReport {
    pub fn get(&self, key: &TaskKey) -> Option<&TaskReport> {
        self.tasks
            .binary_search_by(|r| r.key.cmp(key))
            .ok()
            .map(|i| &self.tasks[i])
    }

    /// Tasks that did not reach `Done`.
    pub fn failed(&self) -> impl Iterator<Item = &TaskReport> {
        self.tasks.iter().filter(|r| r.state != TaskState::Done)
    }

    pub fn status(&self) -> RunStatus {
        if self.tasks.iter().any(|r| r.state == TaskState::Cancelled) {
            RunStatus::Cancelled
        } else if self.failed().next().is_some() {
            RunStatus::Failed
        } else {
            RunStatus::Converged
        }
    }

    pub fn summary(&self) -> ExecuteSummary {
        let mut summary = ExecuteSummary::default();
        for report in &self.tasks {
            summary.add_report(report);
        }
        summary
    }
}

/// Summary of execution results
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecuteSummary {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deleted: usize,
    pub ignored: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
}

impl ExecuteSummary {
    /// Total number of actual changes made
    pub fn total_changes(&self) -> usize {
        self.created + self.updated + self.deleted
    }

    /// Check if execution was fully successful (no failures)
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.skipped == 0 && self.cancelled == 0
    }

    /// Add a task's outcome to the summary
    pub fn add_report(&mut self, report: &TaskReport) {
        self.deleted += report.deletions.len();
        match report.state {
            TaskState::Failed => self.failed += 1,
            TaskState::Skipped => self.skipped += 1,
            TaskState::Cancelled => self.cancelled += 1,
            _ => match report.action {
                Some(Action::Created) => self.created += 1,
                Some(Action::Updated) => self.updated += 1,
                Some(Action::Ignored) => self.ignored += 1,
                Some(Action::Unchanged | Action::Verified) | None => self.unchanged += 1,
            },
        }
    }
}

/// Retry configuration for backend calls.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Maximum delay between retries
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff_factor,
            max_delay: Duration::from_secs(60),
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }

    /// Create a config that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(name: &str, state: TaskState, action: Option<Action>) -> TaskReport {
        TaskReport {
            action,
            ..TaskReport::new(TaskKey::new("Subnet", name), state)
        }
    }

    #[test]
    fn test_summary_counts() {
        let run = RunReport {
            tasks: vec![
                report("a", TaskState::Done, Some(Action::Created)),
                report("b", TaskState::Done, Some(Action::Unchanged)),
                report("c", TaskState::Failed, None),
                report("d", TaskState::Skipped, None),
            ],
        };
        let summary = run.summary();
        assert_eq!(summary.created, 1);
        assert_eq!(summary.unchanged, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.total_changes(), 1);
        assert!(!summary.is_success());
        assert_eq!(run.status(), RunStatus::Failed);
    }

    #[test]
    fn test_status_prefers_cancelled() {
        let run = RunReport {
            tasks: vec![
                report("a", TaskState::Failed, None),
                report("b", TaskState::Cancelled, None),
            ],
        };
        assert_eq!(run.status(), RunStatus::Cancelled);
    }

    #[test]
    fn test_get_by_key() {
        let run = RunReport {
            tasks: vec![
                report("a", TaskState::Done, Some(Action::Created)),
                report("b", TaskState::Done, Some(Action::Updated)),
            ],
        };
        let b = run.get(&TaskKey::new("Subnet", "b")).unwrap();
        assert_eq!(b.action, Some(Action::Updated));
        assert!(run.get(&TaskKey::new("Network", "b")).is_none());
    }

    #[test]
    fn test_delay_for_attempt() {
        let config = RetryConfig::new(5, Duration::from_secs(1), 2.0);
        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(60));
    }
}
