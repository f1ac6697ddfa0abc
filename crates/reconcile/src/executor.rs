//! Execution engine - walks the dependency graph with bounded parallelism
//!
//! The calling thread owns the ready queue. Workers on a dedicated rayon
//! pool run one task each and send the result back over a channel; a task
//! is handed out only after every dependency's result has been received,
//! and workers write back before they send, so dependents always observe
//! their dependencies' identifiers.

use crate::context::{CancelToken, NoProgress, ProgressCallback};
use crate::error::{Error, Result};
use crate::graph::DependencyGraph;
use crate::reconciler::{RunContext, TaskRun};
use crate::state::{StateTable, TaskState};
use crate::target::Target;
use crate::task::{TaskKey, TaskSet};
use crate::types::{ExecuteOptions, RunReport, RunStatus, TaskReport};
use crossbeam_channel::unbounded;
use log::{debug, info, warn};
use std::any::Any;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;

/// Why a converge run did not converge.
#[derive(Debug, Error)]
pub enum ConvergeError {
    /// The run was rejected before any task started
    #[error(transparent)]
    Invalid(Error),

    /// At least one task failed; the report lists every task
    #[error("{} of {} tasks did not converge", .0.failed().count(), .0.tasks.len())]
    Failed(Box<RunReport>),

    /// The run was cancelled; the report lists every task
    #[error("run cancelled")]
    Cancelled(Box<RunReport>),
}

impl ConvergeError {
    /// The per-task report, if any task was scheduled.
    pub fn report(&self) -> Option<&RunReport> {
        match self {
            ConvergeError::Invalid(_) => None,
            ConvergeError::Failed(report) | ConvergeError::Cancelled(report) => Some(report),
        }
    }
}

/// A converge run bound to one target.
///
/// Targets accumulate output (template documents, dry-run reports), so use
/// one engine per run.
#[derive(Debug)]
pub struct Engine {
    target: Target,
    options: ExecuteOptions,
    cancel: CancelToken,
}

impl Engine {
    pub fn new(target: Target, options: ExecuteOptions) -> Self {
        Self {
            target,
            options,
            cancel: CancelToken::new(),
        }
    }

    /// Use an existing cancellation token.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// A handle that cancels this engine's run.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn into_target(self) -> Target {
        self.target
    }

    /// Converge `tasks` against `cloud` without progress reporting.
    pub fn converge<C>(&self, cloud: &C, tasks: &TaskSet<C>) -> std::result::Result<RunReport, ConvergeError>
    where
        C: ?Sized + Send + Sync + 'static,
    {
        self.converge_with_progress(cloud, tasks, &mut NoProgress)
    }

    /// Converge `tasks` against `cloud`.
    ///
    /// Returns the report when every task is `Done`. After the run, `tasks`
    /// holds every identifier written back by successful renders.
    pub fn converge_with_progress<C, P>(
        &self,
        cloud: &C,
        tasks: &TaskSet<C>,
        progress: &mut P,
    ) -> std::result::Result<RunReport, ConvergeError>
    where
        C: ?Sized + Send + Sync + 'static,
        P: ProgressCallback,
    {
        self.check_backends(tasks).map_err(ConvergeError::Invalid)?;
        let graph = DependencyGraph::build(tasks).map_err(ConvergeError::Invalid)?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.jobs.max(1))
            .thread_name(|i| format!("reconcile-{i}"))
            .build()
            .map_err(|e| {
                ConvergeError::Invalid(Error::backend(format!("failed to create thread pool: {e}")))
            })?;

        debug!(
            "converging {} tasks in {} layers with {} workers",
            tasks.len(),
            graph.layers().len(),
            self.options.jobs.max(1)
        );
        progress.on_run_start(tasks.len());

        let states = StateTable::new(tasks.len());
        let mut reports: Vec<Option<TaskReport>> = (0..tasks.len()).map(|_| None).collect();
        let mut waiting: Vec<usize> = (0..tasks.len())
            .map(|idx| graph.dependencies(idx).len())
            .collect();
        let mut ready: BinaryHeap<Reverse<(&TaskKey, usize)>> = (0..tasks.len())
            .filter(|&idx| waiting[idx] == 0)
            .map(|idx| Reverse((graph.key(idx), idx)))
            .collect();

        let (sender, receiver) = unbounded::<(usize, Result<TaskRun>)>();
        let jobs = self.options.jobs.max(1);

        pool.in_place_scope(|scope| {
            let mut in_flight = 0;
            loop {
                while in_flight < jobs && !self.cancel.is_cancelled() {
                    let Some(Reverse((key, idx))) = ready.pop() else {
                        break;
                    };
                    progress.on_task_start(key);
                    in_flight += 1;

                    let sender = sender.clone();
                    let run = RunContext {
                        cloud,
                        tasks,
                        target: &self.target,
                        states: &states,
                        cancel: &self.cancel,
                        index: idx,
                    };
                    scope.spawn(move |_| {
                        let result = panic::catch_unwind(AssertUnwindSafe(|| {
                            tasks.entry(idx).run(&run)
                        }))
                        .unwrap_or_else(|payload| {
                            Err(Error::backend(format!("task panicked: {}", panic_message(&*payload))))
                        });
                        // The receiver outlives the scope.
                        let _ = sender.send((idx, result));
                    });
                }

                if in_flight == 0 {
                    break;
                }
                let Ok((idx, result)) = receiver.recv() else {
                    break;
                };
                in_flight -= 1;

                let key = graph.key(idx).clone();
                let report = match result {
                    Ok(run) => {
                        states.set(idx, &key, TaskState::Done);
                        for dependent in graph.dependents(idx) {
                            waiting[dependent] -= 1;
                            if waiting[dependent] == 0 {
                                ready.push(Reverse((graph.key(dependent), dependent)));
                            }
                        }
                        TaskReport {
                            action: Some(run.action),
                            changed: run.changed,
                            identifier: tasks.entry(idx).identifier(),
                            deletions: run.deletions,
                            ..TaskReport::new(key, TaskState::Done)
                        }
                    }
                    Err(Error::Cancelled) => {
                        states.set(idx, &key, TaskState::Cancelled);
                        TaskReport {
                            error: Some(Error::Cancelled),
                            ..TaskReport::new(key, TaskState::Cancelled)
                        }
                    }
                    Err(err) => {
                        warn!("{key} failed: {err}");
                        states.set(idx, &key, TaskState::Failed);
                        for dependent in graph.transitive_dependents(idx) {
                            if states.get(dependent) == TaskState::Pending {
                                let dependent_key = graph.key(dependent).clone();
                                states.set(dependent, &dependent_key, TaskState::Skipped);
                                let skipped = TaskReport {
                                    blocked_by: Some(key.clone()),
                                    ..TaskReport::new(dependent_key, TaskState::Skipped)
                                };
                                progress.on_task_complete(&skipped);
                                reports[dependent] = Some(skipped);
                            }
                        }
                        TaskReport {
                            error: Some(err),
                            ..TaskReport::new(key, TaskState::Failed)
                        }
                    }
                };
                progress.on_task_complete(&report);
                reports[idx] = Some(report);
            }
        });

        // Anything still unreported was never started.
        let mut finished: Vec<TaskReport> = Vec::with_capacity(tasks.len());
        for (idx, report) in reports.into_iter().enumerate() {
            let report = report.unwrap_or_else(|| {
                let key = graph.key(idx).clone();
                states.set(idx, &key, TaskState::Cancelled);
                let report = TaskReport::new(key, TaskState::Cancelled);
                progress.on_task_complete(&report);
                report
            });
            finished.push(report);
        }
        finished.sort_by(|a, b| a.key.cmp(&b.key));
        progress.on_run_complete();

        let report = RunReport { tasks: finished };
        let summary = report.summary();
        info!(
            "{} created, {} updated, {} unchanged, {} failed",
            summary.created, summary.updated, summary.unchanged, summary.failed
        );
        match report.status() {
            RunStatus::Converged => Ok(report),
            RunStatus::Failed => Err(ConvergeError::Failed(Box::new(report))),
            RunStatus::Cancelled => Err(ConvergeError::Cancelled(Box::new(report))),
        }
    }

    /// Reject the run if any rendering task cannot use the target's backend.
    fn check_backends<C>(&self, tasks: &TaskSet<C>) -> Result<()>
    where
        C: ?Sized + Send + Sync + 'static,
    {
        let backend = self.target.kind();
        let mut unsupported: Vec<TaskKey> = (0..tasks.len())
            .map(|idx| tasks.entry(idx))
            .filter(|task| task.lifecycle().renders() && !task.supports(backend))
            .map(|task| task.key().clone())
            .collect();
        if unsupported.is_empty() {
            return Ok(());
        }
        unsupported.sort();
        Err(Error::UnsupportedBackend {
            backend,
            tasks: unsupported,
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
