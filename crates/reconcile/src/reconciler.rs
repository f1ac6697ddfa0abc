//! Per-task pipeline: normalize, discover, diff, validate, render
//!
//! Runs on a worker thread once every dependency of the task is `Done`.
//! The cancel token is checked at each step boundary; an API call in
//! flight is allowed to finish.

use crate::context::{CancelToken, Context};
use crate::diff::Differ;
use crate::error::{Error, ErrorCategory, Result};
use crate::state::{StateTable, TaskState};
use crate::target::{ChangeKind, PlannedChange, Target, TemplateWriter};
use crate::task::{Lifecycle, Resource, Slot, TaskKey, TaskSet};
use crate::types::Action;
use log::{debug, info, warn};

/// Everything a worker needs to run one task.
pub(crate) struct RunContext<'a, C: ?Sized> {
    pub cloud: &'a C,
    pub tasks: &'a TaskSet<C>,
    pub target: &'a Target,
    pub states: &'a StateTable,
    pub cancel: &'a CancelToken,
    pub index: usize,
}

impl<C: ?Sized> RunContext<'_, C> {
    fn step(&self, key: &TaskKey, state: TaskState) -> Result<()> {
        self.cancel.check()?;
        self.states.set(self.index, key, state);
        Ok(())
    }
}

/// Outcome of a task that completed its pipeline.
#[derive(Debug)]
pub(crate) struct TaskRun {
    pub action: Action,
    pub changed: Vec<&'static str>,
    pub deletions: Vec<String>,
}

impl TaskRun {
    fn new(action: Action, changed: Vec<&'static str>) -> Self {
        Self {
            action,
            changed,
            deletions: Vec::new(),
        }
    }
}

pub(crate) fn reconcile<R: Resource>(slot: &Slot<R>, run: &RunContext<'_, R::Cloud>) -> Result<TaskRun> {
    let key = slot.key();
    let mut expected = slot.read();
    let lifecycle = expected.lifecycle();

    if lifecycle == Lifecycle::Ignore {
        debug!("{key}: lifecycle is Ignore");
        return Ok(TaskRun::new(Action::Ignored, Vec::new()));
    }

    let ctx = Context::new(run.cloud, key, run.tasks, run.cancel);

    run.step(key, TaskState::Discovering)?;
    expected.normalize(run.cloud).map_err(Error::classify)?;
    let actual = match expected.find(&ctx) {
        Ok(found) => found,
        Err(err) => {
            let err = Error::classify(err);
            if lifecycle == Lifecycle::WarnIfInsufficientAccess
                && err.category() == ErrorCategory::Permission
            {
                // The object may well exist; rendering could duplicate it.
                warn!("{key}: {err}; assuming it is correctly configured");
                return Ok(TaskRun::new(Action::Verified, Vec::new()));
            }
            return Err(err);
        }
    };

    run.step(key, TaskState::Diffing)?;
    let mut differ = Differ::new(run.tasks);
    let absent = R::default();
    let changes = R::diff(actual.as_ref().unwrap_or(&absent), &expected, &mut differ);
    let changed = differ.into_changed();
    debug!("{key}: changed fields {changed:?}");

    if !lifecycle.renders() {
        let Some(actual) = actual else {
            return Err(Error::NotFound(key.clone()));
        };
        if !changed.is_empty() {
            if lifecycle == Lifecycle::ExistsAndValidates {
                return Err(Error::Drift {
                    key: key.clone(),
                    fields: changed,
                });
            }
            warn!(
                "{key} differs from the desired state: {}",
                changed.join(", ")
            );
        }
        expected.adopt(&actual);
        slot.write_back(expected);
        return Ok(TaskRun::new(Action::Verified, changed));
    }

    run.step(key, TaskState::Validating)?;
    R::check_changes(actual.as_ref(), &expected, &changes)?;

    if let Some(actual) = &actual {
        expected.adopt(actual);
    }
    let action = match &actual {
        None => Action::Created,
        Some(_) if changed.is_empty() => Action::Unchanged,
        Some(_) => Action::Updated,
    };

    run.step(key, TaskState::Rendering)?;
    match run.target {
        Target::Direct(_) => {
            if action == Action::Unchanged {
                debug!("{key}: up to date");
            } else {
                info!("{key}: {action:?} ({})", changed.join(", "));
                R::render_direct(&ctx, actual.as_ref(), &mut expected, &changes)
                    .map_err(Error::classify)?;
            }
        }
        Target::Template(template) => {
            let writer = TemplateWriter::new(template, key, run.tasks);
            R::render_template(&writer, actual.as_ref(), &expected, &changes)
                .map_err(Error::classify)?;
        }
        Target::DryRun(dry_run) => {
            let kind = match action {
                Action::Created => Some(ChangeKind::Create),
                Action::Updated => Some(ChangeKind::Update),
                _ => None,
            };
            if let Some(kind) = kind {
                dry_run.record(PlannedChange {
                    key: key.clone(),
                    kind,
                    fields: changed.clone(),
                });
            }
        }
    }
    slot.write_back(expected.clone());

    let mut result = TaskRun::new(action, changed);
    if lifecycle == Lifecycle::Sync && run.target.processes_deletions() {
        result.deletions = process_deletions(&expected, &ctx, run)?;
    }
    Ok(result)
}

fn process_deletions<R: Resource>(
    expected: &R,
    ctx: &Context<'_, R::Cloud>,
    run: &RunContext<'_, R::Cloud>,
) -> Result<Vec<String>> {
    let mut removed = Vec::new();
    for deletion in expected.find_deletions(ctx).map_err(Error::classify)? {
        run.cancel.check()?;
        let item = deletion.item();
        match run.target {
            Target::DryRun(dry_run) => dry_run.record(PlannedChange {
                key: ctx.key.clone(),
                kind: ChangeKind::Delete { item: item.clone() },
                fields: Vec::new(),
            }),
            _ => {
                info!("{}: deleting {item}", ctx.key);
                deletion.delete(ctx).map_err(Error::classify)?;
            }
        }
        removed.push(item);
    }
    Ok(removed)
}
