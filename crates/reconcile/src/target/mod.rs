//! Render targets
//!
//! Exactly one [`Target`] is active per run. The dispatcher matches on it
//! and calls the task's backend-specific render routine; task types declare
//! the backends they support in [`Resource::BACKENDS`] and the run is
//! rejected up front if any task cannot be rendered through the target.
//!
//! [`Resource::BACKENDS`]: crate::Resource::BACKENDS

mod dry_run;
mod template;

pub use dry_run::{ChangeKind, DryRunTarget, PlannedChange};
pub use template::{TemplateTarget, TemplateWriter, template_name};

use serde::Serialize;
use std::fmt;

/// The backend families a task type can implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BackendKind {
    /// Live provider API mutation
    Direct,
    /// Infrastructure-as-code template emission
    Template,
    /// Change report only
    DryRun,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Direct => write!(f, "direct"),
            BackendKind::Template => write!(f, "template"),
            BackendKind::DryRun => write!(f, "dry-run"),
        }
    }
}

/// Direct-apply settings.
#[derive(Debug, Clone)]
pub struct DirectTarget {
    /// Remove surplus objects reported by tasks' `find_deletions`
    pub process_deletions: bool,
}

impl Default for DirectTarget {
    fn default() -> Self {
        Self {
            process_deletions: true,
        }
    }
}

/// The backend chosen for a run.
#[derive(Debug)]
pub enum Target {
    Direct(DirectTarget),
    Template(TemplateTarget),
    DryRun(DryRunTarget),
}

impl Target {
    pub fn direct() -> Self {
        Target::Direct(DirectTarget::default())
    }

    pub fn template() -> Self {
        Target::Template(TemplateTarget::new())
    }

    pub fn dry_run() -> Self {
        Target::DryRun(DryRunTarget::new())
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            Target::Direct(_) => BackendKind::Direct,
            Target::Template(_) => BackendKind::Template,
            Target::DryRun(_) => BackendKind::DryRun,
        }
    }

    /// Whether tasks' deletions are consulted for this target.
    ///
    /// Templates describe the full desired state, so surplus objects are
    /// the template tool's business, not ours.
    pub fn processes_deletions(&self) -> bool {
        match self {
            Target::Direct(direct) => direct.process_deletions,
            Target::Template(_) => false,
            Target::DryRun(_) => true,
        }
    }

    pub fn as_template(&self) -> Option<&TemplateTarget> {
        match self {
            Target::Template(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_dry_run(&self) -> Option<&DryRunTarget> {
        match self {
            Target::DryRun(t) => Some(t),
            _ => None,
        }
    }
}
