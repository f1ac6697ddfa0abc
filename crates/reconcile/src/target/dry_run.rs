//! Change report target

use crate::task::TaskKey;
use serde::Serialize;
use std::sync::{Mutex, PoisonError};

/// What a run would do to one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ChangeKind {
    Create,
    Update,
    Delete { item: String },
}

/// One entry of the dry-run report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedChange {
    pub key: TaskKey,
    pub kind: ChangeKind,
    /// Fields that would be set; empty for deletions
    pub fields: Vec<&'static str>,
}

impl PlannedChange {
    fn sort_key(&self) -> (&TaskKey, Option<&str>) {
        match &self.kind {
            ChangeKind::Delete { item } => (&self.key, Some(item)),
            _ => (&self.key, None),
        }
    }
}

/// Collects planned changes instead of applying them.
#[derive(Debug, Default)]
pub struct DryRunTarget {
    changes: Mutex<Vec<PlannedChange>>,
}

impl DryRunTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&self, change: PlannedChange) {
        self.changes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(change);
    }

    /// Every planned change, ordered by task key.
    ///
    /// Deletions follow the create or update of the task that reported
    /// them.
    pub fn changes(&self) -> Vec<PlannedChange> {
        let mut changes = self
            .changes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        changes.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        changes
    }

    pub fn is_empty(&self) -> bool {
        self.changes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }
}
