//! Per-task state machine and the shared state table

use crate::task::TaskKey;
use log::debug;
use serde::Serialize;
use std::fmt;
use std::sync::{Mutex, PoisonError};

/// Where a task is in its pipeline.
///
/// `Pending → Discovering → Diffing → Validating → Rendering → Done`, or one
/// of the terminal failure states from any point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TaskState {
    Pending,
    Discovering,
    Diffing,
    Validating,
    Rendering,
    Done,
    /// A step of this task failed
    Failed,
    /// A dependency failed; never attempted
    Skipped,
    /// The run was cancelled before or while this task ran
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Done | Self::Failed | Self::Skipped | Self::Cancelled
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Discovering => "discovering",
            Self::Diffing => "diffing",
            Self::Validating => "validating",
            Self::Rendering => "rendering",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// State of every task in a run, indexed like the task arena.
#[derive(Debug)]
pub(crate) struct StateTable {
    states: Mutex<Vec<TaskState>>,
}

impl StateTable {
    pub(crate) fn new(len: usize) -> Self {
        Self {
            states: Mutex::new(vec![TaskState::Pending; len]),
        }
    }

    pub(crate) fn set(&self, idx: usize, key: &TaskKey, state: TaskState) {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        debug!("{key}: {} -> {state}", states[idx]);
        states[idx] = state;
    }

    pub(crate) fn get(&self, idx: usize) -> TaskState {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)[idx]
    }
}
