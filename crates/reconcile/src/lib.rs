//! # Reconcile
//!
//! A dependency-ordered, diff-based convergence engine for infrastructure
//! resources.
//!
//! The caller describes the desired world as a [`TaskSet`] of typed
//! resources. For every task, in dependency order, the engine discovers the
//! actual resource, diffs it field by field against the expected one,
//! validates the changes, and renders them through the run's [`Target`]:
//! live API calls, a Terraform JSON template, or a dry-run report.
//!
//! ## Core Concepts
//!
//! - **Resource**: a typed description of one infrastructure object; the
//!   same type holds expected state, actual state and changes
//! - **Link**: a reference from one task's field to another task or to a
//!   known provider identifier; links become dependency edges
//! - **Target**: the backend chosen for a run
//! - **Engine**: walks the dependency graph with bounded parallelism
//!
//! ## Example
//!
//! ```ignore
//! use reconcile::{Engine, ExecuteOptions, Target, TaskSet};
//!
//! let mut tasks = TaskSet::new();
//! tasks.add(Network { name: Some("main".into()), ..Default::default() })?;
//! tasks.add(Subnet {
//!     name: Some("main-a".into()),
//!     network: Some(Link::to::<Network>("main")),
//!     cidr: Some("10.0.1.0/24".into()),
//!     ..Default::default()
//! })?;
//!
//! let engine = Engine::new(Target::direct(), ExecuteOptions::default());
//! let report = engine.converge(&cloud, &tasks)?;
//!
//! // Identifiers assigned by the provider are written back.
//! let subnet: Subnet = tasks.get("main-a").unwrap();
//! println!("created {:?}", subnet.id);
//! ```
//!
//! ## Provider Traits
//!
//! The crate knows nothing about any cloud. Resources reach the provider
//! through the `Cloud` associated type of [`Resource`], and report progress
//! through [`ProgressCallback`], so the engine can be driven by any client
//! and any UI.

pub mod context;
pub mod diff;
pub mod error;
pub mod executor;
pub mod graph;
mod reconciler;
pub mod retry;
pub mod state;
pub mod target;
pub mod task;
pub mod types;
pub mod validate;

// Re-export main types at crate root
pub use context::{CancelToken, Context, NoProgress, ProgressCallback};
pub use diff::{CollectionPolicy, Differ};
pub use error::{Error, ErrorCategory, Result};
pub use executor::{ConvergeError, Engine};
pub use graph::DependencyGraph;
pub use retry::{LogCallback, RetryCallback, Retryable, with_retry, with_retry_cancellable};
pub use state::TaskState;
pub use target::{
    BackendKind, ChangeKind, DirectTarget, DryRunTarget, PlannedChange, Target, TemplateTarget,
    TemplateWriter, template_name,
};
pub use task::{Deletion, Lifecycle, Link, ResolveLinks, Resource, TaskKey, TaskSet};
pub use types::{
    Action, ExecuteOptions, ExecuteSummary, RetryConfig, RunReport, RunStatus, TaskReport,
};
pub use validate::{immutable, required, single_match};
