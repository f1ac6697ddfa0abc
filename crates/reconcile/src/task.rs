//! Resource trait and the task arena
//!
//! A task is a typed description of one infrastructure object. Tasks never
//! own each other: a field that points at another task holds a [`Link`],
//! which is either the other task's [`TaskKey`] or an identifier already
//! known to the provider. All tasks of a run live in a [`TaskSet`].

use crate::context::Context;
use crate::diff::Differ;
use crate::error::{Error, Result};
use crate::reconciler::{self, RunContext, TaskRun};
use crate::target::{BackendKind, TemplateWriter, template_name};
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};

/// Identity of a task within a run: its kind and its name.
///
/// Ordering is by kind, then name; the scheduler and every report use it
/// as the stable tie-break.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TaskKey {
    pub kind: &'static str,
    pub name: String,
}

impl TaskKey {
    pub fn new(kind: &'static str, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    /// Key of the task of type `R` with the given name.
    pub fn of<R: Resource>(name: impl Into<String>) -> Self {
        Self::new(R::KIND, name)
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// Policy governing what a run may do to a task's resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum Lifecycle {
    /// Create or update the resource to match
    #[default]
    Sync,
    /// Leave the resource alone; no discovery, no render
    Ignore,
    /// Like `Sync`, but a permission error during discovery is logged and
    /// the resource is assumed correct; nothing is rendered
    WarnIfInsufficientAccess,
    /// The resource must already exist and match; never rendered
    ExistsAndValidates,
    /// The resource must already exist; differences are logged, never rendered
    ExistsAndWarnIfChanges,
}

impl Lifecycle {
    /// Whether tasks under this lifecycle reach the render step.
    pub fn renders(&self) -> bool {
        matches!(self, Self::Sync | Self::WarnIfInsufficientAccess)
    }
}

/// A reference from one task's field to another resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Link {
    /// Another task in the same run
    Task(TaskKey),
    /// A resource already known to the provider by identifier
    Id(String),
}

impl Link {
    /// Link to the task of type `R` with the given name.
    pub fn to<R: Resource>(name: impl Into<String>) -> Self {
        Link::Task(TaskKey::of::<R>(name))
    }

    pub fn id(id: impl Into<String>) -> Self {
        Link::Id(id.into())
    }

    /// The linked task, if this link points into the run.
    pub fn task(&self) -> Option<&TaskKey> {
        match self {
            Link::Task(key) => Some(key),
            Link::Id(_) => None,
        }
    }
}

/// Read access to the identifiers of other tasks in the run.
pub trait ResolveLinks: Send + Sync {
    /// The task's current identity key, if it has one yet.
    fn identifier(&self, key: &TaskKey) -> Option<String>;

    /// The `(type, name)` address of the task's template block, or `None`
    /// if the task renders no block.
    fn template_address(&self, key: &TaskKey) -> Option<(&'static str, String)>;

    /// Resolve a link to an identifier.
    fn resolve(&self, link: &Link) -> Option<String> {
        match link {
            Link::Task(key) => self.identifier(key),
            Link::Id(id) => Some(id.clone()),
        }
    }
}

/// A surplus cloud object reported by a task.
pub trait Deletion<C: ?Sized>: Send + fmt::Debug {
    /// Human-readable description of what will be removed.
    fn item(&self) -> String;

    /// Remove the object.
    fn delete(&self, ctx: &Context<'_, C>) -> anyhow::Result<()>;
}

/// Core trait for reconcilable resources
///
/// A type implementing `Resource` is simultaneously the expected state
/// (built by the caller), the actual state (returned by [`find`]) and the
/// changes between them (returned by [`diff`]). Fields use `Option` so
/// that "unset" is distinguishable from an explicit value.
///
/// [`find`]: Resource::find
/// [`diff`]: Resource::diff
pub trait Resource: Clone + Default + fmt::Debug + Send + Sync + 'static {
    /// The provider handle passed to discovery and direct rendering
    type Cloud: ?Sized + Send + Sync + 'static;

    /// Task kind, e.g. "Subnet"
    const KIND: &'static str;

    /// Backends this task type can be rendered through.
    ///
    /// The dry-run backend needs no per-type support and is always allowed.
    const BACKENDS: &'static [BackendKind];

    /// Resource type used for template blocks, e.g.
    /// `openstack_networking_subnet_v2`
    const TEMPLATE_TYPE: Option<&'static str> = None;

    /// Task name; unique within the kind
    fn name(&self) -> &str;

    fn lifecycle(&self) -> Lifecycle {
        Lifecycle::Sync
    }

    /// Identity key used to match expected to actual and to resolve links.
    fn compare_with_id(&self) -> Option<&str> {
        None
    }

    /// Every link field that is set. Linked tasks become dependencies.
    fn links(&self) -> Vec<&Link> {
        Vec::new()
    }

    /// Additional dependencies, chosen by inspecting the whole run.
    ///
    /// The common case is "every task of kind X": see [`TaskSet::keys_of`].
    fn dependencies(&self, _tasks: &TaskSet<Self::Cloud>) -> Vec<TaskKey> {
        Vec::new()
    }

    /// Adjust the expected state before discovery (e.g. add cluster tags).
    fn normalize(&mut self, _cloud: &Self::Cloud) -> anyhow::Result<()> {
        Ok(())
    }

    /// Discover the actual resource.
    ///
    /// Returns `Ok(None)` if it does not exist. More than one candidate is an
    /// [`Error::AmbiguousMatch`]; see [`crate::single_match`].
    fn find(&self, ctx: &Context<'_, Self::Cloud>) -> anyhow::Result<Option<Self>>;

    /// Copy identity fields from a discovered resource into the expected one.
    ///
    /// Called before rendering whenever the resource exists, so that tasks
    /// rendered later observe the identifier even if nothing is applied.
    fn adopt(&mut self, _actual: &Self) {}

    /// Field-by-field changes from `actual` to `expected`.
    ///
    /// When the resource does not exist `actual` is `Self::default()`.
    fn diff(actual: &Self, expected: &Self, differ: &mut Differ<'_>) -> Self;

    /// Reject changes that cannot be applied.
    fn check_changes(actual: Option<&Self>, expected: &Self, changes: &Self) -> Result<()>;

    /// Apply through the live provider API.
    ///
    /// On create, write the provider-assigned identifier into `expected`.
    fn render_direct(
        _ctx: &Context<'_, Self::Cloud>,
        _actual: Option<&Self>,
        _expected: &mut Self,
        _changes: &Self,
    ) -> anyhow::Result<()> {
        Err(unsupported::<Self>(BackendKind::Direct).into())
    }

    /// Emit template blocks.
    fn render_template(
        _writer: &TemplateWriter<'_>,
        _actual: Option<&Self>,
        _expected: &Self,
        _changes: &Self,
    ) -> anyhow::Result<()> {
        Err(unsupported::<Self>(BackendKind::Template).into())
    }

    /// Surplus objects owned by this task that should be removed.
    fn find_deletions(
        &self,
        _ctx: &Context<'_, Self::Cloud>,
    ) -> anyhow::Result<Vec<Box<dyn Deletion<Self::Cloud>>>> {
        Ok(Vec::new())
    }
}

fn unsupported<R: Resource>(backend: BackendKind) -> Error {
    Error::UnsupportedBackend {
        backend,
        tasks: vec![TaskKey::new(R::KIND, "*")],
    }
}

/// Type-erased view of one slot in the arena.
pub(crate) trait AnyTask<C: ?Sized>: Send + Sync {
    fn key(&self) -> &TaskKey;
    fn lifecycle(&self) -> Lifecycle;
    fn dependencies(&self, tasks: &TaskSet<C>) -> Vec<TaskKey>;
    fn link_keys(&self) -> Vec<TaskKey>;
    fn identifier(&self) -> Option<String>;
    fn template_type(&self) -> Option<&'static str>;
    fn supports(&self, backend: BackendKind) -> bool;
    fn run(&self, run: &RunContext<'_, C>) -> Result<TaskRun>;
    fn as_any(&self) -> &dyn Any;
}

/// One task and its key. The lock is taken for reads by other tasks and
/// for the single write-back after a successful apply.
pub(crate) struct Slot<R> {
    key: TaskKey,
    task: RwLock<R>,
}

impl<R: Resource> Slot<R> {
    pub(crate) fn key(&self) -> &TaskKey {
        &self.key
    }

    pub(crate) fn read(&self) -> R {
        self.task
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn write_back(&self, task: R) {
        *self.task.write().unwrap_or_else(PoisonError::into_inner) = task;
    }
}

impl<R: Resource> AnyTask<R::Cloud> for Slot<R> {
    fn key(&self) -> &TaskKey {
        &self.key
    }

    fn lifecycle(&self) -> Lifecycle {
        self.task
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .lifecycle()
    }

    fn dependencies(&self, tasks: &TaskSet<R::Cloud>) -> Vec<TaskKey> {
        self.read().dependencies(tasks)
    }

    fn link_keys(&self) -> Vec<TaskKey> {
        let task = self.task.read().unwrap_or_else(PoisonError::into_inner);
        task.links()
            .into_iter()
            .filter_map(Link::task)
            .cloned()
            .collect()
    }

    fn identifier(&self) -> Option<String> {
        self.task
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .compare_with_id()
            .map(str::to_string)
    }

    fn template_type(&self) -> Option<&'static str> {
        R::TEMPLATE_TYPE
    }

    fn supports(&self, backend: BackendKind) -> bool {
        backend == BackendKind::DryRun || R::BACKENDS.contains(&backend)
    }

    fn run(&self, run: &RunContext<'_, R::Cloud>) -> Result<TaskRun> {
        reconciler::reconcile(self, run)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Ordered arena of the tasks in one run.
///
/// Insertion order is preserved and indices are stable. After a run, the
/// expected tasks hold every identifier written back by the engine; read
/// them with [`TaskSet::get`].
pub struct TaskSet<C: ?Sized> {
    entries: Vec<Box<dyn AnyTask<C>>>,
    index: HashMap<TaskKey, usize>,
}

impl<C: ?Sized + Send + Sync + 'static> TaskSet<C> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Add a task, rejecting duplicate keys.
    pub fn add<R: Resource<Cloud = C>>(&mut self, task: R) -> Result<TaskKey> {
        let key = TaskKey::new(R::KIND, task.name());
        if self.index.contains_key(&key) {
            return Err(Error::DuplicateTask(key));
        }
        self.index.insert(key.clone(), self.entries.len());
        self.entries.push(Box::new(Slot {
            key: key.clone(),
            task: RwLock::new(task),
        }));
        Ok(key)
    }

    /// A copy of the task of type `R` with the given name.
    pub fn get<R: Resource<Cloud = C>>(&self, name: &str) -> Option<R> {
        let idx = *self.index.get(&TaskKey::new(R::KIND, name))?;
        self.entries[idx]
            .as_any()
            .downcast_ref::<Slot<R>>()
            .map(Slot::read)
    }

    /// Keys of every task of type `R`, in insertion order.
    pub fn keys_of<R: Resource>(&self) -> Vec<TaskKey> {
        self.entries
            .iter()
            .map(|e| e.key())
            .filter(|k| k.kind == R::KIND)
            .cloned()
            .collect()
    }

    pub fn keys(&self) -> impl Iterator<Item = &TaskKey> {
        self.entries.iter().map(|e| e.key())
    }

    pub fn contains(&self, key: &TaskKey) -> bool {
        self.index.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn position(&self, key: &TaskKey) -> Option<usize> {
        self.index.get(key).copied()
    }

    pub(crate) fn entry(&self, idx: usize) -> &dyn AnyTask<C> {
        self.entries[idx].as_ref()
    }
}

impl<C: ?Sized + Send + Sync + 'static> Default for TaskSet<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: ?Sized + Send + Sync + 'static> ResolveLinks for TaskSet<C> {
    fn identifier(&self, key: &TaskKey) -> Option<String> {
        self.position(key)
            .and_then(|idx| self.entries[idx].identifier())
    }

    fn template_address(&self, key: &TaskKey) -> Option<(&'static str, String)> {
        let entry = &self.entries[self.position(key)?];
        if !entry.lifecycle().renders() {
            return None;
        }
        let resource_type = entry.template_type()?;
        Some((resource_type, template_name(&key.name)))
    }
}

impl<C: ?Sized> fmt::Debug for TaskSet<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| e.key()))
            .finish()
    }
}
