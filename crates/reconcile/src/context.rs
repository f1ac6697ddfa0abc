//! Per-task context, cancellation and progress reporting
//!
//! These types let resources reach the provider and each other without
//! the crate knowing anything about a particular cloud or UI.

use crate::error::{Error, Result};
use crate::task::{Link, ResolveLinks, TaskKey};
use crate::types::TaskReport;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cooperative cancellation signal for a run.
///
/// Cloning shares the signal. Workers check it between steps; an API call
/// already in flight is never interrupted.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of the run.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Return [`Error::Cancelled`] if cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Context passed to discovery, direct rendering and deletions
pub struct Context<'a, C: ?Sized> {
    /// Handle to the live provider
    pub cloud: &'a C,
    /// The task being reconciled
    pub key: &'a TaskKey,
    links: &'a dyn ResolveLinks,
    cancel: &'a CancelToken,
}

impl<'a, C: ?Sized> Context<'a, C> {
    pub fn new(
        cloud: &'a C,
        key: &'a TaskKey,
        links: &'a dyn ResolveLinks,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            cloud,
            key,
            links,
            cancel,
        }
    }

    /// Resolve a link to an identifier, if the linked resource has one.
    pub fn resolve(&self, link: &Link) -> Option<String> {
        self.links.resolve(link)
    }

    /// Resolve a required link to an identifier.
    ///
    /// Fails with [`Error::RequiredField`] if the link is unset and with
    /// [`Error::UnresolvedLink`] if the linked task has no identifier.
    pub fn link_id(&self, field: &'static str, link: &Option<Link>) -> Result<String> {
        let link = link.as_ref().ok_or(Error::RequiredField(field))?;
        self.resolve(link).ok_or_else(|| match link {
            Link::Task(key) => Error::UnresolvedLink(key.clone()),
            Link::Id(_) => Error::RequiredField(field),
        })
    }

    /// Whether the run has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Progress callback for converge runs
///
/// Called from the thread that invoked `converge`, never from workers.
pub trait ProgressCallback {
    /// Called once the graph is built
    fn on_run_start(&mut self, total: usize);

    /// Called when a task is handed to a worker
    fn on_task_start(&mut self, key: &TaskKey);

    /// Called when a task reaches a terminal state
    fn on_task_complete(&mut self, report: &TaskReport);

    /// Called after every task is terminal
    fn on_run_complete(&mut self);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_run_start(&mut self, _total: usize) {}
    fn on_task_start(&mut self, _key: &TaskKey) {}
    fn on_task_complete(&mut self, _report: &TaskReport) {}
    fn on_run_complete(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ids;

    impl ResolveLinks for Ids {
        fn identifier(&self, key: &TaskKey) -> Option<String> {
            (key.name == "created").then(|| "net-1".to_string())
        }

        fn template_address(&self, _key: &TaskKey) -> Option<(&'static str, String)> {
            None
        }
    }

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(token.check().is_ok());
        clone.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(Error::Cancelled)));
    }

    #[test]
    fn test_link_id() {
        let cancel = CancelToken::new();
        let key = TaskKey::new("Subnet", "a");
        let ctx = Context::new(&(), &key, &Ids, &cancel);

        let created = Some(Link::Task(TaskKey::new("Network", "created")));
        assert_eq!(ctx.link_id("Network", &created).unwrap(), "net-1");

        let pending = Some(Link::Task(TaskKey::new("Network", "pending")));
        assert!(matches!(
            ctx.link_id("Network", &pending),
            Err(Error::UnresolvedLink(_))
        ));

        assert!(matches!(
            ctx.link_id("Network", &None),
            Err(Error::RequiredField("Network"))
        ));

        let known = Some(Link::id("net-9"));
        assert_eq!(ctx.link_id("Network", &known).unwrap(), "net-9");
    }
}
