//! OpenStack tasks for the cluster's network and API load balancer
//!
//! Each task type implements [`reconcile::Resource`] against [`Cloud`]. The
//! type doubles as expected state, discovered state and changes, so every
//! field is optional and unset means "not managed".

pub mod lbpool;
pub mod lblistener;
pub mod loadbalancer;
pub mod network;
pub mod security_group;
pub mod subnet;

pub use lblistener::LbListener;
pub use lbpool::LbPool;
pub use loadbalancer::LoadBalancer;
pub use network::Network;
pub use security_group::{SecurityGroup, SecurityGroupRule};
pub use subnet::Subnet;

use crate::cloud::Cloud;
use reconcile::{Context, Link};

/// The cluster tag as discovered: set only if the object carries the tag
/// the expected state asks for.
fn discovered_tag(tags: &[String], expected: &Option<String>) -> Option<String> {
    expected
        .as_ref()
        .filter(|tag| tags.iter().any(|t| t == *tag))
        .cloned()
}

/// Resolve a link for discovery.
///
/// A linked task without an identifier has not been created yet, so
/// nothing that depends on it can exist either.
fn lookup_id(ctx: &Context<'_, Cloud>, link: &Option<Link>) -> Option<String> {
    link.as_ref().and_then(|l| ctx.resolve(l))
}
