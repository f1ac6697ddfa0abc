//! Provider surface used by the tasks
//!
//! [`OpenstackApi`] is the narrow set of networking and load-balancer calls
//! the tasks need. [`Cloud`] wraps an implementation with retry and the
//! cluster identity, and is the `Cloud` type every task is bound to.

pub mod memory;

pub use memory::MemoryCloud;

use reconcile::{CancelToken, LogCallback, RetryConfig, Retryable, with_retry_cancellable};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors reported by the provider API.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CloudError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Transient; the same call may succeed later
    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("bad request: {0}")]
    BadRequest(String),
}

impl Retryable for CloudError {
    fn is_retryable(&self) -> bool {
        matches!(self, CloudError::Unavailable(_))
    }
}

impl From<CloudError> for reconcile::Error {
    fn from(err: CloudError) -> Self {
        match err {
            CloudError::Forbidden(msg) => reconcile::Error::Permission(msg),
            CloudError::Unavailable(_) => reconcile::Error::Backend {
                message: err.to_string(),
                retryable: true,
            },
            other => reconcile::Error::backend(other.to_string()),
        }
    }
}

pub type CloudResult<T> = Result<T, CloudError>;

/// Which kind of networking object a tag is applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagTarget {
    Network,
    Subnet,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub availability_zone_hints: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetRecord {
    pub id: String,
    pub name: String,
    pub network_id: String,
    pub cidr: String,
    #[serde(default)]
    pub dns_nameservers: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancerRecord {
    pub id: String,
    pub name: String,
    pub vip_subnet_id: String,
    #[serde(default)]
    pub vip_address: String,
    pub provider: String,
    #[serde(default)]
    pub security_group_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolRecord {
    pub id: String,
    pub name: String,
    pub loadbalancer_id: String,
    pub lb_method: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerRecord {
    pub id: String,
    pub name: String,
    pub port: u16,
    pub default_pool_id: String,
    pub loadbalancer_id: String,
    #[serde(default)]
    pub allowed_cidrs: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroupRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleRecord {
    pub id: String,
    pub security_group_id: String,
    pub direction: String,
    pub ethertype: String,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub port_range_min: Option<u16>,
    #[serde(default)]
    pub port_range_max: Option<u16>,
    #[serde(default)]
    pub remote_ip_prefix: Option<String>,
}

/// Filter for subnet listing; unset fields match anything.
#[derive(Debug, Clone, Default)]
pub struct SubnetFilter {
    pub id: Option<String>,
    pub name: Option<String>,
    pub network_id: Option<String>,
    pub cidr: Option<String>,
}

/// Networking and load-balancer calls used by the tasks.
///
/// `create_*` calls take a record with an empty `id` and return the record
/// as stored, with the provider-assigned identifier filled in.
pub trait OpenstackApi: Send + Sync {
    fn list_networks(&self, id: Option<&str>, name: &str) -> CloudResult<Vec<NetworkRecord>>;
    fn create_network(&self, network: NetworkRecord) -> CloudResult<NetworkRecord>;

    fn list_subnets(&self, filter: &SubnetFilter) -> CloudResult<Vec<SubnetRecord>>;
    fn create_subnet(&self, subnet: SubnetRecord) -> CloudResult<SubnetRecord>;
    fn update_subnet_dns(&self, id: &str, dns_nameservers: Vec<String>) -> CloudResult<()>;

    fn append_tag(&self, target: TagTarget, id: &str, tag: &str) -> CloudResult<()>;

    fn list_loadbalancers(&self, id: Option<&str>, name: &str) -> CloudResult<Vec<LoadBalancerRecord>>;
    fn create_loadbalancer(&self, lb: LoadBalancerRecord) -> CloudResult<LoadBalancerRecord>;
    fn update_loadbalancer_security_group(&self, id: &str, security_group_id: &str) -> CloudResult<()>;

    fn list_pools(&self, id: Option<&str>, name: &str) -> CloudResult<Vec<PoolRecord>>;
    fn create_pool(&self, pool: PoolRecord) -> CloudResult<PoolRecord>;

    fn list_listeners(&self, id: Option<&str>, name: &str) -> CloudResult<Vec<ListenerRecord>>;
    fn create_listener(&self, listener: ListenerRecord) -> CloudResult<ListenerRecord>;
    fn update_listener_allowed_cidrs(&self, id: &str, allowed_cidrs: Vec<String>) -> CloudResult<()>;

    fn list_security_groups(&self, name: &str) -> CloudResult<Vec<SecurityGroupRecord>>;
    fn create_security_group(&self, group: SecurityGroupRecord) -> CloudResult<SecurityGroupRecord>;
    fn list_rules(&self, security_group_id: &str) -> CloudResult<Vec<RuleRecord>>;
    fn create_rule(&self, rule: RuleRecord) -> CloudResult<RuleRecord>;
    fn delete_rule(&self, id: &str) -> CloudResult<()>;

    /// Whether listeners accept VIP access control lists.
    fn supports_vip_acl(&self) -> bool;
}

/// The handle tasks use to reach the provider.
pub struct Cloud {
    api: Box<dyn OpenstackApi>,
    retry: RetryConfig,
    cancel: CancelToken,
    cluster_name: String,
}

impl Cloud {
    pub fn new(api: Box<dyn OpenstackApi>, cluster_name: impl Into<String>) -> Self {
        Self {
            api,
            retry: RetryConfig::default(),
            cancel: CancelToken::new(),
            cluster_name: cluster_name.into(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Abandon retry backoff once `cancel` fires.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Tag applied to every networking object owned by the cluster.
    pub fn cluster_tag(&self) -> String {
        format!("KubernetesCluster={}", self.cluster_name)
    }

    pub fn api(&self) -> &dyn OpenstackApi {
        self.api.as_ref()
    }

    /// Run an API call, retrying transient failures.
    pub fn call<T>(
        &self,
        mut op: impl FnMut(&dyn OpenstackApi) -> CloudResult<T>,
    ) -> reconcile::Result<T> {
        with_retry_cancellable(&self.retry, Some(&LogCallback), &self.cancel, || {
            op(self.api.as_ref())
        })
        .map_err(Into::into)
    }
}
