//! In-process provider backed by a JSON state file
//!
//! `MemoryCloud` stands in for a live OpenStack endpoint: it keeps every
//! object in memory, assigns identifiers, and can be persisted between runs
//! so that a second `update` sees what the first one created. Faults can be
//! injected per operation for testing retry and failure handling.

use super::{
    CloudError, CloudResult, ListenerRecord, LoadBalancerRecord, NetworkRecord, OpenstackApi,
    PoolRecord, RuleRecord, SecurityGroupRecord, SubnetFilter, SubnetRecord, TagTarget,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Everything the provider knows about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudState {
    #[serde(default)]
    pub networks: Vec<NetworkRecord>,
    #[serde(default)]
    pub subnets: Vec<SubnetRecord>,
    #[serde(default)]
    pub loadbalancers: Vec<LoadBalancerRecord>,
    #[serde(default)]
    pub pools: Vec<PoolRecord>,
    #[serde(default)]
    pub listeners: Vec<ListenerRecord>,
    #[serde(default)]
    pub security_groups: Vec<SecurityGroupRecord>,
    #[serde(default)]
    pub rules: Vec<RuleRecord>,
    /// Whether listeners accept allowed CIDRs
    #[serde(default = "default_vip_acl")]
    pub vip_acl: bool,
    #[serde(default)]
    next_id: u64,
}

fn default_vip_acl() -> bool {
    true
}

impl Default for CloudState {
    fn default() -> Self {
        Self {
            networks: Vec::new(),
            subnets: Vec::new(),
            loadbalancers: Vec::new(),
            pools: Vec::new(),
            listeners: Vec::new(),
            security_groups: Vec::new(),
            rules: Vec::new(),
            vip_acl: true,
            next_id: 0,
        }
    }
}

impl CloudState {
    fn assign_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{:04}", self.next_id)
    }
}

#[derive(Debug, Default)]
struct Inner {
    state: CloudState,
    faults: HashMap<&'static str, CloudError>,
    calls: Vec<String>,
}

/// Shared handle to an in-memory provider.
#[derive(Debug, Clone, Default)]
pub struct MemoryCloud {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryCloud {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_state(state: CloudState) -> Self {
        let cloud = Self::new();
        cloud.lock().state = state;
        cloud
    }

    /// Load state from disk, or start empty if the file doesn't exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("State file {} does not exist, starting empty", path.display());
            return Ok(Self::new());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read state file: {}", path.display()))?;
        let state: CloudState = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse state file: {}", path.display()))?;

        log::debug!("Loaded cloud state from {}", path.display());
        Ok(Self::from_state(state))
    }

    /// Save state to disk
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create state directory: {}", dir.display()))?;
        }

        let content = serde_json::to_string_pretty(&self.lock().state)
            .context("Failed to serialize cloud state")?;
        fs::write(path, content + "\n")
            .with_context(|| format!("Failed to write state file: {}", path.display()))?;

        log::debug!("Saved cloud state to {}", path.display());
        Ok(())
    }

    /// A copy of the current state.
    pub fn snapshot(&self) -> CloudState {
        self.lock().state.clone()
    }

    /// Make the next call of `op` fail with `err`.
    #[cfg(test)]
    pub fn fail_next(&self, op: &'static str, err: CloudError) {
        self.lock().faults.insert(op, err);
    }

    #[cfg(test)]
    pub fn set_vip_acl(&self, supported: bool) {
        self.lock().state.vip_acl = supported;
    }

    /// Mutating calls made so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock for `op`, consuming an injected fault if one is pending.
    fn begin(&self, op: &'static str) -> CloudResult<MutexGuard<'_, Inner>> {
        let mut inner = self.lock();
        match inner.faults.remove(op) {
            Some(err) => Err(err),
            None => Ok(inner),
        }
    }

    fn mutate(&self, op: &'static str, target: &str) -> CloudResult<MutexGuard<'_, Inner>> {
        let mut inner = self.begin(op)?;
        inner.calls.push(format!("{op} {target}"));
        Ok(inner)
    }
}

fn by_id_or_name<'a, T>(
    items: &'a [T],
    id: Option<&str>,
    name: &str,
    key: impl Fn(&T) -> (&str, &str),
) -> Vec<&'a T> {
    items
        .iter()
        .filter(|item| {
            let (item_id, item_name) = key(item);
            match id {
                Some(id) => item_id == id,
                None => item_name == name,
            }
        })
        .collect()
}

fn not_found(kind: &'static str, id: &str) -> CloudError {
    CloudError::NotFound {
        kind,
        id: id.to_string(),
    }
}

impl OpenstackApi for MemoryCloud {
    fn list_networks(&self, id: Option<&str>, name: &str) -> CloudResult<Vec<NetworkRecord>> {
        let inner = self.begin("list_networks")?;
        Ok(by_id_or_name(&inner.state.networks, id, name, |n| (n.id.as_str(), n.name.as_str()))
            .into_iter()
            .cloned()
            .collect())
    }

    fn create_network(&self, mut network: NetworkRecord) -> CloudResult<NetworkRecord> {
        let mut inner = self.mutate("create_network", &network.name)?;
        network.id = inner.state.assign_id("net");
        inner.state.networks.push(network.clone());
        Ok(network)
    }

    fn list_subnets(&self, filter: &SubnetFilter) -> CloudResult<Vec<SubnetRecord>> {
        let inner = self.begin("list_subnets")?;
        let matches = |want: &Option<String>, have: &str| want.as_deref().is_none_or(|w| w == have);
        Ok(inner
            .state
            .subnets
            .iter()
            .filter(|s| {
                matches(&filter.id, &s.id)
                    && matches(&filter.name, &s.name)
                    && matches(&filter.network_id, &s.network_id)
                    && matches(&filter.cidr, &s.cidr)
            })
            .cloned()
            .collect())
    }

    fn create_subnet(&self, mut subnet: SubnetRecord) -> CloudResult<SubnetRecord> {
        let mut inner = self.mutate("create_subnet", &subnet.name)?;
        if !inner.state.networks.iter().any(|n| n.id == subnet.network_id) {
            return Err(not_found("network", &subnet.network_id));
        }
        if inner
            .state
            .subnets
            .iter()
            .any(|s| s.network_id == subnet.network_id && s.cidr == subnet.cidr)
        {
            return Err(CloudError::Conflict(format!(
                "cidr {} already allocated on {}",
                subnet.cidr, subnet.network_id
            )));
        }
        subnet.id = inner.state.assign_id("subnet");
        inner.state.subnets.push(subnet.clone());
        Ok(subnet)
    }

    fn update_subnet_dns(&self, id: &str, dns_nameservers: Vec<String>) -> CloudResult<()> {
        let mut inner = self.mutate("update_subnet_dns", id)?;
        let subnet = inner
            .state
            .subnets
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| not_found("subnet", id))?;
        subnet.dns_nameservers = dns_nameservers;
        Ok(())
    }

    fn append_tag(&self, target: TagTarget, id: &str, tag: &str) -> CloudResult<()> {
        let mut inner = self.mutate("append_tag", id)?;
        let tags = match target {
            TagTarget::Network => inner
                .state
                .networks
                .iter_mut()
                .find(|n| n.id == id)
                .map(|n| &mut n.tags),
            TagTarget::Subnet => inner
                .state
                .subnets
                .iter_mut()
                .find(|s| s.id == id)
                .map(|s| &mut s.tags),
        }
        .ok_or_else(|| not_found("tag target", id))?;
        if !tags.iter().any(|t| t == tag) {
            tags.push(tag.to_string());
        }
        Ok(())
    }

    fn list_loadbalancers(&self, id: Option<&str>, name: &str) -> CloudResult<Vec<LoadBalancerRecord>> {
        let inner = self.begin("list_loadbalancers")?;
        Ok(by_id_or_name(&inner.state.loadbalancers, id, name, |l| (l.id.as_str(), l.name.as_str()))
            .into_iter()
            .cloned()
            .collect())
    }

    fn create_loadbalancer(&self, mut lb: LoadBalancerRecord) -> CloudResult<LoadBalancerRecord> {
        let mut inner = self.mutate("create_loadbalancer", &lb.name)?;
        if !inner.state.subnets.iter().any(|s| s.id == lb.vip_subnet_id) {
            return Err(not_found("subnet", &lb.vip_subnet_id));
        }
        lb.id = inner.state.assign_id("lb");
        if lb.vip_address.is_empty() {
            lb.vip_address = format!("10.0.0.{}", 10 + inner.state.loadbalancers.len());
        }
        inner.state.loadbalancers.push(lb.clone());
        Ok(lb)
    }

    fn update_loadbalancer_security_group(&self, id: &str, security_group_id: &str) -> CloudResult<()> {
        let mut inner = self.mutate("update_loadbalancer_security_group", id)?;
        let lb = inner
            .state
            .loadbalancers
            .iter_mut()
            .find(|l| l.id == id)
            .ok_or_else(|| not_found("loadbalancer", id))?;
        lb.security_group_id = Some(security_group_id.to_string());
        Ok(())
    }

    fn list_pools(&self, id: Option<&str>, name: &str) -> CloudResult<Vec<PoolRecord>> {
        let inner = self.begin("list_pools")?;
        Ok(by_id_or_name(&inner.state.pools, id, name, |p| (p.id.as_str(), p.name.as_str()))
            .into_iter()
            .cloned()
            .collect())
    }

    fn create_pool(&self, mut pool: PoolRecord) -> CloudResult<PoolRecord> {
        let mut inner = self.mutate("create_pool", &pool.name)?;
        if !inner.state.loadbalancers.iter().any(|l| l.id == pool.loadbalancer_id) {
            return Err(not_found("loadbalancer", &pool.loadbalancer_id));
        }
        pool.id = inner.state.assign_id("pool");
        inner.state.pools.push(pool.clone());
        Ok(pool)
    }

    fn list_listeners(&self, id: Option<&str>, name: &str) -> CloudResult<Vec<ListenerRecord>> {
        let inner = self.begin("list_listeners")?;
        Ok(by_id_or_name(&inner.state.listeners, id, name, |l| (l.id.as_str(), l.name.as_str()))
            .into_iter()
            .cloned()
            .collect())
    }

    fn create_listener(&self, mut listener: ListenerRecord) -> CloudResult<ListenerRecord> {
        let mut inner = self.mutate("create_listener", &listener.name)?;
        if !inner.state.pools.iter().any(|p| p.id == listener.default_pool_id) {
            return Err(not_found("pool", &listener.default_pool_id));
        }
        if !listener.allowed_cidrs.is_empty() && !inner.state.vip_acl {
            return Err(CloudError::BadRequest("allowed_cidrs not supported".into()));
        }
        listener.id = inner.state.assign_id("listener");
        inner.state.listeners.push(listener.clone());
        Ok(listener)
    }

    fn update_listener_allowed_cidrs(&self, id: &str, allowed_cidrs: Vec<String>) -> CloudResult<()> {
        let mut inner = self.mutate("update_listener_allowed_cidrs", id)?;
        if !inner.state.vip_acl {
            return Err(CloudError::BadRequest("allowed_cidrs not supported".into()));
        }
        let listener = inner
            .state
            .listeners
            .iter_mut()
            .find(|l| l.id == id)
            .ok_or_else(|| not_found("listener", id))?;
        listener.allowed_cidrs = allowed_cidrs;
        Ok(())
    }

    fn list_security_groups(&self, name: &str) -> CloudResult<Vec<SecurityGroupRecord>> {
        let inner = self.begin("list_security_groups")?;
        Ok(inner
            .state
            .security_groups
            .iter()
            .filter(|g| g.name == name)
            .cloned()
            .collect())
    }

    fn create_security_group(&self, mut group: SecurityGroupRecord) -> CloudResult<SecurityGroupRecord> {
        let mut inner = self.mutate("create_security_group", &group.name)?;
        group.id = inner.state.assign_id("sg");
        inner.state.security_groups.push(group.clone());
        Ok(group)
    }

    fn list_rules(&self, security_group_id: &str) -> CloudResult<Vec<RuleRecord>> {
        let inner = self.begin("list_rules")?;
        Ok(inner
            .state
            .rules
            .iter()
            .filter(|r| r.security_group_id == security_group_id)
            .cloned()
            .collect())
    }

    fn create_rule(&self, mut rule: RuleRecord) -> CloudResult<RuleRecord> {
        let mut inner = self.mutate("create_rule", &rule.security_group_id)?;
        if !inner.state.security_groups.iter().any(|g| g.id == rule.security_group_id) {
            return Err(not_found("security group", &rule.security_group_id));
        }
        rule.id = inner.state.assign_id("rule");
        inner.state.rules.push(rule.clone());
        Ok(rule)
    }

    fn delete_rule(&self, id: &str) -> CloudResult<()> {
        let mut inner = self.mutate("delete_rule", id)?;
        let before = inner.state.rules.len();
        inner.state.rules.retain(|r| r.id != id);
        if inner.state.rules.len() == before {
            return Err(not_found("rule", id));
        }
        Ok(())
    }

    fn supports_vip_acl(&self) -> bool {
        self.lock().state.vip_acl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn network(name: &str) -> NetworkRecord {
        NetworkRecord {
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_create_assigns_ids() {
        let cloud = MemoryCloud::new();
        let a = cloud.create_network(network("a")).unwrap();
        let b = cloud.create_network(network("b")).unwrap();
        assert_eq!(a.id, "net-0001");
        assert_eq!(b.id, "net-0002");
        assert_eq!(cloud.list_networks(None, "b").unwrap(), vec![b.clone()]);
        assert_eq!(cloud.list_networks(Some(&a.id), "ignored").unwrap(), vec![a]);
    }

    #[test]
    fn test_fault_is_consumed_once() {
        let cloud = MemoryCloud::new();
        cloud.fail_next("create_network", CloudError::Unavailable("down".into()));
        assert!(cloud.create_network(network("a")).is_err());
        assert!(cloud.create_network(network("a")).is_ok());
        assert_eq!(cloud.calls(), vec!["create_network a"]);
    }

    #[test]
    fn test_subnet_requires_network() {
        let cloud = MemoryCloud::new();
        let err = cloud
            .create_subnet(SubnetRecord {
                name: "a".into(),
                network_id: "net-9999".into(),
                cidr: "10.0.0.0/24".into(),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, CloudError::NotFound { kind: "network", .. }));
    }

    #[test]
    fn test_append_tag_is_idempotent() {
        let cloud = MemoryCloud::new();
        let net = cloud.create_network(network("a")).unwrap();
        cloud.append_tag(TagTarget::Network, &net.id, "x").unwrap();
        cloud.append_tag(TagTarget::Network, &net.id, "x").unwrap();
        assert_eq!(cloud.list_networks(None, "a").unwrap()[0].tags, vec!["x"]);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("cloud.json");

        let cloud = MemoryCloud::new();
        cloud.set_vip_acl(false);
        cloud.create_network(network("a")).unwrap();
        cloud.save(&path).unwrap();

        let loaded = MemoryCloud::load(&path).unwrap();
        let state = loaded.snapshot();
        assert_eq!(state.networks.len(), 1);
        assert!(!state.vip_acl);

        // ids keep counting from where the saved run stopped
        let next = loaded.create_network(network("b")).unwrap();
        assert_eq!(next.id, "net-0002");
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let cloud = MemoryCloud::load(&dir.path().join("absent.json")).unwrap();
        assert!(cloud.snapshot().networks.is_empty());
        assert!(cloud.supports_vip_acl());
    }
}
