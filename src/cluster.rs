//! Cluster definition file and the tasks built from it

use crate::cloud::Cloud;
use crate::tasks::{LbListener, LbPool, LoadBalancer, Network, SecurityGroup, SecurityGroupRule, Subnet};
use anyhow::{Context, Result};
use reconcile::{Lifecycle, Link, TaskSet};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterConfig {
    pub cluster: ClusterSection,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub subnets: Vec<SubnetConfig>,
    #[serde(default)]
    pub api_loadbalancer: Option<ApiLoadBalancerConfig>,
    #[serde(default)]
    pub security_groups: Vec<SecurityGroupConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterSection {
    pub name: String,
}

/// How a run may treat an object, as written in the cluster file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LifecycleSetting {
    #[default]
    Sync,
    Ignore,
    WarnIfInsufficientAccess,
    ExistsAndValidates,
    ExistsAndWarnIfChanges,
}

impl From<LifecycleSetting> for Lifecycle {
    fn from(setting: LifecycleSetting) -> Self {
        match setting {
            LifecycleSetting::Sync => Lifecycle::Sync,
            LifecycleSetting::Ignore => Lifecycle::Ignore,
            LifecycleSetting::WarnIfInsufficientAccess => Lifecycle::WarnIfInsufficientAccess,
            LifecycleSetting::ExistsAndValidates => Lifecycle::ExistsAndValidates,
            LifecycleSetting::ExistsAndWarnIfChanges => Lifecycle::ExistsAndWarnIfChanges,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkConfig {
    /// Defaults to the cluster name
    pub name: Option<String>,
    /// Adopt an existing network by identifier
    pub id: Option<String>,
    pub availability_zone_hints: Option<Vec<String>>,
    #[serde(default)]
    pub lifecycle: LifecycleSetting,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubnetConfig {
    pub name: String,
    pub cidr: String,
    pub dns_servers: Option<Vec<String>>,
    #[serde(default)]
    pub lifecycle: LifecycleSetting,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiLoadBalancerConfig {
    /// Subnet the VIP is allocated from
    pub subnet: String,
    pub provider: Option<String>,
    #[serde(default = "default_api_port")]
    pub port: u16,
    pub allowed_cidrs: Option<Vec<String>>,
    pub security_group: Option<String>,
    #[serde(default)]
    pub lifecycle: LifecycleSetting,
}

fn default_api_port() -> u16 {
    443
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecurityGroupConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub rules: Vec<SecurityGroupRule>,
    #[serde(default)]
    pub remove_extra_rules: bool,
    #[serde(default)]
    pub lifecycle: LifecycleSetting,
}

impl ClusterConfig {
    /// Load and validate a cluster file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read cluster file: {}", path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("Invalid cluster file: {}", path.display()))?;
        log::debug!("Loaded cluster {} from {}", config.cluster.name, path.display());
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cluster.name.trim().is_empty() {
            anyhow::bail!("Cluster name cannot be empty");
        }

        let mut subnets = HashSet::new();
        for subnet in &self.subnets {
            if subnet.name.is_empty() {
                anyhow::bail!("Subnet name cannot be empty");
            }
            if subnet.cidr.is_empty() {
                anyhow::bail!("Subnet '{}' has no CIDR", subnet.name);
            }
            if !subnets.insert(subnet.name.as_str()) {
                anyhow::bail!("Subnet '{}' is declared twice", subnet.name);
            }
        }

        let mut groups = HashSet::new();
        for group in &self.security_groups {
            if group.name.is_empty() {
                anyhow::bail!("Security group name cannot be empty");
            }
            if !groups.insert(group.name.as_str()) {
                anyhow::bail!("Security group '{}' is declared twice", group.name);
            }
        }

        if let Some(lb) = &self.api_loadbalancer {
            if !subnets.contains(lb.subnet.as_str()) {
                anyhow::bail!("API load balancer subnet '{}' is not declared", lb.subnet);
            }
            if let Some(group) = &lb.security_group
                && !groups.contains(group.as_str())
            {
                anyhow::bail!("API load balancer security group '{group}' is not declared");
            }
            if lb.port == 0 {
                anyhow::bail!("API load balancer port cannot be 0");
            }
        }
        Ok(())
    }

    pub fn network_name(&self) -> &str {
        self.network.name.as_deref().unwrap_or(&self.cluster.name)
    }

    pub fn api_name(&self) -> String {
        format!("api.{}", self.cluster.name)
    }

    pub fn https_name(&self) -> String {
        format!("{}-https", self.cluster.name)
    }

    /// Build the run's task set.
    pub fn build_tasks(&self) -> Result<TaskSet<Cloud>> {
        let mut tasks = TaskSet::new();
        let network = self.network_name().to_string();

        tasks.add(Network {
            id: self.network.id.clone(),
            name: Some(network.clone()),
            availability_zone_hints: self.network.availability_zone_hints.clone(),
            lifecycle: self.network.lifecycle.into(),
            ..Default::default()
        })?;

        for subnet in &self.subnets {
            tasks.add(Subnet {
                name: Some(subnet.name.clone()),
                network: Some(Link::to::<Network>(&network)),
                cidr: Some(subnet.cidr.clone()),
                dns_servers: subnet.dns_servers.clone(),
                lifecycle: subnet.lifecycle.into(),
                ..Default::default()
            })?;
        }

        for group in &self.security_groups {
            let mut rules = group.rules.clone();
            rules.sort();
            rules.dedup();
            tasks.add(SecurityGroup {
                name: Some(group.name.clone()),
                description: Some(group.description.clone()),
                rules: Some(rules),
                remove_extra_rules: group.remove_extra_rules,
                lifecycle: group.lifecycle.into(),
                ..Default::default()
            })?;
        }

        if let Some(lb) = &self.api_loadbalancer {
            let api = self.api_name();
            let https = self.https_name();
            let lifecycle: Lifecycle = lb.lifecycle.into();
            tasks.add(LoadBalancer {
                name: Some(api.clone()),
                subnet: Some(Link::to::<Subnet>(&lb.subnet)),
                provider: lb.provider.clone(),
                security_group: lb.security_group.as_deref().map(Link::to::<SecurityGroup>),
                lifecycle,
                ..Default::default()
            })?;
            tasks.add(LbPool {
                name: Some(https.clone()),
                loadbalancer: Some(Link::to::<LoadBalancer>(&api)),
                lifecycle,
                ..Default::default()
            })?;
            tasks.add(LbListener {
                name: Some(https.clone()),
                port: Some(lb.port),
                pool: Some(Link::to::<LbPool>(&https)),
                allowed_cidrs: lb.allowed_cidrs.clone().map(|mut cidrs| {
                    cidrs.sort();
                    cidrs
                }),
                lifecycle,
                ..Default::default()
            })?;
        }

        log::debug!("Built {} tasks for {}", tasks.len(), self.cluster.name);
        Ok(tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconcile::{DependencyGraph, TaskKey};
    use std::io::Write;
    use tempfile::NamedTempFile;

    const CLUSTER: &str = r#"
[cluster]
name = "demo.k8s.local"

[network]
availability_zone_hints = ["nova"]

[[subnets]]
name = "utility-nova"
cidr = "10.0.32.0/19"
dns_servers = ["10.0.0.2"]

[[subnets]]
name = "nodes-nova"
cidr = "10.0.64.0/19"

[api_loadbalancer]
subnet = "utility-nova"
allowed_cidrs = ["10.0.0.0/8", "0.0.0.0/0"]
security_group = "api.demo.k8s.local"

[[security_groups]]
name = "api.demo.k8s.local"
description = "Kubernetes API"
remove_extra_rules = true

[[security_groups.rules]]
protocol = "tcp"
port_range_min = 443
port_range_max = 443
remote_ip_prefix = "0.0.0.0/0"
"#;

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(CLUSTER.as_bytes()).unwrap();

        let config = ClusterConfig::load(file.path()).unwrap();
        assert_eq!(config.cluster.name, "demo.k8s.local");
        assert_eq!(config.network_name(), "demo.k8s.local");
        assert_eq!(config.api_loadbalancer.as_ref().unwrap().port, 443);
        assert_eq!(config.security_groups[0].rules[0].direction, "ingress");
    }

    #[test]
    fn test_build_tasks() {
        let config = ClusterConfig::parse(CLUSTER).unwrap();
        let tasks = config.build_tasks().unwrap();
        assert_eq!(tasks.len(), 7);

        let listener: LbListener = tasks.get("demo.k8s.local-https").unwrap();
        assert_eq!(
            listener.allowed_cidrs,
            Some(vec!["0.0.0.0/0".to_string(), "10.0.0.0/8".to_string()])
        );
        let lb: LoadBalancer = tasks.get("api.demo.k8s.local").unwrap();
        assert_eq!(lb.subnet, Some(Link::to::<Subnet>("utility-nova")));
    }

    #[test]
    fn test_tasks_form_layers() {
        let config = ClusterConfig::parse(CLUSTER).unwrap();
        let tasks = config.build_tasks().unwrap();
        let graph = DependencyGraph::build(&tasks).unwrap();
        let layers: Vec<Vec<TaskKey>> = graph
            .layers()
            .iter()
            .map(|layer| layer.iter().map(|&idx| graph.key(idx).clone()).collect())
            .collect();

        assert_eq!(
            layers[0],
            vec![
                TaskKey::of::<Network>("demo.k8s.local"),
                TaskKey::of::<SecurityGroup>("api.demo.k8s.local"),
            ]
        );
        assert_eq!(layers.last().unwrap(), &vec![TaskKey::of::<LbListener>("demo.k8s.local-https")]);
    }

    #[test]
    fn test_unknown_subnet_rejected() {
        let err = ClusterConfig::parse(
            r#"
[cluster]
name = "demo"

[api_loadbalancer]
subnet = "missing"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("'missing' is not declared"));
    }

    #[test]
    fn test_duplicate_subnet_rejected() {
        let err = ClusterConfig::parse(
            r#"
[cluster]
name = "demo"

[[subnets]]
name = "a"
cidr = "10.0.0.0/24"

[[subnets]]
name = "a"
cidr = "10.0.1.0/24"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("declared twice"));
    }

    #[test]
    fn test_lifecycle_setting() {
        let config = ClusterConfig::parse(
            r#"
[cluster]
name = "demo"

[network]
id = "net-1234"
lifecycle = "exists-and-warn-if-changes"
"#,
        )
        .unwrap();
        let tasks = config.build_tasks().unwrap();
        let network: Network = tasks.get("demo").unwrap();
        assert_eq!(network.lifecycle, Lifecycle::ExistsAndWarnIfChanges);
        assert_eq!(network.id.as_deref(), Some("net-1234"));
    }

    #[test]
    fn test_demo_cluster_parses() {
        let config = ClusterConfig::parse(include_str!("../demos/cluster.toml")).unwrap();
        assert_eq!(config.build_tasks().unwrap().len(), 7);
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(ClusterConfig::parse("[cluster]\nname = \"a\"\nzone = \"b\"\n").is_err());
    }
}
