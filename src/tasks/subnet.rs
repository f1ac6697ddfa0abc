use super::network::Network;
use super::{discovered_tag, lookup_id};
use crate::cloud::{Cloud, SubnetFilter, SubnetRecord, TagTarget};
use reconcile::{
    BackendKind, CollectionPolicy, Context, Differ, Lifecycle, Link, Resource, TaskKey, TaskSet,
    TemplateWriter, immutable, required, single_match,
};
use serde::Serialize;
use serde_json::Value;

pub const TERRAFORM_TYPE: &str = "openstack_networking_subnet_v2";

/// A subnet of the cluster network.
#[derive(Debug, Clone, Default)]
pub struct Subnet {
    pub id: Option<String>,
    pub name: Option<String>,
    pub network: Option<Link>,
    pub cidr: Option<String>,
    /// Ordered; resolvers are tried in this order
    pub dns_servers: Option<Vec<String>>,
    pub tag: Option<String>,
    pub lifecycle: Lifecycle,
}

#[derive(Serialize)]
struct TerraformSubnet<'a> {
    name: &'a str,
    network_id: Option<Value>,
    cidr: Option<&'a str>,
    ip_version: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    dns_nameservers: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tags: Vec<&'a str>,
}

impl Resource for Subnet {
    type Cloud = Cloud;
    const KIND: &'static str = "Subnet";
    const BACKENDS: &'static [BackendKind] = &[BackendKind::Direct, BackendKind::Template];
    const TEMPLATE_TYPE: Option<&'static str> = Some(TERRAFORM_TYPE);

    fn name(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn compare_with_id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn links(&self) -> Vec<&Link> {
        self.network.iter().collect()
    }

    fn dependencies(&self, tasks: &TaskSet<Cloud>) -> Vec<TaskKey> {
        tasks.keys_of::<Network>()
    }

    fn normalize(&mut self, cloud: &Cloud) -> anyhow::Result<()> {
        if self.tag.is_none() {
            self.tag = Some(cloud.cluster_tag());
        }
        Ok(())
    }

    fn find(&self, ctx: &Context<'_, Cloud>) -> anyhow::Result<Option<Self>> {
        let filter = match &self.id {
            Some(id) => SubnetFilter {
                id: Some(id.clone()),
                ..Default::default()
            },
            None => {
                let Some(network_id) = lookup_id(ctx, &self.network) else {
                    return Ok(None);
                };
                SubnetFilter {
                    name: self.name.clone(),
                    network_id: Some(network_id),
                    cidr: self.cidr.clone(),
                    ..Default::default()
                }
            }
        };
        let found = ctx.cloud.call(|api| api.list_subnets(&filter))?;
        let found = single_match(format!("subnets matching {filter:?}"), found)?;
        Ok(found.map(|record| Self {
            tag: discovered_tag(&record.tags, &self.tag),
            id: Some(record.id),
            name: Some(record.name),
            network: Some(Link::id(record.network_id)),
            cidr: Some(record.cidr),
            dns_servers: Some(record.dns_nameservers),
            lifecycle: self.lifecycle,
        }))
    }

    fn adopt(&mut self, actual: &Self) {
        self.id.clone_from(&actual.id);
    }

    fn diff(actual: &Self, expected: &Self, d: &mut Differ<'_>) -> Self {
        Self {
            name: d.field("Name", &actual.name, &expected.name),
            network: d.link("Network", &actual.network, &expected.network),
            cidr: d.field("CIDR", &actual.cidr, &expected.cidr),
            dns_servers: d.list(
                "DNSServers",
                CollectionPolicy::Replace,
                &actual.dns_servers,
                &expected.dns_servers,
            ),
            tag: d.field("Tag", &actual.tag, &expected.tag),
            ..Default::default()
        }
    }

    fn check_changes(actual: Option<&Self>, expected: &Self, changes: &Self) -> reconcile::Result<()> {
        if actual.is_none() {
            required("Name", &expected.name)?;
            required("Network", &expected.network)?;
            required("CIDR", &expected.cidr)?;
        } else {
            immutable("Name", &changes.name)?;
            immutable("Network", &changes.network)?;
            immutable("CIDR", &changes.cidr)?;
        }
        Ok(())
    }

    fn render_direct(
        ctx: &Context<'_, Cloud>,
        actual: Option<&Self>,
        expected: &mut Self,
        changes: &Self,
    ) -> anyhow::Result<()> {
        let id = match actual.and_then(|a| a.id.clone()) {
            Some(id) => {
                if let Some(dns) = &changes.dns_servers {
                    ctx.cloud
                        .call(|api| api.update_subnet_dns(&id, dns.clone()))?;
                }
                id
            }
            None => {
                let record = SubnetRecord {
                    name: expected.name().to_string(),
                    network_id: ctx.link_id("Network", &expected.network)?,
                    cidr: expected.cidr.clone().unwrap_or_default(),
                    dns_nameservers: expected.dns_servers.clone().unwrap_or_default(),
                    ..Default::default()
                };
                let created = ctx.cloud.call(|api| api.create_subnet(record.clone()))?;
                log::info!("Created subnet {} ({})", created.name, created.id);
                expected.id = Some(created.id.clone());
                created.id
            }
        };

        // Tags are applied after create, as for existing subnets.
        if let Some(tag) = &changes.tag {
            ctx.cloud
                .call(|api| api.append_tag(TagTarget::Subnet, &id, tag))?;
        }
        Ok(())
    }

    fn render_template(
        writer: &TemplateWriter<'_>,
        _actual: Option<&Self>,
        expected: &Self,
        _changes: &Self,
    ) -> anyhow::Result<()> {
        let block = TerraformSubnet {
            name: expected.name(),
            network_id: writer.link_id(&expected.network)?,
            cidr: expected.cidr.as_deref(),
            ip_version: 4,
            dns_nameservers: expected.dns_servers.as_deref(),
            tags: expected.tag.iter().map(String::as_str).collect(),
        };
        writer.add_resource(TERRAFORM_TYPE, expected.name(), block)
    }
}
