use super::security_group::SecurityGroup;
use super::subnet::Subnet;
use crate::cloud::{Cloud, LoadBalancerRecord};
use reconcile::{
    BackendKind, Context, Differ, Lifecycle, Link, Resource, TaskKey, TaskSet, TemplateWriter,
    immutable, required, single_match,
};
use serde::Serialize;
use serde_json::Value;

pub const TERRAFORM_TYPE: &str = "openstack_lb_loadbalancer_v2";

/// Octavia's default provider when none is requested.
pub const DEFAULT_PROVIDER: &str = "amphora";

/// A load balancer fronting the cluster API.
#[derive(Debug, Clone, Default)]
pub struct LoadBalancer {
    pub id: Option<String>,
    pub name: Option<String>,
    /// Subnet the VIP is allocated from
    pub subnet: Option<Link>,
    pub provider: Option<String>,
    /// Assigned by the provider
    pub vip_address: Option<String>,
    pub security_group: Option<Link>,
    pub lifecycle: Lifecycle,
}

#[derive(Serialize)]
struct TerraformLoadBalancer<'a> {
    name: &'a str,
    vip_subnet_id: Option<Value>,
    loadbalancer_provider: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    security_group_ids: Vec<Value>,
}

impl LoadBalancer {
    fn provider(&self) -> &str {
        self.provider.as_deref().unwrap_or(DEFAULT_PROVIDER)
    }
}

impl Resource for LoadBalancer {
    type Cloud = Cloud;
    const KIND: &'static str = "LoadBalancer";
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
        self.subnet.iter().chain(&self.security_group).collect()
    }

    fn dependencies(&self, tasks: &TaskSet<Cloud>) -> Vec<TaskKey> {
        let mut deps = tasks.keys_of::<Subnet>();
        deps.extend(tasks.keys_of::<SecurityGroup>());
        deps
    }

    fn find(&self, ctx: &Context<'_, Cloud>) -> anyhow::Result<Option<Self>> {
        let found = ctx
            .cloud
            .call(|api| api.list_loadbalancers(self.id.as_deref(), self.name()))?;
        let found = single_match(format!("load balancers named {:?}", self.name()), found)?;
        Ok(found.map(|record| Self {
            id: Some(record.id),
            name: Some(record.name),
            subnet: Some(Link::id(record.vip_subnet_id)),
            provider: Some(record.provider),
            vip_address: Some(record.vip_address).filter(|a| !a.is_empty()),
            security_group: record.security_group_id.map(Link::id),
            lifecycle: self.lifecycle,
        }))
    }

    fn adopt(&mut self, actual: &Self) {
        self.id.clone_from(&actual.id);
        self.vip_address.clone_from(&actual.vip_address);
    }

    fn diff(actual: &Self, expected: &Self, d: &mut Differ<'_>) -> Self {
        Self {
            name: d.field("Name", &actual.name, &expected.name),
            subnet: d.link("Subnet", &actual.subnet, &expected.subnet),
            provider: d.field("Provider", &actual.provider, &expected.provider),
            security_group: d.link("SecurityGroup", &actual.security_group, &expected.security_group),
            ..Default::default()
        }
    }

    fn check_changes(actual: Option<&Self>, expected: &Self, changes: &Self) -> reconcile::Result<()> {
        if actual.is_none() {
            required("Name", &expected.name)?;
            required("Subnet", &expected.subnet)?;
        } else {
            immutable("Name", &changes.name)?;
            immutable("Subnet", &changes.subnet)?;
            immutable("Provider", &changes.provider)?;
        }
        Ok(())
    }

    fn render_direct(
        ctx: &Context<'_, Cloud>,
        actual: Option<&Self>,
        expected: &mut Self,
        changes: &Self,
    ) -> anyhow::Result<()> {
        match actual.and_then(|a| a.id.as_deref()) {
            None => {
                let security_group_id = match &expected.security_group {
                    Some(_) => Some(ctx.link_id("SecurityGroup", &expected.security_group)?),
                    None => None,
                };
                let record = LoadBalancerRecord {
                    name: expected.name().to_string(),
                    vip_subnet_id: ctx.link_id("Subnet", &expected.subnet)?,
                    provider: expected.provider().to_string(),
                    security_group_id,
                    ..Default::default()
                };
                let created = ctx
                    .cloud
                    .call(|api| api.create_loadbalancer(record.clone()))?;
                log::info!(
                    "Created load balancer {} ({}) with VIP {}",
                    created.name,
                    created.id,
                    created.vip_address
                );
                expected.id = Some(created.id);
                expected.vip_address = Some(created.vip_address);
            }
            Some(id) => {
                if changes.security_group.is_some() {
                    let group = ctx.link_id("SecurityGroup", &expected.security_group)?;
                    ctx.cloud
                        .call(|api| api.update_loadbalancer_security_group(id, &group))?;
                }
            }
        }
        Ok(())
    }

    fn render_template(
        writer: &TemplateWriter<'_>,
        _actual: Option<&Self>,
        expected: &Self,
        _changes: &Self,
    ) -> anyhow::Result<()> {
        let block = TerraformLoadBalancer {
            name: expected.name(),
            vip_subnet_id: writer.link_id(&expected.subnet)?,
            loadbalancer_provider: expected.provider(),
            security_group_ids: writer.link_id(&expected.security_group)?.into_iter().collect(),
        };
        writer.add_resource(TERRAFORM_TYPE, expected.name(), block)?;
        writer.add_output(
            &format!("{}-vip", expected.name()),
            writer.reference(TERRAFORM_TYPE, expected.name(), "vip_address"),
        );
        Ok(())
    }
}

/// Look up a load balancer by identifier.
pub(crate) fn loadbalancer_by_id(
    ctx: &Context<'_, Cloud>,
    id: &str,
) -> anyhow::Result<Option<LoadBalancerRecord>> {
    let found = ctx.cloud.call(|api| api.list_loadbalancers(Some(id), ""))?;
    Ok(single_match(format!("load balancer {id}"), found)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::MemoryCloud;
    use crate::tasks::Network;
    use crate::tasks::testing::converge;
    use reconcile::{Action, Target};

    fn tasks(lb: LoadBalancer) -> TaskSet<Cloud> {
        let mut tasks = TaskSet::new();
        tasks
            .add(Network {
                name: Some("demo".into()),
                ..Default::default()
            })
            .unwrap();
        tasks
            .add(Subnet {
                name: Some("demo-a".into()),
                network: Some(Link::to::<Network>("demo")),
                cidr: Some("10.0.1.0/24".into()),
                ..Default::default()
            })
            .unwrap();
        tasks.add(lb).unwrap();
        tasks
    }

    fn api_lb() -> LoadBalancer {
        LoadBalancer {
            name: Some("api.demo".into()),
            subnet: Some(Link::to::<Subnet>("demo-a")),
            ..Default::default()
        }
    }

    #[test]
    fn test_create_records_vip() {
        let memory = MemoryCloud::new();
        let tasks = tasks(api_lb());
        let (_, result) = converge(&memory, Target::direct(), &tasks);
        result.unwrap();

        let lb = tasks.get::<LoadBalancer>("api.demo").unwrap();
        let state = memory.snapshot();
        assert_eq!(lb.vip_address.as_deref(), Some(state.loadbalancers[0].vip_address.as_str()));
        assert_eq!(state.loadbalancers[0].provider, DEFAULT_PROVIDER);
        assert_eq!(state.loadbalancers[0].vip_subnet_id, state.subnets[0].id);
    }

    #[test]
    fn test_second_run_is_unchanged() {
        let memory = MemoryCloud::new();
        let (_, result) = converge(&memory, Target::direct(), &tasks(api_lb()));
        result.unwrap();
        let calls = memory.calls().len();

        let tasks = tasks(api_lb());
        let (_, result) = converge(&memory, Target::direct(), &tasks);
        let report = result.unwrap();
        assert_eq!(
            report.get(&TaskKey::of::<LoadBalancer>("api.demo")).unwrap().action,
            Some(Action::Unchanged)
        );
        assert_eq!(memory.calls().len(), calls);
        // adopted from the live load balancer even though nothing was applied
        assert!(tasks.get::<LoadBalancer>("api.demo").unwrap().vip_address.is_some());
    }

    #[test]
    fn test_template_outputs_vip() {
        let memory = MemoryCloud::new();
        let tasks = tasks(api_lb());
        let (engine, result) = converge(&memory, Target::template(), &tasks);
        result.unwrap();

        let rendered = engine.target().as_template().unwrap().finalize().unwrap();
        let doc: Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(
            doc["output"]["api-demo-vip"]["value"],
            "${openstack_lb_loadbalancer_v2.api-demo.vip_address}"
        );
        assert_eq!(
            doc["resource"][TERRAFORM_TYPE]["api-demo"]["vip_subnet_id"],
            "${openstack_networking_subnet_v2.demo-a.id}"
        );
    }
}
