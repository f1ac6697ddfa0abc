use super::lookup_id;
use crate::cloud::{Cloud, PoolRecord};
use reconcile::{
    BackendKind, Context, Differ, Lifecycle, Link, Resource, TemplateWriter, immutable, required,
    single_match,
};
use serde::Serialize;
use serde_json::Value;

pub const TERRAFORM_TYPE: &str = "openstack_lb_pool_v2";

pub const DEFAULT_METHOD: &str = "ROUND_ROBIN";

/// Backend pool of the API load balancer.
#[derive(Debug, Clone, Default)]
pub struct LbPool {
    pub id: Option<String>,
    pub name: Option<String>,
    pub loadbalancer: Option<Link>,
    pub lb_method: Option<String>,
    pub lifecycle: Lifecycle,
}

#[derive(Serialize)]
struct TerraformPool<'a> {
    name: &'a str,
    protocol: &'static str,
    lb_method: &'a str,
    loadbalancer_id: Option<Value>,
}

impl LbPool {
    fn lb_method(&self) -> &str {
        self.lb_method.as_deref().unwrap_or(DEFAULT_METHOD)
    }
}

impl Resource for LbPool {
    type Cloud = Cloud;
    const KIND: &'static str = "LBPool";
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
        self.loadbalancer.iter().collect()
    }

    fn find(&self, ctx: &Context<'_, Cloud>) -> anyhow::Result<Option<Self>> {
        if self.id.is_none() && lookup_id(ctx, &self.loadbalancer).is_none() {
            return Ok(None);
        }
        let found = ctx
            .cloud
            .call(|api| api.list_pools(self.id.as_deref(), self.name()))?;
        let found = single_match(format!("pools named {:?}", self.name()), found)?;
        Ok(found.map(|record| Self {
            id: Some(record.id),
            name: Some(record.name),
            loadbalancer: Some(Link::id(record.loadbalancer_id)),
            lb_method: Some(record.lb_method),
            lifecycle: self.lifecycle,
        }))
    }

    fn adopt(&mut self, actual: &Self) {
        self.id.clone_from(&actual.id);
    }

    fn diff(actual: &Self, expected: &Self, d: &mut Differ<'_>) -> Self {
        Self {
            name: d.field("Name", &actual.name, &expected.name),
            loadbalancer: d.link("LoadBalancer", &actual.loadbalancer, &expected.loadbalancer),
            lb_method: d.field("LBMethod", &actual.lb_method, &expected.lb_method),
            ..Default::default()
        }
    }

    fn check_changes(actual: Option<&Self>, expected: &Self, changes: &Self) -> reconcile::Result<()> {
        if actual.is_none() {
            required("Name", &expected.name)?;
            required("LoadBalancer", &expected.loadbalancer)?;
        } else {
            immutable("Name", &changes.name)?;
            immutable("LoadBalancer", &changes.loadbalancer)?;
            immutable("LBMethod", &changes.lb_method)?;
        }
        Ok(())
    }

    fn render_direct(
        ctx: &Context<'_, Cloud>,
        actual: Option<&Self>,
        expected: &mut Self,
        _changes: &Self,
    ) -> anyhow::Result<()> {
        if actual.is_some() {
            // Nothing on a pool is mutable.
            return Ok(());
        }
        let record = PoolRecord {
            name: expected.name().to_string(),
            loadbalancer_id: ctx.link_id("LoadBalancer", &expected.loadbalancer)?,
            lb_method: expected.lb_method().to_string(),
            ..Default::default()
        };
        let created = ctx.cloud.call(|api| api.create_pool(record.clone()))?;
        log::info!("Created pool {} ({})", created.name, created.id);
        expected.id = Some(created.id);
        Ok(())
    }

    fn render_template(
        writer: &TemplateWriter<'_>,
        _actual: Option<&Self>,
        expected: &Self,
        _changes: &Self,
    ) -> anyhow::Result<()> {
        let block = TerraformPool {
            name: expected.name(),
            protocol: "TCP",
            lb_method: expected.lb_method(),
            loadbalancer_id: writer.link_id(&expected.loadbalancer)?,
        };
        writer.add_resource(TERRAFORM_TYPE, expected.name(), block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{LoadBalancerRecord, MemoryCloud, OpenstackApi};
    use crate::tasks::LoadBalancer;
    use crate::tasks::testing::converge;
    use reconcile::{Error, Target, TaskKey, TaskSet};

    #[test]
    fn test_pool_on_existing_loadbalancer() {
        let memory = MemoryCloud::new();
        let net = memory
            .create_network(crate::cloud::NetworkRecord {
                name: "n".into(),
                ..Default::default()
            })
            .unwrap();
        let subnet = memory
            .create_subnet(crate::cloud::SubnetRecord {
                name: "s".into(),
                network_id: net.id,
                cidr: "10.0.0.0/24".into(),
                ..Default::default()
            })
            .unwrap();
        let lb = memory
            .create_loadbalancer(LoadBalancerRecord {
                name: "api".into(),
                vip_subnet_id: subnet.id,
                provider: "amphora".into(),
                ..Default::default()
            })
            .unwrap();

        let mut tasks = TaskSet::new();
        tasks
            .add(LbPool {
                name: Some("api-https".into()),
                loadbalancer: Some(Link::id(lb.id.clone())),
                ..Default::default()
            })
            .unwrap();
        let (_, result) = converge(&memory, Target::direct(), &tasks);
        result.unwrap();

        let pools = memory.snapshot().pools;
        assert_eq!(pools[0].loadbalancer_id, lb.id);
        assert_eq!(pools[0].lb_method, DEFAULT_METHOD);
    }

    #[test]
    fn test_missing_loadbalancer_task_is_rejected() {
        let memory = MemoryCloud::new();
        let mut tasks = TaskSet::new();
        tasks
            .add(LbPool {
                name: Some("api-https".into()),
                loadbalancer: Some(Link::to::<LoadBalancer>("api")),
                ..Default::default()
            })
            .unwrap();
        let (_, result) = converge(&memory, Target::direct(), &tasks);
        let err = result.unwrap_err();
        assert!(err.report().is_none());
        assert!(matches!(
            err,
            reconcile::ConvergeError::Invalid(Error::MissingDependency { ref missing, .. })
                if *missing == TaskKey::of::<LoadBalancer>("api")
        ));
    }
}
