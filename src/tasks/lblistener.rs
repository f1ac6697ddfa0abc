use super::lbpool::LbPool;
use super::loadbalancer::{LoadBalancer, loadbalancer_by_id};
use crate::cloud::{Cloud, ListenerRecord, PoolRecord};
use anyhow::Context as _;
use reconcile::{
    BackendKind, CollectionPolicy, Context, Differ, Lifecycle, Link, Resource, TaskKey, TaskSet,
    TemplateWriter, immutable, required, single_match,
};
use serde::Serialize;
use serde_json::Value;

pub const TERRAFORM_TYPE: &str = "openstack_lb_listener_v2";

/// The OVN provider rejects allowed CIDRs on listeners.
const OVN_PROVIDER: &str = "ovn";

/// TCP listener forwarding to the API pool.
#[derive(Debug, Clone, Default)]
pub struct LbListener {
    pub id: Option<String>,
    pub name: Option<String>,
    pub port: Option<u16>,
    pub pool: Option<Link>,
    /// Source ranges allowed to reach the VIP
    pub allowed_cidrs: Option<Vec<String>>,
    pub lifecycle: Lifecycle,
}

#[derive(Serialize)]
struct TerraformListener<'a> {
    name: &'a str,
    protocol: &'static str,
    protocol_port: Option<u16>,
    default_pool_id: Value,
    loadbalancer_id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    allowed_cidrs: Option<&'a [String]>,
}

/// Whether allowed CIDRs can be applied to listeners on the pool's load
/// balancer.
fn use_vip_acl(ctx: &Context<'_, Cloud>, pool: &PoolRecord) -> anyhow::Result<bool> {
    if !ctx.cloud.api().supports_vip_acl() {
        return Ok(false);
    }
    let lb = loadbalancer_by_id(ctx, &pool.loadbalancer_id)?
        .with_context(|| format!("load balancer {} of pool {} not found", pool.loadbalancer_id, pool.name))?;
    Ok(lb.provider != OVN_PROVIDER)
}

fn pool_by_id(ctx: &Context<'_, Cloud>, id: &str) -> anyhow::Result<PoolRecord> {
    let found = ctx.cloud.call(|api| api.list_pools(Some(id), ""))?;
    single_match(format!("pool {id}"), found)?.with_context(|| format!("pool {id} not found"))
}

impl Resource for LbListener {
    type Cloud = Cloud;
    const KIND: &'static str = "LBListener";
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
        self.pool.iter().collect()
    }

    fn dependencies(&self, tasks: &TaskSet<Cloud>) -> Vec<TaskKey> {
        let mut deps = tasks.keys_of::<LoadBalancer>();
        deps.extend(tasks.keys_of::<LbPool>());
        deps
    }

    fn find(&self, ctx: &Context<'_, Cloud>) -> anyhow::Result<Option<Self>> {
        if self.name.is_none() {
            return Ok(None);
        }
        let found = ctx
            .cloud
            .call(|api| api.list_listeners(self.id.as_deref(), self.name()))?;
        let found = single_match(format!("listeners named {:?}", self.name()), found)?;
        Ok(found.map(|record| {
            let mut allowed_cidrs = record.allowed_cidrs;
            allowed_cidrs.sort();
            Self {
                id: Some(record.id),
                name: Some(record.name),
                port: Some(record.port),
                pool: Some(Link::id(record.default_pool_id)),
                allowed_cidrs: Some(allowed_cidrs),
                lifecycle: self.lifecycle,
            }
        }))
    }

    fn adopt(&mut self, actual: &Self) {
        self.id.clone_from(&actual.id);
    }

    fn diff(actual: &Self, expected: &Self, d: &mut Differ<'_>) -> Self {
        Self {
            id: d.field("ID", &actual.id, &expected.id),
            name: d.field("Name", &actual.name, &expected.name),
            port: d.field("Port", &actual.port, &expected.port),
            pool: d.link("Pool", &actual.pool, &expected.pool),
            allowed_cidrs: d.list(
                "AllowedCIDRs",
                CollectionPolicy::Unordered,
                &actual.allowed_cidrs,
                &expected.allowed_cidrs,
            ),
            ..Default::default()
        }
    }

    fn check_changes(actual: Option<&Self>, expected: &Self, changes: &Self) -> reconcile::Result<()> {
        if actual.is_none() {
            required("Name", &expected.name)?;
        } else {
            immutable("ID", &changes.id)?;
            immutable("Name", &changes.name)?;
            immutable("Port", &changes.port)?;
            immutable("Pool", &changes.pool)?;
        }
        Ok(())
    }

    fn render_direct(
        ctx: &Context<'_, Cloud>,
        actual: Option<&Self>,
        expected: &mut Self,
        changes: &Self,
    ) -> anyhow::Result<()> {
        match actual {
            None => {
                let pool = pool_by_id(ctx, &ctx.link_id("Pool", &expected.pool)?)?;
                let mut record = ListenerRecord {
                    name: expected.name().to_string(),
                    port: expected.port.context("listener port is not set")?,
                    default_pool_id: pool.id.clone(),
                    loadbalancer_id: pool.loadbalancer_id.clone(),
                    ..Default::default()
                };
                if use_vip_acl(ctx, &pool)? {
                    record.allowed_cidrs = expected.allowed_cidrs.clone().unwrap_or_default();
                } else if expected.allowed_cidrs.as_ref().is_some_and(|c| !c.is_empty()) {
                    log::warn!("{}: VIP access lists not supported; ignoring allowed CIDRs", ctx.key);
                }
                let created = ctx.cloud.call(|api| api.create_listener(record.clone()))?;
                log::info!("Created listener {} ({})", created.name, created.id);
                expected.id = Some(created.id);
            }
            Some(actual) => {
                let (Some(cidrs), Some(id)) = (&changes.allowed_cidrs, &actual.id) else {
                    return Ok(());
                };
                let pool_id = ctx.link_id("Pool", &actual.pool)?;
                if use_vip_acl(ctx, &pool_by_id(ctx, &pool_id)?)? {
                    ctx.cloud
                        .call(|api| api.update_listener_allowed_cidrs(id, cidrs.clone()))?;
                } else {
                    log::warn!("{}: VIP access lists not supported; leaving allowed CIDRs", ctx.key);
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
        let pool = expected.pool.as_ref().ok_or(reconcile::Error::RequiredField("Pool"))?;
        let block = TerraformListener {
            name: expected.name(),
            protocol: "TCP",
            protocol_port: expected.port,
            default_pool_id: writer.link(pool, "id")?,
            loadbalancer_id: writer.link(pool, "loadbalancer_id")?,
            allowed_cidrs: expected.allowed_cidrs.as_deref(),
        };
        writer.add_resource(TERRAFORM_TYPE, expected.name(), block)
    }
}
