use super::discovered_tag;
use crate::cloud::{Cloud, NetworkRecord, TagTarget};
use reconcile::{
    BackendKind, CollectionPolicy, Context, Differ, Lifecycle, Resource, TemplateWriter,
    immutable, required, single_match,
};
use serde::Serialize;

pub const TERRAFORM_TYPE: &str = "openstack_networking_network_v2";

/// The cluster's private network.
#[derive(Debug, Clone, Default)]
pub struct Network {
    pub id: Option<String>,
    pub name: Option<String>,
    /// Cluster ownership tag; filled in from the cluster name if unset
    pub tag: Option<String>,
    pub availability_zone_hints: Option<Vec<String>>,
    pub lifecycle: Lifecycle,
}

#[derive(Serialize)]
struct TerraformNetwork<'a> {
    name: &'a str,
    admin_state_up: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tags: Vec<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    availability_zone_hints: Option<&'a [String]>,
}

impl Network {
    fn from_record(record: NetworkRecord, expected: &Self) -> Self {
        let mut hints = record.availability_zone_hints;
        hints.sort();
        Self {
            id: Some(record.id),
            name: Some(record.name),
            tag: discovered_tag(&record.tags, &expected.tag),
            availability_zone_hints: Some(hints),
            lifecycle: expected.lifecycle,
        }
    }
}

impl Resource for Network {
    type Cloud = Cloud;
    const KIND: &'static str = "Network";
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

    fn normalize(&mut self, cloud: &Cloud) -> anyhow::Result<()> {
        if self.tag.is_none() {
            self.tag = Some(cloud.cluster_tag());
        }
        Ok(())
    }

    fn find(&self, ctx: &Context<'_, Cloud>) -> anyhow::Result<Option<Self>> {
        let found = ctx
            .cloud
            .call(|api| api.list_networks(self.id.as_deref(), self.name()))?;
        let found = single_match(format!("networks named {:?}", self.name()), found)?;
        Ok(found.map(|record| Self::from_record(record, self)))
    }

    fn adopt(&mut self, actual: &Self) {
        self.id.clone_from(&actual.id);
    }

    fn diff(actual: &Self, expected: &Self, d: &mut Differ<'_>) -> Self {
        Self {
            name: d.field("Name", &actual.name, &expected.name),
            tag: d.field("Tag", &actual.tag, &expected.tag),
            availability_zone_hints: d.list(
                "AvailabilityZoneHints",
                CollectionPolicy::Unordered,
                &actual.availability_zone_hints,
                &expected.availability_zone_hints,
            ),
            ..Default::default()
        }
    }

    fn check_changes(actual: Option<&Self>, expected: &Self, changes: &Self) -> reconcile::Result<()> {
        if actual.is_none() {
            required("Name", &expected.name)?;
        } else {
            immutable("Name", &changes.name)?;
            immutable("AvailabilityZoneHints", &changes.availability_zone_hints)?;
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
                let record = NetworkRecord {
                    name: expected.name().to_string(),
                    tags: expected.tag.iter().cloned().collect(),
                    availability_zone_hints: expected.availability_zone_hints.clone().unwrap_or_default(),
                    ..Default::default()
                };
                let created = ctx.cloud.call(|api| api.create_network(record.clone()))?;
                log::info!("Created network {} ({})", created.name, created.id);
                expected.id = Some(created.id);
            }
            Some(actual) => {
                if let (Some(tag), Some(id)) = (&changes.tag, &actual.id) {
                    ctx.cloud
                        .call(|api| api.append_tag(TagTarget::Network, id, tag))?;
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
        let block = TerraformNetwork {
            name: expected.name(),
            admin_state_up: true,
            tags: expected.tag.iter().map(String::as_str).collect(),
            availability_zone_hints: expected.availability_zone_hints.as_deref(),
        };
        writer.add_resource(TERRAFORM_TYPE, expected.name(), block)
    }
}
