use crate::cloud::{Cloud, RuleRecord, SecurityGroupRecord};
use reconcile::{
    BackendKind, CollectionPolicy, Context, Deletion, Differ, Lifecycle, Resource, TemplateWriter,
    immutable, required, single_match, template_name,
};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const TERRAFORM_TYPE: &str = "openstack_networking_secgroup_v2";
pub const TERRAFORM_RULE_TYPE: &str = "openstack_networking_secgroup_rule_v2";

/// One rule of a security group, compared by value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SecurityGroupRule {
    #[serde(default = "default_direction")]
    pub direction: String,
    #[serde(default = "default_ethertype")]
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

fn default_direction() -> String {
    "ingress".to_string()
}

fn default_ethertype() -> String {
    "IPv4".to_string()
}

impl SecurityGroupRule {
    fn from_record(record: &RuleRecord) -> Self {
        Self {
            direction: record.direction.clone(),
            ethertype: record.ethertype.clone(),
            protocol: record.protocol.clone(),
            port_range_min: record.port_range_min,
            port_range_max: record.port_range_max,
            remote_ip_prefix: record.remote_ip_prefix.clone(),
        }
    }

    fn to_record(&self, security_group_id: &str) -> RuleRecord {
        RuleRecord {
            security_group_id: security_group_id.to_string(),
            direction: self.direction.clone(),
            ethertype: self.ethertype.clone(),
            protocol: self.protocol.clone(),
            port_range_min: self.port_range_min,
            port_range_max: self.port_range_max,
            remote_ip_prefix: self.remote_ip_prefix.clone(),
            ..Default::default()
        }
    }

    /// Block name for the rule, unique within its group.
    fn block_name(&self, group: &str) -> String {
        let ports = match (self.port_range_min, self.port_range_max) {
            (Some(min), Some(max)) if min == max => min.to_string(),
            (Some(min), Some(max)) => format!("{min}-{max}"),
            _ => "all".to_string(),
        };
        template_name(&format!(
            "{group}-{}-{}-{ports}-{}",
            self.direction,
            self.protocol.as_deref().unwrap_or("any"),
            self.remote_ip_prefix.as_deref().unwrap_or("any"),
        ))
    }
}

impl fmt::Display for SecurityGroupRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.direction,
            self.protocol.as_deref().unwrap_or("any"),
            self.remote_ip_prefix.as_deref().unwrap_or("any")
        )?;
        if let Some(min) = self.port_range_min {
            write!(f, " port {min}")?;
            if let Some(max) = self.port_range_max.filter(|max| *max != min) {
                write!(f, "-{max}")?;
            }
        }
        Ok(())
    }
}

/// Security group owned by the cluster.
///
/// Rules merge into the live group: missing rules are added and extra rules
/// are kept unless `remove_extra_rules` is set, in which case they are
/// reported as deletions.
#[derive(Debug, Clone, Default)]
pub struct SecurityGroup {
    pub id: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub rules: Option<Vec<SecurityGroupRule>>,
    pub remove_extra_rules: bool,
    pub lifecycle: Lifecycle,
}

#[derive(Serialize)]
struct TerraformSecurityGroup<'a> {
    name: &'a str,
    description: &'a str,
    delete_default_rules: bool,
}

#[derive(Serialize)]
struct TerraformRule<'a> {
    security_group_id: serde_json::Value,
    direction: &'a str,
    ethertype: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    protocol: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    port_range_min: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    port_range_max: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    remote_ip_prefix: Option<&'a str>,
}

/// A live rule the cluster no longer declares.
#[derive(Debug)]
struct ExtraRule {
    id: String,
    rule: SecurityGroupRule,
}

impl Deletion<Cloud> for ExtraRule {
    fn item(&self) -> String {
        format!("rule {} ({})", self.id, self.rule)
    }

    fn delete(&self, ctx: &Context<'_, Cloud>) -> anyhow::Result<()> {
        ctx.cloud.call(|api| api.delete_rule(&self.id))?;
        Ok(())
    }
}

impl Resource for SecurityGroup {
    type Cloud = Cloud;
    const KIND: &'static str = "SecurityGroup";
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

    fn find(&self, ctx: &Context<'_, Cloud>) -> anyhow::Result<Option<Self>> {
        let found = ctx.cloud.call(|api| api.list_security_groups(self.name()))?;
        let Some(group) = single_match(format!("security groups named {:?}", self.name()), found)? else {
            return Ok(None);
        };
        let mut rules: Vec<SecurityGroupRule> = ctx
            .cloud
            .call(|api| api.list_rules(&group.id))?
            .iter()
            .map(SecurityGroupRule::from_record)
            .collect();
        rules.sort();
        Ok(Some(Self {
            id: Some(group.id),
            name: Some(group.name),
            description: Some(group.description),
            rules: Some(rules),
            remove_extra_rules: self.remove_extra_rules,
            lifecycle: self.lifecycle,
        }))
    }

    fn adopt(&mut self, actual: &Self) {
        self.id.clone_from(&actual.id);
    }

    fn diff(actual: &Self, expected: &Self, d: &mut Differ<'_>) -> Self {
        Self {
            name: d.field("Name", &actual.name, &expected.name),
            description: d.field("Description", &actual.description, &expected.description),
            rules: d.list("Rules", CollectionPolicy::Merge, &actual.rules, &expected.rules),
            ..Default::default()
        }
    }

    fn check_changes(actual: Option<&Self>, expected: &Self, changes: &Self) -> reconcile::Result<()> {
        if actual.is_none() {
            required("Name", &expected.name)?;
        } else {
            immutable("Name", &changes.name)?;
            immutable("Description", &changes.description)?;
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
            Some(id) => id,
            None => {
                let record = SecurityGroupRecord {
                    name: expected.name().to_string(),
                    description: expected.description.clone().unwrap_or_default(),
                    ..Default::default()
                };
                let created = ctx
                    .cloud
                    .call(|api| api.create_security_group(record.clone()))?;
                log::info!("Created security group {} ({})", created.name, created.id);
                expected.id = Some(created.id.clone());
                created.id
            }
        };

        for rule in changes.rules.iter().flatten() {
            let record = rule.to_record(&id);
            ctx.cloud.call(|api| api.create_rule(record.clone()))?;
            log::debug!("{}: added rule {rule}", ctx.key);
        }
        Ok(())
    }

    fn render_template(
        writer: &TemplateWriter<'_>,
        _actual: Option<&Self>,
        expected: &Self,
        _changes: &Self,
    ) -> anyhow::Result<()> {
        let name = expected.name();
        writer.add_resource(
            TERRAFORM_TYPE,
            name,
            TerraformSecurityGroup {
                name,
                description: expected.description.as_deref().unwrap_or_default(),
                delete_default_rules: true,
            },
        )?;
        for rule in expected.rules.iter().flatten() {
            let block = TerraformRule {
                security_group_id: writer.reference(TERRAFORM_TYPE, name, "id"),
                direction: &rule.direction,
                ethertype: &rule.ethertype,
                protocol: rule.protocol.as_deref(),
                port_range_min: rule.port_range_min,
                port_range_max: rule.port_range_max,
                remote_ip_prefix: rule.remote_ip_prefix.as_deref(),
            };
            writer.add_resource(TERRAFORM_RULE_TYPE, &rule.block_name(name), block)?;
        }
        Ok(())
    }

    fn find_deletions(&self, ctx: &Context<'_, Cloud>) -> anyhow::Result<Vec<Box<dyn Deletion<Cloud>>>> {
        let (true, Some(id)) = (self.remove_extra_rules, &self.id) else {
            return Ok(Vec::new());
        };
        let wanted = self.rules.as_deref().unwrap_or_default();
        let extra = ctx
            .cloud
            .call(|api| api.list_rules(id))?
            .into_iter()
            .filter_map(|record| {
                let rule = SecurityGroupRule::from_record(&record);
                (!wanted.contains(&rule)).then(|| {
                    Box::new(ExtraRule {
                        id: record.id,
                        rule,
                    }) as Box<dyn Deletion<Cloud>>
                })
            })
            .collect();
        Ok(extra)
    }
}
