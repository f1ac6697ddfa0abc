use super::{Session, converged, display, plan};
use crate::Context as AppContext;
use crate::cli::{TargetArg, UpdateArgs};
use crate::paths::TERRAFORM_FILE;
use crate::tasks::LoadBalancer;
use crate::ui;
use anyhow::{Context, Result};
use clap::ValueEnum;
use dialoguer::Confirm;
use reconcile::{
    ExecuteOptions, Resource, RetryConfig, RunReport, Target, TaskKey, TemplateTarget,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub fn run(ctx: &AppContext, args: UpdateArgs) -> Result<()> {
    let mut session = Session::open(&args.cluster, args.state.as_deref())?;
    session.retry = RetryConfig::new(args.retries + 1, Duration::from_secs(2), 2.0);
    let options = ExecuteOptions { jobs: args.jobs };

    if !ctx.quiet {
        ui::header(&format!("Updating {}", session.config.cluster.name));
        if let Some(target) = args.target.to_possible_value() {
            ui::kv("Target", target.get_name());
        }
        ui::kv("State", &session.state_path.display().to_string());
    }

    match args.target {
        TargetArg::DryRun => {
            let changes = plan::preview(ctx, &session, options)?;
            display::display_plan(&changes);
            Ok(())
        }
        TargetArg::Direct => {
            if let Some(report) = apply(ctx, &session, options, args.yes)? {
                print_outputs(&session, &report);
            }
            Ok(())
        }
        TargetArg::Terraform => {
            let path = render_terraform(ctx, &session, options, &args.out)?;
            if let Some(path) = path {
                ui::success(&format!("Wrote {}", path.display()));
            }
            Ok(())
        }
    }
}

/// Preview, confirm, then converge directly against the cloud.
///
/// Returns `None` when there was nothing to do or the user declined.
pub fn apply(
    ctx: &AppContext,
    session: &Session,
    options: ExecuteOptions,
    yes: bool,
) -> Result<Option<RunReport>> {
    let changes = plan::preview(ctx, session, options.clone())?;
    if !ctx.quiet {
        display::display_plan(&changes);
    }
    if changes.is_empty() {
        return Ok(None);
    }

    if !yes {
        println!();
        let proceed = Confirm::new()
            .with_prompt("Continue?")
            .default(true)
            .interact()?;
        if !proceed {
            ui::info("Cancelled");
            return Ok(None);
        }
    }

    let tasks = session.config.build_tasks()?;
    let cloud = session.cloud();
    let engine = session.engine(Target::direct(), options);
    let result = engine.converge_with_progress(&cloud, &tasks, &mut ctx.progress());

    // Keep whatever was created, even when the run failed part way.
    log::debug!("cloud mutations: {:?}", session.memory.calls());
    session.save()?;

    let report = converged(result)?;
    if !ctx.quiet {
        display::print_summary(&report.summary());
    }
    Ok(Some(report))
}

fn print_outputs(session: &Session, report: &RunReport) {
    let key = TaskKey::new(LoadBalancer::KIND, session.config.api_name());
    let Some(lb) = report.get(&key) else {
        return;
    };
    let vip = session
        .memory
        .snapshot()
        .loadbalancers
        .into_iter()
        .find(|record| Some(&record.id) == lb.identifier.as_ref())
        .map(|record| record.vip_address);
    if let Some(vip) = vip {
        println!();
        ui::kv("API address", &vip);
    }
}

/// Render the cluster as Terraform JSON under `out`.
///
/// Returns the written path, or `None` if the file on disk already matches.
pub fn render_terraform(
    ctx: &AppContext,
    session: &Session,
    options: ExecuteOptions,
    out: &Path,
) -> Result<Option<PathBuf>> {
    let tasks = session.config.build_tasks()?;
    let cloud = session.cloud();
    let target = TemplateTarget::new().with_provider("openstack", serde_json::json!({}));
    let engine = session.engine(Target::Template(target), options);
    converged(engine.converge_with_progress(&cloud, &tasks, &mut ctx.progress()))?;

    let rendered = engine
        .target()
        .as_template()
        .context("template target has no document")?
        .finalize()?;

    let path = out.join(TERRAFORM_FILE);
    if path.exists() {
        let existing = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if !ctx.quiet {
            ui::info(&format!("Changes to {}:", path.display()));
        }
        let changed = if ctx.quiet {
            existing != rendered
        } else {
            display::show_text_diff(&existing, &rendered)
        };
        if !changed {
            return Ok(None);
        }
    }

    fs::create_dir_all(out).with_context(|| format!("Failed to create {}", out.display()))?;
    fs::write(&path, rendered).with_context(|| format!("Failed to write {}", path.display()))?;
    log::info!("Wrote {} ({} resources)", path.display(), tasks.len());
    Ok(Some(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CLUSTER: &str = r#"
[cluster]
name = "demo"

[[subnets]]
name = "demo-a"
cidr = "10.0.1.0/24"

[[security_groups]]
name = "api.demo"
description = "API access"
rules = [{ protocol = "tcp", port_range_min = 443, port_range_max = 443, remote_ip_prefix = "0.0.0.0/0" }]

[api_loadbalancer]
subnet = "demo-a"
security_group = "api.demo"
allowed_cidrs = ["10.1.0.0/16"]
"#;

    fn quiet() -> AppContext {
        AppContext {
            verbose: 0,
            quiet: true,
        }
    }

    fn session(dir: &TempDir) -> Session {
        let cluster = dir.path().join("cluster.toml");
        fs::write(&cluster, CLUSTER).unwrap();
        Session::open(&cluster, Some(&dir.path().join("state/cloud.json"))).unwrap()
    }

    #[test]
    fn test_apply_persists_state() {
        let dir = TempDir::new().unwrap();
        let session = session(&dir);

        let report = apply(&quiet(), &session, ExecuteOptions::default(), true)
            .unwrap()
            .unwrap();
        let summary = report.summary();
        assert_eq!(summary.created, 6);
        assert!(summary.is_success());

        let reopened = Session::open(&dir.path().join("cluster.toml"), Some(&session.state_path)).unwrap();
        let state = reopened.memory.snapshot();
        assert_eq!(state.networks.len(), 1);
        assert_eq!(state.loadbalancers.len(), 1);
        assert_eq!(state.listeners[0].allowed_cidrs, vec!["10.1.0.0/16"]);
    }

    #[test]
    fn test_apply_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let first = session(&dir);
        apply(&quiet(), &first, ExecuteOptions::default(), true).unwrap();

        let second = Session::open(&dir.path().join("cluster.toml"), Some(&first.state_path)).unwrap();
        let again = apply(&quiet(), &second, ExecuteOptions::default(), true).unwrap();
        assert!(again.is_none());
    }

    #[test]
    fn test_render_terraform_writes_once() {
        let dir = TempDir::new().unwrap();
        let session = session(&dir);
        let out = dir.path().join("out");

        let path = render_terraform(&quiet(), &session, ExecuteOptions::default(), &out)
            .unwrap()
            .unwrap();
        let doc: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert!(doc["provider"]["openstack"].is_object());
        assert!(doc["resource"]["openstack_lb_listener_v2"]["demo-https"].is_object());
        assert_eq!(
            doc["output"]["api-demo-vip"]["value"],
            "${openstack_lb_loadbalancer_v2.api-demo.vip_address}"
        );
        assert!(session.memory.calls().is_empty());

        let again = render_terraform(&quiet(), &session, ExecuteOptions::default(), &out).unwrap();
        assert!(again.is_none());
    }
}
