use super::{Session, converged, display};
use crate::Context as AppContext;
use crate::cli::PlanArgs;
use crate::ui;
use anyhow::{Context, Result};
use reconcile::{ExecuteOptions, PlannedChange, Target};

pub fn run(ctx: &AppContext, args: PlanArgs) -> Result<()> {
    let session = Session::open(&args.cluster, args.state.as_deref())?;
    if !ctx.quiet {
        ui::header(&format!("Plan for {}", session.config.cluster.name));
        ui::kv("State", &session.state_path.display().to_string());
    }
    let changes = preview(ctx, &session, ExecuteOptions::default())?;
    display::display_plan(&changes);
    Ok(())
}

/// Dry-run the cluster and return every change an update would make.
pub fn preview(ctx: &AppContext, session: &Session, options: ExecuteOptions) -> Result<Vec<PlannedChange>> {
    let tasks = session.config.build_tasks()?;
    let cloud = session.cloud();
    let engine = session.engine(Target::dry_run(), options);
    converged(engine.converge_with_progress(&cloud, &tasks, &mut ctx.progress()))?;
    Ok(engine
        .target()
        .as_dry_run()
        .context("dry-run target has no report")?
        .changes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{NetworkRecord, OpenstackApi};
    use reconcile::{ChangeKind, TaskKey};
    use std::fs;
    use tempfile::TempDir;

    const CLUSTER: &str = r#"
[cluster]
name = "demo"

[[subnets]]
name = "demo-a"
cidr = "10.0.1.0/24"
"#;

    fn session(dir: &TempDir) -> Session {
        let cluster = dir.path().join("cluster.toml");
        fs::write(&cluster, CLUSTER).unwrap();
        Session::open(&cluster, Some(&dir.path().join("cloud.json"))).unwrap()
    }

    fn quiet() -> AppContext {
        AppContext {
            verbose: 0,
            quiet: true,
        }
    }

    #[test]
    fn test_preview_on_empty_cloud() {
        let dir = TempDir::new().unwrap();
        let session = session(&dir);

        let changes = preview(&quiet(), &session, ExecuteOptions::default()).unwrap();
        let keys: Vec<&TaskKey> = changes.iter().map(|c| &c.key).collect();
        assert_eq!(
            keys,
            vec![&TaskKey::new("Network", "demo"), &TaskKey::new("Subnet", "demo-a")]
        );
        assert!(changes.iter().all(|c| c.kind == ChangeKind::Create));
        assert!(session.memory.calls().is_empty());
    }

    #[test]
    fn test_preview_sees_existing_network() {
        let dir = TempDir::new().unwrap();
        let session = session(&dir);
        session
            .memory
            .create_network(NetworkRecord {
                name: "demo".into(),
                ..Default::default()
            })
            .unwrap();

        let changes = preview(&quiet(), &session, ExecuteOptions::default()).unwrap();
        assert_eq!(changes[0].kind, ChangeKind::Update);
        assert_eq!(changes[0].fields, vec!["Tag"]);
    }
}
