//! Plan, summary and diff display

use crate::ui;
use colored::{ColoredString, Colorize};
use reconcile::{ChangeKind, ExecuteSummary, PlannedChange, RunReport, TaskState};
use std::collections::BTreeMap;

fn symbol(kind: &ChangeKind) -> ColoredString {
    match kind {
        ChangeKind::Create => "+".green(),
        ChangeKind::Update => "~".yellow(),
        ChangeKind::Delete { .. } => "-".red(),
    }
}

fn describe(change: &PlannedChange) -> String {
    match &change.kind {
        ChangeKind::Create => "(will create)".to_string(),
        ChangeKind::Update => ui::list_or_dash(&change.fields),
        ChangeKind::Delete { item } => format!("(will remove {item})"),
    }
}

/// Display planned changes grouped by task kind
pub fn display_plan(changes: &[PlannedChange]) {
    if changes.is_empty() {
        println!();
        println!("  {} No changes needed", "✓".green());
        return;
    }

    let mut by_kind: BTreeMap<&str, Vec<&PlannedChange>> = BTreeMap::new();
    for change in changes {
        by_kind.entry(change.key.kind).or_default().push(change);
    }

    println!();
    println!(
        "┌─ {} ─────────────────────────────────────────┐",
        "Planned Changes".bold()
    );
    println!("│");
    for (kind, kind_changes) in &by_kind {
        println!("│ {}", kind.bold());
        for change in kind_changes {
            println!(
                "│   {} {:<36} {}",
                symbol(&change.kind),
                change.key.name,
                describe(change).dimmed()
            );
        }
        println!("│");
    }

    let creates = changes.iter().filter(|c| c.kind == ChangeKind::Create).count();
    let deletes = changes
        .iter()
        .filter(|c| matches!(c.kind, ChangeKind::Delete { .. }))
        .count();
    println!("├─────────────────────────────────────────────────────┤");
    println!(
        "│ Summary: {} changes ({} to create, {} to update, {} to remove)",
        changes.len().to_string().bold(),
        creates.to_string().green(),
        (changes.len() - creates - deletes).to_string().yellow(),
        deletes.to_string().red()
    );
    println!("└─────────────────────────────────────────────────────┘");
}

/// Print final summary
pub fn print_summary(summary: &ExecuteSummary) {
    println!();
    if summary.is_success() {
        println!("  {} Cluster converged", "✓".green().bold());
    } else {
        println!("  {} Cluster did not converge", "⚠".yellow().bold());
    }

    if summary.created > 0 {
        println!("    • {} resources created", summary.created);
    }
    if summary.updated > 0 {
        println!("    • {} resources updated", summary.updated);
    }
    if summary.deleted > 0 {
        println!("    • {} objects removed", summary.deleted);
    }
    if summary.unchanged > 0 {
        println!("    • {} resources unchanged", summary.unchanged);
    }
    if summary.skipped > 0 {
        println!("    • {} resources skipped", summary.skipped);
    }
    if summary.cancelled > 0 {
        println!("    • {} resources cancelled", summary.cancelled);
    }
    if summary.failed > 0 {
        println!("    • {} {} failed", summary.failed, "resources".red());
    }
}

/// Print every task that did not reach `Done`
pub fn print_failures(report: &RunReport) {
    for task in &report.tasks {
        match task.state {
            TaskState::Failed => match &task.error {
                Some(err) => ui::error(&format!(
                    "{}: {err} [{}]",
                    task.key,
                    err.category().description()
                )),
                None => ui::error(&format!("{}: failed", task.key)),
            },
            TaskState::Skipped => {
                if let Some(blocker) = &task.blocked_by {
                    ui::dim(&format!("⊘ {} skipped: {blocker} failed", task.key));
                }
            }
            TaskState::Cancelled => ui::dim(&format!("⊘ {} cancelled", task.key)),
            _ => {}
        }
    }
}

/// Show a line diff between two texts using the `similar` crate
///
/// Returns whether anything differs.
pub fn show_text_diff(old: &str, new: &str) -> bool {
    let diff = similar::TextDiff::from_lines(old, new);
    let mut has_changes = false;

    for change in diff.iter_all_changes() {
        match change.tag() {
            similar::ChangeTag::Delete => {
                has_changes = true;
                print!("    {}", format!("- {change}").red());
            }
            similar::ChangeTag::Insert => {
                has_changes = true;
                print!("    {}", format!("+ {change}").green());
            }
            similar::ChangeTag::Equal => {}
        }
    }

    if !has_changes {
        println!("    {}", "(no changes)".dimmed());
    }
    has_changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconcile::TaskKey;

    #[test]
    fn test_describe() {
        let update = PlannedChange {
            key: TaskKey::new("Subnet", "a"),
            kind: ChangeKind::Update,
            fields: vec!["DNSServers", "Tag"],
        };
        assert_eq!(describe(&update), "DNSServers, Tag");

        let delete = PlannedChange {
            key: TaskKey::new("SecurityGroup", "api"),
            kind: ChangeKind::Delete {
                item: "rule rule-0003".into(),
            },
            fields: Vec::new(),
        };
        assert_eq!(describe(&delete), "(will remove rule rule-0003)");
    }

    #[test]
    fn test_show_text_diff() {
        assert!(!show_text_diff("a\nb\n", "a\nb\n"));
        assert!(show_text_diff("a\nb\n", "a\nc\n"));
    }
}
