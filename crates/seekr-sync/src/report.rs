use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;

use crate::{SweepOutcome, SweepPlan};

/// Writes `<reports_dir>/<run_id>/sweep_plan.json` and `sweep_summary.md`.
pub async fn write_sweep_report(
    reports_dir: &Path,
    plan: &SweepPlan,
    outcome: &SweepOutcome,
) -> Result<PathBuf> {
    let run_dir = reports_dir.join(plan.run_id.to_string());
    fs::create_dir_all(&run_dir)
        .await
        .with_context(|| format!("creating {}", run_dir.display()))?;

    let plan_json = serde_json::to_vec_pretty(&serde_json::json!({
        "plan": plan,
        "outcome": outcome,
    }))
    .context("serializing sweep plan")?;
    fs::write(run_dir.join("sweep_plan.json"), plan_json)
        .await
        .context("writing sweep_plan.json")?;

    fs::write(run_dir.join("sweep_summary.md"), render_sweep_summary(plan, outcome))
        .await
        .context("writing sweep_summary.md")?;

    Ok(run_dir)
}

pub fn render_sweep_summary(plan: &SweepPlan, outcome: &SweepOutcome) -> String {
    let mode = if outcome.dry_run { "dry run" } else { "committed" };
    let groups = if plan.groups.is_empty() {
        "No duplicate groups.".to_string()
    } else {
        plan.groups
            .iter()
            .map(|g| {
                let removals = g
                    .removals
                    .iter()
                    .map(|r| format!("#{}", r.id))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(
                    "- {} @ {} ({}): keep #{}, remove {}",
                    g.title, g.company, g.location, g.keeper.id, removals
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };
    let failures = outcome
        .failures
        .iter()
        .map(|f| format!("- #{}: {}", f.id, f.reason))
        .collect::<Vec<_>>()
        .join("\n");

    let mut summary = format!(
        "# Duplicate Sweep\n\n- Run ID: `{}`\n- Planned at: {}\n- Mode: {}\n- Description prefix: {} chars\n- Groups: {}\n- Planned removals: {}\n- Removed: {}\n- Already gone: {}\n- Failed: {}\n\n## Groups\n{}\n",
        plan.run_id,
        plan.created_at,
        mode,
        plan.rule.description_prefix_len,
        plan.groups.len(),
        outcome.planned,
        outcome.removed,
        outcome.already_gone,
        outcome.failures.len(),
        groups
    );
    if !failures.is_empty() {
        summary.push_str(&format!("\n## Failures\n{failures}\n"));
    }
    summary
}
