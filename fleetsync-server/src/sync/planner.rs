use super::collector::ManifestCollector;
use super::conflict::find_all_conflicts;
use super::diff::{diff, summarize};
use super::error::Result;
use super::types::{Plan, RootPlan, SyncMode};
use crate::exec::Host;
use chrono::Utc;
use fleetsync_agent::ExcludeSet;
use std::collections::BTreeMap;

/// Everything needed to build a plan.
#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub mode: SyncMode,
    /// Side A
    pub source: Host,
    /// Side B
    pub target: Host,
    pub roots: Vec<String>,
    pub excludes: Vec<String>,
    pub allow_delete: bool,
}

/// Collect both sides of every root and turn them into a plan.
///
/// Roots are visited one at a time in first-occurrence order. The first
/// collection failure aborts the build.
pub async fn build_plan(collector: &ManifestCollector<'_>, request: PlanRequest) -> Result<Plan> {
    let excludes = ExcludeSet::new(request.excludes.as_slice())?;
    let roots = dedup_roots(&request.roots);
    let mut by_root = BTreeMap::new();

    for root in &roots {
        let manifest_a = collector.collect(&request.source, root, &excludes).await?;
        let manifest_b = collector.collect(&request.target, root, &excludes).await?;

        let root_plan = match request.mode {
            SyncMode::AToB => {
                let changes = diff(&manifest_a, &manifest_b, request.allow_delete);
                RootPlan::OneWay {
                    summary: summarize(&changes),
                    changes,
                }
            }
            SyncMode::BToA => {
                let changes = diff(&manifest_b, &manifest_a, request.allow_delete);
                RootPlan::OneWay {
                    summary: summarize(&changes),
                    changes,
                }
            }
            SyncMode::Bidirectional => {
                let a_to_b = diff(&manifest_a, &manifest_b, request.allow_delete);
                let b_to_a = diff(&manifest_b, &manifest_a, request.allow_delete);
                RootPlan::Bidirectional {
                    a_to_b_summary: summarize(&a_to_b),
                    b_to_a_summary: summarize(&b_to_a),
                    a_to_b,
                    b_to_a,
                }
            }
        };
        by_root.insert(root.clone(), root_plan);
    }

    let conflicts = if request.mode == SyncMode::Bidirectional {
        find_all_conflicts(&roots, &by_root)
    } else {
        Vec::new()
    };

    tracing::info!(
        mode = request.mode.as_str(),
        source = %request.source.name,
        target = %request.target.name,
        roots = roots.len(),
        conflicts = conflicts.len(),
        "plan built"
    );

    Ok(Plan {
        mode: request.mode,
        source_host: request.source.ssh_host,
        target_host: request.target.ssh_host,
        source_server: request.source.name,
        target_server: request.target.name,
        source_port: request.source.ssh_port,
        target_port: request.target.ssh_port,
        roots,
        excludes: request.excludes,
        allow_delete: request.allow_delete,
        created_at: Utc::now(),
        by_root,
        conflicts,
    })
}

fn dedup_roots(roots: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    roots
        .iter()
        .filter(|root| seen.insert(root.as_str()))
        .cloned()
        .collect()
}
