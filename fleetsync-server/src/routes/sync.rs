use crate::config::validate_root;
use crate::error::AppError;
use crate::models::sync_run;
use crate::state::AppState;
use crate::sync::{ConflictResolution, ExecutionResult, PlanRequest, SyncMode};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

pub fn router(_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/plan", post(create_plan))
        .route("/run", post(run_plan))
        .route("/plans/{id}", get(get_plan))
        .route("/runs", get(list_runs))
        .route("/runs/{id}", get(get_run))
}

#[derive(Debug, Deserialize)]
pub struct PlanBody {
    pub mode: String,
    pub roots: Option<Vec<String>>,
    pub exclude: Option<Vec<String>>,
    pub allow_delete: Option<bool>,
    pub source_server: Option<String>,
    pub target_server: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RunBody {
    pub plan_id: String,
    #[serde(default)]
    pub conflict_resolutions: Vec<ConflictResolution>,
}

#[derive(Debug, Deserialize)]
pub struct RunsQuery {
    pub limit: Option<u32>,
}

async fn create_plan(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PlanBody>,
) -> Result<Json<Value>, AppError> {
    let mode: SyncMode = body.mode.parse().map_err(AppError::BadRequest)?;

    let fleet = &state.fleet;
    let roots = body.roots.unwrap_or_else(|| fleet.sync.roots.clone());
    if roots.is_empty() {
        return Err(AppError::BadRequest("no roots to sync".into()));
    }
    for root in &roots {
        validate_root(root).map_err(AppError::BadRequest)?;
    }

    let (source, target) = fleet
        .resolve_pair(body.source_server.as_deref(), body.target_server.as_deref())
        .map_err(AppError::BadRequest)?;

    let request = PlanRequest {
        mode,
        source,
        target,
        roots,
        excludes: body.exclude.unwrap_or_else(|| fleet.sync.excludes.clone()),
        allow_delete: body.allow_delete.unwrap_or(fleet.sync.allow_delete),
    };
    let plan = state.engine.build_plan(request).await?;
    let conflicts = plan.conflicts.len();

    let mut response = serde_json::to_value(&plan).map_err(|e| anyhow::anyhow!(e))?;
    let plan_id = state.plans.insert(plan).await;
    let pending = state.plans.len().await;
    tracing::info!(plan_id = %plan_id, conflicts, pending, "Plan stored");
    if let Value::Object(map) = &mut response {
        map.insert("plan_id".into(), Value::String(plan_id.clone()));
    }

    state.ui.broadcast(
        "sync:planned",
        json!({ "planId": plan_id, "mode": mode.as_str(), "conflicts": conflicts }),
    );
    Ok(Json(response))
}

async fn run_plan(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RunBody>,
) -> Result<(StatusCode, Json<ExecutionResult>), AppError> {
    let plan = state
        .plans
        .get(&body.plan_id)
        .await
        .ok_or_else(|| AppError::NotFound("Plan not found".into()))?;

    // The plan stays runnable until its run row exists.
    let db = state.db.clone();
    let plan_id = body.plan_id.clone();
    let recorded = plan.clone();
    let run_id = tokio::task::spawn_blocking(move || {
        let conn = db.get()?;
        sync_run::start(&conn, &plan_id, &recorded)
    })
    .await
    .map_err(|e| anyhow::anyhow!(e))??;

    if state.plans.take(&body.plan_id).await.is_none() {
        // Another request took it between get and take.
        let nothing_ran = ExecutionResult {
            ok: false,
            operations: Vec::new(),
        };
        finish_run(&state, &run_id, &nothing_ran).await;
        return Err(AppError::NotFound("Plan not found".into()));
    }

    let ui = state.ui.clone();
    let plan_id = body.plan_id.clone();
    let result = state
        .engine
        .execute(&plan, &body.conflict_resolutions, |leg| {
            ui.broadcast("sync:leg", json!({ "planId": plan_id, "leg": leg }));
        })
        .await;

    finish_run(&state, &run_id, &result).await;

    state.ui.broadcast(
        "sync:completed",
        json!({ "planId": body.plan_id, "runId": run_id, "ok": result.ok }),
    );

    let status = if result.ok {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    Ok((status, Json(result)))
}

/// Record the outcome of a run. Failing to record it is logged and never
/// hides the per-leg result from the caller.
async fn finish_run(state: &AppState, run_id: &str, result: &ExecutionResult) {
    let db = state.db.clone();
    let id = run_id.to_string();
    let stored = result.clone();
    let recorded = tokio::task::spawn_blocking(move || {
        let conn = db.get()?;
        sync_run::finish(&conn, &id, &stored)
    })
    .await
    .map_err(anyhow::Error::from)
    .and_then(|finished| finished);

    if let Err(e) = recorded {
        tracing::error!(run_id = %run_id, "Failed to record run result: {e:#}");
    }
}

async fn get_plan(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let plan = state
        .plans
        .get(&id)
        .await
        .ok_or_else(|| AppError::NotFound("Plan not found".into()))?;

    let mut response = serde_json::to_value(&plan).map_err(|e| anyhow::anyhow!(e))?;
    if let Value::Object(map) = &mut response {
        map.insert("plan_id".into(), Value::String(id));
    }
    Ok(Json(response))
}

async fn list_runs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RunsQuery>,
) -> Result<Json<Vec<sync_run::SyncRun>>, AppError> {
    let limit = query.limit.unwrap_or(20).clamp(1, 200);
    let db = state.db.clone();
    let runs = tokio::task::spawn_blocking(move || {
        let conn = db.get()?;
        sync_run::find_recent(&conn, limit)
    })
    .await
    .map_err(|e| anyhow::anyhow!(e))??;
    Ok(Json(runs))
}

async fn get_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<sync_run::SyncRun>, AppError> {
    let db = state.db.clone();
    let run = tokio::task::spawn_blocking(move || {
        let conn = db.get()?;
        sync_run::find_by_id(&conn, &id)
    })
    .await
    .map_err(|e| anyhow::anyhow!(e))??;
    run.map(Json)
        .ok_or_else(|| AppError::NotFound("Run not found".into()))
}
