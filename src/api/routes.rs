use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::health::HealthState;
use crate::db::models::{AnomalyRow, CorrelationRow, RunRow, RunSummaryRow, WindowMetricRow};
use crate::error::AppError;
use crate::types::WindowLabel;

#[derive(Clone)]
pub struct ApiState {
    pub pool: sqlx::SqlitePool,
    pub health: Arc<HealthState>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/runs", get(get_runs))
        .route("/runs/:id/summary", get(get_run_summary))
        .route("/runs/:id/correlations", get(get_run_correlations))
        .route("/runs/:id/windows", get(get_run_windows))
        .route("/runs/:id/anomalies", get(get_run_anomalies))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct CorrelationsQuery {
    pub significant: Option<bool>,
    pub window: Option<String>,
}

#[derive(Deserialize)]
pub struct WindowsQuery {
    pub outcome_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub stored_runs: i64,
    pub runs_persisted: u64,
    pub write_errors: u64,
    pub last_persisted_at_ms: u64,
    pub last_run_id: Option<String>,
}

#[derive(Serialize)]
pub struct SummaryResponse {
    pub run: RunRow,
    pub summary: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_health(State(state): State<ApiState>) -> Result<Json<HealthResponse>, AppError> {
    let stored_runs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM runs")
        .fetch_one(&state.pool)
        .await?;

    Ok(Json(HealthResponse {
        status: "ok",
        stored_runs,
        runs_persisted: state.health.runs_persisted(),
        write_errors: state.health.write_errors(),
        last_persisted_at_ms: state.health.last_persisted_at_ms(),
        last_run_id: state.health.last_run_id(),
    }))
}

const RUN_COLUMNS: &str = "id, as_of, commerce_accepted, commerce_rejected, outcome_accepted, \
    outcome_rejected, data_quality_score, total_findings, significant_findings, anomalous_findings";

async fn get_runs(State(state): State<ApiState>) -> Result<Json<Vec<RunRow>>, AppError> {
    let rows = sqlx::query_as::<_, RunRow>(&format!(
        "SELECT {RUN_COLUMNS} FROM runs ORDER BY as_of DESC, id"
    ))
    .fetch_all(&state.pool)
    .await?;
    Ok(Json(rows))
}

async fn fetch_run(pool: &sqlx::SqlitePool, run_id: &str) -> Result<RunRow, AppError> {
    sqlx::query_as::<_, RunRow>(&format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = ?"))
        .bind(run_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("run {run_id}")))
}

async fn get_run_summary(
    State(state): State<ApiState>,
    Path(run_id): Path<String>,
) -> Result<Json<SummaryResponse>, AppError> {
    let run = fetch_run(&state.pool, &run_id).await?;
    let row = sqlx::query_as::<_, RunSummaryRow>("SELECT summary_json FROM runs WHERE id = ?")
        .bind(&run_id)
        .fetch_one(&state.pool)
        .await?;
    let summary = serde_json::from_str(&row.summary_json)?;
    Ok(Json(SummaryResponse { run, summary }))
}

async fn get_run_correlations(
    State(state): State<ApiState>,
    Path(run_id): Path<String>,
    Query(params): Query<CorrelationsQuery>,
) -> Result<Json<Vec<CorrelationRow>>, AppError> {
    fetch_run(&state.pool, &run_id).await?;

    let window = match params.window.as_deref() {
        Some(w) => Some(
            WindowLabel::parse(w)
                .ok_or_else(|| AppError::Input(format!("unknown window '{w}'")))?
                .as_str(),
        ),
        None => None,
    };

    let rows = sqlx::query_as::<_, CorrelationRow>(
        r#"
        SELECT id, outcome_variable, volume_variable, coefficient, p_value, window_label,
               sample_size, method, significant, effect_size, description, data_quality
        FROM correlations
        WHERE run_id = ?
          AND (? IS NULL OR significant = ?)
          AND (? IS NULL OR window_label = ?)
        ORDER BY ABS(coefficient) DESC, p_value ASC, id
        "#,
    )
    .bind(&run_id)
    .bind(params.significant)
    .bind(params.significant)
    .bind(window)
    .bind(window)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(rows))
}

async fn get_run_windows(
    State(state): State<ApiState>,
    Path(run_id): Path<String>,
    Query(params): Query<WindowsQuery>,
) -> Result<Json<Vec<WindowMetricRow>>, AppError> {
    fetch_run(&state.pool, &run_id).await?;

    let rows = sqlx::query_as::<_, WindowMetricRow>(
        r#"
        SELECT outcome_id, window_label, count, total_amount, mean_amount,
               total_quantity, provenance_mix, window_start, window_end
        FROM window_metrics
        WHERE run_id = ? AND (? IS NULL OR outcome_id = ?)
        ORDER BY window_start, outcome_id
        "#,
    )
    .bind(&run_id)
    .bind(params.outcome_id.as_deref())
    .bind(params.outcome_id.as_deref())
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(rows))
}

async fn get_run_anomalies(
    State(state): State<ApiState>,
    Path(run_id): Path<String>,
) -> Result<Json<Vec<AnomalyRow>>, AppError> {
    fetch_run(&state.pool, &run_id).await?;

    let rows = sqlx::query_as::<_, AnomalyRow>(
        r#"
        SELECT outcome_id, window_label, group_key, value, group_mean, group_std_dev,
               z_score, direction, provenance_mix, attribution
        FROM anomalies
        WHERE run_id = ?
        ORDER BY seq
        "#,
    )
    .bind(&run_id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(rows))
}
