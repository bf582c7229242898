//! Row types for the result tables in `migrations/0001_init.sql`.
//! Read back by the results API with `sqlx::query_as`.

use serde::Serialize;

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct RunRow {
    pub id: String,
    pub as_of: String,
    pub commerce_accepted: i64,
    pub commerce_rejected: i64,
    pub outcome_accepted: i64,
    pub outcome_rejected: i64,
    pub data_quality_score: f64,
    pub total_findings: i64,
    pub significant_findings: i64,
    pub anomalous_findings: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RunSummaryRow {
    pub summary_json: String,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct WindowMetricRow {
    pub outcome_id: String,
    #[serde(rename = "window")]
    pub window_label: String,
    pub count: i64,
    pub total_amount: f64,
    pub mean_amount: f64,
    pub total_quantity: i64,
    pub provenance_mix: f64,
    pub window_start: String,
    pub window_end: String,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct CorrelationRow {
    pub id: String,
    pub outcome_variable: String,
    pub volume_variable: String,
    pub coefficient: f64,
    pub p_value: f64,
    #[serde(rename = "window")]
    pub window_label: String,
    pub sample_size: i64,
    pub method: String,
    pub significant: bool,
    pub effect_size: String,
    pub description: String,
    pub data_quality: f64,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct AnomalyRow {
    pub outcome_id: String,
    #[serde(rename = "window")]
    pub window_label: String,
    #[serde(rename = "group")]
    pub group_key: String,
    pub value: f64,
    pub group_mean: f64,
    pub group_std_dev: f64,
    pub z_score: f64,
    pub direction: String,
    pub provenance_mix: f64,
    pub attribution: String,
}
