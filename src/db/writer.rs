use std::sync::Arc;

use tracing::{error, info};

use crate::api::health::HealthState;
use crate::engine::RunReport;
use crate::error::Result;

/// Persists finished run reports to SQLite.
///
/// A run is written in one transaction: any rows already stored under the same
/// run id are deleted first, so persisting a recomputed run is idempotent.
pub struct ResultWriter {
    pool: sqlx::SqlitePool,
    health: Option<Arc<HealthState>>,
}

impl ResultWriter {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool, health: None }
    }

    pub fn with_health(mut self, health: Arc<HealthState>) -> Self {
        self.health = Some(health);
        self
    }

    pub async fn persist(&self, report: &RunReport) -> Result<()> {
        match self.write_run(report).await {
            Ok(()) => {
                if let Some(h) = &self.health {
                    h.record_persisted(&report.run_id);
                }
                info!(
                    run_id = %report.run_id,
                    windows = report.window_metrics.len(),
                    correlations = report.correlations.len(),
                    anomalies = report.anomalies.len(),
                    "[DB] persisted run {}",
                    report.run_id,
                );
                Ok(())
            }
            Err(e) => {
                if let Some(h) = &self.health {
                    h.record_write_error();
                }
                error!(run_id = %report.run_id, "[DB] write error: {e}");
                Err(e)
            }
        }
    }

    async fn write_run(&self, report: &RunReport) -> Result<()> {
        let run_id = report.run_id.as_str();
        let stats = &report.stats;
        let summary_json = serde_json::to_string(&report.insight)?;
        let stats_json = serde_json::to_string(&report.stats)?;

        let mut tx = self.pool.begin().await?;

        for table in ["anomalies", "correlations", "window_metrics"] {
            sqlx::query(&format!("DELETE FROM {table} WHERE run_id = ?"))
                .bind(run_id)
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query("DELETE FROM runs WHERE id = ?")
            .bind(run_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO runs (
                id, as_of, commerce_accepted, commerce_rejected,
                outcome_accepted, outcome_rejected, data_quality_score,
                total_findings, significant_findings, anomalous_findings,
                summary_json, stats_json
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(run_id)
        .bind(stats.as_of.to_rfc3339())
        .bind(stats.normalize.commerce_accepted as i64)
        .bind(stats.normalize.commerce_rejected.total() as i64)
        .bind(stats.normalize.outcome_accepted as i64)
        .bind(stats.normalize.outcome_rejected.total() as i64)
        .bind(report.insight.data_quality_score)
        .bind(report.insight.total_findings as i64)
        .bind(report.insight.significant_findings as i64)
        .bind(report.insight.anomalous_findings as i64)
        .bind(summary_json)
        .bind(stats_json)
        .execute(&mut *tx)
        .await?;

        for m in &report.window_metrics {
            sqlx::query(
                r#"
                INSERT INTO window_metrics (
                    run_id, outcome_id, window_label, count, total_amount,
                    mean_amount, total_quantity, provenance_mix, window_start, window_end
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(run_id)
            .bind(&m.outcome_id)
            .bind(m.window.as_str())
            .bind(m.count as i64)
            .bind(m.total_amount)
            .bind(m.mean_amount)
            .bind(m.total_quantity as i64)
            .bind(m.provenance_mix)
            .bind(m.window_start.to_rfc3339())
            .bind(m.window_end.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        for a in &report.correlations {
            let r = &a.result;
            sqlx::query(
                r#"
                INSERT INTO correlations (
                    run_id, id, outcome_variable, volume_variable, coefficient, p_value,
                    window_label, sample_size, method, significant, effect_size,
                    description, data_quality
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(run_id)
            .bind(&r.id)
            .bind(&r.outcome_variable)
            .bind(&r.volume_variable)
            .bind(r.coefficient)
            .bind(r.p_value)
            .bind(r.window.as_str())
            .bind(r.sample_size as i64)
            .bind(r.method.to_string())
            .bind(a.significant)
            .bind(a.effect_size.to_string())
            .bind(&r.description)
            .bind(r.data_quality)
            .execute(&mut *tx)
            .await?;
        }

        for (seq, an) in report.anomalies.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO anomalies (
                    run_id, seq, outcome_id, window_label, group_key, value, group_mean,
                    group_std_dev, z_score, direction, provenance_mix, attribution
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(run_id)
            .bind(seq as i64)
            .bind(&an.outcome_id)
            .bind(an.window.as_str())
            .bind(&an.group)
            .bind(an.value)
            .bind(an.group_mean)
            .bind(an.group_std_dev)
            .bind(an.z_score)
            .bind(an.direction.to_string())
            .bind(an.provenance_mix)
            .bind(an.attribution.to_string())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
