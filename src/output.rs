//! JSON file sink for a finished run.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::engine::RunReport;
use crate::error::{AppError, Result};

pub const WINDOW_METRICS_FILE: &str = "window_metrics.json";
pub const CORRELATIONS_FILE: &str = "correlations.json";
pub const ANOMALIES_FILE: &str = "anomalies.json";
pub const INSIGHT_SUMMARY_FILE: &str = "insight_summary.json";
pub const RUN_STATS_FILE: &str = "run_stats.json";

async fn write_json<T: Serialize + ?Sized>(dir: &Path, name: &str, value: &T) -> Result<PathBuf> {
    let path = dir.join(name);
    let body = serde_json::to_vec_pretty(value)?;
    tokio::fs::write(&path, body).await?;
    Ok(path)
}

/// Write every output collection of `report` into `dir`, creating it if needed.
/// Files are overwritten, so rerunning identical input leaves identical bytes.
pub async fn write_report(dir: &Path, report: &RunReport) -> Result<Vec<PathBuf>> {
    tokio::fs::create_dir_all(dir).await?;

    let stats = serde_json::json!({
        "run_id": report.run_id,
        "stats": report.stats,
    });

    let written = vec![
        write_json(dir, WINDOW_METRICS_FILE, &report.window_metrics).await?,
        write_json(dir, CORRELATIONS_FILE, &report.correlations).await?,
        write_json(dir, ANOMALIES_FILE, &report.anomalies).await?,
        write_json(dir, INSIGHT_SUMMARY_FILE, &report.insight).await?,
        write_json(dir, RUN_STATS_FILE, &stats).await?,
    ];

    info!(
        run_id = %report.run_id,
        dir = %dir.display(),
        files = written.len(),
        "[OUTPUT] wrote {} files to {}",
        written.len(),
        dir.display(),
    );
    Ok(written)
}

/// Load a JSON array of raw records. Each element is validated later, one by one.
pub async fn read_records(path: &Path) -> Result<Vec<Value>> {
    let raw = tokio::fs::read(path).await?;
    match serde_json::from_slice::<Value>(&raw)? {
        Value::Array(items) => Ok(items),
        _ => Err(AppError::Input(format!(
            "{} must contain a JSON array of records",
            path.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_arrays_and_rejects_other_shapes() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.json");
        let bad = dir.path().join("bad.json");
        tokio::fs::write(&good, br#"[{"id": 1}, 7]"#).await.unwrap();
        tokio::fs::write(&bad, br#"{"id": 1}"#).await.unwrap();

        assert_eq!(read_records(&good).await.unwrap().len(), 2);
        assert!(matches!(read_records(&bad).await, Err(AppError::Input(_))));
        assert!(matches!(
            read_records(&dir.path().join("missing.json")).await,
            Err(AppError::Io(_))
        ));
    }
}
