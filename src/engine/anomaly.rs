//! Window-count outliers against a per-group baseline.

use std::collections::BTreeMap;

use chrono::Timelike;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::types::{Anomaly, AnomalyAttribution, AnomalyDirection, WindowMetric};

/// How window metrics are grouped into baselines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKey {
    /// One baseline per window label (`pre`, `during`, `post`).
    Window,
    /// One baseline per hour of day of the window start (`hour_20`).
    HourOfDay,
}

impl GroupKey {
    pub fn key_for(&self, metric: &WindowMetric) -> String {
        match self {
            GroupKey::Window => metric.window.as_str().to_string(),
            GroupKey::HourOfDay => format!("hour_{:02}", metric.window_start.hour()),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct AnomalyStats {
    pub groups: usize,
    /// Groups below the minimum size, which have no usable baseline.
    pub skipped_groups: usize,
    pub anomalies: usize,
    pub mock_attributed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Baseline {
    pub mean: f64,
    /// Sample standard deviation (n - 1).
    pub std_dev: f64,
}

/// Mean and sample standard deviation. `None` below two values.
pub fn baseline(values: &[f64]) -> Option<Baseline> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some(Baseline {
        mean,
        std_dev: var.sqrt(),
    })
}

/// Indices of values whose absolute deviation exceeds `k` standard deviations,
/// with their signed z-scores. A zero deviation baseline flags nothing.
pub fn outliers(values: &[f64], k: f64) -> Vec<(usize, f64)> {
    let Some(b) = baseline(values) else {
        return Vec::new();
    };
    if b.std_dev == 0.0 || !b.std_dev.is_finite() {
        return Vec::new();
    }
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| (*v - b.mean).abs() > k * b.std_dev)
        .map(|(i, v)| (i, (v - b.mean) / b.std_dev))
        .collect()
}

/// Flag anomalous window counts. Groups under the configured minimum size are
/// skipped and counted in `AnomalyStats::skipped_groups`.
pub fn detect(
    metrics: &[WindowMetric],
    key: GroupKey,
    cfg: &EngineConfig,
) -> (Vec<Anomaly>, AnomalyStats) {
    let mut groups: BTreeMap<String, Vec<&WindowMetric>> = BTreeMap::new();
    for m in metrics {
        groups.entry(key.key_for(m)).or_default().push(m);
    }

    let mut anomalies = Vec::new();
    let mut stats = AnomalyStats {
        groups: groups.len(),
        ..AnomalyStats::default()
    };
    for (group, members) in &groups {
        if members.len() < cfg.anomaly_min_group_size {
            stats.skipped_groups += 1;
            debug!(
                group = %group,
                size = members.len(),
                "[ANOMALY] group {} has {} values, below baseline minimum {}",
                group,
                members.len(),
                cfg.anomaly_min_group_size,
            );
            continue;
        }

        let values: Vec<f64> = members.iter().map(|m| m.count as f64).collect();
        let Some(b) = baseline(&values) else {
            continue;
        };
        for (i, z) in outliers(&values, cfg.anomaly_k) {
            let m = members[i];
            anomalies.push(Anomaly {
                outcome_id: m.outcome_id.clone(),
                window: m.window,
                group: group.clone(),
                value: values[i],
                group_mean: b.mean,
                group_std_dev: b.std_dev,
                z_score: z,
                direction: if z > 0.0 {
                    AnomalyDirection::Spike
                } else {
                    AnomalyDirection::Dip
                },
                provenance_mix: m.provenance_mix,
                attribution: AnomalyAttribution::from_mix(m.count, m.provenance_mix),
            });
        }
    }

    stats.anomalies = anomalies.len();
    stats.mock_attributed = anomalies
        .iter()
        .filter(|a| a.attribution == AnomalyAttribution::Mock)
        .count();
    info!(
        groups = stats.groups,
        skipped_groups = stats.skipped_groups,
        anomalies = stats.anomalies,
        mock_attributed = stats.mock_attributed,
        "[ANOMALY] {} anomalies across {} groups ({} skipped, {} mock-attributed)",
        stats.anomalies,
        stats.groups,
        stats.skipped_groups,
        stats.mock_attributed,
    );

    (anomalies, stats)
}
