//! Reduction of a run's results into a ranked, human-readable summary.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::Serialize;
use tracing::info;

use crate::config::EngineConfig;
use crate::engine::statistics::{SummaryStatistics, TemporalPattern};
use crate::types::{AnnotatedResult, Anomaly, WindowLabel, WindowMetric};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedInsight {
    /// 1-based.
    pub rank: usize,
    pub headline: String,
    #[serde(flatten)]
    pub result: AnnotatedResult,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowBreakdown {
    pub window: WindowLabel,
    pub count: usize,
    pub significant_count: usize,
    /// 0 when the window has no results.
    pub mean_coefficient: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InsightSummary {
    pub top_results: Vec<RankedInsight>,
    /// Count-weighted mean provenance mix over every window metric.
    pub data_quality_score: f64,
    pub total_findings: usize,
    pub significant_findings: usize,
    pub anomalous_findings: usize,
    pub strongest_positive: Option<AnnotatedResult>,
    pub strongest_negative: Option<AnnotatedResult>,
    pub window_breakdown: Vec<WindowBreakdown>,
    pub statistics: SummaryStatistics,
    pub temporal_patterns: Vec<TemporalPattern>,
}

/// Strongest first; ties by smaller p-value, then id, so the order never depends on input order.
fn by_strength(a: &AnnotatedResult, b: &AnnotatedResult) -> Ordering {
    b.result
        .coefficient
        .abs()
        .total_cmp(&a.result.coefficient.abs())
        .then_with(|| a.result.p_value.total_cmp(&b.result.p_value))
        .then_with(|| a.result.id.cmp(&b.result.id))
}

pub fn headline(result: &AnnotatedResult, outcome_label: &str) -> String {
    let r = &result.result;
    let direction = if r.coefficient >= 0.0 {
        "increases"
    } else {
        "decreases"
    };
    format!(
        "{} {} by a correlation of {:.3} following {}, p={:.4}",
        r.volume_variable, direction, r.coefficient, outcome_label, r.p_value
    )
}

/// Σ(mix · count) / Σcount; 0 when no window holds any record.
pub fn data_quality_score(metrics: &[WindowMetric]) -> f64 {
    let total: usize = metrics.iter().map(|m| m.count).sum();
    if total == 0 {
        return 0.0;
    }
    let weighted: f64 = metrics
        .iter()
        .map(|m| m.provenance_mix * m.count as f64)
        .sum();
    weighted / total as f64
}

/// `outcome_labels` maps outcome-variable names to their rendered phrase; unknown
/// names render as themselves. Descriptive statistics and temporal patterns are
/// computed upstream and carried through unchanged.
pub fn summarize(
    results: &[AnnotatedResult],
    metrics: &[WindowMetric],
    anomalies: &[Anomaly],
    outcome_labels: &HashMap<String, String>,
    statistics: SummaryStatistics,
    temporal_patterns: Vec<TemporalPattern>,
    cfg: &EngineConfig,
) -> InsightSummary {
    let mut significant: Vec<&AnnotatedResult> = results.iter().filter(|r| r.significant).collect();
    significant.sort_by(|a, b| by_strength(a, b));

    let top_results: Vec<RankedInsight> = significant
        .iter()
        .take(cfg.top_n_insights)
        .enumerate()
        .map(|(i, r)| {
            let label = outcome_labels
                .get(&r.result.outcome_variable)
                .map(String::as_str)
                .unwrap_or(r.result.outcome_variable.as_str());
            RankedInsight {
                rank: i + 1,
                headline: headline(r, label),
                result: (*r).clone(),
            }
        })
        .collect();

    let strongest_positive = results
        .iter()
        .filter(|r| r.result.coefficient > 0.0)
        .min_by(|a, b| by_strength(a, b))
        .cloned();
    let strongest_negative = results
        .iter()
        .filter(|r| r.result.coefficient < 0.0)
        .min_by(|a, b| by_strength(a, b))
        .cloned();

    let window_breakdown = WindowLabel::all()
        .into_iter()
        .map(|window| {
            let in_window: Vec<&AnnotatedResult> =
                results.iter().filter(|r| r.result.window == window).collect();
            let count = in_window.len();
            let mean_coefficient = if count == 0 {
                0.0
            } else {
                in_window.iter().map(|r| r.result.coefficient).sum::<f64>() / count as f64
            };
            WindowBreakdown {
                window,
                count,
                significant_count: in_window.iter().filter(|r| r.significant).count(),
                mean_coefficient,
            }
        })
        .collect();

    let summary = InsightSummary {
        top_results,
        data_quality_score: data_quality_score(metrics),
        total_findings: results.len(),
        significant_findings: significant.len(),
        anomalous_findings: anomalies.len(),
        strongest_positive,
        strongest_negative,
        window_breakdown,
        statistics,
        temporal_patterns,
    };

    info!(
        total = summary.total_findings,
        significant = summary.significant_findings,
        anomalous = summary.anomalous_findings,
        data_quality = summary.data_quality_score,
        patterns = summary.temporal_patterns.len(),
        "[INSIGHT] {} findings | {} significant | {} anomalous | {} temporal patterns | data quality {:.2}",
        summary.total_findings,
        summary.significant_findings,
        summary.anomalous_findings,
        summary.temporal_patterns.len(),
        summary.data_quality_score,
    );
    for top in &summary.top_results {
        info!(rank = top.rank, "[INSIGHT] #{} {}", top.rank, top.headline);
    }

    summary
}
