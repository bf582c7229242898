//! Outcome and volume variables, aligned 1:1 with the outcome events of a run.

use std::collections::HashMap;

use serde::Serialize;

use crate::config::EngineConfig;
use crate::engine::classifier;
use crate::types::{OutcomeCategory, OutcomeEvent, SignificanceTier, WindowLabel, WindowMetric};

/// Decided once per outcome variable; selects the correlation method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeKind {
    Binary,
    Continuous,
}

impl OutcomeKind {
    /// Binary iff the present values take exactly two distinct values.
    pub fn infer(values: &[Option<f64>]) -> Self {
        let mut distinct: Vec<f64> = values.iter().flatten().copied().collect();
        distinct.sort_by(|a, b| a.total_cmp(b));
        distinct.dedup();
        if distinct.len() == 2 {
            OutcomeKind::Binary
        } else {
            OutcomeKind::Continuous
        }
    }
}

#[derive(Debug, Clone)]
pub struct OutcomeSeries {
    pub name: String,
    /// Phrase used in rendered insights, e.g. "participant A wins".
    pub label: String,
    pub kind: OutcomeKind,
    pub values: Vec<Option<f64>>,
    /// Whether each outcome event was tagged `real`.
    pub real: Vec<bool>,
}

impl OutcomeSeries {
    pub fn new(name: &str, label: &str, values: Vec<Option<f64>>, real: Vec<bool>) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            kind: OutcomeKind::infer(&values),
            values,
            real,
        }
    }

    fn from_events<F>(name: &str, label: &str, outcomes: &[OutcomeEvent], f: F) -> Self
    where
        F: Fn(&OutcomeEvent) -> Option<f64>,
    {
        let values = outcomes.iter().map(f).collect();
        let real = outcomes.iter().map(|o| o.source.is_real()).collect();
        Self::new(name, label, values, real)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeField {
    Count,
    TotalAmount,
    MeanAmount,
    TotalQuantity,
    OrdersPerHour,
}

impl VolumeField {
    pub fn as_str(&self) -> &'static str {
        match self {
            VolumeField::Count => "count",
            VolumeField::TotalAmount => "total_amount",
            VolumeField::MeanAmount => "mean_amount",
            VolumeField::TotalQuantity => "total_quantity",
            VolumeField::OrdersPerHour => "orders_per_hour",
        }
    }

    pub fn all() -> [VolumeField; 5] {
        [
            VolumeField::Count,
            VolumeField::TotalAmount,
            VolumeField::MeanAmount,
            VolumeField::TotalQuantity,
            VolumeField::OrdersPerHour,
        ]
    }

    /// The field's value, or `None` where it is undefined (mean of an empty window).
    pub fn value(&self, metric: &WindowMetric) -> Option<f64> {
        match self {
            VolumeField::Count => Some(metric.count as f64),
            VolumeField::TotalAmount => Some(metric.total_amount),
            VolumeField::MeanAmount if metric.count == 0 => None,
            VolumeField::MeanAmount => Some(metric.mean_amount),
            VolumeField::TotalQuantity => Some(metric.total_quantity as f64),
            VolumeField::OrdersPerHour => {
                let hours = (metric.window_end - metric.window_start).num_milliseconds() as f64
                    / 3_600_000.0;
                (hours > 0.0).then(|| metric.count as f64 / hours)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct VolumeSeries {
    /// `{window}_{field}`, e.g. `post_count`.
    pub name: String,
    pub window: WindowLabel,
    pub field: VolumeField,
    pub values: Vec<Option<f64>>,
    /// Records in each window.
    pub counts: Vec<usize>,
    /// `real` records in each window.
    pub real_counts: Vec<usize>,
}

impl VolumeSeries {
    /// Pull one field of one window for every outcome event, in outcome order.
    /// Events without a metric for the window yield a missing value. Outcome ids
    /// are unique after normalization, so each (id, window) names one metric.
    pub fn extract(
        outcomes: &[OutcomeEvent],
        metrics: &[WindowMetric],
        window: WindowLabel,
        field: VolumeField,
    ) -> Self {
        let index: HashMap<(&str, WindowLabel), &WindowMetric> = metrics
            .iter()
            .map(|m| ((m.outcome_id.as_str(), m.window), m))
            .collect();

        let mut values = Vec::with_capacity(outcomes.len());
        let mut counts = Vec::with_capacity(outcomes.len());
        let mut real_counts = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            match index.get(&(outcome.id.as_str(), window)) {
                Some(metric) => {
                    values.push(field.value(metric));
                    counts.push(metric.count);
                    real_counts.push(metric.real_count);
                }
                None => {
                    values.push(None);
                    counts.push(0);
                    real_counts.push(0);
                }
            }
        }

        Self {
            name: format!("{}_{}", window.as_str(), field.as_str()),
            window,
            field,
            values,
            counts,
            real_counts,
        }
    }
}

fn flag(b: bool) -> Option<f64> {
    Some(if b { 1.0 } else { 0.0 })
}

/// The standard outcome-variable catalogue.
pub fn outcome_variables(outcomes: &[OutcomeEvent], cfg: &EngineConfig) -> Vec<OutcomeSeries> {
    let threshold = cfg.high_scoring_threshold;
    vec![
        OutcomeSeries::from_events("participant_a_win", "participant A wins", outcomes, |o| {
            flag(o.category == OutcomeCategory::Win)
        }),
        OutcomeSeries::from_events("participant_b_win", "participant B wins", outcomes, |o| {
            flag(o.category == OutcomeCategory::Loss)
        }),
        OutcomeSeries::from_events("draw", "draws", outcomes, |o| {
            flag(o.category == OutcomeCategory::Draw)
        }),
        OutcomeSeries::from_events("high_scoring", "high-scoring events", outcomes, |o| {
            flag(o.is_high_scoring(threshold))
        }),
        OutcomeSeries::from_events("tournament_match", "tournament events", outcomes, |o| {
            flag(o.significance == SignificanceTier::Tournament)
        }),
        OutcomeSeries::from_events("final_match", "finals", outcomes, |o| {
            flag(o.significance == SignificanceTier::Final)
        }),
        OutcomeSeries::from_events("total_score", "higher total scores", outcomes, |o| {
            Some(f64::from(o.total_score()))
        }),
        OutcomeSeries::from_events("impact_score", "higher-impact events", outcomes, |o| {
            Some(f64::from(classifier::classify(o, threshold).impact_score))
        }),
    ]
}

/// Order-count predictors paired with the post-window count of the same events:
/// pre to post and during to post. Predictors are always treated as continuous.
pub fn period_variables(
    outcomes: &[OutcomeEvent],
    metrics: &[WindowMetric],
) -> Vec<(OutcomeSeries, VolumeSeries)> {
    let response = VolumeSeries::extract(outcomes, metrics, WindowLabel::Post, VolumeField::Count);
    [
        (WindowLabel::Pre, "higher pre-window order counts"),
        (WindowLabel::During, "higher during-window order counts"),
    ]
    .into_iter()
    .map(|(window, label)| {
        let predictor = VolumeSeries::extract(outcomes, metrics, window, VolumeField::Count);
        let series = OutcomeSeries {
            name: predictor.name,
            label: label.to_string(),
            kind: OutcomeKind::Continuous,
            values: predictor.values,
            real: outcomes.iter().map(|o| o.source.is_real()).collect(),
        };
        (series, response.clone())
    })
    .collect()
}

/// Every (window, field) volume variable, windows outermost.
pub fn volume_variables(outcomes: &[OutcomeEvent], metrics: &[WindowMetric]) -> Vec<VolumeSeries> {
    WindowLabel::all()
        .into_iter()
        .flat_map(|window| {
            VolumeField::all()
                .into_iter()
                .map(move |field| VolumeSeries::extract(outcomes, metrics, window, field))
        })
        .collect()
}
