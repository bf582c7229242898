//! Descriptive statistics over a run's inputs and window metrics, plus the
//! temporal patterns read off them: cross-window order shifts and the post-window
//! lift that follows particular outcomes.

use std::collections::BTreeMap;

use chrono::Timelike;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::engine::correlation::{pearson, two_sided_p};
use crate::engine::variables::{VolumeField, VolumeSeries};
use crate::types::{CommerceEvent, OutcomeCategory, OutcomeEvent, WindowLabel, WindowMetric};

/// Categories listed in the distribution.
const TOP_CATEGORIES: usize = 10;
/// Quantile of pre-to-post changes above which an event counts as an order increase.
const INCREASE_QUANTILE: f64 = 0.75;
/// |r| a during-to-post correlation must exceed to be reported as a trend.
const REACTION_MIN_R: f64 = 0.4;
/// An outcome group's mean post count must exceed the overall mean by this factor.
const OUTCOME_LIFT: f64 = 1.2;
const HIGH_SCORING_LIFT: f64 = 1.15;
/// Smallest outcome group compared against the rest.
const MIN_PATTERN_GROUP: usize = 3;
/// Confidence grows with instances up to this many.
const CONFIDENCE_SATURATION: f64 = 10.0;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryCount {
    pub category: String,
    /// Commerce events listing the category.
    pub events: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ParticipantRecord {
    pub participant: String,
    pub wins: usize,
    pub losses: usize,
    pub draws: usize,
    pub score_for: u64,
    pub score_against: u64,
}

impl ParticipantRecord {
    pub fn played(&self) -> usize {
        self.wins + self.losses + self.draws
    }

    pub fn win_rate(&self) -> f64 {
        match self.played() {
            0 => 0.0,
            n => self.wins as f64 / n as f64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodAverage {
    pub window: WindowLabel,
    pub mean_count: f64,
    pub mean_total_amount: f64,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct SummaryStatistics {
    pub commerce_events: usize,
    pub outcome_events: usize,
    pub total_amount: f64,
    pub mean_amount: f64,
    pub median_amount: f64,
    pub total_quantity: u64,
    /// UTC hour of day holding the most commerce events; earliest hour on ties.
    pub peak_hour: Option<u32>,
    /// Most frequent categories first, ties by name.
    pub category_distribution: Vec<CategoryCount>,
    /// Sorted by participant name.
    pub participants: Vec<ParticipantRecord>,
    /// Highest win rate among participants with at least one win.
    pub best_participant: Option<String>,
    pub best_win_rate: f64,
    pub period_averages: Vec<PeriodAverage>,
    /// Window with the highest mean order count.
    pub peak_window: Option<WindowLabel>,
    /// Mean coefficient of variation of order counts across windows.
    pub order_volatility: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternKind {
    Spike,
    Trend,
}

impl std::fmt::Display for PatternKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatternKind::Spike => write!(f, "spike"),
            PatternKind::Trend => write!(f, "trend"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemporalPattern {
    /// `pre_to_post`, `during_to_post`, or the single window the pattern sits in.
    pub period: String,
    pub kind: PatternKind,
    /// Percent, capped at 100.
    pub magnitude: f64,
    pub confidence: f64,
    pub description: String,
    pub sample_size: usize,
    /// Share of `real` commerce records in the windows behind the pattern.
    pub real_share: f64,
}

// ---------------------------------------------------------------------------
// Summary statistics
// ---------------------------------------------------------------------------

pub fn summary_statistics(
    commerce: &[CommerceEvent],
    outcomes: &[OutcomeEvent],
    metrics: &[WindowMetric],
) -> SummaryStatistics {
    let total_amount: f64 = commerce.iter().map(|e| e.amount).sum();
    let mut amounts: Vec<f64> = commerce.iter().map(|e| e.amount).collect();
    amounts.sort_by(|a, b| a.total_cmp(b));

    let participants = participant_records(outcomes);
    let (best_participant, best_win_rate) = best_participant(&participants);
    let period_averages = period_averages(metrics);
    let peak_window = period_averages
        .iter()
        .fold(None::<&PeriodAverage>, |best, p| match best {
            Some(b) if b.mean_count >= p.mean_count => Some(b),
            _ => Some(p),
        })
        .map(|p| p.window);

    let stats = SummaryStatistics {
        commerce_events: commerce.len(),
        outcome_events: outcomes.len(),
        total_amount,
        mean_amount: mean(&amounts).unwrap_or(0.0),
        median_amount: quantile(&amounts, 0.5).unwrap_or(0.0),
        total_quantity: commerce.iter().map(|e| u64::from(e.quantity)).sum(),
        peak_hour: peak_hour(commerce),
        category_distribution: category_distribution(commerce),
        participants,
        best_participant,
        best_win_rate,
        period_averages,
        peak_window,
        order_volatility: order_volatility(metrics),
    };

    debug!(
        categories = stats.category_distribution.len(),
        participants = stats.participants.len(),
        peak_window = ?stats.peak_window,
        volatility = stats.order_volatility,
        "[STATS] {} categories | {} participants | order volatility {:.3}",
        stats.category_distribution.len(),
        stats.participants.len(),
        stats.order_volatility,
    );

    stats
}

fn peak_hour(commerce: &[CommerceEvent]) -> Option<u32> {
    let mut by_hour = [0usize; 24];
    for e in commerce {
        by_hour[e.timestamp.hour() as usize] += 1;
    }
    let (hour, count) = by_hour
        .iter()
        .enumerate()
        .fold((0, 0), |best, (h, &c)| if c > best.1 { (h, c) } else { best });
    (count > 0).then_some(hour as u32)
}

pub fn category_distribution(commerce: &[CommerceEvent]) -> Vec<CategoryCount> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for e in commerce {
        for c in &e.categories {
            *counts.entry(c.as_str()).or_default() += 1;
        }
    }
    let mut out: Vec<CategoryCount> = counts
        .into_iter()
        .map(|(category, events)| CategoryCount {
            category: category.to_string(),
            events,
        })
        .collect();
    // stable: equal counts keep name order
    out.sort_by(|a, b| b.events.cmp(&a.events));
    out.truncate(TOP_CATEGORIES);
    out
}

pub fn participant_records(outcomes: &[OutcomeEvent]) -> Vec<ParticipantRecord> {
    let mut records: BTreeMap<&str, ParticipantRecord> = BTreeMap::new();
    for event in outcomes {
        let sides = [
            (&event.participant_a, event.score_a, event.score_b),
            (&event.participant_b, event.score_b, event.score_a),
        ];
        for (name, own, other) in sides {
            let record = records.entry(name.as_str()).or_insert_with(|| ParticipantRecord {
                participant: name.clone(),
                ..ParticipantRecord::default()
            });
            record.score_for += u64::from(own);
            record.score_against += u64::from(other);
            match event.outcome_for(name) {
                Some(OutcomeCategory::Win) => record.wins += 1,
                Some(OutcomeCategory::Loss) => record.losses += 1,
                Some(OutcomeCategory::Draw) => record.draws += 1,
                None => {}
            }
        }
    }
    records.into_values().collect()
}

/// First by name among the highest win rates; `None` when nobody won.
fn best_participant(records: &[ParticipantRecord]) -> (Option<String>, f64) {
    let mut best: Option<&ParticipantRecord> = None;
    for r in records.iter().filter(|r| r.wins > 0) {
        if best.map_or(true, |b| r.win_rate() > b.win_rate()) {
            best = Some(r);
        }
    }
    match best {
        Some(r) => (Some(r.participant.clone()), r.win_rate()),
        None => (None, 0.0),
    }
}

fn period_averages(metrics: &[WindowMetric]) -> Vec<PeriodAverage> {
    WindowLabel::all()
        .into_iter()
        .filter_map(|window| {
            let in_window: Vec<&WindowMetric> = metrics.iter().filter(|m| m.window == window).collect();
            if in_window.is_empty() {
                return None;
            }
            let n = in_window.len() as f64;
            Some(PeriodAverage {
                window,
                mean_count: in_window.iter().map(|m| m.count as f64).sum::<f64>() / n,
                mean_total_amount: in_window.iter().map(|m| m.total_amount).sum::<f64>() / n,
            })
        })
        .collect()
}

/// Mean over windows of sample sd / mean of the order count. A window with fewer
/// than two metrics is left out; one with a zero mean contributes 0.
pub fn order_volatility(metrics: &[WindowMetric]) -> f64 {
    let per_window: Vec<f64> = WindowLabel::all()
        .into_iter()
        .filter_map(|window| {
            let counts: Vec<f64> = metrics
                .iter()
                .filter(|m| m.window == window)
                .map(|m| m.count as f64)
                .collect();
            if counts.len() < 2 {
                return None;
            }
            let m = mean(&counts)?;
            if m <= 0.0 {
                return Some(0.0);
            }
            Some(sample_std_dev(&counts)? / m)
        })
        .collect();
    mean(&per_window).unwrap_or(0.0)
}

// ---------------------------------------------------------------------------
// Temporal patterns
// ---------------------------------------------------------------------------

/// Cross-window patterns first, then outcome-impact patterns.
pub fn temporal_patterns(
    outcomes: &[OutcomeEvent],
    metrics: &[WindowMetric],
    cfg: &EngineConfig,
) -> Vec<TemporalPattern> {
    let pre = VolumeSeries::extract(outcomes, metrics, WindowLabel::Pre, VolumeField::Count);
    let during = VolumeSeries::extract(outcomes, metrics, WindowLabel::During, VolumeField::Count);
    let post = VolumeSeries::extract(outcomes, metrics, WindowLabel::Post, VolumeField::Count);

    let mut patterns = Vec::new();
    patterns.extend(pre_to_post_increase(&pre, &post));
    patterns.extend(during_to_post_reaction(&during, &post, cfg));
    patterns.extend(outcome_impact(outcomes, &post, cfg));

    info!(
        patterns = patterns.len(),
        "[STATS] {} temporal patterns",
        patterns.len(),
    );
    for p in &patterns {
        debug!(period = %p.period, kind = %p.kind, "[STATS] {}", p.description);
    }
    patterns
}

/// Events whose post count rose above the upper quartile of pre-to-post changes.
fn pre_to_post_increase(pre: &VolumeSeries, post: &VolumeSeries) -> Option<TemporalPattern> {
    let pairs = present_pairs(pre, post);
    let changes: Vec<f64> = pairs.iter().map(|&(_, x, y)| y - x).collect();
    let mut sorted = changes.clone();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let threshold = quantile(&sorted, INCREASE_QUANTILE)?;

    let (flagged, increases): (Vec<usize>, Vec<f64>) = pairs
        .iter()
        .zip(&changes)
        .filter(|&(_, &c)| c > threshold && c > 0.0)
        .map(|(&(i, _, _), &c)| (i, c))
        .unzip();
    let avg_increase = mean(&increases)?;
    let pre_values: Vec<f64> = pairs.iter().map(|&(_, x, _)| x).collect();
    let pre_mean = mean(&pre_values)?;
    let magnitude = if pre_mean > 0.0 {
        (avg_increase / pre_mean * 100.0).min(100.0)
    } else {
        0.0
    };

    Some(TemporalPattern {
        period: "pre_to_post".to_string(),
        kind: PatternKind::Spike,
        magnitude,
        confidence: pattern_confidence(flagged.len(), pairs.len()),
        description: format!(
            "Order increases from the pre window to the post window after {} of {} events",
            flagged.len(),
            pairs.len()
        ),
        sample_size: pairs.len(),
        real_share: real_share(&flagged, &[pre, post]),
    })
}

/// A strong, significant correlation between during and post counts.
fn during_to_post_reaction(
    during: &VolumeSeries,
    post: &VolumeSeries,
    cfg: &EngineConfig,
) -> Option<TemporalPattern> {
    let pairs = present_pairs(during, post);
    let xs: Vec<f64> = pairs.iter().map(|&(_, x, _)| x).collect();
    let ys: Vec<f64> = pairs.iter().map(|&(_, _, y)| y).collect();
    let r = pearson(&xs, &ys)?;
    let p = two_sided_p(r, pairs.len())?;
    if !(r.abs() > REACTION_MIN_R && p < cfg.significance_alpha) {
        return None;
    }

    let used: Vec<usize> = pairs.iter().map(|&(i, _, _)| i).collect();
    Some(TemporalPattern {
        period: "during_to_post".to_string(),
        kind: PatternKind::Trend,
        magnitude: r.abs() * 100.0,
        confidence: 1.0 - p,
        description: format!("Strong correlation between during-window and post-window orders (r={r:.3})"),
        sample_size: pairs.len(),
        real_share: real_share(&used, &[during, post]),
    })
}

/// Outcome groups whose mean post count clearly exceeds the comparison baseline.
fn outcome_impact(
    outcomes: &[OutcomeEvent],
    post: &VolumeSeries,
    cfg: &EngineConfig,
) -> Vec<TemporalPattern> {
    let present: Vec<usize> = (0..outcomes.len().min(post.values.len()))
        .filter(|&i| post.values[i].is_some())
        .collect();
    let mut patterns = Vec::new();
    let Some(overall) = mean(&values_at(post, &present)) else {
        return patterns;
    };

    let groups = [
        (OutcomeCategory::Win, "participant A wins"),
        (OutcomeCategory::Loss, "participant B wins"),
        (OutcomeCategory::Draw, "draws"),
    ];
    for (category, label) in groups {
        let idx: Vec<usize> = present
            .iter()
            .copied()
            .filter(|&i| outcomes[i].category == category)
            .collect();
        if idx.len() < MIN_PATTERN_GROUP || overall <= 0.0 {
            continue;
        }
        let Some(group_mean) = mean(&values_at(post, &idx)) else {
            continue;
        };
        if group_mean > overall * OUTCOME_LIFT {
            patterns.push(TemporalPattern {
                period: WindowLabel::Post.as_str().to_string(),
                kind: PatternKind::Spike,
                magnitude: ((group_mean - overall) / overall * 100.0).min(100.0),
                confidence: pattern_confidence(idx.len(), present.len()),
                description: format!(
                    "Higher post-window orders following {label} ({group_mean:.1} vs {overall:.1} average)"
                ),
                sample_size: idx.len(),
                real_share: real_share(&idx, &[post]),
            });
        }
    }

    let (high, regular): (Vec<usize>, Vec<usize>) = present
        .iter()
        .copied()
        .partition(|&i| outcomes[i].is_high_scoring(cfg.high_scoring_threshold));
    if high.len() >= MIN_PATTERN_GROUP && regular.len() >= MIN_PATTERN_GROUP {
        let means = (mean(&values_at(post, &high)), mean(&values_at(post, &regular)));
        if let (Some(high_mean), Some(regular_mean)) = means {
            if regular_mean > 0.0 && high_mean > regular_mean * HIGH_SCORING_LIFT {
                patterns.push(TemporalPattern {
                    period: WindowLabel::Post.as_str().to_string(),
                    kind: PatternKind::Spike,
                    magnitude: ((high_mean - regular_mean) / regular_mean * 100.0).min(100.0),
                    confidence: pattern_confidence(high.len(), present.len()),
                    description: format!(
                        "Higher post-window orders after high-scoring events ({high_mean:.1} vs {regular_mean:.1})"
                    ),
                    sample_size: high.len(),
                    real_share: real_share(&high, &[post]),
                });
            }
        }
    }

    patterns
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn values_at(series: &VolumeSeries, events: &[usize]) -> Vec<f64> {
    events.iter().filter_map(|&i| series.values[i]).collect()
}

/// `(event index, x, y)` where both series have a value.
fn present_pairs(x: &VolumeSeries, y: &VolumeSeries) -> Vec<(usize, f64, f64)> {
    x.values
        .iter()
        .zip(&y.values)
        .enumerate()
        .filter_map(|(i, (a, b))| Some((i, (*a)?, (*b)?)))
        .collect()
}

/// Proportion of instances, damped until there are enough of them.
fn pattern_confidence(instances: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let proportion = instances as f64 / total as f64;
    let sample_factor = (instances as f64 / CONFIDENCE_SATURATION).min(1.0);
    (proportion * sample_factor).min(1.0)
}

fn real_share(events: &[usize], series: &[&VolumeSeries]) -> f64 {
    let (mut real, mut total) = (0usize, 0usize);
    for s in series {
        for &i in events {
            real += s.real_counts.get(i).copied().unwrap_or(0);
            total += s.counts.get(i).copied().unwrap_or(0);
        }
    }
    if total == 0 {
        0.0
    } else {
        real as f64 / total as f64
    }
}

fn mean(v: &[f64]) -> Option<f64> {
    (!v.is_empty()).then(|| v.iter().sum::<f64>() / v.len() as f64)
}

fn sample_std_dev(v: &[f64]) -> Option<f64> {
    if v.len() < 2 {
        return None;
    }
    let m = mean(v)?;
    let var = v.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (v.len() - 1) as f64;
    Some(var.sqrt())
}

/// Linear-interpolated quantile of already sorted values.
fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    Some(sorted[lo] + (pos - lo as f64) * (sorted[hi] - sorted[lo]))
}
