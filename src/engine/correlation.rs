//! Correlation between one outcome variable and one volume variable.
//!
//! Binary outcome variables use point-biserial, continuous ones use Pearson. The
//! method is chosen from the variable's declared kind, never from the values of a
//! particular pair subset. "Not enough data" is a normal branch returning `None`.

use serde::Serialize;
use statrs::distribution::{ContinuousCDF, StudentsT};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{EngineConfig, MIN_CORRELATION_PAIRS};
use crate::engine::variables::{OutcomeKind, OutcomeSeries, VolumeSeries};
use crate::types::{CorrelationMethod, CorrelationResult, EffectSize, WindowLabel};

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct CorrelationStats {
    pub attempted: usize,
    pub produced: usize,
    /// Fewer than the minimum pairs, or no variance on one side.
    pub insufficient: usize,
    /// Non-finite intermediate values.
    pub degenerate: usize,
    /// Series whose lengths disagree.
    pub misaligned: usize,
}

impl CorrelationStats {
    fn tally(
        &mut self,
        outcome: &OutcomeSeries,
        volume: &VolumeSeries,
        evaluated: Result<CorrelationResult, Skip>,
    ) -> Option<CorrelationResult> {
        self.attempted += 1;
        match evaluated {
            Ok(result) => {
                self.produced += 1;
                Some(result)
            }
            Err(skip) => {
                match skip {
                    Skip::NonFinite => self.degenerate += 1,
                    Skip::LengthMismatch { .. } => self.misaligned += 1,
                    Skip::TooFewPairs(_) | Skip::ZeroVariance => self.insufficient += 1,
                }
                log_skip(outcome, volume, skip);
                None
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Skip {
    TooFewPairs(usize),
    ZeroVariance,
    NonFinite,
    LengthMismatch { outcome: usize, volume: usize },
}

impl std::fmt::Display for Skip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Skip::TooFewPairs(n) => write!(f, "{n} complete pairs"),
            Skip::ZeroVariance => write!(f, "zero variance"),
            Skip::NonFinite => write!(f, "non-finite statistic"),
            Skip::LengthMismatch { outcome, volume } => {
                write!(f, "series lengths differ ({outcome} outcome, {volume} volume)")
            }
        }
    }
}

/// Deterministic identifier for an (outcome variable, volume variable, window) triple.
pub fn result_id(outcome_variable: &str, volume_variable: &str, window: WindowLabel) -> String {
    let name = format!("{outcome_variable}|{volume_variable}|{window}");
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}

/// Correlate one pair of aligned series. `None` when the data cannot support a result.
pub fn correlate(
    outcome: &OutcomeSeries,
    volume: &VolumeSeries,
    cfg: &EngineConfig,
) -> Option<CorrelationResult> {
    match evaluate(outcome, volume, cfg) {
        Ok(result) => Some(result),
        Err(skip) => {
            log_skip(outcome, volume, skip);
            None
        }
    }
}

/// Every outcome variable against every volume variable.
pub fn correlate_all(
    outcomes: &[OutcomeSeries],
    volumes: &[VolumeSeries],
    cfg: &EngineConfig,
) -> (Vec<CorrelationResult>, CorrelationStats) {
    let mut stats = CorrelationStats::default();
    let mut results = Vec::new();

    for outcome in outcomes {
        for volume in volumes {
            let evaluated = evaluate(outcome, volume, cfg);
            results.extend(stats.tally(outcome, volume, evaluated));
        }
    }

    log_stats("variable", &stats);
    (results, stats)
}

/// Explicit (predictor, response) pairs, e.g. pre-window against post-window counts.
pub fn correlate_pairs(
    pairs: &[(OutcomeSeries, VolumeSeries)],
    cfg: &EngineConfig,
) -> (Vec<CorrelationResult>, CorrelationStats) {
    let mut stats = CorrelationStats::default();
    let mut results = Vec::new();

    for (outcome, volume) in pairs {
        let evaluated = evaluate(outcome, volume, cfg);
        results.extend(stats.tally(outcome, volume, evaluated));
    }

    log_stats("period", &stats);
    (results, stats)
}

fn log_stats(kind: &str, stats: &CorrelationStats) {
    info!(
        kind,
        attempted = stats.attempted,
        produced = stats.produced,
        insufficient = stats.insufficient,
        degenerate = stats.degenerate,
        misaligned = stats.misaligned,
        "[CORR] {} of {} {} pairs produced a result ({} insufficient, {} degenerate, {} misaligned)",
        stats.produced,
        stats.attempted,
        kind,
        stats.insufficient,
        stats.degenerate,
        stats.misaligned,
    );
}

fn log_skip(outcome: &OutcomeSeries, volume: &VolumeSeries, skip: Skip) {
    match skip {
        Skip::NonFinite | Skip::LengthMismatch { .. } => warn!(
            outcome_variable = %outcome.name,
            volume_variable = %volume.name,
            "[CORR] computation anomaly for {} vs {}: {}",
            outcome.name,
            volume.name,
            skip,
        ),
        _ => debug!(
            outcome_variable = %outcome.name,
            volume_variable = %volume.name,
            "[CORR] insufficient data for {} vs {}: {}",
            outcome.name,
            volume.name,
            skip,
        ),
    }
}

fn evaluate(
    outcome: &OutcomeSeries,
    volume: &VolumeSeries,
    cfg: &EngineConfig,
) -> Result<CorrelationResult, Skip> {
    let n_outcome = outcome.values.len();
    if outcome.real.len() != n_outcome
        || volume.values.len() != n_outcome
        || volume.counts.len() != n_outcome
        || volume.real_counts.len() != n_outcome
    {
        return Err(Skip::LengthMismatch {
            outcome: n_outcome,
            volume: volume.values.len(),
        });
    }

    // Complete pairs only; remember which outcome events contributed.
    let used: Vec<(usize, f64, f64)> = outcome
        .values
        .iter()
        .zip(&volume.values)
        .enumerate()
        .filter_map(|(i, (x, y))| match (x, y) {
            (Some(x), Some(y)) => Some((i, *x, *y)),
            _ => None,
        })
        .collect();

    let n = used.len();
    if n < MIN_CORRELATION_PAIRS {
        return Err(Skip::TooFewPairs(n));
    }

    let xs: Vec<f64> = used.iter().map(|&(_, x, _)| x).collect();
    let ys: Vec<f64> = used.iter().map(|&(_, _, y)| y).collect();
    if xs.iter().chain(&ys).any(|v| !v.is_finite()) {
        return Err(Skip::NonFinite);
    }
    if sum_sq_dev(&xs) == 0.0 || sum_sq_dev(&ys) == 0.0 {
        return Err(Skip::ZeroVariance);
    }

    let (method, raw) = match outcome.kind {
        OutcomeKind::Binary => (CorrelationMethod::PointBiserial, point_biserial(&xs, &ys)),
        OutcomeKind::Continuous => (CorrelationMethod::Pearson, pearson(&xs, &ys)),
    };
    let raw = raw.ok_or(Skip::ZeroVariance)?;
    if !raw.is_finite() {
        return Err(Skip::NonFinite);
    }
    let coefficient = raw.clamp(-1.0, 1.0);
    let p_value = two_sided_p(coefficient, n).ok_or(Skip::NonFinite)?;

    let real = used
        .iter()
        .map(|&(i, _, _)| volume.real_counts[i] + usize::from(outcome.real[i]))
        .sum::<usize>();
    let total = used.iter().map(|&(i, _, _)| volume.counts[i] + 1).sum::<usize>();
    let data_quality = real as f64 / total as f64;

    let description = describe(
        &outcome.name,
        &volume.name,
        volume.window,
        coefficient,
        p_value,
        cfg.effect_size_thresholds,
    );

    Ok(CorrelationResult {
        id: result_id(&outcome.name, &volume.name, volume.window),
        outcome_variable: outcome.name.clone(),
        volume_variable: volume.name.clone(),
        coefficient,
        p_value,
        window: volume.window,
        sample_size: n,
        method,
        description,
        data_quality,
    })
}

fn mean(v: &[f64]) -> f64 {
    v.iter().sum::<f64>() / v.len() as f64
}

fn sum_sq_dev(v: &[f64]) -> f64 {
    let m = mean(v);
    v.iter().map(|x| (x - m).powi(2)).sum()
}

pub(crate) fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    let (mx, my) = (mean(xs), mean(ys));
    let cov: f64 = xs.iter().zip(ys).map(|(x, y)| (x - mx) * (y - my)).sum();
    let denom = (sum_sq_dev(xs) * sum_sq_dev(ys)).sqrt();
    if denom == 0.0 {
        return None;
    }
    Some(cov / denom)
}

/// `(M1 - M0) / s_n * sqrt(p * q)`, with the larger outcome value as group 1 and
/// `s_n` the population standard deviation of the volume values.
pub(crate) fn point_biserial(xs: &[f64], ys: &[f64]) -> Option<f64> {
    let hi = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let (mut sum1, mut n1, mut sum0, mut n0) = (0.0, 0usize, 0.0, 0usize);
    for (x, y) in xs.iter().zip(ys) {
        if *x == hi {
            sum1 += y;
            n1 += 1;
        } else {
            sum0 += y;
            n0 += 1;
        }
    }
    if n1 == 0 || n0 == 0 {
        return None;
    }

    let n = ys.len() as f64;
    let s_n = (sum_sq_dev(ys) / n).sqrt();
    if s_n == 0.0 {
        return None;
    }
    let (p, q) = (n1 as f64 / n, n0 as f64 / n);
    Some((sum1 / n1 as f64 - sum0 / n0 as f64) / s_n * (p * q).sqrt())
}

/// Two-sided p-value of `r` under H0: rho = 0, Student-t with n - 2 degrees of freedom.
pub(crate) fn two_sided_p(r: f64, n: usize) -> Option<f64> {
    if n < MIN_CORRELATION_PAIRS {
        return None;
    }
    if r.abs() >= 1.0 {
        return Some(0.0);
    }
    let df = (n - 2) as f64;
    let t = r * (df / (1.0 - r * r)).sqrt();
    let dist = StudentsT::new(0.0, 1.0, df).ok()?;
    let p = 2.0 * dist.sf(t.abs());
    p.is_finite().then(|| p.clamp(0.0, 1.0))
}

fn describe(
    outcome_variable: &str,
    volume_variable: &str,
    window: WindowLabel,
    coefficient: f64,
    p_value: f64,
    thresholds: (f64, f64),
) -> String {
    let strength = match EffectSize::classify(coefficient, thresholds) {
        EffectSize::Weak => "Weak",
        EffectSize::Moderate => "Moderate",
        EffectSize::Strong => "Strong",
    };
    let sign = if coefficient >= 0.0 { "positive" } else { "negative" };
    format!(
        "{strength} {sign} correlation between {outcome_variable} and {volume_variable} during {window} window (r={coefficient:.3}, p={p_value:.4})"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::variables::VolumeField;

    fn outcome_series(values: &[f64]) -> OutcomeSeries {
        OutcomeSeries::new(
            "participant_a_win",
            "participant A wins",
            values.iter().map(|v| Some(*v)).collect(),
            vec![true; values.len()],
        )
    }

    fn volume_series(values: Vec<Option<f64>>, counts: Vec<usize>, real: Vec<usize>) -> VolumeSeries {
        VolumeSeries {
            name: "post_total_amount".to_string(),
            window: WindowLabel::Post,
            field: VolumeField::TotalAmount,
            values,
            counts,
            real_counts: real,
        }
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn pearson_perfect_line() {
        let r = pearson(&[1.0, 2.0, 3.0, 4.0], &[2.0, 4.0, 6.0, 8.0]).unwrap();
        assert!(approx(r, 1.0));
        let r = pearson(&[1.0, 2.0, 3.0, 4.0], &[8.0, 6.0, 4.0, 2.0]).unwrap();
        assert!(approx(r, -1.0));
    }

    #[test]
    fn point_biserial_agrees_with_pearson_on_binary_data() {
        let xs = [1.0, 0.0, 1.0, 0.0, 1.0];
        let ys = [12.0, 3.0, 9.0, 5.0, 11.0];
        let pb = point_biserial(&xs, &ys).unwrap();
        let pr = pearson(&xs, &ys).unwrap();
        assert!(approx(pb, pr));
        assert!(pb > 0.0);
    }

    #[test]
    fn p_value_edges() {
        assert_eq!(two_sided_p(1.0, 5), Some(0.0));
        assert!(approx(two_sided_p(0.0, 10).unwrap(), 1.0));
        assert_eq!(two_sided_p(0.5, 2), None);
        let p = two_sided_p(0.9, 10).unwrap();
        assert!(p > 0.0 && p < 0.01);
    }

    #[test]
    fn binary_outcome_uses_point_biserial() {
        let o = outcome_series(&[1.0, 0.0, 1.0, 0.0]);
        let v = volume_series(
            vec![Some(100.0), Some(20.0), Some(90.0), Some(30.0)],
            vec![10, 2, 9, 3],
            vec![10, 2, 9, 3],
        );
        let r = correlate(&o, &v, &EngineConfig::default()).unwrap();
        assert_eq!(r.method, CorrelationMethod::PointBiserial);
        assert_eq!(r.sample_size, 4);
        assert!(r.coefficient > 0.9);
        assert!((0.0..=1.0).contains(&r.p_value));
        assert!(approx(r.data_quality, 1.0));
        assert!(r.description.starts_with("Strong positive correlation between participant_a_win and post_total_amount during post window"));
    }

    #[test]
    fn continuous_outcome_uses_pearson() {
        let o = OutcomeSeries::new(
            "total_score",
            "higher total scores",
            vec![Some(1.0), Some(2.0), Some(3.0), Some(4.0), Some(5.0)],
            vec![true; 5],
        );
        assert_eq!(o.kind, OutcomeKind::Continuous);
        let v = volume_series(
            vec![Some(2.0), Some(4.0), Some(5.0), Some(4.0), Some(5.0)],
            vec![2, 4, 5, 4, 5],
            vec![2, 4, 5, 4, 5],
        );
        let r = correlate(&o, &v, &EngineConfig::default()).unwrap();
        assert_eq!(r.method, CorrelationMethod::Pearson);
        assert_eq!(r.sample_size, 5);
        // cov 6, sum sq dev 10 and 6
        assert!(approx(r.coefficient, 6.0 / 60f64.sqrt()));
        // t = r * sqrt(3 / (1 - r^2)) = 2.1213, two-sided with 3 df
        assert!((r.p_value - 0.1240).abs() < 1e-3);
    }

    #[test]
    fn mismatched_series_lengths_are_skipped() {
        let o = outcome_series(&[1.0, 0.0, 1.0, 0.0]);
        let v = volume_series(vec![Some(5.0), Some(1.0), Some(4.0)], vec![1; 3], vec![1; 3]);
        assert!(correlate(&o, &v, &EngineConfig::default()).is_none());

        // values agree but the provenance counts are short
        let v = volume_series(
            vec![Some(5.0), Some(1.0), Some(4.0), Some(0.0)],
            vec![1; 4],
            vec![1; 2],
        );
        let (results, stats) = correlate_all(&[o], &[v], &EngineConfig::default());
        assert!(results.is_empty());
        assert_eq!(stats.misaligned, 1);
        assert_eq!(stats.insufficient, 0);
    }

    #[test]
    fn period_pairs_use_pearson_on_counts() {
        let pre = OutcomeSeries {
            name: "pre_count".to_string(),
            label: "higher pre-window order counts".to_string(),
            kind: OutcomeKind::Continuous,
            values: vec![Some(1.0), Some(0.0), Some(1.0), Some(0.0)],
            real: vec![true; 4],
        };
        let post = VolumeSeries {
            name: "post_count".to_string(),
            window: WindowLabel::Post,
            field: VolumeField::Count,
            values: vec![Some(4.0), Some(1.0), Some(5.0), Some(2.0)],
            counts: vec![4, 1, 5, 2],
            real_counts: vec![4, 1, 5, 2],
        };
        let (results, stats) = correlate_pairs(&[(pre, post)], &EngineConfig::default());
        assert_eq!(stats.produced, 1);
        let r = &results[0];
        // two distinct predictor values, still Pearson
        assert_eq!(r.method, CorrelationMethod::Pearson);
        assert_eq!(r.outcome_variable, "pre_count");
        assert_eq!(r.volume_variable, "post_count");
        assert_eq!(r.window, WindowLabel::Post);
        assert!(r.coefficient > 0.9);
    }

    #[test]
    fn missing_pairs_are_dropped_before_counting() {
        let o = outcome_series(&[1.0, 0.0, 1.0, 0.0]);
        let v = volume_series(
            vec![Some(100.0), None, Some(90.0), None],
            vec![1, 0, 1, 0],
            vec![0, 0, 0, 0],
        );
        assert!(correlate(&o, &v, &EngineConfig::default()).is_none());
    }

    #[test]
    fn constant_side_yields_no_result() {
        let o = outcome_series(&[1.0, 1.0, 1.0]);
        let v = volume_series(vec![Some(1.0), Some(2.0), Some(3.0)], vec![1; 3], vec![1; 3]);
        assert!(correlate(&o, &v, &EngineConfig::default()).is_none());

        let o = outcome_series(&[1.0, 0.0, 1.0]);
        let v = volume_series(vec![Some(5.0), Some(5.0), Some(5.0)], vec![1; 3], vec![1; 3]);
        assert!(correlate(&o, &v, &EngineConfig::default()).is_none());
    }

    #[test]
    fn non_finite_values_are_counted_as_degenerate() {
        let o = outcome_series(&[1.0, 0.0, 1.0]);
        let v = volume_series(vec![Some(f64::NAN), Some(2.0), Some(3.0)], vec![1; 3], vec![1; 3]);
        let (results, stats) = correlate_all(&[o], &[v], &EngineConfig::default());
        assert!(results.is_empty());
        assert_eq!(stats.degenerate, 1);
        assert_eq!(stats.insufficient, 0);
    }

    #[test]
    fn data_quality_counts_commerce_and_outcome_provenance() {
        let mut o = outcome_series(&[1.0, 0.0, 1.0]);
        o.real = vec![true, false, false];
        let v = volume_series(vec![Some(3.0), Some(1.0), Some(2.0)], vec![3, 1, 2], vec![3, 0, 0]);
        let r = correlate(&o, &v, &EngineConfig::default()).unwrap();
        // (3 + 1) real of (6 + 3) records
        assert!(approx(r.data_quality, 4.0 / 9.0));
    }

    #[test]
    fn ids_are_stable_per_triple() {
        let a = result_id("draw", "pre_count", WindowLabel::Pre);
        assert_eq!(a, result_id("draw", "pre_count", WindowLabel::Pre));
        assert_ne!(a, result_id("draw", "pre_count", WindowLabel::Post));
    }
}
