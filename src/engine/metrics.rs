use tracing::info;

use crate::engine::aligner::Partition;
use crate::types::WindowMetric;

/// Pure aggregation of one partition. No filtering happens here.
pub fn window_metric(partition: &Partition<'_>) -> WindowMetric {
    let count = partition.members.len();
    let total_amount: f64 = partition.members.iter().map(|e| e.amount).sum();
    let total_quantity: u64 = partition.members.iter().map(|e| u64::from(e.quantity)).sum();
    let real_count = partition.members.iter().filter(|e| e.source.is_real()).count();

    let (mean_amount, provenance_mix) = if count == 0 {
        (0.0, 0.0)
    } else {
        (total_amount / count as f64, real_count as f64 / count as f64)
    };

    WindowMetric {
        outcome_id: partition.outcome_id.clone(),
        window: partition.bounds.label,
        count,
        total_amount,
        mean_amount,
        total_quantity,
        provenance_mix,
        real_count,
        window_start: partition.bounds.start,
        window_end: partition.bounds.end,
    }
}

/// One metric per partition, in partition order.
pub fn calculate(partitions: &[Partition<'_>]) -> Vec<WindowMetric> {
    let metrics: Vec<WindowMetric> = partitions.iter().map(window_metric).collect();
    let empty = metrics.iter().filter(|m| m.count == 0).count();
    info!(
        metrics = metrics.len(),
        empty_windows = empty,
        "[METRICS] computed {} window metrics ({} empty)",
        metrics.len(),
        empty,
    );
    metrics
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::aligner::WindowBounds;
    use crate::types::{CommerceEvent, Provenance, WindowLabel};
    use chrono::{Duration, TimeZone, Utc};

    fn commerce(amount: f64, quantity: u32, source: Provenance) -> CommerceEvent {
        CommerceEvent {
            id: format!("c-{amount}-{quantity}"),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 20, 0, 0).unwrap(),
            amount,
            quantity,
            categories: vec!["veggie".to_string()],
            source,
        }
    }

    fn partition(members: Vec<&CommerceEvent>) -> Partition<'_> {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 19, 0, 0).unwrap();
        Partition {
            outcome_id: "m1".to_string(),
            anchor: start,
            bounds: WindowBounds {
                label: WindowLabel::Post,
                start,
                end: start + Duration::hours(2),
            },
            members,
        }
    }

    #[test]
    fn aggregates_counts_amounts_and_mix() {
        let a = commerce(10.0, 1, Provenance::Real);
        let b = commerce(20.0, 3, Provenance::Mock);
        let c = commerce(30.0, 2, Provenance::Real);
        let m = window_metric(&partition(vec![&a, &b, &c]));
        assert_eq!(m.count, 3);
        assert!((m.total_amount - 60.0).abs() < 1e-9);
        assert!((m.mean_amount - 20.0).abs() < 1e-9);
        assert_eq!(m.total_quantity, 6);
        assert_eq!(m.real_count, 2);
        assert!((m.provenance_mix - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(m.window, WindowLabel::Post);
    }

    #[test]
    fn empty_partition_is_all_zero() {
        let m = window_metric(&partition(vec![]));
        assert_eq!(m.count, 0);
        assert_eq!(m.total_amount, 0.0);
        assert_eq!(m.mean_amount, 0.0);
        assert_eq!(m.provenance_mix, 0.0);
        assert_eq!(m.total_quantity, 0);
    }

    #[test]
    fn serialized_shape_matches_output_contract() {
        let a = commerce(10.0, 1, Provenance::Mock);
        let m = window_metric(&partition(vec![&a]));
        let v = serde_json::to_value(&m).unwrap();
        let mut keys: Vec<_> = v.as_object().unwrap().keys().cloned().collect();
        keys.sort();
        assert_eq!(
            keys,
            vec![
                "count",
                "mean_amount",
                "outcome_id",
                "provenance_mix",
                "total_amount",
                "total_quantity",
                "window"
            ]
        );
    }
}
