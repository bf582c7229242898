//! Temporal alignment of commerce events against outcome-event windows.
//!
//! Every outcome event at `t` gets three half-open windows, with `d` the during half-width:
//!
//! ```text
//!   pre:    [t - d - pre, t - d)
//!   during: [t - d,       t + d)
//!   post:   [t + d,       t + d + post)
//! ```
//!
//! The three windows of one event never overlap. Windows of different events may,
//! and a commerce event inside both is counted toward each.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::types::{CommerceEvent, OutcomeEvent, WindowLabel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowBounds {
    pub label: WindowLabel,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl WindowBounds {
    #[inline]
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts < self.end
    }
}

/// The commerce events that fall inside one window of one outcome event.
#[derive(Debug, Clone)]
pub struct Partition<'a> {
    pub outcome_id: String,
    pub anchor: DateTime<Utc>,
    pub bounds: WindowBounds,
    pub members: Vec<&'a CommerceEvent>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct AlignStats {
    pub partitions: usize,
    /// Total (commerce event, window) memberships.
    pub assignments: usize,
    /// Commerce events outside every window.
    pub unassigned_commerce: usize,
    /// Commerce events counted toward more than one outcome event.
    pub shared_commerce: usize,
    /// Outcome events skipped because their windows overflow the date range.
    pub unwindowed: usize,
}

/// Pre, during and post bounds anchored at `anchor`, in that order.
///
/// `None` when any bound falls outside the representable date range.
pub fn window_bounds(anchor: DateTime<Utc>, cfg: &EngineConfig) -> Option<[WindowBounds; 3]> {
    let half = cfg.during_window();
    let during_start = anchor.checked_sub_signed(half)?;
    let during_end = anchor.checked_add_signed(half)?;
    Some([
        WindowBounds {
            label: WindowLabel::Pre,
            start: during_start.checked_sub_signed(cfg.pre_window())?,
            end: during_start,
        },
        WindowBounds {
            label: WindowLabel::During,
            start: during_start,
            end: during_end,
        },
        WindowBounds {
            label: WindowLabel::Post,
            start: during_end,
            end: during_end.checked_add_signed(cfg.post_window())?,
        },
    ])
}

/// Partition commerce events into each outcome event's windows.
///
/// Output holds three partitions per outcome event, in outcome order then
/// pre/during/post. Empty windows produce empty partitions. An event whose windows
/// cannot be represented gets none and is counted in `AlignStats::unwindowed`.
pub fn align<'a>(
    commerce: &'a [CommerceEvent],
    outcomes: &[OutcomeEvent],
    cfg: &EngineConfig,
) -> (Vec<Partition<'a>>, AlignStats) {
    // Stable sort keeps input order among equal timestamps.
    let mut sorted: Vec<&'a CommerceEvent> = commerce.iter().collect();
    sorted.sort_by_key(|e| e.timestamp);

    let mut partitions = Vec::with_capacity(outcomes.len() * 3);
    // commerce id -> distinct outcome events it was counted toward
    let mut touched: HashMap<&'a str, Vec<&str>> = HashMap::new();
    let mut stats = AlignStats::default();

    for outcome in outcomes {
        let Some(windows) = window_bounds(outcome.timestamp, cfg) else {
            stats.unwindowed += 1;
            warn!(
                outcome_id = %outcome.id,
                timestamp = %outcome.timestamp,
                "[ALIGN] windows around {} overflow the date range; event skipped",
                outcome.id,
            );
            continue;
        };
        for bounds in windows {
            let lo = sorted.partition_point(|e| e.timestamp < bounds.start);
            let hi = sorted.partition_point(|e| e.timestamp < bounds.end);
            let members: Vec<&'a CommerceEvent> = sorted[lo..hi.max(lo)].to_vec();

            for member in &members {
                let seen = touched.entry(member.id.as_str()).or_default();
                if seen.last() != Some(&outcome.id.as_str()) {
                    seen.push(outcome.id.as_str());
                }
            }
            stats.assignments += members.len();

            debug!(
                outcome_id = %outcome.id,
                window = %bounds.label,
                members = members.len(),
                "[ALIGN] {} window [{} .. {}) holds {} commerce events",
                bounds.label,
                bounds.start,
                bounds.end,
                members.len(),
            );

            partitions.push(Partition {
                outcome_id: outcome.id.clone(),
                anchor: outcome.timestamp,
                bounds,
                members,
            });
        }
    }

    stats.partitions = partitions.len();
    stats.unassigned_commerce = commerce
        .iter()
        .filter(|e| !touched.contains_key(e.id.as_str()))
        .count();
    stats.shared_commerce = touched.values().filter(|ids| ids.len() > 1).count();

    info!(
        partitions = stats.partitions,
        assignments = stats.assignments,
        unassigned = stats.unassigned_commerce,
        shared = stats.shared_commerce,
        "[ALIGN] {} windows over {} outcome events | {} assignments | {} commerce events outside all windows | {} shared across events",
        stats.partitions,
        outcomes.len(),
        stats.assignments,
        stats.unassigned_commerce,
        stats.shared_commerce,
    );

    (partitions, stats)
}
