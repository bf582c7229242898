use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::engine::aligner::window_bounds;
use crate::types::{CommerceEvent, OutcomeCategory, OutcomeEvent, Provenance, SignificanceTier};

/// Rejections beyond this many per stream are logged at debug level only.
const REJECTION_WARN_LIMIT: usize = 10;

/// Per-reason rejection counters for one input stream.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct RejectionCounts {
    pub not_an_object: usize,
    pub missing_field: usize,
    pub malformed_field: usize,
    pub out_of_range: usize,
    pub bad_timestamp: usize,
    pub future_timestamp: usize,
    pub inconsistent: usize,
    /// Id already taken by an earlier accepted record of the same stream.
    pub duplicate: usize,
}

impl RejectionCounts {
    pub fn total(&self) -> usize {
        self.not_an_object
            + self.missing_field
            + self.malformed_field
            + self.out_of_range
            + self.bad_timestamp
            + self.future_timestamp
            + self.inconsistent
            + self.duplicate
    }

    fn record(&mut self, rejection: &Rejection) {
        match rejection {
            Rejection::NotAnObject => self.not_an_object += 1,
            Rejection::MissingField(_) => self.missing_field += 1,
            Rejection::MalformedField(_) => self.malformed_field += 1,
            Rejection::OutOfRange(_) => self.out_of_range += 1,
            Rejection::BadTimestamp => self.bad_timestamp += 1,
            Rejection::FutureTimestamp => self.future_timestamp += 1,
            Rejection::Inconsistent(_) => self.inconsistent += 1,
            Rejection::Duplicate => self.duplicate += 1,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizeStats {
    pub commerce_total: usize,
    pub commerce_accepted: usize,
    pub commerce_rejected: RejectionCounts,
    pub outcome_total: usize,
    pub outcome_accepted: usize,
    pub outcome_rejected: RejectionCounts,
}

/// Canonical records that passed validation, ordered by (timestamp, id).
#[derive(Debug, Clone)]
pub struct NormalizedBatch {
    pub commerce: Vec<CommerceEvent>,
    pub outcomes: Vec<OutcomeEvent>,
    pub stats: NormalizeStats,
}

#[derive(Debug, Clone, PartialEq)]
enum Rejection {
    NotAnObject,
    MissingField(&'static str),
    MalformedField(&'static str),
    OutOfRange(&'static str),
    BadTimestamp,
    FutureTimestamp,
    Inconsistent(&'static str),
    Duplicate,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::NotAnObject => write!(f, "record is not an object"),
            Rejection::MissingField(name) => write!(f, "missing required field '{name}'"),
            Rejection::MalformedField(name) => write!(f, "field '{name}' has the wrong shape"),
            Rejection::OutOfRange(name) => write!(f, "field '{name}' is out of range"),
            Rejection::BadTimestamp => write!(f, "timestamp could not be parsed"),
            Rejection::FutureTimestamp => write!(f, "timestamp is later than the run reference time"),
            Rejection::Inconsistent(what) => write!(f, "inconsistent record: {what}"),
            Rejection::Duplicate => write!(f, "id repeats an earlier record"),
        }
    }
}

/// Canonicalize raw commerce and outcome records. Invalid records are dropped and
/// counted; the batch always completes, possibly with zero records on either side.
///
/// Ids are unique per stream: the first valid record in input order keeps its id
/// and later ones are rejected as duplicates. Outcome events whose windows under
/// `cfg` would leave the representable date range are rejected as out of range.
pub fn normalize(
    raw_commerce: &[Value],
    raw_outcomes: &[Value],
    as_of: DateTime<Utc>,
    cfg: &EngineConfig,
) -> NormalizedBatch {
    let mut stats = NormalizeStats {
        commerce_total: raw_commerce.len(),
        outcome_total: raw_outcomes.len(),
        ..NormalizeStats::default()
    };

    let mut commerce = Vec::with_capacity(raw_commerce.len());
    let mut seen: HashSet<String> = HashSet::new();
    for (idx, raw) in raw_commerce.iter().enumerate() {
        let parsed = parse_commerce_checked(raw, as_of).and_then(|event| {
            if seen.insert(event.id.clone()) {
                Ok(event)
            } else {
                Err(Rejection::Duplicate)
            }
        });
        match parsed {
            Ok(event) => commerce.push(event),
            Err(rejection) => {
                stats.commerce_rejected.record(&rejection);
                log_rejection("commerce", idx, raw, &rejection, stats.commerce_rejected.total());
            }
        }
    }

    let mut outcomes = Vec::with_capacity(raw_outcomes.len());
    seen.clear();
    for (idx, raw) in raw_outcomes.iter().enumerate() {
        let parsed = parse_outcome_checked(raw, as_of, cfg).and_then(|event| {
            if seen.insert(event.id.clone()) {
                Ok(event)
            } else {
                Err(Rejection::Duplicate)
            }
        });
        match parsed {
            Ok(event) => outcomes.push(event),
            Err(rejection) => {
                stats.outcome_rejected.record(&rejection);
                log_rejection("outcome", idx, raw, &rejection, stats.outcome_rejected.total());
            }
        }
    }

    commerce.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
    outcomes.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));

    stats.commerce_accepted = commerce.len();
    stats.outcome_accepted = outcomes.len();

    info!(
        commerce_accepted = stats.commerce_accepted,
        commerce_rejected = stats.commerce_rejected.total(),
        outcome_accepted = stats.outcome_accepted,
        outcome_rejected = stats.outcome_rejected.total(),
        "[NORMALIZE] commerce {}/{} accepted | outcomes {}/{} accepted",
        stats.commerce_accepted,
        stats.commerce_total,
        stats.outcome_accepted,
        stats.outcome_total,
    );

    NormalizedBatch { commerce, outcomes, stats }
}

fn log_rejection(stream: &str, idx: usize, raw: &Value, rejection: &Rejection, seen: usize) {
    let id = raw
        .get("id")
        .map(|v| v.to_string())
        .unwrap_or_else(|| "?".to_string());
    if seen <= REJECTION_WARN_LIMIT {
        warn!(stream, index = idx, id = %id, reason = %rejection, "[NORMALIZE] dropped {stream} record #{idx}: {rejection}");
    } else {
        debug!(stream, index = idx, id = %id, reason = %rejection, "[NORMALIZE] dropped {stream} record #{idx}: {rejection}");
    }
}

fn parse_commerce_checked(
    v: &Value,
    as_of: DateTime<Utc>,
) -> std::result::Result<CommerceEvent, Rejection> {
    if !v.is_object() {
        return Err(Rejection::NotAnObject);
    }

    let id = required_id(v, &["id", "order_id"])?;
    let timestamp = required_timestamp(v, as_of)?;

    let amount_raw = field(v, &["amount", "order_total"]).ok_or(Rejection::MissingField("amount"))?;
    let amount = as_number(amount_raw).ok_or(Rejection::MalformedField("amount"))?;
    if !amount.is_finite() || amount < 0.0 {
        return Err(Rejection::OutOfRange("amount"));
    }

    let quantity_raw = field(v, &["quantity"]).ok_or(Rejection::MissingField("quantity"))?;
    let quantity = as_integer(quantity_raw).ok_or(Rejection::MalformedField("quantity"))?;
    if quantity < 1 || quantity > i64::from(u32::MAX) {
        return Err(Rejection::OutOfRange("quantity"));
    }

    let categories_raw =
        field(v, &["categories", "pizza_types"]).ok_or(Rejection::MissingField("categories"))?;
    let categories = parse_categories(categories_raw)?;

    let source = required_source(v)?;

    Ok(CommerceEvent {
        id,
        timestamp,
        amount,
        quantity: quantity as u32,
        categories,
        source,
    })
}

fn parse_outcome_checked(
    v: &Value,
    as_of: DateTime<Utc>,
    cfg: &EngineConfig,
) -> std::result::Result<OutcomeEvent, Rejection> {
    if !v.is_object() {
        return Err(Rejection::NotAnObject);
    }

    let id = required_id(v, &["id", "match_id"])?;
    let timestamp = required_timestamp(v, as_of)?;
    if window_bounds(timestamp, cfg).is_none() {
        return Err(Rejection::OutOfRange("timestamp"));
    }

    let participant_a = required_text(v, &["participant_a", "home_team"], "participant_a")?;
    let participant_b = required_text(v, &["participant_b", "away_team"], "participant_b")?;
    if participant_a == participant_b {
        return Err(Rejection::Inconsistent("participants must differ"));
    }

    let score_a = required_score(v, &["score_a", "home_score"], "score_a")?;
    let score_b = required_score(v, &["score_b", "away_score"], "score_b")?;

    let significance_raw = field(v, &["significance", "match_significance"])
        .ok_or(Rejection::MissingField("significance"))?;
    let significance = significance_raw
        .as_str()
        .and_then(SignificanceTier::parse)
        .ok_or(Rejection::MalformedField("significance"))?;

    let source = required_source(v)?;

    let event = OutcomeEvent::new(
        id,
        timestamp,
        participant_a,
        participant_b,
        score_a,
        score_b,
        significance,
        source,
    );

    // A supplied outcome label must agree with the scores; the scores win otherwise.
    if let Some(label) = field(v, &["outcome", "event_type"]).and_then(|o| o.as_str()) {
        let claimed = match label.trim().to_lowercase().as_str() {
            "win" => Some(OutcomeCategory::Win),
            "loss" => Some(OutcomeCategory::Loss),
            "draw" => Some(OutcomeCategory::Draw),
            _ => None,
        };
        if claimed.is_some_and(|c| c != event.category) {
            return Err(Rejection::Inconsistent("outcome label disagrees with scores"));
        }
    }

    Ok(event)
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

/// First present, non-null value among `names`.
fn field<'a>(v: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .filter_map(|name| v.get(*name))
        .find(|value| !value.is_null())
}

fn required_id(v: &Value, names: &[&str]) -> std::result::Result<String, Rejection> {
    let raw = field(v, names).ok_or(Rejection::MissingField("id"))?;
    let id = match raw {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return Err(Rejection::MalformedField("id")),
    };
    if id.is_empty() {
        return Err(Rejection::MissingField("id"));
    }
    Ok(id)
}

/// Trimmed, lower-cased text used for grouping.
fn required_text(
    v: &Value,
    names: &[&str],
    label: &'static str,
) -> std::result::Result<String, Rejection> {
    let raw = field(v, names).ok_or(Rejection::MissingField(label))?;
    let text = raw.as_str().ok_or(Rejection::MalformedField(label))?;
    let text = text.trim().to_lowercase();
    if text.is_empty() {
        return Err(Rejection::MissingField(label));
    }
    Ok(text)
}

fn required_score(
    v: &Value,
    names: &[&str],
    label: &'static str,
) -> std::result::Result<u32, Rejection> {
    let raw = field(v, names).ok_or(Rejection::MissingField(label))?;
    let score = as_integer(raw).ok_or(Rejection::MalformedField(label))?;
    if score < 0 || score > i64::from(u32::MAX) {
        return Err(Rejection::OutOfRange(label));
    }
    Ok(score as u32)
}

fn required_source(v: &Value) -> std::result::Result<Provenance, Rejection> {
    let raw = field(v, &["source", "data_source"]).ok_or(Rejection::MissingField("source"))?;
    raw.as_str()
        .and_then(Provenance::parse)
        .ok_or(Rejection::MalformedField("source"))
}

fn required_timestamp(
    v: &Value,
    as_of: DateTime<Utc>,
) -> std::result::Result<DateTime<Utc>, Rejection> {
    let raw = field(v, &["timestamp"]).ok_or(Rejection::MissingField("timestamp"))?;
    let ts = parse_timestamp(raw).ok_or(Rejection::BadTimestamp)?;
    if ts > as_of {
        return Err(Rejection::FutureTimestamp);
    }
    Ok(ts)
}

fn parse_categories(raw: &Value) -> std::result::Result<Vec<String>, Rejection> {
    let mut categories: Vec<String> = match raw {
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                let s = item.as_str().ok_or(Rejection::MalformedField("categories"))?;
                out.push(s.trim().to_lowercase());
            }
            out
        }
        // Flattened CSV exports join categories with ';'.
        Value::String(s) => s.split(';').map(|c| c.trim().to_lowercase()).collect(),
        _ => return Err(Rejection::MalformedField("categories")),
    };
    categories.retain(|c| !c.is_empty());
    if categories.is_empty() {
        return Err(Rejection::MissingField("categories"));
    }
    categories.sort();
    categories.dedup();
    Ok(categories)
}

fn as_number(v: &Value) -> Option<f64> {
    v.as_f64()
        .or_else(|| v.as_str().and_then(|s| s.trim().parse::<f64>().ok()))
}

/// Integers may arrive as JSON integers, whole floats, or numeric strings.
fn as_integer(v: &Value) -> Option<i64> {
    if let Some(i) = v.as_i64() {
        return Some(i);
    }
    let f = as_number(v)?;
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15 {
        Some(f as i64)
    } else {
        None
    }
}

/// Parse a timestamp into UTC. Accepts RFC 3339 with any offset, naive ISO-8601
/// date-times and dates (taken as UTC), and integer Unix seconds.
pub fn parse_timestamp(v: &Value) -> Option<DateTime<Utc>> {
    match v {
        Value::String(s) => parse_timestamp_str(s),
        Value::Number(n) => {
            let secs = n.as_i64()?;
            Utc.timestamp_opt(secs, 0).single()
        }
        _ => None,
    }
}

fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?;
    Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn as_of() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn order(id: &str, amount: serde_json::Value) -> Value {
        json!({
            "id": id,
            "timestamp": "2024-05-01T18:30:00Z",
            "amount": amount,
            "quantity": 2,
            "categories": [" Pepperoni ", "MARGHERITA"],
            "source": "real"
        })
    }

    fn game(id: &str) -> Value {
        json!({
            "id": id,
            "timestamp": "2024-05-01T20:00:00+01:00",
            "participant_a": " Arsenal ",
            "participant_b": "Chelsea",
            "score_a": 2,
            "score_b": 1,
            "significance": "Tournament",
            "source": "mock"
        })
    }

    #[test]
    fn accepts_and_canonicalizes_commerce() {
        let batch = normalize(&[order("o1", json!(12.5))], &[], as_of(), &EngineConfig::default());
        assert_eq!(batch.commerce.len(), 1);
        let e = &batch.commerce[0];
        assert_eq!(e.categories, vec!["margherita".to_string(), "pepperoni".to_string()]);
        assert_eq!(e.amount, 12.5);
        assert_eq!(e.source, Provenance::Real);
    }

    #[test]
    fn negative_amount_is_rejected_not_fatal() {
        let batch = normalize(&[order("o1", json!(-5)), order("o2", json!("7.25"))], &[], as_of(), &EngineConfig::default());
        assert_eq!(batch.commerce.len(), 1);
        assert_eq!(batch.commerce[0].id, "o2");
        assert_eq!(batch.stats.commerce_rejected.out_of_range, 1);
        assert_eq!(batch.stats.commerce_rejected.total(), 1);
        assert_eq!(batch.stats.commerce_accepted, 1);
    }

    #[test]
    fn missing_fields_and_bad_timestamps_are_counted() {
        let mut no_source = order("o1", json!(1.0));
        no_source.as_object_mut().unwrap().remove("source");
        let mut bad_ts = order("o2", json!(1.0));
        bad_ts["timestamp"] = json!("yesterday-ish");
        let mut future = order("o3", json!(1.0));
        future["timestamp"] = json!("2030-01-01T00:00:00Z");
        let mut zero_qty = order("o4", json!(1.0));
        zero_qty["quantity"] = json!(0);

        let batch = normalize(&[no_source, bad_ts, future, zero_qty, json!("junk")], &[], as_of(), &EngineConfig::default());
        let r = &batch.stats.commerce_rejected;
        assert!(batch.commerce.is_empty());
        assert_eq!(r.missing_field, 1);
        assert_eq!(r.bad_timestamp, 1);
        assert_eq!(r.future_timestamp, 1);
        assert_eq!(r.out_of_range, 1);
        assert_eq!(r.not_an_object, 1);
    }

    #[test]
    fn outcome_timestamp_is_coerced_to_utc() {
        let batch = normalize(&[], &[game("m1")], as_of(), &EngineConfig::default());
        let e = &batch.outcomes[0];
        assert_eq!(e.timestamp, Utc.with_ymd_and_hms(2024, 5, 1, 19, 0, 0).unwrap());
        assert_eq!(e.participant_a, "arsenal");
        assert_eq!(e.category, OutcomeCategory::Win);
        assert_eq!(e.significance, SignificanceTier::Tournament);
    }

    #[test]
    fn legacy_field_names_are_accepted() {
        let raw = json!({
            "match_id": "m9",
            "timestamp": "2024-05-01T19:00:00",
            "home_team": "Leeds",
            "away_team": "Everton",
            "home_score": 0,
            "away_score": 0,
            "event_type": "draw",
            "match_significance": "final",
            "data_source": "real"
        });
        let batch = normalize(&[], &[raw], as_of(), &EngineConfig::default());
        assert_eq!(batch.outcomes.len(), 1);
        assert_eq!(batch.outcomes[0].category, OutcomeCategory::Draw);
    }

    #[test]
    fn outcome_label_must_match_scores() {
        let mut raw = game("m1");
        raw["outcome"] = json!("loss");
        let batch = normalize(&[], &[raw], as_of(), &EngineConfig::default());
        assert!(batch.outcomes.is_empty());
        assert_eq!(batch.stats.outcome_rejected.inconsistent, 1);
    }

    #[test]
    fn negative_score_and_same_participants_rejected() {
        let mut neg = game("m1");
        neg["score_b"] = json!(-1);
        let mut same = game("m2");
        same["participant_b"] = json!("ARSENAL");
        let batch = normalize(&[], &[neg, same], as_of(), &EngineConfig::default());
        assert!(batch.outcomes.is_empty());
        assert_eq!(batch.stats.outcome_rejected.out_of_range, 1);
        assert_eq!(batch.stats.outcome_rejected.inconsistent, 1);
    }

    #[test]
    fn output_is_sorted_by_timestamp() {
        let mut late = order("late", json!(1.0));
        late["timestamp"] = json!("2024-05-02T00:00:00Z");
        let early = order("early", json!(1.0));
        let batch = normalize(&[late, early], &[], as_of(), &EngineConfig::default());
        let ids: Vec<_> = batch.commerce.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["early", "late"]);
    }

    #[test]
    fn repeated_ids_keep_the_first_valid_record() {
        let mut bad_first = order("o1", json!(-1.0));
        bad_first["timestamp"] = json!("2024-05-01T10:00:00Z");
        let commerce = [bad_first, order("o1", json!(3.0)), order("o1", json!(4.0)), order("o2", json!(5.0))];

        let mut later = game("m1");
        later["timestamp"] = json!("2024-05-02T20:00:00+01:00");
        let outcomes = [game("m1"), later, game("m2")];

        let batch = normalize(&commerce, &outcomes, as_of(), &EngineConfig::default());
        let amounts: Vec<_> = batch.commerce.iter().map(|e| (e.id.as_str(), e.amount)).collect();
        assert_eq!(amounts, vec![("o1", 3.0), ("o2", 5.0)]);
        assert_eq!(batch.stats.commerce_rejected.out_of_range, 1);
        assert_eq!(batch.stats.commerce_rejected.duplicate, 1);
        assert_eq!(batch.stats.commerce_rejected.total(), 2);

        assert_eq!(batch.outcomes.len(), 2);
        let m1 = batch.outcomes.iter().find(|e| e.id == "m1").unwrap();
        assert_eq!(m1.timestamp, Utc.with_ymd_and_hms(2024, 5, 1, 19, 0, 0).unwrap());
        assert_eq!(batch.stats.outcome_rejected.duplicate, 1);
    }

    #[test]
    fn outcome_whose_windows_overflow_is_out_of_range() {
        let mut edge = game("edge");
        edge["timestamp"] = json!(DateTime::<Utc>::MIN_UTC.timestamp() + 1);
        let batch = normalize(&[], &[edge, game("m1")], as_of(), &EngineConfig::default());
        assert_eq!(batch.outcomes.len(), 1);
        assert_eq!(batch.outcomes[0].id, "m1");
        assert_eq!(batch.stats.outcome_rejected.out_of_range, 1);
    }

    #[test]
    fn parses_epoch_seconds_and_plain_dates() {
        assert_eq!(
            parse_timestamp(&json!(1714590000)),
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 19, 0, 0).unwrap())
        );
        assert_eq!(
            parse_timestamp(&json!("2024-05-01")),
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_timestamp(&json!(true)), None);
    }
}
