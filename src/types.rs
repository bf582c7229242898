use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Provenance
// ---------------------------------------------------------------------------

/// Where a record came from. Must survive every transformation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Real,
    Mock,
}

impl Provenance {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "real" => Some(Provenance::Real),
            "mock" => Some(Provenance::Mock),
            _ => None,
        }
    }

    pub fn is_real(self) -> bool {
        matches!(self, Provenance::Real)
    }
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provenance::Real => write!(f, "real"),
            Provenance::Mock => write!(f, "mock"),
        }
    }
}

// ---------------------------------------------------------------------------
// Commerce events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommerceEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    /// Non-negative monetary amount.
    pub amount: f64,
    /// Item count, at least 1.
    pub quantity: u32,
    /// Trimmed, lower-cased, sorted.
    pub categories: Vec<String>,
    pub source: Provenance,
}

// ---------------------------------------------------------------------------
// Outcome events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeCategory {
    Win,
    Loss,
    Draw,
}

impl OutcomeCategory {
    /// Outcome from the perspective of the side that scored `own`.
    pub fn from_scores(own: u32, other: u32) -> Self {
        match own.cmp(&other) {
            std::cmp::Ordering::Greater => OutcomeCategory::Win,
            std::cmp::Ordering::Less => OutcomeCategory::Loss,
            std::cmp::Ordering::Equal => OutcomeCategory::Draw,
        }
    }
}

impl std::fmt::Display for OutcomeCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OutcomeCategory::Win => "win",
            OutcomeCategory::Loss => "loss",
            OutcomeCategory::Draw => "draw",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignificanceTier {
    Regular,
    Tournament,
    Final,
}

impl SignificanceTier {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "regular" => Some(SignificanceTier::Regular),
            "tournament" => Some(SignificanceTier::Tournament),
            "final" => Some(SignificanceTier::Final),
            _ => None,
        }
    }
}

impl std::fmt::Display for SignificanceTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SignificanceTier::Regular => "regular",
            SignificanceTier::Tournament => "tournament",
            SignificanceTier::Final => "final",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Winner {
    ParticipantA,
    ParticipantB,
    Draw,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub participant_a: String,
    pub participant_b: String,
    pub score_a: u32,
    pub score_b: u32,
    /// Outcome from participant A's perspective, derived from the scores.
    pub category: OutcomeCategory,
    pub significance: SignificanceTier,
    pub source: Provenance,
}

impl OutcomeEvent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        timestamp: DateTime<Utc>,
        participant_a: String,
        participant_b: String,
        score_a: u32,
        score_b: u32,
        significance: SignificanceTier,
        source: Provenance,
    ) -> Self {
        Self {
            category: OutcomeCategory::from_scores(score_a, score_b),
            id,
            timestamp,
            participant_a,
            participant_b,
            score_a,
            score_b,
            significance,
            source,
        }
    }

    pub fn total_score(&self) -> u32 {
        self.score_a + self.score_b
    }

    pub fn score_margin(&self) -> u32 {
        self.score_a.abs_diff(self.score_b)
    }

    pub fn winner(&self) -> Winner {
        match self.category {
            OutcomeCategory::Win => Winner::ParticipantA,
            OutcomeCategory::Loss => Winner::ParticipantB,
            OutcomeCategory::Draw => Winner::Draw,
        }
    }

    /// Outcome from the named participant's perspective. `None` if they did not take part.
    pub fn outcome_for(&self, participant: &str) -> Option<OutcomeCategory> {
        let participant = participant.trim().to_lowercase();
        if participant == self.participant_a {
            Some(OutcomeCategory::from_scores(self.score_a, self.score_b))
        } else if participant == self.participant_b {
            Some(OutcomeCategory::from_scores(self.score_b, self.score_a))
        } else {
            None
        }
    }

    pub fn is_high_scoring(&self, threshold: u32) -> bool {
        self.total_score() >= threshold
    }
}

// ---------------------------------------------------------------------------
// Windows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowLabel {
    Pre,
    During,
    Post,
}

impl WindowLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            WindowLabel::Pre => "pre",
            WindowLabel::During => "during",
            WindowLabel::Post => "post",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pre" => Some(WindowLabel::Pre),
            "during" => Some(WindowLabel::During),
            "post" => Some(WindowLabel::Post),
            _ => None,
        }
    }

    pub fn all() -> [WindowLabel; 3] {
        [WindowLabel::Pre, WindowLabel::During, WindowLabel::Post]
    }
}

impl std::fmt::Display for WindowLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Aggregate statistics for one (outcome event, window) pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowMetric {
    pub outcome_id: String,
    pub window: WindowLabel,
    pub count: usize,
    pub total_amount: f64,
    /// 0 when `count` is 0.
    pub mean_amount: f64,
    pub total_quantity: u64,
    /// Fraction of records tagged `real`; 0 when `count` is 0.
    pub provenance_mix: f64,
    #[serde(skip_serializing)]
    pub real_count: usize,
    #[serde(skip_serializing)]
    pub window_start: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub window_end: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Correlation results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationMethod {
    PointBiserial,
    Pearson,
}

impl std::fmt::Display for CorrelationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CorrelationMethod::PointBiserial => write!(f, "point_biserial"),
            CorrelationMethod::Pearson => write!(f, "pearson"),
        }
    }
}

/// One coefficient for an (outcome variable, volume variable, window) triple.
/// Never mutated after the correlation engine emits it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationResult {
    pub id: String,
    pub outcome_variable: String,
    pub volume_variable: String,
    /// In [-1, 1].
    pub coefficient: f64,
    /// In [0, 1].
    pub p_value: f64,
    pub window: WindowLabel,
    /// At least 3.
    pub sample_size: usize,
    pub method: CorrelationMethod,
    pub description: String,
    /// Fraction of contributing records tagged `real`, in [0, 1].
    pub data_quality: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EffectSize {
    Weak,
    Moderate,
    Strong,
}

impl EffectSize {
    /// Classify by |r| against `(weak_max, moderate_max)`.
    pub fn classify(coefficient: f64, thresholds: (f64, f64)) -> Self {
        let magnitude = coefficient.abs();
        let (weak_max, moderate_max) = thresholds;
        if magnitude < weak_max {
            EffectSize::Weak
        } else if magnitude < moderate_max {
            EffectSize::Moderate
        } else {
            EffectSize::Strong
        }
    }
}

impl std::fmt::Display for EffectSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EffectSize::Weak => "weak",
            EffectSize::Moderate => "moderate",
            EffectSize::Strong => "strong",
        };
        write!(f, "{s}")
    }
}

/// A correlation result annotated by the significance tester.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotatedResult {
    #[serde(flatten)]
    pub result: CorrelationResult,
    pub significant: bool,
    pub effect_size: EffectSize,
}

// ---------------------------------------------------------------------------
// Anomalies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalyDirection {
    Spike,
    Dip,
}

impl std::fmt::Display for AnomalyDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnomalyDirection::Spike => write!(f, "spike"),
            AnomalyDirection::Dip => write!(f, "dip"),
        }
    }
}

/// Which provenance an anomalous window's records carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalyAttribution {
    Real,
    Mock,
    Mixed,
    /// The window held no records at all.
    Empty,
}

impl AnomalyAttribution {
    pub fn from_mix(count: usize, provenance_mix: f64) -> Self {
        if count == 0 {
            AnomalyAttribution::Empty
        } else if provenance_mix <= 0.0 {
            AnomalyAttribution::Mock
        } else if provenance_mix >= 1.0 {
            AnomalyAttribution::Real
        } else {
            AnomalyAttribution::Mixed
        }
    }
}

impl std::fmt::Display for AnomalyAttribution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AnomalyAttribution::Real => "real",
            AnomalyAttribution::Mock => "mock",
            AnomalyAttribution::Mixed => "mixed",
            AnomalyAttribution::Empty => "empty",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Anomaly {
    pub outcome_id: String,
    pub window: WindowLabel,
    /// Grouping key the baseline was computed over, e.g. `post` or `hour_20`.
    pub group: String,
    pub value: f64,
    pub group_mean: f64,
    pub group_std_dev: f64,
    /// Signed distance from the group mean in standard deviations.
    pub z_score: f64,
    pub direction: AnomalyDirection,
    pub provenance_mix: f64,
    pub attribution: AnomalyAttribution,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event(score_a: u32, score_b: u32) -> OutcomeEvent {
        OutcomeEvent::new(
            "m1".to_string(),
            Utc.with_ymd_and_hms(2024, 5, 1, 19, 0, 0).unwrap(),
            "arsenal".to_string(),
            "chelsea".to_string(),
            score_a,
            score_b,
            SignificanceTier::Regular,
            Provenance::Real,
        )
    }

    #[test]
    fn category_follows_participant_a() {
        assert_eq!(event(2, 1).category, OutcomeCategory::Win);
        assert_eq!(event(0, 1).category, OutcomeCategory::Loss);
        assert_eq!(event(1, 1).category, OutcomeCategory::Draw);
    }

    #[test]
    fn outcome_for_flips_perspective() {
        let e = event(3, 1);
        assert_eq!(e.outcome_for("Arsenal"), Some(OutcomeCategory::Win));
        assert_eq!(e.outcome_for("chelsea "), Some(OutcomeCategory::Loss));
        assert_eq!(e.outcome_for("spurs"), None);
        assert_eq!(e.winner(), Winner::ParticipantA);
        assert_eq!(e.score_margin(), 2);
        assert!(e.is_high_scoring(3));
    }

    #[test]
    fn effect_size_boundaries_are_inclusive_below() {
        let t = (0.1, 0.3);
        assert_eq!(EffectSize::classify(0.09, t), EffectSize::Weak);
        assert_eq!(EffectSize::classify(-0.1, t), EffectSize::Moderate);
        assert_eq!(EffectSize::classify(0.29, t), EffectSize::Moderate);
        assert_eq!(EffectSize::classify(-0.3, t), EffectSize::Strong);
    }

    #[test]
    fn attribution_from_mix() {
        assert_eq!(AnomalyAttribution::from_mix(5, 0.0), AnomalyAttribution::Mock);
        assert_eq!(AnomalyAttribution::from_mix(5, 1.0), AnomalyAttribution::Real);
        assert_eq!(AnomalyAttribution::from_mix(5, 0.4), AnomalyAttribution::Mixed);
        assert_eq!(AnomalyAttribution::from_mix(0, 0.0), AnomalyAttribution::Empty);
    }

    #[test]
    fn enums_serialize_lowercase() {
        assert_eq!(serde_json::to_string(&WindowLabel::Post).unwrap(), "\"post\"");
        assert_eq!(serde_json::to_string(&Provenance::Mock).unwrap(), "\"mock\"");
        assert_eq!(serde_json::to_string(&EffectSize::Moderate).unwrap(), "\"moderate\"");
    }
}
