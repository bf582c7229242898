use serde::Serialize;

use crate::types::{OutcomeEvent, SignificanceTier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Excitement {
    Low,
    Medium,
    High,
    VeryHigh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarginClass {
    Draw,
    /// Decided by one point.
    Close,
    Comfortable,
    /// Decided by three or more.
    Blowout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EventProfile {
    pub excitement: Excitement,
    pub margin: MarginClass,
    /// 0-100.
    pub impact_score: u32,
}

/// Profile an outcome event on excitement, margin and overall impact.
pub fn classify(event: &OutcomeEvent, high_scoring_threshold: u32) -> EventProfile {
    let total = event.total_score();
    let margin = event.score_margin();

    let excitement = if total >= 5 {
        Excitement::VeryHigh
    } else if total >= high_scoring_threshold && margin <= 1 {
        Excitement::High
    } else if total >= 2 {
        Excitement::Medium
    } else {
        Excitement::Low
    };

    let margin_class = match margin {
        0 => MarginClass::Draw,
        1 => MarginClass::Close,
        2 => MarginClass::Comfortable,
        _ => MarginClass::Blowout,
    };

    EventProfile {
        excitement,
        margin: margin_class,
        impact_score: impact_score(event, high_scoring_threshold),
    }
}

fn impact_score(event: &OutcomeEvent, high_scoring_threshold: u32) -> u32 {
    let total = event.total_score();

    let scoring = (total.saturating_mul(5)).min(30);
    let closeness = match event.score_margin() {
        0 => 20,
        1 => 15,
        2 => 10,
        _ => 0,
    };
    let stakes = match event.significance {
        SignificanceTier::Final => 30,
        SignificanceTier::Tournament => 20,
        SignificanceTier::Regular => 10,
    };
    let high_scoring_bonus = if total >= 5 {
        20
    } else if total >= high_scoring_threshold {
        10
    } else {
        0
    };

    (scoring + closeness + stakes + high_scoring_bonus).min(100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Provenance;
    use chrono::{TimeZone, Utc};

    fn event(score_a: u32, score_b: u32, significance: SignificanceTier) -> OutcomeEvent {
        OutcomeEvent::new(
            "m1".to_string(),
            Utc.with_ymd_and_hms(2024, 5, 1, 19, 0, 0).unwrap(),
            "a".to_string(),
            "b".to_string(),
            score_a,
            score_b,
            significance,
            Provenance::Mock,
        )
    }

    #[test]
    fn scoreless_regular_draw() {
        let p = classify(&event(0, 0, SignificanceTier::Regular), 3);
        assert_eq!(p.excitement, Excitement::Low);
        assert_eq!(p.margin, MarginClass::Draw);
        // closeness 20 + stakes 10
        assert_eq!(p.impact_score, 30);
    }

    #[test]
    fn tight_high_scoring_game_is_high_excitement() {
        let p = classify(&event(2, 1, SignificanceTier::Tournament), 3);
        assert_eq!(p.excitement, Excitement::High);
        assert_eq!(p.margin, MarginClass::Close);
        // scoring 15 + closeness 15 + stakes 20 + bonus 10
        assert_eq!(p.impact_score, 60);
    }

    #[test]
    fn blowout_final_is_capped() {
        let p = classify(&event(7, 3, SignificanceTier::Final), 3);
        assert_eq!(p.excitement, Excitement::VeryHigh);
        assert_eq!(p.margin, MarginClass::Blowout);
        // scoring 30 + closeness 0 + stakes 30 + bonus 20
        assert_eq!(p.impact_score, 80);
    }

    #[test]
    fn impact_never_exceeds_100() {
        let p = classify(&event(4, 4, SignificanceTier::Final), 3);
        // 30 + 20 + 30 + 20
        assert_eq!(p.impact_score, 100);
    }
}
