use tracing::info;

use crate::config::EngineConfig;
use crate::types::{AnnotatedResult, CorrelationResult, EffectSize};

/// Annotate one result. `p <= alpha` is significant.
pub fn assess(result: CorrelationResult, cfg: &EngineConfig) -> AnnotatedResult {
    let significant = result.p_value <= cfg.significance_alpha;
    let effect_size = EffectSize::classify(result.coefficient, cfg.effect_size_thresholds);
    AnnotatedResult {
        result,
        significant,
        effect_size,
    }
}

/// Annotate every result. Nothing is dropped; output order follows input order.
pub fn annotate(results: Vec<CorrelationResult>, cfg: &EngineConfig) -> Vec<AnnotatedResult> {
    let annotated: Vec<AnnotatedResult> = results.into_iter().map(|r| assess(r, cfg)).collect();
    let significant = annotated.iter().filter(|a| a.significant).count();
    info!(
        results = annotated.len(),
        significant,
        alpha = cfg.significance_alpha,
        "[SIGNIF] {} of {} results significant at alpha={}",
        significant,
        annotated.len(),
        cfg.significance_alpha,
    );
    annotated
}
