use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use matchday_correlator::api::health::HealthState;
use matchday_correlator::api::routes::{router, ApiState};
use matchday_correlator::config::Config;
use matchday_correlator::db::{self, writer::ResultWriter};
use matchday_correlator::engine::{self, RawBatch, RunBudget, RunReport};
use matchday_correlator::error::Result;
use matchday_correlator::output;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    cfg.engine.validate()?;

    // --- Database setup ---
    let pool = db::open_pool(&cfg.db_path).await?;
    let health = Arc::new(HealthState::new());

    // --- Input ---
    let commerce = output::read_records(Path::new(&cfg.commerce_path)).await?;
    let outcomes = output::read_records(Path::new(&cfg.outcomes_path)).await?;
    let as_of = match cfg.as_of {
        Some(t) => t,
        None => {
            warn!("RUN_AS_OF not set; using the current time, so reruns will not share a run id");
            Utc::now()
        }
    };
    info!(
        commerce = commerce.len(),
        outcomes = outcomes.len(),
        as_of = %as_of,
        "Loaded {} commerce and {} outcome records",
        commerce.len(),
        outcomes.len(),
    );

    let budget = RunBudget {
        max_records: cfg.max_records,
        deadline: cfg
            .run_timeout_secs
            .map(|secs| Instant::now() + Duration::from_secs(secs)),
    };
    let raw = RawBatch {
        commerce,
        outcomes,
        as_of,
    };

    // --- Engine (CPU-bound, off the async workers) ---
    let engine_cfg = cfg.engine.clone();
    let report = tokio::task::spawn_blocking(move || {
        engine::run_pipeline(&raw, &engine_cfg, &budget)
    })
    .await??;

    // --- Sinks ---
    output::write_report(Path::new(&cfg.output_dir), &report).await?;
    ResultWriter::new(pool.clone())
        .with_health(Arc::clone(&health))
        .persist(&report)
        .await?;
    log_top_insights(&report);

    // --- Results API ---
    if let Some(port) = cfg.api_port {
        let app = router(ApiState {
            pool: pool.clone(),
            health,
        });
        let bind_addr = format!("0.0.0.0:{port}");
        let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
        info!("HTTP API listening on {bind_addr}");
        axum::serve(listener, app).await?;
    }

    Ok(())
}

fn log_top_insights(report: &RunReport) {
    let summary = &report.insight;
    if summary.top_results.is_empty() {
        info!(
            event = "RUN_SUMMARY",
            run_id = %report.run_id,
            "RUN SUMMARY | no significant findings | {} results | data quality {:.2}",
            summary.total_findings,
            summary.data_quality_score,
        );
        return;
    }
    for top in &summary.top_results {
        info!(
            event = "TOP_INSIGHT",
            run_id = %report.run_id,
            rank = top.rank,
            effect = %top.result.effect_size,
            "TOP #{} | {} | effect: {}",
            top.rank,
            top.headline,
            top.result.effect_size,
        );
    }
}
