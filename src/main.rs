use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use screenshot_load::{
    report, Aggregator, Check, Config, Controller, Endpoint, HttpTransport, HttpWorkerFactory,
    WorkerContext,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();

    // Everything is validated before the first VU starts.
    let profile = config.ramp_profile().context("Invalid ramp profile")?;
    let targets = config.target_pool().context("Invalid target list")?;
    let endpoint = Endpoint::new(&config.base_url)?;
    let transport = HttpTransport::new(config.request_timeout(), !config.keep_response_bodies)
        .context("Failed to create HTTP client")?;

    info!("════════════════════════════════════════════════════════════");
    info!("           SCREENSHOT API LOAD TEST");
    info!("════════════════════════════════════════════════════════════");
    info!("Target: {}/api/screenshot", config.base_url.trim_end_matches('/'));
    info!("Start VUs: {}", profile.start_vus());
    for (index, stage) in profile.stages().iter().enumerate() {
        info!(
            "Stage {}: {:?} -> {} VUs",
            index + 1,
            stage.duration,
            stage.target
        );
    }
    info!("Graceful Ramp-Down: {:?}", profile.graceful_ramp_down());
    info!("Peak VUs: {}", profile.peak_vus());
    info!("Pause: {:?}", config.pause());
    info!("URIs: {}", targets.len());
    if let Some(seed) = config.seed {
        info!("Seed: {}", seed);
    }
    info!("════════════════════════════════════════════════════════════");

    let aggregator = Arc::new(Aggregator::new());
    let ctx = WorkerContext {
        transport: Arc::new(transport),
        endpoint,
        targets,
        checks: Arc::from([Check::status_is(200)]),
        aggregator: Arc::clone(&aggregator),
        pause: config.pause(),
        graceful_ramp_down: profile.graceful_ramp_down(),
    };
    let factory = HttpWorkerFactory::new(ctx, config.seed);

    let summary = Controller::new(profile, aggregator)
        .with_tick(config.tick())
        .run(factory)
        .await;

    report::print_summary(&summary);
    if let Some(path) = &config.summary_json {
        report::write_json(&summary, path)?;
    }

    info!("════════════════════════════════════════════════════════════");
    info!("                 LOAD TEST COMPLETE");
    info!("════════════════════════════════════════════════════════════");

    Ok(())
}
