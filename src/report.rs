//! Run summary output.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::aggregator::RunSummary;

pub fn print_summary(summary: &RunSummary) {
    info!("╔════════════════════════════════════════════════════════════╗");
    info!("║                    LOAD TEST SUMMARY                       ║");
    info!("╚════════════════════════════════════════════════════════════╝");

    info!("");
    info!("Run:");
    info!("  Duration:            {:.1}s", summary.duration_secs);
    info!("  Iterations:          {}", summary.iterations);
    info!("  Iterations/s:        {:.2}", summary.iterations_per_second());
    info!("  Requests:            {}", summary.requests);
    info!("  Transport Errors:    {}", summary.transport_errors);
    if summary.bytes_received > 0 {
        info!("  Bytes Received:      {}", summary.bytes_received);
    }
    info!("  Peak VUs:            {}", summary.peak_vus);
    info!(
        "  VUs Started/Stopped: {}/{}",
        summary.vus_started, summary.vus_stopped
    );

    info!("");
    info!("Checks:");
    if summary.checks.is_empty() {
        info!("  No data");
    }
    for check in &summary.checks {
        let total = check.passes + check.fails;
        let rate = if total > 0 {
            check.passes as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        let mark = if check.fails == 0 { "✓" } else { "✗" };
        info!(
            "  {} {:<20} {:>6.2}%  ✓ {}  ✗ {}",
            mark, check.name, rate, check.passes, check.fails
        );
    }

    info!("");
    info!("Request Latency (ms):");
    let latency = &summary.latency;
    if latency.count > 0 {
        info!("  Min:    {:.2}", latency.min);
        info!("  Mean:   {:.2}", latency.mean);
        info!("  p50:    {:.2}", latency.p50);
        info!("  p90:    {:.2}", latency.p90);
        info!("  p95:    {:.2}", latency.p95);
        info!("  p99:    {:.2}", latency.p99);
        info!("  Max:    {:.2}", latency.max);
    } else {
        info!("  No data");
    }

    info!("");
    info!("═══════════════════════════════════════════════════════════");
}

pub fn to_json(summary: &RunSummary) -> Result<String> {
    sonic_rs::to_string_pretty(summary).context("Failed to serialize run summary")
}

pub fn write_json(summary: &RunSummary, path: &Path) -> Result<()> {
    let json = to_json(summary)?;
    std::fs::write(path, json).context(format!("Failed to write summary to {:?}", path))?;
    info!("Summary written to {:?}", path);
    Ok(())
}
