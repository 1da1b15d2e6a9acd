//! Human-readable formatting of samples and session results.

use super::sampler::Sample;
use super::units::to_mbps;
use super::{Direction, ThroughputResult};

fn format_speed(mbps: f64) -> String {
    if mbps >= 1000.0 {
        format!("{:.2} Gbps", mbps / 1000.0)
    } else {
        format!("{:.1} Mbps", mbps)
    }
}

/// Format a direction result as a one-line summary.
pub fn format_summary(result: &ThroughputResult) -> String {
    let mut summary = format!(
        "{}: {} (peak {:.1} kB/s, {} stream{}, {:.0}s)",
        result.direction,
        format_speed(result.throughput_mbps),
        result.peak_bytes_per_sec / 1024.0,
        result.streams,
        if result.streams == 1 { "" } else { "s" },
        result.duration_secs,
    );

    if result.failed_streams > 0 {
        summary.push_str(&format!(", {} failed", result.failed_streams));
    }

    summary
}

/// Progress line for one sample, printed in verbose mode.
pub fn format_progress(direction: Direction, sample: &Sample, overhead_factor: f64) -> String {
    format!(
        "{} loop {}: total {:.2} MB, speed {:.1} kB/s ({:.1} Mbps)",
        direction,
        sample.iteration,
        sample.total_bytes as f64 / (1024.0 * 1024.0),
        sample.bytes_per_sec / 1024.0,
        to_mbps(sample.bytes_per_sec, overhead_factor),
    )
}
