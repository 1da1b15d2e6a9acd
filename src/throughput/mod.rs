//! Concurrent HTTP throughput sampling: parallel transfer workers, shared
//! byte counters and a monitor loop that keeps the peak rate.

pub mod counters;
pub mod payload;
pub mod report;
pub mod sampler;
pub mod stop;
pub mod transport;
pub mod units;
pub mod worker;

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::config::Config;

use sampler::{Sample, Sampler, SessionReport, SessionRequest};
use worker::WorkerReport;

/// Input errors. Network conditions never produce one of these.
#[derive(Debug, Error)]
pub enum ThroughputError {
    #[error("invalid endpoint {url:?}: {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

/// Transfer direction of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Download,
    Upload,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Download => write!(f, "download"),
            Direction::Upload => write!(f, "upload"),
        }
    }
}

/// Result of one direction, in display units.
#[derive(Debug, Clone, Serialize)]
pub struct ThroughputResult {
    pub session_id: String,
    pub direction: Direction,
    pub peak_bytes_per_sec: f64,
    /// Network-layer estimate, rounded to one decimal.
    pub throughput_mbps: f64,
    pub streams: usize,
    pub failed_streams: usize,
    pub duration_secs: f64,
    pub samples: Vec<Sample>,
    pub workers: Vec<WorkerReport>,
}

impl ThroughputResult {
    pub fn from_session(session: SessionReport, overhead_factor: f64) -> Self {
        Self {
            throughput_mbps: units::to_mbps(session.peak_bytes_per_sec, overhead_factor),
            failed_streams: session.failed_workers(),
            session_id: session.session_id,
            direction: session.direction,
            peak_bytes_per_sec: session.peak_bytes_per_sec,
            streams: session.endpoints,
            duration_secs: session.elapsed_secs,
            samples: session.samples,
            workers: session.workers,
        }
    }
}

/// What to measure.
#[derive(Debug, Clone)]
pub struct SpeedTestRequest {
    pub endpoints: Vec<String>,
    /// Directions in run order.
    pub directions: Vec<Direction>,
    pub max_time: Duration,
    pub verbose: bool,
}

/// Combined result. A direction that was not run reports 0 Mbps.
#[derive(Debug, Clone, Serialize)]
pub struct SpeedTestResult {
    pub download_mbps: f64,
    pub upload_mbps: f64,
    pub download: Option<ThroughputResult>,
    pub upload: Option<ThroughputResult>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl SpeedTestResult {
    fn empty() -> Self {
        Self {
            download_mbps: 0.0,
            upload_mbps: 0.0,
            download: None,
            upload: None,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn results(&self) -> impl Iterator<Item = &ThroughputResult> {
        self.download.iter().chain(self.upload.iter())
    }
}

/// Reject endpoints that cannot be HTTP transfer targets.
pub fn validate_endpoint(url: &str) -> Result<(), ThroughputError> {
    let invalid = |reason: &str| ThroughputError::InvalidEndpoint {
        url: url.to_string(),
        reason: reason.to_string(),
    };

    let parsed = reqwest::Url::parse(url).map_err(|e| invalid(&e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => return Err(invalid(&format!("unsupported scheme {other:?}"))),
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host"));
    }
    Ok(())
}

/// Run each requested direction against the endpoints over HTTP.
///
/// Only bad input fails; unreachable endpoints yield zero throughput.
pub async fn run_test(config: &Config, request: SpeedTestRequest) -> Result<SpeedTestResult, ThroughputError> {
    for url in &request.endpoints {
        validate_endpoint(url)?;
    }
    let sampler = Sampler::http(config)?;
    Ok(measure(&sampler, request).await)
}

/// Run each requested direction with an existing sampler.
pub async fn measure(sampler: &Sampler, request: SpeedTestRequest) -> SpeedTestResult {
    tracing::info!(
        endpoints = request.endpoints.len(),
        directions = ?request.directions,
        max_time_secs = request.max_time.as_secs_f64(),
        "Running speed test"
    );

    let mut result = SpeedTestResult::empty();
    for &direction in &request.directions {
        let session = sampler
            .run(SessionRequest {
                endpoints: request.endpoints.clone(),
                direction,
                max_time: request.max_time,
                verbose: request.verbose,
            })
            .await;
        let outcome = ThroughputResult::from_session(session, sampler.overhead_factor());

        match direction {
            Direction::Download => {
                result.download_mbps = outcome.throughput_mbps;
                result.download = Some(outcome);
            }
            Direction::Upload => {
                result.upload_mbps = outcome.throughput_mbps;
                result.upload = Some(outcome);
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_endpoint_accepts_http_and_https() {
        assert!(validate_endpoint("https://ipv4-c001-ams001-ix.1.oca.nflxvideo.net/speedtest?c=nl").is_ok());
        assert!(validate_endpoint("http://127.0.0.1:8080/blob").is_ok());
        assert!(validate_endpoint("http://[::1]:8080/").is_ok());
    }

    #[test]
    fn test_validate_endpoint_rejects_garbage() {
        assert!(matches!(
            validate_endpoint("not a url"),
            Err(ThroughputError::InvalidEndpoint { .. })
        ));
        assert!(validate_endpoint("ftp://example.com/file").is_err());
        assert!(validate_endpoint("").is_err());
    }

    #[test]
    fn test_direction_display_and_json() {
        assert_eq!(Direction::Download.to_string(), "download");
        assert_eq!(
            serde_json::to_string(&Direction::Upload).unwrap(),
            "\"upload\""
        );
    }

    #[tokio::test]
    async fn test_run_test_rejects_invalid_endpoint_before_measuring() {
        let request = SpeedTestRequest {
            endpoints: vec!["file:///etc/passwd".to_string()],
            directions: vec![Direction::Download],
            max_time: Duration::from_secs(9),
            verbose: false,
        };
        let err = run_test(&Config::default(), request).await.unwrap_err();
        assert!(matches!(err, ThroughputError::InvalidEndpoint { .. }));
    }

    #[tokio::test]
    async fn test_no_endpoints_zeroes_both_directions() {
        let request = SpeedTestRequest {
            endpoints: Vec::new(),
            directions: vec![Direction::Download, Direction::Upload],
            max_time: Duration::from_secs(9),
            verbose: false,
        };
        let result = run_test(&Config::default(), request).await.unwrap();
        assert_eq!(result.download_mbps, 0.0);
        assert_eq!(result.upload_mbps, 0.0);
        assert_eq!(result.results().count(), 2);
    }
}
