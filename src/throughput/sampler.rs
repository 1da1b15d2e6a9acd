//! Monitor loop: spawns one transfer worker per endpoint, drains their
//! counters every interval and keeps the peak rate.
//!
//! Timeline of one session with the default 3 s interval and 15 s budget:
//!
//! ```text
//! t=0   spawn workers
//! t=3   sample 0   (bytes since t=0)
//! t=6   sample 1
//! ...
//! t=15  sample 4
//! t=18  raise stop, join workers
//! ```
//!
//! The number of samples is `floor(max_time / interval)`. Bytes moved after
//! the last sample are never counted, and a budget shorter than one interval
//! yields no samples and a peak of zero.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinSet;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{Config, SamplerConfig};

use super::counters::{CounterArray, CounterSlot};
use super::report::format_progress;
use super::stop::StopSignal;
use super::transport::{HttpTransport, Transport};
use super::worker::{self, TransferSettings, WorkerContext, WorkerExit, WorkerReport};
use super::{Direction, ThroughputError};

/// One drained interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    pub iteration: u32,
    pub total_bytes: u64,
    pub bytes_per_sec: f64,
}

impl Sample {
    pub fn new(iteration: u32, total_bytes: u64, interval: Duration) -> Self {
        let secs = interval.as_secs_f64();
        let bytes_per_sec = if secs > 0.0 {
            total_bytes as f64 / secs
        } else {
            0.0
        };
        Self {
            iteration,
            total_bytes,
            bytes_per_sec,
        }
    }
}

/// Parameters of one measurement session.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub endpoints: Vec<String>,
    pub direction: Direction,
    pub max_time: Duration,
    /// Print a progress line per sample.
    pub verbose: bool,
}

/// Outcome of one session in one direction.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session_id: String,
    pub direction: Direction,
    pub endpoints: usize,
    /// Peak application-layer throughput in bytes/sec. Never negative.
    pub peak_bytes_per_sec: f64,
    pub samples: Vec<Sample>,
    pub workers: Vec<WorkerReport>,
    pub elapsed_secs: f64,
}

impl SessionReport {
    fn empty(direction: Direction, endpoints: usize) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            direction,
            endpoints,
            peak_bytes_per_sec: 0.0,
            samples: Vec::new(),
            workers: Vec::new(),
            elapsed_secs: 0.0,
        }
    }

    pub fn failed_workers(&self) -> usize {
        self.workers
            .iter()
            .filter(|w| matches!(w.exit, WorkerExit::Failed { .. }))
            .count()
    }
}

/// Number of sampling iterations that fit in `max_time`.
pub fn iteration_count(max_time: Duration, interval: Duration) -> u32 {
    if interval.is_zero() {
        return 0;
    }
    let n = max_time.as_nanos() / interval.as_nanos();
    u32::try_from(n).unwrap_or(u32::MAX)
}

/// Concurrent throughput sampler.
pub struct Sampler {
    transport: Arc<dyn Transport>,
    timing: SamplerConfig,
    transfers: TransferSettings,
    overhead_factor: f64,
}

impl Sampler {
    pub fn new(config: &Config, transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            timing: config.sampler.clone(),
            transfers: TransferSettings {
                download: config.download,
                upload: config.upload,
            },
            overhead_factor: config.units.overhead_factor,
        }
    }

    /// Build a sampler over HTTP using the configured client settings.
    pub fn http(config: &Config) -> Result<Self, ThroughputError> {
        config.validate()?;
        let transport = HttpTransport::new(config.http.connect_timeout(), &config.http.user_agent)
            .map_err(|e| ThroughputError::Client(e.to_string()))?;
        Ok(Self::new(config, Arc::new(transport)))
    }

    pub fn overhead_factor(&self) -> f64 {
        self.overhead_factor
    }

    /// Peak throughput in bytes/sec for one session.
    pub async fn peak(&self, endpoints: &[String], direction: Direction, max_time: Duration) -> f64 {
        self.run(SessionRequest {
            endpoints: endpoints.to_vec(),
            direction,
            max_time,
            verbose: false,
        })
        .await
        .peak_bytes_per_sec
    }

    /// Run one session. Never fails: unreachable endpoints only lower the
    /// result, down to zero.
    pub async fn run(&self, request: SessionRequest) -> SessionReport {
        let SessionRequest {
            endpoints,
            direction,
            max_time,
            verbose,
        } = request;
        let mut report = SessionReport::empty(direction, endpoints.len());

        if endpoints.is_empty() {
            info!(%direction, "no endpoints supplied, nothing to measure");
            return report;
        }

        let started = Instant::now();
        let interval = self.timing.interval();
        let iterations = iteration_count(max_time, interval);
        info!(
            session_id = report.session_id.as_str(),
            %direction,
            endpoints = endpoints.len(),
            interval_ms = interval.as_millis() as u64,
            iterations,
            "starting throughput session"
        );
        if iterations == 0 {
            warn!(
                max_time_ms = max_time.as_millis() as u64,
                interval_ms = interval.as_millis() as u64,
                "session budget shorter than one interval, result will be zero"
            );
        }

        let counters = Arc::new(CounterArray::new(endpoints.len()));
        let stop = StopSignal::new();
        let mut workers = JoinSet::new();
        for (index, url) in endpoints.iter().enumerate() {
            let ctx = WorkerContext {
                url: url.clone(),
                transport: Arc::clone(&self.transport),
                slot: CounterSlot::new(Arc::clone(&counters), index),
                stop: stop.clone(),
            };
            workers.spawn(worker::run(ctx, direction, self.transfers));
        }

        sleep(self.timing.warmup()).await;

        let mut best = 0.0_f64;
        for iteration in 0..iterations {
            let sample = Sample::new(iteration, counters.drain(), interval);
            best = best.max(sample.bytes_per_sec);

            debug!(
                %direction,
                iteration,
                total_bytes = sample.total_bytes,
                bytes_per_sec = sample.bytes_per_sec,
                "sample"
            );
            if verbose {
                println!("{}", format_progress(direction, &sample, self.overhead_factor));
            }
            report.samples.push(sample);

            sleep(interval).await;
        }

        stop.raise();
        report.peak_bytes_per_sec = best;
        report.workers = join_workers(workers, &endpoints, self.timing.shutdown_grace()).await;
        report.elapsed_secs = started.elapsed().as_secs_f64();

        info!(
            session_id = report.session_id.as_str(),
            %direction,
            peak_bytes_per_sec = report.peak_bytes_per_sec,
            failed_workers = report.failed_workers(),
            elapsed_secs = report.elapsed_secs,
            "throughput session finished"
        );
        report
    }
}

/// Wait up to `grace` for every worker to return, then abort the rest.
async fn join_workers(
    mut workers: JoinSet<WorkerReport>,
    endpoints: &[String],
    grace: Duration,
) -> Vec<WorkerReport> {
    let mut reports = Vec::with_capacity(endpoints.len());
    let deadline = sleep(grace);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            joined = workers.join_next() => match joined {
                Some(Ok(report)) => reports.push(report),
                Some(Err(e)) => warn!(error = %e, "transfer worker did not finish cleanly"),
                None => break,
            },
            _ = &mut deadline => {
                warn!(remaining = workers.len(), "workers still running after stop, aborting");
                workers.abort_all();
                break;
            }
        }
    }

    for (index, url) in endpoints.iter().enumerate() {
        if !reports.iter().any(|r: &WorkerReport| r.index == index) {
            reports.push(WorkerReport::aborted(index, url));
        }
    }
    reports.sort_by_key(|r| r.index);
    reports
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::throughput::payload::InstrumentedPayload;
    use crate::throughput::transport::{ChunkStream, TransferError};
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::StreamExt;

    /// Endless download stream of `chunk` bytes every `every`, opened after
    /// `latency`.
    struct PacedTransport {
        chunk: usize,
        every: Duration,
        latency: Duration,
    }

    #[async_trait]
    impl Transport for PacedTransport {
        async fn open_download(&self, _url: &str) -> Result<ChunkStream, TransferError> {
            if !self.latency.is_zero() {
                sleep(self.latency).await;
            }
            let chunk = Bytes::from(vec![0u8; self.chunk]);
            let every = self.every;
            Ok(futures::stream::unfold(chunk, move |chunk| async move {
                sleep(every).await;
                Some((Ok::<_, std::io::Error>(chunk.clone()), chunk))
            })
            .boxed())
        }

        async fn upload(&self, _url: &str, _payload: InstrumentedPayload) -> Result<(), TransferError> {
            std::future::pending().await
        }
    }

    /// Never connects and never returns.
    struct HangingTransport;

    #[async_trait]
    impl Transport for HangingTransport {
        async fn open_download(&self, _url: &str) -> Result<ChunkStream, TransferError> {
            std::future::pending().await
        }

        async fn upload(&self, _url: &str, _payload: InstrumentedPayload) -> Result<(), TransferError> {
            std::future::pending().await
        }
    }

    fn config(chunk_bytes: usize) -> Config {
        let mut config = Config::default();
        config.download.chunk_bytes = chunk_bytes;
        config
    }

    fn endpoints(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("http://endpoint-{i}.test/")).collect()
    }

    #[test]
    fn test_iteration_count_floors() {
        let three = Duration::from_secs(3);
        assert_eq!(iteration_count(Duration::from_secs(15), three), 5);
        assert_eq!(iteration_count(Duration::from_secs(17), three), 5);
        assert_eq!(iteration_count(Duration::from_secs(2), three), 0);
        assert_eq!(iteration_count(Duration::from_secs(2), Duration::ZERO), 0);
    }

    #[test]
    fn test_sample_rate() {
        let sample = Sample::new(0, 6_000, Duration::from_secs(3));
        assert_eq!(sample.bytes_per_sec, 2_000.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_endpoints_is_zero() {
        let sampler = Sampler::new(&Config::default(), Arc::new(HangingTransport));
        let peak = sampler.peak(&[], Direction::Download, Duration::from_secs(9)).await;
        assert_eq!(peak, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_below_interval_is_zero() {
        let transport = Arc::new(PacedTransport {
            chunk: 1024,
            every: Duration::from_millis(10),
            latency: Duration::ZERO,
        });
        let sampler = Sampler::new(&config(1024), transport);
        let report = sampler
            .run(SessionRequest {
                endpoints: endpoints(2),
                direction: Direction::Download,
                max_time: Duration::from_secs(2),
                verbose: false,
            })
            .await;

        assert_eq!(report.peak_bytes_per_sec, 0.0);
        assert!(report.samples.is_empty());
        assert_eq!(report.workers.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_paced_endpoints_peak() {
        const CHUNK: u64 = 100 * 1024;
        // A 25 ms connect puts chunks at 75, 125, ... ms, never on a sampling
        // instant, so every interval holds a fixed number of chunks.
        let transport = Arc::new(PacedTransport {
            chunk: CHUNK as usize,
            every: Duration::from_millis(50),
            latency: Duration::from_millis(25),
        });
        let sampler = Sampler::new(&config(CHUNK as usize), transport);
        let report = sampler
            .run(SessionRequest {
                endpoints: endpoints(3),
                direction: Direction::Download,
                max_time: Duration::from_secs(9),
                verbose: false,
            })
            .await;

        // Warm-up window: chunks at 75..=2975 ms, 59 per worker. Each later
        // 3 s window: 60 per worker.
        let totals: Vec<u64> = report.samples.iter().map(|s| s.total_bytes).collect();
        assert_eq!(totals, vec![3 * 59 * CHUNK, 3 * 60 * CHUNK, 3 * 60 * CHUNK]);

        // 3 workers * 100 KiB / 50 ms.
        assert_eq!(report.peak_bytes_per_sec, 6_144_000.0);
        assert_eq!(report.peak_bytes_per_sec, report.samples[1].bytes_per_sec);

        assert!(report.workers.iter().all(|w| w.exit == WorkerExit::Stopped));
    }

    #[tokio::test(start_paused = true)]
    async fn test_peak_never_below_any_sample() {
        let transport = Arc::new(PacedTransport {
            chunk: 4096,
            every: Duration::from_millis(7),
            latency: Duration::ZERO,
        });
        let sampler = Sampler::new(&config(4096), transport);
        let report = sampler
            .run(SessionRequest {
                endpoints: endpoints(2),
                direction: Direction::Download,
                max_time: Duration::from_secs(15),
                verbose: false,
            })
            .await;

        assert_eq!(report.samples.len(), 5);
        assert!(report.peak_bytes_per_sec >= 0.0);
        for sample in &report.samples {
            assert!(report.peak_bytes_per_sec >= sample.bytes_per_sec);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_workers_stop_within_grace() {
        let sampler = Sampler::new(&Config::default(), Arc::new(HangingTransport));
        let report = sampler
            .run(SessionRequest {
                endpoints: endpoints(2),
                direction: Direction::Upload,
                max_time: Duration::from_secs(3),
                verbose: false,
            })
            .await;

        assert_eq!(report.peak_bytes_per_sec, 0.0);
        // Pending connects are raced against the stop signal.
        assert!(report.workers.iter().all(|w| w.exit == WorkerExit::Stopped));
    }
}
