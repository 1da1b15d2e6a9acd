//! fastpulse -- peak HTTP throughput estimation.
//!
//! This crate drives several concurrent HTTP transfers against caller-supplied
//! test endpoints, samples their aggregate byte counters at fixed intervals and
//! reports the peak download and upload rates.

pub mod config;
pub mod throughput;

pub use config::Config;
pub use throughput::sampler::{Sampler, SessionReport, SessionRequest};
pub use throughput::{
    measure, run_test, Direction, SpeedTestRequest, SpeedTestResult, ThroughputError,
    ThroughputResult,
};
