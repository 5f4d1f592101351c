//! Per-host admission control.
//!
//! Requests to the same host run with bounded concurrency. Everything beyond
//! the limit is buffered and admitted in arrival order as slots free up.
//! Hosts never wait on each other.
//!
//! # Architecture
//!
//! - [`HostKey`]: Identifies a host as `scheme://host[:port]`
//! - [`HostQueue`]: Bounded FIFO executor for a single host
//! - [`HostPool`]: Creates queues on demand and routes tasks to them
//! - [`HostConfig`]: Configuration for per-host behavior
//! - [`HostStats`]: Statistics tracking for each host

mod config;
mod host;
mod pool;

pub use config::{AdmissionConfig, DEFAULT_CONCURRENCY, HostConfig, HostConfigs};
pub use host::{
    Completion, HostKey, HostQueue, HostStats, HostStatsMap, REQUEST_TIME_SAMPLES, Task,
};
pub use pool::HostPool;
