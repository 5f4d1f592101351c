#![allow(clippy::module_inception)]

mod key;
mod queue;
mod stats;

pub use key::HostKey;
pub use queue::{Completion, HostQueue, Task};
pub use stats::{HostStats, HostStatsMap, REQUEST_TIME_SAMPLES};
