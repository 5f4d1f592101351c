use dashmap::DashMap;
use http::HeaderMap;
use log::debug;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::admission::{
    AdmissionConfig, HostConfigs, HostKey, HostQueue, HostStats, HostStatsMap, Task,
};

/// Registry of the per-host admission queues.
///
/// # Architecture
///
/// - Each distinct [`HostKey`] gets its own [`HostQueue`], created lazily on
///   the first request to that host
/// - The limit of a queue is taken from its [`crate::admission::HostConfig`]
///   (or the global default) once, when the queue is created
/// - Queues are independent of each other; there is no lock across hosts
/// - Queues are kept for reuse until [`HostPool::evict_idle`] removes them
#[derive(Debug, Clone)]
pub struct HostPool {
    /// Map of host keys to their queues, created on-demand
    hosts: Arc<DashMap<HostKey, Arc<HostQueue>>>,

    /// Defaults for hosts without explicit configuration
    global_config: AdmissionConfig,

    /// Per-host configuration overrides
    host_configs: Arc<HostConfigs>,
}

impl HostPool {
    /// Create a new `HostPool` with the given configuration
    ///
    /// # Examples
    ///
    /// ```
    /// use corral_lib::admission::{AdmissionConfig, HostPool};
    /// use std::collections::HashMap;
    ///
    /// let pool = HostPool::new(AdmissionConfig::default(), HashMap::new());
    /// assert_eq!(pool.active_host_count(), 0);
    /// ```
    #[must_use]
    pub fn new(global_config: AdmissionConfig, host_configs: HostConfigs) -> Self {
        Self {
            hosts: Arc::new(DashMap::new()),
            global_config,
            host_configs: Arc::new(host_configs),
        }
    }

    /// Hand `task` to the queue of `host_key`, creating the queue if needed.
    ///
    /// The map entry stays locked while the task is submitted, so the queue
    /// cannot be evicted between lookup and submission.
    pub fn submit(&self, host_key: HostKey, task: Task) {
        let queue = self
            .hosts
            .entry(host_key.clone())
            .or_insert_with(|| self.create_queue(host_key));
        queue.submit(task);
    }

    fn create_queue(&self, key: HostKey) -> Arc<HostQueue> {
        let max_concurrent = self
            .host_configs
            .get(&key)
            .map_or(self.global_config.concurrency.max(1), |config| {
                config.effective_concurrency(&self.global_config)
            });
        debug!("Creating admission queue for {key} (max {max_concurrent} concurrent)");
        Arc::new(HostQueue::new(key, max_concurrent))
    }

    /// Headers configured for `host_key`, if any
    #[must_use]
    pub fn host_headers(&self, host_key: &HostKey) -> Option<&HeaderMap> {
        self.host_configs
            .get(host_key)
            .map(|config| &config.headers)
            .filter(|headers| !headers.is_empty())
    }

    /// The queue of `host_key`, if it exists
    #[must_use]
    pub fn get(&self, host_key: &HostKey) -> Option<Arc<HostQueue>> {
        self.hosts.get(host_key).map(|queue| Arc::clone(&queue))
    }

    /// Remove every queue which has been idle for at least `idle_for`.
    ///
    /// Returns the number of removed queues. A later request to an evicted
    /// host simply creates a fresh queue.
    pub fn evict_idle(&self, idle_for: Duration) -> usize {
        let before = self.hosts.len();
        self.hosts.retain(|key, queue| {
            let evict = queue.idle_for().is_some_and(|idle| idle >= idle_for);
            if evict {
                debug!("Evicting idle admission queue for {key}");
            }
            !evict
        });
        before.saturating_sub(self.hosts.len())
    }

    /// Get statistics for a specific host
    ///
    /// Returns empty statistics for hosts which have not been contacted yet.
    #[must_use]
    pub fn host_stats(&self, host_key: &HostKey) -> HostStats {
        self.hosts
            .get(host_key)
            .map(|queue| queue.host_stats())
            .unwrap_or_default()
    }

    /// Get statistics for all hosts that currently have a queue
    #[must_use]
    pub fn all_host_stats(&self) -> HostStatsMap {
        self.hosts
            .iter()
            .map(|entry| (entry.key().to_string(), entry.value().host_stats()))
            .collect::<HashMap<_, _>>()
            .into()
    }

    /// Get the number of hosts with a queue
    #[must_use]
    pub fn active_host_count(&self) -> usize {
        self.hosts.len()
    }
}

impl Default for HostPool {
    fn default() -> Self {
        Self::new(AdmissionConfig::default(), HostConfigs::new())
    }
}
