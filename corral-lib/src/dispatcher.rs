//! The composition root tying deduplication and admission together.
//!
//! This module defines two structs, [`Dispatcher`] and [`DispatcherBuilder`].
//! `Dispatcher` accepts requests and hands back decoded bodies.
//! `DispatcherBuilder` exposes the configuration of the admission queues and
//! of the default HTTP transport.
#![allow(clippy::module_name_repetitions)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use http::HeaderMap;
use log::debug;
use serde::Serialize;
use typed_builder::TypedBuilder;
use url::Url;

use crate::admission::{
    AdmissionConfig, Completion, DEFAULT_CONCURRENCY, HostConfigs, HostKey, HostPool, HostStatsMap,
    Task,
};
use crate::dedup::{Deduplicator, PendingCall, Settle};
use crate::transport::{ReqwestTransport, Transport};
use crate::{Body, ErrorKind, RequestOptions, Result};

/// Default user agent, `corral/<PKG_VERSION>`.
pub const DEFAULT_USER_AGENT: &str = concat!("corral/", env!("CARGO_PKG_VERSION"));

/// Builder for [`Dispatcher`].
///
/// See crate-level documentation for usage example.
#[derive(TypedBuilder, Debug, Clone)]
#[builder(field_defaults(default, setter(into)))]
#[builder(builder_method(doc = "
Create a builder for building `DispatcherBuilder`.

On the builder call, call methods with same name as its fields to set their values.

Finally, call `.build()` to create the instance of `DispatcherBuilder`.
"))]
pub struct DispatcherBuilder {
    /// Maximum number of requests executing concurrently against a single
    /// host. Everything beyond is buffered in arrival order.
    ///
    /// Values below one are treated as one.
    #[builder(default = DEFAULT_CONCURRENCY)]
    concurrency: usize,

    /// Per-host overrides for concurrency and headers.
    hosts: HostConfigs,

    /// User-agent used by the default transport.
    #[builder(default = String::from(DEFAULT_USER_AGENT))]
    user_agent: String,

    /// Response timeout per request of the default transport.
    ///
    /// A timeout settles the request with [`ErrorKind::Transport`].
    timeout: Option<Duration>,

    /// Headers sent with every request of the default transport.
    custom_headers: HeaderMap,

    /// Accept invalid TLS certificates.
    allow_insecure: bool,
}

impl Default for DispatcherBuilder {
    #[inline]
    fn default() -> Self {
        Self::builder().build()
    }
}

impl DispatcherBuilder {
    /// Instantiates a [`Dispatcher`] on top of a [`ReqwestTransport`].
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::BuildClient`] if the user agent is not a valid
    /// header value or the `reqwest` client cannot be created.
    /// See [here](https://docs.rs/reqwest/latest/reqwest/struct.ClientBuilder.html#errors).
    pub fn dispatcher(self) -> Result<Dispatcher> {
        let builder = reqwest::ClientBuilder::new()
            .gzip(true)
            .user_agent(self.user_agent.as_str())
            .default_headers(self.custom_headers.clone())
            .danger_accept_invalid_certs(self.allow_insecure);

        let client = (match self.timeout {
            Some(t) => builder.timeout(t),
            None => builder,
        })
        .build()?;

        Ok(self.dispatcher_with(ReqwestTransport::new(client)))
    }

    /// Instantiates a [`Dispatcher`] on top of a custom [`Transport`].
    ///
    /// Transport related settings (user agent, timeout, custom headers,
    /// insecure mode) are ignored; they only configure the default transport.
    #[must_use]
    pub fn dispatcher_with<T>(self, transport: T) -> Dispatcher
    where
        T: Transport + 'static,
    {
        let admission = AdmissionConfig {
            concurrency: self.concurrency.max(1),
        };
        Dispatcher {
            transport: Arc::new(transport),
            inflight: Arc::new(Deduplicator::new()),
            hosts: HostPool::new(admission, self.hosts),
            counters: Arc::new(Counters::default()),
        }
    }
}

/// Counters of a [`Dispatcher`], see [`Dispatcher::stats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    /// Calls to [`Dispatcher::request`]
    pub requests: u64,
    /// Calls which joined a request already in flight
    pub coalesced: u64,
    /// Transport calls started
    pub transport_calls: u64,
    /// Distinct requests currently in flight
    pub in_flight: usize,
}

#[derive(Debug, Default)]
struct Counters {
    requests: AtomicU64,
    coalesced: AtomicU64,
    transport_calls: AtomicU64,
}

/// Sends requests with at most one network call per in-flight URL and
/// bounded concurrency per host.
///
/// Cloning is cheap and every clone shares the same state, so a single
/// instance can be created at startup and handed to every part of the
/// application.
///
/// See [`DispatcherBuilder`] for the available configuration.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    inflight: Arc<Deduplicator>,
    hosts: HostPool,
    counters: Arc<Counters>,
}

impl Dispatcher {
    /// A dispatcher with default settings on top of `transport`
    #[must_use]
    pub fn new<T>(transport: T) -> Self
    where
        T: Transport + 'static,
    {
        DispatcherBuilder::default().dispatcher_with(transport)
    }

    /// Send a `GET` request for `url` and decode the JSON body.
    ///
    /// Requests are identified by `url` exactly as given, without any
    /// normalization. While a request for `url` is in flight, further calls
    /// with the same `url` join it instead of issuing another network call,
    /// and receive the very same result. Their `options` are ignored.
    ///
    /// Once settled, the request is forgotten: the next call for `url`
    /// performs a fresh network call, also after a failure.
    ///
    /// Dropping the returned future does not cancel a network call which has
    /// already started. A call still waiting for a free slot is skipped once
    /// no caller waits for it anymore.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::InvalidUrl`] or [`ErrorKind::InvalidUrlHost`] if `url`
    ///   cannot be scheduled. Nothing is registered in that case.
    /// - [`ErrorKind::Transport`] if the network call failed.
    /// - [`ErrorKind::HttpStatus`] for a non-success status code.
    /// - [`ErrorKind::Decode`] if the body is not valid JSON.
    /// - [`ErrorKind::Abandoned`] if the call was torn down before settling.
    pub async fn request(&self, url: &str, options: RequestOptions) -> Result<Body> {
        self.counters.requests.fetch_add(1, Ordering::Relaxed);

        // Validate before touching any shared state
        let parsed = Url::parse(url).map_err(|source| ErrorKind::InvalidUrl {
            url: url.to_string(),
            source,
        })?;
        let host_key = HostKey::try_from(&parsed).map_err(|_| ErrorKind::InvalidUrlHost {
            url: url.to_string(),
        })?;

        let mut settle = None;
        let (call, _) = self.inflight.get_or_create(url, || {
            let (call, handle) = PendingCall::channel(url);
            settle = Some(handle);
            call
        });

        match settle {
            Some(settle) => self.schedule(host_key, parsed, url, options, settle),
            None => {
                self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
            }
        }

        call.await
    }

    /// Queue the network call for a freshly registered request
    fn schedule(
        &self,
        host_key: HostKey,
        url: Url,
        fingerprint: &str,
        mut options: RequestOptions,
        settle: Settle,
    ) {
        let settle = settle.remove_on_settle(Arc::clone(&self.inflight), fingerprint);
        if let Some(headers) = self.hosts.host_headers(&host_key) {
            options.merge_defaults(headers);
        }

        let transport = Arc::clone(&self.transport);
        let counters = Arc::clone(&self.counters);
        let label = fingerprint.to_string();
        let job = async move {
            counters.transport_calls.fetch_add(1, Ordering::Relaxed);
            match transport.send(&url, &options).await {
                Ok(response) => Completion {
                    status: Some(response.status),
                    result: response.into_body(&label),
                },
                Err(e) => Completion {
                    status: None,
                    result: Err(e),
                },
            }
        };

        debug!("Scheduling {fingerprint} on {host_key}");
        self.hosts.submit(host_key, Task::new(fingerprint, job, settle));
    }

    /// Snapshot of the request counters
    #[must_use]
    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            requests: self.counters.requests.load(Ordering::Relaxed),
            coalesced: self.counters.coalesced.load(Ordering::Relaxed),
            transport_calls: self.counters.transport_calls.load(Ordering::Relaxed),
            in_flight: self.in_flight(),
        }
    }

    /// Statistics of every host with an admission queue
    #[must_use]
    pub fn host_stats(&self) -> HostStatsMap {
        self.hosts.all_host_stats()
    }

    /// Number of distinct requests currently in flight
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inflight.len()
    }

    /// The per-host admission queues
    #[must_use]
    pub const fn hosts(&self) -> &HostPool {
        &self.hosts
    }

    /// Drop the admission queues of hosts which have been idle for at least
    /// `idle_for`. Returns the number of dropped queues.
    ///
    /// Queues are otherwise kept for the lifetime of the dispatcher.
    pub fn evict_idle_hosts(&self, idle_for: Duration) -> usize {
        self.hosts.evict_idle(idle_for)
    }
}
