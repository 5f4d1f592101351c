use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use http::StatusCode;
use serde::Serialize;
use serde::ser::SerializeStruct;

use crate::ErrorKind;

/// Number of recent request times kept for the median
pub const REQUEST_TIME_SAMPLES: usize = 1024;

/// A [`HashMap`] mapping hosts to their [`HostStats`]
#[derive(Debug, Default, Serialize)]
pub struct HostStatsMap(HashMap<String, HostStats>);

impl HostStatsMap {
    /// Sort host statistics by request count (descending order),
    /// ties broken by host name
    #[must_use]
    pub fn sorted(&self) -> Vec<(String, HostStats)> {
        let mut sorted_hosts: Vec<_> = self.0.clone().into_iter().collect();
        sorted_hosts.sort_by(|(a_host, a), (b_host, b)| {
            b.total_requests
                .cmp(&a.total_requests)
                .then_with(|| a_host.cmp(b_host))
        });
        sorted_hosts
    }

    /// Statistics of a single host, if it has been seen
    #[must_use]
    pub fn get(&self, host: &str) -> Option<&HostStats> {
        self.0.get(host)
    }

    /// Number of hosts
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// `true` if no host has been contacted yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<HashMap<String, HostStats>> for HostStatsMap {
    fn from(value: HashMap<String, HostStats>) -> Self {
        Self(value)
    }
}

/// Record and report statistics for a [`crate::admission::HostQueue`]
#[derive(Debug, Clone, Default)]
pub struct HostStats {
    /// Total number of settled transport calls
    pub total_requests: u64,
    /// Number of calls which produced a decoded body
    pub successful_requests: u64,
    /// Number of rate limit responses (429)
    pub rate_limited: u64,
    /// Number of client error responses (4xx, excluding 429)
    pub client_errors: u64,
    /// Number of server error responses (5xx)
    pub server_errors: u64,
    /// Number of calls that failed below HTTP
    pub transport_errors: u64,
    /// Number of successful responses whose body could not be decoded
    pub decode_errors: u64,
    /// Status code counts
    pub status_codes: HashMap<u16, u64>,
    /// The most recent request times, at most [`REQUEST_TIME_SAMPLES`]
    pub request_times: VecDeque<Duration>,
    /// Sum of all request times, for the average
    pub total_request_time: Duration,
    /// Number of buffered tasks dropped because nobody waited for them anymore
    pub cancelled_requests: u64,
    /// Number of tasks that had to wait in the buffer before being admitted
    pub buffered_requests: u64,
    /// Highest number of simultaneously executing tasks observed
    pub peak_active: usize,
    /// Highest number of simultaneously buffered tasks observed
    pub peak_buffered: usize,
}

impl HostStats {
    /// Record a settled call with the status code the server sent (if any)
    pub fn record_response(
        &mut self,
        status: Option<StatusCode>,
        error: Option<&ErrorKind>,
        request_time: Duration,
    ) {
        self.total_requests += 1;
        self.total_request_time += request_time;
        if self.request_times.len() == REQUEST_TIME_SAMPLES {
            self.request_times.pop_front();
        }
        self.request_times.push_back(request_time);

        if let Some(status) = status {
            *self.status_codes.entry(status.as_u16()).or_insert(0) += 1;
        }

        match error {
            None => self.successful_requests += 1,
            Some(ErrorKind::HttpStatus { status, .. }) => match status.as_u16() {
                429 => self.rate_limited += 1,
                400..=499 => self.client_errors += 1,
                500..=599 => self.server_errors += 1,
                _ => {} // Other non-success codes only show up in `status_codes`
            },
            Some(ErrorKind::Decode { .. }) => self.decode_errors += 1,
            Some(_) => self.transport_errors += 1,
        }
    }

    /// Record the admission state right after a task was started or buffered
    pub fn record_admission(&mut self, active: usize, buffered: usize, was_buffered: bool) {
        self.peak_active = self.peak_active.max(active);
        self.peak_buffered = self.peak_buffered.max(buffered);
        if was_buffered {
            self.buffered_requests += 1;
        }
    }

    /// Record a buffered task which was dropped before it started
    pub const fn record_cancellation(&mut self) {
        self.cancelled_requests += 1;
    }

    /// Get median request time over the most recent requests
    #[must_use]
    pub fn median_request_time(&self) -> Option<Duration> {
        if self.request_times.is_empty() {
            return None;
        }

        let mut times: Vec<_> = self.request_times.iter().copied().collect();
        times.sort_unstable();
        let mid = times.len() / 2;

        if times.len().is_multiple_of(2) {
            // Average of two middle values
            Some((times[mid - 1] + times[mid]) / 2)
        } else {
            Some(times[mid])
        }
    }

    /// Get average request time over all requests
    #[must_use]
    pub fn average_request_time(&self) -> Option<Duration> {
        if self.total_requests == 0 {
            return None;
        }

        let nanos = self.total_request_time.as_nanos() / u128::from(self.total_requests);
        #[allow(clippy::cast_possible_truncation)]
        Some(Duration::from_nanos(nanos as u64))
    }

    /// Get the current success rate (0.0 to 1.0)
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            1.0 // Assume success until proven otherwise
        } else {
            #[allow(clippy::cast_precision_loss)]
            let success_rate = self.successful_requests as f64 / self.total_requests as f64;
            success_rate
        }
    }

    /// Get error rate (percentage)
    #[must_use]
    pub fn error_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        (1.0 - self.success_rate()) * 100.0
    }

    /// Get human-readable summary of the stats
    #[must_use]
    pub fn summary(&self) -> String {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let success_pct = (self.success_rate() * 100.0).round() as u64;

        let avg_time = self
            .average_request_time()
            .map_or_else(|| "N/A".to_string(), |d| format!("{:.0}ms", d.as_millis()));

        format!(
            "{} requests ({}% success), avg: {}, peak {} active / {} buffered",
            self.total_requests, success_pct, avg_time, self.peak_active, self.peak_buffered
        )
    }
}

impl Serialize for HostStats {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let median_request_time_ms = self.median_request_time().map(|d| d.as_millis());

        let mut s = serializer.serialize_struct("HostStats", 14)?;
        s.serialize_field("total_requests", &self.total_requests)?;
        s.serialize_field("successful_requests", &self.successful_requests)?;
        s.serialize_field("success_rate", &self.success_rate())?;
        s.serialize_field("rate_limited", &self.rate_limited)?;
        s.serialize_field("client_errors", &self.client_errors)?;
        s.serialize_field("server_errors", &self.server_errors)?;
        s.serialize_field("transport_errors", &self.transport_errors)?;
        s.serialize_field("decode_errors", &self.decode_errors)?;
        s.serialize_field("median_request_time_ms", &median_request_time_ms)?;
        s.serialize_field("buffered_requests", &self.buffered_requests)?;
        s.serialize_field("cancelled_requests", &self.cancelled_requests)?;
        s.serialize_field("peak_active", &self.peak_active)?;
        s.serialize_field("peak_buffered", &self.peak_buffered)?;
        s.serialize_field("status_codes", &self.status_codes)?;
        s.end()
    }
}
