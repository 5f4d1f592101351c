use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures::FutureExt;
use futures::future::BoxFuture;
use http::StatusCode;
use log::{debug, trace};

use super::key::HostKey;
use super::stats::HostStats;
use crate::dedup::Settle;
use crate::{Body, Result};

/// What a [`Task`]'s job reports back once the transport call is done
#[derive(Debug)]
pub struct Completion {
    /// The status code sent by the server, if the call got that far
    pub status: Option<StatusCode>,
    /// The outcome handed to every waiter
    pub result: Result<Body>,
}

/// A unit of work for a [`HostQueue`]: the (not yet started) transport call
/// and the handle which settles its waiters.
pub struct Task {
    fingerprint: String,
    job: BoxFuture<'static, Completion>,
    settle: Settle,
}

impl Task {
    /// Create a task. `job` is not polled before the task is admitted.
    pub fn new<F>(fingerprint: impl Into<String>, job: F, settle: Settle) -> Self
    where
        F: Future<Output = Completion> + Send + 'static,
    {
        Self {
            fingerprint: fingerprint.into(),
            job: job.boxed(),
            settle,
        }
    }

    /// The fingerprint of the request this task performs
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Discard the task if none of its callers is waiting anymore,
    /// see [`Settle::cancel_if_unobserved`].
    ///
    /// Returns the task if it still has to run.
    fn unless_unobserved(self) -> Option<Self> {
        let Self {
            fingerprint,
            job,
            settle,
        } = self;
        match settle.cancel_if_unobserved() {
            Ok(()) => None,
            Err(settle) => Some(Self {
                fingerprint,
                job,
                settle,
            }),
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct QueueState {
    /// Tasks whose job is currently being polled
    active: usize,
    /// Tasks waiting for a free slot, in arrival order
    waiting: VecDeque<Task>,
    /// Set whenever the queue runs empty
    idle_since: Option<Instant>,
}

/// Admission queue for a single host.
///
/// At most `max_concurrent` tasks execute at any time; everything beyond
/// that is buffered and admitted in strict arrival order. A finishing task
/// hands its slot directly to the head of the buffer, so a newly submitted
/// task can never overtake one which is already waiting.
#[derive(Debug)]
pub struct HostQueue {
    /// The host this queue admits requests for
    pub key: HostKey,

    /// Fixed for the lifetime of the queue
    max_concurrent: usize,

    state: Mutex<QueueState>,

    /// Request statistics for this host
    stats: Mutex<HostStats>,
}

impl HostQueue {
    /// Create an idle queue. A limit of zero is raised to one.
    #[must_use]
    pub fn new(key: HostKey, max_concurrent: usize) -> Self {
        Self {
            key,
            max_concurrent: max_concurrent.max(1),
            state: Mutex::new(QueueState {
                active: 0,
                waiting: VecDeque::new(),
                idle_since: Some(Instant::now()),
            }),
            stats: Mutex::new(HostStats::default()),
        }
    }

    /// Start `task` right away if a slot is free, otherwise buffer it.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn submit(self: &Arc<Self>, task: Task) {
        let admitted = {
            let mut state = self.state();
            if state.active < self.max_concurrent && state.waiting.is_empty() {
                state.active += 1;
                state.idle_since = None;
                self.stats()
                    .record_admission(state.active, state.waiting.len(), false);
                debug!(
                    "Host {} starting {} ({}/{} slots busy)",
                    self.key, task.fingerprint, state.active, self.max_concurrent
                );
                Some(task)
            } else {
                debug!(
                    "Host {} buffering {} ({} already waiting)",
                    self.key,
                    task.fingerprint,
                    state.waiting.len()
                );
                state.waiting.push_back(task);
                self.stats()
                    .record_admission(state.active, state.waiting.len(), true);
                None
            }
        };

        if let Some(task) = admitted {
            self.start(task);
        }
    }

    fn start(self: &Arc<Self>, task: Task) {
        let queue = Arc::clone(self);
        tokio::spawn(async move { queue.run(task).await });
    }

    async fn run(self: Arc<Self>, task: Task) {
        // Frees the slot even if the job panics
        let slot = Slot(&self);
        let Task {
            fingerprint,
            job,
            settle,
        } = task;

        let started = Instant::now();
        let Completion { status, result } = job.await;
        let elapsed = started.elapsed();

        trace!(
            "Host {} finished {fingerprint} after {}ms (ok: {})",
            self.key,
            elapsed.as_millis(),
            result.is_ok()
        );
        self.stats()
            .record_response(status, result.as_ref().err(), elapsed);

        drop(slot);
        settle.settle(result);
    }

    /// Hand the slot of a finished task to the next buffered one,
    /// or give it back if nothing is waiting.
    ///
    /// Buffered tasks nobody waits for anymore are dropped on the way.
    fn release(self: &Arc<Self>) {
        let next = {
            let mut state = self.state();
            loop {
                let Some(candidate) = state.waiting.pop_front() else {
                    state.active = state.active.saturating_sub(1);
                    if state.active == 0 {
                        state.idle_since = Some(Instant::now());
                    }
                    break None;
                };

                let fingerprint = candidate.fingerprint.clone();
                if let Some(next) = candidate.unless_unobserved() {
                    self.stats()
                        .record_admission(state.active, state.waiting.len(), false);
                    break Some(next);
                }
                debug!("Host {} dropping {fingerprint}, nobody is waiting for it", self.key);
                self.stats().record_cancellation();
            }
        };

        if let Some(next) = next {
            debug!("Host {} admitting buffered {}", self.key, next.fingerprint);
            self.start(next);
        }
    }

    /// Maximum number of concurrently executing tasks
    #[must_use]
    pub const fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Number of tasks currently executing
    #[must_use]
    pub fn active(&self) -> usize {
        self.state().active
    }

    /// Number of tasks waiting for a slot
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.state().waiting.len()
    }

    /// How long the queue has had nothing to do,
    /// `None` while tasks are running or buffered
    #[must_use]
    pub fn idle_for(&self) -> Option<Duration> {
        let state = self.state();
        if state.active > 0 || !state.waiting.is_empty() {
            return None;
        }
        state.idle_since.map(|since| since.elapsed())
    }

    /// Get host statistics
    #[must_use]
    pub fn host_stats(&self) -> HostStats {
        self.stats().clone()
    }

    // Nothing panics while holding these locks, but a panicking job must not
    // take the whole host down with it
    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stats(&self) -> MutexGuard<'_, HostStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// An occupied execution slot of a [`HostQueue`]
struct Slot<'a>(&'a Arc<HostQueue>);

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        self.0.release();
    }
}
