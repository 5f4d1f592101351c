//! Collapse identical concurrent requests into a single network call.
//!
//! A request is identified by its *fingerprint*, which is the URL exactly as
//! given by the caller. The first caller for a fingerprint creates a
//! [`PendingCall`] and receives the [`Settle`] handle that resolves it; every
//! later caller for the same fingerprint gets a clone of the same
//! [`PendingCall`] until the entry is removed again.
//!
//! # Implementation Details
//!
//! A [`PendingCall`] is a [`Shared`] wrapper around the receiving half of a
//! [`oneshot`] channel, so it can be awaited by any number of waiters and all
//! of them observe the very same value. The map itself is a [`DashMap`], whose
//! entry API makes the check-then-insert a single atomic step.
//!
//! A [`Settle`] handle can carry an [`InFlightEntry`] guard which removes the
//! fingerprint from the map *before* the result is published. Should the
//! handle be dropped without settling (runtime shutdown, panicking transport),
//! the guard still removes the entry and all waiters observe
//! [`ErrorKind::Abandoned`].
//!
//! A call whose only remaining handle is the one stored in the map has no
//! waiters left. [`Settle::cancel_if_unobserved`] drops such a call before
//! its network request is started.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use log::{debug, trace, warn};
use tokio::sync::oneshot;

use crate::{Body, ErrorKind, Result};

/// A shared, multi-waiter future resolving to the outcome of one request.
///
/// Cloning is cheap; every clone resolves to the same `Result`.
#[derive(Clone)]
pub struct PendingCall(Shared<BoxFuture<'static, Result<Body>>>);

impl PendingCall {
    /// Create a new unresolved call and the handle to resolve it.
    ///
    /// `url` is only used to describe the call in case the handle is dropped
    /// without settling.
    #[must_use]
    pub fn channel(url: &str) -> (Self, Settle) {
        let (sender, receiver) = oneshot::channel();
        let url = url.to_string();
        let abandoned = url.clone();
        let future = receiver
            .map(move |received| {
                received.unwrap_or_else(|_| Err(ErrorKind::Abandoned { url: abandoned }))
            })
            .boxed()
            .shared();

        let settle = Settle {
            url,
            sender: Some(sender),
            entry: None,
        };
        (Self(future), settle)
    }

    /// The result, if the call has already settled
    #[must_use]
    pub fn peek(&self) -> Option<&Result<Body>> {
        self.0.peek()
    }

    /// Number of live handles to this call, including the one stored in the
    /// [`Deduplicator`]. `None` once the call has settled.
    #[must_use]
    pub fn handle_count(&self) -> Option<usize> {
        self.0.strong_count()
    }

    /// `true` if both values wait for the same underlying call
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.0.ptr_eq(&other.0)
    }
}

impl Future for PendingCall {
    type Output = Result<Body>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.0.poll_unpin(cx)
    }
}

impl fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCall")
            .field("settled", &self.peek().is_some())
            .finish()
    }
}

/// The single-use handle which resolves a [`PendingCall`].
#[derive(Debug)]
pub struct Settle {
    url: String,
    sender: Option<oneshot::Sender<Result<Body>>>,
    entry: Option<InFlightEntry>,
}

impl Settle {
    /// Remove `fingerprint` from `inflight` as part of settling,
    /// or when this handle is dropped unsettled.
    #[must_use]
    pub fn remove_on_settle(mut self, inflight: Arc<Deduplicator>, fingerprint: &str) -> Self {
        self.entry = Some(InFlightEntry {
            inflight,
            fingerprint: fingerprint.to_string(),
            armed: true,
        });
        self
    }

    /// Drop the call if nobody is waiting for it anymore.
    ///
    /// Succeeds only for a handle registered through
    /// [`Settle::remove_on_settle`] whose map entry is the last handle to the
    /// call. The entry is removed atomically, so no new caller can join the
    /// cancelled call. Otherwise the handle is returned unchanged.
    pub fn cancel_if_unobserved(mut self) -> std::result::Result<(), Self> {
        let removed = self
            .entry
            .as_ref()
            .is_some_and(|entry| entry.inflight.remove_unobserved(&entry.fingerprint));
        if !removed {
            return Err(self);
        }

        // A new call for the same fingerprint may be registered by now
        if let Some(entry) = self.entry.as_mut() {
            entry.armed = false;
        }
        self.sender = None;
        Ok(())
    }

    /// Publish the result to every waiter.
    ///
    /// The dedup entry (if any) is removed first, so a waiter which observes
    /// the result and immediately asks again triggers a fresh call.
    pub fn settle(mut self, result: Result<Body>) {
        drop(self.entry.take());
        if let Some(sender) = self.sender.take() {
            // Nobody listening is fine: every waiter went away
            let _ = sender.send(result);
        }
    }
}

impl Drop for Settle {
    fn drop(&mut self) {
        if self.sender.is_some() {
            warn!("Request to {} was abandoned before it settled", self.url);
        }
        // The entry goes first, waiters are woken when the sender drops
        drop(self.entry.take());
    }
}

/// RAII guard removing a fingerprint from the [`Deduplicator`] on drop.
#[derive(Debug)]
pub struct InFlightEntry {
    inflight: Arc<Deduplicator>,
    fingerprint: String,
    armed: bool,
}

impl Drop for InFlightEntry {
    fn drop(&mut self) {
        if self.armed {
            self.inflight.remove(&self.fingerprint);
        }
    }
}

/// Maps request fingerprints to the in-flight call for that exact request.
#[derive(Debug, Default)]
pub struct Deduplicator {
    calls: DashMap<String, PendingCall>,
}

impl Deduplicator {
    /// Create an empty deduplicator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the call registered for `fingerprint`, or register the one
    /// produced by `factory`.
    ///
    /// The boolean is `true` when `factory` was invoked, i.e. the caller is
    /// responsible for actually performing the request. Lookup and insertion
    /// happen under the same map lock, so two concurrent callers can never
    /// both see a miss.
    pub fn get_or_create<F>(&self, fingerprint: &str, factory: F) -> (PendingCall, bool)
    where
        F: FnOnce() -> PendingCall,
    {
        match self.calls.entry(fingerprint.to_string()) {
            Entry::Occupied(entry) => {
                debug!("Joining in-flight request for {fingerprint}");
                (entry.get().clone(), false)
            }
            Entry::Vacant(entry) => {
                trace!("Registering new request for {fingerprint}");
                let call = factory();
                entry.insert(call.clone());
                (call, true)
            }
        }
    }

    /// Remove the entry for `fingerprint`. Removing a missing entry is a no-op.
    ///
    /// Returns `true` if an entry was removed.
    pub fn remove(&self, fingerprint: &str) -> bool {
        self.calls.remove(fingerprint).is_some()
    }

    /// Remove the entry for `fingerprint` if the map holds the only handle to
    /// its call, i.e. every caller has given up on it.
    ///
    /// Returns `true` if an entry was removed.
    pub fn remove_unobserved(&self, fingerprint: &str) -> bool {
        self.calls
            .remove_if(fingerprint, |_, call| call.handle_count() == Some(1))
            .is_some()
    }

    /// `true` if a call for `fingerprint` is currently in flight
    #[must_use]
    pub fn contains(&self, fingerprint: &str) -> bool {
        self.calls.contains_key(fingerprint)
    }

    /// Number of calls currently in flight
    #[must_use]
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    /// `true` if nothing is in flight
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn body(value: serde_json::Value) -> Result<Body> {
        Ok(Arc::new(value))
    }

    #[tokio::test]
    async fn test_all_waiters_observe_the_same_value() {
        let (call, settle) = PendingCall::channel("https://example.com");
        let first = call.clone();
        let second = call.clone();

        settle.settle(body(json!({"answer": 42})));

        let a = first.await.unwrap();
        let b = second.await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(*a, json!({"answer": 42}));
        assert!(call.peek().is_some());
    }

    #[tokio::test]
    async fn test_dropped_handle_abandons_waiters() {
        let (call, settle) = PendingCall::channel("https://example.com");
        drop(settle);

        let error = call.await.unwrap_err();
        assert_eq!(
            error,
            ErrorKind::Abandoned {
                url: "https://example.com".into()
            }
        );
    }

    #[test]
    fn test_get_or_create_only_creates_once() {
        let dedup = Deduplicator::new();
        let created = AtomicUsize::new(0);
        let mut handles = Vec::new();

        let factory = || {
            created.fetch_add(1, Ordering::SeqCst);
            let (call, settle) = PendingCall::channel("a");
            handles.push(settle);
            call
        };
        let (first, is_new) = dedup.get_or_create("a", factory);
        assert!(is_new);

        let (second, is_new) = dedup.get_or_create("a", || unreachable!("entry exists"));
        assert!(!is_new);
        assert!(first.ptr_eq(&second));
        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert_eq!(dedup.len(), 1);
    }

    #[test]
    fn test_fingerprint_is_verbatim() {
        let dedup = Deduplicator::new();
        let mut handles = Vec::new();

        for url in [
            "https://example.com/a?x=1&y=2",
            "https://example.com/a?y=2&x=1",
            "https://example.com/a/",
            "https://EXAMPLE.com/a",
        ] {
            let (_, is_new) = dedup.get_or_create(url, || {
                let (call, settle) = PendingCall::channel(url);
                handles.push(settle);
                call
            });
            assert!(is_new, "{url} must not be merged with another spelling");
        }
        assert_eq!(dedup.len(), 4);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dedup = Deduplicator::new();
        let (call, _settle) = PendingCall::channel("a");
        dedup.get_or_create("a", || call);

        assert!(dedup.contains("a"));
        assert!(dedup.remove("a"));
        assert!(!dedup.remove("a"));
        assert!(dedup.is_empty());
    }

    #[tokio::test]
    async fn test_entry_removed_before_result_is_visible() {
        let dedup = Arc::new(Deduplicator::new());
        let mut settle = None;
        let (call, _) = dedup.get_or_create("a", || {
            let (call, handle) = PendingCall::channel("a");
            settle = Some(handle);
            call
        });
        let settle = settle.unwrap().remove_on_settle(Arc::clone(&dedup), "a");

        let observer = {
            let dedup = Arc::clone(&dedup);
            tokio::spawn(async move {
                let result = call.await;
                (result, dedup.contains("a"))
            })
        };

        settle.settle(body(json!(null)));
        let (result, still_registered) = observer.await.unwrap();
        assert!(result.is_ok());
        assert!(!still_registered);
    }

    #[test]
    fn test_remove_unobserved_keeps_calls_with_waiters() {
        let dedup = Arc::new(Deduplicator::new());
        let (call, settle) = PendingCall::channel("a");
        dedup.get_or_create("a", || call.clone());
        let settle = settle.remove_on_settle(Arc::clone(&dedup), "a");

        // `call` is still held, so somebody is waiting
        let settle = settle.cancel_if_unobserved().unwrap_err();
        assert!(dedup.contains("a"));

        drop(call);
        assert!(settle.cancel_if_unobserved().is_ok());
        assert!(dedup.is_empty());
    }

    #[test]
    fn test_cancelled_call_leaves_new_registration_alone() {
        let dedup = Arc::new(Deduplicator::new());
        let (call, settle) = PendingCall::channel("a");
        dedup.get_or_create("a", || call);
        let settle = settle.remove_on_settle(Arc::clone(&dedup), "a");
        assert!(settle.cancel_if_unobserved().is_ok());

        // A later caller registers a fresh call for the same fingerprint
        let (fresh, _fresh_settle) = PendingCall::channel("a");
        let (_, is_new) = dedup.get_or_create("a", || fresh);
        assert!(is_new);
        assert!(dedup.contains("a"));
    }

    #[test]
    fn test_unregistered_handle_is_never_cancelled() {
        let (call, settle) = PendingCall::channel("a");
        drop(call);
        let settle = settle.cancel_if_unobserved().unwrap_err();
        settle.settle(body(json!(null)));
    }

    #[tokio::test]
    async fn test_abandoned_handle_still_cleans_up() {
        let dedup = Arc::new(Deduplicator::new());
        let (call, settle) = PendingCall::channel("a");
        dedup.get_or_create("a", || call.clone());

        drop(settle.remove_on_settle(Arc::clone(&dedup), "a"));

        assert!(dedup.is_empty());
        assert!(matches!(call.await, Err(ErrorKind::Abandoned { .. })));
    }
}
