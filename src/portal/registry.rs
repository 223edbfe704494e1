//! One-shot reply registry
//!
//! Maps a request's reply path to the single waiter for it. Entries are
//! removed when they fire, and the path is remembered (a bounded handful) so
//! a duplicate event for it is dropped rather than handed to a later waiter.
//!
//! Events that arrive for a path nobody has registered yet are parked (a
//! bounded handful) so a waiter that learns its real path late, through
//! [`PendingReply::rekey`], still receives them.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, trace};

/// Parked unclaimed events kept at most
const MAX_UNCLAIMED: usize = 8;

/// Recently fired paths remembered at most
const MAX_FIRED: usize = 32;

struct Inner<T> {
    pending: HashMap<String, oneshot::Sender<T>>,
    unclaimed: VecDeque<(String, T)>,
    fired: VecDeque<String>,
}

impl<T> Inner<T> {
    fn mark_fired(&mut self, path: &str) {
        if self.fired.len() >= MAX_FIRED {
            self.fired.pop_front();
        }
        self.fired.push_back(path.to_string());
    }

    fn has_fired(&self, path: &str) -> bool {
        self.fired.iter().any(|p| p == path)
    }
}

/// Registry of outstanding one-shot subscriptions keyed by reply path
pub struct ReplyRegistry<T> {
    inner: Mutex<Inner<T>>,
}

impl<T> Default for ReplyRegistry<T> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner {
                pending: HashMap::new(),
                unclaimed: VecDeque::new(),
                fired: VecDeque::new(),
            }),
        }
    }
}

impl<T: Send + 'static> ReplyRegistry<T> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to the next event on `path`
    ///
    /// Dropping the returned handle before it fires removes the subscription.
    pub fn register(self: &Arc<Self>, path: impl Into<String>) -> PendingReply<T> {
        let path = path.into();
        let (tx, rx) = oneshot::channel();

        let mut inner = self.inner.lock();
        if let Some(reply) = take_unclaimed(&mut inner.unclaimed, &path) {
            inner.mark_fired(&path);
            let _ = tx.send(reply);
        } else {
            inner.pending.insert(path.clone(), tx);
        }
        drop(inner);

        trace!("Registered reply subscription for {}", path);
        PendingReply {
            registry: Arc::clone(self),
            path,
            rx: Some(rx),
        }
    }

    /// Deliver `reply` to the subscriber of `path`
    ///
    /// Returns true when a subscriber was waiting. A repeat event for a path
    /// that already fired is dropped; any other event is parked for a late
    /// [`PendingReply::rekey`].
    pub fn dispatch(&self, path: &str, reply: T) -> bool {
        let mut inner = self.inner.lock();
        match inner.pending.remove(path) {
            Some(tx) => {
                inner.mark_fired(path);
                drop(inner);
                trace!("Dispatching reply for {}", path);
                tx.send(reply).is_ok()
            }
            None if inner.has_fired(path) => {
                debug!("Repeated reply for {}, ignoring it", path);
                false
            }
            None => {
                debug!("Reply for unregistered path {}, parking it", path);
                if inner.unclaimed.len() >= MAX_UNCLAIMED {
                    inner.unclaimed.pop_front();
                }
                inner.unclaimed.push_back((path.to_string(), reply));
                false
            }
        }
    }

    /// Number of subscriptions still waiting
    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending.len()
    }

    fn rekey(&self, old_path: &str, new_path: &str) {
        let mut inner = self.inner.lock();
        let Some(tx) = inner.pending.remove(old_path) else {
            return;
        };
        if let Some(reply) = take_unclaimed(&mut inner.unclaimed, new_path) {
            inner.mark_fired(new_path);
            let _ = tx.send(reply);
        } else {
            inner.pending.insert(new_path.to_string(), tx);
        }
    }

    fn cancel(&self, path: &str) {
        self.inner.lock().pending.remove(path);
    }
}

fn take_unclaimed<T>(unclaimed: &mut VecDeque<(String, T)>, path: &str) -> Option<T> {
    let index = unclaimed.iter().position(|(p, _)| p == path)?;
    unclaimed.remove(index).map(|(_, reply)| reply)
}

/// A registered, not yet fired subscription
pub struct PendingReply<T: Send + 'static> {
    registry: Arc<ReplyRegistry<T>>,
    path: String,
    rx: Option<oneshot::Receiver<T>>,
}

impl<T: Send + 'static> PendingReply<T> {
    /// Path this subscription currently listens on
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Move the subscription to a different reply path
    pub fn rekey(&mut self, new_path: &str) {
        if new_path == self.path {
            return;
        }
        debug!("Reply path moved from {} to {}", self.path, new_path);
        self.registry.rekey(&self.path, new_path);
        self.path = new_path.to_string();
    }

    /// Wait for the event; `None` if the registry went away first
    pub async fn wait(mut self) -> Option<T> {
        let rx = self.rx.take()?;
        rx.await.ok()
    }
}

impl<T: Send + 'static> Drop for PendingReply<T> {
    fn drop(&mut self) {
        self.registry.cancel(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dispatch_reaches_subscriber() {
        let registry = Arc::new(ReplyRegistry::new());
        let pending = registry.register("/request/a");
        assert_eq!(registry.pending_count(), 1);

        assert!(registry.dispatch("/request/a", 7u32));
        assert_eq!(pending.wait().await, Some(7));
        assert_eq!(registry.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_second_event_ignored() {
        let registry = Arc::new(ReplyRegistry::new());
        let pending = registry.register("/request/a");

        assert!(registry.dispatch("/request/a", 1u32));
        assert!(!registry.dispatch("/request/a", 2u32));
        assert_eq!(pending.wait().await, Some(1));
        assert!(registry.inner.lock().unclaimed.is_empty());
    }

    #[tokio::test]
    async fn test_repeated_event_not_delivered_to_later_waiter() {
        let registry = Arc::new(ReplyRegistry::new());
        let first = registry.register("/request/a");
        assert!(registry.dispatch("/request/a", 1u32));
        assert_eq!(first.wait().await, Some(1));

        // Repeat arrives after the waiter is gone
        assert!(!registry.dispatch("/request/a", 2u32));

        let mut late = registry.register("/request/other");
        late.rekey("/request/a");
        assert_eq!(registry.pending_count(), 1);
        assert!(registry.dispatch("/request/a", 3u32));
        assert_eq!(late.wait().await, Some(3));
    }

    #[tokio::test]
    async fn test_repeat_of_parked_event_is_dropped() {
        let registry = Arc::new(ReplyRegistry::new());
        assert!(!registry.dispatch("/request/early", 1u32));
        let pending = registry.register("/request/early");
        assert_eq!(pending.wait().await, Some(1));

        assert!(!registry.dispatch("/request/early", 2u32));
        assert!(registry.inner.lock().unclaimed.is_empty());
    }

    #[tokio::test]
    async fn test_rekey_moves_subscription() {
        let registry = Arc::new(ReplyRegistry::new());
        let mut pending = registry.register("/request/predicted");
        pending.rekey("/request/actual");

        assert!(!registry.dispatch("/request/predicted", 1u32));
        assert!(registry.dispatch("/request/actual", 2u32));
        assert_eq!(pending.wait().await, Some(2));
    }

    #[tokio::test]
    async fn test_rekey_claims_event_that_arrived_early() {
        let registry = Arc::new(ReplyRegistry::new());
        let mut pending = registry.register("/request/predicted");

        assert!(!registry.dispatch("/request/actual", 5u32));
        pending.rekey("/request/actual");

        assert_eq!(registry.pending_count(), 0);
        assert_eq!(pending.wait().await, Some(5));
    }

    #[test]
    fn test_drop_cancels_subscription() {
        let registry = Arc::new(ReplyRegistry::<u32>::new());
        {
            let _pending = registry.register("/request/a");
            assert_eq!(registry.pending_count(), 1);
        }
        assert_eq!(registry.pending_count(), 0);
    }

    #[test]
    fn test_unclaimed_events_bounded() {
        let registry = Arc::new(ReplyRegistry::<u32>::new());
        for i in 0..20 {
            registry.dispatch(&format!("/request/{}", i), i);
        }
        assert_eq!(registry.inner.lock().unclaimed.len(), MAX_UNCLAIMED);
    }
}
