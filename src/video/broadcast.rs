//! Frame Broadcast Buffer
//!
//! Single-slot, latest-frame-wins hand-off between the encode path and every
//! connected viewer.
//!
//! # Semantics
//!
//! - Exactly one frame is retained. Publishing replaces it and bumps the
//!   generation; the previous frame is released once the last viewer still
//!   writing it drops its `Arc`.
//! - Viewers never queue. A viewer that falls behind skips straight to the
//!   newest frame the next time it waits.
//! - Waiting is a monitor-pattern wait on the generation: the condition is
//!   checked before blocking and again after every wakeup, so a publish that
//!   lands between "read generation" and "start waiting" is never missed.
//!
//! Both async (Tokio `Notify`) and blocking (`Condvar`) waiters are supported.
//! `publish` wakes both kinds and never waits on any of them.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;
use tracing::trace;

/// One published, immutable compressed frame
#[derive(Debug)]
pub struct CompressedFrame {
    data: Bytes,
    generation: u64,
}

impl CompressedFrame {
    /// Compressed bytes (a complete JPEG image)
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Byte length of the compressed image
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True for a zero-length payload
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Generation this frame was published as (first publish is 1)
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Debug, Default)]
struct Slot {
    frame: Option<Arc<CompressedFrame>>,
    generation: u64,
}

/// Holds the most recent compressed frame and wakes waiters on publish
#[derive(Debug, Default)]
pub struct FrameBroadcastBuffer {
    slot: Mutex<Slot>,
    condvar: Condvar,
    notify: Notify,
}

impl FrameBroadcastBuffer {
    /// Create an empty buffer (generation 0, no frame)
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `data` as the current frame and wake every waiter
    ///
    /// Returns the new generation. Cost does not depend on how many viewers
    /// are waiting.
    pub fn publish(&self, data: Bytes) -> u64 {
        let (generation, previous) = {
            let mut slot = self.slot.lock();
            slot.generation += 1;
            let frame = Arc::new(CompressedFrame {
                data,
                generation: slot.generation,
            });
            (slot.generation, slot.frame.replace(frame))
        };

        self.condvar.notify_all();
        self.notify.notify_waiters();

        trace!("Published frame generation {}", generation);
        drop(previous);
        generation
    }

    /// Current generation and frame, without waiting
    ///
    /// `(0, None)` until the first publish; never empty again afterwards.
    pub fn snapshot(&self) -> (u64, Option<Arc<CompressedFrame>>) {
        let slot = self.slot.lock();
        (slot.generation, slot.frame.clone())
    }

    /// Current generation (0 before the first publish)
    pub fn generation(&self) -> u64 {
        self.slot.lock().generation
    }

    fn newer_than(&self, last_seen: u64) -> Option<Arc<CompressedFrame>> {
        let slot = self.slot.lock();
        if slot.generation > last_seen {
            slot.frame.clone()
        } else {
            None
        }
    }

    /// Wait until a frame newer than `last_seen` is available and return it
    ///
    /// Pass 0 for "nothing seen yet". Waits without bound.
    pub async fn wait_next(&self, last_seen: u64) -> Arc<CompressedFrame> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a publish in between still wakes us
            notified.as_mut().enable();

            if let Some(frame) = self.newer_than(last_seen) {
                return frame;
            }

            notified.await;
        }
    }

    /// [`wait_next`](Self::wait_next) with a deadline; `None` on timeout
    pub async fn wait_next_timeout(
        &self,
        last_seen: u64,
        timeout: Duration,
    ) -> Option<Arc<CompressedFrame>> {
        tokio::time::timeout(timeout, self.wait_next(last_seen)).await.ok()
    }

    /// Blocking variant of [`wait_next`](Self::wait_next) for non-async threads
    pub fn wait_next_blocking(&self, last_seen: u64) -> Arc<CompressedFrame> {
        let mut slot = self.slot.lock();
        loop {
            if slot.generation > last_seen {
                if let Some(frame) = &slot.frame {
                    return Arc::clone(frame);
                }
            }
            self.condvar.wait(&mut slot);
        }
    }

    /// Blocking wait with a deadline; `None` on timeout
    pub fn wait_next_blocking_timeout(
        &self,
        last_seen: u64,
        timeout: Duration,
    ) -> Option<Arc<CompressedFrame>> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.slot.lock();
        loop {
            if slot.generation > last_seen {
                if let Some(frame) = &slot.frame {
                    return Some(Arc::clone(frame));
                }
            }
            if self.condvar.wait_until(&mut slot, deadline).timed_out() {
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::thread;

    fn frame_of(len: usize, fill: u8) -> Bytes {
        Bytes::from(vec![fill; len])
    }

    #[test]
    fn test_empty_snapshot() {
        let buffer = FrameBroadcastBuffer::new();
        let (generation, frame) = buffer.snapshot();
        assert_eq!(generation, 0);
        assert!(frame.is_none());
    }

    #[test]
    fn test_publish_increments_generation() {
        let buffer = FrameBroadcastBuffer::new();
        assert_eq!(buffer.publish(frame_of(10, 1)), 1);
        assert_eq!(buffer.publish(frame_of(10, 2)), 2);

        let (generation, frame) = buffer.snapshot();
        assert_eq!(generation, 2);
        let frame = frame.unwrap();
        assert_eq!(frame.generation(), 2);
        assert_eq!(frame.data()[0], 2);
    }

    #[test]
    fn test_previous_frame_released_on_publish() {
        let buffer = FrameBroadcastBuffer::new();
        buffer.publish(frame_of(8, 1));
        let (_, first) = buffer.snapshot();
        let first = first.unwrap();
        assert_eq!(Arc::strong_count(&first), 2);

        buffer.publish(frame_of(8, 2));
        assert_eq!(Arc::strong_count(&first), 1);
    }

    #[tokio::test]
    async fn test_two_waiters_see_same_frame() {
        let buffer = Arc::new(FrameBroadcastBuffer::new());
        buffer.publish(frame_of(100, 0xA));

        let a = tokio::spawn({
            let buffer = Arc::clone(&buffer);
            async move { buffer.wait_next(0).await }
        });
        let b = tokio::spawn({
            let buffer = Arc::clone(&buffer);
            async move { buffer.wait_next(0).await }
        });

        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        assert_eq!(a.generation(), 1);
        assert_eq!(b.generation(), 1);
        assert_eq!(a.len(), 100);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_intermediate_frame_dropped() {
        let buffer = FrameBroadcastBuffer::new();
        buffer.publish(frame_of(10, 0xA));
        buffer.publish(frame_of(20, 0xB));

        let frame = buffer.wait_next(0).await;
        assert_eq!(frame.generation(), 2);
        assert_eq!(frame.len(), 20);
        assert_eq!(frame.data()[0], 0xB);
    }

    #[tokio::test]
    async fn test_waiter_woken_by_later_publish() {
        let buffer = Arc::new(FrameBroadcastBuffer::new());
        let waiter = tokio::spawn({
            let buffer = Arc::clone(&buffer);
            async move { buffer.wait_next(0).await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        buffer.publish(frame_of(4, 7));
        let frame = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame.generation(), 1);
    }

    #[tokio::test]
    async fn test_wait_timeout_without_publish() {
        let buffer = FrameBroadcastBuffer::new();
        buffer.publish(frame_of(4, 1));
        let result = buffer.wait_next_timeout(1, Duration::from_millis(20)).await;
        assert!(result.is_none());
    }

    #[test]
    fn test_blocking_waiter_woken_by_publish() {
        let buffer = Arc::new(FrameBroadcastBuffer::new());
        let waiter = thread::spawn({
            let buffer = Arc::clone(&buffer);
            move || buffer.wait_next_blocking(0)
        });

        thread::sleep(Duration::from_millis(20));
        buffer.publish(frame_of(3, 9));
        let frame = waiter.join().unwrap();
        assert_eq!(frame.generation(), 1);
    }

    #[test]
    fn test_blocking_timeout() {
        let buffer = FrameBroadcastBuffer::new();
        assert!(buffer
            .wait_next_blocking_timeout(0, Duration::from_millis(10))
            .is_none());
        buffer.publish(frame_of(3, 9));
        assert!(buffer
            .wait_next_blocking_timeout(0, Duration::from_millis(10))
            .is_some());
    }

    proptest! {
        #[test]
        fn prop_observed_generations_never_decrease(sizes in proptest::collection::vec(1usize..64, 1..40)) {
            let buffer = FrameBroadcastBuffer::new();
            let mut last_seen = 0u64;
            for (i, size) in sizes.iter().enumerate() {
                let published = buffer.publish(frame_of(*size, i as u8));
                prop_assert_eq!(published, i as u64 + 1);

                let frame = buffer.wait_next_blocking(last_seen);
                prop_assert!(frame.generation() > last_seen);
                prop_assert_eq!(frame.generation(), published);
                prop_assert_eq!(frame.len(), *size);
                last_seen = frame.generation();
            }
        }
    }
}
