//! PipeWire Capture Feed
//!
//! Pulls raw video frames from the PipeWire node the portal granted us and
//! hands each one, synchronously, to a [`FrameSink`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────┐
//! │  Tokio runtime               │
//! │  capture pipeline ──start──┐ │
//! └────────────────────────────┼─┘
//!                              │ CaptureSource (node id + remote fd)
//! ┌────────────────────────────▼─────────────────────────────┐
//! │  Dedicated PipeWire thread (owns all non-Send types)     │
//! │                                                          │
//! │  MainLoop ─> Context ─> Core ─> Stream                   │
//! │                                   │ process()            │
//! │                                   ▼                      │
//! │                          FrameSink::on_frame(&RawFrame)  │
//! │                          (encode + publish, same thread) │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! PipeWire's Rust bindings are `!Send`, so the main loop, core and stream
//! never leave the thread that created them. The only things crossing the
//! thread boundary are the sink (moved in at start) and a shutdown signal.
//!
//! Encoding runs inside the process callback. A slow encode therefore delays
//! the next dequeue, which is how capture rate adapts to encode cost.

pub mod error;
pub mod frame;

#[cfg(feature = "capture")]
mod buffer;
#[cfg(feature = "capture")]
mod pw_thread;

pub use error::{CaptureError, Result};
pub use frame::{PixelFormat, RawFrame};

#[cfg(feature = "capture")]
pub use pw_thread::CaptureFeed;

/// Consumer of captured frames
///
/// Called on the PipeWire thread for every dequeued buffer. The frame borrows
/// the capture buffer, so implementations must finish with the pixels before
/// returning. Failures are the sink's to handle; there is no error channel
/// back into PipeWire.
pub trait FrameSink: Send + 'static {
    /// Consume one frame
    fn on_frame(&mut self, frame: &RawFrame<'_>);
}

impl<F> FrameSink for F
where
    F: FnMut(&RawFrame<'_>) + Send + 'static,
{
    fn on_frame(&mut self, frame: &RawFrame<'_>) {
        self(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::{Arc, Mutex};

    fn deliver<S: FrameSink>(sink: &mut S, frame: &RawFrame<'_>) {
        sink.on_frame(frame);
    }

    #[test]
    fn test_closure_is_a_frame_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&seen);
        let mut sink = move |frame: &RawFrame<'_>| {
            recorder.lock().unwrap().push((frame.width, frame.height));
        };

        let data = [0u8; 16];
        deliver(&mut sink, &RawFrame::new(&data, 2, 2, 8, PixelFormat::BGRx));

        assert_eq!(*seen.lock().unwrap(), vec![(2, 2)]);
    }
}
