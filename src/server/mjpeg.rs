//! MJPEG multipart streaming
//!
//! One [`MjpegStreamer`] per viewer. It yields every frame newer than the
//! last one it handed out, each as a self-delimited part with an exact
//! `Content-Length`, and [`multipart_response`] wraps that sequence in the
//! streaming response.
//!
//! Wire format per part:
//!
//! ```text
//! --myboundary\r\n
//! Content-Type: image/jpeg\r\n
//! Content-Length: <N>\r\n
//! \r\n
//! <N bytes of JPEG>\r\n
//! ```

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::{BufMut, Bytes, BytesMut};
use futures_util::stream::{self, Stream};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::video::{CompressedFrame, FrameBroadcastBuffer};

/// Boundary token declared in the response header and opening every part
pub const BOUNDARY: &str = "--myboundary";

/// `Content-Type` of the stream response
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=--myboundary";

/// `Cache-Control` of the stream response
pub const CACHE_CONTROL: &str = "no-cache, private";

/// `Pragma` of the stream response
pub const PRAGMA: &str = "no-cache";

/// Header of one multipart part carrying `len` bytes of JPEG
pub fn part_header(len: usize) -> String {
    format!(
        "{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        BOUNDARY, len
    )
}

/// One complete part: header, JPEG bytes, trailing CRLF
pub fn part(frame: &CompressedFrame) -> Bytes {
    let header = part_header(frame.len());
    let mut buf = BytesMut::with_capacity(header.len() + frame.len() + 2);
    buf.put_slice(header.as_bytes());
    buf.put_slice(frame.data());
    buf.put_slice(b"\r\n");
    buf.freeze()
}

/// Streaming `200 OK` whose body is `parts`, sent as they arrive
pub fn multipart_response<S>(parts: S) -> Response
where
    S: Stream<Item = Result<Bytes, Infallible>> + Send + 'static,
{
    (
        StatusCode::OK,
        [
            (header::CACHE_CONTROL, CACHE_CONTROL),
            (header::PRAGMA, PRAGMA),
            (header::CONTENT_TYPE, CONTENT_TYPE),
            (header::CONNECTION, "close"),
        ],
        Body::from_stream(parts),
    )
        .into_response()
}

/// Turns the frames of a [`FrameBroadcastBuffer`] into parts for one viewer
pub struct MjpegStreamer {
    buffer: Arc<FrameBroadcastBuffer>,
    last_seen: u64,
    frames_sent: u64,
    wait_timeout: Option<Duration>,
}

impl MjpegStreamer {
    /// Streamer that has not seen any frame yet
    pub fn new(buffer: Arc<FrameBroadcastBuffer>) -> Self {
        Self {
            buffer,
            last_seen: 0,
            frames_sent: 0,
            wait_timeout: None,
        }
    }

    /// Resend the latest frame whenever nothing new arrives for `timeout`
    ///
    /// `None` (the default) waits for a new frame indefinitely.
    pub fn with_wait_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.wait_timeout = timeout;
        self
    }

    /// Generation of the last frame handed out
    pub fn last_seen(&self) -> u64 {
        self.last_seen
    }

    /// Parts handed out so far
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// Wait for the next frame and frame it as one part
    pub async fn next_part(&mut self) -> Bytes {
        let frame = self.next_frame().await;
        self.last_seen = frame.generation();
        self.frames_sent += 1;
        trace!("Sending generation {} ({} bytes)", frame.generation(), frame.len());
        part(&frame)
    }

    /// Endless sequence of parts, ending once `shutdown` fires
    ///
    /// Dropping the stream (the viewer went away) drops the streamer with it.
    pub fn into_stream(
        self,
        shutdown: CancellationToken,
    ) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
        stream::unfold((self, shutdown), |(mut streamer, shutdown)| async move {
            let next = tokio::select! {
                _ = shutdown.cancelled() => None,
                part = streamer.next_part() => Some(part),
            };
            let part = next?;
            Some((Ok(part), (streamer, shutdown)))
        })
    }

    async fn next_frame(&self) -> Arc<CompressedFrame> {
        let Some(timeout) = self.wait_timeout else {
            return self.buffer.wait_next(self.last_seen).await;
        };

        loop {
            if let Some(frame) = self.buffer.wait_next_timeout(self.last_seen, timeout).await {
                return frame;
            }
            if let (_, Some(frame)) = self.buffer.snapshot() {
                trace!("No new frame in {:?}, resending generation {}", timeout, frame.generation());
                return frame;
            }
        }
    }
}
