//! PipeWire capture thread
//!
//! Owns the PipeWire main loop, context, core and the single capture stream.
//! Frames are passed to the [`FrameSink`] from inside the `process` callback.

use std::os::fd::{OwnedFd, RawFd};
use std::sync::mpsc as std_mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use libspa::param::format::{FormatProperties, MediaSubtype, MediaType};
use libspa::param::format_utils;
use libspa::param::video::{VideoFormat, VideoInfoRaw};
use libspa::param::ParamType;
use libspa::pod::serialize::PodSerializer;
use libspa::pod::{Pod, Value};
use libspa::utils::{Direction, SpaTypes};
use pipewire::context::Context;
use pipewire::core::Core;
use pipewire::main_loop::MainLoop;
use pipewire::properties::Properties;
use pipewire::stream::{Stream, StreamFlags, StreamListener, StreamRef, StreamState};
use tracing::{debug, error, info, trace, warn};

use super::buffer::copy_fd_buffer;
use super::error::{CaptureError, Result};
use super::frame::{PixelFormat, RawFrame};
use super::FrameSink;
use crate::portal::CaptureSource;

/// How long one main loop iteration may block waiting for events
const ITERATE_TIMEOUT: Duration = Duration::from_millis(20);

/// Frames between statistics log lines
const STATS_INTERVAL_FRAMES: u64 = 300;

/// Handle to a running capture thread
///
/// Dropping the handle stops the stream and joins the thread.
pub struct CaptureFeed {
    node_id: u32,
    thread_handle: Option<JoinHandle<()>>,
    shutdown_tx: Option<std_mpsc::SyncSender<()>>,
}

impl CaptureFeed {
    /// Start capturing the granted source into `sink`
    ///
    /// Blocks until the PipeWire stream is connected (or failed to connect),
    /// so call it from a blocking context.
    pub fn start<S: FrameSink>(source: CaptureSource, sink: S) -> Result<Self> {
        let node_id = source.node_id;
        info!("Starting PipeWire capture for node {}", node_id);

        let (shutdown_tx, shutdown_rx) = std_mpsc::sync_channel::<()>(1);
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Result<()>>(1);
        let remote_fd = source.remote_fd;

        let thread_handle = thread::Builder::new()
            .name("pipewire-capture".to_string())
            .spawn(move || {
                run_capture_loop(node_id, remote_fd, sink, shutdown_rx, ready_tx);
            })
            .map_err(|e| CaptureError::InitializationFailed(format!("Thread spawn failed: {}", e)))?;

        let mut feed = Self {
            node_id,
            thread_handle: Some(thread_handle),
            shutdown_tx: Some(shutdown_tx),
        };

        match ready_rx.recv() {
            Ok(Ok(())) => {
                info!("PipeWire capture running for node {}", node_id);
                Ok(feed)
            }
            Ok(Err(e)) => {
                let _ = feed.stop();
                Err(e)
            }
            Err(_) => {
                let _ = feed.stop();
                Err(CaptureError::ThreadCommunicationFailed(
                    "capture thread exited before reporting readiness".to_string(),
                ))
            }
        }
    }

    /// PipeWire node being captured
    pub fn node_id(&self) -> u32 {
        self.node_id
    }

    /// Stop the stream and join the capture thread
    pub fn stop(&mut self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                error!("PipeWire capture thread panicked during shutdown");
                return Err(CaptureError::ThreadPanic("capture thread panicked".to_string()));
            }
            info!("PipeWire capture for node {} stopped", self.node_id);
        }

        Ok(())
    }
}

impl Drop for CaptureFeed {
    fn drop(&mut self) {
        debug!("Dropping CaptureFeed");
        let _ = self.stop();
    }
}

/// Format agreed with the producer in `param_changed`
#[derive(Debug, Clone, Copy)]
struct NegotiatedFormat {
    width: u32,
    height: u32,
    format: PixelFormat,
}

/// Per-stream state handed to the listener callbacks
struct CaptureState<S> {
    node_id: u32,
    sink: S,
    video_info: VideoInfoRaw,
    negotiated: Option<NegotiatedFormat>,
    frames: u64,
    skipped: u64,
}

fn run_capture_loop<S: FrameSink>(
    node_id: u32,
    remote_fd: Option<OwnedFd>,
    sink: S,
    shutdown_rx: std_mpsc::Receiver<()>,
    ready_tx: std_mpsc::SyncSender<Result<()>>,
) {
    pipewire::init();

    let main_loop = match MainLoop::new(None) {
        Ok(ml) => ml,
        Err(e) => {
            let _ = ready_tx.send(Err(CaptureError::InitializationFailed(format!(
                "MainLoop::new failed: {}",
                e
            ))));
            return;
        }
    };

    let context = match Context::new(&main_loop) {
        Ok(ctx) => ctx,
        Err(e) => {
            let _ = ready_tx.send(Err(CaptureError::InitializationFailed(format!(
                "Context::new failed: {}",
                e
            ))));
            return;
        }
    };

    let core = match connect_core(&context, remote_fd) {
        Ok(core) => core,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    let state = CaptureState {
        node_id,
        sink,
        video_info: VideoInfoRaw::default(),
        negotiated: None,
        frames: 0,
        skipped: 0,
    };

    // Stream and listener must outlive the loop below
    let (_stream, _listener) = match create_stream(&core, node_id, state) {
        Ok(pair) => pair,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    let _ = ready_tx.send(Ok(()));

    loop {
        match shutdown_rx.try_recv() {
            Ok(()) | Err(std_mpsc::TryRecvError::Disconnected) => break,
            Err(std_mpsc::TryRecvError::Empty) => {}
        }
        main_loop.loop_().iterate(ITERATE_TIMEOUT);
    }

    debug!("PipeWire capture loop for node {} exiting", node_id);
}

fn connect_core(context: &Context, remote_fd: Option<OwnedFd>) -> Result<Core> {
    match remote_fd {
        Some(fd) => {
            info!("Connecting to PipeWire through the portal remote");
            context
                .connect_fd(fd, None)
                .map_err(|e| CaptureError::ConnectionFailed(format!("connect_fd failed: {}", e)))
        }
        None => {
            info!("Connecting to the default PipeWire daemon");
            context
                .connect(None)
                .map_err(|e| CaptureError::ConnectionFailed(format!("connect failed: {}", e)))
        }
    }
}

fn create_stream<S: FrameSink>(
    core: &Core,
    node_id: u32,
    state: CaptureState<S>,
) -> Result<(Stream, StreamListener<CaptureState<S>>)> {
    let stream_name = format!("lamco-mjpeg-capture-{}", node_id);

    let mut props = Properties::new();
    props.insert("media.type", "Video");
    props.insert("media.category", "Capture");
    props.insert("media.role", "Screen");
    props.insert("media.name", stream_name.as_str());

    let stream = Stream::new(core, &stream_name, props)
        .map_err(|e| CaptureError::StreamCreationFailed(format!("Stream::new failed: {}", e)))?;

    let listener = stream
        .add_local_listener_with_user_data(state)
        .state_changed(|_stream, state, old, new| {
            debug!("Capture stream {} state {:?} -> {:?}", state.node_id, old, new);
            match new {
                StreamState::Error(msg) => error!("Capture stream {} error: {}", state.node_id, msg),
                StreamState::Streaming => info!("Capture stream {} is streaming", state.node_id),
                _ => {}
            }
        })
        .param_changed(|_stream, state, id, param| {
            let Some(param) = param else {
                return;
            };
            if id != ParamType::Format.as_raw() {
                return;
            }
            on_format_changed(state, param);
        })
        .process(|stream, state| on_process(stream, state))
        .register()
        .map_err(|e| {
            CaptureError::StreamCreationFailed(format!("Listener registration failed: {}", e))
        })?;

    let format_pod = build_enum_format()?;
    let mut params = [Pod::from_bytes(&format_pod).ok_or_else(|| {
        CaptureError::StreamCreationFailed("EnumFormat pod is malformed".to_string())
    })?];

    stream
        .connect(
            Direction::Input,
            Some(node_id),
            StreamFlags::AUTOCONNECT | StreamFlags::MAP_BUFFERS,
            &mut params,
        )
        .map_err(|e| CaptureError::ConnectionFailed(format!("Stream connect failed: {}", e)))?;

    stream
        .set_active(true)
        .map_err(|e| CaptureError::StreamCreationFailed(format!("Failed to activate stream: {}", e)))?;

    debug!("Capture stream connected to node {}", node_id);
    Ok((stream, listener))
}

/// Raw video in any of the packed 32-bit layouts the encoder accepts
fn build_enum_format() -> Result<Vec<u8>> {
    let [preferred, ..] = PixelFormat::NEGOTIABLE;
    let choices: Vec<VideoFormat> = PixelFormat::NEGOTIABLE.iter().map(|f| f.to_spa()).collect();

    let object = libspa::pod::object!(
        SpaTypes::ObjectParamFormat,
        ParamType::EnumFormat,
        libspa::pod::property!(FormatProperties::MediaType, Id, MediaType::Video),
        libspa::pod::property!(FormatProperties::MediaSubtype, Id, MediaSubtype::Raw),
        libspa::pod::property!(
            FormatProperties::VideoFormat,
            Choice,
            Enum,
            Id,
            preferred.to_spa(),
            choices[0],
            choices[1],
            choices[2],
            choices[3]
        ),
    );

    PodSerializer::serialize(std::io::Cursor::new(Vec::new()), &Value::Object(object))
        .map(|(cursor, _)| cursor.into_inner())
        .map_err(|e| CaptureError::StreamCreationFailed(format!("EnumFormat serialization failed: {:?}", e)))
}

fn on_format_changed<S>(state: &mut CaptureState<S>, param: &Pod) {
    let (media_type, media_subtype) = match format_utils::parse_format(param) {
        Ok(types) => types,
        Err(e) => {
            warn!("Unparsable format on stream {}: {:?}", state.node_id, e);
            return;
        }
    };
    if media_type != MediaType::Video || media_subtype != MediaSubtype::Raw {
        return;
    }

    if let Err(e) = state.video_info.parse(param) {
        warn!("Failed to parse raw video info on stream {}: {:?}", state.node_id, e);
        state.negotiated = None;
        return;
    }

    let size = state.video_info.size();
    match PixelFormat::from_spa(state.video_info.format()) {
        Some(format) => {
            info!(
                "Capture stream {} negotiated {}x{} {}",
                state.node_id, size.width, size.height, format
            );
            state.negotiated = Some(NegotiatedFormat {
                width: size.width,
                height: size.height,
                format,
            });
        }
        None => {
            warn!(
                "Capture stream {} negotiated unsupported format {:?}",
                state.node_id,
                state.video_info.format()
            );
            state.negotiated = None;
        }
    }
}

fn on_process<S: FrameSink>(stream: &StreamRef, state: &mut CaptureState<S>) {
    let Some(mut buffer) = stream.dequeue_buffer() else {
        trace!("No buffer available on stream {}", state.node_id);
        return;
    };

    let Some(format) = state.negotiated else {
        state.skipped += 1;
        trace!("Frame before format negotiation on stream {}, skipped", state.node_id);
        return;
    };

    let Some(data) = buffer.datas_mut().first_mut() else {
        warn!("Empty buffer on stream {}", state.node_id);
        return;
    };

    let chunk = data.chunk();
    let size = chunk.size() as usize;
    let offset = chunk.offset() as usize;
    let chunk_stride = chunk.stride();
    let raw = data.as_raw();
    let fd = raw.fd as RawFd;
    let data_type = data.type_();

    let stride = if chunk_stride > 0 {
        chunk_stride as u32
    } else {
        format.width * format.format.bytes_per_pixel() as u32
    };

    if size == 0 {
        state.skipped += 1;
        trace!("Zero-sized chunk on stream {} (no damage)", state.node_id);
        return;
    }

    // Mapped buffers are encoded straight from PipeWire's memory; anything
    // only reachable through an fd is copied out first.
    let copied;
    let pixels: &[u8] = match data.data() {
        Some(mapped) if offset + size <= mapped.len() => &mapped[offset..offset + size],
        Some(mapped) => {
            warn!(
                "Buffer bounds invalid on stream {}: offset={} size={} len={}",
                state.node_id,
                offset,
                size,
                mapped.len()
            );
            state.skipped += 1;
            return;
        }
        None => {
            trace!("Unmapped {:?} buffer on stream {}, copying via fd {}", data_type, state.node_id, fd);
            copied = match copy_fd_buffer(fd, size, offset) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("Failed to read buffer on stream {}: {}", state.node_id, e);
                    state.skipped += 1;
                    return;
                }
            };
            copied.as_slice()
        }
    };

    let frame = RawFrame::new(pixels, format.width, format.height, stride, format.format);
    state.sink.on_frame(&frame);
    state.frames += 1;

    if state.frames % STATS_INTERVAL_FRAMES == 0 {
        debug!(
            "Capture stream {}: {} frames delivered, {} skipped",
            state.node_id, state.frames, state.skipped
        );
    }
}
