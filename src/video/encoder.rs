//! JPEG Frame Encoder
//!
//! Wraps a libjpeg-turbo compressor. One encoder owns one compressor handle
//! for its whole life and releases it on drop, whichever way an encode ends.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::broadcast::FrameBroadcastBuffer;
use crate::capture::{FrameSink, PixelFormat, RawFrame};

/// Encoder statistics are logged after this many attempts
const STATS_LOG_INTERVAL: u64 = 300;

/// Result type for encode operations
pub type Result<T> = std::result::Result<T, EncodeError>;

/// Encoding errors
#[derive(Error, Debug)]
pub enum EncodeError {
    /// Compressor could not be created or configured
    #[error("JPEG encoder initialization failed: {0}")]
    InitFailed(String),

    /// Frame geometry does not match its buffer
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Compression failed
    #[error("JPEG compression failed: {0}")]
    CompressFailed(String),

    /// Configuration value out of range
    #[error("Invalid encoder configuration: {0}")]
    InvalidConfig(String),
}

/// Chroma subsampling modes accepted in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChromaSubsampling {
    /// 4:4:4, full chroma resolution
    Yuv444,
    /// 4:2:2, half horizontal chroma resolution
    Yuv422,
    /// 4:2:0, half horizontal and vertical chroma resolution
    #[default]
    Yuv420,
    /// 4:4:0, half vertical chroma resolution
    Yuv440,
    /// Grayscale
    Gray,
}

impl ChromaSubsampling {
    /// Configuration spelling
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Yuv444 => "4:4:4",
            Self::Yuv422 => "4:2:2",
            Self::Yuv420 => "4:2:0",
            Self::Yuv440 => "4:4:0",
            Self::Gray => "gray",
        }
    }

    fn to_turbojpeg(self) -> turbojpeg::Subsamp {
        match self {
            Self::Yuv444 => turbojpeg::Subsamp::None,
            Self::Yuv422 => turbojpeg::Subsamp::Sub2x1,
            Self::Yuv420 => turbojpeg::Subsamp::Sub2x2,
            Self::Yuv440 => turbojpeg::Subsamp::Sub1x2,
            Self::Gray => turbojpeg::Subsamp::Gray,
        }
    }
}

impl FromStr for ChromaSubsampling {
    type Err = EncodeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "4:4:4" | "444" => Ok(Self::Yuv444),
            "4:2:2" | "422" => Ok(Self::Yuv422),
            "4:2:0" | "420" => Ok(Self::Yuv420),
            "4:4:0" | "440" => Ok(Self::Yuv440),
            "gray" | "grey" => Ok(Self::Gray),
            other => Err(EncodeError::InvalidConfig(format!(
                "unknown chroma subsampling '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for ChromaSubsampling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encoder configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderConfig {
    /// JPEG quality, 1..=100
    pub quality: u8,
    /// Chroma subsampling
    pub subsampling: ChromaSubsampling,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            quality: 75,
            subsampling: ChromaSubsampling::Yuv420,
        }
    }
}

/// Encoder statistics
#[derive(Debug, Clone, Default)]
pub struct EncoderStats {
    /// Frames compressed successfully
    pub frames_encoded: u64,
    /// Frames that failed validation or compression
    pub failures: u64,
    /// Total compressed bytes produced
    pub bytes_out: u64,
    /// Duration of the most recent successful encode
    pub last_encode_time: Duration,
}

impl EncoderStats {
    /// Mean compressed frame size in bytes
    pub fn avg_frame_bytes(&self) -> u64 {
        if self.frames_encoded == 0 {
            0
        } else {
            self.bytes_out / self.frames_encoded
        }
    }

    /// Fraction of attempts that failed
    pub fn failure_rate(&self) -> f64 {
        let attempts = self.frames_encoded + self.failures;
        if attempts == 0 {
            0.0
        } else {
            self.failures as f64 / attempts as f64
        }
    }
}

/// Raw frame to JPEG transform
pub struct FrameEncoder {
    compressor: turbojpeg::Compressor,
    config: EncoderConfig,
    stats: EncoderStats,
}

impl FrameEncoder {
    /// Create an encoder with the given quality and subsampling
    pub fn new(config: EncoderConfig) -> Result<Self> {
        if !(1..=100).contains(&config.quality) {
            return Err(EncodeError::InvalidConfig(format!(
                "quality {} outside 1..=100",
                config.quality
            )));
        }

        let mut compressor =
            turbojpeg::Compressor::new().map_err(|e| EncodeError::InitFailed(e.to_string()))?;
        compressor
            .set_quality(i32::from(config.quality))
            .map_err(|e| EncodeError::InitFailed(e.to_string()))?;
        compressor
            .set_subsamp(config.subsampling.to_turbojpeg())
            .map_err(|e| EncodeError::InitFailed(e.to_string()))?;

        debug!(
            "JPEG encoder ready: quality={}, subsampling={}",
            config.quality, config.subsampling
        );

        Ok(Self {
            compressor,
            config,
            stats: EncoderStats::default(),
        })
    }

    /// Active configuration
    pub fn config(&self) -> EncoderConfig {
        self.config
    }

    /// Statistics so far
    pub fn stats(&self) -> &EncoderStats {
        &self.stats
    }

    /// Compress one frame
    ///
    /// The frame's pixels are fully consumed before this returns.
    pub fn encode(&mut self, frame: &RawFrame<'_>) -> Result<Bytes> {
        if let Err(reason) = frame.validate() {
            self.stats.failures += 1;
            return Err(EncodeError::InvalidFrame(reason));
        }

        let start = Instant::now();

        // libjpeg-turbo reads full `pitch * height` rows, so a buffer whose
        // last row stops at the pixel data gets padded first.
        let full_len = frame.stride as usize * frame.height as usize;
        let padded;
        let pixels = if frame.data.len() >= full_len {
            &frame.data[..full_len]
        } else {
            let mut owned = frame.data.to_vec();
            owned.resize(full_len, 0);
            padded = owned;
            padded.as_slice()
        };

        let image = turbojpeg::Image {
            pixels,
            width: frame.width as usize,
            pitch: frame.stride as usize,
            height: frame.height as usize,
            format: turbojpeg_format(frame.format),
        };

        match self.compressor.compress_to_vec(image) {
            Ok(jpeg) => {
                self.stats.frames_encoded += 1;
                self.stats.bytes_out += jpeg.len() as u64;
                self.stats.last_encode_time = start.elapsed();
                Ok(Bytes::from(jpeg))
            }
            Err(e) => {
                self.stats.failures += 1;
                Err(EncodeError::CompressFailed(e.to_string()))
            }
        }
    }
}

fn turbojpeg_format(format: PixelFormat) -> turbojpeg::PixelFormat {
    match format {
        PixelFormat::BGRx => turbojpeg::PixelFormat::BGRX,
        PixelFormat::BGRA => turbojpeg::PixelFormat::BGRA,
        PixelFormat::RGBx => turbojpeg::PixelFormat::RGBX,
        PixelFormat::RGBA => turbojpeg::PixelFormat::RGBA,
    }
}

/// Capture sink that encodes every frame and publishes it
///
/// A failed encode is logged and counted; the buffer keeps showing the last
/// good frame.
pub struct EncodingPublisher {
    encoder: FrameEncoder,
    buffer: Arc<FrameBroadcastBuffer>,
}

impl EncodingPublisher {
    /// Publish frames encoded by `encoder` into `buffer`
    pub fn new(encoder: FrameEncoder, buffer: Arc<FrameBroadcastBuffer>) -> Self {
        Self { encoder, buffer }
    }

    /// Encoder statistics so far
    pub fn stats(&self) -> &EncoderStats {
        self.encoder.stats()
    }

    fn log_stats(&self) {
        let stats = self.encoder.stats();
        debug!(
            "Encoder: {} frames, {} failures ({:.1}%), avg {} bytes, last encode {:?}",
            stats.frames_encoded,
            stats.failures,
            stats.failure_rate() * 100.0,
            stats.avg_frame_bytes(),
            stats.last_encode_time
        );
    }
}

impl FrameSink for EncodingPublisher {
    fn on_frame(&mut self, frame: &RawFrame<'_>) {
        match self.encoder.encode(frame) {
            Ok(jpeg) => {
                let generation = self.buffer.publish(jpeg);
                if generation == 1 {
                    info!(
                        "First frame published: {}x{} {}",
                        frame.width, frame.height, frame.format
                    );
                }
            }
            Err(e) => warn!("Dropping frame: {}", e),
        }

        let stats = self.encoder.stats();
        if (stats.frames_encoded + stats.failures) % STATS_LOG_INTERVAL == 0 {
            self.log_stats();
        }
    }
}
