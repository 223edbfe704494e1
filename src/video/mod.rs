//! Frame encoding and distribution
//!
//! Captured frames are JPEG-compressed on the capture thread and published
//! into a single-slot [`FrameBroadcastBuffer`] that every viewer reads from.

pub mod broadcast;
pub mod encoder;

pub use broadcast::{CompressedFrame, FrameBroadcastBuffer};
pub use encoder::{
    ChromaSubsampling, EncodeError, EncoderConfig, EncoderStats, EncodingPublisher, FrameEncoder,
};
