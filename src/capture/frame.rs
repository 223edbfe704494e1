//! Raw Frame Types
//!
//! Borrowed views of the pixel buffers PipeWire hands to the process callback.

use std::fmt;

/// Packed 32-bit pixel layouts offered during PipeWire format negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// BGRX 32-bit (no alpha)
    BGRx,
    /// BGRA 32-bit
    BGRA,
    /// RGBX 32-bit (no alpha)
    RGBx,
    /// RGBA 32-bit
    RGBA,
}

impl PixelFormat {
    /// Formats in order of preference; the first one is the negotiation default
    pub const NEGOTIABLE: [PixelFormat; 4] = [Self::BGRx, Self::BGRA, Self::RGBx, Self::RGBA];

    /// Bytes per pixel
    pub fn bytes_per_pixel(&self) -> usize {
        4
    }

    /// Convert from SPA VideoFormat
    #[cfg(feature = "capture")]
    pub fn from_spa(format: libspa::param::video::VideoFormat) -> Option<Self> {
        use libspa::param::video::VideoFormat;

        match format {
            VideoFormat::BGRx => Some(Self::BGRx),
            VideoFormat::BGRA => Some(Self::BGRA),
            VideoFormat::RGBx => Some(Self::RGBx),
            VideoFormat::RGBA => Some(Self::RGBA),
            _ => None,
        }
    }

    /// Convert to SPA VideoFormat
    #[cfg(feature = "capture")]
    pub fn to_spa(&self) -> libspa::param::video::VideoFormat {
        use libspa::param::video::VideoFormat;

        match self {
            Self::BGRx => VideoFormat::BGRx,
            Self::BGRA => VideoFormat::BGRA,
            Self::RGBx => VideoFormat::RGBx,
            Self::RGBA => VideoFormat::RGBA,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BGRx => "BGRx",
            Self::BGRA => "BGRA",
            Self::RGBx => "RGBx",
            Self::RGBA => "RGBA",
        };
        f.write_str(name)
    }
}

/// One captured frame, borrowed from the capture subsystem
///
/// The pixel slice is only valid for the duration of the
/// [`FrameSink::on_frame`](super::FrameSink::on_frame) call. PipeWire requeues
/// the underlying buffer as soon as the callback returns, so anything that
/// needs the pixels afterwards must copy or encode them first.
#[derive(Debug, Clone, Copy)]
pub struct RawFrame<'a> {
    /// Pixel data, `stride * height` bytes (the last row may be short)
    pub data: &'a [u8],
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Row stride in bytes
    pub stride: u32,
    /// Pixel layout
    pub format: PixelFormat,
}

impl<'a> RawFrame<'a> {
    /// Create a frame view
    pub fn new(data: &'a [u8], width: u32, height: u32, stride: u32, format: PixelFormat) -> Self {
        Self {
            data,
            width,
            height,
            stride,
            format,
        }
    }

    /// Bytes of actual pixel data in one row
    pub fn row_bytes(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }

    /// Minimum slice length able to hold every row
    pub fn required_len(&self) -> usize {
        if self.height == 0 {
            return 0;
        }
        self.stride as usize * (self.height as usize - 1) + self.row_bytes()
    }

    /// Check the geometry against the slice it claims to describe
    pub fn validate(&self) -> Result<(), String> {
        if self.width == 0 || self.height == 0 {
            return Err(format!("empty frame {}x{}", self.width, self.height));
        }
        if (self.stride as usize) < self.row_bytes() {
            return Err(format!(
                "stride {} shorter than row ({} bytes for width {})",
                self.stride,
                self.row_bytes(),
                self.width
            ));
        }
        if self.data.len() < self.required_len() {
            return Err(format!(
                "buffer holds {} bytes, {}x{} stride {} needs {}",
                self.data.len(),
                self.width,
                self.height,
                self.stride,
                self.required_len()
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_len_allows_short_last_row() {
        let data = vec![0u8; 64 * 3 + 40];
        let frame = RawFrame::new(&data, 10, 4, 64, PixelFormat::BGRx);
        assert_eq!(frame.row_bytes(), 40);
        assert_eq!(frame.required_len(), 64 * 3 + 40);
        assert!(frame.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_short_stride() {
        let data = vec![0u8; 1024];
        let frame = RawFrame::new(&data, 16, 4, 32, PixelFormat::RGBA);
        assert!(frame.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_truncated_buffer() {
        let data = vec![0u8; 100];
        let frame = RawFrame::new(&data, 16, 4, 64, PixelFormat::BGRA);
        assert!(frame.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_geometry() {
        let frame = RawFrame::new(&[], 0, 0, 0, PixelFormat::BGRx);
        assert!(frame.validate().is_err());
    }

    #[test]
    fn test_negotiation_prefers_bgrx() {
        assert_eq!(PixelFormat::NEGOTIABLE[0], PixelFormat::BGRx);
        assert_eq!(PixelFormat::RGBA.to_string(), "RGBA");
    }
}
