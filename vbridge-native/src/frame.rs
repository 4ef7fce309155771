//! Frame views that cross the native boundary

use vbridge_video::{convert_plane, ConversionError, FrameBuffer, FrameRate, PixelFormat};

/// Pixel memory owned by a native library
///
/// Only valid for the duration of the callback or capture call that hands it
/// out; the borrow enforces that nothing keeps it past that point.
#[derive(Debug, Clone, Copy)]
pub struct NativeVideoFrame<'a> {
    pub width: u32,
    pub height: u32,
    pub row_bytes: usize,
    pub format: PixelFormat,
    pub data: &'a [u8],
    /// 100 ns units
    pub timecode: Option<i64>,
}

impl<'a> NativeVideoFrame<'a> {
    /// Copy out of native memory, converting to `to` on the way
    pub fn copy_as(&self, to: PixelFormat) -> Result<FrameBuffer, ConversionError> {
        let frame = convert_plane(
            self.data,
            self.width,
            self.height,
            self.row_bytes,
            self.format,
            to,
        )?;

        Ok(match self.timecode {
            Some(timecode) => frame.with_timecode(timecode),
            None => frame,
        })
    }

    /// Copy out of native memory into the canonical layout
    pub fn to_canonical(&self) -> Result<FrameBuffer, ConversionError> {
        self.copy_as(PixelFormat::CANONICAL)
    }
}

/// A frame handed to a network sender
#[derive(Debug, Clone, Copy)]
pub struct OutgoingVideoFrame<'a> {
    pub width: u32,
    pub height: u32,
    pub row_bytes: usize,
    pub format: PixelFormat,
    pub frame_rate: FrameRate,
    /// Picture aspect ratio; the sender derives it from width/height
    pub aspect_ratio: f32,
    /// `None` asks the library to synthesize one
    pub timecode: Option<i64>,
    pub data: &'a [u8],
}

impl<'a> OutgoingVideoFrame<'a> {
    /// Describe a whole progressive frame
    pub fn progressive(frame: &'a FrameBuffer, frame_rate: FrameRate) -> Self {
        Self {
            width: frame.width(),
            height: frame.height(),
            row_bytes: frame.stride(),
            format: frame.format(),
            frame_rate,
            aspect_ratio: frame.width() as f32 / frame.height() as f32,
            timecode: frame.timecode(),
            data: frame.data(),
        }
    }
}

/// A frame object allocated by a hardware output
pub trait DeviceFrame: Send {
    fn width(&self) -> u32;

    fn height(&self) -> u32;

    fn row_bytes(&self) -> usize;

    fn format(&self) -> PixelFormat;

    fn bytes(&self) -> &[u8];

    fn bytes_mut(&mut self) -> &mut [u8];
}

#[cfg(test)]
mod tests {
    use super::*;
    use vbridge_video::Bgr8;

    #[test]
    fn test_copy_respects_row_padding() {
        // 2x2 YUY2 with 4 bytes of padding per row
        let mut plane = vec![0xAAu8; 12 * 2];
        plane[..4].copy_from_slice(&[16, 128, 235, 128]);
        plane[12..16].copy_from_slice(&[16, 128, 235, 128]);

        let native = NativeVideoFrame {
            width: 2,
            height: 2,
            row_bytes: 12,
            format: PixelFormat::Yuy2,
            data: &plane,
            timecode: Some(42),
        };

        let frame = native.to_canonical().unwrap();
        assert_eq!(frame.stride(), 6);
        assert_eq!(frame.timecode(), Some(42));
        assert_eq!(frame.bgr_at(0, 1), Some(Bgr8::BLACK));
        assert_eq!(frame.bgr_at(1, 1), Some(Bgr8::WHITE));
    }

    #[test]
    fn test_progressive_aspect_ratio() {
        let frame = FrameBuffer::zeroed(1920, 1080, PixelFormat::Bgra).unwrap();
        let outgoing = OutgoingVideoFrame::progressive(&frame, FrameRate::NTSC_60);
        assert!((outgoing.aspect_ratio - 16.0 / 9.0).abs() < 1e-6);
        assert_eq!(outgoing.row_bytes, 1920 * 4);
        assert_eq!(outgoing.timecode, None);
    }
}
