//! Frame, pixel format and video mode types

use crate::error::ConversionError;
use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Build a little-endian FourCC code the way the native SDKs do.
pub const fn fourcc(code: &[u8; 4]) -> u32 {
    u32::from_le_bytes(*code)
}

/// Pixel layouts that cross the routing core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Packed 24-bit B, G, R. The canonical layout between source and sink.
    Bgr,
    /// Packed 32-bit B, G, R, A
    Bgra,
    /// Packed YUV 4:2:2, byte order Y0 U Y1 V
    Yuy2,
}

impl PixelFormat {
    /// Layout every frame is normalized to between the two boundaries
    pub const CANONICAL: PixelFormat = PixelFormat::Bgr;

    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgra => 4,
            PixelFormat::Bgr => 3,
            PixelFormat::Yuy2 => 2,
        }
    }

    /// Smallest legal row stride for `width` pixels
    pub fn min_stride(self, width: u32) -> usize {
        width as usize * self.bytes_per_pixel()
    }

    /// Whether widths must be even (chroma is shared by pixel pairs)
    pub fn is_subsampled(self) -> bool {
        matches!(self, PixelFormat::Yuy2)
    }

    pub fn fourcc(self) -> u32 {
        match self {
            PixelFormat::Bgr => fourcc(b"BGR3"),
            PixelFormat::Bgra => fourcc(b"BGRA"),
            PixelFormat::Yuy2 => fourcc(b"YUY2"),
        }
    }

    /// BGRX is accepted as BGRA; the padding byte is ignored downstream.
    pub fn from_fourcc(code: u32) -> Option<Self> {
        match code {
            c if c == fourcc(b"BGR3") => Some(PixelFormat::Bgr),
            c if c == fourcc(b"BGRA") || c == fourcc(b"BGRX") => Some(PixelFormat::Bgra),
            c if c == fourcc(b"YUY2") => Some(PixelFormat::Yuy2),
            _ => None,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PixelFormat::Bgr => "BGR",
            PixelFormat::Bgra => "BGRA",
            PixelFormat::Yuy2 => "YUY2",
        };
        f.write_str(name)
    }
}

/// Rational frame rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRate {
    pub num: u32,
    pub den: u32,
}

impl FrameRate {
    /// 59.94 fps
    pub const NTSC_60: FrameRate = FrameRate {
        num: 60000,
        den: 1001,
    };

    pub fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    pub fn fps(&self) -> f64 {
        if self.den == 0 {
            return 0.0;
        }
        self.num as f64 / self.den as f64
    }

    /// Wall-clock time between two frames
    pub fn frame_interval(&self) -> Duration {
        if self.num == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(self.den as u64 * 1_000_000_000 / self.num as u64)
    }
}

impl Default for FrameRate {
    fn default() -> Self {
        FrameRate::NTSC_60
    }
}

/// Fixed video mode a hardware device is configured with once per session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoMode {
    pub width: u32,
    pub height: u32,
    pub frame_rate: FrameRate,
    /// Layout on the device side of the boundary
    pub format: PixelFormat,
}

impl VideoMode {
    /// 1080p at 59.94 fps, 8-bit YUV
    pub const HD1080P5994: VideoMode = VideoMode {
        width: 1920,
        height: 1080,
        frame_rate: FrameRate::NTSC_60,
        format: PixelFormat::Yuy2,
    };

    pub fn new(width: u32, height: u32, frame_rate: FrameRate, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            frame_rate,
            format,
        }
    }

    /// Row stride of a tightly packed device frame
    pub fn row_bytes(&self) -> usize {
        self.format.min_stride(self.width)
    }

    pub fn frame_size(&self) -> usize {
        self.row_bytes() * self.height as usize
    }
}

impl Default for VideoMode {
    fn default() -> Self {
        VideoMode::HD1080P5994
    }
}

/// One canonical pixel
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct Bgr8 {
    pub b: u8,
    pub g: u8,
    pub r: u8,
}

impl Bgr8 {
    pub const BLACK: Bgr8 = Bgr8 { b: 0, g: 0, r: 0 };
    pub const WHITE: Bgr8 = Bgr8 {
        b: 255,
        g: 255,
        r: 255,
    };

    pub const fn new(b: u8, g: u8, r: u8) -> Self {
        Self { b, g, r }
    }
}

/// One decoded image with owned pixel bytes
///
/// Invariants checked at construction: `width` and `height` are non-zero,
/// `stride >= width * bytes_per_pixel(format)` and `data.len() >= stride * height`.
#[derive(Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    width: u32,
    height: u32,
    stride: usize,
    format: PixelFormat,
    data: Vec<u8>,
    /// Timecode in 100 ns units, when the producer supplies one
    timecode: Option<i64>,
}

impl FrameBuffer {
    pub fn new(
        width: u32,
        height: u32,
        stride: usize,
        format: PixelFormat,
        data: Vec<u8>,
    ) -> Result<Self, ConversionError> {
        check_layout(data.len(), width as usize, height as usize, stride, format)?;

        Ok(Self {
            width,
            height,
            stride,
            format,
            data,
            timecode: None,
        })
    }

    /// Zero-filled, tightly packed frame
    pub fn zeroed(width: u32, height: u32, format: PixelFormat) -> Result<Self, ConversionError> {
        let stride = format.min_stride(width);
        let data = vec![0u8; plane_len(stride, height as usize)?];
        Self::new(width, height, stride, format, data)
    }

    /// Canonical frame filled with a single color
    pub fn solid(width: u32, height: u32, color: Bgr8) -> Result<Self, ConversionError> {
        let mut frame = Self::zeroed(width, height, PixelFormat::Bgr)?;
        for pixel in bytemuck::cast_slice_mut::<u8, Bgr8>(&mut frame.data) {
            *pixel = color;
        }
        Ok(frame)
    }

    pub fn with_timecode(mut self, timecode: i64) -> Self {
        self.timecode = Some(timecode);
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn timecode(&self) -> Option<i64> {
        self.timecode
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Visible bytes of row `y`, padding excluded
    pub fn row(&self, y: u32) -> Option<&[u8]> {
        if y >= self.height {
            return None;
        }
        let start = y as usize * self.stride;
        self.data.get(start..start + self.format.min_stride(self.width))
    }

    /// Canonical pixel at (x, y); `None` for other formats or out of range
    pub fn bgr_at(&self, x: u32, y: u32) -> Option<Bgr8> {
        if self.format != PixelFormat::Bgr || x >= self.width {
            return None;
        }
        let row = self.row(y)?;
        let pixels: &[Bgr8] = bytemuck::cast_slice(row);
        pixels.get(x as usize).copied()
    }
}

impl fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("stride", &self.stride)
            .field("format", &self.format)
            .field("len", &self.data.len())
            .field("timecode", &self.timecode)
            .finish()
    }
}

/// Bytes covered by `height` rows of `stride`
pub(crate) fn plane_len(stride: usize, height: usize) -> Result<usize, ConversionError> {
    stride
        .checked_mul(height)
        .ok_or(ConversionError::BufferTooSmall {
            len: 0,
            required: usize::MAX,
        })
}

/// Validate a plane layout against the frame invariants
pub(crate) fn check_layout(
    len: usize,
    width: usize,
    height: usize,
    stride: usize,
    format: PixelFormat,
) -> Result<(), ConversionError> {
    if width == 0 || height == 0 {
        return Err(ConversionError::ZeroSized { width, height });
    }
    if format.is_subsampled() && width % 2 != 0 {
        return Err(ConversionError::OddWidth { width, format });
    }

    let min = width.saturating_mul(format.bytes_per_pixel());
    if stride < min {
        return Err(ConversionError::StrideTooSmall { stride, min });
    }

    let required = stride.checked_mul(height).unwrap_or(usize::MAX);
    if len < required {
        return Err(ConversionError::BufferTooSmall { len, required });
    }

    Ok(())
}
