use crate::types::PixelFormat;
use thiserror::Error;

/// A frame could not be built or converted
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    #[error("frame has zero area ({width}x{height})")]
    ZeroSized { width: usize, height: usize },

    #[error("{format} requires an even width, got {width}")]
    OddWidth { width: usize, format: PixelFormat },

    #[error("stride {stride} is smaller than the minimum row size {min}")]
    StrideTooSmall { stride: usize, min: usize },

    #[error("buffer holds {len} bytes but {required} are required")]
    BufferTooSmall { len: usize, required: usize },

    #[error("no conversion from {from} to {to}")]
    Unsupported { from: PixelFormat, to: PixelFormat },

    #[error("frame is {actual_width}x{actual_height}, device mode is {width}x{height}")]
    ShapeMismatch {
        width: u32,
        height: u32,
        actual_width: u32,
        actual_height: u32,
    },
}
