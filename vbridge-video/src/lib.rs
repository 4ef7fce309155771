//! vbridge video primitives
//!
//! Frame representation and pixel conversions shared by every capture and
//! output endpoint.
//!
//! Key points:
//! - One canonical layout (packed BGR) between the source and sink boundaries
//! - Frames own their pixel bytes; nothing here borrows native memory
//! - Conversions are stride-aware and all-or-nothing

pub mod conversion;
pub mod error;
pub mod types;

pub use conversion::*;
pub use error::*;
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_format() {
        assert_eq!(PixelFormat::CANONICAL, PixelFormat::Bgr);
        assert_eq!(VideoMode::HD1080P5994.row_bytes(), 3840);
        assert_eq!(VideoMode::HD1080P5994.frame_size(), 3840 * 1080);
    }
}
