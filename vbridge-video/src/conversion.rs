//! Stride-aware pixel conversions at the source and sink boundaries
//!
//! Every conversion validates both planes before writing a single byte, so a
//! frame is either converted completely or rejected. Source and destination
//! strides are independent. Frames above `PARALLEL_THRESHOLD` pixels are
//! split by rows across the rayon pool.
//!
//! YUV math is BT.601 limited range:
//! - decode uses 20-bit fixed point coefficients tabulated at compile time
//! - encode uses the usual 8-bit integer matrix, chroma averaged per pixel pair

use crate::error::ConversionError;
use crate::types::{check_layout, plane_len, FrameBuffer, PixelFormat};
use rayon::prelude::*;

/// Frames with more pixels than this are converted row-parallel
const PARALLEL_THRESHOLD: usize = 320 * 240;

const SHIFT: i32 = 20;
const HALF: i32 = 1 << (SHIFT - 1);
const CY: i32 = 1_220_542; // 255/219
const CUB: i32 = 2_116_026;
const CUG: i32 = -409_993;
const CVG: i32 = -852_492;
const CVR: i32 = 1_673_527;

static LUMA: [i32; 256] = luma_table();
static U_TO_B: [i32; 256] = chroma_table(CUB);
static U_TO_G: [i32; 256] = chroma_table(CUG);
static V_TO_G: [i32; 256] = chroma_table(CVG);
static V_TO_R: [i32; 256] = chroma_table(CVR);

const fn luma_table() -> [i32; 256] {
    let mut table = [0i32; 256];
    let mut i = 0;
    while i < 256 {
        let y = if i > 16 { i as i32 - 16 } else { 0 };
        table[i] = y * CY + HALF;
        i += 1;
    }
    table
}

const fn chroma_table(coeff: i32) -> [i32; 256] {
    let mut table = [0i32; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = coeff * (i as i32 - 128);
        i += 1;
    }
    table
}

#[inline(always)]
fn descale(value: i32) -> u8 {
    (value >> SHIFT).clamp(0, 255) as u8
}

type RowFn = fn(&[u8], &mut [u8]);

fn yuy2_row_to_bgr(src: &[u8], dst: &mut [u8]) {
    for (yuyv, out) in src.chunks_exact(4).zip(dst.chunks_exact_mut(6)) {
        let u = yuyv[1] as usize;
        let v = yuyv[3] as usize;

        let b = U_TO_B[u];
        let g = U_TO_G[u] + V_TO_G[v];
        let r = V_TO_R[v];

        let y0 = LUMA[yuyv[0] as usize];
        out[0] = descale(y0 + b);
        out[1] = descale(y0 + g);
        out[2] = descale(y0 + r);

        let y1 = LUMA[yuyv[2] as usize];
        out[3] = descale(y1 + b);
        out[4] = descale(y1 + g);
        out[5] = descale(y1 + r);
    }
}

#[inline(always)]
fn luma(b: i32, g: i32, r: i32) -> u8 {
    (((66 * r + 129 * g + 25 * b + 128) >> 8) + 16) as u8
}

fn bgr_row_to_yuy2(src: &[u8], dst: &mut [u8]) {
    for (pair, out) in src.chunks_exact(6).zip(dst.chunks_exact_mut(4)) {
        let (b0, g0, r0) = (pair[0] as i32, pair[1] as i32, pair[2] as i32);
        let (b1, g1, r1) = (pair[3] as i32, pair[4] as i32, pair[5] as i32);

        // Chroma of the pair is taken from the averaged color
        let b = (b0 + b1 + 1) >> 1;
        let g = (g0 + g1 + 1) >> 1;
        let r = (r0 + r1 + 1) >> 1;

        out[0] = luma(b0, g0, r0);
        out[1] = (((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128) as u8;
        out[2] = luma(b1, g1, r1);
        out[3] = (((112 * r - 94 * g - 18 * b + 128) >> 8) + 128) as u8;
    }
}

fn bgr_row_to_bgra(src: &[u8], dst: &mut [u8]) {
    for (bgr, out) in src.chunks_exact(3).zip(dst.chunks_exact_mut(4)) {
        out[..3].copy_from_slice(bgr);
        out[3] = 0xFF;
    }
}

fn bgra_row_to_bgr(src: &[u8], dst: &mut [u8]) {
    for (bgra, out) in src.chunks_exact(4).zip(dst.chunks_exact_mut(3)) {
        out.copy_from_slice(&bgra[..3]);
    }
}

fn row_converter(from: PixelFormat, to: PixelFormat) -> Result<RowFn, ConversionError> {
    match (from, to) {
        (PixelFormat::Yuy2, PixelFormat::Bgr) => Ok(yuy2_row_to_bgr),
        (PixelFormat::Bgr, PixelFormat::Bgra) => Ok(bgr_row_to_bgra),
        (PixelFormat::Bgr, PixelFormat::Yuy2) => Ok(bgr_row_to_yuy2),
        (PixelFormat::Bgra, PixelFormat::Bgr) => Ok(bgra_row_to_bgr),
        _ => Err(ConversionError::Unsupported { from, to }),
    }
}

/// Validate both planes, then run `row_fn` over every row
#[allow(clippy::too_many_arguments)]
fn convert_rows(
    input: &[u8],
    output: &mut [u8],
    width: usize,
    height: usize,
    in_stride: usize,
    out_stride: usize,
    from: PixelFormat,
    to: PixelFormat,
) -> Result<(), ConversionError> {
    let row_fn = row_converter(from, to)?;
    check_layout(input.len(), width, height, in_stride, from)?;
    check_layout(output.len(), width, height, out_stride, to)?;

    let in_row = width * from.bytes_per_pixel();
    let out_row = width * to.bytes_per_pixel();

    let convert = |(y, dst): (usize, &mut [u8])| {
        let start = y * in_stride;
        row_fn(&input[start..start + in_row], &mut dst[..out_row]);
    };

    let output = &mut output[..out_stride * height];
    if width * height > PARALLEL_THRESHOLD {
        output
            .par_chunks_mut(out_stride)
            .enumerate()
            .for_each(convert);
    } else {
        output.chunks_mut(out_stride).enumerate().for_each(convert);
    }

    Ok(())
}

/// Convert packed YUY2 into canonical BGR
pub fn convert_yuy2_to_bgr(
    input: &[u8],
    output: &mut [u8],
    width: usize,
    height: usize,
    in_stride: usize,
    out_stride: usize,
) -> Result<(), ConversionError> {
    convert_rows(
        input,
        output,
        width,
        height,
        in_stride,
        out_stride,
        PixelFormat::Yuy2,
        PixelFormat::Bgr,
    )
}

/// Convert canonical BGR into BGRA with a fully opaque alpha channel
pub fn convert_bgr_to_bgra(
    input: &[u8],
    output: &mut [u8],
    width: usize,
    height: usize,
    in_stride: usize,
    out_stride: usize,
) -> Result<(), ConversionError> {
    convert_rows(
        input,
        output,
        width,
        height,
        in_stride,
        out_stride,
        PixelFormat::Bgr,
        PixelFormat::Bgra,
    )
}

/// Convert canonical BGR into packed YUY2
pub fn convert_bgr_to_yuy2(
    input: &[u8],
    output: &mut [u8],
    width: usize,
    height: usize,
    in_stride: usize,
    out_stride: usize,
) -> Result<(), ConversionError> {
    convert_rows(
        input,
        output,
        width,
        height,
        in_stride,
        out_stride,
        PixelFormat::Bgr,
        PixelFormat::Yuy2,
    )
}

/// Drop the alpha (or padding) byte of BGRA/BGRX
pub fn convert_bgra_to_bgr(
    input: &[u8],
    output: &mut [u8],
    width: usize,
    height: usize,
    in_stride: usize,
    out_stride: usize,
) -> Result<(), ConversionError> {
    convert_rows(
        input,
        output,
        width,
        height,
        in_stride,
        out_stride,
        PixelFormat::Bgra,
        PixelFormat::Bgr,
    )
}

/// Convert a borrowed plane into a freshly allocated, tightly packed frame
///
/// This is the copy that takes pixels out of memory owned by a native
/// library: once it returns, the result no longer references `input`.
pub fn convert_plane(
    input: &[u8],
    width: u32,
    height: u32,
    in_stride: usize,
    from: PixelFormat,
    to: PixelFormat,
) -> Result<FrameBuffer, ConversionError> {
    // Reject unsupported pairs and bad input before allocating
    row_converter(from, to)?;
    check_layout(input.len(), width as usize, height as usize, in_stride, from)?;

    let out_stride = to.min_stride(width);
    let mut output = vec![0u8; plane_len(out_stride, height as usize)?];
    convert_rows(
        input,
        &mut output,
        width as usize,
        height as usize,
        in_stride,
        out_stride,
        from,
        to,
    )?;

    FrameBuffer::new(width, height, out_stride, to, output)
}

/// Convert a whole frame, preserving its timecode
pub fn convert(frame: &FrameBuffer, to: PixelFormat) -> Result<FrameBuffer, ConversionError> {
    let converted = convert_plane(
        frame.data(),
        frame.width(),
        frame.height(),
        frame.stride(),
        frame.format(),
        to,
    )?;

    Ok(match frame.timecode() {
        Some(timecode) => converted.with_timecode(timecode),
        None => converted,
    })
}

fn expect_format(frame: &FrameBuffer, from: PixelFormat, to: PixelFormat) -> Result<(), ConversionError> {
    if frame.format() == from {
        Ok(())
    } else {
        Err(ConversionError::Unsupported {
            from: frame.format(),
            to,
        })
    }
}

/// Capture boundary: YUY2 device frame into the canonical layout
pub fn yuy2_to_bgr(frame: &FrameBuffer) -> Result<FrameBuffer, ConversionError> {
    expect_format(frame, PixelFormat::Yuy2, PixelFormat::Bgr)?;
    convert(frame, PixelFormat::Bgr)
}

/// Network send boundary: canonical layout into BGRA
pub fn bgr_to_bgra(frame: &FrameBuffer) -> Result<FrameBuffer, ConversionError> {
    expect_format(frame, PixelFormat::Bgr, PixelFormat::Bgra)?;
    convert(frame, PixelFormat::Bgra)
}

/// Hardware playback boundary: canonical layout into YUY2
pub fn bgr_to_yuy2(frame: &FrameBuffer) -> Result<FrameBuffer, ConversionError> {
    expect_format(frame, PixelFormat::Bgr, PixelFormat::Yuy2)?;
    convert(frame, PixelFormat::Yuy2)
}

/// Network receive boundary: BGRA/BGRX into the canonical layout
pub fn bgra_to_bgr(frame: &FrameBuffer) -> Result<FrameBuffer, ConversionError> {
    expect_format(frame, PixelFormat::Bgra, PixelFormat::Bgr)?;
    convert(frame, PixelFormat::Bgr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Bgr8;

    fn pixels(frame: &FrameBuffer) -> Vec<Bgr8> {
        (0..frame.height())
            .flat_map(|y| (0..frame.width()).map(move |x| (x, y)))
            .map(|(x, y)| frame.bgr_at(x, y).unwrap())
            .collect()
    }

    #[test]
    fn test_yuy2_reference_pattern() {
        // Row 0: black/white pair, row 1: a saturated red/orange pair
        let input = vec![
            16, 128, 235, 128, //
            145, 54, 41, 240,
        ];
        let frame = FrameBuffer::new(2, 2, 4, PixelFormat::Yuy2, input).unwrap();
        let bgr = yuy2_to_bgr(&frame).unwrap();

        assert_eq!(bgr.format(), PixelFormat::Bgr);
        assert_eq!(bgr.stride(), 6);
        assert_eq!(
            pixels(&bgr),
            vec![
                Bgr8::new(0, 0, 0),
                Bgr8::new(255, 255, 255),
                Bgr8::new(1, 88, 255),
                Bgr8::new(0, 0, 208),
            ]
        );
    }

    #[test]
    fn test_yuy2_neutral_chroma() {
        let input = vec![81, 90, 81, 240, 128, 128, 128, 128];
        let frame = FrameBuffer::new(4, 1, 8, PixelFormat::Yuy2, input).unwrap();
        let bgr = yuy2_to_bgr(&frame).unwrap();

        assert_eq!(bgr.bgr_at(0, 0), Some(Bgr8::new(0, 0, 254)));
        assert_eq!(bgr.bgr_at(1, 0), Some(Bgr8::new(0, 0, 254)));
        assert_eq!(bgr.bgr_at(2, 0), Some(Bgr8::new(130, 130, 130)));
        assert_eq!(bgr.bgr_at(3, 0), Some(Bgr8::new(130, 130, 130)));
    }

    #[test]
    fn test_bgra_round_trip() {
        let color = Bgr8::new(17, 99, 201);
        let frame = FrameBuffer::solid(16, 8, color).unwrap();

        let bgra = bgr_to_bgra(&frame).unwrap();
        assert_eq!(bgra.stride(), 64);
        for px in bgra.data().chunks_exact(4) {
            assert_eq!(px, &[17, 99, 201, 255]);
        }

        let back = bgra_to_bgr(&bgra).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn test_bgr_to_yuy2_reference() {
        let mut frame = FrameBuffer::zeroed(2, 2, PixelFormat::Bgr).unwrap().into_data();
        frame[3..6].copy_from_slice(&[255, 255, 255]);
        frame[6..9].copy_from_slice(&[0, 0, 255]);
        frame[9..12].copy_from_slice(&[0, 0, 255]);
        let frame = FrameBuffer::new(2, 2, 6, PixelFormat::Bgr, frame).unwrap();

        let yuy2 = bgr_to_yuy2(&frame).unwrap();
        assert_eq!(yuy2.data(), &[16, 128, 235, 128, 82, 90, 82, 240]);
    }

    #[test]
    fn test_independent_strides() {
        // 2x2 YUY2 with 4 bytes of row padding, into BGR with 2 bytes of padding
        let input = vec![
            16, 128, 235, 128, 0xEE, 0xEE, 0xEE, 0xEE, //
            128, 128, 128, 128, 0xEE, 0xEE, 0xEE, 0xEE,
        ];
        let mut output = vec![0xAAu8; 16];

        convert_yuy2_to_bgr(&input, &mut output, 2, 2, 8, 8).unwrap();

        assert_eq!(&output[..6], &[0, 0, 0, 255, 255, 255]);
        assert_eq!(&output[6..8], &[0xAA, 0xAA], "padding must be untouched");
        assert_eq!(&output[8..14], &[130; 6]);
    }

    #[test]
    fn test_rejected_frame_leaves_output_untouched() {
        let input = vec![0u8; 4 * 4 * 3];
        let mut output = vec![0xAAu8; 4 * 4 * 4 - 1];

        let err = convert_bgr_to_bgra(&input, &mut output, 4, 4, 12, 16).unwrap_err();
        assert_eq!(
            err,
            ConversionError::BufferTooSmall {
                len: 63,
                required: 64
            }
        );
        assert!(output.iter().all(|&b| b == 0xAA));

        let err = convert_bgr_to_yuy2(&input, &mut output, 3, 4, 9, 6).unwrap_err();
        assert!(matches!(err, ConversionError::OddWidth { width: 3, .. }));
        assert!(output.iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn test_unsupported_pair() {
        let frame = FrameBuffer::solid(2, 2, Bgr8::BLACK).unwrap();

        assert_eq!(
            convert(&frame, PixelFormat::Bgr).unwrap_err(),
            ConversionError::Unsupported {
                from: PixelFormat::Bgr,
                to: PixelFormat::Bgr
            }
        );
        assert!(matches!(
            yuy2_to_bgr(&frame),
            Err(ConversionError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_parallel_path_matches_scalar_rows() {
        let width = 640;
        let height = 480;
        let mut input = vec![0u8; width * height * 2];
        for (i, byte) in input.iter_mut().enumerate() {
            *byte = (i * 7 % 256) as u8;
        }

        let frame = FrameBuffer::new(
            width as u32,
            height as u32,
            width * 2,
            PixelFormat::Yuy2,
            input.clone(),
        )
        .unwrap();
        let parallel = yuy2_to_bgr(&frame).unwrap();

        let mut expected = vec![0u8; width * height * 3];
        for (src, dst) in input
            .chunks_exact(width * 2)
            .zip(expected.chunks_exact_mut(width * 3))
        {
            yuy2_row_to_bgr(src, dst);
        }

        assert_eq!(parallel.data(), &expected[..]);
    }

    #[test]
    fn test_timecode_preserved() {
        let frame = FrameBuffer::solid(2, 1, Bgr8::WHITE)
            .unwrap()
            .with_timecode(42);
        assert_eq!(bgr_to_yuy2(&frame).unwrap().timecode(), Some(42));
    }
}
