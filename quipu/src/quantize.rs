//! Height and albedo image encodings.
//!
//! Heights are stored as 8- or 16-bit fixed point when the quantization step
//! is finer than the ground resolution can distinguish (`gsd / 50`), and as
//! native `f32` otherwise. Albedo images are always 8-bit fixed point.
//!
//! In both fixed-point encodings the top code (255 or 65535) stands for an
//! invalid sample, so valid samples map onto `[0, max - 1]` and decode
//! within half a step of their original value.

use std::io::{Read, Write};

use bytemuck::Pod;
use tracing::debug;

use crate::codec::{
    cast_bytes, read_bytes, read_resolution, read_value, read_vector, write_resolution,
    write_slice, write_value, write_vector, MAX_BLOCK_BYTES,
};
use crate::compression::{read_compressed, write_compressed};
use crate::error::{QuipuError, Result};
use crate::raster::{Raster, Resolution, Sample};
use crate::surface::Albedo;

/// Divisor applied to the GSD to get the height error budget.
pub const GSD_QUANTIZATION_RATIO: f64 = 50.0;

/// Storage type of a height image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeightEncoding {
    F32,
    U8,
    U16,
}

impl HeightEncoding {
    /// Pick the narrowest encoding whose step stays under `gsd / 50`.
    pub fn choose(min: f32, max: f32, gsd: f64) -> Self {
        let range = (max - min) as f64;
        let budget = gsd / GSD_QUANTIZATION_RATIO;
        if range / (u8::MAX as f64) < budget {
            Self::U8
        } else if range / (u16::MAX as f64) < budget {
            Self::U16
        } else {
            Self::F32
        }
    }

    fn tag(self) -> u8 {
        match self {
            Self::F32 => 0,
            Self::U8 => 1,
            Self::U16 => 2,
        }
    }

    fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(Self::F32),
            1 => Ok(Self::U8),
            2 => Ok(Self::U16),
            other => Err(QuipuError::CorruptFile(format!(
                "unknown height encoding {other}"
            ))),
        }
    }
}

/// Unsigned fixed-point codes.
pub trait Code: Pod + Send + Sync {
    /// Reserved for invalid samples.
    const INVALID: u32;

    fn from_u32(value: u32) -> Self;

    fn to_u32(self) -> u32;
}

impl Code for u8 {
    const INVALID: u32 = u8::MAX as u32;

    fn from_u32(value: u32) -> Self {
        value as u8
    }

    fn to_u32(self) -> u32 {
        self as u32
    }
}

impl Code for u16 {
    const INVALID: u32 = u16::MAX as u32;

    fn from_u32(value: u32) -> Self {
        value as u16
    }

    fn to_u32(self) -> u32 {
        self as u32
    }
}

fn step<C: Code>(min: f32, max: f32) -> f64 {
    let range = (max - min) as f64;
    if range > 0.0 {
        range / (C::INVALID - 1) as f64
    } else {
        0.0
    }
}

/// Map samples onto codes in `[0, C::INVALID - 1]` over `[min, max]`.
pub fn quantize<C: Code>(samples: &[f32], min: f32, max: f32) -> Vec<C> {
    let step = step::<C>(min, max);
    let top = (C::INVALID - 1) as f64;
    samples
        .iter()
        .map(|&v| {
            if !v.is_valid() {
                C::from_u32(C::INVALID)
            } else if step == 0.0 {
                C::from_u32(0)
            } else {
                let q = ((v as f64 - min as f64) / step).round().clamp(0.0, top);
                C::from_u32(q as u32)
            }
        })
        .collect()
}

/// Inverse of [`quantize`]; the reserved code decodes to the sentinel.
pub fn dequantize<C: Code>(codes: &[C], min: f32, max: f32) -> Vec<f32> {
    let step = step::<C>(min, max);
    codes
        .iter()
        .map(|&c| match c.to_u32() {
            code if code == C::INVALID => f32::INVALID,
            code => (min as f64 + code as f64 * step) as f32,
        })
        .collect()
}

fn write_payload<W: Write>(writer: &mut W, bytes: &[u8], compress: bool) -> Result<usize> {
    let mut n = write_value(writer, compress as u8)?;
    if compress {
        n += write_compressed(writer, bytes)?;
    } else {
        n += write_slice(writer, bytes)?;
    }
    Ok(n)
}

/// Read a payload of `len` bytes. Returns the bytes and whether they were
/// stored compressed.
fn read_payload<R: Read>(reader: &mut R, len: usize) -> Result<(Vec<u8>, bool)> {
    match read_value::<u8, _>(reader)? {
        0 => Ok((read_bytes(reader, len as u64)?, false)),
        1 => Ok((read_compressed(reader, len)?, true)),
        other => Err(QuipuError::CorruptFile(format!(
            "invalid compression flag {other}"
        ))),
    }
}

/// Write a height image: resolution, encoding, optional `(min, max)`, payload.
pub fn write_heights<W: Write>(
    writer: &mut W,
    heights: &Raster<f32>,
    gsd: f64,
    compress: bool,
) -> Result<usize> {
    let (min, max) = heights.minmax().unwrap_or((0.0, 0.0));
    let encoding = HeightEncoding::choose(min, max, gsd);
    debug!(resolution = %heights.resolution(), ?encoding, min, max, gsd, "encoding heights");

    let mut n = write_resolution(writer, heights.resolution())?;
    n += write_value(writer, encoding.tag())?;
    n += match encoding {
        HeightEncoding::F32 => {
            write_payload(writer, bytemuck::cast_slice(heights.data()), compress)?
        }
        HeightEncoding::U8 => {
            let codes = quantize::<u8>(heights.data(), min, max);
            write_value(writer, min)?
                + write_value(writer, max)?
                + write_payload(writer, &codes, compress)?
        }
        HeightEncoding::U16 => {
            let codes = quantize::<u16>(heights.data(), min, max);
            write_value(writer, min)?
                + write_value(writer, max)?
                + write_payload(writer, bytemuck::cast_slice(&codes), compress)?
        }
    };
    Ok(n)
}

/// Decoded height image and the header facts about it.
#[derive(Debug, Clone)]
pub struct HeightBlock {
    pub heights: Raster<f32>,
    pub encoding: HeightEncoding,
    pub compressed: bool,
}

/// Byte length of a payload of `resolution` samples, each `sample_size`
/// bytes wide.
fn payload_len(resolution: Resolution, sample_size: usize) -> Result<usize> {
    resolution
        .checked_pixel_count()
        .and_then(|n| n.checked_mul(sample_size))
        .filter(|&len| len as u64 <= MAX_BLOCK_BYTES)
        .ok_or_else(|| {
            QuipuError::CorruptFile(format!("payload for {resolution} exceeds limit"))
        })
}

/// Read a height image written by [`write_heights`].
pub fn read_heights<R: Read>(reader: &mut R) -> Result<HeightBlock> {
    let resolution = read_resolution(reader)?;
    let encoding = HeightEncoding::from_tag(read_value(reader)?)?;
    let (data, compressed) = match encoding {
        HeightEncoding::F32 => {
            let (bytes, compressed) = read_payload(reader, payload_len(resolution, 4)?)?;
            (cast_bytes::<f32>(&bytes)?, compressed)
        }
        HeightEncoding::U8 => {
            let (min, max) = read_range(reader)?;
            let (bytes, compressed) = read_payload(reader, payload_len(resolution, 1)?)?;
            (dequantize::<u8>(&bytes, min, max), compressed)
        }
        HeightEncoding::U16 => {
            let (min, max) = read_range(reader)?;
            let (bytes, compressed) = read_payload(reader, payload_len(resolution, 2)?)?;
            (dequantize(&cast_bytes::<u16>(&bytes)?, min, max), compressed)
        }
    };
    Ok(HeightBlock {
        heights: Raster::new(resolution, data)?,
        encoding,
        compressed,
    })
}

/// Only the compression flag of a height block, skipping the samples.
pub fn peek_heights_compressed<R: Read>(reader: &mut R) -> Result<bool> {
    read_resolution(reader)?;
    let encoding = HeightEncoding::from_tag(read_value(reader)?)?;
    if encoding != HeightEncoding::F32 {
        read_range(reader)?;
    }
    match read_value::<u8, _>(reader)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(QuipuError::CorruptFile(format!(
            "invalid compression flag {other}"
        ))),
    }
}

fn read_range<R: Read>(reader: &mut R) -> Result<(f32, f32)> {
    let min: f32 = read_value(reader)?;
    let max: f32 = read_value(reader)?;
    Ok((min, max))
}

const ALBEDO_CONSTANT: u8 = 0;
const ALBEDO_SCALAR: u8 = 1;
const ALBEDO_SPECTRAL: u8 = 2;

fn write_albedo_image<W: Write>(writer: &mut W, image: &Raster<f32>, compress: bool) -> Result<usize> {
    let (min, max) = image.minmax().unwrap_or((0.0, 0.0));
    let codes = quantize::<u8>(image.data(), min, max);
    Ok(write_resolution(writer, image.resolution())?
        + write_value(writer, min)?
        + write_value(writer, max)?
        + write_payload(writer, &codes, compress)?)
}

fn read_albedo_image<R: Read>(reader: &mut R, expected: Resolution) -> Result<Raster<f32>> {
    let resolution = read_resolution(reader)?;
    if resolution != expected {
        return Err(QuipuError::ResolutionMismatch {
            expected,
            found: resolution,
        });
    }
    let (min, max) = read_range(reader)?;
    let (codes, _) = read_payload(reader, payload_len(resolution, 1)?)?;
    Raster::new(resolution, dequantize::<u8>(&codes, min, max))
}

/// Write an albedo block. [`Albedo::None`] has no encoding.
pub fn write_albedo<W: Write>(writer: &mut W, albedo: &Albedo, compress: bool) -> Result<usize> {
    Ok(match albedo {
        Albedo::None => 0,
        Albedo::Constant(values) => {
            write_value(writer, ALBEDO_CONSTANT)? + write_vector(writer, values)?
        }
        Albedo::Scalar(image) => {
            write_value(writer, ALBEDO_SCALAR)? + write_albedo_image(writer, image, compress)?
        }
        Albedo::Spectral(bands) => {
            let count = u32::try_from(bands.len())
                .map_err(|_| QuipuError::InvalidPyramid("too many albedo bands".into()))?;
            let mut n = write_value(writer, ALBEDO_SPECTRAL)? + write_value(writer, count)?;
            for band in bands {
                n += write_albedo_image(writer, band, compress)?;
            }
            n
        }
    })
}

/// Read an albedo block whose images must match `resolution`.
pub fn read_albedo<R: Read>(reader: &mut R, resolution: Resolution) -> Result<Albedo> {
    match read_value::<u8, _>(reader)? {
        ALBEDO_CONSTANT => Ok(Albedo::Constant(read_vector(reader)?)),
        ALBEDO_SCALAR => Ok(Albedo::Scalar(read_albedo_image(reader, resolution)?)),
        ALBEDO_SPECTRAL => {
            let count: u32 = read_value(reader)?;
            if count as usize > u8::MAX as usize {
                return Err(QuipuError::CorruptFile(format!(
                    "implausible albedo band count {count}"
                )));
            }
            let bands = (0..count)
                .map(|_| read_albedo_image(reader, resolution))
                .collect::<Result<Vec<_>>>()?;
            Ok(Albedo::Spectral(bands))
        }
        other => Err(QuipuError::CorruptFile(format!(
            "unknown albedo encoding {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn ramp(res: Resolution, scale: f32) -> Raster<f32> {
        Raster::from_fn(res, |x, y| (x + y * res.width) as f32 * scale)
    }

    #[test]
    fn test_choose_encoding() {
        // Budget 0.04: 8 bits covers ranges up to 10.2.
        assert_eq!(HeightEncoding::choose(0.0, 10.0, 2.0), HeightEncoding::U8);
        assert_eq!(HeightEncoding::choose(0.0, 100.0, 2.0), HeightEncoding::U16);
        assert_eq!(HeightEncoding::choose(0.0, 10_000.0, 2.0), HeightEncoding::F32);
        assert_eq!(HeightEncoding::choose(5.0, 5.0, 0.001), HeightEncoding::U8);
    }

    #[test]
    fn test_quantize_reserves_top_code() {
        let samples = [0.0f32, 1.0, f32::INFINITY, 0.5];
        let codes = quantize::<u8>(&samples, 0.0, 1.0);
        assert_eq!(codes, vec![0, 254, 255, 127]);
        let back = dequantize(&codes, 0.0, 1.0);
        assert_eq!(back[1], 1.0);
        assert!(back[2].is_infinite());
    }

    #[test]
    fn test_constant_heights() {
        let flat = Raster::filled(Resolution::new(3, 3), 42.5f32);
        let mut buf = Vec::new();
        write_heights(&mut buf, &flat, 1.0, false).unwrap();
        let block = read_heights(&mut Cursor::new(buf)).unwrap();
        assert_eq!(block.encoding, HeightEncoding::U8);
        assert_eq!(block.heights, flat);
    }

    #[test]
    fn test_heights_error_bound() {
        let res = Resolution::new(32, 32);
        for (scale, gsd, compress) in [(0.005f32, 1.0, false), (0.05, 1.0, true), (10.0, 1.0, true)] {
            let mut heights = ramp(res, scale);
            heights.invalidate(3, 4);
            let mut buf = Vec::new();
            let written = write_heights(&mut buf, &heights, gsd, compress).unwrap();
            assert_eq!(written, buf.len());

            let block = read_heights(&mut Cursor::new(&buf)).unwrap();
            assert_eq!(block.compressed, compress);
            assert!(!block.heights.is_valid(3, 4));
            for (a, b) in heights.data().iter().zip(block.heights.data()) {
                if a.is_finite() {
                    assert!(((a - b) as f64).abs() <= gsd / GSD_QUANTIZATION_RATIO);
                }
            }
            assert_eq!(peek_heights_compressed(&mut Cursor::new(&buf)).unwrap(), compress);
        }
    }

    #[test]
    fn test_albedo_blocks() {
        let res = Resolution::new(4, 4);
        let image = ramp(res, 0.01);

        let constant = Albedo::Constant(vec![0.1, 0.2, 0.3]);
        let mut buf = Vec::new();
        write_albedo(&mut buf, &constant, false).unwrap();
        write_albedo(&mut buf, &Albedo::Spectral(vec![image.clone(), image.clone()]), true)
            .unwrap();

        let mut cursor = Cursor::new(buf);
        assert_eq!(read_albedo(&mut cursor, res).unwrap(), constant);
        let Albedo::Spectral(bands) = read_albedo(&mut cursor, res).unwrap() else {
            panic!("expected spectral albedo");
        };
        assert_eq!(bands.len(), 2);
        let tolerance = 0.15 / 255.0;
        for (a, b) in image.data().iter().zip(bands[1].data()) {
            assert!((a - b).abs() <= tolerance);
        }
    }

    #[test]
    fn test_albedo_resolution_checked() {
        let mut buf = Vec::new();
        write_albedo(&mut buf, &Albedo::Scalar(Raster::filled(Resolution::new(2, 2), 0.5)), false)
            .unwrap();
        assert!(matches!(
            read_albedo(&mut Cursor::new(buf), Resolution::new(4, 4)),
            Err(QuipuError::ResolutionMismatch { .. })
        ));
    }

    fn height_block_prefix(width: u32, height: u32, encoding: HeightEncoding) -> Vec<u8> {
        let mut buf = Vec::new();
        write_value(&mut buf, width).unwrap();
        write_value(&mut buf, height).unwrap();
        write_value(&mut buf, encoding.tag()).unwrap();
        buf
    }

    #[test]
    fn test_corrupt_resolution() {
        let mut buf = height_block_prefix(u32::MAX, u32::MAX, HeightEncoding::F32);
        write_value(&mut buf, 0u8).unwrap();
        assert!(matches!(
            read_heights(&mut Cursor::new(buf)),
            Err(QuipuError::CorruptFile(_))
        ));
    }

    #[test]
    fn test_payload_size_overflow() {
        // The pixel count alone is within limits, four bytes per sample is not.
        let mut buf = height_block_prefix(1 << 18, 1 << 18, HeightEncoding::F32);
        write_value(&mut buf, 0u8).unwrap();
        assert!(matches!(
            read_heights(&mut Cursor::new(buf)),
            Err(QuipuError::CorruptFile(_))
        ));
    }

    #[test]
    fn test_truncated_payload() {
        let mut buf = height_block_prefix(1 << 15, 1 << 15, HeightEncoding::U16);
        write_value(&mut buf, 0.0f32).unwrap();
        write_value(&mut buf, 1.0f32).unwrap();
        write_value(&mut buf, 0u8).unwrap();
        buf.extend_from_slice(&[0u8; 64]);
        assert!(matches!(
            read_heights(&mut Cursor::new(buf)),
            Err(QuipuError::CorruptFile(_))
        ));
    }

    #[test]
    fn test_corrupt_compressed_length() {
        let mut buf = height_block_prefix(16, 16, HeightEncoding::F32);
        write_value(&mut buf, 1u8).unwrap();
        write_value(&mut buf, 1u64 << 35).unwrap();
        buf.extend_from_slice(&[0u8; 32]);
        assert!(matches!(
            read_heights(&mut Cursor::new(buf)),
            Err(QuipuError::CorruptFile(_))
        ));
    }
}
