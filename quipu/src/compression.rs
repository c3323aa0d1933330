//! Block compression used for image payloads.
//!
//! The stream stores only the compressed length and bytes. The caller always
//! knows the decompressed length from the logical shape of the block (width ×
//! height × sample size), so it is never written.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression as Level;

use crate::codec::{read_bytes, read_value, write_value, MAX_PREALLOC};
use crate::error::{QuipuError, Result};

/// Compress a byte buffer.
pub fn compress(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(bytes.len() / 2), Level::default());
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}

/// Decompress a buffer that must inflate to exactly `expected_len` bytes.
pub fn decompress(bytes: &[u8], expected_len: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(expected_len.min(MAX_PREALLOC));
    // One byte of slack is enough to detect an over-long stream without
    // inflating all of it.
    ZlibDecoder::new(bytes)
        .take(expected_len as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| QuipuError::CorruptFile(format!("compressed block: {e}")))?;

    if out.len() != expected_len {
        return Err(QuipuError::DecompressedLength {
            expected: expected_len,
            actual: out.len(),
        });
    }
    Ok(out)
}

/// Write `(compressed length: u64, compressed bytes)`.
///
/// Returns the number of bytes written to `writer`.
pub fn write_compressed<W: Write>(writer: &mut W, bytes: &[u8]) -> Result<usize> {
    let packed = compress(bytes)?;
    let mut written = write_value(writer, packed.len() as u64)?;
    writer.write_all(&packed)?;
    written += packed.len();
    Ok(written)
}

/// Read a block written by [`write_compressed`].
pub fn read_compressed<R: Read>(reader: &mut R, expected_len: usize) -> Result<Vec<u8>> {
    let packed_len: u64 = read_value(reader)?;
    let packed = read_bytes(reader, packed_len)?;
    decompress(&packed, expected_len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{RngCore, SeedableRng};
    use std::io::Cursor;

    #[test]
    fn test_empty_buffer() {
        let packed = compress(&[]).unwrap();
        assert_eq!(decompress(&packed, 0).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_all_zero_buffer() {
        let data = vec![0u8; 64 * 1024];
        let packed = compress(&data).unwrap();
        assert!(packed.len() < data.len() / 10);
        assert_eq!(decompress(&packed, data.len()).unwrap(), data);
    }

    #[test]
    fn test_incompressible_buffer() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut data = vec![0u8; 10_000];
        rng.fill_bytes(&mut data);

        let packed = compress(&data).unwrap();
        assert_eq!(decompress(&packed, data.len()).unwrap(), data);
    }

    #[test]
    fn test_length_mismatch() {
        let data = vec![3u8; 100];
        let packed = compress(&data).unwrap();

        match decompress(&packed, 99) {
            Err(QuipuError::DecompressedLength { expected, actual }) => {
                assert_eq!(expected, 99);
                assert_eq!(actual, 100);
            }
            other => panic!("Expected DecompressedLength error, got {other:?}"),
        }
        assert!(matches!(
            decompress(&packed, 101),
            Err(QuipuError::DecompressedLength { .. })
        ));
    }

    #[test]
    fn test_framed_block() {
        let data: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        let mut buf = Vec::new();
        let written = write_compressed(&mut buf, &data).unwrap();
        assert_eq!(written, buf.len());

        let mut cursor = Cursor::new(buf);
        assert_eq!(read_compressed(&mut cursor, data.len()).unwrap(), data);
    }
}
