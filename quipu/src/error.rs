//! Error types for the Quipu library.

use std::path::PathBuf;
use thiserror::Error;

use crate::raster::Resolution;

/// Errors that can occur while building, writing or reading terrain data.
#[derive(Error, Debug)]
pub enum QuipuError {
    /// IO error when reading or writing files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The requested file does not exist.
    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    /// The path exists but is a directory or other non-regular file.
    #[error("Not a regular file: {path}")]
    NotAFile { path: PathBuf },

    /// The file does not start with the Quipu identifier.
    #[error("Invalid magic identifier (expected \"QUIPU\")")]
    InvalidMagic,

    /// A type tag outside the closed set of known tags.
    #[error("Unknown type tag: {0}")]
    UnknownTypeTag(u16),

    /// A known tag appeared where a different one was required.
    #[error("Unexpected class tag: expected {expected}, found {found}")]
    UnexpectedClass { expected: u16, found: u16 },

    /// A tagged vector or matrix was stored with a different dimension.
    #[error("Dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    /// A compressed block did not inflate to the length implied by its shape.
    #[error("Decompressed length mismatch: expected {expected} bytes, got {actual}")]
    DecompressedLength { expected: usize, actual: usize },

    /// Structurally invalid file content.
    #[error("Corrupt file: {0}")]
    CorruptFile(String),

    /// Two rasters that must share a resolution do not.
    #[error("Resolution mismatch: expected {expected}, found {found}")]
    ResolutionMismatch {
        expected: Resolution,
        found: Resolution,
    },

    /// Appending rasters whose shared dimension differs.
    #[error("Cannot append {side}: shared dimension is {expected} but appended raster has {found}")]
    IncompatibleAppend {
        side: &'static str,
        expected: usize,
        found: usize,
    },

    /// A region that does not fit inside the raster.
    #[error("Region {x},{y} {width}x{height} does not fit in a {resolution} raster")]
    InvalidRegion {
        x: usize,
        y: usize,
        width: usize,
        height: usize,
        resolution: Resolution,
    },

    /// A pyramid that cannot be written (empty, or GSD not increasing).
    #[error("Invalid pyramid: {0}")]
    InvalidPyramid(String),

    /// Projection backend failure or bad reference definition.
    #[error("Projection error: {0}")]
    Projection(String),

    /// A transform between a cartographic and a local-tangent projection.
    #[error("Cannot map between cartographic and local-tangent projections")]
    ProjectionModeMismatch,

    /// File size doesn't match SRTM1 or SRTM3 format.
    #[error("Invalid file size: {size} bytes (expected 25934402 for SRTM1 or 2884802 for SRTM3)")]
    InvalidFileSize { size: usize },

    /// Filename does not encode a tile corner.
    #[error("Invalid tile filename: {0}")]
    InvalidFilename(String),
}

/// Result type alias using [`QuipuError`].
pub type Result<T> = std::result::Result<T, QuipuError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = QuipuError::InvalidFileSize { size: 1000 };
        assert!(err.to_string().contains("1000"));

        let err = QuipuError::UnknownTypeTag(4242);
        assert!(err.to_string().contains("4242"));

        let err = QuipuError::FileNotFound {
            path: PathBuf::from("tile-1.qld"),
        };
        assert!(err.to_string().contains("tile-1.qld"));

        let err = QuipuError::ResolutionMismatch {
            expected: Resolution::new(4, 4),
            found: Resolution::new(2, 8),
        };
        let msg = err.to_string();
        assert!(msg.contains("4x4"));
        assert!(msg.contains("2x8"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short read");
        let err: QuipuError = io.into();
        assert!(matches!(err, QuipuError::Io(_)));
    }
}
