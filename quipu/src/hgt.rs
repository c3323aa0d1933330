//! SRTM `.hgt` tiles as georeferenced height rasters.
//!
//! An `.hgt` file is a square grid of 16-bit big-endian signed heights in
//! meters, stored north to south, west to east. Its size tells the grid:
//!
//! - **SRTM1**: 3601×3601 samples, 1 arc-second spacing
//! - **SRTM3**: 1201×1201 samples, 3 arc-second spacing
//!
//! The file name encodes the south-west corner, e.g. `N35E138.hgt`. Edge
//! samples lie exactly on whole degrees, so neighbouring tiles share a row
//! or column.

use std::fs::File;
use std::path::Path;

use memmap2::Mmap;
use rayon::prelude::*;
use tracing::debug;

use crate::error::{QuipuError, Result};
use crate::georaster::GeoreferencedRaster;
use crate::projection::SpatialProjection;
use crate::raster::{Raster, Resolution};

/// File size for SRTM1: 3601 × 3601 × 2 bytes
const SRTM1_SIZE: usize = 3601 * 3601 * 2;

/// File size for SRTM3: 1201 × 1201 × 2 bytes
const SRTM3_SIZE: usize = 1201 * 1201 * 2;

/// Value marking a void sample.
pub const VOID_VALUE: i16 = -32768;

/// Reference system of every `.hgt` tile.
pub const GEOGRAPHIC_REFERENCE: &str = "EPSG:4326";

/// Grid density of an `.hgt` tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HgtResolution {
    Srtm1,
    Srtm3,
}

impl HgtResolution {
    /// Detect the grid from a file size in bytes.
    pub fn from_file_size(size: usize) -> Result<Self> {
        match size {
            SRTM1_SIZE => Ok(Self::Srtm1),
            SRTM3_SIZE => Ok(Self::Srtm3),
            size => Err(QuipuError::InvalidFileSize { size }),
        }
    }

    /// Samples per row and column.
    pub fn samples(&self) -> usize {
        match self {
            HgtResolution::Srtm1 => 3601,
            HgtResolution::Srtm3 => 1201,
        }
    }

    pub fn arc_seconds(&self) -> u32 {
        match self {
            HgtResolution::Srtm1 => 1,
            HgtResolution::Srtm3 => 3,
        }
    }
}

/// Parse the south-west corner `(lat, lon)` out of a tile name.
///
/// Directory components and the `.hgt` extension are ignored.
///
/// # Examples
///
/// ```
/// use quipu::hgt::corner_from_filename;
///
/// assert_eq!(corner_from_filename("N35E138.hgt"), Some((35, 138)));
/// assert_eq!(corner_from_filename("/data/s12w077.hgt"), Some((-12, -77)));
/// assert_eq!(corner_from_filename("tile.hgt"), None);
/// ```
pub fn corner_from_filename(filename: &str) -> Option<(i32, i32)> {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let name = name
        .strip_suffix(".hgt")
        .or_else(|| name.strip_suffix(".HGT"))
        .unwrap_or(name);
    if name.len() != 7 || !name.is_ascii() {
        return None;
    }

    let bytes = name.as_bytes();
    let lat_sign = match bytes[0] {
        b'N' | b'n' => 1,
        b'S' | b's' => -1,
        _ => return None,
    };
    let lon_sign = match bytes[3] {
        b'E' | b'e' => 1,
        b'W' | b'w' => -1,
        _ => return None,
    };
    let lat: i32 = name[1..3].parse().ok()?;
    let lon: i32 = name[4..7].parse().ok()?;
    if lat > 90 || lon > 180 {
        return None;
    }
    Some((lat * lat_sign, lon * lon_sign))
}

/// Tile name for the south-west corner `(lat, lon)`.
///
/// ```
/// assert_eq!(quipu::hgt::filename_for(-12, -77), "S12W077.hgt");
/// ```
pub fn filename_for(lat: i32, lon: i32) -> String {
    let ns = if lat >= 0 { 'N' } else { 'S' };
    let ew = if lon >= 0 { 'E' } else { 'W' };
    format!("{ns}{:02}{ew}{:03}.hgt", lat.unsigned_abs(), lon.unsigned_abs())
}

/// Load an `.hgt` tile, taking its corner from the file name.
///
/// # Errors
///
/// Returns an error if:
/// - The file cannot be opened or memory-mapped
/// - The file name does not encode a corner
/// - The file size matches neither SRTM1 nor SRTM3
pub fn load<P: AsRef<Path>>(path: P) -> Result<GeoreferencedRaster<f32>> {
    let path = path.as_ref();
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| QuipuError::InvalidFilename(path.display().to_string()))?;
    let (lat, lon) = corner_from_filename(name)
        .ok_or_else(|| QuipuError::InvalidFilename(name.to_owned()))?;
    load_with_corner(path, lat, lon)
}

/// Load an `.hgt` tile whose south-west corner is `(lat, lon)`.
///
/// Void samples become invalid.
pub fn load_with_corner<P: AsRef<Path>>(
    path: P,
    lat: i32,
    lon: i32,
) -> Result<GeoreferencedRaster<f32>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(QuipuError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    let file = File::open(path)?;

    // SAFETY: Memory mapping is safe as long as the file is not modified
    // while mapped. The mapping is read-only and dropped before returning.
    let mmap = unsafe { Mmap::map(&file)? };

    let grid = HgtResolution::from_file_size(mmap.len())?;
    let raster = decode(&mmap, grid.samples())?;
    let projection = corner_projection(grid, lat, lon)?;
    debug!(path = %path.display(), ?grid, lat, lon, "loaded hgt tile");
    GeoreferencedRaster::new(raster, projection)
}

/// Decode `samples × samples` big-endian heights.
pub fn decode(bytes: &[u8], samples: usize) -> Result<Raster<f32>> {
    let resolution = Resolution::square(samples);
    if bytes.len() != resolution.pixel_count() * 2 {
        return Err(QuipuError::InvalidFileSize { size: bytes.len() });
    }
    let data = bytes
        .par_chunks_exact(2)
        .map(|b| match i16::from_be_bytes([b[0], b[1]]) {
            VOID_VALUE => f32::INFINITY,
            h => h as f32,
        })
        .collect();
    Raster::new(resolution, data)
}

/// Geographic projection of a tile: pixel `(0, 0)` sits on the north-west
/// corner and the last row and column on whole degrees.
pub fn corner_projection(grid: HgtResolution, lat: i32, lon: i32) -> Result<SpatialProjection> {
    let n = grid.samples();
    let step = 1.0 / (n - 1) as f64;
    SpatialProjection::cartographic(
        GEOGRAPHIC_REFERENCE,
        Resolution::square(n),
        [lon as f64, step, 0.0, lat as f64 + 1.0, 0.0, -step],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::ProjectionMode;
    use approx::assert_relative_eq;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_srtm3(dir: &TempDir, name: &str) -> std::path::PathBuf {
        let n = 1201;
        let mut bytes = vec![0u8; n * n * 2];
        // Row 0, col 0: 1234 m. Row 0, col 1: void. Last sample: -5 m.
        bytes[0..2].copy_from_slice(&1234i16.to_be_bytes());
        bytes[2..4].copy_from_slice(&VOID_VALUE.to_be_bytes());
        let last = bytes.len() - 2;
        bytes[last..].copy_from_slice(&(-5i16).to_be_bytes());
        let path = dir.path().join(name);
        File::create(&path).unwrap().write_all(&bytes).unwrap();
        path
    }

    #[test]
    fn test_corner_from_filename() {
        assert_eq!(corner_from_filename("N35E138.hgt"), Some((35, 138)));
        assert_eq!(corner_from_filename("S12W077"), Some((-12, -77)));
        assert_eq!(corner_from_filename("C:\\srtm\\N00E000.HGT"), Some((0, 0)));
        assert_eq!(corner_from_filename("X35E138.hgt"), None);
        assert_eq!(corner_from_filename("N35E13.hgt"), None);
        assert_eq!(corner_from_filename("N99E000.hgt"), None);
    }

    #[test]
    fn test_filename_roundtrip() {
        for (lat, lon) in [(35, 138), (-12, -77), (0, 0), (-1, 179)] {
            assert_eq!(corner_from_filename(&filename_for(lat, lon)), Some((lat, lon)));
        }
    }

    #[test]
    fn test_load_srtm3() {
        let dir = TempDir::new().unwrap();
        let path = write_srtm3(&dir, "N35E138.hgt");
        let tile = load(&path).unwrap();

        assert_eq!(tile.resolution(), Resolution::square(1201));
        let raster = tile.raster();
        assert_eq!(raster.at(0, 0), 1234.0);
        assert!(!raster.is_valid(1, 0));
        assert_eq!(raster.at(1200, 1200), -5.0);
        assert_eq!(raster.valid_count(), 1201 * 1201 - 1);

        let ProjectionMode::Cartographic(c) = tile.projection().mode() else {
            panic!("hgt tiles are cartographic");
        };
        let [tx, sx, _, ty, _, sy] = c.geo_transform();
        assert_eq!((tx, ty), (138.0, 36.0));
        assert_relative_eq!(sx, 1.0 / 1200.0);
        assert_relative_eq!(sy, -1.0 / 1200.0);
    }

    #[test]
    fn test_load_errors() {
        let dir = TempDir::new().unwrap();
        let bad_size = dir.path().join("N10E010.hgt");
        std::fs::write(&bad_size, [0u8; 1000]).unwrap();
        assert!(matches!(
            load(&bad_size),
            Err(QuipuError::InvalidFileSize { size: 1000 })
        ));

        let bad_name = write_srtm3(&dir, "terrain.hgt");
        assert!(matches!(load(&bad_name), Err(QuipuError::InvalidFilename(_))));
        assert!(load_with_corner(&bad_name, 10, 10).is_ok());

        assert!(matches!(
            load(dir.path().join("N01E001.hgt")),
            Err(QuipuError::FileNotFound { .. })
        ));
    }

    #[test]
    fn test_grid_from_size() {
        assert_eq!(HgtResolution::from_file_size(SRTM1_SIZE).unwrap(), HgtResolution::Srtm1);
        assert_eq!(HgtResolution::from_file_size(SRTM3_SIZE).unwrap().samples(), 1201);
        assert!(HgtResolution::from_file_size(12).is_err());
    }
}
