//! Rasters that know where they are.

use glam::DVec2;
use tracing::{debug, warn};

use crate::error::{QuipuError, Result};
use crate::projection::{SpatialProjection, TileIndex};
use crate::raster::{Raster, Resolution, Roi, Sample};

/// A [`Raster`] paired with the [`SpatialProjection`] of its grid.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoreferencedRaster<T: Sample> {
    raster: Raster<T>,
    projection: SpatialProjection,
}

impl<T: Sample> GeoreferencedRaster<T> {
    /// # Errors
    ///
    /// Returns [`QuipuError::ResolutionMismatch`] if the projection was set
    /// up for a different grid size.
    pub fn new(raster: Raster<T>, projection: SpatialProjection) -> Result<Self> {
        if raster.resolution() != projection.resolution() {
            return Err(QuipuError::ResolutionMismatch {
                expected: projection.resolution(),
                found: raster.resolution(),
            });
        }
        Ok(Self { raster, projection })
    }

    /// All-invalid raster over the grid of `projection`.
    pub fn new_blank(projection: SpatialProjection) -> Self {
        Self {
            raster: Raster::new_blank(projection.resolution()),
            projection,
        }
    }

    pub fn raster(&self) -> &Raster<T> {
        &self.raster
    }

    pub fn raster_mut(&mut self) -> &mut Raster<T> {
        &mut self.raster
    }

    pub fn projection(&self) -> &SpatialProjection {
        &self.projection
    }

    pub fn projection_mut(&mut self) -> &mut SpatialProjection {
        &mut self.projection
    }

    pub fn into_parts(self) -> (Raster<T>, SpatialProjection) {
        (self.raster, self.projection)
    }

    pub fn resolution(&self) -> Resolution {
        self.raster.resolution()
    }

    pub fn resize(&self, resolution: Resolution) -> Self {
        let mut projection = self.projection.clone();
        projection.resize(resolution);
        Self {
            raster: self.raster.resize(resolution),
            projection,
        }
    }

    pub fn crop(&self, roi: Roi) -> Result<Self> {
        Ok(Self {
            raster: self.raster.crop(roi)?,
            projection: self.projection.shifted(roi.x, roi.y, roi.resolution()),
        })
    }

    pub fn pad_right(&mut self, count: usize) {
        self.raster.pad_right(count);
        self.sync_resolution();
    }

    pub fn pad_below(&mut self, count: usize) {
        self.raster.pad_below(count);
        self.sync_resolution();
    }

    /// Join `other`'s samples to the right; the projection of `self` is kept.
    pub fn append_right(&mut self, other: &Self) -> Result<()> {
        self.raster.append_right(&other.raster)?;
        self.sync_resolution();
        Ok(())
    }

    /// Join `other`'s samples below; the projection of `self` is kept.
    pub fn append_below(&mut self, other: &Self) -> Result<()> {
        self.raster.append_below(&other.raster)?;
        self.sync_resolution();
        Ok(())
    }

    fn sync_resolution(&mut self) {
        self.projection = self.projection.shifted(0, 0, self.raster.resolution());
    }

    pub fn fill_missing(&mut self, value: T) {
        self.raster.fill_missing(value);
    }

    pub fn fill_missing_nearest(&mut self) -> usize {
        self.raster.fill_missing_nearest()
    }

    /// World distance from the centre pixel to its right and lower
    /// neighbours.
    pub fn gsd(&self) -> Result<DVec2> {
        pixel_spacing(&self.projection)
    }

    /// The finer of the two axis GSDs.
    pub fn ground_sample_distance(&self) -> Result<f64> {
        let g = self.gsd()?;
        Ok(g.x.min(g.y))
    }

    /// Nearest-pixel resample of `other` into this grid.
    ///
    /// Pixels that fail to project, or land outside `other`, become invalid.
    pub fn sample_from<U: Sample>(&mut self, other: &GeoreferencedRaster<U>) -> Result<()> {
        let session = self.projection.to_map(&other.projection)?;
        let Resolution { width, height } = self.resolution();
        for y in 0..height {
            for x in 0..width {
                let value = match session.nearest(x, y) {
                    Ok(Some((u, v))) => T::from_f64(other.raster.at(u, v).to_f64()),
                    Ok(None) | Err(_) => T::INVALID,
                };
                self.raster.set(x, y, value);
            }
        }
        Ok(())
    }

    /// Per-pixel flags: valid here, and the nearest pixel of `other` is in
    /// bounds and valid.
    ///
    /// Pixels that fail to project are not flagged.
    pub fn overlap_mask<U: Sample>(&self, other: &GeoreferencedRaster<U>) -> Result<Vec<bool>> {
        let session = self.projection.to_map(&other.projection)?;
        let Resolution { width, height } = self.resolution();
        let mut mask = vec![false; width * height];
        for y in 0..height {
            for x in 0..width {
                if !self.raster.is_valid(x, y) {
                    continue;
                }
                if let Ok(Some((u, v))) = session.nearest(x, y) {
                    mask[y * width + x] = other.raster.is_valid(u, v);
                }
            }
        }
        Ok(mask)
    }

    /// Invalidate every pixel already covered by `other`. Returns how many
    /// were removed.
    pub fn remove_overlap<U: Sample>(&mut self, other: &GeoreferencedRaster<U>) -> Result<usize> {
        let mask = self.overlap_mask(other)?;
        let mut removed = 0;
        for (v, _) in self
            .raster
            .data_mut()
            .iter_mut()
            .zip(&mask)
            .filter(|(_, m)| **m)
        {
            *v = T::INVALID;
            removed += 1;
        }
        Ok(removed)
    }

    /// Tile so that no tile exceeds `max_vertices`; see [`tile_grid`].
    pub fn tile(&self, max_vertices: usize, overlap: usize) -> Result<Vec<Self>> {
        let (rows, cols) = tile_grid(self.resolution(), max_vertices, overlap);
        self.manual_tile(rows, cols, overlap)
    }

    /// Cut into `rows × cols` tiles; see [`tile_regions`]. Wholly invalid
    /// tiles are dropped.
    pub fn manual_tile(&self, rows: usize, cols: usize, overlap: usize) -> Result<Vec<Self>> {
        let mut tiles = Vec::new();
        for (index, roi) in tile_regions(self.resolution(), rows, cols, overlap) {
            let mut tile = self.crop(roi)?;
            if tile.raster.is_fully_invalid() {
                warn!(tile = %index, "dropping wholly invalid tile");
                continue;
            }
            tile.projection.set_tile(Some(index));
            tiles.push(tile);
        }
        Ok(tiles)
    }
}

pub(crate) fn pixel_spacing(projection: &SpatialProjection) -> Result<DVec2> {
    let Resolution { width, height } = projection.resolution();
    let cx = (width / 2) as f64;
    let cy = (height / 2) as f64;
    let session = projection.to_world()?;
    let c = session.apply(cx, cy, 0.0)?;
    let right = session.apply(cx + 1.0, cy, 0.0)?;
    let below = session.apply(cx, cy + 1.0, 0.0)?;
    Ok(DVec2::new(c.distance(right), c.distance(below)))
}

/// Rows and columns of a tiling whose tiles, overlap included, hold at most
/// `max_vertices` samples.
///
/// Starts from `cols = ceil(W / sqrt(max_vertices))` and `rows` scaled by the
/// aspect ratio, then grows both by one until the budget holds (or the grid
/// is one pixel per tile).
pub fn tile_grid(resolution: Resolution, max_vertices: usize, overlap: usize) -> (usize, usize) {
    let Resolution { width, height } = resolution;
    if resolution.is_empty() {
        return (0, 0);
    }
    let budget = max_vertices.max(1) as f64;
    let mut cols = ((width as f64 / budget.sqrt()).ceil() as usize).clamp(1, width);
    let mut rows = ((cols as f64 * height as f64 / width as f64).ceil() as usize).clamp(1, height);

    let tile_size = |rows: usize, cols: usize| {
        (width.div_ceil(cols) + overlap) * (height.div_ceil(rows) + overlap)
    };
    while tile_size(rows, cols) > max_vertices && (rows < height || cols < width) {
        rows = (rows + 1).min(height);
        cols = (cols + 1).min(width);
    }
    debug!(%resolution, rows, cols, max_vertices, overlap, "tile grid");
    (rows, cols)
}

/// Regions of a `rows × cols` tiling.
///
/// Tile `k` along an axis starts at `floor(k·W/cols)`; it extends to the next
/// tile's start plus `overlap` pixels, clamped to the raster.
pub fn tile_regions(
    resolution: Resolution,
    rows: usize,
    cols: usize,
    overlap: usize,
) -> Vec<(TileIndex, Roi)> {
    let Resolution { width, height } = resolution;
    if resolution.is_empty() || rows == 0 || cols == 0 {
        return Vec::new();
    }
    let rows = rows.min(height);
    let cols = cols.min(width);
    let bound = |k: usize, n: usize, size: usize| k * size / n;

    let mut regions = Vec::with_capacity(rows * cols);
    for r in 0..rows {
        let y0 = bound(r, rows, height);
        let y1 = (bound(r + 1, rows, height) + overlap).min(height);
        for c in 0..cols {
            let x0 = bound(c, cols, width);
            let x1 = (bound(c + 1, cols, width) + overlap).min(width);
            regions.push((
                TileIndex {
                    rows: rows as u32,
                    cols: cols as u32,
                    row: r as u32,
                    col: c as u32,
                },
                Roi::new(x0, y0, x1 - x0, y1 - y0),
            ));
        }
    }
    regions
}
