//! Terrain tiles: heights, albedo and the operations that cut, coarsen and
//! mesh them.

use glam::{DVec2, DVec3, Vec3};
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::error::{QuipuError, Result};
use crate::georaster::{self, GeoreferencedRaster};
use crate::mesh::{compute_normals, triangulate, IndexBuffer, VertexBuffer};
use crate::projection::SpatialProjection;
use crate::raster::{Raster, Resolution, Roi};

/// Surface reflectance attached to a height field.
///
/// Image variants share the heights projection and must match its
/// resolution; spectral albedo holds one image per band.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Albedo {
    #[default]
    None,
    Constant(Vec<f32>),
    Scalar(Raster<f32>),
    Spectral(Vec<Raster<f32>>),
}

impl Albedo {
    pub fn is_none(&self) -> bool {
        matches!(self, Albedo::None)
    }

    /// Values per vertex.
    pub fn bands(&self) -> usize {
        match self {
            Albedo::None => 0,
            Albedo::Constant(values) => values.len(),
            Albedo::Scalar(_) => 1,
            Albedo::Spectral(bands) => bands.len(),
        }
    }

    fn images(&self) -> &[Raster<f32>] {
        match self {
            Albedo::Scalar(image) => std::slice::from_ref(image),
            Albedo::Spectral(bands) => bands,
            Albedo::None | Albedo::Constant(_) => &[],
        }
    }

    fn map_images<F>(&self, f: F) -> Result<Self>
    where
        F: Fn(&Raster<f32>) -> Result<Raster<f32>>,
    {
        Ok(match self {
            Albedo::Scalar(image) => Albedo::Scalar(f(image)?),
            Albedo::Spectral(bands) => {
                Albedo::Spectral(bands.iter().map(f).collect::<Result<_>>()?)
            }
            other => other.clone(),
        })
    }

    fn for_each_image_mut(&mut self, mut f: impl FnMut(&mut Raster<f32>)) {
        match self {
            Albedo::Scalar(image) => f(image),
            Albedo::Spectral(bands) => bands.iter_mut().for_each(f),
            Albedo::None | Albedo::Constant(_) => {}
        }
    }
}

/// One level of a pyramid and its ground sample distance.
#[derive(Debug, Clone, PartialEq)]
pub struct PyramidLevel {
    pub gsd: f64,
    pub surface: ElevationSurface,
}

/// A height field with albedo and projection.
#[derive(Debug, Clone, PartialEq)]
pub struct ElevationSurface {
    heights: GeoreferencedRaster<f32>,
    albedo: Albedo,
}

impl ElevationSurface {
    /// # Errors
    ///
    /// Returns [`QuipuError::ResolutionMismatch`] if an albedo image does not
    /// match the heights.
    pub fn new(heights: GeoreferencedRaster<f32>, albedo: Albedo) -> Result<Self> {
        check_albedo(heights.resolution(), &albedo)?;
        Ok(Self { heights, albedo })
    }

    /// A surface without albedo.
    pub fn from_heights(raster: Raster<f32>, projection: SpatialProjection) -> Result<Self> {
        Self::new(GeoreferencedRaster::new(raster, projection)?, Albedo::None)
    }

    pub fn heights(&self) -> &GeoreferencedRaster<f32> {
        &self.heights
    }

    pub fn heights_mut(&mut self) -> &mut GeoreferencedRaster<f32> {
        &mut self.heights
    }

    pub fn albedo(&self) -> &Albedo {
        &self.albedo
    }

    pub fn set_albedo(&mut self, albedo: Albedo) -> Result<()> {
        check_albedo(self.resolution(), &albedo)?;
        self.albedo = albedo;
        Ok(())
    }

    pub fn projection(&self) -> &SpatialProjection {
        self.heights.projection()
    }

    pub fn resolution(&self) -> Resolution {
        self.heights.resolution()
    }

    pub fn into_parts(self) -> (GeoreferencedRaster<f32>, Albedo) {
        (self.heights, self.albedo)
    }

    /// Multiply every valid height by `factor`.
    pub fn scale_heights(&mut self, factor: f64) {
        self.heights.raster_mut().scale_values(factor);
    }

    /// Bilinear resample of heights and albedo images.
    pub fn resize(&self, resolution: Resolution) -> Self {
        let albedo = match &self.albedo {
            Albedo::Scalar(image) => Albedo::Scalar(image.resize(resolution)),
            Albedo::Spectral(bands) => {
                Albedo::Spectral(bands.par_iter().map(|b| b.resize(resolution)).collect())
            }
            other => other.clone(),
        };
        Self {
            heights: self.heights.resize(resolution),
            albedo,
        }
    }

    pub fn crop(&self, roi: Roi) -> Result<Self> {
        Ok(Self {
            heights: self.heights.crop(roi)?,
            albedo: self.albedo.map_images(|image| image.crop(roi))?,
        })
    }

    /// Nearest-valid fill of heights and albedo images.
    pub fn fill_missing(&mut self) -> usize {
        self.albedo.for_each_image_mut(|image| {
            image.fill_missing_nearest();
        });
        self.heights.fill_missing_nearest()
    }

    pub fn gsd(&self) -> Result<DVec2> {
        self.heights.gsd()
    }

    pub fn ground_sample_distance(&self) -> Result<f64> {
        self.heights.ground_sample_distance()
    }

    /// Mean world position of the valid samples, or `None` if there are
    /// none.
    pub fn compute_origin(&self) -> Result<Option<DVec3>> {
        let session = self.projection().to_world()?;
        let raster = self.heights.raster();
        let mut sum = DVec3::ZERO;
        let mut count = 0usize;
        for y in 0..raster.height() {
            for x in 0..raster.width() {
                let h = raster.at(x, y);
                if h.is_finite() {
                    sum += session.apply(x as f64, y as f64, h as f64)?;
                    count += 1;
                }
            }
        }
        Ok((count > 0).then(|| sum / count as f64))
    }

    /// Levels from native resolution down to `min_resolution`, halving each
    /// time.
    ///
    /// The level count is `floor(min(log2(W/minW), log2(H/minH))) + 1`, and at
    /// least one. With `fill_first`, holes in the native level are filled
    /// once before the first downsample.
    pub fn make_pyramid(
        &self,
        min_resolution: Resolution,
        fill_first: bool,
    ) -> Result<Vec<PyramidLevel>> {
        let resolution = self.resolution();
        if resolution.is_empty() {
            warn!(%resolution, "skipping pyramid of empty surface");
            return Ok(Vec::new());
        }
        let count = pyramid_levels(resolution, min_resolution);

        let mut current = self.clone();
        if fill_first {
            let filled = current.fill_missing();
            debug!(filled, "filled native level before pyramid");
        }

        let mut levels = Vec::with_capacity(count);
        for k in 0..count {
            if k > 0 {
                current = current.resize(current.resolution().halved());
            }
            let gsd = current.ground_sample_distance()?;
            debug!(level = k, resolution = %current.resolution(), gsd, "pyramid level");
            levels.push(PyramidLevel {
                gsd,
                surface: current.clone(),
            });
        }
        Ok(levels)
    }

    /// Tile so that no tile exceeds `max_vertices` samples.
    pub fn tile(&self, max_vertices: usize, overlap: usize) -> Result<Vec<Self>> {
        let (rows, cols) = georaster::tile_grid(self.resolution(), max_vertices, overlap);
        self.manual_tile(rows, cols, overlap)
    }

    /// Cut into `rows × cols` tiles sharing `overlap` border pixels. Wholly
    /// invalid tiles are dropped.
    pub fn manual_tile(&self, rows: usize, cols: usize, overlap: usize) -> Result<Vec<Self>> {
        let regions = georaster::tile_regions(self.resolution(), rows, cols, overlap);
        let mut tiles = Vec::with_capacity(regions.len());
        for (index, roi) in regions {
            let mut tile = self.crop(roi)?;
            if tile.heights.raster().is_fully_invalid() {
                warn!(tile = %index, "dropping wholly invalid tile");
                continue;
            }
            tile.heights.projection_mut().set_tile(Some(index));
            tiles.push(tile);
        }
        debug!(rows, cols, overlap, kept = tiles.len(), "tiled surface");
        Ok(tiles)
    }

    /// Invalidate heights (and albedo) already covered by valid heights of
    /// `other`. Returns the number of samples removed.
    pub fn remove_overlap(&mut self, other: &ElevationSurface) -> Result<usize> {
        let mask = self.heights.overlap_mask(other.heights())?;
        let mut removed = 0;
        for (h, _) in self
            .heights
            .raster_mut()
            .data_mut()
            .iter_mut()
            .zip(&mask)
            .filter(|(_, m)| **m)
        {
            *h = f32::INFINITY;
            removed += 1;
        }
        self.albedo.for_each_image_mut(|image| {
            for (a, _) in image.data_mut().iter_mut().zip(&mask).filter(|(_, m)| **m) {
                *a = f32::INFINITY;
            }
        });
        Ok(removed)
    }

    /// One vertex per sample at its world position minus `offset`.
    ///
    /// Invalid samples yield infinite positions. Vertices carry the surface
    /// albedo, with `default_albedo` standing in for missing values.
    pub fn make_vertex_buffer(&self, offset: DVec3, default_albedo: f32) -> Result<VertexBuffer> {
        let resolution = self.resolution();
        let width = resolution.width;
        let raster = self.heights.raster();
        let projection = self.projection();

        let mut positions = vec![Vec3::INFINITY; resolution.pixel_count()];
        if !resolution.is_empty() {
            positions
                .par_chunks_mut(width)
                .enumerate()
                .try_for_each_init(
                    || projection.to_world(),
                    |session, (y, row)| -> Result<()> {
                        let session = session
                            .as_ref()
                            .map_err(|e| QuipuError::Projection(e.to_string()))?;
                        for (x, p) in row.iter_mut().enumerate() {
                            let h = raster.at(x, y);
                            if h.is_finite() {
                                let world = session.apply(x as f64, y as f64, h as f64)?;
                                *p = (world - offset).as_vec3();
                            }
                        }
                        Ok(())
                    },
                )?;
        }

        let (albedo_bands, albedos) = self.vertex_albedo(default_albedo);
        Ok(VertexBuffer {
            resolution,
            offset,
            positions,
            normals: Vec::new(),
            albedo_bands,
            albedos,
        })
    }

    fn vertex_albedo(&self, default_albedo: f32) -> (usize, Vec<f32>) {
        let n = self.resolution().pixel_count();
        match &self.albedo {
            Albedo::None => (1, vec![default_albedo; n]),
            Albedo::Constant(values) if values.is_empty() => (1, vec![default_albedo; n]),
            Albedo::Constant(values) => {
                let bands = values.len();
                (bands, values.iter().copied().cycle().take(n * bands).collect())
            }
            Albedo::Scalar(_) | Albedo::Spectral(_) => {
                let images = self.albedo.images();
                let bands = images.len();
                let mut out = Vec::with_capacity(n * bands);
                for i in 0..n {
                    for image in images {
                        let v = image.data()[i];
                        out.push(if v.is_finite() { v } else { default_albedo });
                    }
                }
                (bands, out)
            }
        }
    }

    /// Triangles over every 2×2 block of valid samples.
    pub fn make_index_buffer(&self) -> IndexBuffer {
        let valid: Vec<Vec3> = self
            .heights
            .raster()
            .data()
            .iter()
            .map(|h| if h.is_finite() { Vec3::ZERO } else { Vec3::INFINITY })
            .collect();
        triangulate(&VertexBuffer {
            resolution: self.resolution(),
            positions: valid,
            ..Default::default()
        })
    }

    /// Vertex buffer with normals, and its index buffer.
    pub fn make_mesh(&self, offset: DVec3, default_albedo: f32) -> Result<(VertexBuffer, IndexBuffer)> {
        let mut vertices = self.make_vertex_buffer(offset, default_albedo)?;
        let indices = triangulate(&vertices);
        compute_normals(&mut vertices, &indices);
        Ok((vertices, indices))
    }
}

/// `floor(min(log2(W/minW), log2(H/minH))) + 1`, at least one.
pub fn pyramid_levels(resolution: Resolution, min_resolution: Resolution) -> usize {
    let ratio = |n: usize, min: usize| (n as f64 / min.max(1) as f64).log2();
    let levels = ratio(resolution.width, min_resolution.width)
        .min(ratio(resolution.height, min_resolution.height))
        .floor();
    if levels.is_finite() && levels > 0.0 {
        levels as usize + 1
    } else {
        1
    }
}

fn check_albedo(resolution: Resolution, albedo: &Albedo) -> Result<()> {
    for image in albedo.images() {
        if image.resolution() != resolution {
            return Err(QuipuError::ResolutionMismatch {
                expected: resolution,
                found: image.resolution(),
            });
        }
    }
    Ok(())
}
