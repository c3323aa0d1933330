//! Pixel ↔ world coordinate transforms.
//!
//! A [`SpatialProjection`] is a raster-space affine (pixel → "model pixel" of
//! the raster the georeference was defined on) followed by one of two modes:
//!
//! - [`ProjectionMode::Cartographic`]: model pixel → geotransform → map
//!   coordinates in a PROJ.4 system → longitude/latitude on the reference
//!   ellipsoid → Earth-centred Cartesian.
//! - [`ProjectionMode::LocalTangent`]: a symmetric scale about the centre of
//!   the defining raster, with `+y` pointing up (north) and `z` the height.
//!   No datum is involved.
//!
//! Resizing or cropping a raster only touches the raster-space affine, so
//! the world footprint of every pixel stays put.
//!
//! Conversions go through scoped sessions ([`ToWorld`], [`FromWorld`],
//! [`ToMap`]) that parse the backend systems once and release them when
//! dropped. A session is meant to live on one thread for a batch of points.

use std::fmt;
use std::io::{Read, Write};

use glam::{DVec2, DVec3};
use proj4rs::proj::Proj;

use crate::codec::{
    read_resolution, read_string, read_value, read_vec, write_resolution, write_string,
    write_value, write_vec,
};
use crate::error::{QuipuError, Result};
use crate::geodesy::{self, Ellipsoid};
use crate::raster::Resolution;

/// Position of a tile in the grid it was cut from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileIndex {
    pub rows: u32,
    pub cols: u32,
    pub row: u32,
    pub col: u32,
}

impl fmt::Display for TileIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}_c{}", self.row, self.col)
    }
}

/// Cartographic georeference.
///
/// Geotransform in GDAL order: `X = tie.x + c·scale.x + r·rotation.x` and
/// `Y = tie.y + c·rotation.y + r·scale.y` for model column `c`, row `r`.
#[derive(Debug, Clone, PartialEq)]
pub struct Cartographic {
    reference: String,
    definition: String,
    ellipsoid: Ellipsoid,
    tie: DVec2,
    scale: DVec2,
    rotation: DVec2,
}

impl Cartographic {
    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Resolved PROJ.4 definition.
    pub fn definition(&self) -> &str {
        &self.definition
    }

    pub fn ellipsoid(&self) -> Ellipsoid {
        self.ellipsoid
    }

    /// The six geotransform coefficients in GDAL order.
    pub fn geo_transform(&self) -> [f64; 6] {
        [
            self.tie.x,
            self.scale.x,
            self.rotation.x,
            self.tie.y,
            self.rotation.y,
            self.scale.y,
        ]
    }

    fn is_geographic(&self) -> bool {
        geodesy::is_geographic(&self.definition)
    }

    fn model_to_map(&self, m: DVec2) -> DVec2 {
        DVec2::new(
            self.tie.x + m.x * self.scale.x + m.y * self.rotation.x,
            self.tie.y + m.x * self.rotation.y + m.y * self.scale.y,
        )
    }

    fn map_to_model(&self, p: DVec2) -> DVec2 {
        let det = self.determinant();
        let d = p - self.tie;
        DVec2::new(
            (self.scale.y * d.x - self.rotation.x * d.y) / det,
            (-self.rotation.y * d.x + self.scale.x * d.y) / det,
        )
    }

    fn determinant(&self) -> f64 {
        self.scale.x * self.scale.y - self.rotation.x * self.rotation.y
    }

    fn validate(&self) -> Result<()> {
        let det = self.determinant();
        if !det.is_finite() || det.abs() < f64::EPSILON * self.scale.abs().max_element().max(1.0) {
            return Err(QuipuError::Projection(format!(
                "singular geotransform {:?}",
                self.geo_transform()
            )));
        }
        Ok(())
    }
}

/// Local-tangent frame centred on the defining raster.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalTangent {
    center: DVec2,
    scale: DVec2,
}

impl LocalTangent {
    /// Meters per model pixel along x and y.
    pub fn scale(&self) -> DVec2 {
        self.scale
    }

    fn model_to_local(&self, m: DVec2) -> DVec2 {
        DVec2::new(
            (m.x - self.center.x) * self.scale.x,
            (self.center.y - m.y) * self.scale.y,
        )
    }

    fn local_to_model(&self, p: DVec2) -> DVec2 {
        DVec2::new(
            p.x / self.scale.x + self.center.x,
            self.center.y - p.y / self.scale.y,
        )
    }
}

/// The active transform strategy and its payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectionMode {
    Cartographic(Cartographic),
    LocalTangent(LocalTangent),
}

/// Pixel ↔ world transform for one raster.
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialProjection {
    resolution: Resolution,
    offset: DVec2,
    step: DVec2,
    tile: Option<TileIndex>,
    mode: ProjectionMode,
}

impl SpatialProjection {
    /// A cartographic projection for a raster of `resolution` whose pixel
    /// `(c, r)` maps through `geo_transform` (GDAL coefficient order).
    ///
    /// # Errors
    ///
    /// Returns [`QuipuError::Projection`] if the reference cannot be resolved
    /// or parsed, or if the geotransform is singular.
    pub fn cartographic(
        reference: &str,
        resolution: Resolution,
        geo_transform: [f64; 6],
    ) -> Result<Self> {
        let definition = geodesy::resolve_reference(reference)?;
        geodesy::parse_proj(&definition)?;
        let ellipsoid = Ellipsoid::from_proj_string(&definition)?;
        let [tx, sx, rx, ty, ry, sy] = geo_transform;
        let carto = Cartographic {
            reference: reference.trim().to_owned(),
            definition,
            ellipsoid,
            tie: DVec2::new(tx, ty),
            scale: DVec2::new(sx, sy),
            rotation: DVec2::new(rx, ry),
        };
        carto.validate()?;
        Ok(Self::with_mode(resolution, ProjectionMode::Cartographic(carto)))
    }

    /// A local-tangent projection with `scale` meters per pixel, centred on
    /// pixel `((W-1)/2, (H-1)/2)`.
    pub fn local_tangent(resolution: Resolution, scale: DVec2) -> Self {
        let center = DVec2::new(
            (resolution.width as f64 - 1.0) / 2.0,
            (resolution.height as f64 - 1.0) / 2.0,
        );
        Self::with_mode(
            resolution,
            ProjectionMode::LocalTangent(LocalTangent { center, scale }),
        )
    }

    fn with_mode(resolution: Resolution, mode: ProjectionMode) -> Self {
        Self {
            resolution,
            offset: DVec2::ZERO,
            step: DVec2::ONE,
            tile: None,
            mode,
        }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn mode(&self) -> &ProjectionMode {
        &self.mode
    }

    pub fn is_cartographic(&self) -> bool {
        matches!(self.mode, ProjectionMode::Cartographic(_))
    }

    pub fn tile(&self) -> Option<TileIndex> {
        self.tile
    }

    pub fn set_tile(&mut self, tile: Option<TileIndex>) {
        self.tile = tile;
    }

    /// Model-pixel position of pixel `(0, 0)` and model pixels per pixel.
    pub fn raster_affine(&self) -> (DVec2, DVec2) {
        (self.offset, self.step)
    }

    /// Rescale pixel spacing for a raster resampled to `resolution`.
    pub fn resize(&mut self, resolution: Resolution) {
        if self.resolution == resolution || resolution.is_empty() {
            self.resolution = resolution;
            return;
        }
        self.step.x *= self.resolution.width as f64 / resolution.width as f64;
        self.step.y *= self.resolution.height as f64 / resolution.height as f64;
        self.resolution = resolution;
    }

    /// Projection of the sub-raster whose pixel `(0, 0)` is pixel `(x, y)`
    /// of this one.
    pub fn shifted(&self, x: usize, y: usize, resolution: Resolution) -> Self {
        let mut out = self.clone();
        out.offset += DVec2::new(x as f64, y as f64) * self.step;
        out.resolution = resolution;
        out
    }

    #[inline]
    fn pixel_to_model(&self, pixel: DVec2) -> DVec2 {
        pixel * self.step + self.offset
    }

    #[inline]
    fn model_to_pixel(&self, model: DVec2) -> DVec2 {
        (model - self.offset) / self.step
    }

    /// Open a pixel → world session.
    pub fn to_world(&self) -> Result<ToWorld<'_>> {
        let backend = match &self.mode {
            ProjectionMode::Cartographic(c) if !c.is_geographic() => {
                let source = geodesy::parse_proj(&c.definition)?;
                let target = geodesy::parse_proj(&c.ellipsoid.geographic_definition())?;
                Some((source, target))
            }
            _ => None,
        };
        Ok(ToWorld {
            projection: self,
            backend,
        })
    }

    /// Open a world → pixel session.
    ///
    /// World input is `[lon°, lat°]` for cartographic projections and local
    /// `[x, y]` for local-tangent ones.
    pub fn from_world(&self) -> Result<FromWorld<'_>> {
        let backend = match &self.mode {
            ProjectionMode::Cartographic(c) if !c.is_geographic() => {
                let source = geodesy::parse_proj(&c.ellipsoid.geographic_definition())?;
                let target = geodesy::parse_proj(&c.definition)?;
                Some((source, target))
            }
            _ => None,
        };
        Ok(FromWorld {
            projection: self,
            backend,
        })
    }

    /// Open a session mapping this raster's pixels into `target`'s pixels.
    ///
    /// # Errors
    ///
    /// Returns [`QuipuError::ProjectionModeMismatch`] when one projection is
    /// cartographic and the other local-tangent.
    pub fn to_map<'a>(&'a self, target: &'a SpatialProjection) -> Result<ToMap<'a>> {
        let backend = match (&self.mode, &target.mode) {
            (ProjectionMode::Cartographic(src), ProjectionMode::Cartographic(dst)) => {
                if src.definition == dst.definition {
                    None
                } else {
                    Some(MapBackend {
                        source: geodesy::parse_proj(&src.definition)?,
                        source_geographic: src.is_geographic(),
                        target: geodesy::parse_proj(&dst.definition)?,
                        target_geographic: dst.is_geographic(),
                    })
                }
            }
            (ProjectionMode::LocalTangent(_), ProjectionMode::LocalTangent(_)) => None,
            _ => return Err(QuipuError::ProjectionModeMismatch),
        };
        Ok(ToMap {
            source: self,
            target,
            backend,
        })
    }

    /// Write the projection block.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<usize> {
        let mut n = match &self.mode {
            ProjectionMode::Cartographic(_) => write_value(writer, 0u8)?,
            ProjectionMode::LocalTangent(_) => write_value(writer, 1u8)?,
        };
        n += write_resolution(writer, self.resolution)?;
        n += write_vec(writer, &self.offset.to_array())?;
        n += write_vec(writer, &self.step.to_array())?;
        match self.tile {
            Some(t) => {
                n += write_value(writer, 1u8)?;
                for v in [t.rows, t.cols, t.row, t.col] {
                    n += write_value(writer, v)?;
                }
            }
            None => n += write_value(writer, 0u8)?,
        }
        match &self.mode {
            ProjectionMode::Cartographic(c) => {
                n += write_string(writer, &c.reference)?;
                n += write_string(writer, &c.definition)?;
                n += write_vec(writer, &[c.ellipsoid.a, c.ellipsoid.b])?;
                n += write_vec(writer, &[c.tie.x, c.scale.x, c.rotation.x])?;
                n += write_vec(writer, &[c.tie.y, c.rotation.y, c.scale.y])?;
            }
            ProjectionMode::LocalTangent(l) => {
                n += write_vec(writer, &l.center.to_array())?;
                n += write_vec(writer, &l.scale.to_array())?;
            }
        }
        Ok(n)
    }

    /// Read a block written by [`write_to`](Self::write_to).
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let kind: u8 = read_value(reader)?;
        let resolution = read_resolution(reader)?;
        let offset = DVec2::from_array(read_vec(reader)?);
        let step = DVec2::from_array(read_vec(reader)?);
        let tile = match read_value::<u8, _>(reader)? {
            0 => None,
            _ => {
                let mut v = [0u32; 4];
                for slot in v.iter_mut() {
                    *slot = read_value(reader)?;
                }
                Some(TileIndex {
                    rows: v[0],
                    cols: v[1],
                    row: v[2],
                    col: v[3],
                })
            }
        };
        let mode = match kind {
            0 => {
                let reference = read_string(reader)?;
                let definition = read_string(reader)?;
                let [a, b]: [f64; 2] = read_vec(reader)?;
                let [tx, sx, rx]: [f64; 3] = read_vec(reader)?;
                let [ty, ry, sy]: [f64; 3] = read_vec(reader)?;
                let carto = Cartographic {
                    reference,
                    definition,
                    ellipsoid: Ellipsoid { a, b },
                    tie: DVec2::new(tx, ty),
                    scale: DVec2::new(sx, sy),
                    rotation: DVec2::new(rx, ry),
                };
                carto.validate()?;
                ProjectionMode::Cartographic(carto)
            }
            1 => ProjectionMode::LocalTangent(LocalTangent {
                center: DVec2::from_array(read_vec(reader)?),
                scale: DVec2::from_array(read_vec(reader)?),
            }),
            other => {
                return Err(QuipuError::CorruptFile(format!(
                    "unknown projection mode {other}"
                )))
            }
        };
        Ok(Self {
            resolution,
            offset,
            step,
            tile,
            mode,
        })
    }
}

/// Pixel → world session.
pub struct ToWorld<'a> {
    projection: &'a SpatialProjection,
    backend: Option<(Proj, Proj)>,
}

impl ToWorld<'_> {
    /// World position of pixel `(x, y)` carrying `height`.
    pub fn apply(&self, x: f64, y: f64, height: f64) -> Result<DVec3> {
        let model = self.projection.pixel_to_model(DVec2::new(x, y));
        match &self.projection.mode {
            ProjectionMode::Cartographic(c) => {
                let map = c.model_to_map(model);
                let (lon, lat) = match &self.backend {
                    Some((source, target)) => {
                        geodesy::transform_point(source, false, target, true, map.x, map.y)?
                    }
                    None => (map.x, map.y),
                };
                Ok(c.ellipsoid.to_cartesian(lon, lat, height))
            }
            ProjectionMode::LocalTangent(l) => {
                let p = l.model_to_local(model);
                Ok(DVec3::new(p.x, p.y, height))
            }
        }
    }
}

/// World → pixel session.
pub struct FromWorld<'a> {
    projection: &'a SpatialProjection,
    backend: Option<(Proj, Proj)>,
}

impl FromWorld<'_> {
    /// Pixel coordinates of world point `[lon°, lat°]` or local `[x, y]`.
    pub fn apply(&self, world: DVec2) -> Result<DVec2> {
        let model = match &self.projection.mode {
            ProjectionMode::Cartographic(c) => {
                let map = match &self.backend {
                    Some((source, target)) => {
                        let (x, y) =
                            geodesy::transform_point(source, true, target, false, world.x, world.y)?;
                        DVec2::new(x, y)
                    }
                    None => world,
                };
                c.map_to_model(map)
            }
            ProjectionMode::LocalTangent(l) => l.local_to_model(world),
        };
        Ok(self.projection.model_to_pixel(model))
    }
}

struct MapBackend {
    source: Proj,
    source_geographic: bool,
    target: Proj,
    target_geographic: bool,
}

/// Raster → raster session.
pub struct ToMap<'a> {
    source: &'a SpatialProjection,
    target: &'a SpatialProjection,
    backend: Option<MapBackend>,
}

impl ToMap<'_> {
    /// Position in the target raster of source pixel `(x, y)`.
    pub fn apply(&self, x: f64, y: f64) -> Result<DVec2> {
        let model = self.source.pixel_to_model(DVec2::new(x, y));
        let target_model = match (&self.source.mode, &self.target.mode) {
            (ProjectionMode::Cartographic(src), ProjectionMode::Cartographic(dst)) => {
                let map = src.model_to_map(model);
                let map = match &self.backend {
                    Some(b) => {
                        let (x, y) = geodesy::transform_point(
                            &b.source,
                            b.source_geographic,
                            &b.target,
                            b.target_geographic,
                            map.x,
                            map.y,
                        )?;
                        DVec2::new(x, y)
                    }
                    None => map,
                };
                dst.map_to_model(map)
            }
            (ProjectionMode::LocalTangent(src), ProjectionMode::LocalTangent(dst)) => {
                dst.local_to_model(src.model_to_local(model))
            }
            _ => return Err(QuipuError::ProjectionModeMismatch),
        };
        Ok(self.target.model_to_pixel(target_model))
    }

    /// Nearest target pixel, or `None` if it falls outside the target.
    pub fn nearest(&self, x: usize, y: usize) -> Result<Option<(usize, usize)>> {
        let p = self.apply(x as f64, y as f64)?.round();
        let Resolution { width, height } = self.target.resolution;
        if p.x < 0.0 || p.y < 0.0 || p.x >= width as f64 || p.y >= height as f64 {
            return Ok(None);
        }
        Ok(Some((p.x as usize, p.y as usize)))
    }
}
