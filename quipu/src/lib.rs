//! # Quipu - Tiled Multi-Resolution Elevation Storage
//!
//! Build level-of-detail pyramids from digital elevation models and store
//! each tile's pyramid in a single binary file that a renderer can read one
//! level at a time.
//!
//! ## Features
//!
//! - **Georeferenced**: Cartographic (PROJ/EPSG) and local-tangent pixel ↔ world transforms
//! - **Compact**: Heights quantized to 8/16 bits whenever the error stays below GSD/50
//! - **Lazy**: Opening a file reads its header only; levels are decoded on demand
//! - **Parallel**: Tiling, resampling and meshing run on rayon
//!
//! ## Quick Start
//!
//! ```ignore
//! use quipu::{hgt, BuildOptions, ElevationSurface, ReaderOptions, TiledPyramidStore};
//!
//! // Load a DEM and cut it into Quipu tiles
//! let dem = hgt::load("/data/N35E138.hgt")?;
//! let surface = ElevationSurface::new(dem, Default::default())?;
//! let report = quipu::build_tiles(&surface, "/data/tiles", "N35E138", &BuildOptions::default())?;
//!
//! // Read a tile at the level a 30 m/pixel view needs
//! let mut store = TiledPyramidStore::open(&report.tiles[0].path, ReaderOptions::default())?;
//! let buffers = store.read_buffers(30.0)?;
//! println!("{} triangles", buffers.indices.len() / 3);
//! ```
//!
//! ## Quipu File Format
//!
//! A Quipu file holds a rigid transform, a visibility cone, a table of
//! contents with one `(gsd, offset)` entry per level (finest first), and one
//! self-contained block per level. See [`store`] for the byte layout.

pub mod catalog;
pub mod codec;
pub mod compression;
pub mod config;
pub mod error;
pub mod geodesy;
pub mod georaster;
pub mod hgt;
pub mod mesh;
pub mod pipeline;
pub mod projection;
pub mod quantize;
pub mod raster;
pub mod store;
pub mod surface;
pub mod transform;

// Re-export main types at crate root for convenience
pub use catalog::{CacheStats, CatalogBuilder, QuipuCatalog};
pub use config::{BuildOptions, ReaderOptions, WriterOptions};
pub use error::{QuipuError, Result};
pub use georaster::GeoreferencedRaster;
pub use mesh::{IndexBuffer, VertexBuffer, VisibilityCone};
pub use pipeline::{build_tiles, remove_overlaps, BuildReport, OverlapReport};
pub use projection::{ProjectionMode, SpatialProjection, TileIndex};
pub use raster::{Raster, Resolution, Roi};
pub use store::{write_pyramid, MeshBuffers, TiledPyramidStore};
pub use surface::{Albedo, ElevationSurface, PyramidLevel};
pub use transform::RigidTransform;
