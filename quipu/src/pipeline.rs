//! Batch jobs over whole surfaces and sets of Quipu files.

use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::config::{BuildOptions, ReaderOptions, WriterOptions};
use crate::error::Result;
use crate::projection::TileIndex;
use crate::raster::Resolution;
use crate::store::{write_pyramid, TiledPyramidStore, FILE_EXTENSION};
use crate::surface::ElevationSurface;
use crate::transform::RigidTransform;

/// One Quipu file produced by [`build_tiles`].
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltTile {
    pub path: PathBuf,
    pub tile: Option<TileIndex>,
    pub resolution: Resolution,
    pub levels: usize,
    pub finest_gsd: f64,
    pub coarsest_gsd: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildReport {
    /// Written files, in tile order.
    pub tiles: Vec<BuiltTile>,
}

impl BuildReport {
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.tiles.iter().map(|t| t.path.as_path())
    }
}

/// Name of the `index`th tile file of `stem`.
pub fn tile_filename(stem: &str, index: usize) -> String {
    format!("{stem}_tile-{index}.{FILE_EXTENSION}")
}

/// Tile `surface`, build a pyramid per tile and write `{stem}_tile-{k}.qld`
/// files into `out_dir`.
///
/// Each file's rigid transform is placed at its tile's origin.
pub fn build_tiles<P: AsRef<Path>>(
    surface: &ElevationSurface,
    out_dir: P,
    stem: &str,
    options: &BuildOptions,
) -> Result<BuildReport> {
    build_tiles_with(surface, out_dir, stem, options, |_| {})
}

/// [`build_tiles`], calling `on_tile` as each file is written.
///
/// `on_tile` runs on the worker threads, in no particular order.
pub fn build_tiles_with<P, F>(
    surface: &ElevationSurface,
    out_dir: P,
    stem: &str,
    options: &BuildOptions,
    on_tile: F,
) -> Result<BuildReport>
where
    P: AsRef<Path>,
    F: Fn(&BuiltTile) + Sync,
{
    let out_dir = out_dir.as_ref();
    let resolution = surface.resolution();
    if resolution.is_empty() {
        warn!(%resolution, "skipping empty surface");
        return Ok(BuildReport::default());
    }
    std::fs::create_dir_all(out_dir)?;

    let tiles = surface.tile(options.max_vertices, options.overlap)?;
    info!(
        %resolution,
        tiles = tiles.len(),
        max_vertices = options.max_vertices,
        overlap = options.overlap,
        "building tiles"
    );

    let built = tiles
        .par_iter()
        .enumerate()
        .map(|(k, tile)| {
            let path = out_dir.join(tile_filename(stem, k));
            let built = build_one(tile, &path, options)?;
            if let Some(b) = &built {
                on_tile(b);
            }
            Ok(built)
        })
        .collect::<Result<Vec<_>>>()?;

    let report = BuildReport {
        tiles: built.into_iter().flatten().collect(),
    };
    info!(files = report.len(), dir = %out_dir.display(), "build complete");
    Ok(report)
}

fn build_one(tile: &ElevationSurface, path: &Path, options: &BuildOptions) -> Result<Option<BuiltTile>> {
    let Some(origin) = tile.compute_origin()? else {
        warn!(path = %path.display(), "skipping tile without valid samples");
        return Ok(None);
    };
    let levels = tile.make_pyramid(options.min_resolution, options.fill_missing)?;
    let (Some(finest), Some(coarsest)) = (levels.first(), levels.last()) else {
        return Ok(None);
    };
    let built = BuiltTile {
        path: path.to_path_buf(),
        tile: tile.projection().tile(),
        resolution: tile.resolution(),
        levels: levels.len(),
        finest_gsd: finest.gsd,
        coarsest_gsd: coarsest.gsd,
    };
    write_pyramid(path, &levels, RigidTransform::from_position(origin), &options.writer)?;
    debug!(
        path = %path.display(),
        levels = built.levels,
        finest_gsd = built.finest_gsd,
        "wrote tile"
    );
    Ok(Some(built))
}

/// What happened to one file in [`remove_overlaps`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlapOutcome {
    /// Nothing overlapped; the file was left alone.
    Unchanged,
    /// Overlapping samples were invalidated and the file rewritten.
    Rewritten { removed: usize },
    /// The finest level became wholly invalid and the file was deleted.
    Deleted,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverlapReport {
    /// One entry per input file, in input order.
    pub files: Vec<(PathBuf, OverlapOutcome)>,
}

impl OverlapReport {
    fn count(&self, f: impl Fn(&OverlapOutcome) -> bool) -> usize {
        self.files.iter().filter(|(_, o)| f(o)).count()
    }

    pub fn rewritten(&self) -> usize {
        self.count(|o| matches!(o, OverlapOutcome::Rewritten { .. }))
    }

    pub fn deleted(&self) -> usize {
        self.count(|o| matches!(o, OverlapOutcome::Deleted))
    }

    /// Samples invalidated across every level of every file.
    pub fn removed_samples(&self) -> usize {
        self.files
            .iter()
            .map(|(_, o)| match o {
                OverlapOutcome::Rewritten { removed } => *removed,
                _ => 0,
            })
            .sum()
    }
}

/// Invalidate every sample of `files` already covered by `base`.
///
/// Each file keeps its transform, compression and albedo settings. A file
/// left with no valid sample at its finest level is deleted.
pub fn remove_overlaps<P: AsRef<Path> + Sync>(
    base: &ElevationSurface,
    files: &[P],
) -> Result<OverlapReport> {
    let outcomes = files
        .par_iter()
        .map(|path| {
            let path = path.as_ref();
            Ok((path.to_path_buf(), remove_overlap_from(base, path)?))
        })
        .collect::<Result<Vec<_>>>()?;

    let report = OverlapReport { files: outcomes };
    info!(
        files = files.len(),
        rewritten = report.rewritten(),
        deleted = report.deleted(),
        removed = report.removed_samples(),
        "overlap removal complete"
    );
    Ok(report)
}

fn remove_overlap_from(base: &ElevationSurface, path: &Path) -> Result<OverlapOutcome> {
    let store = TiledPyramidStore::open(path, ReaderOptions::default())?;
    let writer = WriterOptions {
        compress: store.is_compressed()?,
        write_albedo: store.has_albedo(),
    };
    let transform = *store.transform();
    let mut levels = store.read_pyramid()?;

    let mut removed = 0;
    for level in &mut levels {
        removed += level.surface.remove_overlap(base)?;
    }

    let finest_empty = levels
        .first()
        .map_or(true, |l| l.surface.heights().raster().is_fully_invalid());
    if finest_empty {
        std::fs::remove_file(path)?;
        warn!(path = %path.display(), "deleted fully overlapped file");
        return Ok(OverlapOutcome::Deleted);
    }
    if removed == 0 {
        return Ok(OverlapOutcome::Unchanged);
    }
    write_pyramid(path, &levels, transform, &writer)?;
    debug!(path = %path.display(), removed, "rewrote file");
    Ok(OverlapOutcome::Rewritten { removed })
}
