//! The Quipu container: one tile's full LOD pyramid in a single file.
//!
//! # Layout
//!
//! All values host-endian, no padding:
//!
//! | Field | Encoding |
//! |-------|----------|
//! | magic | `"QUIPU"` (5 bytes) |
//! | class | `u16` = 2002 (`DemPyramid`) |
//! | transform | tagged vec3 `f64` position, tagged mat3 `f64` rotation, tagged vec3 `f64` scale |
//! | LOD count | `u16` |
//! | has albedo | `u8` |
//! | visibility cone | tagged vec3 `f32` normal, typed `f32` half-angle |
//! | TOC | LOD count × (`f64` gsd, `u64` offset), finest first |
//! | LOD blocks | projection, heights, albedo (if present) |
//!
//! Each LOD block is self-contained, so a reader seeks straight to the one
//! it needs.
//!
//! # Concurrency
//!
//! A [`TiledPyramidStore`] caches the most recently decoded level, so
//! [`TiledPyramidStore::read_buffers`] takes `&mut self`. Share one store
//! across threads behind a lock, or call
//! [`TiledPyramidStore::load_buffers`], which caches nothing.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::NamedTempFile;
use tracing::debug;

use crate::codec::{expect_class, read_value, write_class_id, write_slice, write_value, ClassId};
use crate::config::{ReaderOptions, WriterOptions};
use crate::error::{QuipuError, Result};
use crate::georaster::GeoreferencedRaster;
use crate::mesh::{IndexBuffer, VertexBuffer, VisibilityCone};
use crate::projection::SpatialProjection;
use crate::quantize::{peek_heights_compressed, read_albedo, read_heights, write_albedo, write_heights};
use crate::surface::{Albedo, ElevationSurface, PyramidLevel};
use crate::transform::RigidTransform;

/// File identifier.
pub const MAGIC: &[u8; 5] = b"QUIPU";

/// Conventional file extension.
pub const FILE_EXTENSION: &str = "qld";

const TOC_ENTRY_SIZE: u64 = 16;

/// One table-of-contents entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TocEntry {
    pub gsd: f64,
    pub offset: u64,
}

/// Everything before the first LOD block.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreHeader {
    pub transform: RigidTransform,
    pub has_albedo: bool,
    pub cone: VisibilityCone,
    pub toc: Vec<TocEntry>,
    /// Byte length of the header, TOC included.
    pub header_len: u64,
}

impl StoreHeader {
    pub fn lod_count(&self) -> usize {
        self.toc.len()
    }

    /// Index of the coarsest level whose GSD still meets `required_gsd`.
    ///
    /// Falls back to the finest level when none does.
    pub fn select_level(&self, required_gsd: f64) -> usize {
        let mut selected = 0;
        for (i, entry) in self.toc.iter().enumerate() {
            if entry.gsd <= required_gsd {
                selected = i;
            }
        }
        selected
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> Result<u64> {
        let lod_count = u16::try_from(self.toc.len()).map_err(|_| {
            QuipuError::InvalidPyramid(format!("{} levels do not fit a u16", self.toc.len()))
        })?;
        let mut n = write_slice(writer, &MAGIC[..])?;
        n += write_class_id(writer, ClassId::DemPyramid)?;
        n += self.transform.write_to(writer)?;
        n += write_value(writer, lod_count)?;
        n += write_value(writer, self.has_albedo as u8)?;
        n += self.cone.write_to(writer)?;
        for entry in &self.toc {
            n += write_value(writer, entry.gsd)?;
            n += write_value(writer, entry.offset)?;
        }
        Ok(n as u64)
    }

    fn read_from<R: Read + Seek>(reader: &mut R, file_len: u64) -> Result<Self> {
        let mut magic = [0u8; 5];
        reader
            .read_exact(&mut magic)
            .map_err(|_| QuipuError::InvalidMagic)?;
        if &magic != MAGIC {
            return Err(QuipuError::InvalidMagic);
        }
        expect_class(reader, ClassId::DemPyramid)?;
        let transform = RigidTransform::read_from(reader)?;
        let lod_count: u16 = read_value(reader)?;
        let has_albedo = match read_value::<u8, _>(reader)? {
            0 => false,
            1 => true,
            other => {
                return Err(QuipuError::CorruptFile(format!(
                    "invalid albedo flag {other}"
                )))
            }
        };
        let cone = VisibilityCone::read_from(reader)?;
        let mut toc = Vec::with_capacity(lod_count as usize);
        for _ in 0..lod_count {
            let gsd: f64 = read_value(reader)?;
            let offset: u64 = read_value(reader)?;
            toc.push(TocEntry { gsd, offset });
        }
        let header = Self {
            transform,
            has_albedo,
            cone,
            toc,
            header_len: reader.stream_position()?,
        };
        header.validate(file_len)?;
        Ok(header)
    }

    fn validate(&self, file_len: u64) -> Result<()> {
        if self.toc.is_empty() {
            return Err(QuipuError::CorruptFile("no levels of detail".into()));
        }
        let mut previous: Option<TocEntry> = None;
        for (i, entry) in self.toc.iter().enumerate() {
            if entry.gsd.is_nan() || entry.gsd <= 0.0 {
                return Err(QuipuError::CorruptFile(format!(
                    "level {i} has GSD {}",
                    entry.gsd
                )));
            }
            if entry.offset < self.header_len || entry.offset >= file_len {
                return Err(QuipuError::CorruptFile(format!(
                    "level {i} offset {} outside [{}, {file_len})",
                    entry.offset, self.header_len
                )));
            }
            if let Some(prev) = previous {
                if entry.gsd < prev.gsd {
                    return Err(QuipuError::CorruptFile(format!(
                        "level {i} GSD {} is finer than level {} GSD {}",
                        entry.gsd,
                        i - 1,
                        prev.gsd
                    )));
                }
                if entry.offset <= prev.offset {
                    return Err(QuipuError::CorruptFile(format!(
                        "level {i} offset {} does not follow {}",
                        entry.offset, prev.offset
                    )));
                }
            }
            previous = Some(*entry);
        }
        Ok(())
    }
}

/// Decoded mesh of one level.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshBuffers {
    pub level: usize,
    pub gsd: f64,
    pub vertices: VertexBuffer,
    pub indices: IndexBuffer,
}

/// Write `levels` (finest first) to `path`.
///
/// The file is assembled in a temporary file next to `path` and moved into
/// place once complete, so readers never see a partial file. The visibility
/// cone covers the coarsest level.
///
/// # Errors
///
/// Returns [`QuipuError::InvalidPyramid`] if `levels` is empty or its GSD
/// does not strictly increase.
pub fn write_pyramid<P: AsRef<Path>>(
    path: P,
    levels: &[PyramidLevel],
    transform: RigidTransform,
    options: &WriterOptions,
) -> Result<StoreHeader> {
    let path = path.as_ref();
    validate_levels(levels)?;

    let has_albedo = options.write_albedo && !levels[0].surface.albedo().is_none();
    let coarsest = &levels[levels.len() - 1].surface;
    let (vertices, _) = coarsest.make_mesh(transform.position, 0.0)?;
    let cone = VisibilityCone::from_normals(&vertices.normals);

    let mut header = StoreHeader {
        transform,
        has_albedo,
        cone,
        toc: levels
            .iter()
            .map(|l| TocEntry {
                gsd: l.gsd,
                offset: 0,
            })
            .collect(),
        header_len: 0,
    };

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        header.header_len = header.write_to(&mut writer)?;

        let mut offset = header.header_len;
        for (entry, level) in header.toc.iter_mut().zip(levels) {
            entry.offset = offset;
            let surface = &level.surface;
            let mut n = surface.projection().write_to(&mut writer)?;
            n += write_heights(
                &mut writer,
                surface.heights().raster(),
                level.gsd,
                options.compress,
            )?;
            if has_albedo {
                n += write_albedo(&mut writer, surface.albedo(), options.compress)?;
            }
            debug!(gsd = level.gsd, offset, bytes = n, "wrote level");
            offset += n as u64;
        }

        let toc_start = header.header_len - TOC_ENTRY_SIZE * header.toc.len() as u64;
        writer.seek(SeekFrom::Start(toc_start))?;
        for entry in &header.toc {
            write_value(&mut writer, entry.gsd)?;
            write_value(&mut writer, entry.offset)?;
        }
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| QuipuError::Io(e.error))?;

    debug!(path = %path.display(), levels = levels.len(), has_albedo, "wrote pyramid");
    Ok(header)
}

fn validate_levels(levels: &[PyramidLevel]) -> Result<()> {
    if levels.is_empty() {
        return Err(QuipuError::InvalidPyramid("no levels".into()));
    }
    if levels.len() > u16::MAX as usize {
        return Err(QuipuError::InvalidPyramid(format!(
            "{} levels do not fit a u16",
            levels.len()
        )));
    }
    for (i, level) in levels.iter().enumerate() {
        if level.gsd.is_nan() || level.gsd <= 0.0 {
            return Err(QuipuError::InvalidPyramid(format!(
                "level {i} has GSD {}",
                level.gsd
            )));
        }
        if i > 0 && level.gsd <= levels[i - 1].gsd {
            return Err(QuipuError::InvalidPyramid(format!(
                "GSD must strictly increase: level {i} has {} after {}",
                level.gsd,
                levels[i - 1].gsd
            )));
        }
    }
    Ok(())
}

/// Reader over one Quipu file.
///
/// Opening parses only the header; level data is read on demand by
/// reopening the file, and only the most recently requested level's mesh is
/// kept.
#[derive(Debug, Clone)]
pub struct TiledPyramidStore {
    path: PathBuf,
    options: ReaderOptions,
    header: Arc<StoreHeader>,
    current: Option<MeshBuffers>,
}

impl TiledPyramidStore {
    /// Open a file and parse its header.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - the path does not exist or is not a regular file
    /// - the magic or class tag is wrong
    /// - the table of contents is not ordered by GSD and offset
    pub fn open<P: AsRef<Path>>(path: P, options: ReaderOptions) -> Result<Self> {
        let path = path.as_ref();
        let header = read_header(path)?;
        Ok(Self::from_header(path, Arc::new(header), options))
    }

    /// Build a reader around an already-parsed header.
    pub fn from_header<P: AsRef<Path>>(
        path: P,
        header: Arc<StoreHeader>,
        options: ReaderOptions,
    ) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            options,
            header,
            current: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> &ReaderOptions {
        &self.options
    }

    pub fn header(&self) -> &StoreHeader {
        &self.header
    }

    pub fn transform(&self) -> &RigidTransform {
        &self.header.transform
    }

    pub fn cone(&self) -> &VisibilityCone {
        &self.header.cone
    }

    pub fn toc(&self) -> &[TocEntry] {
        &self.header.toc
    }

    pub fn lod_count(&self) -> usize {
        self.header.lod_count()
    }

    pub fn has_albedo(&self) -> bool {
        self.header.has_albedo
    }

    /// GSD of the level held by [`read_buffers`](Self::read_buffers), if any.
    pub fn current_gsd(&self) -> Option<f64> {
        self.current.as_ref().map(|c| c.gsd)
    }

    pub fn current_buffers(&self) -> Option<&MeshBuffers> {
        self.current.as_ref()
    }

    pub fn select_level(&self, required_gsd: f64) -> usize {
        self.header.select_level(required_gsd)
    }

    /// Make the level selected for `required_gsd` current and return its
    /// mesh. A request resolving to the level already held reads nothing.
    pub fn read_buffers(&mut self, required_gsd: f64) -> Result<&MeshBuffers> {
        let level = self.select_level(required_gsd);
        let cached = self.current.as_ref().is_some_and(|c| c.level == level);
        if cached {
            debug!(level, "level already loaded");
        } else {
            let buffers = self.load_level_buffers(level)?;
            self.current = Some(buffers);
        }
        self.current
            .as_ref()
            .ok_or_else(|| QuipuError::CorruptFile("no level loaded".into()))
    }

    /// [`read_buffers`](Self::read_buffers) at the configured default GSD.
    pub fn read_default_buffers(&mut self) -> Result<&MeshBuffers> {
        self.read_buffers(self.options.default_gsd)
    }

    /// Decode the level selected for `required_gsd` without touching the
    /// cached level.
    pub fn load_buffers(&self, required_gsd: f64) -> Result<MeshBuffers> {
        self.load_level_buffers(self.select_level(required_gsd))
    }

    fn load_level_buffers(&self, level: usize) -> Result<MeshBuffers> {
        let PyramidLevel { gsd, surface } = self.read_level(level)?;
        let (vertices, indices) =
            surface.make_mesh(self.header.transform.position, self.options.default_albedo)?;
        debug!(
            path = %self.path.display(),
            level,
            gsd,
            vertices = vertices.valid_count(),
            triangles = indices.len() / 3,
            "decoded level"
        );
        Ok(MeshBuffers {
            level,
            gsd,
            vertices,
            indices,
        })
    }

    fn open_at(&self, level: usize) -> Result<BufReader<File>> {
        let entry = self.header.toc.get(level).ok_or_else(|| {
            QuipuError::CorruptFile(format!(
                "level {level} requested from a {}-level pyramid",
                self.header.toc.len()
            ))
        })?;
        let mut reader = BufReader::new(File::open(&self.path)?);
        reader.seek(SeekFrom::Start(entry.offset))?;
        Ok(reader)
    }

    /// Decode one level into a surface.
    pub fn read_level(&self, level: usize) -> Result<PyramidLevel> {
        let mut reader = self.open_at(level)?;
        let projection = SpatialProjection::read_from(&mut reader)?;
        let block = read_heights(&mut reader)?;
        let albedo = if self.header.has_albedo && self.options.read_albedo {
            read_albedo(&mut reader, block.heights.resolution())?
        } else {
            Albedo::None
        };
        let surface =
            ElevationSurface::new(GeoreferencedRaster::new(block.heights, projection)?, albedo)?;
        Ok(PyramidLevel {
            gsd: self.header.toc[level].gsd,
            surface,
        })
    }

    /// Decode every level, finest first.
    pub fn read_pyramid(&self) -> Result<Vec<PyramidLevel>> {
        (0..self.lod_count()).map(|i| self.read_level(i)).collect()
    }

    /// Whether the finest level's height payload is compressed.
    pub fn is_compressed(&self) -> Result<bool> {
        let mut reader = self.open_at(0)?;
        SpatialProjection::read_from(&mut reader)?;
        peek_heights_compressed(&mut reader)
    }
}

/// Parse only the header of a Quipu file.
pub fn read_header<P: AsRef<Path>>(path: P) -> Result<StoreHeader> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(QuipuError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    let metadata = std::fs::metadata(path)?;
    if !metadata.is_file() {
        return Err(QuipuError::NotAFile {
            path: path.to_path_buf(),
        });
    }
    let mut reader = BufReader::new(File::open(path)?);
    StoreHeader::read_from(&mut reader, metadata.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::{Raster, Resolution};
    use approx::assert_abs_diff_eq;
    use glam::DVec2;
    use tempfile::TempDir;

    fn surface(size: usize, gsd: f64) -> ElevationSurface {
        let res = Resolution::square(size);
        let raster = Raster::from_fn(res, |x, y| ((x as f32) * 0.37).sin() * 20.0 + y as f32 * 0.5);
        ElevationSurface::from_heights(raster, SpatialProjection::local_tangent(res, DVec2::splat(gsd)))
            .unwrap()
    }

    fn write_sample(dir: &TempDir, name: &str, options: &WriterOptions) -> (PathBuf, Vec<PyramidLevel>) {
        let mut s = surface(32, 1.0);
        s.set_albedo(Albedo::Constant(vec![0.25, 0.5])).unwrap();
        let levels = s.make_pyramid(Resolution::square(4), false).unwrap();
        let path = dir.path().join(name);
        write_pyramid(&path, &levels, RigidTransform::IDENTITY, options).unwrap();
        (path, levels)
    }

    #[test]
    fn test_roundtrip() {
        let dir = TempDir::new().unwrap();
        let (path, levels) = write_sample(&dir, "a.qld", &WriterOptions::default());

        let store = TiledPyramidStore::open(&path, ReaderOptions::default()).unwrap();
        assert_eq!(store.lod_count(), 4);
        assert!(store.has_albedo());
        assert!(!store.is_compressed().unwrap());

        let back = store.read_level(0).unwrap();
        assert_eq!(back.gsd, 1.0);
        assert_eq!(back.surface.projection(), levels[0].surface.projection());
        assert_eq!(back.surface.albedo(), &Albedo::Constant(vec![0.25, 0.5]));
        let bound = levels[0].gsd / 50.0;
        for (a, b) in levels[0]
            .surface
            .heights()
            .raster()
            .data()
            .iter()
            .zip(back.surface.heights().raster().data())
        {
            assert!(((a - b) as f64).abs() <= bound + 1e-6);
        }
    }

    #[test]
    fn test_level_selection() {
        let dir = TempDir::new().unwrap();
        let (path, _) = write_sample(&dir, "sel.qld", &WriterOptions::default());
        let store = TiledPyramidStore::open(&path, ReaderOptions::default()).unwrap();
        // GSDs 1, 2, 4, 8.
        assert_eq!(store.select_level(0.5), 0);
        assert_eq!(store.select_level(1.0), 0);
        assert_eq!(store.select_level(3.9), 1);
        assert_eq!(store.select_level(4.0), 2);
        assert_eq!(store.select_level(100.0), 3);
    }

    #[test]
    fn test_read_buffers_caches_level() {
        let dir = TempDir::new().unwrap();
        let (path, _) = write_sample(&dir, "cache.qld", &WriterOptions::default());
        let mut store = TiledPyramidStore::open(&path, ReaderOptions::default()).unwrap();
        assert_eq!(store.current_gsd(), None);

        let first = store.read_buffers(2.5).unwrap().clone();
        assert_eq!(first.level, 1);
        assert_eq!(first.vertices.resolution, Resolution::square(16));
        assert_eq!(first.vertices.albedo(0), &[0.25, 0.5]);

        // Same level: nothing is re-read, even with the file gone.
        std::fs::remove_file(&path).unwrap();
        let again = store.read_buffers(3.0).unwrap();
        assert_eq!(again, &first);
        assert!(store.read_buffers(8.0).is_err());
    }

    #[test]
    fn test_default_buffers_coarsest() {
        let dir = TempDir::new().unwrap();
        let (path, _) = write_sample(&dir, "default.qld", &WriterOptions::default());
        let mut store = TiledPyramidStore::open(
            &path,
            ReaderOptions::default().with_read_albedo(false).with_default_albedo(0.9),
        )
        .unwrap();
        let buffers = store.read_default_buffers().unwrap();
        assert_eq!(buffers.level, 3);
        assert_eq!(buffers.vertices.albedo_bands, 1);
        assert_eq!(buffers.vertices.albedo(0), &[0.9]);
        assert_eq!(store.current_gsd(), Some(8.0));
    }

    #[test]
    fn test_compressed_without_albedo() {
        let dir = TempDir::new().unwrap();
        let options = WriterOptions::default()
            .with_compress(true)
            .with_write_albedo(false);
        let (path, levels) = write_sample(&dir, "z.qld", &options);
        let store = TiledPyramidStore::open(&path, ReaderOptions::default()).unwrap();
        assert!(store.is_compressed().unwrap());
        assert!(!store.has_albedo());
        let pyramid = store.read_pyramid().unwrap();
        assert_eq!(pyramid.len(), levels.len());
        assert_eq!(pyramid[3].surface.albedo(), &Albedo::None);
    }

    #[test]
    fn test_transform_offsets_vertices() {
        let dir = TempDir::new().unwrap();
        let s = surface(8, 1.0);
        let levels = s.make_pyramid(Resolution::square(8), false).unwrap();
        let origin = s.compute_origin().unwrap().unwrap();
        let path = dir.path().join("t.qld");
        write_pyramid(&path, &levels, RigidTransform::from_position(origin), &WriterOptions::default())
            .unwrap();

        let store = TiledPyramidStore::open(&path, ReaderOptions::default()).unwrap();
        assert_eq!(store.transform().position, origin);
        let buffers = store.load_buffers(1.0).unwrap();
        let world = buffers.vertices.world_position(9);
        let expected = s.projection().to_world().unwrap().apply(1.0, 1.0, s.heights().raster().at(1, 1) as f64).unwrap();
        assert_abs_diff_eq!(world.x, expected.x, epsilon = 1e-3);
        assert_abs_diff_eq!(world.z, expected.z, epsilon = 1e-1);
        let (coarsest, _) = levels[0].surface.make_mesh(origin, 0.0).unwrap();
        assert_eq!(store.cone(), &VisibilityCone::from_normals(&coarsest.normals));
    }

    #[test]
    fn test_writer_rejects_bad_pyramid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.qld");
        let s = surface(8, 1.0);
        let err = write_pyramid(&path, &[], RigidTransform::IDENTITY, &WriterOptions::default())
            .unwrap_err();
        assert!(matches!(err, QuipuError::InvalidPyramid(_)));

        let levels = vec![
            PyramidLevel { gsd: 2.0, surface: s.clone() },
            PyramidLevel { gsd: 2.0, surface: s },
        ];
        let err = write_pyramid(&path, &levels, RigidTransform::IDENTITY, &WriterOptions::default())
            .unwrap_err();
        assert!(matches!(err, QuipuError::InvalidPyramid(_)));
        assert!(!path.exists());
    }

    #[test]
    fn test_open_errors() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            TiledPyramidStore::open(dir.path().join("missing.qld"), ReaderOptions::default()),
            Err(QuipuError::FileNotFound { .. })
        ));
        assert!(matches!(
            TiledPyramidStore::open(dir.path(), ReaderOptions::default()),
            Err(QuipuError::NotAFile { .. })
        ));

        let junk = dir.path().join("junk.qld");
        std::fs::write(&junk, b"NOTQUIPU").unwrap();
        assert!(matches!(
            TiledPyramidStore::open(&junk, ReaderOptions::default()),
            Err(QuipuError::InvalidMagic)
        ));

        let wrong_class = dir.path().join("class.qld");
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&ClassId::Dem.code().to_ne_bytes());
        std::fs::write(&wrong_class, bytes).unwrap();
        assert!(matches!(
            TiledPyramidStore::open(&wrong_class, ReaderOptions::default()),
            Err(QuipuError::UnexpectedClass {
                expected: 2002,
                found: 2001
            })
        ));
    }

    #[test]
    fn test_open_rejects_unordered_toc() {
        let dir = TempDir::new().unwrap();
        let (path, _) = write_sample(&dir, "toc.qld", &WriterOptions::default());
        let header = read_header(&path).unwrap();

        // Swap the GSDs of the first two TOC entries.
        let mut bytes = std::fs::read(&path).unwrap();
        let toc = (header.header_len - TOC_ENTRY_SIZE * 4) as usize;
        let first: Vec<u8> = bytes[toc..toc + 8].to_vec();
        let second: Vec<u8> = bytes[toc + 16..toc + 24].to_vec();
        bytes[toc..toc + 8].copy_from_slice(&second);
        bytes[toc + 16..toc + 24].copy_from_slice(&first);
        std::fs::write(&path, &bytes).unwrap();

        assert!(matches!(
            TiledPyramidStore::open(&path, ReaderOptions::default()),
            Err(QuipuError::CorruptFile(_))
        ));
    }
}
