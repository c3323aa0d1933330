//! A directory of Quipu files with cached headers.
//!
//! Opening a [`TiledPyramidStore`] only parses its header, but a viewer
//! asking for dozens of tiles per frame would still reparse the same headers
//! constantly. [`QuipuCatalog`] keeps parsed headers in an LRU cache and
//! hands out readers built on them.
//!
//! ```ignore
//! use quipu::QuipuCatalog;
//!
//! let catalog = QuipuCatalog::builder("/data/tiles").cache_size(500).build();
//! for name in catalog.facing_tiles(glam::Vec3::NEG_Z) {
//!     let buffers = catalog.load_buffers(&name, 30.0)?;
//!     println!("{name}: {} triangles", buffers.indices.len() / 3);
//! }
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use glam::Vec3;
use moka::sync::Cache;
use tracing::{debug, warn};

use crate::config::ReaderOptions;
use crate::error::{QuipuError, Result};
use crate::mesh::VisibilityCone;
use crate::store::{read_header, MeshBuffers, StoreHeader, TiledPyramidStore, FILE_EXTENSION};

/// Statistics about cache usage.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Number of headers currently in the cache.
    pub entry_count: u64,
    /// Requests served from the cache.
    pub hit_count: u64,
    /// Requests that parsed a header from disk.
    pub miss_count: u64,
}

impl CacheStats {
    /// Cache hit rate (0.0 to 1.0), or 0.0 before any request.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hit_count + self.miss_count;
        if total == 0 {
            0.0
        } else {
            self.hit_count as f64 / total as f64
        }
    }
}

/// Statistics from a preload operation.
#[derive(Debug, Clone, Default)]
pub struct PreloadStats {
    pub files_loaded: u64,
    pub files_already_cached: u64,
    pub files_failed: u64,
    pub elapsed_ms: u64,
}

/// Quipu files under one directory.
pub struct QuipuCatalog {
    data_dir: PathBuf,
    options: ReaderOptions,
    headers: Cache<PathBuf, Arc<StoreHeader>>,
    hit_count: AtomicU64,
    miss_count: AtomicU64,
}

impl QuipuCatalog {
    /// Create a catalog caching up to `cache_size` headers.
    pub fn new<P: AsRef<Path>>(data_dir: P, cache_size: u64) -> Self {
        CatalogBuilder::new(data_dir).cache_size(cache_size).build()
    }

    pub fn builder<P: AsRef<Path>>(data_dir: P) -> CatalogBuilder {
        CatalogBuilder::new(data_dir)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn reader_options(&self) -> &ReaderOptions {
        &self.options
    }

    pub fn cache_capacity(&self) -> u64 {
        self.headers.policy().max_capacity().unwrap_or(0)
    }

    fn resolve(&self, name: &Path) -> PathBuf {
        self.data_dir.join(name)
    }

    /// File names with the Quipu extension, sorted.
    ///
    /// An unreadable directory yields an empty list.
    pub fn scan_files(&self) -> Vec<String> {
        let entries = match std::fs::read_dir(&self.data_dir) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };
        let mut names: Vec<String> = entries
            .flatten()
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| {
                Path::new(n)
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case(FILE_EXTENSION))
            })
            .collect();
        names.sort();
        names
    }

    /// Parsed header of `name` (relative to the data directory, or
    /// absolute), from the cache when present.
    pub fn header<P: AsRef<Path>>(&self, name: P) -> Result<Arc<StoreHeader>> {
        let path = self.resolve(name.as_ref());
        if let Some(header) = self.headers.get(&path) {
            self.hit_count.fetch_add(1, Ordering::Relaxed);
            return Ok(header);
        }
        self.miss_count.fetch_add(1, Ordering::Relaxed);

        let header = Arc::new(read_header(&path)?);
        debug!(path = %path.display(), levels = header.lod_count(), "cached header");
        self.headers.insert(path, header.clone());
        Ok(header)
    }

    /// A reader for `name` sharing the cached header.
    pub fn store<P: AsRef<Path>>(&self, name: P) -> Result<TiledPyramidStore> {
        let header = self.header(name.as_ref())?;
        Ok(TiledPyramidStore::from_header(
            self.resolve(name.as_ref()),
            header,
            self.options,
        ))
    }

    /// Mesh of the level of `name` selected for `required_gsd`.
    pub fn load_buffers<P: AsRef<Path>>(&self, name: P, required_gsd: f64) -> Result<MeshBuffers> {
        self.store(name)?.load_buffers(required_gsd)
    }

    /// Files whose visibility cone may face a viewer looking along
    /// `view_direction`. Files that fail to open are skipped.
    pub fn facing_tiles(&self, view_direction: Vec3) -> Vec<String> {
        self.scan_files()
            .into_iter()
            .filter(|name| match self.header(name) {
                Ok(header) => {
                    let rotation = header.transform.rotation.as_mat3();
                    let cone = header.cone;
                    let normal = (rotation * cone.normal).normalize_or_zero();
                    VisibilityCone { normal, ..cone }.may_face(view_direction)
                }
                Err(e) => {
                    warn!(file = %name, error = %e, "skipping unreadable file");
                    false
                }
            })
            .collect()
    }

    /// Parse and cache every header in the directory.
    pub fn preload(&self) -> PreloadStats {
        let start = Instant::now();
        let mut stats = PreloadStats::default();

        for name in self.scan_files() {
            let path = self.resolve(Path::new(&name));
            if self.headers.contains_key(&path) {
                stats.files_already_cached += 1;
                continue;
            }
            match self.header(&path) {
                Ok(_) => stats.files_loaded += 1,
                Err(e) => {
                    warn!(file = %name, error = %e, "failed to preload");
                    stats.files_failed += 1;
                }
            }
        }

        stats.elapsed_ms = start.elapsed().as_millis() as u64;
        stats
    }

    /// Drop the cached header of `name`, e.g. after the file was rewritten.
    pub fn invalidate<P: AsRef<Path>>(&self, name: P) {
        self.headers.invalidate(&self.resolve(name.as_ref()));
    }

    pub fn clear_cache(&self) {
        self.headers.invalidate_all();
    }

    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.headers.entry_count(),
            hit_count: self.hit_count.load(Ordering::Relaxed),
            miss_count: self.miss_count.load(Ordering::Relaxed),
        }
    }
}

/// Builder for [`QuipuCatalog`].
pub struct CatalogBuilder {
    data_dir: PathBuf,
    cache_size: u64,
    options: ReaderOptions,
}

impl CatalogBuilder {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            cache_size: 100,
            options: ReaderOptions::default(),
        }
    }

    /// Create a builder from environment variables.
    ///
    /// - `QUIPU_DATA_DIR` (required): directory of Quipu files
    /// - `QUIPU_CACHE_SIZE` (optional): header cache capacity, default 100
    ///
    /// Reader options come from [`ReaderOptions::from_env`].
    pub fn from_env() -> Result<Self> {
        let data_dir = std::env::var("QUIPU_DATA_DIR").map_err(|_| {
            QuipuError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "QUIPU_DATA_DIR environment variable not set",
            ))
        })?;

        let cache_size: u64 = std::env::var("QUIPU_CACHE_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(100);

        Ok(Self {
            data_dir: PathBuf::from(data_dir),
            cache_size,
            options: ReaderOptions::from_env(),
        })
    }

    pub fn data_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.data_dir = path.as_ref().to_path_buf();
        self
    }

    pub fn cache_size(mut self, size: u64) -> Self {
        self.cache_size = size;
        self
    }

    pub fn reader_options(mut self, options: ReaderOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> QuipuCatalog {
        QuipuCatalog {
            data_dir: self.data_dir,
            options: self.options,
            headers: Cache::builder().max_capacity(self.cache_size).build(),
            hit_count: AtomicU64::new(0),
            miss_count: AtomicU64::new(0),
        }
    }
}
