//! Writer, reader and batch-build options.
//!
//! Every option struct has sensible defaults, consuming `with_*` setters and
//! a `from_env()` constructor. Values that fail to parse fall back to the
//! default.
//!
//! | Variable | Option | Default |
//! |----------|--------|---------|
//! | `QUIPU_COMPRESS` | [`WriterOptions::compress`] | false |
//! | `QUIPU_WRITE_ALBEDO` | [`WriterOptions::write_albedo`] | true |
//! | `QUIPU_READ_ALBEDO` | [`ReaderOptions::read_albedo`] | true |
//! | `QUIPU_DEFAULT_GSD` | [`ReaderOptions::default_gsd`] | +inf |
//! | `QUIPU_DEFAULT_ALBEDO` | [`ReaderOptions::default_albedo`] | 0.06 |
//! | `QUIPU_MAX_VERTICES` | [`BuildOptions::max_vertices`] | 1000000 |
//! | `QUIPU_TILE_OVERLAP` | [`BuildOptions::overlap`] | 0 |
//! | `QUIPU_MIN_RESOLUTION` | [`BuildOptions::min_resolution`] (`WxH` or `N`) | 8x8 |
//! | `QUIPU_FILL_MISSING` | [`BuildOptions::fill_missing`] | false |

use std::str::FromStr;

use crate::raster::Resolution;

fn lookup_parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|v| v.trim().parse().ok())
}

fn lookup_bool(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<bool> {
    lookup(key).and_then(|v| parse_bool(&v))
}

/// `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`, case-insensitive.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// `WxH` or a single `N` for a square.
pub fn parse_resolution(value: &str) -> Option<Resolution> {
    let value = value.trim();
    match value.split_once(['x', 'X']) {
        Some((w, h)) => Some(Resolution::new(w.trim().parse().ok()?, h.trim().parse().ok()?)),
        None => value.parse().ok().map(Resolution::square),
    }
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// How a pyramid is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterOptions {
    /// Compress every image payload.
    pub compress: bool,
    /// Store albedo blocks when the surface has albedo.
    pub write_albedo: bool,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            compress: false,
            write_albedo: true,
        }
    }
}

impl WriterOptions {
    pub fn from_env() -> Self {
        Self::from_lookup(env_lookup)
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        Self {
            compress: lookup_bool(&lookup, "QUIPU_COMPRESS").unwrap_or(d.compress),
            write_albedo: lookup_bool(&lookup, "QUIPU_WRITE_ALBEDO").unwrap_or(d.write_albedo),
        }
    }

    pub fn with_compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn with_write_albedo(mut self, write_albedo: bool) -> Self {
        self.write_albedo = write_albedo;
        self
    }
}

/// How a pyramid is read back.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReaderOptions {
    /// Decode albedo blocks. When off, or when the file has none, vertices
    /// carry `default_albedo`.
    pub read_albedo: bool,
    /// GSD used by `read_default_buffers`. `+inf` selects the coarsest
    /// level.
    pub default_gsd: f64,
    pub default_albedo: f32,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            read_albedo: true,
            default_gsd: f64::INFINITY,
            default_albedo: 0.06,
        }
    }
}

impl ReaderOptions {
    pub fn from_env() -> Self {
        Self::from_lookup(env_lookup)
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        Self {
            read_albedo: lookup_bool(&lookup, "QUIPU_READ_ALBEDO").unwrap_or(d.read_albedo),
            default_gsd: lookup_parse(&lookup, "QUIPU_DEFAULT_GSD")
                .filter(|g: &f64| *g > 0.0)
                .unwrap_or(d.default_gsd),
            default_albedo: lookup_parse(&lookup, "QUIPU_DEFAULT_ALBEDO")
                .unwrap_or(d.default_albedo),
        }
    }

    pub fn with_read_albedo(mut self, read_albedo: bool) -> Self {
        self.read_albedo = read_albedo;
        self
    }

    pub fn with_default_gsd(mut self, gsd: f64) -> Self {
        self.default_gsd = gsd;
        self
    }

    pub fn with_default_albedo(mut self, albedo: f32) -> Self {
        self.default_albedo = albedo;
        self
    }
}

/// Options for turning one surface into a set of tile files.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BuildOptions {
    /// Upper bound on samples per tile, overlap included.
    pub max_vertices: usize,
    /// Border pixels shared with the next tile.
    pub overlap: usize,
    /// Coarsest pyramid level size.
    pub min_resolution: Resolution,
    /// Fill holes in each tile's native level before coarsening.
    pub fill_missing: bool,
    pub writer: WriterOptions,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            max_vertices: 1_000_000,
            overlap: 0,
            min_resolution: Resolution::square(8),
            fill_missing: false,
            writer: WriterOptions::default(),
        }
    }
}

impl BuildOptions {
    pub fn from_env() -> Self {
        Self::from_lookup(env_lookup)
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        Self {
            max_vertices: lookup_parse(&lookup, "QUIPU_MAX_VERTICES")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(d.max_vertices),
            overlap: lookup_parse(&lookup, "QUIPU_TILE_OVERLAP").unwrap_or(d.overlap),
            min_resolution: lookup("QUIPU_MIN_RESOLUTION")
                .as_deref()
                .and_then(parse_resolution)
                .filter(|r| !r.is_empty())
                .unwrap_or(d.min_resolution),
            fill_missing: lookup_bool(&lookup, "QUIPU_FILL_MISSING").unwrap_or(d.fill_missing),
            writer: WriterOptions::from_lookup(&lookup),
        }
    }

    pub fn with_max_vertices(mut self, max_vertices: usize) -> Self {
        self.max_vertices = max_vertices;
        self
    }

    pub fn with_overlap(mut self, overlap: usize) -> Self {
        self.overlap = overlap;
        self
    }

    pub fn with_min_resolution(mut self, min_resolution: Resolution) -> Self {
        self.min_resolution = min_resolution;
        self
    }

    pub fn with_fill_missing(mut self, fill_missing: bool) -> Self {
        self.fill_missing = fill_missing;
        self
    }

    pub fn with_writer(mut self, writer: WriterOptions) -> Self {
        self.writer = writer;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let r = ReaderOptions::default();
        assert!(r.read_albedo);
        assert!(r.default_gsd.is_infinite());
        assert_eq!(r.default_albedo, 0.06);

        let b = BuildOptions::default();
        assert_eq!(b.max_vertices, 1_000_000);
        assert_eq!(b.min_resolution, Resolution::new(8, 8));
        assert!(!b.writer.compress);
        assert!(b.writer.write_albedo);
    }

    #[test]
    fn test_from_lookup() {
        let lookup = vars(&[
            ("QUIPU_COMPRESS", "yes"),
            ("QUIPU_DEFAULT_GSD", "12.5"),
            ("QUIPU_READ_ALBEDO", "0"),
            ("QUIPU_MAX_VERTICES", "65536"),
            ("QUIPU_MIN_RESOLUTION", "16x4"),
        ]);
        let r = ReaderOptions::from_lookup(&lookup);
        assert_eq!(r.default_gsd, 12.5);
        assert!(!r.read_albedo);

        let b = BuildOptions::from_lookup(&lookup);
        assert_eq!(b.max_vertices, 65_536);
        assert_eq!(b.min_resolution, Resolution::new(16, 4));
        assert!(b.writer.compress);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let lookup = vars(&[
            ("QUIPU_COMPRESS", "maybe"),
            ("QUIPU_DEFAULT_GSD", "-3"),
            ("QUIPU_MAX_VERTICES", "lots"),
            ("QUIPU_MIN_RESOLUTION", "0"),
        ]);
        assert_eq!(WriterOptions::from_lookup(&lookup), WriterOptions::default());
        assert!(ReaderOptions::from_lookup(&lookup).default_gsd.is_infinite());
        assert_eq!(BuildOptions::from_lookup(&lookup), BuildOptions::default());
    }

    #[test]
    fn test_parse_helpers() {
        assert_eq!(parse_resolution("32"), Some(Resolution::square(32)));
        assert_eq!(parse_resolution(" 64 X 8 "), Some(Resolution::new(64, 8)));
        assert_eq!(parse_resolution("8x"), None);
        assert_eq!(parse_bool("ON"), Some(true));
        assert_eq!(parse_bool("nope"), None);
    }

    #[test]
    fn test_builders() {
        let b = BuildOptions::default()
            .with_overlap(1)
            .with_fill_missing(true)
            .with_writer(WriterOptions::default().with_compress(true));
        assert_eq!(b.overlap, 1);
        assert!(b.fill_missing && b.writer.compress);
    }
}
