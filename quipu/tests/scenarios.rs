//! End-to-end scenarios: pyramid building, file round trips, LOD selection
//! and tiling coverage.

use std::collections::HashSet;

use approx::assert_relative_eq;
use glam::DVec2;
use quipu::{
    Albedo, ElevationSurface, Raster, ReaderOptions, Resolution, RigidTransform, SpatialProjection,
    TiledPyramidStore, WriterOptions,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

fn terrain(resolution: Resolution, gsd: f64, seed: u64) -> ElevationSurface {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise: Vec<f32> = (0..resolution.pixel_count())
        .map(|_| rng.gen_range(-0.5..0.5))
        .collect();
    let raster = Raster::from_fn(resolution, |x, y| {
        let (fx, fy) = (x as f32 / 37.0, y as f32 / 53.0);
        400.0 + 120.0 * fx.sin() * fy.cos() + noise[y * resolution.width + x]
    });
    ElevationSurface::from_heights(
        raster,
        SpatialProjection::local_tangent(resolution, DVec2::splat(gsd)),
    )
    .unwrap()
}

#[test]
fn test_1024_pyramid_and_lod_selection() {
    let surface = terrain(Resolution::square(1024), 2.0, 1);
    let levels = surface.make_pyramid(Resolution::square(8), false).unwrap();

    assert_eq!(levels.len(), 8);
    for (k, level) in levels.iter().enumerate() {
        assert_eq!(level.surface.resolution(), Resolution::square(1024 >> k));
        assert_relative_eq!(level.gsd, 2.0 * (1u32 << k) as f64, epsilon = 1e-9);
    }

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("big.qld");
    quipu::write_pyramid(&path, &levels, RigidTransform::IDENTITY, &WriterOptions::default())
        .unwrap();

    let mut store = TiledPyramidStore::open(&path, ReaderOptions::default()).unwrap();
    let buffers = store.read_buffers(10.0).unwrap();
    assert_eq!(buffers.gsd, 8.0);
    assert_eq!(buffers.vertices.resolution, Resolution::square(256));
}

#[test]
fn test_lod_selection_ranges() {
    let surface = terrain(Resolution::square(64), 1.0, 2);
    let levels = surface.make_pyramid(Resolution::square(8), false).unwrap();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("lod.qld");
    quipu::write_pyramid(&path, &levels, RigidTransform::IDENTITY, &WriterOptions::default())
        .unwrap();
    let store = TiledPyramidStore::open(&path, ReaderOptions::default()).unwrap();

    let gsds: Vec<f64> = store.toc().iter().map(|e| e.gsd).collect();
    assert_eq!(gsds, vec![1.0, 2.0, 4.0, 8.0]);
    assert_eq!(store.select_level(0.25), 0);
    for (i, window) in gsds.windows(2).enumerate() {
        assert_eq!(store.select_level(window[0]), i);
        assert_eq!(store.select_level((window[0] + window[1]) / 2.0), i);
        assert_eq!(store.select_level(window[1] - 1e-9), i);
    }
    assert_eq!(store.select_level(8.0), 3);
    assert_eq!(store.select_level(1e9), 3);
}

#[test]
fn test_odd_resolution_coarsening() {
    let surface = terrain(Resolution::new(1000, 600), 1.0, 3);
    let levels = surface.make_pyramid(Resolution::square(8), false).unwrap();
    // min(log2(125), log2(75)) = 6.2 → 7 levels.
    assert_eq!(levels.len(), 7);
    for pair in levels.windows(2) {
        let (a, b) = (pair[0].surface.resolution(), pair[1].surface.resolution());
        assert_eq!(b, Resolution::new(a.width / 2, a.height / 2));
        assert!(pair[1].gsd > pair[0].gsd);
    }
}

#[test]
fn test_roundtrip_bounds() {
    let dir = TempDir::new().unwrap();
    let resolution = Resolution::square(48);
    let mut surface = terrain(resolution, 5.0, 4);
    surface.heights_mut().raster_mut().invalidate(3, 7);

    let mut rng = StdRng::seed_from_u64(5);
    let albedo = Raster::from_fn(resolution, |_, _| rng.gen_range(0.1f32..0.6));
    surface.set_albedo(Albedo::Scalar(albedo.clone())).unwrap();

    for compress in [false, true] {
        let levels = surface.make_pyramid(Resolution::square(12), false).unwrap();
        let path = dir.path().join(format!("rt-{compress}.qld"));
        let options = WriterOptions::default().with_compress(compress);
        quipu::write_pyramid(&path, &levels, RigidTransform::IDENTITY, &options).unwrap();

        let store = TiledPyramidStore::open(&path, ReaderOptions::default()).unwrap();
        assert_eq!(store.is_compressed().unwrap(), compress);
        let back = store.read_level(0).unwrap();

        let bound = 5.0 / 50.0;
        let original = surface.heights().raster();
        let decoded = back.surface.heights().raster();
        for (a, b) in original.data().iter().zip(decoded.data()) {
            if a.is_finite() {
                assert!(((a - b) as f64).abs() <= bound, "{a} vs {b}");
            } else {
                assert!(!b.is_finite());
            }
        }

        let Albedo::Scalar(decoded_albedo) = back.surface.albedo() else {
            panic!("albedo image lost");
        };
        let (min, max) = albedo.minmax().unwrap();
        let tolerance = (max - min) / 255.0;
        for (a, b) in albedo.data().iter().zip(decoded_albedo.data()) {
            assert!((a - b).abs() <= tolerance + 1e-6, "{a} vs {b}");
        }
    }
}

#[test]
fn test_constant_albedo_exact() {
    let dir = TempDir::new().unwrap();
    let mut surface = terrain(Resolution::square(16), 1.0, 6);
    let bands = vec![0.123_456_7, 0.98, 0.0];
    surface.set_albedo(Albedo::Constant(bands.clone())).unwrap();
    let levels = surface.make_pyramid(Resolution::square(4), false).unwrap();
    let path = dir.path().join("const.qld");
    quipu::write_pyramid(&path, &levels, RigidTransform::IDENTITY, &WriterOptions::default())
        .unwrap();

    let mut store = TiledPyramidStore::open(&path, ReaderOptions::default()).unwrap();
    for level in store.read_pyramid().unwrap() {
        assert_eq!(level.surface.albedo(), &Albedo::Constant(bands.clone()));
    }
    let buffers = store.read_buffers(1.0).unwrap();
    assert_eq!(buffers.vertices.albedo_bands, 3);
    assert_eq!(buffers.vertices.albedo(17), bands.as_slice());
}

#[test]
fn test_tiling_coverage() {
    let resolution = Resolution::new(90, 70);
    let mut surface = terrain(resolution, 1.0, 7);
    let mut rng = StdRng::seed_from_u64(8);
    {
        let raster = surface.heights_mut().raster_mut();
        for _ in 0..600 {
            raster.invalidate(rng.gen_range(0..90), rng.gen_range(0..70));
        }
        // A wholly invalid block that covers at least one tile.
        for y in 0..35 {
            for x in 0..45 {
                raster.invalidate(x, y);
            }
        }
    }

    let tiles = surface.manual_tile(4, 4, 0).unwrap();
    assert!(tiles.len() < 16);

    let source = surface.heights().raster();
    let expected: HashSet<(usize, usize)> = (0..resolution.height)
        .flat_map(|y| (0..resolution.width).map(move |x| (x, y)))
        .filter(|&(x, y)| source.is_valid(x, y))
        .collect();

    let mut covered = HashSet::new();
    for tile in &tiles {
        let raster = tile.heights().raster();
        assert!(!raster.is_fully_invalid());
        let session = tile.projection().to_map(surface.projection()).unwrap();
        for y in 0..raster.height() {
            for x in 0..raster.width() {
                if raster.is_valid(x, y) {
                    let pixel = session.nearest(x, y).unwrap().unwrap();
                    assert!(covered.insert(pixel), "pixel {pixel:?} covered twice");
                }
            }
        }
    }
    assert_eq!(covered, expected);
}

#[test]
fn test_fill_missing_idempotent() {
    let mut surface = terrain(Resolution::new(40, 30), 1.0, 9);
    let mut rng = StdRng::seed_from_u64(10);
    {
        let raster = surface.heights_mut().raster_mut();
        for _ in 0..300 {
            raster.invalidate(rng.gen_range(0..40), rng.gen_range(0..30));
        }
    }
    assert!(surface.fill_missing() > 0);
    assert!(!surface.heights().raster().has_invalid());

    let once = surface.clone();
    assert_eq!(surface.fill_missing(), 0);
    assert_eq!(surface, once);
}
