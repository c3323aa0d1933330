//! Build Quipu tiles from an SRTM file and read one back at several GSDs.
//!
//! Run with: cargo run --example build_pyramid -- /path/to/N35E138.hgt /tmp/tiles

use std::env;

use quipu::{hgt, Albedo, BuildOptions, ElevationSurface, QuipuError, ReaderOptions, TiledPyramidStore};

fn main() -> Result<(), QuipuError> {
    let mut args = env::args().skip(1);
    let (Some(input), Some(out_dir)) = (args.next(), args.next()) else {
        eprintln!("Usage: cargo run --example build_pyramid -- <file.hgt> <out_dir>");
        std::process::exit(1);
    };

    let dem = hgt::load(&input)?;
    println!("Loaded {} ({})", input, dem.resolution());

    let surface = ElevationSurface::new(dem, Albedo::None)?;
    let options = BuildOptions::default().with_max_vertices(250_000);
    let report = quipu::build_tiles(&surface, &out_dir, "example", &options)?;

    println!("Wrote {} tiles:", report.len());
    for tile in &report.tiles {
        println!(
            "  {} {} levels, GSD {:.1}m..{:.1}m",
            tile.path.display(),
            tile.levels,
            tile.finest_gsd,
            tile.coarsest_gsd
        );
    }

    let Some(first) = report.tiles.first() else {
        return Ok(());
    };
    let mut store = TiledPyramidStore::open(&first.path, ReaderOptions::default())?;

    println!();
    println!("{:>10} {:>10} {:>10}", "required", "selected", "triangles");
    println!("{:-<32}", "");
    for required in [10.0, 50.0, 200.0, 1000.0] {
        let buffers = store.read_buffers(required)?;
        println!(
            "{:>10.1} {:>10.1} {:>10}",
            required,
            buffers.gsd,
            buffers.indices.len() / 3
        );
    }

    Ok(())
}
