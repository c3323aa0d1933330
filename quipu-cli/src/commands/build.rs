use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use quipu::georaster::tile_grid;
use quipu::pipeline::build_tiles_with;
use quipu::{hgt, Albedo, BuildOptions, ElevationSurface};
use std::path::PathBuf;
use tracing::info;

pub fn run(
    input: PathBuf,
    output: PathBuf,
    stem: Option<String>,
    options: BuildOptions,
    height_scale: Option<f64>,
) -> Result<()> {
    let dem = hgt::load(&input).with_context(|| format!("Failed to load {}", input.display()))?;
    let mut surface =
        ElevationSurface::new(dem, Albedo::None).context("Failed to build elevation surface")?;
    info!(input = %input.display(), resolution = %surface.resolution(), "loaded DEM");
    if let Some(factor) = height_scale {
        surface.scale_heights(factor);
    }

    let stem = match stem {
        Some(stem) => stem,
        None => input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .context("Input path has no file name; pass --stem")?,
    };

    let (rows, cols) = tile_grid(surface.resolution(), options.max_vertices, options.overlap);
    let pb = ProgressBar::new((rows * cols) as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} tiles ({eta})",
            )?
            .progress_chars("#>-"),
    );

    let report = build_tiles_with(&surface, &output, &stem, &options, |_| pb.inc(1))
        .context("Failed to build tiles")?;
    pb.finish_and_clear();

    println!(
        "Wrote {} of {} tiles to {}",
        report.len(),
        rows * cols,
        output.display()
    );
    for tile in &report.tiles {
        println!(
            "  {:<32} {:>11} {:>2} levels  GSD {:.1}m..{:.1}m",
            tile.path
                .file_name()
                .map(|n| n.to_string_lossy())
                .unwrap_or_default(),
            tile.resolution.to_string(),
            tile.levels,
            tile.finest_gsd,
            tile.coarsest_gsd
        );
    }

    Ok(())
}
