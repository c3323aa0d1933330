use anyhow::Result;
use clap::{Parser, Subcommand};
use quipu::config::parse_resolution;
use quipu::Resolution;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

/// Build and inspect Quipu LOD terrain files
#[derive(Parser)]
#[command(name = "quipu")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Tile an SRTM .hgt file and write one Quipu pyramid per tile
    Build {
        /// Input .hgt file
        input: PathBuf,

        /// Output directory
        #[arg(short, long)]
        output: PathBuf,

        /// File name prefix (defaults to the input file stem)
        #[arg(long)]
        stem: Option<String>,

        /// Maximum samples per tile, overlap included
        #[arg(long, env = "QUIPU_MAX_VERTICES", default_value = "1000000")]
        max_vertices: usize,

        /// Border pixels shared between neighbouring tiles
        #[arg(long, env = "QUIPU_TILE_OVERLAP", default_value = "0")]
        overlap: usize,

        /// Coarsest level size, as WxH or N
        #[arg(
            long,
            env = "QUIPU_MIN_RESOLUTION",
            default_value = "8",
            value_parser = resolution_arg
        )]
        min_resolution: Resolution,

        /// Fill voids before building each pyramid
        #[arg(long, env = "QUIPU_FILL_MISSING")]
        fill_missing: bool,

        /// Compress height and albedo payloads
        #[arg(short, long, env = "QUIPU_COMPRESS")]
        compress: bool,

        /// Multiply every height by this factor first
        #[arg(long)]
        height_scale: Option<f64>,
    },

    /// Display the header of a Quipu file
    Info {
        /// Path to a .qld file
        file: PathBuf,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Export one level of a Quipu file as a Wavefront OBJ mesh
    Export {
        /// Path to a .qld file
        file: PathBuf,

        /// Required GSD in meters (coarsest level if omitted)
        #[arg(long, env = "QUIPU_DEFAULT_GSD")]
        gsd: Option<f64>,

        /// Output .obj file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Remove samples of Quipu files already covered by a base DEM
    Dedup {
        /// Base .hgt file, or a .qld file whose finest level is used
        base: PathBuf,

        /// Quipu files to rewrite
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

fn resolution_arg(value: &str) -> std::result::Result<Resolution, String> {
    parse_resolution(value)
        .filter(|r| !r.is_empty())
        .ok_or_else(|| format!("invalid resolution '{value}', expected WxH or N"))
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quipu=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            input,
            output,
            stem,
            max_vertices,
            overlap,
            min_resolution,
            fill_missing,
            compress,
            height_scale,
        } => {
            let options = quipu::BuildOptions::default()
                .with_max_vertices(max_vertices)
                .with_overlap(overlap)
                .with_min_resolution(min_resolution)
                .with_fill_missing(fill_missing)
                .with_writer(quipu::WriterOptions::from_env().with_compress(compress));
            commands::build::run(input, output, stem, options, height_scale)
        }
        Commands::Info { file, json } => commands::info::run(file, json),
        Commands::Export { file, gsd, output } => commands::export::run(file, gsd, output),
        Commands::Dedup { base, files } => commands::dedup::run(base, files),
    }
}
