use anyhow::{Context, Result};
use quipu::mesh::write_obj;
use quipu::{ReaderOptions, TiledPyramidStore};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

pub fn run(file: PathBuf, gsd: Option<f64>, output: PathBuf) -> Result<()> {
    let options = ReaderOptions::from_env();
    let store = TiledPyramidStore::open(&file, options)
        .with_context(|| format!("Failed to open {}", file.display()))?;

    let required = gsd.unwrap_or(options.default_gsd);
    let buffers = store
        .load_buffers(required)
        .with_context(|| format!("Failed to read level for GSD {required}"))?;

    let out = File::create(&output)
        .with_context(|| format!("Failed to create {}", output.display()))?;
    let mut writer = BufWriter::new(out);
    let faces = write_obj(&mut writer, &buffers.vertices, &buffers.indices)
        .context("Failed to write mesh")?;
    writer.flush()?;

    println!(
        "Wrote {} triangles from level {} (GSD {:.2}m) to {}",
        faces,
        buffers.level,
        buffers.gsd,
        output.display()
    );
    Ok(())
}
