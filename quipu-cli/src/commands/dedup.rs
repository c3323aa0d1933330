use anyhow::{Context, Result};
use indicatif::ProgressBar;
use quipu::pipeline::OverlapOutcome;
use quipu::{hgt, Albedo, ElevationSurface, ReaderOptions, TiledPyramidStore};
use std::path::{Path, PathBuf};
use std::time::Duration;

fn load_base(path: &Path) -> Result<ElevationSurface> {
    let is_quipu = path
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case(quipu::store::FILE_EXTENSION));
    if is_quipu {
        let store = TiledPyramidStore::open(path, ReaderOptions::default().with_read_albedo(false))?;
        Ok(store.read_level(0)?.surface)
    } else {
        Ok(ElevationSurface::new(hgt::load(path)?, Albedo::None)?)
    }
}

pub fn run(base: PathBuf, files: Vec<PathBuf>) -> Result<()> {
    let base_surface =
        load_base(&base).with_context(|| format!("Failed to load base {}", base.display()))?;

    let pb = ProgressBar::new_spinner();
    pb.set_message(format!("Removing overlap from {} files", files.len()));
    pb.enable_steady_tick(Duration::from_millis(100));

    let report = quipu::remove_overlaps(&base_surface, &files).context("Overlap removal failed")?;
    pb.finish_and_clear();

    for (path, outcome) in &report.files {
        let status = match outcome {
            OverlapOutcome::Unchanged => "unchanged".to_string(),
            OverlapOutcome::Rewritten { removed } => format!("rewritten, {removed} samples removed"),
            OverlapOutcome::Deleted => "deleted".to_string(),
        };
        println!("{}: {}", path.display(), status);
    }
    println!();
    println!(
        "{} rewritten, {} deleted, {} unchanged",
        report.rewritten(),
        report.deleted(),
        report.files.len() - report.rewritten() - report.deleted()
    );

    Ok(())
}
