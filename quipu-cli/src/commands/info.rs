use anyhow::{Context, Result};
use quipu::{ReaderOptions, TiledPyramidStore};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Serialize)]
struct LevelInfo {
    gsd: f64,
    offset: u64,
    bytes: u64,
}

#[derive(Serialize)]
struct InfoResponse {
    path: String,
    file_size: u64,
    lod_count: usize,
    has_albedo: bool,
    compressed: bool,
    position: [f64; 3],
    scale: [f64; 3],
    cone_normal: [f32; 3],
    cone_half_angle_deg: f32,
    levels: Vec<LevelInfo>,
}

pub fn run(file: PathBuf, json: bool) -> Result<()> {
    let store = TiledPyramidStore::open(&file, ReaderOptions::default())
        .with_context(|| format!("Failed to open {}", file.display()))?;
    let file_size = std::fs::metadata(&file)?.len();

    let toc = store.toc();
    let levels: Vec<LevelInfo> = toc
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let end = toc.get(i + 1).map_or(file_size, |next| next.offset);
            LevelInfo {
                gsd: entry.gsd,
                offset: entry.offset,
                bytes: end - entry.offset,
            }
        })
        .collect();

    let transform = store.transform();
    let cone = store.cone();
    let info = InfoResponse {
        path: file.display().to_string(),
        file_size,
        lod_count: store.lod_count(),
        has_albedo: store.has_albedo(),
        compressed: store.is_compressed().context("Failed to read first level")?,
        position: transform.position.to_array(),
        scale: transform.scale.to_array(),
        cone_normal: cone.normal.to_array(),
        cone_half_angle_deg: cone.half_angle.to_degrees(),
        levels,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("File: {}", info.path);
    println!("Size: {}", format_size(info.file_size));
    println!();
    println!(
        "Origin: ({:.3}, {:.3}, {:.3})",
        info.position[0], info.position[1], info.position[2]
    );
    println!(
        "Visibility cone: axis ({:.3}, {:.3}, {:.3}), half-angle {:.1}°",
        info.cone_normal[0], info.cone_normal[1], info.cone_normal[2], info.cone_half_angle_deg
    );
    println!("Albedo: {}", if info.has_albedo { "yes" } else { "no" });
    println!("Compressed: {}", if info.compressed { "yes" } else { "no" });
    println!();
    println!("{:>5} {:>12} {:>12} {:>12}", "LOD", "GSD (m)", "OFFSET", "SIZE");
    println!("{}", "-".repeat(44));
    for (i, level) in info.levels.iter().enumerate() {
        println!(
            "{:>5} {:>12.3} {:>12} {:>12}",
            i,
            level.gsd,
            level.offset,
            format_size(level.bytes)
        );
    }

    Ok(())
}

fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}
