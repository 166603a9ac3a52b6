use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::Path;
use std::time::Instant;

use parcel_affect::cli::{Args, Config, Format, GridSize};
use parcel_affect::engine::AffectationEngine;
use parcel_affect::error::AffectError;
use parcel_affect::geojson::GeojsonReader;
use parcel_affect::gpkg::GpkgReader;
use parcel_affect::layers::{builtin_catalog, load_catalog, select_layers, LayerSpec};
use parcel_affect::logger::{self, Logger, VerbosityLevel};
use parcel_affect::math::{dimensions_for_scale, expand_bbox, PixelGrid};
use parcel_affect::rasterize::{build_parcel_mask, save_mask, save_masked_layer, InclusionMask};
use parcel_affect::report::{assemble_report, print_summary, JsonFileSink, ParcelMetadata, ParcelReport, ReportSink};
use parcel_affect::source::{DirectoryRasterSource, GeometrySource, RasterSource};

#[tokio::main]
async fn main() {
    let config = match Args::parse().validate() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    Logger::init(config.verbosity, config.no_color);

    if let Err(e) = run(config).await {
        logger::error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<()> {
    let source = open_geometry(&config).await?;
    let parcel = source.parcel().context("Failed to build parcel geometry")?;
    let metadata = ParcelMetadata::from_parcel(
        source.name(),
        config.input.display().to_string(),
        config.axis_order,
        &parcel,
    )?;
    logger::info(&format!(
        "Loaded parcel '{}' ({} polygon(s), {} vertices)",
        metadata.name, metadata.polygons, metadata.vertices
    ));

    let base = match config.bbox {
        Some(bbox) => bbox,
        None => metadata.parcel_bbox,
    };
    let bbox = expand_bbox(&base, config.zoom)?;
    let (width, height) = match config.grid_size {
        GridSize::Pixels { width, height } => (width, height),
        GridSize::Scale(scale) => dimensions_for_scale(&bbox, scale)?,
    };
    let grid = PixelGrid::new(bbox, width, height)?;
    logger::debug(&format!(
        "Grid {}x{} over {:.6},{:.6},{:.6},{:.6}",
        width, height, bbox.min_lon, bbox.min_lat, bbox.max_lon, bbox.max_lat
    ));

    let started = Instant::now();
    let mask = build_parcel_mask(&parcel, &grid).context("Failed to rasterize parcel")?;
    logger::debug(&format!(
        "Mask: {} of {} pixels inside the parcel ({:.1} ms)",
        mask.count(),
        grid.pixel_count(),
        started.elapsed().as_secs_f64() * 1000.0
    ));
    if mask.count() == 0 {
        logger::warn("The parcel covers no pixel centre of the grid; every layer will report 0%");
    }

    let catalog = match &config.catalog {
        Some(path) => load_catalog(path)
            .with_context(|| format!("Failed to load catalog {}", path.display()))?,
        None => builtin_catalog(),
    };
    let layers = select_layers(catalog, &config.only)?;
    let rasters = DirectoryRasterSource::new(&config.rasters)?;

    let progress = progress_bar(layers.len() as u64)?;
    let engine = AffectationEngine::new(grid).with_top_colors(config.top_colors);
    let deadline = config
        .timeout
        .map(|t| {
            Instant::now()
                .checked_add(t)
                .ok_or(AffectError::InvalidTimeout(t.as_secs_f64()))
        })
        .transpose()?;
    let outcomes = engine.analyze_from_source(&mask, &rasters, &layers, deadline, |layer, outcome| {
        progress.set_message(layer.id.clone());
        progress.inc(1);
        if let Some(result) = outcome.result() {
            logger::debug(&format!(
                "{}: {} affected / {} usable pixels",
                layer.id, result.affected_pixels, result.usable_pixels
            ));
        }
    });
    progress.finish_and_clear();

    let report = assemble_report(metadata, &grid, outcomes, &layers);

    if let Some(dir) = &config.save_images {
        save_images(dir, &mask, &rasters, &layers, &report, &grid)
            .with_context(|| format!("Failed to save images to {}", dir.display()))?;
    }

    if let Some(path) = &config.output {
        JsonFileSink::new(path)
            .accept(&report)
            .with_context(|| format!("Failed to write report {}", path.display()))?;
    }

    print_summary(&report);
    Ok(())
}

async fn open_geometry(config: &Config) -> Result<Box<dyn GeometrySource>> {
    match config.format {
        Format::Geojson => {
            let reader = GeojsonReader::open(&config.input, config.axis_order)?;
            Ok(Box::new(reader))
        }
        Format::Gpkg => {
            let reader = GpkgReader::open(&config.input).await?;
            let info = reader.select_layer(config.layer.as_deref()).await?;
            logger::debug(&format!("Reading GeoPackage layer '{}'", info.name));
            let layer = reader.read_layer(&info, config.axis_order).await?;
            Ok(Box::new(layer))
        }
    }
}

fn progress_bar(len: u64) -> Result<ProgressBar> {
    if logger::level() != VerbosityLevel::Normal {
        return Ok(ProgressBar::hidden());
    }
    let pb = ProgressBar::new(len);
    pb.set_style(ProgressStyle::default_bar().template("{bar:30.green} {pos}/{len} layers {msg}")?);
    Ok(pb)
}

/// Writes `mask.png` and `<layer>_masked.png` for every analysed layer.
fn save_images(
    dir: &Path,
    mask: &InclusionMask,
    rasters: &dyn RasterSource,
    layers: &[LayerSpec],
    report: &ParcelReport,
    grid: &PixelGrid,
) -> Result<()> {
    fs::create_dir_all(dir)?;

    let mask_path = dir.join("mask.png");
    save_mask(mask, &mask_path)?;
    logger::output(&mask_path.display().to_string());

    for layer in layers {
        if !report.per_layer.get(&layer.id).is_some_and(|o| o.is_analyzed()) {
            continue;
        }
        let image = rasters.fetch(grid.bbox(), layer, grid.width(), grid.height())?;
        let path = dir.join(format!("{}_masked.png", layer.id));
        save_masked_layer(&image.to_rgba8(), mask, &path)?;
        logger::output(&path.display().to_string());
    }
    Ok(())
}
