//! CLI argument parsing and validation.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::engine::DEFAULT_TOP_COLORS;
use crate::error::{AffectError, Result};
use crate::logger::VerbosityLevel;
use crate::math::Bbox;
use crate::polygon::AxisOrder;

/// Input file format
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum Format {
    Gpkg,
    Geojson,
}

/// Analysis grid size: explicit pixels or a metric scale.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GridSize {
    Pixels { width: u32, height: u32 },
    /// Metres per pixel.
    Scale(f64),
}

pub const DEFAULT_SIZE: u32 = 1200;

/// Command line arguments for parcel-affect.
#[derive(Parser, Debug)]
#[command(name = "parcel-affect")]
#[command(version, about = "Measures how much of a parcel each environmental layer covers", long_about = None)]
pub struct Args {
    /// Parcel geometry file (.geojson or .gpkg).
    pub input: PathBuf,

    /// Input file format.
    #[arg(short = 'f', long, value_enum, default_value = "geojson")]
    pub format: Format,

    /// GeoPackage layer holding the parcel (default: first polygon layer).
    #[arg(short, long)]
    pub layer: Option<String>,

    /// Axis order of the input coordinates.
    #[arg(long, value_enum, default_value = "lon-lat")]
    pub axis_order: AxisOrder,

    /// Directory with one raster per layer, named <layer id>.png/.jpg.
    #[arg(short, long)]
    pub rasters: PathBuf,

    /// JSON layer catalog (default: built-in environmental layers).
    #[arg(long)]
    pub catalog: Option<PathBuf>,

    /// Only analyse these layer ids (comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub only: Vec<String>,

    /// Grid width in pixels (mutually exclusive with --scale).
    #[arg(long)]
    pub width: Option<u32>,

    /// Grid height in pixels (mutually exclusive with --scale).
    #[arg(long)]
    pub height: Option<u32>,

    /// Scale in meters per pixel (mutually exclusive with --width/--height).
    #[arg(short, long)]
    pub scale: Option<f64>,

    /// Factor applied to the parcel extent around its center.
    #[arg(short, long, default_value = "1.0")]
    pub zoom: f64,

    /// Analysis extent override: "minLon,minLat,maxLon,maxLat".
    #[arg(short, long)]
    pub bbox: Option<String>,

    /// Number of most frequent colors reported per layer.
    #[arg(long, default_value_t = DEFAULT_TOP_COLORS)]
    pub top_colors: usize,

    /// Give up on layers not started after this many seconds.
    #[arg(long)]
    pub timeout: Option<f64>,

    /// Write the JSON report to this file.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Save the parcel mask and masked layer images to this directory.
    #[arg(long)]
    pub save_images: Option<PathBuf>,

    /// Only print errors.
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Print debug details with timings.
    #[arg(short, long)]
    pub verbose: bool,

    /// Disable colored output.
    #[arg(long)]
    pub no_color: bool,
}

/// Fully validated configuration object.
#[derive(Debug)]
pub struct Config {
    pub input: PathBuf,
    pub format: Format,
    /// GeoPackage layer name (None for GeoJSON or first layer).
    pub layer: Option<String>,
    pub axis_order: AxisOrder,
    pub rasters: PathBuf,
    pub catalog: Option<PathBuf>,
    pub only: Vec<String>,
    pub grid_size: GridSize,
    pub zoom: f64,
    /// Explicit analysis extent (None means parcel extent expanded by `zoom`).
    pub bbox: Option<Bbox>,
    pub top_colors: usize,
    pub timeout: Option<Duration>,
    pub output: Option<PathBuf>,
    pub save_images: Option<PathBuf>,
    pub verbosity: VerbosityLevel,
    pub no_color: bool,
}

impl Args {
    /// Validates arguments and converts them to a structured `Config`.
    pub fn validate(self) -> Result<Config> {
        let grid_size = match (self.scale, self.width, self.height) {
            (Some(_), Some(_), _) => {
                return Err(AffectError::MutuallyExclusiveOptions(
                    "width".to_string(),
                    "scale".to_string(),
                ))
            }
            (Some(_), _, Some(_)) => {
                return Err(AffectError::MutuallyExclusiveOptions(
                    "height".to_string(),
                    "scale".to_string(),
                ))
            }
            (Some(scale), None, None) => {
                if !(scale > 0.0 && scale.is_finite()) {
                    return Err(AffectError::InvalidScale(scale));
                }
                GridSize::Scale(scale)
            }
            (None, width, height) => {
                let width = width.unwrap_or(DEFAULT_SIZE);
                let height = height.unwrap_or(DEFAULT_SIZE);
                if width == 0 || height == 0 {
                    return Err(AffectError::InvalidDimensions { width, height });
                }
                GridSize::Pixels { width, height }
            }
        };

        if !(self.zoom > 0.0 && self.zoom.is_finite()) {
            return Err(AffectError::InvalidZoom(self.zoom));
        }

        let timeout = match self.timeout {
            Some(secs) if !(secs > 0.0 && secs.is_finite()) => {
                return Err(AffectError::InvalidTimeout(secs))
            }
            Some(secs) => Some(
                Duration::try_from_secs_f64(secs).map_err(|_| AffectError::InvalidTimeout(secs))?,
            ),
            None => None,
        };

        let bbox = self.bbox.as_ref().map(|s| parse_bbox(s)).transpose()?;

        if self.format == Format::Geojson && self.layer.is_some() {
            return Err(AffectError::InvalidFormatOption(
                "--layer cannot be used with geojson format".to_string(),
            ));
        }

        let only = self
            .only
            .into_iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect();

        Ok(Config {
            input: self.input,
            format: self.format,
            layer: self.layer,
            axis_order: self.axis_order,
            rasters: self.rasters,
            catalog: self.catalog,
            only,
            grid_size,
            zoom: self.zoom,
            bbox,
            top_colors: self.top_colors,
            timeout,
            output: self.output,
            save_images: self.save_images,
            verbosity: VerbosityLevel::from_flags(self.quiet, self.verbose),
            no_color: self.no_color,
        })
    }
}

fn parse_bbox(s: &str) -> Result<Bbox> {
    let parts: Vec<&str> = s.split(',').collect();
    if parts.len() != 4 {
        return Err(AffectError::InvalidBbox(format!(
            "expected 4 comma-separated values, got {}",
            parts.len()
        )));
    }

    let values: std::result::Result<Vec<f64>, _> = parts.iter().map(|p| p.trim().parse()).collect();
    let values = values.map_err(|_| AffectError::InvalidBbox("invalid number format".to_string()))?;

    let (min_lon, min_lat, max_lon, max_lat) = (values[0], values[1], values[2], values[3]);

    if min_lon >= max_lon {
        return Err(AffectError::InvalidBbox(format!(
            "min_lon ({}) must be less than max_lon ({})",
            min_lon, max_lon
        )));
    }
    if min_lat >= max_lat {
        return Err(AffectError::InvalidBbox(format!(
            "min_lat ({}) must be less than max_lat ({})",
            min_lat, max_lat
        )));
    }

    Ok(Bbox::new(min_lon, min_lat, max_lon, max_lat))
}
