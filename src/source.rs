//! Boundaries to the outside world: where parcels and layer rasters come from.

use image::DynamicImage;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{AffectError, Result};
use crate::layers::LayerSpec;
use crate::math::Bbox;
use crate::polygon::{AxisOrder, GeoPolygon, Parcel};

/// Anything that yields the parcel polygons, already in (lon, lat).
pub trait GeometrySource {
    fn parcel(&self) -> Result<Parcel>;

    /// Short label for reports and logs (file name, layer name...).
    fn name(&self) -> String;
}

/// Supplies a layer raster covering `bbox` at `width` x `height` pixels.
///
/// Failures are reported as [`AffectError::SourceUnavailable`]. Implementations
/// are called from several threads at once.
pub trait RasterSource: Sync {
    fn fetch(&self, bbox: &Bbox, layer: &LayerSpec, width: u32, height: u32) -> Result<DynamicImage>;
}

/// A ring as raw coordinate pairs, in whatever order the source declares.
pub type Ring = Vec<(f64, f64)>;

/// Builds a parcel from raw polygon rings, keying polygons `<name>-<n>`.
pub(crate) fn parcel_from_rings(name: &str, polygons: &[Vec<Ring>], order: AxisOrder) -> Result<Parcel> {
    let polygons = polygons
        .iter()
        .enumerate()
        .map(|(i, rings)| {
            let key = format!("{}-{}", name, i + 1);
            match GeoPolygon::from_rings(rings.clone(), order) {
                Ok(polygon) => Ok((key, polygon)),
                Err(AffectError::InvalidGeometry(msg)) => {
                    Err(AffectError::InvalidGeometry(format!("{}: {}", key, msg)))
                }
                Err(other) => Err(other),
            }
        })
        .collect::<Result<Vec<_>>>()?;
    Parcel::from_polygons(polygons)
}

const RASTER_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Reads pre-rendered rasters named `<layer id>.<png|jpg|jpeg>` from a directory.
///
/// The files must already cover the analysis extent; the requested bbox is not
/// checked, only the dimensions (by the engine).
#[derive(Debug, Clone)]
pub struct DirectoryRasterSource {
    dir: PathBuf,
}

impl DirectoryRasterSource {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(AffectError::FileNotFound(dir.display().to_string()));
        }
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn locate(&self, layer_id: &str) -> Option<PathBuf> {
        RASTER_EXTENSIONS
            .iter()
            .map(|ext| self.dir.join(format!("{}.{}", layer_id, ext)))
            .find(|path| path.is_file())
    }
}

impl RasterSource for DirectoryRasterSource {
    fn fetch(&self, _bbox: &Bbox, layer: &LayerSpec, _width: u32, _height: u32) -> Result<DynamicImage> {
        let path = self.locate(&layer.id).ok_or_else(|| {
            AffectError::source_unavailable(
                &layer.id,
                format!("no {}.png/.jpg in {}", layer.id, self.dir.display()),
            )
        })?;
        image::open(&path)
            .map_err(|e| AffectError::source_unavailable(&layer.id, format!("{}: {}", path.display(), e)))
    }
}

/// Rasters held in memory, keyed by layer id.
#[derive(Debug, Clone, Default)]
pub struct MemoryRasterSource {
    images: HashMap<String, DynamicImage>,
}

impl MemoryRasterSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, layer_id: impl Into<String>, image: DynamicImage) {
        self.images.insert(layer_id.into(), image);
    }

    pub fn with(mut self, layer_id: impl Into<String>, image: DynamicImage) -> Self {
        self.insert(layer_id, image);
        self
    }
}

impl RasterSource for MemoryRasterSource {
    fn fetch(&self, _bbox: &Bbox, layer: &LayerSpec, _width: u32, _height: u32) -> Result<DynamicImage> {
        self.images
            .get(&layer.id)
            .cloned()
            .ok_or_else(|| AffectError::source_unavailable(&layer.id, "no raster loaded"))
    }
}
