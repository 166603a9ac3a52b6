//! Affectation analysis: how much of a parcel each layer covers.
//!
//! For one layer raster aligned on the analysis grid:
//! 1. Only pixels inside the parcel mask participate.
//! 2. Blank pixels (near white or transparent) carry no data and are removed
//!    from the usable denominator.
//! 3. Pixels matching any target colour of the layer are affected.
//!
//! Percentages are 0 whenever their denominator is 0. Layers are independent,
//! so `analyze_all` and `analyze_from_source` run them on the rayon pool, and a
//! failing layer becomes a [`LayerOutcome::Failed`] entry instead of aborting
//! the others.

use image::DynamicImage;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use crate::classify::{classify, classify_blank, color_histogram, to_rgb, ColorCount, Rgb};
use crate::error::{AffectError, Result};
use crate::layers::LayerSpec;
use crate::logger;
use crate::math::PixelGrid;
use crate::rasterize::InclusionMask;
use crate::source::RasterSource;

pub const DEFAULT_TOP_COLORS: usize = 10;

/// Affectation level of a parcel, from the percentage of usable area.
///
/// Each level includes its lower bound: 5.0 is `Low`, 60.0 is `VeryHigh`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Severity {
    #[serde(rename = "none")]
    None,
    #[serde(rename = "very low")]
    VeryLow,
    #[serde(rename = "low")]
    Low,
    #[serde(rename = "moderate")]
    Moderate,
    #[serde(rename = "high")]
    High,
    #[serde(rename = "very high")]
    VeryHigh,
}

impl Severity {
    pub fn from_percentage(pct: f64) -> Self {
        if pct.is_nan() || pct <= 0.0 {
            Severity::None
        } else if pct < 5.0 {
            Severity::VeryLow
        } else if pct < 15.0 {
            Severity::Low
        } else if pct < 35.0 {
            Severity::Moderate
        } else if pct < 60.0 {
            Severity::High
        } else {
            Severity::VeryHigh
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Severity::None => "none",
            Severity::VeryLow => "very low",
            Severity::Low => "low",
            Severity::Moderate => "moderate",
            Severity::High => "high",
            Severity::VeryHigh => "very high",
        }
    }
}

/// Pixel counts and derived figures for one layer over one parcel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AffectationResult {
    pub total_pixels_in_polygon: u64,
    /// Blank (no data) pixels inside the polygon.
    pub white_pixels: u64,
    pub usable_pixels: u64,
    pub affected_pixels: u64,
    pub pct_of_usable: f64,
    pub pct_of_total: f64,
    pub severity: Severity,
    pub distinct_colors: usize,
    pub detected_color_histogram: Vec<ColorCount>,
    pub target_colors: Vec<Rgb>,
    pub tolerance: u32,
    /// Area of the analysis extent. Flat-earth approximation, small extents only.
    pub estimated_area_ha: Option<f64>,
    pub estimated_affected_area_ha: Option<f64>,
}

/// What happened to one layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LayerOutcome {
    Analyzed(AffectationResult),
    Failed { error: String, message: String },
    Skipped { reason: String },
}

impl LayerOutcome {
    pub fn result(&self) -> Option<&AffectationResult> {
        match self {
            LayerOutcome::Analyzed(result) => Some(result),
            _ => None,
        }
    }

    pub fn is_analyzed(&self) -> bool {
        matches!(self, LayerOutcome::Analyzed(_))
    }

    fn from_error(err: &AffectError) -> Self {
        LayerOutcome::Failed {
            error: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// Runs layer analyses over a fixed grid.
#[derive(Debug, Clone)]
pub struct AffectationEngine {
    grid: PixelGrid,
    top_colors: usize,
}

impl AffectationEngine {
    pub fn new(grid: PixelGrid) -> Self {
        Self {
            grid,
            top_colors: DEFAULT_TOP_COLORS,
        }
    }

    /// Number of most frequent colours kept in each result.
    pub fn with_top_colors(mut self, top_colors: usize) -> Self {
        self.top_colors = top_colors;
        self
    }

    pub fn grid(&self) -> &PixelGrid {
        &self.grid
    }

    /// Analyse one layer raster against the parcel mask.
    pub fn analyze(
        &self,
        mask: &InclusionMask,
        image: &DynamicImage,
        layer: &LayerSpec,
    ) -> Result<AffectationResult> {
        let expected = (self.grid.width(), self.grid.height());
        if mask.dimensions() != expected {
            return Err(AffectError::classification(
                &layer.id,
                format!(
                    "mask is {}x{}, grid is {}x{}",
                    mask.dimensions().0,
                    mask.dimensions().1,
                    expected.0,
                    expected.1
                ),
            ));
        }
        if (image.width(), image.height()) != expected {
            return Err(AffectError::classification(
                &layer.id,
                format!(
                    "raster is {}x{}, expected {}x{}",
                    image.width(),
                    image.height(),
                    expected.0,
                    expected.1
                ),
            ));
        }
        let rgb = to_rgb(image).map_err(|reason| AffectError::classification(&layer.id, reason))?;

        let inside = mask.as_slice();
        let total = mask.count() as u64;
        let count_inside = |flags: Vec<bool>| -> u64 {
            flags
                .iter()
                .zip(inside)
                .filter(|(flag, inside)| **flag && **inside)
                .count() as u64
        };

        let (blank, affected) = if total == 0 {
            (0, 0)
        } else {
            (
                count_inside(classify_blank(&rgb)),
                count_inside(classify(&rgb, &layer.colors, layer.tolerance)),
            )
        };
        let usable = total - blank;

        let pct_of_usable = percentage(affected, usable);
        let pct_of_total = percentage(affected, total);

        let estimated_area_ha = self.grid.bbox().area_ha();
        let estimated_affected_area_ha = estimated_area_ha.map(|area| area * pct_of_usable / 100.0);

        let (distinct_colors, detected_color_histogram) = if total == 0 {
            (0, Vec::new())
        } else {
            color_histogram(&rgb, mask, self.top_colors)
        };

        Ok(AffectationResult {
            total_pixels_in_polygon: total,
            white_pixels: blank,
            usable_pixels: usable,
            affected_pixels: affected,
            pct_of_usable,
            pct_of_total,
            severity: Severity::from_percentage(pct_of_usable),
            distinct_colors,
            detected_color_histogram,
            target_colors: layer.colors.clone(),
            tolerance: layer.tolerance,
            estimated_area_ha,
            estimated_affected_area_ha,
        })
    }

    fn outcome(
        &self,
        mask: &InclusionMask,
        image: std::result::Result<&DynamicImage, &AffectError>,
        layer: &LayerSpec,
    ) -> LayerOutcome {
        let analyzed = match image {
            Ok(image) => self.analyze(mask, image, layer),
            Err(err) => {
                logger::warn(&err.to_string());
                return LayerOutcome::from_error(err);
            }
        };
        match analyzed {
            Ok(result) => {
                logger::debug(&format!(
                    "{}: {} of {} usable pixels affected ({:.2}%)",
                    layer.id, result.affected_pixels, result.usable_pixels, result.pct_of_usable
                ));
                LayerOutcome::Analyzed(result)
            }
            Err(err) => {
                logger::warn(&err.to_string());
                LayerOutcome::from_error(&err)
            }
        }
    }

    /// Analyse every layer against rasters supplied up front. A layer with no
    /// entry, or with a failed load, gets a `Failed` outcome.
    pub fn analyze_all(
        &self,
        mask: &InclusionMask,
        images: &HashMap<String, Result<DynamicImage>>,
        layers: &[LayerSpec],
    ) -> BTreeMap<String, LayerOutcome> {
        layers
            .par_iter()
            .map(|layer| {
                let outcome = match images.get(&layer.id) {
                    Some(image) => self.outcome(mask, image.as_ref(), layer),
                    None => {
                        let missing = AffectError::source_unavailable(&layer.id, "no raster supplied");
                        self.outcome(mask, Err(&missing), layer)
                    }
                };
                (layer.id.clone(), outcome)
            })
            .collect()
    }

    /// Fetch and analyse every layer. Layers whose turn comes after `deadline`
    /// are skipped; results already computed are kept.
    ///
    /// The deadline is checked before each fetch only. A fetch that has
    /// started runs to completion, so a slow source can overrun the deadline
    /// by up to one layer; that layer's result is still reported.
    pub fn analyze_from_source<F>(
        &self,
        mask: &InclusionMask,
        source: &dyn RasterSource,
        layers: &[LayerSpec],
        deadline: Option<Instant>,
        on_layer_done: F,
    ) -> BTreeMap<String, LayerOutcome>
    where
        F: Fn(&LayerSpec, &LayerOutcome) + Sync,
    {
        layers
            .par_iter()
            .map(|layer| {
                let outcome = if deadline.is_some_and(|d| Instant::now() >= d) {
                    LayerOutcome::Skipped {
                        reason: "deadline exceeded before the layer was fetched".to_string(),
                    }
                } else {
                    let image = source.fetch(self.grid.bbox(), layer, self.grid.width(), self.grid.height());
                    self.outcome(mask, image.as_ref(), layer)
                };
                on_layer_done(layer, &outcome);
                (layer.id.clone(), outcome)
            })
            .collect()
    }
}

fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::SourceDescriptor;
    use crate::math::Bbox;
    use crate::polygon::GeoPolygon;
    use crate::rasterize::build_mask;
    use crate::source::MemoryRasterSource;
    use image::{Rgb as Pixel, RgbImage};
    use std::time::Duration;

    fn layer(id: &str, colors: &[Rgb], tolerance: u32) -> LayerSpec {
        LayerSpec {
            id: id.to_string(),
            title: None,
            source: SourceDescriptor {
                url: "memory://".to_string(),
                layer: id.to_string(),
                style: String::new(),
            },
            colors: colors.to_vec(),
            tolerance,
        }
    }

    fn grid_100() -> PixelGrid {
        PixelGrid::new(Bbox::new(0.0, 0.0, 0.01, 0.01), 100, 100).unwrap()
    }

    fn solid(color: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(100, 100, Pixel(color)))
    }

    #[test]
    fn test_severity_boundaries() {
        assert_eq!(Severity::from_percentage(0.0), Severity::None);
        assert_eq!(Severity::from_percentage(0.001), Severity::VeryLow);
        assert_eq!(Severity::from_percentage(4.999), Severity::VeryLow);
        assert_eq!(Severity::from_percentage(5.0), Severity::Low);
        assert_eq!(Severity::from_percentage(14.999), Severity::Low);
        assert_eq!(Severity::from_percentage(15.0), Severity::Moderate);
        assert_eq!(Severity::from_percentage(35.0), Severity::High);
        assert_eq!(Severity::from_percentage(59.999), Severity::High);
        assert_eq!(Severity::from_percentage(60.0), Severity::VeryHigh);
        assert_eq!(Severity::from_percentage(100.0), Severity::VeryHigh);
    }

    #[test]
    fn test_severity_is_monotonic() {
        let mut previous = Severity::None;
        for i in 0..=10_000 {
            let current = Severity::from_percentage(i as f64 / 100.0);
            assert!(current >= previous);
            previous = current;
        }
    }

    #[test]
    fn test_severity_serializes_as_label() {
        assert_eq!(serde_json::to_string(&Severity::VeryHigh).unwrap(), "\"very high\"");
        assert_eq!(Severity::Moderate.label(), "moderate");
    }

    #[test]
    fn test_all_black_full_mask() {
        let grid = grid_100();
        let engine = AffectationEngine::new(grid);
        let mask = InclusionMask::full(&grid);
        let result = engine
            .analyze(&mask, &solid([0, 0, 0]), &layer("l", &[Rgb::new(0, 0, 0)], 10))
            .unwrap();
        assert_eq!(result.total_pixels_in_polygon, 10_000);
        assert_eq!(result.affected_pixels, 10_000);
        assert_eq!(result.white_pixels, 0);
        assert_eq!(result.usable_pixels, 10_000);
        assert_eq!(result.pct_of_usable, 100.0);
        assert_eq!(result.pct_of_total, 100.0);
        assert_eq!(result.severity, Severity::VeryHigh);
    }

    #[test]
    fn test_all_white_has_no_usable_pixels() {
        let grid = grid_100();
        let engine = AffectationEngine::new(grid);
        let mask = InclusionMask::full(&grid);
        let result = engine
            .analyze(&mask, &solid([255, 255, 255]), &layer("l", &[Rgb::new(0, 0, 0)], 10))
            .unwrap();
        assert_eq!(result.white_pixels, 10_000);
        assert_eq!(result.usable_pixels, 0);
        assert_eq!(result.pct_of_usable, 0.0);
        assert_eq!(result.pct_of_total, 0.0);
        assert_eq!(result.severity, Severity::None);
    }

    #[test]
    fn test_overlapping_targets_count_once() {
        let grid = grid_100();
        let engine = AffectationEngine::new(grid);
        let mask = InclusionMask::full(&grid);
        let colors = [Rgb::new(34, 139, 34), Rgb::new(0, 128, 0)];
        let result = engine
            .analyze(&mask, &solid([20, 130, 10]), &layer("l", &colors, 40))
            .unwrap();
        assert_eq!(result.affected_pixels, 10_000);
        assert_eq!(result.pct_of_usable, 100.0);
    }

    #[test]
    fn test_empty_mask_is_all_zero() {
        let grid = grid_100();
        let engine = AffectationEngine::new(grid);
        let outside = GeoPolygon::new(vec![(1.0, 1.0), (2.0, 1.0), (2.0, 2.0)], vec![]).unwrap();
        let mask = build_mask(&outside, &grid).unwrap();
        let result = engine
            .analyze(&mask, &solid([0, 0, 0]), &layer("l", &[Rgb::new(0, 0, 0)], 10))
            .unwrap();
        assert_eq!(result.total_pixels_in_polygon, 0);
        assert_eq!(result.affected_pixels, 0);
        assert_eq!(result.pct_of_usable, 0.0);
        assert_eq!(result.pct_of_total, 0.0);
        assert!(result.detected_color_histogram.is_empty());
        assert_eq!(result.estimated_affected_area_ha, Some(0.0));
    }

    #[test]
    fn test_pixels_outside_mask_never_count() {
        let grid = grid_100();
        let engine = AffectationEngine::new(grid);
        // West half of the grid
        let west = GeoPolygon::new(
            vec![(0.0, 0.0), (0.005, 0.0), (0.005, 0.01), (0.0, 0.01)],
            vec![],
        )
        .unwrap();
        let mask = build_mask(&west, &grid).unwrap();
        // Black on the east half, white on the west half
        let image = DynamicImage::ImageRgb8(RgbImage::from_fn(100, 100, |x, _| {
            if x >= 50 { Pixel([0, 0, 0]) } else { Pixel([255, 255, 255]) }
        }));
        let result = engine
            .analyze(&mask, &image, &layer("l", &[Rgb::new(0, 0, 0)], 10))
            .unwrap();
        assert_eq!(result.total_pixels_in_polygon, 5_000);
        assert_eq!(result.affected_pixels, 0);
        assert_eq!(result.white_pixels, 5_000);
    }

    #[test]
    fn test_percentages_and_area() {
        let grid = grid_100();
        let engine = AffectationEngine::new(grid).with_top_colors(2);
        let mask = InclusionMask::full(&grid);
        // 25 rows green, 25 rows white, 50 rows grey
        let image = DynamicImage::ImageRgb8(RgbImage::from_fn(100, 100, |_, y| match y {
            0..=24 => Pixel([0, 128, 0]),
            25..=49 => Pixel([255, 255, 255]),
            _ => Pixel([128, 128, 128]),
        }));
        let result = engine
            .analyze(&mask, &image, &layer("l", &[Rgb::new(0, 128, 0)], 20))
            .unwrap();
        assert_eq!(result.affected_pixels, 2_500);
        assert_eq!(result.usable_pixels, 7_500);
        assert!((result.pct_of_usable - 100.0 / 3.0).abs() < 1e-9);
        assert!((result.pct_of_total - 25.0).abs() < 1e-9);
        assert_eq!(result.severity, Severity::Moderate);
        assert_eq!(result.distinct_colors, 3);
        assert_eq!(result.detected_color_histogram.len(), 2);
        assert_eq!(result.detected_color_histogram[0].color, Rgb::new(128, 128, 128));

        let area = result.estimated_area_ha.unwrap();
        let affected = result.estimated_affected_area_ha.unwrap();
        assert!((affected - area / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_dimension_mismatch_is_classification_error() {
        let grid = grid_100();
        let engine = AffectationEngine::new(grid);
        let mask = InclusionMask::full(&grid);
        let small = DynamicImage::ImageRgb8(RgbImage::new(50, 50));
        let err = engine
            .analyze(&mask, &small, &layer("l", &[Rgb::new(0, 0, 0)], 10))
            .unwrap_err();
        assert_eq!(err.kind(), "classification");
        assert!(err.to_string().contains("raster is 50x50, expected 100x100"));
    }

    #[test]
    fn test_analyze_is_idempotent() {
        let grid = grid_100();
        let engine = AffectationEngine::new(grid);
        let mask = InclusionMask::full(&grid);
        let image = DynamicImage::ImageRgb8(RgbImage::from_fn(100, 100, |x, y| {
            Pixel([(x * 2) as u8, (y * 2) as u8, ((x + y) % 256) as u8])
        }));
        let spec = layer("l", &[Rgb::new(60, 60, 60)], 30);
        let a = engine.analyze(&mask, &image, &spec).unwrap();
        let b = engine.analyze(&mask, &image, &spec).unwrap();
        assert_eq!(serde_json::to_vec(&a).unwrap(), serde_json::to_vec(&b).unwrap());
    }

    #[test]
    fn test_analyze_all_tolerates_failures() {
        let grid = grid_100();
        let engine = AffectationEngine::new(grid);
        let mask = InclusionMask::full(&grid);
        let layers = vec![
            layer("ok", &[Rgb::new(0, 0, 0)], 10),
            layer("broken", &[Rgb::new(0, 0, 0)], 10),
            layer("missing", &[Rgb::new(0, 0, 0)], 10),
        ];
        let mut images = HashMap::new();
        images.insert("ok".to_string(), Ok(solid([0, 0, 0])));
        images.insert(
            "broken".to_string(),
            Err(AffectError::source_unavailable("broken", "timeout")),
        );

        let outcomes = engine.analyze_all(&mask, &images, &layers);
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes["ok"].is_analyzed());
        assert!(matches!(
            &outcomes["broken"],
            LayerOutcome::Failed { error, .. } if error == "source_unavailable"
        ));
        assert!(matches!(&outcomes["missing"], LayerOutcome::Failed { .. }));
    }

    #[test]
    fn test_analyze_from_source_reports_progress() {
        let grid = grid_100();
        let engine = AffectationEngine::new(grid);
        let mask = InclusionMask::full(&grid);
        let source = MemoryRasterSource::new().with("a", solid([0, 0, 0]));
        let layers = vec![layer("a", &[Rgb::new(0, 0, 0)], 10), layer("b", &[Rgb::new(0, 0, 0)], 10)];

        let done = std::sync::atomic::AtomicUsize::new(0);
        let outcomes = engine.analyze_from_source(&mask, &source, &layers, None, |_, _| {
            done.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });
        assert_eq!(done.into_inner(), 2);
        assert!(outcomes["a"].is_analyzed());
        assert!(matches!(&outcomes["b"], LayerOutcome::Failed { error, .. } if error == "source_unavailable"));
    }

    #[test]
    fn test_expired_deadline_skips_layers() {
        let grid = grid_100();
        let engine = AffectationEngine::new(grid);
        let mask = InclusionMask::full(&grid);
        let source = MemoryRasterSource::new().with("a", solid([0, 0, 0]));
        let layers = vec![layer("a", &[Rgb::new(0, 0, 0)], 10)];

        let past = Instant::now() - Duration::from_millis(1);
        let outcomes = engine.analyze_from_source(&mask, &source, &layers, Some(past), |_, _| {});
        assert!(matches!(&outcomes["a"], LayerOutcome::Skipped { .. }));
    }

    /// Sleeps past any short deadline before returning a solid black image.
    struct SlowSource(Duration);

    impl RasterSource for SlowSource {
        fn fetch(&self, _bbox: &Bbox, _layer: &LayerSpec, _width: u32, _height: u32) -> Result<DynamicImage> {
            std::thread::sleep(self.0);
            Ok(solid([0, 0, 0]))
        }
    }

    #[test]
    fn test_fetch_started_before_deadline_is_kept() {
        let grid = grid_100();
        let engine = AffectationEngine::new(grid);
        let mask = InclusionMask::full(&grid);
        let source = SlowSource(Duration::from_millis(50));
        let layers = vec![layer("a", &[Rgb::new(0, 0, 0)], 10)];

        let deadline = Instant::now() + Duration::from_millis(10);
        let outcomes = engine.analyze_from_source(&mask, &source, &layers, Some(deadline), |_, _| {});
        assert!(Instant::now() > deadline);
        assert!(outcomes["a"].is_analyzed());
    }

    #[test]
    fn test_outcome_serialization_is_tagged() {
        let failed = LayerOutcome::Failed {
            error: "source_unavailable".to_string(),
            message: "gone".to_string(),
        };
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"], "source_unavailable");
    }
}
