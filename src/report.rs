//! Per-parcel report assembled from layer outcomes.
//!
//! The report is the only thing handed to downstream consumers (PDF/figure
//! generation, persistence), so every analysed layer appears in it, including
//! the ones that failed or were skipped.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::engine::{LayerOutcome, Severity};
use crate::error::Result;
use crate::layers::LayerSpec;
use crate::logger;
use crate::math::{Bbox, PixelGrid};
use crate::polygon::{AxisOrder, Parcel};

/// Descriptive data about the analysed parcel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParcelMetadata {
    pub name: String,
    pub source: String,
    pub axis_order: AxisOrder,
    pub polygons: usize,
    pub rings: usize,
    pub vertices: usize,
    /// Spherical approximation of the parcel area.
    pub area_ha: f64,
    pub parcel_bbox: Bbox,
}

impl ParcelMetadata {
    pub fn from_parcel(
        name: impl Into<String>,
        source: impl Into<String>,
        axis_order: AxisOrder,
        parcel: &Parcel,
    ) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            source: source.into(),
            axis_order,
            polygons: parcel.len(),
            rings: parcel.ring_count(),
            vertices: parcel.vertex_count(),
            area_ha: parcel.area_ha(),
            parcel_bbox: parcel.bbox()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedLayer {
    pub layer: String,
    pub title: String,
    pub pct_of_usable: f64,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridInfo {
    pub width: u32,
    pub height: u32,
    pub bbox: Bbox,
    pub area_ha: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParcelReport {
    pub parcel: ParcelMetadata,
    pub grid: GridInfo,
    pub per_layer: BTreeMap<String, LayerOutcome>,
    /// Analysed layers, most affected first.
    pub ranking: Vec<RankedLayer>,
    pub analyzed_layers: usize,
    pub failed_layers: usize,
    pub skipped_layers: usize,
}

impl ParcelReport {
    /// Highest severity among analysed layers.
    pub fn worst_severity(&self) -> Severity {
        self.ranking
            .iter()
            .map(|r| r.severity)
            .max()
            .unwrap_or(Severity::None)
    }
}

/// Builds the report. `layers` only provides display titles.
pub fn assemble_report(
    parcel: ParcelMetadata,
    grid: &PixelGrid,
    per_layer: BTreeMap<String, LayerOutcome>,
    layers: &[LayerSpec],
) -> ParcelReport {
    let title_of = |id: &str| {
        layers
            .iter()
            .find(|l| l.id == id)
            .map(LayerSpec::display_title)
            .unwrap_or_else(|| id.to_string())
    };

    let mut ranking: Vec<RankedLayer> = per_layer
        .iter()
        .filter_map(|(id, outcome)| {
            outcome.result().map(|r| RankedLayer {
                layer: id.clone(),
                title: title_of(id),
                pct_of_usable: r.pct_of_usable,
                severity: r.severity,
            })
        })
        .collect();
    ranking.sort_by(|a, b| {
        b.pct_of_usable
            .total_cmp(&a.pct_of_usable)
            .then_with(|| a.layer.cmp(&b.layer))
    });

    let count = |pred: fn(&LayerOutcome) -> bool| per_layer.values().filter(|o| pred(o)).count();
    let failed_layers = count(|o| matches!(o, LayerOutcome::Failed { .. }));
    let skipped_layers = count(|o| matches!(o, LayerOutcome::Skipped { .. }));

    ParcelReport {
        parcel,
        grid: GridInfo {
            width: grid.width(),
            height: grid.height(),
            bbox: *grid.bbox(),
            area_ha: grid.bbox().area_ha(),
        },
        analyzed_layers: ranking.len(),
        failed_layers,
        skipped_layers,
        per_layer,
        ranking,
    }
}

/// Consumer of finished reports.
pub trait ReportSink {
    fn accept(&mut self, report: &ParcelReport) -> Result<()>;
}

/// Writes the report as pretty-printed JSON.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ReportSink for JsonFileSink {
    fn accept(&mut self, report: &ParcelReport) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(report)?;
        fs::write(&self.path, json)?;
        logger::output(&self.path.display().to_string());
        Ok(())
    }
}

/// Keeps reports in memory.
impl ReportSink for Vec<ParcelReport> {
    fn accept(&mut self, report: &ParcelReport) -> Result<()> {
        self.push(report.clone());
        Ok(())
    }
}

/// Human readable lines: one block per layer, then the ranking.
pub fn summary_lines(report: &ParcelReport) -> Vec<String> {
    let mut lines = vec![
        format!(
            "Parcel: {} ({} polygon(s), {} vertices, ~{:.2} ha)",
            report.parcel.name, report.parcel.polygons, report.parcel.vertices, report.parcel.area_ha
        ),
        format!(
            "Grid: {}x{} over ({:.6}, {:.6}) -> ({:.6}, {:.6})",
            report.grid.width,
            report.grid.height,
            report.grid.bbox.min_lon,
            report.grid.bbox.min_lat,
            report.grid.bbox.max_lon,
            report.grid.bbox.max_lat
        ),
    ];

    for (id, outcome) in &report.per_layer {
        match outcome {
            LayerOutcome::Analyzed(r) => {
                lines.push(format!(
                    "  {}: {} - {:.2}% of usable area, {:.2}% of total ({} / {} pixels)",
                    id,
                    r.severity.label(),
                    r.pct_of_usable,
                    r.pct_of_total,
                    r.affected_pixels,
                    r.usable_pixels
                ));
                if let Some(ha) = r.estimated_affected_area_ha {
                    lines.push(format!("    ~{:.4} ha affected", ha));
                }
            }
            LayerOutcome::Failed { message, .. } => {
                lines.push(format!("  {}: unavailable ({})", id, message));
            }
            LayerOutcome::Skipped { reason } => {
                lines.push(format!("  {}: skipped ({})", id, reason));
            }
        }
    }

    if !report.ranking.is_empty() {
        lines.push("Ranking:".to_string());
        for (i, r) in report.ranking.iter().enumerate() {
            lines.push(format!(
                "  {}. {}: {:.2}% ({})",
                i + 1,
                r.title,
                r.pct_of_usable,
                r.severity.label()
            ));
        }
    }
    lines
}

pub fn print_summary(report: &ParcelReport) {
    for line in summary_lines(report) {
        logger::info(&line);
    }
}
