//! Parcel affectation analysis: how much of a land parcel each thematic map
//! layer covers, measured pixel by pixel on a shared raster grid.

pub mod classify;
pub mod cli;
pub mod engine;
pub mod error;
pub mod geojson;
pub mod gpkg;
pub mod layers;
pub mod logger;
pub mod math;
pub mod polygon;
pub mod rasterize;
pub mod report;
pub mod source;

pub use engine::{AffectationEngine, AffectationResult, LayerOutcome, Severity};
pub use error::{AffectError, Result};
pub use layers::LayerSpec;
pub use math::{Bbox, PixelGrid};
pub use polygon::{AxisOrder, GeoPolygon, Parcel};
pub use rasterize::{build_mask, build_parcel_mask, InclusionMask};
pub use report::{assemble_report, ParcelReport, ReportSink};
