//! GeoJSON file reading and parsing.

use geojson::{GeoJson, Geometry, Value};
use std::fs;
use std::path::Path;

use crate::error::{AffectError, Result};
use crate::polygon::{AxisOrder, Parcel};
use crate::source::{parcel_from_rings, GeometrySource, Ring};

/// Reader for GeoJSON parcel files.
///
/// Every Polygon and MultiPolygon member becomes one polygon of the parcel.
/// Coordinates are WGS84 degrees in the declared axis order.
#[derive(Debug, Clone)]
pub struct GeojsonReader {
    name: String,
    axis_order: AxisOrder,
    polygons: Vec<Vec<Ring>>,
}

impl GeojsonReader {
    /// Opens and parses a GeoJSON file.
    pub fn open(path: &Path, axis_order: AxisOrder) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AffectError::FileNotFound(path.display().to_string())
            } else {
                AffectError::Io(e)
            }
        })?;

        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("parcel");
        Self::parse(&content, name, axis_order)
    }

    /// Parses GeoJSON text. `name` labels the parcel and prefixes polygon keys.
    pub fn parse(content: &str, name: &str, axis_order: AxisOrder) -> Result<Self> {
        // Repairs only apply to documents that do not parse as they are
        let geojson: GeoJson = match content.parse() {
            Ok(geojson) => geojson,
            Err(first) => preprocess_geojson(content)
                .parse()
                .map_err(|_| AffectError::GeojsonParse(format!("{}", first)))?,
        };

        let polygons = extract_polygons(&geojson);
        if polygons.is_empty() {
            return Err(AffectError::EmptyGeometry(name.to_string()));
        }

        Ok(Self {
            name: name.to_string(),
            axis_order,
            polygons,
        })
    }

    pub fn polygon_count(&self) -> usize {
        self.polygons.len()
    }
}

impl GeometrySource for GeojsonReader {
    fn parcel(&self) -> Result<Parcel> {
        parcel_from_rings(&self.name, &self.polygons, self.axis_order)
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

/// Pre-process GeoJSON content to fix common malformed patterns.
fn preprocess_geojson(content: &str) -> String {
    // Empty type field ("type":"" -> "type":"MultiPolygon"), before the quote fix
    let content = content.replace(r#""type":"""#, r#""type":"MultiPolygon""#);
    let content = content.replace(r#""type": """#, r#""type": "MultiPolygon""#);

    // CSV-style double-quote escaping (""type"" -> "type")
    content.replace("\"\"", "\"")
}

/// Polygon rings of every polygonal member, in document order.
fn extract_polygons(geojson: &GeoJson) -> Vec<Vec<Ring>> {
    let geometries: Vec<&Geometry> = match geojson {
        GeoJson::Geometry(geom) => vec![geom],
        GeoJson::Feature(feature) => feature.geometry.iter().collect(),
        GeoJson::FeatureCollection(collection) => collection
            .features
            .iter()
            .filter_map(|f| f.geometry.as_ref())
            .collect(),
    };

    geometries.into_iter().flat_map(geometry_polygons).collect()
}

fn geometry_polygons(geom: &Geometry) -> Vec<Vec<Ring>> {
    match &geom.value {
        Value::Polygon(coords) => polygon_from_coords(coords).into_iter().collect(),
        Value::MultiPolygon(multi) => multi
            .iter()
            .filter_map(|coords| polygon_from_coords(coords))
            .collect(),
        Value::GeometryCollection(members) => members.iter().flat_map(geometry_polygons).collect(),
        // Points and lines carry no area
        _ => Vec::new(),
    }
}

fn polygon_from_coords(coords: &[Vec<Vec<f64>>]) -> Option<Vec<Ring>> {
    let exterior = ring_from_coords(coords.first()?)?;
    let mut rings = vec![exterior];
    rings.extend(coords[1..].iter().filter_map(|ring| ring_from_coords(ring)));
    Some(rings)
}

fn ring_from_coords(coords: &[Vec<f64>]) -> Option<Ring> {
    let points: Ring = coords
        .iter()
        .filter(|point| point.len() >= 2)
        .map(|point| (point[0], point[1]))
        .collect();

    if points.is_empty() {
        None
    } else {
        Some(points)
    }
}
