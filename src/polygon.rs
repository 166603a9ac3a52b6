//! Parcel geometry: polygons with holes in geographic coordinates.

use geo::{ChamberlainDuquetteArea, Coord, CoordsIter, Intersects, LineString, MultiPolygon, Polygon};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

use crate::error::{AffectError, Result};
use crate::math::{build_bbox, Bbox};

/// Declared axis order of the coordinates a geometry source delivers.
///
/// Sources state their order explicitly; it is never guessed from the magnitude
/// of the values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum AxisOrder {
    #[default]
    LonLat,
    LatLon,
}

impl AxisOrder {
    /// Returns `(lon, lat)` for a pair given in this order.
    pub fn to_lon_lat(self, first: f64, second: f64) -> (f64, f64) {
        match self {
            AxisOrder::LonLat => (first, second),
            AxisOrder::LatLon => (second, first),
        }
    }
}

/// A polygon with optional holes, coordinates as (longitude, latitude).
///
/// Rings are implicitly closed. The exterior always has at least three
/// distinct vertices and every hole vertex lies within the exterior.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoPolygon {
    inner: Polygon<f64>,
}

impl GeoPolygon {
    /// Builds a polygon from an exterior ring and hole rings given in (lon, lat).
    pub fn new(exterior: Vec<(f64, f64)>, holes: Vec<Vec<(f64, f64)>>) -> Result<Self> {
        let to_ring = |ring: Vec<(f64, f64)>| {
            LineString::from(
                ring.into_iter()
                    .map(|(x, y)| Coord { x, y })
                    .collect::<Vec<_>>(),
            )
        };
        let polygon = Polygon::new(to_ring(exterior), holes.into_iter().map(to_ring).collect());
        Self::try_from(polygon)
    }

    /// Builds a polygon from raw rings (`rings[0]` exterior, the rest holes)
    /// in the declared axis order.
    pub fn from_rings(rings: Vec<Vec<(f64, f64)>>, order: AxisOrder) -> Result<Self> {
        let mut rings = rings.into_iter().map(|ring| {
            ring.into_iter()
                .map(|(a, b)| order.to_lon_lat(a, b))
                .collect::<Vec<_>>()
        });
        let exterior = rings
            .next()
            .ok_or_else(|| AffectError::InvalidGeometry("polygon has no rings".to_string()))?;
        Self::new(exterior, rings.collect())
    }

    pub fn exterior(&self) -> &LineString<f64> {
        self.inner.exterior()
    }

    pub fn holes(&self) -> &[LineString<f64>] {
        self.inner.interiors()
    }

    pub fn as_geo(&self) -> &Polygon<f64> {
        &self.inner
    }

    /// Number of rings, exterior included.
    pub fn ring_count(&self) -> usize {
        1 + self.inner.interiors().len()
    }

    /// Number of vertices over all rings, not counting closing duplicates.
    pub fn vertex_count(&self) -> usize {
        std::iter::once(self.inner.exterior())
            .chain(self.inner.interiors())
            .map(|ring| ring.coords_count().saturating_sub(usize::from(ring.is_closed())))
            .sum()
    }
}

impl TryFrom<Polygon<f64>> for GeoPolygon {
    type Error = AffectError;

    fn try_from(polygon: Polygon<f64>) -> Result<Self> {
        if polygon.coords_iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
            return Err(AffectError::InvalidGeometry(
                "non-finite coordinate".to_string(),
            ));
        }

        let distinct = distinct_vertices(polygon.exterior());
        if distinct < 3 {
            return Err(AffectError::InvalidGeometry(format!(
                "exterior ring needs at least 3 distinct vertices, got {}",
                distinct
            )));
        }

        let shell = Polygon::new(polygon.exterior().clone(), vec![]);
        for (idx, hole) in polygon.interiors().iter().enumerate() {
            if let Some(c) = hole.coords().find(|c| !shell.intersects(*c)) {
                return Err(AffectError::InvalidGeometry(format!(
                    "hole {} has vertex ({}, {}) outside the exterior ring",
                    idx, c.x, c.y
                )));
            }
        }

        Ok(Self { inner: polygon })
    }
}

pub(crate) fn distinct_vertices(ring: &LineString<f64>) -> usize {
    ring.coords()
        .map(|c| (c.x.to_bits(), c.y.to_bits()))
        .collect::<HashSet<_>>()
        .len()
}

/// The area under analysis: one or more polygons keyed by identifier.
#[derive(Debug, Clone)]
pub struct Parcel {
    polygons: BTreeMap<String, GeoPolygon>,
}

impl Parcel {
    pub fn single(polygon: GeoPolygon) -> Self {
        let mut polygons = BTreeMap::new();
        polygons.insert("parcel".to_string(), polygon);
        Self { polygons }
    }

    pub fn from_polygons(polygons: impl IntoIterator<Item = (String, GeoPolygon)>) -> Result<Self> {
        let polygons: BTreeMap<_, _> = polygons.into_iter().collect();
        if polygons.is_empty() {
            return Err(AffectError::InvalidGeometry(
                "parcel has no polygons".to_string(),
            ));
        }
        Ok(Self { polygons })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &GeoPolygon)> {
        self.polygons.iter()
    }

    pub fn polygons(&self) -> impl Iterator<Item = &GeoPolygon> {
        self.polygons.values()
    }

    pub fn len(&self) -> usize {
        self.polygons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.polygons.is_empty()
    }

    /// Extent of every vertex of every ring.
    pub fn bbox(&self) -> Result<Bbox> {
        build_bbox(self.polygons.values())
    }

    pub fn vertex_count(&self) -> usize {
        self.polygons.values().map(GeoPolygon::vertex_count).sum()
    }

    pub fn ring_count(&self) -> usize {
        self.polygons.values().map(GeoPolygon::ring_count).sum()
    }

    /// Spherical approximation of the parcel area in hectares.
    pub fn area_ha(&self) -> f64 {
        let mp = MultiPolygon::new(self.polygons.values().map(|p| p.inner.clone()).collect());
        mp.chamberlain_duquette_unsigned_area() / 10_000.0
    }
}
