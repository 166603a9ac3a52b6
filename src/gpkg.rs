use geo::{Geometry, Polygon};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;

use crate::error::{AffectError, Result};
use crate::logger;
use crate::polygon::{AxisOrder, Parcel};
use crate::source::{parcel_from_rings, GeometrySource, Ring};

const WGS84_SRS_ID: i32 = 4326;

/// Information about a polygon layer in the GeoPackage
#[derive(Debug, Clone)]
pub struct LayerInfo {
    pub name: String,
    pub geometry_column: String,
    pub srs_id: i32,
}

/// Read GeoPackage and extract polygon layers
pub struct GpkgReader {
    pool: SqlitePool,
}

impl GpkgReader {
    /// Open a GeoPackage file
    pub async fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(AffectError::FileNotFound(path.display().to_string()));
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .read_only(true);

        let pool = SqlitePool::connect_with(options).await?;

        Ok(Self { pool })
    }

    /// List all polygon/multipolygon layers
    pub async fn list_polygon_layers(&self) -> Result<Vec<LayerInfo>> {
        let rows = sqlx::query(
            r#"
            SELECT c.table_name, g.column_name, g.srs_id
            FROM gpkg_contents c
            JOIN gpkg_geometry_columns g ON c.table_name = g.table_name
            WHERE c.data_type = 'features'
            AND UPPER(g.geometry_type_name) LIKE '%POLYGON%'
            ORDER BY c.table_name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| LayerInfo {
                name: row.get("table_name"),
                geometry_column: row.get("column_name"),
                srs_id: row.get("srs_id"),
            })
            .collect())
    }

    /// Picks the named layer, or the first polygon layer when no name is given.
    pub async fn select_layer(&self, name: Option<&str>) -> Result<LayerInfo> {
        let layers = self.list_polygon_layers().await?;
        let available = || {
            layers
                .iter()
                .map(|l| l.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        };

        match name {
            Some(name) => layers
                .iter()
                .find(|l| l.name == name)
                .cloned()
                .ok_or_else(|| AffectError::LayerNotFound(name.to_string(), available())),
            None => layers
                .first()
                .cloned()
                .ok_or_else(|| AffectError::EmptyGeometry("GeoPackage has no polygon layer".to_string())),
        }
    }

    /// Reads every polygon of `layer` as one parcel source.
    pub async fn read_layer(&self, layer: &LayerInfo, axis_order: AxisOrder) -> Result<GpkgLayer> {
        if layer.srs_id != WGS84_SRS_ID {
            logger::warn(&format!(
                "Layer '{}' uses SRS {}, coordinates are read as WGS84 degrees",
                layer.name, layer.srs_id
            ));
        }

        let query = format!("SELECT \"{}\" FROM \"{}\"", layer.geometry_column, layer.name);
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;

        let mut polygons = Vec::new();
        let mut skipped = 0usize;
        for row in rows {
            let wkb_data: Option<Vec<u8>> = row.get(0);
            match wkb_data.as_deref().and_then(parse_gpkg_wkb) {
                Some(Geometry::Polygon(p)) => polygons.push(polygon_rings(&p)),
                Some(Geometry::MultiPolygon(mp)) => polygons.extend(mp.iter().map(polygon_rings)),
                _ => skipped += 1,
            }
        }
        if skipped > 0 {
            logger::debug(&format!(
                "Layer '{}': skipped {} non-polygon or unreadable rows",
                layer.name, skipped
            ));
        }

        if polygons.is_empty() {
            return Err(AffectError::EmptyGeometry(layer.name.clone()));
        }

        Ok(GpkgLayer {
            name: layer.name.clone(),
            axis_order,
            polygons,
        })
    }
}

/// Polygons loaded from one GeoPackage layer.
#[derive(Debug, Clone)]
pub struct GpkgLayer {
    name: String,
    axis_order: AxisOrder,
    polygons: Vec<Vec<Ring>>,
}

impl GpkgLayer {
    pub fn polygon_count(&self) -> usize {
        self.polygons.len()
    }
}

impl GeometrySource for GpkgLayer {
    fn parcel(&self) -> Result<Parcel> {
        parcel_from_rings(&self.name, &self.polygons, self.axis_order)
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

fn polygon_rings(polygon: &Polygon<f64>) -> Vec<Ring> {
    std::iter::once(polygon.exterior())
        .chain(polygon.interiors())
        .map(|ring| ring.coords().map(|c| (c.x, c.y)).collect())
        .collect()
}

/// Parse GeoPackage WKB (with header) to geo Geometry
fn parse_gpkg_wkb(data: &[u8]) -> Option<Geometry<f64>> {
    // Header: magic (2 bytes), version (1 byte), flags (1 byte), srs_id (4 bytes),
    // then an optional envelope, then standard WKB
    if data.len() < 8 {
        return None;
    }

    if data[0] != 0x47 || data[1] != 0x50 {
        // Plain WKB
        return wkb::wkb_to_geom(&mut std::io::Cursor::new(data)).ok();
    }

    let flags = data[3];
    let envelope_indicator = (flags >> 1) & 0x07;

    let envelope_size = match envelope_indicator {
        0 => 0,
        1 => 32, // minx, maxx, miny, maxy
        2 | 3 => 48, // + z or m range
        4 => 64,
        _ => return None,
    };

    let wkb_start = 8 + envelope_size;
    if data.len() <= wkb_start {
        return None;
    }

    wkb::wkb_to_geom(&mut std::io::Cursor::new(&data[wkb_start..])).ok()
}
