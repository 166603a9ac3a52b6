//! Geographic extents and the pixel grid bound to them.

use geo::CoordsIter;
use serde::Serialize;

use crate::error::{AffectError, Result};
use crate::polygon::GeoPolygon;

/// Metres per degree of longitude at the equator.
pub const METERS_PER_DEGREE_LON_EQUATOR: f64 = 111_320.0;
/// Metres per degree of latitude, taken as constant.
pub const METERS_PER_DEGREE_LAT: f64 = 110_540.0;

/// Largest grid side accepted when sizing from a metric scale.
pub const MAX_DIMENSION: u32 = 20000;

/// Bounding box in WGS84 coordinates (longitude, latitude).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bbox {
    /// Minimum longitude (degrees).
    pub min_lon: f64,
    /// Minimum latitude (degrees).
    pub min_lat: f64,
    /// Maximum longitude (degrees).
    pub max_lon: f64,
    /// Maximum latitude (degrees).
    pub max_lat: f64,
}

impl Bbox {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        }
    }

    /// Returns the width of the bbox in degrees.
    pub fn width(&self) -> f64 {
        self.max_lon - self.min_lon
    }

    /// Returns the height of the bbox in degrees.
    pub fn height(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_lon + self.max_lon) / 2.0,
            (self.min_lat + self.max_lat) / 2.0,
        )
    }

    /// Rejects inverted, empty or non-finite extents.
    pub fn validate(&self) -> Result<()> {
        let values = [self.min_lon, self.min_lat, self.max_lon, self.max_lat];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(AffectError::InvalidGeometry(
                "bounding box has non-finite bounds".to_string(),
            ));
        }
        if self.min_lon >= self.max_lon {
            return Err(AffectError::InvalidGeometry(format!(
                "zero or negative longitude extent ({} .. {})",
                self.min_lon, self.max_lon
            )));
        }
        if self.min_lat >= self.max_lat {
            return Err(AffectError::InvalidGeometry(format!(
                "zero or negative latitude extent ({} .. {})",
                self.min_lat, self.max_lat
            )));
        }
        Ok(())
    }

    /// Width and height in metres using a flat degrees-to-metres scale taken at
    /// the mean latitude. Only meaningful for small extents; `None` when the
    /// latitudes are not geographic.
    pub fn metric_extent(&self) -> Option<(f64, f64)> {
        if self.min_lat < -90.0 || self.max_lat > 90.0 {
            return None;
        }
        let mean_lat = (self.min_lat + self.max_lat) / 2.0;
        let m_per_deg_lon = METERS_PER_DEGREE_LON_EQUATOR * mean_lat.to_radians().cos();
        Some((
            self.width() * m_per_deg_lon,
            self.height() * METERS_PER_DEGREE_LAT,
        ))
    }

    /// Approximate area in hectares, see [`Bbox::metric_extent`].
    pub fn area_ha(&self) -> Option<f64> {
        self.metric_extent().map(|(w, h)| w * h / 10_000.0)
    }
}

/// Smallest box holding every vertex of every ring of the given polygons.
pub fn build_bbox<'a>(polygons: impl IntoIterator<Item = &'a GeoPolygon>) -> Result<Bbox> {
    let mut min_lon = f64::MAX;
    let mut min_lat = f64::MAX;
    let mut max_lon = f64::MIN;
    let mut max_lat = f64::MIN;
    let mut seen = false;

    for polygon in polygons {
        for coord in polygon.as_geo().coords_iter() {
            seen = true;
            min_lon = min_lon.min(coord.x);
            min_lat = min_lat.min(coord.y);
            max_lon = max_lon.max(coord.x);
            max_lat = max_lat.max(coord.y);
        }
    }

    if !seen {
        return Err(AffectError::InvalidGeometry(
            "no vertices to build a bounding box from".to_string(),
        ));
    }

    let bbox = Bbox::new(min_lon, min_lat, max_lon, max_lat);
    bbox.validate()?;
    Ok(bbox)
}

/// Scales the box around its center. `factor > 1` widens the view.
pub fn expand_bbox(bbox: &Bbox, factor: f64) -> Result<Bbox> {
    if !(factor.is_finite() && factor > 0.0) {
        return Err(AffectError::InvalidZoom(factor));
    }
    let (lon_c, lat_c) = bbox.center();
    let half_w = bbox.width() / 2.0 * factor;
    let half_h = bbox.height() / 2.0 * factor;
    Ok(Bbox::new(
        lon_c - half_w,
        lat_c - half_h,
        lon_c + half_w,
        lat_c + half_h,
    ))
}

/// Grid dimensions giving roughly `scale` metres per pixel on both axes.
pub fn dimensions_for_scale(bbox: &Bbox, scale: f64) -> Result<(u32, u32)> {
    if !(scale.is_finite() && scale > 0.0) {
        return Err(AffectError::InvalidScale(scale));
    }
    let (w_m, h_m) = bbox.metric_extent().ok_or_else(|| {
        AffectError::InvalidBbox("latitudes outside [-90, 90], cannot size from a metric scale".to_string())
    })?;

    let width = (w_m / scale).ceil().max(1.0);
    let height = (h_m / scale).ceil().max(1.0);
    if width > MAX_DIMENSION as f64 || height > MAX_DIMENSION as f64 {
        return Err(AffectError::ImageTooLarge {
            width: width.min(u32::MAX as f64) as u32,
            height: height.min(u32::MAX as f64) as u32,
            max: MAX_DIMENSION,
        });
    }
    Ok((width as u32, height as u32))
}

/// A `width` x `height` raster aligned on a bounding box.
///
/// Pixel (x, y) covers longitudes from `min_lon + x / width * dlon` and
/// latitudes from `max_lat - y / height * dlat`; rows grow southwards, like
/// image rows. All geo/pixel conversions go through this type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PixelGrid {
    bbox: Bbox,
    width: u32,
    height: u32,
}

impl PixelGrid {
    pub fn new(bbox: Bbox, width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(AffectError::InvalidDimensions { width, height });
        }
        bbox.validate()?;
        Ok(Self {
            bbox,
            width,
            height,
        })
    }

    pub fn bbox(&self) -> &Bbox {
        &self.bbox
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Continuous pixel coordinates of a geographic point.
    pub fn geo_to_pixel(&self, lon: f64, lat: f64) -> (f64, f64) {
        let x = (lon - self.bbox.min_lon) / self.bbox.width() * self.width as f64;
        let y = (self.bbox.max_lat - lat) / self.bbox.height() * self.height as f64;
        (x, y)
    }

    /// Geographic coordinates of a continuous pixel position.
    pub fn pixel_to_geo(&self, x: f64, y: f64) -> (f64, f64) {
        let lon = self.bbox.min_lon + x / self.width as f64 * self.bbox.width();
        let lat = self.bbox.max_lat - y / self.height as f64 * self.bbox.height();
        (lon, lat)
    }

    /// Geographic coordinates of the center of pixel (x, y).
    pub fn pixel_center(&self, x: u32, y: u32) -> (f64, f64) {
        self.pixel_to_geo(x as f64 + 0.5, y as f64 + 0.5)
    }
}
