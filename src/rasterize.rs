//! Polygon rasterization into inclusion masks.
//!
//! A pixel belongs to a polygon when its center is inside the exterior ring and
//! outside every hole. The fill is a scanline even-odd pass over all rings of
//! one polygon at a time:
//! 1. Build a Global Edge Table (GET) from the rings, in pixel space.
//! 2. Split the mask into horizontal bands, one rayon task per band.
//! 3. For each row, keep an Active Edge Table (AET), intersect it with the
//!    row's center line and fill between pairs of sorted intersections.
//!
//! Multi-polygon parcels are the union of their per-polygon masks, so
//! overlapping polygons never cancel each other out.

use geo::LineString;
use image::{GrayImage, Luma, Rgba, RgbaImage};
use rayon::prelude::*;
use std::path::Path;

pub mod edge;

use crate::error::{AffectError, Result};
use crate::logger;
use crate::math::PixelGrid;
use crate::polygon::{distinct_vertices, GeoPolygon, Parcel};
use edge::{Edge, ScanlineTable};

/// Row-major `width` x `height` membership grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InclusionMask {
    width: u32,
    height: u32,
    cells: Vec<bool>,
}

impl InclusionMask {
    /// An all-false mask for the grid.
    pub fn empty(grid: &PixelGrid) -> Self {
        Self {
            width: grid.width(),
            height: grid.height(),
            cells: vec![false; grid.pixel_count()],
        }
    }

    /// An all-true mask for the grid.
    pub fn full(grid: &PixelGrid) -> Self {
        Self {
            width: grid.width(),
            height: grid.height(),
            cells: vec![true; grid.pixel_count()],
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn get(&self, x: u32, y: u32) -> bool {
        x < self.width && y < self.height && self.cells[self.index(x, y)]
    }

    pub fn as_slice(&self) -> &[bool] {
        &self.cells
    }

    pub fn count(&self) -> usize {
        self.cells.iter().filter(|&&c| c).count()
    }

    /// Pixels set in either mask. Both masks must share dimensions.
    pub fn union(&self, other: &InclusionMask) -> InclusionMask {
        debug_assert_eq!(self.dimensions(), other.dimensions());
        InclusionMask {
            width: self.width,
            height: self.height,
            cells: self
                .cells
                .iter()
                .zip(&other.cells)
                .map(|(a, b)| *a || *b)
                .collect(),
        }
    }

    /// Pixel-by-pixel ray casting at every pixel center. Slow; used to
    /// validate [`build_mask`].
    pub fn reference(polygon: &GeoPolygon, grid: &PixelGrid) -> Self {
        let rings: Vec<Vec<(f64, f64)>> = usable_rings(polygon)
            .map(|ring| {
                ring.coords()
                    .map(|c| grid.geo_to_pixel(c.x, c.y))
                    .collect()
            })
            .collect();

        let mut mask = Self::empty(grid);
        for y in 0..grid.height() {
            let yc = y as f64 + 0.5;
            for x in 0..grid.width() {
                let xc = x as f64 + 0.5;
                let inside = rings
                    .iter()
                    .filter(|ring| ray_crosses_odd(ring, xc, yc))
                    .count()
                    % 2
                    == 1;
                let idx = mask.index(x, y);
                mask.cells[idx] = inside;
            }
        }
        mask
    }

    /// Greyscale rendering: 255 inside, 0 outside.
    pub fn to_image(&self) -> GrayImage {
        GrayImage::from_fn(self.width, self.height, |x, y| {
            Luma([if self.get(x, y) { 255 } else { 0 }])
        })
    }

    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }
}

/// True when a rightward ray from (xc, yc) crosses the closed ring an odd
/// number of times.
fn ray_crosses_odd(ring: &[(f64, f64)], xc: f64, yc: f64) -> bool {
    let mut inside = false;
    for pair in ring.windows(2) {
        let (xi, yi) = pair[0];
        let (xj, yj) = pair[1];
        if (yi > yc) != (yj > yc) && xc < xi + (yc - yi) * (xj - xi) / (yj - yi) {
            inside = !inside;
        }
    }
    inside
}

/// Rings of the polygon that can enclose area. Degenerate holes are skipped
/// with a warning.
fn usable_rings(polygon: &GeoPolygon) -> impl Iterator<Item = &LineString<f64>> {
    std::iter::once(polygon.exterior()).chain(polygon.holes().iter().enumerate().filter_map(
        |(idx, hole)| {
            if distinct_vertices(hole) < 3 {
                logger::warn(&format!(
                    "skipping degenerate hole {} ({} distinct vertices)",
                    idx,
                    distinct_vertices(hole)
                ));
                None
            } else {
                Some(hole)
            }
        },
    ))
}

/// Rasterize one polygon (exterior minus holes) onto the grid.
pub fn build_mask(polygon: &GeoPolygon, grid: &PixelGrid) -> Result<InclusionMask> {
    if distinct_vertices(polygon.exterior()) < 3 {
        return Err(AffectError::InvalidGeometry(
            "exterior ring has fewer than 3 distinct vertices".to_string(),
        ));
    }

    let mut table = ScanlineTable::new(grid.height());
    for ring in usable_rings(polygon) {
        table.extract_from_ring(ring, grid);
    }

    let mut mask = InclusionMask::empty(grid);
    if table.edge_count() == 0 {
        return Ok(mask);
    }

    let width = grid.width() as usize;
    let height = grid.height() as usize;
    let num_bands = rayon::current_num_threads().max(1) * 4;
    let band_height = height.div_ceil(num_bands).max(1);

    mask.cells
        .par_chunks_mut(band_height * width)
        .enumerate()
        .for_each(|(band_idx, band)| {
            let y_start = band_idx * band_height;
            let y_end = y_start + band.len() / width;

            let mut active_edge_table: Vec<Edge> = Vec::new();
            let mut crossings: Vec<f64> = Vec::new();

            for y in 0..y_end {
                active_edge_table.extend(table.entries[y].iter().cloned());

                let yc = y as f64 + 0.5;
                active_edge_table.retain(|edge| edge.y_bottom > yc);

                if y < y_start {
                    continue;
                }

                crossings.clear();
                crossings.extend(
                    active_edge_table
                        .iter()
                        .filter(|edge| edge.crosses(yc))
                        .map(|edge| edge.x_at(yc)),
                );
                crossings.sort_by(f64::total_cmp);

                let row = &mut band[(y - y_start) * width..(y - y_start + 1) * width];
                for span in crossings.chunks_exact(2) {
                    // Pixel x is inside when span[0] <= x + 0.5 < span[1]
                    let x_start = first_column_at_or_after(span[0], width);
                    let x_end = first_column_at_or_after(span[1], width);
                    row[x_start..x_end.max(x_start)].fill(true);
                }
            }
        });

    Ok(mask)
}

/// Smallest column whose center is `>= x`, clamped to `[0, width]`.
fn first_column_at_or_after(x: f64, width: usize) -> usize {
    let col = (x - 0.5).ceil();
    if col <= 0.0 {
        0
    } else if col >= width as f64 {
        width
    } else {
        col as usize
    }
}

/// Union of the masks of every polygon in the parcel.
pub fn build_parcel_mask(parcel: &Parcel, grid: &PixelGrid) -> Result<InclusionMask> {
    let mut mask = InclusionMask::empty(grid);
    for (id, polygon) in parcel.iter() {
        let polygon_mask = build_mask(polygon, grid)?;
        logger::debug(&format!(
            "polygon '{}': {} pixels inside",
            id,
            polygon_mask.count()
        ));
        mask = mask.union(&polygon_mask);
    }
    Ok(mask)
}

/// Copy of a layer raster where pixels outside the mask are transparent white.
pub fn masked_layer_image(image: &RgbaImage, mask: &InclusionMask) -> RgbaImage {
    let mut out = image.clone();
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        if !mask.get(x, y) {
            *pixel = Rgba([255, 255, 255, 0]);
        }
    }
    out
}

pub fn save_mask(mask: &InclusionMask, path: &Path) -> Result<()> {
    mask.to_image().save(path)?;
    Ok(())
}

pub fn save_masked_layer(image: &RgbaImage, mask: &InclusionMask, path: &Path) -> Result<()> {
    masked_layer_image(image, mask).save(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Bbox;

    fn grid_10() -> PixelGrid {
        PixelGrid::new(Bbox::new(0.0, 0.0, 10.0, 10.0), 10, 10).unwrap()
    }

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Vec<(f64, f64)> {
        vec![(x0, y0), (x1, y0), (x1, y1), (x0, y1)]
    }

    #[test]
    fn test_rectangle_is_exact_pixel_block() {
        let grid = grid_10();
        let polygon = GeoPolygon::new(rect(2.0, 2.0, 8.0, 7.0), vec![]).unwrap();
        let mask = build_mask(&polygon, &grid).unwrap();

        // lon 2..8 -> columns 2..=7; lat 2..7 -> rows 3..=7 (y grows south)
        for y in 0..10 {
            for x in 0..10 {
                let expected = (2..8).contains(&x) && (3..8).contains(&y);
                assert_eq!(mask.get(x, y), expected, "pixel ({}, {})", x, y);
            }
        }
        assert_eq!(mask.count(), 6 * 5);
    }

    #[test]
    fn test_rectangle_on_non_square_grid() {
        let grid = PixelGrid::new(Bbox::new(-4.0, 40.0, -3.0, 40.5), 200, 50).unwrap();
        // 0.25 degrees wide (50 columns), 0.2 degrees tall (20 rows)
        let polygon = GeoPolygon::new(rect(-3.75, 40.1, -3.5, 40.3), vec![]).unwrap();
        let mask = build_mask(&polygon, &grid).unwrap();
        assert_eq!(mask.count(), 50 * 20);
        assert!(mask.get(50, 20));
        assert!(!mask.get(49, 20));
        assert!(mask.get(99, 39));
        assert!(!mask.get(100, 39));
        assert!(!mask.get(50, 40));
    }

    #[test]
    fn test_hole_is_subtracted() {
        let grid = PixelGrid::new(Bbox::new(0.0, 0.0, 1.0, 1.0), 100, 100).unwrap();
        let exterior = rect(0.1, 0.1, 0.9, 0.9);
        let hole = vec![(0.3, 0.3), (0.7, 0.35), (0.6, 0.7), (0.35, 0.62)];

        let with_hole = GeoPolygon::new(exterior.clone(), vec![hole.clone()]).unwrap();
        let outer = GeoPolygon::new(exterior, vec![]).unwrap();
        let inner = GeoPolygon::new(hole, vec![]).unwrap();

        let count = build_mask(&with_hole, &grid).unwrap().count() as i64;
        let outer_count = build_mask(&outer, &grid).unwrap().count() as i64;
        let inner_count = build_mask(&inner, &grid).unwrap().count() as i64;
        assert!((count - (outer_count - inner_count)).abs() <= 1);
    }

    #[test]
    fn test_matches_reference_on_irregular_polygon() {
        let grid = PixelGrid::new(Bbox::new(-1.0, -1.0, 1.0, 1.0), 137, 91).unwrap();
        let polygon = GeoPolygon::new(
            vec![
                (-0.93, -0.71),
                (0.12, -0.97),
                (0.88, -0.33),
                (0.41, 0.06),
                (0.94, 0.81),
                (-0.17, 0.52),
                (-0.71, 0.93),
                (-0.42, 0.11),
            ],
            vec![vec![(-0.5, -0.4), (0.2, -0.55), (0.05, -0.1)]],
        )
        .unwrap();

        let fast = build_mask(&polygon, &grid).unwrap();
        let slow = InclusionMask::reference(&polygon, &grid);
        assert!(fast.count() > 0);
        assert_eq!(fast, slow);
    }

    #[test]
    fn test_concave_polygon_matches_reference() {
        let grid = grid_10();
        // U shape: two prongs separated by a notch
        let polygon = GeoPolygon::new(
            vec![
                (1.0, 1.0),
                (9.0, 1.0),
                (9.0, 9.0),
                (6.0, 9.0),
                (6.0, 4.0),
                (4.0, 4.0),
                (4.0, 9.0),
                (1.0, 9.0),
            ],
            vec![],
        )
        .unwrap();
        let mask = build_mask(&polygon, &grid).unwrap();
        assert_eq!(mask, InclusionMask::reference(&polygon, &grid));
        // Notch pixel (lon 4..6, lat 4..9) is outside
        assert!(!mask.get(5, 3));
        assert!(mask.get(2, 3));
        assert!(mask.get(7, 3));
    }

    #[test]
    fn test_single_column_grid() {
        let grid = PixelGrid::new(Bbox::new(0.0, 0.0, 1.0, 10.0), 1, 10).unwrap();
        let polygon = GeoPolygon::new(rect(-1.0, 2.0, 2.0, 6.0), vec![]).unwrap();
        let mask = build_mask(&polygon, &grid).unwrap();
        assert_eq!(mask.count(), 4);
    }

    #[test]
    fn test_polygon_outside_bbox_gives_empty_mask() {
        let grid = grid_10();
        let polygon = GeoPolygon::new(rect(20.0, 20.0, 30.0, 30.0), vec![]).unwrap();
        let mask = build_mask(&polygon, &grid).unwrap();
        assert_eq!(mask.count(), 0);
    }

    #[test]
    fn test_polygon_covering_bbox_gives_full_mask() {
        let grid = grid_10();
        let polygon = GeoPolygon::new(rect(-5.0, -5.0, 15.0, 15.0), vec![]).unwrap();
        let mask = build_mask(&polygon, &grid).unwrap();
        assert_eq!(mask, InclusionMask::full(&grid));
    }

    #[test]
    fn test_degenerate_hole_is_skipped() {
        let grid = grid_10();
        let polygon = GeoPolygon::new(
            rect(2.0, 2.0, 8.0, 8.0),
            vec![vec![(4.0, 4.0), (5.0, 5.0), (4.0, 4.0)]],
        )
        .unwrap();
        let mask = build_mask(&polygon, &grid).unwrap();
        assert_eq!(mask.count(), 36);
    }

    #[test]
    fn test_parcel_mask_is_union() {
        let grid = grid_10();
        let a = GeoPolygon::new(rect(0.0, 0.0, 6.0, 6.0), vec![]).unwrap();
        let b = GeoPolygon::new(rect(4.0, 4.0, 10.0, 10.0), vec![]).unwrap();
        let parcel = Parcel::from_polygons(vec![("a".to_string(), a), ("b".to_string(), b)]).unwrap();
        let mask = build_parcel_mask(&parcel, &grid).unwrap();
        // Overlap 2x2 counted once, not cancelled
        assert_eq!(mask.count(), 36 + 36 - 4);
        assert!(mask.get(5, 5));
    }

    #[test]
    fn test_masked_layer_image() {
        let grid = PixelGrid::new(Bbox::new(0.0, 0.0, 2.0, 1.0), 2, 1).unwrap();
        let polygon = GeoPolygon::new(rect(0.0, 0.0, 1.0, 1.0), vec![]).unwrap();
        let mask = build_mask(&polygon, &grid).unwrap();

        let image = RgbaImage::from_pixel(2, 1, Rgba([10, 20, 30, 255]));
        let masked = masked_layer_image(&image, &mask);
        assert_eq!(masked.get_pixel(0, 0).0, [10, 20, 30, 255]);
        assert_eq!(masked.get_pixel(1, 0).0, [255, 255, 255, 0]);
    }

    #[test]
    fn test_save_mask_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mask.png");
        let grid = grid_10();
        let polygon = GeoPolygon::new(rect(2.0, 2.0, 8.0, 8.0), vec![]).unwrap();
        save_mask(&build_mask(&polygon, &grid).unwrap(), &path).unwrap();

        let reloaded = image::open(&path).unwrap().to_luma8();
        assert_eq!(reloaded.get_pixel(5, 5).0, [255]);
        assert_eq!(reloaded.get_pixel(0, 0).0, [0]);
    }
}
