//! Scanline edge generation and management.
//!
//! Edges live in continuous pixel space (see [`PixelGrid::geo_to_pixel`]).
//! A scanline is sampled at the pixel-center ordinate `y + 0.5`, and an edge
//! crosses it when `y_top <= yc < y_bottom`. The half-open rule makes shared
//! vertices count once and skips horizontal edges entirely.

use geo::LineString;

use crate::math::PixelGrid;

/// A non-horizontal ring edge.
#[derive(Debug, Clone)]
pub struct Edge {
    /// Smaller pixel ordinate of the two endpoints.
    pub y_top: f64,
    /// Larger pixel ordinate of the two endpoints.
    pub y_bottom: f64,
    /// Abscissa at `y_top`.
    pub x_top: f64,
    /// dx/dy.
    pub inv_slope: f64,
}

impl Edge {
    /// Returns `None` for horizontal segments, which never cross a scanline.
    pub fn new(p1: (f64, f64), p2: (f64, f64)) -> Option<Self> {
        if p1.1 == p2.1 {
            return None;
        }
        let (top, bottom) = if p1.1 < p2.1 { (p1, p2) } else { (p2, p1) };
        Some(Edge {
            y_top: top.1,
            y_bottom: bottom.1,
            x_top: top.0,
            inv_slope: (bottom.0 - top.0) / (bottom.1 - top.1),
        })
    }

    pub fn crosses(&self, yc: f64) -> bool {
        self.y_top <= yc && yc < self.y_bottom
    }

    pub fn x_at(&self, yc: f64) -> f64 {
        self.x_top + (yc - self.y_top) * self.inv_slope
    }

    /// First image row whose center lies at or below `y_top`.
    fn first_row(&self) -> i64 {
        (self.y_top - 0.5).ceil() as i64
    }
}

/// A Global Edge Table (GET): edges bucketed by the first row they cross.
pub struct ScanlineTable {
    pub entries: Vec<Vec<Edge>>,
}

impl ScanlineTable {
    pub fn new(height: u32) -> Self {
        ScanlineTable {
            entries: (0..height).map(|_| Vec::new()).collect(),
        }
    }

    /// Files an edge under its first row. Edges entirely below the image are
    /// dropped; edges starting above it are filed under row 0.
    pub fn add_edge(&mut self, edge: Edge) {
        let row = edge.first_row().max(0);
        if let Some(bucket) = usize::try_from(row).ok().and_then(|r| self.entries.get_mut(r)) {
            bucket.push(edge);
        }
    }

    /// Adds every edge of a ring, projected through the grid.
    pub fn extract_from_ring(&mut self, ring: &LineString<f64>, grid: &PixelGrid) {
        for line in ring.lines() {
            let p1 = grid.geo_to_pixel(line.start.x, line.start.y);
            let p2 = grid.geo_to_pixel(line.end.x, line.end.y);
            if let Some(edge) = Edge::new(p1, p2) {
                self.add_edge(edge);
            }
        }
    }

    pub fn edge_count(&self) -> usize {
        self.entries.iter().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Bbox;
    use geo::coord;

    #[test]
    fn test_edge_creation() {
        let edge = Edge::new((10.0, 20.0), (20.0, 10.0)).unwrap();
        assert_eq!(edge.y_top, 10.0);
        assert_eq!(edge.y_bottom, 20.0);
        assert_eq!(edge.x_top, 20.0);
        assert_eq!(edge.inv_slope, -1.0);
        assert_eq!(edge.x_at(15.0), 15.0);

        let horizontal = Edge::new((10.0, 10.0), (20.0, 10.0));
        assert!(horizontal.is_none());
    }

    #[test]
    fn test_edge_crossing_is_half_open() {
        let edge = Edge::new((0.0, 2.0), (0.0, 5.0)).unwrap();
        assert!(edge.crosses(2.0));
        assert!(edge.crosses(4.5));
        assert!(!edge.crosses(5.0));
        assert!(!edge.crosses(1.5));
    }

    #[test]
    fn test_scanline_table_extraction() {
        let grid = PixelGrid::new(Bbox::new(0.0, 0.0, 10.0, 10.0), 10, 10).unwrap();
        let ring = LineString::from(vec![
            coord! { x: 2.0, y: 2.0 },
            coord! { x: 8.0, y: 2.0 },
            coord! { x: 8.0, y: 8.0 },
            coord! { x: 2.0, y: 8.0 },
            coord! { x: 2.0, y: 2.0 },
        ]);

        let mut st = ScanlineTable::new(10);
        st.extract_from_ring(&ring, &grid);

        // In pixel space the square spans y = 2..8; the two vertical sides
        // start on row 2 (center 2.5) and the horizontal ones are dropped.
        assert_eq!(st.edge_count(), 2);
        assert_eq!(st.entries[2].len(), 2);
        let mut xs: Vec<f64> = st.entries[2].iter().map(|e| e.x_top).collect();
        xs.sort_by(f64::total_cmp);
        assert_eq!(xs, vec![2.0, 8.0]);
    }

    #[test]
    fn test_edges_outside_image() {
        let mut st = ScanlineTable::new(10);
        // Starts above the image: filed on row 0
        st.add_edge(Edge::new((1.0, -5.0), (1.0, 3.0)).unwrap());
        // Entirely below the image: dropped
        st.add_edge(Edge::new((1.0, 12.0), (1.0, 15.0)).unwrap());
        assert_eq!(st.entries[0].len(), 1);
        assert_eq!(st.edge_count(), 1);
    }
}
