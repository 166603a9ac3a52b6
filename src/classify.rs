//! Per-pixel colour classification of layer rasters.
//!
//! Thematic map layers paint a feature in one nominal colour, but rendered
//! tiles carry anti-aliased shades around it. A layer therefore lists a small
//! cluster of target colours plus a per-channel tolerance, and a pixel matches
//! when it is within tolerance of any of them.

use image::{DynamicImage, RgbImage};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::AffectError;
use crate::rasterize::InclusionMask;

/// Every channel above this value marks a blank (no data) pixel.
pub const BLANK_THRESHOLD: u8 = 240;

/// An RGB colour, written as 6 hex digits in JSON (`"228B22"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rgb(pub [u8; 3]);

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Rgb([r, g, b])
    }

    pub fn from_hex(s: &str) -> crate::error::Result<Self> {
        let digits = s.trim().trim_start_matches('#');
        let bytes = hex::decode(digits)
            .map_err(|_| AffectError::InvalidColor(format!("'{}' is not hexadecimal", s)))?;
        match bytes.as_slice() {
            [r, g, b] => Ok(Rgb([*r, *g, *b])),
            _ => Err(AffectError::InvalidColor(format!(
                "RGB color must be 6 hex digits, got '{}'",
                s
            ))),
        }
    }

    /// All three channel differences are within `tolerance`.
    pub fn matches(&self, pixel: [u8; 3], tolerance: u32) -> bool {
        self.0
            .iter()
            .zip(pixel)
            .all(|(&c, p)| u32::from(c.abs_diff(p)) <= tolerance)
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode_upper(self.0))
    }
}

impl TryFrom<String> for Rgb {
    type Error = AffectError;

    fn try_from(s: String) -> crate::error::Result<Self> {
        Rgb::from_hex(&s)
    }
}

impl From<Rgb> for String {
    fn from(c: Rgb) -> String {
        c.to_string()
    }
}

/// Target colours of a layer with their shared tolerance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorSet<'a> {
    pub colors: &'a [Rgb],
    pub tolerance: u32,
}

impl ColorSet<'_> {
    /// Any target colour matches the pixel.
    pub fn matches(&self, pixel: [u8; 3]) -> bool {
        self.colors.iter().any(|c| c.matches(pixel, self.tolerance))
    }
}

/// Row-major match flags for every pixel of the raster.
pub fn classify(image: &RgbImage, target_colors: &[Rgb], tolerance: u32) -> Vec<bool> {
    let set = ColorSet {
        colors: target_colors,
        tolerance,
    };
    image
        .as_raw()
        .par_chunks_exact(3)
        .map(|p| set.matches([p[0], p[1], p[2]]))
        .collect()
}

pub fn is_blank(pixel: [u8; 3]) -> bool {
    pixel.iter().all(|&c| c > BLANK_THRESHOLD)
}

/// Row-major blank flags for every pixel of the raster.
pub fn classify_blank(image: &RgbImage) -> Vec<bool> {
    image
        .as_raw()
        .par_chunks_exact(3)
        .map(|p| is_blank([p[0], p[1], p[2]]))
        .collect()
}

/// Converts any integer raster to RGB. Alpha is composited over white so
/// transparent padding reads as blank. Float rasters are rejected.
pub fn to_rgb(image: &DynamicImage) -> Result<RgbImage, String> {
    match image {
        DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_) => {
            Err("32-bit float rasters are not supported".to_string())
        }
        DynamicImage::ImageRgb8(rgb) => Ok(rgb.clone()),
        other if other.color().has_alpha() => {
            let rgba = other.to_rgba8();
            Ok(RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
                let [r, g, b, a] = rgba.get_pixel(x, y).0;
                image::Rgb([over_white(r, a), over_white(g, a), over_white(b, a)])
            }))
        }
        other => Ok(other.to_rgb8()),
    }
}

/// Porter-Duff 'over' of one channel onto opaque white.
fn over_white(channel: u8, alpha: u8) -> u8 {
    let a = alpha as u32;
    ((channel as u32 * a + 255 * (255 - a) + 127) / 255) as u8
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColorCount {
    pub color: Rgb,
    pub pixels: u64,
}

/// Distinct colours inside the mask and the `top_n` most frequent ones.
/// Equal counts are ordered by colour value.
pub fn color_histogram(image: &RgbImage, mask: &InclusionMask, top_n: usize) -> (usize, Vec<ColorCount>) {
    let mut counts: HashMap<[u8; 3], u64> = HashMap::new();
    for (p, &inside) in image.as_raw().chunks_exact(3).zip(mask.as_slice()) {
        if inside {
            *counts.entry([p[0], p[1], p[2]]).or_default() += 1;
        }
    }

    let distinct = counts.len();
    let mut top: Vec<ColorCount> = counts
        .into_iter()
        .map(|(color, pixels)| ColorCount {
            color: Rgb(color),
            pixels,
        })
        .collect();
    top.sort_by(|a, b| b.pixels.cmp(&a.pixels).then(a.color.cmp(&b.color)));
    top.truncate(top_n);
    (distinct, top)
}
