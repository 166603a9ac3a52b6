//! Thematic layer definitions and the layer catalog.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::classify::Rgb;
use crate::error::{AffectError, Result};

/// Where a layer's raster comes from. Opaque to the analysis itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub url: String,
    pub layer: String,
    #[serde(default)]
    pub style: String,
}

/// A layer to analyse: its raster source and the colours that mark affected area.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerSpec {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub source: SourceDescriptor,
    pub colors: Vec<Rgb>,
    /// Largest accepted per-channel difference.
    pub tolerance: u32,
}

impl LayerSpec {
    /// Human readable name, derived from the id when no title is set.
    pub fn display_title(&self) -> String {
        match &self.title {
            Some(title) => title.clone(),
            None => self
                .id
                .split('_')
                .filter(|w| !w.is_empty())
                .map(|w| {
                    let mut chars = w.chars();
                    match chars.next() {
                        Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                        None => String::new(),
                    }
                })
                .collect::<Vec<_>>()
                .join(" "),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(AffectError::Catalog("layer id cannot be empty".to_string()));
        }
        if self.id.contains(['/', '\\']) {
            return Err(AffectError::Catalog(format!(
                "layer id '{}' cannot contain path separators",
                self.id
            )));
        }
        if self.colors.is_empty() {
            return Err(AffectError::Catalog(format!(
                "layer '{}' has no target colors",
                self.id
            )));
        }
        Ok(())
    }
}

fn spec(id: &str, title: &str, url: &str, layer: &str, colors: &[Rgb], tolerance: u32) -> LayerSpec {
    LayerSpec {
        id: id.to_string(),
        title: Some(title.to_string()),
        source: SourceDescriptor {
            url: url.to_string(),
            layer: layer.to_string(),
            style: String::new(),
        },
        colors: colors.to_vec(),
        tolerance,
    }
}

/// The environmental layers analysed when no catalog file is given.
pub fn builtin_catalog() -> Vec<LayerSpec> {
    vec![
        spec(
            "montes_publicos",
            "Public forests",
            "https://www.ign.es/wms-inspire/cubierta-tierra",
            "LC.ForestManagementUnit",
            &[
                Rgb::new(34, 139, 34),
                Rgb::new(0, 128, 0),
                Rgb::new(46, 125, 50),
                Rgb::new(76, 175, 80),
            ],
            40,
        ),
        spec(
            "red_natura",
            "Natura 2000 protected sites",
            "https://servicios.idee.es/wms-inspire/protectedsites",
            "PS.ProtectedSite",
            &[
                Rgb::new(0, 128, 0),
                Rgb::new(34, 139, 34),
                Rgb::new(0, 100, 0),
                Rgb::new(60, 179, 113),
            ],
            45,
        ),
        spec(
            "vias_pecuarias",
            "Livestock droveways",
            "https://www.mapa.gob.es/servicios/wms/vias-pecuarias",
            "viaspecuarias",
            &[
                Rgb::new(165, 42, 42),
                Rgb::new(139, 69, 19),
                Rgb::new(160, 82, 45),
                Rgb::new(205, 133, 63),
            ],
            35,
        ),
        spec(
            "patrimonio_geologico",
            "Geological heritage",
            "https://www.ign.es/wms-inspire/geologia",
            "GE.GeologicUnit",
            &[Rgb::new(128, 128, 128), Rgb::new(169, 169, 169)],
            50,
        ),
    ]
}

/// Parses and validates a JSON catalog (an array of layer objects).
pub fn parse_catalog(json: &str) -> Result<Vec<LayerSpec>> {
    let layers: Vec<LayerSpec> =
        serde_json::from_str(json).map_err(|e| AffectError::Catalog(e.to_string()))?;
    if layers.is_empty() {
        return Err(AffectError::Catalog("catalog defines no layers".to_string()));
    }

    let mut seen = HashSet::new();
    for layer in &layers {
        layer.validate()?;
        if !seen.insert(layer.id.as_str()) {
            return Err(AffectError::Catalog(format!(
                "duplicate layer id '{}'",
                layer.id
            )));
        }
    }
    Ok(layers)
}

pub fn load_catalog(path: &Path) -> Result<Vec<LayerSpec>> {
    let content = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            AffectError::FileNotFound(path.display().to_string())
        } else {
            AffectError::Io(e)
        }
    })?;
    parse_catalog(&content)
}

/// Keeps the catalog layers named in `only`, in catalog order. An empty
/// filter keeps everything.
pub fn select_layers(catalog: Vec<LayerSpec>, only: &[String]) -> Result<Vec<LayerSpec>> {
    if only.is_empty() {
        return Ok(catalog);
    }
    for id in only {
        if !catalog.iter().any(|l| &l.id == id) {
            let available = catalog
                .iter()
                .map(|l| l.id.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(AffectError::LayerNotFound(id.clone(), available));
        }
    }
    Ok(catalog
        .into_iter()
        .filter(|l| only.contains(&l.id))
        .collect())
}
