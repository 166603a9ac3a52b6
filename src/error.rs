use thiserror::Error;

#[derive(Error, Debug)]
pub enum AffectError {
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Layer '{layer}' unavailable: {reason}")]
    SourceUnavailable { layer: String, reason: String },

    #[error("Cannot classify layer '{layer}': {reason}")]
    Classification { layer: String, reason: String },

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Layer '{0}' not found. Available layers: {1}")]
    LayerNotFound(String, String),

    #[error("Invalid bounding box format: {0}")]
    InvalidBbox(String),

    #[error("Invalid color format: {0}")]
    InvalidColor(String),

    #[error("Grid dimensions must be positive, got: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("Zoom factor must be positive, got: {0}")]
    InvalidZoom(f64),

    #[error("Scale must be positive, got: {0}")]
    InvalidScale(f64),

    #[error("Timeout must be a positive number of seconds in range, got: {0}")]
    InvalidTimeout(f64),

    #[error("Options --{0} and --{1} are mutually exclusive")]
    MutuallyExclusiveOptions(String, String),

    #[error("Invalid option: {0}")]
    InvalidFormatOption(String),

    #[error("Image dimensions too large: {width}x{height} pixels (max: {max})")]
    ImageTooLarge { width: u32, height: u32, max: u32 },

    #[error("GeoJSON parse error: {0}")]
    GeojsonParse(String),

    #[error("No polygon geometry found in {0}")]
    EmptyGeometry(String),

    #[error("Invalid layer catalog: {0}")]
    Catalog(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AffectError {
    /// Short machine-readable name, used for per-layer error entries.
    pub fn kind(&self) -> &'static str {
        match self {
            AffectError::InvalidGeometry(_) => "invalid_geometry",
            AffectError::SourceUnavailable { .. } => "source_unavailable",
            AffectError::Classification { .. } => "classification",
            AffectError::FileNotFound(_) => "file_not_found",
            AffectError::LayerNotFound(..) => "layer_not_found",
            AffectError::InvalidBbox(_) => "invalid_bbox",
            AffectError::InvalidColor(_) => "invalid_color",
            AffectError::InvalidDimensions { .. } => "invalid_dimensions",
            AffectError::InvalidZoom(_) => "invalid_zoom",
            AffectError::InvalidScale(_) => "invalid_scale",
            AffectError::InvalidTimeout(_) => "invalid_timeout",
            AffectError::MutuallyExclusiveOptions(..) => "mutually_exclusive_options",
            AffectError::InvalidFormatOption(_) => "invalid_option",
            AffectError::ImageTooLarge { .. } => "image_too_large",
            AffectError::GeojsonParse(_) => "geojson_parse",
            AffectError::EmptyGeometry(_) => "empty_geometry",
            AffectError::Catalog(_) => "catalog",
            AffectError::Database(_) => "database",
            AffectError::Io(_) => "io",
            AffectError::Image(_) => "image",
            AffectError::Json(_) => "json",
        }
    }

    pub fn source_unavailable(layer: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            layer: layer.into(),
            reason: reason.into(),
        }
    }

    pub fn classification(layer: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Classification {
            layer: layer.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AffectError>;
