use thiserror::Error;

/// Errors produced while encoding or decoding a SOG container.
#[derive(Debug, Error)]
pub enum SogError {
    /// Malformed manifest: bad version, missing entry, wrong JSON shape or array length.
    #[error("format error in {field}: {message}")]
    Format { field: String, message: String },

    /// Manifest and raster contents disagree (dimensions, codebook sizes, label ranges).
    #[error("data error in {field}: {message}")]
    Data { field: String, message: String },

    /// Archive or image codec failure for a named entry.
    #[error("i/o error in {entry}: {source}")]
    Io {
        entry: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("cannot reorder splats: {0}")]
    Reorder(String),

    #[error("clustering failed: {0}")]
    Cluster(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, SogError>;

impl SogError {
    pub fn format(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Format { field: field.into(), message: message.into() }
    }

    pub fn data(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Data { field: field.into(), message: message.into() }
    }

    pub fn io(entry: impl Into<String>, source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Io { entry: entry.into(), source: source.into() }
    }

    pub fn is_format(&self) -> bool {
        matches!(self, Self::Format { .. })
    }

    pub fn is_data(&self) -> bool {
        matches!(self, Self::Data { .. })
    }
}
