//! Error types for trueno-monitor
//!
//! Configuration errors surface when an extension is built; the rest surface
//! when an extension is invoked and travel through the manager's
//! [`ErrorPolicy`](crate::extension::ErrorPolicy).

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// trueno-monitor error types
#[derive(Error, Debug)]
pub enum Error {
    /// Bad or missing model, parameter or path at setup
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed or missing graph, or undecodable log content
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error (log sink or graph file)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding/decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV encoding error (observation log)
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Arrow error (scalar log export)
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet error (scalar log export)
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// An extension failed while being invoked by the manager
    #[error("Extension '{name}' failed: {source}")]
    Extension {
        /// Registered extension name
        name: String,
        /// Underlying failure
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Whether this error was raised at setup time.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Strip any [`Error::Extension`] wrappers and return the root failure.
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::Extension { source, .. } => source.root(),
            other => other,
        }
    }
}
