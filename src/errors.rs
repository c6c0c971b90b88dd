//! Centralized error handling for noahmp_tools
//!
//! Every tool reports failures through [`NoahMpError`]. The binary logs the
//! error and exits with a nonzero status; nothing is retried and output that
//! was already written is left in place.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for noahmp_tools operations
#[derive(Error, Debug)]
pub enum NoahMpError {
    /// NetCDF file operation errors
    #[error("NetCDF error: {0}")]
    NetCDF(#[from] netcdf::Error),

    /// I/O operation errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Array shape or dimension error
    #[error("Array error: {0}")]
    Array(#[from] ndarray::ShapeError),

    /// Variable not found in NetCDF file
    #[error("Variable '{var}' not found in file")]
    VariableNotFound { var: String },

    /// Dimension not found in NetCDF file
    #[error("Dimension '{dim}' not found in file")]
    DimensionNotFound { dim: String },

    /// Attribute missing or of an unexpected type
    #[error("Attribute '{name}' not found or not usable")]
    AttributeNotFound { name: String },

    /// An input file that must exist does not
    #[error("no such file: {}", path.display())]
    MissingFile { path: PathBuf },

    /// A gap in a fixed-cadence file series
    #[error("missing file for {missing}")]
    IrregularTimestep { missing: String },

    /// The requested time window is not fully covered
    #[error("{message}")]
    IncompleteSeries { message: String },

    /// Variable layout this tool cannot handle
    #[error("unsupported layout: {message}")]
    UnsupportedLayout { message: String },

    /// Unparseable date, time or CF time unit string
    #[error("invalid time specification '{input}'")]
    InvalidTime { input: String },

    /// Malformed namelist or template
    #[error("namelist error: {message}")]
    Namelist { message: String },

    /// An NCO operator could not be started or returned nonzero
    #[error("{tool} failed: {status}")]
    NcoFailed { tool: String, status: String },

    /// The land-surface model executable returned nonzero
    #[error("model run failed: {status}")]
    ModelFailed { status: String },

    /// Thread pool configuration error
    #[error("Thread pool error: {0}")]
    ThreadPool(String),

    /// Generic error
    #[error("{0}")]
    Generic(String),
}

impl From<String> for NoahMpError {
    fn from(error: String) -> Self {
        NoahMpError::Generic(error)
    }
}

impl From<&str> for NoahMpError {
    fn from(error: &str) -> Self {
        NoahMpError::Generic(error.to_string())
    }
}

impl From<glob::PatternError> for NoahMpError {
    fn from(error: glob::PatternError) -> Self {
        NoahMpError::Generic(format!("invalid file pattern: {}", error))
    }
}

/// Result type alias for noahmp_tools operations
pub type Result<T> = std::result::Result<T, NoahMpError>;
