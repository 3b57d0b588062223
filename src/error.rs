use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Vendor matrix has no '{0}' key")]
    MissingPlanNet(String),

    #[error("Vendor key '{0}' has no dictionary file configured")]
    MissingDictionary(String),

    #[error("Unknown vendor key: {0}")]
    UnknownVendorKey(String),

    #[error("Configuration error in {file}: {details}")]
    ConfigError { file: String, details: String },

    #[error("Invalid rule {name}: {details}")]
    InvalidRule { name: String, details: String },

    #[error("Store entry not found: {0}")]
    NotFound(String),

    #[error("Placement {plan_fpn} costs {actual:.2} against a plan of {planned:.2}")]
    CapViolation {
        plan_fpn: String,
        actual: f64,
        planned: f64,
    },

    #[error("Date parse error: {0}")]
    DateError(String),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl LedgerError {
    pub fn config(file: impl Into<String>, details: impl Into<String>) -> Self {
        Self::ConfigError {
            file: file.into(),
            details: details.into(),
        }
    }

    /// Whether retrying the same read could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::IoError(_) => true,
            Self::CsvError(e) => matches!(e.kind(), csv::ErrorKind::Io(_)),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
