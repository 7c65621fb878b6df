#[derive(Debug, thiserror::Error)]
pub enum BenchError {
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Invalid weight for '{key}': {value}")]
    InvalidWeight { key: String, value: f64 },

    #[error("Process error: {0}")]
    Process(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl BenchError {
    /// Short machine-friendly tag, used when a fault is folded into a record.
    pub fn kind(&self) -> &'static str {
        match self {
            BenchError::InvalidRecord(_) => "invalid_record",
            BenchError::InvalidWeight { .. } => "invalid_weight",
            BenchError::Process(_) => "process",
            BenchError::NotFound(_) => "not_found",
            BenchError::Io(_) => "io",
            BenchError::Json(_) => "json",
            BenchError::Csv(_) => "csv",
        }
    }
}
