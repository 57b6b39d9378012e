use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExportError {
    /// A required runtime component could not be acquired. This is the only
    /// error the pipeline recovers from.
    #[error("{name} is not available: {reason}")]
    DependencyUnavailable { name: &'static str, reason: String },

    #[error("Failed to load model: {0}")]
    ModelLoad(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to tokenize input: {0}")]
    Tokenization(String),

    #[error("Graph export failed: {0}")]
    Export(String),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Attention mask row {0} has no unmasked positions")]
    EmptyAttentionMask(usize),

    #[error("Tensor operation failed: {0}")]
    Tensor(#[from] candle_core::Error),

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExportError {
    pub fn is_dependency_unavailable(&self) -> bool {
        matches!(self, ExportError::DependencyUnavailable { .. })
    }
}

pub type Result<T> = std::result::Result<T, ExportError>;
