use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::{Result, ONNX_FILENAME, TOKENIZER_FILENAME};

/// Summary written next to the exported artifacts as `config.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub model_id: String,
    pub max_length: usize,
    pub embedding_dim: usize,
    /// Artifact filenames, relative to the manifest
    pub files: Vec<String>,
}

impl Manifest {
    pub fn new(model_id: impl Into<String>, max_length: usize, embedding_dim: usize) -> Self {
        Self {
            model_id: model_id.into(),
            max_length,
            embedding_dim,
            files: vec![ONNX_FILENAME.to_string(), TOKENIZER_FILENAME.to_string()],
        }
    }

    /// Writes the manifest as two-space indented JSON, replacing any existing file.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        info!(path = %path.display(), embedding_dim = self.embedding_dim, "Wrote manifest");
        Ok(())
    }

    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}
