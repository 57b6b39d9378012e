use std::path::{Path, PathBuf};

/// Hub identifier of the exported encoder.
pub const DEFAULT_MODEL_ID: &str = "microsoft/unixcoder-base";

/// Tokenizer truncation limit, recorded in the manifest.
pub const DEFAULT_MAX_LENGTH: usize = 512;

pub const ONNX_FILENAME: &str = "unixcoder-embedding.onnx";
pub const TOKENIZER_FILENAME: &str = "tokenizer.json";
pub const MANIFEST_FILENAME: &str = "config.json";

/// Maximum absolute difference tolerated between the ONNX Runtime embedding
/// and the in-process one.
pub const DEFAULT_PARITY_TOLERANCE: f32 = 1e-3;

/// Instruction plus code block used as the example input for export and validation.
pub const SAMPLE_TEXT: &str = "Write a Python function that reads a file line by line, removes any trailing whitespace from each line, and returns the cleaned list of lines.\n\n```python\ndef clean_file_lines(file_path):\n    with open(file_path, 'r') as f:\n        return [line.rstrip() for line in f]\n```";

/// Where the encoder weights, config and tokenizer files come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    /// Download (or reuse the cached copy) from the HuggingFace hub.
    Hub(String),
    /// Read from a local directory laid out like a hub repository.
    Local(PathBuf),
}

/// Configuration for one export run
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Identifier written to the manifest
    pub model_id: String,

    pub source: ModelSource,

    /// Truncation limit for the sample tokenization
    pub max_length: usize,

    /// Directory receiving the three artifacts
    pub output_dir: PathBuf,

    pub sample_text: String,

    pub parity_tolerance: f32,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL_ID.to_string(),
            source: ModelSource::Hub(DEFAULT_MODEL_ID.to_string()),
            max_length: DEFAULT_MAX_LENGTH,
            output_dir: PathBuf::from("."),
            sample_text: SAMPLE_TEXT.to_string(),
            parity_tolerance: DEFAULT_PARITY_TOLERANCE,
        }
    }
}

impl ExportConfig {
    /// Defaults, overridden by `UNIXCODER_MODEL_DIR` and `UNIXCODER_OUTPUT_DIR`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(dir) = std::env::var("UNIXCODER_MODEL_DIR") {
            config.source = ModelSource::Local(PathBuf::from(dir));
        }
        if let Ok(dir) = std::env::var("UNIXCODER_OUTPUT_DIR") {
            config.output_dir = PathBuf::from(dir);
        }
        config
    }

    pub fn with_local_model(mut self, dir: impl AsRef<Path>) -> Self {
        self.source = ModelSource::Local(dir.as_ref().to_path_buf());
        self
    }

    pub fn with_output_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.output_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn onnx_path(&self) -> PathBuf {
        self.output_dir.join(ONNX_FILENAME)
    }

    pub fn tokenizer_path(&self) -> PathBuf {
        self.output_dir.join(TOKENIZER_FILENAME)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.output_dir.join(MANIFEST_FILENAME)
    }
}
