use hf_hub::api::sync::{Api, ApiRepo};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::{ExportError, ModelSource, Result};

/// Weight files in order of preference
const WEIGHT_FILES: [&str; 2] = ["model.safetensors", "pytorch_model.bin"];

/// How the tokenizer of a model repository is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenizerFiles {
    /// A ready-made `tokenizer.json`
    Serialized(PathBuf),
    /// Byte-level BPE tables the fast tokenizer is built from
    VocabMerges {
        vocab: PathBuf,
        merges: PathBuf,
        added_tokens: Option<PathBuf>,
    },
}

/// Local paths of everything needed to assemble the encoder and its tokenizer.
#[derive(Debug, Clone)]
pub struct ModelFiles {
    pub config: PathBuf,
    pub weights: PathBuf,
    pub tokenizer: TokenizerFiles,
}

enum Fetcher {
    Hub(ApiRepo),
    Local(PathBuf),
}

impl Fetcher {
    fn get(&self, filename: &str) -> std::result::Result<PathBuf, String> {
        match self {
            Fetcher::Hub(repo) => repo.get(filename).map_err(|e| e.to_string()),
            Fetcher::Local(dir) => {
                let path = dir.join(filename);
                if path.is_file() {
                    Ok(path)
                } else {
                    Err(format!("{} not found", path.display()))
                }
            }
        }
    }

    fn require(&self, filename: &str) -> Result<PathBuf> {
        self.get(filename)
            .map_err(|e| ExportError::ModelLoad(format!("Missing {}: {}", filename, e)))
    }

    fn optional(&self, filename: &str) -> Option<PathBuf> {
        match self.get(filename) {
            Ok(path) => Some(path),
            Err(e) => {
                debug!(file = filename, error = %e, "Optional model file not available");
                None
            }
        }
    }
}

impl ModelFiles {
    pub fn resolve(source: &ModelSource) -> Result<Self> {
        let fetcher = match source {
            ModelSource::Hub(model_id) => {
                info!(model_id = %model_id, "Fetching model files from the hub");
                let api = Api::new().map_err(|e| ExportError::ModelLoad(e.to_string()))?;
                Fetcher::Hub(api.model(model_id.clone()))
            }
            ModelSource::Local(dir) => {
                if !dir.is_dir() {
                    return Err(ExportError::ModelLoad(format!(
                        "Model directory does not exist: {}",
                        dir.display()
                    )));
                }
                info!(dir = %dir.display(), "Reading model files from local directory");
                Fetcher::Local(dir.clone())
            }
        };

        let config = fetcher.require("config.json")?;

        let weights = WEIGHT_FILES
            .iter()
            .find_map(|name| fetcher.optional(name))
            .ok_or_else(|| {
                ExportError::ModelLoad(format!(
                    "No weights found (looked for {})",
                    WEIGHT_FILES.join(", ")
                ))
            })?;

        let tokenizer = match fetcher.optional("tokenizer.json") {
            Some(path) => TokenizerFiles::Serialized(path),
            None => TokenizerFiles::VocabMerges {
                vocab: fetcher.require("vocab.json")?,
                merges: fetcher.require("merges.txt")?,
                added_tokens: fetcher.optional("added_tokens.json"),
            },
        };

        debug!(weights = %weights.display(), "Resolved model files");
        Ok(Self {
            config,
            weights,
            tokenizer,
        })
    }

    /// Whether the weights are stored as a PyTorch pickle rather than safetensors
    pub fn weights_are_pickle(&self) -> bool {
        is_pickle(&self.weights)
    }
}

pub(crate) fn is_pickle(path: &Path) -> bool {
    !matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("safetensors")
    )
}
