use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{ExportError, Result};

/// Architecture parameters read from a RoBERTa `config.json`.
///
/// Missing keys fall back to the RoBERTa-base values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RobertaConfig {
    pub vocab_size: usize,
    pub hidden_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    pub intermediate_size: usize,
    pub hidden_act: String,
    pub max_position_embeddings: usize,
    pub type_vocab_size: usize,
    pub layer_norm_eps: f64,
    pub pad_token_id: u32,
}

impl Default for RobertaConfig {
    fn default() -> Self {
        Self {
            vocab_size: 50265,
            hidden_size: 768,
            num_hidden_layers: 12,
            num_attention_heads: 12,
            intermediate_size: 3072,
            hidden_act: "gelu".to_string(),
            max_position_embeddings: 514,
            type_vocab_size: 1,
            layer_norm_eps: 1e-5,
            pad_token_id: 1,
        }
    }
}

impl RobertaConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.num_attention_heads
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_attention_heads == 0 || self.hidden_size % self.num_attention_heads != 0 {
            return Err(ExportError::Config(format!(
                "hidden_size {} is not divisible by num_attention_heads {}",
                self.hidden_size, self.num_attention_heads
            )));
        }
        if self.num_hidden_layers == 0 {
            return Err(ExportError::Config("num_hidden_layers must be positive".to_string()));
        }
        if self.type_vocab_size == 0 {
            return Err(ExportError::Config("type_vocab_size must be positive".to_string()));
        }
        // Only the exact erf form is emitted into the graph
        if self.hidden_act != "gelu" {
            return Err(ExportError::Config(format!(
                "Unsupported activation: {}",
                self.hidden_act
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_unixcoder_config() -> anyhow::Result<()> {
        let json = r#"{
            "architectures": ["RobertaModel"],
            "hidden_size": 768,
            "num_hidden_layers": 12,
            "num_attention_heads": 12,
            "intermediate_size": 3072,
            "hidden_act": "gelu",
            "max_position_embeddings": 1026,
            "type_vocab_size": 10,
            "vocab_size": 51416,
            "layer_norm_eps": 1e-05,
            "pad_token_id": 1,
            "model_type": "roberta"
        }"#;
        let config: RobertaConfig = serde_json::from_str(json)?;
        config.validate()?;
        assert_eq!(config.max_position_embeddings, 1026);
        assert_eq!(config.type_vocab_size, 10);
        assert_eq!(config.head_dim(), 64);
        Ok(())
    }

    #[test]
    fn test_missing_keys_use_defaults() -> anyhow::Result<()> {
        let config: RobertaConfig = serde_json::from_str(r#"{"hidden_size": 32, "num_attention_heads": 4}"#)?;
        assert_eq!(config.num_hidden_layers, 12);
        assert_eq!(config.head_dim(), 8);
        Ok(())
    }

    #[test]
    fn test_rejects_bad_head_split() {
        let config = RobertaConfig {
            hidden_size: 30,
            num_attention_heads: 4,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ExportError::Config(_))));
    }

    #[test]
    fn test_rejects_tanh_gelu() {
        let config = RobertaConfig {
            hidden_act: "gelu_new".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
