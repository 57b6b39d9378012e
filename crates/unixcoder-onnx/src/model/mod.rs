//! In-process RoBERTa encoder and the mean-pooling embedder built on it.
//!
//! The tensors held here are the single source of truth for both the
//! reference forward pass and the exported ONNX graph.

mod config;
mod encoder;
mod layer;
mod pooling;

pub use config::RobertaConfig;
pub use encoder::{Embeddings, RobertaEncoder};
pub use layer::{EncoderLayer, LayerNorm, Linear};
pub use pooling::{mean_pool, Embedder};

pub(crate) use encoder::attention_bias;

#[cfg(test)]
pub(crate) mod test_support {
    use candle_core::{DType, Device};
    use candle_nn::{Init, VarBuilder, VarMap};

    use super::{Embedder, RobertaConfig, RobertaEncoder};

    pub fn tiny_config() -> RobertaConfig {
        RobertaConfig {
            vocab_size: 24,
            hidden_size: 16,
            num_hidden_layers: 2,
            num_attention_heads: 4,
            intermediate_size: 32,
            max_position_embeddings: 40,
            type_vocab_size: 2,
            ..Default::default()
        }
    }

    /// Randomly initialised weights under the HuggingFace parameter names.
    pub fn tiny_varmap(config: &RobertaConfig) -> candle_core::Result<VarMap> {
        let varmap = VarMap::new();
        let dev = Device::Cpu;
        let h = config.hidden_size;
        let weight = Init::Randn { mean: 0.0, stdev: 0.2 };
        let bias = Init::Randn { mean: 0.0, stdev: 0.02 };

        let add = |name: String, shape: Vec<usize>, init: Init| -> candle_core::Result<()> {
            varmap.get(shape, &name, init, DType::F32, &dev).map(|_| ())
        };

        add("embeddings.word_embeddings.weight".into(), vec![config.vocab_size, h], weight)?;
        add("embeddings.position_embeddings.weight".into(), vec![config.max_position_embeddings, h], weight)?;
        add("embeddings.token_type_embeddings.weight".into(), vec![config.type_vocab_size, h], weight)?;
        add("embeddings.LayerNorm.weight".into(), vec![h], Init::Const(1.0))?;
        add("embeddings.LayerNorm.bias".into(), vec![h], Init::Const(0.0))?;

        for i in 0..config.num_hidden_layers {
            let p = format!("encoder.layer.{}", i);
            let dense = [
                ("attention.self.query", h, h),
                ("attention.self.key", h, h),
                ("attention.self.value", h, h),
                ("attention.output.dense", h, h),
                ("intermediate.dense", h, config.intermediate_size),
                ("output.dense", config.intermediate_size, h),
            ];
            for (name, in_dim, out_dim) in dense {
                add(format!("{}.{}.weight", p, name), vec![out_dim, in_dim], weight)?;
                add(format!("{}.{}.bias", p, name), vec![out_dim], bias)?;
            }
            for norm in ["attention.output.LayerNorm", "output.LayerNorm"] {
                add(format!("{}.{}.weight", p, norm), vec![h], Init::Const(1.0))?;
                add(format!("{}.{}.bias", p, norm), vec![h], bias)?;
            }
        }
        Ok(varmap)
    }

    pub fn tiny_embedder() -> Embedder {
        let config = tiny_config();
        let varmap = tiny_varmap(&config).unwrap();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        Embedder::new(RobertaEncoder::new(vb, &config).unwrap())
    }
}
