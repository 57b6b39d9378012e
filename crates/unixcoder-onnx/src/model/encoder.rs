use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use std::path::Path;
use tracing::info;

use crate::hub::is_pickle;
use crate::model::layer::{EncoderLayer, LayerNorm};
use crate::model::RobertaConfig;
use crate::Result;

/// Token, position and token-type embeddings followed by layer norm.
pub struct Embeddings {
    pub(crate) word_embeddings: Tensor,
    pub(crate) position_embeddings: Tensor,
    /// Row 0 of the token-type table; every token is type 0.
    pub(crate) token_type_embedding: Tensor,
    pub(crate) layer_norm: LayerNorm,
    pub(crate) pad_token_id: u32,
}

impl Embeddings {
    pub fn load(vb: VarBuilder, config: &RobertaConfig) -> Result<Self> {
        let hidden = config.hidden_size;
        let word_embeddings = vb.get((config.vocab_size, hidden), "word_embeddings.weight")?;
        let position_embeddings = vb.get(
            (config.max_position_embeddings, hidden),
            "position_embeddings.weight",
        )?;
        let token_type_embedding = vb
            .get((config.type_vocab_size, hidden), "token_type_embeddings.weight")?
            .get(0)?;
        let layer_norm = LayerNorm::load(vb.pp("LayerNorm"), hidden, config.layer_norm_eps)?;

        Ok(Self {
            word_embeddings,
            position_embeddings,
            token_type_embedding,
            layer_norm,
            pad_token_id: config.pad_token_id,
        })
    }

    pub fn forward(&self, input_ids: &Tensor) -> Result<Tensor> {
        let (batch, seq_len) = input_ids.dims2()?;
        let hidden = self.word_embeddings.dim(1)?;

        let words = self
            .word_embeddings
            .index_select(&input_ids.flatten_all()?, 0)?;
        let positions = self
            .position_embeddings
            .index_select(&self.position_ids(input_ids)?.flatten_all()?, 0)?;

        let embedded = words
            .add(&positions)?
            .broadcast_add(&self.token_type_embedding)?
            .reshape((batch, seq_len, hidden))?;
        self.layer_norm.forward(&embedded)
    }

    /// Padding tokens keep position `pad_token_id`; real tokens count up from
    /// `pad_token_id + 1` in order of appearance.
    pub fn position_ids(&self, input_ids: &Tensor) -> Result<Tensor> {
        let (batch, seq_len) = input_ids.dims2()?;
        let pad = self.pad_token_id;
        let rows = input_ids.to_dtype(DType::U32)?.to_vec2::<u32>()?;

        let mut positions = Vec::with_capacity(batch * seq_len);
        for row in rows {
            let mut seen = 0u32;
            for id in row {
                if id == pad {
                    positions.push(pad);
                } else {
                    seen += 1;
                    positions.push(pad + seen);
                }
            }
        }
        Ok(Tensor::from_vec(positions, (batch, seq_len), input_ids.device())?)
    }
}

/// RoBERTa encoder producing per-token hidden states.
pub struct RobertaEncoder {
    pub(crate) config: RobertaConfig,
    pub(crate) embeddings: Embeddings,
    pub(crate) layers: Vec<EncoderLayer>,
}

impl RobertaEncoder {
    /// Loads weights named like a HuggingFace RoBERTa checkpoint, with or
    /// without the `roberta.` prefix.
    pub fn new(vb: VarBuilder, config: &RobertaConfig) -> Result<Self> {
        config.validate()?;
        let vb = if vb.contains_tensor("roberta.embeddings.word_embeddings.weight") {
            vb.pp("roberta")
        } else {
            vb
        };

        let embeddings = Embeddings::load(vb.pp("embeddings"), config)?;
        let layers = (0..config.num_hidden_layers)
            .map(|i| EncoderLayer::load(vb.pp(format!("encoder.layer.{}", i)), config))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            config: config.clone(),
            embeddings,
            layers,
        })
    }

    /// Loads `model.safetensors` or a PyTorch `pytorch_model.bin` pickle.
    pub fn load(weights: impl AsRef<Path>, config: &RobertaConfig, device: &Device) -> Result<Self> {
        let weights = weights.as_ref();
        info!(path = %weights.display(), "Loading encoder weights");
        let vb = if is_pickle(weights) {
            VarBuilder::from_pth(weights, DType::F32, device)?
        } else {
            // SAFETY: the file is not modified while the encoder is alive
            unsafe { VarBuilder::from_mmaped_safetensors(&[weights], DType::F32, device)? }
        };
        Self::new(vb, config)
    }

    pub fn config(&self) -> &RobertaConfig {
        &self.config
    }

    pub fn hidden_size(&self) -> usize {
        self.config.hidden_size
    }

    /// `input_ids` and `attention_mask` are `[batch, seq_len]`; returns
    /// hidden states `[batch, seq_len, hidden]`.
    pub fn forward(&self, input_ids: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
        let attention_bias = attention_bias(attention_mask)?;
        let mut hidden = self.embeddings.forward(input_ids)?;
        for layer in &self.layers {
            hidden = layer.forward(&hidden, &attention_bias)?;
        }
        Ok(hidden)
    }
}

/// `(1 - mask) * f32::MIN`, shaped `[batch, 1, 1, seq_len]`.
pub(crate) fn attention_bias(attention_mask: &Tensor) -> Result<Tensor> {
    let bias = attention_mask
        .to_dtype(DType::F32)?
        .affine(-1.0, 1.0)?
        .affine(f32::MIN as f64, 0.0)?;
    Ok(bias.unsqueeze(1)?.unsqueeze(1)?)
}
