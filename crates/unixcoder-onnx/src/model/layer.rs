use candle_core::Tensor;
use candle_nn::{ops, VarBuilder};

use crate::model::RobertaConfig;
use crate::Result;

/// Dense projection. The weight is kept transposed (`[in, out]`) so the
/// forward pass and the exported graph share one layout.
pub struct Linear {
    pub(crate) weight_t: Tensor,
    pub(crate) bias: Tensor,
}

impl Linear {
    pub fn load(vb: VarBuilder, in_dim: usize, out_dim: usize) -> Result<Self> {
        let weight = vb.get((out_dim, in_dim), "weight")?;
        let bias = vb.get(out_dim, "bias")?;
        Ok(Self {
            weight_t: weight.t()?.contiguous()?,
            bias,
        })
    }

    pub fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let (batch, seq_len, in_dim) = input.dims3()?;
        let out_dim = self.bias.dim(0)?;
        let output = input
            .reshape((batch * seq_len, in_dim))?
            .matmul(&self.weight_t)?
            .broadcast_add(&self.bias)?;
        Ok(output.reshape((batch, seq_len, out_dim))?)
    }
}

pub struct LayerNorm {
    pub(crate) weight: Tensor,
    pub(crate) bias: Tensor,
    pub(crate) eps: f64,
}

impl LayerNorm {
    pub fn load(vb: VarBuilder, size: usize, eps: f64) -> Result<Self> {
        // Older BERT-style checkpoints name the affine parameters gamma/beta
        let (weight, bias) = if vb.contains_tensor("weight") {
            (vb.get(size, "weight")?, vb.get(size, "bias")?)
        } else {
            (vb.get(size, "gamma")?, vb.get(size, "beta")?)
        };
        Ok(Self { weight, bias, eps })
    }

    pub fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let input = input.contiguous()?;
        Ok(ops::layer_norm(&input, &self.weight, &self.bias, self.eps as f32)?)
    }
}

/// One encoder block: self-attention followed by the feed-forward network,
/// each closed by a residual connection and layer norm.
pub struct EncoderLayer {
    pub(crate) query: Linear,
    pub(crate) key: Linear,
    pub(crate) value: Linear,
    pub(crate) attention_output: Linear,
    pub(crate) attention_norm: LayerNorm,

    pub(crate) intermediate: Linear,
    pub(crate) output: Linear,
    pub(crate) output_norm: LayerNorm,

    pub(crate) num_heads: usize,
}

impl EncoderLayer {
    pub fn load(vb: VarBuilder, config: &RobertaConfig) -> Result<Self> {
        let hidden = config.hidden_size;
        let inter = config.intermediate_size;
        let eps = config.layer_norm_eps;

        let attention = vb.pp("attention");
        let self_attention = attention.pp("self");
        let attention_out = attention.pp("output");

        Ok(Self {
            query: Linear::load(self_attention.pp("query"), hidden, hidden)?,
            key: Linear::load(self_attention.pp("key"), hidden, hidden)?,
            value: Linear::load(self_attention.pp("value"), hidden, hidden)?,
            attention_output: Linear::load(attention_out.pp("dense"), hidden, hidden)?,
            attention_norm: LayerNorm::load(attention_out.pp("LayerNorm"), hidden, eps)?,
            intermediate: Linear::load(vb.pp("intermediate").pp("dense"), hidden, inter)?,
            output: Linear::load(vb.pp("output").pp("dense"), inter, hidden)?,
            output_norm: LayerNorm::load(vb.pp("output").pp("LayerNorm"), hidden, eps)?,
            num_heads: config.num_attention_heads,
        })
    }

    /// `attention_bias` is the additive mask, shaped `[batch, 1, 1, seq_len]`.
    pub fn forward(&self, hidden: &Tensor, attention_bias: &Tensor) -> Result<Tensor> {
        let (batch, seq_len, hidden_size) = hidden.dims3()?;
        let head_dim = hidden_size / self.num_heads;

        let query = self.split_heads(&self.query.forward(hidden)?, head_dim)?;
        let key = self.split_heads(&self.key.forward(hidden)?, head_dim)?;
        let value = self.split_heads(&self.value.forward(hidden)?, head_dim)?;

        let key_t = key.transpose(2, 3)?.contiguous()?;
        let scores = query
            .matmul(&key_t)?
            .affine(1.0 / (head_dim as f64).sqrt(), 0.0)?
            .broadcast_add(attention_bias)?;
        let probs = ops::softmax_last_dim(&scores)?;

        let context = probs
            .matmul(&value)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((batch, seq_len, hidden_size))?;

        let attended = self.attention_output.forward(&context)?.add(hidden)?;
        let attended = self.attention_norm.forward(&attended)?;

        let inner = self.intermediate.forward(&attended)?.gelu_erf()?;
        let output = self.output.forward(&inner)?.add(&attended)?;
        self.output_norm.forward(&output)
    }

    /// `[batch, seq, hidden]` -> `[batch, heads, seq, head_dim]`
    fn split_heads(&self, input: &Tensor, head_dim: usize) -> Result<Tensor> {
        let (batch, seq_len, _) = input.dims3()?;
        Ok(input
            .reshape((batch, seq_len, self.num_heads, head_dim))?
            .transpose(1, 2)?
            .contiguous()?)
    }
}
