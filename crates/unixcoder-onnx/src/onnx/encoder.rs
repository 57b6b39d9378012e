use super::builder::{attr_int, attr_ints, Dim, GraphBuilder};
use super::proto::{DataType, ModelProto};
use crate::model::{Embedder, EncoderLayer, LayerNorm, Linear};
use crate::{Result, ATTENTION_MASK, EMBEDDING, INPUT_IDS};

/// Operator set the graph is written against.
pub const OPSET_VERSION: i64 = 14;

pub const BATCH_AXIS: &str = "batch_size";
pub const SEQUENCE_AXIS: &str = "sequence";

/// Shared constant initializers, created once per graph.
struct Constants {
    pad_token_id: String,
    cumsum_axis: String,
    axes_seq: String,
    axes_last: String,
    axes_mask: String,
    one: String,
    half: String,
    sqrt_two: String,
    mask_fill: String,
    attention_scale: String,
    eps: String,
    split_heads_shape: String,
    merge_heads_shape: String,
}

impl Constants {
    fn new(g: &mut GraphBuilder, embedder: &Embedder) -> Self {
        let config = embedder.encoder().config();
        let head_dim = config.head_dim();
        Self {
            pad_token_id: g.initializer_i64("const_pad_token_id", &[], &[config.pad_token_id as i64]),
            cumsum_axis: g.initializer_i64("const_cumsum_axis", &[], &[1]),
            axes_seq: g.initializer_i64("const_axes_seq", &[1], &[1]),
            axes_last: g.initializer_i64("const_axes_last", &[1], &[2]),
            axes_mask: g.initializer_i64("const_axes_mask", &[2], &[1, 2]),
            one: g.initializer_f32("const_one", &[], &[1.0]),
            half: g.initializer_f32("const_half", &[], &[0.5]),
            sqrt_two: g.initializer_f32("const_sqrt_two", &[], &[std::f32::consts::SQRT_2]),
            mask_fill: g.initializer_f32("const_mask_fill", &[], &[f32::MIN]),
            attention_scale: g.initializer_f32(
                "const_attention_scale",
                &[],
                &[(1.0 / (head_dim as f64).sqrt()) as f32],
            ),
            eps: g.initializer_f32("const_layer_norm_eps", &[], &[config.layer_norm_eps as f32]),
            split_heads_shape: g.initializer_i64(
                "const_split_heads_shape",
                &[4],
                &[0, 0, config.num_attention_heads as i64, head_dim as i64],
            ),
            merge_heads_shape: g.initializer_i64(
                "const_merge_heads_shape",
                &[3],
                &[0, 0, config.hidden_size as i64],
            ),
        }
    }
}

/// Emits the full embedder (RoBERTa encoder plus mean pooling) as an ONNX
/// model whose weights are stored as initializers.
pub fn build_embedder_graph(embedder: &Embedder) -> Result<ModelProto> {
    let encoder = embedder.encoder();
    let hidden_size = encoder.hidden_size() as i64;
    let mut g = GraphBuilder::new("unixcoder_embedder");

    let dynamic = [Dim::dynamic(BATCH_AXIS), Dim::dynamic(SEQUENCE_AXIS)];
    let input_ids = g.input(INPUT_IDS, DataType::Int64, &dynamic);
    let attention_mask = g.input(ATTENTION_MASK, DataType::Int64, &dynamic);
    let c = Constants::new(&mut g, embedder);

    let hidden = emit_embeddings(&mut g, &c, embedder, &input_ids)?;

    // (1 - mask) * f32::MIN, [batch, 1, 1, seq]
    let mask_4d = g.node("Unsqueeze", &[&attention_mask, &c.axes_mask], vec![]);
    let mask_4d = g.node("Cast", &[&mask_4d], vec![attr_int("to", DataType::Float.code() as i64)]);
    let inverted = g.node("Sub", &[&c.one, &mask_4d], vec![]);
    let attention_bias = g.node("Mul", &[&inverted, &c.mask_fill], vec![]);

    let mut hidden = hidden;
    for (i, layer) in encoder.layers.iter().enumerate() {
        hidden = emit_layer(&mut g, &c, layer, &format!("encoder.layer.{}", i), &hidden, &attention_bias)?;
    }

    // Mean pooling over unmasked positions
    let mask_3d = g.node("Unsqueeze", &[&attention_mask, &c.axes_last], vec![]);
    let mask_3d = g.node("Cast", &[&mask_3d], vec![attr_int("to", DataType::Float.code() as i64)]);
    let masked = g.node("Mul", &[&hidden, &mask_3d], vec![]);
    let summed = g.node("ReduceSum", &[&masked, &c.axes_seq], vec![attr_int("keepdims", 0)]);
    let counts = g.node("ReduceSum", &[&mask_3d, &c.axes_seq], vec![attr_int("keepdims", 0)]);
    g.node_into("Div", &[&summed, &counts], EMBEDDING, vec![]);
    g.output(
        EMBEDDING,
        DataType::Float,
        &[Dim::dynamic(BATCH_AXIS), Dim::Fixed(hidden_size)],
    );

    Ok(g.build(OPSET_VERSION, "unixcoder-onnx", env!("CARGO_PKG_VERSION")))
}

fn emit_embeddings(g: &mut GraphBuilder, c: &Constants, embedder: &Embedder, input_ids: &str) -> Result<String> {
    let embeddings = &embedder.encoder().embeddings;

    // position = cumsum(ids != pad) * (ids != pad) + pad
    let is_pad = g.node("Equal", &[input_ids, &c.pad_token_id], vec![]);
    let not_pad = g.node("Not", &[&is_pad], vec![]);
    let not_pad = g.node("Cast", &[&not_pad], vec![attr_int("to", DataType::Int64.code() as i64)]);
    let running = g.node("CumSum", &[&not_pad, &c.cumsum_axis], vec![]);
    let running = g.node("Mul", &[&running, &not_pad], vec![]);
    let position_ids = g.node("Add", &[&running, &c.pad_token_id], vec![]);

    let word_table = g.tensor("embeddings.word_embeddings.weight", &embeddings.word_embeddings)?;
    let position_table = g.tensor("embeddings.position_embeddings.weight", &embeddings.position_embeddings)?;
    let token_type = g.tensor("embeddings.token_type_embeddings.row0", &embeddings.token_type_embedding)?;

    let words = g.node("Gather", &[&word_table, input_ids], vec![attr_int("axis", 0)]);
    let positions = g.node("Gather", &[&position_table, &position_ids], vec![attr_int("axis", 0)]);
    let summed = g.node("Add", &[&words, &positions], vec![]);
    let summed = g.node("Add", &[&summed, &token_type], vec![]);

    emit_layer_norm(g, c, &embeddings.layer_norm, "embeddings.LayerNorm", &summed)
}

fn emit_layer(
    g: &mut GraphBuilder,
    c: &Constants,
    layer: &EncoderLayer,
    prefix: &str,
    hidden: &str,
    attention_bias: &str,
) -> Result<String> {
    let query = emit_linear(g, &layer.query, &format!("{}.attention.self.query", prefix), hidden)?;
    let key = emit_linear(g, &layer.key, &format!("{}.attention.self.key", prefix), hidden)?;
    let value = emit_linear(g, &layer.value, &format!("{}.attention.self.value", prefix), hidden)?;

    // [batch, seq, hidden] -> [batch, heads, seq, head_dim]; keys as [batch, heads, head_dim, seq]
    let query = g.node("Reshape", &[&query, &c.split_heads_shape], vec![]);
    let query = g.node("Transpose", &[&query], vec![attr_ints("perm", &[0, 2, 1, 3])]);
    let key = g.node("Reshape", &[&key, &c.split_heads_shape], vec![]);
    let key = g.node("Transpose", &[&key], vec![attr_ints("perm", &[0, 2, 3, 1])]);
    let value = g.node("Reshape", &[&value, &c.split_heads_shape], vec![]);
    let value = g.node("Transpose", &[&value], vec![attr_ints("perm", &[0, 2, 1, 3])]);

    let scores = g.node("MatMul", &[&query, &key], vec![]);
    let scores = g.node("Mul", &[&scores, &c.attention_scale], vec![]);
    let scores = g.node("Add", &[&scores, attention_bias], vec![]);
    let probs = g.node("Softmax", &[&scores], vec![attr_int("axis", -1)]);

    let context = g.node("MatMul", &[&probs, &value], vec![]);
    let context = g.node("Transpose", &[&context], vec![attr_ints("perm", &[0, 2, 1, 3])]);
    let context = g.node("Reshape", &[&context, &c.merge_heads_shape], vec![]);

    let attended = emit_linear(g, &layer.attention_output, &format!("{}.attention.output.dense", prefix), &context)?;
    let attended = g.node("Add", &[&attended, hidden], vec![]);
    let attended = emit_layer_norm(
        g,
        c,
        &layer.attention_norm,
        &format!("{}.attention.output.LayerNorm", prefix),
        &attended,
    )?;

    let inner = emit_linear(g, &layer.intermediate, &format!("{}.intermediate.dense", prefix), &attended)?;
    let inner = emit_gelu(g, c, &inner);
    let output = emit_linear(g, &layer.output, &format!("{}.output.dense", prefix), &inner)?;
    let output = g.node("Add", &[&output, &attended], vec![]);
    emit_layer_norm(g, c, &layer.output_norm, &format!("{}.output.LayerNorm", prefix), &output)
}

fn emit_linear(g: &mut GraphBuilder, linear: &Linear, prefix: &str, input: &str) -> Result<String> {
    let weight = g.tensor(&format!("{}.weight_t", prefix), &linear.weight_t)?;
    let bias = g.tensor(&format!("{}.bias", prefix), &linear.bias)?;
    let projected = g.node("MatMul", &[input, &weight], vec![]);
    Ok(g.node("Add", &[&projected, &bias], vec![]))
}

/// LayerNormalization only exists from opset 17, so it is spelled out.
fn emit_layer_norm(g: &mut GraphBuilder, c: &Constants, norm: &LayerNorm, prefix: &str, input: &str) -> Result<String> {
    let weight = g.tensor(&format!("{}.weight", prefix), &norm.weight)?;
    let bias = g.tensor(&format!("{}.bias", prefix), &norm.bias)?;
    let reduce = || vec![attr_ints("axes", &[-1]), attr_int("keepdims", 1)];

    let mean = g.node("ReduceMean", &[input], reduce());
    let centered = g.node("Sub", &[input, &mean], vec![]);
    let squared = g.node("Mul", &[&centered, &centered], vec![]);
    let variance = g.node("ReduceMean", &[&squared], reduce());
    let variance = g.node("Add", &[&variance, &c.eps], vec![]);
    let std = g.node("Sqrt", &[&variance], vec![]);
    let normalized = g.node("Div", &[&centered, &std], vec![]);
    let scaled = g.node("Mul", &[&normalized, &weight], vec![]);
    Ok(g.node("Add", &[&scaled, &bias], vec![]))
}

/// Exact GELU: `0.5 * x * (1 + erf(x / sqrt(2)))`
fn emit_gelu(g: &mut GraphBuilder, c: &Constants, input: &str) -> String {
    let scaled = g.node("Div", &[input, &c.sqrt_two], vec![]);
    let erf = g.node("Erf", &[&scaled], vec![]);
    let shifted = g.node("Add", &[&erf, &c.one], vec![]);
    let product = g.node("Mul", &[input, &shifted], vec![]);
    g.node("Mul", &[&product, &c.half], vec![])
}
