mod config;
mod error;
mod hub;
mod manifest;
mod pipeline;
mod probe;
mod tokenizer;
mod validate;

pub mod model;
pub mod onnx;

pub use config::*;
pub use error::*;
pub use hub::*;
pub use manifest::*;
pub use pipeline::*;
pub use probe::*;
pub use tokenizer::*;
pub use validate::*;

pub use model::{mean_pool, Embedder, RobertaConfig, RobertaEncoder};
pub use onnx::export_model;

/// Graph input carrying token ids, `[batch_size, sequence]` int64.
pub const INPUT_IDS: &str = "input_ids";

/// Graph input carrying the binary attention mask, `[batch_size, sequence]` int64.
pub const ATTENTION_MASK: &str = "attention_mask";

/// Graph output carrying the pooled embedding, `[batch_size, hidden]` float.
pub const EMBEDDING: &str = "embedding";
