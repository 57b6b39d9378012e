//! ONNX graph emission for the mean-pooling embedder.

mod builder;
mod encoder;
pub mod proto;

pub use builder::{attr_float, attr_int, attr_ints, Dim, GraphBuilder, IR_VERSION};
pub use encoder::{build_embedder_graph, BATCH_AXIS, OPSET_VERSION, SEQUENCE_AXIS};

use prost::Message;
use std::path::Path;
use tracing::info;

use crate::model::Embedder;
use crate::{ExportError, Result};

/// Writes the embedder graph to `path`, replacing any existing file.
/// Returns the number of bytes written.
pub fn export_model(embedder: &Embedder, path: impl AsRef<Path>) -> Result<usize> {
    let path = path.as_ref();
    let model = build_embedder_graph(embedder)?;
    let node_count = model.graph.as_ref().map(|g| g.node.len()).unwrap_or(0);

    let bytes = model.encode_to_vec();
    std::fs::write(path, &bytes).map_err(|e| {
        ExportError::Export(format!("Failed to write {}: {}", path.display(), e))
    })?;

    info!(
        path = %path.display(),
        nodes = node_count,
        bytes = bytes.len(),
        opset = OPSET_VERSION,
        "Exported ONNX graph"
    );
    Ok(bytes.len())
}
