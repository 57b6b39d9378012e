use candle_core::Tensor;
use ort::session::Session;
use ort::value::Tensor as OrtTensor;
use std::path::Path;
use tracing::{debug, info};

use crate::{ExportError, Result, TokenizedSample, ATTENTION_MASK, INPUT_IDS};

/// First output of an ONNX Runtime run, flattened row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct OnnxOutput {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl OnnxOutput {
    pub fn batch(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }

    /// Size of the last axis.
    pub fn embedding_dim(&self) -> usize {
        self.shape.last().copied().unwrap_or(0)
    }
}

/// Loads the exported graph into a fresh session and runs one sample through it.
pub fn run_onnx(path: impl AsRef<Path>, sample: &TokenizedSample) -> Result<OnnxOutput> {
    let path = path.as_ref();
    let load_error =
        |e: ort::Error| ExportError::Inference(format!("Failed to load {}: {}", path.display(), e));
    let mut session = Session::builder()
        .map_err(load_error)?
        .commit_from_file(path)
        .map_err(load_error)?;

    let (input_ids, attention_mask) = sample.to_arrays()?;
    let input_ids =
        OrtTensor::from_array(input_ids).map_err(|e| ExportError::Inference(e.to_string()))?;
    let attention_mask =
        OrtTensor::from_array(attention_mask).map_err(|e| ExportError::Inference(e.to_string()))?;

    let outputs = session
        .run(ort::inputs![
            INPUT_IDS => input_ids,
            ATTENTION_MASK => attention_mask
        ])
        .map_err(|e| ExportError::Inference(e.to_string()))?;

    let (shape, data) = outputs[0]
        .try_extract_tensor::<f32>()
        .map_err(|e| ExportError::Inference(e.to_string()))?;
    let shape: Vec<usize> = shape.iter().map(|&d| d as usize).collect();

    debug!(?shape, "ONNX Runtime produced output");
    Ok(OnnxOutput {
        shape,
        data: data.to_vec(),
    })
}

/// Largest element-wise difference between the in-process embedding and the
/// runtime output. Fails if the shapes disagree or the difference exceeds `tolerance`.
pub fn check_parity(reference: &Tensor, output: &OnnxOutput, tolerance: f32) -> Result<f32> {
    if reference.dims() != output.shape.as_slice() {
        return Err(ExportError::Validation(format!(
            "Output shape {:?} does not match reference {:?}",
            output.shape,
            reference.dims()
        )));
    }

    let expected = reference.flatten_all()?.to_vec1::<f32>()?;
    let max_abs_diff = max_abs_diff(&expected, &output.data);
    if !(max_abs_diff <= tolerance) {
        return Err(ExportError::Validation(format!(
            "Embedding differs from reference by {} (tolerance {})",
            max_abs_diff, tolerance
        )));
    }

    info!(
        batch = output.batch(),
        embedding_dim = output.embedding_dim(),
        max_abs_diff,
        "ONNX output matches reference"
    );
    Ok(max_abs_diff)
}

/// NaN in either input yields NaN.
fn max_abs_diff(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).fold(0.0f32, |acc, (x, y)| {
        let diff = (x - y).abs();
        if diff.is_nan() || acc.is_nan() {
            f32::NAN
        } else {
            acc.max(diff)
        }
    })
}
