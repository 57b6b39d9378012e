use candle_core::{DType, Device, Tensor};
use tokenizers::models::bpe::BPE;
use tokenizers::Tokenizer;
use tracing::debug;

use crate::{ExportError, ModelSource, Result};

/// Runtime components the export pipeline needs before it touches the filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Numeric tensor runtime
    TensorRuntime,
    /// Neural-network building blocks (layer norm, softmax)
    NeuralModules,
    /// Pretrained model and tokenizer loader
    PretrainedLoader,
    /// Portable inference engine for the exported graph
    InferenceEngine,
}

impl Capability {
    /// Probe order.
    pub const ALL: [Capability; 4] = [
        Capability::TensorRuntime,
        Capability::NeuralModules,
        Capability::PretrainedLoader,
        Capability::InferenceEngine,
    ];

    /// Name of the package providing this capability, used in failure reports.
    pub fn package(&self) -> &'static str {
        match self {
            Capability::TensorRuntime => "candle-core",
            Capability::NeuralModules => "candle-nn",
            Capability::PretrainedLoader => "hf-hub",
            Capability::InferenceEngine => "onnxruntime",
        }
    }
}

pub trait DependencyProbe {
    /// Tries to acquire one capability, returning the failure text if it is missing.
    fn acquire(&self, capability: Capability) -> std::result::Result<(), String>;

    /// Acquires every capability in order and stops at the first one missing.
    fn check_all(&self) -> Result<()> {
        for capability in Capability::ALL {
            self.acquire(capability)
                .map_err(|reason| ExportError::DependencyUnavailable {
                    name: capability.package(),
                    reason,
                })?;
            debug!(package = capability.package(), "Capability acquired");
        }
        Ok(())
    }
}

/// Probe that exercises the linked libraries for real.
pub struct RuntimeProbe {
    source: ModelSource,
}

impl RuntimeProbe {
    pub fn new(source: ModelSource) -> Self {
        Self { source }
    }
}

impl DependencyProbe for RuntimeProbe {
    fn acquire(&self, capability: Capability) -> std::result::Result<(), String> {
        match capability {
            Capability::TensorRuntime => {
                let total = Tensor::arange(0f32, 4f32, &Device::Cpu)
                    .and_then(|t| t.sum_all())
                    .and_then(|t| t.to_scalar::<f32>())
                    .map_err(|e| e.to_string())?;
                if total != 6.0 {
                    return Err(format!("tensor self-check returned {}", total));
                }
                Ok(())
            }
            Capability::NeuralModules => Tensor::zeros((1, 2), DType::F32, &Device::Cpu)
                .and_then(|t| candle_nn::ops::softmax_last_dim(&t))
                .map(|_| ())
                .map_err(|e| e.to_string()),
            Capability::PretrainedLoader => {
                acquire_tokenizer_library()?;
                match &self.source {
                    ModelSource::Hub(_) => hf_hub::api::sync::Api::new()
                        .map(|_| ())
                        .map_err(|e| e.to_string()),
                    // Local directories are read with std::fs and need no hub client
                    ModelSource::Local(_) => Ok(()),
                }
            }
            Capability::InferenceEngine => ort::session::Session::builder()
                .map(|_| ())
                .map_err(|e| e.to_string()),
        }
    }
}

/// Builds and runs an empty byte-level BPE tokenizer.
fn acquire_tokenizer_library() -> std::result::Result<(), String> {
    let bpe = BPE::builder().build().map_err(|e| e.to_string())?;
    let tokenizer = Tokenizer::new(bpe);
    let encoding = tokenizer.encode("", false).map_err(|e| e.to_string())?;
    if !encoding.get_ids().is_empty() {
        return Err("tokenizer self-check produced tokens for empty input".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct ScriptedProbe {
        missing: Option<Capability>,
        seen: RefCell<Vec<Capability>>,
    }

    impl DependencyProbe for ScriptedProbe {
        fn acquire(&self, capability: Capability) -> std::result::Result<(), String> {
            self.seen.borrow_mut().push(capability);
            if self.missing == Some(capability) {
                Err(format!("No module named '{}'", capability.package()))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_all_capabilities_present() {
        let probe = ScriptedProbe {
            missing: None,
            seen: RefCell::new(Vec::new()),
        };
        assert!(probe.check_all().is_ok());
        assert_eq!(*probe.seen.borrow(), Capability::ALL.to_vec());
    }

    #[test]
    fn test_missing_capability_stops_checks() {
        let probe = ScriptedProbe {
            missing: Some(Capability::PretrainedLoader),
            seen: RefCell::new(Vec::new()),
        };
        let err = probe.check_all().unwrap_err();
        assert!(err.is_dependency_unavailable());
        assert!(err.to_string().contains("hf-hub"));
        // The inference engine is never reached
        assert_eq!(probe.seen.borrow().len(), 3);
    }

    #[test]
    fn test_runtime_tensor_capabilities() {
        let probe = RuntimeProbe::new(ModelSource::Local("models".into()));
        assert!(probe.acquire(Capability::TensorRuntime).is_ok());
        assert!(probe.acquire(Capability::NeuralModules).is_ok());
        assert!(probe.acquire(Capability::PretrainedLoader).is_ok());
    }

    #[test]
    fn test_tokenizer_library_is_exercised() {
        assert_eq!(acquire_tokenizer_library(), Ok(()));
    }
}
