use candle_core::Device;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::model::{Embedder, RobertaConfig, RobertaEncoder};
use crate::{
    check_parity, export_model, run_onnx, CodeTokenizer, DependencyProbe, ExportConfig,
    ExportError, Manifest, ModelFiles, ModelSource, Result, RuntimeProbe,
};

/// Where the artifacts of a successful run were written.
#[derive(Debug, Clone)]
pub struct ExportReport {
    pub onnx_path: PathBuf,
    pub tokenizer_path: PathBuf,
    pub manifest_path: PathBuf,
    pub manifest: Manifest,
    /// Largest difference between the runtime output and the in-process embedding
    pub max_abs_diff: f32,
}

/// Runs the export with the libraries linked into this binary.
///
/// Returns `Ok(false)` after printing `Missing package: <error>` when a
/// runtime component is unavailable. Every other failure is an error.
pub fn run(config: &ExportConfig) -> Result<bool> {
    let probe = RuntimeProbe::new(config.source.clone());
    run_with_probe(config, &probe)
}

pub fn run_with_probe(config: &ExportConfig, probe: &dyn DependencyProbe) -> Result<bool> {
    if let Err(err) = probe.check_all() {
        if err.is_dependency_unavailable() {
            warn!(error = %err, "Export skipped");
            println!("{}", missing_package_line(&err));
            return Ok(false);
        }
        return Err(err);
    }

    let report = export(config)?;
    info!(
        onnx = %report.onnx_path.display(),
        tokenizer = %report.tokenizer_path.display(),
        manifest = %report.manifest_path.display(),
        "Export complete"
    );
    Ok(true)
}

/// Console report for a dependency that could not be acquired.
fn missing_package_line(err: &ExportError) -> String {
    format!("Missing package: {}", err)
}

/// Loads the encoder, exports and validates the graph, then writes the
/// tokenizer snapshot and manifest. Artifacts written before a failure stay on disk.
pub fn export(config: &ExportConfig) -> Result<ExportReport> {
    if config.max_length == 0 {
        return Err(ExportError::Config("max_length must be positive".to_string()));
    }

    // The manifest would replace the encoder's own config.json
    if let ModelSource::Local(model_dir) = &config.source {
        if same_directory(model_dir, &config.output_dir) {
            return Err(ExportError::Config(format!(
                "Output directory {} is the model directory",
                config.output_dir.display()
            )));
        }
    }

    let files = ModelFiles::resolve(&config.source)?;
    let roberta = RobertaConfig::from_file(&files.config)?;
    // Positions are offset past the padding id
    let max_positions = roberta.max_position_embeddings;
    if config.max_length + roberta.pad_token_id as usize + 1 > max_positions {
        return Err(ExportError::Config(format!(
            "max_length {} exceeds the {} position embeddings",
            config.max_length, max_positions
        )));
    }

    let device = Device::Cpu;
    let encoder = RobertaEncoder::load(&files.weights, &roberta, &device)?;
    let embedder = Embedder::new(encoder);
    info!(
        model_id = %config.model_id,
        hidden_size = embedder.hidden_size(),
        layers = roberta.num_hidden_layers,
        "Encoder loaded"
    );

    let tokenizer = CodeTokenizer::load(&files.tokenizer, config.max_length)?;
    let sample = tokenizer.encode(&config.sample_text)?;
    let (input_ids, attention_mask) = sample.to_tensors(&device)?;
    let reference = embedder.forward(&input_ids, &attention_mask)?;

    std::fs::create_dir_all(&config.output_dir)?;
    let onnx_path = config.onnx_path();
    export_model(&embedder, &onnx_path)?;

    let output = run_onnx(&onnx_path, &sample)?;
    if output.batch() != sample.shape().0 {
        return Err(ExportError::Validation(format!(
            "Output batch {} does not match input batch {}",
            output.batch(),
            sample.shape().0
        )));
    }
    let max_abs_diff = check_parity(&reference, &output, config.parity_tolerance)?;

    let tokenizer_path = config.tokenizer_path();
    tokenizer.save_snapshot(&tokenizer_path)?;

    let manifest = Manifest::new(
        config.model_id.clone(),
        config.max_length,
        output.embedding_dim(),
    );
    let manifest_path = config.manifest_path();
    manifest.write(&manifest_path)?;

    Ok(ExportReport {
        onnx_path,
        tokenizer_path,
        manifest_path,
        manifest,
        max_abs_diff,
    })
}

fn same_directory(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Capability;

    struct Missing(Capability);

    impl DependencyProbe for Missing {
        fn acquire(&self, capability: Capability) -> std::result::Result<(), String> {
            if capability == self.0 {
                Err("library not found".to_string())
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_missing_dependency_returns_false_without_writing() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let output_dir = dir.path().join("out");
        let config = ExportConfig::default().with_output_dir(&output_dir);

        for capability in Capability::ALL {
            assert!(!run_with_probe(&config, &Missing(capability))?);
        }
        assert!(!output_dir.exists());
        Ok(())
    }

    #[test]
    fn test_missing_model_directory_is_an_error() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = ExportConfig::default()
            .with_local_model(dir.path().join("absent"))
            .with_output_dir(dir.path());

        let err = export(&config).unwrap_err();
        assert!(matches!(err, ExportError::ModelLoad(_)));
        assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);
        Ok(())
    }

    #[test]
    fn test_missing_package_line_names_the_package() {
        let probe = Missing(Capability::InferenceEngine);
        let err = probe.check_all().unwrap_err();
        let line = missing_package_line(&err);
        assert!(line.starts_with("Missing package: "), "{}", line);
        assert!(line.contains("onnxruntime"), "{}", line);
        assert!(line.contains("library not found"), "{}", line);
    }

    #[test]
    fn test_output_into_model_directory_is_rejected() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let encoder_config = r#"{"hidden_size": 16, "num_attention_heads": 4}"#;
        std::fs::write(dir.path().join("config.json"), encoder_config)?;

        // Same directory spelled two ways
        let config = ExportConfig::default()
            .with_local_model(dir.path())
            .with_output_dir(dir.path().join("."));
        match export(&config) {
            Err(ExportError::Config(msg)) => assert!(msg.contains("model directory")),
            Err(e) => panic!("Unexpected error: {}", e),
            Ok(_) => panic!("Export wrote into the model directory"),
        }
        assert_eq!(std::fs::read_to_string(dir.path().join("config.json"))?, encoder_config);
        Ok(())
    }

    #[test]
    fn test_zero_max_length_is_rejected() {
        let config = ExportConfig {
            max_length: 0,
            source: ModelSource::Local("unused".into()),
            ..Default::default()
        };
        assert!(matches!(export(&config), Err(ExportError::Config(_))));
    }
}
