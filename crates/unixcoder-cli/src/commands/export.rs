use tracing::info;
use unixcoder_onnx::ExportConfig;

/// Runs the export pipeline. A missing runtime dependency has already been
/// reported on stdout by the pipeline and is not treated as a failure.
pub fn execute(config: &ExportConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        model_id = %config.model_id,
        output_dir = %config.output_dir.display(),
        max_length = config.max_length,
        "Starting export"
    );

    if unixcoder_onnx::run(config)? {
        println!("Exported {} to {}", config.model_id, config.output_dir.display());
        println!("    {}", config.onnx_path().display());
        println!("    {}", config.tokenizer_path().display());
        println!("    {}", config.manifest_path().display());
    }
    Ok(())
}
