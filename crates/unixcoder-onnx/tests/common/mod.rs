use candle_core::{DType, Device};
use candle_nn::{Init, VarMap};
use std::path::Path;
use unixcoder_onnx::{ExportConfig, RobertaConfig};

pub const HIDDEN_SIZE: usize = 16;

pub fn tiny_config() -> RobertaConfig {
    RobertaConfig {
        vocab_size: 24,
        hidden_size: HIDDEN_SIZE,
        num_hidden_layers: 2,
        num_attention_heads: 4,
        intermediate_size: 32,
        max_position_embeddings: 40,
        type_vocab_size: 1,
        ..Default::default()
    }
}

/// Lays out a hub-style model directory: `config.json`, `model.safetensors`,
/// `vocab.json` and `merges.txt`.
pub fn write_tiny_model(dir: &Path) -> anyhow::Result<()> {
    let config = tiny_config();
    std::fs::write(dir.join("config.json"), serde_json::to_string_pretty(&config)?)?;

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
        for (name, in_dim, out_dim) in [
            ("attention.self.query", h, h),
            ("attention.self.key", h, h),
            ("attention.self.value", h, h),
            ("attention.output.dense", h, h),
            ("intermediate.dense", h, config.intermediate_size),
            ("output.dense", config.intermediate_size, h),
        ] {
            add(format!("{}.{}.weight", p, name), vec![out_dim, in_dim], weight)?;
            add(format!("{}.{}.bias", p, name), vec![out_dim], bias)?;
        }
        for norm in ["attention.output.LayerNorm", "output.LayerNorm"] {
            add(format!("{}.{}.weight", p, norm), vec![h], Init::Const(1.0))?;
            add(format!("{}.{}.bias", p, norm), vec![h], bias)?;
        }
    }
    varmap.save(dir.join("model.safetensors"))?;

    std::fs::write(
        dir.join("vocab.json"),
        r#"{
            "<s>": 0, "<pad>": 1, "</s>": 2, "<unk>": 3, "<mask>": 4,
            "h": 5, "e": 6, "l": 7, "o": 8, "Ġ": 9, "w": 10, "r": 11, "d": 12,
            "he": 13, "ll": 14, "hell": 15, "hello": 16, "Ġw": 17, "or": 18,
            "Ġwor": 19, "Ġworl": 20, "Ġworld": 21
        }"#,
    )?;
    std::fs::write(
        dir.join("merges.txt"),
        "#version: 0.2\nh e\nl l\nhe ll\nhell o\nĠ w\no r\nĠw or\nĠwor l\nĠworl d\n",
    )?;
    Ok(())
}

/// Export settings pointing at a tiny model in `model_dir`.
pub fn tiny_export_config(model_dir: &Path, output_dir: &Path) -> ExportConfig {
    ExportConfig {
        model_id: "tiny-roberta".to_string(),
        max_length: 32,
        sample_text: "hello world hello world".to_string(),
        ..ExportConfig::default()
    }
    .with_local_model(model_dir)
    .with_output_dir(output_dir)
}
