use candle_core::{Device, Tensor};
use ndarray::Array2;
use std::collections::HashMap;
use std::path::Path;
use tokenizers::decoders::byte_level::ByteLevel;
use tokenizers::models::bpe::BPE;
use tokenizers::processors::roberta::RobertaProcessing;
use tokenizers::{
    AddedToken, PaddingParams, PaddingStrategy, Tokenizer, TruncationParams,
};
use tracing::{debug, info};

use crate::{ExportError, Result, TokenizerFiles};

const CLS_TOKEN: &str = "<s>";
const SEP_TOKEN: &str = "</s>";
const PAD_TOKEN: &str = "<pad>";
const UNK_TOKEN: &str = "<unk>";
const MASK_TOKEN: &str = "<mask>";

/// Byte-level BPE tokenizer configured with padding and truncation for export.
pub struct CodeTokenizer {
    tokenizer: Tokenizer,
}

impl CodeTokenizer {
    pub fn load(files: &TokenizerFiles, max_length: usize) -> Result<Self> {
        match files {
            TokenizerFiles::Serialized(path) => Self::from_file(path, max_length),
            TokenizerFiles::VocabMerges {
                vocab,
                merges,
                added_tokens,
            } => Self::from_vocab_merges(vocab, merges, added_tokens.as_deref(), max_length),
        }
    }

    /// Loads a serialized `tokenizer.json`.
    pub fn from_file(path: impl AsRef<Path>, max_length: usize) -> Result<Self> {
        let tokenizer = Tokenizer::from_file(path.as_ref())
            .map_err(|e| ExportError::Tokenization(format!("Failed to load tokenizer: {}", e)))?;
        Self::configure(tokenizer, max_length)
    }

    /// Builds the RoBERTa fast tokenizer from `vocab.json` and `merges.txt`.
    ///
    /// Entries of `added_tokens.json` become special tokens under the ids they
    /// declare; an id already taken by another token is rejected.
    pub fn from_vocab_merges(
        vocab: &Path,
        merges: &Path,
        added_tokens: Option<&Path>,
        max_length: usize,
    ) -> Result<Self> {
        let (mut vocab, merges) = BPE::read_file(&vocab.to_string_lossy(), &merges.to_string_lossy())
            .map_err(|e| ExportError::Tokenization(format!("Failed to read BPE files: {}", e)))?;

        let declared = match added_tokens {
            Some(path) => read_added_tokens(path)?,
            None => Vec::new(),
        };
        for (token, id) in &declared {
            let holder = vocab.iter().find(|(_, v)| **v == *id).map(|(t, _)| t.clone());
            match (vocab.get(token).copied(), holder) {
                (Some(existing), _) if existing != *id => {
                    return Err(ExportError::Tokenization(format!(
                        "Added token {} declares id {} but the vocabulary maps it to {}",
                        token, id, existing
                    )));
                }
                (None, Some(other)) => {
                    return Err(ExportError::Tokenization(format!(
                        "Added token {} declares id {} already used by {}",
                        token, id, other
                    )));
                }
                _ => {
                    vocab.insert(token.clone(), *id);
                }
            }
        }

        let bpe = BPE::builder()
            .vocab_and_merges(vocab, merges)
            .unk_token(UNK_TOKEN.to_string())
            .build()
            .map_err(|e| ExportError::Tokenization(format!("Failed to build BPE model: {}", e)))?;

        let mut tokenizer = Tokenizer::new(bpe);
        let cls_id = required_id(&tokenizer, CLS_TOKEN)?;
        let sep_id = required_id(&tokenizer, SEP_TOKEN)?;
        // Registering <pad> below would otherwise give it a fresh id
        required_id(&tokenizer, PAD_TOKEN)?;

        tokenizer.with_pre_tokenizer(Some(ByteLevel::default().add_prefix_space(false)));
        tokenizer.with_decoder(Some(ByteLevel::default().add_prefix_space(false)));
        tokenizer.with_post_processor(Some(
            RobertaProcessing::new((SEP_TOKEN.to_string(), sep_id), (CLS_TOKEN.to_string(), cls_id))
                .trim_offsets(true)
                .add_prefix_space(false),
        ));

        let mut special = vec![
            AddedToken::from(CLS_TOKEN, true),
            AddedToken::from(PAD_TOKEN, true),
            AddedToken::from(SEP_TOKEN, true),
            AddedToken::from(UNK_TOKEN, true),
            AddedToken::from(MASK_TOKEN, true).lstrip(true),
        ];
        debug!(count = declared.len(), "Registering added tokens");
        special.extend(declared.iter().map(|(token, _)| AddedToken::from(token.clone(), true)));
        tokenizer.add_special_tokens(&special);

        for (token, id) in &declared {
            let assigned = tokenizer.token_to_id(token);
            if assigned != Some(*id) {
                return Err(ExportError::Tokenization(format!(
                    "Added token {} was assigned {:?} instead of {}",
                    token, assigned, id
                )));
            }
        }

        Self::configure(tokenizer, max_length)
    }

    fn configure(mut tokenizer: Tokenizer, max_length: usize) -> Result<Self> {
        let pad_id = required_id(&tokenizer, PAD_TOKEN)?;
        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            pad_id,
            pad_token: PAD_TOKEN.to_string(),
            ..Default::default()
        }));
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length,
                ..Default::default()
            }))
            .map_err(|e| ExportError::Tokenization(format!("Invalid truncation: {}", e)))?;

        info!(
            vocab_size = tokenizer.get_vocab_size(true),
            max_length, "Tokenizer ready"
        );
        Ok(Self { tokenizer })
    }

    pub fn pad_id(&self) -> Option<u32> {
        self.tokenizer.token_to_id(PAD_TOKEN)
    }

    /// Encodes one text with special tokens, truncated to `max_length`.
    pub fn encode(&self, text: &str) -> Result<TokenizedSample> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| ExportError::Tokenization(format!("Failed to encode text: {}", e)))?;
        debug!(tokens = encoding.get_ids().len(), "Encoded sample text");
        TokenizedSample::new(
            encoding.get_ids().to_vec(),
            encoding.get_attention_mask().to_vec(),
        )
    }

    /// Writes the full tokenizer state, including padding and truncation, as JSON.
    pub fn save_snapshot(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.tokenizer
            .save(path, true)
            .map_err(|e| ExportError::Tokenization(format!("Failed to save tokenizer: {}", e)))?;
        info!(path = %path.display(), "Saved tokenizer snapshot");
        Ok(())
    }
}

/// `added_tokens.json` entries ordered by id.
fn read_added_tokens(path: &Path) -> Result<Vec<(String, u32)>> {
    let declared: HashMap<String, u32> = serde_json::from_str(&std::fs::read_to_string(path)?)?;
    let mut declared: Vec<(String, u32)> = declared.into_iter().collect();
    declared.sort_by_key(|(_, id)| *id);
    Ok(declared)
}

fn required_id(tokenizer: &Tokenizer, token: &str) -> Result<u32> {
    tokenizer
        .token_to_id(token)
        .ok_or_else(|| ExportError::Tokenization(format!("Vocabulary has no {} token", token)))
}

/// Token ids and attention mask for a single sequence, shape `[1, len]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizedSample {
    input_ids: Vec<u32>,
    attention_mask: Vec<u32>,
}

impl TokenizedSample {
    pub fn new(input_ids: Vec<u32>, attention_mask: Vec<u32>) -> Result<Self> {
        if input_ids.len() != attention_mask.len() {
            return Err(ExportError::Tokenization(format!(
                "{} ids but {} mask entries",
                input_ids.len(),
                attention_mask.len()
            )));
        }
        if input_ids.is_empty() {
            return Err(ExportError::Tokenization("Empty token sequence".to_string()));
        }
        Ok(Self {
            input_ids,
            attention_mask,
        })
    }

    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }

    pub fn input_ids(&self) -> &[u32] {
        &self.input_ids
    }

    pub fn attention_mask(&self) -> &[u32] {
        &self.attention_mask
    }

    /// `(batch, sequence)`
    pub fn shape(&self) -> (usize, usize) {
        (1, self.len())
    }

    /// `u32` tensors for the in-process encoder.
    pub fn to_tensors(&self, device: &Device) -> Result<(Tensor, Tensor)> {
        let ids = Tensor::from_slice(&self.input_ids, self.shape(), device)?;
        let mask = Tensor::from_slice(&self.attention_mask, self.shape(), device)?;
        Ok((ids, mask))
    }

    /// `i64` arrays matching the exported graph inputs.
    pub fn to_arrays(&self) -> Result<(Array2<i64>, Array2<i64>)> {
        let widen = |values: &[u32]| -> Result<Array2<i64>> {
            Array2::from_shape_vec(self.shape(), values.iter().map(|&v| v as i64).collect())
                .map_err(|e| ExportError::Inference(e.to_string()))
        };
        Ok((widen(&self.input_ids)?, widen(&self.attention_mask)?))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::Path;

    /// A byte-level BPE table just large enough to spell "hello world".
    pub const VOCAB_JSON: &str = r#"{
        "<s>": 0, "<pad>": 1, "</s>": 2, "<unk>": 3, "<mask>": 4,
        "h": 5, "e": 6, "l": 7, "o": 8, "Ġ": 9, "w": 10, "r": 11, "d": 12,
        "he": 13, "ll": 14, "hell": 15, "hello": 16, "Ġw": 17, "or": 18,
        "Ġwor": 19, "Ġworl": 20, "Ġworld": 21
    }"#;

    pub const MERGES_TXT: &str =
        "#version: 0.2\nh e\nl l\nhe ll\nhell o\nĠ w\no r\nĠw or\nĠwor l\nĠworl d\n";

    pub fn write_vocab(dir: &Path) -> std::io::Result<()> {
        std::fs::write(dir.join("vocab.json"), VOCAB_JSON)?;
        std::fs::write(dir.join("merges.txt"), MERGES_TXT)
    }
}
