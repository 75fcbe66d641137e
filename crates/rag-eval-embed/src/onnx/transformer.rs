//! Transformer stage: tokenizer plus ONNX encoder graph.

use std::path::{Path, PathBuf};

use ndarray::{Array2, Array3, Ix2, Ix3};
use ort::session::Session;
use parking_lot::Mutex;
use tokenizers::Tokenizer;
use tracing::{debug, info};

use rag_eval_core::{Options, RagError, Result};

use super::{build_session, find_onnx_file, load_tokenizer, run_batch, set_truncation};
use super::{BatchInputs, ModelConfig};

/// Config option overriding the hidden size read from `config.json`.
pub const HIDDEN_SIZE: &str = "hidden_size";

/// Output names that carry per-token vectors.
const TOKEN_OUTPUTS: &[&str] = &["last_hidden_state", "token_embeddings"];

/// Output name that carries an already pooled vector.
const SENTENCE_OUTPUT: &str = "sentence_embedding";

/// What the encoder graph produced for a batch.
#[derive(Debug, Clone)]
pub enum TransformerOutput {
    /// Per-token vectors `[batch, seq, hidden]` with the attention mask `[batch, seq]`.
    Tokens {
        hidden: Array3<f32>,
        mask: Array2<f32>,
    },

    /// The graph pools internally: `[batch, hidden]`.
    Pooled(Array2<f32>),
}

/// Word-embedding stage of a sentence transformer.
pub struct Transformer {
    /// ONNX inference session (wrapped in Mutex for interior mutability).
    session: Mutex<Session>,

    /// Tokenizer for the model.
    tokenizer: Tokenizer,

    /// Output width per token.
    hidden_size: usize,

    /// Maximum token count.
    max_seq_length: usize,

    /// Feed `token_type_ids` to the graph.
    use_token_type_ids: bool,

    model_dir: PathBuf,
}

impl std::fmt::Debug for Transformer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transformer")
            .field("model_dir", &self.model_dir)
            .field("hidden_size", &self.hidden_size)
            .field("max_seq_length", &self.max_seq_length)
            .field("use_token_type_ids", &self.use_token_type_ids)
            .finish()
    }
}

impl Transformer {
    /// Load the stage from a model directory.
    ///
    /// `config_options` may override `hidden_size`; `model_options` selects the
    /// graph file, thread count and whether `token_type_ids` are fed.
    pub fn load(model_dir: &Path, config_options: &Options, model_options: &Options) -> Result<Self> {
        if !model_dir.is_dir() {
            return Err(RagError::model_load(
                model_dir.display().to_string(),
                "model directory does not exist",
            ));
        }

        let config = ModelConfig::load(model_dir)?;
        let hidden_size = config_options
            .get_usize(HIDDEN_SIZE)
            .or(config.hidden_size)
            .ok_or_else(|| {
                RagError::model_load(
                    model_dir.display().to_string(),
                    "hidden_size missing from config.json",
                )
            })?;

        let max_seq_length = 512;
        let tokenizer = load_tokenizer(model_dir, max_seq_length)?;
        let onnx_path = find_onnx_file(model_dir, model_options)?;
        let session = build_session(&onnx_path, model_options)?;

        info!(
            "Transformer initialized: dim={}, arch={:?}",
            hidden_size, config.model_type
        );

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            hidden_size,
            max_seq_length,
            use_token_type_ids: config.wants_token_type_ids(model_options),
            model_dir: model_dir.to_path_buf(),
        })
    }

    /// Output width per token.
    pub fn word_embedding_dimension(&self) -> usize {
        self.hidden_size
    }

    pub fn max_seq_length(&self) -> usize {
        self.max_seq_length
    }

    pub fn set_max_seq_length(&mut self, max_seq_length: usize) -> Result<()> {
        if max_seq_length == 0 {
            return Err(RagError::invalid_argument("max_seq_length must be positive"));
        }
        set_truncation(&mut self.tokenizer, max_seq_length)?;
        self.max_seq_length = max_seq_length;
        Ok(())
    }

    /// Run one batch through the encoder graph.
    pub fn forward(&self, texts: &[String]) -> Result<TransformerOutput> {
        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| RagError::tokenization(format!("Tokenization failed: {}", e)))?;
        let inputs = BatchInputs::from_encodings(&encodings);

        debug!(
            "Embedding batch: size={}, max_len={}",
            inputs.batch_size, inputs.seq_len
        );

        let mut preferred = TOKEN_OUTPUTS.to_vec();
        preferred.push(SENTENCE_OUTPUT);
        let output = run_batch(&self.session, &inputs, self.use_token_type_ids, &preferred)?;

        match output.ndim() {
            3 => {
                let hidden = output
                    .into_dimensionality::<Ix3>()
                    .map_err(|e| RagError::contract(format!("bad token output: {}", e)))?;
                Ok(TransformerOutput::Tokens {
                    hidden,
                    mask: inputs.mask_f32(),
                })
            }
            2 => {
                let pooled = output
                    .into_dimensionality::<Ix2>()
                    .map_err(|e| RagError::contract(format!("bad pooled output: {}", e)))?;
                Ok(TransformerOutput::Pooled(pooled))
            }
            _ => Err(RagError::contract(format!(
                "Unexpected output shape: {:?}",
                output.shape()
            ))),
        }
    }
}
