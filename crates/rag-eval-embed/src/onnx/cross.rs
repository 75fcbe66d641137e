//! Cross-encoder runtime: scores (query, document) pairs jointly.

use std::path::{Path, PathBuf};

use ndarray::Array1;
use ort::session::Session;
use parking_lot::Mutex;
use tokenizers::Tokenizer;
use tracing::{debug, info};

use rag_eval_core::options::{BATCH_SIZE, TRUST_REMOTE_CODE};
use rag_eval_core::{Options, RagError, Result, Scores};

use super::{build_session, find_onnx_file, load_tokenizer, run_batch, BatchInputs, ModelConfig};
use crate::runtime::PairScorer;

/// Encode option selecting the score activation: `sigmoid` or `identity`.
pub const ACTIVATION: &str = "activation";

const DEFAULT_BATCH_SIZE: usize = 32;

/// Cross-encoder re-ranking model.
pub struct CrossEncoder {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    max_length: usize,
    use_token_type_ids: bool,
    model_dir: PathBuf,
}

impl std::fmt::Debug for CrossEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrossEncoder")
            .field("model_dir", &self.model_dir)
            .field("max_length", &self.max_length)
            .finish()
    }
}

impl CrossEncoder {
    /// Load a cross-encoder, truncating each pair to `max_length` tokens.
    pub fn load(model_dir: &Path, model_options: &Options, max_length: usize) -> Result<Self> {
        if !model_dir.is_dir() {
            return Err(RagError::model_load(
                model_dir.display().to_string(),
                "model directory does not exist",
            ));
        }
        if max_length == 0 {
            return Err(RagError::invalid_argument("max_length must be positive"));
        }

        let config = ModelConfig::load(model_dir)?;
        let tokenizer = load_tokenizer(model_dir, max_length)?;
        let onnx_path = find_onnx_file(model_dir, model_options)?;
        let session = build_session(&onnx_path, model_options)?;

        info!(
            "Cross-encoder initialized: max_length={}, trust_remote_code={}",
            max_length,
            model_options.get_bool(TRUST_REMOTE_CODE).unwrap_or(false)
        );

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            max_length,
            use_token_type_ids: config.wants_token_type_ids(model_options),
            model_dir: model_dir.to_path_buf(),
        })
    }

    fn score_batch(&self, pairs: &[(String, String)]) -> Result<Vec<f32>> {
        let encodings = self
            .tokenizer
            .encode_batch(pairs.to_vec(), true)
            .map_err(|e| RagError::tokenization(format!("Tokenization failed: {}", e)))?;
        let inputs = BatchInputs::from_encodings(&encodings);

        debug!(
            "Scoring batch: size={}, max_len={}",
            inputs.batch_size, inputs.seq_len
        );

        let logits = run_batch(&self.session, &inputs, self.use_token_type_ids, &["logits"])?;

        // logits shape: [batch_size, 1] or [batch_size]
        let shape = logits.shape().to_vec();
        let single_label = match shape.as_slice() {
            [n, 1] | [n] => *n == pairs.len(),
            _ => false,
        };
        if !single_label {
            return Err(RagError::contract(format!(
                "expected one logit per pair for {} pairs, got shape {:?}",
                pairs.len(),
                shape
            )));
        }

        Ok(logits.iter().copied().collect())
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Apply the configured activation to raw logits.
fn activate(logits: Vec<f32>, options: &Options) -> Result<Vec<f32>> {
    match options.get_str(ACTIVATION).unwrap_or("sigmoid") {
        "sigmoid" => Ok(logits.into_iter().map(sigmoid).collect()),
        "identity" => Ok(logits),
        other => Err(RagError::invalid_argument(format!(
            "unknown activation '{}'",
            other
        ))),
    }
}

impl PairScorer for CrossEncoder {
    fn predict(&self, pairs: &[(String, String)], options: &Options) -> Result<Scores> {
        if pairs.is_empty() {
            return Ok(Array1::zeros(0));
        }

        let batch_size = options.get_usize(BATCH_SIZE).unwrap_or(DEFAULT_BATCH_SIZE);
        let mut logits = Vec::with_capacity(pairs.len());
        for chunk in pairs.chunks(batch_size) {
            logits.extend(self.score_batch(chunk)?);
        }

        Ok(Array1::from_vec(activate(logits, options)?))
    }
}
