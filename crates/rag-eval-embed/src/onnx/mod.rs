//! ONNX Runtime implementations of the local runtimes.
//!
//! Model directories follow the sentence-transformers export layout:
//! `tokenizer.json`, `config.json`, an ONNX graph (`model.onnx` or
//! `onnx/model.onnx`), and optionally `1_Pooling/config.json` and
//! `modules.json`.

mod cross;
mod pooling;
mod sentence;
mod transformer;

pub use cross::{CrossEncoder, ACTIVATION};
pub use pooling::Pooling;
pub use sentence::{SentenceTransformer, NORMALIZE_EMBEDDINGS};
pub use transformer::{Transformer, TransformerOutput, HIDDEN_SIZE};

use std::path::{Path, PathBuf};

use ndarray::ArrayD;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use parking_lot::Mutex;
use serde::Deserialize;
use tokenizers::{Encoding, Tokenizer, TruncationParams};
use tracing::{debug, info};

use rag_eval_core::{Options, RagError, Result};

/// Model option naming a specific graph file inside the model directory.
pub const ONNX_FILE: &str = "onnx_file";

/// Model option for the number of intra-op threads.
pub const INTRA_THREADS: &str = "intra_threads";

/// Model option forcing `token_type_ids` on or off.
pub const TOKEN_TYPE_IDS: &str = "token_type_ids";

/// Graph file names tried in order when no `onnx_file` option is given.
const ONNX_CANDIDATES: &[&str] = &[
    "model.onnx",
    "onnx/model.onnx",
    "model_O4.onnx",
    "onnx/model_O4.onnx",
];

/// Architectures whose exported graphs take no `token_type_ids` input.
const NO_TOKEN_TYPE_ARCHS: &[&str] = &[
    "distilbert",
    "roberta",
    "xlm-roberta",
    "camembert",
    "mpnet",
    "bart",
];

const DEFAULT_INTRA_THREADS: usize = 4;

/// The subset of `config.json` the runtimes read.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ModelConfig {
    #[serde(default)]
    pub hidden_size: Option<usize>,

    #[serde(default)]
    pub model_type: Option<String>,
}

impl ModelConfig {
    /// Read `config.json`; a missing file yields an empty config.
    pub fn load(model_dir: &Path) -> Result<Self> {
        let path = model_dir.join("config.json");
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)?;
        serde_json::from_str(&content).map_err(|e| {
            RagError::model_load(path.display().to_string(), format!("invalid config.json: {}", e))
        })
    }

    /// Whether the graph should be fed `token_type_ids`.
    pub fn wants_token_type_ids(&self, model_options: &Options) -> bool {
        if let Some(forced) = model_options.get_bool(TOKEN_TYPE_IDS) {
            return forced;
        }
        match self.model_type.as_deref() {
            Some(arch) => !NO_TOKEN_TYPE_ARCHS.contains(&arch),
            None => true,
        }
    }
}

/// Locate the ONNX graph inside `model_dir`.
pub(crate) fn find_onnx_file(model_dir: &Path, model_options: &Options) -> Result<PathBuf> {
    if let Some(name) = model_options.get_str(ONNX_FILE) {
        let path = model_dir.join(name);
        if path.exists() {
            return Ok(path);
        }
        return Err(RagError::model_load(
            model_dir.display().to_string(),
            format!("ONNX file '{}' not found", name),
        ));
    }

    ONNX_CANDIDATES
        .iter()
        .map(|name| model_dir.join(name))
        .find(|path| path.exists())
        .ok_or_else(|| {
            RagError::model_load(model_dir.display().to_string(), "no ONNX model file found")
        })
}

/// Create an inference session for the graph at `model_path`.
pub(crate) fn build_session(model_path: &Path, model_options: &Options) -> Result<Session> {
    let threads = model_options
        .get_usize(INTRA_THREADS)
        .unwrap_or(DEFAULT_INTRA_THREADS);
    let path = model_path.display().to_string();

    info!("Loading ONNX model from {:?}", model_path);

    Session::builder()
        .map_err(|e| RagError::model_load(&path, format!("Failed to create session builder: {}", e)))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| RagError::model_load(&path, format!("Failed to set optimization level: {}", e)))?
        .with_intra_threads(threads)
        .map_err(|e| RagError::model_load(&path, format!("Failed to set thread count: {}", e)))?
        .commit_from_file(model_path)
        .map_err(|e| RagError::model_load(&path, format!("Failed to load model: {}", e)))
}

/// Load `tokenizer.json` with truncation at `max_length` tokens.
pub(crate) fn load_tokenizer(model_dir: &Path, max_length: usize) -> Result<Tokenizer> {
    let path = model_dir.join("tokenizer.json");
    info!("Loading tokenizer from {:?}", path);

    let mut tokenizer = Tokenizer::from_file(&path).map_err(|e| {
        RagError::model_load(path.display().to_string(), format!("Failed to load tokenizer: {}", e))
    })?;
    // Padding is done by hand so pad ids never reach the pooling stage unmasked.
    tokenizer.with_padding(None);
    set_truncation(&mut tokenizer, max_length)?;
    Ok(tokenizer)
}

/// Truncate inputs to `max_length` tokens, keeping special tokens.
pub(crate) fn set_truncation(tokenizer: &mut Tokenizer, max_length: usize) -> Result<()> {
    tokenizer
        .with_truncation(Some(TruncationParams {
            max_length,
            ..Default::default()
        }))
        .map_err(|e| RagError::tokenization(format!("Failed to set truncation: {}", e)))?;
    Ok(())
}

/// Padded, row-major input tensors for one batch.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct BatchInputs {
    pub batch_size: usize,
    pub seq_len: usize,
    pub input_ids: Vec<i64>,
    pub attention_mask: Vec<i64>,
    pub token_type_ids: Vec<i64>,
}

impl BatchInputs {
    /// Right-pad every encoding to the longest one in the batch.
    pub fn from_encodings(encodings: &[Encoding]) -> Self {
        let batch_size = encodings.len();
        let seq_len = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(0);

        let mut input_ids = vec![0i64; batch_size * seq_len];
        let mut attention_mask = vec![0i64; batch_size * seq_len];
        let mut token_type_ids = vec![0i64; batch_size * seq_len];

        for (i, encoding) in encodings.iter().enumerate() {
            let ids = encoding.get_ids();
            let mask = encoding.get_attention_mask();
            let types = encoding.get_type_ids();

            for j in 0..ids.len() {
                input_ids[i * seq_len + j] = ids[j] as i64;
                attention_mask[i * seq_len + j] = mask[j] as i64;
                token_type_ids[i * seq_len + j] = types[j] as i64;
            }
        }

        Self {
            batch_size,
            seq_len,
            input_ids,
            attention_mask,
            token_type_ids,
        }
    }

    /// Attention mask as floats, shaped `[batch, seq]`.
    pub fn mask_f32(&self) -> ndarray::Array2<f32> {
        ndarray::Array2::from_shape_fn((self.batch_size, self.seq_len), |(i, j)| {
            self.attention_mask[i * self.seq_len + j] as f32
        })
    }
}

/// Run a session on one batch and copy out the first matching output.
///
/// Outputs named in `preferred` are tried in order before falling back to the
/// graph's first output.
pub(crate) fn run_batch(
    session: &Mutex<Session>,
    inputs: &BatchInputs,
    with_token_types: bool,
    preferred: &[&str],
) -> Result<ArrayD<f32>> {
    let shape = vec![inputs.batch_size, inputs.seq_len];

    let input_ids = Tensor::from_array((shape.clone(), inputs.input_ids.clone()))
        .map_err(|e| RagError::inference(format!("Failed to create input tensor: {}", e)))?;
    let attention_mask = Tensor::from_array((shape.clone(), inputs.attention_mask.clone()))
        .map_err(|e| RagError::inference(format!("Failed to create mask tensor: {}", e)))?;

    let mut session = session.lock();

    let outputs = if with_token_types {
        let token_type_ids = Tensor::from_array((shape, inputs.token_type_ids.clone()))
            .map_err(|e| RagError::inference(format!("Failed to create type tensor: {}", e)))?;
        session.run(ort::inputs![
            "input_ids" => input_ids,
            "attention_mask" => attention_mask,
            "token_type_ids" => token_type_ids
        ])
    } else {
        session.run(ort::inputs![
            "input_ids" => input_ids,
            "attention_mask" => attention_mask
        ])
    }
    .map_err(|e| RagError::inference(format!("Inference failed: {}", e)))?;

    for name in preferred {
        if let Some(value) = outputs.get(*name) {
            let view = value
                .try_extract_array::<f32>()
                .map_err(|e| RagError::inference(format!("Failed to extract {}: {}", name, e)))?;
            debug!("Output {} shape: {:?}", name, view.shape());
            return Ok(view.to_owned());
        }
    }

    let (name, value) = outputs
        .iter()
        .next()
        .ok_or_else(|| RagError::contract("model produced no output tensor"))?;
    let view = value
        .try_extract_array::<f32>()
        .map_err(|e| RagError::inference(format!("Failed to extract {}: {}", name, e)))?;
    debug!("Output {} shape: {:?}", name, view.shape());
    Ok(view.to_owned())
}
