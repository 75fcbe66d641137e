//! Composite sentence transformer: transformer, pooling, optional normalization.

use std::path::Path;

use ndarray::{concatenate, Array2, Axis};
use serde::Deserialize;
use tracing::{debug, info};

use rag_eval_core::options::BATCH_SIZE;
use rag_eval_core::tensor::l2_normalize_rows;
use rag_eval_core::{Embeddings, Options, PoolingMode, RagError, Result};

use super::{Pooling, Transformer, TransformerOutput};
use crate::runtime::SentenceEncoder;

/// Encode option toggling unit-length output.
pub const NORMALIZE_EMBEDDINGS: &str = "normalize_embeddings";

const DEFAULT_BATCH_SIZE: usize = 32;

/// One entry of `modules.json`.
#[derive(Debug, Deserialize)]
struct ModuleEntry {
    #[serde(rename = "type", default)]
    module_type: String,
}

/// A transformer stage followed by a pooling stage.
#[derive(Debug)]
pub struct SentenceTransformer {
    transformer: Transformer,
    pooling: Pooling,
    /// Pooling was requested by the caller rather than read from the model.
    explicit_pooling: bool,
    normalize: bool,
}

impl SentenceTransformer {
    /// Build the pipeline the model directory describes.
    ///
    /// Pooling comes from `1_Pooling/config.json` (mean when absent) and a
    /// `Normalize` entry in `modules.json` turns on L2 normalization.
    pub fn load(model_dir: &Path, config_options: &Options, model_options: &Options) -> Result<Self> {
        let transformer = Transformer::load(model_dir, config_options, model_options)?;
        let dimension = transformer.word_embedding_dimension();
        let pooling = Pooling::from_model_dir(model_dir, dimension)?
            .unwrap_or_else(|| Pooling::new(dimension, PoolingMode::Mean));
        let normalize = lists_normalize_module(model_dir)?;

        info!(
            "Sentence transformer ready: pooling={}, normalize={}",
            pooling.mode(),
            normalize
        );

        Ok(Self {
            transformer,
            pooling,
            explicit_pooling: false,
            normalize,
        })
    }

    /// Assemble a pipeline from explicit stages.
    ///
    /// Encoding fails if the graph already pools its output, since the
    /// requested pooling could not be applied.
    pub fn from_modules(transformer: Transformer, pooling: Pooling) -> Self {
        Self {
            transformer,
            pooling,
            explicit_pooling: true,
            normalize: false,
        }
    }

    pub fn with_normalize(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }

    fn encode_batch(&self, texts: &[String]) -> Result<Embeddings> {
        let output = self.transformer.forward(texts)?;
        pool_output(output, &self.pooling, self.explicit_pooling)
    }
}

/// Reduce a transformer output to one row per input.
fn pool_output(output: TransformerOutput, pooling: &Pooling, explicit: bool) -> Result<Embeddings> {
    match output {
        TransformerOutput::Tokens { hidden, mask } => pooling.pool(&hidden, &mask),
        TransformerOutput::Pooled(_) if explicit => Err(RagError::contract(format!(
            "pooling mode {} was requested, but the model outputs pooled sentence embeddings",
            pooling.mode()
        ))),
        TransformerOutput::Pooled(pooled) => Ok(pooled),
    }
}

fn lists_normalize_module(model_dir: &Path) -> Result<bool> {
    let path = model_dir.join("modules.json");
    if !path.exists() {
        return Ok(false);
    }
    let content = std::fs::read_to_string(&path)?;
    let modules: Vec<ModuleEntry> = serde_json::from_str(&content).map_err(|e| {
        RagError::model_load(path.display().to_string(), format!("invalid modules.json: {}", e))
    })?;
    Ok(modules.iter().any(|m| m.module_type.ends_with("Normalize")))
}

impl SentenceEncoder for SentenceTransformer {
    fn encode(
        &self,
        texts: &[String],
        prompt: Option<&str>,
        options: &Options,
    ) -> Result<Embeddings> {
        if texts.is_empty() {
            return Ok(Array2::zeros((0, self.dimension())));
        }

        let batch_size = options.get_usize(BATCH_SIZE).unwrap_or(DEFAULT_BATCH_SIZE);
        let normalize = options.get_bool(NORMALIZE_EMBEDDINGS).unwrap_or(self.normalize);

        let inputs: Vec<String> = match prompt.filter(|p| !p.is_empty()) {
            Some(prompt) => texts.iter().map(|t| format!("{}{}", prompt, t)).collect(),
            None => texts.to_vec(),
        };

        let mut batches = Vec::with_capacity(inputs.len().div_ceil(batch_size));
        for chunk in inputs.chunks(batch_size) {
            batches.push(self.encode_batch(chunk)?);
        }
        debug!("Encoded {} texts in {} batches", inputs.len(), batches.len());

        let views: Vec<_> = batches.iter().map(|b| b.view()).collect();
        let mut embeddings = concatenate(Axis(0), &views)
            .map_err(|e| RagError::contract(format!("batch widths differ: {}", e)))?;

        if normalize {
            l2_normalize_rows(&mut embeddings);
        }
        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        self.pooling.dimension()
    }

    fn max_seq_length(&self) -> usize {
        self.transformer.max_seq_length()
    }

    fn set_max_seq_length(&mut self, max_seq_length: usize) -> Result<()> {
        self.transformer.set_max_seq_length(max_seq_length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array3};

    #[test]
    fn test_pooled_output_passes_through_model_pooling() {
        let pooling = Pooling::new(2, PoolingMode::Mean);
        let pooled = array![[0.5f32, 0.5], [1.0, 0.0]];
        let out = pool_output(TransformerOutput::Pooled(pooled.clone()), &pooling, false).unwrap();
        assert_eq!(out, pooled);
    }

    #[test]
    fn test_pooled_output_rejects_requested_pooling() {
        let pooling = Pooling::new(2, PoolingMode::Cls);
        let pooled = array![[0.5f32, 0.5]];
        let err = pool_output(TransformerOutput::Pooled(pooled), &pooling, true).unwrap_err();
        assert_eq!(err.error_code(), "CONTRACT_VIOLATION");
        assert!(err.to_string().contains("cls"));
    }

    #[test]
    fn test_token_output_uses_requested_pooling() {
        let pooling = Pooling::new(2, PoolingMode::Cls);
        let hidden = Array3::from_shape_vec((1, 2, 2), vec![1.0f32, 2.0, 3.0, 4.0]).unwrap();
        let mask = array![[1.0f32, 1.0]];
        let out = pool_output(TransformerOutput::Tokens { hidden, mask }, &pooling, true).unwrap();
        assert_eq!(out, array![[1.0f32, 2.0]]);
    }

    #[test]
    fn test_normalize_module_detection() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!lists_normalize_module(dir.path()).unwrap());

        std::fs::write(
            dir.path().join("modules.json"),
            r#"[
                {"idx": 0, "name": "0", "path": "", "type": "sentence_transformers.models.Transformer"},
                {"idx": 1, "name": "1", "path": "1_Pooling", "type": "sentence_transformers.models.Pooling"},
                {"idx": 2, "name": "2", "path": "2_Normalize", "type": "sentence_transformers.models.Normalize"}
            ]"#,
        )
        .unwrap();
        assert!(lists_normalize_module(dir.path()).unwrap());
    }

    #[test]
    fn test_invalid_modules_json() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("modules.json"), "{not json").unwrap();
        assert_eq!(
            lists_normalize_module(dir.path()).unwrap_err().error_code(),
            "MODEL_LOAD_ERROR"
        );
    }
}
