//! Local cross-encoder adapter.
//!
//! Scores (query, document) pairs jointly. It produces no standalone
//! embeddings, so the encode operations of [`EmbeddingModel`] stay
//! unimplemented for it.

use std::path::Path;

use tracing::{debug, info};

use rag_eval_core::{EmbeddingModel, EncoderSettings, Options, RagError, Result, Scores, ScoringInput};

use crate::onnx::CrossEncoder;
use crate::runtime::PairScorer;

/// Cross-encoder re-ranking model running locally.
pub struct CrossEncoderModel {
    runtime: Box<dyn PairScorer>,
    settings: EncoderSettings,
}

impl std::fmt::Debug for CrossEncoderModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrossEncoderModel")
            .field("settings", &self.settings)
            .finish()
    }
}

impl CrossEncoderModel {
    /// Load the ONNX cross-encoder from the local path in `settings`.
    pub fn new(settings: EncoderSettings) -> Result<Self> {
        settings.validate()?;
        let runtime = CrossEncoder::load(
            Path::new(&settings.identifier),
            &settings.model_options,
            settings.max_seq_length,
        )?;
        Self::with_runtime(Box::new(runtime), settings)
    }

    /// Wrap an already constructed runtime.
    pub fn with_runtime(runtime: Box<dyn PairScorer>, settings: EncoderSettings) -> Result<Self> {
        settings.validate()?;
        info!(
            "Cross-encoder ready: model={}, max_length={}",
            settings.identifier, settings.max_seq_length
        );
        Ok(Self { runtime, settings })
    }

    /// Score each input row.
    ///
    /// A retrieval triple `(query, document, instruction)` is scored as
    /// `(prompt + query, document body)`; a titled document contributes only
    /// its text. Plain pairs are scored as given.
    pub fn predict(&self, inputs: &[ScoringInput], options: &Options) -> Result<Scores> {
        let merged = self.settings.encode_options.merged(options);

        let pairs: Vec<(String, String)> = inputs
            .iter()
            .map(|input| match input {
                ScoringInput::Retrieval(query, document, _instruction) => (
                    format!("{}{}", self.settings.prompt, query),
                    document.body().to_string(),
                ),
                ScoringInput::Pair(query, document) => (query.clone(), document.clone()),
            })
            .collect();

        debug!("Scoring {} pairs", pairs.len());

        let scores = self.runtime.predict(&pairs, &merged)?;
        if scores.len() != pairs.len() {
            return Err(RagError::contract(format!(
                "cross encoder returned {} scores for {} pairs",
                scores.len(),
                pairs.len()
            )));
        }
        Ok(scores)
    }
}

impl EmbeddingModel for CrossEncoderModel {
    fn settings(&self) -> &EncoderSettings {
        &self.settings
    }

    fn kind(&self) -> &'static str {
        "CrossEncoderModel"
    }
}
